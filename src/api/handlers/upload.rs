//! POST /upload: relays each file field of a multipart form.

use super::{declared_size, AppState};
use crate::api::ApiError;
use crate::coordinator::{relay_file, IncomingFile};
use crate::types::FinalUploadInfo;
use axum::extract::{Multipart, State};
use axum::Json;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Text field carrying the JSON metadata for the files that follow it
pub const METADATA_FIELD: &str = "metadata";

/// Stream every file field straight to the transport, in form order.
///
/// Metadata comes from the most recent `metadata` text field. Without one,
/// the file field's own name is taken as the metadata string, which is how
/// older clients encode it.
#[instrument(skip(state, multipart))]
pub async fn upload_files(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<Vec<FinalUploadInfo>>, ApiError> {
    let mut metadata: Option<String> = None;
    let mut uploaded = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::MalformedForm(e.body_text()))?
    {
        let Some(filename) = field.file_name().map(str::to_string) else {
            if field.name() == Some(METADATA_FIELD) {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::MalformedForm(e.body_text()))?;
                metadata = Some(text);
            } else {
                debug!("Ignoring form field {:?}", field.name());
            }
            continue;
        };

        let raw_metadata = metadata
            .clone()
            .or_else(|| field.name().map(str::to_string))
            .unwrap_or_default();
        let declared_size = declared_size(field.headers());

        let file = IncomingFile {
            stream: Box::pin(field),
            original_filename: filename,
            declared_size,
            metadata: raw_metadata,
        };
        let info = relay_file(Arc::clone(&state.transport), &state.settings, file).await?;
        uploaded.push(info);
    }

    if uploaded.is_empty() {
        return Err(ApiError::MissingFile);
    }
    Ok(Json(uploaded))
}
