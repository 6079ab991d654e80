//! Multipart transport abstraction

mod memory;
mod s3;
mod traits;

pub use memory::{MemoryTransport, OpenSession, StoredObject};
pub use s3::S3Transport;
pub use traits::{MultipartTransport, SessionStart, TransportError};
