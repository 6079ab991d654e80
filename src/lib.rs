//! partrelay - streams multipart-form file uploads into S3 multipart uploads
//!
//! Incoming files are split into bounded chunks, each chunk is uploaded as an
//! independent part while the next one is read, and the remote object is only
//! completed once every part has been acknowledged.

pub mod api;
pub mod chunk;
pub mod config;
pub mod coordinator;
pub mod storage;
pub mod types;
