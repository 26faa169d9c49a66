//! # vidiary-blob: object store adapter
//!
//! Uniform access to the remote blob store holding input videos and result
//! artifacts. No business logic lives here: callers get verified uploads,
//! ranged concurrent downloads for large objects, head lookups that treat
//! not-found as `None`, presigned GET/PUT URLs, and deletes.
//!
//! The `ObjectStore` trait is the seam: `S3ObjectStore` is the production
//! backend, `MemoryObjectStore` backs tests.

mod error;
pub mod memory;
mod s3;
pub mod store;

pub use error::{BlobError, BlobResult};
pub use memory::MemoryObjectStore;
pub use s3::S3ObjectStore;
pub use store::{ObjectHead, ObjectStore, PresignMethod, UploadOutcome};
