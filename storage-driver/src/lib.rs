//! # Object store driver contract
//!
//! The [`Driver`] trait is implemented by every blob backend. It deals in
//! buckets and `/`-separated remote paths, streams content in both
//! directions, and reports failures as [`StorageError`] values categorized
//! by [`StorageErrorKind`].

mod checksum;
mod driver;
mod error;

pub use checksum::{Checksum, ChecksumAlgorithm, ChecksumReader, Hasher, UnknownAlgorithm};
pub use driver::{
    delete_each, BlobReader, BoxReader, Driver, Metadata, Reader, UploadOptions, Writer,
};
pub use error::{DeleteErrors, StorageError, StorageErrorBuilder, StorageErrorKind};
