//! Concrete backend adapters (C3, §4.3).
//!
//! Each submodule implements [`crate::range_reader::RangeSource`] (or, for
//! the GCS wrapper, delegates directly to [`http::HttpRangeReader`]) and is
//! registered with a [`crate::provider::Provider`] in
//! [`crate::provider::builtin`].

pub mod azure;
pub mod file;
pub mod gcs;
pub mod http;
pub mod s3;

pub use azure::AzureRangeReader;
pub use file::FileRangeReader;
pub use gcs::GcsRangeReader;
pub use http::HttpRangeReader;
pub use s3::S3RangeReader;
