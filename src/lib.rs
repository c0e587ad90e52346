//! # rangereader
//!
//! A uniform byte-range read abstraction over local files, HTTP(S),
//! S3, Azure Blob, and Google Cloud Storage, with composable decorators
//! for block-alignment, in-memory caching, and on-disk caching.
//!
//! ## Architecture
//!
//! A reader is built by composing a chain of types each implementing
//! [`RangeReader`], the uniform read-bytes-by-offset contract:
//!
//! ```text
//! caller -> (optional outer BlockAligned) -> MemoryCache
//!        -> (inner BlockAligned) -> DiskCache -> backend adapter
//! ```
//!
//! - [`range_reader`] - the [`RangeReader`]/[`range_reader::RangeSource`]
//!   contract and its template read pipeline.
//! - [`buffer`] - [`buffer::ByteBuf`], the position/limit-tracked buffer
//!   every read path writes into.
//! - [`buffer_pool`] - reusable direct/heap scratch buffers for decorators
//!   that need scratch space (block-alignment, disk cache).
//! - [`backend`] - concrete adapters: file, HTTP(S), S3, Azure Blob, GCS.
//! - [`block_aligned`] - rounds reads out to power-of-two block boundaries.
//! - [`memory_cache`] - bounded, single-flight in-process cache.
//! - [`disk_cache`] - persistent per-key on-disk cache with crash tolerance.
//! - [`provider`] - URI-based backend discovery and configuration.
//! - [`auth`] - request-decoration hooks used by the HTTP backend.
//! - [`error`] - the crate's error taxonomy.
//!
//! ## Example
//!
//! ```rust,no_run
//! use rangereader::provider::{Configuration, ProviderRegistry};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = ProviderRegistry::with_builtins();
//! let config = Configuration::new(url::Url::parse("file:///data/slide.tiff")?);
//! let reader = registry.resolve(&config).await?;
//! let bytes = reader.read(0, 1024).await?;
//! println!("read {} bytes", bytes.written().len());
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod backend;
pub mod block_aligned;
pub mod buffer;
pub mod buffer_pool;
pub mod disk_cache;
pub mod error;
pub mod memory_cache;
pub mod provider;
pub mod range_reader;

pub use auth::Authenticator;
pub use backend::{AzureRangeReader, FileRangeReader, GcsRangeReader, HttpRangeReader, S3RangeReader};
pub use block_aligned::BlockAlignedReader;
pub use buffer::ByteBuf;
pub use buffer_pool::BufferPool;
pub use disk_cache::{DiskCacheConfig, DiskCacheReader, DiskCacheStats};
pub use error::{ConfigError, IoError, ProviderError};
pub use memory_cache::{MemoryCacheConfig, MemoryCacheReader, MemoryCacheStats};
pub use provider::{Configuration, Parameter, ParameterType, ParameterValue, Provider, ProviderRegistry};
pub use range_reader::{RangeReader, RangeSource};
