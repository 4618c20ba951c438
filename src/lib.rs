//! # fal-storage: client for the fal content store
//!
//! `fal-storage` moves arbitrarily large binary objects to the fal CDN.
//! Small payloads go out as a single authenticated POST; large ones run a
//! multipart session (create, N part uploads under bounded concurrency,
//! complete). Every request carries a short-lived bearer token that is
//! acquired and refreshed transparently from the long-lived API key.
//!
//! ## Key features
//!
//! - **One entry point**: [`Uploader::upload`] measures the payload and
//!   picks the single-shot or multipart path for you
//! - **Token lifecycle handled**: tokens are cached, checked for expiry
//!   on every use, and refreshed on demand (even mid-session)
//! - **Bounded fan-out**: part uploads run under a configurable
//!   concurrency cap, receipts are collected in part order regardless of
//!   completion order
//! - **Pluggable seams**: swap the token store
//!   ([`TokenStore`]) and the HTTP transport ([`HttpTransport`]) without
//!   touching the pipeline
//!
//! ## Quick start
//!
//! ```no_run
//! use fal_storage::prelude::*;
//!
//! # async fn run() -> StorageResult<()> {
//! let uploader = Uploader::new(std::env::var("FAL_KEY").unwrap(), UploaderConfig::default());
//!
//! let request = UploadRequest::from_bytes(std::fs::read("video.mp4")?)
//!     .with_filename("video.mp4")
//!     .with_content_type("video/mp4");
//!
//! let access_url = uploader.upload(request).await?;
//! println!("{access_url}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Memory model
//!
//! The input stream is buffered fully in memory before the transfer
//! starts: the single-shot/multipart decision needs the total size, which
//! is unknown until the stream ends. Peak memory therefore equals payload
//! size. Resuming a multipart session across process restarts is out of
//! scope; there is no persisted chunk progress.

mod config;
mod error;
mod multipart;
mod token;
mod transport;
mod uploader;

pub use config::{
    UploaderConfig, CDN_URL, DEFAULT_CHUNK_SIZE, DEFAULT_CONCURRENCY,
    DEFAULT_MULTIPART_THRESHOLD, REST_API_URL, USER_AGENT,
};
pub use error::{StorageError, StorageResult};
pub use multipart::{SessionHandle, UploadedPart};
pub use token::{MemoryTokenStore, Token, TokenManager, TokenStore};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
pub use uploader::{ByteStream, UploadRequest, Uploader};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        StorageError, StorageResult, Token, TokenStore, UploadRequest, Uploader, UploaderConfig,
    };
}
