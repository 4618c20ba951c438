/// Base URL of the fal REST API
pub const REST_API_URL: &str = "https://rest.alpha.fal.ai";

/// Base URL of the fal CDN
pub const CDN_URL: &str = "https://v3.fal.media";

/// Sent on every request issued by this crate
pub const USER_AGENT: &str = concat!("fal-storage/", env!("CARGO_PKG_VERSION"), " (rust)");

/// Default size of one multipart chunk (10 MiB)
pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// Payloads at or below this size take the single-shot path (100 MiB)
pub const DEFAULT_MULTIPART_THRESHOLD: u64 = 100 * 1024 * 1024;

/// Part uploads are sequential unless opted in to more
pub const DEFAULT_CONCURRENCY: usize = 1;

pub(crate) fn token_endpoint() -> String {
    format!("{REST_API_URL}/storage/auth/token?storage_type=fal-cdn-v3")
}

pub(crate) fn file_upload_endpoint() -> String {
    format!("{CDN_URL}/files/upload")
}

/// Tuning knobs for the upload pipeline
#[derive(Debug, Clone)]
pub struct UploaderConfig {
    /// Size of each multipart chunk. The final chunk may be smaller.
    pub chunk_size: u64,

    /// Payloads at or below this size are sent in one request.
    pub multipart_threshold: u64,

    /// Upper bound on concurrent part uploads.
    pub concurrency: usize,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl UploaderConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the multipart chunk size
    pub fn with_chunk_size(mut self, bytes: u64) -> Self {
        self.chunk_size = bytes;
        self
    }

    /// Set the single-shot/multipart threshold
    pub fn with_multipart_threshold(mut self, bytes: u64) -> Self {
        self.multipart_threshold = bytes;
        self
    }

    /// Set the number of concurrent part uploads
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }
}
