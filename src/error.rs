use thiserror::Error;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while talking to the content store
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("token not found")]
    TokenNotFound,

    #[error("token expired")]
    TokenExpired,

    #[error("token retrieval failed: {source}")]
    TokenRetrieval {
        #[source]
        source: Box<StorageError>,
    },

    #[error("refresh token failed: {source}")]
    RefreshFailed {
        #[source]
        source: Box<StorageError>,
    },

    #[error("create upload failed: {source}")]
    CreateUploadFailed {
        #[source]
        source: Box<StorageError>,
    },

    #[error("upload part {part_number} failed: {source}")]
    UploadPartFailed {
        part_number: u32,
        #[source]
        source: Box<StorageError>,
    },

    /// Every failed part of a multipart session, joined. The session is
    /// never completed when this is returned.
    #[error("{} upload part(s) failed: [{}]", .failures.len(), render_failures(.failures))]
    UploadPartsFailed { failures: Vec<StorageError> },

    #[error("upload complete failed: {source}")]
    UploadCompleteFailed {
        #[source]
        source: Box<StorageError>,
    },

    #[error("upload file failed: {source}")]
    UploadFileFailed {
        #[source]
        source: Box<StorageError>,
    },

    /// The backend answered 2xx but without an ETag, so the part cannot
    /// be referenced at completion.
    #[error("part response is missing its integrity tag")]
    MissingIntegrityTag,

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport error: {source}")]
    Transport {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("decode error: {source}")]
    Decode {
        #[from]
        source: serde_json::Error,
    },

    #[error("read error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

fn render_failures(failures: &[StorageError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl StorageError {
    /// Wrap any error type as a transport failure
    pub fn transport<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport {
            source: Box::new(error),
        }
    }

    pub(crate) fn token_retrieval(source: StorageError) -> Self {
        Self::TokenRetrieval {
            source: Box::new(source),
        }
    }

    pub(crate) fn refresh(source: StorageError) -> Self {
        Self::RefreshFailed {
            source: Box::new(source),
        }
    }

    pub(crate) fn create(source: StorageError) -> Self {
        Self::CreateUploadFailed {
            source: Box::new(source),
        }
    }

    pub(crate) fn part(part_number: u32, source: StorageError) -> Self {
        Self::UploadPartFailed {
            part_number,
            source: Box::new(source),
        }
    }

    pub(crate) fn complete(source: StorageError) -> Self {
        Self::UploadCompleteFailed {
            source: Box::new(source),
        }
    }

    pub(crate) fn single_shot(source: StorageError) -> Self {
        Self::UploadFileFailed {
            source: Box::new(source),
        }
    }

    /// Part numbers carried by a part failure, in the order they failed
    pub fn failed_parts(&self) -> Vec<u32> {
        match self {
            Self::UploadPartFailed { part_number, .. } => vec![*part_number],
            Self::UploadPartsFailed { failures } => failures
                .iter()
                .filter_map(|failure| match failure {
                    Self::UploadPartFailed { part_number, .. } => Some(*part_number),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}
