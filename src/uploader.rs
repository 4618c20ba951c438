use std::pin::Pin;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use futures_util::StreamExt;
use serde::Deserialize;
use tracing::debug;

use crate::config::{self, UploaderConfig};
use crate::error::{StorageError, StorageResult};
use crate::multipart::MultipartUpload;
use crate::token::{MemoryTokenStore, TokenManager, TokenStore};
use crate::transport::{send_json, HttpRequest, HttpTransport, ReqwestTransport};

/// Stream of bytes accepted as upload input
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// One object to upload. Lives for the duration of a single
/// [`Uploader::upload`] call.
pub struct UploadRequest {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub body: ByteStream,
}

impl UploadRequest {
    pub fn new(body: ByteStream) -> Self {
        Self {
            filename: None,
            content_type: None,
            body,
        }
    }

    /// Convenience constructor for in-memory payloads
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self::new(Box::pin(futures_util::stream::once(async move {
            Ok::<_, std::io::Error>(bytes)
        })))
    }

    pub fn with_filename<S: Into<String>>(mut self, filename: S) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

#[derive(Debug, Deserialize)]
struct UploadedFile {
    access_url: String,
}

/// Top-level entry point for sending objects to the content store.
///
/// The input stream is drained fully into memory before anything is sent;
/// peak memory equals payload size. That is a deliberate simplicity
/// tradeoff, not an accident: size is unknown until the stream ends, and
/// the single-shot/multipart decision needs it up front.
pub struct Uploader {
    api_key: String,
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn TokenStore>,
    tokens: Arc<TokenManager>,
    config: UploaderConfig,
}

impl Uploader {
    /// Create an uploader with the default reqwest transport and an
    /// in-memory token store
    pub fn new(api_key: impl Into<String>, config: UploaderConfig) -> Self {
        Self::assemble(
            api_key.into(),
            Arc::new(MemoryTokenStore::new()),
            Arc::new(ReqwestTransport::default()),
            config,
        )
    }

    /// Swap in a persistent token store
    pub fn with_token_store<S: TokenStore + 'static>(self, store: S) -> Self {
        Self::assemble(self.api_key, Arc::new(store), self.transport, self.config)
    }

    /// Swap in a custom HTTP transport
    pub fn with_transport<T: HttpTransport + 'static>(self, transport: T) -> Self {
        Self::assemble(self.api_key, self.store, Arc::new(transport), self.config)
    }

    fn assemble(
        api_key: String,
        store: Arc<dyn TokenStore>,
        transport: Arc<dyn HttpTransport>,
        config: UploaderConfig,
    ) -> Self {
        let tokens = Arc::new(TokenManager::new(
            api_key.clone(),
            Arc::clone(&store),
            Arc::clone(&transport),
        ));
        Self {
            api_key,
            transport,
            store,
            tokens,
            config,
        }
    }

    /// Upload a payload and return its access URL.
    ///
    /// Payloads at or below the configured threshold go out as one
    /// authenticated POST; larger ones run a multipart session. Dropping
    /// the returned future cancels in-flight part uploads.
    pub async fn upload(&self, request: UploadRequest) -> StorageResult<String> {
        let filename = request
            .filename
            .unwrap_or_else(|| "upload.bin".to_string());
        let content_type = request
            .content_type
            .unwrap_or_else(|| "application/octet-stream".to_string());

        // Size is unknown until the source is drained.
        let mut body = request.body;
        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        let payload = buf.freeze();
        let size = payload.len() as u64;

        if size <= self.config.multipart_threshold {
            debug!(size, "taking single-shot upload path");
            return self.upload_file(&filename, &content_type, payload).await;
        }

        debug!(
            size,
            chunk_size = self.config.chunk_size,
            "taking multipart upload path"
        );
        let session = MultipartUpload::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.tokens),
            self.config.chunk_size,
            self.config.concurrency,
        );
        session.run(&filename, &content_type, payload).await
    }

    /// Single-shot path: one POST carrying the whole payload
    async fn upload_file(
        &self,
        filename: &str,
        content_type: &str,
        payload: Bytes,
    ) -> StorageResult<String> {
        let token = self.tokens.current().await?;
        let request = HttpRequest::post(config::file_upload_endpoint())
            .header("Authorization", token.authorization())
            .header("User-Agent", config::USER_AGENT)
            .header("X-Fal-File-Name", filename)
            .header("Content-Type", content_type)
            .body(payload);

        let uploaded: UploadedFile = send_json(self.transport.as_ref(), request)
            .await
            .map_err(StorageError::single_shot)?;
        Ok(uploaded.access_url)
    }
}
