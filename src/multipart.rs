use std::ops::Range;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config;
use crate::error::{StorageError, StorageResult};
use crate::token::TokenManager;
use crate::transport::{send_json, HttpRequest, HttpTransport};

/// Identifies one in-progress multipart session. Immutable once created;
/// referenced by every part upload and by completion.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionHandle {
    /// URL of the destination object, also the base for part/complete calls.
    pub access_url: String,
    pub upload_id: String,
    #[serde(default)]
    pub upload_signature: String,
}

/// Per-part commit receipt returned by the backend.
///
/// The complete set, ordered by part number, must reach the completion
/// call unmodified; the backend rejects gaps and reorders corrupt the
/// resulting object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedPart {
    #[serde(rename = "partNumber")]
    pub part_number: u32,
    pub etag: String,
}

/// Byte ranges covering `0..total` in `chunk_size` steps, 1-based part
/// numbering follows the index. The final range may be shorter. A zero
/// chunk size is clamped to 1 so the partition always advances.
pub(crate) fn chunk_ranges(total: u64, chunk_size: u64) -> Vec<Range<u64>> {
    let chunk_size = chunk_size.max(1);
    let mut ranges = Vec::with_capacity(total.div_ceil(chunk_size) as usize);
    let mut start = 0;
    while start < total {
        let end = total.min(start + chunk_size);
        ranges.push(start..end);
        start = end;
    }
    ranges
}

/// Drives one multipart session: create, bounded fan-out of part
/// uploads, then completion with the ordered receipt list.
pub(crate) struct MultipartUpload {
    transport: Arc<dyn HttpTransport>,
    tokens: Arc<TokenManager>,
    chunk_size: u64,
    concurrency: usize,
}

impl MultipartUpload {
    pub(crate) fn new(
        transport: Arc<dyn HttpTransport>,
        tokens: Arc<TokenManager>,
        chunk_size: u64,
        concurrency: usize,
    ) -> Self {
        Self {
            transport,
            tokens,
            chunk_size: chunk_size.max(1),
            concurrency: concurrency.max(1),
        }
    }

    pub(crate) async fn run(
        &self,
        filename: &str,
        content_type: &str,
        payload: Bytes,
    ) -> StorageResult<String> {
        let handle = Arc::new(self.create(filename, content_type).await?);
        let ranges = chunk_ranges(payload.len() as u64, self.chunk_size);
        let total_parts = ranges.len();
        info!(
            upload_id = %handle.upload_id,
            parts = total_parts,
            concurrency = self.concurrency,
            "starting multipart upload"
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        for (idx, range) in ranges.into_iter().enumerate() {
            let chunk = payload.slice(range.start as usize..range.end as usize);
            let part_number = idx as u32 + 1;
            let transport = Arc::clone(&self.transport);
            let tokens = Arc::clone(&self.tokens);
            let handle = Arc::clone(&handle);
            let content_type = content_type.to_string();
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| StorageError::Internal("part pool closed".to_string()))?;
                upload_part(
                    transport.as_ref(),
                    tokens.as_ref(),
                    &handle,
                    &content_type,
                    part_number,
                    chunk,
                )
                .await
                .map(|part| (idx, part))
            });
        }

        // Join barrier: every task must return before the session either
        // fails or completes. Receipts land at their designated index so
        // the list is ordered no matter how completion interleaves.
        let mut parts: Vec<Option<UploadedPart>> = vec![None; total_parts];
        let mut failures: Vec<StorageError> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok((idx, part))) => {
                    debug!(part_number = part.part_number, "part uploaded");
                    parts[idx] = Some(part);
                }
                Ok(Err(err)) => {
                    warn!(error = %err, "part upload failed");
                    failures.push(err);
                }
                Err(join_err) => {
                    failures.push(StorageError::Internal(format!(
                        "part task panicked: {join_err}"
                    )));
                }
            }
        }

        if !failures.is_empty() {
            return Err(StorageError::UploadPartsFailed { failures });
        }

        let parts: Vec<UploadedPart> = parts.into_iter().flatten().collect();
        if parts.len() != total_parts {
            return Err(StorageError::Internal(
                "part receipts incomplete".to_string(),
            ));
        }

        self.complete(&handle, &parts).await?;
        Ok(handle.access_url.clone())
    }

    /// Open the session. Fatal for the whole upload on failure.
    async fn create(&self, filename: &str, content_type: &str) -> StorageResult<SessionHandle> {
        let token = self.tokens.current().await?;
        let url = format!("{}/files/upload/multipart", token.base_url);
        let request = HttpRequest::post(url)
            .header("Authorization", token.authorization())
            .header("User-Agent", config::USER_AGENT)
            .header("Accept", "application/json")
            .header("Content-Type", content_type)
            .header("X-Fal-File-Name", filename)
            .body(Bytes::from_static(b"{}"));

        send_json(self.transport.as_ref(), request)
            .await
            .map_err(StorageError::create)
    }

    async fn complete(&self, handle: &SessionHandle, parts: &[UploadedPart]) -> StorageResult<()> {
        let token = self.tokens.current().await?;
        let url = format!(
            "{}/multipart/{}/complete",
            handle.access_url, handle.upload_id
        );
        let request = HttpRequest::post(url)
            .header("Authorization", token.authorization())
            .header("User-Agent", config::USER_AGENT)
            .header("Accept", "application/json")
            .json(&serde_json::json!({ "parts": parts }))
            .map_err(StorageError::complete)?;

        let response = self
            .transport
            .send(request)
            .await
            .map_err(StorageError::complete)?;
        if !response.is_success() {
            return Err(StorageError::complete(response.into_status_error()));
        }
        info!(upload_id = %handle.upload_id, "multipart upload completed");
        Ok(())
    }
}

/// Upload one chunk against an open session. Each call acquires its own
/// token, so a token expiring mid-session is refreshed transparently.
async fn upload_part(
    transport: &dyn HttpTransport,
    tokens: &TokenManager,
    handle: &SessionHandle,
    content_type: &str,
    part_number: u32,
    chunk: Bytes,
) -> StorageResult<UploadedPart> {
    let token = tokens
        .current()
        .await
        .map_err(|err| StorageError::part(part_number, err))?;
    let url = format!(
        "{}/multipart/{}/{}",
        handle.access_url, handle.upload_id, part_number
    );
    let request = HttpRequest::put(url)
        .header("Authorization", token.authorization())
        .header("User-Agent", config::USER_AGENT)
        .header("Accept", "application/json")
        .header("Content-Type", content_type)
        // A compressed response may not surface the ETag header.
        .header("Accept-Encoding", "identity")
        .body(chunk);

    let response = transport
        .send(request)
        .await
        .map_err(|err| StorageError::part(part_number, err))?;
    if !response.is_success() {
        return Err(StorageError::part(
            part_number,
            response.into_status_error(),
        ));
    }

    let etag = response
        .header("etag")
        .map(str::to_owned)
        .filter(|etag| !etag.is_empty())
        .ok_or_else(|| StorageError::part(part_number, StorageError::MissingIntegrityTag))?;

    Ok(UploadedPart { part_number, etag })
}
