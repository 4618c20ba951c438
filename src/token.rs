use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::config;
use crate::error::{StorageError, StorageResult};
use crate::transport::{send_json, HttpRequest, HttpTransport};

/// Short-lived bearer credential for storage requests, distinct from the
/// long-lived API key that is only ever used to obtain one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub token: String,
    pub token_type: String,
    /// Base URL for subsequent storage calls scoped to this token.
    pub base_url: String,
    #[serde(default)]
    pub created_at: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<FixedOffset>>,
}

impl Token {
    /// A token is expired once `expires_at` is reached. A token without
    /// an expiry was never successfully issued and counts as expired.
    pub fn expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at.with_timezone(&Utc) <= Utc::now(),
            None => true,
        }
    }

    pub(crate) fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.token)
    }
}

/// Persistence for the current token.
///
/// Implementations must report a missing token as
/// [`StorageError::TokenNotFound`] and a stale one as
/// [`StorageError::TokenExpired`]; both make the manager refresh. Any
/// other error is fatal for the calling operation.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn get(&self) -> StorageResult<Token>;
    async fn set(&self, token: Token) -> StorageResult<()>;
}

/// Process-lifetime token store, the default.
///
/// Safe to share across concurrent part uploads: `set` replaces the whole
/// value under a write guard, so readers never observe a torn token.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: RwLock<Option<Token>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get(&self) -> StorageResult<Token> {
        let guard = self.token.read().await;
        match guard.as_ref() {
            None => Err(StorageError::TokenNotFound),
            Some(token) if token.expired() => Err(StorageError::TokenExpired),
            Some(token) => Ok(token.clone()),
        }
    }

    async fn set(&self, token: Token) -> StorageResult<()> {
        *self.token.write().await = Some(token);
        Ok(())
    }
}

/// Hands out a valid token for every authenticated request, refreshing
/// through the token-issuing endpoint when the store comes up empty or
/// expired. No retry happens here; retry policy belongs to the caller.
pub struct TokenManager {
    api_key: String,
    store: Arc<dyn TokenStore>,
    transport: Arc<dyn HttpTransport>,
}

impl TokenManager {
    pub(crate) fn new(
        api_key: String,
        store: Arc<dyn TokenStore>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            api_key,
            store,
            transport,
        }
    }

    /// Return the stored token, refreshing it first when absent or expired
    pub async fn current(&self) -> StorageResult<Token> {
        match self.store.get().await {
            Ok(token) => Ok(token),
            Err(StorageError::TokenNotFound) | Err(StorageError::TokenExpired) => {
                self.refresh().await
            }
            Err(err) => Err(StorageError::token_retrieval(err)),
        }
    }

    /// Issue a new token with the API key and persist it.
    ///
    /// Concurrent refreshes are last-write-wins, which is fine: every
    /// issued token is equally valid.
    pub async fn refresh(&self) -> StorageResult<Token> {
        debug!("refreshing storage token");
        let request = HttpRequest::post(config::token_endpoint())
            .header("Authorization", format!("Key {}", self.api_key))
            .header("Accept", "application/json")
            .header("User-Agent", config::USER_AGENT)
            .json(&serde_json::json!({}))
            .map_err(StorageError::refresh)?;

        let token: Token = send_json(self.transport.as_ref(), request)
            .await
            .map_err(StorageError::refresh)?;
        self.store.set(token.clone()).await?;
        Ok(token)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::Duration;
    use http::Method;

    use super::*;
    use crate::transport::mock::{json_response, status_response, MockTransport};

    pub(crate) fn token_json(expires_in: Duration) -> serde_json::Value {
        serde_json::json!({
            "token": "tok-1",
            "token_type": "Bearer",
            "base_url": "https://cdn.test",
            "expires_at": (Utc::now() + expires_in).to_rfc3339(),
        })
    }

    fn sample_token(expires_in: Duration) -> Token {
        serde_json::from_value(token_json(expires_in)).unwrap()
    }

    #[test]
    fn expiry_is_checked_against_now() {
        assert!(!sample_token(Duration::seconds(1)).expired());
        assert!(sample_token(Duration::seconds(-1)).expired());
        // Exactly-now is already expired; time only moves forward.
        assert!(sample_token(Duration::zero()).expired());
    }

    #[test]
    fn token_without_expiry_counts_as_expired() {
        let token = Token {
            token: "tok".to_string(),
            token_type: "Bearer".to_string(),
            base_url: "https://cdn.test".to_string(),
            created_at: None,
            expires_at: None,
        };
        assert!(token.expired());
    }

    #[tokio::test]
    async fn memory_store_distinguishes_missing_from_expired() {
        let store = MemoryTokenStore::new();
        assert!(matches!(
            store.get().await,
            Err(StorageError::TokenNotFound)
        ));

        store.set(sample_token(Duration::seconds(-5))).await.unwrap();
        assert!(matches!(store.get().await, Err(StorageError::TokenExpired)));

        store.set(sample_token(Duration::minutes(5))).await.unwrap();
        assert_eq!(store.get().await.unwrap().token, "tok-1");
    }

    fn manager(transport: Arc<MockTransport>, store: Arc<dyn TokenStore>) -> TokenManager {
        TokenManager::new("secret-key".to_string(), store, transport)
    }

    #[tokio::test]
    async fn valid_token_is_returned_without_a_refresh() {
        let transport = Arc::new(MockTransport::new(|_| {
            Err(StorageError::Internal("unexpected call".to_string()))
        }));
        let store = Arc::new(MemoryTokenStore::new());
        store.set(sample_token(Duration::minutes(5))).await.unwrap();

        let token = manager(Arc::clone(&transport), store).current().await.unwrap();
        assert_eq!(token.token, "tok-1");
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn empty_store_triggers_exactly_one_refresh() {
        let transport = Arc::new(MockTransport::new(|_| {
            Ok(json_response(200, token_json(Duration::minutes(5))))
        }));
        let store: Arc<dyn TokenStore> = Arc::new(MemoryTokenStore::new());
        let manager = manager(Arc::clone(&transport), store);

        let token = manager.current().await.unwrap();
        assert_eq!(token.base_url, "https://cdn.test");

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].method, Method::POST);
        assert!(calls[0].url.contains("/storage/auth/token"));
        assert_eq!(
            calls[0].header_value("authorization"),
            Some("Key secret-key")
        );
        assert_eq!(calls[0].body.as_ref(), b"{}");

        // The refreshed token is persisted; no second call.
        manager.current().await.unwrap();
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn expired_token_triggers_a_refresh() {
        let transport = Arc::new(MockTransport::new(|_| {
            Ok(json_response(200, token_json(Duration::minutes(5))))
        }));
        let store = Arc::new(MemoryTokenStore::new());
        store.set(sample_token(Duration::seconds(-1))).await.unwrap();

        manager(Arc::clone(&transport), store).current().await.unwrap();
        assert_eq!(transport.count_matching(&Method::POST, "/storage/auth/token"), 1);
    }

    #[tokio::test]
    async fn failed_refresh_surfaces_the_response_body() {
        let transport = Arc::new(MockTransport::new(|_| {
            Ok(status_response(401, "invalid key"))
        }));
        let store: Arc<dyn TokenStore> = Arc::new(MemoryTokenStore::new());

        let err = manager(transport, store).current().await.unwrap_err();
        assert!(matches!(err, StorageError::RefreshFailed { .. }));
        assert!(err.to_string().contains("invalid key"));
    }
}
