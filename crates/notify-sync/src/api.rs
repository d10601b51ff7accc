//! REST client for the notification endpoints.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, trace};
use url::Url;

use crate::error::{Result, SyncError};
use crate::model::{Notification, NotificationFilter, Pagination};
use crate::tls::ensure_crypto_provider;

/// Query for one page of notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageQuery {
    pub page: u32,
    pub limit: u32,
    pub filter: NotificationFilter,
}

impl Default for PageQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 20,
            filter: NotificationFilter::All,
        }
    }
}

/// `GET /notifications`
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationPage {
    pub data: Vec<Notification>,
    #[serde(default)]
    pub pagination: Pagination,
}

/// `PUT /notifications/:id/read`
#[derive(Debug, Clone, Deserialize)]
pub struct MarkReadResponse {
    #[serde(default)]
    pub data: Option<Notification>,
    #[serde(rename = "unreadCount", default)]
    pub unread_count: Option<u64>,
}

/// `PUT /notifications/read-all`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MarkAllReadResponse {
    #[serde(default)]
    pub data: Option<MarkAllReadData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MarkAllReadData {
    #[serde(rename = "markedCount", default)]
    pub marked_count: Option<u64>,
    #[serde(rename = "unreadCount", default)]
    pub unread_count: Option<u64>,
}

/// `DELETE /notifications/:id`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeleteResponse {
    #[serde(rename = "unreadCount", default)]
    pub unread_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct CountData {
    count: u64,
}

#[derive(Debug, Default, Deserialize)]
struct DeleteReadResponse {
    #[serde(rename = "deletedCount", default)]
    deleted_count: u64,
}

#[derive(Debug, Default, Deserialize)]
struct CreateTestResponse {
    #[serde(default)]
    data: Option<Notification>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// Notification endpoints used by the reconciliation layer.
///
/// Every call carries the session's bearer token.
#[async_trait]
pub trait NotificationApi: Send + Sync {
    /// Fetch one page of notifications.
    async fn list(&self, token: &str, query: PageQuery) -> Result<NotificationPage>;

    /// Fetch the server's unread count.
    async fn unread_count(&self, token: &str) -> Result<u64>;

    /// Fetch a single notification.
    async fn get(&self, token: &str, id: &str) -> Result<Notification>;

    /// Mark one notification read.
    async fn mark_read(&self, token: &str, id: &str) -> Result<MarkReadResponse>;

    /// Mark every notification read.
    async fn mark_all_read(&self, token: &str) -> Result<MarkAllReadResponse>;

    /// Delete one notification.
    async fn delete(&self, token: &str, id: &str) -> Result<DeleteResponse>;

    /// Delete every read notification. Returns the number deleted.
    async fn delete_read(&self, token: &str) -> Result<u64>;

    /// Ask the server to create a test notification (development servers only).
    async fn create_test(&self, token: &str) -> Result<Option<Notification>>;
}

/// reqwest-backed [`NotificationApi`].
#[derive(Debug, Clone)]
pub struct RestNotificationApi {
    client: Client,
    base_url: Url,
}

impl RestNotificationApi {
    /// Build a client with its own connection pool.
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self> {
        // reqwest builds its rustls config even for plain-HTTP clients.
        ensure_crypto_provider();
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("notify-sync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Reuse an existing client.
    pub fn with_client(client: Client, base_url: Url) -> Self {
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::other(format!("API URL cannot be a base: {}", self.base_url)))?
            .pop_if_empty()
            .push("notifications")
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url, token: &str) -> RequestBuilder {
        trace!(%method, %url, "Notification API request");
        self.client.request(method, url).bearer_auth(token)
    }

    async fn send<T: DeserializeOwned + Default>(&self, builder: RequestBuilder) -> Result<T> {
        let response = check_status(builder.send().await?).await?;
        let body = response.bytes().await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(T::default());
        }
        Ok(serde_json::from_slice(&body)?)
    }

    async fn send_required<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = check_status(builder.send().await?).await?;
        Ok(response.json().await?)
    }
}

/// Turn non-2xx responses into [`SyncError::Api`], keeping the server's message.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|b| b.message)
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        });
    debug!(status = status.as_u16(), %message, "Notification API error");
    Err(SyncError::api(status.as_u16(), message))
}

#[async_trait]
impl NotificationApi for RestNotificationApi {
    async fn list(&self, token: &str, query: PageQuery) -> Result<NotificationPage> {
        let url = self.endpoint(&[])?;
        let builder = self.request(Method::GET, url, token).query(&[
            ("page", query.page.to_string()),
            ("limit", query.limit.to_string()),
            ("filter", query.filter.to_string()),
        ]);
        self.send_required(builder).await
    }

    async fn unread_count(&self, token: &str) -> Result<u64> {
        let url = self.endpoint(&["unread", "count"])?;
        let body: DataEnvelope<CountData> =
            self.send_required(self.request(Method::GET, url, token)).await?;
        Ok(body.data.count)
    }

    async fn get(&self, token: &str, id: &str) -> Result<Notification> {
        let url = self.endpoint(&[id])?;
        let body: DataEnvelope<Notification> =
            self.send_required(self.request(Method::GET, url, token)).await?;
        Ok(body.data)
    }

    async fn mark_read(&self, token: &str, id: &str) -> Result<MarkReadResponse> {
        let url = self.endpoint(&[id, "read"])?;
        self.send_required(self.request(Method::PUT, url, token)).await
    }

    async fn mark_all_read(&self, token: &str) -> Result<MarkAllReadResponse> {
        let url = self.endpoint(&["read-all"])?;
        self.send(self.request(Method::PUT, url, token)).await
    }

    async fn delete(&self, token: &str, id: &str) -> Result<DeleteResponse> {
        let url = self.endpoint(&[id])?;
        self.send(self.request(Method::DELETE, url, token)).await
    }

    async fn delete_read(&self, token: &str) -> Result<u64> {
        let url = self.endpoint(&["read"])?;
        let body: DeleteReadResponse = self.send(self.request(Method::DELETE, url, token)).await?;
        Ok(body.deleted_count)
    }

    async fn create_test(&self, token: &str) -> Result<Option<Notification>> {
        let url = self.endpoint(&["test"])?;
        let body: CreateTestResponse = self.send(self.request(Method::POST, url, token)).await?;
        Ok(body.data)
    }
}
