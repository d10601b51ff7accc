//! Notification service: the push channel, the REST client and the store
//! behind one handle.
//!
//! The service owns a [`TransportChannel`] for the session, a
//! [`NotificationApi`] for user actions and a [`NotificationStore`] that
//! both feed through the [`Reconciler`]. Observers subscribe to
//! [`StoreEvent`]s.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::alert::AlertSink;
use crate::api::{NotificationApi, PageQuery, RestNotificationApi};
use crate::channel::{ChannelState, TransportChannel};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::model::{Notification, NotificationFilter, Pagination};
use crate::reconcile::{Reconciler, StoreEvent};
use crate::store::{NotificationStore, StoreSnapshot};

/// Client-side notification sync for one user session.
pub struct NotificationService {
    config: SyncConfig,
    api: Arc<dyn NotificationApi>,
    channel: Arc<TransportChannel>,
    reconciler: Arc<Reconciler>,
    events: broadcast::Sender<StoreEvent>,
    token: RwLock<Option<String>>,
    reconcile_task: Mutex<Option<JoinHandle<()>>>,
    lifetime: CancellationToken,
}

impl NotificationService {
    /// Create a service with the given REST client and alert sink.
    pub fn new(
        config: SyncConfig,
        api: Arc<dyn NotificationApi>,
        alerts: Arc<dyn AlertSink>,
    ) -> Result<Self> {
        config.validate()?;
        let channel = Arc::new(TransportChannel::new(config.channel_config()?));
        let (events, _) = broadcast::channel(config.event_buffer);
        let store = Arc::new(RwLock::new(NotificationStore::new()));
        let lifetime = CancellationToken::new();
        let reconciler = Arc::new(Reconciler::new(
            store,
            events.clone(),
            alerts,
            lifetime.clone(),
        ));

        Ok(Self {
            config,
            api,
            channel,
            reconciler,
            events,
            token: RwLock::new(None),
            reconcile_task: Mutex::new(None),
            lifetime,
        })
    }

    /// Create a service backed by [`RestNotificationApi`].
    pub fn with_rest(config: SyncConfig, alerts: Arc<dyn AlertSink>) -> Result<Self> {
        let api = RestNotificationApi::new(config.api_base_url()?, config.request_timeout())?;
        Self::new(config, Arc::new(api), alerts)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The push channel, for direct socket commands.
    pub fn channel(&self) -> &Arc<TransportChannel> {
        &self.channel
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel.state()
    }

    /// Subscribe to store changes and channel notices.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.reconciler.snapshot()
    }

    pub fn unread_count(&self) -> u64 {
        self.snapshot().unread_count
    }

    pub fn is_disposed(&self) -> bool {
        self.lifetime.is_cancelled()
    }

    /// Use `token` for REST calls without opening the push channel.
    pub fn set_token(&self, token: impl Into<String>) -> Result<()> {
        self.ensure_alive()?;
        *self.token.write() = Some(token.into());
        Ok(())
    }

    /// Authenticate the session and open the push channel.
    ///
    /// Calling this while the channel is already connecting or connected only
    /// updates the REST token.
    pub fn connect(&self, token: &str) -> Result<()> {
        self.set_token(token)?;
        self.ensure_reconciler();
        self.channel.connect(token)
    }

    /// Close the push channel and forget the session token (logout).
    pub fn disconnect(&self) {
        self.channel.disconnect();
        self.token.write().take();
    }

    /// Tear the service down. REST calls still in flight complete, but their
    /// results are no longer applied. Idempotent.
    pub fn dispose(&self) {
        if self.lifetime.is_cancelled() {
            return;
        }
        info!("Disposing notification service");
        self.lifetime.cancel();
        self.disconnect();
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.lifetime.is_cancelled() {
            return Err(SyncError::Disposed);
        }
        Ok(())
    }

    fn ensure_reconciler(&self) {
        let mut task = self.reconcile_task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        // Subscribe before the channel starts so the first Connected is seen.
        let events = self.channel.subscribe();
        *task = Some(tokio::spawn(self.reconciler.clone().run(
            events,
            self.channel.clone(),
            self.config.count_refresh_delay(),
        )));
    }

    fn token(&self) -> Result<String> {
        self.ensure_alive()?;
        self.token.read().clone().ok_or(SyncError::NotAuthenticated)
    }

    /// Query for `page` using the configured page size and the store's filter.
    pub fn page_query(&self, page: u32) -> PageQuery {
        PageQuery {
            page: page.max(1),
            limit: self.config.page_size,
            filter: self.snapshot().filter,
        }
    }

    pub fn set_filter(&self, filter: NotificationFilter) {
        self.reconciler.mutate(|store| store.set_filter(filter));
    }

    pub fn clear_error(&self) {
        self.reconciler.mutate(NotificationStore::clear_error);
    }

    /// Load one page into the store, replacing the visible list.
    pub async fn fetch_page(&self, query: PageQuery) -> Result<Pagination> {
        let token = self.token()?;
        self.reconciler.mutate(NotificationStore::begin_loading);

        match self.api.list(&token, query).await {
            Ok(page) => {
                let pagination = page.pagination;
                self.reconciler.apply_page(page);
                Ok(pagination)
            }
            Err(e) => {
                warn!(error = %e, "Failed to fetch notifications");
                self.reconciler.apply_page_error(&e.to_string());
                Err(e)
            }
        }
    }

    /// Fetch the unread count over REST.
    pub async fn refresh_unread_count(&self) -> Result<u64> {
        let token = self.token()?;
        let count = self.api.unread_count(&token).await?;
        self.reconciler.apply_unread_count(count);
        Ok(count)
    }

    /// Fetch a single notification. The store is not modified.
    pub async fn get_notification(&self, id: &str) -> Result<Notification> {
        let token = self.token()?;
        self.api.get(&token, id).await
    }

    pub async fn mark_read(&self, id: &str) -> Result<()> {
        let token = self.token()?;
        let response = self.api.mark_read(&token, id).await.inspect_err(|e| {
            warn!(id, error = %e, "Failed to mark notification read");
        })?;
        self.reconciler.apply_mark_read(id, &response);
        Ok(())
    }

    pub async fn mark_all_read(&self) -> Result<()> {
        let token = self.token()?;
        let response = self.api.mark_all_read(&token).await.inspect_err(|e| {
            warn!(error = %e, "Failed to mark all notifications read");
        })?;
        if let Some(marked) = response.data.as_ref().and_then(|d| d.marked_count) {
            debug!(marked, "Marked notifications read");
        }
        self.reconciler.apply_mark_all_read(&response);
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let token = self.token()?;
        let response = self.api.delete(&token, id).await.inspect_err(|e| {
            warn!(id, error = %e, "Failed to delete notification");
        })?;
        self.reconciler.apply_delete(id, &response);
        Ok(())
    }

    /// Delete every read notification. Returns the server's deleted count.
    pub async fn delete_read(&self) -> Result<u64> {
        let token = self.token()?;
        let deleted = self.api.delete_read(&token).await?;
        self.reconciler.apply_delete_read();
        Ok(deleted)
    }

    /// Ask the server for a test notification and insert it.
    pub async fn create_test_notification(&self) -> Result<Option<Notification>> {
        let token = self.token()?;
        let created = self.api.create_test(&token).await?;
        if let Some(notification) = &created {
            self.reconciler.apply_created(notification.clone());
        }
        Ok(created)
    }
}

impl Drop for NotificationService {
    fn drop(&mut self) {
        self.lifetime.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::NoopAlertSink;
    use crate::api::{DeleteResponse, MarkAllReadResponse, MarkReadResponse, NotificationPage};
    use async_trait::async_trait;
    use tokio::sync::Notify;

    /// In-memory API. With a gate, `mark_read` signals the first notify on
    /// entry and waits for the second.
    #[derive(Default)]
    struct FakeApi {
        gate: Option<(Arc<Notify>, Arc<Notify>)>,
        fail: bool,
    }

    #[async_trait]
    impl NotificationApi for FakeApi {
        async fn list(&self, _token: &str, query: PageQuery) -> Result<NotificationPage> {
            if self.fail {
                return Err(SyncError::api(500, "boom"));
            }
            Ok(NotificationPage {
                data: vec![
                    Notification::new("a", "t", "m"),
                    Notification::new("b", "t", "m"),
                ],
                pagination: Pagination {
                    page: query.page,
                    limit: query.limit,
                    total: 2,
                    total_pages: 1,
                },
            })
        }

        async fn unread_count(&self, _token: &str) -> Result<u64> {
            Ok(2)
        }

        async fn get(&self, _token: &str, id: &str) -> Result<Notification> {
            Ok(Notification::new(id, "t", "m"))
        }

        async fn mark_read(&self, _token: &str, _id: &str) -> Result<MarkReadResponse> {
            if let Some((entered, release)) = &self.gate {
                entered.notify_one();
                release.notified().await;
            }
            if self.fail {
                return Err(SyncError::api(500, "boom"));
            }
            Ok(MarkReadResponse {
                data: None,
                unread_count: Some(1),
            })
        }

        async fn mark_all_read(&self, _token: &str) -> Result<MarkAllReadResponse> {
            Ok(MarkAllReadResponse::default())
        }

        async fn delete(&self, _token: &str, _id: &str) -> Result<DeleteResponse> {
            Ok(DeleteResponse { unread_count: None })
        }

        async fn delete_read(&self, _token: &str) -> Result<u64> {
            Ok(1)
        }

        async fn create_test(&self, _token: &str) -> Result<Option<Notification>> {
            Ok(Some(Notification::new("test", "Test", "hello")))
        }
    }

    fn service(api: FakeApi) -> NotificationService {
        let service =
            NotificationService::new(SyncConfig::default(), Arc::new(api), Arc::new(NoopAlertSink))
                .unwrap();
        service.set_token("token").unwrap();
        service
    }

    #[tokio::test]
    async fn test_requires_token() {
        let service = NotificationService::new(
            SyncConfig::default(),
            Arc::new(FakeApi::default()),
            Arc::new(NoopAlertSink),
        )
        .unwrap();
        let err = service.fetch_page(PageQuery::default()).await.unwrap_err();
        assert!(matches!(err, SyncError::NotAuthenticated));
    }

    #[tokio::test]
    async fn test_fetch_and_mark_read() {
        let service = service(FakeApi::default());
        service.fetch_page(service.page_query(1)).await.unwrap();
        service.refresh_unread_count().await.unwrap();
        assert_eq!(service.unread_count(), 2);

        service.mark_read("a").await.unwrap();
        let snapshot = service.snapshot();
        assert_eq!(snapshot.unread_count, 1);
        assert!(snapshot.notifications.iter().any(|n| n.id == "a" && n.is_read));
        assert!(!snapshot.loading);
    }

    #[tokio::test]
    async fn test_failed_fetch_records_error() {
        let service = service(FakeApi {
            fail: true,
            ..Default::default()
        });
        assert!(service.fetch_page(PageQuery::default()).await.is_err());
        let snapshot = service.snapshot();
        assert!(!snapshot.loading);
        assert_eq!(snapshot.error.as_deref(), Some("API error (500): boom"));

        service.clear_error();
        assert!(service.snapshot().error.is_none());
    }

    #[tokio::test]
    async fn test_failed_action_leaves_store_untouched() {
        let service = service(FakeApi::default());
        service.fetch_page(PageQuery::default()).await.unwrap();
        service.refresh_unread_count().await.unwrap();
        let before = service.snapshot();

        let failing = NotificationService::new(
            SyncConfig::default(),
            Arc::new(FakeApi {
                fail: true,
                ..Default::default()
            }),
            Arc::new(NoopAlertSink),
        )
        .unwrap();
        failing.set_token("t").unwrap();
        failing.reconciler.mutate(|store| {
            store.set_list(before.notifications.clone(), before.pagination)
                | store.set_unread_count(before.unread_count)
        });

        assert!(failing.mark_read("a").await.is_err());
        let after = failing.snapshot();
        assert_eq!(after.notifications, before.notifications);
        assert_eq!(after.unread_count, before.unread_count);
    }

    #[tokio::test]
    async fn test_result_after_dispose_is_ignored() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let service = Arc::new(service(FakeApi {
            gate: Some((entered.clone(), release.clone())),
            fail: false,
        }));
        service.fetch_page(PageQuery::default()).await.unwrap();

        let pending = tokio::spawn({
            let service = service.clone();
            async move { service.mark_read("a").await }
        });
        entered.notified().await;
        service.dispose();
        release.notify_one();

        assert!(pending.await.unwrap().is_ok());
        assert!(service.snapshot().notifications.iter().all(|n| !n.is_read));
        assert!(matches!(
            service.fetch_page(PageQuery::default()).await,
            Err(SyncError::Disposed)
        ));
    }

    #[tokio::test]
    async fn test_create_and_delete_read() {
        let service = service(FakeApi::default());
        let created = service.create_test_notification().await.unwrap().unwrap();
        assert_eq!(service.snapshot().notifications[0].id, created.id);
        assert_eq!(service.unread_count(), 1);

        service.mark_all_read().await.unwrap();
        assert_eq!(service.unread_count(), 0);
        assert_eq!(service.delete_read().await.unwrap(), 1);
        assert!(service.snapshot().notifications.is_empty());
    }

    #[tokio::test]
    async fn test_filter_feeds_page_query() {
        let service = service(FakeApi::default());
        service.set_filter(NotificationFilter::Unread);
        let query = service.page_query(0);
        assert_eq!(query.page, 1);
        assert_eq!(query.limit, 20);
        assert_eq!(query.filter, NotificationFilter::Unread);
    }
}
