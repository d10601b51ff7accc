//! Reconciliation of push events and REST results into the local store.
//!
//! Precedence rules:
//! - a REST success is authoritative for the mutation it performed, and its
//!   reported unread count replaces any local arithmetic;
//! - push events are authoritative for mutations made elsewhere and are
//!   applied through idempotent store operations, so replays are harmless;
//! - a pushed `notification_count` always overwrites the local counter.
//!
//! Nothing is applied optimistically: a failed REST call never reaches this
//! module, so there is nothing to roll back.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::alert::{AlertSink, dispatch_alerts};
use crate::api::{DeleteResponse, MarkAllReadResponse, MarkReadResponse, NotificationPage};
use crate::channel::{ChannelEvent, ChannelState, TransportChannel};
use crate::model::Notification;
use crate::protocol::ServerEvent;
use crate::store::{NotificationStore, StoreSnapshot};

/// Events published to store observers.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// The store changed; carries the new state.
    Changed(Box<StoreSnapshot>),
    /// A notification was pushed by the server and inserted.
    NewNotification(Box<Notification>),
    /// The push channel changed state.
    ChannelStateChanged(ChannelState),
    /// The server refused the channel credentials.
    ChannelRejected { reason: String },
}

/// Applies REST outcomes and channel events to the shared store.
pub struct Reconciler {
    store: Arc<RwLock<NotificationStore>>,
    events: broadcast::Sender<StoreEvent>,
    alerts: Arc<dyn AlertSink>,
    /// Cancelled on service teardown; late results are discarded after that
    lifetime: CancellationToken,
}

impl Reconciler {
    pub fn new(
        store: Arc<RwLock<NotificationStore>>,
        events: broadcast::Sender<StoreEvent>,
        alerts: Arc<dyn AlertSink>,
        lifetime: CancellationToken,
    ) -> Self {
        Self {
            store,
            events,
            alerts,
            lifetime,
        }
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.store.read().snapshot()
    }

    fn publish(&self, event: StoreEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Apply `f` to the store unless the owner has been torn down, publishing
    /// a snapshot when it reports a change.
    pub fn mutate(&self, f: impl FnOnce(&mut NotificationStore) -> bool) -> bool {
        if self.lifetime.is_cancelled() {
            debug!("Discarding store update after teardown");
            return false;
        }
        let snapshot = {
            let mut store = self.store.write();
            if !f(&mut store) {
                return false;
            }
            store.snapshot()
        };
        self.publish(StoreEvent::Changed(Box::new(snapshot)));
        true
    }

    /// Apply one server-pushed event.
    pub fn apply_server_event(&self, event: ServerEvent) -> bool {
        match event {
            ServerEvent::NewNotification(notification) => {
                let mut replay = false;
                let inserted = self.mutate(|store| {
                    replay = store.get(&notification.id).is_some();
                    store.insert_new((*notification).clone())
                });
                if inserted && !replay {
                    debug!(id = %notification.id, "Inserted pushed notification");
                    dispatch_alerts(self.alerts.clone(), (*notification).clone());
                    self.publish(StoreEvent::NewNotification(notification));
                }
                inserted
            }
            ServerEvent::NotificationCount(count) => {
                self.mutate(|store| store.set_unread_count(count))
            }
            ServerEvent::AllNotificationsRead => self.mutate(NotificationStore::mark_all_read),
            ServerEvent::NotificationDeleted(id) => self.mutate(|store| store.remove_one(&id)),
        }
    }

    /// A page fetch succeeded.
    pub fn apply_page(&self, page: NotificationPage) -> bool {
        self.mutate(|store| store.set_list(page.data, page.pagination))
    }

    /// A page fetch failed.
    pub fn apply_page_error(&self, message: &str) -> bool {
        self.mutate(|store| store.fail_loading(message))
    }

    pub fn apply_unread_count(&self, count: u64) -> bool {
        self.mutate(|store| store.set_unread_count(count))
    }

    /// `PUT /notifications/:id/read` succeeded.
    pub fn apply_mark_read(&self, id: &str, response: &MarkReadResponse) -> bool {
        let server_copy = response.data.as_ref().filter(|n| n.id == id);
        self.mutate(|store| match response.unread_count {
            Some(count) => {
                let marked = match server_copy {
                    Some(server) => store.apply_read(server),
                    None => store.mark_one_read(id),
                };
                store.set_unread_count(count) | marked
            }
            // No server count: fall back to the local decrement.
            None => match server_copy.and_then(|n| n.read_at) {
                Some(at) => store.mark_one_read_at(id, at),
                None => store.mark_one_read(id),
            },
        })
    }

    /// `PUT /notifications/read-all` succeeded.
    pub fn apply_mark_all_read(&self, response: &MarkAllReadResponse) -> bool {
        let reported = response.data.as_ref().and_then(|d| d.unread_count);
        self.mutate(|store| {
            let changed = store.mark_all_read();
            match reported {
                Some(count) => store.set_unread_count(count) | changed,
                None => changed,
            }
        })
    }

    /// `DELETE /notifications/:id` succeeded.
    pub fn apply_delete(&self, id: &str, response: &DeleteResponse) -> bool {
        self.mutate(|store| {
            let removed = store.remove_one(id);
            match response.unread_count {
                Some(count) => store.set_unread_count(count) | removed,
                None => removed,
            }
        })
    }

    /// `DELETE /notifications/read` succeeded.
    pub fn apply_delete_read(&self) -> bool {
        self.mutate(|store| store.remove_read() > 0)
    }

    /// A test notification was created through the REST API.
    pub fn apply_created(&self, notification: Notification) -> bool {
        self.mutate(|store| store.insert_new(notification))
    }

    /// Consume channel events until the lifetime token is cancelled.
    ///
    /// After every successful (re)connection one unread-count request is sent
    /// once `refresh_delay` has passed. A newer connection cycle or a drop
    /// supersedes a refresh that has not fired yet.
    pub async fn run(
        self: Arc<Self>,
        mut events: broadcast::Receiver<ChannelEvent>,
        channel: Arc<TransportChannel>,
        refresh_delay: Duration,
    ) {
        let mut pending_refresh: Option<CancellationToken> = None;

        loop {
            let event = tokio::select! {
                _ = self.lifetime.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Ok(ChannelEvent::Server(event)) => {
                    self.apply_server_event(event);
                }
                Ok(ChannelEvent::Connected { session_id, reconnect }) => {
                    debug!(%session_id, reconnect, "Scheduling unread count refresh");
                    if let Some(previous) = pending_refresh.take() {
                        previous.cancel();
                    }
                    let token = self.lifetime.child_token();
                    pending_refresh = Some(token.clone());
                    let channel = channel.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = tokio::time::sleep(refresh_delay) => channel.request_unread_count(),
                            _ = token.cancelled() => {}
                        }
                    });
                }
                Ok(ChannelEvent::StateChanged(state)) => {
                    if state != ChannelState::Connected {
                        if let Some(previous) = pending_refresh.take() {
                            previous.cancel();
                        }
                    }
                    self.publish(StoreEvent::ChannelStateChanged(state));
                }
                Ok(ChannelEvent::Rejected { reason }) => {
                    self.publish(StoreEvent::ChannelRejected { reason });
                }
                Err(RecvError::Lagged(skipped)) => {
                    // Missed events may include count updates; resync.
                    warn!(skipped, "Reconciler lagged behind channel events");
                    channel.request_unread_count();
                }
                Err(RecvError::Closed) => break,
            }
        }

        if let Some(previous) = pending_refresh.take() {
            previous.cancel();
        }
        info!("Notification reconciler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::NoopAlertSink;
    use crate::model::Pagination;
    use chrono::Utc;

    fn reconciler() -> (Reconciler, broadcast::Receiver<StoreEvent>, CancellationToken) {
        let (tx, rx) = broadcast::channel(64);
        let lifetime = CancellationToken::new();
        let reconciler = Reconciler::new(
            Arc::new(RwLock::new(NotificationStore::new())),
            tx,
            Arc::new(NoopAlertSink),
            lifetime.clone(),
        );
        (reconciler, rx, lifetime)
    }

    fn unread(id: &str) -> Notification {
        Notification::new(id, "title", "body")
    }

    fn page(items: Vec<Notification>, total: u64) -> NotificationPage {
        NotificationPage {
            data: items,
            pagination: Pagination {
                page: 1,
                limit: 20,
                total,
                total_pages: 1,
            },
        }
    }

    #[tokio::test]
    async fn test_new_push_insert() {
        let (r, mut rx, _) = reconciler();
        assert!(r.apply_server_event(ServerEvent::NewNotification(Box::new(unread("n1")))));

        let snapshot = r.snapshot();
        assert_eq!(snapshot.notifications.len(), 1);
        assert_eq!(snapshot.unread_count, 1);
        assert!(matches!(rx.try_recv(), Ok(StoreEvent::Changed(_))));
        assert!(matches!(rx.try_recv(), Ok(StoreEvent::NewNotification(n)) if n.id == "n1"));
    }

    #[tokio::test]
    async fn test_replayed_push_is_absorbed() {
        let (r, _rx, _) = reconciler();
        let n = unread("n1");
        r.apply_server_event(ServerEvent::NewNotification(Box::new(n.clone())));
        assert!(!r.apply_server_event(ServerEvent::NewNotification(Box::new(n))));
        assert_eq!(r.snapshot().unread_count, 1);
    }

    #[test]
    fn test_mark_read_uses_server_count() {
        let (r, _rx, _) = reconciler();
        r.apply_page(page(vec![unread("n1")], 1));
        r.apply_unread_count(1);

        let stamp = Utc::now();
        let response = MarkReadResponse {
            data: Some(unread("n1").read(stamp)),
            unread_count: Some(0),
        };
        assert!(r.apply_mark_read("n1", &response));

        let snapshot = r.snapshot();
        let n = &snapshot.notifications[0];
        assert!(n.is_read);
        assert_eq!(n.read_at, Some(stamp));
        assert_eq!(snapshot.unread_count, 0);
    }

    #[test]
    fn test_mark_read_server_count_beats_local_arithmetic() {
        let (r, _rx, _) = reconciler();
        r.apply_page(page(vec![unread("n1")], 9));
        r.apply_unread_count(2);

        // Another session read more in the meantime.
        let response = MarkReadResponse {
            data: None,
            unread_count: Some(5),
        };
        r.apply_mark_read("n1", &response);
        assert_eq!(r.snapshot().unread_count, 5);
        assert!(r.snapshot().notifications[0].is_read);
    }

    #[test]
    fn test_mark_read_without_count_decrements() {
        let (r, _rx, _) = reconciler();
        r.apply_page(page(vec![unread("n1")], 1));
        r.apply_unread_count(3);
        r.apply_mark_read(
            "n1",
            &MarkReadResponse {
                data: None,
                unread_count: None,
            },
        );
        assert_eq!(r.snapshot().unread_count, 2);
    }

    #[test]
    fn test_mark_all_read_push_with_partial_page() {
        let (r, _rx, _) = reconciler();
        let read = unread("c").read(Utc::now());
        r.apply_page(page(vec![unread("a"), unread("b"), read], 10));
        r.apply_unread_count(7);

        assert!(r.apply_server_event(ServerEvent::AllNotificationsRead));
        let snapshot = r.snapshot();
        assert!(snapshot.notifications.iter().all(|n| n.is_read));
        assert_eq!(snapshot.unread_count, 0);
    }

    #[tokio::test]
    async fn test_duplicate_delete() {
        let (r, _rx, _) = reconciler();
        r.apply_server_event(ServerEvent::NewNotification(Box::new(unread("n1"))));

        r.apply_delete("n1", &DeleteResponse { unread_count: None });
        r.apply_server_event(ServerEvent::NotificationDeleted("n1".into()));

        let snapshot = r.snapshot();
        assert!(snapshot.notifications.is_empty());
        assert_eq!(snapshot.unread_count, 0);
    }

    #[tokio::test]
    async fn test_pushed_count_overrides() {
        let (r, _rx, _) = reconciler();
        r.apply_server_event(ServerEvent::NotificationCount(5));
        r.apply_server_event(ServerEvent::NewNotification(Box::new(unread("x"))));
        r.apply_server_event(ServerEvent::NotificationCount(2));
        assert_eq!(r.snapshot().unread_count, 2);
    }

    #[test]
    fn test_updates_discarded_after_teardown() {
        let (r, mut rx, lifetime) = reconciler();
        r.apply_page(page(vec![unread("n1")], 1));
        while rx.try_recv().is_ok() {}

        lifetime.cancel();
        assert!(!r.apply_mark_read(
            "n1",
            &MarkReadResponse {
                data: None,
                unread_count: Some(0),
            },
        ));
        assert!(!r.snapshot().notifications[0].is_read);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unchanged_state_publishes_nothing() {
        let (r, mut rx, _) = reconciler();
        assert!(!r.apply_server_event(ServerEvent::NotificationCount(0)));
        assert!(!r.apply_server_event(ServerEvent::NotificationDeleted("ghost".into())));
        assert!(rx.try_recv().is_err());
    }
}
