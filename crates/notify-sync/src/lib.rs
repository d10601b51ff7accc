//! notify-sync: client-side real-time notification sync.
//!
//! This crate keeps a local view of a user's notifications consistent with
//! the server, combining a Socket.IO push channel with REST calls.
//!
//! ## Core Types
//!
//! - [`Notification`] - A single notification record
//! - [`NotificationStore`] - Loaded page plus the unread counter
//! - [`NotificationService`] - Channel, REST client and store behind one handle
//!
//! ## Transport
//!
//! - [`TransportChannel`] - Auto-reconnecting push channel
//! - [`protocol`] - Engine.IO / Socket.IO framing and the notification events
//! - [`RestNotificationApi`] - reqwest-backed REST client
//!
//! ## Reconciliation
//!
//! - [`Reconciler`] - Applies push events and REST results to the store
//! - [`StoreEvent`] - Change notifications for observers
//!
//! ## Alerts
//!
//! - [`AlertSink`] - Sound cue and platform alert for new notifications

pub mod alert;
pub mod api;
pub mod channel;
pub mod config;
pub mod error;
pub mod model;
pub mod protocol;
pub mod reconcile;
pub mod service;
pub mod store;
pub mod tls;

pub use alert::{AlertPermission, AlertSink, LogAlertSink, NoopAlertSink, dispatch_alerts};
pub use api::{
    DeleteResponse, MarkAllReadData, MarkAllReadResponse, MarkReadResponse, NotificationApi,
    NotificationPage, PageQuery, RestNotificationApi,
};
pub use channel::{ChannelConfig, ChannelEvent, ChannelState, TransportChannel};
pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use model::{Notification, NotificationFilter, NotificationKind, Pagination, Priority};
pub use protocol::{ClientCommand, ServerEvent};
pub use reconcile::{Reconciler, StoreEvent};
pub use service::NotificationService;
pub use store::{NotificationStore, StoreSnapshot};
