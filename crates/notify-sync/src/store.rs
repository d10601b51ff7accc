//! Local notification store.
//!
//! Client-side cache of the loaded notification page plus a denormalized
//! unread counter. The counter is sourced independently of the list because
//! the list is usually only one page of everything the server holds.
//!
//! Every operation is a plain state transition: no I/O, no errors. Unknown
//! ids are ignored, and every mutator reports whether it changed anything so
//! callers only publish real changes.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{Notification, NotificationFilter, Pagination};

/// Point-in-time copy of the store, handed to observers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreSnapshot {
    pub notifications: Vec<Notification>,
    pub unread_count: u64,
    pub pagination: Pagination,
    pub filter: NotificationFilter,
    pub loading: bool,
    pub error: Option<String>,
}

/// In-memory notification state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationStore {
    /// Loaded page, newest first
    items: Vec<Notification>,
    unread_count: u64,
    pagination: Pagination,
    filter: NotificationFilter,
    loading: bool,
    error: Option<String>,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.items
    }

    pub fn get(&self, id: &str) -> Option<&Notification> {
        self.items.iter().find(|n| n.id == id)
    }

    pub fn unread_count(&self) -> u64 {
        self.unread_count
    }

    pub fn pagination(&self) -> Pagination {
        self.pagination
    }

    pub fn filter(&self) -> NotificationFilter {
        self.filter
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            notifications: self.items.clone(),
            unread_count: self.unread_count,
            pagination: self.pagination,
            filter: self.filter,
            loading: self.loading,
            error: self.error.clone(),
        }
    }

    /// Replace the visible page. The unread counter is left alone.
    pub fn set_list(&mut self, mut items: Vec<Notification>, pagination: Pagination) -> bool {
        items.iter_mut().for_each(Notification::normalize);
        let changed = self.items != items || self.pagination != pagination || self.loading;
        self.items = items;
        self.pagination = pagination;
        self.loading = false;
        self.error = None;
        changed
    }

    /// Overwrite the counter with a server-reported value.
    pub fn set_unread_count(&mut self, count: u64) -> bool {
        let changed = self.unread_count != count;
        self.unread_count = count;
        changed
    }

    /// Prepend a freshly delivered notification.
    ///
    /// A replayed delivery of an id that is already loaded replaces the loaded
    /// copy in place. The counter only moves if the read flag flipped.
    pub fn insert_new(&mut self, mut notification: Notification) -> bool {
        notification.normalize();

        if let Some(existing) = self.items.iter_mut().find(|n| n.id == notification.id) {
            if *existing == notification {
                return false;
            }
            match (existing.is_read, notification.is_read) {
                (false, true) => self.unread_count = self.unread_count.saturating_sub(1),
                (true, false) => self.unread_count += 1,
                _ => {}
            }
            *existing = notification;
            return true;
        }

        if !notification.is_read {
            self.unread_count += 1;
        }
        self.items.insert(0, notification);
        true
    }

    /// Mark one loaded notification read, stamping it now.
    pub fn mark_one_read(&mut self, id: &str) -> bool {
        self.mark_one_read_at(id, Utc::now())
    }

    /// Mark one loaded notification read with an explicit timestamp.
    pub fn mark_one_read_at(&mut self, id: &str, at: DateTime<Utc>) -> bool {
        let Some(notification) = self.items.iter_mut().find(|n| n.id == id) else {
            return false;
        };
        if !notification.mark_read(at) {
            return false;
        }
        self.unread_count = self.unread_count.saturating_sub(1);
        true
    }

    /// Adopt the server's read copy of a notification. The counter is left to
    /// the caller, which holds the server's count.
    pub fn apply_read(&mut self, server_copy: &Notification) -> bool {
        let Some(notification) = self.items.iter_mut().find(|n| n.id == server_copy.id) else {
            return false;
        };
        if notification.is_read {
            return false;
        }
        notification.is_read = true;
        notification.read_at = Some(server_copy.read_at.unwrap_or_else(Utc::now));
        true
    }

    /// Mark every loaded notification read and zero the global counter.
    pub fn mark_all_read(&mut self) -> bool {
        let now = Utc::now();
        let mut changed = self.unread_count != 0;
        for notification in &mut self.items {
            changed |= notification.mark_read(now);
        }
        self.unread_count = 0;
        changed
    }

    /// Drop one loaded notification, decrementing the counter if it was unread.
    pub fn remove_one(&mut self, id: &str) -> bool {
        let Some(index) = self.items.iter().position(|n| n.id == id) else {
            return false;
        };
        let removed = self.items.remove(index);
        if !removed.is_read {
            self.unread_count = self.unread_count.saturating_sub(1);
        }
        true
    }

    /// Drop every loaded read notification. Returns how many were removed.
    pub fn remove_read(&mut self) -> usize {
        let before = self.items.len();
        self.items.retain(|n| !n.is_read);
        before - self.items.len()
    }

    pub fn set_filter(&mut self, filter: NotificationFilter) -> bool {
        let changed = self.filter != filter;
        self.filter = filter;
        changed
    }

    pub fn begin_loading(&mut self) -> bool {
        let changed = !self.loading || self.error.is_some();
        self.loading = true;
        self.error = None;
        changed
    }

    pub fn fail_loading(&mut self, message: impl Into<String>) -> bool {
        self.loading = false;
        self.error = Some(message.into());
        true
    }

    pub fn clear_error(&mut self) -> bool {
        self.error.take().is_some()
    }
}
