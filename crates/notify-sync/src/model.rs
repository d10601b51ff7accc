//! Notification data types.
//!
//! Wire shapes shared by the push channel and the REST API. Field names follow
//! the server's JSON (`snake_case`, `type` for the kind, `totalPages` for
//! pagination).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Priority of a notification.
///
/// Values this client does not know decode as [`Priority::Medium`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl From<String> for Priority {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Self::Low,
            "high" => Self::High,
            "urgent" => Self::Urgent,
            _ => Self::Medium,
        }
    }
}

impl Priority {
    /// Whether the platform alert for this priority should stay on screen until dismissed.
    pub fn requires_interaction(self) -> bool {
        matches!(self, Self::Urgent)
    }
}

/// Category of a notification, as assigned by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A grade was posted
    GradePosted,
    /// Attendance was recorded
    AttendanceMarked,
    /// An assignment deadline is approaching
    AssignmentDue,
    /// General announcement
    Announcement,
    /// Direct message
    Message,
    /// Warning
    Alert,
    /// System notice
    #[default]
    System,
    /// Kind not known to this client
    #[serde(other)]
    Other,
}

/// A single notification addressed to the current user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Unique id, stable across push and REST representations
    pub id: String,
    /// Notification category
    #[serde(rename = "type", default)]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub is_read: bool,
    /// Set iff `is_read` is true
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
    /// Kind of the related domain entity (grade, attendance, assignment, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_id: Option<String>,
    /// Free-form server metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Create a new unread notification.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: NotificationKind::default(),
            title: title.into(),
            message: message.into(),
            priority: Priority::default(),
            is_read: false,
            read_at: None,
            related_type: None,
            related_id: None,
            metadata: None,
            expires_at: None,
            created_at: Utc::now(),
        }
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the kind.
    pub fn with_kind(mut self, kind: NotificationKind) -> Self {
        self.kind = kind;
        self
    }

    /// Point the notification at a related domain entity.
    pub fn with_related(
        mut self,
        related_type: impl Into<String>,
        related_id: impl Into<String>,
    ) -> Self {
        self.related_type = Some(related_type.into());
        self.related_id = Some(related_id.into());
        self
    }

    /// Set the creation timestamp.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Set the expiry timestamp.
    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Build an already-read copy.
    pub fn read(mut self, at: DateTime<Utc>) -> Self {
        self.mark_read(at);
        self
    }

    /// Transition to read. Returns false if it already was.
    pub fn mark_read(&mut self, at: DateTime<Utc>) -> bool {
        if self.is_read {
            return false;
        }
        self.is_read = true;
        self.read_at = Some(at);
        true
    }

    /// Restore `is_read == read_at.is_some()` on a copy received from the wire.
    ///
    /// A read item without a timestamp gets its creation time; an unread item
    /// loses any stray timestamp.
    pub fn normalize(&mut self) {
        match (self.is_read, self.read_at) {
            (true, None) => self.read_at = Some(self.created_at),
            (false, Some(_)) => self.read_at = None,
            _ => {}
        }
    }

    /// Whether the notification has passed its expiry time.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now > at)
    }
}

/// Pagination block returned with a notification page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    #[serde(default)]
    pub total: u64,
    #[serde(rename = "totalPages", default)]
    pub total_pages: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 20,
            total: 0,
            total_pages: 0,
        }
    }
}

/// Which notifications a page fetch should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationFilter {
    #[default]
    All,
    Unread,
    Read,
}

impl NotificationFilter {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Unread => "unread",
            Self::Read => "read",
        }
    }
}

impl fmt::Display for NotificationFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "unread" => Ok(Self::Unread),
            "read" => Ok(Self::Read),
            other => Err(format!("unknown filter '{other}' (expected all, unread or read)")),
        }
    }
}
