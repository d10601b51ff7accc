use crate::{cli::OutputFormat, error::Result};
#[cfg(feature = "colored-output")]
use colored::*;
use notify_sync::{Notification, Pagination, Priority};
use serde_json::json;

pub enum Color {
    Green,
    Yellow,
    Blue,
    Cyan,
    Red,
}

pub struct OutputManager {
    format: OutputFormat,
    colored: bool,
}

impl OutputManager {
    pub fn new(format: OutputFormat, colored: bool) -> Self {
        Self { format, colored }
    }

    pub fn format_page(&self, items: &[Notification], pagination: &Pagination) -> Result<String> {
        if self.format == OutputFormat::Json {
            return Ok(serde_json::to_string_pretty(&json!({
                "data": items,
                "pagination": pagination,
            }))?);
        }

        let mut output = String::new();
        if items.is_empty() {
            output.push_str("No notifications\n");
        }
        for notification in items {
            output.push_str(&self.notification_line(notification));
            output.push('\n');
        }
        output.push_str(&format!(
            "{}\n",
            self.colorize(
                &format!(
                    "page {}/{} ({} total)",
                    pagination.page,
                    pagination.total_pages.max(1),
                    pagination.total
                ),
                &Color::Blue,
                false
            )
        ));
        Ok(output)
    }

    pub fn format_notification(&self, notification: &Notification) -> Result<String> {
        if self.format == OutputFormat::Json {
            return Ok(serde_json::to_string_pretty(notification)?);
        }

        let mut output = self.notification_line(notification);
        output.push('\n');
        output.push_str(&format!("  {}\n", notification.message));
        if let (Some(kind), Some(id)) = (&notification.related_type, &notification.related_id) {
            output.push_str(&format!(
                "  {}: {kind} {id}\n",
                self.colorize("Related", &Color::Yellow, false)
            ));
        }
        if let Some(read_at) = notification.read_at {
            output.push_str(&format!(
                "  {}: {}\n",
                self.colorize("Read at", &Color::Yellow, false),
                read_at.format("%Y-%m-%d %H:%M")
            ));
        }
        if let Some(expires_at) = notification.expires_at {
            output.push_str(&format!(
                "  {}: {}\n",
                self.colorize("Expires", &Color::Yellow, false),
                expires_at.format("%Y-%m-%d %H:%M")
            ));
        }
        Ok(output)
    }

    pub fn format_count(&self, count: u64) -> Result<String> {
        match self.format {
            OutputFormat::Json => Ok(serde_json::to_string(&json!({ "unreadCount": count }))?),
            OutputFormat::Pretty => Ok(format!("{count} unread")),
        }
    }

    /// Confirmation for a completed action.
    pub fn format_done(&self, action: &str, unread_count: u64) -> Result<String> {
        match self.format {
            OutputFormat::Json => Ok(serde_json::to_string(&json!({
                "status": "ok",
                "action": action,
                "unreadCount": unread_count,
            }))?),
            OutputFormat::Pretty => Ok(format!(
                "{} ({unread_count} unread)",
                self.colorize(action, &Color::Green, true)
            )),
        }
    }

    pub fn format_error(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Json => json!({ "status": "error", "message": message }).to_string(),
            OutputFormat::Pretty => format!("{} {message}", self.colorize("Error:", &Color::Red, true)),
        }
    }

    fn notification_line(&self, notification: &Notification) -> String {
        let marker = if notification.is_read {
            self.colorize(" ", &Color::Blue, false)
        } else {
            self.colorize("*", &Color::Green, true)
        };
        let priority = match notification.priority {
            Priority::Urgent => self.colorize("URGENT", &Color::Red, true),
            Priority::High => self.colorize("high", &Color::Yellow, false),
            Priority::Medium => "medium".to_string(),
            Priority::Low => "low".to_string(),
        };
        format!(
            "{marker} {} {:<6} {} {}",
            notification.created_at.format("%Y-%m-%d %H:%M"),
            priority,
            self.colorize(&notification.title, &Color::Cyan, !notification.is_read),
            self.colorize(&format!("[{}]", notification.id), &Color::Blue, false),
        )
    }

    fn colorize(&self, text: &str, color: &Color, bold: bool) -> String {
        #[cfg(feature = "colored-output")]
        {
            if self.colored {
                let colored_text = match color {
                    Color::Green => text.green(),
                    Color::Yellow => text.yellow(),
                    Color::Blue => text.blue(),
                    Color::Cyan => text.cyan(),
                    Color::Red => text.red(),
                };
                if bold {
                    colored_text.bold().to_string()
                } else {
                    colored_text.to_string()
                }
            } else {
                text.to_string()
            }
        }

        #[cfg(not(feature = "colored-output"))]
        {
            let _ = (color, bold, self.colored);
            text.to_string()
        }
    }
}
