//! Transient user-facing notices (error banners / toasts).
//!
//! Non-fatal failures are recorded here instead of interrupting the user.
//! Entries expire on their own after the configured TTL.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub id: String,
    pub level: NoticeLevel,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

pub struct Notices {
    ttl: ChronoDuration,
    entries: Mutex<Vec<Notice>>,
}

impl Notices {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::seconds(6)),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn warn(&self, message: impl Into<String>) -> String {
        self.push_at(NoticeLevel::Warning, message.into(), Utc::now())
    }

    pub fn error(&self, message: impl Into<String>) -> String {
        self.push_at(NoticeLevel::Error, message.into(), Utc::now())
    }

    fn push_at(&self, level: NoticeLevel, message: String, now: DateTime<Utc>) -> String {
        let id = Uuid::new_v4().to_string();
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.retain(|n| now - n.created_at < self.ttl);
        entries.push(Notice {
            id: id.clone(),
            level,
            message,
            created_at: now,
        });
        id
    }

    /// Notices still visible now. Expired entries are dropped.
    pub fn active(&self) -> Vec<Notice> {
        self.active_at(Utc::now())
    }

    fn active_at(&self, now: DateTime<Utc>) -> Vec<Notice> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.retain(|n| now - n.created_at < self.ttl);
        entries.clone()
    }

    /// Returns whether a notice with `id` was visible.
    pub fn dismiss(&self, id: &str) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let before = entries.len();
        entries.retain(|n| n.id != id);
        entries.len() != before
    }
}
