// src/services/history_service.rs

//! # Chat History Service
//!
//! Interface to the chat-history store. Persistence is fire-and-forget: the
//! dispatcher logs a failed insert and delivers the message anyway.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::info;

use crate::models::ChatMessage;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("History store unavailable: {0}")]
    Unavailable(String),
}

/// Sink for dispatched chat messages.
///
/// Implementations must not block; slow stores should hand the write to a
/// background task and return.
pub trait ChatHistory: Send + Sync {
    fn insert(&self, message: &ChatMessage) -> Result<(), HistoryError>;
}

/// Records each message as a log line. Used when no store is configured.
#[derive(Debug, Default)]
pub struct TracingHistory;

impl ChatHistory for TracingHistory {
    fn insert(&self, message: &ChatMessage) -> Result<(), HistoryError> {
        info!(
            sender = message.userid,
            target = message.dstid,
            cmd = message.cmd,
            media = ?message.field("media"),
            "Chat message recorded"
        );
        Ok(())
    }
}

/// A stored message and the time it was accepted.
#[derive(Debug, Clone)]
pub struct HistoryRecord {
    pub message: ChatMessage,
    pub recorded_at: DateTime<Utc>,
}

/// Keeps every message in memory, newest last.
#[derive(Debug, Default)]
pub struct MemoryHistory {
    records: Mutex<Vec<HistoryRecord>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<HistoryRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ChatHistory for MemoryHistory {
    fn insert(&self, message: &ChatMessage) -> Result<(), HistoryError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(HistoryRecord {
                message: message.clone(),
                recorded_at: Utc::now(),
            });
        Ok(())
    }
}
