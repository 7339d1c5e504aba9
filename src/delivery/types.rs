//! Delivery boundary types
//!
//! The orchestrator only sees [`DeliveryClient`]; causes are split so retry
//! policy can tell auth, size and transient failures apart.

use crate::compress::MediaArtifact;
use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Destination channel identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why an upload failed
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeliveryError {
    /// Credential refused. Never retried; the operator must act.
    #[error("delivery credential rejected: {0}")]
    Auth(String),

    /// The channel's size limit is stricter than the local budget
    #[error("file rejected as too large: {0}")]
    SizeRejected(String),

    /// Network failure, rate limit or server error
    #[error("transient delivery failure: {reason}")]
    Transient {
        reason: String,
        /// Server-requested wait before the next attempt
        retry_after: Option<Duration>,
    },

    /// Any other refusal; retrying the same request cannot help
    #[error("delivery rejected: {0}")]
    Rejected(String),
}

impl DeliveryError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::Transient { .. })
    }

    pub fn transient(reason: impl Into<String>) -> Self {
        DeliveryError::Transient {
            reason: reason.into(),
            retry_after: None,
        }
    }
}

/// Uploads an artifact to a channel
#[async_trait]
pub trait DeliveryClient: Send + Sync {
    /// One upload attempt
    async fn deliver(
        &self,
        artifact: &MediaArtifact,
        channel: ChannelId,
        caption: Option<&str>,
    ) -> Result<(), DeliveryError>;
}

/// Message posted alongside a recording
pub fn caption(recorded_at: DateTime<Utc>, host_label: &str) -> String {
    format!(
        "📹 Recording from {} in {}",
        recorded_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
        host_label
    )
}
