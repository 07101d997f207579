//! Chat channel the digest is published to.
//!
//! # Architecture
//!
//! - [`Channel`]: Core trait for sending text, attaching images and clearing history
//! - [`discord::DiscordChannel`]: Discord REST implementation
//! - [`console::ConsoleChannel`]: Prints to stdout; used for dry runs and `report`
//! - [`retry::RetryChannel`]: Decorator that adds backoff to any [`Channel`]

pub mod console;
pub mod discord;
pub mod retry;

use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("request to chat API failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("chat API answered HTTP {status}: {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("rate limited; retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
    #[error("could not read attachment {path}: {source}")]
    Attachment {
        path: String,
        source: std::io::Error,
    },
    #[error("could not write to console: {0}")]
    Console(#[source] std::io::Error),
}

impl ChannelError {
    /// Whether sending again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ChannelError::Http(_) | ChannelError::RateLimited { .. } => true,
            ChannelError::Api { status, .. } => status.is_server_error(),
            ChannelError::Attachment { .. } | ChannelError::Console(_) => false,
        }
    }
}

/// A destination for published messages.
pub trait Channel {
    /// Post one text message.
    async fn send_text(&self, content: &str) -> Result<(), ChannelError>;

    /// Post one image file as an attachment.
    async fn send_image(&self, path: &Path) -> Result<(), ChannelError>;

    /// Delete up to `limit` of the most recent messages. Returns how many were removed.
    async fn purge_recent(&self, limit: usize) -> Result<usize, ChannelError>;
}
