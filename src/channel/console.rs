//! Stdout stand-in for the chat channel.

use super::{Channel, ChannelError};
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Prints every message to stdout, separated by blank lines. Purging is a no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleChannel;

impl ConsoleChannel {
    fn write(&self, line: &str) -> Result<(), ChannelError> {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        writeln!(out, "{line}\n").map_err(ChannelError::Console)
    }
}

impl Channel for ConsoleChannel {
    async fn send_text(&self, content: &str) -> Result<(), ChannelError> {
        self.write(content)
    }

    async fn send_image(&self, path: &Path) -> Result<(), ChannelError> {
        self.write(&format!("[image] {}", path.display()))
    }

    async fn purge_recent(&self, limit: usize) -> Result<usize, ChannelError> {
        info!(limit, "Console channel keeps no history; nothing to purge");
        Ok(0)
    }
}
