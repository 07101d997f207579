//! Discord REST client for one text channel.
//!
//! Uses the bot token directly against the HTTP API: no gateway connection,
//! no command dispatch. Only the three calls the digest needs are covered:
//! create message, create message with attachment, and list + delete recent
//! messages.

use super::{Channel, ChannelError};
use crate::utils::truncate_for_log;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RateLimitBody {
    retry_after: f64,
}

pub struct DiscordChannel {
    client: Client,
    api_base: String,
    channel_id: String,
    token: String,
}

impl fmt::Debug for DiscordChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscordChannel")
            .field("api_base", &self.api_base)
            .field("channel_id", &self.channel_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

impl DiscordChannel {
    pub fn new(api_base: &str, channel_id: &str, token: &str) -> Result<Self, ChannelError> {
        let client = Client::builder()
            .user_agent(concat!(
                "DiscordBot (",
                env!("CARGO_PKG_NAME"),
                ", ",
                env!("CARGO_PKG_VERSION"),
                ")"
            ))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            channel_id: channel_id.to_string(),
            token: token.to_string(),
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/channels/{}/messages", self.api_base, self.channel_id)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(reqwest::header::AUTHORIZATION, format!("Bot {}", self.token))
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response, ChannelError> {
        let response = self.authorized(request).send().await?;
        check_status(response).await
    }
}

/// Map non-success responses to [`ChannelError`], reading `retry_after` on HTTP 429.
async fn check_status(response: Response) -> Result<Response, ChannelError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = serde_json::from_str::<RateLimitBody>(&body)
            .map(|b| Duration::from_secs_f64(b.retry_after.max(0.0)))
            .unwrap_or(Duration::from_secs(1));
        warn!(?retry_after, "Rate limited by chat API");
        return Err(ChannelError::RateLimited { retry_after });
    }
    Err(ChannelError::Api {
        status,
        body: truncate_for_log(&body, 300),
    })
}

impl Channel for DiscordChannel {
    #[instrument(level = "info", skip_all, fields(channel = %self.channel_id, chars = content.chars().count()))]
    async fn send_text(&self, content: &str) -> Result<(), ChannelError> {
        let payload = json!({
            "content": content,
            "allowed_mentions": { "parse": [] },
        });
        self.execute(self.client.post(self.messages_url()).json(&payload))
            .await?;
        debug!("Sent message");
        Ok(())
    }

    #[instrument(level = "info", skip_all, fields(channel = %self.channel_id, path = %path.display()))]
    async fn send_image(&self, path: &Path) -> Result<(), ChannelError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| ChannelError::Attachment {
                path: path.display().to_string(),
                source,
            })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "table.png".to_string());

        let part = Part::bytes(bytes).file_name(file_name).mime_str("image/png")?;
        let form = Form::new()
            .text("payload_json", json!({ "attachments": [] }).to_string())
            .part("files[0]", part);

        self.execute(self.client.post(self.messages_url()).multipart(form))
            .await?;
        debug!("Sent attachment");
        Ok(())
    }

    #[instrument(level = "info", skip_all, fields(channel = %self.channel_id, limit = limit))]
    async fn purge_recent(&self, limit: usize) -> Result<usize, ChannelError> {
        let limit = limit.clamp(1, 100);
        let recent: Vec<MessageRef> = self
            .execute(
                self.client
                    .get(self.messages_url())
                    .query(&[("limit", limit.to_string())]),
            )
            .await?
            .json()
            .await?;

        let mut deleted = 0;
        for message in &recent {
            let url = format!("{}/{}", self.messages_url(), message.id);
            match self.execute(self.client.delete(url)).await {
                Ok(_) => deleted += 1,
                Err(ChannelError::Api { status, .. }) if status == StatusCode::NOT_FOUND => {
                    debug!(id = %message.id, "Message already gone");
                }
                Err(e) => return Err(e),
            }
        }

        info!(found = recent.len(), deleted, "Purged recent messages");
        Ok(deleted)
    }
}
