use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::Config;

const OUTBOUND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum SlackError {
    #[error("slack request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("slack api error: {0}")]
    Api(String),
}

/// The one outbound capability the notifier needs: a direct message to a
/// workspace user. Behind a trait so dispatch and fan-out are testable
/// without Slack.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_direct_message(
        &self,
        slack_user_id: &str,
        text: &str,
        blocks: &Value,
    ) -> Result<(), SlackError>;
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Thin `chat.postMessage` client.
pub struct SlackClient {
    http: reqwest::Client,
    api_url: String,
    bot_token: SecretString,
}

impl SlackClient {
    pub fn new(config: Arc<Config>) -> Result<Self, SlackError> {
        let http = reqwest::Client::builder()
            .timeout(OUTBOUND_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            api_url: config.slack.api_url.trim_end_matches('/').to_string(),
            bot_token: config.slack.bot_token.clone().into(),
        })
    }
}

#[async_trait]
impl MessageSender for SlackClient {
    async fn send_direct_message(
        &self,
        slack_user_id: &str,
        text: &str,
        blocks: &Value,
    ) -> Result<(), SlackError> {
        let response = self
            .http
            .post(format!("{}/chat.postMessage", self.api_url))
            .bearer_auth(self.bot_token.expose_secret())
            .json(&serde_json::json!({
                "channel": format!("@{slack_user_id}"),
                "text": text,
                "blocks": blocks,
            }))
            .send()
            .await?
            .error_for_status()?;

        let body: PostMessageResponse = response.json().await?;
        if !body.ok {
            return Err(SlackError::Api(
                body.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }

        debug!(%slack_user_id, "direct message delivered");
        Ok(())
    }
}
