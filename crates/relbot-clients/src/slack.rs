use relbot_core::render::Block;
use relbot_core::{ChatTransport, Config, Destination, Message, RelbotError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Slack Web API client; only `chat.postMessage` is needed.
#[derive(Clone)]
pub struct SlackClient {
    http: Client,
    api_url: String,
    token: String,
    icon_emoji: String,
}

impl std::fmt::Debug for SlackClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackClient")
            .field("api_url", &self.api_url)
            .field("icon_emoji", &self.icon_emoji)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct PostMessage<'a> {
    pub channel: &'a str,
    pub text: &'a str,
    #[serde(skip_serializing_if = "<[Block]>::is_empty")]
    pub blocks: &'a [Block],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<&'a str>,
    pub icon_emoji: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PostResponse {
    pub ok: bool,
    #[serde(default)]
    pub ts: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl SlackClient {
    pub fn new(http: Client, api_url: &str, token: impl Into<String>, icon_emoji: impl Into<String>) -> Self {
        Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.into(),
            icon_emoji: icon_emoji.into(),
        }
    }

    pub fn from_config(config: &Config, http: Client) -> Result<Self> {
        let token = config
            .slack_api_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RelbotError::Configuration("missing required setting `slack_api_token`".into()))?;
        Ok(Self::new(http, &config.slack_api_url, token, config.icon_emoji.clone()))
    }
}

impl ChatTransport for SlackClient {
    async fn post(&self, to: &Destination, message: &Message) -> Result<String> {
        let body = PostMessage {
            channel: &to.channel,
            text: &message.text,
            blocks: &message.blocks,
            thread_ts: to.thread.as_deref(),
            icon_emoji: &self.icon_emoji,
        };
        let response = self
            .http
            .post(format!("{}/chat.postMessage", self.api_url))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| RelbotError::Chat(format!("chat.postMessage: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelbotError::Chat(format!("chat.postMessage: HTTP {status}")));
        }
        let reply: PostResponse = response
            .json()
            .await
            .map_err(|e| RelbotError::Chat(format!("chat.postMessage: invalid response: {e}")))?;
        if !reply.ok {
            return Err(RelbotError::Chat(
                reply.error.unwrap_or_else(|| "unknown_error".into()),
            ));
        }
        let ts = reply
            .ts
            .ok_or_else(|| RelbotError::Chat("chat.postMessage returned no ts".into()))?;
        debug!(channel = %to.channel, thread = ?to.thread, ts = %ts, "posted to Slack");
        Ok(ts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn post_sends_blocks_and_returns_ts() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat.postMessage")
            .match_header("authorization", "Bearer xoxb-test")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "channel": "#releng-notifications",
                "text": "hello",
                "icon_emoji": ":sailboat:",
                "blocks": [{"type": "divider"}]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok": true, "channel": "C1", "ts": "1600000000.000100"}"#)
            .create_async()
            .await;

        let client = SlackClient::new(Client::new(), &server.url(), "xoxb-test", ":sailboat:");
        let message = Message::with_blocks("hello", vec![Block::divider()]);
        let ts = client
            .post(&Destination::channel("#releng-notifications"), &message)
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(ts, "1600000000.000100");
    }

    #[tokio::test]
    async fn thread_replies_carry_thread_ts() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat.postMessage")
            .match_body(Matcher::PartialJson(serde_json::json!({"thread_ts": "123.456"})))
            .with_status(200)
            .with_body(r#"{"ok": true, "ts": "123.999"}"#)
            .create_async()
            .await;

        let client = SlackClient::new(Client::new(), &server.url(), "xoxb-test", ":sailboat:");
        client
            .post(&Destination::thread("#c", "123.456"), &Message::plain("A is now green!"))
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn not_ok_is_chat_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat.postMessage")
            .with_status(200)
            .with_body(r#"{"ok": false, "error": "channel_not_found"}"#)
            .create_async()
            .await;

        let client = SlackClient::new(Client::new(), &server.url(), "xoxb-test", ":sailboat:");
        let err = client
            .post(&Destination::channel("#nope"), &Message::plain("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, RelbotError::Chat(ref e) if e == "channel_not_found"));
    }

    #[test]
    fn debug_hides_token() {
        let client = SlackClient::new(Client::new(), "https://slack.com/api", "xoxb-secret", ":x:");
        assert!(!format!("{client:?}").contains("xoxb-secret"));
    }
}
