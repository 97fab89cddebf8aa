use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use relbot_core::{ChatTransport, Destination, ReleaseRepository, ReleaseSource, TaskGraphSource};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::signature::{self, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use crate::state::AppState;

/// Set by Slack when it redelivers an event it thinks we missed.
const RETRY_HEADER: &str = "x-slack-retry-num";

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    UrlVerification { challenge: String },
    EventCallback { event: Event },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: String,
    pub channel: Option<String>,
    pub ts: Option<String>,
    pub thread_ts: Option<String>,
    pub bot_id: Option<String>,
    pub subtype: Option<String>,
}

impl Event {
    /// Human-written messages and mentions only; edits, joins and our own
    /// posts are skipped.
    fn is_command_candidate(&self) -> bool {
        matches!(self.kind.as_str(), "message" | "app_mention")
            && self.bot_id.is_none()
            && self.subtype.is_none()
    }
}

/// POST /slack/events, the Slack Events API callback.
///
/// Always answers quickly: commands are handled on a spawned task and the
/// reply is posted through the chat transport, not in the HTTP response.
pub async fn slack_events<R, G, S, C>(
    State(app): State<AppState<R, G, S, C>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError>
where
    R: ReleaseSource + 'static,
    G: TaskGraphSource + 'static,
    S: ReleaseRepository + 'static,
    C: ChatTransport + 'static,
{
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    signature::verify(
        &app.signing_secret,
        header(TIMESTAMP_HEADER),
        header(SIGNATURE_HEADER),
        &body,
        chrono::Utc::now().timestamp(),
    )?;

    let envelope: Envelope = serde_json::from_slice(&body)
        .map_err(|e| AppError::bad_request(format!("invalid event payload: {e}")))?;

    match envelope {
        Envelope::UrlVerification { challenge } => {
            info!("answered Slack url_verification");
            Ok(Json(serde_json::json!({ "challenge": challenge })).into_response())
        }
        Envelope::EventCallback { event } => {
            if header(RETRY_HEADER).is_some() {
                debug!("ignoring Slack redelivery");
            } else {
                dispatch(&app, event);
            }
            Ok(().into_response())
        }
        Envelope::Other => Ok(().into_response()),
    }
}

fn dispatch<R, G, S, C>(app: &AppState<R, G, S, C>, event: Event)
where
    R: ReleaseSource + 'static,
    G: TaskGraphSource + 'static,
    S: ReleaseRepository + 'static,
    C: ChatTransport + 'static,
{
    if !event.is_command_candidate() {
        return;
    }
    let Some(channel) = event.channel else {
        return;
    };
    let Some(ts) = event.ts.clone().or_else(|| event.thread_ts.clone()) else {
        return;
    };
    if !app.recent.first_sighting(&channel, &ts) {
        debug!(channel = %channel, ts = %ts, "message already dispatched");
        return;
    }
    let thread = event.thread_ts.unwrap_or(ts);

    let handler = app.handler.clone();
    let notifier = app.notifier.clone();
    let text = event.text;
    tokio::spawn(async move {
        let Some(reply) = handler.respond(&text).await else {
            return;
        };
        let to = Destination::thread(channel, thread);
        if let Err(e) = notifier.send(&to, &reply).await {
            warn!(channel = %to.channel, error = %e, "could not post command reply");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_url_verification() {
        let env: Envelope = serde_json::from_str(
            r#"{"token": "x", "challenge": "3eZbrw1aBm2rZgRNFdxV2595E9CY3gmdALWMmHkvFXO7tYXAYM8P", "type": "url_verification"}"#,
        )
        .unwrap();
        assert!(matches!(env, Envelope::UrlVerification { ref challenge } if challenge.starts_with("3eZb")));
    }

    #[test]
    fn parses_message_event() {
        let env: Envelope = serde_json::from_str(
            r#"{
                "type": "event_callback",
                "team_id": "T1",
                "event": {"type": "message", "channel": "C1", "user": "U1",
                          "text": "shipit status", "ts": "1600000000.000200"}
            }"#,
        )
        .unwrap();
        let Envelope::EventCallback { event } = env else {
            panic!("expected event_callback");
        };
        assert!(event.is_command_candidate());
        assert_eq!(event.text, "shipit status");
    }

    #[test]
    fn bot_and_edited_messages_are_not_commands() {
        let bot: Event = serde_json::from_str(
            r#"{"type": "message", "bot_id": "B1", "text": "shipit status", "channel": "C1", "ts": "1"}"#,
        )
        .unwrap();
        assert!(!bot.is_command_candidate());

        let edit: Event = serde_json::from_str(
            r#"{"type": "message", "subtype": "message_changed", "channel": "C1", "ts": "1"}"#,
        )
        .unwrap();
        assert!(!edit.is_command_candidate());
    }

    #[test]
    fn unknown_envelope_types_are_tolerated() {
        let env: Envelope = serde_json::from_str(r#"{"type": "app_rate_limited", "minute_rate_limited": 1}"#).unwrap();
        assert!(matches!(env, Envelope::Other));
    }
}
