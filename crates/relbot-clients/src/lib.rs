//! HTTP implementations of relbot's outside-world traits.
//!
//! ```text
//! ShipItClient       → ReleaseSource     GET {shipit}/releases
//! TaskclusterClient  → TaskGraphSource   GET {root}/api/queue/v1/task-group/…/list
//!                                        GET {root}/api/queue/v1/task/…/status
//! SlackClient        → ChatTransport     POST {slack}/chat.postMessage
//! ```
//!
//! All three share one `reqwest::Client` carrying the configured request
//! timeout. Nothing here retries: the next reconciliation cycle does.

pub mod hawk;
pub mod shipit;
pub mod slack;
pub mod taskcluster;


pub use shipit::ShipItClient;
pub use slack::SlackClient;
pub use taskcluster::TaskclusterClient;

use std::time::Duration;

use relbot_core::{Config, RelbotError, Result};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;

/// The shared HTTP client.
pub fn http_client(config: &Config) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .user_agent(concat!("relbot/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| RelbotError::Configuration(format!("cannot build HTTP client: {e}")))
}

/// Every client, wired from one configuration.
pub struct Clients {
    pub shipit: ShipItClient,
    pub taskcluster: TaskclusterClient,
    pub slack: SlackClient,
}

impl Clients {
    pub fn from_config(config: &Config) -> Result<Self> {
        let http = http_client(config)?;
        Ok(Self {
            shipit: ShipItClient::from_config(config, http.clone()),
            taskcluster: TaskclusterClient::from_config(config, http.clone()),
            slack: SlackClient::from_config(config, http)?,
        })
    }
}

/// Send `request` and decode a JSON body, mapping transport failures and
/// non-2xx statuses onto the fetch error taxonomy.
pub(crate) async fn fetch_json<T: DeserializeOwned>(request: RequestBuilder, what: &str) -> Result<T> {
    let response = request
        .send()
        .await
        .map_err(|e| RelbotError::fetch(what, e))?;

    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(RelbotError::NotFound(what.to_string()));
    }
    if !status.is_success() {
        return Err(RelbotError::fetch(what, format!("HTTP {status}")));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| RelbotError::fetch(what, format!("invalid response body: {e}")))
}
