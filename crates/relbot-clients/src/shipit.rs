use relbot_core::model::filter_ignored;
use relbot_core::{Config, ReleaseSource, Result, UpstreamRelease};
use reqwest::Client;
use tracing::debug;

use crate::fetch_json;

/// Read-only client for the ShipIt release API.
#[derive(Debug, Clone)]
pub struct ShipItClient {
    http: Client,
    base_url: String,
    ignored_products: Vec<String>,
}

impl ShipItClient {
    pub fn new(http: Client, base_url: &str, ignored_products: Vec<String>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            ignored_products,
        }
    }

    pub fn from_config(config: &Config, http: Client) -> Self {
        Self::new(http, &config.shipit_url, config.ignored_products.clone())
    }
}

impl ReleaseSource for ShipItClient {
    async fn fetch_releases(&self) -> Result<Vec<UpstreamRelease>> {
        let url = format!("{}/releases", self.base_url);
        let releases: Vec<UpstreamRelease> = fetch_json(self.http.get(&url), "releases").await?;
        let total = releases.len();
        let kept = filter_ignored(releases, &self.ignored_products);
        debug!(total, kept = kept.len(), "fetched releases from ShipIt");
        Ok(kept)
    }
}
