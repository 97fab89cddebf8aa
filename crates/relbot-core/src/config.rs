use crate::error::{RelbotError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prefix of every environment override, e.g. `RELBOT_SLACK_API_TOKEN`.
pub const ENV_PREFIX: &str = "RELBOT_";

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub shipit_url: String,
    pub taskcluster_root_url: String,
    pub taskcluster_client_id: Option<String>,
    pub taskcluster_access_token: Option<String>,
    pub treeherder_url: String,
    pub slack_api_url: String,
    pub slack_api_token: Option<String>,
    pub slack_signing_secret: Option<String>,
    pub channel: String,
    pub icon_emoji: String,
    pub mention: String,
    pub command_prefix: String,
    pub ignored_products: Vec<String>,
    pub poll_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub db_path: PathBuf,
    pub listen_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shipit_url: "https://shipit-api.mozilla-releng.net".into(),
            taskcluster_root_url: "https://firefox-ci-tc.services.mozilla.com".into(),
            taskcluster_client_id: None,
            taskcluster_access_token: None,
            treeherder_url: "https://treeherder.mozilla.org".into(),
            slack_api_url: "https://slack.com/api".into(),
            slack_api_token: None,
            slack_signing_secret: None,
            channel: "#releng-notifications".into(),
            icon_emoji: ":sailboat:".into(),
            mention: "releaseduty".into(),
            command_prefix: "shipit".into(),
            ignored_products: vec!["thunderbird".into()],
            poll_interval_secs: 120,
            request_timeout_secs: 30,
            db_path: PathBuf::from("relbot.redb"),
            listen_addr: "0.0.0.0:3000".into(),
        }
    }
}

impl Config {
    /// Read the YAML file at `path` (defaults when `None`), then apply
    /// `RELBOT_*` overrides from the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// [`Config::load`] with an injectable environment lookup.
    pub fn load_with(path: Option<&Path>, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = match path {
            Some(path) => {
                let data = std::fs::read_to_string(path).map_err(|e| {
                    RelbotError::Configuration(format!("cannot read {}: {e}", path.display()))
                })?;
                if data.trim().is_empty() {
                    Config::default()
                } else {
                    serde_yaml::from_str(&data)?
                }
            }
            None => Config::default(),
        };
        cfg.apply_env(env)?;
        Ok(cfg)
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |name: &str| env(format!("{ENV_PREFIX}{name}").as_str()).filter(|v| !v.is_empty());

        for (name, field) in [
            ("SHIPIT_URL", &mut self.shipit_url),
            ("TASKCLUSTER_ROOT_URL", &mut self.taskcluster_root_url),
            ("TREEHERDER_URL", &mut self.treeherder_url),
            ("SLACK_API_URL", &mut self.slack_api_url),
            ("CHANNEL", &mut self.channel),
            ("ICON_EMOJI", &mut self.icon_emoji),
            ("MENTION", &mut self.mention),
            ("LISTEN_ADDR", &mut self.listen_addr),
        ] {
            if let Some(v) = var(name) {
                *field = v;
            }
        }
        for (name, field) in [
            ("TASKCLUSTER_CLIENT_ID", &mut self.taskcluster_client_id),
            ("TASKCLUSTER_ACCESS_TOKEN", &mut self.taskcluster_access_token),
            ("SLACK_API_TOKEN", &mut self.slack_api_token),
            ("SLACK_SIGNING_SECRET", &mut self.slack_signing_secret),
        ] {
            if let Some(v) = var(name) {
                *field = Some(v);
            }
        }
        // An empty prefix is meaningful, so only an unset variable is skipped.
        if let Some(v) = env(format!("{ENV_PREFIX}COMMAND_PREFIX").as_str()) {
            self.command_prefix = v;
        }
        if let Some(v) = var("IGNORED_PRODUCTS") {
            self.ignored_products = v
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
        }
        if let Some(v) = var("POLL_INTERVAL_SECS") {
            self.poll_interval_secs = parse_secs("POLL_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = var("REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = parse_secs("REQUEST_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = var("DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Checks shared by every subcommand.
    pub fn validate(&self) -> Result<()> {
        if self.slack_api_token.as_deref().unwrap_or("").is_empty() {
            return Err(missing("slack_api_token"));
        }
        match (&self.taskcluster_client_id, &self.taskcluster_access_token) {
            (Some(_), None) => return Err(missing("taskcluster_access_token")),
            (None, Some(_)) => return Err(missing("taskcluster_client_id")),
            _ => {}
        }
        if self.poll_interval_secs == 0 {
            return Err(RelbotError::Configuration(
                "poll_interval_secs must be greater than zero".into(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(RelbotError::Configuration(
                "request_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.channel.trim().is_empty() {
            return Err(missing("channel"));
        }
        Ok(())
    }

    /// [`Config::validate`] plus what the event endpoint needs.
    pub fn validate_for_serve(&self) -> Result<()> {
        self.validate()?;
        if self.slack_signing_secret.as_deref().unwrap_or("").is_empty() {
            return Err(missing("slack_signing_secret"));
        }
        Ok(())
    }

    /// Client id and access token, when Taskcluster requests should be signed.
    pub fn taskcluster_credentials(&self) -> Option<(&str, &str)> {
        match (&self.taskcluster_client_id, &self.taskcluster_access_token) {
            (Some(id), Some(token)) => Some((id, token)),
            _ => None,
        }
    }
}

fn missing(field: &str) -> RelbotError {
    RelbotError::Configuration(format!(
        "missing required setting `{field}` (or {ENV_PREFIX}{})",
        field.to_uppercase()
    ))
}

fn parse_secs(name: &str, value: &str) -> Result<u64> {
    value.trim().parse().map_err(|_| {
        RelbotError::Configuration(format!(
            "{ENV_PREFIX}{name} must be a whole number of seconds, got `{value}`"
        ))
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
