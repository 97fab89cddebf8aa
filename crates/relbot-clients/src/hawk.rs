//! Hawk request signing for the Taskcluster queue.
//!
//! Only the `header` scheme without payload hash or `ext` is implemented,
//! which is all Taskcluster requires for GET requests.

use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use relbot_core::{RelbotError, Result};
use reqwest::Url;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct Credentials {
    pub client_id: String,
    pub access_token: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// `Authorization` header value for `method url`, signed now with a fresh nonce.
    pub fn authorization(&self, method: &str, url: &Url) -> Result<String> {
        let ts = chrono::Utc::now().timestamp();
        self.authorization_at(method, url, ts, &nonce())
    }

    pub fn authorization_at(&self, method: &str, url: &Url, ts: i64, nonce: &str) -> Result<String> {
        let mac = self.mac(method, url, ts, nonce)?;
        Ok(format!(
            r#"Hawk id="{}", ts="{ts}", nonce="{nonce}", mac="{mac}""#,
            self.client_id
        ))
    }

    fn mac(&self, method: &str, url: &Url, ts: i64, nonce: &str) -> Result<String> {
        let host = url
            .host_str()
            .ok_or_else(|| RelbotError::Configuration(format!("URL without host: {url}")))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| RelbotError::Configuration(format!("URL without port: {url}")))?;
        let mut resource = url.path().to_string();
        if let Some(query) = url.query() {
            resource.push('?');
            resource.push_str(query);
        }

        let normalized = format!(
            "hawk.1.header\n{ts}\n{nonce}\n{}\n{resource}\n{}\n{port}\n\n\n",
            method.to_uppercase(),
            host.to_lowercase()
        );
        let mut mac = HmacSha256::new_from_slice(self.access_token.as_bytes())
            .map_err(|e| RelbotError::Configuration(format!("invalid Taskcluster access token: {e}")))?;
        mac.update(normalized.as_bytes());
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }
}

fn nonce() -> String {
    use rand::{distributions::Alphanumeric, Rng};
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect()
}
