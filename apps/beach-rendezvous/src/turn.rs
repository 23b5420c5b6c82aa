use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// One entry of an `RTCIceServer` list as handed to clients in `turnToken`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TurnSettings {
    pub stun_urls: Vec<String>,
    pub turn_urls: Vec<String>,
    pub shared_secret: Option<String>,
    pub credential_ttl: Duration,
}

/// Issues ICE server lists with time-limited TURN credentials
/// (the coturn `use-auth-secret` REST scheme).
#[derive(Debug, Clone)]
pub struct TurnIssuer {
    settings: TurnSettings,
}

impl TurnIssuer {
    pub fn new(settings: TurnSettings) -> Self {
        Self { settings }
    }

    pub fn ice_servers(&self, conn_id: &str) -> Vec<IceServer> {
        self.ice_servers_at(conn_id, Utc::now().timestamp())
    }

    fn ice_servers_at(&self, conn_id: &str, now: i64) -> Vec<IceServer> {
        let mut servers = Vec::with_capacity(2);
        if !self.settings.stun_urls.is_empty() {
            servers.push(IceServer {
                urls: self.settings.stun_urls.clone(),
                username: None,
                credential: None,
            });
        }
        if let Some(secret) = &self.settings.shared_secret {
            if !self.settings.turn_urls.is_empty() {
                let expiry = now + self.settings.credential_ttl.as_secs() as i64;
                let username = format!("{expiry}:{conn_id}");
                servers.push(IceServer {
                    urls: self.settings.turn_urls.clone(),
                    credential: Some(compute_credential(secret.as_bytes(), &username)),
                    username: Some(username),
                });
            }
        }
        servers
    }
}

fn compute_credential(secret: &[u8], username: &str) -> String {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha1::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(username.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer(secret: Option<&str>) -> TurnIssuer {
        TurnIssuer::new(TurnSettings {
            stun_urls: vec!["stun:stun.example.org:3478".into()],
            turn_urls: vec!["turn:turn.example.org:3478?transport=udp".into()],
            shared_secret: secret.map(str::to_string),
            credential_ttl: Duration::from_secs(600),
        })
    }

    #[test_timeout::timeout]
    fn stun_only_without_a_shared_secret() {
        let servers = issuer(None).ice_servers("abc");
        assert_eq!(servers.len(), 1);
        assert!(servers[0].username.is_none());
    }

    #[test_timeout::timeout]
    fn turn_credentials_follow_rest_scheme() {
        let servers = issuer(Some("north")).ice_servers_at("abc", 1_000);
        assert_eq!(servers.len(), 2);
        let turn = &servers[1];
        assert_eq!(turn.username.as_deref(), Some("1600:abc"));
        assert_eq!(
            turn.credential.as_deref(),
            Some(compute_credential(b"north", "1600:abc").as_str())
        );
        // base64 of a 20-byte SHA-1 MAC.
        assert_eq!(turn.credential.as_ref().map(String::len), Some(28));
    }

    #[test_timeout::timeout]
    fn credentials_depend_on_the_secret() {
        assert_ne!(
            compute_credential(b"north", "1600:abc"),
            compute_credential(b"south", "1600:abc")
        );
    }
}
