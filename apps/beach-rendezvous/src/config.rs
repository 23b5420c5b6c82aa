use std::env;
use std::time::Duration;

use uuid::Uuid;

use crate::registry::RegistrySettings;
use crate::turn::TurnSettings;

const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Unset runs a single process on the in-memory bus.
    pub redis_url: Option<String>,
    pub bus_prefix: String,
    pub instance_id: String,
    pub inactivity_timeout_seconds: u64,
    pub grace_period_seconds: u64,
    pub room_ttl_seconds: u64,
    pub stun_urls: Vec<String>,
    pub turn_urls: Vec<String>,
    pub turn_secret: Option<String>,
    pub turn_ttl_seconds: u64,
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env::var("RENDEZVOUS_HOST").unwrap_or(defaults.host),
            port: env::var("RENDEZVOUS_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
            bus_prefix: env::var("RENDEZVOUS_BUS_PREFIX").unwrap_or(defaults.bus_prefix),
            instance_id: env::var("RENDEZVOUS_INSTANCE_ID").unwrap_or(defaults.instance_id),
            inactivity_timeout_seconds: env::var("RENDEZVOUS_INACTIVITY_TIMEOUT")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(defaults.inactivity_timeout_seconds),
            grace_period_seconds: env::var("RENDEZVOUS_GRACE_PERIOD")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(defaults.grace_period_seconds),
            room_ttl_seconds: env::var("RENDEZVOUS_ROOM_TTL")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(defaults.room_ttl_seconds),
            stun_urls: env::var("RENDEZVOUS_STUN_URLS")
                .map(|urls| split_list(&urls))
                .unwrap_or(defaults.stun_urls),
            turn_urls: env::var("RENDEZVOUS_TURN_URLS")
                .map(|urls| split_list(&urls))
                .unwrap_or_default(),
            turn_secret: env::var("RENDEZVOUS_TURN_SECRET")
                .ok()
                .filter(|secret| !secret.is_empty()),
            turn_ttl_seconds: env::var("RENDEZVOUS_TURN_TTL")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(defaults.turn_ttl_seconds),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn registry_settings(&self) -> RegistrySettings {
        RegistrySettings {
            inactivity_timeout: Duration::from_secs(self.inactivity_timeout_seconds),
            grace_period: Duration::from_secs(self.grace_period_seconds),
            room_ttl: Duration::from_secs(self.room_ttl_seconds),
        }
    }

    pub fn turn_settings(&self) -> TurnSettings {
        TurnSettings {
            stun_urls: self.stun_urls.clone(),
            turn_urls: self.turn_urls.clone(),
            shared_secret: self.turn_secret.clone(),
            credential_ttl: Duration::from_secs(self.turn_ttl_seconds),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            redis_url: None,
            bus_prefix: "rendezvous:".to_string(),
            instance_id: format!("rendezvous-{}", Uuid::new_v4()),
            inactivity_timeout_seconds: 60,
            grace_period_seconds: 10,
            room_ttl_seconds: 600,
            stun_urls: vec![DEFAULT_STUN_URL.to_string()],
            turn_urls: Vec::new(),
            turn_secret: None,
            turn_ttl_seconds: 86_400,
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
        assert!(config.redis_url.is_none());
        assert!(config.instance_id.starts_with("rendezvous-"));
        let settings = config.registry_settings();
        assert_eq!(settings.inactivity_timeout, Duration::from_secs(60));
        assert_eq!(settings.grace_period, Duration::from_secs(10));
        assert_eq!(config.turn_settings().stun_urls, vec![DEFAULT_STUN_URL]);
    }

    #[test_timeout::timeout]
    fn url_lists_are_comma_separated() {
        assert_eq!(
            split_list(" turn:a:3478, ,turns:b:5349 "),
            vec!["turn:a:3478", "turns:b:5349"]
        );
        assert!(split_list("").is_empty());
    }
}
