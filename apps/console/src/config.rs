use std::fs;

use anyhow::{bail, Context};
use serde::Deserialize;
use tracing::warn;
use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Console server base; the device channel endpoint is derived from it.
    pub server_url: String,
    /// Upgrade REST base, e.g. `http://host/v1`.
    pub api_base: String,
    pub poll_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:7770".into(),
            api_base: "http://localhost:5000/v1".into(),
            poll_interval_ms: 3000,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
    api_base: Option<String>,
    poll_interval_ms: Option<u64>,
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("console.toml") {
        apply_file(&mut settings, &raw);
    }
    apply_env(&mut settings);

    settings
}

fn apply_file(settings: &mut Settings, raw: &str) {
    match toml::from_str::<FileSettings>(raw) {
        Ok(file) => {
            if let Some(v) = file.server_url {
                settings.server_url = v;
            }
            if let Some(v) = file.api_base {
                settings.api_base = v;
            }
            if let Some(v) = file.poll_interval_ms {
                settings.poll_interval_ms = v;
            }
        }
        Err(err) => warn!("ignoring unreadable console.toml: {err}"),
    }
}

fn apply_env(settings: &mut Settings) {
    if let Ok(v) = std::env::var("CONSOLE_SERVER_URL") {
        settings.server_url = v;
    }
    if let Ok(v) = std::env::var("CONSOLE_API_BASE") {
        settings.api_base = v;
    }
    if let Ok(v) = std::env::var("CONSOLE_POLL_INTERVAL_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.poll_interval_ms = parsed;
        }
    }
}

pub fn validate_server_url(raw: &str) -> anyhow::Result<()> {
    let url = Url::parse(raw).with_context(|| format!("invalid server url '{raw}'"))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("server url must use http or https, got '{}'", url.scheme());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_settings_override_only_the_keys_they_carry() {
        let mut settings = Settings::default();
        apply_file(
            &mut settings,
            "server_url = \"https://console.example.org\"\npoll_interval_ms = 500\n",
        );
        assert_eq!(settings.server_url, "https://console.example.org");
        assert_eq!(settings.poll_interval_ms, 500);
        assert_eq!(settings.api_base, Settings::default().api_base);
    }

    #[test]
    fn an_unreadable_file_leaves_the_defaults_in_place() {
        let mut settings = Settings::default();
        apply_file(&mut settings, "server_url = [not toml");
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn server_url_validation_requires_an_http_scheme() {
        assert!(validate_server_url("http://localhost:7770").is_ok());
        assert!(validate_server_url("https://console.example.org:7778").is_ok());
        assert!(validate_server_url("ws://localhost:7770").is_err());
        assert!(validate_server_url("not a url").is_err());
    }
}
