//! Bridge settings.
//!
//! All settings come from `PYKOCLAW_WA_`-prefixed environment variables
//! (the daemon loads an optional `.env` file first; a real process variable
//! always wins). Any unknown variable carrying the prefix is rejected rather
//! than silently ignored, so typos surface at startup.

use std::path::PathBuf;

use anyhow::{Context, bail};
use serde::Serialize;

pub const ENV_PREFIX: &str = "PYKOCLAW_WA_";

#[derive(Debug, Clone, Serialize)]
pub struct WhatsAppSettings {
    /// Directory holding the WhatsApp client's credentials.
    pub auth_dir: PathBuf,
    /// Fallback agent trigger name when no routes file is configured.
    pub trigger_name: String,
    /// Path of the bridge SQLite store.
    pub session_db: PathBuf,
    /// Debounce window for ambient message batches.
    pub batch_window_seconds: u64,
    /// Optional path of the multi-agent routing JSON file.
    pub agent_routes: Option<PathBuf>,
}

impl Default for WhatsAppSettings {
    fn default() -> Self {
        let base = home_dir().join(".pykoclaw").join("whatsapp");
        Self {
            auth_dir: base.join("auth"),
            trigger_name: "Andy".to_string(),
            session_db: base.join("session.db"),
            batch_window_seconds: 90,
            agent_routes: None,
        }
    }
}

impl WhatsAppSettings {
    /// Load settings from the process environment.
    pub fn load() -> anyhow::Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Apply `PYKOCLAW_WA_*` variables from `vars` over the defaults.
    pub fn from_vars(
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> anyhow::Result<Self> {
        let mut settings = Self::default();
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "TRIGGER_NAME" => settings.trigger_name = value,
                "BATCH_WINDOW_SECONDS" => {
                    settings.batch_window_seconds = value
                        .parse()
                        .with_context(|| format!("invalid {key}: {value:?}"))?;
                }
                "AUTH_DIR" => settings.auth_dir = PathBuf::from(value),
                "SESSION_DB" => settings.session_db = PathBuf::from(value),
                "AGENT_ROUTES" => settings.agent_routes = Some(PathBuf::from(value)),
                _ => bail!("unknown setting {key} (remove it or fix the name)"),
            }
        }
        Ok(settings)
    }
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults() {
        let settings = WhatsAppSettings::from_vars(vars(&[])).unwrap();
        assert_eq!(settings.trigger_name, "Andy");
        assert_eq!(settings.batch_window_seconds, 90);
        assert!(settings.auth_dir.ends_with(".pykoclaw/whatsapp/auth"));
        assert!(settings.session_db.ends_with(".pykoclaw/whatsapp/session.db"));
        assert!(settings.agent_routes.is_none());
    }

    #[test]
    fn prefixed_vars_override_defaults() {
        let settings = WhatsAppSettings::from_vars(vars(&[
            ("PYKOCLAW_WA_TRIGGER_NAME", "Bot"),
            ("PYKOCLAW_WA_BATCH_WINDOW_SECONDS", "120"),
            ("PYKOCLAW_WA_AUTH_DIR", "/tmp/auth"),
            ("PYKOCLAW_WA_SESSION_DB", "/tmp/session.db"),
            ("PYKOCLAW_WA_AGENT_ROUTES", "/tmp/routes.json"),
        ]))
        .unwrap();
        assert_eq!(settings.trigger_name, "Bot");
        assert_eq!(settings.batch_window_seconds, 120);
        assert_eq!(settings.auth_dir, PathBuf::from("/tmp/auth"));
        assert_eq!(settings.session_db, PathBuf::from("/tmp/session.db"));
        assert_eq!(
            settings.agent_routes.as_deref(),
            Some(std::path::Path::new("/tmp/routes.json"))
        );
    }

    #[test]
    fn unprefixed_vars_are_ignored() {
        let settings = WhatsAppSettings::from_vars(vars(&[
            ("TRIGGER_NAME", "ignored"),
            ("OTHER_TRIGGER_NAME", "ignored"),
            ("PATH", "/usr/bin"),
        ]))
        .unwrap();
        assert_eq!(settings.trigger_name, "Andy");
    }

    #[test]
    fn unknown_prefixed_key_is_rejected() {
        let err = WhatsAppSettings::from_vars(vars(&[("PYKOCLAW_WA_MODEL", "nope")]))
            .unwrap_err();
        assert!(err.to_string().contains("PYKOCLAW_WA_MODEL"));
    }

    #[test]
    fn bad_window_value_is_rejected() {
        let err = WhatsAppSettings::from_vars(vars(&[(
            "PYKOCLAW_WA_BATCH_WINDOW_SECONDS",
            "soon",
        )]))
        .unwrap_err();
        assert!(err.to_string().contains("BATCH_WINDOW_SECONDS"));
    }
}
