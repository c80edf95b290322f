//! Settings loading and validation.
//!
//! All runtime configuration lives in one YAML file:
//! ```yaml
//! clocking_url: "https://backend.example.com/clocking"
//! roster_url: "https://backend.example.com/roster"   # optional
//! api_key: "secret"                                  # optional
//! poll_interval_seconds: 60
//! timezone: "Asia/Singapore"
//! device_id: "SIM-10.0.0.5"
//! send_from: "clocksim"
//! retention_days: 2
//! ```
//!
//! Every field except `clocking_url` has a default, so partial files are
//! accepted gracefully. Configuration problems are fatal only at process
//! startup — nothing in this module is consulted again once the
//! orchestrator is running.

use std::path::Path;

use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::Deserialize;
use tracing::info;

// ── Serde defaults ────────────────────────────────────────────────────────────

fn default_poll_interval() -> u64 {
    60
}

fn default_timezone() -> String {
    String::from("Asia/Singapore")
}

fn default_device_id() -> String {
    String::from("SIM-10.0.0.5")
}

fn default_send_from() -> String {
    String::from("clocksim")
}

fn default_retention_days() -> i64 {
    2
}

// ── Settings ──────────────────────────────────────────────────────────────────

/// Application settings loaded from a YAML file.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Endpoint the clock events are dispatched to.
    pub clocking_url: String,

    /// Endpoint roster assignments are fetched from. Optional — the roster
    /// may also be supplied as an uploaded file instead of being pulled.
    #[serde(default)]
    pub roster_url: Option<String>,

    /// API key forwarded to the backend. Absence means unauthenticated.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Interval between periodic catch-up cycles, in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,

    /// IANA zone name all shift instants and wire timestamps are local to.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Device identifier stamped onto every generated clock event.
    #[serde(default = "default_device_id")]
    pub device_id: String,

    /// Sender identifier stamped onto every generated clock event.
    #[serde(default = "default_send_from")]
    pub send_from: String,

    /// Ledger rows whose stamps are all older than this many days are
    /// removed by the routine retention cleanup.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            clocking_url: String::new(),
            roster_url: None,
            api_key: None,
            poll_interval_seconds: default_poll_interval(),
            timezone: default_timezone(),
            device_id: default_device_id(),
            send_from: default_send_from(),
            retention_days: default_retention_days(),
        }
    }
}

impl Settings {
    /// Parses `path` into a `Settings` value.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or if the YAML is
    /// structurally invalid. Callers treat this as fatal — the process
    /// exits rather than running with half a configuration.
    pub fn load_from_file(path: &Path) -> Result<Settings> {
        info!("Loading settings from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open settings file: {}", path.display()))?;

        let settings: Settings = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?;

        settings.tz().with_context(|| {
            format!("Settings file {} has an invalid timezone", path.display())
        })?;

        Ok(settings)
    }

    /// Resolves the configured zone name to a [`Tz`].
    ///
    /// # Errors
    /// Returns an error when the zone name is not a valid IANA identifier.
    /// Validated once at startup; later callers may rely on success.
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("invalid timezone '{}': {}", self.timezone, e))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Helper: write a YAML string to a temp file and return it.
    fn yaml_tempfile(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn full_settings_file_parses() {
        let yaml = r#"
clocking_url: "https://backend.example.com/clocking"
roster_url: "https://backend.example.com/roster"
api_key: "secret"
poll_interval_seconds: 30
timezone: "Asia/Singapore"
device_id: "SIM-10.0.0.7"
send_from: "sim-a"
retention_days: 7
"#;
        let f = yaml_tempfile(yaml);
        let s = Settings::load_from_file(f.path()).unwrap();

        assert_eq!(s.clocking_url, "https://backend.example.com/clocking");
        assert_eq!(s.roster_url.as_deref(), Some("https://backend.example.com/roster"));
        assert_eq!(s.api_key.as_deref(), Some("secret"));
        assert_eq!(s.poll_interval_seconds, 30);
        assert_eq!(s.device_id, "SIM-10.0.0.7");
        assert_eq!(s.send_from, "sim-a");
        assert_eq!(s.retention_days, 7);
    }

    #[test]
    fn optional_fields_use_defaults_when_absent() {
        let yaml = "clocking_url: \"http://localhost:9999/clocking\"\n";
        let f = yaml_tempfile(yaml);
        let s = Settings::load_from_file(f.path()).unwrap();

        assert_eq!(s.roster_url, None);
        assert_eq!(s.api_key, None);
        assert_eq!(s.poll_interval_seconds, 60);
        assert_eq!(s.timezone, "Asia/Singapore");
        assert_eq!(s.device_id, "SIM-10.0.0.5");
        assert_eq!(s.retention_days, 2);
    }

    #[test]
    fn missing_file_returns_error() {
        let result = Settings::load_from_file(Path::new("/nonexistent/settings.yaml"));
        assert!(result.is_err());
    }

    #[test]
    fn malformed_yaml_returns_error() {
        let f = yaml_tempfile("this is: not: valid: yaml: content:::");
        assert!(Settings::load_from_file(f.path()).is_err());
    }

    #[test]
    fn invalid_timezone_is_rejected_at_load() {
        let yaml = "clocking_url: \"x\"\ntimezone: \"Mars/Olympus_Mons\"\n";
        let f = yaml_tempfile(yaml);
        assert!(Settings::load_from_file(f.path()).is_err());
    }

    #[test]
    fn tz_resolves_configured_zone() {
        let s = Settings::default();
        assert_eq!(s.tz().unwrap(), chrono_tz::Asia::Singapore);
    }
}
