use chrono::{DateTime, Duration, Local, TimeZone, Timelike};
use logwarden_types::RetentionPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Resolve the data directory:
/// 1. explicit path, 2. `LOGWARDEN_DATA`, 3. XDG data dir, 4. `~/.logwarden`.
pub fn resolve_data_dir(explicit: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(expand_tilde(path));
    }
    if let Ok(env_path) = std::env::var("LOGWARDEN_DATA") {
        return Ok(expand_tilde(&env_path));
    }
    if let Some(data_dir) = dirs::data_dir() {
        return Ok(data_dir.join("logwarden"));
    }
    if let Some(home) = std::env::var_os("HOME") {
        return Ok(PathBuf::from(home).join(".logwarden"));
    }
    Err(Error::Config(
        "Could not determine data directory: no HOME or XDG data directory".to_string(),
    ))
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return PathBuf::from(home).join(stripped);
    }
    PathBuf::from(path)
}

/// Per-protocol enable flags and port overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerToggles {
    #[serde(default = "default_true")]
    pub syslog_enabled: bool,
    #[serde(default = "d_syslog_udp")]
    pub syslog_udp_port: u16,
    #[serde(default = "d_syslog_tcp")]
    pub syslog_tcp_port: u16,

    #[serde(default = "default_true")]
    pub gelf_enabled: bool,
    #[serde(default = "d_gelf_udp")]
    pub gelf_udp_port: u16,
    #[serde(default = "d_gelf_tcp")]
    pub gelf_tcp_port: u16,

    #[serde(default = "default_true")]
    pub beats_enabled: bool,
    #[serde(default = "d_beats")]
    pub beats_port: u16,

    #[serde(default = "default_true")]
    pub fluent_enabled: bool,
    #[serde(default = "d_fluent")]
    pub fluent_port: u16,

    /// Directories or files tailed as line-delimited logs
    #[serde(default)]
    pub tail_paths: Vec<PathBuf>,
}

fn default_true() -> bool {
    true
}
fn d_syslog_udp() -> u16 {
    514
}
fn d_syslog_tcp() -> u16 {
    601
}
fn d_gelf_udp() -> u16 {
    12201
}
fn d_gelf_tcp() -> u16 {
    12202
}
fn d_beats() -> u16 {
    5044
}
fn d_fluent() -> u16 {
    9880
}

impl Default for ListenerToggles {
    fn default() -> Self {
        toml::from_str("").expect("defaults are complete")
    }
}

/// Typed configuration record, built once at startup. Environment variables
/// override the `config.toml` in the data directory; runtime-mutable values
/// (timezone, theme, retention defaults) live in the settings table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default)]
    pub use_https: bool,
    #[serde(default)]
    pub ssl_key_path: Option<PathBuf>,
    #[serde(default)]
    pub ssl_cert_path: Option<PathBuf>,

    #[serde(default = "d_timezone")]
    pub timezone: String,

    #[serde(default)]
    pub production: bool,
    #[serde(default)]
    pub auth_password: Option<String>,
    #[serde(default)]
    pub jwt_secret: Option<String>,
    #[serde(default)]
    pub allow_dev_secret: bool,

    #[serde(default)]
    pub listeners: ListenerToggles,

    #[serde(default = "d_retention_days")]
    pub log_retention_days: u64,
    #[serde(default)]
    pub retention_policies: Vec<RetentionPolicy>,
    #[serde(default = "d_backup_schedule")]
    pub backup_schedule: String,

    #[serde(default)]
    pub rdns_enabled: bool,
    #[serde(default = "d_anomaly_k")]
    pub anomaly_k: f64,
    #[serde(default)]
    pub order_by_ingest_time: bool,

    /// Correlation patterns are configuration, not database rows; their
    /// instances live only in memory
    #[serde(default)]
    pub correlation_patterns: Vec<serde_json::Value>,

    #[serde(skip)]
    pub data_dir: PathBuf,
}

fn d_port() -> u16 {
    8080
}
fn d_timezone() -> String {
    "UTC".to_string()
}
fn d_retention_days() -> u64 {
    30
}
fn d_backup_schedule() -> String {
    "0 2 * * *".to_string()
}
fn d_anomaly_k() -> f64 {
    3.0
}

impl Config {
    /// Load `config.toml` from the data dir (when present), then apply
    /// environment overrides, then validate.
    pub fn load(explicit_data_dir: Option<&str>) -> Result<Self> {
        let data_dir = resolve_data_dir(explicit_data_dir)?;
        let config_path = data_dir.join("config.toml");

        let mut config: Config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            toml::from_str("").expect("defaults are complete")
        };
        config.data_dir = data_dir;

        config.apply_env(&env_map());
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn apply_env(&mut self, env: &HashMap<String, String>) {
        let get = |key: &str| env.get(key).cloned();

        if let Some(port) = get("PORT").and_then(|v| v.parse().ok()) {
            self.port = port;
        }
        if let Some(v) = get("USE_HTTPS") {
            self.use_https = is_truthy(&v);
        }
        if let Some(v) = get("SSL_KEY_PATH") {
            self.ssl_key_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("SSL_CERT_PATH") {
            self.ssl_cert_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("TIMEZONE") {
            self.timezone = v;
        }
        if let Some(v) = get("LOGWARDEN_ENV") {
            self.production = v.eq_ignore_ascii_case("production");
        }
        if let Some(v) = get("AUTH_PASSWORD") {
            self.auth_password = Some(v);
        }
        if let Some(v) = get("JWT_SECRET") {
            self.jwt_secret = Some(v);
        }
        if let Some(v) = get("ALLOW_DEV_SECRET") {
            self.allow_dev_secret = is_truthy(&v);
        }
        if let Some(v) = get("LOG_RETENTION_DAYS").and_then(|v| v.parse().ok()) {
            self.log_retention_days = v;
        }
        if let Some(v) = get("BACKUP_SCHEDULE") {
            self.backup_schedule = v;
        }

        if let Some(v) = get("SYSLOG_ENABLED") {
            self.listeners.syslog_enabled = is_truthy(&v);
        }
        if let Some(v) = get("SYSLOG_UDP_PORT").and_then(|v| v.parse().ok()) {
            self.listeners.syslog_udp_port = v;
        }
        if let Some(v) = get("SYSLOG_TCP_PORT").and_then(|v| v.parse().ok()) {
            self.listeners.syslog_tcp_port = v;
        }
        if let Some(v) = get("GELF_ENABLED") {
            self.listeners.gelf_enabled = is_truthy(&v);
        }
        if let Some(v) = get("GELF_UDP_PORT").and_then(|v| v.parse().ok()) {
            self.listeners.gelf_udp_port = v;
        }
        if let Some(v) = get("GELF_TCP_PORT").and_then(|v| v.parse().ok()) {
            self.listeners.gelf_tcp_port = v;
        }
        if let Some(v) = get("BEATS_ENABLED") {
            self.listeners.beats_enabled = is_truthy(&v);
        }
        if let Some(v) = get("BEATS_PORT").and_then(|v| v.parse().ok()) {
            self.listeners.beats_port = v;
        }
        if let Some(v) = get("FLUENT_ENABLED") {
            self.listeners.fluent_enabled = is_truthy(&v);
        }
        if let Some(v) = get("FLUENT_PORT").and_then(|v| v.parse().ok()) {
            self.listeners.fluent_port = v;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.production && self.jwt_secret.as_deref().map_or(true, str::is_empty) {
            return Err(Error::Config(
                "JWT_SECRET is required in production (set ALLOW_DEV_SECRET=true to run with an ephemeral secret)"
                    .to_string(),
            ));
        }
        if self.production && self.auth_password.as_deref().map_or(true, str::is_empty) {
            return Err(Error::Config(
                "AUTH_PASSWORD is required in production for the default admin account".to_string(),
            ));
        }
        if self.use_https && (self.ssl_key_path.is_none() || self.ssl_cert_path.is_none()) {
            return Err(Error::Config(
                "USE_HTTPS requires SSL_KEY_PATH and SSL_CERT_PATH".to_string(),
            ));
        }
        Schedule::parse(&self.backup_schedule)?;
        Ok(())
    }

    /// Effective JWT secret: configured, or ephemeral in non-production.
    pub fn effective_jwt_secret(&self) -> Result<String> {
        match &self.jwt_secret {
            Some(secret) if !secret.is_empty() => Ok(secret.clone()),
            _ if !self.production || self.allow_dev_secret => {
                use rand::Rng;
                let bytes: [u8; 32] = rand::thread_rng().r#gen();
                Ok(hex::encode(bytes))
            }
            _ => Err(Error::Config("JWT_SECRET missing".to_string())),
        }
    }

    /// Every retention policy in force: explicit list plus the default
    /// age-based policy from `LOG_RETENTION_DAYS`.
    pub fn effective_retention_policies(&self) -> Vec<RetentionPolicy> {
        let mut policies = self.retention_policies.clone();
        if self.log_retention_days > 0 {
            policies.push(RetentionPolicy::by_age_days(self.log_retention_days));
        }
        policies
    }

    pub fn databases_dir(&self) -> PathBuf {
        self.data_dir.join("databases")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.data_dir.join("backups")
    }
}

fn is_truthy(v: &str) -> bool {
    matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn env_map() -> HashMap<String, String> {
    std::env::vars().collect()
}

/// Cron subset for the retention schedule: `M H * * *` with numeric or `*`
/// minute/hour fields. The remaining fields must be `*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub minute: Option<u32>,
    pub hour: Option<u32>,
}

impl Schedule {
    pub fn parse(expr: &str) -> Result<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(Error::Config(format!(
                "schedule '{}' must have 5 cron fields",
                expr
            )));
        }
        for tail in &fields[2..] {
            if *tail != "*" {
                return Err(Error::Config(format!(
                    "schedule '{}': only minute and hour fields are supported",
                    expr
                )));
            }
        }

        let parse_field = |field: &str, max: u32| -> Result<Option<u32>> {
            if field == "*" {
                return Ok(None);
            }
            let value: u32 = field
                .parse()
                .map_err(|_| Error::Config(format!("bad cron field '{}'", field)))?;
            if value > max {
                return Err(Error::Config(format!("cron field {} out of range", value)));
            }
            Ok(Some(value))
        };

        Ok(Schedule {
            minute: parse_field(fields[0], 59)?,
            hour: parse_field(fields[1], 23)?,
        })
    }

    /// Next firing instant strictly after `after`, in local time.
    pub fn next_after(&self, after: DateTime<Local>) -> DateTime<Local> {
        let mut candidate = after + Duration::minutes(1);
        candidate = candidate.with_second(0).unwrap_or(candidate);

        // Bounded walk: within 48h there is always a match for this subset
        for _ in 0..(48 * 60) {
            let minute_ok = self.minute.is_none_or(|m| candidate.minute() == m);
            let hour_ok = self.hour.is_none_or(|h| candidate.hour() == h);
            if minute_ok && hour_ok {
                return candidate;
            }
            candidate += Duration::minutes(1);
        }
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        let mut c: Config = toml::from_str("").unwrap();
        c.data_dir = PathBuf::from("/tmp/lw-test");
        c
    }

    #[test]
    fn defaults_are_sane() {
        let c = base_config();
        assert_eq!(c.port, 8080);
        assert_eq!(c.listeners.syslog_udp_port, 514);
        assert_eq!(c.listeners.beats_port, 5044);
        assert_eq!(c.log_retention_days, 30);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn env_overrides_apply() {
        let mut c = base_config();
        let env: HashMap<String, String> = [
            ("PORT", "9999"),
            ("SYSLOG_ENABLED", "false"),
            ("GELF_UDP_PORT", "22201"),
            ("LOG_RETENTION_DAYS", "7"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        c.apply_env(&env);

        assert_eq!(c.port, 9999);
        assert!(!c.listeners.syslog_enabled);
        assert_eq!(c.listeners.gelf_udp_port, 22201);
        assert_eq!(c.log_retention_days, 7);
    }

    #[test]
    fn production_requires_secret_and_password() {
        let mut c = base_config();
        c.production = true;
        assert!(c.validate().is_err());

        c.jwt_secret = Some("s".repeat(32));
        assert!(c.validate().is_err());

        c.auth_password = Some("pw".to_string());
        assert!(c.validate().is_ok());
    }

    #[test]
    fn https_requires_cert_paths() {
        let mut c = base_config();
        c.use_https = true;
        assert!(c.validate().is_err());
        c.ssl_key_path = Some("key.pem".into());
        c.ssl_cert_path = Some("cert.pem".into());
        assert!(c.validate().is_ok());
    }

    #[test]
    fn schedule_parse_and_next() {
        let s = Schedule::parse("0 2 * * *").unwrap();
        assert_eq!(s, Schedule { minute: Some(0), hour: Some(2) });

        let after = Local.with_ymd_and_hms(2025, 6, 1, 3, 0, 0).unwrap();
        let next = s.next_after(after);
        assert_eq!(next.hour(), 2);
        assert_eq!(next.minute(), 0);
        assert!(next > after);

        assert!(Schedule::parse("0 2 * * 1").is_err());
        assert!(Schedule::parse("61 2 * * *").is_err());
        assert!(Schedule::parse("nope").is_err());
    }

    #[test]
    fn ephemeral_secret_only_outside_production() {
        let mut c = base_config();
        assert!(c.effective_jwt_secret().is_ok());

        c.production = true;
        assert!(c.effective_jwt_secret().is_err());

        c.allow_dev_secret = true;
        assert!(c.effective_jwt_secret().is_ok());
    }

    #[test]
    fn default_retention_policy_appended() {
        let c = base_config();
        let policies = c.effective_retention_policies();
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].parameter, 30);
    }
}
