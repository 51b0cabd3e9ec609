//! Supervisor configuration, read from an HCL file:
//!
//! ```hcl
//! supervisor {
//!   poll_interval = "5s"
//!   grace_period  = "5m"
//!   crontab       = "system"
//! }
//!
//! service "lux" {
//!   probe = "pidfile"
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::Deserialize;

use crate::crontab::{CrontabSource, FileCrontab, SystemCrontab};
use crate::error::{CrondogError, Result};

/// Longest lookback the one-year search horizon can serve
const MAX_LOOKBACK: Duration = Duration::from_secs(366 * 24 * 60 * 60);

#[derive(Debug, Default, Deserialize)]
pub struct CrondogConfig {
    #[serde(default)]
    pub supervisor: Settings,
    /// Declared services. When non-empty, only these are supervised.
    #[serde(default)]
    pub service: IndexMap<String, ServiceDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,
    #[serde(default = "default_grace_period", with = "duration_serde")]
    pub grace_period: Duration,
    #[serde(default = "default_probe_timeout", with = "duration_serde")]
    pub probe_timeout: Duration,
    #[serde(default = "default_lookback", with = "duration_serde")]
    pub lookback: Duration,
    #[serde(default)]
    pub clock: ClockKind,
    /// `"system"` for `crontab -l`, otherwise a path to a crontab-format file
    #[serde(default = "default_crontab")]
    pub crontab: String,
    #[serde(default)]
    pub probe: ProbeKind,
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            grace_period: default_grace_period(),
            probe_timeout: default_probe_timeout(),
            lookback: default_lookback(),
            clock: ClockKind::default(),
            crontab: default_crontab(),
            probe: ProbeKind::default(),
            working_dir: default_working_dir(),
            log_level: default_log_level(),
            log_dir: None,
        }
    }
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}
fn default_grace_period() -> Duration {
    Duration::from_secs(5 * 60)
}
fn default_probe_timeout() -> Duration {
    Duration::from_secs(2)
}
fn default_lookback() -> Duration {
    Duration::from_secs(7 * 24 * 60 * 60)
}
fn default_crontab() -> String {
    "system".into()
}
fn default_working_dir() -> PathBuf {
    PathBuf::from("~/.cronlog")
}
fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct ServiceDef {
    /// Overrides `supervisor.probe` for this service
    #[serde(default)]
    pub probe: Option<ProbeKind>,
}

#[derive(Debug, Default, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    /// Scan `ps` output for `--name <service>`
    #[default]
    Ps,
    /// Check `<working_dir>/<service>.pid`
    Pidfile,
}

/// Wall clock that crontab entries are evaluated against
#[derive(Debug, Default, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClockKind {
    #[default]
    Local,
    Utc,
}

impl ClockKind {
    pub fn now(&self) -> NaiveDateTime {
        match self {
            ClockKind::Local => chrono::Local::now().naive_local(),
            ClockKind::Utc => chrono::Utc::now().naive_utc(),
        }
    }
}

mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(d)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if let Some(v) = s.strip_suffix("ms") {
            return v
                .trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string());
        }

        let (value, unit_secs) = match s.char_indices().last() {
            Some((idx, 's')) => (&s[..idx], 1),
            Some((idx, 'm')) => (&s[..idx], 60),
            Some((idx, 'h')) => (&s[..idx], 60 * 60),
            Some((idx, 'd')) => (&s[..idx], 24 * 60 * 60),
            _ => {
                return Err(format!(
                    "unknown duration format: '{s}' (use '500ms', '5s', '5m', '1h' or '7d')"
                ))
            }
        };
        value
            .trim()
            .parse::<u64>()
            .map(|n| Duration::from_secs(n.saturating_mul(unit_secs)))
            .map_err(|e| e.to_string())
    }
}

impl CrondogConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let src = std::fs::read_to_string(path)
            .map_err(|e| CrondogError::Config(format!("cannot read {}: {e}", path.display())))?;
        let cfg: CrondogConfig = hcl::from_str(&src)
            .map_err(|e| CrondogError::Config(format!("parse error in {}: {e}", path.display())))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Like [`from_file`](Self::from_file), but a missing file yields the
    /// defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            let cfg = Self::default();
            cfg.validate()?;
            return Ok(cfg);
        }
        Self::from_file(path)
    }

    pub fn from_hcl(src: &str) -> Result<Self> {
        let cfg: CrondogConfig =
            hcl::from_str(src).map_err(|e| CrondogError::Config(format!("parse error: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.supervisor.validate()
    }

    /// Probe kind for `service`, falling back to the global default
    pub fn probe_for(&self, service: &str) -> ProbeKind {
        self.service
            .get(service)
            .and_then(|svc| svc.probe)
            .unwrap_or(self.supervisor.probe)
    }
}

impl Settings {
    /// The lookback search excludes its own lower bound, so it must be
    /// strictly longer than the grace period to see a start exactly
    /// `grace_period` ago.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(CrondogError::Config("poll_interval must be positive".into()));
        }
        if self.probe_timeout.is_zero() {
            return Err(CrondogError::Config("probe_timeout must be positive".into()));
        }
        if self.lookback.is_zero() || self.lookback > MAX_LOOKBACK {
            return Err(CrondogError::Config(
                "lookback must be between 1s and 366d".into(),
            ));
        }
        if self.grace_period >= self.lookback {
            return Err(CrondogError::Config(format!(
                "grace_period ({:?}) must be shorter than lookback ({:?})",
                self.grace_period, self.lookback
            )));
        }
        if self.crontab.trim().is_empty() {
            return Err(CrondogError::Config(
                "crontab must be \"system\" or a file path".into(),
            ));
        }
        Ok(())
    }

    pub fn working_dir(&self) -> PathBuf {
        expand_home(&self.working_dir)
    }

    pub fn log_dir(&self) -> Option<PathBuf> {
        self.log_dir.as_deref().map(expand_home)
    }

    /// Crontab source named by `crontab`, unless `override_path` is given
    pub fn crontab_source(&self, override_path: Option<&Path>) -> Arc<dyn CrontabSource> {
        match override_path {
            Some(path) => Arc::new(FileCrontab::new(expand_home(path))),
            None if self.crontab == "system" => Arc::new(SystemCrontab::new(self.probe_timeout)),
            None => Arc::new(FileCrontab::new(expand_home(Path::new(&self.crontab)))),
        }
    }
}

/// Expand a leading `~` to the home directory
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs_next::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}
