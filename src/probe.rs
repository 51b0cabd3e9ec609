//! Liveness probes
//!
//! A probe answers one question: is a process tagged `--name <service>`
//! alive right now. The supervisor wraps every call in
//! [`probe_with_timeout`], which turns errors and timeouts into "not running".

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;

use crate::config::ProbeKind;
use crate::error::ProbeError;
use crate::pidfile::pid_alive;

#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn is_alive(&self, service: &str) -> Result<bool, ProbeError>;
}

/// Scans the process table for a command line carrying `--name <service>`
pub struct ProcessTableProbe {
    program: String,
    own_pid: u32,
}

impl ProcessTableProbe {
    pub fn new() -> Self {
        Self {
            program: "ps".to_string(),
            own_pid: std::process::id(),
        }
    }

    /// Use a different `ps`-compatible binary
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

impl Default for ProcessTableProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LivenessProbe for ProcessTableProbe {
    async fn is_alive(&self, service: &str) -> Result<bool, ProbeError> {
        let output = Command::new(&self.program)
            .args(["-eo", "pid=,args="])
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(ProbeError::Command(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let listing = String::from_utf8_lossy(&output.stdout);
        let found = listing
            .lines()
            .any(|line| line_matches(line, service, self.own_pid));
        tracing::trace!(service, found, "Process table scanned");
        Ok(found)
    }
}

/// `line` is one `pid args...` row. Our own process never counts.
fn line_matches(line: &str, service: &str, own_pid: u32) -> bool {
    let line = line.trim_start();
    let (pid, args) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    if pid.parse::<u32>().ok() == Some(own_pid) {
        return false;
    }

    let tokens: Vec<&str> = args.split_whitespace().collect();
    tokens
        .windows(2)
        .any(|pair| pair[0] == "--name" && pair[1] == service)
}

/// Reads `<dir>/<service>.pid` and checks that the recorded PID is alive
pub struct PidFileProbe {
    dir: PathBuf,
}

impl PidFileProbe {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, service: &str) -> PathBuf {
        self.dir.join(format!("{service}.pid"))
    }
}

#[async_trait]
impl LivenessProbe for PidFileProbe {
    async fn is_alive(&self, service: &str) -> Result<bool, ProbeError> {
        let path = self.path_for(service);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let pid: i32 = text.trim().parse().map_err(|_| {
            ProbeError::Command(format!("invalid pid '{}' in {}", text.trim(), path.display()))
        })?;
        Ok(pid_alive(pid))
    }
}

/// Build the probe configured for a service
pub fn build_probe(kind: ProbeKind, working_dir: &Path) -> Arc<dyn LivenessProbe> {
    match kind {
        ProbeKind::Ps => Arc::new(ProcessTableProbe::new()),
        ProbeKind::Pidfile => Arc::new(PidFileProbe::new(working_dir)),
    }
}

/// Run `probe` under a hard time limit. Failures and timeouts are logged and
/// read as "not running"; they never propagate.
pub async fn probe_with_timeout(
    probe: &dyn LivenessProbe,
    service: &str,
    limit: Duration,
) -> bool {
    match timeout(limit, probe.is_alive(service)).await {
        Ok(Ok(alive)) => alive,
        Ok(Err(e)) => {
            tracing::warn!(service, "Liveness probe failed, assuming not running: {e}");
            false
        }
        Err(_) => {
            tracing::warn!(
                service,
                "Liveness probe failed, assuming not running: {}",
                ProbeError::Timeout(limit)
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(bool);

    #[async_trait]
    impl LivenessProbe for Fixed {
        async fn is_alive(&self, _service: &str) -> Result<bool, ProbeError> {
            Ok(self.0)
        }
    }

    struct Failing;

    #[async_trait]
    impl LivenessProbe for Failing {
        async fn is_alive(&self, _service: &str) -> Result<bool, ProbeError> {
            Err(ProbeError::Command("boom".into()))
        }
    }

    struct Hanging;

    #[async_trait]
    impl LivenessProbe for Hanging {
        async fn is_alive(&self, _service: &str) -> Result<bool, ProbeError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(true)
        }
    }

    #[test]
    fn test_line_matches() {
        assert!(line_matches("  4242 /usr/bin/app --name lux start", "lux", 1));
        assert!(line_matches("17 python3 app.py --name   lux", "lux", 1));
        assert!(!line_matches("4242 /usr/bin/app --name lux2 start", "lux", 1));
        assert!(!line_matches("4242 /usr/bin/app --name", "lux", 1));
        assert!(!line_matches("4242 lux --verbose", "lux", 1));
    }

    #[test]
    fn test_line_matches_skips_own_pid() {
        assert!(!line_matches("99 crondog run --name lux", "lux", 99));
    }

    #[tokio::test]
    async fn test_probe_with_timeout_passes_result() {
        let limit = Duration::from_secs(2);
        assert!(probe_with_timeout(&Fixed(true), "X", limit).await);
        assert!(!probe_with_timeout(&Fixed(false), "X", limit).await);
    }

    #[tokio::test]
    async fn test_probe_failure_reads_as_not_running() {
        assert!(!probe_with_timeout(&Failing, "X", Duration::from_secs(2)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_timeout_reads_as_not_running() {
        let started = tokio::time::Instant::now();
        assert!(!probe_with_timeout(&Hanging, "X", Duration::from_secs(2)).await);
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_process_table_probe_missing_binary() {
        let probe = ProcessTableProbe::new().with_program("/nonexistent/ps");
        assert!(matches!(
            probe.is_alive("X").await,
            Err(ProbeError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_pidfile_probe() {
        let dir = tempfile::tempdir().unwrap();
        let probe = PidFileProbe::new(dir.path());

        assert!(!probe.is_alive("absent").await.unwrap());

        std::fs::write(probe.path_for("me"), std::process::id().to_string()).unwrap();
        assert!(probe.is_alive("me").await.unwrap());

        std::fs::write(probe.path_for("gone"), i32::MAX.to_string()).unwrap();
        assert!(!probe.is_alive("gone").await.unwrap());

        std::fs::write(probe.path_for("junk"), "not-a-pid").unwrap();
        assert!(matches!(
            probe.is_alive("junk").await,
            Err(ProbeError::Command(_))
        ));
    }
}
