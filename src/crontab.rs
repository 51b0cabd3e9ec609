//! Crontab sources and loading
//!
//! A [`CrontabSource`] only hands over raw lines. Parsing and grouping are
//! done here and in [`crate::schedule`], so a source can be the native
//! `crontab -l`, a file, or a fixed list in tests.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tokio::time::timeout;

use crate::error::{CrondogError, ParseError, Result};
use crate::job::ScheduledJob;

/// Supplier of raw crontab lines
#[async_trait]
pub trait CrontabSource: Send + Sync {
    /// Read the current crontab, one entry per line
    async fn read_lines(&self) -> Result<Vec<String>>;

    /// Short label for logs
    fn describe(&self) -> String;
}

/// The invoking user's crontab (or another user's), read via `crontab -l`
pub struct SystemCrontab {
    user: Option<String>,
    timeout: Duration,
}

impl SystemCrontab {
    pub fn new(timeout: Duration) -> Self {
        Self {
            user: None,
            timeout,
        }
    }

    pub fn for_user(user: impl Into<String>, timeout: Duration) -> Self {
        Self {
            user: Some(user.into()),
            timeout,
        }
    }
}

#[async_trait]
impl CrontabSource for SystemCrontab {
    async fn read_lines(&self) -> Result<Vec<String>> {
        let mut cmd = Command::new("crontab");
        if let Some(user) = &self.user {
            cmd.arg("-u").arg(user);
        }
        cmd.arg("-l").kill_on_drop(true);

        let output = timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                CrondogError::Crontab(format!("crontab -l timed out after {:?}", self.timeout))
            })?
            .map_err(|e| CrondogError::Crontab(format!("cannot run crontab: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("no crontab for") {
                tracing::debug!("No crontab installed, treating as empty");
                return Ok(Vec::new());
            }
            return Err(CrondogError::Crontab(format!(
                "crontab -l failed: {}",
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect())
    }

    fn describe(&self) -> String {
        match &self.user {
            Some(user) => format!("crontab -u {user} -l"),
            None => "crontab -l".to_string(),
        }
    }
}

/// A crontab-format file on disk
pub struct FileCrontab {
    path: PathBuf,
}

impl FileCrontab {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CrontabSource for FileCrontab {
    async fn read_lines(&self) -> Result<Vec<String>> {
        let text = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            CrondogError::Crontab(format!("cannot read {}: {e}", self.path.display()))
        })?;
        Ok(text.lines().map(str::to_string).collect())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Fixed in-memory lines
#[derive(Debug, Clone, Default)]
pub struct StaticCrontab {
    lines: Vec<String>,
}

impl StaticCrontab {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_text(text: &str) -> Self {
        Self::new(text.lines())
    }
}

#[async_trait]
impl CrontabSource for StaticCrontab {
    async fn read_lines(&self) -> Result<Vec<String>> {
        Ok(self.lines.clone())
    }

    fn describe(&self) -> String {
        format!("static ({} lines)", self.lines.len())
    }
}

/// A line that failed to parse
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedLine {
    /// 1-based
    pub line_number: usize,
    pub text: String,
    pub error: ParseError,
}

/// Parsed crontab: the jobs that loaded plus the lines that did not
#[derive(Debug, Clone, Default)]
pub struct Crontab {
    jobs: Vec<ScheduledJob>,
    rejected: Vec<RejectedLine>,
}

impl Crontab {
    /// Parse raw lines. Blank lines, `#` comments and `NAME=value`
    /// assignments are skipped. A bad line is logged and rejected without
    /// affecting the others.
    pub fn parse<S: AsRef<str>>(lines: &[S]) -> Self {
        let mut crontab = Self::default();

        for (idx, raw) in lines.iter().enumerate() {
            let line = raw.as_ref().trim();
            if line.is_empty() || line.starts_with('#') || is_env_assignment(line) {
                continue;
            }

            match ScheduledJob::from_line(line) {
                Ok(job) => crontab.jobs.push(job),
                Err(error) => {
                    tracing::warn!(line = idx + 1, text = line, "Rejected crontab line: {error}");
                    crontab.rejected.push(RejectedLine {
                        line_number: idx + 1,
                        text: line.to_string(),
                        error,
                    });
                }
            }
        }

        crontab
    }

    /// Read and parse from a source
    pub async fn load(source: &dyn CrontabSource) -> Result<Self> {
        let lines = source.read_lines().await?;
        let crontab = Self::parse(&lines);
        tracing::debug!(
            source = %source.describe(),
            jobs = crontab.jobs.len(),
            rejected = crontab.rejected.len(),
            "Crontab loaded"
        );
        Ok(crontab)
    }

    pub fn jobs(&self) -> &[ScheduledJob] {
        &self.jobs
    }

    pub fn rejected(&self) -> &[RejectedLine] {
        &self.rejected
    }
}

fn is_env_assignment(line: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*\s*=").unwrap())
        .is_match(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobRole;

    const SAMPLE: &str = "\
# m h dom mon dow command
SHELL=/bin/sh
MAILTO = ops@example.com

0 9 * * * app --name X start
0 17 * * * app --name X stop
*/5 * * * * backup.sh
70 * * * * app --name Y start
0 9 * *
";

    #[test]
    fn test_parse_skips_comments_blanks_and_env() {
        let crontab = Crontab::parse(&SAMPLE.lines().collect::<Vec<_>>());
        assert_eq!(crontab.jobs().len(), 3);
        assert_eq!(crontab.jobs()[0].role(), JobRole::Start);
        assert_eq!(crontab.jobs()[2].name(), None);
    }

    #[test]
    fn test_parse_rejects_bad_lines_only() {
        let crontab = Crontab::parse(&SAMPLE.lines().collect::<Vec<_>>());
        let rejected = crontab.rejected();
        assert_eq!(rejected.len(), 2);
        assert_eq!(rejected[0].line_number, 8);
        assert!(matches!(rejected[0].error, ParseError::EmptyField(_)));
        assert_eq!(rejected[1].line_number, 9);
        assert_eq!(rejected[1].error, ParseError::FieldCount(4));
    }

    #[test]
    fn test_env_assignment_detection() {
        assert!(is_env_assignment("PATH=/usr/bin"));
        assert!(is_env_assignment("CRON_TZ = UTC"));
        assert!(!is_env_assignment("*/5 * * * * env FOO=1 cmd"));
        assert!(!is_env_assignment("0 9 * * * app"));
    }

    #[tokio::test]
    async fn test_static_source() {
        let source = StaticCrontab::from_text(SAMPLE);
        let crontab = Crontab::load(&source).await.unwrap();
        assert_eq!(crontab.jobs().len(), 3);
        assert_eq!(source.describe(), "static (9 lines)");
    }

    #[tokio::test]
    async fn test_file_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crontab");
        std::fs::write(&path, SAMPLE).unwrap();

        let crontab = Crontab::load(&FileCrontab::new(&path)).await.unwrap();
        assert_eq!(crontab.jobs().len(), 3);
    }

    #[tokio::test]
    async fn test_file_source_missing() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileCrontab::new(dir.path().join("absent"));
        let err = Crontab::load(&source).await.unwrap_err();
        assert!(matches!(err, CrondogError::Crontab(_)));
    }
}
