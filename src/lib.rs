//! # crondog
//!
//! Crontab-driven service supervision.
//!
//! ## Overview
//!
//! Services are started and stopped by ordinary crontab entries whose
//! commands carry `--name <service>` plus the word `start` or `stop`.
//! `crondog` reads those entries, works out whether each service should be
//! running right now, probes whether it actually is, and tracks a small
//! state machine per service so that missed starts (`down`) and processes
//! that outlive their window (`undefined`) are reported.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use crondog::{Settings, StaticCrontab, ProcessTableProbe, Supervisor};
//!
//! # async fn example() -> crondog::Result<()> {
//! let crontab = StaticCrontab::new([
//!     "0 9 * * * /usr/bin/lux --name lux start",
//!     "0 17 * * * /usr/bin/lux --name lux stop",
//! ]);
//! let (mut sup, _events) = Supervisor::new(
//!     &Settings::default(),
//!     Arc::new(crontab),
//!     Arc::new(ProcessTableProbe::new()),
//! )?;
//!
//! for event in sup.tick().await {
//!     println!("{}: {}", event.service, event.current);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **CronExpression** - five-field schedule with next/last occurrence search
//! - **ScheduledJob** - one crontab line, classified as start or stop
//! - **ServiceSchedule** - a service's start and stop jobs; answers `should_run`
//! - **LivenessProbe** trait - "is it alive", via `ps` or PID files
//! - **next_state** - pure transition function over [`SupervisionState`]
//! - **Supervisor** - the polling loop tying them together

pub mod config;
pub mod crontab;
pub mod error;
pub mod job;
pub mod parser;
pub mod pidfile;
pub mod probe;
pub mod schedule;
pub mod shutdown;
pub mod state;
pub mod supervisor;

// Re-export core types
pub use config::{ClockKind, CrondogConfig, ProbeKind, ServiceDef, Settings};
pub use crontab::{Crontab, CrontabSource, FileCrontab, RejectedLine, StaticCrontab, SystemCrontab};
pub use error::{CrondogError, EvaluationError, ParseError, ProbeError, Result};
pub use job::{extract_service_name, JobRole, ScheduledJob};
pub use parser::{CronExpression, CronField};
pub use probe::{LivenessProbe, PidFileProbe, ProcessTableProbe};
pub use schedule::{group_services, ServiceSchedule};
pub use state::{next_state, Observation, SupervisionState, TransitionEvent};
pub use supervisor::Supervisor;
