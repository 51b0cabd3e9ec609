//! Supervisor loop
//!
//! Every tick re-reads the crontab, recomputes each tracked service's
//! [`Observation`] from scratch, and advances its state. The only thing
//! carried between ticks is the state itself.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use indexmap::IndexMap;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::{ClockKind, CrondogConfig, Settings};
use crate::crontab::{Crontab, CrontabSource};
use crate::error::{CrondogError, EvaluationError, Result};
use crate::probe::{build_probe, probe_with_timeout, LivenessProbe};
use crate::schedule::{group_services, ServiceSchedule};
use crate::state::{Observation, SupervisionState, TransitionEvent};

pub struct Supervisor {
    source: Arc<dyn CrontabSource>,
    default_probe: Arc<dyn LivenessProbe>,
    probes: HashMap<String, Arc<dyn LivenessProbe>>,
    states: IndexMap<String, SupervisionState>,
    /// Services that have had at least one clean evaluation
    evaluated: HashSet<String>,
    /// Pick up every named service found in the crontab
    discover: bool,
    poll_interval: Duration,
    probe_timeout: Duration,
    grace_period: chrono::Duration,
    lookback: chrono::Duration,
    clock: ClockKind,
    events: broadcast::Sender<TransitionEvent>,
}

impl Supervisor {
    pub fn new(
        settings: &Settings,
        source: Arc<dyn CrontabSource>,
        probe: Arc<dyn LivenessProbe>,
    ) -> Result<(Self, broadcast::Receiver<TransitionEvent>)> {
        settings.validate()?;
        let to_chrono = |d: Duration, what: &str| {
            chrono::Duration::from_std(d)
                .map_err(|_| CrondogError::Config(format!("{what} is out of range")))
        };
        let (events, rx) = broadcast::channel(1024);

        Ok((
            Self {
                source,
                default_probe: probe,
                probes: HashMap::new(),
                states: IndexMap::new(),
                evaluated: HashSet::new(),
                discover: true,
                poll_interval: settings.poll_interval,
                probe_timeout: settings.probe_timeout,
                grace_period: to_chrono(settings.grace_period, "grace_period")?,
                lookback: to_chrono(settings.lookback, "lookback")?,
                clock: settings.clock,
                events,
            },
            rx,
        ))
    }

    /// Build from configuration. `only` (from the command line) wins over
    /// the config's `service` blocks; with neither, services are discovered
    /// from the crontab.
    pub fn from_config(
        cfg: &CrondogConfig,
        crontab_override: Option<&Path>,
        only: &[String],
    ) -> Result<(Self, broadcast::Receiver<TransitionEvent>)> {
        let settings = &cfg.supervisor;
        let working_dir = settings.working_dir();
        let source = settings.crontab_source(crontab_override);
        let probe = build_probe(settings.probe, &working_dir);
        let (mut sup, rx) = Self::new(settings, source, probe)?;

        for name in cfg.service.keys() {
            let kind = cfg.probe_for(name);
            if kind != settings.probe {
                sup = sup.with_probe(name.clone(), build_probe(kind, &working_dir));
            }
        }

        if !only.is_empty() {
            sup = sup.track(only.iter().cloned());
        } else if !cfg.service.is_empty() {
            sup = sup.track(cfg.service.keys().cloned());
        }

        Ok((sup, rx))
    }

    /// Use `probe` for `service` instead of the default
    pub fn with_probe(mut self, service: impl Into<String>, probe: Arc<dyn LivenessProbe>) -> Self {
        self.probes.insert(service.into(), probe);
        self
    }

    /// Supervise exactly these services. Each starts out `Undefined`, even
    /// if the crontab never mentions it.
    pub fn track<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.discover = false;
        self.states = services
            .into_iter()
            .map(|s| (s.into(), SupervisionState::Undefined))
            .collect();
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransitionEvent> {
        self.events.subscribe()
    }

    pub fn state(&self, service: &str) -> Option<SupervisionState> {
        self.states.get(service).copied()
    }

    pub fn states(&self) -> &IndexMap<String, SupervisionState> {
        &self.states
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// One tick at the configured clock's current time
    pub async fn tick(&mut self) -> Vec<TransitionEvent> {
        let now = self.clock.now();
        self.tick_at(now).await
    }

    /// Evaluate every tracked service as of `now`. Returns one event per
    /// service that evaluated cleanly; a service whose evaluation fails
    /// keeps its state and is retried next tick.
    pub async fn tick_at(&mut self, now: NaiveDateTime) -> Vec<TransitionEvent> {
        let crontab = match Crontab::load(self.source.as_ref()).await {
            Ok(crontab) => crontab,
            Err(e) => {
                tracing::warn!(source = %self.source.describe(), "Skipping tick: {e}");
                return Vec::new();
            }
        };
        let mut schedules = group_services(crontab.jobs());

        if self.discover {
            for name in schedules.keys() {
                if !self.states.contains_key(name) {
                    tracing::info!(service = %name, "Tracking service");
                    self.states
                        .insert(name.clone(), SupervisionState::Undefined);
                }
            }
        }

        let names: Vec<String> = self.states.keys().cloned().collect();
        let mut events = Vec::with_capacity(names.len());

        for name in names {
            let previous = self.state(&name).unwrap_or_default();
            let schedule = schedules
                .swap_remove(&name)
                .unwrap_or_else(|| ServiceSchedule::new(name.as_str()))
                .with_lookback(self.lookback);

            let obs = match self.observe(&schedule, now).await {
                Ok(obs) => obs,
                Err(e) => {
                    tracing::warn!(
                        service = %name,
                        state = %previous,
                        "Evaluation failed, keeping state: {e}"
                    );
                    continue;
                }
            };

            let mut event = TransitionEvent::new(name.as_str(), previous, obs, now);
            if self.evaluated.insert(name.clone()) {
                event = event.first_evaluation();
            }
            event.log();
            self.states.insert(name, event.current);
            // No subscribers is fine
            let _ = self.events.send(event.clone());
            events.push(event);
        }

        events
    }

    async fn observe(
        &self,
        schedule: &ServiceSchedule,
        now: NaiveDateTime,
    ) -> std::result::Result<Observation, EvaluationError> {
        let should_run = schedule.should_run(now)?;
        let is_starting = schedule.is_starting(now, self.grace_period)?;

        let probe = self
            .probes
            .get(schedule.name())
            .unwrap_or(&self.default_probe);
        let is_running =
            probe_with_timeout(probe.as_ref(), schedule.name(), self.probe_timeout).await;

        Ok(Observation::new(should_run, is_running, is_starting))
    }

    /// Tick every `poll_interval` until `shutdown` resolves. A tick that has
    /// begun always finishes first.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(
            source = %self.source.describe(),
            interval = ?self.poll_interval,
            "Supervisor started"
        );

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        tracing::info!("Supervisor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crontab::StaticCrontab;
    use crate::error::ProbeError;
    use async_trait::async_trait;
    use chrono::NaiveDate;

    struct Fixed(bool);

    #[async_trait]
    impl LivenessProbe for Fixed {
        async fn is_alive(&self, _service: &str) -> std::result::Result<bool, ProbeError> {
            Ok(self.0)
        }
    }

    fn at(h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 15)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    fn supervisor(lines: &[&str], alive: bool) -> Supervisor {
        let source = Arc::new(StaticCrontab::new(lines.iter().copied()));
        let (sup, _) = Supervisor::new(&Settings::default(), source, Arc::new(Fixed(alive))).unwrap();
        sup
    }

    const WINDOW: [&str; 2] = [
        "0 9 * * * app --name X start",
        "0 17 * * * app --name X stop",
    ];

    #[tokio::test]
    async fn test_discovers_services() {
        let mut sup = supervisor(&WINDOW, true);
        assert!(sup.states().is_empty());

        let events = sup.tick_at(at(10, 0)).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].previous, SupervisionState::Undefined);
        assert_eq!(sup.state("X"), Some(SupervisionState::Running));
    }

    #[tokio::test]
    async fn test_tracked_service_missing_from_crontab_keeps_state() {
        let mut sup = supervisor(&WINDOW, true).track(["X", "ghost"]);
        let events = sup.tick_at(at(10, 0)).await;
        assert_eq!(events.len(), 1);
        assert_eq!(sup.state("ghost"), Some(SupervisionState::Undefined));
        assert_eq!(sup.state("X"), Some(SupervisionState::Running));
    }

    #[tokio::test]
    async fn test_track_ignores_other_services() {
        let mut lines = WINDOW.to_vec();
        lines.push("0 8 * * * app --name Y start");
        lines.push("0 9 * * * app --name Y stop");
        let mut sup = supervisor(&lines, false).track(["Y"]);
        sup.tick_at(at(10, 0)).await;
        assert_eq!(sup.state("X"), None);
        assert_eq!(sup.state("Y"), Some(SupervisionState::Stopped));
    }

    #[tokio::test]
    async fn test_per_service_probe_override() {
        let mut sup = supervisor(&WINDOW, false).with_probe("X", Arc::new(Fixed(true)));
        sup.tick_at(at(10, 0)).await;
        assert_eq!(sup.state("X"), Some(SupervisionState::Running));
    }

    #[test]
    fn test_new_rejects_invalid_settings() {
        let source = Arc::new(StaticCrontab::new(WINDOW));
        let settings = Settings {
            poll_interval: Duration::ZERO,
            ..Settings::default()
        };
        let err = Supervisor::new(&settings, source, Arc::new(Fixed(true))).err();
        assert!(matches!(err, Some(CrondogError::Config(_))));
    }

    #[tokio::test]
    async fn test_only_first_evaluation_is_initial() {
        let mut sup = supervisor(&WINDOW, true);
        let first = sup.tick_at(at(18, 30)).await;
        assert!(first[0].initial);
        assert!(first[0].is_alert());

        let second = sup.tick_at(at(18, 35)).await;
        assert!(!second[0].initial);
        assert!(!second[0].is_alert());
    }

    #[tokio::test]
    async fn test_events_are_broadcast() {
        let mut sup = supervisor(&WINDOW, false);
        let mut rx = sup.subscribe();
        sup.tick_at(at(18, 0)).await;
        let event = rx.try_recv().unwrap();
        assert_eq!(event.service, "X");
        assert_eq!(event.current, SupervisionState::Stopped);
    }
}
