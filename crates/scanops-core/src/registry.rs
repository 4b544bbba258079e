//! Mission registry: the single owner of mission state.
//!
//! Every mutation goes through [`MissionRegistry::apply`] (agent events) or
//! [`MissionRegistry::register`] (explicit submission). Each call runs to
//! completion, bumps the revision and only then hands subscribers a fresh
//! [`RegistrySnapshot`], so no observer ever sees a half-applied event.
//!
//! Missions are stored behind `Arc` and copied on write: a snapshot handed
//! out earlier keeps the values it was built from.

use crate::wire::{JobStatus, MissionEvent, PlanProposal, KIND_PLAN_PROPOSAL};
use crate::{JobState, Mission, MissionStatus, Plan, PLACEHOLDER_TITLE};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DIAGNOSTIC_CAPACITY: usize = 256;
const DIAGNOSTIC_PAYLOAD_CHARS: usize = 256;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    UnknownMissionReference,
    StaleTransition,
    StateConflict,
    UnrecognizedEvent,
}

impl DiagnosticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticKind::UnknownMissionReference => "unknown_mission_reference",
            DiagnosticKind::StaleTransition => "stale_transition",
            DiagnosticKind::StateConflict => "state_conflict",
            DiagnosticKind::UnrecognizedEvent => "unrecognized_event",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub mission_id: Option<String>,
    pub event_kind: String,
    pub detail: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Transition {
    pub from: MissionStatus,
    pub to: MissionStatus,
}

/// What a single `apply`/`register` did to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ApplyResult {
    pub mission_id: Option<String>,
    pub created: bool,
    pub title_adopted: bool,
    pub transition: Option<Transition>,
    pub plan_replaced: bool,
    pub log_appended: bool,
    pub artifacts_appended: usize,
    pub ignored: Option<DiagnosticKind>,
}

impl ApplyResult {
    fn for_mission(mission_id: &str, created: bool) -> Self {
        Self {
            mission_id: Some(mission_id.to_string()),
            created,
            ..Self::default()
        }
    }

    /// True when any mission record changed.
    pub fn mutated(&self) -> bool {
        self.created
            || self.title_adopted
            || self.transition.is_some()
            || self.plan_replaced
            || self.log_appended
            || self.artifacts_appended > 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistrySnapshot {
    pub revision: u64,
    pub missions_created: u64,
    pub missions: Vec<Arc<Mission>>,
}

impl RegistrySnapshot {
    pub fn get(&self, mission_id: &str) -> Option<&Mission> {
        self.missions
            .iter()
            .find(|mission| mission.id == mission_id)
            .map(|mission| mission.as_ref())
    }

    pub fn list(&self) -> impl ExactSizeIterator<Item = &Mission> {
        self.missions.iter().map(|mission| mission.as_ref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type SnapshotCallback = Box<dyn FnMut(&Arc<RegistrySnapshot>) + Send>;

struct Subscriber {
    id: SubscriptionId,
    callback: SnapshotCallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusStep {
    Move(MissionStatus),
    Stay,
    Conflict,
    Stale,
}

fn status_step(from: MissionStatus, reported: JobState) -> StatusStep {
    match (from, reported) {
        (MissionStatus::Success | MissionStatus::Failed, _) => StatusStep::Stale,
        (MissionStatus::Idle | MissionStatus::Planning, JobState::Running) => {
            StatusStep::Move(MissionStatus::Running)
        }
        (MissionStatus::Running, JobState::Running) => StatusStep::Stay,
        (MissionStatus::Running, JobState::Success) => StatusStep::Move(MissionStatus::Success),
        (_, JobState::Success) => StatusStep::Conflict,
        (_, JobState::Failed | JobState::Error) => StatusStep::Move(MissionStatus::Failed),
    }
}

#[derive(Default)]
pub struct MissionRegistry {
    missions: Vec<Arc<Mission>>,
    index: HashMap<String, usize>,
    missions_created: u64,
    revision: u64,
    diagnostics: VecDeque<Diagnostic>,
    subscribers: Vec<Subscriber>,
    next_subscription: u64,
    cached_snapshot: Option<Arc<RegistrySnapshot>>,
}

impl MissionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: MissionEvent) -> ApplyResult {
        self.apply_at(event, Utc::now())
    }

    /// Applies one event with an explicit clock reading for `start_time` /
    /// `end_time`.
    pub fn apply_at(&mut self, event: MissionEvent, now: DateTime<Utc>) -> ApplyResult {
        let result = match event {
            MissionEvent::PlanProposal(proposal) => self.reduce_plan(proposal, now),
            MissionEvent::JobStatus(status) => self.reduce_status(status, now),
            MissionEvent::Unrecognized { kind, payload } => {
                self.record(Diagnostic {
                    kind: DiagnosticKind::UnrecognizedEvent,
                    mission_id: None,
                    event_kind: kind,
                    detail: format!(
                        "no reducer for event kind; payload={}",
                        clip(&payload.to_string())
                    ),
                    at: now,
                });
                ApplyResult {
                    ignored: Some(DiagnosticKind::UnrecognizedEvent),
                    ..ApplyResult::default()
                }
            }
        };
        self.commit();
        result
    }

    pub fn register(&mut self, mission_id: &str, title: &str) -> ApplyResult {
        self.register_at(mission_id, title, Utc::now())
    }

    /// Explicit creation at submission time. An id that already exists keeps
    /// its status and history; only a placeholder title from auto-creation is
    /// replaced.
    pub fn register_at(
        &mut self,
        mission_id: &str,
        title: &str,
        now: DateTime<Utc>,
    ) -> ApplyResult {
        let result = match self.index.get(mission_id).copied() {
            Some(index) => {
                let mut result = ApplyResult::for_mission(mission_id, false);
                if self.missions[index].title == PLACEHOLDER_TITLE && !title.trim().is_empty() {
                    Arc::make_mut(&mut self.missions[index]).title = title.to_string();
                    result.title_adopted = true;
                }
                debug!(
                    "mission_register_existing: id={mission_id} title_adopted={}",
                    result.title_adopted
                );
                result
            }
            None => {
                let title = if title.trim().is_empty() {
                    PLACEHOLDER_TITLE
                } else {
                    title
                };
                self.insert_mission(Mission::new(mission_id, title, now));
                info!("mission_registered: id={mission_id}");
                ApplyResult::for_mission(mission_id, true)
            }
        };
        self.commit();
        result
    }

    pub fn get(&self, mission_id: &str) -> Option<&Mission> {
        self.index
            .get(mission_id)
            .map(|index| self.missions[*index].as_ref())
    }

    pub fn list(&self) -> impl ExactSizeIterator<Item = &Mission> {
        self.missions.iter().map(|mission| mission.as_ref())
    }

    pub fn len(&self) -> usize {
        self.missions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.missions.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn diagnostics(&self) -> impl ExactSizeIterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    pub fn snapshot(&mut self) -> Arc<RegistrySnapshot> {
        if let Some(snapshot) = &self.cached_snapshot {
            return Arc::clone(snapshot);
        }
        let snapshot = Arc::new(RegistrySnapshot {
            revision: self.revision,
            missions_created: self.missions_created,
            missions: self.missions.clone(),
        });
        self.cached_snapshot = Some(Arc::clone(&snapshot));
        snapshot
    }

    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: FnMut(&Arc<RegistrySnapshot>) + Send + 'static,
    {
        self.next_subscription += 1;
        let id = SubscriptionId(self.next_subscription);
        self.subscribers.push(Subscriber {
            id,
            callback: Box::new(callback),
        });
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|subscriber| subscriber.id != id);
        self.subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Ends the session: detaches every subscriber and discards all missions.
    pub fn teardown(&mut self) {
        let detached = self.subscribers.len();
        let missions = self.missions.len();
        *self = Self::default();
        info!("registry_teardown: missions={missions} subscribers_detached={detached}");
    }

    fn reduce_plan(&mut self, proposal: PlanProposal, now: DateTime<Utc>) -> ApplyResult {
        let PlanProposal {
            mission_id,
            thought_process,
            steps,
        } = proposal;
        let (index, created) = self.ensure_mission(&mission_id, KIND_PLAN_PROPOSAL, now);
        let mut result = ApplyResult::for_mission(&mission_id, created);

        let from = self.missions[index].status;
        if from.is_terminal() {
            self.record_stale(&mission_id, KIND_PLAN_PROPOSAL, from, now);
            result.ignored = Some(DiagnosticKind::StaleTransition);
            return result;
        }

        let mission = Arc::make_mut(&mut self.missions[index]);
        mission.plan = Some(Plan {
            thought_process,
            steps,
        });
        result.plan_replaced = true;
        // A plan arriving after `running` attaches without downgrading.
        if from == MissionStatus::Idle {
            mission.status = MissionStatus::Planning;
            result.transition = Some(Transition {
                from,
                to: MissionStatus::Planning,
            });
        }
        result
    }

    fn reduce_status(&mut self, status: JobStatus, now: DateTime<Utc>) -> ApplyResult {
        let event_kind = format!("{}({})", crate::wire::KIND_JOB_STATUS, status.status);
        let JobStatus {
            mission_id,
            status: reported,
            log_line,
            artifacts,
        } = status;
        let (index, created) = self.ensure_mission(&mission_id, &event_kind, now);
        let mut result = ApplyResult::for_mission(&mission_id, created);

        let from = self.missions[index].status;
        let step = status_step(from, reported);
        if step == StatusStep::Stale {
            self.record_stale(&mission_id, &event_kind, from, now);
            result.ignored = Some(DiagnosticKind::StaleTransition);
            return result;
        }

        let mission = Arc::make_mut(&mut self.missions[index]);
        if let Some(line) = log_line {
            mission.logs.push(line);
            result.log_appended = true;
        }
        result.artifacts_appended = artifacts.len();
        mission.artifacts.extend(artifacts);

        match step {
            StatusStep::Move(to) => {
                mission.status = to;
                if to.is_terminal() && mission.end_time.is_none() {
                    mission.end_time = Some(now);
                }
                result.transition = Some(Transition { from, to });
                debug!("mission_transition: id={mission_id} {from} -> {to}");
            }
            StatusStep::Stay | StatusStep::Stale => {}
            StatusStep::Conflict => {
                self.record(Diagnostic {
                    kind: DiagnosticKind::StateConflict,
                    mission_id: Some(mission_id.clone()),
                    event_kind,
                    detail: format!("no transition from {from} on reported {reported}"),
                    at: now,
                });
                result.ignored = Some(DiagnosticKind::StateConflict);
            }
        }
        result
    }

    fn ensure_mission(
        &mut self,
        mission_id: &str,
        event_kind: &str,
        now: DateTime<Utc>,
    ) -> (usize, bool) {
        if let Some(index) = self.index.get(mission_id) {
            return (*index, false);
        }
        let index = self.insert_mission(Mission::new(mission_id, PLACEHOLDER_TITLE, now));
        self.record(Diagnostic {
            kind: DiagnosticKind::UnknownMissionReference,
            mission_id: Some(mission_id.to_string()),
            event_kind: event_kind.to_string(),
            detail: "auto-created idle mission".to_string(),
            at: now,
        });
        (index, true)
    }

    fn insert_mission(&mut self, mission: Mission) -> usize {
        let index = self.missions.len();
        self.index.insert(mission.id.clone(), index);
        self.missions.push(Arc::new(mission));
        self.missions_created += 1;
        index
    }

    fn record_stale(
        &mut self,
        mission_id: &str,
        event_kind: &str,
        status: MissionStatus,
        now: DateTime<Utc>,
    ) {
        self.record(Diagnostic {
            kind: DiagnosticKind::StaleTransition,
            mission_id: Some(mission_id.to_string()),
            event_kind: event_kind.to_string(),
            detail: format!("mission already {status}"),
            at: now,
        });
    }

    fn record(&mut self, diagnostic: Diagnostic) {
        let mission_id = diagnostic.mission_id.as_deref().unwrap_or("-");
        match diagnostic.kind {
            DiagnosticKind::StateConflict => warn!(
                "registry_{}: mission={mission_id} event={} {}",
                diagnostic.kind.as_str(),
                diagnostic.event_kind,
                diagnostic.detail
            ),
            DiagnosticKind::StaleTransition => info!(
                "registry_{}: mission={mission_id} event={} {}",
                diagnostic.kind.as_str(),
                diagnostic.event_kind,
                diagnostic.detail
            ),
            DiagnosticKind::UnknownMissionReference | DiagnosticKind::UnrecognizedEvent => debug!(
                "registry_{}: mission={mission_id} event={} {}",
                diagnostic.kind.as_str(),
                diagnostic.event_kind,
                diagnostic.detail
            ),
        }
        if self.diagnostics.len() == DIAGNOSTIC_CAPACITY {
            self.diagnostics.pop_front();
        }
        self.diagnostics.push_back(diagnostic);
    }

    fn commit(&mut self) {
        self.revision += 1;
        self.cached_snapshot = None;
        if self.subscribers.is_empty() {
            return;
        }
        let snapshot = self.snapshot();
        for subscriber in &mut self.subscribers {
            (subscriber.callback)(&snapshot);
        }
    }
}

fn clip(rendered: &str) -> String {
    if rendered.chars().count() <= DIAGNOSTIC_PAYLOAD_CHARS {
        return rendered.to_string();
    }
    let mut clipped: String = rendered.chars().take(DIAGNOSTIC_PAYLOAD_CHARS).collect();
    clipped.push_str("...");
    clipped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::KIND_JOB_STATUS;
    use chrono::TimeZone;
    use std::sync::Mutex;

    fn ts(offset_secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_770_000_000 + offset_secs, 0)
            .single()
            .expect("valid timestamp")
    }

    fn job(mission_id: &str, status: JobState, log: Option<&str>) -> MissionEvent {
        MissionEvent::JobStatus(JobStatus {
            mission_id: mission_id.to_string(),
            status,
            log_line: log.map(str::to_string),
            artifacts: Vec::new(),
        })
    }

    fn plan(mission_id: &str, thought: &str, steps: &[&str]) -> MissionEvent {
        MissionEvent::PlanProposal(PlanProposal {
            mission_id: mission_id.to_string(),
            thought_process: thought.to_string(),
            steps: steps.iter().map(|step| step.to_string()).collect(),
        })
    }

    #[test]
    fn status_table_covers_every_pair() {
        use JobState::{Error, Failed, Running, Success};
        use MissionStatus as S;

        let rows = [
            (S::Idle, Running, StatusStep::Move(S::Running)),
            (S::Idle, Success, StatusStep::Conflict),
            (S::Idle, Failed, StatusStep::Move(S::Failed)),
            (S::Idle, Error, StatusStep::Move(S::Failed)),
            (S::Planning, Running, StatusStep::Move(S::Running)),
            (S::Planning, Success, StatusStep::Conflict),
            (S::Planning, Failed, StatusStep::Move(S::Failed)),
            (S::Planning, Error, StatusStep::Move(S::Failed)),
            (S::Running, Running, StatusStep::Stay),
            (S::Running, Success, StatusStep::Move(S::Success)),
            (S::Running, Failed, StatusStep::Move(S::Failed)),
            (S::Running, Error, StatusStep::Move(S::Failed)),
        ];
        for (from, reported, expected) in rows {
            assert_eq!(status_step(from, reported), expected, "{from} on {reported}");
        }
        for from in [S::Success, S::Failed] {
            for reported in [Running, Success, Failed, Error] {
                assert_eq!(status_step(from, reported), StatusStep::Stale, "{from} on {reported}");
            }
        }
    }

    #[test]
    fn register_creates_idle_mission_with_title() {
        let mut registry = MissionRegistry::new();
        let result = registry.register_at("m-1", "external perimeter", ts(0));
        assert!(result.created);

        let mission = registry.get("m-1").expect("mission");
        assert_eq!(mission.title, "external perimeter");
        assert_eq!(mission.status, MissionStatus::Idle);
        assert_eq!(mission.start_time, ts(0));
        assert!(registry.diagnostics().next().is_none());
    }

    #[test]
    fn register_after_auto_creation_adopts_title_only() {
        let mut registry = MissionRegistry::new();
        registry.apply_at(job("m-1", JobState::Running, Some("boot")), ts(0));
        let result = registry.register_at("m-1", "internal sweep", ts(5));

        assert!(!result.created);
        assert!(result.title_adopted);
        let mission = registry.get("m-1").expect("mission");
        assert_eq!(mission.title, "internal sweep");
        assert_eq!(mission.status, MissionStatus::Running);
        assert_eq!(mission.start_time, ts(0));

        let again = registry.register_at("m-1", "renamed", ts(6));
        assert!(!again.mutated());
        assert_eq!(registry.get("m-1").expect("mission").title, "internal sweep");
    }

    #[test]
    fn auto_creation_records_unknown_reference() {
        let mut registry = MissionRegistry::new();
        let result = registry.apply_at(plan("m-9", "recon", &["whois"]), ts(0));
        assert!(result.created);
        assert_eq!(
            registry.get("m-9").map(|mission| mission.title.as_str()),
            Some(PLACEHOLDER_TITLE)
        );
        let kinds: Vec<_> = registry.diagnostics().map(|diag| diag.kind).collect();
        assert_eq!(kinds, vec![DiagnosticKind::UnknownMissionReference]);
    }

    #[test]
    fn repeated_running_reports_append_logs_without_diagnostics() {
        let mut registry = MissionRegistry::new();
        registry.register_at("m-1", "sweep", ts(0));
        registry.apply_at(job("m-1", JobState::Running, Some("port 22 open")), ts(1));
        let result = registry.apply_at(job("m-1", JobState::Running, Some("port 80 open")), ts(2));

        assert_eq!(result.transition, None);
        assert!(result.log_appended);
        assert_eq!(result.ignored, None);
        assert_eq!(
            registry.get("m-1").expect("mission").logs,
            vec!["port 22 open", "port 80 open"]
        );
        assert_eq!(registry.diagnostics().len(), 0);
    }

    #[test]
    fn success_before_running_is_a_conflict_but_keeps_the_log() {
        let mut registry = MissionRegistry::new();
        registry.register_at("m-1", "sweep", ts(0));
        let result = registry.apply_at(job("m-1", JobState::Success, Some("done early")), ts(1));

        assert_eq!(result.ignored, Some(DiagnosticKind::StateConflict));
        assert!(result.log_appended);
        let mission = registry.get("m-1").expect("mission");
        assert_eq!(mission.status, MissionStatus::Idle);
        assert_eq!(mission.end_time, None);
        assert_eq!(mission.logs, vec!["done early"]);
        let last = registry.diagnostics().last().expect("diagnostic");
        assert_eq!(last.kind, DiagnosticKind::StateConflict);
        assert!(last.event_kind.starts_with(KIND_JOB_STATUS));
    }

    #[test]
    fn error_report_fails_any_live_mission() {
        for prelude in [None, Some(JobState::Running)] {
            let mut registry = MissionRegistry::new();
            registry.apply_at(plan("m-1", "t", &[]), ts(0));
            if let Some(state) = prelude {
                registry.apply_at(job("m-1", state, None), ts(1));
            }
            let result =
                registry.apply_at(job("m-1", JobState::Error, Some("agent crashed")), ts(2));
            assert_eq!(result.transition.map(|t| t.to), Some(MissionStatus::Failed));
            assert_eq!(registry.get("m-1").expect("mission").end_time, Some(ts(2)));
        }
    }

    #[test]
    fn artifacts_append_in_order_and_stop_at_terminal() {
        let mut registry = MissionRegistry::new();
        let with_artifacts = |status, refs: &[&str]| {
            MissionEvent::JobStatus(JobStatus {
                mission_id: "m-1".to_string(),
                status,
                log_line: None,
                artifacts: refs.iter().map(|item| item.to_string()).collect(),
            })
        };
        registry.apply_at(with_artifacts(JobState::Running, &["nmap.xml"]), ts(0));
        registry.apply_at(with_artifacts(JobState::Success, &["report.pdf", "hosts.csv"]), ts(1));
        let stale = registry.apply_at(with_artifacts(JobState::Running, &["late.txt"]), ts(2));

        assert_eq!(stale.artifacts_appended, 0);
        assert_eq!(
            registry.get("m-1").expect("mission").artifacts,
            vec!["nmap.xml", "report.pdf", "hosts.csv"]
        );
    }

    #[test]
    fn unrecognized_events_only_leave_a_diagnostic() {
        let mut registry = MissionRegistry::new();
        let result = registry.apply_at(
            MissionEvent::Unrecognized {
                kind: "server:telemetry".to_string(),
                payload: serde_json::json!({"cpu": 0.4}),
            },
            ts(0),
        );
        assert!(!result.mutated());
        assert_eq!(result.ignored, Some(DiagnosticKind::UnrecognizedEvent));
        assert!(registry.is_empty());
        assert_eq!(registry.revision(), 1);
        let diagnostic = registry.diagnostics().last().expect("diagnostic");
        assert_eq!(diagnostic.event_kind, "server:telemetry");
        assert!(diagnostic.detail.contains(r#"{"cpu":0.4}"#));
    }

    #[test]
    fn large_unrecognized_payloads_are_clipped_in_diagnostics() {
        let mut registry = MissionRegistry::new();
        registry.apply_at(
            MissionEvent::Unrecognized {
                kind: "server:dump".to_string(),
                payload: serde_json::json!({ "blob": "z".repeat(4096) }),
            },
            ts(0),
        );
        let detail = &registry.diagnostics().last().expect("diagnostic").detail;
        assert!(detail.ends_with("..."));
        assert!(detail.len() < 400);
    }

    #[test]
    fn subscribers_get_one_snapshot_per_commit_until_unsubscribed() {
        let mut registry = MissionRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = registry.subscribe(move |snapshot| {
            sink.lock().expect("lock").push((snapshot.revision, snapshot.missions.len()));
        });

        registry.register_at("m-1", "a", ts(0));
        registry.apply_at(job("m-2", JobState::Running, None), ts(1));
        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
        registry.apply_at(job("m-2", JobState::Success, None), ts(2));

        assert_eq!(*seen.lock().expect("lock"), vec![(1, 1), (2, 2)]);
    }

    #[test]
    fn snapshots_are_unaffected_by_later_commits() {
        let mut registry = MissionRegistry::new();
        registry.apply_at(job("m-1", JobState::Running, Some("one")), ts(0));
        let before = registry.snapshot();
        registry.apply_at(job("m-1", JobState::Running, Some("two")), ts(1));
        let after = registry.snapshot();

        assert_eq!(before.get("m-1").expect("mission").logs, vec!["one"]);
        assert_eq!(after.get("m-1").expect("mission").logs, vec!["one", "two"]);
        assert!(after.revision > before.revision);
    }

    #[test]
    fn diagnostics_are_bounded() {
        let mut registry = MissionRegistry::new();
        registry.apply_at(job("m-1", JobState::Failed, None), ts(0));
        for offset in 0..(DIAGNOSTIC_CAPACITY as i64 + 10) {
            registry.apply_at(job("m-1", JobState::Running, None), ts(offset));
        }
        assert_eq!(registry.diagnostics().len(), DIAGNOSTIC_CAPACITY);
        assert!(registry
            .diagnostics()
            .all(|diag| diag.kind == DiagnosticKind::StaleTransition));
    }

    #[test]
    fn teardown_detaches_subscribers_and_forgets_missions() {
        let mut registry = MissionRegistry::new();
        let calls = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&calls);
        registry.subscribe(move |_| *counter.lock().expect("lock") += 1);
        registry.register_at("m-1", "a", ts(0));
        registry.teardown();

        assert_eq!(registry.subscriber_count(), 0);
        assert!(registry.get("m-1").is_none());
        registry.register_at("m-2", "b", ts(1));
        assert_eq!(*calls.lock().expect("lock"), 1);
        assert_eq!(registry.snapshot().missions_created, 1);
    }
}
