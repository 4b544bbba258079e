//! One operator session: link, normalizer and registry wired together.
//!
//! `init` builds the registry and seeds missions the submission service
//! already started, `run` pumps frames until shutdown or until the link gives
//! up, and `teardown` closes the link before discarding the registry.

use crate::config::{Config, EmitMode};
use scanops_core::{
    counters, layout_mode, normalize_with_limit, ApplyResult, MissionRegistry, RegistrySnapshot,
};
use scanops_link::{ConnectionManager, LinkError, RawFrame};
use serde::Serialize;
use std::{future::Future, sync::Arc};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub frames: u64,
    pub parse_errors: u64,
    pub applied: u64,
    pub ignored: u64,
}

pub struct ConsoleSession {
    session_id: String,
    registry: MissionRegistry,
    link: ConnectionManager,
    max_frame_bytes: usize,
    stats: SessionStats,
}

impl ConsoleSession {
    pub fn init(config: &Config) -> Self {
        let mut registry = MissionRegistry::new();
        let emit = config.emit;
        if emit != EmitMode::None {
            registry.subscribe(move |snapshot| {
                if let Some(line) = render_snapshot_line(emit, snapshot) {
                    println!("{line}");
                }
            });
        }
        for seed in &config.missions {
            registry.register(&seed.id, &seed.title);
        }
        info!(
            "session_init: session={} agent={} seeded_missions={}",
            config.session_id,
            config.agent_url,
            config.missions.len()
        );
        Self {
            session_id: config.session_id.clone(),
            registry,
            link: ConnectionManager::new(config.link_config()),
            max_frame_bytes: config.max_frame_bytes,
            stats: SessionStats::default(),
        }
    }

    pub fn registry(&self) -> &MissionRegistry {
        &self.registry
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Normalizes and applies one inbound frame. Malformed frames are logged
    /// and dropped; they never stop the session.
    pub fn handle_frame(&mut self, frame: &RawFrame) -> Option<ApplyResult> {
        self.stats.frames += 1;
        let event = match normalize_with_limit(&frame.text, self.max_frame_bytes) {
            Ok(event) => event,
            Err(err) => {
                self.stats.parse_errors += 1;
                warn!("frame_parse_error: connection={} {err}", frame.connection);
                return None;
            }
        };
        let result = self.registry.apply(event);
        if result.ignored.is_some() {
            self.stats.ignored += 1;
        }
        if result.mutated() {
            self.stats.applied += 1;
        }
        debug!(
            "frame_applied: mission={} transition={:?} ignored={:?}",
            result.mission_id.as_deref().unwrap_or("-"),
            result.transition,
            result.ignored
        );
        Some(result)
    }

    pub async fn run<F>(&mut self, shutdown: F) -> Result<(), LinkError>
    where
        F: Future<Output = ()>,
    {
        let mut frames = self.link.connect()?;
        let mut link_state = self.link.state();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("session_shutdown_requested: session={}", self.session_id);
                    break;
                }
                frame = frames.recv() => match frame {
                    Some(frame) => {
                        self.handle_frame(&frame);
                    }
                    None => {
                        warn!("session_link_ended: session={}", self.session_id);
                        break;
                    }
                },
                changed = link_state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *link_state.borrow_and_update();
                    info!("link_state: {state}");
                }
            }
        }
        Ok(())
    }

    /// Closes the link (cancelling any reconnect backoff), then detaches all
    /// subscribers and drops every mission.
    pub async fn teardown(mut self) -> SessionStats {
        self.link.close().await;
        self.registry.teardown();
        info!(
            "session_teardown: session={} frames={} parse_errors={} applied={} ignored={}",
            self.session_id,
            self.stats.frames,
            self.stats.parse_errors,
            self.stats.applied,
            self.stats.ignored
        );
        self.stats
    }
}

#[derive(Serialize)]
struct SnapshotLine<'a> {
    revision: u64,
    layout: &'static str,
    counters: scanops_core::ViewCounters,
    missions: &'a [Arc<scanops_core::Mission>],
}

pub fn render_snapshot_line(mode: EmitMode, snapshot: &RegistrySnapshot) -> Option<String> {
    let totals = counters(snapshot);
    let layout = layout_mode(snapshot);
    match mode {
        EmitMode::None => None,
        EmitMode::Summary => Some(format!(
            "rev={} layout={} missions={} running={} logs={} artifacts={}",
            snapshot.revision,
            layout.as_str(),
            totals.total_missions,
            totals.running,
            totals.total_log_lines,
            totals.total_artifacts
        )),
        EmitMode::Json => {
            let line = SnapshotLine {
                revision: snapshot.revision,
                layout: layout.as_str(),
                counters: totals,
                missions: &snapshot.missions,
            };
            match serde_json::to_string(&line) {
                Ok(json) => Some(json),
                Err(err) => {
                    warn!("snapshot_encode_error: {err}");
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MissionSeed;
    use chrono::Utc;
    use scanops_core::MissionStatus;
    use std::time::Duration;
    use url::Url;

    fn test_config() -> Config {
        Config {
            session_id: "session-test".to_string(),
            agent_url: Url::parse("ws://127.0.0.1:9/ws").expect("url"),
            log_dir: String::new(),
            log_stderr: false,
            emit: EmitMode::None,
            hello: None,
            backoff_initial: Duration::from_millis(10),
            backoff_max: Duration::from_millis(20),
            max_frame_bytes: 512,
            missions: vec![MissionSeed {
                id: "m-1".to_string(),
                title: "edge routers".to_string(),
            }],
        }
    }

    fn frame(text: &str) -> RawFrame {
        RawFrame {
            text: text.to_string(),
            received_at: Utc::now(),
            connection: 1,
        }
    }

    #[test]
    fn init_seeds_submitted_missions() {
        let session = ConsoleSession::init(&test_config());
        let mission = session.registry().get("m-1").expect("seeded mission");
        assert_eq!(mission.title, "edge routers");
        assert_eq!(mission.status, MissionStatus::Idle);
    }

    #[test]
    fn malformed_frames_are_counted_and_skipped() {
        let mut session = ConsoleSession::init(&test_config());
        assert!(session.handle_frame(&frame("{oops")).is_none());
        assert!(session.handle_frame(&frame(&"x".repeat(600))).is_none());
        let applied = session
            .handle_frame(&frame(
                r#"{"kind":"server:job_status","mission_id":"m-1","status":"running","log":"go"}"#,
            ))
            .expect("applied");

        assert!(applied.transition.is_some());
        assert_eq!(
            session.stats(),
            SessionStats {
                frames: 3,
                parse_errors: 2,
                applied: 1,
                ignored: 0,
            }
        );
        assert_eq!(
            session.registry().get("m-1").map(|mission| mission.status),
            Some(MissionStatus::Running)
        );
    }

    #[test]
    fn stale_frames_count_as_ignored() {
        let mut session = ConsoleSession::init(&test_config());
        for text in [
            r#"{"kind":"server:job_status","mission_id":"m-1","status":"error"}"#,
            r#"{"kind":"server:job_status","mission_id":"m-1","status":"running"}"#,
        ] {
            session.handle_frame(&frame(text));
        }
        assert_eq!(session.stats().ignored, 1);
        assert_eq!(
            session.registry().get("m-1").map(|mission| mission.status),
            Some(MissionStatus::Failed)
        );
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_and_teardown_clears_state() {
        let mut session = ConsoleSession::init(&test_config());
        session.run(async {}).await.expect("run");
        let stats = session.teardown().await;
        assert_eq!(stats, SessionStats::default());
    }

    #[test]
    fn summary_and_json_lines_reflect_snapshot() {
        let mut registry = MissionRegistry::new();
        let empty = registry.snapshot();
        assert_eq!(
            render_snapshot_line(EmitMode::Summary, &empty).as_deref(),
            Some("rev=0 layout=center missions=0 running=0 logs=0 artifacts=0")
        );

        registry.register("m-1", "edge routers");
        let snapshot = registry.snapshot();
        let json = render_snapshot_line(EmitMode::Json, &snapshot).expect("json line");
        let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
        assert_eq!(value["layout"], "top");
        assert_eq!(value["counters"]["total_missions"], 1);
        assert_eq!(value["missions"][0]["id"], "m-1");
        assert!(render_snapshot_line(EmitMode::None, &snapshot).is_none());
    }
}
