//! Read-only projections over a [`RegistrySnapshot`] for view consumers.

use crate::registry::RegistrySnapshot;
use crate::MissionStatus;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
pub struct ViewCounters {
    pub total_missions: usize,
    pub running: usize,
    pub total_log_lines: usize,
    pub total_artifacts: usize,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LayoutMode {
    #[default]
    Center,
    Top,
}

impl LayoutMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LayoutMode::Center => "center",
            LayoutMode::Top => "top",
        }
    }
}

pub fn counters(snapshot: &RegistrySnapshot) -> ViewCounters {
    snapshot
        .list()
        .fold(ViewCounters::default(), |mut counters, mission| {
            counters.total_missions += 1;
            if mission.status == MissionStatus::Running {
                counters.running += 1;
            }
            counters.total_log_lines += mission.logs.len();
            counters.total_artifacts += mission.artifacts.len();
            counters
        })
}

/// `Top` as soon as any mission has ever been created in this session.
/// Mission status plays no part, so a failed first mission keeps `Top`.
pub fn layout_mode(snapshot: &RegistrySnapshot) -> LayoutMode {
    if snapshot.missions_created > 0 {
        LayoutMode::Top
    } else {
        LayoutMode::Center
    }
}

pub fn status_breakdown(snapshot: &RegistrySnapshot) -> BTreeMap<&'static str, usize> {
    let mut breakdown = BTreeMap::new();
    for mission in snapshot.list() {
        *breakdown.entry(mission.status.as_str()).or_insert(0) += 1;
    }
    breakdown
}
