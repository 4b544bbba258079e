pub mod registry;
pub mod view;
pub mod wire;

pub use registry::{
    ApplyResult, Diagnostic, DiagnosticKind, MissionRegistry, RegistrySnapshot, SubscriptionId,
    Transition,
};
pub use view::{counters, layout_mode, LayoutMode, ViewCounters};
pub use wire::{normalize, normalize_with_limit, MissionEvent, ParseError, DEFAULT_MAX_FRAME_BYTES};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const PLACEHOLDER_TITLE: &str = "(untitled mission)";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Mission {
    pub id: String,
    pub title: String,
    pub status: MissionStatus,
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default)]
    pub plan: Option<Plan>,
    #[serde(default)]
    pub artifacts: Vec<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

impl Mission {
    pub fn new(id: impl Into<String>, title: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            status: MissionStatus::Idle,
            logs: Vec::new(),
            plan: None,
            artifacts: Vec::new(),
            start_time,
            end_time: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Plans are replaced as a whole; fields are never merged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Plan {
    pub thought_process: String,
    #[serde(default)]
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum MissionStatus {
    #[default]
    Idle,
    Planning,
    Running,
    Success,
    Failed,
}

impl MissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissionStatus::Idle => "idle",
            MissionStatus::Planning => "planning",
            MissionStatus::Running => "running",
            MissionStatus::Success => "success",
            MissionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MissionStatus::Success | MissionStatus::Failed)
    }
}

impl fmt::Display for MissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MissionStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "idle" => Ok(MissionStatus::Idle),
            "planning" => Ok(MissionStatus::Planning),
            "running" => Ok(MissionStatus::Running),
            "success" | "succeeded" => Ok(MissionStatus::Success),
            "failed" => Ok(MissionStatus::Failed),
            other => Err(format!("Unknown mission status: {other}")),
        }
    }
}

/// Status values the agent reports in `server:job_status`. `Error` is a
/// report, not a mission status: it drives any live mission to `failed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Running,
    Success,
    Failed,
    Error,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Running => "running",
            JobState::Success => "success",
            JobState::Failed => "failed",
            JobState::Error => "error",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
