//! Inbound agent frames and their normalization into [`MissionEvent`]s.
//!
//! Frames are JSON objects discriminated by a `kind` tag. Only the two
//! mission-progress kinds are decoded; every other tag is kept verbatim as
//! [`MissionEvent::Unrecognized`] so new agent messages show up in
//! diagnostics without a protocol change.

use crate::JobState;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024;
pub const KIND_PLAN_PROPOSAL: &str = "server:plan_proposal";
pub const KIND_JOB_STATUS: &str = "server:job_status";

#[derive(Debug, Clone, PartialEq)]
pub enum MissionEvent {
    PlanProposal(PlanProposal),
    JobStatus(JobStatus),
    Unrecognized { kind: String, payload: Value },
}

impl MissionEvent {
    pub fn kind(&self) -> &str {
        match self {
            MissionEvent::PlanProposal(_) => KIND_PLAN_PROPOSAL,
            MissionEvent::JobStatus(_) => KIND_JOB_STATUS,
            MissionEvent::Unrecognized { kind, .. } => kind,
        }
    }

    pub fn mission_id(&self) -> Option<&str> {
        match self {
            MissionEvent::PlanProposal(proposal) => Some(&proposal.mission_id),
            MissionEvent::JobStatus(status) => Some(&status.mission_id),
            MissionEvent::Unrecognized { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PlanProposal {
    pub mission_id: String,
    pub thought_process: String,
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct JobStatus {
    pub mission_id: String,
    pub status: JobState,
    pub log_line: Option<String>,
    pub artifacts: Vec<String>,
}

// Older agents key proposals by `plan_id`; a non-empty `mission_id` wins when
// both are sent.
#[derive(Debug, Deserialize)]
struct PlanProposalFrame {
    #[serde(default)]
    mission_id: Option<String>,
    #[serde(default)]
    plan_id: Option<String>,
    #[serde(default)]
    thought_process: Option<String>,
    #[serde(default)]
    steps: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct JobStatusFrame {
    mission_id: String,
    status: JobState,
    #[serde(default)]
    log: Option<String>,
    #[serde(default)]
    artifacts: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("frame decode failed: {0}")]
    Decode(String),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("frame has no string kind tag")]
    MissingKind,
    #[error("invalid {kind} frame: {reason}")]
    InvalidShape { kind: String, reason: String },
}

pub fn normalize(raw: &str) -> Result<MissionEvent, ParseError> {
    normalize_with_limit(raw, DEFAULT_MAX_FRAME_BYTES)
}

pub fn normalize_with_limit(raw: &str, max_frame_bytes: usize) -> Result<MissionEvent, ParseError> {
    let raw = raw.trim_end_matches(['\r', '\n']);
    if raw.len() > max_frame_bytes {
        return Err(ParseError::OversizedFrame {
            size: raw.len(),
            max: max_frame_bytes,
        });
    }
    let value: Value =
        serde_json::from_str(raw).map_err(|err| ParseError::Decode(err.to_string()))?;
    let Value::Object(mut object) = value else {
        return Err(ParseError::NotAnObject);
    };
    let kind = take_kind(&mut object).ok_or(ParseError::MissingKind)?;

    match kind.as_str() {
        KIND_PLAN_PROPOSAL => parse_plan_proposal(object).map(MissionEvent::PlanProposal),
        KIND_JOB_STATUS => parse_job_status(object).map(MissionEvent::JobStatus),
        _ => Ok(MissionEvent::Unrecognized {
            kind,
            payload: Value::Object(object),
        }),
    }
}

/// `kind` is the documented tag; `type` is still emitted by some agent builds.
fn take_kind(object: &mut Map<String, Value>) -> Option<String> {
    for key in ["kind", "type"] {
        if let Some(Value::String(kind)) = object.get(key) {
            let kind = kind.trim().to_string();
            if kind.is_empty() {
                return None;
            }
            object.remove(key);
            return Some(kind);
        }
    }
    None
}

fn parse_plan_proposal(object: Map<String, Value>) -> Result<PlanProposal, ParseError> {
    let frame: PlanProposalFrame = serde_json::from_value(Value::Object(object))
        .map_err(|err| invalid(KIND_PLAN_PROPOSAL, err.to_string()))?;
    let mission_id = frame
        .mission_id
        .filter(|id| !id.trim().is_empty())
        .or(frame.plan_id)
        .ok_or_else(|| invalid(KIND_PLAN_PROPOSAL, "missing mission_id or plan_id"))?;
    Ok(PlanProposal {
        mission_id: require_id(KIND_PLAN_PROPOSAL, mission_id)?,
        thought_process: frame.thought_process.unwrap_or_default(),
        steps: frame.steps.unwrap_or_default(),
    })
}

fn parse_job_status(object: Map<String, Value>) -> Result<JobStatus, ParseError> {
    let frame: JobStatusFrame = serde_json::from_value(Value::Object(object))
        .map_err(|err| invalid(KIND_JOB_STATUS, err.to_string()))?;
    Ok(JobStatus {
        mission_id: require_id(KIND_JOB_STATUS, frame.mission_id)?,
        status: frame.status,
        log_line: frame.log,
        artifacts: frame.artifacts.unwrap_or_default(),
    })
}

fn require_id(kind: &str, id: String) -> Result<String, ParseError> {
    if id.trim().is_empty() {
        return Err(invalid(kind, "empty mission id"));
    }
    Ok(id)
}

fn invalid(kind: &str, reason: impl Into<String>) -> ParseError {
    ParseError::InvalidShape {
        kind: kind.to_string(),
        reason: reason.into(),
    }
}
