use clap::Parser;
use scanops_core::DEFAULT_MAX_FRAME_BYTES;
use scanops_link::LinkConfig;
use std::{env, time::Duration};
use thiserror::Error;
use url::Url;

pub const DEFAULT_AGENT_URL: &str = "ws://127.0.0.1:8765/ws";
pub const DEFAULT_LOG_DIR: &str = ".scanops/logs";

#[derive(Parser, Debug, Default)]
#[command(
    name = "scanops-console",
    about = "Headless operator console for a remote scanning agent"
)]
pub struct Args {
    #[arg(long, default_value = "")]
    pub agent_url: String,
    #[arg(long, default_value = "")]
    pub session: String,
    #[arg(long, default_value = "")]
    pub log_dir: String,
    /// summary | json | none
    #[arg(long, default_value = "")]
    pub emit: String,
    #[arg(long, default_value = "")]
    pub hello: String,
    #[arg(long, default_value_t = 1000)]
    pub backoff_initial_ms: u64,
    #[arg(long, default_value_t = 10_000)]
    pub backoff_max_ms: u64,
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_BYTES)]
    pub max_frame_bytes: usize,
    /// Mission already started by the submission service, as ID or ID=TITLE.
    #[arg(long = "mission", value_name = "ID[=TITLE]")]
    pub missions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitMode {
    Summary,
    Json,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissionSeed {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub session_id: String,
    pub agent_url: Url,
    pub log_dir: String,
    pub log_stderr: bool,
    pub emit: EmitMode,
    pub hello: Option<String>,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub max_frame_bytes: usize,
    pub missions: Vec<MissionSeed>,
}

impl Config {
    pub fn link_config(&self) -> LinkConfig {
        let link = LinkConfig::new(self.agent_url.clone())
            .with_backoff(self.backoff_initial, self.backoff_max);
        match self.hello.as_ref() {
            Some(hello) => link.with_hello(hello.clone()),
            None => link,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid agent url '{value}': {source}")]
    InvalidUrl {
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("agent url must use ws or wss, got '{0}'")]
    UnsupportedScheme(String),
    #[error("invalid --mission value '{0}', expected ID or ID=TITLE")]
    InvalidMission(String),
    #[error("invalid emit mode '{0}', expected summary, json or none")]
    InvalidEmit(String),
}

pub fn load_config(args: Args) -> Result<Config, ConfigError> {
    let session_id = resolve_session_id(&args.session);
    let agent_url = parse_agent_url(&resolve_flag(
        &args.agent_url,
        "SCANOPS_AGENT_URL",
        DEFAULT_AGENT_URL,
    ))?;
    let log_dir = resolve_flag(&args.log_dir, "SCANOPS_LOG_DIR", DEFAULT_LOG_DIR);
    let emit = parse_emit_mode(&resolve_flag(&args.emit, "SCANOPS_EMIT", "summary"))?;
    let hello = Some(resolve_flag(&args.hello, "SCANOPS_HELLO", ""))
        .filter(|value| !value.trim().is_empty());
    let missions = args
        .missions
        .iter()
        .map(|raw| parse_mission_seed(raw))
        .collect::<Result<Vec<_>, _>>()?;
    let log_stderr = env::var("SCANOPS_LOG_STDERR")
        .ok()
        .and_then(|value| parse_bool_flag(&value))
        .unwrap_or(false);

    Ok(Config {
        session_id,
        agent_url,
        log_dir,
        log_stderr,
        emit,
        hello,
        backoff_initial: Duration::from_millis(args.backoff_initial_ms.max(1)),
        backoff_max: Duration::from_millis(args.backoff_max_ms.max(1)),
        max_frame_bytes: args.max_frame_bytes.max(1),
        missions,
    })
}

fn resolve_flag(flag: &str, env_key: &str, default: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.trim().to_string();
    }
    if let Ok(value) = env::var(env_key) {
        if !value.trim().is_empty() {
            return value.trim().to_string();
        }
    }
    default.to_string()
}

fn resolve_session_id(flag: &str) -> String {
    let resolved = resolve_flag(flag, "SCANOPS_SESSION_ID", "");
    if !resolved.is_empty() {
        return resolved;
    }
    format!("pid-{}", std::process::id())
}

pub fn parse_agent_url(value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value).map_err(|source| ConfigError::InvalidUrl {
        value: value.to_string(),
        source,
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ConfigError::UnsupportedScheme(other.to_string())),
    }
}

pub fn parse_emit_mode(value: &str) -> Result<EmitMode, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "summary" => Ok(EmitMode::Summary),
        "json" => Ok(EmitMode::Json),
        "none" | "off" => Ok(EmitMode::None),
        _ => Err(ConfigError::InvalidEmit(value.to_string())),
    }
}

pub fn parse_mission_seed(raw: &str) -> Result<MissionSeed, ConfigError> {
    let (id, title) = match raw.split_once('=') {
        Some((id, title)) => (id.trim(), title.trim()),
        None => (raw.trim(), ""),
    };
    if id.is_empty() {
        return Err(ConfigError::InvalidMission(raw.to_string()));
    }
    Ok(MissionSeed {
        id: id.to_string(),
        title: title.to_string(),
    })
}

pub fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
