use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Progressing,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Progressing => "progressing",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }

    /// `Running` and `Progressing` are one logical phase; `Progressing` just
    /// carries a progress payload.
    pub fn is_active(&self) -> bool {
        matches!(self, JobState::Running | JobState::Progressing)
    }

    /// Legal transition table. Self-loops within the active phase are
    /// permitted so a redelivered job can be re-claimed; nothing leaves a
    /// terminal state.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Queued, Running | Cancelled)
                | (
                    Running | Progressing,
                    Running | Progressing | Succeeded | Failed | Cancelled
                )
        )
    }
}

impl Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub n: u64,
    pub total: u64,
}

impl Progress {
    /// Counts above the reported total are capped at the total.
    pub fn new(n: u64, total: u64) -> Self {
        Self {
            n: n.min(total),
            total,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.n >= self.total
    }

    /// Tie-break policy for racing updates: only a strictly higher count
    /// replaces the one already recorded.
    pub fn supersedes(&self, prior: Option<Progress>) -> bool {
        prior.map_or(true, |p| self.n > p.n)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("options must be a JSON object (got {0})")]
pub struct MalformedOptions(pub &'static str);

/// Opaque submission options, delivered to the processing callback
/// unmodified. The orchestration layer never interprets keys.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobOptions(pub serde_json::Map<String, serde_json::Value>);

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, MalformedOptions> {
        match value {
            serde_json::Value::Object(map) => Ok(Self(map)),
            other => Err(MalformedOptions(json_type_name(&other))),
        }
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.0.insert(key.into(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for JobOptions {
    fn from(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self(map)
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// What the broker carries from submission to a worker.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub id: JobId,
    pub payload: Vec<u8>,
    pub options: JobOptions,
    pub submitted_at: DateTime<Utc>,
}

impl JobDescriptor {
    pub fn new(payload: Vec<u8>, options: JobOptions) -> Self {
        Self {
            id: JobId::new(),
            payload,
            options,
            submitted_at: Utc::now(),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Primary,
    Secondary,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Primary => "primary",
            ArtifactKind::Secondary => "secondary",
        }
    }
}

impl Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown artifact name: {0}")]
pub struct UnknownArtifact(pub String);

impl FromStr for ArtifactKind {
    type Err = UnknownArtifact;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(ArtifactKind::Primary),
            "secondary" => Ok(ArtifactKind::Secondary),
            other => Err(UnknownArtifact(other.to_string())),
        }
    }
}

/// The two named blobs a successful job produces.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct JobArtifacts {
    pub primary: Vec<u8>,
    pub secondary: Vec<u8>,
}

impl JobArtifacts {
    pub fn artifact(&self, kind: ArtifactKind) -> &[u8] {
        match kind {
            ArtifactKind::Primary => &self.primary,
            ArtifactKind::Secondary => &self.secondary,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Success { artifacts: JobArtifacts },
    Failure { detail: String },
}

/// Reference to an outcome written into the result store.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct OutcomeHandle {
    pub key: String,
    pub written_at: DateTime<Utc>,
}

/// Registry entry tracking one job end to end.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub state: JobState,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub progress: Option<Progress>,
    pub outcome_ref: Option<OutcomeHandle>,
    pub failure_detail: Option<String>,
    pub cancel_requested: bool,
    pub worker_id: Option<String>,
}

impl JobRecord {
    pub fn queued(descriptor: &JobDescriptor) -> Self {
        Self {
            id: descriptor.id,
            state: JobState::Queued,
            submitted_at: descriptor.submitted_at,
            updated_at: descriptor.submitted_at,
            progress: None,
            outcome_ref: None,
            failure_detail: None,
            cancel_requested: false,
            worker_id: None,
        }
    }
}
