//! Error types for every component, aggregated into [`GovernorError`] — a
//! single top-level enum with `#[from]` conversions from each subsystem's
//! own error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("publish failed on subject {subject}: {reason}")]
    Publish { subject: String, reason: String },
    #[error("consumer {consumer} on stream {stream} could not be created: {reason}")]
    ConsumerSetup {
        stream: String,
        consumer: String,
        reason: String,
    },
    #[error("fetch from consumer {0} timed out")]
    FetchTimeout(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum WalError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum DedupError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("node {0} not found")]
    NodeNotFound(uuid::Uuid),
    #[error("confidence update rejected: new {new} < existing {existing}")]
    ConfidenceRegression { new: f64, existing: f64 },
}

#[derive(Debug, Error)]
pub enum StateMachineError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("scope {0} has no state row")]
    ScopeNotFound(String),
    #[error("epoch mismatch: expected {expected}, found {actual}")]
    EpochMismatch { expected: i64, actual: i64 },
    #[error("wal append failed: {0}")]
    Wal(#[from] WalError),
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("failed to read policy file {path}: {reason}")]
    Read { path: String, reason: String },
    #[error("failed to parse policy yaml: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum GovernanceError {
    #[error("state machine error: {0}")]
    StateMachine(#[from] StateMachineError),
    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),
    #[error("bus error: {0}")]
    Bus(#[from] BusError),
    #[error("wal error: {0}")]
    Wal(#[from] WalError),
    #[error("dedup error: {0}")]
    Dedup(#[from] DedupError),
    #[error("finality error: {0}")]
    Finality(#[from] FinalityError),
    #[error("oversight call failed: {0}")]
    Oversight(String),
    #[error("permission check failed: {0}")]
    Permission(String),
    #[error("pending-review registry error: {0}")]
    PendingReview(String),
}

#[derive(Debug, Error)]
pub enum FinalityError {
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),
}

#[derive(Debug, Error)]
pub enum HatcheryError {
    #[error("bus error: {0}")]
    Bus(#[from] BusError),
    #[error("role {0} is not registered")]
    UnknownRole(String),
    #[error("role {0} has exhausted its restart budget")]
    RestartExhausted(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
    #[error("failed to read config file {path}: {reason}")]
    FileRead { path: String, reason: String },
    #[error("failed to parse config file {path}: {reason}")]
    FileParse { path: String, reason: String },
}

/// Top-level error aggregating every component's own error type.
#[derive(Debug, Error)]
pub enum GovernorError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("bus error: {0}")]
    Bus(#[from] BusError),
    #[error("wal error: {0}")]
    Wal(#[from] WalError),
    #[error("dedup error: {0}")]
    Dedup(#[from] DedupError),
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),
    #[error("state machine error: {0}")]
    StateMachine(#[from] StateMachineError),
    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),
    #[error("governance error: {0}")]
    Governance(#[from] GovernanceError),
    #[error("finality error: {0}")]
    Finality(#[from] FinalityError),
    #[error("hatchery error: {0}")]
    Hatchery(#[from] HatcheryError),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type GovernorResult<T> = Result<T, GovernorError>;
