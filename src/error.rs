/// Shared error type used across the whole crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("scheduler is already running")]
    SchedulerRunning,

    #[error("scheduler is not running")]
    SchedulerStopped,

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("job already exists: {0}")]
    JobAlreadyExists(String),

    #[error("invalid cron expression: {0}")]
    InvalidExpression(String),

    #[error("interval must be greater than zero")]
    InvalidInterval,

    #[error("one-shot delay must not be negative")]
    InvalidDelay,

    #[error("job id must not be empty")]
    EmptyJobId,

    #[error("unsupported storage format: {0}")]
    UnsupportedFormat(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("storage: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, Error>;
