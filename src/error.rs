use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Error)]
pub enum TimeError {
    #[error("invalid time '{0}': expected HH:MM or HH:MM:SS with components in range")]
    InvalidTime(String),
    #[error("unknown timezone '{0}'")]
    InvalidTimezone(String),
    #[error("unknown weekday '{0}'")]
    InvalidWeekday(String),
    #[error("local time '{local_time}' has no corresponding instant in timezone '{tz}' even after searching forward")]
    UnresolvableLocalTime { local_time: String, tz: String },
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("alarm already exists: {0}")]
    AlreadyExists(String),
    #[error(transparent)]
    Time(#[from] TimeError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("alarm already exists for ({code_id}, {email}, {local_time})")]
    AlreadyExists {
        code_id: String,
        email: String,
        local_time: String,
    },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("failed to connect to bus: {0}")]
    Connection(String),
    #[error("failed to publish to topic '{topic}': {source}")]
    Publish { topic: String, source: String },
}

#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("failed to build SMTP transport: {0}")]
    Transport(String),
    #[error("SMTP send failed: {0}")]
    Send(String),
}
