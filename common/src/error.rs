use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SettingError {
    #[error("unknown setting `{0}`")]
    UnknownField(String),
    #[error("setting `{field}` expects {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
    #[error("setting `{field}` value {value} is outside {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("setting `{field}` cannot be set to `{value}` remotely")]
    Unsupported { field: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown command topic `{0}`")]
    UnknownTopic(String),
    #[error("malformed command: {0}")]
    Malformed(String),
    #[error("invalid command payload: {0}")]
    Json(#[from] serde_json::Error),
}
