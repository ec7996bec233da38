//! Directive parse errors (spec §6, §7 "configuration" class: "reject at
//! startup").

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required key {0}")]
    MissingKey(&'static str),

    #[error("duplicate key {0} on one directive line")]
    DuplicateKey(String),

    #[error("unrecognized key {0}")]
    UnknownKey(String),

    #[error("malformed token {0} (expected key=value)")]
    MalformedToken(String),

    #[error("bad value for {key}: {value}")]
    BadValue { key: String, value: String },

    #[error("unterminated quoted value for {0}")]
    UnterminatedQuote(String),

    #[error(transparent)]
    BadRetry(#[from] syncrepl_types::RetryParseError),
}
