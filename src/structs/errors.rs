use thiserror::Error;

/// Errors that may happen while talking to the authoritative store.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The blocking task running the query was dropped or panicked.
    #[error("database worker terminated")]
    Closed,
}

/// Per-flag failures of the submission pipeline.
///
/// The display strings are part of the wire contract: participants'
/// submitters match on them.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SubmitError {
    #[error("Game is not available.")]
    GameNotAvailable,

    #[error("Game has finished. No more flags accepted.")]
    GameFinished,

    #[error("Flag is invalid or too old.")]
    FlagInvalid,

    #[error("Flag is your own")]
    FlagYourOwn,

    #[error("Flag is too old")]
    FlagTooOld,

    #[error("Cannot submit flags while service is down")]
    ServiceIsDown,

    #[error("Flag already stolen")]
    FlagAlreadyStolen,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors that may happen while loading or resetting the game setup.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("failed to read game config: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid start_time {0:?}: expected RFC 3339 or \"YYYY-MM-DD HH:MM:SS\" (UTC)")]
    BadStartTime(String),

    #[error(transparent)]
    Db(#[from] DbError),
}
