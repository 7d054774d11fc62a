use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Pool wait timeout elapsed without a free connection. Transient;
    /// callers should retry with backoff.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// The backend dropped or refused a connection. Transient; the pool
    /// discards the connection and replaces it on the next acquire.
    #[error("database connection lost: {0}")]
    ConnectionLost(#[source] sqlx::Error),

    /// Unique/check constraint hit. Not retryable; indicates a logic bug
    /// such as an id collision.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// A migration step failed partway. Fatal at startup; the engine
    /// refuses to serve against a partially migrated schema.
    #[error("migration {version} failed: {detail}")]
    MigrationFailed { version: i64, detail: String },

    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Caller-supplied deadline elapsed before the operation finished.
    #[error("operation deadline exceeded")]
    Timeout,

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl Error {
    /// Whether a single retry with backoff is reasonable (read paths only).
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::PoolExhausted | Error::ConnectionLost(_))
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut => Error::PoolExhausted,
            sqlx::Error::Io(_) | sqlx::Error::Protocol(_) => Error::ConnectionLost(e),
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                Error::ConstraintViolation(e.to_string())
            }
            other => Error::Database(other),
        }
    }
}
