use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// A dump id no longer resolves, typically because it was pruned while a
    /// cursor referencing it was still in flight.
    #[error("dump {0} not found")]
    DumpNotFound(i64),

    #[error("unknown cursor phase {0:?}")]
    UnknownCursorPhase(String),

    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request canceled")]
    Canceled,

    /// The bundle manager has no data for this dump.
    #[error("bundle for dump {0} not found")]
    BundleNotFound(i64),

    #[error("bundle request failed: {0}")]
    Bundle(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Error class reported to RPC callers.
    pub fn code(&self) -> &'static str {
        match self {
            Error::DumpNotFound(_) | Error::BundleNotFound(_) => "not_found",
            Error::UnknownCursorPhase(_) | Error::InvalidCursor(_) | Error::InvalidRequest(_) => {
                "bad_request"
            }
            Error::Canceled => "canceled",
            _ => "internal",
        }
    }
}
