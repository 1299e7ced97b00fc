use thiserror::Error;

/// Failure kinds surfaced to the dashboard. None of them are fatal; the
/// caller reports them and the user may retry.
#[derive(Debug, Error)]
pub enum CensusError {
    #[error("malformed JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid GeoJSON: {0}")]
    Structure(String),
    #[error("upload of {size} bytes exceeds the {limit} byte limit")]
    SizeLimit { size: usize, limit: usize },
    #[error("document store failure on {path:?}: {source}")]
    Store {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} not found")]
    NotFound(String),
    #[error("CSV export failed: {0}")]
    Export(#[from] csv::Error),
    #[error("selection superseded by a newer request")]
    Superseded,
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl CensusError {
    pub fn structure(msg: impl Into<String>) -> Self {
        CensusError::Structure(msg.into())
    }

    /// Stable identifier used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            CensusError::Parse(_) => "parse_error",
            CensusError::Structure(_) => "structure_error",
            CensusError::SizeLimit { .. } => "size_limit_error",
            CensusError::Store { .. } => "network_error",
            CensusError::NotFound(_) => "not_found",
            CensusError::Export(_) => "export_error",
            CensusError::Superseded => "superseded",
            CensusError::Task(_) => "internal_error",
        }
    }
}

pub type Result<T, E = CensusError> = std::result::Result<T, E>;
