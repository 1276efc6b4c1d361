use thiserror::Error;

/// Errors surfaced at the library boundary: conditions a caller can
/// meaningfully branch on, as opposed to the catch-all `anyhow::Error`
/// the two binaries wrap everything in at the top level.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read input file {path}: {source}")]
    ReadInput {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write intermediate or output file: {0}")]
    Write(#[source] std::io::Error),

    #[error("failed to scan working directory for intermediate shards: {0}")]
    Scan(#[source] std::io::Error),

    #[error("failed to encode intermediate record for partition {partition}: {source}")]
    Encode {
        partition: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed intermediate record in {file}: {source}")]
    Decode {
        file: String,
        #[source]
        source: serde_json::Error,
    },
}
