use thiserror::Error;

/// Why a single date could not be fetched into the cache.
///
/// `Display` is the status text written to the failure log.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("{0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("cache write failed: {0}")]
    Cache(String),
}

/// Why a sheet was rejected by the parser.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SheetError {
    #[error("sheet '{sheet}' has no header row after skipping {skip} rows")]
    MissingHeader { sheet: String, skip: usize },

    #[error("sheet '{sheet}' is missing required columns: {}", .missing.join(", "))]
    MissingColumns { sheet: String, missing: Vec<String> },
}

/// Terminal conditions of a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no file contributed a valid sheet; nothing to process")]
    NothingToProcess,
}
