use std::num::ParseIntError;

use thiserror::Error;

/// Errors produced while parsing `/proc` statistics files.
#[derive(Debug, Error)]
pub enum StatParseError {
    #[error("invalid value for '{key}' at line {line}: '{value}': {source}")]
    InvalidKeyValue {
        key: String,
        value: String,
        line: usize,
        #[source]
        source: ParseIntError,
    },

    #[error("missing `cpu` summary line")]
    MissingCpuLine,

    #[error("truncated `cpu` summary line: expected {expected} counters, found {found}")]
    TruncatedCpuLine { expected: usize, found: usize },

    #[error("error during I/O: {0}")]
    Io(#[from] std::io::Error),
}
