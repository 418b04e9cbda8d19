//! Error types for the loader.
//!
//! Per-line and per-endpoint failures are counted, not propagated: a
//! `RoutingError` or `StoreError` is logged by the worker and folded into the
//! chunk tally. Only `LoadError` escapes a file job, and only for the file it
//! belongs to.

use std::path::PathBuf;

use thiserror::Error;

/// A record whose device type has no configured endpoint.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("unknown device type {0:?}")]
    UnknownDeviceType(String),
}

/// Failure to decode a stored payload.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("decode payload: {0}")]
    Decode(#[from] prost::DecodeError),
}

/// Failure of one bulk write against one store endpoint.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{op} against {endpoint} timed out after {timeout:?}")]
    Timeout {
        endpoint: String,
        op: &'static str,
        timeout: std::time::Duration,
    },

    #[error("i/o with {endpoint}: {source}")]
    Io {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// The server answered with something the client cannot interpret.
    #[error("protocol error from {endpoint}: {detail}")]
    Protocol { endpoint: String, detail: String },

    /// The server understood the write and refused it.
    #[error("{endpoint} rejected write: {detail}")]
    Rejected { endpoint: String, detail: String },

    #[error("key {key:?} is not valid for {protocol}")]
    InvalidKey { key: String, protocol: &'static str },
}

/// Errors fatal to a single file job (or, for `Pattern`/`Config`, to the run).
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("read {} at line {line}: {source}", path.display())]
    Read {
        path: PathBuf,
        line: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("rename {} to {}: {source}", from.display(), to.display())]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid file pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("task for {} failed: {detail}", path.display())]
    Join { path: PathBuf, detail: String },
}
