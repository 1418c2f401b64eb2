use thiserror::Error;

use crate::common::PredicateId;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the materialization core.
///
/// Contract violations (unsupported operations, schema mismatches) abort the
/// query that caused them; lookup misses are `Option`/`bool` results on the
/// relevant methods, never errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed configuration line {line_no}: {line:?}")]
    Config { line_no: usize, line: String },

    #[error("configuration descriptor {index} is incomplete: {reason}")]
    ConfigDescriptor { index: usize, reason: &'static str },

    #[error("predicate {0:?} is not registered")]
    UnknownPredicate(PredicateId),

    #[error("{op} is not supported on this backend")]
    Unsupported { op: &'static str },

    #[error("row width mismatch: expected {expected}, got {got}")]
    SchemaMismatch { expected: usize, got: usize },

    #[error("allocation failed while growing {what}")]
    Resource { what: &'static str },

    #[error("filter positions {positions:?} are invalid for arity {arity}")]
    BadFilter { positions: Vec<usize>, arity: usize },

    #[error("a filter on both positions requires an even number of values, got {0}")]
    OddFilterLength(usize),
}
