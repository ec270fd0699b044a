//! Error types for every stage of the engine.
//!
//! Each stage has its own error type; [`Error`] is the union returned by the
//! embedding API and [`ErrorKind`] the coarse category a test harness
//! asserts on.

use brine_runtime::{ConstructionError, Trap};
use thiserror::Error;

/// The bytes do not form a well-formed binary module.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (at offset {offset:#x})")]
pub struct DecodeError {
    pub message: String,
    /// Absolute byte offset in the module where decoding failed.
    pub offset: usize,
}

impl DecodeError {
    pub fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }
}

/// The module is well-formed but fails type checking.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
    /// Index of the function whose body failed validation, if any.
    pub func: Option<u32>,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            func: None,
        }
    }

    pub(crate) fn in_func(mut self, func: u32) -> Self {
        self.func = Some(func);
        self
    }
}

/// An import could not be resolved against the supplied registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("unknown import: {module}.{name}")]
    UnknownImport { module: String, name: String },

    #[error("incompatible import type for {module}.{name}: {reason}")]
    IncompatibleImportType {
        module: String,
        name: String,
        reason: String,
    },
}

/// Top-level error returned by the embedding API.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("malformed module: {0}")]
    Decode(#[from] DecodeError),

    #[error("invalid module: {0}")]
    Validation(#[from] ValidationError),

    #[error("link error: {0}")]
    Link(#[from] LinkError),

    /// A trap while initialising segments or running the start function.
    #[error("instantiation failed: {0}")]
    Uninstantiable(Trap),

    #[error("trap: {0}")]
    Trap(#[from] Trap),

    #[error("resource exhaustion: {0}")]
    Exhaustion(String),

    /// Embedding misuse: unknown export, wrong argument count or types.
    #[error("{0}")]
    Host(String),
}

impl From<ConstructionError> for Error {
    fn from(err: ConstructionError) -> Self {
        Error::Exhaustion(err.to_string())
    }
}

/// Coarse outcome category of a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Malformed,
    Invalid,
    Unlinkable,
    Uninstantiable,
    Trap,
    Exhaustion,
    Host,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Decode(_) => ErrorKind::Malformed,
            Error::Validation(_) => ErrorKind::Invalid,
            Error::Link(_) => ErrorKind::Unlinkable,
            Error::Uninstantiable(_) => ErrorKind::Uninstantiable,
            Error::Trap(_) => ErrorKind::Trap,
            Error::Exhaustion(_) => ErrorKind::Exhaustion,
            Error::Host(_) => ErrorKind::Host,
        }
    }

    /// The trap behind a `Trap` or `Uninstantiable` error.
    pub fn trap(&self) -> Option<Trap> {
        match self {
            Error::Trap(t) | Error::Uninstantiable(t) => Some(*t),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
