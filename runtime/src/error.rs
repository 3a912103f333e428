use std::fmt;

use field::FieldError;

use crate::symbols::SymbolError;

/// Errors that abort witness computation.
///
/// Every variant is fatal: it indicates either a malformed circuit or a bug
/// in the emitter that produced it. The first error recorded during a run is
/// the one surfaced by `join()` and by any blocked reader.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeError {
    /// Name lookup failed inside a component's symbol table.
    Symbol { component: usize, source: SymbolError },
    /// A signal was written more than once.
    DoubleAssignment { component: usize, signal: usize },
    /// A signal was read before any component produced it.
    ReadUnassigned { signal: usize },
    /// A sanity-mode constraint check found differing values.
    ConstraintViolation { component: usize, tag: String },
    /// A component function panicked on its worker thread.
    ComponentPanicked { component: usize },
    /// The OS refused to spawn a worker thread for a component.
    ThreadSpawn { component: usize, reason: String },
    /// The circuit description is structurally unusable.
    InvalidCircuit(String),
    /// Field construction or arithmetic failed.
    Field(FieldError),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::Symbol { component, source } => {
                write!(f, "component {component}: {source}")
            }
            RuntimeError::DoubleAssignment { component, signal } => {
                write!(f, "component {component}: signal {signal} assigned twice")
            }
            RuntimeError::ReadUnassigned { signal } => {
                write!(f, "accessing a not assigned signal: {signal}")
            }
            RuntimeError::ConstraintViolation { component, tag } => {
                write!(f, "component {component}: constraint doesn't match, {tag}")
            }
            RuntimeError::ComponentPanicked { component } => {
                write!(f, "component {component} panicked during execution")
            }
            RuntimeError::ThreadSpawn { component, reason } => {
                write!(f, "component {component}: failed to spawn thread: {reason}")
            }
            RuntimeError::InvalidCircuit(reason) => {
                write!(f, "invalid circuit: {reason}")
            }
            RuntimeError::Field(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for RuntimeError {}

impl From<FieldError> for RuntimeError {
    fn from(err: FieldError) -> Self {
        RuntimeError::Field(err)
    }
}
