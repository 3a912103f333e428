//! Witness calculator for compiled arithmetic circuits.
//!
//! A circuit compiler emits a static [`Circuit`] description plus one
//! execution function per component; this crate drives those functions so
//! that every signal is assigned exactly once, respecting the data-flow
//! dependencies between components, and exposes the resulting witness
//! vector. Components flagged for threading run on their own OS threads;
//! everything else executes depth-first on the triggering thread.

pub mod calculator;
pub mod circuit;
pub mod error;
pub mod symbols;

pub use calculator::{Calculator, NMUTEXES};
pub use circuit::{Circuit, Component, ComponentFn, InputBitmap};
pub use error::RuntimeError;
pub use symbols::{hash_name, SymbolEntry, SymbolError, SymbolKind, SymbolTable};

pub use field::{Field, FieldElement, FieldError};
