//! Shared functionality which is used in unit tests
//!
//! [`factories`] builds small, hand-assembled classes that exercise one allocation idiom
//! each; [`inspect`] reads rewritten code back for structural assertions.

pub mod inspect;

pub use factories::*;
pub use inspect::*;
