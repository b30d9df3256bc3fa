//! Low-level byte access used by the class-file reader and the bytecode decoder.
//!
//! - [`io`] - Big-endian primitive reads and appends
//! - [`parser`] - The cursor-based [`parser::Parser`]

pub mod io;
pub mod parser;
