//! JVM bytecode decoding and encoding.
//!
//! This module turns a method's code array into a sequence of typed [`Instruction`]s and back.
//! It covers the complete instruction set of JVMS chapter 6 including `wide`, the padded
//! switches and 32-bit branches, since every instruction of an instrumented method has to be
//! re-emitted at a new position.
//!
//! # Key Types
//! - [`Instruction`] - A decoded instruction with its original offset and size
//! - [`Operand`] - Typed operand data
//! - [`OperandType`] / [`FlowType`] - Static properties from the opcode table
//! - [`InstructionEncoder`] - Appends encoded instructions to a code buffer
//!
//! # Main Functions
//! - [`decode_instruction`] - Decode a single instruction
//! - [`decode_stream`] - Decode and validate a whole code array

mod decoder;
mod encoder;
mod instruction;
pub mod instructions;
pub mod opcodes;

pub use decoder::{decode_instruction, decode_stream};
pub use encoder::{switch_size, InstructionEncoder};
pub use instruction::{FlowType, Instruction, Operand, OperandType};
