// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![allow(clippy::too_many_arguments)]

//! # allocscope
//!
//! Selective JVM class-file rewriting that brackets every allocation site with sandbox hooks.
//!
//! A sandbox that runs untrusted code next to trusted code needs to see (and possibly veto)
//! every object and array the untrusted code allocates. `allocscope` sits in the class-load
//! path: for every class that is defined, a gate decides whether the class belongs to a
//! registered, untrusted type. If it does, every `new`, `newarray`, `anewarray`,
//! `multianewarray` and every `java/lang/reflect/Array.newInstance` call in the class is
//! rewritten so that a pre-allocation hook runs before the allocation and a
//! post-allocation hook runs after it. Everything else stays as it was.
//!
//! ## Features
//!
//! - **Self-contained class-file layer** - Reader and writer for class files up to Java 25,
//!   constant pool management, `Code` attribute and debug table decoding
//! - **Complete instruction set** - Decoder and encoder for all JVM opcodes, including
//!   `wide` forms and aligned switches
//! - **Loud failures** - A class that must be instrumented either is, or fails to load
//! - **Concurrent** - The gate and rewriter are `Send + Sync` and share nothing but the
//!   registration set
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use allocscope::prelude::*;
//!
//! // An untrusted class with one `new int[4]`
//! let mut builder = ClassBuilder::new("demo/Widget");
//! builder
//!     .method("make", "()[I", MemberAccessFlags::PUBLIC | MemberAccessFlags::STATIC)
//!     .max_stack(1)
//!     .code(vec![opcodes::ICONST_4, opcodes::NEWARRAY, 10, opcodes::ARETURN]);
//! let original = builder.to_bytes()?;
//!
//! let registry = Arc::new(RegistrationSet::new());
//! registry.register(TypeHandle(42));
//! let gate = Transformer::new(Arc::clone(&registry), TransformerConfig::default());
//!
//! let loader = LoaderRef(1);
//! let event = LoadEvent {
//!     loader: Some(&loader),
//!     class_name: "demo/Widget",
//!     class: Some(TypeHandle(42)),
//!     protection_domain: None,
//!     class_bytes: &original,
//! };
//!
//! let TransformOutcome::Replaced(rewritten) = gate.transform(&event)? else {
//!     panic!("registered class must be rewritten");
//! };
//! let sites = scan_allocation_sites(&rewritten, true)?;
//! // the hook sequence allocates the dimensions array itself
//! assert_eq!(sites.get(AllocationKind::PrimitiveArray), 2);
//! # Ok::<(), allocscope::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`prelude`] - Convenient re-exports of commonly used types and traits
//! - [`file`] - Byte-level parsing
//! - [`classfile`] - Class-file model, reader, writer and builder
//! - [`assembly`] - Instruction table, decoder and encoder
//! - [`instrument`] - Registration, gate, rewriter, frames and agent installation
//! - [`Error`] and [`Result`] - Error handling
//!
//! ## Error Handling
//!
//! ```rust
//! use allocscope::{Error, instrument::{Rewriter, RewriterConfig}};
//!
//! let rewriter = Rewriter::new(RewriterConfig::default());
//! match rewriter.rewrite(&[0xCA, 0xFE, 0xBA, 0xBE], None) {
//!     Ok(_) => println!("rewritten"),
//!     Err(e) if e.is_resource_exhaustion() => println!("limit hit: {e}"),
//!     Err(Error::Malformed { message, .. }) => println!("malformed: {message}"),
//!     Err(e) => println!("other error: {e}"),
//! }
//! ```
//!
//! ## Development and Testing
//!
//! ### Fuzzing
//!
//! ```bash
//! cargo +nightly fuzz run classfile --release
//! cargo +nightly fuzz run rewrite --release -- -jobs=4 -fork=1
//! ```
//!
//! ### Testing
//!
//! ```bash
//! cargo test
//! cargo bench
//! ```
#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use allocscope::prelude::*;
///
/// let registry = RegistrationSet::new();
/// assert!(registry.register(TypeHandle(1)));
/// let config = TransformerConfig::strict();
/// assert!(config.exclusions.skip_bootstrap_loader);
/// ```
pub mod prelude;

/// Low-level byte access: big-endian I/O and the cursor-based [`Parser`].
pub mod file;

/// The JVM class-file format (JVMS chapter 4).
///
/// # Key Types
///
/// - [`classfile::ClassFile`] - A parsed class, writable back to bytes
/// - [`classfile::ConstantPool`] - Constant pool with lookup and deduplicating insertion
/// - [`classfile::CodeAttribute`] - The decoded `Code` attribute
/// - [`classfile::ClassBuilder`] - Assembles classes from scratch
pub mod classfile;

/// JVM instructions: opcode table, decoder and encoder.
///
/// # Examples
///
/// ```rust
/// use allocscope::{assembly::{decode_instruction, opcodes}, Parser};
///
/// let code = [opcodes::NEWARRAY, 10];
/// let mut parser = Parser::new(&code);
/// let instruction = decode_instruction(&mut parser)?;
/// assert_eq!(instruction.mnemonic, "newarray");
/// # Ok::<(), allocscope::Error>(())
/// ```
pub mod assembly;

/// Selective allocation instrumentation: registration, gate, rewriter and installation.
pub mod instrument;

/// `allocscope` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always
/// [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `allocscope` Error type
///
/// Parse, rewrite and resource errors; see the variant docs for the families.
pub use error::Error;

/// The cursor used to read class files and bytecode.
pub use file::parser::Parser;
