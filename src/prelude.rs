//! # allocscope Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the allocscope library. Import this module to get quick access to the essential
//! types for installing and driving allocation instrumentation.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all allocscope operations
pub use crate::Error;

/// The result type used throughout allocscope
pub use crate::Result;

/// Low-level parsing cursor
pub use crate::Parser;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// The transform gate and the host-facing hook trait
pub use crate::instrument::{ClassFileTransformer, GateDecision, TransformOutcome, Transformer};

/// Per-load event data
pub use crate::instrument::{LoadEvent, LoaderRef, ProtectionDomain};

/// Type registration
pub use crate::instrument::{RegistrationSet, TypeHandle};

/// Installation with the host
pub use crate::instrument::{install, Installation, Instrumentation};

// ================================================================================================
// Configuration
// ================================================================================================

/// Hook contract, rewriter and gate configuration
pub use crate::instrument::{ExclusionPolicy, HookBinding, RewriterConfig, TransformerConfig};

// ================================================================================================
// Rewriting
// ================================================================================================

/// The rewriter and its output
pub use crate::instrument::{RewriteSummary, RewrittenClass, Rewriter};

/// Allocation site recognition
pub use crate::instrument::{
    scan_allocation_sites, AllocationKind, AllocationSite, Dimensions, SiteCounts,
};

/// Stack map frame recomputation seam
pub use crate::instrument::{CodeRemap, FrameComputer, FrameContext, StackMapRemapper};

// ================================================================================================
// Class Files and Instructions
// ================================================================================================

/// Class-file model and builder
pub use crate::classfile::{
    ClassAccessFlags, ClassBuilder, ClassFile, CodeAttribute, ConstantPool, MemberAccessFlags,
};

/// Instruction decoding and encoding
pub use crate::assembly::{decode_stream, opcodes, Instruction, InstructionEncoder, Operand};
