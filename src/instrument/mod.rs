//! Selective allocation instrumentation.
//!
//! This module is the engine proper. At class-load time the [`Transformer`] (the transform
//! gate) decides whether a class must be instrumented; if so the [`Rewriter`] brackets every
//! allocation site with calls to a pre- and a post-allocation hook.
//!
//! # Architecture
//!
//! - [`RegistrationSet`]: the process-wide, add-only set of types that opted in
//! - [`ExclusionPolicy`]: classes that are never rewritten (hook implementation, bootstrap
//!   types, optionally everything from the bootstrap loader)
//! - [`Transformer`]: the gate; exclusion, then registration, then rewrite
//! - [`Rewriter`]: parse, per-method forward pass, layout and relocation, frames, write back
//! - [`FrameComputer`]: rebuilds stack map frames; [`StackMapRemapper`] is the default
//! - [`install`]: registers the gate with an [`Instrumentation`] host
//!
//! # Allocation sites and hook calls
//!
//! | Site                                  | Pre hook arguments                 | Post cast      |
//! |---------------------------------------|------------------------------------|----------------|
//! | `new C`                               | `"LC;"`, `null`                    | `C`            |
//! | `newarray T`                          | `"T"`, `int[]{n}`                  | `[T`           |
//! | `anewarray C`                         | `"LC;"`, `int[]{n}`                | `[LC;`         |
//! | `multianewarray [..T, k`              | descriptor minus `k` `[`, counts   | the array type |
//! | `Array.newInstance(Class, int)`       | the class, `int[]{n}`              | none           |
//! | `Array.newInstance(Class, int[])`     | the class, the dimensions          | none           |
//!
//! The pre hook runs before the allocation, so a throwing hook prevents it. The post hook
//! receives the token returned by the pre hook and the new reference, and its result
//! replaces the reference on the operand stack. For `new` the post hook runs after the
//! constructor has completed.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use allocscope::instrument::{
//!     ClassFileTransformer, LoadEvent, RegistrationSet, TransformOutcome, Transformer,
//!     TransformerConfig, TypeHandle,
//! };
//!
//! let registry = Arc::new(RegistrationSet::new());
//! let gate = Transformer::new(Arc::clone(&registry), TransformerConfig::default());
//!
//! // hook classes are never rewritten, registered or not
//! registry.register(TypeHandle(1));
//! let event = LoadEvent {
//!     loader: None,
//!     class_name: "sandbox/runtime/AllocationHooks",
//!     class: Some(TypeHandle(1)),
//!     protection_domain: None,
//!     class_bytes: &[],
//! };
//! assert_eq!(gate.transform(&event)?, TransformOutcome::NoChange);
//! # Ok::<(), allocscope::Error>(())
//! ```

mod agent;
mod config;
mod exclusion;
mod frames;
mod gate;
mod hooks;
mod interpret;
mod layout;
mod method;
mod registry;
mod rewriter;
mod sites;

pub use agent::{install, Installation, Instrumentation};
pub use config::{
    HookBinding, RewriterConfig, TransformerConfig, DEFAULT_HOOK_OWNER, DEFAULT_POST_ALLOCATE,
    DEFAULT_PRE_ALLOCATE, POST_ALLOCATE_DESCRIPTOR, PRE_ALLOCATE_DESCRIPTOR,
    PRE_ALLOCATE_REFLECTIVE_DESCRIPTOR,
};
pub use exclusion::{ExclusionPolicy, BOOTSTRAP_PREFIXES};
pub use frames::{
    decode_frames, encode_frames, initial_locals, Frame, FrameComputer, FrameContext,
    StackMapRemapper, VerificationType,
};
pub use gate::{
    ClassFileTransformer, GateDecision, LoadEvent, LoaderRef, ProtectionDomain,
    TransformOutcome, Transformer,
};
pub use hooks::STACK_HEADROOM;
pub use layout::{CodeRemap, RemapEntry, WidenedBranch};
pub use registry::{RegistrationSet, TypeHandle};
pub use rewriter::{RewriteSummary, RewrittenClass, Rewriter};
pub use sites::{
    classify, scan_allocation_sites, AllocationKind, AllocationSite, Dimensions, SiteCounts,
    NEW_INSTANCE, NEW_INSTANCE_DIMENSIONS, NEW_INSTANCE_LENGTH, REFLECT_ARRAY,
};
