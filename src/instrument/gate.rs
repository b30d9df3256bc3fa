//! The transform gate: the per-class-load decision between leaving a class alone and
//! rewriting it.
//!
//! The gate is what the host's class-load hook calls. It never parses anything itself; a
//! class is either skipped on the strength of its name, loader and registration, or handed
//! to the [`Rewriter`] whose result (or error) is returned unchanged.

use std::sync::Arc;

use crate::{
    instrument::{
        config::TransformerConfig,
        exclusion::ExclusionPolicy,
        frames::FrameComputer,
        registry::{RegistrationSet, TypeHandle},
        rewriter::Rewriter,
    },
    Result,
};

/// Opaque identity of a class loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoaderRef(pub u64);

/// Opaque protection domain; carried through, never inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtectionDomain(pub u64);

/// One attempt to define or redefine a class.
#[derive(Debug, Clone, Copy)]
pub struct LoadEvent<'a> {
    /// Defining loader, `None` for the bootstrap loader
    pub loader: Option<&'a LoaderRef>,
    /// Internal (slash-separated) class name
    pub class_name: &'a str,
    /// The type being redefined, `None` on first definition
    pub class: Option<TypeHandle>,
    /// Protection domain of the class
    pub protection_domain: Option<&'a ProtectionDomain>,
    /// The class file as presented by the host
    pub class_bytes: &'a [u8],
}

/// How the gate classified a load event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum GateDecision {
    /// Matched the exclusion policy
    Excluded,
    /// No type identity, or the type is not registered
    Unregistered,
    /// Must be rewritten
    Rewrite,
}

/// The answer to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformOutcome {
    /// Keep the original bytes
    NoChange,
    /// Define the class from these bytes instead
    Replaced(Vec<u8>),
}

/// The class-load hook as seen by the host adapter.
pub trait ClassFileTransformer: Send + Sync {
    /// Inspect one load event.
    ///
    /// # Errors
    /// An error means the class must fail to load; it is never a reason to fall back to the
    /// original bytes.
    fn transform(&self, event: &LoadEvent<'_>) -> Result<TransformOutcome>;
}

/// The gate in front of the [`Rewriter`].
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use allocscope::instrument::{
///     ClassFileTransformer, LoadEvent, RegistrationSet, TransformOutcome, Transformer,
///     TransformerConfig, TypeHandle,
/// };
///
/// let registry = Arc::new(RegistrationSet::new());
/// let gate = Transformer::new(registry, TransformerConfig::default());
///
/// let event = LoadEvent {
///     loader: None,
///     class_name: "demo/Other",
///     class: Some(TypeHandle(1)),
///     protection_domain: None,
///     class_bytes: &[],
/// };
/// assert_eq!(gate.transform(&event)?, TransformOutcome::NoChange);
/// # Ok::<(), allocscope::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct Transformer {
    registry: Arc<RegistrationSet>,
    exclusions: ExclusionPolicy,
    rewriter: Rewriter,
}

impl Transformer {
    /// Gate over a shared registration set.
    #[must_use]
    pub fn new(registry: Arc<RegistrationSet>, config: TransformerConfig) -> Self {
        Transformer {
            registry,
            exclusions: config.exclusions,
            rewriter: Rewriter::new(config.rewriter),
        }
    }

    /// Gate with a custom frame computer.
    #[must_use]
    pub fn with_frame_computer(
        registry: Arc<RegistrationSet>,
        config: TransformerConfig,
        frames: Arc<dyn FrameComputer>,
    ) -> Self {
        Transformer {
            registry,
            exclusions: config.exclusions,
            rewriter: Rewriter::with_frame_computer(config.rewriter, frames),
        }
    }

    /// The registration set consulted by the gate.
    #[must_use]
    pub fn registry(&self) -> &Arc<RegistrationSet> {
        &self.registry
    }

    /// Classify an event without acting on it.
    #[must_use]
    pub fn decide(&self, event: &LoadEvent<'_>) -> GateDecision {
        if self.exclusions.excludes(event.class_name, event.loader.is_none()) {
            return GateDecision::Excluded;
        }
        match event.class {
            Some(handle) if self.registry.is_registered(handle) => GateDecision::Rewrite,
            _ => GateDecision::Unregistered,
        }
    }
}

impl ClassFileTransformer for Transformer {
    fn transform(&self, event: &LoadEvent<'_>) -> Result<TransformOutcome> {
        match self.decide(event) {
            GateDecision::Excluded => {
                log::debug!("Excluded from instrumentation: {}", event.class_name);
                Ok(TransformOutcome::NoChange)
            }
            GateDecision::Unregistered => {
                log::debug!("Not transforming {}", event.class_name);
                Ok(TransformOutcome::NoChange)
            }
            GateDecision::Rewrite => {
                let rewritten = self.rewriter.rewrite(event.class_bytes, event.loader)?;
                Ok(TransformOutcome::Replaced(rewritten.bytes))
            }
        }
    }
}
