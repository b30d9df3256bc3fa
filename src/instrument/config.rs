//! Configuration for the rewriter and the transform gate.
//!
//! All configuration is plain data with sensible defaults and a few presets. Nothing is read
//! from files or the environment; the embedding agent builds the configuration and hands it
//! to [`crate::instrument::Transformer::new`].

use crate::instrument::ExclusionPolicy;

/// Default internal name of the class that implements the hooks.
pub const DEFAULT_HOOK_OWNER: &str = "sandbox/runtime/AllocationHooks";

/// Default name of the pre-allocation hook.
pub const DEFAULT_PRE_ALLOCATE: &str = "preAllocate";

/// Default name of the post-allocation hook.
pub const DEFAULT_POST_ALLOCATE: &str = "postAllocate";

/// Descriptor of the pre-allocation hook for instruction sites: element descriptor and
/// dimensions in, token out.
pub const PRE_ALLOCATE_DESCRIPTOR: &str = "(Ljava/lang/String;[I)Ljava/lang/Object;";

/// Descriptor of the pre-allocation hook for reflective sites: component class and
/// dimensions in, token out.
pub const PRE_ALLOCATE_REFLECTIVE_DESCRIPTOR: &str = "(Ljava/lang/Class;[I)Ljava/lang/Object;";

/// Descriptor of the post-allocation hook: token and allocated reference in, the reference
/// to continue with out.
pub const POST_ALLOCATE_DESCRIPTOR: &str =
    "(Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;";

/// The static methods the rewritten code calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookBinding {
    /// Internal name of the class declaring the hooks
    pub owner: String,
    /// Name of the static pre-allocation hook
    pub pre_allocate: String,
    /// Name of the static post-allocation hook
    pub post_allocate: String,
}

impl Default for HookBinding {
    fn default() -> Self {
        Self {
            owner: DEFAULT_HOOK_OWNER.to_string(),
            pre_allocate: DEFAULT_PRE_ALLOCATE.to_string(),
            post_allocate: DEFAULT_POST_ALLOCATE.to_string(),
        }
    }
}

impl HookBinding {
    /// Bind the default hook names on a different owner class.
    #[must_use]
    pub fn with_owner(owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            ..Self::default()
        }
    }

    /// Package of the owner class including the trailing `/`, or an empty string for the
    /// unnamed package.
    #[must_use]
    pub fn package(&self) -> &str {
        match self.owner.rfind('/') {
            Some(slash) => &self.owner[..=slash],
            None => "",
        }
    }
}

/// Configuration of the instruction rewriter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriterConfig {
    /// Hook methods to call
    pub hooks: HookBinding,
    /// Also bracket `java/lang/reflect/Array.newInstance` calls (default: true)
    pub instrument_reflection: bool,
    /// Maximum number of scalar allocations that may be pending their constructor call at
    /// the same time in one method (default: 64)
    pub max_allocation_nesting: usize,
}

impl Default for RewriterConfig {
    fn default() -> Self {
        Self {
            hooks: HookBinding::default(),
            instrument_reflection: true,
            max_allocation_nesting: 64,
        }
    }
}

impl RewriterConfig {
    /// Rewriter configuration for a custom hook binding.
    #[must_use]
    pub fn with_hooks(hooks: HookBinding) -> Self {
        Self {
            hooks,
            ..Self::default()
        }
    }

    /// Only instruction sites; reflective array creation is left alone.
    ///
    /// **Warning**: reflection then becomes a way around the hooks.
    #[must_use]
    pub fn instructions_only() -> Self {
        Self {
            instrument_reflection: false,
            ..Self::default()
        }
    }
}

/// Complete configuration of a [`crate::instrument::Transformer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformerConfig {
    /// Rewriter settings
    pub rewriter: RewriterConfig,
    /// Which classes are never handed to the rewriter
    pub exclusions: ExclusionPolicy,
}

impl Default for TransformerConfig {
    fn default() -> Self {
        let rewriter = RewriterConfig::default();
        let exclusions = ExclusionPolicy::for_hooks(&rewriter.hooks);
        Self {
            rewriter,
            exclusions,
        }
    }
}

impl TransformerConfig {
    /// Default configuration for a custom hook binding; the exclusions follow the binding's
    /// package.
    #[must_use]
    pub fn with_hooks(hooks: HookBinding) -> Self {
        let exclusions = ExclusionPolicy::for_hooks(&hooks);
        Self {
            rewriter: RewriterConfig::with_hooks(hooks),
            exclusions,
        }
    }

    /// Default configuration that additionally never rewrites classes defined by the
    /// bootstrap loader.
    #[must_use]
    pub fn strict() -> Self {
        let mut config = Self::default();
        config.exclusions.skip_bootstrap_loader = true;
        config
    }
}
