//! Which classes are never handed to the rewriter.
//!
//! Two groups of classes must stay untouched regardless of registration:
//!
//! - the classes implementing the hooks. Hook bodies allocate, so instrumenting them would
//!   call back into themselves without end;
//! - the classes the hook call itself needs before it can run: `Object`, `Class`, `String`,
//!   `Thread` and `ThreadLocal` (hook implementations keep per-thread state), reflection and
//!   method-handle machinery, and the JDK internals behind them.
//!
//! Names are matched by prefix on the internal (slash-separated) name. Loader scoping is an
//! additional, optional rule: with [`ExclusionPolicy::skip_bootstrap_loader`] every class
//! defined by the bootstrap loader is left alone.

use crate::instrument::HookBinding;

/// Name prefixes of bootstrap-critical classes.
///
/// `java/lang/Thread` also covers `ThreadLocal`, `ThreadGroup` and friends.
pub const BOOTSTRAP_PREFIXES: &[&str] = &[
    "java/lang/Object",
    "java/lang/Class",
    "java/lang/String",
    "java/lang/Thread",
    "java/lang/reflect/",
    "java/lang/invoke/",
    "jdk/internal/",
];

/// Name and loader rules applied before registration is consulted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExclusionPolicy {
    /// Internal-name prefixes that are never rewritten
    pub prefixes: Vec<String>,
    /// Never rewrite classes defined by the bootstrap loader
    pub skip_bootstrap_loader: bool,
}

impl ExclusionPolicy {
    /// The hook binding's package plus [`BOOTSTRAP_PREFIXES`].
    ///
    /// For a hook class in the unnamed package the class name itself is used as prefix, so
    /// its nested classes are covered as well.
    #[must_use]
    pub fn for_hooks(hooks: &HookBinding) -> Self {
        let own = match hooks.package() {
            "" => hooks.owner.clone(),
            package => package.to_string(),
        };

        let mut prefixes = Vec::with_capacity(BOOTSTRAP_PREFIXES.len() + 1);
        prefixes.push(own);
        prefixes.extend(BOOTSTRAP_PREFIXES.iter().map(|p| (*p).to_string()));
        Self {
            prefixes,
            skip_bootstrap_loader: false,
        }
    }

    /// No exclusions at all; every registered class is rewritten.
    ///
    /// **Warning**: only safe when the hook classes can never be registered and the host
    /// never presents bootstrap classes.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Add one more excluded prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefixes.push(prefix.to_string());
        self
    }

    /// Whether the internal class name matches one of the prefixes.
    #[must_use]
    pub fn excludes_name(&self, class_name: &str) -> bool {
        self.prefixes
            .iter()
            .any(|prefix| class_name.starts_with(prefix.as_str()))
    }

    /// Whether a class with this name and defining loader must be left alone.
    ///
    /// `bootstrap_loader` is `true` when the class is defined by the bootstrap loader.
    #[must_use]
    pub fn excludes(&self, class_name: &str, bootstrap_loader: bool) -> bool {
        (self.skip_bootstrap_loader && bootstrap_loader) || self.excludes_name(class_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_covers_hooks_and_bootstrap() {
        let policy = ExclusionPolicy::for_hooks(&HookBinding::default());
        assert!(policy.excludes_name("sandbox/runtime/AllocationHooks"));
        assert!(policy.excludes_name("sandbox/runtime/Meter$State"));
        assert!(policy.excludes_name("java/lang/ThreadLocal$ThreadLocalMap"));
        assert!(policy.excludes_name("java/lang/ClassLoader"));
        assert!(policy.excludes_name("java/lang/reflect/Array"));
        assert!(policy.excludes_name("jdk/internal/misc/Unsafe"));

        assert!(!policy.excludes_name("sandbox/user/Widget"));
        assert!(!policy.excludes_name("java/util/ArrayList"));
        assert!(!policy.excludes_name("demo/Widget"));
    }

    #[test]
    fn loader_scoping() {
        let mut policy = ExclusionPolicy::for_hooks(&HookBinding::default());
        assert!(!policy.excludes("java/util/ArrayList", true));
        policy.skip_bootstrap_loader = true;
        assert!(policy.excludes("java/util/ArrayList", true));
        assert!(!policy.excludes("java/util/ArrayList", false));
    }

    #[test]
    fn custom_prefixes() {
        let policy = ExclusionPolicy::none().with_prefix("vendor/");
        assert!(policy.excludes_name("vendor/Lib"));
        assert!(!policy.excludes_name("java/lang/Object"));

        let unnamed = ExclusionPolicy::for_hooks(&HookBinding::with_owner("Hooks"));
        assert!(unnamed.excludes_name("Hooks$Inner"));
        assert!(!unnamed.excludes_name("Widget"));
    }
}
