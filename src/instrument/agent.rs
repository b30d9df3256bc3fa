//! One-time installation of the gate with the host.

use std::sync::Arc;

use crate::instrument::gate::{ClassFileTransformer, Transformer};

/// The host's instrumentation facility, as far as installation needs it.
pub trait Instrumentation {
    /// Whether already loaded classes can be retransformed.
    fn is_retransform_classes_supported(&self) -> bool;

    /// Register a class-load hook. `can_retransform` asks the host to also call it for
    /// retransformations.
    fn add_transformer(&self, transformer: Arc<dyn ClassFileTransformer>, can_retransform: bool);
}

/// The result of [`install`].
#[derive(Debug, Clone)]
pub struct Installation {
    /// The installed gate
    pub transformer: Arc<Transformer>,
    /// What the host reported for retransformation support
    pub can_retransform: bool,
}

/// Register the gate with the host.
///
/// The retransformation capability is queried once and passed on as reported.
pub fn install<I: Instrumentation + ?Sized>(
    instrumentation: &I,
    transformer: Transformer,
) -> Installation {
    let can_retransform = instrumentation.is_retransform_classes_supported();
    let transformer = Arc::new(transformer);
    instrumentation.add_transformer(transformer.clone(), can_retransform);
    log::info!(
        "Allocation instrumentation installed (retransformation {})",
        if can_retransform { "supported" } else { "unsupported" }
    );
    Installation {
        transformer,
        can_retransform,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{RegistrationSet, TransformerConfig};
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    #[derive(Default)]
    struct Host {
        retransform: bool,
        queries: AtomicUsize,
        installed: Mutex<Vec<bool>>,
    }

    impl Instrumentation for Host {
        fn is_retransform_classes_supported(&self) -> bool {
            self.queries.fetch_add(1, Ordering::SeqCst);
            self.retransform
        }

        fn add_transformer(
            &self,
            _transformer: Arc<dyn ClassFileTransformer>,
            can_retransform: bool,
        ) {
            self.installed.lock().unwrap().push(can_retransform);
        }
    }

    #[test]
    fn flag_is_passed_through() {
        for retransform in [true, false] {
            let host = Host {
                retransform,
                ..Host::default()
            };
            let registry = Arc::new(RegistrationSet::new());
            let gate = Transformer::new(registry, TransformerConfig::default());
            let installation = install(&host, gate);

            assert_eq!(installation.can_retransform, retransform);
            assert_eq!(host.queries.load(Ordering::SeqCst), 1);
            assert_eq!(*host.installed.lock().unwrap(), vec![retransform]);
        }
    }
}
