//! Integration tests for the transform gate: registration, exclusion and installation.

mod common;

use std::sync::{Arc, Mutex};

use allocscope::{
    instrument::{DEFAULT_HOOK_OWNER, DEFAULT_POST_ALLOCATE, DEFAULT_PRE_ALLOCATE},
    prelude::*,
};
use common::*;

const WIDGET: TypeHandle = TypeHandle(1);
const OTHER: TypeHandle = TypeHandle(2);

fn load<'a>(
    name: &'a str,
    class: TypeHandle,
    loader: Option<&'a LoaderRef>,
    bytes: &'a [u8],
) -> LoadEvent<'a> {
    LoadEvent {
        loader,
        class_name: name,
        class: Some(class),
        protection_domain: None,
        class_bytes: bytes,
    }
}

fn gate(config: TransformerConfig) -> Transformer {
    init_logging();
    Transformer::new(Arc::new(RegistrationSet::new()), config)
}

#[test]
fn registered_class_is_bracketed() -> Result<()> {
    let gate = gate(TransformerConfig::default());
    gate.registry().register(WIDGET);

    let original = widget_class();
    let app = LoaderRef(7);
    let TransformOutcome::Replaced(rewritten) =
        gate.transform(&load("demo/Widget", WIDGET, Some(&app), &original))?
    else {
        panic!("registered class was not rewritten");
    };

    let class = ClassFile::parse(&rewritten)?;
    let calls = hook_calls(&class, DEFAULT_HOOK_OWNER);
    assert_eq!(
        calls,
        vec![DEFAULT_PRE_ALLOCATE.to_string(), DEFAULT_POST_ALLOCATE.to_string()]
    );

    // the length 4 reaches the pre hook through the spilled dimensions array
    let code = method_code(&class, "make");
    let spill: Vec<u8> = decode_stream(&code.code)?
        .iter()
        .take(9)
        .map(|i| i.opcode)
        .collect();
    assert_eq!(
        spill,
        vec![
            opcodes::ICONST_4,
            opcodes::ICONST_1,
            opcodes::NEWARRAY,
            opcodes::ASTORE_0,
            opcodes::ALOAD_0,
            opcodes::SWAP,
            opcodes::ICONST_0,
            opcodes::SWAP,
            opcodes::IASTORE,
        ]
    );

    // everything outside the method body is carried over
    let before = ClassFile::parse(&original)?;
    assert_eq!(class.display_name(), before.display_name());
    assert_eq!(class.methods.len(), before.methods.len());
    assert_eq!(class.major_version, before.major_version);
    Ok(())
}

#[test]
fn unregistered_class_untouched() -> Result<()> {
    let gate = gate(TransformerConfig::default());
    gate.registry().register(WIDGET);

    let original = sites_class("demo/Other", 10);
    let event = load("demo/Other", OTHER, Some(&LoaderRef(7)), &original);
    assert_eq!(gate.decide(&event), GateDecision::Unregistered);
    assert_eq!(gate.transform(&event)?, TransformOutcome::NoChange);

    // no handle at all, e.g. a class that is being defined for the first time
    let anonymous = LoadEvent {
        class: None,
        ..event
    };
    assert_eq!(gate.transform(&anonymous)?, TransformOutcome::NoChange);
    Ok(())
}

#[test]
fn registration_takes_effect_for_later_loads() -> Result<()> {
    let gate = gate(TransformerConfig::default());
    let original = sites_class("demo/Late", 2);
    let event = load("demo/Late", OTHER, Some(&LoaderRef(3)), &original);

    assert_eq!(gate.transform(&event)?, TransformOutcome::NoChange);
    assert!(gate.registry().register(OTHER));
    assert!(!gate.registry().register(OTHER));
    assert!(matches!(gate.transform(&event)?, TransformOutcome::Replaced(_)));
    Ok(())
}

#[test]
fn excluded_classes_never_rewritten() -> Result<()> {
    let gate = gate(TransformerConfig::default());
    let app = LoaderRef(7);
    let original = widget_class();

    for (i, name) in [
        "sandbox/runtime/AllocationHooks",
        "sandbox/runtime/HookState",
        "java/lang/Object",
        "java/lang/ThreadLocal",
        "java/lang/reflect/Array",
        "jdk/internal/misc/Unsafe",
    ]
    .into_iter()
    .enumerate()
    {
        let handle = TypeHandle(100 + i as u64);
        gate.registry().register(handle);
        let event = load(name, handle, Some(&app), &original);
        assert_eq!(gate.decide(&event), GateDecision::Excluded, "{name}");
        // asking again changes nothing
        assert_eq!(gate.transform(&event)?, TransformOutcome::NoChange, "{name}");
        assert_eq!(gate.transform(&event)?, TransformOutcome::NoChange, "{name}");
    }

    // outside the bootstrap prefixes, java/lang classes are ordinary
    gate.registry().register(TypeHandle(200));
    let event = load("java/lang/Integer", TypeHandle(200), Some(&app), &original);
    assert_eq!(gate.decide(&event), GateDecision::Rewrite);
    Ok(())
}

#[test]
fn strict_config_skips_bootstrap_loader() -> Result<()> {
    let original = widget_class();

    let lenient = gate(TransformerConfig::default());
    lenient.registry().register(WIDGET);
    let event = load("demo/Widget", WIDGET, None, &original);
    assert!(matches!(lenient.transform(&event)?, TransformOutcome::Replaced(_)));

    let strict = gate(TransformerConfig::strict());
    strict.registry().register(WIDGET);
    assert_eq!(strict.decide(&event), GateDecision::Excluded);
    assert_eq!(strict.transform(&event)?, TransformOutcome::NoChange);

    let app = LoaderRef(1);
    let event = load("demo/Widget", WIDGET, Some(&app), &original);
    assert_eq!(strict.decide(&event), GateDecision::Rewrite);
    Ok(())
}

#[test]
fn custom_hook_package_is_excluded() -> Result<()> {
    let hooks = HookBinding::with_owner("acme/guard/Hooks");
    let gate = gate(TransformerConfig::with_hooks(hooks));
    gate.registry().register(WIDGET);
    gate.registry().register(OTHER);

    let original = widget_class();
    let app = LoaderRef(1);
    let event = load("acme/guard/Budget", OTHER, Some(&app), &original);
    assert_eq!(gate.transform(&event)?, TransformOutcome::NoChange);

    let event = load("demo/Widget", WIDGET, Some(&app), &original);
    let TransformOutcome::Replaced(rewritten) = gate.transform(&event)? else {
        panic!("registered class was not rewritten");
    };
    let class = ClassFile::parse(&rewritten)?;
    assert_eq!(hook_calls(&class, "acme/guard/Hooks").len(), 2);
    assert!(hook_calls(&class, DEFAULT_HOOK_OWNER).is_empty());
    Ok(())
}

#[test]
fn malformed_registered_class_fails() {
    let gate = gate(TransformerConfig::default());
    gate.registry().register(WIDGET);

    let mut truncated = widget_class();
    truncated.truncate(truncated.len() / 2);
    let app = LoaderRef(1);

    let result = gate.transform(&load("demo/Widget", WIDGET, Some(&app), &truncated));
    assert!(result.is_err());

    let result = gate.transform(&load("demo/Widget", WIDGET, Some(&app), &[]));
    assert!(matches!(result, Err(Error::Empty)));
}

#[derive(Default)]
struct Host {
    retransform: bool,
    installed: Mutex<Vec<(Arc<dyn ClassFileTransformer>, bool)>>,
}

impl Instrumentation for Host {
    fn is_retransform_classes_supported(&self) -> bool {
        self.retransform
    }

    fn add_transformer(&self, transformer: Arc<dyn ClassFileTransformer>, can_retransform: bool) {
        self.installed
            .lock()
            .unwrap()
            .push((transformer, can_retransform));
    }
}

#[test]
fn installed_gate_serves_loads() -> Result<()> {
    init_logging();
    let host = Host {
        retransform: true,
        ..Host::default()
    };
    let registry = Arc::new(RegistrationSet::new());
    let installation = install(
        &host,
        Transformer::new(Arc::clone(&registry), TransformerConfig::default()),
    );
    assert!(installation.can_retransform);

    let installed = host.installed.lock().unwrap();
    assert_eq!(installed.len(), 1);
    let (hook, can_retransform) = &installed[0];
    assert!(*can_retransform);

    // registering through the shared set is seen by the installed hook
    registry.register(WIDGET);
    let original = widget_class();
    let app = LoaderRef(9);
    let event = load("demo/Widget", WIDGET, Some(&app), &original);
    assert!(matches!(hook.transform(&event)?, TransformOutcome::Replaced(_)));
    assert!(Arc::ptr_eq(installation.transformer.registry(), &registry));
    Ok(())
}
