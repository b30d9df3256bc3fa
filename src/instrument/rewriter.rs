//! The class rewriter.
//!
//! [`Rewriter::rewrite`] parses a class, runs the forward pass over every method that has
//! code, lays out and relocates the methods that contain allocation sites, lets the frame
//! computer rebuild their stack maps and writes the class back. Methods without sites and
//! everything outside the `Code` attributes stay byte-for-byte the same; the constant pool
//! only grows.

use std::{cell::Cell, sync::Arc};

use crate::{
    classfile::{ClassFile, CodeAttribute, MemberAccessFlags},
    instrument::{
        config::RewriterConfig,
        frames::{FrameComputer, FrameContext, StackMapRemapper},
        gate::LoaderRef,
        hooks::HookEmitter,
        layout::assemble,
        method::plan_method,
        sites::SiteCounts,
    },
    Error, Result,
};

/// Rewrites running on one thread at the same time. A second, nested rewrite means a
/// collaborator caused a class load while instrumenting.
const MAX_REWRITE_DEPTH: usize = 1;

thread_local! {
    static REWRITE_DEPTH: Cell<usize> = const { Cell::new(0) };
}

struct DepthGuard;

impl DepthGuard {
    fn enter() -> Result<DepthGuard> {
        REWRITE_DEPTH.with(|depth| {
            let current = depth.get();
            if current >= MAX_REWRITE_DEPTH {
                return Err(Error::RecursionLimit(MAX_REWRITE_DEPTH));
            }
            depth.set(current + 1);
            Ok(DepthGuard)
        })
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        REWRITE_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// What a rewrite did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteSummary {
    /// Methods whose code changed
    pub methods_rewritten: usize,
    /// Bracketed sites by kind
    pub sites: SiteCounts,
}

/// The output of a successful rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenClass {
    /// The complete rewritten class file
    pub bytes: Vec<u8>,
    /// What changed
    pub summary: RewriteSummary,
}

/// Splices hook calls around every allocation site of a class.
///
/// Holds no per-class state; one instance serves any number of threads.
///
/// # Examples
///
/// ```rust,no_run
/// use allocscope::instrument::{Rewriter, RewriterConfig};
///
/// let rewriter = Rewriter::new(RewriterConfig::default());
/// let original = std::fs::read("Widget.class")?;
/// let rewritten = rewriter.rewrite(&original, None)?;
/// println!("{} sites bracketed", rewritten.summary.sites.total());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Clone)]
pub struct Rewriter {
    config: RewriterConfig,
    frames: Arc<dyn FrameComputer>,
}

impl std::fmt::Debug for Rewriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rewriter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Rewriter {
    /// Rewriter with the default frame computer, [`StackMapRemapper`].
    #[must_use]
    pub fn new(config: RewriterConfig) -> Self {
        Self::with_frame_computer(config, Arc::new(StackMapRemapper))
    }

    /// Rewriter with a custom frame computer.
    #[must_use]
    pub fn with_frame_computer(config: RewriterConfig, frames: Arc<dyn FrameComputer>) -> Self {
        Rewriter { config, frames }
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &RewriterConfig {
        &self.config
    }

    /// Rewrite a class. `loader` is the defining loader (`None` for bootstrap) and is only
    /// passed on to the frame computer.
    ///
    /// The returned bytes are a new buffer even when no site was found.
    ///
    /// # Errors
    /// Any parse, rewrite or resource error; see [`crate::Error`]. The error is logged with
    /// the class name before it is returned.
    pub fn rewrite(&self, original: &[u8], loader: Option<&LoaderRef>) -> Result<RewrittenClass> {
        let mut class_name = String::from("<unparsed>");
        let result = DepthGuard::enter()
            .and_then(|_guard| self.rewrite_class(original, loader, &mut class_name));

        match result {
            Ok(rewritten) => {
                log::debug!(
                    "Instrumented {}: {} methods, sites: {}",
                    class_name,
                    rewritten.summary.methods_rewritten,
                    rewritten.summary.sites
                );
                Ok(rewritten)
            }
            Err(error) => {
                log::error!("Failed to instrument class {}: {}", class_name, error);
                Err(error)
            }
        }
    }

    fn rewrite_class(
        &self,
        original: &[u8],
        loader: Option<&LoaderRef>,
        class_name: &mut String,
    ) -> Result<RewrittenClass> {
        let mut class = ClassFile::parse(original)?;
        *class_name = class.display_name();
        let this_class = class.name()?.to_vec();
        let major_version = class.major_version;

        let mut emitter = HookEmitter::new(&self.config.hooks);
        let mut summary = RewriteSummary::default();
        let ClassFile {
            constant_pool: pool,
            methods,
            ..
        } = &mut class;

        for method in methods.iter_mut() {
            let Some(code_index) = method.code_index(pool) else {
                continue;
            };
            let code = CodeAttribute::parse(&method.attributes[code_index].info)?;
            let method_name = pool.utf8(method.name_index)?.to_vec();
            let descriptor = pool.utf8(method.descriptor_index)?.to_vec();
            let display = String::from_utf8_lossy(&method_name).into_owned();

            let Some(plan) = plan_method(
                class_name.as_str(),
                &display,
                &code,
                pool,
                &mut emitter,
                &self.config,
            )?
            else {
                continue;
            };

            let (mut rewritten, remap) = assemble(class_name.as_str(), &code, &plan, pool)?;
            let context = FrameContext {
                class_name: &this_class,
                method_name: &method_name,
                descriptor: &descriptor,
                is_static: method.flags().contains(MemberAccessFlags::STATIC),
                major_version,
                loader,
            };
            self.frames.compute(&context, pool, &mut rewritten, &remap)?;

            method.attributes[code_index].info = rewritten.to_bytes()?;
            summary.methods_rewritten += 1;
            for site in &plan.sites {
                summary.sites.record(site.kind);
            }
        }

        Ok(RewrittenClass {
            bytes: class.to_bytes()?,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::opcodes,
        classfile::constpool::ConstantPool,
        instrument::{
            config::{PRE_ALLOCATE_DESCRIPTOR, PRE_ALLOCATE_REFLECTIVE_DESCRIPTOR},
            frames::{decode_frames, initial_locals, VerificationType},
            layout::CodeRemap,
            sites::AllocationKind,
            DEFAULT_HOOK_OWNER,
        },
        test::*,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Reentrant {
        calls: AtomicUsize,
        nested: std::sync::Mutex<Option<String>>,
    }

    impl FrameComputer for Reentrant {
        fn compute(
            &self,
            _context: &FrameContext<'_>,
            _pool: &mut ConstantPool,
            _code: &mut CodeAttribute,
            _remap: &CodeRemap,
        ) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // a collaborator that loads another class while a rewrite is running
            let nested = Rewriter::new(RewriterConfig::default()).rewrite(&[], None);
            if let Ok(mut slot) = self.nested.lock() {
                *slot = nested.err().map(|e| e.to_string());
            }
            Ok(())
        }
    }

    fn rewrite(original: &[u8]) -> (ClassFile, RewriteSummary) {
        let rewritten = Rewriter::new(RewriterConfig::default())
            .rewrite(original, None)
            .unwrap();
        (ClassFile::parse(&rewritten.bytes).unwrap(), rewritten.summary)
    }

    #[test]
    fn primitive_array_bracketed() {
        let (class, summary) = rewrite(&widget_array_class());
        assert_eq!(summary.methods_rewritten, 1);
        assert_eq!(summary.sites.get(AllocationKind::PrimitiveArray), 1);
        assert_eq!(summary.sites.total(), 1);

        let code = method_code(&class, "make");
        let calls = calls_to(&class, &code, DEFAULT_HOOK_OWNER);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "preAllocate");
        assert_eq!(calls[0].descriptor, PRE_ALLOCATE_DESCRIPTOR);
        assert_eq!(calls[1].name, "postAllocate");

        let decoded = instructions(&code);
        let ldc = &decoded[calls[0].index - 2];
        assert_eq!(ldc_string(&class, ldc).as_deref(), Some(&b"I"[..]));

        // the length 4 is stored at index 0 of the int[1] in the scratch slot, which is the
        // array the pre hook receives
        let spill: Vec<u8> = decoded[..9].iter().map(|i| i.opcode).collect();
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
        assert_eq!(decoded[calls[0].index - 1].opcode, opcodes::ALOAD_0);
        let reload: Vec<u8> = decoded[calls[0].index + 2..calls[0].index + 5]
            .iter()
            .map(|i| i.opcode)
            .collect();
        assert_eq!(reload, vec![opcodes::ALOAD_0, opcodes::ICONST_0, opcodes::IALOAD]);

        // pre, token store, count reload, the allocation, post, cast
        let site = decoded
            .iter()
            .rposition(|i| i.opcode == opcodes::NEWARRAY)
            .unwrap();
        assert!(calls[0].index < site && site < calls[1].index);
        assert_eq!(decoded[calls[1].index + 1].opcode, opcodes::CHECKCAST);
        assert_eq!(decoded.last().unwrap().opcode, opcodes::ARETURN);
        assert_eq!(code.max_locals, 2);
    }

    #[test]
    fn scalar_post_follows_constructor() {
        let (class, summary) = rewrite(&scalar_class());
        assert_eq!(summary.sites.get(AllocationKind::Scalar), 1);

        let code = method_code(&class, "create");
        let decoded = instructions(&code);
        let calls = calls_to(&class, &code, DEFAULT_HOOK_OWNER);
        assert_eq!(calls.len(), 2);

        let new = decoded.iter().position(|i| i.opcode == opcodes::NEW).unwrap();
        let init = decoded
            .iter()
            .position(|i| i.opcode == opcodes::INVOKESPECIAL)
            .unwrap();
        assert_eq!(decoded[calls[0].index - 1].opcode, opcodes::ACONST_NULL);
        assert!(calls[0].index < new);
        assert_eq!(decoded[new + 1].opcode, opcodes::DUP);
        assert_eq!(calls[1].index, init + 3);
        assert_eq!(decoded[init + 2].opcode, opcodes::SWAP);
        assert_eq!(decoded[calls[1].index + 1].opcode, opcodes::CHECKCAST);

        let ldc = &decoded[calls[0].index - 2];
        assert_eq!(ldc_string(&class, ldc).as_deref(), Some(&b"Ldemo/Widget;"[..]));
    }

    #[test]
    fn frames_follow_pending_constructor() {
        let (mut class, _) = rewrite(&ternary_constructor_class());
        let code = method_code(&class, "make");
        let decoded = instructions(&code);

        let new = decoded.iter().find(|i| i.opcode == opcodes::NEW).unwrap();
        let ifeq = decoded.iter().find(|i| i.opcode == opcodes::IFEQ).unwrap();
        let goto = decoded.iter().find(|i| i.opcode == opcodes::GOTO).unwrap();

        let context = FrameContext {
            class_name: b"demo/Boxes",
            method_name: b"make",
            descriptor: b"(I)Ljava/lang/Object;",
            is_static: true,
            major_version: 52,
            loader: None,
        };
        let initial = initial_locals(&context, &mut class.constant_pool).unwrap();
        let table = code
            .attributes
            .iter()
            .find(|a| class.constant_pool.utf8(a.name_index).unwrap() == b"StackMapTable")
            .unwrap();
        let frames = decode_frames(&table.info, &initial).unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!(ifeq.branch_targets(), vec![frames[0].offset]);
        assert_eq!(goto.branch_targets(), vec![frames[1].offset]);
        for frame in &frames {
            assert_eq!(frame.stack[0], VerificationType::Uninitialized(new.offset));
            // int parameter, scratch slot, token of the pending `new`
            assert_eq!(frame.locals.len(), 3);
            assert_eq!(frame.locals[1], VerificationType::Top);
            let VerificationType::Object(token) = frame.locals[2] else {
                panic!("expected token local, got {:?}", frame.locals[2]);
            };
            assert_eq!(
                class.constant_pool.class_name(token).unwrap(),
                b"java/lang/Object"
            );
        }
        assert_eq!(code.max_locals, 3);
    }

    #[test]
    fn reflective_and_multi_dimensional() {
        let (class, summary) = rewrite(&reflective_class());
        assert_eq!(summary.methods_rewritten, 3);
        assert_eq!(summary.sites.get(AllocationKind::ReflectiveArray), 2);
        assert_eq!(summary.sites.get(AllocationKind::MultiArray), 1);

        for name in ["row", "cube"] {
            let code = method_code(&class, name);
            let decoded = instructions(&code);
            let calls = calls_to(&class, &code, DEFAULT_HOOK_OWNER);
            assert_eq!(calls.len(), 2, "{name}");
            assert_eq!(calls[0].descriptor, PRE_ALLOCATE_REFLECTIVE_DESCRIPTOR);
            // the post result is returned as is
            assert_eq!(decoded[calls[1].index + 1].opcode, opcodes::ARETURN);
        }

        let code = method_code(&class, "grid");
        let decoded = instructions(&code);
        let calls = calls_to(&class, &code, DEFAULT_HOOK_OWNER);
        let ldc = &decoded[calls[0].index - 2];
        assert_eq!(ldc_string(&class, ldc).as_deref(), Some(&b"J"[..]));
    }

    #[test]
    fn reflection_can_be_disabled() {
        let rewriter = Rewriter::new(RewriterConfig::instructions_only());
        let rewritten = rewriter.rewrite(&reflective_class(), None).unwrap();
        assert_eq!(rewritten.summary.methods_rewritten, 1);
        assert_eq!(rewritten.summary.sites.get(AllocationKind::ReflectiveArray), 0);
    }

    #[test]
    fn methods_without_sites_untouched() {
        let original = ClassFile::parse(&sites_class("demo/None", 0)).unwrap();
        let (class, summary) = rewrite(&sites_class("demo/None", 0));
        assert_eq!(summary, RewriteSummary::default());
        assert_eq!(method_code(&class, "run"), method_code(&original, "run"));
    }

    #[test]
    fn nested_rewrite_is_refused() {
        let frames = Arc::new(Reentrant::default());
        let rewriter = Rewriter::with_frame_computer(RewriterConfig::default(), frames.clone());
        rewriter.rewrite(&widget_array_class(), None).unwrap();

        assert_eq!(frames.calls.load(Ordering::SeqCst), 1);
        let nested = frames.nested.lock().unwrap().clone().unwrap();
        assert!(nested.contains("recursion"), "{nested}");

        // the guard is released again
        assert!(rewriter.rewrite(&widget_array_class(), None).is_ok());
    }

    #[test]
    fn parse_errors_propagate() {
        let rewriter = Rewriter::new(RewriterConfig::default());
        assert!(matches!(rewriter.rewrite(&[], None), Err(Error::Empty)));
        assert!(rewriter.rewrite(&[0xCA, 0xFE, 0xBA], None).is_err());
    }
}
