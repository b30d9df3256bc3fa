//! The per-method forward pass.
//!
//! The pass walks the decoded instruction stream once and decides, for every instruction,
//! which hook code goes in front of it and which goes after it. Nothing is laid out here;
//! offsets are assigned by [`crate::instrument::layout`].
//!
//! Scalar allocations are bracketed across their constructor call: the pre hook runs before
//! `new`, the post hook after the `invokespecial <init>` that completes the object. While
//! the constructor arguments are evaluated the allocation is *pending*; pending allocations
//! nest (`new A(new B())`) and are matched last-in first-out. Each pending allocation keeps
//! its hook token in its own local slot, so an inner site never clobbers an outer token.
//!
//! Local layout of a rewritten method, with `base` the original `max_locals`:
//!
//! | slot                | use                                      |
//! |---------------------|------------------------------------------|
//! | `base`              | scratch `int[]` for spilled dimensions   |
//! | `base + 1 + depth`  | token of the site at pending depth       |

use crate::{
    assembly::{decode_stream, opcodes, Instruction, Operand},
    classfile::{constpool::ConstantPool, CodeAttribute},
    instrument::{
        config::RewriterConfig,
        hooks::HookEmitter,
        sites::{classify, AllocationKind, AllocationSite},
    },
    Error, Result,
};

const INIT: &[u8] = b"<init>";

/// The result of the forward pass over one method.
#[derive(Debug)]
pub(crate) struct MethodPlan {
    /// The original instructions
    pub instructions: Vec<Instruction>,
    /// Code to insert before each instruction
    pub prefixes: Vec<Vec<u8>>,
    /// Code to insert after each instruction
    pub suffixes: Vec<Vec<u8>>,
    /// Pending scalar allocations in front of each instruction
    pub pending: Vec<u16>,
    /// Every site found, in code order
    pub sites: Vec<AllocationSite>,
    /// The original `max_locals`
    pub base_locals: u16,
    /// Number of token slots used above the scratch slot
    pub token_slots: u16,
}

struct Pending {
    site: AllocationSite,
    class: Vec<u8>,
    token: u16,
}

/// Run the forward pass. Returns `Ok(None)` when the method has no allocation sites.
///
/// # Errors
/// Returns [`Error::Rewrite`] for allocation idioms that cannot be bracketed (a `new` that
/// is not followed by `dup`, a `new` whose constructor is never called) and
/// [`Error::LimitExceeded`] when too many allocations are pending at once.
pub(crate) fn plan_method(
    class_name: &str,
    method_name: &str,
    code: &CodeAttribute,
    pool: &mut ConstantPool,
    emitter: &mut HookEmitter<'_>,
    config: &RewriterConfig,
) -> Result<Option<MethodPlan>> {
    let instructions = decode_stream(&code.code)?;
    let count = instructions.len();
    let base_locals = code.max_locals;
    let scratch = base_locals;

    let mut prefixes = vec![Vec::new(); count];
    let mut suffixes = vec![Vec::new(); count];
    let mut pending_before = Vec::with_capacity(count);
    let mut sites = Vec::new();
    let mut pending: Vec<Pending> = Vec::new();
    let mut token_slots: u16 = 0;

    for (index, instruction) in instructions.iter().enumerate() {
        let depth = pending.len();
        #[allow(clippy::cast_possible_truncation)]
        pending_before.push(depth as u16);

        if let Some(site) = classify(pool, instruction, index, config.instrument_reflection)? {
            let token = token_slot(base_locals, depth)?;
            token_slots = token_slots.max(token - base_locals);

            log::trace!(
                "{}.{}: {} site at offset {} ({})",
                class_name,
                method_name,
                site.kind,
                site.offset,
                String::from_utf8_lossy(&site.descriptor)
            );

            prefixes[index] = emitter.before(pool, &site, scratch, token)?;
            if site.kind == AllocationKind::Scalar {
                if instructions.get(index + 1).map(|next| next.opcode) != Some(opcodes::DUP) {
                    return Err(rewrite_error!(
                        class_name,
                        "new {} at offset {} in {} is not followed by dup",
                        String::from_utf8_lossy(site.result_class.as_deref().unwrap_or_default()),
                        site.offset,
                        method_name
                    ));
                }
                if depth >= config.max_allocation_nesting {
                    return Err(Error::LimitExceeded {
                        what: "pending allocation nesting",
                        limit: config.max_allocation_nesting,
                    });
                }
                pending.push(Pending {
                    class: site.result_class.clone().unwrap_or_default(),
                    site: site.clone(),
                    token,
                });
            } else {
                suffixes[index] = emitter.after(pool, &site, token)?;
            }
            sites.push(site);
            continue;
        }

        // A constructor call for anything but the innermost pending class (super(), this())
        // leaves the pending stack alone.
        let matched = match pending.last() {
            Some(top) => completes(pool, instruction, &top.class)?,
            None => false,
        };
        if matched {
            if let Some(done) = pending.pop() {
                suffixes[index] = emitter.after(pool, &done.site, done.token)?;
            }
        }
    }

    if let Some(open) = pending.last() {
        return Err(rewrite_error!(
            class_name,
            "new {} in {} never reaches its constructor call",
            String::from_utf8_lossy(&open.class),
            method_name
        ));
    }

    if sites.is_empty() {
        return Ok(None);
    }

    Ok(Some(MethodPlan {
        instructions,
        prefixes,
        suffixes,
        pending: pending_before,
        sites,
        base_locals,
        token_slots,
    }))
}

/// Local slot holding the token of a site at `depth` pending allocations.
fn token_slot(base_locals: u16, depth: usize) -> Result<u16> {
    u16::try_from(usize::from(base_locals) + 1 + depth).map_err(|_| Error::LimitExceeded {
        what: "local variable slots",
        limit: usize::from(u16::MAX),
    })
}

/// Whether the instruction is the constructor call that completes a pending `new` of `class`.
fn completes(pool: &ConstantPool, instruction: &Instruction, class: &[u8]) -> Result<bool> {
    let (opcodes::INVOKESPECIAL, Operand::Constant(method)) =
        (instruction.opcode, &instruction.operand)
    else {
        return Ok(false);
    };
    let member = pool.member_ref(*method)?;
    Ok(member.name == INIT && member.owner == class)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::config::HookBinding;

    fn code(max_locals: u16, bytes: Vec<u8>) -> CodeAttribute {
        CodeAttribute {
            max_stack: 4,
            max_locals,
            code: bytes,
            exception_table: Vec::new(),
            attributes: Vec::new(),
        }
    }

    fn plan(pool: &mut ConstantPool, attribute: &CodeAttribute) -> Result<Option<MethodPlan>> {
        let binding = HookBinding::default();
        let mut emitter = HookEmitter::new(&binding);
        plan_method(
            "demo/Test",
            "run",
            attribute,
            pool,
            &mut emitter,
            &RewriterConfig::default(),
        )
    }

    #[test]
    fn no_sites_no_plan() {
        let mut pool = ConstantPool::new();
        let attribute = code(1, vec![opcodes::ICONST_0, opcodes::IRETURN]);
        assert!(plan(&mut pool, &attribute).unwrap().is_none());
        assert_eq!(pool.count(), 1);
    }

    #[test]
    fn nested_scalars_use_separate_tokens() {
        let mut pool = ConstantPool::new();
        let outer = pool.add_class("demo/Outer").unwrap();
        let inner = pool.add_class("demo/Inner").unwrap();
        let outer_init = pool
            .add_methodref("demo/Outer", "<init>", "(Ldemo/Inner;)V")
            .unwrap();
        let inner_init = pool.add_methodref("demo/Inner", "<init>", "()V").unwrap();

        let [oh, ol] = outer.to_be_bytes();
        let [ih, il] = inner.to_be_bytes();
        let [oih, oil] = outer_init.to_be_bytes();
        let [iih, iil] = inner_init.to_be_bytes();
        let attribute = code(
            2,
            vec![
                opcodes::NEW, oh, ol, // 0
                opcodes::DUP,        // 1
                opcodes::NEW, ih, il, // 2
                opcodes::DUP,        // 3
                opcodes::INVOKESPECIAL, iih, iil, // 4
                opcodes::INVOKESPECIAL, oih, oil, // 5
                opcodes::ARETURN,    // 6
            ],
        );

        let plan = plan(&mut pool, &attribute).unwrap().unwrap();
        assert_eq!(plan.sites.len(), 2);
        assert_eq!(plan.pending, vec![0, 1, 1, 2, 2, 1, 0]);
        assert_eq!(plan.token_slots, 2);

        // outer token in slot 3, inner token in slot 4
        assert_eq!(*plan.prefixes[0].last().unwrap(), opcodes::ASTORE_3);
        assert_eq!(&plan.prefixes[2][plan.prefixes[2].len() - 2..], &[opcodes::ASTORE, 4]);
        assert_eq!(&plan.suffixes[4][..2], &[opcodes::ALOAD, 4]);
        assert_eq!(plan.suffixes[5][0], opcodes::ALOAD_3);
        assert!(plan.suffixes[0].is_empty());
    }

    #[test]
    fn arrays_bracket_in_place() {
        let mut pool = ConstantPool::new();
        let attribute = code(
            0,
            vec![opcodes::ICONST_4, opcodes::NEWARRAY, 10, opcodes::ARETURN],
        );

        let plan = plan(&mut pool, &attribute).unwrap().unwrap();
        assert_eq!(plan.sites.len(), 1);
        assert!(!plan.prefixes[1].is_empty());
        assert!(!plan.suffixes[1].is_empty());
        assert_eq!(plan.token_slots, 1);
        assert_eq!(plan.base_locals, 0);
    }

    #[test]
    fn new_without_dup_is_rejected() {
        let mut pool = ConstantPool::new();
        let widget = pool.add_class("demo/Widget").unwrap();
        let [hi, lo] = widget.to_be_bytes();
        let attribute = code(1, vec![opcodes::NEW, hi, lo, opcodes::ASTORE_0, opcodes::RETURN]);

        let error = plan(&mut pool, &attribute).unwrap_err();
        assert!(matches!(error, Error::Rewrite { .. }), "{error}");
    }

    #[test]
    fn unfinished_new_is_rejected() {
        let mut pool = ConstantPool::new();
        let widget = pool.add_class("demo/Widget").unwrap();
        let [hi, lo] = widget.to_be_bytes();
        let attribute = code(1, vec![opcodes::NEW, hi, lo, opcodes::DUP, opcodes::ARETURN]);

        let error = plan(&mut pool, &attribute).unwrap_err();
        assert!(error.to_string().contains("never reaches"), "{error}");
    }

    #[test]
    fn nesting_limit() {
        let mut pool = ConstantPool::new();
        let widget = pool.add_class("demo/Widget").unwrap();
        let [hi, lo] = widget.to_be_bytes();
        let mut bytes = Vec::new();
        for _ in 0..3 {
            bytes.extend_from_slice(&[opcodes::NEW, hi, lo, opcodes::DUP]);
        }
        bytes.push(opcodes::RETURN);
        let attribute = code(1, bytes);

        let binding = HookBinding::default();
        let mut emitter = HookEmitter::new(&binding);
        let config = RewriterConfig {
            max_allocation_nesting: 2,
            ..RewriterConfig::default()
        };
        let error = plan_method("demo/T", "run", &attribute, &mut pool, &mut emitter, &config)
            .unwrap_err();
        assert!(error.is_resource_exhaustion());
    }
}
