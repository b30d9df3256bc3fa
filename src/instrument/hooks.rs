//! The hook-call sequences spliced around allocation sites.
//!
//! Every sequence is straight-line code without branches. Pre sequences run before the
//! allocating instruction and leave the operand stack exactly as they found it; post
//! sequences run after the allocation completed and replace the reference on top of the
//! stack with the result of the post-allocation hook.
//!
//! Local slots used by the sequences are assigned by the caller: one scratch slot holding
//! the `int[]` of dimensions while the counts are being spilled, and one token slot per
//! site holding the pre-hook result until the post hook runs.

use crate::{
    assembly::{opcodes, InstructionEncoder},
    classfile::{constpool::ConstantPool, descriptor::primitive_for_atype},
    instrument::{
        config::{
            HookBinding, POST_ALLOCATE_DESCRIPTOR, PRE_ALLOCATE_DESCRIPTOR,
            PRE_ALLOCATE_REFLECTIVE_DESCRIPTOR,
        },
        sites::{AllocationSite, Dimensions},
    },
    Result,
};

/// `newarray` type code for `int`.
const T_INT: u8 = 10;

/// Extra operand-stack slots a rewritten method may need on top of its original maximum.
pub const STACK_HEADROOM: u16 = 4;

/// Builds hook-call sequences, resolving the hook methods in the constant pool on first use.
pub(crate) struct HookEmitter<'a> {
    binding: &'a HookBinding,
    pre: Option<u16>,
    pre_reflective: Option<u16>,
    post: Option<u16>,
}

impl<'a> HookEmitter<'a> {
    pub(crate) fn new(binding: &'a HookBinding) -> Self {
        HookEmitter {
            binding,
            pre: None,
            pre_reflective: None,
            post: None,
        }
    }

    fn pre(&mut self, pool: &mut ConstantPool) -> Result<u16> {
        if let Some(index) = self.pre {
            return Ok(index);
        }
        let index = pool.add_methodref(
            &self.binding.owner,
            &self.binding.pre_allocate,
            PRE_ALLOCATE_DESCRIPTOR,
        )?;
        self.pre = Some(index);
        Ok(index)
    }

    fn pre_reflective(&mut self, pool: &mut ConstantPool) -> Result<u16> {
        if let Some(index) = self.pre_reflective {
            return Ok(index);
        }
        let index = pool.add_methodref(
            &self.binding.owner,
            &self.binding.pre_allocate,
            PRE_ALLOCATE_REFLECTIVE_DESCRIPTOR,
        )?;
        self.pre_reflective = Some(index);
        Ok(index)
    }

    fn post(&mut self, pool: &mut ConstantPool) -> Result<u16> {
        if let Some(index) = self.post {
            return Ok(index);
        }
        let index = pool.add_methodref(
            &self.binding.owner,
            &self.binding.post_allocate,
            POST_ALLOCATE_DESCRIPTOR,
        )?;
        self.post = Some(index);
        Ok(index)
    }

    /// Code to run before the site.
    ///
    /// `new`: `ldc "LC;"`, `aconst_null`, `invokestatic pre`, `astore token`.
    ///
    /// Arrays with `n` counts: spill the counts into a fresh `int[n]` in the scratch slot,
    /// call `pre` with the element descriptor and that array, store the token, then push
    /// the counts back from the array.
    ///
    /// Reflection: `(Class, int)` spills the length the same way and passes the class
    /// (`dup`) with the one-element array; `(Class, int[])` passes both arguments (`dup2`).
    pub(crate) fn before(
        &mut self,
        pool: &mut ConstantPool,
        site: &AllocationSite,
        scratch: u16,
        token: u16,
    ) -> Result<Vec<u8>> {
        let mut encoder = InstructionEncoder::new();

        match (site.result_class.is_some(), site.dimensions) {
            (true, Dimensions::None) => {
                let descriptor = pool.add_string_bytes(site.descriptor.clone())?;
                let pre = self.pre(pool)?;
                encoder.emit_ldc(descriptor);
                encoder.emit_op(opcodes::ACONST_NULL);
                encoder.emit_invokestatic(pre);
                encoder.emit_astore(token);
            }
            (true, Dimensions::Counts(count)) => {
                let descriptor = pool.add_string_bytes(site.descriptor.clone())?;
                let pre = self.pre(pool)?;
                spill_counts(&mut encoder, count, scratch)?;
                encoder.emit_ldc(descriptor);
                encoder.emit_aload(scratch);
                encoder.emit_invokestatic(pre);
                encoder.emit_astore(token);
                reload_counts(&mut encoder, count, scratch)?;
            }
            (false, Dimensions::Counts(count)) => {
                let pre = self.pre_reflective(pool)?;
                spill_counts(&mut encoder, count, scratch)?;
                encoder.emit_op(opcodes::DUP);
                encoder.emit_aload(scratch);
                encoder.emit_invokestatic(pre);
                encoder.emit_astore(token);
                reload_counts(&mut encoder, count, scratch)?;
            }
            (false, Dimensions::Array) => {
                let pre = self.pre_reflective(pool)?;
                encoder.emit_op(opcodes::DUP2);
                encoder.emit_invokestatic(pre);
                encoder.emit_astore(token);
            }
            (_, dimensions) => {
                return Err(malformed_error!(
                    "{} site at offset {} cannot take {:?}",
                    site.kind,
                    site.offset,
                    dimensions
                ))
            }
        }

        Ok(encoder.finalize())
    }

    /// Code to run once the allocated reference is on top of the stack (after the
    /// constructor call for `new`): `aload token`, `swap`, `invokestatic post`, and a
    /// `checkcast` back to the allocated type unless the site is reflective.
    pub(crate) fn after(
        &mut self,
        pool: &mut ConstantPool,
        site: &AllocationSite,
        token: u16,
    ) -> Result<Vec<u8>> {
        let post = self.post(pool)?;
        let cast = match &site.result_class {
            Some(name) => Some(pool.add_class_bytes(name.clone())?),
            None => None,
        };

        let mut encoder = InstructionEncoder::new();
        encoder.emit_aload(token);
        encoder.emit_op(opcodes::SWAP);
        encoder.emit_invokestatic(post);
        if let Some(class) = cast {
            encoder.emit_checkcast(class);
        }
        Ok(encoder.finalize())
    }
}

/// Move `count` ints from the top of the stack into a new `int[count]` stored in `scratch`,
/// outermost dimension at index `0`.
fn spill_counts(encoder: &mut InstructionEncoder, count: u8, scratch: u16) -> Result<()> {
    debug_assert_eq!(primitive_for_atype(T_INT), Some(b'I'));

    encoder.emit_push_int(i32::from(count))?;
    encoder.emit_newarray(T_INT);
    encoder.emit_astore(scratch);
    for index in (0..count).rev() {
        encoder.emit_aload(scratch);
        encoder.emit_op(opcodes::SWAP);
        encoder.emit_push_int(i32::from(index))?;
        encoder.emit_op(opcodes::SWAP);
        encoder.emit_op(opcodes::IASTORE);
    }
    Ok(())
}

/// Push the counts stored by [`spill_counts`] back in their original order.
fn reload_counts(encoder: &mut InstructionEncoder, count: u8, scratch: u16) -> Result<()> {
    for index in 0..count {
        encoder.emit_aload(scratch);
        encoder.emit_push_int(i32::from(index))?;
        encoder.emit_op(opcodes::IALOAD);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::sites::AllocationKind;

    fn site(kind: AllocationKind, dimensions: Dimensions, result: Option<&[u8]>) -> AllocationSite {
        AllocationSite {
            kind,
            descriptor: b"I".to_vec(),
            dimensions,
            result_class: result.map(<[u8]>::to_vec),
            offset: 0,
            index: 0,
        }
    }

    #[test]
    fn scalar_sequences() {
        let binding = HookBinding::default();
        let mut pool = ConstantPool::new();
        let mut emitter = HookEmitter::new(&binding);
        let widget = site(
            AllocationKind::Scalar,
            Dimensions::None,
            Some(b"demo/Widget"),
        );

        let before = emitter.before(&mut pool, &widget, 3, 4).unwrap();
        assert_eq!(before[0], opcodes::LDC);
        assert_eq!(before[2], opcodes::ACONST_NULL);
        assert_eq!(before[3], opcodes::INVOKESTATIC);
        assert_eq!(before[6], opcodes::ASTORE);
        assert_eq!(before[7], 4);
        assert_eq!(before.len(), 8);

        let after = emitter.after(&mut pool, &widget, 4).unwrap();
        assert_eq!(after[0], opcodes::ALOAD);
        assert_eq!(after[2], opcodes::SWAP);
        assert_eq!(after[3], opcodes::INVOKESTATIC);
        assert_eq!(after[6], opcodes::CHECKCAST);
        let class = u16::from_be_bytes([after[7], after[8]]);
        assert_eq!(pool.class_name(class).unwrap(), b"demo/Widget");
    }

    #[test]
    fn single_count_sequence() {
        let binding = HookBinding::default();
        let mut pool = ConstantPool::new();
        let mut emitter = HookEmitter::new(&binding);
        let array = site(
            AllocationKind::PrimitiveArray,
            Dimensions::Counts(1),
            Some(b"[I"),
        );

        let before = emitter.before(&mut pool, &array, 1, 2).unwrap();
        let ldc = before[10];
        assert_eq!(
            before,
            vec![
                opcodes::ICONST_1,
                opcodes::NEWARRAY,
                T_INT,
                opcodes::ASTORE_1,
                opcodes::ALOAD_1,
                opcodes::SWAP,
                opcodes::ICONST_0,
                opcodes::SWAP,
                opcodes::IASTORE,
                opcodes::LDC,
                ldc,
                opcodes::ALOAD_1,
                opcodes::INVOKESTATIC,
                before[13],
                before[14],
                opcodes::ASTORE_2,
                opcodes::ALOAD_1,
                opcodes::ICONST_0,
                opcodes::IALOAD,
            ]
        );
    }

    #[test]
    fn reflective_sequences() {
        let binding = HookBinding::default();
        let mut pool = ConstantPool::new();
        let mut emitter = HookEmitter::new(&binding);

        let by_array = site(AllocationKind::ReflectiveArray, Dimensions::Array, None);
        let before = emitter.before(&mut pool, &by_array, 5, 6).unwrap();
        assert_eq!(before[0], opcodes::DUP2);
        assert_eq!(before[1], opcodes::INVOKESTATIC);
        let pre = u16::from_be_bytes([before[2], before[3]]);
        let member = pool.member_ref(pre).unwrap();
        assert_eq!(member.descriptor, PRE_ALLOCATE_REFLECTIVE_DESCRIPTOR.as_bytes());

        let after = emitter.after(&mut pool, &by_array, 6).unwrap();
        // aload 6, swap, invokestatic; no checkcast
        assert_eq!(after.len(), 6);
        assert_eq!(after[3], opcodes::INVOKESTATIC);
    }

    #[test]
    fn hook_methods_resolved_once() {
        let binding = HookBinding::default();
        let mut pool = ConstantPool::new();
        let mut emitter = HookEmitter::new(&binding);
        let widget = site(AllocationKind::Scalar, Dimensions::None, Some(b"demo/W"));

        emitter.before(&mut pool, &widget, 0, 1).unwrap();
        let count = pool.count();
        emitter.before(&mut pool, &widget, 0, 1).unwrap();
        assert_eq!(pool.count(), count);
    }
}
