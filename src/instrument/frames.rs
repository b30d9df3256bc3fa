//! Stack map frames for rewritten methods.
//!
//! Class files of version 50 and later describe the type state at every branch target in a
//! `StackMapTable` (JVMS §4.7.4), and the verifier rejects code whose frames do not match.
//! Rewriting moves every frame and introduces new live locals (hook tokens), so the table
//! has to be rebuilt for every rewritten method.
//!
//! [`FrameComputer`] is the seam for that. The default [`StackMapRemapper`] keeps the
//! existing frames: the inserted code has no branches of its own, so the set of frame
//! positions does not change, only their offsets and the locals that are live at them.
//! The one exception is a conditional branch widened to `if<!cond> +8; goto_w`, whose
//! fall-through becomes a branch target; its frame is inferred from the code before it.
//! A host that wants full recomputation from data flow (with class hierarchy queries
//! through the defining loader) can plug in its own implementation.
//!
//! # Frame encoding
//!
//! Frames are decoded into absolute full frames starting from the implicit initial frame
//! derived from the method descriptor, then written back as `full_frame` entries. This is
//! larger than the compressed forms, but keeps the encoder trivial and cannot go wrong when
//! locals are appended.

use crate::{
    classfile::{
        attributes::{count_u16, names, CodeAttribute},
        constpool::ConstantPool,
        descriptor::MethodDescriptor,
    },
    file::{io::push_be, parser::Parser},
    instrument::{
        gate::LoaderRef,
        interpret::{fall_through_frame, value_type},
        layout::CodeRemap,
    },
    Result,
};

const JAVA_LANG_OBJECT: &[u8] = b"java/lang/Object";
const INIT: &[u8] = b"<init>";

const FULL_FRAME: u8 = 255;

/// What a [`FrameComputer`] knows about the method it works on.
#[derive(Debug, Clone, Copy)]
pub struct FrameContext<'a> {
    /// Internal name of the declaring class
    pub class_name: &'a [u8],
    /// Method name
    pub method_name: &'a [u8],
    /// Method descriptor
    pub descriptor: &'a [u8],
    /// Whether the method is static
    pub is_static: bool,
    /// Class file major version
    pub major_version: u16,
    /// Defining loader of the class, `None` for the bootstrap loader
    pub loader: Option<&'a LoaderRef>,
}

/// Rebuilds the frames of a rewritten method.
pub trait FrameComputer: Send + Sync {
    /// Update `code` (already relocated, still carrying the original `StackMapTable`) so its
    /// frames describe the rewritten instruction stream.
    ///
    /// # Errors
    /// Returns an error if the existing frames cannot be decoded or remapped.
    fn compute(
        &self,
        context: &FrameContext<'_>,
        pool: &mut ConstantPool,
        code: &mut CodeAttribute,
        remap: &CodeRemap,
    ) -> Result<()>;
}

/// One verification type (JVMS §4.7.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationType {
    /// `Top`
    Top,
    /// `int`, `short`, `char`, `byte`, `boolean`
    Integer,
    /// `float`
    Float,
    /// `double`
    Double,
    /// `long`
    Long,
    /// `null`
    Null,
    /// `this` inside a constructor before the super constructor call
    UninitializedThis,
    /// Reference to the class at this constant-pool index
    Object(u16),
    /// Result of the `new` at this code offset
    Uninitialized(u32),
}

impl VerificationType {
    fn read(parser: &mut Parser) -> Result<VerificationType> {
        Ok(match parser.read_be::<u8>()? {
            0 => VerificationType::Top,
            1 => VerificationType::Integer,
            2 => VerificationType::Float,
            3 => VerificationType::Double,
            4 => VerificationType::Long,
            5 => VerificationType::Null,
            6 => VerificationType::UninitializedThis,
            7 => VerificationType::Object(parser.read_be::<u16>()?),
            8 => VerificationType::Uninitialized(u32::from(parser.read_be::<u16>()?)),
            tag => return Err(malformed_error!("Invalid verification type tag {}", tag)),
        })
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write(self, out: &mut Vec<u8>) {
        match self {
            VerificationType::Top => out.push(0),
            VerificationType::Integer => out.push(1),
            VerificationType::Float => out.push(2),
            VerificationType::Double => out.push(3),
            VerificationType::Long => out.push(4),
            VerificationType::Null => out.push(5),
            VerificationType::UninitializedThis => out.push(6),
            VerificationType::Object(class) => {
                out.push(7);
                push_be(out, class);
            }
            VerificationType::Uninitialized(offset) => {
                out.push(8);
                push_be(out, offset as u16);
            }
        }
    }

    /// Local variable slots the type occupies.
    #[must_use]
    pub fn slots(self) -> u16 {
        match self {
            VerificationType::Long | VerificationType::Double => 2,
            _ => 1,
        }
    }
}

/// A decoded frame with absolute offset and complete type state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Code offset the frame applies to
    pub offset: u32,
    /// Locals, one entry per value (long and double take one entry)
    pub locals: Vec<VerificationType>,
    /// Operand stack, bottom first
    pub stack: Vec<VerificationType>,
}

/// The implicit frame at offset 0, derived from the method descriptor.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for an invalid descriptor and
/// [`crate::Error::LimitExceeded`] if the pool overflows while adding parameter classes.
pub fn initial_locals(
    context: &FrameContext<'_>,
    pool: &mut ConstantPool,
) -> Result<Vec<VerificationType>> {
    let descriptor = MethodDescriptor::parse(context.descriptor)?;
    let mut locals = Vec::with_capacity(descriptor.params.len() + 1);

    if !context.is_static {
        if context.method_name == INIT && context.class_name != JAVA_LANG_OBJECT {
            locals.push(VerificationType::UninitializedThis);
        } else {
            locals.push(VerificationType::Object(
                pool.add_class_bytes(context.class_name.to_vec())?,
            ));
        }
    }

    for param in descriptor.params {
        locals.push(value_type(pool, param)?);
    }
    Ok(locals)
}

/// Decode a `StackMapTable` payload into absolute full frames.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for reserved frame types or chops below zero locals
/// and [`crate::Error::OutOfBounds`] for truncated input.
pub fn decode_frames(info: &[u8], initial: &[VerificationType]) -> Result<Vec<Frame>> {
    let mut parser = Parser::new(info);
    let count = parser.read_be::<u16>()?;
    let mut frames: Vec<Frame> = Vec::with_capacity(count as usize);
    let mut locals = initial.to_vec();
    let mut previous: Option<u32> = None;

    for _ in 0..count {
        let frame_type = parser.read_be::<u8>()?;
        let (delta, stack) = match frame_type {
            0..=63 => (u32::from(frame_type), Vec::new()),
            64..=127 => (
                u32::from(frame_type - 64),
                vec![VerificationType::read(&mut parser)?],
            ),
            247 => {
                let delta = u32::from(parser.read_be::<u16>()?);
                (delta, vec![VerificationType::read(&mut parser)?])
            }
            248..=250 => {
                let delta = u32::from(parser.read_be::<u16>()?);
                let chop = usize::from(251 - frame_type);
                if chop > locals.len() {
                    return Err(malformed_error!(
                        "chop_frame removes {} of {} locals",
                        chop,
                        locals.len()
                    ));
                }
                locals.truncate(locals.len() - chop);
                (delta, Vec::new())
            }
            251 => (u32::from(parser.read_be::<u16>()?), Vec::new()),
            252..=254 => {
                let delta = u32::from(parser.read_be::<u16>()?);
                for _ in 0..(frame_type - 251) {
                    locals.push(VerificationType::read(&mut parser)?);
                }
                (delta, Vec::new())
            }
            FULL_FRAME => {
                let delta = u32::from(parser.read_be::<u16>()?);
                let local_count = parser.read_be::<u16>()?;
                locals.clear();
                for _ in 0..local_count {
                    locals.push(VerificationType::read(&mut parser)?);
                }
                let stack_count = parser.read_be::<u16>()?;
                let mut stack = Vec::with_capacity(stack_count as usize);
                for _ in 0..stack_count {
                    stack.push(VerificationType::read(&mut parser)?);
                }
                (delta, stack)
            }
            reserved => {
                return Err(malformed_error!("Reserved stack map frame type {}", reserved))
            }
        };

        let offset = match previous {
            None => delta,
            Some(previous) => previous + delta + 1,
        };
        previous = Some(offset);
        frames.push(Frame {
            offset,
            locals: locals.clone(),
            stack,
        });
    }

    if parser.has_more_data() {
        return Err(malformed_error!("StackMapTable has trailing bytes"));
    }
    Ok(frames)
}

/// Encode frames as a `StackMapTable` payload of `full_frame` entries.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if the frames are not in strictly increasing offset
/// order and [`crate::Error::LimitExceeded`] if a count overflows.
#[allow(clippy::cast_possible_truncation)]
pub fn encode_frames(frames: &[Frame]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    push_be(&mut out, count_u16(frames.len(), "stack map frames")?);

    let mut previous: Option<u32> = None;
    for frame in frames {
        let delta = match previous {
            None => frame.offset,
            Some(previous) if frame.offset > previous => frame.offset - previous - 1,
            Some(previous) => {
                return Err(malformed_error!(
                    "Stack map frame at {} follows frame at {}",
                    frame.offset,
                    previous
                ))
            }
        };
        previous = Some(frame.offset);

        out.push(FULL_FRAME);
        push_be(&mut out, delta as u16);
        push_be(&mut out, count_u16(frame.locals.len(), "frame locals")?);
        for local in &frame.locals {
            local.write(&mut out);
        }
        push_be(&mut out, count_u16(frame.stack.len(), "frame stack")?);
        for item in &frame.stack {
            item.write(&mut out);
        }
    }
    Ok(out)
}

/// Remaps the frames of the original method onto the rewritten code.
///
/// Every frame moves to the new offset of its instruction (the start of the inserted
/// prefix), `Uninitialized` entries follow their `new` instruction, and frames that sit
/// between a `new` and its constructor call gain the hook tokens of the pending
/// allocations as `java/lang/Object` locals.
#[derive(Debug, Default, Clone, Copy)]
pub struct StackMapRemapper;

impl StackMapRemapper {
    fn remap_type(
        item: VerificationType,
        remap: &CodeRemap,
        context: &FrameContext<'_>,
    ) -> Result<VerificationType> {
        match item {
            VerificationType::Uninitialized(old) => match remap.map_instruction(old) {
                Some(new) => Ok(VerificationType::Uninitialized(new)),
                None => Err(rewrite_error!(
                    String::from_utf8_lossy(context.class_name),
                    "Uninitialized({}) in {} does not point at an instruction",
                    old,
                    String::from_utf8_lossy(context.method_name)
                )),
            },
            other => Ok(other),
        }
    }
}

impl FrameComputer for StackMapRemapper {
    fn compute(
        &self,
        context: &FrameContext<'_>,
        pool: &mut ConstantPool,
        code: &mut CodeAttribute,
        remap: &CodeRemap,
    ) -> Result<()> {
        let Some(position) = code.attributes.iter().position(|attribute| {
            pool.utf8(attribute.name_index).ok() == Some(names::STACK_MAP_TABLE)
        }) else {
            return Ok(());
        };

        let initial = initial_locals(context, pool)?;
        let frames = decode_frames(&code.attributes[position].info, &initial)?;
        let object = if frames.iter().any(|f| remap.pending_at(f.offset).unwrap_or(0) > 0) {
            Some(pool.add_class_bytes(JAVA_LANG_OBJECT.to_vec())?)
        } else {
            None
        };

        let mut remapped = Vec::with_capacity(frames.len());
        for frame in frames {
            let Some(offset) = remap.map_target(frame.offset) else {
                return Err(rewrite_error!(
                    String::from_utf8_lossy(context.class_name),
                    "Stack map frame at {} in {} does not point at an instruction",
                    frame.offset,
                    String::from_utf8_lossy(context.method_name)
                ));
            };

            let mut locals = frame
                .locals
                .into_iter()
                .map(|local| Self::remap_type(local, remap, context))
                .collect::<Result<Vec<_>>>()?;
            let stack = frame
                .stack
                .into_iter()
                .map(|item| Self::remap_type(item, remap, context))
                .collect::<Result<Vec<_>>>()?;

            let pending = remap.pending_at(frame.offset).unwrap_or(0);
            if let Some(object) = object.filter(|_| pending > 0) {
                let mut slots: u32 = locals.iter().map(|l| u32::from(l.slots())).sum();
                // pad up to and including the scratch slot
                while slots <= u32::from(remap.scratch_slot()) {
                    locals.push(VerificationType::Top);
                    slots += 1;
                }
                for _ in 0..pending {
                    locals.push(VerificationType::Object(object));
                }
            }

            remapped.push(Frame {
                offset,
                locals,
                stack,
            });
        }

        // a widened conditional branch falls through to a point the original never marked
        for branch in remap.widened_branches() {
            let (Some(at), Some(resume)) =
                (remap.map_instruction(branch.old), remap.map_target(branch.resume))
            else {
                return Err(rewrite_error!(
                    String::from_utf8_lossy(context.class_name),
                    "Widened branch at {} in {} does not point at an instruction",
                    branch.old,
                    String::from_utf8_lossy(context.method_name)
                ));
            };
            let slot = remapped.partition_point(|f| f.offset < resume);
            if remapped.get(slot).is_some_and(|f| f.offset == resume) {
                continue;
            }
            let from = match remapped[..slot].iter().rev().find(|f| f.offset <= at) {
                Some(frame) => frame.clone(),
                None => Frame {
                    offset: 0,
                    locals: initial.clone(),
                    stack: Vec::new(),
                },
            };
            let frame = fall_through_frame(context, pool, &code.code, &from, at, resume)?;
            log::trace!(
                "Inserted frame at {} in {}",
                resume,
                String::from_utf8_lossy(context.method_name)
            );
            remapped.insert(slot, frame);
        }

        code.attributes[position].info = encode_frames(&remapped)?;
        Ok(())
    }
}
