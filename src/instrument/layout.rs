//! Laying out a planned method and relocating everything that refers to code offsets.
//!
//! Layout assigns new offsets (switch padding depends on the position, so sizes are only
//! known once the instruction's new start is), then the stream is re-encoded with branch
//! offsets relative to the new positions. A branch that targeted an instruction now targets
//! the start of that instruction's prefix, so hook code inserted in front of a site is
//! reached by every path that reached the site.
//!
//! A 16-bit branch whose target moved out of range is widened: `goto` and `jsr` become
//! `goto_w` and `jsr_w`, and `if<cond> L` becomes `if<!cond> +8; goto_w L`. Widening only
//! moves code further apart, so layout repeats until no further branch needs it.
//!
//! The exception table and the debug tables are remapped the same way. Code-level type
//! annotations address instructions by offset in a form this crate does not decode; they are
//! dropped with a warning.

use crate::{
    assembly::{opcodes, switch_size, Instruction, InstructionEncoder, Operand},
    classfile::{
        attributes::{
            names, parse_line_numbers, parse_local_variables, write_line_numbers,
            write_local_variables, AttributeInfo, CodeAttribute, ExceptionHandler,
            MAX_CODE_LENGTH,
        },
        constpool::ConstantPool,
    },
    instrument::{hooks::STACK_HEADROOM, method::MethodPlan},
    Error, Result,
};

/// Where one original instruction ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemapEntry {
    /// Offset in the original code
    pub old: u32,
    /// Offset of the inserted prefix (equal to `start` when there is none)
    pub prefix_start: u32,
    /// Offset of the instruction itself
    pub start: u32,
    /// Scalar allocations pending in front of the instruction
    pub pending: u16,
}

/// A conditional branch that was rewritten as an inverted branch over a `goto_w`.
///
/// The instruction after it becomes a branch target, and needs a frame of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WidenedBranch {
    /// Offset of the conditional branch in the original code
    pub old: u32,
    /// Offset of the instruction that followed it in the original code
    pub resume: u32,
}

/// Old-to-new offset map of one rewritten method.
///
/// Handed to the [`crate::instrument::FrameComputer`] together with the rewritten code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeRemap {
    entries: Vec<RemapEntry>,
    old_len: u32,
    new_len: u32,
    base_locals: u16,
    token_slots: u16,
    widened: Vec<WidenedBranch>,
}

impl CodeRemap {
    pub(crate) fn new(
        entries: Vec<RemapEntry>,
        old_len: u32,
        new_len: u32,
        base_locals: u16,
        token_slots: u16,
    ) -> Self {
        CodeRemap {
            entries,
            old_len,
            new_len,
            base_locals,
            token_slots,
            widened: Vec::new(),
        }
    }

    pub(crate) fn with_widened(mut self, widened: Vec<WidenedBranch>) -> Self {
        self.widened = widened;
        self
    }

    fn entry(&self, old: u32) -> Option<&RemapEntry> {
        self.entries
            .binary_search_by_key(&old, |entry| entry.old)
            .ok()
            .map(|index| &self.entries[index])
    }

    /// New offset for something that jumped to `old`: the start of its prefix.
    #[must_use]
    pub fn map_target(&self, old: u32) -> Option<u32> {
        self.entry(old).map(|entry| entry.prefix_start)
    }

    /// Like [`CodeRemap::map_target`], but maps the end of the original code to the end of the
    /// new code. Used for exclusive range ends.
    #[must_use]
    pub fn map_end(&self, old: u32) -> Option<u32> {
        if old == self.old_len {
            Some(self.new_len)
        } else {
            self.map_target(old)
        }
    }

    /// New offset of the instruction that was at `old`, behind its prefix.
    #[must_use]
    pub fn map_instruction(&self, old: u32) -> Option<u32> {
        self.entry(old).map(|entry| entry.start)
    }

    /// Pending scalar allocations in front of the instruction that was at `old`.
    #[must_use]
    pub fn pending_at(&self, old: u32) -> Option<u16> {
        self.entry(old).map(|entry| entry.pending)
    }

    /// Every instruction, in code order.
    #[must_use]
    pub fn entries(&self) -> &[RemapEntry] {
        &self.entries
    }

    /// The original `max_locals`.
    #[must_use]
    pub fn base_locals(&self) -> u16 {
        self.base_locals
    }

    /// Slot holding the spilled dimensions while a pre hook is called.
    #[must_use]
    pub fn scratch_slot(&self) -> u16 {
        self.base_locals
    }

    /// Slot holding the token of the allocation at pending depth `depth`.
    #[must_use]
    pub fn token_slot(&self, depth: u16) -> u16 {
        self.base_locals.saturating_add(1).saturating_add(depth)
    }

    /// Token slots in use above the scratch slot.
    #[must_use]
    pub fn token_slots(&self) -> u16 {
        self.token_slots
    }

    /// Length of the original code.
    #[must_use]
    pub fn old_len(&self) -> u32 {
        self.old_len
    }

    /// Length of the rewritten code.
    #[must_use]
    pub fn new_len(&self) -> u32 {
        self.new_len
    }

    /// Conditional branches widened to `if<!cond> +8; goto_w`, in code order.
    #[must_use]
    pub fn widened_branches(&self) -> &[WidenedBranch] {
        &self.widened
    }
}

/// Encoded size of an instruction placed at `position`.
fn size_at(instruction: &Instruction, position: usize) -> usize {
    match instruction.operand {
        Operand::TableSwitch { .. } | Operand::LookupSwitch { .. } => {
            switch_size(position, &instruction.operand)
        }
        _ => instruction.size as usize,
    }
}

/// Size of the 32-bit form that replaces a 16-bit branch.
fn widened_size(instruction: &Instruction) -> usize {
    match instruction.opcode {
        opcodes::GOTO | opcodes::JSR => 5,
        _ => 8,
    }
}

/// The condition with the opposite outcome; conditions come in adjacent pairs.
fn inverted(opcode: u8) -> Option<u8> {
    match opcode {
        opcodes::IFEQ..=opcodes::IF_ACMPNE => {
            Some(((opcode - opcodes::IFEQ) ^ 1) + opcodes::IFEQ)
        }
        opcodes::IFNULL => Some(opcodes::IFNONNULL),
        opcodes::IFNONNULL => Some(opcodes::IFNULL),
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn branch_target(instruction: &Instruction) -> Option<u32> {
    match instruction.operand {
        Operand::Branch(relative) if instruction.size < 5 => {
            Some((i64::from(instruction.offset) + i64::from(relative)) as u32)
        }
        _ => None,
    }
}

/// Assign new offsets, with the branches flagged in `wide` in their 32-bit form.
#[allow(clippy::cast_possible_truncation)]
fn layout(original: &CodeAttribute, plan: &MethodPlan, wide: &[bool]) -> Result<CodeRemap> {
    let mut entries = Vec::with_capacity(plan.instructions.len());
    let mut position = 0_usize;
    for (index, instruction) in plan.instructions.iter().enumerate() {
        let prefix_start = position;
        position += plan.prefixes[index].len();
        let start = position;
        let size = if wide[index] {
            widened_size(instruction)
        } else {
            size_at(instruction, start)
        };
        position += size + plan.suffixes[index].len();
        if position > MAX_CODE_LENGTH {
            return Err(Error::LimitExceeded {
                what: "code length",
                limit: MAX_CODE_LENGTH,
            });
        }
        entries.push(RemapEntry {
            old: instruction.offset,
            prefix_start: prefix_start as u32,
            start: start as u32,
            pending: plan.pending[index],
        });
    }

    Ok(CodeRemap::new(
        entries,
        original.code.len() as u32,
        position as u32,
        plan.base_locals,
        plan.token_slots,
    ))
}

/// Lay out the plan and build the rewritten `Code` attribute.
///
/// The `StackMapTable` is copied unchanged; remapping it is the frame computer's job.
///
/// # Errors
/// Returns [`Error::LimitExceeded`] if the code grows beyond 65535 bytes or the locals
/// overflow, and [`Error::Malformed`] if a branch or table refers to an offset that is not
/// an instruction.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub(crate) fn assemble(
    class_name: &str,
    original: &CodeAttribute,
    plan: &MethodPlan,
    pool: &ConstantPool,
) -> Result<(CodeAttribute, CodeRemap)> {
    let mut wide = vec![false; plan.instructions.len()];
    let remap = loop {
        let remap = layout(original, plan, &wide)?;
        let mut grown = false;
        for (index, instruction) in plan.instructions.iter().enumerate() {
            if wide[index] {
                continue;
            }
            let Some(target) = branch_target(instruction).and_then(|old| remap.map_target(old))
            else {
                continue;
            };
            let start = remap.entries()[index].start;
            if i16::try_from(i64::from(target) - i64::from(start)).is_err() {
                wide[index] = true;
                grown = true;
            }
        }
        if !grown {
            break remap;
        }
    };

    let mut widened = Vec::new();
    for (index, instruction) in plan.instructions.iter().enumerate() {
        if !wide[index] || matches!(instruction.opcode, opcodes::GOTO | opcodes::JSR) {
            continue;
        }
        let Some(next) = plan.instructions.get(index + 1) else {
            return Err(malformed_error!(
                "{} at offset {} falls off the end of the code",
                instruction.mnemonic,
                instruction.offset
            ));
        };
        widened.push(WidenedBranch {
            old: instruction.offset,
            resume: next.offset,
        });
    }
    if wide.iter().any(|w| *w) {
        log::debug!(
            "Widened {} branches in {}",
            wide.iter().filter(|w| **w).count(),
            class_name
        );
    }
    let remap = remap.with_widened(widened);

    let mut encoder = InstructionEncoder::new();
    for (index, instruction) in plan.instructions.iter().enumerate() {
        encoder.emit_raw(&plan.prefixes[index]);
        let start = encoder.current_position() as i64;
        if wide[index] {
            emit_widened(&mut encoder, instruction, start, &remap)?;
        } else if instruction.is_branch() {
            let relocated = relocate(instruction, start, &remap)?;
            encoder.emit_instruction_decoded(&relocated)?;
        } else {
            encoder.emit_instruction_decoded(instruction)?;
        }
        encoder.emit_raw(&plan.suffixes[index]);
    }
    let code = encoder.finalize();
    debug_assert_eq!(code.len(), remap.new_len() as usize);

    let exception_table = original
        .exception_table
        .iter()
        .map(|handler| {
            Ok(ExceptionHandler {
                start_pc: mapped(remap.map_target(u32::from(handler.start_pc)), handler.start_pc)?,
                end_pc: mapped(remap.map_end(u32::from(handler.end_pc)), handler.end_pc)?,
                handler_pc: mapped(
                    remap.map_target(u32::from(handler.handler_pc)),
                    handler.handler_pc,
                )?,
                catch_type: handler.catch_type,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut attributes = Vec::with_capacity(original.attributes.len());
    for attribute in &original.attributes {
        let name = pool.utf8(attribute.name_index)?;
        let info = if name == names::LINE_NUMBER_TABLE {
            relocate_line_numbers(&attribute.info, &remap)?
        } else if name == names::LOCAL_VARIABLE_TABLE || name == names::LOCAL_VARIABLE_TYPE_TABLE
        {
            relocate_local_variables(&attribute.info, &remap)?
        } else if name == names::RUNTIME_VISIBLE_TYPE_ANNOTATIONS
            || name == names::RUNTIME_INVISIBLE_TYPE_ANNOTATIONS
        {
            log::warn!(
                "Dropping {} of a rewritten method in {}",
                String::from_utf8_lossy(name),
                class_name
            );
            continue;
        } else {
            attribute.info.clone()
        };
        attributes.push(AttributeInfo {
            name_index: attribute.name_index,
            info,
        });
    }

    let max_locals = u16::try_from(
        u32::from(plan.base_locals) + 1 + u32::from(plan.token_slots),
    )
    .map_err(|_| Error::LimitExceeded {
        what: "local variable slots",
        limit: usize::from(u16::MAX),
    })?;

    Ok((
        CodeAttribute {
            max_stack: original.max_stack.saturating_add(STACK_HEADROOM),
            max_locals,
            code,
            exception_table,
            attributes,
        },
        remap,
    ))
}

fn unmapped(instruction: &Instruction, old: u32) -> Error {
    malformed_error!(
        "Branch at offset {} targets {}, which is not an instruction",
        instruction.offset,
        old
    )
}

/// Emit the 32-bit form of a 16-bit branch placed at `start`.
#[allow(clippy::cast_possible_truncation)]
fn emit_widened(
    encoder: &mut InstructionEncoder,
    instruction: &Instruction,
    start: i64,
    remap: &CodeRemap,
) -> Result<()> {
    let Some(old) = branch_target(instruction) else {
        return Err(malformed_error!(
            "{} at offset {} is not a 16-bit branch",
            instruction.mnemonic,
            instruction.offset
        ));
    };
    let target = i64::from(
        remap
            .map_target(old)
            .ok_or_else(|| unmapped(instruction, old))?,
    );

    match instruction.opcode {
        opcodes::GOTO => encoder.emit_branch_w(opcodes::GOTO_W, (target - start) as i32),
        opcodes::JSR => encoder.emit_branch_w(opcodes::JSR_W, (target - start) as i32),
        condition => {
            let Some(inverse) = inverted(condition) else {
                return Err(malformed_error!(
                    "Cannot widen {} at offset {}",
                    instruction.mnemonic,
                    instruction.offset
                ));
            };
            encoder.emit_branch(inverse, 8);
            encoder.emit_branch_w(opcodes::GOTO_W, (target - start - 3) as i32);
        }
    }
    Ok(())
}

/// Rewrite the branch operands of an instruction for its new position `start`.
#[allow(clippy::cast_possible_truncation)]
fn relocate(instruction: &Instruction, start: i64, remap: &CodeRemap) -> Result<Instruction> {
    let base = i64::from(instruction.offset);
    let retarget = |relative: i32| -> Result<i32> {
        let old = (base + i64::from(relative)) as u32;
        let target = remap
            .map_target(old)
            .ok_or_else(|| unmapped(instruction, old))?;
        Ok((i64::from(target) - start) as i32)
    };

    let operand = match &instruction.operand {
        Operand::Branch(relative) => Operand::Branch(retarget(*relative)?),
        Operand::TableSwitch {
            default,
            low,
            high,
            offsets,
        } => Operand::TableSwitch {
            default: retarget(*default)?,
            low: *low,
            high: *high,
            offsets: offsets
                .iter()
                .map(|offset| retarget(*offset))
                .collect::<Result<_>>()?,
        },
        Operand::LookupSwitch { default, pairs } => Operand::LookupSwitch {
            default: retarget(*default)?,
            pairs: pairs
                .iter()
                .map(|(key, offset)| Ok((*key, retarget(*offset)?)))
                .collect::<Result<_>>()?,
        },
        other => other.clone(),
    };

    Ok(Instruction {
        offset: start as u32,
        operand,
        ..instruction.clone()
    })
}

#[allow(clippy::cast_possible_truncation)]
fn mapped(new: Option<u32>, old: u16) -> Result<u16> {
    match new {
        Some(offset) => Ok(offset as u16),
        None => Err(malformed_error!(
            "Offset {} does not start an instruction",
            old
        )),
    }
}

fn relocate_line_numbers(info: &[u8], remap: &CodeRemap) -> Result<Vec<u8>> {
    let mut entries = parse_line_numbers(info)?;
    for entry in &mut entries {
        entry.start_pc = mapped(remap.map_target(u32::from(entry.start_pc)), entry.start_pc)?;
    }
    write_line_numbers(&entries)
}

fn relocate_local_variables(info: &[u8], remap: &CodeRemap) -> Result<Vec<u8>> {
    let mut entries = parse_local_variables(info)?;
    for entry in &mut entries {
        let end = u32::from(entry.start_pc) + u32::from(entry.length);
        let start = mapped(remap.map_target(u32::from(entry.start_pc)), entry.start_pc)?;
        #[allow(clippy::cast_possible_truncation)]
        let end = mapped(remap.map_end(end), end as u16)?;
        entry.start_pc = start;
        entry.length = end.saturating_sub(start);
    }
    write_local_variables(&entries)
}
