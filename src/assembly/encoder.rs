//! Bytecode encoding.
//!
//! [`InstructionEncoder`] is the reverse of the decoder. It appends instructions to a growing
//! code buffer, either from a decoded [`Instruction`] (re-encoded at the current position,
//! with switch padding recomputed) or through the `emit_*` helpers that pick the most compact
//! form of common instructions. The rewriter uses the helpers to assemble hook-call sequences
//! and the layout pass uses [`InstructionEncoder::emit_instruction_decoded`] to re-emit the
//! original stream.
//!
//! # Usage Examples
//!
//! ```rust
//! use allocscope::assembly::{opcodes, InstructionEncoder};
//!
//! let mut encoder = InstructionEncoder::new();
//! encoder.emit_push_int(4)?;
//! encoder.emit_newarray(10);
//! encoder.emit_astore(5);
//! encoder.emit_op(opcodes::RETURN);
//!
//! assert_eq!(
//!     encoder.finalize(),
//!     vec![opcodes::ICONST_4, opcodes::NEWARRAY, 10, opcodes::ASTORE, 5, opcodes::RETURN]
//! );
//! # Ok::<(), allocscope::Error>(())
//! ```

use crate::{
    assembly::{opcodes, Instruction, Operand},
    file::io::push_be,
    Result,
};

/// Size of a `tableswitch`/`lookupswitch` placed at `position`, given its operand.
#[must_use]
pub fn switch_size(position: usize, operand: &Operand) -> usize {
    let padding = 3 - (position % 4);
    match operand {
        Operand::TableSwitch { offsets, .. } => 1 + padding + 12 + 4 * offsets.len(),
        Operand::LookupSwitch { pairs, .. } => 1 + padding + 8 + 8 * pairs.len(),
        _ => 0,
    }
}

/// Appends encoded instructions to a code buffer.
#[derive(Debug, Default, Clone)]
pub struct InstructionEncoder {
    /// Generated bytecode buffer
    bytecode: Vec<u8>,
}

impl InstructionEncoder {
    /// Create an empty encoder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bytecode: Vec::new(),
        }
    }

    /// Current length of the generated code, i.e. the offset of the next instruction.
    #[must_use]
    pub fn current_position(&self) -> usize {
        self.bytecode.len()
    }

    /// The bytes generated so far.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytecode
    }

    /// Consume the encoder and return the code.
    #[must_use]
    pub fn finalize(self) -> Vec<u8> {
        self.bytecode
    }

    /// Append already-encoded bytes.
    pub fn emit_raw(&mut self, bytes: &[u8]) {
        self.bytecode.extend_from_slice(bytes);
    }

    /// Emit an instruction without operands.
    pub fn emit_op(&mut self, opcode: u8) {
        self.bytecode.push(opcode);
    }

    /// Emit an instruction with a 16-bit constant pool operand (`checkcast`, `invokestatic`,
    /// `new`, `anewarray`, ...).
    pub fn emit_indexed(&mut self, opcode: u8, index: u16) {
        self.bytecode.push(opcode);
        push_be(&mut self.bytecode, index);
    }

    /// Emit a branch with a 16-bit offset relative to the branch itself.
    pub fn emit_branch(&mut self, opcode: u8, relative: i16) {
        self.bytecode.push(opcode);
        push_be(&mut self.bytecode, relative);
    }

    /// Emit `goto_w` or `jsr_w` with a 32-bit offset relative to the branch itself.
    pub fn emit_branch_w(&mut self, opcode: u8, relative: i32) {
        self.bytecode.push(opcode);
        push_be(&mut self.bytecode, relative);
    }

    /// Emit `invokestatic` for the given `Methodref`.
    pub fn emit_invokestatic(&mut self, methodref: u16) {
        self.emit_indexed(opcodes::INVOKESTATIC, methodref);
    }

    /// Emit `checkcast` for the given `Class`.
    pub fn emit_checkcast(&mut self, class: u16) {
        self.emit_indexed(opcodes::CHECKCAST, class);
    }

    /// Emit `newarray` with a primitive type code.
    pub fn emit_newarray(&mut self, atype: u8) {
        self.bytecode.push(opcodes::NEWARRAY);
        self.bytecode.push(atype);
    }

    /// Emit `ldc` or `ldc_w`, depending on the index.
    pub fn emit_ldc(&mut self, index: u16) {
        match u8::try_from(index) {
            Ok(short) => {
                self.bytecode.push(opcodes::LDC);
                self.bytecode.push(short);
            }
            Err(_) => self.emit_indexed(opcodes::LDC_W, index),
        }
    }

    /// Emit the most compact integer push: `iconst_<n>`, `bipush` or `sipush`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for values outside the `sipush` range; larger
    /// values need a pool constant.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn emit_push_int(&mut self, value: i32) -> Result<()> {
        match value {
            -1..=5 => self.bytecode.push((i32::from(opcodes::ICONST_0) + value) as u8),
            x if i8::try_from(x).is_ok() => {
                self.bytecode.push(opcodes::BIPUSH);
                self.bytecode.push(x as i8 as u8);
            }
            x if i16::try_from(x).is_ok() => {
                self.bytecode.push(opcodes::SIPUSH);
                push_be(&mut self.bytecode, x as i16);
            }
            x => return Err(malformed_error!("Integer {} needs a constant pool entry", x)),
        }
        Ok(())
    }

    /// Emit `aload` with the most compact encoding (`aload_<n>`, `aload`, `wide aload`).
    pub fn emit_aload(&mut self, slot: u16) {
        self.emit_local(opcodes::ALOAD, opcodes::ALOAD_0, slot);
    }

    /// Emit `astore` with the most compact encoding (`astore_<n>`, `astore`, `wide astore`).
    pub fn emit_astore(&mut self, slot: u16) {
        self.emit_local(opcodes::ASTORE, opcodes::ASTORE_0, slot);
    }

    #[allow(clippy::cast_possible_truncation)]
    fn emit_local(&mut self, opcode: u8, short_base: u8, slot: u16) {
        match slot {
            0..=3 => self.bytecode.push(short_base + slot as u8),
            x if x <= 255 => {
                self.bytecode.push(opcode);
                self.bytecode.push(x as u8);
            }
            x => {
                self.bytecode.push(opcodes::WIDE);
                self.bytecode.push(opcode);
                push_be(&mut self.bytecode, x);
            }
        }
    }

    /// Re-encode a decoded instruction at the current position.
    ///
    /// Branch operands are written as given, so the caller must have relocated them for the
    /// new position already. Switch padding is recomputed from the current position.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a branch offset does not fit the instruction's
    /// encoding.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn emit_instruction_decoded(&mut self, instruction: &Instruction) -> Result<()> {
        let start = self.bytecode.len();
        if instruction.wide {
            self.bytecode.push(opcodes::WIDE);
        }
        self.bytecode.push(instruction.opcode);

        match &instruction.operand {
            Operand::None => {}
            Operand::Int(value) => {
                if instruction.opcode == opcodes::BIPUSH {
                    self.bytecode.push(*value as i8 as u8);
                } else {
                    push_be(&mut self.bytecode, *value as i16);
                }
            }
            Operand::Local(slot) => {
                if instruction.wide {
                    push_be(&mut self.bytecode, *slot);
                } else {
                    self.bytecode.push(*slot as u8);
                }
            }
            Operand::Constant(index) => {
                if instruction.opcode == opcodes::LDC {
                    self.bytecode.push(*index as u8);
                } else {
                    push_be(&mut self.bytecode, *index);
                }
            }
            Operand::Iinc { index, delta } => {
                if instruction.wide {
                    push_be(&mut self.bytecode, *index);
                    push_be(&mut self.bytecode, *delta);
                } else {
                    self.bytecode.push(*index as u8);
                    self.bytecode.push(*delta as i8 as u8);
                }
            }
            Operand::Branch(relative) => {
                if matches!(instruction.opcode, opcodes::GOTO_W | opcodes::JSR_W) {
                    push_be(&mut self.bytecode, *relative);
                } else {
                    let Ok(short) = i16::try_from(*relative) else {
                        return Err(malformed_error!(
                            "Branch offset {} does not fit {} at {}",
                            relative,
                            instruction.mnemonic,
                            start
                        ));
                    };
                    push_be(&mut self.bytecode, short);
                }
            }
            Operand::AType(atype) => self.bytecode.push(*atype),
            Operand::InvokeInterface { index, count } => {
                push_be(&mut self.bytecode, *index);
                self.bytecode.push(*count);
                self.bytecode.push(0);
            }
            Operand::InvokeDynamic(index) => {
                push_be(&mut self.bytecode, *index);
                push_be(&mut self.bytecode, 0_u16);
            }
            Operand::MultiANewArray { index, dimensions } => {
                push_be(&mut self.bytecode, *index);
                self.bytecode.push(*dimensions);
            }
            Operand::TableSwitch {
                default,
                low,
                high,
                offsets,
            } => {
                self.pad_switch();
                push_be(&mut self.bytecode, *default);
                push_be(&mut self.bytecode, *low);
                push_be(&mut self.bytecode, *high);
                for offset in offsets {
                    push_be(&mut self.bytecode, *offset);
                }
            }
            Operand::LookupSwitch { default, pairs } => {
                self.pad_switch();
                push_be(&mut self.bytecode, *default);
                push_be(&mut self.bytecode, pairs.len() as i32);
                for (key, offset) in pairs {
                    push_be(&mut self.bytecode, *key);
                    push_be(&mut self.bytecode, *offset);
                }
            }
        }

        Ok(())
    }

    fn pad_switch(&mut self) {
        while self.bytecode.len() % 4 != 0 {
            self.bytecode.push(0);
        }
    }
}
