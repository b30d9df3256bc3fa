//! Decoded JVM instruction representation.
//!
//! An [`Instruction`] carries its position in the original code array, its encoded size and
//! a typed [`Operand`]. Branch operands stay relative, exactly as encoded; absolute targets
//! are available through [`Instruction::branch_targets`].
//!
//! # Thread Safety
//!
//! All types in this module are plain data and are [`Send`] and [`Sync`].

use strum::{Display, EnumIter};

/// Encoding of the operand bytes that follow an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
pub enum OperandType {
    /// No operand present
    None,
    /// Signed 8-bit immediate (`bipush`)
    Int8,
    /// Signed 16-bit immediate (`sipush`)
    Int16,
    /// Local variable index; 8-bit, or 16-bit after `wide`
    Local,
    /// 8-bit constant pool index (`ldc`)
    ConstIndex8,
    /// 16-bit constant pool index
    ConstIndex16,
    /// Local index and signed increment (`iinc`)
    Iinc,
    /// 16-bit relative branch offset
    Branch16,
    /// 32-bit relative branch offset
    Branch32,
    /// Primitive array type code (`newarray`)
    AType,
    /// `invokeinterface`: index, argument count and a zero byte
    InvokeInterface,
    /// `invokedynamic`: index and two zero bytes
    InvokeDynamic,
    /// `multianewarray`: index and dimension count
    MultiANewArray,
    /// Padded jump table
    TableSwitch,
    /// Padded match/offset pairs
    LookupSwitch,
    /// The `wide` prefix
    Wide,
}

impl OperandType {
    /// Size in bytes of a fixed-size operand.
    ///
    /// Returns `None` for the switches, whose size depends on alignment and case count,
    /// and for `wide`, whose size depends on the modified opcode.
    #[must_use]
    pub fn size(&self) -> Option<usize> {
        match self {
            OperandType::None => Some(0),
            OperandType::Int8
            | OperandType::Local
            | OperandType::ConstIndex8
            | OperandType::AType => Some(1),
            OperandType::Int16
            | OperandType::ConstIndex16
            | OperandType::Iinc
            | OperandType::Branch16 => Some(2),
            OperandType::MultiANewArray => Some(3),
            OperandType::Branch32 | OperandType::InvokeInterface | OperandType::InvokeDynamic => {
                Some(4)
            }
            OperandType::TableSwitch | OperandType::LookupSwitch | OperandType::Wide => None,
        }
    }
}

/// Control-flow behaviour of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
pub enum FlowType {
    /// Falls through to the next instruction
    Sequential,
    /// May branch or fall through
    ConditionalBranch,
    /// Always branches
    UnconditionalBranch,
    /// `jsr`, `jsr_w` and `ret`
    Subroutine,
    /// Method invocation
    Call,
    /// Returns from the method
    Return,
    /// Multi-way branch
    Switch,
    /// Throws an exception
    Throw,
}

/// Decoded operand of an instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// No operand
    None,
    /// Immediate integer (`bipush`, `sipush`)
    Int(i32),
    /// Local variable slot
    Local(u16),
    /// Constant pool index
    Constant(u16),
    /// `iinc` slot and increment
    Iinc {
        /// Local variable slot
        index: u16,
        /// Signed increment
        delta: i16,
    },
    /// Relative branch offset
    Branch(i32),
    /// `newarray` primitive type code
    AType(u8),
    /// `invokeinterface` operands
    InvokeInterface {
        /// `InterfaceMethodref` index
        index: u16,
        /// Argument slot count
        count: u8,
    },
    /// `invokedynamic` call site index
    InvokeDynamic(u16),
    /// `multianewarray` operands
    MultiANewArray {
        /// Class index of the array type
        index: u16,
        /// Number of dimensions to create
        dimensions: u8,
    },
    /// `tableswitch` operands, offsets relative to the instruction
    TableSwitch {
        /// Default offset
        default: i32,
        /// Lowest key
        low: i32,
        /// Highest key
        high: i32,
        /// One offset per key in `low..=high`
        offsets: Vec<i32>,
    },
    /// `lookupswitch` operands, offsets relative to the instruction
    LookupSwitch {
        /// Default offset
        default: i32,
        /// `(match, offset)` pairs sorted by key
        pairs: Vec<(i32, i32)>,
    },
}

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Offset of the first byte (the `wide` prefix, if present)
    pub offset: u32,
    /// Encoded size including prefix, padding and operands
    pub size: u32,
    /// Opcode byte (the modified opcode after `wide`)
    pub opcode: u8,
    /// Whether the instruction carried the `wide` prefix
    pub wide: bool,
    /// JVMS mnemonic
    pub mnemonic: &'static str,
    /// Control-flow behaviour
    pub flow: FlowType,
    /// Operand data
    pub operand: Operand,
}

impl Instruction {
    /// Offset of the instruction that follows this one.
    #[must_use]
    pub fn next_offset(&self) -> u32 {
        self.offset + self.size
    }

    /// Whether the instruction carries at least one relative branch offset.
    #[must_use]
    pub fn is_branch(&self) -> bool {
        matches!(
            self.operand,
            Operand::Branch(_) | Operand::TableSwitch { .. } | Operand::LookupSwitch { .. }
        )
    }

    /// Absolute branch targets, in operand order (default first for switches).
    ///
    /// The decoder only produces instructions whose targets lie inside the code array.
    #[must_use]
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
    pub fn branch_targets(&self) -> Vec<u32> {
        let base = self.offset as i64;
        let absolute = |relative: i32| (base + i64::from(relative)) as u32;
        match &self.operand {
            Operand::Branch(relative) => vec![absolute(*relative)],
            Operand::TableSwitch {
                default, offsets, ..
            } => std::iter::once(*default)
                .chain(offsets.iter().copied())
                .map(absolute)
                .collect(),
            Operand::LookupSwitch { default, pairs } => std::iter::once(*default)
                .chain(pairs.iter().map(|(_, offset)| *offset))
                .map(absolute)
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn operand_sizes() {
        assert_eq!(OperandType::None.size(), Some(0));
        assert_eq!(OperandType::AType.size(), Some(1));
        assert_eq!(OperandType::Branch16.size(), Some(2));
        assert_eq!(OperandType::MultiANewArray.size(), Some(3));
        assert_eq!(OperandType::InvokeInterface.size(), Some(4));
        let variable = OperandType::iter().filter(|t| t.size().is_none()).count();
        assert_eq!(variable, 3);
    }

    #[test]
    fn switch_targets_include_default() {
        let instruction = Instruction {
            offset: 10,
            size: 28,
            opcode: 0xaa,
            wide: false,
            mnemonic: "tableswitch",
            flow: FlowType::Switch,
            operand: Operand::TableSwitch {
                default: 30,
                low: 0,
                high: 1,
                offsets: vec![20, -10],
            },
        };
        assert!(instruction.is_branch());
        assert_eq!(instruction.branch_targets(), vec![40, 30, 0]);
        assert_eq!(instruction.next_offset(), 38);
        assert_eq!(FlowType::Switch.to_string(), "Switch");
    }
}
