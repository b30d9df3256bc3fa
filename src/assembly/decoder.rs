//! Bytecode decoding.
//!
//! [`decode_instruction`] decodes one instruction at the parser position; the position is the
//! bytecode offset, so the parser must be created over the method's code array alone (switch
//! padding is aligned relative to the start of the array). [`decode_stream`] decodes a whole
//! method and validates that every branch target is the start of an instruction.
//!
//! # Usage Examples
//!
//! ```rust
//! use allocscope::{assembly::{decode_instruction, decode_stream, opcodes, Operand}, Parser};
//!
//! let code = [opcodes::BIPUSH, 4, opcodes::NEWARRAY, 10, opcodes::ARETURN];
//! let mut parser = Parser::new(&code);
//! let first = decode_instruction(&mut parser)?;
//! assert_eq!(first.mnemonic, "bipush");
//! assert_eq!(first.operand, Operand::Int(4));
//!
//! let all = decode_stream(&code)?;
//! assert_eq!(all.len(), 3);
//! assert_eq!(all[1].offset, 2);
//! # Ok::<(), allocscope::Error>(())
//! ```

use std::collections::HashSet;

use crate::{
    assembly::{instructions, opcodes, Instruction, Operand, OperandType},
    file::parser::Parser,
    Result,
};

/// Upper bound on `tableswitch` entries; larger tables cannot fit a 64 KiB code array.
const MAX_SWITCH_ENTRIES: i64 = 16384;

/// Decode the instruction at the current parser position.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for reserved opcodes, invalid `wide` targets and
/// inconsistent switch tables, and [`crate::Error::OutOfBounds`] for truncated operands.
#[allow(clippy::cast_possible_truncation)]
pub fn decode_instruction(parser: &mut Parser) -> Result<Instruction> {
    let start = parser.pos();
    let mut opcode = parser.read_be::<u8>()?;
    let wide = opcode == opcodes::WIDE;
    if wide {
        opcode = parser.read_be::<u8>()?;
        let valid = matches!(
            opcode,
            opcodes::ILOAD..=opcodes::ALOAD
                | opcodes::ISTORE..=opcodes::ASTORE
                | opcodes::RET
                | opcodes::IINC
        );
        if !valid {
            return Err(malformed_error!(
                "Invalid opcode 0x{:02x} after wide at offset {}",
                opcode,
                start
            ));
        }
    }

    let Some(info) = instructions::lookup(opcode) else {
        return Err(malformed_error!(
            "Invalid opcode 0x{:02x} at offset {}",
            opcode,
            start
        ));
    };

    let operand = match info.operand {
        OperandType::None => Operand::None,
        OperandType::Int8 => Operand::Int(i32::from(parser.read_be::<i8>()?)),
        OperandType::Int16 => Operand::Int(i32::from(parser.read_be::<i16>()?)),
        OperandType::Local => {
            if wide {
                Operand::Local(parser.read_be::<u16>()?)
            } else {
                Operand::Local(u16::from(parser.read_be::<u8>()?))
            }
        }
        OperandType::ConstIndex8 => Operand::Constant(u16::from(parser.read_be::<u8>()?)),
        OperandType::ConstIndex16 => Operand::Constant(parser.read_be::<u16>()?),
        OperandType::Iinc => {
            if wide {
                Operand::Iinc {
                    index: parser.read_be::<u16>()?,
                    delta: parser.read_be::<i16>()?,
                }
            } else {
                Operand::Iinc {
                    index: u16::from(parser.read_be::<u8>()?),
                    delta: i16::from(parser.read_be::<i8>()?),
                }
            }
        }
        OperandType::Branch16 => Operand::Branch(i32::from(parser.read_be::<i16>()?)),
        OperandType::Branch32 => Operand::Branch(parser.read_be::<i32>()?),
        OperandType::AType => Operand::AType(parser.read_be::<u8>()?),
        OperandType::InvokeInterface => {
            let index = parser.read_be::<u16>()?;
            let count = parser.read_be::<u8>()?;
            parser.read_be::<u8>()?;
            Operand::InvokeInterface { index, count }
        }
        OperandType::InvokeDynamic => {
            let index = parser.read_be::<u16>()?;
            parser.read_be::<u16>()?;
            Operand::InvokeDynamic(index)
        }
        OperandType::MultiANewArray => Operand::MultiANewArray {
            index: parser.read_be::<u16>()?,
            dimensions: parser.read_be::<u8>()?,
        },
        OperandType::TableSwitch => {
            parser.align(4)?;
            let default = parser.read_be::<i32>()?;
            let low = parser.read_be::<i32>()?;
            let high = parser.read_be::<i32>()?;
            let count = i64::from(high) - i64::from(low) + 1;
            if !(1..=MAX_SWITCH_ENTRIES).contains(&count) {
                return Err(malformed_error!(
                    "Invalid tableswitch bounds {}..={} at offset {}",
                    low,
                    high,
                    start
                ));
            }
            let mut offsets = Vec::with_capacity(count as usize);
            for _ in 0..count {
                offsets.push(parser.read_be::<i32>()?);
            }
            Operand::TableSwitch {
                default,
                low,
                high,
                offsets,
            }
        }
        OperandType::LookupSwitch => {
            parser.align(4)?;
            let default = parser.read_be::<i32>()?;
            let count = parser.read_be::<i32>()?;
            if !(0..=MAX_SWITCH_ENTRIES).contains(&i64::from(count)) {
                return Err(malformed_error!(
                    "Invalid lookupswitch pair count {} at offset {}",
                    count,
                    start
                ));
            }
            let mut pairs = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let key = parser.read_be::<i32>()?;
                let offset = parser.read_be::<i32>()?;
                if pairs.last().is_some_and(|(previous, _)| *previous >= key) {
                    return Err(malformed_error!(
                        "Unsorted lookupswitch keys at offset {}",
                        start
                    ));
                }
                pairs.push((key, offset));
            }
            Operand::LookupSwitch { default, pairs }
        }
        OperandType::Wide => {
            return Err(malformed_error!("Nested wide prefix at offset {}", start));
        }
    };

    Ok(Instruction {
        offset: start as u32,
        size: (parser.pos() - start) as u32,
        opcode,
        wide,
        mnemonic: info.mnemonic,
        flow: info.flow,
        operand,
    })
}

/// Decode a complete code array.
///
/// # Errors
/// Returns [`crate::Error::Empty`] for an empty array, and [`crate::Error::Malformed`] if
/// any instruction is invalid or a branch target is not the start of an instruction.
pub fn decode_stream(code: &[u8]) -> Result<Vec<Instruction>> {
    if code.is_empty() {
        return Err(crate::Error::Empty);
    }

    let mut parser = Parser::new(code);
    let mut instructions = Vec::with_capacity(code.len() / 2);
    while parser.has_more_data() {
        instructions.push(decode_instruction(&mut parser)?);
    }

    let starts: HashSet<u32> = instructions.iter().map(|i| i.offset).collect();
    for instruction in instructions.iter().filter(|i| i.is_branch()) {
        for (target, relative) in instruction
            .branch_targets()
            .into_iter()
            .zip(relative_offsets(&instruction.operand))
        {
            let in_range = i64::from(instruction.offset) + i64::from(relative) >= 0;
            if !in_range || !starts.contains(&target) {
                return Err(malformed_error!(
                    "Branch at offset {} targets {} which is not an instruction start",
                    instruction.offset,
                    i64::from(instruction.offset) + i64::from(relative)
                ));
            }
        }
    }

    Ok(instructions)
}

fn relative_offsets(operand: &Operand) -> Vec<i32> {
    match operand {
        Operand::Branch(relative) => vec![*relative],
        Operand::TableSwitch {
            default, offsets, ..
        } => std::iter::once(*default)
            .chain(offsets.iter().copied())
            .collect(),
        Operand::LookupSwitch { default, pairs } => std::iter::once(*default)
            .chain(pairs.iter().map(|(_, offset)| *offset))
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assembly::FlowType, Error};

    #[test]
    fn wide_forms() {
        let code = [
            opcodes::WIDE,
            opcodes::ALOAD,
            0x01,
            0x00,
            opcodes::WIDE,
            opcodes::IINC,
            0x00,
            0x05,
            0xFF,
            0xFE,
            opcodes::RETURN,
        ];
        let instructions = decode_stream(&code).unwrap();
        assert_eq!(instructions.len(), 3);
        assert!(instructions[0].wide);
        assert_eq!(instructions[0].operand, Operand::Local(256));
        assert_eq!(instructions[0].size, 4);
        assert_eq!(
            instructions[1].operand,
            Operand::Iinc {
                index: 5,
                delta: -2
            }
        );
        assert_eq!(instructions[2].offset, 10);
    }

    #[test]
    fn wide_rejects_other_opcodes() {
        let code = [opcodes::WIDE, opcodes::NOP];
        assert!(matches!(
            decode_stream(&code),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn tableswitch_padding() {
        // iconst_0 at 0, tableswitch at 1, padding to 4
        let mut code = vec![opcodes::ICONST_0, opcodes::TABLESWITCH, 0, 0];
        code.extend_from_slice(&23_i32.to_be_bytes());
        code.extend_from_slice(&0_i32.to_be_bytes());
        code.extend_from_slice(&1_i32.to_be_bytes());
        code.extend_from_slice(&23_i32.to_be_bytes());
        code.extend_from_slice(&23_i32.to_be_bytes());
        code.push(opcodes::RETURN);

        let instructions = decode_stream(&code).unwrap();
        assert_eq!(instructions.len(), 3);
        assert_eq!(instructions[1].size, 23);
        assert_eq!(instructions[1].flow, FlowType::Switch);
        assert_eq!(instructions[1].branch_targets(), vec![24, 24, 24]);
    }

    #[test]
    fn lookupswitch_requires_sorted_keys() {
        let mut code = vec![opcodes::LOOKUPSWITCH, 0, 0, 0];
        code.extend_from_slice(&20_i32.to_be_bytes());
        code.extend_from_slice(&2_i32.to_be_bytes());
        code.extend_from_slice(&5_i32.to_be_bytes());
        code.extend_from_slice(&20_i32.to_be_bytes());
        code.extend_from_slice(&1_i32.to_be_bytes());
        code.extend_from_slice(&20_i32.to_be_bytes());
        assert!(decode_stream(&code).is_err());
    }

    #[test]
    fn branch_into_middle_of_instruction() {
        let code = [opcodes::GOTO, 0x00, 0x01, opcodes::RETURN];
        assert!(matches!(
            decode_stream(&code),
            Err(Error::Malformed { .. })
        ));

        let code = [opcodes::GOTO, 0xFF, 0xFF];
        assert!(decode_stream(&code).is_err());
    }

    #[test]
    fn reserved_and_truncated() {
        assert!(decode_stream(&[0xca]).is_err());
        assert!(matches!(
            decode_stream(&[opcodes::SIPUSH, 0x01]),
            Err(Error::OutOfBounds)
        ));
        assert!(matches!(decode_stream(&[]), Err(Error::Empty)));
    }

    #[test]
    fn invoke_operands() {
        let code = [
            opcodes::INVOKEINTERFACE,
            0x00,
            0x07,
            0x02,
            0x00,
            opcodes::INVOKEDYNAMIC,
            0x00,
            0x09,
            0x00,
            0x00,
            opcodes::MULTIANEWARRAY,
            0x00,
            0x03,
            0x02,
        ];
        let instructions = decode_stream(&code).unwrap();
        assert_eq!(
            instructions[0].operand,
            Operand::InvokeInterface { index: 7, count: 2 }
        );
        assert_eq!(instructions[1].operand, Operand::InvokeDynamic(9));
        assert_eq!(
            instructions[2].operand,
            Operand::MultiANewArray {
                index: 3,
                dimensions: 2
            }
        );
    }
}
