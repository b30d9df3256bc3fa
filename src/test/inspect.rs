//! Reading rewritten classes back.

use crate::{
    assembly::{decode_stream, opcodes, Instruction, Operand},
    classfile::{ClassFile, CodeAttribute, Constant},
};

/// The decoded `Code` attribute of the method called `name`.
pub fn method_code(class: &ClassFile, name: &str) -> CodeAttribute {
    let method = class
        .methods
        .iter()
        .find(|m| class.constant_pool.utf8(m.name_index).unwrap() == name.as_bytes())
        .unwrap_or_else(|| panic!("no method {name}"));
    method.code(&class.constant_pool).unwrap().unwrap()
}

/// A static call found in rewritten code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticCall {
    /// Index in the decoded stream
    pub index: usize,
    /// Method name
    pub name: String,
    /// Method descriptor
    pub descriptor: String,
}

/// Every `invokestatic` to `owner` in `code`, in order.
pub fn calls_to(class: &ClassFile, code: &CodeAttribute, owner: &str) -> Vec<StaticCall> {
    decode_stream(&code.code)
        .unwrap()
        .iter()
        .enumerate()
        .filter_map(|(index, instruction)| {
            let (opcodes::INVOKESTATIC, Operand::Constant(method)) =
                (instruction.opcode, &instruction.operand)
            else {
                return None;
            };
            let member = class.constant_pool.member_ref(*method).unwrap();
            (member.owner == owner.as_bytes()).then(|| StaticCall {
                index,
                name: String::from_utf8_lossy(member.name).into_owned(),
                descriptor: String::from_utf8_lossy(member.descriptor).into_owned(),
            })
        })
        .collect()
}

/// The decoded instructions of `code`.
pub fn instructions(code: &CodeAttribute) -> Vec<Instruction> {
    decode_stream(&code.code).unwrap()
}

/// The contents of the string loaded by an `ldc`/`ldc_w`, if it loads one.
pub fn ldc_string(class: &ClassFile, instruction: &Instruction) -> Option<Vec<u8>> {
    let Operand::Constant(index) = instruction.operand else {
        return None;
    };
    if !matches!(instruction.opcode, opcodes::LDC | opcodes::LDC_W) {
        return None;
    }
    match class.constant_pool.get(index).ok()? {
        Constant::String { string_index } => {
            class.constant_pool.utf8(*string_index).ok().map(<[u8]>::to_vec)
        }
        _ => None,
    }
}
