//! The static opcode table.
//!
//! One entry per defined opcode byte. Bytes above `jsr_w` (0xc9) are reserved or
//! implementation specific and never valid in a class file.

use crate::assembly::{FlowType, OperandType};

/// Static description of one opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeInfo {
    /// JVMS mnemonic
    pub mnemonic: &'static str,
    /// Encoding of the operand bytes
    pub operand: OperandType,
    /// Control-flow behaviour
    pub flow: FlowType,
}

const fn op(mnemonic: &'static str, operand: OperandType, flow: FlowType) -> OpcodeInfo {
    OpcodeInfo {
        mnemonic,
        operand,
        flow,
    }
}

/// Number of defined opcodes (`0x00..=0xc9`).
pub const OPCODE_COUNT: usize = 202;

/// Opcode table indexed by opcode byte.
pub static INSTRUCTIONS: [OpcodeInfo; OPCODE_COUNT] = [
    /* 0x00 */ op("nop", OperandType::None, FlowType::Sequential),
    /* 0x01 */ op("aconst_null", OperandType::None, FlowType::Sequential),
    /* 0x02 */ op("iconst_m1", OperandType::None, FlowType::Sequential),
    /* 0x03 */ op("iconst_0", OperandType::None, FlowType::Sequential),
    /* 0x04 */ op("iconst_1", OperandType::None, FlowType::Sequential),
    /* 0x05 */ op("iconst_2", OperandType::None, FlowType::Sequential),
    /* 0x06 */ op("iconst_3", OperandType::None, FlowType::Sequential),
    /* 0x07 */ op("iconst_4", OperandType::None, FlowType::Sequential),
    /* 0x08 */ op("iconst_5", OperandType::None, FlowType::Sequential),
    /* 0x09 */ op("lconst_0", OperandType::None, FlowType::Sequential),
    /* 0x0a */ op("lconst_1", OperandType::None, FlowType::Sequential),
    /* 0x0b */ op("fconst_0", OperandType::None, FlowType::Sequential),
    /* 0x0c */ op("fconst_1", OperandType::None, FlowType::Sequential),
    /* 0x0d */ op("fconst_2", OperandType::None, FlowType::Sequential),
    /* 0x0e */ op("dconst_0", OperandType::None, FlowType::Sequential),
    /* 0x0f */ op("dconst_1", OperandType::None, FlowType::Sequential),
    /* 0x10 */ op("bipush", OperandType::Int8, FlowType::Sequential),
    /* 0x11 */ op("sipush", OperandType::Int16, FlowType::Sequential),
    /* 0x12 */ op("ldc", OperandType::ConstIndex8, FlowType::Sequential),
    /* 0x13 */ op("ldc_w", OperandType::ConstIndex16, FlowType::Sequential),
    /* 0x14 */ op("ldc2_w", OperandType::ConstIndex16, FlowType::Sequential),
    /* 0x15 */ op("iload", OperandType::Local, FlowType::Sequential),
    /* 0x16 */ op("lload", OperandType::Local, FlowType::Sequential),
    /* 0x17 */ op("fload", OperandType::Local, FlowType::Sequential),
    /* 0x18 */ op("dload", OperandType::Local, FlowType::Sequential),
    /* 0x19 */ op("aload", OperandType::Local, FlowType::Sequential),
    /* 0x1a */ op("iload_0", OperandType::None, FlowType::Sequential),
    /* 0x1b */ op("iload_1", OperandType::None, FlowType::Sequential),
    /* 0x1c */ op("iload_2", OperandType::None, FlowType::Sequential),
    /* 0x1d */ op("iload_3", OperandType::None, FlowType::Sequential),
    /* 0x1e */ op("lload_0", OperandType::None, FlowType::Sequential),
    /* 0x1f */ op("lload_1", OperandType::None, FlowType::Sequential),
    /* 0x20 */ op("lload_2", OperandType::None, FlowType::Sequential),
    /* 0x21 */ op("lload_3", OperandType::None, FlowType::Sequential),
    /* 0x22 */ op("fload_0", OperandType::None, FlowType::Sequential),
    /* 0x23 */ op("fload_1", OperandType::None, FlowType::Sequential),
    /* 0x24 */ op("fload_2", OperandType::None, FlowType::Sequential),
    /* 0x25 */ op("fload_3", OperandType::None, FlowType::Sequential),
    /* 0x26 */ op("dload_0", OperandType::None, FlowType::Sequential),
    /* 0x27 */ op("dload_1", OperandType::None, FlowType::Sequential),
    /* 0x28 */ op("dload_2", OperandType::None, FlowType::Sequential),
    /* 0x29 */ op("dload_3", OperandType::None, FlowType::Sequential),
    /* 0x2a */ op("aload_0", OperandType::None, FlowType::Sequential),
    /* 0x2b */ op("aload_1", OperandType::None, FlowType::Sequential),
    /* 0x2c */ op("aload_2", OperandType::None, FlowType::Sequential),
    /* 0x2d */ op("aload_3", OperandType::None, FlowType::Sequential),
    /* 0x2e */ op("iaload", OperandType::None, FlowType::Sequential),
    /* 0x2f */ op("laload", OperandType::None, FlowType::Sequential),
    /* 0x30 */ op("faload", OperandType::None, FlowType::Sequential),
    /* 0x31 */ op("daload", OperandType::None, FlowType::Sequential),
    /* 0x32 */ op("aaload", OperandType::None, FlowType::Sequential),
    /* 0x33 */ op("baload", OperandType::None, FlowType::Sequential),
    /* 0x34 */ op("caload", OperandType::None, FlowType::Sequential),
    /* 0x35 */ op("saload", OperandType::None, FlowType::Sequential),
    /* 0x36 */ op("istore", OperandType::Local, FlowType::Sequential),
    /* 0x37 */ op("lstore", OperandType::Local, FlowType::Sequential),
    /* 0x38 */ op("fstore", OperandType::Local, FlowType::Sequential),
    /* 0x39 */ op("dstore", OperandType::Local, FlowType::Sequential),
    /* 0x3a */ op("astore", OperandType::Local, FlowType::Sequential),
    /* 0x3b */ op("istore_0", OperandType::None, FlowType::Sequential),
    /* 0x3c */ op("istore_1", OperandType::None, FlowType::Sequential),
    /* 0x3d */ op("istore_2", OperandType::None, FlowType::Sequential),
    /* 0x3e */ op("istore_3", OperandType::None, FlowType::Sequential),
    /* 0x3f */ op("lstore_0", OperandType::None, FlowType::Sequential),
    /* 0x40 */ op("lstore_1", OperandType::None, FlowType::Sequential),
    /* 0x41 */ op("lstore_2", OperandType::None, FlowType::Sequential),
    /* 0x42 */ op("lstore_3", OperandType::None, FlowType::Sequential),
    /* 0x43 */ op("fstore_0", OperandType::None, FlowType::Sequential),
    /* 0x44 */ op("fstore_1", OperandType::None, FlowType::Sequential),
    /* 0x45 */ op("fstore_2", OperandType::None, FlowType::Sequential),
    /* 0x46 */ op("fstore_3", OperandType::None, FlowType::Sequential),
    /* 0x47 */ op("dstore_0", OperandType::None, FlowType::Sequential),
    /* 0x48 */ op("dstore_1", OperandType::None, FlowType::Sequential),
    /* 0x49 */ op("dstore_2", OperandType::None, FlowType::Sequential),
    /* 0x4a */ op("dstore_3", OperandType::None, FlowType::Sequential),
    /* 0x4b */ op("astore_0", OperandType::None, FlowType::Sequential),
    /* 0x4c */ op("astore_1", OperandType::None, FlowType::Sequential),
    /* 0x4d */ op("astore_2", OperandType::None, FlowType::Sequential),
    /* 0x4e */ op("astore_3", OperandType::None, FlowType::Sequential),
    /* 0x4f */ op("iastore", OperandType::None, FlowType::Sequential),
    /* 0x50 */ op("lastore", OperandType::None, FlowType::Sequential),
    /* 0x51 */ op("fastore", OperandType::None, FlowType::Sequential),
    /* 0x52 */ op("dastore", OperandType::None, FlowType::Sequential),
    /* 0x53 */ op("aastore", OperandType::None, FlowType::Sequential),
    /* 0x54 */ op("bastore", OperandType::None, FlowType::Sequential),
    /* 0x55 */ op("castore", OperandType::None, FlowType::Sequential),
    /* 0x56 */ op("sastore", OperandType::None, FlowType::Sequential),
    /* 0x57 */ op("pop", OperandType::None, FlowType::Sequential),
    /* 0x58 */ op("pop2", OperandType::None, FlowType::Sequential),
    /* 0x59 */ op("dup", OperandType::None, FlowType::Sequential),
    /* 0x5a */ op("dup_x1", OperandType::None, FlowType::Sequential),
    /* 0x5b */ op("dup_x2", OperandType::None, FlowType::Sequential),
    /* 0x5c */ op("dup2", OperandType::None, FlowType::Sequential),
    /* 0x5d */ op("dup2_x1", OperandType::None, FlowType::Sequential),
    /* 0x5e */ op("dup2_x2", OperandType::None, FlowType::Sequential),
    /* 0x5f */ op("swap", OperandType::None, FlowType::Sequential),
    /* 0x60 */ op("iadd", OperandType::None, FlowType::Sequential),
    /* 0x61 */ op("ladd", OperandType::None, FlowType::Sequential),
    /* 0x62 */ op("fadd", OperandType::None, FlowType::Sequential),
    /* 0x63 */ op("dadd", OperandType::None, FlowType::Sequential),
    /* 0x64 */ op("isub", OperandType::None, FlowType::Sequential),
    /* 0x65 */ op("lsub", OperandType::None, FlowType::Sequential),
    /* 0x66 */ op("fsub", OperandType::None, FlowType::Sequential),
    /* 0x67 */ op("dsub", OperandType::None, FlowType::Sequential),
    /* 0x68 */ op("imul", OperandType::None, FlowType::Sequential),
    /* 0x69 */ op("lmul", OperandType::None, FlowType::Sequential),
    /* 0x6a */ op("fmul", OperandType::None, FlowType::Sequential),
    /* 0x6b */ op("dmul", OperandType::None, FlowType::Sequential),
    /* 0x6c */ op("idiv", OperandType::None, FlowType::Sequential),
    /* 0x6d */ op("ldiv", OperandType::None, FlowType::Sequential),
    /* 0x6e */ op("fdiv", OperandType::None, FlowType::Sequential),
    /* 0x6f */ op("ddiv", OperandType::None, FlowType::Sequential),
    /* 0x70 */ op("irem", OperandType::None, FlowType::Sequential),
    /* 0x71 */ op("lrem", OperandType::None, FlowType::Sequential),
    /* 0x72 */ op("frem", OperandType::None, FlowType::Sequential),
    /* 0x73 */ op("drem", OperandType::None, FlowType::Sequential),
    /* 0x74 */ op("ineg", OperandType::None, FlowType::Sequential),
    /* 0x75 */ op("lneg", OperandType::None, FlowType::Sequential),
    /* 0x76 */ op("fneg", OperandType::None, FlowType::Sequential),
    /* 0x77 */ op("dneg", OperandType::None, FlowType::Sequential),
    /* 0x78 */ op("ishl", OperandType::None, FlowType::Sequential),
    /* 0x79 */ op("lshl", OperandType::None, FlowType::Sequential),
    /* 0x7a */ op("ishr", OperandType::None, FlowType::Sequential),
    /* 0x7b */ op("lshr", OperandType::None, FlowType::Sequential),
    /* 0x7c */ op("iushr", OperandType::None, FlowType::Sequential),
    /* 0x7d */ op("lushr", OperandType::None, FlowType::Sequential),
    /* 0x7e */ op("iand", OperandType::None, FlowType::Sequential),
    /* 0x7f */ op("land", OperandType::None, FlowType::Sequential),
    /* 0x80 */ op("ior", OperandType::None, FlowType::Sequential),
    /* 0x81 */ op("lor", OperandType::None, FlowType::Sequential),
    /* 0x82 */ op("ixor", OperandType::None, FlowType::Sequential),
    /* 0x83 */ op("lxor", OperandType::None, FlowType::Sequential),
    /* 0x84 */ op("iinc", OperandType::Iinc, FlowType::Sequential),
    /* 0x85 */ op("i2l", OperandType::None, FlowType::Sequential),
    /* 0x86 */ op("i2f", OperandType::None, FlowType::Sequential),
    /* 0x87 */ op("i2d", OperandType::None, FlowType::Sequential),
    /* 0x88 */ op("l2i", OperandType::None, FlowType::Sequential),
    /* 0x89 */ op("l2f", OperandType::None, FlowType::Sequential),
    /* 0x8a */ op("l2d", OperandType::None, FlowType::Sequential),
    /* 0x8b */ op("f2i", OperandType::None, FlowType::Sequential),
    /* 0x8c */ op("f2l", OperandType::None, FlowType::Sequential),
    /* 0x8d */ op("f2d", OperandType::None, FlowType::Sequential),
    /* 0x8e */ op("d2i", OperandType::None, FlowType::Sequential),
    /* 0x8f */ op("d2l", OperandType::None, FlowType::Sequential),
    /* 0x90 */ op("d2f", OperandType::None, FlowType::Sequential),
    /* 0x91 */ op("i2b", OperandType::None, FlowType::Sequential),
    /* 0x92 */ op("i2c", OperandType::None, FlowType::Sequential),
    /* 0x93 */ op("i2s", OperandType::None, FlowType::Sequential),
    /* 0x94 */ op("lcmp", OperandType::None, FlowType::Sequential),
    /* 0x95 */ op("fcmpl", OperandType::None, FlowType::Sequential),
    /* 0x96 */ op("fcmpg", OperandType::None, FlowType::Sequential),
    /* 0x97 */ op("dcmpl", OperandType::None, FlowType::Sequential),
    /* 0x98 */ op("dcmpg", OperandType::None, FlowType::Sequential),
    /* 0x99 */ op("ifeq", OperandType::Branch16, FlowType::ConditionalBranch),
    /* 0x9a */ op("ifne", OperandType::Branch16, FlowType::ConditionalBranch),
    /* 0x9b */ op("iflt", OperandType::Branch16, FlowType::ConditionalBranch),
    /* 0x9c */ op("ifge", OperandType::Branch16, FlowType::ConditionalBranch),
    /* 0x9d */ op("ifgt", OperandType::Branch16, FlowType::ConditionalBranch),
    /* 0x9e */ op("ifle", OperandType::Branch16, FlowType::ConditionalBranch),
    /* 0x9f */ op("if_icmpeq", OperandType::Branch16, FlowType::ConditionalBranch),
    /* 0xa0 */ op("if_icmpne", OperandType::Branch16, FlowType::ConditionalBranch),
    /* 0xa1 */ op("if_icmplt", OperandType::Branch16, FlowType::ConditionalBranch),
    /* 0xa2 */ op("if_icmpge", OperandType::Branch16, FlowType::ConditionalBranch),
    /* 0xa3 */ op("if_icmpgt", OperandType::Branch16, FlowType::ConditionalBranch),
    /* 0xa4 */ op("if_icmple", OperandType::Branch16, FlowType::ConditionalBranch),
    /* 0xa5 */ op("if_acmpeq", OperandType::Branch16, FlowType::ConditionalBranch),
    /* 0xa6 */ op("if_acmpne", OperandType::Branch16, FlowType::ConditionalBranch),
    /* 0xa7 */ op("goto", OperandType::Branch16, FlowType::UnconditionalBranch),
    /* 0xa8 */ op("jsr", OperandType::Branch16, FlowType::Subroutine),
    /* 0xa9 */ op("ret", OperandType::Local, FlowType::Subroutine),
    /* 0xaa */ op("tableswitch", OperandType::TableSwitch, FlowType::Switch),
    /* 0xab */ op("lookupswitch", OperandType::LookupSwitch, FlowType::Switch),
    /* 0xac */ op("ireturn", OperandType::None, FlowType::Return),
    /* 0xad */ op("lreturn", OperandType::None, FlowType::Return),
    /* 0xae */ op("freturn", OperandType::None, FlowType::Return),
    /* 0xaf */ op("dreturn", OperandType::None, FlowType::Return),
    /* 0xb0 */ op("areturn", OperandType::None, FlowType::Return),
    /* 0xb1 */ op("return", OperandType::None, FlowType::Return),
    /* 0xb2 */ op("getstatic", OperandType::ConstIndex16, FlowType::Sequential),
    /* 0xb3 */ op("putstatic", OperandType::ConstIndex16, FlowType::Sequential),
    /* 0xb4 */ op("getfield", OperandType::ConstIndex16, FlowType::Sequential),
    /* 0xb5 */ op("putfield", OperandType::ConstIndex16, FlowType::Sequential),
    /* 0xb6 */ op("invokevirtual", OperandType::ConstIndex16, FlowType::Call),
    /* 0xb7 */ op("invokespecial", OperandType::ConstIndex16, FlowType::Call),
    /* 0xb8 */ op("invokestatic", OperandType::ConstIndex16, FlowType::Call),
    /* 0xb9 */ op("invokeinterface", OperandType::InvokeInterface, FlowType::Call),
    /* 0xba */ op("invokedynamic", OperandType::InvokeDynamic, FlowType::Call),
    /* 0xbb */ op("new", OperandType::ConstIndex16, FlowType::Sequential),
    /* 0xbc */ op("newarray", OperandType::AType, FlowType::Sequential),
    /* 0xbd */ op("anewarray", OperandType::ConstIndex16, FlowType::Sequential),
    /* 0xbe */ op("arraylength", OperandType::None, FlowType::Sequential),
    /* 0xbf */ op("athrow", OperandType::None, FlowType::Throw),
    /* 0xc0 */ op("checkcast", OperandType::ConstIndex16, FlowType::Sequential),
    /* 0xc1 */ op("instanceof", OperandType::ConstIndex16, FlowType::Sequential),
    /* 0xc2 */ op("monitorenter", OperandType::None, FlowType::Sequential),
    /* 0xc3 */ op("monitorexit", OperandType::None, FlowType::Sequential),
    /* 0xc4 */ op("wide", OperandType::Wide, FlowType::Sequential),
    /* 0xc5 */ op("multianewarray", OperandType::MultiANewArray, FlowType::Sequential),
    /* 0xc6 */ op("ifnull", OperandType::Branch16, FlowType::ConditionalBranch),
    /* 0xc7 */ op("ifnonnull", OperandType::Branch16, FlowType::ConditionalBranch),
    /* 0xc8 */ op("goto_w", OperandType::Branch32, FlowType::UnconditionalBranch),
    /* 0xc9 */ op("jsr_w", OperandType::Branch32, FlowType::Subroutine),
];

/// Look up an opcode byte; reserved bytes yield `None`.
#[must_use]
pub fn lookup(opcode: u8) -> Option<&'static OpcodeInfo> {
    INSTRUCTIONS.get(opcode as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::opcodes;

    #[test]
    fn table_matches_opcode_constants() {
        assert_eq!(INSTRUCTIONS[opcodes::NEW as usize].mnemonic, "new");
        assert_eq!(
            INSTRUCTIONS[opcodes::MULTIANEWARRAY as usize].mnemonic,
            "multianewarray"
        );
        assert_eq!(INSTRUCTIONS[opcodes::JSR_W as usize].mnemonic, "jsr_w");
        assert_eq!(INSTRUCTIONS[opcodes::WIDE as usize].operand, OperandType::Wide);
        assert_eq!(
            INSTRUCTIONS[opcodes::GOTO as usize].flow,
            FlowType::UnconditionalBranch
        );
        assert_eq!(
            INSTRUCTIONS[opcodes::IFNULL as usize].flow,
            FlowType::ConditionalBranch
        );
        assert_eq!(INSTRUCTIONS[opcodes::ARETURN as usize].flow, FlowType::Return);
    }

    #[test]
    fn reserved_bytes() {
        assert!(lookup(0xca).is_none());
        assert!(lookup(0xff).is_none());
        assert!(lookup(opcodes::NOP).is_some());
    }
}
