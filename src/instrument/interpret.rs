//! Straight-line type inference over bytecode.
//!
//! Widening a conditional branch (`if<cond> L` becomes `if<!cond> +8; goto_w L`) creates a
//! branch target behind the `goto_w`, and with it the need for a stack map frame that the
//! original method never had. Its content follows from the nearest preceding frame and the
//! instructions between that frame and the branch: nothing in between is a branch target
//! (every branch target carries a frame of its own), so the type state is carried forward
//! one instruction at a time without merging and without class hierarchy queries.

use crate::{
    assembly::{decode_instruction, opcodes, FlowType, Instruction, Operand},
    classfile::{
        constpool::{Constant, ConstantPool},
        descriptor::{parse_field_type, primitive_for_atype, FieldType, MethodDescriptor},
    },
    file::parser::Parser,
    instrument::frames::{Frame, FrameContext, VerificationType},
    Result,
};

const INIT: &[u8] = b"<init>";

/// The verification type of a value of the given field type.
pub(crate) fn value_type(pool: &mut ConstantPool, field: FieldType<'_>) -> Result<VerificationType> {
    Ok(match field {
        FieldType::Base(b'F') => VerificationType::Float,
        FieldType::Base(b'J') => VerificationType::Long,
        FieldType::Base(b'D') => VerificationType::Double,
        FieldType::Base(_) => VerificationType::Integer,
        FieldType::Object(name) | FieldType::Array(name) => {
            VerificationType::Object(pool.add_class_bytes(name.to_vec())?)
        }
    })
}

fn descriptor_type(pool: &mut ConstantPool, descriptor: &[u8]) -> Result<VerificationType> {
    let mut pos = 0;
    let field = parse_field_type(descriptor, &mut pos)?;
    value_type(pool, field)
}

fn object(pool: &mut ConstantPool, name: &[u8]) -> Result<VerificationType> {
    Ok(VerificationType::Object(pool.add_class_bytes(name.to_vec())?))
}

fn is_wide(value: VerificationType) -> bool {
    matches!(value, VerificationType::Long | VerificationType::Double)
}

/// Locals indexed by slot (the slot after a `long`/`double` holds `Top`) and the operand
/// stack with one entry per value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TypeState {
    locals: Vec<VerificationType>,
    stack: Vec<VerificationType>,
}

impl TypeState {
    pub(crate) fn from_frame(frame: &Frame) -> Self {
        let mut locals = Vec::with_capacity(frame.locals.len());
        for local in &frame.locals {
            locals.push(*local);
            if is_wide(*local) {
                locals.push(VerificationType::Top);
            }
        }
        TypeState {
            locals,
            stack: frame.stack.clone(),
        }
    }

    pub(crate) fn into_frame(self, offset: u32) -> Frame {
        let mut locals = Vec::with_capacity(self.locals.len());
        let mut slot = 0;
        while let Some(local) = self.locals.get(slot) {
            locals.push(*local);
            slot += usize::from(local.slots());
        }
        while locals.last() == Some(&VerificationType::Top) {
            locals.pop();
        }
        Frame {
            offset,
            locals,
            stack: self.stack,
        }
    }

    fn push(&mut self, value: VerificationType) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<VerificationType> {
        self.stack
            .pop()
            .ok_or_else(|| malformed_error!("Operand stack underflow"))
    }

    fn pop_n(&mut self, count: usize) -> Result<()> {
        for _ in 0..count {
            self.pop()?;
        }
        Ok(())
    }

    fn load(&self, slot: u16) -> Result<VerificationType> {
        match self.locals.get(usize::from(slot)) {
            Some(value) => Ok(*value),
            None => Err(malformed_error!("Load from unset local {}", slot)),
        }
    }

    fn store(&mut self, slot: u16, value: VerificationType) {
        let slot = usize::from(slot);
        let end = slot + usize::from(value.slots());
        if self.locals.len() < end {
            self.locals.resize(end, VerificationType::Top);
        }
        // a store into the upper half of a long or double kills it
        if slot > 0 && is_wide(self.locals[slot - 1]) {
            self.locals[slot - 1] = VerificationType::Top;
        }
        self.locals[slot] = value;
        if is_wide(value) {
            self.locals[slot + 1] = VerificationType::Top;
        }
    }

    fn replace(&mut self, from: VerificationType, to: VerificationType) {
        for value in self.locals.iter_mut().chain(self.stack.iter_mut()) {
            if *value == from {
                *value = to;
            }
        }
    }

    fn invoke(
        &mut self,
        pool: &mut ConstantPool,
        context: &FrameContext<'_>,
        instruction: &Instruction,
        method: u16,
    ) -> Result<()> {
        let member = pool.member_ref(method)?;
        let owner = member.owner.to_vec();
        let name = member.name.to_vec();
        let descriptor = member.descriptor.to_vec();

        let parsed = MethodDescriptor::parse(&descriptor)?;
        self.pop_n(parsed.params.len())?;
        if instruction.opcode != opcodes::INVOKESTATIC {
            let receiver = self.pop()?;
            if instruction.opcode == opcodes::INVOKESPECIAL && name == INIT {
                match receiver {
                    VerificationType::UninitializedThis => {
                        let this = object(pool, context.class_name)?;
                        self.replace(receiver, this);
                    }
                    VerificationType::Uninitialized(_) => {
                        let class = object(pool, &owner)?;
                        self.replace(receiver, class);
                    }
                    _ => {}
                }
            }
        }
        if let Some(ret) = parsed.ret {
            let value = value_type(pool, ret)?;
            self.push(value);
        }
        Ok(())
    }

    fn constant(&mut self, pool: &mut ConstantPool, index: u16) -> Result<()> {
        let value = match pool.get(index)?.clone() {
            Constant::Integer(_) => VerificationType::Integer,
            Constant::Float(_) => VerificationType::Float,
            Constant::Long(_) => VerificationType::Long,
            Constant::Double(_) => VerificationType::Double,
            Constant::String { .. } => object(pool, b"java/lang/String")?,
            Constant::Class { .. } => object(pool, b"java/lang/Class")?,
            Constant::MethodType { .. } => object(pool, b"java/lang/invoke/MethodType")?,
            Constant::MethodHandle { .. } => object(pool, b"java/lang/invoke/MethodHandle")?,
            Constant::Dynamic {
                name_and_type_index,
                ..
            } => {
                let descriptor = name_and_type_descriptor(pool, name_and_type_index)?;
                descriptor_type(pool, &descriptor)?
            }
            other => return Err(malformed_error!("ldc of {:?}", other)),
        };
        self.push(value);
        Ok(())
    }

    /// Apply one instruction that falls through to the next.
    ///
    /// Conditional branches only pop their operands. Anything that cannot fall through is
    /// an error: the walk never needs to cross one.
    #[allow(clippy::too_many_lines)]
    pub(crate) fn execute(
        &mut self,
        pool: &mut ConstantPool,
        context: &FrameContext<'_>,
        instruction: &Instruction,
    ) -> Result<()> {
        use VerificationType::{Double, Float, Integer, Long, Null, Top};

        if matches!(
            instruction.flow,
            FlowType::UnconditionalBranch
                | FlowType::Subroutine
                | FlowType::Return
                | FlowType::Switch
                | FlowType::Throw
        ) {
            return Err(malformed_error!(
                "{} at offset {} does not fall through",
                instruction.mnemonic,
                instruction.offset
            ));
        }

        let op = instruction.opcode;
        match op {
            opcodes::NOP | opcodes::IINC => {}
            opcodes::ACONST_NULL => self.push(Null),
            opcodes::ICONST_M1..=opcodes::ICONST_5 | opcodes::BIPUSH | opcodes::SIPUSH => {
                self.push(Integer);
            }
            opcodes::LCONST_0 | opcodes::LCONST_1 => self.push(Long),
            opcodes::FCONST_0..=opcodes::FCONST_2 => self.push(Float),
            opcodes::DCONST_0 | opcodes::DCONST_1 => self.push(Double),
            opcodes::LDC | opcodes::LDC_W | opcodes::LDC2_W => {
                let Operand::Constant(index) = instruction.operand else {
                    return Err(malformed_error!("ldc without constant"));
                };
                self.constant(pool, index)?;
            }

            opcodes::ILOAD..=opcodes::ALOAD => {
                let Operand::Local(slot) = instruction.operand else {
                    return Err(malformed_error!("load without local"));
                };
                let value = match op {
                    opcodes::ILOAD => Integer,
                    opcodes::LLOAD => Long,
                    opcodes::FLOAD => Float,
                    opcodes::DLOAD => Double,
                    _ => self.load(slot)?,
                };
                self.push(value);
            }
            opcodes::ILOAD_0..=opcodes::ALOAD_3 => {
                let group = (op - opcodes::ILOAD_0) / 4;
                let slot = u16::from((op - opcodes::ILOAD_0) % 4);
                let value = match group {
                    0 => Integer,
                    1 => Long,
                    2 => Float,
                    3 => Double,
                    _ => self.load(slot)?,
                };
                self.push(value);
            }

            opcodes::IALOAD | opcodes::BALOAD | opcodes::CALOAD | opcodes::SALOAD => {
                self.pop_n(2)?;
                self.push(Integer);
            }
            opcodes::LALOAD => {
                self.pop_n(2)?;
                self.push(Long);
            }
            opcodes::FALOAD => {
                self.pop_n(2)?;
                self.push(Float);
            }
            opcodes::DALOAD => {
                self.pop_n(2)?;
                self.push(Double);
            }
            opcodes::AALOAD => {
                self.pop()?;
                let component = match self.pop()? {
                    VerificationType::Object(array) => {
                        let name = pool.class_name(array)?.to_vec();
                        match name.split_first() {
                            Some((b'[', component)) => descriptor_type(pool, component)?,
                            _ => return Err(malformed_error!("aaload from a non-array")),
                        }
                    }
                    Null => Null,
                    other => return Err(malformed_error!("aaload from {:?}", other)),
                };
                self.push(component);
            }

            opcodes::ISTORE..=opcodes::ASTORE => {
                let Operand::Local(slot) = instruction.operand else {
                    return Err(malformed_error!("store without local"));
                };
                let value = self.pop()?;
                self.store(slot, value);
            }
            opcodes::ISTORE_0..=opcodes::ASTORE_3 => {
                let value = self.pop()?;
                self.store(u16::from((op - opcodes::ISTORE_0) % 4), value);
            }
            opcodes::IASTORE..=opcodes::SASTORE => self.pop_n(3)?,

            opcodes::POP => {
                self.pop()?;
            }
            opcodes::POP2 => {
                if !is_wide(self.pop()?) {
                    self.pop()?;
                }
            }
            opcodes::DUP => {
                let v1 = self.pop()?;
                self.stack.extend([v1, v1]);
            }
            opcodes::DUP_X1 => {
                let v1 = self.pop()?;
                let v2 = self.pop()?;
                self.stack.extend([v1, v2, v1]);
            }
            opcodes::DUP_X2 => {
                let v1 = self.pop()?;
                let v2 = self.pop()?;
                if is_wide(v2) {
                    self.stack.extend([v1, v2, v1]);
                } else {
                    let v3 = self.pop()?;
                    self.stack.extend([v1, v3, v2, v1]);
                }
            }
            opcodes::DUP2 => {
                let v1 = self.pop()?;
                if is_wide(v1) {
                    self.stack.extend([v1, v1]);
                } else {
                    let v2 = self.pop()?;
                    self.stack.extend([v2, v1, v2, v1]);
                }
            }
            opcodes::DUP2_X1 => {
                let v1 = self.pop()?;
                let v2 = self.pop()?;
                if is_wide(v1) {
                    self.stack.extend([v1, v2, v1]);
                } else {
                    let v3 = self.pop()?;
                    self.stack.extend([v2, v1, v3, v2, v1]);
                }
            }
            opcodes::DUP2_X2 => {
                let v1 = self.pop()?;
                let v2 = self.pop()?;
                match (is_wide(v1), is_wide(v2)) {
                    (true, true) => self.stack.extend([v1, v2, v1]),
                    (true, false) => {
                        let v3 = self.pop()?;
                        self.stack.extend([v1, v3, v2, v1]);
                    }
                    (false, _) => {
                        let v3 = self.pop()?;
                        if is_wide(v3) {
                            self.stack.extend([v2, v1, v3, v2, v1]);
                        } else {
                            let v4 = self.pop()?;
                            self.stack.extend([v2, v1, v4, v3, v2, v1]);
                        }
                    }
                }
            }
            opcodes::SWAP => {
                let v1 = self.pop()?;
                let v2 = self.pop()?;
                self.stack.extend([v1, v2]);
            }

            opcodes::IADD..=opcodes::DREM => {
                self.pop_n(2)?;
                self.push([Integer, Long, Float, Double][usize::from((op - opcodes::IADD) % 4)]);
            }
            opcodes::INEG..=opcodes::DNEG => {
                self.pop()?;
                self.push([Integer, Long, Float, Double][usize::from(op - opcodes::INEG)]);
            }
            opcodes::ISHL..=opcodes::LXOR => {
                self.pop_n(2)?;
                self.push(if (op - opcodes::ISHL) % 2 == 0 { Integer } else { Long });
            }
            opcodes::I2L..=opcodes::I2S => {
                self.pop()?;
                self.push(match op {
                    opcodes::I2L | opcodes::F2L | opcodes::D2L => Long,
                    opcodes::I2F | opcodes::L2F | opcodes::D2F => Float,
                    opcodes::I2D | opcodes::L2D | opcodes::F2D => Double,
                    _ => Integer,
                });
            }
            opcodes::LCMP..=opcodes::DCMPG => {
                self.pop_n(2)?;
                self.push(Integer);
            }

            opcodes::IFEQ..=opcodes::IFLE | opcodes::IFNULL | opcodes::IFNONNULL => {
                self.pop()?;
            }
            opcodes::IF_ICMPEQ..=opcodes::IF_ACMPNE => self.pop_n(2)?,

            opcodes::GETSTATIC | opcodes::GETFIELD | opcodes::PUTSTATIC | opcodes::PUTFIELD => {
                let Operand::Constant(field) = instruction.operand else {
                    return Err(malformed_error!("field access without constant"));
                };
                let descriptor = pool.member_ref(field)?.descriptor.to_vec();
                match op {
                    opcodes::GETSTATIC => {
                        let value = descriptor_type(pool, &descriptor)?;
                        self.push(value);
                    }
                    opcodes::GETFIELD => {
                        self.pop()?;
                        let value = descriptor_type(pool, &descriptor)?;
                        self.push(value);
                    }
                    opcodes::PUTSTATIC => self.pop_n(1)?,
                    _ => self.pop_n(2)?,
                }
            }
            opcodes::INVOKEVIRTUAL
            | opcodes::INVOKESPECIAL
            | opcodes::INVOKESTATIC
            | opcodes::INVOKEINTERFACE => {
                let method = match instruction.operand {
                    Operand::Constant(method) | Operand::InvokeInterface { index: method, .. } => {
                        method
                    }
                    _ => return Err(malformed_error!("invoke without method reference")),
                };
                self.invoke(pool, context, instruction, method)?;
            }
            opcodes::INVOKEDYNAMIC => {
                let Operand::InvokeDynamic(index) = instruction.operand else {
                    return Err(malformed_error!("invokedynamic without call site"));
                };
                let &Constant::InvokeDynamic {
                    name_and_type_index,
                    ..
                } = pool.get(index)?
                else {
                    return Err(malformed_error!("Constant {} is not InvokeDynamic", index));
                };
                let descriptor = name_and_type_descriptor(pool, name_and_type_index)?;
                let parsed = MethodDescriptor::parse(&descriptor)?;
                self.pop_n(parsed.params.len())?;
                if let Some(ret) = parsed.ret {
                    let value = value_type(pool, ret)?;
                    self.push(value);
                }
            }

            opcodes::NEW => self.push(VerificationType::Uninitialized(instruction.offset)),
            opcodes::NEWARRAY => {
                let Operand::AType(atype) = instruction.operand else {
                    return Err(malformed_error!("newarray without type"));
                };
                let Some(element) = primitive_for_atype(atype) else {
                    return Err(malformed_error!("Invalid newarray type {}", atype));
                };
                self.pop()?;
                let array = object(pool, &[b'[', element])?;
                self.push(array);
            }
            opcodes::ANEWARRAY => {
                let Operand::Constant(class) = instruction.operand else {
                    return Err(malformed_error!("anewarray without class"));
                };
                let element = pool.class_name(class)?.to_vec();
                let mut array = vec![b'['];
                if element.first() == Some(&b'[') {
                    array.extend_from_slice(&element);
                } else {
                    array.push(b'L');
                    array.extend_from_slice(&element);
                    array.push(b';');
                }
                self.pop()?;
                let value = object(pool, &array)?;
                self.push(value);
            }
            opcodes::MULTIANEWARRAY => {
                let Operand::MultiANewArray { index, dimensions } = instruction.operand else {
                    return Err(malformed_error!("multianewarray without class"));
                };
                self.pop_n(usize::from(dimensions))?;
                self.push(VerificationType::Object(index));
            }
            opcodes::CHECKCAST => {
                let Operand::Constant(class) = instruction.operand else {
                    return Err(malformed_error!("checkcast without class"));
                };
                self.pop()?;
                self.push(VerificationType::Object(class));
            }
            opcodes::ARRAYLENGTH | opcodes::INSTANCEOF => {
                self.pop()?;
                self.push(Integer);
            }
            opcodes::MONITORENTER | opcodes::MONITOREXIT => {
                self.pop()?;
            }
            _ => {
                return Err(malformed_error!(
                    "Cannot infer types across {} at offset {}",
                    instruction.mnemonic,
                    instruction.offset
                ))
            }
        }

        debug_assert!(self.stack.iter().all(|value| *value != Top));
        Ok(())
    }
}

fn name_and_type_descriptor(pool: &ConstantPool, index: u16) -> Result<Vec<u8>> {
    match pool.get(index)? {
        Constant::NameAndType {
            descriptor_index, ..
        } => Ok(pool.utf8(*descriptor_index)?.to_vec()),
        other => Err(malformed_error!(
            "Constant {} is not NameAndType but {:?}",
            index,
            other
        )),
    }
}

/// The frame at `resume`, reached from the conditional branch at `branch` when the branch
/// is not taken, computed by walking forward from `from`.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if the code between `from` and `branch` does not
/// decode, does not fall through, or does not type-check.
pub(crate) fn fall_through_frame(
    context: &FrameContext<'_>,
    pool: &mut ConstantPool,
    code: &[u8],
    from: &Frame,
    branch: u32,
    resume: u32,
) -> Result<Frame> {
    let mut state = TypeState::from_frame(from);
    let mut parser = Parser::new(code);
    parser.seek(from.offset as usize)?;

    loop {
        let instruction = decode_instruction(&mut parser)?;
        if instruction.offset > branch {
            return Err(malformed_error!(
                "No instruction starts at branch offset {}",
                branch
            ));
        }
        state.execute(pool, context, &instruction)?;
        if instruction.offset == branch {
            return Ok(state.into_frame(resume));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::decode_stream;

    fn context<'a>() -> FrameContext<'a> {
        FrameContext {
            class_name: b"demo/Widget",
            method_name: b"<init>",
            descriptor: b"()V",
            is_static: false,
            major_version: 52,
            loader: None,
        }
    }

    fn run(pool: &mut ConstantPool, state: &mut TypeState, code: &[u8]) {
        for instruction in decode_stream(code).unwrap() {
            state.execute(pool, &context(), &instruction).unwrap();
        }
    }

    fn empty() -> TypeState {
        TypeState::from_frame(&Frame {
            offset: 0,
            locals: Vec::new(),
            stack: Vec::new(),
        })
    }

    #[test]
    fn wide_values_and_stack_shuffles() {
        let mut pool = ConstantPool::new();
        let mut state = empty();
        run(
            &mut pool,
            &mut state,
            &[opcodes::LCONST_1, opcodes::ICONST_0, opcodes::DUP_X2],
        );
        assert_eq!(
            state.stack,
            vec![
                VerificationType::Integer,
                VerificationType::Long,
                VerificationType::Integer
            ]
        );

        run(&mut pool, &mut state, &[opcodes::POP, opcodes::DUP2, opcodes::POP2]);
        assert_eq!(
            state.stack,
            vec![VerificationType::Integer, VerificationType::Long]
        );

        run(&mut pool, &mut state, &[opcodes::DUP2_X1]);
        assert_eq!(
            state.stack,
            vec![
                VerificationType::Long,
                VerificationType::Integer,
                VerificationType::Long
            ]
        );
    }

    #[test]
    fn stores_split_wide_locals() {
        let mut pool = ConstantPool::new();
        let mut state = empty();
        // long in 0-1 and float in 2; an int into slot 1 then kills the long
        run(
            &mut pool,
            &mut state,
            &[
                opcodes::LCONST_0,
                opcodes::LSTORE_0,
                opcodes::FCONST_1,
                opcodes::FSTORE_2,
            ],
        );
        let frame = state.clone().into_frame(7);
        assert_eq!(frame.offset, 7);
        assert_eq!(
            frame.locals,
            vec![VerificationType::Long, VerificationType::Float]
        );

        run(&mut pool, &mut state, &[opcodes::ICONST_0, opcodes::ISTORE_1]);
        assert_eq!(
            state.into_frame(9).locals,
            vec![
                VerificationType::Top,
                VerificationType::Integer,
                VerificationType::Float
            ]
        );
    }

    #[test]
    fn constructor_call_initializes_every_copy() {
        let mut pool = ConstantPool::new();
        let widget = pool.add_class("demo/Widget").unwrap();
        let init = pool.add_methodref("demo/Widget", "<init>", "()V").unwrap();
        let [wh, wl] = widget.to_be_bytes();
        let [ih, il] = init.to_be_bytes();

        let mut state = empty();
        run(
            &mut pool,
            &mut state,
            &[
                opcodes::NEW,
                wh,
                wl,
                opcodes::DUP,
                opcodes::ASTORE_1,
                opcodes::DUP,
                opcodes::INVOKESPECIAL,
                ih,
                il,
            ],
        );
        let expected = VerificationType::Object(widget);
        assert_eq!(state.stack, vec![expected]);
        assert_eq!(state.load(1).unwrap(), expected);

        let mut this = TypeState::from_frame(&Frame {
            offset: 0,
            locals: vec![VerificationType::UninitializedThis],
            stack: Vec::new(),
        });
        let object_init = pool
            .add_methodref("java/lang/Object", "<init>", "()V")
            .unwrap();
        let [oh, ol] = object_init.to_be_bytes();
        run(
            &mut pool,
            &mut this,
            &[opcodes::ALOAD_0, opcodes::INVOKESPECIAL, oh, ol],
        );
        assert_eq!(this.load(0).unwrap(), expected);
    }

    #[test]
    fn array_element_types() {
        let mut pool = ConstantPool::new();
        let strings = pool.add_class("java/lang/String").unwrap();
        let [sh, sl] = strings.to_be_bytes();

        let mut state = empty();
        run(
            &mut pool,
            &mut state,
            &[
                opcodes::ICONST_2,
                opcodes::ANEWARRAY,
                sh,
                sl,
                opcodes::ICONST_0,
                opcodes::AALOAD,
            ],
        );
        assert_eq!(state.stack, vec![VerificationType::Object(strings)]);

        run(&mut pool, &mut state, &[opcodes::ACONST_NULL, opcodes::ICONST_0, opcodes::AALOAD]);
        assert_eq!(state.stack[1], VerificationType::Null);
    }

    #[test]
    fn walk_stops_at_branch() {
        let mut pool = ConstantPool::new();
        // 0: iload_0; 1: bipush 9; 3: if_icmplt +8; 6: goto_w ...; 11: return
        let code = [
            opcodes::ILOAD_0,
            opcodes::BIPUSH,
            9,
            opcodes::IF_ICMPLT,
            0,
            8,
            opcodes::GOTO_W,
            0,
            0,
            0,
            5,
            opcodes::RETURN,
        ];
        let from = Frame {
            offset: 0,
            locals: vec![VerificationType::Integer],
            stack: Vec::new(),
        };
        let frame = fall_through_frame(&context(), &mut pool, &code, &from, 3, 11).unwrap();
        assert_eq!(frame.offset, 11);
        assert_eq!(frame.locals, vec![VerificationType::Integer]);
        assert!(frame.stack.is_empty());

        // a goto between the frame and the branch means the walk started at the wrong frame
        assert!(fall_through_frame(&context(), &mut pool, &code, &from, 11, 11).is_err());
    }
}
