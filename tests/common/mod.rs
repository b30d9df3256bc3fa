//! Shared helpers for the integration tests: hand-assembled classes and readers for the
//! rewritten output.

#![allow(dead_code)]

use allocscope::{
    instrument::{encode_frames, Frame, VerificationType},
    prelude::*,
};

/// Route `log` output through the test harness. Safe to call from every test.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn public_static() -> MemberAccessFlags {
    MemberAccessFlags::PUBLIC | MemberAccessFlags::STATIC
}

fn be(index: u16) -> [u8; 2] {
    index.to_be_bytes()
}

/// `demo/Widget` with `static int[] make() { return new int[4]; }`.
pub fn widget_class() -> Vec<u8> {
    let mut builder = ClassBuilder::new("demo/Widget");
    builder
        .method("make", "()[I", public_static())
        .max_stack(1)
        .code(vec![opcodes::ICONST_4, opcodes::NEWARRAY, 10, opcodes::ARETURN]);
    builder.to_bytes().unwrap()
}

/// `name` with one static method performing `count` primitive array allocations.
pub fn sites_class(name: &str, count: usize) -> Vec<u8> {
    let mut code = Vec::with_capacity(count * 4 + 1);
    for _ in 0..count {
        code.extend_from_slice(&[opcodes::ICONST_1, opcodes::NEWARRAY, 10, opcodes::POP]);
    }
    code.push(opcodes::RETURN);

    let mut builder = ClassBuilder::new(name);
    builder
        .method("run", "()V", public_static())
        .max_stack(1)
        .code(code);
    builder.to_bytes().unwrap()
}

/// `demo/Mixed` with a `tableswitch` whose arms allocate, and an allocating loop.
///
/// ```text
/// static void pick(int k)            static void spin()
///  0: iload_0                          0: iconst_0
///  1: tableswitch 0..1                 1: istore_0
///       0 -> 24, 1 -> 35, def -> 43    2: iload_0
/// 24: new demo/Widget                  3: bipush 10
/// 27: dup                              5: if_icmpge 18
/// 28: invokespecial <init>()V          8: iconst_1
/// 31: pop                              9: newarray int
/// 32: goto 50                         11: pop
/// 35: iconst_2                        12: iinc 0, 1
/// 36: anewarray java/lang/String      15: goto 2
/// 39: pop                             18: return
/// 40: goto 50
/// 43: iconst_2
/// 44: iconst_3
/// 45: multianewarray [[I, 2
/// 49: pop
/// 50: return
/// ```
///
/// `pick` also carries a catch-all handler over `24..50` and line numbers.
pub fn mixed_class() -> Vec<u8> {
    let mut builder = ClassBuilder::new("demo/Mixed");
    let widget = be(builder.pool().add_class("demo/Widget").unwrap());
    let init = be(builder
        .pool()
        .add_methodref("demo/Widget", "<init>", "()V")
        .unwrap());
    let string = be(builder.pool().add_class("java/lang/String").unwrap());
    let grid = be(builder.pool().add_class("[[I").unwrap());

    let mut pick = vec![opcodes::ILOAD_0, opcodes::TABLESWITCH, 0, 0];
    for value in [42i32, 0, 1, 23, 34] {
        pick.extend_from_slice(&value.to_be_bytes());
    }
    pick.extend_from_slice(&[
        opcodes::NEW,
        widget[0],
        widget[1],
        opcodes::DUP,
        opcodes::INVOKESPECIAL,
        init[0],
        init[1],
        opcodes::POP,
        opcodes::GOTO,
        0,
        18,
        opcodes::ICONST_2,
        opcodes::ANEWARRAY,
        string[0],
        string[1],
        opcodes::POP,
        opcodes::GOTO,
        0,
        10,
        opcodes::ICONST_2,
        opcodes::ICONST_3,
        opcodes::MULTIANEWARRAY,
        grid[0],
        grid[1],
        2,
        opcodes::POP,
        opcodes::RETURN,
    ]);
    builder
        .method("pick", "(I)V", public_static())
        .max_stack(2)
        .code(pick)
        .handler(24, 50, 50, 0)
        .line(0, 10)
        .line(24, 11)
        .line(35, 12)
        .line(43, 13);

    builder
        .method("spin", "()V", public_static())
        .max_stack(2)
        .max_locals(1)
        .code(vec![
            opcodes::ICONST_0,
            opcodes::ISTORE_0,
            opcodes::ILOAD_0,
            opcodes::BIPUSH,
            10,
            opcodes::IF_ICMPGE,
            0,
            13,
            opcodes::ICONST_1,
            opcodes::NEWARRAY,
            10,
            opcodes::POP,
            opcodes::IINC,
            0,
            1,
            opcodes::GOTO,
            0xFF,
            0xF3,
            opcodes::RETURN,
        ]);
    builder.to_bytes().unwrap()
}

/// `demo/Big` with a counting loop around `sites` allocations of `new int[1]`, with the
/// stack map frames a compiler emits for it.
///
/// ```text
///  0: iconst_0
///  1: istore_0
///  2: iload_0                 frame [int]
///  3: sipush 1000
///  6: if_icmpge end
///  9: sites x (iconst_1; newarray int; pop)
///     iinc 0, 1
///     goto 2
/// end: return                 frame [int]
/// ```
pub fn long_loop_class(sites: usize) -> Vec<u8> {
    let back = 9 + 4 * sites + 3;
    let end = back + 3;
    let mut code = vec![
        opcodes::ICONST_0,
        opcodes::ISTORE_0,
        opcodes::ILOAD_0,
        opcodes::SIPUSH,
        0x03,
        0xE8,
        opcodes::IF_ICMPGE,
    ];
    code.extend_from_slice(&i16::try_from(end - 6).unwrap().to_be_bytes());
    for _ in 0..sites {
        code.extend_from_slice(&[opcodes::ICONST_1, opcodes::NEWARRAY, 10, opcodes::POP]);
    }
    code.extend_from_slice(&[opcodes::IINC, 0, 1, opcodes::GOTO]);
    code.extend_from_slice(&(2 - i16::try_from(back).unwrap()).to_be_bytes());
    code.push(opcodes::RETURN);

    let frame = |offset: usize| Frame {
        offset: u32::try_from(offset).unwrap(),
        locals: vec![VerificationType::Integer],
        stack: Vec::new(),
    };
    let frames = encode_frames(&[frame(2), frame(end)]).unwrap();

    let mut builder = ClassBuilder::new("demo/Big");
    builder
        .method("run", "()V", public_static())
        .max_stack(2)
        .max_locals(1)
        .code(code)
        .stack_map(frames);
    builder.to_bytes().unwrap()
}

/// `demo/Nest` with `static Object make() { return new Outer(new Inner()); }`.
pub fn nested_constructor_class() -> Vec<u8> {
    let mut builder = ClassBuilder::new("demo/Nest");
    let outer = be(builder.pool().add_class("demo/Outer").unwrap());
    let inner = be(builder.pool().add_class("demo/Inner").unwrap());
    let outer_init = be(builder
        .pool()
        .add_methodref("demo/Outer", "<init>", "(Ldemo/Inner;)V")
        .unwrap());
    let inner_init = be(builder
        .pool()
        .add_methodref("demo/Inner", "<init>", "()V")
        .unwrap());

    builder
        .method("make", "()Ljava/lang/Object;", public_static())
        .max_stack(4)
        .code(vec![
            opcodes::NEW,
            outer[0],
            outer[1],
            opcodes::DUP,
            opcodes::NEW,
            inner[0],
            inner[1],
            opcodes::DUP,
            opcodes::INVOKESPECIAL,
            inner_init[0],
            inner_init[1],
            opcodes::INVOKESPECIAL,
            outer_init[0],
            outer_init[1],
            opcodes::ARETURN,
        ]);
    builder.to_bytes().unwrap()
}

/// The `Code` attribute of the method called `name`.
pub fn method_code(class: &ClassFile, name: &str) -> CodeAttribute {
    let method = class
        .methods
        .iter()
        .find(|m| class.constant_pool.utf8(m.name_index).unwrap() == name.as_bytes())
        .unwrap_or_else(|| panic!("no method {name}"));
    method.code(&class.constant_pool).unwrap().unwrap()
}

/// Names of the `invokestatic` calls to `owner` in every method of `class`, in order.
pub fn hook_calls(class: &ClassFile, owner: &str) -> Vec<String> {
    let mut calls = Vec::new();
    for method in &class.methods {
        let Some(code) = method.code(&class.constant_pool).unwrap() else {
            continue;
        };
        for instruction in decode_stream(&code.code).unwrap() {
            let (opcodes::INVOKESTATIC, Operand::Constant(index)) =
                (instruction.opcode, &instruction.operand)
            else {
                continue;
            };
            let member = class.constant_pool.member_ref(*index).unwrap();
            if member.owner == owner.as_bytes() {
                calls.push(String::from_utf8_lossy(member.name).into_owned());
            }
        }
    }
    calls
}

/// Number of calls named `name` in `calls`.
pub fn count(calls: &[String], name: &str) -> usize {
    calls.iter().filter(|call| call.as_str() == name).count()
}
