//! Fields and methods (JVMS §4.5, §4.6) and the access flags of classes and members.

use bitflags::bitflags;

use crate::{
    classfile::{
        attributes::{names, AttributeInfo, CodeAttribute},
        constpool::ConstantPool,
    },
    file::{io::push_be, parser::Parser},
    Result,
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Class access and property flags
    pub struct ClassAccessFlags: u16 {
        /// Declared `public`
        const PUBLIC = 0x0001;
        /// Declared `final`
        const FINAL = 0x0010;
        /// Treat superclass methods specially in `invokespecial`
        const SUPER = 0x0020;
        /// Is an interface
        const INTERFACE = 0x0200;
        /// Declared `abstract`
        const ABSTRACT = 0x0400;
        /// Not present in source code
        const SYNTHETIC = 0x1000;
        /// Declared as an annotation interface
        const ANNOTATION = 0x2000;
        /// Declared as an enum class
        const ENUM = 0x4000;
        /// Is a module descriptor
        const MODULE = 0x8000;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Field and method access and property flags
    pub struct MemberAccessFlags: u16 {
        /// Declared `public`
        const PUBLIC = 0x0001;
        /// Declared `private`
        const PRIVATE = 0x0002;
        /// Declared `protected`
        const PROTECTED = 0x0004;
        /// Declared `static`
        const STATIC = 0x0008;
        /// Declared `final`
        const FINAL = 0x0010;
        /// Method declared `synchronized`
        const SYNCHRONIZED = 0x0020;
        /// Field declared `volatile`, or a bridge method
        const VOLATILE_OR_BRIDGE = 0x0040;
        /// Field declared `transient`, or a varargs method
        const TRANSIENT_OR_VARARGS = 0x0080;
        /// Method declared `native`
        const NATIVE = 0x0100;
        /// Method declared `abstract`
        const ABSTRACT = 0x0400;
        /// Method declared `strictfp`
        const STRICT = 0x0800;
        /// Not present in source code
        const SYNTHETIC = 0x1000;
        /// Field is an enum constant
        const ENUM = 0x4000;
    }
}

/// A field or method declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    /// Access flags; unknown bits are preserved
    pub access_flags: u16,
    /// Utf8 index of the simple name
    pub name_index: u16,
    /// Utf8 index of the descriptor
    pub descriptor_index: u16,
    /// Member attributes
    pub attributes: Vec<AttributeInfo>,
}

impl MemberInfo {
    /// Read one member.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for truncated input.
    pub fn read(parser: &mut Parser) -> Result<MemberInfo> {
        Ok(MemberInfo {
            access_flags: parser.read_be::<u16>()?,
            name_index: parser.read_be::<u16>()?,
            descriptor_index: parser.read_be::<u16>()?,
            attributes: AttributeInfo::read_list(parser)?,
        })
    }

    /// Write the member.
    ///
    /// # Errors
    /// Returns [`crate::Error::LimitExceeded`] if an attribute table overflows.
    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        push_be(out, self.access_flags);
        push_be(out, self.name_index);
        push_be(out, self.descriptor_index);
        AttributeInfo::write_list(&self.attributes, out)
    }

    /// Access flags with unknown bits dropped.
    #[must_use]
    pub fn flags(&self) -> MemberAccessFlags {
        MemberAccessFlags::from_bits_truncate(self.access_flags)
    }

    /// Position of the `Code` attribute in [`MemberInfo::attributes`], if any.
    #[must_use]
    pub fn code_index(&self, pool: &ConstantPool) -> Option<usize> {
        self.attributes
            .iter()
            .position(|attr| pool.utf8(attr.name_index).ok() == Some(names::CODE))
    }

    /// Decode the `Code` attribute, if present.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the attribute is damaged.
    pub fn code(&self, pool: &ConstantPool) -> Result<Option<CodeAttribute>> {
        match self.code_index(pool) {
            Some(index) => Ok(Some(CodeAttribute::parse(&self.attributes[index].info)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_round_trip_and_code_lookup() {
        let mut pool = ConstantPool::new();
        let name = pool.add_utf8("run").unwrap();
        let descriptor = pool.add_utf8("()V").unwrap();
        let code_name = pool.add_utf8("Code").unwrap();

        let code = CodeAttribute {
            max_stack: 0,
            max_locals: 1,
            code: vec![0xb1],
            exception_table: Vec::new(),
            attributes: Vec::new(),
        };
        let member = MemberInfo {
            access_flags: 0x0001 | 0x0008,
            name_index: name,
            descriptor_index: descriptor,
            attributes: vec![AttributeInfo {
                name_index: code_name,
                info: code.to_bytes().unwrap(),
            }],
        };

        let mut out = Vec::new();
        member.write(&mut out).unwrap();
        let parsed = MemberInfo::read(&mut Parser::new(&out)).unwrap();
        assert_eq!(parsed, member);
        assert!(parsed.flags().contains(MemberAccessFlags::STATIC));
        assert_eq!(parsed.code_index(&pool), Some(0));
        assert_eq!(parsed.code(&pool).unwrap(), Some(code));
    }

    #[test]
    fn abstract_method_has_no_code() {
        let pool = ConstantPool::new();
        let member = MemberInfo {
            access_flags: MemberAccessFlags::ABSTRACT.bits(),
            name_index: 1,
            descriptor_index: 2,
            attributes: Vec::new(),
        };
        assert_eq!(member.code(&pool).unwrap(), None);
    }
}
