//! The JVM class-file container (JVMS chapter 4).
//!
//! [`ClassFile`] is a faithful, lossless model of one class file: constant pool, members
//! and attributes are kept in their original order and encoding, and only the pieces the
//! rewriter touches are decoded further. Parsing and writing an untouched class reproduces
//! the input byte for byte.
//!
//! # Key Components
//!
//! - [`ClassFile`] - Parse/serialize entry point
//! - [`constpool`] - The constant pool with deduplicating append
//! - [`attributes`] - Raw attributes, `Code` and the debug tables
//! - [`member`] - Fields, methods and access flags
//! - [`descriptor`] - Field and method descriptors
//! - [`mutf8`] - Modified UTF-8
//! - [`builder`] - Assembles small classes from scratch
//!
//! # Usage Examples
//!
//! ```rust
//! use allocscope::classfile::{ClassBuilder, ClassFile};
//!
//! let bytes = ClassBuilder::new("demo/Empty").to_bytes()?;
//! let class = ClassFile::parse(&bytes)?;
//! assert_eq!(class.name()?, b"demo/Empty");
//! assert_eq!(class.to_bytes()?, bytes);
//! # Ok::<(), allocscope::Error>(())
//! ```

pub mod attributes;
pub mod builder;
pub mod constpool;
pub mod descriptor;
pub mod member;
pub mod mutf8;

pub use attributes::{AttributeInfo, CodeAttribute, ExceptionHandler};
pub use builder::{ClassBuilder, MethodBuilder};
pub use constpool::{Constant, ConstantPool, MemberRef};
pub use member::{ClassAccessFlags, MemberAccessFlags, MemberInfo};

use crate::{
    classfile::attributes::count_u16,
    file::{io::push_be, parser::Parser},
    Error, Result,
};

/// Class-file magic number.
pub const MAGIC: u32 = 0xCAFE_BABE;

/// Oldest major version accepted (JDK 1.1).
pub const MIN_MAJOR_VERSION: u16 = 45;

/// Newest major version accepted.
pub const MAX_MAJOR_VERSION: u16 = 69;

/// Major version from which `StackMapTable` frames are mandatory (Java 7).
pub const STACK_MAP_MAJOR_VERSION: u16 = 51;

/// One parsed class file.
#[derive(Debug, Clone)]
pub struct ClassFile {
    /// Minor version
    pub minor_version: u16,
    /// Major version
    pub major_version: u16,
    /// Constant pool
    pub constant_pool: ConstantPool,
    /// Raw class access flags
    pub access_flags: u16,
    /// Class index of this class
    pub this_class: u16,
    /// Class index of the superclass, `0` only for `java/lang/Object`
    pub super_class: u16,
    /// Class indices of the direct superinterfaces
    pub interfaces: Vec<u16>,
    /// Declared fields
    pub fields: Vec<MemberInfo>,
    /// Declared methods
    pub methods: Vec<MemberInfo>,
    /// Class-level attributes
    pub attributes: Vec<AttributeInfo>,
}

impl ClassFile {
    /// Parse a complete class file.
    ///
    /// # Errors
    /// Returns [`crate::Error::Empty`] for empty input, [`crate::Error::OutOfBounds`] for
    /// truncated input and [`crate::Error::Malformed`] for bad magic, unsupported versions,
    /// invalid constants or trailing bytes.
    pub fn parse(data: &[u8]) -> Result<ClassFile> {
        if data.is_empty() {
            return Err(Error::Empty);
        }

        let mut parser = Parser::new(data);
        let magic = parser.read_be::<u32>()?;
        if magic != MAGIC {
            return Err(malformed_error!("Invalid class file magic 0x{:08X}", magic));
        }

        let minor_version = parser.read_be::<u16>()?;
        let major_version = parser.read_be::<u16>()?;
        if !(MIN_MAJOR_VERSION..=MAX_MAJOR_VERSION).contains(&major_version) {
            return Err(malformed_error!(
                "Unsupported class file version {}.{}",
                major_version,
                minor_version
            ));
        }

        let constant_pool = ConstantPool::parse(&mut parser)?;
        let access_flags = parser.read_be::<u16>()?;
        let this_class = parser.read_be::<u16>()?;
        let super_class = parser.read_be::<u16>()?;

        let interface_count = parser.read_be::<u16>()?;
        let mut interfaces = Vec::with_capacity(interface_count as usize);
        for _ in 0..interface_count {
            interfaces.push(parser.read_be::<u16>()?);
        }

        let fields = Self::read_members(&mut parser)?;
        let methods = Self::read_members(&mut parser)?;
        let attributes = AttributeInfo::read_list(&mut parser)?;

        if parser.has_more_data() {
            return Err(malformed_error!(
                "{} trailing bytes after class file",
                parser.len() - parser.pos()
            ));
        }

        let class = ClassFile {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        };
        class.name()?;

        Ok(class)
    }

    fn read_members(parser: &mut Parser) -> Result<Vec<MemberInfo>> {
        let count = parser.read_be::<u16>()?;
        let mut members = Vec::with_capacity(count as usize);
        for _ in 0..count {
            members.push(MemberInfo::read(parser)?);
        }
        Ok(members)
    }

    /// Serialize the class file.
    ///
    /// # Errors
    /// Returns [`crate::Error::LimitExceeded`] if a table count no longer fits its field.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(1024);
        push_be(&mut out, MAGIC);
        push_be(&mut out, self.minor_version);
        push_be(&mut out, self.major_version);
        self.constant_pool.write(&mut out);
        push_be(&mut out, self.access_flags);
        push_be(&mut out, self.this_class);
        push_be(&mut out, self.super_class);

        push_be(&mut out, count_u16(self.interfaces.len(), "interfaces")?);
        for interface in &self.interfaces {
            push_be(&mut out, *interface);
        }

        push_be(&mut out, count_u16(self.fields.len(), "fields")?);
        for field in &self.fields {
            field.write(&mut out)?;
        }
        push_be(&mut out, count_u16(self.methods.len(), "methods")?);
        for method in &self.methods {
            method.write(&mut out)?;
        }

        AttributeInfo::write_list(&self.attributes, &mut out)?;
        Ok(out)
    }

    /// Raw internal name of this class.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `this_class` is not a valid `Class` entry.
    pub fn name(&self) -> Result<&[u8]> {
        self.constant_pool.class_name(self.this_class)
    }

    /// Internal name of this class, decoded for diagnostics.
    #[must_use]
    pub fn display_name(&self) -> String {
        match self.name() {
            Ok(name) => mutf8::decode_lossy(name),
            Err(_) => String::from("<unknown>"),
        }
    }

    /// Raw internal name of the superclass, `None` for `java/lang/Object`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `super_class` is not a valid `Class` entry.
    pub fn super_name(&self) -> Result<Option<&[u8]>> {
        if self.super_class == 0 {
            return Ok(None);
        }
        self.constant_pool.class_name(self.super_class).map(Some)
    }

    /// Class access flags with unknown bits dropped.
    #[must_use]
    pub fn flags(&self) -> ClassAccessFlags {
        ClassAccessFlags::from_bits_truncate(self.access_flags)
    }

    /// Whether methods of this class are expected to carry `StackMapTable` frames.
    #[must_use]
    pub fn requires_stack_maps(&self) -> bool {
        self.major_version >= STACK_MAP_MAJOR_VERSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::opcodes;

    #[test]
    fn parse_round_trip() {
        let mut builder = ClassBuilder::new("demo/Widget");
        builder
            .method("run", "()V", MemberAccessFlags::PUBLIC)
            .max_stack(1)
            .code(vec![opcodes::RETURN]);
        let bytes = builder.to_bytes().unwrap();

        let class = ClassFile::parse(&bytes).unwrap();
        assert_eq!(class.name().unwrap(), b"demo/Widget");
        assert_eq!(class.super_name().unwrap(), Some(&b"java/lang/Object"[..]));
        assert_eq!(class.methods.len(), 1);
        assert!(class.requires_stack_maps());
        assert_eq!(class.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn empty_input() {
        assert!(matches!(ClassFile::parse(&[]), Err(Error::Empty)));
    }

    #[test]
    fn truncated_input() {
        assert!(matches!(
            ClassFile::parse(&[0xCA, 0xFE]),
            Err(Error::OutOfBounds)
        ));
        let bytes = ClassBuilder::new("demo/Widget").to_bytes().unwrap();
        assert!(ClassFile::parse(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn bad_magic_and_version() {
        let mut bytes = ClassBuilder::new("demo/Widget").to_bytes().unwrap();
        bytes[0] = 0xCB;
        assert!(matches!(
            ClassFile::parse(&bytes),
            Err(Error::Malformed { .. })
        ));

        let mut bytes = ClassBuilder::new("demo/Widget").to_bytes().unwrap();
        bytes[6] = 0x00;
        bytes[7] = 0x10;
        assert!(matches!(
            ClassFile::parse(&bytes),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = ClassBuilder::new("demo/Widget").to_bytes().unwrap();
        bytes.push(0);
        assert!(matches!(
            ClassFile::parse(&bytes),
            Err(Error::Malformed { .. })
        ));
    }
}
