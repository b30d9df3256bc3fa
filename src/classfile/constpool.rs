//! The class-file constant pool (JVMS §4.4).
//!
//! The pool is kept as a vector indexed exactly like the class file: slot `0` is never
//! valid and the slot following a `Long` or `Double` is [`Constant::Unusable`]. Existing
//! entries are never moved or rewritten, so every index embedded in the original bytecode
//! stays valid after the rewriter appends the constants it needs.
//!
//! UTF-8 entries keep their raw modified UTF-8 bytes. Comparisons against Rust strings
//! encode the string once (see [`crate::classfile::mutf8`]) so that names containing NUL or
//! supplementary characters round-trip unchanged.

use std::collections::HashMap;

use crate::{
    classfile::mutf8,
    file::{io::push_be, parser::Parser},
    Error, Result,
};

/// Largest index a constant pool can hold (`constant_pool_count` is a `u16`).
pub const MAX_POOL_ENTRIES: usize = 65535;

/// Constant tags as defined in JVMS Table 4.4-B.
#[allow(missing_docs)]
pub mod tags {
    pub const UTF8: u8 = 1;
    pub const INTEGER: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const LONG: u8 = 5;
    pub const DOUBLE: u8 = 6;
    pub const CLASS: u8 = 7;
    pub const STRING: u8 = 8;
    pub const FIELDREF: u8 = 9;
    pub const METHODREF: u8 = 10;
    pub const INTERFACE_METHODREF: u8 = 11;
    pub const NAME_AND_TYPE: u8 = 12;
    pub const METHOD_HANDLE: u8 = 15;
    pub const METHOD_TYPE: u8 = 16;
    pub const DYNAMIC: u8 = 17;
    pub const INVOKE_DYNAMIC: u8 = 18;
    pub const MODULE: u8 = 19;
    pub const PACKAGE: u8 = 20;
}

/// One entry of the constant pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constant {
    /// Index `0` and the second slot of 8-byte constants
    Unusable,
    /// Raw modified UTF-8 bytes
    Utf8(Vec<u8>),
    /// 32-bit integer
    Integer(i32),
    /// 32-bit float, stored as its bit pattern
    Float(u32),
    /// 64-bit integer
    Long(i64),
    /// 64-bit float, stored as its bit pattern
    Double(u64),
    /// Class or array type; points to the internal name
    Class {
        /// Utf8 index of the internal name
        name_index: u16,
    },
    /// String literal; points to its contents
    String {
        /// Utf8 index of the contents
        string_index: u16,
    },
    /// Field reference
    Fieldref {
        /// Class index of the owner
        class_index: u16,
        /// `NameAndType` index
        name_and_type_index: u16,
    },
    /// Method reference on a class
    Methodref {
        /// Class index of the owner
        class_index: u16,
        /// `NameAndType` index
        name_and_type_index: u16,
    },
    /// Method reference on an interface
    InterfaceMethodref {
        /// Class index of the owner
        class_index: u16,
        /// `NameAndType` index
        name_and_type_index: u16,
    },
    /// Member name and descriptor pair
    NameAndType {
        /// Utf8 index of the name
        name_index: u16,
        /// Utf8 index of the descriptor
        descriptor_index: u16,
    },
    /// Method handle
    MethodHandle {
        /// Reference kind (1..=9)
        reference_kind: u8,
        /// Index of the referenced member
        reference_index: u16,
    },
    /// Method type
    MethodType {
        /// Utf8 index of the method descriptor
        descriptor_index: u16,
    },
    /// Dynamically computed constant
    Dynamic {
        /// Index into `BootstrapMethods`
        bootstrap_method_attr_index: u16,
        /// `NameAndType` index
        name_and_type_index: u16,
    },
    /// Dynamically computed call site
    InvokeDynamic {
        /// Index into `BootstrapMethods`
        bootstrap_method_attr_index: u16,
        /// `NameAndType` index
        name_and_type_index: u16,
    },
    /// Module
    Module {
        /// Utf8 index of the module name
        name_index: u16,
    },
    /// Package
    Package {
        /// Utf8 index of the package name
        name_index: u16,
    },
}

impl Constant {
    /// Number of pool slots this constant occupies.
    #[must_use]
    pub fn width(&self) -> usize {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }

    fn read(parser: &mut Parser) -> Result<Constant> {
        let tag = parser.read_be::<u8>()?;
        let constant = match tag {
            tags::UTF8 => {
                let length = parser.read_be::<u16>()?;
                Constant::Utf8(parser.read_bytes(length as usize)?.to_vec())
            }
            tags::INTEGER => Constant::Integer(parser.read_be::<i32>()?),
            tags::FLOAT => Constant::Float(parser.read_be::<u32>()?),
            tags::LONG => Constant::Long(parser.read_be::<i64>()?),
            tags::DOUBLE => Constant::Double(parser.read_be::<u64>()?),
            tags::CLASS => Constant::Class {
                name_index: parser.read_be::<u16>()?,
            },
            tags::STRING => Constant::String {
                string_index: parser.read_be::<u16>()?,
            },
            tags::FIELDREF => Constant::Fieldref {
                class_index: parser.read_be::<u16>()?,
                name_and_type_index: parser.read_be::<u16>()?,
            },
            tags::METHODREF => Constant::Methodref {
                class_index: parser.read_be::<u16>()?,
                name_and_type_index: parser.read_be::<u16>()?,
            },
            tags::INTERFACE_METHODREF => Constant::InterfaceMethodref {
                class_index: parser.read_be::<u16>()?,
                name_and_type_index: parser.read_be::<u16>()?,
            },
            tags::NAME_AND_TYPE => Constant::NameAndType {
                name_index: parser.read_be::<u16>()?,
                descriptor_index: parser.read_be::<u16>()?,
            },
            tags::METHOD_HANDLE => Constant::MethodHandle {
                reference_kind: parser.read_be::<u8>()?,
                reference_index: parser.read_be::<u16>()?,
            },
            tags::METHOD_TYPE => Constant::MethodType {
                descriptor_index: parser.read_be::<u16>()?,
            },
            tags::DYNAMIC => Constant::Dynamic {
                bootstrap_method_attr_index: parser.read_be::<u16>()?,
                name_and_type_index: parser.read_be::<u16>()?,
            },
            tags::INVOKE_DYNAMIC => Constant::InvokeDynamic {
                bootstrap_method_attr_index: parser.read_be::<u16>()?,
                name_and_type_index: parser.read_be::<u16>()?,
            },
            tags::MODULE => Constant::Module {
                name_index: parser.read_be::<u16>()?,
            },
            tags::PACKAGE => Constant::Package {
                name_index: parser.read_be::<u16>()?,
            },
            _ => {
                return Err(malformed_error!(
                    "Invalid constant pool tag {} at offset {}",
                    tag,
                    parser.pos() - 1
                ))
            }
        };

        Ok(constant)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write(&self, out: &mut Vec<u8>) {
        match self {
            Constant::Unusable => {}
            Constant::Utf8(bytes) => {
                out.push(tags::UTF8);
                push_be(out, bytes.len() as u16);
                out.extend_from_slice(bytes);
            }
            Constant::Integer(value) => {
                out.push(tags::INTEGER);
                push_be(out, *value);
            }
            Constant::Float(bits) => {
                out.push(tags::FLOAT);
                push_be(out, *bits);
            }
            Constant::Long(value) => {
                out.push(tags::LONG);
                push_be(out, *value);
            }
            Constant::Double(bits) => {
                out.push(tags::DOUBLE);
                push_be(out, *bits);
            }
            Constant::Class { name_index } => {
                out.push(tags::CLASS);
                push_be(out, *name_index);
            }
            Constant::String { string_index } => {
                out.push(tags::STRING);
                push_be(out, *string_index);
            }
            Constant::Fieldref {
                class_index,
                name_and_type_index,
            } => {
                out.push(tags::FIELDREF);
                push_be(out, *class_index);
                push_be(out, *name_and_type_index);
            }
            Constant::Methodref {
                class_index,
                name_and_type_index,
            } => {
                out.push(tags::METHODREF);
                push_be(out, *class_index);
                push_be(out, *name_and_type_index);
            }
            Constant::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => {
                out.push(tags::INTERFACE_METHODREF);
                push_be(out, *class_index);
                push_be(out, *name_and_type_index);
            }
            Constant::NameAndType {
                name_index,
                descriptor_index,
            } => {
                out.push(tags::NAME_AND_TYPE);
                push_be(out, *name_index);
                push_be(out, *descriptor_index);
            }
            Constant::MethodHandle {
                reference_kind,
                reference_index,
            } => {
                out.push(tags::METHOD_HANDLE);
                out.push(*reference_kind);
                push_be(out, *reference_index);
            }
            Constant::MethodType { descriptor_index } => {
                out.push(tags::METHOD_TYPE);
                push_be(out, *descriptor_index);
            }
            Constant::Dynamic {
                bootstrap_method_attr_index,
                name_and_type_index,
            } => {
                out.push(tags::DYNAMIC);
                push_be(out, *bootstrap_method_attr_index);
                push_be(out, *name_and_type_index);
            }
            Constant::InvokeDynamic {
                bootstrap_method_attr_index,
                name_and_type_index,
            } => {
                out.push(tags::INVOKE_DYNAMIC);
                push_be(out, *bootstrap_method_attr_index);
                push_be(out, *name_and_type_index);
            }
            Constant::Module { name_index } => {
                out.push(tags::MODULE);
                push_be(out, *name_index);
            }
            Constant::Package { name_index } => {
                out.push(tags::PACKAGE);
                push_be(out, *name_index);
            }
        }
    }
}

/// A resolved member reference: owner class, member name and descriptor, all as raw
/// modified UTF-8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberRef<'a> {
    /// Internal name of the owning class
    pub owner: &'a [u8],
    /// Member name
    pub name: &'a [u8],
    /// Member descriptor
    pub descriptor: &'a [u8],
    /// `true` for `InterfaceMethodref`
    pub interface: bool,
}

/// The constant pool of one class file.
///
/// Appending goes through the `add_*` methods, which reuse an identical existing entry
/// before creating a new one.
#[derive(Debug, Clone)]
pub struct ConstantPool {
    entries: Vec<Constant>,
    lookup: HashMap<Constant, u16>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantPool {
    /// Create an empty pool (only the unusable slot `0`).
    #[must_use]
    pub fn new() -> Self {
        ConstantPool {
            entries: vec![Constant::Unusable],
            lookup: HashMap::new(),
        }
    }

    /// Parse the pool starting at `constant_pool_count`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for unknown tags or a zero count, and
    /// [`crate::Error::OutOfBounds`] for truncated input.
    pub fn parse(parser: &mut Parser) -> Result<ConstantPool> {
        let count = parser.read_be::<u16>()? as usize;
        if count == 0 {
            return Err(malformed_error!("constant_pool_count must be at least 1"));
        }

        let mut pool = ConstantPool::new();
        pool.entries.reserve(count);
        while pool.entries.len() < count {
            let constant = Constant::read(parser)?;
            let width = constant.width();
            pool.push_raw(constant);
            if width == 2 {
                if pool.entries.len() >= count {
                    return Err(malformed_error!(
                        "8-byte constant occupies the last constant pool slot"
                    ));
                }
                pool.entries.push(Constant::Unusable);
            }
        }

        Ok(pool)
    }

    /// Serialize the pool, including `constant_pool_count`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn write(&self, out: &mut Vec<u8>) {
        push_be(out, self.entries.len() as u16);
        for constant in &self.entries[1..] {
            constant.write(out);
        }
    }

    /// The value of `constant_pool_count` (one more than the highest valid index).
    #[must_use]
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Returns the constant at `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the index is out of range or points to an
    /// unusable slot.
    pub fn get(&self, index: u16) -> Result<&Constant> {
        match self.entries.get(index as usize) {
            Some(Constant::Unusable) | None => Err(malformed_error!(
                "Invalid constant pool index {} (count {})",
                index,
                self.entries.len()
            )),
            Some(constant) => Ok(constant),
        }
    }

    /// Returns the raw bytes of the `Utf8` entry at `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the entry is missing or not `Utf8`.
    pub fn utf8(&self, index: u16) -> Result<&[u8]> {
        match self.get(index)? {
            Constant::Utf8(bytes) => Ok(bytes),
            other => Err(malformed_error!(
                "Constant {} is not Utf8 but {:?}",
                index,
                other
            )),
        }
    }

    /// Returns the raw internal name of the `Class` entry at `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the entry is missing or not `Class`.
    pub fn class_name(&self, index: u16) -> Result<&[u8]> {
        match self.get(index)? {
            Constant::Class { name_index } => self.utf8(*name_index),
            other => Err(malformed_error!(
                "Constant {} is not Class but {:?}",
                index,
                other
            )),
        }
    }

    /// Resolves a `Fieldref`, `Methodref` or `InterfaceMethodref` into its owner, name and
    /// descriptor.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if any link in the chain has the wrong kind.
    pub fn member_ref(&self, index: u16) -> Result<MemberRef<'_>> {
        let (class_index, name_and_type_index, interface) = match self.get(index)? {
            Constant::Fieldref {
                class_index,
                name_and_type_index,
            }
            | Constant::Methodref {
                class_index,
                name_and_type_index,
            } => (*class_index, *name_and_type_index, false),
            Constant::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => (*class_index, *name_and_type_index, true),
            other => {
                return Err(malformed_error!(
                    "Constant {} is not a member reference but {:?}",
                    index,
                    other
                ))
            }
        };

        let (name_index, descriptor_index) = match self.get(name_and_type_index)? {
            Constant::NameAndType {
                name_index,
                descriptor_index,
            } => (*name_index, *descriptor_index),
            other => {
                return Err(malformed_error!(
                    "Constant {} is not NameAndType but {:?}",
                    name_and_type_index,
                    other
                ))
            }
        };

        Ok(MemberRef {
            owner: self.class_name(class_index)?,
            name: self.utf8(name_index)?,
            descriptor: self.utf8(descriptor_index)?,
            interface,
        })
    }

    /// Lossy string form of the `Utf8` entry at `index`, for diagnostics.
    #[must_use]
    pub fn display(&self, index: u16) -> String {
        match self.utf8(index) {
            Ok(bytes) => mutf8::decode_lossy(bytes),
            Err(_) => format!("#{index}"),
        }
    }

    /// Append a `Utf8` entry from raw modified UTF-8 bytes, reusing an identical one.
    ///
    /// # Errors
    /// Returns [`crate::Error::LimitExceeded`] if the pool is full or the string is longer
    /// than 65535 bytes.
    pub fn add_utf8_bytes(&mut self, bytes: Vec<u8>) -> Result<u16> {
        if bytes.len() > u16::MAX as usize {
            return Err(Error::LimitExceeded {
                what: "Utf8 constant length",
                limit: u16::MAX as usize,
            });
        }
        self.add(Constant::Utf8(bytes))
    }

    /// Append a `Utf8` entry for a Rust string, reusing an identical one.
    ///
    /// # Errors
    /// See [`ConstantPool::add_utf8_bytes`].
    pub fn add_utf8(&mut self, value: &str) -> Result<u16> {
        self.add_utf8_bytes(mutf8::encode(value))
    }

    /// Append a `Class` entry for the given raw internal name.
    ///
    /// # Errors
    /// Returns [`crate::Error::LimitExceeded`] if the pool is full.
    pub fn add_class_bytes(&mut self, name: Vec<u8>) -> Result<u16> {
        let name_index = self.add_utf8_bytes(name)?;
        self.add(Constant::Class { name_index })
    }

    /// Append a `Class` entry for the given internal name.
    ///
    /// # Errors
    /// Returns [`crate::Error::LimitExceeded`] if the pool is full.
    pub fn add_class(&mut self, name: &str) -> Result<u16> {
        self.add_class_bytes(mutf8::encode(name))
    }

    /// Append a `String` literal whose contents are the given raw bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::LimitExceeded`] if the pool is full.
    pub fn add_string_bytes(&mut self, value: Vec<u8>) -> Result<u16> {
        let string_index = self.add_utf8_bytes(value)?;
        self.add(Constant::String { string_index })
    }

    /// Append a `String` literal.
    ///
    /// # Errors
    /// Returns [`crate::Error::LimitExceeded`] if the pool is full.
    pub fn add_string(&mut self, value: &str) -> Result<u16> {
        self.add_string_bytes(mutf8::encode(value))
    }

    /// Append an `Integer` constant.
    ///
    /// # Errors
    /// Returns [`crate::Error::LimitExceeded`] if the pool is full.
    pub fn add_integer(&mut self, value: i32) -> Result<u16> {
        self.add(Constant::Integer(value))
    }

    /// Append a `NameAndType` entry.
    ///
    /// # Errors
    /// Returns [`crate::Error::LimitExceeded`] if the pool is full.
    pub fn add_name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16> {
        let name_index = self.add_utf8(name)?;
        let descriptor_index = self.add_utf8(descriptor)?;
        self.add(Constant::NameAndType {
            name_index,
            descriptor_index,
        })
    }

    /// Append a `Methodref` entry.
    ///
    /// # Errors
    /// Returns [`crate::Error::LimitExceeded`] if the pool is full.
    pub fn add_methodref(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<u16> {
        let class_index = self.add_class(owner)?;
        let name_and_type_index = self.add_name_and_type(name, descriptor)?;
        self.add(Constant::Methodref {
            class_index,
            name_and_type_index,
        })
    }

    /// Append a `Fieldref` entry.
    ///
    /// # Errors
    /// Returns [`crate::Error::LimitExceeded`] if the pool is full.
    pub fn add_fieldref(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<u16> {
        let class_index = self.add_class(owner)?;
        let name_and_type_index = self.add_name_and_type(name, descriptor)?;
        self.add(Constant::Fieldref {
            class_index,
            name_and_type_index,
        })
    }

    /// Append an arbitrary constant, reusing an identical existing entry.
    ///
    /// # Errors
    /// Returns [`crate::Error::LimitExceeded`] if the pool is full, and
    /// [`crate::Error::Malformed`] for [`Constant::Unusable`].
    #[allow(clippy::cast_possible_truncation)]
    pub fn add(&mut self, constant: Constant) -> Result<u16> {
        if constant == Constant::Unusable {
            return Err(malformed_error!("Cannot append an unusable constant"));
        }
        if let Some(index) = self.lookup.get(&constant) {
            return Ok(*index);
        }

        let width = constant.width();
        if self.entries.len() + width > MAX_POOL_ENTRIES {
            return Err(Error::LimitExceeded {
                what: "constant pool entries",
                limit: MAX_POOL_ENTRIES,
            });
        }

        let index = self.push_raw(constant);
        if width == 2 {
            self.entries.push(Constant::Unusable);
        }
        Ok(index)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn push_raw(&mut self, constant: Constant) -> u16 {
        let index = self.entries.len() as u16;
        self.lookup.entry(constant.clone()).or_insert(index);
        self.entries.push(constant);
        index
    }
}
