//! Assembles small class files from scratch.
//!
//! The builder exists for tests, benchmarks and fuzz seeds: it produces structurally valid
//! classes with hand-written bytecode, without a Java compiler in the loop. Constants needed
//! by the bytecode are added through [`ClassBuilder::pool`] before the method is declared.
//!
//! ```rust
//! use allocscope::{
//!     assembly::opcodes,
//!     classfile::{ClassBuilder, ClassFile, MemberAccessFlags},
//! };
//!
//! let mut builder = ClassBuilder::new("demo/Widget");
//! builder
//!     .method("make", "()[I", MemberAccessFlags::PUBLIC | MemberAccessFlags::STATIC)
//!     .max_stack(1)
//!     .code(vec![opcodes::ICONST_4, opcodes::NEWARRAY, 10, opcodes::ARETURN]);
//!
//! let class = ClassFile::parse(&builder.to_bytes()?)?;
//! assert_eq!(class.methods.len(), 1);
//! # Ok::<(), allocscope::Error>(())
//! ```

use crate::{
    classfile::{
        attributes::{
            names, write_line_numbers, write_local_variables, AttributeInfo, CodeAttribute,
            ExceptionHandler, LineNumberEntry, LocalVariableEntry,
        },
        constpool::ConstantPool,
        descriptor::MethodDescriptor,
        member::{ClassAccessFlags, MemberAccessFlags, MemberInfo},
        mutf8, ClassFile,
    },
    Result,
};

/// Default major version of built classes (Java 8).
pub const DEFAULT_MAJOR_VERSION: u16 = 52;

/// A local-variable debug entry, resolved against the pool at build time.
#[derive(Debug, Clone)]
struct LocalVariable {
    start_pc: u16,
    length: u16,
    name: String,
    descriptor: String,
    index: u16,
}

/// One method under construction; obtained from [`ClassBuilder::method`].
#[derive(Debug, Clone)]
pub struct MethodBuilder {
    name: String,
    descriptor: String,
    flags: MemberAccessFlags,
    max_stack: u16,
    max_locals: Option<u16>,
    code: Option<Vec<u8>>,
    exception_table: Vec<ExceptionHandler>,
    stack_map: Option<Vec<u8>>,
    line_numbers: Vec<LineNumberEntry>,
    local_variables: Vec<LocalVariable>,
    local_variable_types: Vec<LocalVariable>,
}

impl MethodBuilder {
    /// Set `max_stack`.
    pub fn max_stack(&mut self, max_stack: u16) -> &mut Self {
        self.max_stack = max_stack;
        self
    }

    /// Set `max_locals`; defaults to the slots taken by `this` and the parameters.
    pub fn max_locals(&mut self, max_locals: u16) -> &mut Self {
        self.max_locals = Some(max_locals);
        self
    }

    /// Set the bytecode. Methods without code are written without a `Code` attribute.
    pub fn code(&mut self, code: Vec<u8>) -> &mut Self {
        self.code = Some(code);
        self
    }

    /// Append an exception-table row.
    pub fn handler(
        &mut self,
        start_pc: u16,
        end_pc: u16,
        handler_pc: u16,
        catch_type: u16,
    ) -> &mut Self {
        self.exception_table.push(ExceptionHandler {
            start_pc,
            end_pc,
            handler_pc,
            catch_type,
        });
        self
    }

    /// Attach a raw `StackMapTable` payload (entry count followed by the frames).
    pub fn stack_map(&mut self, payload: Vec<u8>) -> &mut Self {
        self.stack_map = Some(payload);
        self
    }

    /// Append a `LineNumberTable` row.
    pub fn line(&mut self, start_pc: u16, line_number: u16) -> &mut Self {
        self.line_numbers.push(LineNumberEntry {
            start_pc,
            line_number,
        });
        self
    }

    /// Append a `LocalVariableTable` row.
    pub fn local(
        &mut self,
        start_pc: u16,
        length: u16,
        name: &str,
        descriptor: &str,
        index: u16,
    ) -> &mut Self {
        self.local_variables.push(LocalVariable {
            start_pc,
            length,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            index,
        });
        self
    }

    /// Append a `LocalVariableTypeTable` row.
    pub fn local_type(
        &mut self,
        start_pc: u16,
        length: u16,
        name: &str,
        signature: &str,
        index: u16,
    ) -> &mut Self {
        self.local_variable_types.push(LocalVariable {
            start_pc,
            length,
            name: name.to_string(),
            descriptor: signature.to_string(),
            index,
        });
        self
    }

    fn default_max_locals(&self) -> Result<u16> {
        let encoded = mutf8::encode(&self.descriptor);
        let descriptor = MethodDescriptor::parse(&encoded)?;
        let this = u16::from(!self.flags.contains(MemberAccessFlags::STATIC));
        Ok(descriptor.param_slots() + this)
    }

    fn build(&self, pool: &mut ConstantPool) -> Result<MemberInfo> {
        let name_index = pool.add_utf8(&self.name)?;
        let descriptor_index = pool.add_utf8(&self.descriptor)?;

        let mut attributes = Vec::new();
        if let Some(code) = &self.code {
            let mut code_attributes = Vec::new();
            if let Some(payload) = &self.stack_map {
                code_attributes.push(AttributeInfo {
                    name_index: pool.add_utf8_bytes(names::STACK_MAP_TABLE.to_vec())?,
                    info: payload.clone(),
                });
            }
            if !self.line_numbers.is_empty() {
                code_attributes.push(AttributeInfo {
                    name_index: pool.add_utf8_bytes(names::LINE_NUMBER_TABLE.to_vec())?,
                    info: write_line_numbers(&self.line_numbers)?,
                });
            }
            for (table, attr_name) in [
                (&self.local_variables, names::LOCAL_VARIABLE_TABLE),
                (&self.local_variable_types, names::LOCAL_VARIABLE_TYPE_TABLE),
            ] {
                if table.is_empty() {
                    continue;
                }
                let mut entries = Vec::with_capacity(table.len());
                for local in table {
                    entries.push(LocalVariableEntry {
                        start_pc: local.start_pc,
                        length: local.length,
                        name_index: pool.add_utf8(&local.name)?,
                        descriptor_index: pool.add_utf8(&local.descriptor)?,
                        index: local.index,
                    });
                }
                code_attributes.push(AttributeInfo {
                    name_index: pool.add_utf8_bytes(attr_name.to_vec())?,
                    info: write_local_variables(&entries)?,
                });
            }

            let max_locals = match self.max_locals {
                Some(max_locals) => max_locals,
                None => self.default_max_locals()?,
            };
            let attribute = CodeAttribute {
                max_stack: self.max_stack,
                max_locals,
                code: code.clone(),
                exception_table: self.exception_table.clone(),
                attributes: code_attributes,
            };
            attributes.push(AttributeInfo {
                name_index: pool.add_utf8_bytes(names::CODE.to_vec())?,
                info: attribute.to_bytes()?,
            });
        }

        Ok(MemberInfo {
            access_flags: self.flags.bits(),
            name_index,
            descriptor_index,
            attributes,
        })
    }
}

/// Builder for a complete class file.
#[derive(Debug, Clone)]
pub struct ClassBuilder {
    name: String,
    super_name: Option<String>,
    major_version: u16,
    flags: ClassAccessFlags,
    pool: ConstantPool,
    fields: Vec<(String, String, MemberAccessFlags)>,
    methods: Vec<MethodBuilder>,
}

impl ClassBuilder {
    /// Start a public class extending `java/lang/Object`.
    #[must_use]
    pub fn new(name: &str) -> Self {
        ClassBuilder {
            name: name.to_string(),
            super_name: Some(String::from("java/lang/Object")),
            major_version: DEFAULT_MAJOR_VERSION,
            flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            pool: ConstantPool::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// Set the superclass; `None` is only valid for `java/lang/Object` itself.
    #[must_use]
    pub fn super_class(mut self, name: Option<&str>) -> Self {
        self.super_name = name.map(str::to_string);
        self
    }

    /// Set the major version.
    #[must_use]
    pub fn version(mut self, major_version: u16) -> Self {
        self.major_version = major_version;
        self
    }

    /// Set the class access flags.
    #[must_use]
    pub fn flags(mut self, flags: ClassAccessFlags) -> Self {
        self.flags = flags;
        self
    }

    /// The constant pool, for adding the constants referenced by bytecode.
    pub fn pool(&mut self) -> &mut ConstantPool {
        &mut self.pool
    }

    /// Declare a field.
    pub fn field(&mut self, name: &str, descriptor: &str, flags: MemberAccessFlags) -> &mut Self {
        self.fields.push((name.to_string(), descriptor.to_string(), flags));
        self
    }

    /// Declare a method and return it for configuration.
    pub fn method(
        &mut self,
        name: &str,
        descriptor: &str,
        flags: MemberAccessFlags,
    ) -> &mut MethodBuilder {
        self.methods.push(MethodBuilder {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            flags,
            max_stack: 0,
            max_locals: None,
            code: None,
            exception_table: Vec::new(),
            stack_map: None,
            line_numbers: Vec::new(),
            local_variables: Vec::new(),
            local_variable_types: Vec::new(),
        });
        let last = self.methods.len() - 1;
        &mut self.methods[last]
    }

    /// Assemble the [`ClassFile`] model.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for invalid method descriptors and
    /// [`crate::Error::LimitExceeded`] if the pool overflows.
    pub fn build(&self) -> Result<ClassFile> {
        let mut pool = self.pool.clone();
        let this_class = pool.add_class(&self.name)?;
        let super_class = match &self.super_name {
            Some(name) => pool.add_class(name)?,
            None => 0,
        };

        let mut fields = Vec::with_capacity(self.fields.len());
        for (name, descriptor, flags) in &self.fields {
            fields.push(MemberInfo {
                access_flags: flags.bits(),
                name_index: pool.add_utf8(name)?,
                descriptor_index: pool.add_utf8(descriptor)?,
                attributes: Vec::new(),
            });
        }

        let mut methods = Vec::with_capacity(self.methods.len());
        for method in &self.methods {
            methods.push(method.build(&mut pool)?);
        }

        Ok(ClassFile {
            minor_version: 0,
            major_version: self.major_version,
            constant_pool: pool,
            access_flags: self.flags.bits(),
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields,
            methods,
            attributes: Vec::new(),
        })
    }

    /// Assemble and serialize the class.
    ///
    /// # Errors
    /// See [`ClassBuilder::build`].
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.build()?.to_bytes()
    }
}
