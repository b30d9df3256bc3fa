//! Attributes (JVMS §4.7).
//!
//! Every attribute is kept as raw bytes ([`AttributeInfo`]) so that unknown or untouched
//! attributes round-trip unchanged. The few attributes the rewriter has to relocate are
//! decoded on demand: [`CodeAttribute`], the line-number table and the local-variable
//! tables. `StackMapTable` is handled by [`crate::instrument::StackMapRemapper`].

use crate::{
    file::{io::push_be, parser::Parser},
    Error, Result,
};

/// Attribute names the crate needs to recognise.
#[allow(missing_docs)]
pub mod names {
    pub const CODE: &[u8] = b"Code";
    pub const STACK_MAP_TABLE: &[u8] = b"StackMapTable";
    pub const LINE_NUMBER_TABLE: &[u8] = b"LineNumberTable";
    pub const LOCAL_VARIABLE_TABLE: &[u8] = b"LocalVariableTable";
    pub const LOCAL_VARIABLE_TYPE_TABLE: &[u8] = b"LocalVariableTypeTable";
    pub const RUNTIME_VISIBLE_TYPE_ANNOTATIONS: &[u8] = b"RuntimeVisibleTypeAnnotations";
    pub const RUNTIME_INVISIBLE_TYPE_ANNOTATIONS: &[u8] = b"RuntimeInvisibleTypeAnnotations";
}

/// Largest `code_length` a method may have (JVMS §4.7.3).
pub const MAX_CODE_LENGTH: usize = 65535;

/// A raw attribute: its name index and undecoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeInfo {
    /// Utf8 index of the attribute name
    pub name_index: u16,
    /// Payload, without the 6-byte header
    pub info: Vec<u8>,
}

impl AttributeInfo {
    /// Read one attribute.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the payload is truncated.
    pub fn read(parser: &mut Parser) -> Result<AttributeInfo> {
        let name_index = parser.read_be::<u16>()?;
        let length = parser.read_be::<u32>()?;
        let info = parser.read_bytes(length as usize)?.to_vec();
        Ok(AttributeInfo { name_index, info })
    }

    /// Read `attributes_count` followed by that many attributes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if any attribute is truncated.
    pub fn read_list(parser: &mut Parser) -> Result<Vec<AttributeInfo>> {
        let count = parser.read_be::<u16>()?;
        let mut attributes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            attributes.push(AttributeInfo::read(parser)?);
        }
        Ok(attributes)
    }

    /// Write the attribute including its header.
    ///
    /// # Errors
    /// Returns [`crate::Error::LimitExceeded`] if the payload is larger than `u32::MAX`.
    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        let length = u32::try_from(self.info.len()).map_err(|_| Error::LimitExceeded {
            what: "attribute length",
            limit: u32::MAX as usize,
        })?;
        push_be(out, self.name_index);
        push_be(out, length);
        out.extend_from_slice(&self.info);
        Ok(())
    }

    /// Write `attributes_count` followed by every attribute.
    ///
    /// # Errors
    /// Returns [`crate::Error::LimitExceeded`] if there are more than 65535 attributes.
    pub fn write_list(attributes: &[AttributeInfo], out: &mut Vec<u8>) -> Result<()> {
        push_be(out, count_u16(attributes.len(), "attributes")?);
        for attribute in attributes {
            attribute.write(out)?;
        }
        Ok(())
    }
}

pub(crate) fn count_u16(count: usize, what: &'static str) -> Result<u16> {
    u16::try_from(count).map_err(|_| Error::LimitExceeded {
        what,
        limit: u16::MAX as usize,
    })
}

/// One row of a method's exception table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// First covered offset (inclusive)
    pub start_pc: u16,
    /// End of the covered range (exclusive)
    pub end_pc: u16,
    /// Handler entry offset
    pub handler_pc: u16,
    /// Class index of the caught type, `0` for `finally`
    pub catch_type: u16,
}

/// The decoded `Code` attribute of one method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeAttribute {
    /// Maximum operand-stack depth
    pub max_stack: u16,
    /// Number of local variable slots
    pub max_locals: u16,
    /// The bytecode
    pub code: Vec<u8>,
    /// Exception table, in declaration order
    pub exception_table: Vec<ExceptionHandler>,
    /// Nested attributes (`StackMapTable`, `LineNumberTable`, ...)
    pub attributes: Vec<AttributeInfo>,
}

impl CodeAttribute {
    /// Decode the payload of a `Code` attribute.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an empty or oversized code array and
    /// [`crate::Error::OutOfBounds`] for truncated input.
    pub fn parse(info: &[u8]) -> Result<CodeAttribute> {
        let mut parser = Parser::new(info);
        let max_stack = parser.read_be::<u16>()?;
        let max_locals = parser.read_be::<u16>()?;
        let code_length = parser.read_be::<u32>()? as usize;
        if code_length == 0 || code_length > MAX_CODE_LENGTH {
            return Err(malformed_error!("Invalid code_length {}", code_length));
        }
        let code = parser.read_bytes(code_length)?.to_vec();

        let handler_count = parser.read_be::<u16>()?;
        let mut exception_table = Vec::with_capacity(handler_count as usize);
        for _ in 0..handler_count {
            exception_table.push(ExceptionHandler {
                start_pc: parser.read_be::<u16>()?,
                end_pc: parser.read_be::<u16>()?,
                handler_pc: parser.read_be::<u16>()?,
                catch_type: parser.read_be::<u16>()?,
            });
        }

        let attributes = AttributeInfo::read_list(&mut parser)?;
        if parser.has_more_data() {
            return Err(malformed_error!(
                "Code attribute has {} trailing bytes",
                parser.len() - parser.pos()
            ));
        }

        Ok(CodeAttribute {
            max_stack,
            max_locals,
            code,
            exception_table,
            attributes,
        })
    }

    /// Encode the attribute payload.
    ///
    /// # Errors
    /// Returns [`crate::Error::LimitExceeded`] when the code array exceeds 65535 bytes or a
    /// table count overflows.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if self.code.len() > MAX_CODE_LENGTH {
            return Err(Error::LimitExceeded {
                what: "code length",
                limit: MAX_CODE_LENGTH,
            });
        }

        let mut out = Vec::with_capacity(self.code.len() + 32);
        push_be(&mut out, self.max_stack);
        push_be(&mut out, self.max_locals);
        #[allow(clippy::cast_possible_truncation)]
        push_be(&mut out, self.code.len() as u32);
        out.extend_from_slice(&self.code);

        push_be(
            &mut out,
            count_u16(self.exception_table.len(), "exception table entries")?,
        );
        for handler in &self.exception_table {
            push_be(&mut out, handler.start_pc);
            push_be(&mut out, handler.end_pc);
            push_be(&mut out, handler.handler_pc);
            push_be(&mut out, handler.catch_type);
        }

        AttributeInfo::write_list(&self.attributes, &mut out)?;
        Ok(out)
    }
}

/// One row of a `LineNumberTable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumberEntry {
    /// Offset where the line starts
    pub start_pc: u16,
    /// Source line
    pub line_number: u16,
}

/// Decode a `LineNumberTable` payload.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] for truncated input.
pub fn parse_line_numbers(info: &[u8]) -> Result<Vec<LineNumberEntry>> {
    let mut parser = Parser::new(info);
    let count = parser.read_be::<u16>()?;
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        entries.push(LineNumberEntry {
            start_pc: parser.read_be::<u16>()?,
            line_number: parser.read_be::<u16>()?,
        });
    }
    Ok(entries)
}

/// Encode a `LineNumberTable` payload.
///
/// # Errors
/// Returns [`crate::Error::LimitExceeded`] if there are more than 65535 rows.
pub fn write_line_numbers(entries: &[LineNumberEntry]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(2 + entries.len() * 4);
    push_be(&mut out, count_u16(entries.len(), "line number entries")?);
    for entry in entries {
        push_be(&mut out, entry.start_pc);
        push_be(&mut out, entry.line_number);
    }
    Ok(out)
}

/// One row of a `LocalVariableTable` or `LocalVariableTypeTable`.
///
/// Both tables share the layout; for the type table `descriptor_index` holds the
/// signature index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalVariableEntry {
    /// First offset where the variable is live
    pub start_pc: u16,
    /// Length of the live range
    pub length: u16,
    /// Utf8 index of the variable name
    pub name_index: u16,
    /// Utf8 index of the descriptor (or signature)
    pub descriptor_index: u16,
    /// Local slot
    pub index: u16,
}

/// Decode a `LocalVariableTable` or `LocalVariableTypeTable` payload.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] for truncated input.
pub fn parse_local_variables(info: &[u8]) -> Result<Vec<LocalVariableEntry>> {
    let mut parser = Parser::new(info);
    let count = parser.read_be::<u16>()?;
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        entries.push(LocalVariableEntry {
            start_pc: parser.read_be::<u16>()?,
            length: parser.read_be::<u16>()?,
            name_index: parser.read_be::<u16>()?,
            descriptor_index: parser.read_be::<u16>()?,
            index: parser.read_be::<u16>()?,
        });
    }
    Ok(entries)
}

/// Encode a `LocalVariableTable` or `LocalVariableTypeTable` payload.
///
/// # Errors
/// Returns [`crate::Error::LimitExceeded`] if there are more than 65535 rows.
pub fn write_local_variables(entries: &[LocalVariableEntry]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(2 + entries.len() * 10);
    push_be(&mut out, count_u16(entries.len(), "local variable entries")?);
    for entry in entries {
        push_be(&mut out, entry.start_pc);
        push_be(&mut out, entry.length);
        push_be(&mut out, entry.name_index);
        push_be(&mut out, entry.descriptor_index);
        push_be(&mut out, entry.index);
    }
    Ok(out)
}
