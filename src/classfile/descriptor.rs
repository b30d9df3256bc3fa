//! Field and method descriptors (JVMS §4.3).
//!
//! Descriptors are parsed straight from the raw modified UTF-8 bytes of the constant pool.
//! Since every structural character is ASCII, class names can be sliced out of the byte
//! string without decoding them.

use crate::Result;

/// One parsed field type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType<'a> {
    /// A primitive type, by its descriptor character (`B C D F I J S Z`)
    Base(u8),
    /// A class type, by its internal name (without `L` and `;`)
    Object(&'a [u8]),
    /// An array type, by its full descriptor (with the leading `[`)
    Array(&'a [u8]),
}

impl FieldType<'_> {
    /// Number of local-variable slots a value of this type occupies.
    #[must_use]
    pub fn slots(&self) -> u16 {
        match self {
            FieldType::Base(b'J' | b'D') => 2,
            _ => 1,
        }
    }
}

/// A parsed method descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor<'a> {
    /// Parameter types in declaration order
    pub params: Vec<FieldType<'a>>,
    /// Return type, `None` for `V`
    pub ret: Option<FieldType<'a>>,
}

impl<'a> MethodDescriptor<'a> {
    /// Parse a method descriptor such as `(I[Ljava/lang/String;)V`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the descriptor is not well formed.
    pub fn parse(descriptor: &'a [u8]) -> Result<MethodDescriptor<'a>> {
        if descriptor.first() != Some(&b'(') {
            return Err(malformed_error!(
                "Method descriptor must start with '(' - {}",
                String::from_utf8_lossy(descriptor)
            ));
        }

        let mut pos = 1;
        let mut params = Vec::new();
        loop {
            match descriptor.get(pos) {
                Some(b')') => {
                    pos += 1;
                    break;
                }
                Some(_) => params.push(parse_field_type(descriptor, &mut pos)?),
                None => {
                    return Err(malformed_error!(
                        "Unterminated parameter list - {}",
                        String::from_utf8_lossy(descriptor)
                    ))
                }
            }
        }

        let ret = if descriptor.get(pos) == Some(&b'V') {
            pos += 1;
            None
        } else {
            Some(parse_field_type(descriptor, &mut pos)?)
        };

        if pos != descriptor.len() {
            return Err(malformed_error!(
                "Trailing characters in method descriptor - {}",
                String::from_utf8_lossy(descriptor)
            ));
        }

        Ok(MethodDescriptor { params, ret })
    }

    /// Number of local slots taken by the parameters (excluding `this`).
    #[must_use]
    pub fn param_slots(&self) -> u16 {
        self.params.iter().map(FieldType::slots).sum()
    }
}

/// Parse one field type starting at `pos`, advancing past it.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if no valid field type starts at `pos`.
pub fn parse_field_type<'a>(descriptor: &'a [u8], pos: &mut usize) -> Result<FieldType<'a>> {
    let start = *pos;
    match descriptor.get(start) {
        Some(b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z') => {
            *pos += 1;
            Ok(FieldType::Base(descriptor[start]))
        }
        Some(b'L') => {
            let Some(len) = descriptor[start..].iter().position(|b| *b == b';') else {
                return Err(malformed_error!(
                    "Unterminated class type at {} - {}",
                    start,
                    String::from_utf8_lossy(descriptor)
                ));
            };
            if len == 1 {
                return Err(malformed_error!("Empty class name at {}", start));
            }
            *pos = start + len + 1;
            Ok(FieldType::Object(&descriptor[start + 1..start + len]))
        }
        Some(b'[') => {
            let mut dims = 0;
            while descriptor.get(*pos) == Some(&b'[') {
                *pos += 1;
                dims += 1;
            }
            if dims > 255 {
                return Err(malformed_error!("Array type has {} dimensions", dims));
            }
            parse_field_type(descriptor, pos)?;
            Ok(FieldType::Array(&descriptor[start..*pos]))
        }
        _ => Err(malformed_error!(
            "Invalid field type at {} - {}",
            start,
            String::from_utf8_lossy(descriptor)
        )),
    }
}

/// Number of leading `[` in a descriptor.
#[must_use]
pub fn array_dimensions(descriptor: &[u8]) -> usize {
    descriptor.iter().take_while(|b| **b == b'[').count()
}

/// Descriptor character for a `newarray` `atype` operand (JVMS Table 6.5.newarray-A).
#[must_use]
pub fn primitive_for_atype(atype: u8) -> Option<u8> {
    match atype {
        4 => Some(b'Z'),
        5 => Some(b'C'),
        6 => Some(b'F'),
        7 => Some(b'D'),
        8 => Some(b'B'),
        9 => Some(b'S'),
        10 => Some(b'I'),
        11 => Some(b'J'),
        _ => None,
    }
}

/// Field descriptor of a class referenced by a `CONSTANT_Class` name.
///
/// Array classes are named by their descriptor already; anything else becomes `LName;`.
#[must_use]
pub fn class_name_to_descriptor(name: &[u8]) -> Vec<u8> {
    if name.first() == Some(&b'[') {
        name.to_vec()
    } else {
        let mut out = Vec::with_capacity(name.len() + 2);
        out.push(b'L');
        out.extend_from_slice(name);
        out.push(b';');
        out
    }
}
