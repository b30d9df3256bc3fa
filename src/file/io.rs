//! Big-endian primitive I/O for class-file structures.
//!
//! Every multi-byte quantity in a class file (JVMS §4.1) is stored big-endian. This module
//! provides the bounds-checked reads the [`crate::file::parser::Parser`] is built on and the
//! append helper used by the class-file writers.
//!
//! # Key Components
//!
//! - [`ClassIO`] - Trait implemented by every primitive that can be read or written
//! - [`read_be`] / [`read_be_at`] - Bounds-checked reads
//! - [`push_be`] - Append to a growing output buffer

use crate::{Error::OutOfBounds, Result};

/// Trait for primitive types that have a fixed big-endian byte representation.
pub trait ClassIO: Sized {
    /// The fixed-size byte array backing this type
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Build the value from its big-endian representation
    fn from_be_bytes(bytes: Self::Bytes) -> Self;

    /// Produce the big-endian representation of this value
    fn to_be_bytes(self) -> Self::Bytes;
}

macro_rules! impl_class_io {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ClassIO for $ty {
                type Bytes = [u8; std::mem::size_of::<$ty>()];

                fn from_be_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_be_bytes(bytes)
                }

                fn to_be_bytes(self) -> Self::Bytes {
                    <$ty>::to_be_bytes(self)
                }
            }
        )*
    };
}

impl_class_io!(u8, i8, u16, i16, u32, i32, u64, i64);

/// Reads a value of type `T` in big-endian format from the start of `data`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if `data` is shorter than `T`.
pub fn read_be<T: ClassIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_be_at(data, &mut offset)
}

/// Reads a value of type `T` in big-endian format at `offset` and advances the offset.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the read would exceed the data length.
pub fn read_be_at<T: ClassIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(OutOfBounds);
    };

    *offset = end;

    Ok(T::from_be_bytes(read))
}

/// Appends `value` in big-endian format to `out`.
pub fn push_be<T: ClassIO>(out: &mut Vec<u8>, value: T) {
    out.extend_from_slice(value.to_be_bytes().as_ref());
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_BUFFER: [u8; 8] = [0xCA, 0xFE, 0xBA, 0xBE, 0x00, 0x00, 0x00, 0x34];

    #[test]
    fn read_be_u32() {
        let result = read_be::<u32>(&TEST_BUFFER).unwrap();
        assert_eq!(result, 0xCAFE_BABE);
    }

    #[test]
    fn read_be_at_advances() {
        let mut offset = 4;
        let minor = read_be_at::<u16>(&TEST_BUFFER, &mut offset).unwrap();
        let major = read_be_at::<u16>(&TEST_BUFFER, &mut offset).unwrap();
        assert_eq!(minor, 0);
        assert_eq!(major, 0x34);
        assert_eq!(offset, 8);
    }

    #[test]
    fn read_be_signed() {
        let data = [0xFF, 0xFE];
        assert_eq!(read_be::<i16>(&data).unwrap(), -2);
        assert_eq!(read_be::<i8>(&data).unwrap(), -1);
    }

    #[test]
    fn read_be_errors() {
        let mut offset = 6;
        assert!(matches!(
            read_be_at::<u32>(&TEST_BUFFER, &mut offset),
            Err(OutOfBounds)
        ));
        assert_eq!(offset, 6);

        let mut offset = usize::MAX;
        assert!(read_be_at::<u8>(&TEST_BUFFER, &mut offset).is_err());
    }

    #[test]
    fn push_be_appends() {
        let mut out = Vec::new();
        push_be(&mut out, 0xCAFE_BABE_u32);
        push_be(&mut out, 0x0034_u16);
        assert_eq!(out, [0xCA, 0xFE, 0xBA, 0xBE, 0x00, 0x34]);
    }
}
