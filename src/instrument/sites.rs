//! Recognition of allocation sites.
//!
//! Five kinds of site exist: the four allocating opcodes and the reflective
//! `java/lang/reflect/Array.newInstance` call. [`classify`] inspects one decoded instruction;
//! [`scan_allocation_sites`] runs it over every method of a class and only counts, which
//! gives tests and diagnostics an independent view of what the rewriter should have
//! bracketed.

use strum::{Display, EnumCount, EnumIter, IntoEnumIterator};

use crate::{
    assembly::{decode_stream, opcodes, Instruction, Operand},
    classfile::{
        constpool::ConstantPool,
        descriptor::{array_dimensions, class_name_to_descriptor, primitive_for_atype},
        ClassFile,
    },
    Result,
};

/// Owner of the reflective array factory.
pub const REFLECT_ARRAY: &[u8] = b"java/lang/reflect/Array";

/// Name of the reflective array factory.
pub const NEW_INSTANCE: &[u8] = b"newInstance";

/// `Array.newInstance(Class, int)`.
pub const NEW_INSTANCE_LENGTH: &[u8] = b"(Ljava/lang/Class;I)Ljava/lang/Object;";

/// `Array.newInstance(Class, int...)`.
pub const NEW_INSTANCE_DIMENSIONS: &[u8] = b"(Ljava/lang/Class;[I)Ljava/lang/Object;";

/// The kind of an allocation site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumCount)]
pub enum AllocationKind {
    /// `new`
    Scalar,
    /// `newarray`
    PrimitiveArray,
    /// `anewarray`
    ReferenceArray,
    /// `multianewarray`
    MultiArray,
    /// `java/lang/reflect/Array.newInstance`
    ReflectiveArray,
}

/// How the dimensions of a site are found on the operand stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimensions {
    /// No counts (`new`)
    None,
    /// `n` separate `int` counts, outermost first
    Counts(u8),
    /// A single `int[]` holding the counts (`newInstance(Class, int[])`)
    Array,
}

/// One allocation site found in a method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationSite {
    /// Kind of site
    pub kind: AllocationKind,
    /// Descriptor passed to the pre-allocation hook, as raw modified UTF-8: the class
    /// descriptor for `new`, the element descriptor for arrays. Empty for reflective
    /// sites, whose component type is only known at run time.
    pub descriptor: Vec<u8>,
    /// Counts consumed from the operand stack
    pub dimensions: Dimensions,
    /// Internal name of the class the post-allocation result is cast back to; `None` for
    /// reflective sites
    pub result_class: Option<Vec<u8>>,
    /// Offset of the instruction in the original code
    pub offset: u32,
    /// Index of the instruction in the decoded stream
    pub index: usize,
}

impl AllocationSite {
    /// Number of dimensions created, when known statically.
    #[must_use]
    pub fn dimension_count(&self) -> Option<u8> {
        match self.dimensions {
            Dimensions::None => Some(0),
            Dimensions::Counts(count) => Some(count),
            Dimensions::Array => None,
        }
    }
}

/// Per-kind site counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SiteCounts {
    counts: [usize; AllocationKind::COUNT],
}

impl SiteCounts {
    /// Count one site.
    pub fn record(&mut self, kind: AllocationKind) {
        self.counts[kind as usize] += 1;
    }

    /// Add another set of counters.
    pub fn merge(&mut self, other: &SiteCounts) {
        for (mine, theirs) in self.counts.iter_mut().zip(other.counts) {
            *mine += theirs;
        }
    }

    /// Sites of one kind.
    #[must_use]
    pub fn get(&self, kind: AllocationKind) -> usize {
        self.counts[kind as usize]
    }

    /// Sites of all kinds.
    #[must_use]
    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    /// `(kind, count)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (AllocationKind, usize)> + '_ {
        AllocationKind::iter().map(|kind| (kind, self.get(kind)))
    }
}

impl std::fmt::Display for SiteCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (kind, count) in self.iter().filter(|(_, count)| *count > 0) {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{kind}={count}")?;
            first = false;
        }
        if first {
            write!(f, "none")?;
        }
        Ok(())
    }
}

/// Classify one instruction.
///
/// Returns `Ok(None)` for instructions that do not allocate. With `reflection` unset,
/// `Array.newInstance` calls are not reported.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if the instruction references an invalid constant or
/// a `multianewarray` asks for more dimensions than its type has.
pub fn classify(
    pool: &ConstantPool,
    instruction: &Instruction,
    index: usize,
    reflection: bool,
) -> Result<Option<AllocationSite>> {
    let site = |kind, descriptor, dimensions, result_class| AllocationSite {
        kind,
        descriptor,
        dimensions,
        result_class,
        offset: instruction.offset,
        index,
    };

    let found = match (instruction.opcode, &instruction.operand) {
        (opcodes::NEW, Operand::Constant(class)) => {
            let name = pool.class_name(*class)?;
            if name.first() == Some(&b'[') {
                return Err(malformed_error!(
                    "new at offset {} references array class",
                    instruction.offset
                ));
            }
            site(
                AllocationKind::Scalar,
                class_name_to_descriptor(name),
                Dimensions::None,
                Some(name.to_vec()),
            )
        }
        (opcodes::NEWARRAY, Operand::AType(atype)) => {
            let Some(element) = primitive_for_atype(*atype) else {
                return Err(malformed_error!(
                    "Invalid newarray type {} at offset {}",
                    atype,
                    instruction.offset
                ));
            };
            site(
                AllocationKind::PrimitiveArray,
                vec![element],
                Dimensions::Counts(1),
                Some(vec![b'[', element]),
            )
        }
        (opcodes::ANEWARRAY, Operand::Constant(class)) => {
            let element = class_name_to_descriptor(pool.class_name(*class)?);
            let mut array = Vec::with_capacity(element.len() + 1);
            array.push(b'[');
            array.extend_from_slice(&element);
            site(
                AllocationKind::ReferenceArray,
                element,
                Dimensions::Counts(1),
                Some(array),
            )
        }
        (opcodes::MULTIANEWARRAY, Operand::MultiANewArray { index: class, dimensions }) => {
            let array = pool.class_name(*class)?;
            let available = array_dimensions(array);
            if *dimensions == 0 || usize::from(*dimensions) > available {
                return Err(malformed_error!(
                    "multianewarray at offset {} creates {} of {} dimensions",
                    instruction.offset,
                    dimensions,
                    available
                ));
            }
            site(
                AllocationKind::MultiArray,
                array[usize::from(*dimensions)..].to_vec(),
                Dimensions::Counts(*dimensions),
                Some(array.to_vec()),
            )
        }
        (opcodes::INVOKESTATIC, Operand::Constant(method)) if reflection => {
            let member = pool.member_ref(*method)?;
            if member.owner != REFLECT_ARRAY || member.name != NEW_INSTANCE {
                return Ok(None);
            }
            let dimensions = if member.descriptor == NEW_INSTANCE_LENGTH {
                Dimensions::Counts(1)
            } else if member.descriptor == NEW_INSTANCE_DIMENSIONS {
                Dimensions::Array
            } else {
                return Ok(None);
            };
            site(AllocationKind::ReflectiveArray, Vec::new(), dimensions, None)
        }
        _ => return Ok(None),
    };

    Ok(Some(found))
}

/// Count the allocation sites of every method in a class, without rewriting anything.
///
/// # Errors
/// Returns an error if the class or any code array cannot be parsed.
pub fn scan_allocation_sites(class_bytes: &[u8], reflection: bool) -> Result<SiteCounts> {
    let class = ClassFile::parse(class_bytes)?;
    let mut counts = SiteCounts::default();

    for method in &class.methods {
        let Some(code) = method.code(&class.constant_pool)? else {
            continue;
        };
        for (index, instruction) in decode_stream(&code.code)?.iter().enumerate() {
            if let Some(site) = classify(&class.constant_pool, instruction, index, reflection)? {
                counts.record(site.kind);
            }
        }
    }

    Ok(counts)
}
