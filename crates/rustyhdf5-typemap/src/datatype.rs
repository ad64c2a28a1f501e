//! HDF5 datatype descriptors as exchanged with the native layer.
//!
//! Covers the eleven HDF5 type classes (0–10). The same model describes
//! both the storage (file) form of a type and its memory form; the two
//! differ in byte order, compound member offsets and the width of
//! variable-length members.

use crate::error::{Result, TypeMapError};

/// Size of a variable-length string in memory (a pointer).
pub const VLEN_STRING_MEMORY_SIZE: usize = 8;
/// Size of a variable-length sequence descriptor in memory (length + pointer).
pub const VLEN_SEQUENCE_MEMORY_SIZE: usize = 16;
/// Size of a variable-length element in storage (a global heap id).
pub const VLEN_STORAGE_SIZE: usize = 16;

/// Byte order of numeric data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatatypeByteOrder {
    LittleEndian,
    BigEndian,
}

impl DatatypeByteOrder {
    /// Byte order of the running host.
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            DatatypeByteOrder::BigEndian
        } else {
            DatatypeByteOrder::LittleEndian
        }
    }
}

/// String padding type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringPadding {
    NullTerminate,
    NullPad,
    SpacePad,
}

/// Character set encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharacterSet {
    Ascii,
    Utf8,
}

/// Reference type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceType {
    Object,
    DatasetRegion,
}

/// A member of a compound datatype.
#[derive(Debug, Clone, PartialEq)]
pub struct CompoundMember {
    /// Member name.
    pub name: String,
    /// Byte offset within the compound.
    pub byte_offset: u64,
    /// Member datatype.
    pub datatype: Datatype,
}

/// A member of an enumeration datatype.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumMember {
    /// Member name.
    pub name: String,
    /// Raw value bytes (length = base type size).
    pub value: Vec<u8>,
}

/// An HDF5 datatype.
#[derive(Debug, Clone, PartialEq)]
pub enum Datatype {
    /// Class 0: Fixed-point (integer) types.
    FixedPoint {
        size: u32,
        byte_order: DatatypeByteOrder,
        signed: bool,
    },
    /// Class 1: Floating-point types.
    FloatingPoint {
        size: u32,
        byte_order: DatatypeByteOrder,
    },
    /// Class 2: Time type.
    Time { size: u32 },
    /// Class 3: Fixed-length string.
    String {
        size: u32,
        padding: StringPadding,
        charset: CharacterSet,
    },
    /// Class 4: Bit field.
    BitField {
        size: u32,
        byte_order: DatatypeByteOrder,
    },
    /// Class 5: Opaque data with a free-text tag.
    Opaque { size: u32, tag: String },
    /// Class 6: Compound type.
    Compound {
        size: u32,
        members: Vec<CompoundMember>,
    },
    /// Class 7: Reference type.
    Reference { size: u32, ref_type: ReferenceType },
    /// Class 8: Enumeration type.
    Enumeration {
        base_type: Box<Datatype>,
        members: Vec<EnumMember>,
    },
    /// Class 9: Variable-length type.
    VariableLength {
        is_string: bool,
        charset: CharacterSet,
        base_type: Box<Datatype>,
    },
    /// Class 10: Array type.
    Array {
        base_type: Box<Datatype>,
        dimensions: Vec<u32>,
    },
}

impl Datatype {
    /// Storage-form integer type (little-endian).
    pub fn integer(size: u32, signed: bool) -> Self {
        Datatype::FixedPoint {
            size,
            byte_order: DatatypeByteOrder::LittleEndian,
            signed,
        }
    }

    /// Storage-form float type (little-endian).
    pub fn float(size: u32) -> Self {
        Datatype::FloatingPoint {
            size,
            byte_order: DatatypeByteOrder::LittleEndian,
        }
    }

    /// Fixed-length, null-padded UTF-8 string.
    pub fn fixed_string(size: u32) -> Self {
        Datatype::String {
            size,
            padding: StringPadding::NullPad,
            charset: CharacterSet::Utf8,
        }
    }

    /// Variable-length UTF-8 string.
    pub fn vlen_string() -> Self {
        Datatype::VariableLength {
            is_string: true,
            charset: CharacterSet::Utf8,
            base_type: Box::new(Datatype::integer(1, false)),
        }
    }

    /// Object reference.
    pub fn object_reference() -> Self {
        Datatype::Reference {
            size: 8,
            ref_type: ReferenceType::Object,
        }
    }

    /// Enumeration over an unsigned base of `size` bytes with values `0..names.len()`.
    pub fn enumeration<S: AsRef<str>>(size: u32, names: &[S]) -> Self {
        let members = names
            .iter()
            .enumerate()
            .map(|(i, name)| EnumMember {
                name: name.as_ref().to_string(),
                value: (i as u64).to_le_bytes()[..size as usize].to_vec(),
            })
            .collect();
        Datatype::Enumeration {
            base_type: Box::new(Datatype::integer(size, false)),
            members,
        }
    }

    /// The two-valued enumeration used to store booleans.
    pub fn boolean() -> Self {
        Datatype::enumeration(1, &["FALSE", "TRUE"])
    }

    /// HDF5 class id of this type.
    pub fn class_id(&self) -> i32 {
        match self {
            Datatype::FixedPoint { .. } => 0,
            Datatype::FloatingPoint { .. } => 1,
            Datatype::Time { .. } => 2,
            Datatype::String { .. } => 3,
            Datatype::BitField { .. } => 4,
            Datatype::Opaque { .. } => 5,
            Datatype::Compound { .. } => 6,
            Datatype::Reference { .. } => 7,
            Datatype::Enumeration { .. } => 8,
            Datatype::VariableLength { .. } => 9,
            Datatype::Array { .. } => 10,
        }
    }

    /// Return the size in bytes of one element of this type in storage form.
    pub fn type_size(&self) -> usize {
        match self {
            Datatype::FixedPoint { size, .. }
            | Datatype::FloatingPoint { size, .. }
            | Datatype::Time { size }
            | Datatype::String { size, .. }
            | Datatype::BitField { size, .. }
            | Datatype::Opaque { size, .. }
            | Datatype::Compound { size, .. }
            | Datatype::Reference { size, .. } => *size as usize,
            Datatype::Enumeration { base_type, .. } => base_type.type_size(),
            Datatype::VariableLength { .. } => VLEN_STORAGE_SIZE,
            Datatype::Array {
                base_type,
                dimensions,
            } => base_type.type_size() * element_count(dimensions),
        }
    }

    /// Return the size in bytes of one element of this type in memory form.
    ///
    /// Only variable-length data differs from [`Datatype::type_size`]; a
    /// compound carries its own (memory) size.
    pub fn memory_size(&self) -> usize {
        match self {
            Datatype::VariableLength { is_string: true, .. } => VLEN_STRING_MEMORY_SIZE,
            Datatype::VariableLength { .. } => VLEN_SEQUENCE_MEMORY_SIZE,
            Datatype::Enumeration { base_type, .. } => base_type.memory_size(),
            Datatype::Array {
                base_type,
                dimensions,
            } => base_type.memory_size() * element_count(dimensions),
            other => other.type_size(),
        }
    }

    /// Whether this type is, or contains, variable-length data.
    pub fn has_variable_length(&self) -> bool {
        match self {
            Datatype::VariableLength { .. } => true,
            Datatype::Compound { members, .. } => {
                members.iter().any(|m| m.datatype.has_variable_length())
            }
            Datatype::Array { base_type, .. } => base_type.has_variable_length(),
            _ => false,
        }
    }

    /// Names of an enumeration's members, in declaration order.
    pub fn enum_names(&self) -> Option<Vec<&str>> {
        match self {
            Datatype::Enumeration { members, .. } => {
                Some(members.iter().map(|m| m.name.as_str()).collect())
            }
            _ => None,
        }
    }

    /// Look up a compound member by name.
    pub fn member(&self, name: &str) -> Option<&CompoundMember> {
        match self {
            Datatype::Compound { members, .. } => members.iter().find(|m| m.name == name),
            _ => None,
        }
    }

    /// The same type with every numeric component in the given byte order.
    pub fn with_byte_order(&self, order: DatatypeByteOrder) -> Datatype {
        match self {
            Datatype::FixedPoint { size, signed, .. } => Datatype::FixedPoint {
                size: *size,
                byte_order: order,
                signed: *signed,
            },
            Datatype::FloatingPoint { size, .. } => Datatype::FloatingPoint {
                size: *size,
                byte_order: order,
            },
            Datatype::BitField { size, .. } => Datatype::BitField {
                size: *size,
                byte_order: order,
            },
            Datatype::Enumeration { base_type, members } => Datatype::Enumeration {
                base_type: Box::new(base_type.with_byte_order(order)),
                members: members.clone(),
            },
            Datatype::Array {
                base_type,
                dimensions,
            } => Datatype::Array {
                base_type: Box::new(base_type.with_byte_order(order)),
                dimensions: dimensions.clone(),
            },
            Datatype::Compound { size, members } => Datatype::Compound {
                size: *size,
                members: members
                    .iter()
                    .map(|m| CompoundMember {
                        name: m.name.clone(),
                        byte_offset: m.byte_offset,
                        datatype: m.datatype.with_byte_order(order),
                    })
                    .collect(),
            },
            other => other.clone(),
        }
    }

    /// Short human-readable name, used in error messages.
    pub fn describe(&self) -> String {
        match self {
            Datatype::FixedPoint { size, signed, .. } => {
                format!("{}{}", if *signed { "i" } else { "u" }, size * 8)
            }
            Datatype::FloatingPoint { size, .. } => format!("f{}", size * 8),
            Datatype::Time { size } => format!("time{}", size * 8),
            Datatype::String { size, .. } => format!("string[{size}]"),
            Datatype::BitField { size, .. } => format!("bitfield{}", size * 8),
            Datatype::Opaque { size, tag } => format!("opaque[{size}, '{tag}']"),
            Datatype::Compound { members, .. } => format!("compound({} members)", members.len()),
            Datatype::Reference { .. } => "reference".to_string(),
            Datatype::Enumeration { members, .. } => format!("enum({} values)", members.len()),
            Datatype::VariableLength { is_string: true, .. } => "vlen string".to_string(),
            Datatype::VariableLength { base_type, .. } => format!("vlen<{}>", base_type.describe()),
            Datatype::Array {
                base_type,
                dimensions,
            } => format!("array<{}, {dimensions:?}>", base_type.describe()),
        }
    }

    /// Ensure this type is an integer type of the given size.
    pub fn expect_integer(&self, context: &str, size: usize) -> Result<()> {
        match self {
            Datatype::FixedPoint { size: s, .. } if *s as usize == size => Ok(()),
            other => Err(TypeMapError::mismatch(
                context,
                format!("{}-byte integer", size),
                other.describe(),
            )),
        }
    }
}

/// Number of elements described by a dimension list (1 for an empty list).
pub fn element_count(dimensions: &[u32]) -> usize {
    dimensions.iter().map(|&d| d as usize).product()
}
