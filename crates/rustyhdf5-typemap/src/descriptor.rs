//! Scalar type descriptors.
//!
//! A [`TypeDescriptor`] summarises the shape of one element: its data class,
//! element size, signedness and (for array types) dimensions. It is built
//! either by inspecting a native type handle or from a host element type.

use std::fmt;

use crate::datatype::Datatype;
use crate::element::H5Element;
use crate::error::{Result, TypeMapError};
use crate::native::{Hid, Native};

/// Data class of a stored element.
///
/// `Boolean` is virtual: the format has no boolean class, so a two-valued
/// enumeration `{FALSE, TRUE}` is reported as one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataClass {
    Integer,
    Float,
    String,
    Enum,
    Compound,
    BitField,
    Opaque,
    Boolean,
    Reference,
    Array,
    Other,
}

impl DataClass {
    /// Map a native class id. Unknown ids are an error, never a default.
    pub fn from_class_id(id: i32) -> Result<Self> {
        Ok(match id {
            0 => DataClass::Integer,
            1 => DataClass::Float,
            2 => DataClass::Other,
            3 => DataClass::String,
            4 => DataClass::BitField,
            5 => DataClass::Opaque,
            6 => DataClass::Compound,
            7 => DataClass::Reference,
            8 => DataClass::Enum,
            9 => DataClass::Other,
            10 => DataClass::Array,
            other => return Err(TypeMapError::UnknownClass(other)),
        })
    }
}

impl fmt::Display for DataClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataClass::Integer => "INTEGER",
            DataClass::Float => "FLOAT",
            DataClass::String => "STRING",
            DataClass::Enum => "ENUM",
            DataClass::Compound => "COMPOUND",
            DataClass::BitField => "BITFIELD",
            DataClass::Opaque => "OPAQUE",
            DataClass::Boolean => "BOOLEAN",
            DataClass::Reference => "REFERENCE",
            DataClass::Array => "ARRAY",
            DataClass::Other => "OTHER",
        };
        f.write_str(name)
    }
}

/// Immutable description of one element's shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub data_class: DataClass,
    pub element_size: usize,
    pub signed: bool,
    pub dimensions: Vec<usize>,
    pub variable_length: bool,
    pub opaque_tag: Option<String>,
}

/// Whether a two-valued enumeration is the boolean encoding.
///
/// `names` are in ordinal order and must read `FALSE` then `TRUE`
/// (case-insensitive): booleans are stored as FALSE=0, TRUE=1, so
/// `{TRUE, FALSE}` is an ordinary enumeration.
pub fn is_boolean_enum<S: AsRef<str>>(names: &[S]) -> bool {
    names.len() == 2
        && names[0].as_ref().eq_ignore_ascii_case("FALSE")
        && names[1].as_ref().eq_ignore_ascii_case("TRUE")
}

impl TypeDescriptor {
    fn scalar(data_class: DataClass, element_size: usize) -> Self {
        Self {
            data_class,
            element_size,
            signed: false,
            dimensions: Vec::new(),
            variable_length: false,
            opaque_tag: None,
        }
    }

    /// Inspect a native type handle through class/size/sign queries.
    pub fn from_native(native: &dyn Native, tid: Hid) -> Result<Self> {
        let class_id = native.type_class(tid)?;
        let mut data_class = DataClass::from_class_id(class_id)?;
        let mut desc = Self::scalar(data_class, native.type_size(tid)?);
        match class_id {
            0 => desc.signed = native.type_is_signed(tid)?,
            8 => {
                if is_boolean_enum(&native.enum_member_names(tid)?) {
                    data_class = DataClass::Boolean;
                }
            }
            9 => {
                if native.type_is_variable_str(tid)? {
                    data_class = DataClass::String;
                    desc.variable_length = true;
                }
            }
            10 => {
                let info = Self::from_datatype(&native.describe_type(tid)?)?;
                desc.element_size = info.element_size;
                desc.dimensions = info.dimensions;
            }
            5 => {
                if let Datatype::Opaque { tag, .. } = native.describe_type(tid)? {
                    desc.opaque_tag = Some(tag);
                }
            }
            _ => {}
        }
        desc.data_class = data_class;
        Ok(desc)
    }

    /// Classify a datatype value without native calls.
    pub fn from_datatype(datatype: &Datatype) -> Result<Self> {
        let mut desc = Self::scalar(
            DataClass::from_class_id(datatype.class_id())?,
            datatype.type_size(),
        );
        match datatype {
            Datatype::FixedPoint { signed, .. } => desc.signed = *signed,
            Datatype::Enumeration { members, .. } => {
                let names: Vec<&str> = members.iter().map(|m| m.name.as_str()).collect();
                if is_boolean_enum(&names) {
                    desc.data_class = DataClass::Boolean;
                }
            }
            Datatype::VariableLength { is_string, .. } => {
                if *is_string {
                    desc.data_class = DataClass::String;
                    desc.variable_length = true;
                }
            }
            Datatype::Opaque { tag, .. } => desc.opaque_tag = Some(tag.clone()),
            Datatype::Array {
                base_type,
                dimensions,
            } => {
                desc.element_size = base_type.type_size();
                desc.dimensions = dimensions.iter().map(|&d| d as usize).collect();
            }
            _ => {}
        }
        Ok(desc)
    }

    /// Descriptor of a host element type.
    pub fn of<T: H5Element>() -> Self {
        let dt = T::datatype();
        let mut desc = Self::scalar(
            match dt {
                Datatype::FloatingPoint { .. } => DataClass::Float,
                _ => DataClass::Integer,
            },
            T::SIZE,
        );
        desc.signed = matches!(dt, Datatype::FixedPoint { signed: true, .. });
        desc
    }

    /// Descriptor of a fixed-size host array of `T`.
    pub fn of_array<T: H5Element>(dimensions: &[usize]) -> Self {
        let mut desc = Self::of::<T>();
        desc.data_class = DataClass::Array;
        desc.dimensions = dimensions.to_vec();
        desc
    }

    pub fn is_scalar(&self) -> bool {
        self.dimensions.is_empty()
    }

    /// Class, element size and dimensions agree. Sign and variable length
    /// are advisory only.
    pub fn is_compatible(&self, other: &TypeDescriptor) -> bool {
        self.data_class == other.data_class
            && self.element_size == other.element_size
            && self.dimensions == other.dimensions
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.data_class, self.element_size)?;
        if !self.dimensions.is_empty() {
            write!(f, "{:?}", self.dimensions)?;
        }
        if self.variable_length {
            write!(f, " vlen")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryNative;
    use rstest::rstest;

    #[rstest]
    #[case(&["FALSE", "TRUE"], true)]
    #[case(&["false", "true"], true)]
    #[case(&["False", "True"], true)]
    // Swapped ordinals would invert every stored value.
    #[case(&["TRUE", "FALSE"], false)]
    #[case(&["NO", "YES"], false)]
    #[case(&["FALSE", "TRUE", "MAYBE"], false)]
    fn boolean_enum_detection(#[case] names: &[&str], #[case] expected: bool) {
        assert_eq!(is_boolean_enum(names), expected);
        let desc = TypeDescriptor::from_datatype(&Datatype::enumeration(1, names)).unwrap();
        assert_eq!(desc.data_class == DataClass::Boolean, expected);
    }

    #[test]
    fn unknown_class_is_an_error() {
        assert_eq!(
            DataClass::from_class_id(11),
            Err(TypeMapError::UnknownClass(11))
        );
        assert!(DataClass::from_class_id(-1).is_err());
    }

    #[test]
    fn native_inspection_matches_datatype_classification() {
        let native = MemoryNative::new();
        for dt in [
            Datatype::integer(2, true),
            Datatype::float(4),
            Datatype::boolean(),
            Datatype::vlen_string(),
            Datatype::fixed_string(12),
            Datatype::Array {
                base_type: Box::new(Datatype::float(8)),
                dimensions: vec![2, 3],
            },
        ] {
            let tid = native.create_type(&dt).unwrap();
            let from_native = TypeDescriptor::from_native(&native, tid).unwrap();
            assert_eq!(from_native, TypeDescriptor::from_datatype(&dt).unwrap());
            native.close_type(tid).unwrap();
        }
    }

    #[test]
    fn vlen_string_detected_by_secondary_query() {
        let desc = TypeDescriptor::from_datatype(&Datatype::vlen_string()).unwrap();
        assert_eq!(desc.data_class, DataClass::String);
        assert!(desc.variable_length);
    }

    #[test]
    fn compatibility_ignores_sign() {
        let a = TypeDescriptor::of::<i32>();
        let b = TypeDescriptor::of::<u32>();
        assert!(a.is_compatible(&b));
        assert!(!a.is_compatible(&TypeDescriptor::of::<i64>()));
        assert!(!a.is_compatible(&TypeDescriptor::of::<f32>()));
        assert!(!a.is_compatible(&TypeDescriptor::of_array::<i32>(&[4])));
    }

    #[test]
    fn array_descriptor_reports_element_size() {
        let desc = TypeDescriptor::from_datatype(&Datatype::Array {
            base_type: Box::new(Datatype::integer(4, true)),
            dimensions: vec![3, 4],
        })
        .unwrap();
        assert_eq!(desc.data_class, DataClass::Array);
        assert_eq!(desc.element_size, 4);
        assert_eq!(desc.dimensions, vec![3, 4]);
    }
}
