//! Compound mappings: which members a record has and how each is typed.
//!
//! A [`CompoundMapping`] is the declared half of a compound type. It lists
//! members in order, each with a [`MemberType`] and a binding to the host
//! record. Lengths may be left open and filled in later, either from a
//! template record or from the stored type.

use std::fmt;
use std::sync::Arc;

use crate::bits::WORD_BITS;
use crate::datatype::{Datatype, DatatypeByteOrder};
use crate::descriptor::is_boolean_enum;
use crate::error::{Result, TypeMapError};
use crate::record::HostRecord;
use crate::value::{HostValue, Value};

/// Unit of a duration member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    /// Number of microseconds in one unit.
    pub fn micros(self) -> i64 {
        match self {
            TimeUnit::Microseconds => 1,
            TimeUnit::Milliseconds => 1_000,
            TimeUnit::Seconds => 1_000_000,
            TimeUnit::Minutes => 60_000_000,
            TimeUnit::Hours => 3_600_000_000,
            TimeUnit::Days => 86_400_000_000,
        }
    }

    /// Convert `value` from this unit into `target`, truncating toward zero.
    pub fn convert(self, value: i64, target: TimeUnit) -> i64 {
        let from = self.micros() as i128;
        let to = target.micros() as i128;
        let converted = value as i128 * from / to;
        converted.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }
}

/// Out-of-band tag giving a stored value a higher-level meaning.
///
/// Persisted as a `u16` ordinal in the `__TYPE_VARIANT__` (datasets) and
/// `__TYPE_VARIANTS__` (compound members) attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TypeVariant {
    #[default]
    None,
    BitField,
    Timestamp,
    Duration(TimeUnit),
}

impl TypeVariant {
    pub fn ordinal(self) -> u16 {
        match self {
            TypeVariant::None => 0,
            TypeVariant::BitField => 1,
            TypeVariant::Timestamp => 2,
            TypeVariant::Duration(TimeUnit::Microseconds) => 3,
            TypeVariant::Duration(TimeUnit::Milliseconds) => 4,
            TypeVariant::Duration(TimeUnit::Seconds) => 5,
            TypeVariant::Duration(TimeUnit::Minutes) => 6,
            TypeVariant::Duration(TimeUnit::Hours) => 7,
            TypeVariant::Duration(TimeUnit::Days) => 8,
        }
    }

    pub fn from_ordinal(ordinal: u16) -> Option<Self> {
        Some(match ordinal {
            0 => TypeVariant::None,
            1 => TypeVariant::BitField,
            2 => TypeVariant::Timestamp,
            3 => TypeVariant::Duration(TimeUnit::Microseconds),
            4 => TypeVariant::Duration(TimeUnit::Milliseconds),
            5 => TypeVariant::Duration(TimeUnit::Seconds),
            6 => TypeVariant::Duration(TimeUnit::Minutes),
            7 => TypeVariant::Duration(TimeUnit::Hours),
            8 => TypeVariant::Duration(TimeUnit::Days),
            _ => return None,
        })
    }

    pub fn is_none(self) -> bool {
        self == TypeVariant::None
    }
}

/// A named enumeration with values `0..values.len()`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnumType {
    pub name: String,
    pub values: Vec<String>,
}

impl EnumType {
    pub fn new<S: AsRef<str>>(name: &str, values: &[S]) -> Self {
        Self {
            name: name.to_string(),
            values: values.iter().map(|v| v.as_ref().to_string()).collect(),
        }
    }

    /// Storage size of the base integer: the smallest of 1, 2 or 4 bytes
    /// that can number every value.
    pub fn base_size(&self) -> usize {
        match self.values.len() {
            0..=0x100 => 1,
            0x101..=0x1_0000 => 2,
            _ => 4,
        }
    }

    pub fn ordinal(&self, name: &str) -> Option<usize> {
        self.values.iter().position(|v| v == name)
    }

    pub fn name_of(&self, ordinal: usize) -> Option<&str> {
        self.values.get(ordinal).map(String::as_str)
    }

    /// Storage-form datatype.
    pub fn datatype(&self) -> Datatype {
        Datatype::enumeration(self.base_size() as u32, &self.values)
    }

    /// Recover an enumeration from a stored type, if it is one.
    pub fn from_datatype(name: &str, datatype: &Datatype) -> Option<Self> {
        datatype.enum_names().map(|names| EnumType::new(name, &names))
    }
}

/// A host enumeration with a fixed list of named values,
/// usually implemented through `#[derive(H5Enum)]`.
pub trait H5EnumValue: HostValue + Copy {
    fn enum_type() -> EnumType;

    fn ordinal(self) -> usize;

    fn from_ordinal(ordinal: usize) -> Option<Self>;
}

/// The declared type of one compound member.
#[derive(Debug, Clone, PartialEq)]
pub enum MemberType {
    Int { size: usize, signed: bool },
    Float { size: usize },
    /// `None` leaves the length to be inferred.
    FixedString { len: Option<i64> },
    VlenString,
    Bool,
    BitField { bits: Option<i64> },
    Enum(Arc<EnumType>),
    Array { elem: Box<MemberType>, dims: Option<Vec<usize>> },
    Compound(Box<CompoundMapping>),
    Reference,
    Timestamp,
    Duration(TimeUnit),
    Opaque { tag: String, len: Option<i64> },
}

impl MemberType {
    pub fn enumeration(enum_type: EnumType) -> Self {
        MemberType::Enum(Arc::new(enum_type))
    }

    pub fn variant(&self) -> TypeVariant {
        match self {
            MemberType::BitField { .. } => TypeVariant::BitField,
            MemberType::Timestamp => TypeVariant::Timestamp,
            MemberType::Duration(unit) => TypeVariant::Duration(*unit),
            _ => TypeVariant::None,
        }
    }

    /// Infer a member type from a template value.
    pub fn infer(member: &str, value: &Value) -> Result<Self> {
        let uninferable = |what| TypeMapError::Uninferable {
            member: member.to_string(),
            what,
        };
        Ok(match value {
            Value::Int(_) => MemberType::Int {
                size: 8,
                signed: true,
            },
            Value::UInt(_) => MemberType::Int {
                size: 8,
                signed: false,
            },
            Value::Float(_) => MemberType::Float { size: 8 },
            Value::Bool(_) => MemberType::Bool,
            Value::Str(s) => MemberType::FixedString {
                len: Some(s.len().max(1) as i64),
            },
            Value::Bits(b) => MemberType::BitField {
                bits: Some(b.logical_len().max(1) as i64),
            },
            Value::Enum(_) => return Err(uninferable("enumeration values")),
            Value::Array(items) => {
                let first = items.first().ok_or_else(|| uninferable("array element type"))?;
                MemberType::Array {
                    elem: Box::new(MemberType::infer(member, first)?),
                    dims: Some(vec![items.len()]),
                }
            }
            Value::Compound(fields) => {
                let mut mapping = CompoundMapping::new();
                for (name, v) in fields {
                    mapping = mapping.member(name, MemberType::infer(name, v)?);
                }
                MemberType::Compound(Box::new(mapping))
            }
            Value::Reference(_) => MemberType::Reference,
            Value::Timestamp(_) => MemberType::Timestamp,
            Value::Duration(_, unit) => MemberType::Duration(*unit),
            Value::Opaque(bytes) => MemberType::Opaque {
                tag: String::new(),
                len: Some(bytes.len().max(1) as i64),
            },
        })
    }

    /// Derive a member type from a stored member type.
    pub fn from_datatype(member: &str, datatype: &Datatype, variant: TypeVariant) -> Result<Self> {
        let unsupported = || TypeMapError::Uninferable {
            member: member.to_string(),
            what: "member type from stored type",
        };
        Ok(match datatype {
            Datatype::FixedPoint { size, signed, .. } => match variant {
                TypeVariant::Timestamp => MemberType::Timestamp,
                TypeVariant::Duration(unit) => MemberType::Duration(unit),
                _ => MemberType::Int {
                    size: *size as usize,
                    signed: *signed,
                },
            },
            Datatype::FloatingPoint { size, .. } => MemberType::Float {
                size: *size as usize,
            },
            Datatype::String { size, .. } => MemberType::FixedString {
                len: Some(*size as i64),
            },
            Datatype::VariableLength {
                is_string: true, ..
            } => MemberType::VlenString,
            Datatype::Enumeration { members, .. } => {
                let names: Vec<&str> = members.iter().map(|m| m.name.as_str()).collect();
                if is_boolean_enum(&names) {
                    MemberType::Bool
                } else {
                    MemberType::enumeration(EnumType::new(member, &names))
                }
            }
            Datatype::Array {
                base_type,
                dimensions,
            } => match (base_type.as_ref(), variant) {
                (Datatype::BitField { size: 8, .. }, _) | (_, TypeVariant::BitField) => {
                    MemberType::BitField {
                        bits: Some((crate::datatype::element_count(dimensions) * WORD_BITS) as i64),
                    }
                }
                (base, _) => MemberType::Array {
                    elem: Box::new(MemberType::from_datatype(member, base, TypeVariant::None)?),
                    dims: Some(dimensions.iter().map(|&d| d as usize).collect()),
                },
            },
            Datatype::Compound { .. } => {
                MemberType::Compound(Box::new(CompoundMapping::from_datatype(datatype, &[])?))
            }
            Datatype::Reference { .. } => MemberType::Reference,
            Datatype::Opaque { size, tag } => MemberType::Opaque {
                tag: tag.clone(),
                len: Some(*size as i64),
            },
            _ => return Err(unsupported()),
        })
    }
}

impl fmt::Display for MemberType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberType::Int { size, signed } => {
                write!(f, "{}{}", if *signed { "i" } else { "u" }, size * 8)
            }
            MemberType::Float { size } => write!(f, "f{}", size * 8),
            MemberType::FixedString { len: Some(n) } => write!(f, "string[{n}]"),
            MemberType::FixedString { len: None } => write!(f, "string[?]"),
            MemberType::VlenString => write!(f, "vlen string"),
            MemberType::Bool => write!(f, "bool"),
            MemberType::BitField { bits } => match bits {
                Some(n) => write!(f, "bitfield[{n}]"),
                None => write!(f, "bitfield[?]"),
            },
            MemberType::Enum(e) => write!(f, "enum {}", e.name),
            MemberType::Array { elem, dims } => write!(f, "array<{elem}, {dims:?}>"),
            MemberType::Compound(m) => write!(f, "compound({} members)", m.len()),
            MemberType::Reference => write!(f, "reference"),
            MemberType::Timestamp => write!(f, "timestamp"),
            MemberType::Duration(unit) => write!(f, "duration({unit:?})"),
            MemberType::Opaque { tag, .. } => write!(f, "opaque '{tag}'"),
        }
    }
}

/// Declaration hints attached to a host field, e.g. by `#[h5(len = 8)]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemberHint {
    /// String length, array length, or bit-field length in 64-bit words.
    pub len: Option<i64>,
    /// Length of each element of an array member.
    pub elem_len: Option<i64>,
    pub bits: Option<i64>,
    pub vlen: bool,
    pub timestamp: bool,
    pub unit: Option<TimeUnit>,
}

impl MemberHint {
    pub fn len(mut self, len: i64) -> Self {
        self.len = Some(len);
        self
    }

    pub fn elem_len(mut self, len: i64) -> Self {
        self.elem_len = Some(len);
        self
    }

    pub fn bits(mut self, bits: i64) -> Self {
        self.bits = Some(bits);
        self
    }

    pub fn vlen(mut self) -> Self {
        self.vlen = true;
        self
    }

    pub fn timestamp(mut self) -> Self {
        self.timestamp = true;
        self
    }

    pub fn duration(mut self, unit: TimeUnit) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Hints that apply to the elements of an array member.
    pub fn element(&self) -> Self {
        Self {
            len: self.elem_len,
            elem_len: None,
            bits: self.bits,
            vlen: self.vlen,
            timestamp: self.timestamp,
            unit: self.unit,
        }
    }

    pub(crate) fn time_type(&self) -> Option<MemberType> {
        if self.timestamp {
            Some(MemberType::Timestamp)
        } else {
            self.unit.map(MemberType::Duration)
        }
    }
}

/// Where a member lives in the host record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// Field name (struct records) or key (map records).
    Name(String),
    /// Position (list and array records).
    Index(usize),
}

/// One declared member.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberSpec {
    pub name: String,
    pub binding: Option<Binding>,
    pub member_type: MemberType,
}

/// Ordered list of compound members.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompoundMapping {
    members: Vec<MemberSpec>,
}

impl CompoundMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member bound by its own name (field name or map key) or,
    /// for list and array records, by its position.
    pub fn member(mut self, name: &str, member_type: MemberType) -> Self {
        self.members.push(MemberSpec {
            name: name.to_string(),
            binding: None,
            member_type,
        });
        self
    }

    /// Add a member bound to a differently named field or map key.
    pub fn member_key(mut self, name: &str, key: &str, member_type: MemberType) -> Self {
        self.members.push(MemberSpec {
            name: name.to_string(),
            binding: Some(Binding::Name(key.to_string())),
            member_type,
        });
        self
    }

    /// Add a member bound to an explicit list or array position.
    pub fn member_at(mut self, name: &str, index: usize, member_type: MemberType) -> Self {
        self.members.push(MemberSpec {
            name: name.to_string(),
            binding: Some(Binding::Index(index)),
            member_type,
        });
        self
    }

    /// Add a member for a host field of type `T`, typed from its hints.
    pub fn field<T: HostValue>(self, name: &str, field: &str, hint: &MemberHint) -> Result<Self> {
        let member_type = T::member_type(hint).ok_or_else(|| TypeMapError::Uninferable {
            member: name.to_string(),
            what: "member type (declare a length)",
        })?;
        Ok(self.member_key(name, field, member_type))
    }

    /// Infer a mapping from a map-shaped template record.
    pub fn infer<R: HostRecord>(template: &R) -> Result<Self> {
        let mut mapping = Self::new();
        for (i, (name, value)) in template.template().into_iter().enumerate() {
            let name = name.ok_or_else(|| TypeMapError::Uninferable {
                member: format!("#{i}"),
                what: "member name",
            })?;
            let member_type = MemberType::infer(&name, &value)?;
            mapping = mapping.member(&name, member_type);
        }
        Ok(mapping)
    }

    /// Infer a mapping from a list- or array-shaped template record,
    /// naming the members positionally.
    pub fn infer_named<R: HostRecord>(template: &R, names: &[&str]) -> Result<Self> {
        let entries = template.template();
        if entries.len() != names.len() {
            return Err(TypeMapError::mismatch(
                "template",
                format!("{} member names", entries.len()),
                format!("{}", names.len()),
            ));
        }
        let mut mapping = Self::new();
        for (i, ((_, value), name)) in entries.into_iter().zip(names).enumerate() {
            let member_type = MemberType::infer(name, &value)?;
            mapping = mapping.member_at(name, i, member_type);
        }
        Ok(mapping)
    }

    /// Build a mapping that reads every member of a stored compound type,
    /// restoring type variants from the per-member ordinals.
    pub fn from_datatype(datatype: &Datatype, variants: &[TypeVariant]) -> Result<Self> {
        let members = match datatype {
            Datatype::Compound { members, .. } => members,
            other => {
                return Err(TypeMapError::mismatch(
                    "stored type",
                    "compound",
                    other.describe(),
                ))
            }
        };
        let mut mapping = Self::new();
        for (i, m) in members.iter().enumerate() {
            let variant = variants.get(i).copied().unwrap_or_default();
            let dt = m.datatype.with_byte_order(DatatypeByteOrder::LittleEndian);
            mapping = mapping.member(&m.name, MemberType::from_datatype(&m.name, &dt, variant)?);
        }
        Ok(mapping)
    }

    pub fn members(&self) -> &[MemberSpec] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Type variants of the members, in order.
    pub fn variants(&self) -> Vec<TypeVariant> {
        self.members
            .iter()
            .map(|m| m.member_type.variant())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::BitSet;
    use std::collections::BTreeMap;

    #[test]
    fn enum_base_size_grows_with_value_count() {
        let small = EnumType::new("s", &["A", "B"]);
        assert_eq!(small.base_size(), 1);
        let names: Vec<String> = (0..300).map(|i| format!("V{i}")).collect();
        assert_eq!(EnumType::new("m", &names).base_size(), 2);
        let names: Vec<String> = (0..70_000).map(|i| format!("V{i}")).collect();
        assert_eq!(EnumType::new("l", &names).base_size(), 4);
    }

    #[test]
    fn variant_ordinals_round_trip() {
        for ordinal in 0..=8 {
            let v = TypeVariant::from_ordinal(ordinal).unwrap();
            assert_eq!(v.ordinal(), ordinal);
        }
        assert_eq!(TypeVariant::from_ordinal(9), None);
    }

    #[test]
    fn time_units_convert() {
        assert_eq!(TimeUnit::Seconds.convert(90, TimeUnit::Minutes), 1);
        assert_eq!(TimeUnit::Hours.convert(2, TimeUnit::Milliseconds), 7_200_000);
        assert_eq!(TimeUnit::Days.convert(1, TimeUnit::Hours), 24);
    }

    #[test]
    fn infer_from_map_template() {
        let mut t = BTreeMap::new();
        t.insert("name".to_string(), Value::Str("abcdef".into()));
        t.insert("flags".to_string(), Value::Bits(BitSet::from_indices([70])));
        t.insert("xs".to_string(), Value::Array(vec![Value::Float(1.0); 3]));
        let m = CompoundMapping::infer(&t).unwrap();
        let types: Vec<_> = m.members().iter().map(|s| s.member_type.clone()).collect();
        assert_eq!(
            types,
            vec![
                MemberType::BitField { bits: Some(71) },
                MemberType::FixedString { len: Some(6) },
                MemberType::Array {
                    elem: Box::new(MemberType::Float { size: 8 }),
                    dims: Some(vec![3]),
                },
            ]
        );
    }

    #[test]
    fn infer_rejects_empty_arrays_and_enums() {
        let mut t = BTreeMap::new();
        t.insert("xs".to_string(), Value::Array(vec![]));
        assert!(matches!(
            CompoundMapping::infer(&t),
            Err(TypeMapError::Uninferable { .. })
        ));
        let mut t = BTreeMap::new();
        t.insert("e".to_string(), Value::Enum("RED".into()));
        assert!(CompoundMapping::infer(&t).is_err());
    }

    #[test]
    fn infer_named_binds_positions() {
        let template = vec![Value::Int(1), Value::Bool(false)];
        let m = CompoundMapping::infer_named(&template, &["n", "ok"]).unwrap();
        assert_eq!(m.members()[1].binding, Some(Binding::Index(1)));
        assert!(CompoundMapping::infer_named(&template, &["n"]).is_err());
    }

    #[test]
    fn mapping_from_stored_type_restores_variants() {
        let stored = Datatype::Compound {
            size: 17,
            members: vec![
                crate::datatype::CompoundMember {
                    name: "when".into(),
                    byte_offset: 0,
                    datatype: Datatype::integer(8, true),
                },
                crate::datatype::CompoundMember {
                    name: "ok".into(),
                    byte_offset: 8,
                    datatype: Datatype::boolean(),
                },
                crate::datatype::CompoundMember {
                    name: "n".into(),
                    byte_offset: 9,
                    datatype: Datatype::integer(8, true),
                },
            ],
        };
        let m = CompoundMapping::from_datatype(
            &stored,
            &[TypeVariant::Timestamp, TypeVariant::None, TypeVariant::None],
        )
        .unwrap();
        assert_eq!(m.members()[0].member_type, MemberType::Timestamp);
        assert_eq!(m.members()[1].member_type, MemberType::Bool);
        assert_eq!(
            m.members()[2].member_type,
            MemberType::Int {
                size: 8,
                signed: true
            }
        );
    }
}
