//! Dynamically typed member values and the host-type conversion trait.
//!
//! Every compound member crosses the byteifier boundary as a [`Value`].
//! Host types convert to and from it through [`HostValue`], which also lets
//! a host type declare the [`MemberType`] it maps to.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};

use crate::bits::BitSet;
use crate::error::{Result, TypeMapError};
use crate::mapping::{MemberHint, MemberType, TimeUnit};

/// Address of an HDF5 object, as stored in an object reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct ObjectRef(pub u64);

impl ObjectRef {
    pub fn address(self) -> u64 {
        self.0
    }

    /// The null reference.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// One member value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    Str(String),
    Bits(BitSet),
    /// Enumeration value, by name.
    Enum(String),
    Array(Vec<Value>),
    Compound(BTreeMap<String, Value>),
    Reference(ObjectRef),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
    /// A duration, in the unit of the member it belongs to.
    /// A count of the given unit.
    Duration(i64, TimeUnit),
    Opaque(Vec<u8>),
}

impl Default for Value {
    fn default() -> Self {
        Value::Int(0)
    }
}

impl Value {
    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Bits(_) => "bits",
            Value::Enum(_) => "enum",
            Value::Array(_) => "array",
            Value::Compound(_) => "compound",
            Value::Reference(_) => "reference",
            Value::Timestamp(_) => "timestamp",
            Value::Duration(..) => "duration",
            Value::Opaque(_) => "opaque",
        }
    }

    /// Any integral value as an `i128`, wide enough for both signednesses.
    pub fn as_integer(&self) -> Option<i128> {
        match self {
            Value::Int(v) | Value::Timestamp(v) | Value::Duration(v, _) => Some(*v as i128),
            Value::UInt(v) => Some(*v as i128),
            Value::Bool(b) => Some(*b as i128),
            Value::Reference(r) => Some(r.0 as i128),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::UInt(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::Enum(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) | Value::Timestamp(v) => write!(f, "{v}"),
            Value::Duration(v, unit) => write!(f, "{v} {unit:?}"),
            Value::UInt(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Enum(s) => write!(f, "{s}"),
            Value::Bits(b) => write!(f, "{b:?}"),
            Value::Reference(r) => write!(f, "@{}", r.0),
            Value::Opaque(b) => write!(f, "opaque[{}]", b.len()),
            Value::Array(items) => write!(f, "array[{}]", items.len()),
            Value::Compound(m) => write!(f, "compound{{{} members}}", m.len()),
        }
    }
}

fn wrong_kind<T>(expected: &str, found: &Value) -> Result<T> {
    Err(TypeMapError::mismatch("value", expected, found.kind()))
}

fn out_of_range<T>(target: &str, value: impl fmt::Display) -> Result<T> {
    Err(TypeMapError::ValueOutOfRange {
        target: target.to_string(),
        value: value.to_string(),
    })
}

/// A host type that can be stored as a compound member.
pub trait HostValue: Sized {
    /// The member type this host type maps to, given the declaration hints.
    /// `None` when it cannot be decided without a template value.
    fn member_type(_hint: &MemberHint) -> Option<MemberType> {
        None
    }

    fn to_value(&self) -> Value;

    fn from_value(value: Value) -> Result<Self>;
}

macro_rules! host_int {
    ($($t:ty => $variant:ident, $size:expr, $signed:expr);* $(;)?) => {$(
        impl HostValue for $t {
            fn member_type(hint: &MemberHint) -> Option<MemberType> {
                Some(hint.time_type().unwrap_or(MemberType::Int { size: $size, signed: $signed }))
            }

            fn to_value(&self) -> Value {
                Value::$variant((*self).into())
            }

            fn from_value(value: Value) -> Result<Self> {
                match value.as_integer() {
                    Some(v) => match <$t>::try_from(v) {
                        Ok(v) => Ok(v),
                        Err(_) => out_of_range(stringify!($t), v),
                    },
                    None => wrong_kind("integer", &value),
                }
            }
        }
    )*};
}

host_int! {
    i8 => Int, 1, true;
    i16 => Int, 2, true;
    i32 => Int, 4, true;
    i64 => Int, 8, true;
    u8 => UInt, 1, false;
    u16 => UInt, 2, false;
    u32 => UInt, 4, false;
    u64 => UInt, 8, false;
}

impl HostValue for f32 {
    fn member_type(_hint: &MemberHint) -> Option<MemberType> {
        Some(MemberType::Float { size: 4 })
    }

    fn to_value(&self) -> Value {
        Value::Float(*self as f64)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value.as_f64() {
            Some(v) => Ok(v as f32),
            None => wrong_kind("float", &value),
        }
    }
}

impl HostValue for f64 {
    fn member_type(_hint: &MemberHint) -> Option<MemberType> {
        Some(MemberType::Float { size: 8 })
    }

    fn to_value(&self) -> Value {
        Value::Float(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value.as_f64() {
            Some(v) => Ok(v),
            None => wrong_kind("float", &value),
        }
    }
}

impl HostValue for bool {
    fn member_type(_hint: &MemberHint) -> Option<MemberType> {
        Some(MemberType::Bool)
    }

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Bool(b) => Ok(b),
            Value::Int(v) => Ok(v != 0),
            Value::UInt(v) => Ok(v != 0),
            other => wrong_kind("bool", &other),
        }
    }
}

impl HostValue for String {
    fn member_type(hint: &MemberHint) -> Option<MemberType> {
        if hint.vlen {
            Some(MemberType::VlenString)
        } else {
            hint.len.map(|len| MemberType::FixedString { len: Some(len) })
        }
    }

    fn to_value(&self) -> Value {
        Value::Str(self.clone())
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Str(s) | Value::Enum(s) => Ok(s),
            other => wrong_kind("string", &other),
        }
    }
}

impl HostValue for BitSet {
    /// A bit length given as `len` counts 64-bit words.
    fn member_type(hint: &MemberHint) -> Option<MemberType> {
        let bits = hint.bits.or(hint.len.map(|words| words * 64))?;
        Some(MemberType::BitField { bits: Some(bits) })
    }

    fn to_value(&self) -> Value {
        Value::Bits(self.clone())
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Bits(b) => Ok(b),
            other => wrong_kind("bits", &other),
        }
    }
}

impl HostValue for ObjectRef {
    fn member_type(_hint: &MemberHint) -> Option<MemberType> {
        Some(MemberType::Reference)
    }

    fn to_value(&self) -> Value {
        Value::Reference(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Reference(r) => Ok(r),
            Value::UInt(v) => Ok(ObjectRef(v)),
            other => wrong_kind("reference", &other),
        }
    }
}

impl HostValue for DateTime<Utc> {
    fn member_type(_hint: &MemberHint) -> Option<MemberType> {
        Some(MemberType::Timestamp)
    }

    fn to_value(&self) -> Value {
        Value::Timestamp(self.timestamp_millis())
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Timestamp(ms) | Value::Int(ms) => match Utc.timestamp_millis_opt(ms).single() {
                Some(t) => Ok(t),
                None => out_of_range("timestamp", ms),
            },
            other => wrong_kind("timestamp", &other),
        }
    }
}

impl HostValue for chrono::TimeDelta {
    fn member_type(hint: &MemberHint) -> Option<MemberType> {
        Some(MemberType::Duration(hint.unit.unwrap_or(TimeUnit::Milliseconds)))
    }

    fn to_value(&self) -> Value {
        Value::Duration(self.num_milliseconds(), TimeUnit::Milliseconds)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Duration(v, unit) => {
                let ms = unit.convert(v, TimeUnit::Milliseconds);
                chrono::TimeDelta::try_milliseconds(ms).map_or_else(|| out_of_range("duration", ms), Ok)
            }
            Value::Int(ms) => match chrono::TimeDelta::try_milliseconds(ms) {
                Some(d) => Ok(d),
                None => out_of_range("duration", ms),
            },
            other => wrong_kind("duration", &other),
        }
    }
}

impl<T: HostValue, const N: usize> HostValue for [T; N] {
    fn member_type(hint: &MemberHint) -> Option<MemberType> {
        let elem = T::member_type(&hint.element())?;
        Some(MemberType::Array {
            elem: Box::new(elem),
            dims: Some(vec![N]),
        })
    }

    fn to_value(&self) -> Value {
        Value::Array(self.iter().map(HostValue::to_value).collect())
    }

    fn from_value(value: Value) -> Result<Self> {
        let items = match value {
            Value::Array(items) => items,
            other => return wrong_kind("array", &other),
        };
        if items.len() != N {
            return Err(TypeMapError::mismatch(
                "array",
                format!("{N} elements"),
                format!("{} elements", items.len()),
            ));
        }
        let converted = items
            .into_iter()
            .map(T::from_value)
            .collect::<Result<Vec<T>>>()?;
        converted.try_into().map_err(|_: Vec<T>| {
            TypeMapError::mismatch("array", format!("{N} elements"), "a different count")
        })
    }
}

impl<T: HostValue> HostValue for Vec<T> {
    /// Needs `len` for the element count.
    fn member_type(hint: &MemberHint) -> Option<MemberType> {
        let elem = T::member_type(&hint.element())?;
        Some(MemberType::Array {
            elem: Box::new(elem),
            dims: hint.len.map(|len| vec![len.max(0) as usize]),
        })
    }

    fn to_value(&self) -> Value {
        Value::Array(self.iter().map(HostValue::to_value).collect())
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Array(items) => items.into_iter().map(T::from_value).collect(),
            other => wrong_kind("array", &other),
        }
    }
}

impl HostValue for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }

    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}
