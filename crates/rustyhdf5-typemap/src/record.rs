//! Host record shapes and member access strategies.
//!
//! A compound mapping can bind to four kinds of host record: a struct with
//! named fields, a string-keyed map, an ordered list or a fixed-size array.
//! The access strategy for each member is resolved once, when the layout is
//! planned, into an [`AccessPath`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::error::{Result, TypeMapError};
use crate::mapping::CompoundMapping;
use crate::value::Value;

/// Runtime shape of a host record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordShape {
    Struct,
    Map,
    List,
    Array(usize),
}

/// How one member reaches into a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessPath {
    Field(usize),
    MapKey(String),
    ListIndex(usize),
    ArrayIndex(usize),
}

impl fmt::Display for AccessPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessPath::Field(i) => write!(f, "field #{i}"),
            AccessPath::MapKey(k) => write!(f, "key '{k}'"),
            AccessPath::ListIndex(i) => write!(f, "list index {i}"),
            AccessPath::ArrayIndex(i) => write!(f, "array index {i}"),
        }
    }
}

pub(crate) fn access_error(path: &AccessPath, reason: impl Into<String>) -> TypeMapError {
    TypeMapError::Access {
        member: path.to_string(),
        reason: reason.into(),
    }
}

/// A host record that compound members are read from and written into.
pub trait HostRecord: Sized {
    fn shape() -> RecordShape;

    /// Index of a named field, for struct-shaped records.
    fn field_index(_name: &str) -> Option<usize> {
        None
    }

    /// A blank record ready to receive `members` decoded members.
    fn fresh(members: usize) -> Self;

    fn get(&self, path: &AccessPath) -> Result<Value>;

    fn set(&mut self, path: &AccessPath, value: Value) -> Result<()>;

    /// `(name, value)` pairs for mapping inference, in member order.
    fn template(&self) -> Vec<(Option<String>, Value)> {
        Vec::new()
    }
}

/// A struct whose compound mapping is declared by the type itself,
/// usually through `#[derive(H5Compound)]`.
pub trait H5Compound: HostRecord {
    fn mapping() -> Result<CompoundMapping>;
}

impl HostRecord for BTreeMap<String, Value> {
    fn shape() -> RecordShape {
        RecordShape::Map
    }

    fn fresh(_members: usize) -> Self {
        BTreeMap::new()
    }

    fn get(&self, path: &AccessPath) -> Result<Value> {
        match path {
            AccessPath::MapKey(k) => self
                .get(k)
                .cloned()
                .ok_or_else(|| access_error(path, "key not present in map")),
            other => Err(access_error(other, "maps are accessed by key")),
        }
    }

    fn set(&mut self, path: &AccessPath, value: Value) -> Result<()> {
        match path {
            AccessPath::MapKey(k) => {
                self.insert(k.clone(), value);
                Ok(())
            }
            other => Err(access_error(other, "maps are accessed by key")),
        }
    }

    fn template(&self) -> Vec<(Option<String>, Value)> {
        self.iter()
            .map(|(k, v)| (Some(k.clone()), v.clone()))
            .collect()
    }
}

impl HostRecord for HashMap<String, Value> {
    fn shape() -> RecordShape {
        RecordShape::Map
    }

    fn fresh(members: usize) -> Self {
        HashMap::with_capacity(members)
    }

    fn get(&self, path: &AccessPath) -> Result<Value> {
        match path {
            AccessPath::MapKey(k) => HashMap::get(self, k)
                .cloned()
                .ok_or_else(|| access_error(path, "key not present in map")),
            other => Err(access_error(other, "maps are accessed by key")),
        }
    }

    fn set(&mut self, path: &AccessPath, value: Value) -> Result<()> {
        match path {
            AccessPath::MapKey(k) => {
                self.insert(k.clone(), value);
                Ok(())
            }
            other => Err(access_error(other, "maps are accessed by key")),
        }
    }

    // Sorted so that inference does not depend on hash order.
    fn template(&self) -> Vec<(Option<String>, Value)> {
        let mut entries: Vec<_> = self
            .iter()
            .map(|(k, v)| (Some(k.clone()), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

impl HostRecord for Vec<Value> {
    fn shape() -> RecordShape {
        RecordShape::List
    }

    fn fresh(members: usize) -> Self {
        vec![Value::default(); members]
    }

    fn get(&self, path: &AccessPath) -> Result<Value> {
        match path {
            AccessPath::ListIndex(i) => <[Value]>::get(self, *i)
                .cloned()
                .ok_or_else(|| access_error(path, format!("list has {} elements", self.len()))),
            other => Err(access_error(other, "lists are accessed by index")),
        }
    }

    fn set(&mut self, path: &AccessPath, value: Value) -> Result<()> {
        match path {
            AccessPath::ListIndex(i) => {
                if *i >= self.len() {
                    self.resize(*i + 1, Value::default());
                }
                self[*i] = value;
                Ok(())
            }
            other => Err(access_error(other, "lists are accessed by index")),
        }
    }

    fn template(&self) -> Vec<(Option<String>, Value)> {
        self.iter().map(|v| (None, v.clone())).collect()
    }
}

impl<const N: usize> HostRecord for [Value; N] {
    fn shape() -> RecordShape {
        RecordShape::Array(N)
    }

    fn fresh(_members: usize) -> Self {
        std::array::from_fn(|_| Value::default())
    }

    fn get(&self, path: &AccessPath) -> Result<Value> {
        match path {
            AccessPath::ArrayIndex(i) if *i < N => Ok(self[*i].clone()),
            AccessPath::ArrayIndex(_) => Err(access_error(path, format!("array length is {N}"))),
            other => Err(access_error(other, "arrays are accessed by index")),
        }
    }

    fn set(&mut self, path: &AccessPath, value: Value) -> Result<()> {
        match path {
            AccessPath::ArrayIndex(i) if *i < N => {
                self[*i] = value;
                Ok(())
            }
            AccessPath::ArrayIndex(_) => Err(access_error(path, format!("array length is {N}"))),
            other => Err(access_error(other, "arrays are accessed by index")),
        }
    }

    fn template(&self) -> Vec<(Option<String>, Value)> {
        self.iter().map(|v| (None, v.clone())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_access_by_key_only() {
        let mut m: BTreeMap<String, Value> = HostRecord::fresh(1);
        HostRecord::set(&mut m, &AccessPath::MapKey("a".into()), Value::Int(3)).unwrap();
        assert_eq!(
            HostRecord::get(&m, &AccessPath::MapKey("a".into())).unwrap(),
            Value::Int(3)
        );
        assert!(HostRecord::get(&m, &AccessPath::MapKey("b".into())).is_err());
        assert!(HostRecord::get(&m, &AccessPath::ListIndex(0)).is_err());
    }

    #[test]
    fn list_grows_on_set() {
        let mut l = <Vec<Value> as HostRecord>::fresh(1);
        HostRecord::set(&mut l, &AccessPath::ListIndex(2), Value::Bool(true)).unwrap();
        assert_eq!(l.len(), 3);
        assert_eq!(l[2], Value::Bool(true));
    }

    #[test]
    fn array_index_is_bounded() {
        let mut a = <[Value; 2] as HostRecord>::fresh(2);
        assert!(HostRecord::set(&mut a, &AccessPath::ArrayIndex(1), Value::Int(1)).is_ok());
        let err = HostRecord::set(&mut a, &AccessPath::ArrayIndex(2), Value::Int(1)).unwrap_err();
        assert!(matches!(err, TypeMapError::Access { .. }));
    }

    #[test]
    fn hash_map_template_is_sorted() {
        let mut m = HashMap::new();
        m.insert("b".to_string(), Value::Int(1));
        m.insert("a".to_string(), Value::Int(2));
        let names: Vec<_> = m.template().into_iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec![Some("a".to_string()), Some("b".to_string())]);
    }
}
