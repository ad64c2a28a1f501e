//! Per-member byte conversion.
//!
//! Each planned member carries a [`Byteifier`], a closed set of conversion
//! strategies resolved once at plan time. A byteifier converts one
//! [`Value`] to or from a fixed-width byte block in either the storage form
//! (little-endian, packed, variable-length data as global heap ids) or the
//! memory form (host byte order, variable-length strings as heap tokens).

use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian, NativeEndian};

use crate::bits::{BitSet, WORD_BITS};
use crate::datatype::Datatype;
use crate::error::{Result, TypeMapError};
use crate::layout::{CompoundLayout, MemberDescriptor};
use crate::mapping::{EnumType, TimeUnit};
use crate::native::VlenHeap;
use crate::record::HostRecord;
use crate::value::{ObjectRef, Value};

/// Which of the two byte layouts a buffer is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Form {
    /// On-disk layout: little-endian, packed members.
    Storage,
    /// Native in-memory layout: host byte order, aligned members.
    Memory,
}

// ---- byte order helpers ----

fn mask(n: usize) -> u64 {
    if n >= 8 {
        u64::MAX
    } else {
        (1u64 << (n * 8)) - 1
    }
}

fn put_uint(form: Form, out: &mut [u8], v: u64, n: usize) {
    let v = v & mask(n);
    match form {
        Form::Storage => LittleEndian::write_uint(&mut out[..n], v, n),
        Form::Memory => NativeEndian::write_uint(&mut out[..n], v, n),
    }
}

fn get_uint(form: Form, bytes: &[u8], n: usize) -> u64 {
    match form {
        Form::Storage => LittleEndian::read_uint(&bytes[..n], n),
        Form::Memory => NativeEndian::read_uint(&bytes[..n], n),
    }
}

fn get_int(form: Form, bytes: &[u8], n: usize) -> i64 {
    match form {
        Form::Storage => LittleEndian::read_int(&bytes[..n], n),
        Form::Memory => NativeEndian::read_int(&bytes[..n], n),
    }
}

fn fits(v: i128, size: usize, signed: bool) -> bool {
    let bits = (size * 8) as u32;
    if signed {
        let lim = 1i128 << (bits - 1);
        (-lim..lim).contains(&v)
    } else {
        (0..(1i128 << bits)).contains(&v)
    }
}

/// Conversion strategy for one member.
#[derive(Debug, Clone)]
pub enum Byteifier {
    Int { size: usize, signed: bool },
    Float { size: usize },
    FixedString { len: usize },
    VlenString,
    Bool,
    BitField { words: usize, bits: usize },
    Enum(Arc<EnumType>),
    Array {
        elem: Box<Byteifier>,
        dims: Vec<usize>,
        elem_storage: usize,
        elem_memory: usize,
    },
    Compound(Arc<CompoundLayout>),
    Reference,
    Timestamp,
    Duration(TimeUnit),
    Opaque { len: usize },
}

impl Byteifier {
    /// Width of the byte block in the given form.
    pub fn len(&self, form: Form) -> usize {
        match self {
            Byteifier::Int { size, .. } | Byteifier::Float { size } => *size,
            Byteifier::FixedString { len } | Byteifier::Opaque { len } => *len,
            Byteifier::VlenString => match form {
                Form::Storage => crate::datatype::VLEN_STORAGE_SIZE,
                Form::Memory => crate::datatype::VLEN_STRING_MEMORY_SIZE,
            },
            Byteifier::Bool => 1,
            Byteifier::BitField { words, .. } => words * 8,
            Byteifier::Enum(e) => e.base_size(),
            Byteifier::Array {
                dims,
                elem_storage,
                elem_memory,
                ..
            } => {
                let count: usize = dims.iter().product();
                count
                    * match form {
                        Form::Storage => *elem_storage,
                        Form::Memory => *elem_memory,
                    }
            }
            Byteifier::Compound(layout) => layout.record_size(form),
            Byteifier::Reference | Byteifier::Timestamp | Byteifier::Duration(_) => 8,
        }
    }

    /// Encode `value` into `out`, which is exactly [`Byteifier::len`] bytes.
    pub fn encode(
        &self,
        member: &str,
        value: &Value,
        form: Form,
        heap: &dyn VlenHeap,
        out: &mut [u8],
    ) -> Result<()> {
        let mismatch = |expected: &str| TypeMapError::mismatch(member, expected, value.kind());
        match self {
            Byteifier::Int { size, signed } => {
                let v = value.as_integer().ok_or_else(|| mismatch("integer"))?;
                if !fits(v, *size, *signed) {
                    return Err(TypeMapError::ValueOutOfRange {
                        target: format!("{}{}", if *signed { "i" } else { "u" }, size * 8),
                        value: v.to_string(),
                    });
                }
                put_uint(form, out, v as u64, *size);
            }
            Byteifier::Float { size } => {
                let v = value.as_f64().ok_or_else(|| mismatch("float"))?;
                match (*size, form) {
                    (4, Form::Storage) => LittleEndian::write_f32(out, v as f32),
                    (4, Form::Memory) => NativeEndian::write_f32(out, v as f32),
                    (_, Form::Storage) => LittleEndian::write_f64(out, v),
                    (_, Form::Memory) => NativeEndian::write_f64(out, v),
                }
            }
            Byteifier::FixedString { len } => {
                let s = match value {
                    Value::Str(s) | Value::Enum(s) => s,
                    _ => return Err(mismatch("string")),
                };
                if s.len() > *len {
                    return Err(TypeMapError::ValueOutOfRange {
                        target: format!("string[{len}] member '{member}'"),
                        value: format!("{} bytes", s.len()),
                    });
                }
                out[..s.len()].copy_from_slice(s.as_bytes());
                out[s.len()..*len].fill(0);
            }
            Byteifier::VlenString => {
                let s = match value {
                    Value::Str(s) | Value::Enum(s) => s,
                    _ => return Err(mismatch("string")),
                };
                let token = if s.is_empty() {
                    0
                } else {
                    heap.store(s.as_bytes())?
                };
                match form {
                    Form::Memory => put_uint(form, out, token, 8),
                    Form::Storage => {
                        LittleEndian::write_u32(&mut out[0..4], s.len() as u32);
                        LittleEndian::write_u64(&mut out[4..12], token);
                        LittleEndian::write_u32(&mut out[12..16], 0);
                    }
                }
            }
            Byteifier::Bool => {
                out[0] = match value {
                    Value::Bool(b) => *b as u8,
                    Value::Int(0) | Value::UInt(0) => 0,
                    Value::Int(1) | Value::UInt(1) => 1,
                    _ => return Err(mismatch("bool")),
                };
            }
            Byteifier::BitField { words, bits } => {
                let set = match value {
                    Value::Bits(b) => b,
                    _ => return Err(mismatch("bits")),
                };
                if let Some(highest) = set.highest_set_bit() {
                    if highest >= *bits {
                        return Err(TypeMapError::BitVectorTooWide {
                            member: member.to_string(),
                            highest,
                            declared: *bits,
                        });
                    }
                }
                for (i, word) in set.to_words(*words).into_iter().enumerate() {
                    put_uint(form, &mut out[i * 8..], word, 8);
                }
            }
            Byteifier::Enum(e) => {
                let ordinal = match value {
                    Value::Enum(name) | Value::Str(name) => e.ordinal(name).ok_or_else(|| {
                        TypeMapError::ValueOutOfRange {
                            target: format!("enum {}", e.name),
                            value: name.clone(),
                        }
                    })?,
                    Value::Int(i) if (0..e.values.len() as i64).contains(i) => *i as usize,
                    Value::UInt(i) if (*i as usize) < e.values.len() => *i as usize,
                    _ => return Err(mismatch("enum value")),
                };
                put_uint(form, out, ordinal as u64, e.base_size());
            }
            Byteifier::Array {
                elem, dims, ..
            } => {
                let mut leaves = Vec::new();
                flatten(value, &mut leaves);
                let count: usize = dims.iter().product();
                if !matches!(value, Value::Array(_)) || leaves.len() != count {
                    return Err(TypeMapError::mismatch(
                        member,
                        format!("array of {count} elements"),
                        format!("{} with {} elements", value.kind(), leaves.len()),
                    ));
                }
                let width = elem.len(form);
                for (i, leaf) in leaves.into_iter().enumerate() {
                    elem.encode(member, leaf, form, heap, &mut out[i * width..(i + 1) * width])?;
                }
            }
            Byteifier::Compound(layout) => match value {
                Value::Compound(fields) => layout.encode_record(fields, form, heap, out)?,
                _ => return Err(mismatch("compound")),
            },
            Byteifier::Reference => {
                let addr = match value {
                    Value::Reference(r) => r.0,
                    Value::UInt(v) => *v,
                    _ => return Err(mismatch("reference")),
                };
                put_uint(form, out, addr, 8);
            }
            Byteifier::Timestamp => match value {
                Value::Timestamp(ms) | Value::Int(ms) => put_uint(form, out, *ms as u64, 8),
                _ => return Err(mismatch("timestamp")),
            },
            Byteifier::Duration(unit) => match value {
                Value::Duration(d, from) => put_uint(form, out, from.convert(*d, *unit) as u64, 8),
                Value::Int(d) => put_uint(form, out, *d as u64, 8),
                _ => return Err(mismatch("duration")),
            },
            Byteifier::Opaque { len } => {
                let bytes = match value {
                    Value::Opaque(b) => b,
                    _ => return Err(mismatch("opaque bytes")),
                };
                if bytes.len() > *len {
                    return Err(TypeMapError::ValueOutOfRange {
                        target: format!("opaque[{len}] member '{member}'"),
                        value: format!("{} bytes", bytes.len()),
                    });
                }
                out[..bytes.len()].copy_from_slice(bytes);
                out[bytes.len()..*len].fill(0);
            }
        }
        Ok(())
    }

    /// Decode one value from `bytes`, which is exactly [`Byteifier::len`] bytes.
    pub fn decode(&self, member: &str, bytes: &[u8], form: Form, heap: &dyn VlenHeap) -> Result<Value> {
        Ok(match self {
            Byteifier::Int { size, signed: true } => Value::Int(get_int(form, bytes, *size)),
            Byteifier::Int {
                size,
                signed: false,
            } => Value::UInt(get_uint(form, bytes, *size)),
            Byteifier::Float { size } => Value::Float(match (*size, form) {
                (4, Form::Storage) => LittleEndian::read_f32(bytes) as f64,
                (4, Form::Memory) => NativeEndian::read_f32(bytes) as f64,
                (_, Form::Storage) => LittleEndian::read_f64(bytes),
                (_, Form::Memory) => NativeEndian::read_f64(bytes),
            }),
            Byteifier::FixedString { len } => {
                let raw = &bytes[..*len];
                let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                Value::Str(String::from_utf8_lossy(&raw[..end]).into_owned())
            }
            Byteifier::VlenString => {
                let token = match form {
                    Form::Memory => get_uint(form, bytes, 8),
                    Form::Storage => LittleEndian::read_u64(&bytes[4..12]),
                };
                if token == 0 {
                    Value::Str(String::new())
                } else {
                    let raw = heap.load(token)?;
                    Value::Str(String::from_utf8_lossy(&raw).into_owned())
                }
            }
            Byteifier::Bool => Value::Bool(bytes[0] != 0),
            Byteifier::BitField { words, bits } => {
                let raw: Vec<u64> = (0..*words)
                    .map(|i| get_uint(form, &bytes[i * 8..], 8))
                    .collect();
                let mut set = BitSet::from_words(&raw);
                for i in *bits..words * WORD_BITS {
                    set.set(i, false);
                }
                Value::Bits(set)
            }
            Byteifier::Enum(e) => {
                let ordinal = get_uint(form, bytes, e.base_size()) as usize;
                match e.name_of(ordinal) {
                    Some(name) => Value::Enum(name.to_string()),
                    None => {
                        return Err(TypeMapError::ValueOutOfRange {
                            target: format!("enum {}", e.name),
                            value: ordinal.to_string(),
                        })
                    }
                }
            }
            Byteifier::Array { elem, dims, .. } => {
                let width = elem.len(form);
                let count: usize = dims.iter().product();
                let leaves = (0..count)
                    .map(|i| elem.decode(member, &bytes[i * width..(i + 1) * width], form, heap))
                    .collect::<Result<Vec<_>>>()?;
                reshape(leaves, dims)
            }
            Byteifier::Compound(layout) => {
                let mut fields = std::collections::BTreeMap::new();
                layout.decode_record(&mut fields, bytes, form, heap)?;
                Value::Compound(fields)
            }
            Byteifier::Reference => Value::Reference(ObjectRef(get_uint(form, bytes, 8))),
            Byteifier::Timestamp => Value::Timestamp(get_int(form, bytes, 8)),
            Byteifier::Duration(unit) => Value::Duration(get_int(form, bytes, 8), *unit),
            Byteifier::Opaque { len } => Value::Opaque(bytes[..*len].to_vec()),
        })
    }
}

fn flatten<'v>(value: &'v Value, out: &mut Vec<&'v Value>) {
    match value {
        Value::Array(items) => items.iter().for_each(|v| flatten(v, out)),
        other => out.push(other),
    }
}

fn reshape(mut leaves: Vec<Value>, dims: &[usize]) -> Value {
    if dims.len() <= 1 {
        return Value::Array(leaves);
    }
    let inner: usize = dims[1..].iter().product();
    let mut rows = Vec::with_capacity(dims[0]);
    for _ in 0..dims[0] {
        let rest = leaves.split_off(inner.min(leaves.len()));
        rows.push(reshape(std::mem::replace(&mut leaves, rest), &dims[1..]));
    }
    Value::Array(rows)
}

/// A member descriptor with its resolved conversion strategy.
#[derive(Debug, Clone)]
pub struct PlannedMember {
    pub descriptor: MemberDescriptor,
    pub kind: Byteifier,
    pub(crate) storage_type: Datatype,
    pub(crate) memory_type: Datatype,
}

impl PlannedMember {
    pub fn storage_type(&self) -> &Datatype {
        &self.storage_type
    }

    pub fn memory_type(&self) -> &Datatype {
        &self.memory_type
    }

    fn read_member<R: HostRecord>(&self, record: &R) -> Result<Value> {
        record
            .get(&self.descriptor.access)
            .map_err(|e| relabel(e, &self.descriptor.name))
    }

    /// Encode this member of `record` into a fresh byte block.
    pub fn byteify<R: HostRecord>(&self, record: &R, form: Form, heap: &dyn VlenHeap) -> Result<Vec<u8>> {
        let mut out = vec![0u8; self.descriptor.len(form)];
        self.encode_into(record, form, heap, &mut out)?;
        Ok(out)
    }

    pub(crate) fn encode_into<R: HostRecord>(
        &self,
        record: &R,
        form: Form,
        heap: &dyn VlenHeap,
        out: &mut [u8],
    ) -> Result<()> {
        let value = self.read_member(record)?;
        self.kind
            .encode(&self.descriptor.name, &value, form, heap, out)
    }

    /// Decode this member from `bytes` at `offset` and store it in `record`.
    pub fn set_from_byte_array<R: HostRecord>(
        &self,
        record: &mut R,
        bytes: &[u8],
        offset: usize,
        form: Form,
        heap: &dyn VlenHeap,
    ) -> Result<()> {
        let d = &self.descriptor;
        if let Some(inspected) = d.inspected_len {
            if d.storage_len > inspected {
                return Err(TypeMapError::Overrun {
                    member: d.name.clone(),
                    needed: d.storage_len,
                    available: inspected,
                });
            }
        }
        let len = d.len(form);
        let block = bytes
            .get(offset..offset + len)
            .ok_or(TypeMapError::BufferTooShort {
                needed: offset + len,
                available: bytes.len(),
            })?;
        let value = self.kind.decode(&d.name, block, form, heap)?;
        record
            .set(&d.access, value)
            .map_err(|e| relabel(e, &d.name))
    }
}

fn relabel(err: TypeMapError, member: &str) -> TypeMapError {
    match err {
        TypeMapError::Access { reason, .. } => TypeMapError::Access {
            member: member.to_string(),
            reason,
        },
        TypeMapError::TypeMismatch {
            context,
            expected,
            found,
        } if context == "value" => TypeMapError::TypeMismatch {
            context: member.to_string(),
            expected,
            found,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::VlenArena;
    use crate::native::NoHeap;
    use rstest::rstest;

    fn round_trip(b: &Byteifier, v: &Value, form: Form) -> Value {
        let heap = VlenArena::default();
        let mut out = vec![0u8; b.len(form)];
        b.encode("m", v, form, &heap, &mut out).unwrap();
        b.decode("m", &out, form, &heap).unwrap()
    }

    #[rstest]
    #[case(Byteifier::Int { size: 1, signed: true }, Value::Int(-5))]
    #[case(Byteifier::Int { size: 2, signed: false }, Value::UInt(65535))]
    #[case(Byteifier::Int { size: 8, signed: true }, Value::Int(i64::MIN))]
    #[case(Byteifier::Float { size: 4 }, Value::Float(0.5))]
    #[case(Byteifier::Float { size: 8 }, Value::Float(-1e300))]
    #[case(Byteifier::FixedString { len: 5 }, Value::Str("héé".into()))]
    #[case(Byteifier::VlenString, Value::Str("variable".into()))]
    #[case(Byteifier::Bool, Value::Bool(true))]
    #[case(Byteifier::Reference, Value::Reference(ObjectRef(4096)))]
    #[case(Byteifier::Timestamp, Value::Timestamp(-86_400_000))]
    #[case(Byteifier::Opaque { len: 3 }, Value::Opaque(vec![1, 2, 3]))]
    fn values_survive_both_forms(#[case] b: Byteifier, #[case] v: Value) {
        assert_eq!(round_trip(&b, &v, Form::Storage), v);
        assert_eq!(round_trip(&b, &v, Form::Memory), v);
    }

    #[test]
    fn storage_form_is_little_endian() {
        let b = Byteifier::Int {
            size: 4,
            signed: false,
        };
        let mut out = [0u8; 4];
        b.encode("m", &Value::UInt(0x0102_0304), Form::Storage, &NoHeap, &mut out)
            .unwrap();
        assert_eq!(out, [4, 3, 2, 1]);
    }

    #[test]
    fn integer_range_is_checked() {
        let b = Byteifier::Int {
            size: 1,
            signed: false,
        };
        let mut out = [0u8; 1];
        let err = b
            .encode("m", &Value::Int(256), Form::Storage, &NoHeap, &mut out)
            .unwrap_err();
        assert!(matches!(err, TypeMapError::ValueOutOfRange { .. }));
    }

    #[test]
    fn too_long_string_is_rejected() {
        let b = Byteifier::FixedString { len: 3 };
        let mut out = [0u8; 3];
        assert!(b
            .encode("m", &Value::Str("abcd".into()), Form::Storage, &NoHeap, &mut out)
            .is_err());
    }

    #[test]
    fn bit_field_packs_and_masks() {
        let b = Byteifier::BitField { words: 2, bits: 65 };
        let v = Value::Bits(BitSet::from_indices([0, 64]));
        assert_eq!(round_trip(&b, &v, Form::Storage), v);

        let mut out = vec![0u8; 16];
        let wide = Value::Bits(BitSet::from_indices([65]));
        let err = b.encode("flags", &wide, Form::Storage, &NoHeap, &mut out).unwrap_err();
        assert_eq!(
            err,
            TypeMapError::BitVectorTooWide {
                member: "flags".into(),
                highest: 65,
                declared: 65
            }
        );

        // Bits beyond the declared length in stored words are not meaningful.
        let raw = [0u64, 0b110];
        let mut bytes = vec![0u8; 16];
        LittleEndian::write_u64(&mut bytes[0..8], raw[0]);
        LittleEndian::write_u64(&mut bytes[8..16], raw[1]);
        let decoded = b.decode("flags", &bytes, Form::Storage, &NoHeap).unwrap();
        assert_eq!(decoded, Value::Bits(BitSet::new()));
    }

    #[test]
    fn enum_encodes_ordinal() {
        let e = Arc::new(EnumType::new("colour", &["RED", "GREEN", "BLUE"]));
        let b = Byteifier::Enum(e);
        let mut out = [0u8; 1];
        b.encode("c", &Value::Enum("BLUE".into()), Form::Storage, &NoHeap, &mut out)
            .unwrap();
        assert_eq!(out, [2]);
        assert!(b
            .encode("c", &Value::Enum("PINK".into()), Form::Storage, &NoHeap, &mut out)
            .is_err());
        assert!(b.decode("c", &[7], Form::Storage, &NoHeap).is_err());
    }

    #[test]
    fn multi_dimensional_arrays_keep_their_shape() {
        let b = Byteifier::Array {
            elem: Box::new(Byteifier::Int {
                size: 2,
                signed: true,
            }),
            dims: vec![2, 3],
            elem_storage: 2,
            elem_memory: 2,
        };
        let row = |a: i64| Value::Array((a..a + 3).map(Value::Int).collect());
        let v = Value::Array(vec![row(0), row(10)]);
        assert_eq!(round_trip(&b, &v, Form::Memory), v);

        let mut out = vec![0u8; 12];
        assert!(b
            .encode("a", &row(0), Form::Memory, &NoHeap, &mut out)
            .is_err());
    }

    #[test]
    fn vlen_storage_id_carries_length() {
        let heap = VlenArena::default();
        let mut out = [0u8; 16];
        Byteifier::VlenString
            .encode("s", &Value::Str("abc".into()), Form::Storage, &heap, &mut out)
            .unwrap();
        assert_eq!(LittleEndian::read_u32(&out[0..4]), 3);
        assert_ne!(LittleEndian::read_u64(&out[4..12]), 0);
    }

    #[test]
    fn empty_vlen_string_is_null() {
        let mut out = [0xffu8; 8];
        Byteifier::VlenString
            .encode("s", &Value::Str(String::new()), Form::Memory, &NoHeap, &mut out)
            .unwrap();
        assert_eq!(out, [0u8; 8]);
        assert_eq!(
            Byteifier::VlenString
                .decode("s", &out, Form::Memory, &NoHeap)
                .unwrap(),
            Value::Str(String::new())
        );
    }
}
