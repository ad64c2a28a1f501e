//! Member layout planning.
//!
//! [`CompoundLayout::plan`] walks a [`CompoundMapping`] in declaration order
//! and assigns every member a storage offset (packed) and a memory offset
//! (aligned like a C struct), resolving the member's byteifier and access
//! path along the way. When the stored compound type is known the plan is
//! reconciled against it by member name: open lengths are taken from the
//! stored type, and explicit lengths are checked against it at decode time.

use std::collections::HashSet;
use std::sync::Arc;

use crate::bits::bit_field_words;
use crate::byteify::{Byteifier, Form, PlannedMember};
use crate::datatype::{CompoundMember, Datatype, DatatypeByteOrder};
use crate::error::{Result, TypeMapError};
use crate::mapping::{Binding, CompoundMapping, MemberSpec, MemberType, TypeVariant};
use crate::native::VlenHeap;
use crate::record::{AccessPath, HostRecord, RecordShape};

/// Placement of one member in both byte layouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberDescriptor {
    pub name: String,
    pub ordinal: usize,
    pub storage_offset: usize,
    pub memory_offset: usize,
    pub storage_len: usize,
    pub memory_len: usize,
    /// Size of the member in the stored type, when a stored type was
    /// inspected and the member has a declared length.
    pub inspected_len: Option<usize>,
    pub variant: TypeVariant,
    pub access: AccessPath,
}

impl MemberDescriptor {
    pub fn offset(&self, form: Form) -> usize {
        match form {
            Form::Storage => self.storage_offset,
            Form::Memory => self.memory_offset,
        }
    }

    pub fn len(&self, form: Form) -> usize {
        match form {
            Form::Storage => self.storage_len,
            Form::Memory => self.memory_len,
        }
    }
}

/// The planned byte layout of a compound record.
#[derive(Debug, Clone)]
pub struct CompoundLayout {
    members: Vec<PlannedMember>,
    record_size_storage: usize,
    record_size_memory: usize,
    alignment: usize,
    shape: RecordShape,
    variable_length: bool,
}

struct Resolved {
    kind: Byteifier,
    storage_type: Datatype,
    memory_type: Datatype,
    alignment: usize,
    inspected_len: Option<usize>,
}

fn align_up(offset: usize, alignment: usize) -> usize {
    offset.div_ceil(alignment) * alignment
}

fn positive(what: &'static str, length: i64) -> Result<usize> {
    if length <= 0 {
        Err(TypeMapError::InvalidLength { what, length })
    } else {
        Ok(length as usize)
    }
}

fn expect_class(member: &str, stored: Option<&Datatype>, class: i32, expected: &str) -> Result<()> {
    match stored {
        Some(dt) if dt.class_id() != class => Err(TypeMapError::mismatch(member, expected, dt.describe())),
        _ => Ok(()),
    }
}

fn native_order(dt: &Datatype) -> Datatype {
    dt.with_byte_order(DatatypeByteOrder::native())
}

fn resolve(member: &str, member_type: &MemberType, stored: Option<&Datatype>) -> Result<Resolved> {
    let simple = |kind: Byteifier, storage_type: Datatype, alignment: usize| Resolved {
        memory_type: native_order(&storage_type),
        kind,
        storage_type,
        alignment,
        inspected_len: None,
    };
    Ok(match member_type {
        MemberType::Int { size, signed } => {
            if ![1, 2, 4, 8].contains(size) {
                return Err(TypeMapError::InvalidLength {
                    what: "integer",
                    length: *size as i64,
                });
            }
            expect_class(member, stored, 0, "integer")?;
            simple(
                Byteifier::Int {
                    size: *size,
                    signed: *signed,
                },
                Datatype::integer(*size as u32, *signed),
                *size,
            )
        }
        MemberType::Float { size } => {
            if ![4, 8].contains(size) {
                return Err(TypeMapError::InvalidLength {
                    what: "float",
                    length: *size as i64,
                });
            }
            expect_class(member, stored, 1, "float")?;
            simple(
                Byteifier::Float { size: *size },
                Datatype::float(*size as u32),
                *size,
            )
        }
        MemberType::FixedString { len } => {
            expect_class(member, stored, 3, "fixed-length string")?;
            let inspected = stored.map(Datatype::type_size);
            let len = match (len, inspected) {
                (Some(len), _) => positive("string", *len)?,
                (None, Some(size)) => positive("string", size as i64)?,
                (None, None) => {
                    return Err(TypeMapError::Uninferable {
                        member: member.to_string(),
                        what: "string length",
                    })
                }
            };
            let mut r = simple(
                Byteifier::FixedString { len },
                Datatype::fixed_string(len as u32),
                1,
            );
            r.inspected_len = inspected;
            r
        }
        MemberType::VlenString => {
            if let Some(dt) = stored {
                if !matches!(dt, Datatype::VariableLength { is_string: true, .. }) {
                    return Err(TypeMapError::mismatch(member, "variable-length string", dt.describe()));
                }
            }
            simple(Byteifier::VlenString, Datatype::vlen_string(), 8)
        }
        MemberType::Bool => {
            expect_class(member, stored, 8, "boolean enumeration")?;
            simple(Byteifier::Bool, Datatype::boolean(), 1)
        }
        MemberType::BitField { bits } => {
            expect_class(member, stored, 10, "bit field word array")?;
            let inspected = stored.map(Datatype::type_size);
            let bits = match (bits, inspected) {
                (Some(bits), _) => *bits,
                (None, Some(size)) => (size * 8) as i64,
                (None, None) => {
                    return Err(TypeMapError::Uninferable {
                        member: member.to_string(),
                        what: "bit length",
                    })
                }
            };
            let words = bit_field_words(bits)?;
            let storage_type = Datatype::Array {
                base_type: Box::new(Datatype::BitField {
                    size: 8,
                    byte_order: DatatypeByteOrder::LittleEndian,
                }),
                dimensions: vec![words as u32],
            };
            let mut r = simple(
                Byteifier::BitField {
                    words,
                    bits: bits as usize,
                },
                storage_type,
                8,
            );
            r.inspected_len = inspected;
            r
        }
        MemberType::Enum(e) => {
            if e.values.is_empty() {
                return Err(TypeMapError::InvalidLength {
                    what: "enumeration",
                    length: 0,
                });
            }
            expect_class(member, stored, 8, "enumeration")?;
            simple(Byteifier::Enum(e.clone()), e.datatype(), e.base_size())
        }
        MemberType::Array { elem, dims } => {
            expect_class(member, stored, 10, "array")?;
            let (stored_base, stored_dims) = match stored {
                Some(Datatype::Array {
                    base_type,
                    dimensions,
                }) => (
                    Some(base_type.as_ref()),
                    Some(dimensions.iter().map(|&d| d as usize).collect::<Vec<_>>()),
                ),
                _ => (None, None),
            };
            let dims = match (dims, &stored_dims) {
                (Some(d), _) => d.clone(),
                (None, Some(d)) => d.clone(),
                (None, None) => {
                    return Err(TypeMapError::Uninferable {
                        member: member.to_string(),
                        what: "array length",
                    })
                }
            };
            if dims.is_empty() {
                return Err(TypeMapError::InvalidLength {
                    what: "array rank",
                    length: 0,
                });
            }
            for &d in &dims {
                positive("array", d as i64)?;
            }
            if let Some(sd) = &stored_dims {
                if sd.len() != dims.len() {
                    return Err(TypeMapError::mismatch(
                        member,
                        format!("array of rank {}", dims.len()),
                        format!("rank {}", sd.len()),
                    ));
                }
            }
            if matches!(
                elem.as_ref(),
                MemberType::Array { .. } | MemberType::BitField { .. }
            ) {
                return Err(TypeMapError::mismatch(
                    member,
                    "array of scalar elements",
                    format!("array of {elem}"),
                ));
            }
            let inner = resolve(member, elem, stored_base)?;
            let elem_storage = inner.kind.len(Form::Storage);
            let elem_memory = inner.kind.len(Form::Memory);
            let dimensions: Vec<u32> = dims.iter().map(|&d| d as u32).collect();
            Resolved {
                storage_type: Datatype::Array {
                    base_type: Box::new(inner.storage_type),
                    dimensions: dimensions.clone(),
                },
                memory_type: Datatype::Array {
                    base_type: Box::new(inner.memory_type),
                    dimensions,
                },
                alignment: inner.alignment,
                inspected_len: stored.map(Datatype::type_size),
                kind: Byteifier::Array {
                    elem: Box::new(inner.kind),
                    dims,
                    elem_storage,
                    elem_memory,
                },
            }
        }
        MemberType::Compound(mapping) => {
            expect_class(member, stored, 6, "compound")?;
            let nested = CompoundLayout::plan_nested(mapping, stored)?;
            Resolved {
                storage_type: nested.storage_type(),
                memory_type: nested.memory_type(),
                alignment: nested.alignment,
                inspected_len: None,
                kind: Byteifier::Compound(Arc::new(nested)),
            }
        }
        MemberType::Reference => {
            expect_class(member, stored, 7, "object reference")?;
            simple(Byteifier::Reference, Datatype::object_reference(), 8)
        }
        MemberType::Timestamp => {
            expect_class(member, stored, 0, "64-bit timestamp")?;
            simple(Byteifier::Timestamp, Datatype::integer(8, true), 8)
        }
        MemberType::Duration(unit) => {
            expect_class(member, stored, 0, "64-bit duration")?;
            simple(Byteifier::Duration(*unit), Datatype::integer(8, true), 8)
        }
        MemberType::Opaque { tag, len } => {
            expect_class(member, stored, 5, "opaque")?;
            let (inspected, stored_tag) = match stored {
                Some(Datatype::Opaque { size, tag }) => (Some(*size as usize), Some(tag.clone())),
                _ => (None, None),
            };
            let len = match (len, inspected) {
                (Some(len), _) => positive("opaque", *len)?,
                (None, Some(size)) => size,
                (None, None) => {
                    return Err(TypeMapError::Uninferable {
                        member: member.to_string(),
                        what: "opaque length",
                    })
                }
            };
            let tag = match stored_tag {
                Some(t) if tag.is_empty() => t,
                _ => tag.clone(),
            };
            let mut r = simple(
                Byteifier::Opaque { len },
                Datatype::Opaque {
                    size: len as u32,
                    tag,
                },
                1,
            );
            r.inspected_len = inspected;
            r
        }
    })
}

fn access_path(
    spec: &MemberSpec,
    ordinal: usize,
    shape: RecordShape,
    field_index: &dyn Fn(&str) -> Option<usize>,
) -> Result<AccessPath> {
    let access_error = |reason: String| TypeMapError::Access {
        member: spec.name.clone(),
        reason,
    };
    match (shape, &spec.binding) {
        (RecordShape::Struct, Some(Binding::Index(_))) | (RecordShape::Map, Some(Binding::Index(_))) => {
            Err(access_error("named records cannot bind by position".into()))
        }
        (RecordShape::List | RecordShape::Array(_), Some(Binding::Name(_))) => {
            Err(access_error("positional records cannot bind by name".into()))
        }
        (RecordShape::Struct, binding) => {
            let field = match binding {
                Some(Binding::Name(f)) => f.as_str(),
                _ => spec.name.as_str(),
            };
            field_index(field)
                .map(AccessPath::Field)
                .ok_or_else(|| access_error(format!("record has no field '{field}'")))
        }
        (RecordShape::Map, binding) => Ok(AccessPath::MapKey(match binding {
            Some(Binding::Name(k)) => k.clone(),
            _ => spec.name.clone(),
        })),
        (RecordShape::List, binding) => Ok(AccessPath::ListIndex(match binding {
            Some(Binding::Index(i)) => *i,
            _ => ordinal,
        })),
        (RecordShape::Array(n), binding) => {
            let i = match binding {
                Some(Binding::Index(i)) => *i,
                _ => ordinal,
            };
            if i >= n {
                return Err(access_error(format!("index {i} beyond array length {n}")));
            }
            Ok(AccessPath::ArrayIndex(i))
        }
    }
}

impl CompoundLayout {
    /// Plan the layout of `mapping` for records of type `R`, optionally
    /// reconciled against the stored compound type.
    pub fn plan<R: HostRecord>(mapping: &CompoundMapping, stored: Option<&Datatype>) -> Result<Self> {
        Self::plan_with(mapping, stored, R::shape(), &R::field_index)
    }

    /// Nested compounds are always exchanged as name-keyed maps.
    fn plan_nested(mapping: &CompoundMapping, stored: Option<&Datatype>) -> Result<Self> {
        let keyed = mapping
            .members()
            .iter()
            .fold(CompoundMapping::new(), |m, spec| {
                m.member(&spec.name, spec.member_type.clone())
            });
        Self::plan_with(&keyed, stored, RecordShape::Map, &|_: &str| None)
    }

    fn plan_with(
        mapping: &CompoundMapping,
        stored: Option<&Datatype>,
        shape: RecordShape,
        field_index: &dyn Fn(&str) -> Option<usize>,
    ) -> Result<Self> {
        if mapping.is_empty() {
            return Err(TypeMapError::InvalidLength {
                what: "compound member list",
                length: 0,
            });
        }
        if let Some(dt) = stored {
            if !matches!(dt, Datatype::Compound { .. }) {
                return Err(TypeMapError::mismatch("stored type", "compound", dt.describe()));
            }
        }

        let mut seen = HashSet::new();
        let mut members = Vec::with_capacity(mapping.len());
        let mut storage_cursor = 0usize;
        let mut memory_cursor = 0usize;
        let mut alignment = 1usize;

        for (ordinal, spec) in mapping.members().iter().enumerate() {
            if !seen.insert(spec.name.as_str()) {
                return Err(TypeMapError::DuplicateMember(spec.name.clone()));
            }
            let stored_member = match stored {
                Some(dt) => Some(
                    &dt.member(&spec.name)
                        .ok_or_else(|| TypeMapError::MissingMember {
                            member: spec.name.clone(),
                        })?
                        .datatype,
                ),
                None => None,
            };
            let resolved = resolve(&spec.name, &spec.member_type, stored_member)?;
            let access = access_path(spec, ordinal, shape, field_index)?;

            let storage_len = resolved.kind.len(Form::Storage);
            let memory_len = resolved.kind.len(Form::Memory);
            let memory_offset = align_up(memory_cursor, resolved.alignment);
            alignment = alignment.max(resolved.alignment);

            let inspected_len = resolved.inspected_len;
            members.push(PlannedMember {
                descriptor: MemberDescriptor {
                    name: spec.name.clone(),
                    ordinal,
                    storage_offset: storage_cursor,
                    memory_offset,
                    storage_len,
                    memory_len,
                    inspected_len,
                    variant: spec.member_type.variant(),
                    access,
                },
                kind: resolved.kind,
                storage_type: resolved.storage_type,
                memory_type: resolved.memory_type,
            });
            storage_cursor += storage_len;
            memory_cursor = memory_offset + memory_len;
        }

        let layout = Self {
            variable_length: members.iter().any(|m| m.storage_type.has_variable_length()),
            members,
            record_size_storage: storage_cursor,
            record_size_memory: align_up(memory_cursor, alignment),
            alignment,
            shape,
        };
        log::trace!(
            "planned compound layout: {} members, storage {} bytes, memory {} bytes",
            layout.members.len(),
            layout.record_size_storage,
            layout.record_size_memory
        );
        Ok(layout)
    }

    pub fn members(&self) -> &[PlannedMember] {
        &self.members
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &MemberDescriptor> {
        self.members.iter().map(|m| &m.descriptor)
    }

    pub fn member(&self, name: &str) -> Option<&PlannedMember> {
        self.members.iter().find(|m| m.descriptor.name == name)
    }

    pub fn record_size_storage(&self) -> usize {
        self.record_size_storage
    }

    pub fn record_size_memory(&self) -> usize {
        self.record_size_memory
    }

    pub fn record_size(&self, form: Form) -> usize {
        match form {
            Form::Storage => self.record_size_storage,
            Form::Memory => self.record_size_memory,
        }
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    pub fn shape(&self) -> RecordShape {
        self.shape
    }

    /// Whether any member holds variable-length data that must be reclaimed
    /// after a read.
    pub fn has_variable_length(&self) -> bool {
        self.variable_length
    }

    /// Per-member type variants, in member order.
    pub fn variants(&self) -> Vec<TypeVariant> {
        self.descriptors().map(|d| d.variant).collect()
    }

    fn compound_type(&self, form: Form) -> Datatype {
        Datatype::Compound {
            size: self.record_size(form) as u32,
            members: self
                .members
                .iter()
                .map(|m| CompoundMember {
                    name: m.descriptor.name.clone(),
                    byte_offset: m.descriptor.offset(form) as u64,
                    datatype: match form {
                        Form::Storage => m.storage_type.clone(),
                        Form::Memory => m.memory_type.clone(),
                    },
                })
                .collect(),
        }
    }

    /// The compound type as written to the file.
    pub fn storage_type(&self) -> Datatype {
        self.compound_type(Form::Storage)
    }

    /// The compound type describing the in-memory record buffers.
    pub fn memory_type(&self) -> Datatype {
        self.compound_type(Form::Memory)
    }

    /// Encode one record into `out` (at least [`CompoundLayout::record_size`] bytes).
    pub fn encode_record<R: HostRecord>(
        &self,
        record: &R,
        form: Form,
        heap: &dyn VlenHeap,
        out: &mut [u8],
    ) -> Result<()> {
        let size = self.record_size(form);
        if out.len() < size {
            return Err(TypeMapError::BufferTooShort {
                needed: size,
                available: out.len(),
            });
        }
        out[..size].fill(0);
        for m in &self.members {
            let start = m.descriptor.offset(form);
            let end = start + m.descriptor.len(form);
            m.encode_into(record, form, heap, &mut out[start..end])?;
        }
        Ok(())
    }

    /// Decode one record from `bytes` into `record`, member by member.
    pub fn decode_record<R: HostRecord>(
        &self,
        record: &mut R,
        bytes: &[u8],
        form: Form,
        heap: &dyn VlenHeap,
    ) -> Result<()> {
        for m in &self.members {
            m.set_from_byte_array(record, bytes, m.descriptor.offset(form), form, heap)?;
        }
        Ok(())
    }
}
