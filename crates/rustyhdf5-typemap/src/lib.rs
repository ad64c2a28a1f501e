//! Compound type byteification and hyperslab planning for typed HDF5 I/O.
//!
//! This crate holds the engine behind the typed readers and writers:
//!
//! - [`mapping`] and [`layout`] bind host records to HDF5 compound types and
//!   plan member offsets for the packed storage form and the aligned memory
//!   form.
//! - [`byteify`] and [`codec`] encode and decode records member by member.
//! - [`descriptor`] classifies native type handles.
//! - [`space`] and [`natural`] plan block, slice and chunk-aligned selections.
//! - [`native`] is the call surface to the HDF5 library, with
//!   [`memory::MemoryNative`] as a complete in-memory backend.
//!
//! # Example
//!
//! ```
//! use std::collections::BTreeMap;
//! use rustyhdf5_typemap::{CompoundCodec, CompoundMapping, Form, MemberType, Value, VlenArena};
//!
//! let mapping = CompoundMapping::new()
//!     .member("id", MemberType::Int { size: 4, signed: true })
//!     .member("label", MemberType::FixedString { len: Some(8) });
//! let codec = CompoundCodec::<BTreeMap<String, Value>>::new(&mapping).unwrap();
//!
//! let mut record = BTreeMap::new();
//! record.insert("id".to_string(), Value::Int(7));
//! record.insert("label".to_string(), Value::Str("seven".into()));
//!
//! let heap = VlenArena::default();
//! let bytes = codec.encode(&record, Form::Storage, &heap).unwrap();
//! assert_eq!(bytes.len(), 12);
//! assert_eq!(codec.decode(&bytes, Form::Storage, &heap).unwrap(), record);
//! ```

pub mod bits;
pub mod byteify;
pub mod codec;
pub mod datatype;
pub mod descriptor;
pub mod element;
pub mod error;
pub mod layout;
pub mod mapping;
pub mod memory;
pub mod native;
pub mod natural;
pub mod record;
pub mod scope;
pub mod space;
pub mod value;

pub use bits::BitSet;
pub use byteify::{Byteifier, Form, PlannedMember};
pub use codec::CompoundCodec;
pub use datatype::{CompoundMember, Datatype, DatatypeByteOrder, EnumMember};
pub use descriptor::{DataClass, TypeDescriptor};
pub use element::H5Element;
pub use error::{ErrorMajor, ErrorMinor, NativeError, Result, TypeMapError};
pub use layout::{CompoundLayout, MemberDescriptor};
pub use mapping::{
    Binding, CompoundMapping, EnumType, H5EnumValue, MemberHint, MemberSpec, MemberType, TimeUnit,
    TypeVariant,
};
pub use memory::{MemoryNative, VlenArena};
pub use native::{Hid, Native, NoHeap, StorageLayout, VlenHeap, UNLIMITED};
pub use natural::{GridBlock, NaturalBlock, NaturalBlockGrid, NaturalBlockIndex};
pub use record::{AccessPath, H5Compound, HostRecord, RecordShape};
pub use scope::{CleanupScope, Handle, OwnedHandle};
pub use space::{
    Access, BoundIndices, DataspaceParams, DatasetExtent, HyperslabPlan, OutOfBoundsPolicy,
    SpaceRequest, REST_OF_AXIS,
};
pub use value::{HostValue, ObjectRef, Value};
