//! Typed readers and writers for HDF5 files.
//!
//! [`H5File`] wraps one open file on a [`Native`](typemap::Native) backend
//! and hands out typed accessors:
//!
//! - [`PrimitiveReader`] / [`PrimitiveWriter`] for numeric datasets and
//!   attributes: whole arrays, 1-D and N-D blocks, slices with bound axes,
//!   block-into-block transfers and natural-block iteration.
//! - [`CompoundReader`] / [`CompoundWriter`] for compound datasets, mapped
//!   onto derived structs, positional records or name-keyed maps.
//! - [`EnumIo`], [`BitFieldIo`], [`ReferenceIo`] and [`TimeIo`] for the
//!   remaining element kinds.
//!
//! ```
//! use std::rc::Rc;
//! use rustyhdf5_typed::{H5Compound, H5File};
//! use rustyhdf5_typed::typemap::MemoryNative;
//!
//! #[derive(H5Compound, Debug, Clone, Default, PartialEq)]
//! struct Sample {
//!     id: u32,
//!     #[h5(len = 8)]
//!     tag: String,
//!     value: f64,
//! }
//!
//! let file = H5File::create(Rc::new(MemoryNative::new()), "samples.h5").unwrap();
//! let samples = vec![Sample { id: 1, tag: "a".into(), value: 0.5 }];
//! file.compound_writer::<Sample>().unwrap().write_array("/samples", &samples).unwrap();
//! let back = file.compound_reader::<Sample>().unwrap().read_array("/samples").unwrap();
//! assert_eq!(back, samples);
//! ```

pub mod bitfield;
pub mod compound;
pub mod config;
pub mod enums;
pub mod error;
pub mod file;
pub mod library;
pub mod md;
pub mod primitive;
pub mod reference;
pub mod time;
mod transfer;

pub use bitfield::BitFieldIo;
pub use compound::{CompoundBlocks, CompoundReader, CompoundWriter};
pub use config::{ReaderConfig, StorageFeatures, WriterConfig};
pub use enums::EnumIo;
pub use error::{Error, Result};
pub use file::{enum_type_path, DatasetInfo, H5File};
pub use md::MdArray;
pub use primitive::{NaturalBlocks, NaturalMdBlocks, PrimitiveReader, PrimitiveWriter};
pub use reference::ReferenceIo;
pub use time::TimeIo;

pub use rustyhdf5_typemap as typemap;
pub use rustyhdf5_typemap::{
    BitSet, BoundIndices, CompoundMapping, EnumType, GridBlock, H5Compound, H5Element,
    H5EnumValue, MemberType, NaturalBlock, ObjectRef, OutOfBoundsPolicy, StorageLayout, TimeUnit,
    TypeVariant, Value, REST_OF_AXIS,
};
pub use rustyhdf5_typemap_derive::{H5Compound, H5Enum};
