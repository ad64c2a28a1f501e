//! The call surface consumed from the native HDF5 layer.
//!
//! Everything here is a thin, blocking call: the native layer owns the
//! file format, storage and type conversion. Handles are opaque [`Hid`]s
//! that must be released exactly once; see [`crate::scope`] for the
//! scoped-acquisition helpers that guarantee this.

use crate::datatype::Datatype;
use crate::error::{ErrorMajor, ErrorMinor, NativeError, Result};

/// An opaque native handle (file, type, dataspace, dataset or attribute).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hid(i64);

impl Hid {
    /// Selects the whole extent when passed as a memory or file space.
    pub const ALL: Hid = Hid(0);

    pub const fn new(raw: i64) -> Self {
        Hid(raw)
    }

    pub const fn raw(self) -> i64 {
        self.0
    }

    pub fn is_all(self) -> bool {
        self == Hid::ALL
    }
}

/// Marker for an unlimited maximum dimension.
pub const UNLIMITED: u64 = u64::MAX;

/// Physical storage layout of a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLayout {
    Compact,
    Contiguous,
    Chunked(Vec<u64>),
}

impl StorageLayout {
    pub fn chunk_dims(&self) -> Option<&[u64]> {
        match self {
            StorageLayout::Chunked(dims) => Some(dims),
            _ => None,
        }
    }
}

/// Storage for variable-length payloads referenced from record buffers.
///
/// In memory form a variable-length string is a non-zero token; `0` is the
/// null pointer. In storage form the token doubles as a heap address.
pub trait VlenHeap {
    fn store(&self, bytes: &[u8]) -> Result<u64>;
    fn load(&self, token: u64) -> Result<Vec<u8>>;
}

/// A heap that refuses variable-length data, for layouts known to have none.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHeap;

impl VlenHeap for NoHeap {
    fn store(&self, _bytes: &[u8]) -> Result<u64> {
        Err(no_heap())
    }

    fn load(&self, _token: u64) -> Result<Vec<u8>> {
        Err(no_heap())
    }
}

fn no_heap() -> crate::error::TypeMapError {
    NativeError::new(
        ErrorMajor::Resource,
        ErrorMinor::Unsupported,
        "variable-length data requires a native heap",
    )
    .into()
}

/// Native HDF5 library operations.
///
/// Implementations use interior mutability; one logical thread drives a
/// given file at a time.
pub trait Native {
    // ---- library ----

    /// One-time library initialisation. Must be idempotent.
    fn init(&self) -> Result<()>;
    /// Release global library state. Must be idempotent.
    fn reset(&self) -> Result<()>;

    // ---- files ----

    fn create_file(&self, name: &str) -> Result<Hid>;
    fn open_file(&self, name: &str) -> Result<Hid>;
    fn close_file(&self, file: Hid) -> Result<()>;

    // ---- datatypes ----

    fn create_type(&self, datatype: &Datatype) -> Result<Hid>;
    fn describe_type(&self, tid: Hid) -> Result<Datatype>;
    fn close_type(&self, tid: Hid) -> Result<()>;
    fn commit_type(&self, file: Hid, path: &str, tid: Hid) -> Result<()>;
    fn open_committed_type(&self, file: Hid, path: &str) -> Result<Hid>;

    /// HDF5 class id of a type handle.
    fn type_class(&self, tid: Hid) -> Result<i32> {
        Ok(self.describe_type(tid)?.class_id())
    }

    fn type_size(&self, tid: Hid) -> Result<usize> {
        Ok(self.describe_type(tid)?.type_size())
    }

    fn type_is_signed(&self, tid: Hid) -> Result<bool> {
        Ok(matches!(
            self.describe_type(tid)?,
            Datatype::FixedPoint { signed: true, .. }
        ))
    }

    /// Secondary query distinguishing variable-length strings from other
    /// variable-length types.
    fn type_is_variable_str(&self, tid: Hid) -> Result<bool> {
        Ok(matches!(
            self.describe_type(tid)?,
            Datatype::VariableLength { is_string: true, .. }
        ))
    }

    fn enum_member_names(&self, tid: Hid) -> Result<Vec<String>> {
        match self.describe_type(tid)? {
            Datatype::Enumeration { members, .. } => {
                Ok(members.into_iter().map(|m| m.name).collect())
            }
            other => Err(NativeError::new(
                ErrorMajor::Datatype,
                ErrorMinor::BadValue,
                format!("not an enumeration: {}", other.describe()),
            )
            .into()),
        }
    }

    fn array_dims(&self, tid: Hid) -> Result<Vec<u32>> {
        match self.describe_type(tid)? {
            Datatype::Array { dimensions, .. } => Ok(dimensions),
            _ => Ok(Vec::new()),
        }
    }

    // ---- dataspaces ----

    fn create_space(&self, dims: &[u64], max_dims: Option<&[u64]>) -> Result<Hid>;
    fn space_dims(&self, sid: Hid) -> Result<Vec<u64>>;
    fn space_max_dims(&self, sid: Hid) -> Result<Option<Vec<u64>>>;
    /// Replace the selection of `sid` with a hyperslab (stride and block of 1).
    fn select_hyperslab(&self, sid: Hid, start: &[u64], count: &[u64]) -> Result<()>;
    fn close_space(&self, sid: Hid) -> Result<()>;

    // ---- datasets ----

    fn create_dataset(
        &self,
        file: Hid,
        path: &str,
        tid: Hid,
        sid: Hid,
        layout: &StorageLayout,
    ) -> Result<Hid>;
    fn open_dataset(&self, file: Hid, path: &str) -> Result<Hid>;
    fn dataset_type(&self, ds: Hid) -> Result<Hid>;
    fn dataset_space(&self, ds: Hid) -> Result<Hid>;
    fn dataset_layout(&self, ds: Hid) -> Result<StorageLayout>;
    fn extend_dataset(&self, ds: Hid, dims: &[u64]) -> Result<()>;
    fn read_dataset(
        &self,
        ds: Hid,
        mem_type: Hid,
        mem_space: Hid,
        file_space: Hid,
        buf: &mut [u8],
    ) -> Result<()>;
    fn write_dataset(
        &self,
        ds: Hid,
        mem_type: Hid,
        mem_space: Hid,
        file_space: Hid,
        buf: &[u8],
    ) -> Result<()>;
    fn close_dataset(&self, ds: Hid) -> Result<()>;

    fn exists(&self, file: Hid, path: &str) -> Result<bool>;
    fn delete(&self, file: Hid, path: &str) -> Result<()>;

    // ---- attributes ----

    fn create_attribute(&self, obj: Hid, name: &str, tid: Hid, sid: Hid) -> Result<Hid>;
    fn open_attribute(&self, obj: Hid, name: &str) -> Result<Hid>;
    fn has_attribute(&self, obj: Hid, name: &str) -> Result<bool>;
    fn delete_attribute(&self, obj: Hid, name: &str) -> Result<()>;
    fn attribute_type(&self, attr: Hid) -> Result<Hid>;
    fn attribute_space(&self, attr: Hid) -> Result<Hid>;
    fn read_attribute(&self, attr: Hid, mem_type: Hid, buf: &mut [u8]) -> Result<()>;
    fn write_attribute(&self, attr: Hid, mem_type: Hid, buf: &[u8]) -> Result<()>;
    fn close_attribute(&self, attr: Hid) -> Result<()>;

    // ---- variable-length data ----

    fn heap(&self) -> &dyn VlenHeap;
    /// Release the variable-length payloads referenced from `buf`, a buffer
    /// of `mem_type` elements produced by a read.
    fn reclaim(&self, mem_type: Hid, buf: &mut [u8]) -> Result<()>;

    // ---- references ----

    fn object_reference(&self, file: Hid, path: &str) -> Result<u64>;
    fn dereference(&self, file: Hid, reference: u64) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_handle_is_zero() {
        assert!(Hid::ALL.is_all());
        assert!(!Hid::new(7).is_all());
        assert_eq!(Hid::new(7).raw(), 7);
    }

    #[test]
    fn no_heap_refuses_vlen_data() {
        let err = NoHeap.store(b"abc").unwrap_err();
        assert_eq!(err.native().map(|e| e.minor), Some(ErrorMinor::Unsupported));
    }

    #[test]
    fn chunk_dims_only_for_chunked() {
        assert_eq!(StorageLayout::Chunked(vec![4]).chunk_dims(), Some(&[4u64][..]));
        assert_eq!(StorageLayout::Contiguous.chunk_dims(), None);
    }
}
