//! Primitive element types and their native type descriptors.

use crate::datatype::{Datatype, DatatypeByteOrder};

/// A fixed-size primitive that maps one-to-one onto a native HDF5 type.
///
/// Memory buffers hold elements in host byte order; the storage form is
/// little-endian.
pub trait H5Element: Copy + Default + PartialEq + std::fmt::Debug + 'static {
    /// Size of one element in bytes.
    const SIZE: usize;
    /// Short name, e.g. `"f64"`.
    const NAME: &'static str;

    /// Storage-form datatype.
    fn datatype() -> Datatype;

    /// Memory-form datatype (host byte order).
    fn memory_datatype() -> Datatype {
        Self::datatype().with_byte_order(DatatypeByteOrder::native())
    }

    fn write_ne(self, out: &mut [u8]);
    fn read_ne(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($t:ty, $name:literal, $dt:expr) => {
        impl H5Element for $t {
            const SIZE: usize = std::mem::size_of::<$t>();
            const NAME: &'static str = $name;

            fn datatype() -> Datatype {
                $dt
            }

            fn write_ne(self, out: &mut [u8]) {
                out[..Self::SIZE].copy_from_slice(&self.to_ne_bytes());
            }

            fn read_ne(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(&bytes[..Self::SIZE]);
                <$t>::from_ne_bytes(raw)
            }
        }
    };
}

impl_element!(i8, "i8", Datatype::integer(1, true));
impl_element!(i16, "i16", Datatype::integer(2, true));
impl_element!(i32, "i32", Datatype::integer(4, true));
impl_element!(i64, "i64", Datatype::integer(8, true));
impl_element!(u8, "u8", Datatype::integer(1, false));
impl_element!(u16, "u16", Datatype::integer(2, false));
impl_element!(u32, "u32", Datatype::integer(4, false));
impl_element!(u64, "u64", Datatype::integer(8, false));
impl_element!(f32, "f32", Datatype::float(4));
impl_element!(f64, "f64", Datatype::float(8));

/// Encode a slice of elements into a host-order byte buffer.
pub fn to_bytes<T: H5Element>(values: &[T]) -> Vec<u8> {
    let mut buf = vec![0u8; values.len() * T::SIZE];
    for (chunk, &v) in buf.chunks_exact_mut(T::SIZE).zip(values) {
        v.write_ne(chunk);
    }
    buf
}

/// Decode a host-order byte buffer into elements.
pub fn from_bytes<T: H5Element>(bytes: &[u8]) -> Vec<T> {
    bytes.chunks_exact(T::SIZE).map(T::read_ne).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_match_datatypes() {
        assert_eq!(i16::SIZE, i16::datatype().type_size());
        assert_eq!(f64::SIZE, f64::datatype().type_size());
        assert_eq!(u64::SIZE, u64::memory_datatype().memory_size());
    }

    #[test]
    fn bytes_round_trip() {
        let values = [1.5f32, -2.25, 1e6];
        let raw = to_bytes(&values);
        assert_eq!(raw.len(), 12);
        assert_eq!(from_bytes::<f32>(&raw), values.to_vec());
    }
}
