//! Row-major multi-dimensional arrays.

use rustyhdf5_typemap::TypeMapError;

use crate::error::{Error, Result};

/// A dense row-major array with explicit dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct MdArray<T> {
    dims: Vec<u64>,
    data: Vec<T>,
}

fn element_count(dims: &[u64]) -> usize {
    dims.iter().product::<u64>() as usize
}

impl<T> MdArray<T> {
    /// Wrap `data`, which must hold exactly the product of `dims` elements.
    pub fn new(dims: &[u64], data: Vec<T>) -> Result<Self> {
        let needed = element_count(dims);
        if data.len() != needed {
            return Err(Error::TypeMap(TypeMapError::TypeMismatch {
                context: "multi-dimensional array".to_string(),
                expected: format!("{needed} elements for dimensions {dims:?}"),
                found: format!("{} elements", data.len()),
            }));
        }
        Ok(Self {
            dims: dims.to_vec(),
            data,
        })
    }

    pub fn dims(&self) -> &[u64] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<T> {
        self.data
    }

    /// Row-major position of `index`, if it lies inside the array.
    pub fn linear_index(&self, index: &[u64]) -> Option<usize> {
        if index.len() != self.dims.len() {
            return None;
        }
        let mut linear = 0u64;
        for (&i, &d) in index.iter().zip(&self.dims) {
            if i >= d {
                return None;
            }
            linear = linear * d + i;
        }
        Some(linear as usize)
    }

    pub fn get(&self, index: &[u64]) -> Option<&T> {
        self.linear_index(index).and_then(|i| self.data.get(i))
    }

    pub fn get_mut(&mut self, index: &[u64]) -> Option<&mut T> {
        self.linear_index(index).and_then(|i| self.data.get_mut(i))
    }
}

impl<T: Clone + Default> MdArray<T> {
    /// An array of `dims` filled with `T::default()`.
    pub fn filled(dims: &[u64]) -> Self {
        Self {
            dims: dims.to_vec(),
            data: vec![T::default(); element_count(dims)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexing_is_row_major() {
        let a = MdArray::new(&[2, 3], (0..6).collect::<Vec<i32>>()).unwrap();
        assert_eq!(a.get(&[0, 2]), Some(&2));
        assert_eq!(a.get(&[1, 0]), Some(&3));
        assert_eq!(a.get(&[2, 0]), None);
        assert_eq!(a.get(&[0]), None);
    }

    #[test]
    fn element_count_must_match() {
        assert!(MdArray::new(&[2, 2], vec![1u8; 3]).is_err());
        let empty: MdArray<u8> = MdArray::filled(&[0, 4]);
        assert!(empty.is_empty());
    }
}
