//! Bit-field datasets.
//!
//! A bit set is stored as little-endian 64-bit bit-field words; bit `i`
//! lives in word `i / 64`. An array of sets becomes a 2-D dataset of
//! `[sets, words]`. Datasets carry the `BitField` type variant.

use byteorder::{ByteOrder, NativeEndian};
use rustyhdf5_typemap::bits::bit_field_words;
use rustyhdf5_typemap::{
    BitSet, Datatype, DatatypeByteOrder, Hid, SpaceRequest, TypeMapError, TypeVariant, REST_OF_AXIS,
};

use crate::config::StorageFeatures;
use crate::error::{AtPath, Error, Result};
use crate::file::H5File;
use crate::transfer;

fn storage_type() -> Datatype {
    Datatype::BitField {
        size: 8,
        byte_order: DatatypeByteOrder::LittleEndian,
    }
}

fn memory_type() -> Datatype {
    storage_type().with_byte_order(DatatypeByteOrder::native())
}

fn check_width(set: &BitSet, bits: i64, path: &str) -> Result<()> {
    match set.highest_set_bit() {
        Some(highest) if highest as i64 >= bits => Err(Error::AtPath {
            path: path.to_string(),
            source: TypeMapError::BitVectorTooWide {
                member: path.to_string(),
                highest,
                declared: bits as usize,
            },
        }),
        _ => Ok(()),
    }
}

fn words_to_bytes(words: &[u64]) -> Vec<u8> {
    let mut bytes = vec![0u8; words.len() * 8];
    NativeEndian::write_u64_into(words, &mut bytes);
    bytes
}

fn bytes_to_words(bytes: &[u8]) -> Vec<u64> {
    let mut words = vec![0u64; bytes.len() / 8];
    NativeEndian::read_u64_into(&bytes[..words.len() * 8], &mut words);
    words
}

/// Reads and writes bit-field datasets.
pub struct BitFieldIo<'f> {
    file: &'f H5File,
}

impl<'f> BitFieldIo<'f> {
    pub(crate) fn new(file: &'f H5File) -> Self {
        Self { file }
    }

    fn write_words(&self, path: &str, dims: &[u64], words: &[u64], features: &StorageFeatures) -> Result<()> {
        let scope = self.file.scope();
        let ds = self.file.prepare_dataset(&scope, path, &storage_type(), dims, features)?;
        let mem = scope.create_type(&memory_type()).at(path)?;
        self.file
            .native()
            .write_dataset(ds, mem, Hid::ALL, Hid::ALL, &words_to_bytes(words))
            .at(path)?;
        self.file.write_type_variant(ds, TypeVariant::BitField, path)
    }

    /// Write one set of `bits` bits.
    pub fn write(&self, path: &str, set: &BitSet, bits: i64) -> Result<()> {
        let words = bit_field_words(bits).at(path)?;
        check_width(set, bits, path)?;
        let features = StorageFeatures::new().contiguous();
        self.write_words(path, &[words as u64], &set.to_words(words), &features)
    }

    /// Write sets of `bits` bits each as one `[sets, words]` dataset.
    pub fn write_array(&self, path: &str, sets: &[BitSet], bits: i64) -> Result<()> {
        let words = bit_field_words(bits).at(path)?;
        let mut packed = Vec::with_capacity(sets.len() * words);
        for set in sets {
            check_width(set, bits, path)?;
            packed.extend(set.to_words(words));
        }
        let dims = [sets.len() as u64, words as u64];
        self.write_words(path, &dims, &packed, &StorageFeatures::default())
    }

    /// Read a 1-D bit-field dataset as one set.
    pub fn read(&self, path: &str) -> Result<BitSet> {
        let (_, words) = self.read_words(path, &SpaceRequest::Whole)?;
        Ok(BitSet::from_words(&words))
    }

    /// Read a `[sets, words]` dataset as its sets.
    pub fn read_array(&self, path: &str) -> Result<Vec<BitSet>> {
        let (dims, words) = self.read_words(path, &SpaceRequest::Whole)?;
        Ok(split_sets(&dims, &words))
    }

    /// Read the `block_number`th run of `block_size` sets, clipped at the
    /// end of the dataset.
    pub fn read_block(&self, path: &str, block_size: usize, block_number: u64) -> Result<Option<Vec<BitSet>>> {
        let offset = [transfer::block_offset(block_number, block_size), 0];
        let block = [block_size as i64, REST_OF_AXIS];
        let request = SpaceRequest::Block {
            offset: &offset,
            block: &block,
        };
        let scope = self.file.scope();
        let ds = scope.open_dataset(self.file.hid()?, path).at(path)?;
        let mem = scope.create_type(&memory_type()).at(path)?;
        let Some(read) = transfer::read(self.file, &scope, ds, mem, &request, None, path)? else {
            return Ok(None);
        };
        Ok(Some(split_sets(&read.plan.memory_dims, &bytes_to_words(&read.bytes))))
    }

    fn read_words(&self, path: &str, request: &SpaceRequest<'_>) -> Result<(Vec<u64>, Vec<u64>)> {
        let scope = self.file.scope();
        let ds = scope.open_dataset(self.file.hid()?, path).at(path)?;
        let variant = self.file.read_type_variant(ds, path)?;
        if !matches!(variant, TypeVariant::BitField | TypeVariant::None) {
            return Err(Error::WrongTypeVariant {
                path: path.to_string(),
                expected: TypeVariant::BitField,
                found: variant,
            });
        }
        let mem = scope.create_type(&memory_type()).at(path)?;
        match transfer::read(self.file, &scope, ds, mem, request, None, path)? {
            Some(read) => Ok((read.plan.memory_dims.clone(), bytes_to_words(&read.bytes))),
            None => Ok((Vec::new(), Vec::new())),
        }
    }
}

fn split_sets(dims: &[u64], words: &[u64]) -> Vec<BitSet> {
    let per_set = dims.last().copied().unwrap_or(1).max(1) as usize;
    words.chunks(per_set).map(BitSet::from_words).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;
    use rustyhdf5_typemap::MemoryNative;

    #[test]
    fn sets_round_trip_with_variant() {
        let native = Rc::new(MemoryNative::new());
        let file = H5File::create(native.clone(), "bits.h5").unwrap();
        let set = BitSet::from_indices([0, 63, 64, 99]);
        file.bitfields().write("one", &set, 100).unwrap();
        assert_eq!(file.bitfields().read("one").unwrap(), set);
        assert_eq!(file.type_variant("one").unwrap(), TypeVariant::BitField);
        assert_eq!(file.dataset_info("one").unwrap().dims, vec![2]);

        let sets = vec![BitSet::from_indices([1]), BitSet::new(), BitSet::from_indices([2, 3])];
        file.bitfields().write_array("many", &sets, 8).unwrap();
        assert_eq!(file.bitfields().read_array("many").unwrap(), sets);
        let tail = file.bitfields().read_block("many", 2, 1).unwrap().unwrap();
        assert_eq!(tail, vec![BitSet::from_indices([2, 3])]);
        drop(file);
        assert_eq!(native.live_handles(), 0);
    }

    #[test]
    fn bits_past_the_declared_width_are_rejected() {
        let native = Rc::new(MemoryNative::new());
        let file = H5File::create(native, "bits.h5").unwrap();
        let err = file.bitfields().write("x", &BitSet::from_indices([10]), 10).unwrap_err();
        assert!(matches!(
            err.type_map(),
            Some(TypeMapError::BitVectorTooWide { highest: 10, declared: 10, .. })
        ));
        assert!(file.bitfields().write("x", &BitSet::new(), 0).is_err());
    }
}
