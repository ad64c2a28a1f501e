//! Enumeration and boolean datasets.
//!
//! Enumeration types are committed to the file on first write (see
//! [`H5File::commit_enum`]) and values travel as ordinals of the smallest
//! integer that can number them. Reads convert by value name, so a host
//! enumeration may list its values in a different order than the file.

use byteorder::{ByteOrder, NativeEndian};
use rustyhdf5_typemap::{
    Datatype, DatatypeByteOrder, EnumType, H5EnumValue, Hid, SpaceRequest, TypeMapError,
};

use crate::config::StorageFeatures;
use crate::error::{AtPath, Error, Result};
use crate::file::{H5File, DATA_TYPES_GROUP};
use crate::transfer;

fn encode_ordinals(ordinals: &[usize], size: usize) -> Vec<u8> {
    let mut out = vec![0u8; ordinals.len() * size];
    for (slot, &ordinal) in out.chunks_exact_mut(size).zip(ordinals) {
        match size {
            1 => slot[0] = ordinal as u8,
            2 => NativeEndian::write_u16(slot, ordinal as u16),
            _ => NativeEndian::write_u32(slot, ordinal as u32),
        }
    }
    out
}

fn decode_ordinals(bytes: &[u8], size: usize) -> Vec<usize> {
    bytes
        .chunks_exact(size)
        .map(|slot| match size {
            1 => slot[0] as usize,
            2 => NativeEndian::read_u16(slot) as usize,
            _ => NativeEndian::read_u32(slot) as usize,
        })
        .collect()
}

fn memory_type(storage: &Datatype) -> Datatype {
    storage.with_byte_order(DatatypeByteOrder::native())
}

/// Reads and writes enumeration and boolean datasets.
pub struct EnumIo<'f> {
    file: &'f H5File,
}

impl<'f> EnumIo<'f> {
    pub(crate) fn new(file: &'f H5File) -> Self {
        Self { file }
    }

    fn write_ordinals(
        &self,
        path: &str,
        storage: &Datatype,
        dims: &[u64],
        ordinals: &[usize],
        features: &StorageFeatures,
    ) -> Result<()> {
        let scope = self.file.scope();
        let ds = self.file.prepare_dataset(&scope, path, storage, dims, features)?;
        let mem_type = memory_type(storage);
        let mem = scope.create_type(&mem_type).at(path)?;
        let bytes = encode_ordinals(ordinals, mem_type.type_size());
        self.file
            .native()
            .write_dataset(ds, mem, Hid::ALL, Hid::ALL, &bytes)
            .at(path)
    }

    /// Read the whole dataset as ordinals of `target`.
    fn read_ordinals(&self, path: &str, target: &Datatype) -> Result<Vec<usize>> {
        let scope = self.file.scope();
        let ds = scope.open_dataset(self.file.hid()?, path).at(path)?;
        let mem_type = memory_type(target);
        let mem = scope.create_type(&mem_type).at(path)?;
        let read = transfer::read(self.file, &scope, ds, mem, &SpaceRequest::Whole, None, path)?;
        Ok(read
            .map(|r| decode_ordinals(&r.bytes, mem_type.type_size()))
            .unwrap_or_default())
    }

    fn stored_type(&self, path: &str) -> Result<Datatype> {
        let scope = self.file.scope();
        let ds = scope.open_dataset(self.file.hid()?, path).at(path)?;
        let tid = scope.dataset_type(ds).at(path)?;
        self.file.native().describe_type(tid).at(path)
    }

    // ---- typed enumerations ----

    pub fn write<E: H5EnumValue>(&self, path: &str, value: E) -> Result<()> {
        let storage = self.file.commit_enum(&E::enum_type())?;
        let features = StorageFeatures::new().contiguous();
        self.write_ordinals(path, &storage, &[], &[value.ordinal()], &features)
    }

    pub fn write_array<E: H5EnumValue>(&self, path: &str, values: &[E]) -> Result<()> {
        self.write_array_with(path, values, &StorageFeatures::default())
    }

    pub fn write_array_with<E: H5EnumValue>(&self, path: &str, values: &[E], features: &StorageFeatures) -> Result<()> {
        let storage = self.file.commit_enum(&E::enum_type())?;
        let ordinals: Vec<usize> = values.iter().map(|v| v.ordinal()).collect();
        self.write_ordinals(path, &storage, &[values.len() as u64], &ordinals, features)
    }

    pub fn read<E: H5EnumValue>(&self, path: &str) -> Result<E> {
        self.read_array(path)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Incompatible {
                path: path.to_string(),
                requested: format!("one {} value", E::enum_type().name),
                found: "an empty dataset".to_string(),
            })
    }

    /// Read values by name into `E`; a stored value `E` does not have is an
    /// error.
    pub fn read_array<E: H5EnumValue>(&self, path: &str) -> Result<Vec<E>> {
        let enum_type = E::enum_type();
        self.read_ordinals(path, &enum_type.datatype())?
            .into_iter()
            .map(|ordinal| {
                E::from_ordinal(ordinal).ok_or_else(|| Error::AtPath {
                    path: path.to_string(),
                    source: TypeMapError::ValueOutOfRange {
                        target: enum_type.name.clone(),
                        value: ordinal.to_string(),
                    },
                })
            })
            .collect()
    }

    // ---- by name ----

    /// Write values given by name.
    pub fn write_names<S: AsRef<str>>(&self, path: &str, enum_type: &EnumType, names: &[S]) -> Result<()> {
        let ordinals = names
            .iter()
            .map(|name| {
                enum_type.ordinal(name.as_ref()).ok_or_else(|| Error::AtPath {
                    path: path.to_string(),
                    source: TypeMapError::ValueOutOfRange {
                        target: enum_type.name.clone(),
                        value: name.as_ref().to_string(),
                    },
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let storage = self.file.commit_enum(enum_type)?;
        let dims = [names.len() as u64];
        self.write_ordinals(path, &storage, &dims, &ordinals, &StorageFeatures::default())
    }

    /// The enumeration type of a dataset, named after the committed type it
    /// matches when this handle knows one.
    pub fn enum_type(&self, path: &str) -> Result<EnumType> {
        let stored = self.stored_type(path)?;
        let name = self.file.committed_name(&stored, DATA_TYPES_GROUP, "Enum_").unwrap_or_default();
        EnumType::from_datatype(&name, &stored).ok_or_else(|| Error::Incompatible {
            path: path.to_string(),
            requested: "an enumeration".to_string(),
            found: stored.describe(),
        })
    }

    /// Read the value names of an enumeration dataset.
    pub fn read_names(&self, path: &str) -> Result<Vec<String>> {
        let enum_type = self.enum_type(path)?;
        self.read_ordinals(path, &enum_type.datatype())?
            .into_iter()
            .map(|ordinal| {
                enum_type
                    .name_of(ordinal)
                    .map(str::to_string)
                    .ok_or_else(|| Error::AtPath {
                        path: path.to_string(),
                        source: TypeMapError::ValueOutOfRange {
                            target: enum_type.name.clone(),
                            value: ordinal.to_string(),
                        },
                    })
            })
            .collect()
    }

    // ---- booleans ----

    pub fn write_bools(&self, path: &str, values: &[bool]) -> Result<()> {
        let ordinals: Vec<usize> = values.iter().map(|&b| b as usize).collect();
        let dims = [values.len() as u64];
        self.write_ordinals(path, &Datatype::boolean(), &dims, &ordinals, &StorageFeatures::default())
    }

    pub fn write_bool(&self, path: &str, value: bool) -> Result<()> {
        let features = StorageFeatures::new().contiguous();
        self.write_ordinals(path, &Datatype::boolean(), &[], &[value as usize], &features)
    }

    pub fn read_bools(&self, path: &str) -> Result<Vec<bool>> {
        Ok(self
            .read_ordinals(path, &Datatype::boolean())?
            .into_iter()
            .map(|o| o != 0)
            .collect())
    }

    pub fn read_bool(&self, path: &str) -> Result<bool> {
        self.read_bools(path)?
            .first()
            .copied()
            .ok_or_else(|| Error::Incompatible {
                path: path.to_string(),
                requested: "one boolean".to_string(),
                found: "an empty dataset".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, vec![0, 3, 255])]
    #[case(2, vec![0, 256, 65_535])]
    #[case(4, vec![0, 65_536, 1 << 20])]
    fn ordinals_round_trip_at_every_width(#[case] size: usize, #[case] ordinals: Vec<usize>) {
        let bytes = encode_ordinals(&ordinals, size);
        assert_eq!(bytes.len(), ordinals.len() * size);
        assert_eq!(decode_ordinals(&bytes, size), ordinals);
    }
}
