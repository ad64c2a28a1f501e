//! Compound datasets read into and written from host records.
//!
//! A reader or writer gets its compound mapping from one of three places:
//! the record type's own declaration ([`H5Compound`]), an explicit
//! [`CompoundMapping`], or the data itself (the stored compound type when
//! reading, the first record when writing map-shaped records). Layouts
//! are planned once per file, mapping and stored type and then reused.

use std::marker::PhantomData;
use std::sync::Arc;

use rustyhdf5_typemap::natural::natural_block_dims;
use rustyhdf5_typemap::{
    CleanupScope, CompoundCodec, CompoundLayout, CompoundMapping, Datatype, H5Compound,
    Handle, Hid, HostRecord, NaturalBlock, NaturalBlockIndex, OwnedHandle, SpaceRequest,
    TypeMapError,
};

use crate::config::StorageFeatures;
use crate::error::{AtPath, Error, Result};
use crate::file::H5File;
use crate::md::MdArray;
use crate::transfer::{self, as_block, block_offset};

#[derive(Debug, Clone)]
enum MappingSource {
    Declared(CompoundMapping),
    /// The stored compound type when reading, the first record's members
    /// when writing.
    FromData,
}

fn compound_type(path: &str, stored: Datatype) -> Result<Datatype> {
    match stored {
        Datatype::Compound { .. } => Ok(stored),
        other => Err(Error::Incompatible {
            path: path.to_string(),
            requested: "compound records".to_string(),
            found: other.describe(),
        }),
    }
}

// ---- reader ----

/// Reads compound datasets as records of type `R`.
pub struct CompoundReader<'f, R> {
    file: &'f H5File,
    source: MappingSource,
    _record: PhantomData<R>,
}

impl<'f, R: H5Compound + 'static> CompoundReader<'f, R> {
    /// A reader using the mapping `R` declares.
    pub(crate) fn declared(file: &'f H5File) -> Result<Self> {
        Ok(Self::with_mapping(file, R::mapping()?))
    }
}

impl<'f, R: HostRecord + 'static> CompoundReader<'f, R> {
    pub(crate) fn with_mapping(file: &'f H5File, mapping: CompoundMapping) -> Self {
        Self {
            file,
            source: MappingSource::Declared(mapping),
            _record: PhantomData,
        }
    }

    pub(crate) fn from_stored(file: &'f H5File) -> Self {
        Self {
            file,
            source: MappingSource::FromData,
            _record: PhantomData,
        }
    }

    /// The mapping used for the dataset at `path`.
    pub fn mapping_for(&self, path: &str) -> Result<CompoundMapping> {
        let scope = self.file.scope();
        let ds = scope.open_dataset(self.file.hid()?, path).at(path)?;
        let (_, mapping) = self.stored_and_mapping(&scope, ds, path)?;
        Ok(mapping)
    }

    fn stored_and_mapping(&self, scope: &CleanupScope<'_>, ds: Hid, path: &str) -> Result<(Datatype, CompoundMapping)> {
        let tid = scope.dataset_type(ds).at(path)?;
        let stored = compound_type(path, self.file.native().describe_type(tid).at(path)?)?;
        let mapping = match &self.source {
            MappingSource::Declared(mapping) => mapping.clone(),
            MappingSource::FromData => {
                let variants = self.file.read_member_variants(ds, path)?;
                CompoundMapping::from_datatype(&stored, &variants).at(path)?
            }
        };
        Ok((stored, mapping))
    }

    fn codec(&self, scope: &CleanupScope<'_>, ds: Hid, path: &str) -> Result<CompoundCodec<R>> {
        let (stored, mapping) = self.stored_and_mapping(scope, ds, path)?;
        let layout = self.file.layout::<R>(&mapping, Some(&stored)).at(path)?;
        Ok(CompoundCodec::from_layout(layout))
    }

    fn read_request(&self, path: &str, request: &SpaceRequest<'_>) -> Result<Option<(Vec<R>, Vec<u64>)>> {
        let scope = self.file.scope();
        let ds = scope.open_dataset(self.file.hid()?, path).at(path)?;
        let codec = self.codec(&scope, ds, path)?;
        let mem = scope.create_type(&codec.layout().memory_type()).at(path)?;
        let Some(mut read) = transfer::read(self.file, &scope, ds, mem, request, None, path)? else {
            return Ok(None);
        };
        let count = read.element_count();
        let records = codec
            .decode_all_reclaiming(self.file.native(), mem, &mut read.bytes, count)
            .at(path)?;
        Ok(Some((records, read.plan.memory_dims)))
    }

    /// Read a scalar compound dataset, or its first record.
    pub fn read(&self, path: &str) -> Result<R> {
        self.read_array(path)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Incompatible {
                path: path.to_string(),
                requested: "one record".to_string(),
                found: "an empty dataset".to_string(),
            })
    }

    pub fn read_array(&self, path: &str) -> Result<Vec<R>> {
        Ok(self
            .read_request(path, &SpaceRequest::Whole)?
            .map(|(records, _)| records)
            .unwrap_or_default())
    }

    pub fn read_block(&self, path: &str, block_size: usize, block_number: u64) -> Result<Option<Vec<R>>> {
        self.read_block_with_offset(path, block_size as i64, block_offset(block_number, block_size))
    }

    pub fn read_block_with_offset(&self, path: &str, block_size: i64, offset: u64) -> Result<Option<Vec<R>>> {
        let request = SpaceRequest::Block1D {
            offset,
            block: block_size,
        };
        Ok(self.read_request(path, &request)?.map(|(records, _)| records))
    }

    pub fn read_md_array(&self, path: &str) -> Result<MdArray<R>> {
        match self.read_request(path, &SpaceRequest::Whole)? {
            Some((records, dims)) => MdArray::new(&dims, records),
            None => MdArray::new(&[0], Vec::new()),
        }
    }

    pub fn read_md_block_with_offset(&self, path: &str, block: &[i64], offset: &[u64]) -> Result<Option<MdArray<R>>> {
        let request = SpaceRequest::Block { offset, block };
        self.read_request(path, &request)?
            .map(|(records, dims)| MdArray::new(&dims, records))
            .transpose()
    }

    /// Iterate a 1-D compound dataset in blocks of its chunk size.
    pub fn natural_blocks(&self, path: &str) -> Result<CompoundBlocks<'f, R>> {
        let native = self.file.native();
        let dataset = OwnedHandle::new(
            native,
            Handle::Dataset(native.open_dataset(self.file.hid()?, path).at(path)?),
        );
        let scope = self.file.scope();
        let codec = self.codec(&scope, dataset.hid(), path)?;
        let mem_type = OwnedHandle::new(
            native,
            Handle::Type(native.create_type(&codec.layout().memory_type()).at(path)?),
        );
        let dims = self.file.extent(&scope, dataset.hid(), path)?.dims;
        if dims.len() != 1 {
            return Err(Error::AtPath {
                path: path.to_string(),
                source: TypeMapError::RankMismatch {
                    expected: 1,
                    actual: dims.len(),
                },
            });
        }
        let layout = native.dataset_layout(dataset.hid()).at(path)?;
        let chunk = natural_block_dims(&layout, &dims)[0];
        Ok(CompoundBlocks {
            file: self.file,
            path: path.to_string(),
            dataset,
            mem_type,
            codec,
            blocks: NaturalBlockIndex::new(dims[0], chunk),
        })
    }
}

/// Natural blocks of a compound dataset, decoded.
pub struct CompoundBlocks<'f, R> {
    file: &'f H5File,
    path: String,
    dataset: OwnedHandle<'f>,
    mem_type: OwnedHandle<'f>,
    codec: CompoundCodec<R>,
    blocks: NaturalBlockIndex,
}

impl<R: HostRecord> CompoundBlocks<'_, R> {
    fn read(&self, block: &NaturalBlock) -> Result<Vec<R>> {
        let scope = self.file.scope();
        let request = SpaceRequest::Block1D {
            offset: block.offset,
            block: block.size as i64,
        };
        let read = transfer::read(
            self.file,
            &scope,
            self.dataset.hid(),
            self.mem_type.hid(),
            &request,
            None,
            &self.path,
        )?;
        let Some(mut read) = read else {
            return Ok(Vec::new());
        };
        let count = read.element_count();
        self.codec
            .decode_all_reclaiming(self.file.native(), self.mem_type.hid(), &mut read.bytes, count)
            .at(&self.path)
    }
}

impl<R: HostRecord> Iterator for CompoundBlocks<'_, R> {
    type Item = Result<(Vec<R>, NaturalBlock)>;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.blocks.next()?;
        Some(self.read(&block).map(|records| (records, block)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.blocks.size_hint()
    }
}

// ---- writer ----

/// Writes records of type `R` as compound datasets.
pub struct CompoundWriter<'f, R> {
    file: &'f H5File,
    source: MappingSource,
    _record: PhantomData<R>,
}

impl<'f, R: H5Compound + 'static> CompoundWriter<'f, R> {
    pub(crate) fn declared(file: &'f H5File) -> Result<Self> {
        Ok(Self::with_mapping(file, R::mapping()?))
    }
}

impl<'f, R: HostRecord + 'static> CompoundWriter<'f, R> {
    pub(crate) fn with_mapping(file: &'f H5File, mapping: CompoundMapping) -> Self {
        Self {
            file,
            source: MappingSource::Declared(mapping),
            _record: PhantomData,
        }
    }

    pub(crate) fn from_template(file: &'f H5File) -> Self {
        Self {
            file,
            source: MappingSource::FromData,
            _record: PhantomData,
        }
    }

    fn mapping(&self, template: Option<&R>) -> Result<CompoundMapping> {
        match (&self.source, template) {
            (MappingSource::Declared(mapping), _) => Ok(mapping.clone()),
            (MappingSource::FromData, Some(record)) => Ok(CompoundMapping::infer(record)?),
            (MappingSource::FromData, None) => Err(Error::TypeMap(TypeMapError::Uninferable {
                member: "*".to_string(),
                what: "compound mapping without a template record",
            })),
        }
    }

    /// Encode `records` into memory form, hand them to `write` and release
    /// their variable-length payloads whatever the outcome.
    fn write_encoded(
        &self,
        layout: &Arc<CompoundLayout>,
        mem: Hid,
        records: &[R],
        path: &str,
        write: impl FnOnce(&[u8]) -> Result<()>,
    ) -> Result<()> {
        let native = self.file.native();
        let codec = CompoundCodec::<R>::from_layout(Arc::clone(layout));
        let mut bytes = codec.encode_all_reclaiming(native, mem, records).at(path)?;
        let written = write(&bytes);
        if let Err(e) = native.reclaim(mem, &mut bytes) {
            log::warn!("'{path}': failed to release variable-length write buffer: {e}");
        }
        written
    }

    fn write_whole(&self, path: &str, dims: &[u64], records: &[R], features: &StorageFeatures) -> Result<()> {
        let mapping = self.mapping(records.first())?;
        let layout = self.file.layout::<R>(&mapping, None).at(path)?;
        let scope = self.file.scope();
        let ds = self
            .file
            .prepare_dataset(&scope, path, &layout.storage_type(), dims, features)?;
        self.file.write_member_variants(ds, &layout.variants(), path)?;
        let mem = scope.create_type(&layout.memory_type()).at(path)?;
        self.write_encoded(&layout, mem, records, path, |bytes| {
            self.file
                .native()
                .write_dataset(ds, mem, Hid::ALL, Hid::ALL, bytes)
                .at(path)
        })
    }

    fn write_request(&self, path: &str, request: &SpaceRequest<'_>, records: &[R]) -> Result<()> {
        let scope = self.file.scope();
        let ds = scope.open_dataset(self.file.hid()?, path).at(path)?;
        let tid = scope.dataset_type(ds).at(path)?;
        let stored = compound_type(path, self.file.native().describe_type(tid).at(path)?)?;
        let mapping = self.mapping(records.first())?;
        let layout = self.file.layout::<R>(&mapping, Some(&stored)).at(path)?;
        let mem = scope.create_type(&layout.memory_type()).at(path)?;
        self.write_encoded(&layout, mem, records, path, |bytes| {
            transfer::write(self.file, &scope, ds, mem, request, bytes, path)
        })
    }

    /// Write a scalar compound dataset.
    pub fn write(&self, path: &str, record: &R) -> Result<()> {
        self.write_whole(
            path,
            &[],
            std::slice::from_ref(record),
            &StorageFeatures::new().contiguous(),
        )
    }

    pub fn write_array(&self, path: &str, records: &[R]) -> Result<()> {
        self.write_array_with(path, records, &StorageFeatures::default())
    }

    pub fn write_array_with(&self, path: &str, records: &[R], features: &StorageFeatures) -> Result<()> {
        self.write_whole(path, &[records.len() as u64], records, features)
    }

    /// Create a 1-D compound dataset of `size` zeroed records; `template`
    /// supplies the mapping when none was declared.
    pub fn create_array(&self, path: &str, size: u64, template: Option<&R>, features: &StorageFeatures) -> Result<()> {
        let mapping = self.mapping(template)?;
        let layout = self.file.layout::<R>(&mapping, None).at(path)?;
        let scope = self.file.scope();
        let ds = self
            .file
            .prepare_dataset(&scope, path, &layout.storage_type(), &[size], features)?;
        self.file.write_member_variants(ds, &layout.variants(), path)
    }

    pub fn write_block(&self, path: &str, records: &[R], block_number: u64) -> Result<()> {
        self.write_block_with_offset(path, records, block_offset(block_number, records.len()))
    }

    pub fn write_block_with_offset(&self, path: &str, records: &[R], offset: u64) -> Result<()> {
        let request = SpaceRequest::Block1D {
            offset,
            block: records.len() as i64,
        };
        self.write_request(path, &request, records)
    }

    pub fn write_md_array(&self, path: &str, array: &MdArray<R>) -> Result<()> {
        self.write_whole(path, array.dims(), array.data(), &StorageFeatures::default())
    }

    pub fn write_md_block_with_offset(&self, path: &str, array: &MdArray<R>, offset: &[u64]) -> Result<()> {
        let block = as_block(array.dims());
        self.write_request(path, &SpaceRequest::Block { offset, block: &block }, array.data())
    }
}
