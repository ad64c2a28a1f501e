//! One generic reader and writer for every primitive element type.
//!
//! [`PrimitiveReader`] and [`PrimitiveWriter`] are parameterised by an
//! [`H5Element`]; the element supplies the storage and memory datatypes,
//! the dataspace planner supplies the selections.

use std::marker::PhantomData;

use rustyhdf5_typemap::element::{from_bytes, to_bytes};
use rustyhdf5_typemap::natural::natural_block_dims;
use rustyhdf5_typemap::{
    BoundIndices, CleanupScope, Datatype, GridBlock, H5Element, Handle, Hid, NaturalBlock,
    NaturalBlockGrid, NaturalBlockIndex, NativeError, OwnedHandle, SpaceRequest, TypeMapError,
    REST_OF_AXIS,
};

use crate::config::StorageFeatures;
use crate::error::{AtPath, Error, Result};
use crate::file::H5File;
use crate::md::MdArray;
use crate::transfer::{self, as_block, block_offset, md_block_offset};

/// Whether `err` is the one native failure that warrants retrying a
/// scalar-typed read as an array-typed read.
pub(crate) fn is_array_retry(file: &H5File, err: &Error) -> bool {
    file.reader_config().array_fallback
        && err.native().is_some_and(NativeError::is_conversion_path_failure)
}

/// The memory type matching a stored array type with `T` elements.
fn array_memory_type<T: H5Element>(stored: &Datatype) -> Option<(Datatype, usize)> {
    match stored {
        Datatype::Array { dimensions, .. } => Some((
            Datatype::Array {
                base_type: Box::new(T::memory_datatype()),
                dimensions: dimensions.clone(),
            },
            rustyhdf5_typemap::datatype::element_count(dimensions),
        )),
        _ => None,
    }
}

// ---- reader ----

/// Reads datasets and attributes of `T` elements.
pub struct PrimitiveReader<'f, T> {
    file: &'f H5File,
    _element: PhantomData<T>,
}

impl<'f, T: H5Element> PrimitiveReader<'f, T> {
    pub(crate) fn new(file: &'f H5File) -> Self {
        Self {
            file,
            _element: PhantomData,
        }
    }

    fn read_request(&self, path: &str, request: &SpaceRequest<'_>) -> Result<Option<(Vec<T>, Vec<u64>)>> {
        let scope = self.file.scope();
        let ds = scope.open_dataset(self.file.hid()?, path).at(path)?;
        let mem = scope.create_type(&T::memory_datatype()).at(path)?;
        Ok(transfer::read(self.file, &scope, ds, mem, request, None, path)?
            .map(|block| (from_bytes(&block.bytes), block.plan.memory_dims)))
    }

    /// Read a scalar dataset, or the first element of any dataset.
    pub fn read(&self, path: &str) -> Result<T> {
        let values = self.read_array(path)?;
        values.first().copied().ok_or_else(|| Error::Incompatible {
            path: path.to_string(),
            requested: format!("one {}", T::NAME),
            found: "an empty dataset".to_string(),
        })
    }

    /// Read a whole dataset as a flat array.
    ///
    /// A dataset stored with an array element type is read flattened when
    /// the scalar read finds no conversion path.
    pub fn read_array(&self, path: &str) -> Result<Vec<T>> {
        match self.read_request(path, &SpaceRequest::Whole) {
            Ok(read) => Ok(read.map(|(values, _)| values).unwrap_or_default()),
            Err(err) if is_array_retry(self.file, &err) => self.read_array_typed(path, err),
            Err(err) => Err(err),
        }
    }

    fn read_array_typed(&self, path: &str, original: Error) -> Result<Vec<T>> {
        let scope = self.file.scope();
        let ds = scope.open_dataset(self.file.hid()?, path).at(path)?;
        let tid = scope.dataset_type(ds).at(path)?;
        let stored = self.file.native().describe_type(tid).at(path)?;
        let Some((mem_type, per_element)) = array_memory_type::<T>(&stored) else {
            return Err(original);
        };
        log::debug!("'{path}': retrying scalar read as {}", mem_type.describe());
        let mem = scope.create_type(&mem_type).at(path)?;
        let extent = self.file.extent(&scope, ds, path)?;
        let count = extent.dims.iter().product::<u64>() as usize * per_element;
        let mut buf = vec![0u8; count * T::SIZE];
        self.file
            .native()
            .read_dataset(ds, mem, Hid::ALL, Hid::ALL, &mut buf)
            .at(path)?;
        Ok(from_bytes(&buf))
    }

    /// Read block number `block_number` of `block_size` elements from a
    /// 1-D dataset. The last block may be shorter.
    pub fn read_block(&self, path: &str, block_size: usize, block_number: u64) -> Result<Option<Vec<T>>> {
        self.read_block_with_offset(path, block_size as i64, block_offset(block_number, block_size))
    }

    /// Read up to `block_size` elements starting at `offset`;
    /// [`REST_OF_AXIS`] reads to the end.
    pub fn read_block_with_offset(&self, path: &str, block_size: i64, offset: u64) -> Result<Option<Vec<T>>> {
        let request = SpaceRequest::Block1D {
            offset,
            block: block_size,
        };
        Ok(self.read_request(path, &request)?.map(|(values, _)| values))
    }

    pub fn read_md_array(&self, path: &str) -> Result<MdArray<T>> {
        let (values, dims) = self
            .read_request(path, &SpaceRequest::Whole)?
            .unwrap_or_default();
        MdArray::new(&dims, values)
    }

    /// Read block `block_number` (per axis) of shape `block_dims`.
    pub fn read_md_block(&self, path: &str, block_dims: &[u64], block_number: &[u64]) -> Result<Option<MdArray<T>>> {
        let offset = md_block_offset(block_number, block_dims);
        self.read_md_block_with_offset(path, &as_block(block_dims), &offset)
    }

    /// Read an N-D block at `offset`; negative block entries read to the
    /// end of their axis.
    pub fn read_md_block_with_offset(&self, path: &str, block: &[i64], offset: &[u64]) -> Result<Option<MdArray<T>>> {
        let request = SpaceRequest::Block { offset, block };
        self.read_request(path, &request)?
            .map(|(values, dims)| MdArray::new(&dims, values))
            .transpose()
    }

    /// Read the whole slice left free by `bound`.
    pub fn read_slice(&self, path: &str, bound: &BoundIndices) -> Result<MdArray<T>> {
        let free = self.free_rank(path, bound)?;
        let offset = vec![0; free];
        let block = vec![REST_OF_AXIS; free];
        self.read_sliced_block(path, bound, &block, &offset)?
            .ok_or_else(|| Error::Incompatible {
                path: path.to_string(),
                requested: format!("slice {bound:?}"),
                found: "no elements within bounds".to_string(),
            })
    }

    /// Read a block of the free axes of a slice; `block` and `offset`
    /// cover the free axes only.
    pub fn read_sliced_block(
        &self,
        path: &str,
        bound: &BoundIndices,
        block: &[i64],
        offset: &[u64],
    ) -> Result<Option<MdArray<T>>> {
        let request = SpaceRequest::Slice { bound, offset, block };
        self.read_request(path, &request)?
            .map(|(values, dims)| MdArray::new(&dims, values))
            .transpose()
    }

    fn free_rank(&self, path: &str, bound: &BoundIndices) -> Result<usize> {
        let scope = self.file.scope();
        let ds = scope.open_dataset(self.file.hid()?, path).at(path)?;
        let rank = self.file.extent(&scope, ds, path)?.rank();
        Ok(rank.saturating_sub(bound.len()))
    }

    /// Read an N-D block at `offset` into `target` at `memory_offset`,
    /// leaving the rest of `target` untouched. Returns the block actually
    /// read, or `None` when out of bounds and tolerated.
    pub fn read_into_block(
        &self,
        path: &str,
        target: &mut MdArray<T>,
        memory_offset: &[u64],
        block: &[i64],
        offset: &[u64],
    ) -> Result<Option<Vec<u64>>> {
        let scope = self.file.scope();
        let ds = scope.open_dataset(self.file.hid()?, path).at(path)?;
        let mem = scope.create_type(&T::memory_datatype()).at(path)?;
        let request = SpaceRequest::BlockIntoBlock {
            offset,
            block,
            memory_dims: target.dims(),
            memory_offset,
        };
        let initial = to_bytes(target.data());
        let Some(read) = transfer::read(self.file, &scope, ds, mem, &request, Some(initial), path)? else {
            return Ok(None);
        };
        for (slot, value) in target.data_mut().iter_mut().zip(from_bytes::<T>(&read.bytes)) {
            *slot = value;
        }
        Ok(Some(read.plan.effective_block))
    }

    /// Iterate a 1-D dataset in blocks of its chunk size (the whole dataset
    /// for contiguous and compact layouts).
    pub fn natural_blocks(&self, path: &str) -> Result<NaturalBlocks<'f, T>> {
        let open = OpenForIteration::open(self.file, path, &T::memory_datatype())?;
        if open.dims.len() != 1 {
            return Err(Error::AtPath {
                path: path.to_string(),
                source: TypeMapError::RankMismatch {
                    expected: 1,
                    actual: open.dims.len(),
                },
            });
        }
        let blocks = NaturalBlockIndex::new(open.dims[0], open.chunk[0]);
        Ok(NaturalBlocks {
            open,
            blocks,
            _element: PhantomData,
        })
    }

    /// Iterate an N-D dataset over its chunk grid in row-major order.
    pub fn natural_md_blocks(&self, path: &str) -> Result<NaturalMdBlocks<'f, T>> {
        let open = OpenForIteration::open(self.file, path, &T::memory_datatype())?;
        let blocks = NaturalBlockGrid::new(&open.dims, &open.chunk);
        Ok(NaturalMdBlocks {
            open,
            blocks,
            _element: PhantomData,
        })
    }

    // ---- attributes ----

    /// Read an attribute of `object` (`/` for the file) as a flat array.
    pub fn read_attribute(&self, object: &str, name: &str) -> Result<Vec<T>> {
        let scope = self.file.scope();
        let obj = self.file.open_object(&scope, object)?;
        let attr = scope.open_attribute(obj, name).at(object)?;
        let sid = scope.attribute_space(attr).at(object)?;
        let count = self.file.native().space_dims(sid).at(object)?.iter().product::<u64>() as usize;
        let mem = scope.create_type(&T::memory_datatype()).at(object)?;
        let mut buf = vec![0u8; count * T::SIZE];
        match self.file.native().read_attribute(attr, mem, &mut buf).at(object) {
            Ok(()) => Ok(from_bytes(&buf)),
            Err(err) if is_array_retry(self.file, &err) => {
                let tid = scope.attribute_type(attr).at(object)?;
                let stored = self.file.native().describe_type(tid).at(object)?;
                let Some((mem_type, per_element)) = array_memory_type::<T>(&stored) else {
                    return Err(err);
                };
                log::debug!("'{object}': retrying attribute '{name}' as {}", mem_type.describe());
                let mem = scope.create_type(&mem_type).at(object)?;
                let mut buf = vec![0u8; count * per_element * T::SIZE];
                self.file.native().read_attribute(attr, mem, &mut buf).at(object)?;
                Ok(from_bytes(&buf))
            }
            Err(err) => Err(err),
        }
    }

    pub fn read_scalar_attribute(&self, object: &str, name: &str) -> Result<T> {
        let values = self.read_attribute(object, name)?;
        values.first().copied().ok_or_else(|| Error::Incompatible {
            path: format!("{object}@{name}"),
            requested: format!("one {}", T::NAME),
            found: "an empty attribute".to_string(),
        })
    }
}

// ---- natural-block iteration ----

/// A dataset kept open for the lifetime of an iteration.
struct OpenForIteration<'f> {
    file: &'f H5File,
    path: String,
    dataset: OwnedHandle<'f>,
    mem_type: OwnedHandle<'f>,
    dims: Vec<u64>,
    chunk: Vec<u64>,
}

impl<'f> OpenForIteration<'f> {
    fn open(file: &'f H5File, path: &str, mem_type: &Datatype) -> Result<Self> {
        let native = file.native();
        let dataset = OwnedHandle::new(native, Handle::Dataset(native.open_dataset(file.hid()?, path).at(path)?));
        let mem_type = OwnedHandle::new(native, Handle::Type(native.create_type(mem_type).at(path)?));
        let scope = file.scope();
        let dims = file.extent(&scope, dataset.hid(), path)?.dims;
        let layout = native.dataset_layout(dataset.hid()).at(path)?;
        let chunk = natural_block_dims(&layout, &dims);
        Ok(Self {
            file,
            path: path.to_string(),
            dataset,
            mem_type,
            dims,
            chunk,
        })
    }

    fn read(&self, scope: &CleanupScope<'_>, offset: &[u64], size: &[u64]) -> Result<Vec<u8>> {
        let block = as_block(size);
        let request = SpaceRequest::Block { offset, block: &block };
        let read = transfer::read(
            self.file,
            scope,
            self.dataset.hid(),
            self.mem_type.hid(),
            &request,
            None,
            &self.path,
        )?;
        Ok(read.map(|r| r.bytes).unwrap_or_default())
    }
}

/// Blocks of a 1-D dataset with their position.
pub struct NaturalBlocks<'f, T> {
    open: OpenForIteration<'f>,
    blocks: NaturalBlockIndex,
    _element: PhantomData<T>,
}

impl<T> NaturalBlocks<'_, T> {
    pub fn block_count(&self) -> u64 {
        self.blocks.block_count()
    }
}

impl<T: H5Element> Iterator for NaturalBlocks<'_, T> {
    type Item = Result<(Vec<T>, NaturalBlock)>;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.blocks.next()?;
        let scope = self.open.file.scope();
        Some(
            self.open
                .read(&scope, &[block.offset], &[block.size])
                .map(|bytes| (from_bytes(&bytes), block)),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.blocks.size_hint()
    }
}

/// Blocks of an N-D dataset's chunk grid with their position.
pub struct NaturalMdBlocks<'f, T> {
    open: OpenForIteration<'f>,
    blocks: NaturalBlockGrid,
    _element: PhantomData<T>,
}

impl<T: H5Element> Iterator for NaturalMdBlocks<'_, T> {
    type Item = Result<(MdArray<T>, GridBlock)>;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.blocks.next()?;
        let scope = self.open.file.scope();
        Some(
            self.open
                .read(&scope, &block.offset, &block.size)
                .and_then(|bytes| MdArray::new(&block.size, from_bytes(&bytes)))
                .map(|array| (array, block)),
        )
    }
}

// ---- writer ----

/// Writes datasets and attributes of `T` elements.
pub struct PrimitiveWriter<'f, T> {
    file: &'f H5File,
    _element: PhantomData<T>,
}

impl<'f, T: H5Element> PrimitiveWriter<'f, T> {
    pub(crate) fn new(file: &'f H5File) -> Self {
        Self {
            file,
            _element: PhantomData,
        }
    }

    fn write_whole(&self, path: &str, dims: &[u64], values: &[T], features: &StorageFeatures) -> Result<()> {
        let scope = self.file.scope();
        let ds = self
            .file
            .prepare_dataset(&scope, path, &T::datatype(), dims, features)?;
        let mem = scope.create_type(&T::memory_datatype()).at(path)?;
        self.file
            .native()
            .write_dataset(ds, mem, Hid::ALL, Hid::ALL, &to_bytes(values))
            .at(path)
    }

    fn write_request(&self, path: &str, request: &SpaceRequest<'_>, values: &[T]) -> Result<()> {
        let scope = self.file.scope();
        let ds = scope.open_dataset(self.file.hid()?, path).at(path)?;
        let mem = scope.create_type(&T::memory_datatype()).at(path)?;
        transfer::write(self.file, &scope, ds, mem, request, &to_bytes(values), path)
    }

    /// Write a scalar dataset.
    pub fn write(&self, path: &str, value: T) -> Result<()> {
        self.write_whole(path, &[], &[value], &StorageFeatures::new().contiguous())
    }

    pub fn write_array(&self, path: &str, values: &[T]) -> Result<()> {
        self.write_array_with(path, values, &StorageFeatures::default())
    }

    pub fn write_array_with(&self, path: &str, values: &[T], features: &StorageFeatures) -> Result<()> {
        self.write_whole(path, &[values.len() as u64], values, features)
    }

    /// Create a 1-D dataset of `size` zeroed elements for block writes.
    pub fn create_array(&self, path: &str, size: u64, features: &StorageFeatures) -> Result<()> {
        let scope = self.file.scope();
        self.file
            .prepare_dataset(&scope, path, &T::datatype(), &[size], features)
            .map(drop)
    }

    /// Write `values` as block number `block_number` of blocks of the same
    /// length, extending the dataset when it is extendable.
    pub fn write_block(&self, path: &str, values: &[T], block_number: u64) -> Result<()> {
        self.write_block_with_offset(path, values, block_offset(block_number, values.len()))
    }

    pub fn write_block_with_offset(&self, path: &str, values: &[T], offset: u64) -> Result<()> {
        let request = SpaceRequest::Block1D {
            offset,
            block: values.len() as i64,
        };
        self.write_request(path, &request, values)
    }

    pub fn write_md_array(&self, path: &str, array: &MdArray<T>) -> Result<()> {
        self.write_md_array_with(path, array, &StorageFeatures::default())
    }

    pub fn write_md_array_with(&self, path: &str, array: &MdArray<T>, features: &StorageFeatures) -> Result<()> {
        self.write_whole(path, array.dims(), array.data(), features)
    }

    pub fn create_md_array(&self, path: &str, dims: &[u64], features: &StorageFeatures) -> Result<()> {
        let scope = self.file.scope();
        self.file
            .prepare_dataset(&scope, path, &T::datatype(), dims, features)
            .map(drop)
    }

    /// Write `array` as block `block_number` (per axis) of blocks shaped
    /// like `array`.
    pub fn write_md_block(&self, path: &str, array: &MdArray<T>, block_number: &[u64]) -> Result<()> {
        let offset = md_block_offset(block_number, array.dims());
        self.write_md_block_with_offset(path, array, &offset)
    }

    pub fn write_md_block_with_offset(&self, path: &str, array: &MdArray<T>, offset: &[u64]) -> Result<()> {
        let block = as_block(array.dims());
        self.write_request(path, &SpaceRequest::Block { offset, block: &block }, array.data())
    }

    /// Write `array` over the free axes of a slice; `offset` covers the free
    /// axes only.
    pub fn write_sliced_block(
        &self,
        path: &str,
        array: &MdArray<T>,
        bound: &BoundIndices,
        offset: &[u64],
    ) -> Result<()> {
        let block = as_block(array.dims());
        let request = SpaceRequest::Slice {
            bound,
            offset,
            block: &block,
        };
        self.write_request(path, &request, array.data())
    }

    /// Write the `block`-shaped region of `source` at `memory_offset` to the
    /// dataset at `offset`.
    pub fn write_md_block_from(
        &self,
        path: &str,
        source: &MdArray<T>,
        memory_offset: &[u64],
        block: &[u64],
        offset: &[u64],
    ) -> Result<()> {
        let block = as_block(block);
        let request = SpaceRequest::BlockIntoBlock {
            offset,
            block: &block,
            memory_dims: source.dims(),
            memory_offset,
        };
        self.write_request(path, &request, source.data())
    }

    // ---- attributes ----

    fn write_attribute_typed(&self, object: &str, name: &str, storage: &Datatype, dims: &[u64], values: &[T]) -> Result<()> {
        let scope = self.file.scope();
        let obj = self.file.open_object(&scope, object)?;
        let native = self.file.native();
        if native.has_attribute(obj, name).at(object)? {
            native.delete_attribute(obj, name).at(object)?;
        }
        let tid = scope.create_type(storage).at(object)?;
        let sid = scope.create_space(dims, None).at(object)?;
        let attr = scope.create_attribute(obj, name, tid, sid).at(object)?;
        let mem_type = match storage {
            Datatype::Array { dimensions, .. } => Datatype::Array {
                base_type: Box::new(T::memory_datatype()),
                dimensions: dimensions.clone(),
            },
            _ => T::memory_datatype(),
        };
        let mem = scope.create_type(&mem_type).at(object)?;
        native.write_attribute(attr, mem, &to_bytes(values)).at(object)
    }

    /// Write a 1-D attribute on `object` (`/` for the file), replacing any
    /// attribute of the same name.
    pub fn write_attribute(&self, object: &str, name: &str, values: &[T]) -> Result<()> {
        self.write_attribute_typed(object, name, &T::datatype(), &[values.len() as u64], values)
    }

    pub fn write_scalar_attribute(&self, object: &str, name: &str, value: T) -> Result<()> {
        self.write_attribute_typed(object, name, &T::datatype(), &[], &[value])
    }

    /// Write `values` as a scalar attribute of array type, the older
    /// encoding of array attributes.
    pub fn write_array_typed_attribute(&self, object: &str, name: &str, values: &[T]) -> Result<()> {
        let storage = Datatype::Array {
            base_type: Box::new(T::datatype()),
            dimensions: vec![values.len() as u32],
        };
        self.write_attribute_typed(object, name, &storage, &[], values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustyhdf5_typemap::{MemoryNative, Native, StorageLayout};
    use std::rc::Rc;

    fn file() -> (Rc<MemoryNative>, H5File) {
        let native = Rc::new(MemoryNative::new());
        let file = H5File::create(native.clone(), "primitive.h5").unwrap();
        (native, file)
    }

    #[test]
    fn arrays_round_trip() {
        let (_native, file) = file();
        file.writer::<f32>().write_array("a", &[1.5, 2.5, 3.5]).unwrap();
        assert_eq!(file.reader::<f32>().read_array("a").unwrap(), vec![1.5, 2.5, 3.5]);
        file.writer::<u8>().write("s", 7).unwrap();
        assert_eq!(file.reader::<u8>().read("s").unwrap(), 7);
    }

    #[test]
    fn reads_convert_between_integer_widths() {
        let (_native, file) = file();
        file.writer::<i16>().write_array("w", &[-3, 300]).unwrap();
        assert_eq!(file.reader::<i64>().read_array("w").unwrap(), vec![-3, 300]);
    }

    #[test]
    fn scalar_read_of_array_typed_dataset_falls_back() {
        let (native, file) = file();
        {
            let scope = CleanupScope::new(&*native);
            let storage = Datatype::Array {
                base_type: Box::new(Datatype::integer(4, true)),
                dimensions: vec![3],
            };
            let tid = scope.create_type(&storage).unwrap();
            let sid = scope.create_space(&[2], None).unwrap();
            let ds = scope
                .create_dataset(file.hid().unwrap(), "legacy", tid, sid, &StorageLayout::Contiguous)
                .unwrap();
            let mem_type = Datatype::Array {
                base_type: Box::new(i32::memory_datatype()),
                dimensions: vec![3],
            };
            let mem = scope.create_type(&mem_type).unwrap();
            native
                .write_dataset(ds, mem, Hid::ALL, Hid::ALL, &to_bytes(&[1i32, 2, 3, 4, 5, 6]))
                .unwrap();
        }
        assert_eq!(file.reader::<i32>().read_array("legacy").unwrap(), vec![1, 2, 3, 4, 5, 6]);

        let strict = H5File::open(native.clone(), "primitive.h5")
            .unwrap()
            .with_reader_config(crate::ReaderConfig::new().array_fallback(false));
        let err = strict.reader::<i32>().read_array("legacy").unwrap_err();
        assert!(err.native().is_some_and(NativeError::is_conversion_path_failure));
    }

    #[test]
    fn block_into_block_keeps_the_rest_of_the_target() {
        let (_native, file) = file();
        let source = MdArray::new(&[2, 3], vec![1i32, 2, 3, 4, 5, 6]).unwrap();
        file.writer::<i32>().write_md_array("m", &source).unwrap();

        let mut target = MdArray::new(&[3, 3], vec![-1i32; 9]).unwrap();
        let got = file
            .reader::<i32>()
            .read_into_block("m", &mut target, &[1, 1], &[2, 2], &[0, 1])
            .unwrap();
        assert_eq!(got, Some(vec![2, 2]));
        assert_eq!(target.data(), &[-1, -1, -1, -1, 2, 3, -1, 5, 6]);
    }

    #[test]
    fn offsets_past_u64_are_rejected() {
        let (native, file) = file();
        let writer = file.writer::<i32>();
        writer.write_array("a", &[0; 4]).unwrap();

        let err = writer.write_block_with_offset("a", &[1, 2], u64::MAX).unwrap_err();
        assert!(matches!(err.type_map(), Some(TypeMapError::OutOfBounds { .. })), "{err}");
        let err = writer.write_block("a", &[1, 2], u64::MAX).unwrap_err();
        assert!(matches!(err.type_map(), Some(TypeMapError::OutOfBounds { .. })), "{err}");
        assert_eq!(file.reader::<i32>().read_array("a").unwrap(), vec![0; 4]);

        let mut target = MdArray::new(&[2], vec![0i32; 2]).unwrap();
        let err = file
            .reader::<i32>()
            .read_into_block("a", &mut target, &[u64::MAX], &[2], &[0])
            .unwrap_err();
        assert!(matches!(err.type_map(), Some(TypeMapError::OutOfBounds { .. })), "{err}");
        drop(file);
        assert_eq!(native.live_handles(), 0);
    }

    #[test]
    fn attributes_on_files_and_datasets() {
        let (native, file) = file();
        let writer = file.writer::<i64>();
        writer.write_array("d", &[1]).unwrap();
        writer.write_attribute("d", "range", &[0, 10]).unwrap();
        writer.write_scalar_attribute("/", "version", 3).unwrap();
        writer.write_array_typed_attribute("/", "legacy", &[4, 5, 6]).unwrap();

        let reader = file.reader::<i64>();
        assert_eq!(reader.read_attribute("d", "range").unwrap(), vec![0, 10]);
        assert_eq!(reader.read_scalar_attribute("/", "version").unwrap(), 3);
        assert_eq!(reader.read_attribute("/", "legacy").unwrap(), vec![4, 5, 6]);
        drop(file);
        assert_eq!(native.live_handles(), 0);
    }
}
