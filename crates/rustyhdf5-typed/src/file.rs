//! The typed file handle.
//!
//! [`H5File`] owns one open native file together with the per-file caches:
//! committed (named) datatypes by path, and planned compound layouts by
//! host record type, mapping and stored type. A handle is driven by one
//! thread at a time; the caches are not shared between handles.

use std::any::TypeId;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::sync::Arc;

use byteorder::{ByteOrder, NativeEndian};
use rustyhdf5_typemap::{
    CleanupScope, CompoundLayout, CompoundMapping, DatasetExtent, Datatype, EnumType, H5Compound,
    H5Element, Hid, HostRecord, Native, ObjectRef, StorageLayout, TypeDescriptor, TypeMapError,
    TypeVariant, Value,
};

use crate::bitfield::BitFieldIo;
use crate::compound::{CompoundReader, CompoundWriter};
use crate::config::{ReaderConfig, StorageFeatures, WriterConfig};
use crate::enums::EnumIo;
use crate::error::{AtPath, Error, Result};
use crate::library;
use crate::primitive::{PrimitiveReader, PrimitiveWriter};
use crate::reference::ReferenceIo;
use crate::time::TimeIo;

/// Attribute holding the type variant of a dataset.
pub const TYPE_VARIANT_ATTRIBUTE: &str = "__TYPE_VARIANT__";
/// Attribute holding the per-member type variants of a compound dataset.
pub const TYPE_VARIANTS_ATTRIBUTE: &str = "__TYPE_VARIANTS__";
/// Group under which enumeration types are committed.
pub const DATA_TYPES_GROUP: &str = "/__DATA_TYPES__";

/// Path of the committed type for the enumeration called `name`.
pub fn enum_type_path(name: &str) -> String {
    format!("{DATA_TYPES_GROUP}/Enum_{name}")
}

/// Shape and type of a stored dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetInfo {
    pub datatype: Datatype,
    pub descriptor: TypeDescriptor,
    pub dims: Vec<u64>,
    pub max_dims: Option<Vec<u64>>,
    pub layout: StorageLayout,
    pub variant: TypeVariant,
}

impl DatasetInfo {
    pub fn element_count(&self) -> u64 {
        self.dims.iter().product()
    }

    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }
}

struct CachedLayout {
    record: TypeId,
    mapping: CompoundMapping,
    stored: Option<Datatype>,
    layout: Arc<CompoundLayout>,
}

/// An open HDF5 file with typed readers and writers.
pub struct H5File {
    native: Rc<dyn Native>,
    name: String,
    hid: Cell<Option<Hid>>,
    reader: ReaderConfig,
    writer: WriterConfig,
    committed: RefCell<HashMap<String, Datatype>>,
    layouts: RefCell<Vec<CachedLayout>>,
}

impl std::fmt::Debug for H5File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("H5File")
            .field("name", &self.name)
            .field("hid", &self.hid.get())
            .field("reader", &self.reader)
            .field("writer", &self.writer)
            .finish_non_exhaustive()
    }
}

impl H5File {
    fn from_hid(native: Rc<dyn Native>, name: &str, hid: Hid) -> Self {
        Self {
            native,
            name: name.to_string(),
            hid: Cell::new(Some(hid)),
            reader: ReaderConfig::default(),
            writer: WriterConfig::default(),
            committed: RefCell::new(HashMap::new()),
            layouts: RefCell::new(Vec::new()),
        }
    }

    /// Create (or truncate) a file.
    pub fn create(native: Rc<dyn Native>, name: &str) -> Result<Self> {
        library::init(&*native)?;
        let hid = native.create_file(name).at(name)?;
        log::debug!("created file '{name}'");
        Ok(Self::from_hid(native, name, hid))
    }

    /// Open an existing file.
    pub fn open(native: Rc<dyn Native>, name: &str) -> Result<Self> {
        library::init(&*native)?;
        let hid = native.open_file(name).at(name)?;
        log::debug!("opened file '{name}'");
        Ok(Self::from_hid(native, name, hid))
    }

    pub fn with_reader_config(mut self, config: ReaderConfig) -> Self {
        self.reader = config;
        self
    }

    pub fn with_writer_config(mut self, config: WriterConfig) -> Self {
        self.writer = config;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn native(&self) -> &dyn Native {
        &*self.native
    }

    pub fn reader_config(&self) -> &ReaderConfig {
        &self.reader
    }

    pub fn writer_config(&self) -> &WriterConfig {
        &self.writer
    }

    pub fn is_open(&self) -> bool {
        self.hid.get().is_some()
    }

    /// The native file handle; fails once the file is closed.
    pub fn hid(&self) -> Result<Hid> {
        self.hid.get().ok_or_else(|| Error::FileClosed(self.name.clone()))
    }

    /// Close the file. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        if let Some(hid) = self.hid.take() {
            self.committed.borrow_mut().clear();
            self.layouts.borrow_mut().clear();
            self.native.close_file(hid).at(&self.name)?;
            log::debug!("closed file '{}'", self.name);
        }
        Ok(())
    }

    pub(crate) fn scope(&self) -> CleanupScope<'_> {
        CleanupScope::new(self.native())
    }

    // ---- typed accessors ----

    pub fn reader<T: H5Element>(&self) -> PrimitiveReader<'_, T> {
        PrimitiveReader::new(self)
    }

    pub fn writer<T: H5Element>(&self) -> PrimitiveWriter<'_, T> {
        PrimitiveWriter::new(self)
    }

    /// Reader for records that declare their own mapping.
    pub fn compound_reader<R: H5Compound + 'static>(&self) -> Result<CompoundReader<'_, R>> {
        CompoundReader::declared(self)
    }

    pub fn compound_reader_with<R: HostRecord + 'static>(&self, mapping: CompoundMapping) -> CompoundReader<'_, R> {
        CompoundReader::with_mapping(self, mapping)
    }

    /// Reader taking every member of the stored compound type, with type
    /// variants restored from the dataset's attributes.
    pub fn map_reader(&self) -> CompoundReader<'_, BTreeMap<String, Value>> {
        CompoundReader::from_stored(self)
    }

    /// Writer for records that declare their own mapping.
    pub fn compound_writer<R: H5Compound + 'static>(&self) -> Result<CompoundWriter<'_, R>> {
        CompoundWriter::declared(self)
    }

    pub fn compound_writer_with<R: HostRecord + 'static>(&self, mapping: CompoundMapping) -> CompoundWriter<'_, R> {
        CompoundWriter::with_mapping(self, mapping)
    }

    /// Writer inferring the mapping from the first record written.
    pub fn map_writer(&self) -> CompoundWriter<'_, BTreeMap<String, Value>> {
        CompoundWriter::from_template(self)
    }

    pub fn enums(&self) -> EnumIo<'_> {
        EnumIo::new(self)
    }

    pub fn bitfields(&self) -> BitFieldIo<'_> {
        BitFieldIo::new(self)
    }

    pub fn references(&self) -> ReferenceIo<'_> {
        ReferenceIo::new(self)
    }

    pub fn times(&self) -> TimeIo<'_> {
        TimeIo::new(self)
    }

    // ---- objects ----

    pub fn exists(&self, path: &str) -> Result<bool> {
        self.native.exists(self.hid()?, path).at(path)
    }

    /// Delete a dataset, committed type or group with everything below it.
    pub fn delete(&self, path: &str) -> Result<()> {
        self.native.delete(self.hid()?, path).at(path)?;
        let prefix = format!("{}/", path.trim_end_matches('/'));
        self.committed
            .borrow_mut()
            .retain(|p, _| p != path && !p.starts_with(&prefix));
        Ok(())
    }

    pub fn dataset_info(&self, path: &str) -> Result<DatasetInfo> {
        let scope = self.scope();
        let ds = scope.open_dataset(self.hid()?, path).at(path)?;
        let tid = scope.dataset_type(ds).at(path)?;
        let datatype = self.native.describe_type(tid).at(path)?;
        let descriptor = TypeDescriptor::from_native(self.native(), tid).at(path)?;
        let extent = self.extent(&scope, ds, path)?;
        let layout = self.native.dataset_layout(ds).at(path)?;
        let variant = self.read_type_variant(ds, path)?;
        Ok(DatasetInfo {
            datatype,
            descriptor,
            dims: extent.dims,
            max_dims: extent.max_dims,
            layout,
            variant,
        })
    }

    /// The file itself for `/`, otherwise the dataset at `path`.
    pub(crate) fn open_object(&self, scope: &CleanupScope<'_>, path: &str) -> Result<Hid> {
        if path.trim_matches('/').is_empty() {
            return self.hid();
        }
        scope.open_dataset(self.hid()?, path).at(path)
    }

    pub(crate) fn extent(&self, scope: &CleanupScope<'_>, ds: Hid, path: &str) -> Result<DatasetExtent> {
        let sid = scope.dataset_space(ds).at(path)?;
        Ok(DatasetExtent {
            dims: self.native.space_dims(sid).at(path)?,
            max_dims: self.native.space_max_dims(sid).at(path)?,
        })
    }

    /// Open the dataset at `path` for writing `dims` elements of `storage`,
    /// creating it when needed.
    ///
    /// An existing dataset is written into when its type matches and its
    /// extent either matches or can be changed; otherwise, or when the
    /// writer overwrites, it is replaced.
    pub(crate) fn prepare_dataset(
        &self,
        scope: &CleanupScope<'_>,
        path: &str,
        storage: &Datatype,
        dims: &[u64],
        features: &StorageFeatures,
    ) -> Result<Hid> {
        let file = self.hid()?;
        if self.native.exists(file, path).at(path)? {
            if !self.writer.overwrite {
                if let Some(ds) = self.reuse_dataset(scope, path, storage, dims)? {
                    return Ok(ds);
                }
            }
            log::debug!("replacing dataset '{path}'");
            self.native.delete(file, path).at(path)?;
        }
        let (layout, max_dims) = features.resolve(dims, &self.writer);
        let tid = scope.create_type(storage).at(path)?;
        let sid = scope.create_space(dims, max_dims.as_deref()).at(path)?;
        scope.create_dataset(file, path, tid, sid, &layout).at(path)
    }

    fn reuse_dataset(
        &self,
        scope: &CleanupScope<'_>,
        path: &str,
        storage: &Datatype,
        dims: &[u64],
    ) -> Result<Option<Hid>> {
        let ds = scope.open_dataset(self.hid()?, path).at(path)?;
        let tid = scope.dataset_type(ds).at(path)?;
        if self.native.describe_type(tid).at(path)? != *storage {
            return Ok(None);
        }
        let extent = self.extent(scope, ds, path)?;
        if extent.dims == dims {
            return Ok(Some(ds));
        }
        if extent.max_dims.is_some() && extent.rank() == dims.len() {
            self.native.extend_dataset(ds, dims).at(path)?;
            return Ok(Some(ds));
        }
        Ok(None)
    }

    // ---- type variants ----

    /// The type variant recorded for the dataset at `path`.
    pub fn type_variant(&self, path: &str) -> Result<TypeVariant> {
        let scope = self.scope();
        let ds = scope.open_dataset(self.hid()?, path).at(path)?;
        self.read_type_variant(ds, path)
    }

    pub(crate) fn read_type_variant(&self, ds: Hid, path: &str) -> Result<TypeVariant> {
        let ordinals = self.read_u16_attribute(ds, TYPE_VARIANT_ATTRIBUTE, path)?;
        match ordinals.as_deref() {
            None | Some([]) => Ok(TypeVariant::None),
            Some([ordinal, ..]) => variant_from_ordinal(*ordinal, path),
        }
    }

    pub(crate) fn write_type_variant(&self, ds: Hid, variant: TypeVariant, path: &str) -> Result<()> {
        if !self.writer.type_variant_attributes {
            return Ok(());
        }
        self.write_u16_attribute(ds, TYPE_VARIANT_ATTRIBUTE, &[variant.ordinal()], true, path)
    }

    /// Per-member type variants of a compound dataset; empty when none
    /// were recorded.
    pub(crate) fn read_member_variants(&self, ds: Hid, path: &str) -> Result<Vec<TypeVariant>> {
        match self.read_u16_attribute(ds, TYPE_VARIANTS_ATTRIBUTE, path)? {
            None => Ok(Vec::new()),
            Some(ordinals) => ordinals
                .into_iter()
                .map(|o| variant_from_ordinal(o, path))
                .collect(),
        }
    }

    pub(crate) fn write_member_variants(&self, ds: Hid, variants: &[TypeVariant], path: &str) -> Result<()> {
        if !self.writer.type_variant_attributes || variants.iter().all(|v| v.is_none()) {
            return Ok(());
        }
        let ordinals: Vec<u16> = variants.iter().map(|v| v.ordinal()).collect();
        self.write_u16_attribute(ds, TYPE_VARIANTS_ATTRIBUTE, &ordinals, false, path)
    }

    fn read_u16_attribute(&self, obj: Hid, name: &str, path: &str) -> Result<Option<Vec<u16>>> {
        if !self.native.has_attribute(obj, name).at(path)? {
            return Ok(None);
        }
        let scope = self.scope();
        let attr = scope.open_attribute(obj, name).at(path)?;
        let sid = scope.attribute_space(attr).at(path)?;
        let count = self.native.space_dims(sid).at(path)?.iter().product::<u64>() as usize;
        let mem = scope
            .create_type(&<u16 as H5Element>::memory_datatype())
            .at(path)?;
        let mut buf = vec![0u8; count * 2];
        self.native.read_attribute(attr, mem, &mut buf).at(path)?;
        let mut values = vec![0u16; count];
        NativeEndian::read_u16_into(&buf, &mut values);
        Ok(Some(values))
    }

    fn write_u16_attribute(&self, obj: Hid, name: &str, values: &[u16], scalar: bool, path: &str) -> Result<()> {
        if self.native.has_attribute(obj, name).at(path)? {
            self.native.delete_attribute(obj, name).at(path)?;
        }
        let scope = self.scope();
        let tid = scope
            .create_type(&<u16 as H5Element>::datatype())
            .at(path)?;
        let dims: Vec<u64> = if scalar { Vec::new() } else { vec![values.len() as u64] };
        let sid = scope.create_space(&dims, None).at(path)?;
        let attr = scope.create_attribute(obj, name, tid, sid).at(path)?;
        let mem = scope
            .create_type(&<u16 as H5Element>::memory_datatype())
            .at(path)?;
        let mut buf = vec![0u8; values.len() * 2];
        NativeEndian::write_u16_into(values, &mut buf);
        self.native.write_attribute(attr, mem, &buf).at(path)
    }

    // ---- committed types ----

    /// Commit `datatype` under `path` and remember it.
    pub fn commit_type(&self, path: &str, datatype: &Datatype) -> Result<()> {
        let scope = self.scope();
        let tid = scope.create_type(datatype).at(path)?;
        self.native.commit_type(self.hid()?, path, tid).at(path)?;
        self.committed
            .borrow_mut()
            .insert(path.to_string(), datatype.clone());
        Ok(())
    }

    /// The committed type at `path`, from the cache or the file.
    pub fn committed_type(&self, path: &str) -> Result<Datatype> {
        if let Some(dt) = self.committed.borrow().get(path) {
            return Ok(dt.clone());
        }
        let scope = self.scope();
        let tid = scope.open_committed_type(self.hid()?, path).at(path)?;
        let datatype = self.native.describe_type(tid).at(path)?;
        self.committed
            .borrow_mut()
            .insert(path.to_string(), datatype.clone());
        Ok(datatype)
    }

    /// The storage type of `enum_type`, committing it on first use.
    ///
    /// A committed type of the same name with different values is an
    /// incompatibility.
    pub fn commit_enum(&self, enum_type: &EnumType) -> Result<Datatype> {
        let path = enum_type_path(&enum_type.name);
        let wanted = enum_type.datatype();
        if self.exists(&path)? {
            let found = self.committed_type(&path)?;
            if found.enum_names() != wanted.enum_names() {
                return Err(Error::Incompatible {
                    path,
                    requested: wanted.describe(),
                    found: found.describe(),
                });
            }
            return Ok(found);
        }
        log::debug!("committing enumeration type '{}'", enum_type.name);
        self.commit_type(&path, &wanted)?;
        Ok(wanted)
    }

    /// Name of a known committed type under `group` equal to `datatype`,
    /// with `prefix` stripped from its final path segment.
    pub(crate) fn committed_name(&self, datatype: &Datatype, group: &str, prefix: &str) -> Option<String> {
        let committed = self.committed.borrow();
        let mut names: Vec<&str> = committed
            .iter()
            .filter(|(_, dt)| *dt == datatype)
            .filter_map(|(path, _)| path.strip_prefix(group)?.strip_prefix('/')?.strip_prefix(prefix))
            .collect();
        names.sort_unstable();
        names.first().map(|name| name.to_string())
    }

    // ---- references ----

    /// Object reference to the object at `path`.
    pub fn reference(&self, path: &str) -> Result<ObjectRef> {
        self.native
            .object_reference(self.hid()?, path)
            .map(ObjectRef)
            .at(path)
    }

    /// Path of the object `reference` points to.
    pub fn resolve(&self, reference: ObjectRef) -> Result<String> {
        self.native
            .dereference(self.hid()?, reference.address())
            .at(&self.name)
    }

    // ---- compound layouts ----

    /// Planned layout for records of type `R`, cached per mapping and
    /// stored type.
    pub(crate) fn layout<R: HostRecord + 'static>(
        &self,
        mapping: &CompoundMapping,
        stored: Option<&Datatype>,
    ) -> std::result::Result<Arc<CompoundLayout>, TypeMapError> {
        let record = TypeId::of::<R>();
        if let Some(hit) = self
            .layouts
            .borrow()
            .iter()
            .find(|c| c.record == record && c.mapping == *mapping && c.stored.as_ref() == stored)
        {
            return Ok(Arc::clone(&hit.layout));
        }
        log::debug!(
            "planning compound layout for {} ({} members)",
            std::any::type_name::<R>(),
            mapping.len()
        );
        let layout = Arc::new(CompoundLayout::plan::<R>(mapping, stored)?);
        self.layouts.borrow_mut().push(CachedLayout {
            record,
            mapping: mapping.clone(),
            stored: stored.cloned(),
            layout: Arc::clone(&layout),
        });
        Ok(layout)
    }

    pub(crate) fn cached_layouts(&self) -> usize {
        self.layouts.borrow().len()
    }
}

fn variant_from_ordinal(ordinal: u16, path: &str) -> Result<TypeVariant> {
    TypeVariant::from_ordinal(ordinal).ok_or_else(|| {
        Error::AtPath {
            path: path.to_string(),
            source: TypeMapError::ValueOutOfRange {
                target: "type variant".to_string(),
                value: ordinal.to_string(),
            },
        }
    })
}

impl Drop for H5File {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("failed to close file '{}': {e}", self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustyhdf5_typemap::{MemoryNative, TimeUnit};

    fn file() -> (Rc<MemoryNative>, H5File) {
        let native = Rc::new(MemoryNative::new());
        let file = H5File::create(native.clone(), "file.h5").unwrap();
        (native, file)
    }

    #[test]
    fn closing_releases_the_file_handle() {
        let (native, file) = file();
        file.close().unwrap();
        file.close().unwrap();
        assert!(matches!(file.exists("/x"), Err(Error::FileClosed(_))));
        assert_eq!(native.live_handles(), 0);
    }

    #[test]
    fn drop_closes() {
        let (native, file) = file();
        drop(file);
        assert_eq!(native.live_handles(), 0);
        assert!(H5File::open(native.clone(), "file.h5").is_ok());
    }

    #[test]
    fn enum_types_are_committed_once() {
        let (native, file) = file();
        let colours = EnumType::new("Colour", &["RED", "GREEN"]);
        let first = file.commit_enum(&colours).unwrap();
        let again = file.commit_enum(&colours).unwrap();
        assert_eq!(first, again);
        assert!(file.exists(&enum_type_path("Colour")).unwrap());

        let clash = EnumType::new("Colour", &["CYAN"]);
        assert!(matches!(file.commit_enum(&clash), Err(Error::Incompatible { .. })));
        drop(file);
        assert_eq!(native.live_handles(), 0);
    }

    #[test]
    fn type_variants_round_trip_on_datasets() {
        let (native, file) = file();
        file.writer::<i64>().write_array("t", &[1, 2]).unwrap();
        assert_eq!(file.type_variant("t").unwrap(), TypeVariant::None);
        {
            let scope = file.scope();
            let ds = scope.open_dataset(file.hid().unwrap(), "t").unwrap();
            let variant = TypeVariant::Duration(TimeUnit::Hours);
            file.write_type_variant(ds, variant, "t").unwrap();
            file.write_type_variant(ds, variant, "t").unwrap();
        }
        let info = file.dataset_info("t").unwrap();
        assert_eq!(info.variant, TypeVariant::Duration(TimeUnit::Hours));
        assert_eq!(info.dims, vec![2]);
        drop(file);
        assert_eq!(native.live_handles(), 0);
    }

    #[test]
    fn delete_forgets_committed_types() {
        let (_native, file) = file();
        file.commit_type("/types/id", &Datatype::integer(4, false)).unwrap();
        assert_eq!(file.committed_type("/types/id").unwrap(), Datatype::integer(4, false));
        file.delete("/types").unwrap();
        assert!(file.committed_type("/types/id").is_err());
    }
}
