//! Object reference datasets and attributes.
//!
//! References are written from object paths and read back either as the
//! paths they resolve to or as raw [`ObjectRef`] values.

use byteorder::{ByteOrder, NativeEndian};
use rustyhdf5_typemap::{Datatype, Hid, ObjectRef, SpaceRequest};

use crate::config::StorageFeatures;
use crate::error::{AtPath, Error, Result};
use crate::file::H5File;
use crate::transfer;

fn encode(refs: &[ObjectRef]) -> Vec<u8> {
    let addresses: Vec<u64> = refs.iter().map(|r| r.address()).collect();
    let mut bytes = vec![0u8; addresses.len() * 8];
    NativeEndian::write_u64_into(&addresses, &mut bytes);
    bytes
}

fn decode(bytes: &[u8]) -> Vec<ObjectRef> {
    bytes.chunks_exact(8).map(|b| ObjectRef(NativeEndian::read_u64(b))).collect()
}

/// Reads and writes object references.
pub struct ReferenceIo<'f> {
    file: &'f H5File,
}

impl<'f> ReferenceIo<'f> {
    pub(crate) fn new(file: &'f H5File) -> Self {
        Self { file }
    }

    fn references_to<S: AsRef<str>>(&self, targets: &[S]) -> Result<Vec<ObjectRef>> {
        targets.iter().map(|t| self.file.reference(t.as_ref())).collect()
    }

    fn resolve_all(&self, refs: Vec<ObjectRef>, path: &str) -> Result<Vec<String>> {
        refs.into_iter()
            .map(|r| {
                if r.is_null() {
                    return Err(Error::Incompatible {
                        path: path.to_string(),
                        requested: "an object reference".to_string(),
                        found: "a null reference".to_string(),
                    });
                }
                self.file.resolve(r)
            })
            .collect()
    }

    fn write_refs_with(&self, path: &str, dims: &[u64], refs: &[ObjectRef], features: &StorageFeatures) -> Result<()> {
        let scope = self.file.scope();
        let storage = Datatype::object_reference();
        let ds = self.file.prepare_dataset(&scope, path, &storage, dims, features)?;
        let mem = scope.create_type(&storage).at(path)?;
        self.file
            .native()
            .write_dataset(ds, mem, Hid::ALL, Hid::ALL, &encode(refs))
            .at(path)
    }

    /// Write a scalar reference to the object at `target`.
    pub fn write(&self, path: &str, target: &str) -> Result<()> {
        let refs = self.references_to(&[target])?;
        self.write_refs_with(path, &[], &refs, &StorageFeatures::new().contiguous())
    }

    pub fn write_array<S: AsRef<str>>(&self, path: &str, targets: &[S]) -> Result<()> {
        let refs = self.references_to(targets)?;
        self.write_refs(path, &refs)
    }

    pub fn write_refs(&self, path: &str, refs: &[ObjectRef]) -> Result<()> {
        self.write_refs_with(path, &[refs.len() as u64], refs, &StorageFeatures::default())
    }

    pub fn read_refs(&self, path: &str) -> Result<Vec<ObjectRef>> {
        let scope = self.file.scope();
        let ds = scope.open_dataset(self.file.hid()?, path).at(path)?;
        let mem = scope.create_type(&Datatype::object_reference()).at(path)?;
        let read = transfer::read(self.file, &scope, ds, mem, &SpaceRequest::Whole, None, path)?;
        Ok(read.map(|r| decode(&r.bytes)).unwrap_or_default())
    }

    /// Paths of the objects the dataset refers to.
    pub fn read_array(&self, path: &str) -> Result<Vec<String>> {
        let refs = self.read_refs(path)?;
        self.resolve_all(refs, path)
    }

    pub fn read(&self, path: &str) -> Result<String> {
        self.read_array(path)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Incompatible {
                path: path.to_string(),
                requested: "one object reference".to_string(),
                found: "an empty dataset".to_string(),
            })
    }

    /// Attach a reference to `target` as attribute `name` of `object`.
    pub fn write_attribute(&self, object: &str, name: &str, target: &str) -> Result<()> {
        let refs = self.references_to(&[target])?;
        let scope = self.file.scope();
        let obj = self.file.open_object(&scope, object)?;
        let native = self.file.native();
        if native.has_attribute(obj, name).at(object)? {
            native.delete_attribute(obj, name).at(object)?;
        }
        let tid = scope.create_type(&Datatype::object_reference()).at(object)?;
        let sid = scope.create_space(&[], None).at(object)?;
        let attr = scope.create_attribute(obj, name, tid, sid).at(object)?;
        native.write_attribute(attr, tid, &encode(&refs)).at(object)
    }

    pub fn read_attribute(&self, object: &str, name: &str) -> Result<String> {
        let scope = self.file.scope();
        let obj = self.file.open_object(&scope, object)?;
        let attr = scope.open_attribute(obj, name).at(object)?;
        let mem = scope.create_type(&Datatype::object_reference()).at(object)?;
        let mut buf = [0u8; 8];
        self.file.native().read_attribute(attr, mem, &mut buf).at(object)?;
        let path = format!("{object}@{name}");
        self.resolve_all(decode(&buf), &path)?
            .pop()
            .ok_or(Error::Incompatible {
                path,
                requested: "one object reference".to_string(),
                found: "an empty attribute".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustyhdf5_typemap::MemoryNative;
    use std::rc::Rc;

    #[test]
    fn references_resolve_to_their_targets() {
        let native = Rc::new(MemoryNative::new());
        let file = H5File::create(native.clone(), "refs.h5").unwrap();
        file.writer::<i32>().write_array("/a", &[1]).unwrap();
        file.writer::<i32>().write_array("/b", &[2]).unwrap();

        file.references().write_array("/links", &["/b", "/a"]).unwrap();
        assert_eq!(file.references().read_array("/links").unwrap(), vec!["/b", "/a"]);
        let refs = file.references().read_refs("/links").unwrap();
        assert_eq!(refs[0], file.reference("/b").unwrap());

        file.references().write("/one", "/a").unwrap();
        assert_eq!(file.references().read("/one").unwrap(), "/a");

        file.references().write_attribute("/a", "partner", "/b").unwrap();
        assert_eq!(file.references().read_attribute("/a", "partner").unwrap(), "/b");
        drop(file);
        assert_eq!(native.live_handles(), 0);
    }

    #[test]
    fn null_references_do_not_resolve() {
        let native = Rc::new(MemoryNative::new());
        let file = H5File::create(native, "refs.h5").unwrap();
        file.references().write_refs("/nulls", &[ObjectRef(0)]).unwrap();
        assert!(matches!(file.references().read_array("/nulls"), Err(Error::Incompatible { .. })));
        assert!(file.references().write("/x", "/missing").is_err());
    }
}
