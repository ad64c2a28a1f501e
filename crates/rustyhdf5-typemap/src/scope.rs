//! Scoped release of native handles.
//!
//! Every transient native handle is registered with a [`CleanupScope`] at
//! the moment it is acquired. When the scope is dropped (normal return,
//! `?` early return or unwinding) the registered releases run exactly once,
//! in reverse order of registration. Release failures are logged and never
//! replace the error that is already propagating.

use std::cell::RefCell;

use crate::datatype::Datatype;
use crate::error::Result;
use crate::native::{Hid, Native, StorageLayout};

/// Kind of a native handle, which determines how it is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handle {
    File(Hid),
    Type(Hid),
    Space(Hid),
    Dataset(Hid),
    Attribute(Hid),
}

impl Handle {
    pub fn hid(self) -> Hid {
        match self {
            Handle::File(h)
            | Handle::Type(h)
            | Handle::Space(h)
            | Handle::Dataset(h)
            | Handle::Attribute(h) => h,
        }
    }

    /// Release this handle through the native layer.
    pub fn release(self, native: &dyn Native) -> Result<()> {
        match self {
            Handle::File(h) => native.close_file(h),
            Handle::Type(h) => native.close_type(h),
            Handle::Space(h) => native.close_space(h),
            Handle::Dataset(h) => native.close_dataset(h),
            Handle::Attribute(h) => native.close_attribute(h),
        }
    }
}

type Action<'n> = Box<dyn FnOnce(&dyn Native) -> Result<()> + 'n>;

enum Cleanup<'n> {
    Release(Handle),
    Run(&'static str, Action<'n>),
}

/// A clean-up registry tied to the lifetime of one operation.
pub struct CleanupScope<'n> {
    native: &'n dyn Native,
    entries: RefCell<Vec<Cleanup<'n>>>,
}

impl<'n> CleanupScope<'n> {
    pub fn new(native: &'n dyn Native) -> Self {
        Self {
            native,
            entries: RefCell::new(Vec::new()),
        }
    }

    pub fn native(&self) -> &'n dyn Native {
        self.native
    }

    /// Register an already-acquired handle; returns its id for chaining.
    pub fn register(&self, handle: Handle) -> Hid {
        self.entries.borrow_mut().push(Cleanup::Release(handle));
        handle.hid()
    }

    /// Register an arbitrary release action, run with the other releases.
    pub fn defer<F>(&self, what: &'static str, action: F)
    where
        F: FnOnce(&dyn Native) -> Result<()> + 'n,
    {
        self.entries
            .borrow_mut()
            .push(Cleanup::Run(what, Box::new(action)));
    }

    /// Number of releases still pending.
    pub fn pending(&self) -> usize {
        self.entries.borrow().len()
    }

    // ---- acquire-and-register helpers ----

    pub fn create_type(&self, datatype: &Datatype) -> Result<Hid> {
        let tid = self.native.create_type(datatype)?;
        Ok(self.register(Handle::Type(tid)))
    }

    pub fn open_committed_type(&self, file: Hid, path: &str) -> Result<Hid> {
        let tid = self.native.open_committed_type(file, path)?;
        Ok(self.register(Handle::Type(tid)))
    }

    pub fn create_space(&self, dims: &[u64], max_dims: Option<&[u64]>) -> Result<Hid> {
        let sid = self.native.create_space(dims, max_dims)?;
        Ok(self.register(Handle::Space(sid)))
    }

    pub fn open_dataset(&self, file: Hid, path: &str) -> Result<Hid> {
        let ds = self.native.open_dataset(file, path)?;
        Ok(self.register(Handle::Dataset(ds)))
    }

    pub fn create_dataset(
        &self,
        file: Hid,
        path: &str,
        tid: Hid,
        sid: Hid,
        layout: &StorageLayout,
    ) -> Result<Hid> {
        let ds = self.native.create_dataset(file, path, tid, sid, layout)?;
        Ok(self.register(Handle::Dataset(ds)))
    }

    pub fn dataset_type(&self, ds: Hid) -> Result<Hid> {
        let tid = self.native.dataset_type(ds)?;
        Ok(self.register(Handle::Type(tid)))
    }

    pub fn dataset_space(&self, ds: Hid) -> Result<Hid> {
        let sid = self.native.dataset_space(ds)?;
        Ok(self.register(Handle::Space(sid)))
    }

    pub fn create_attribute(&self, obj: Hid, name: &str, tid: Hid, sid: Hid) -> Result<Hid> {
        let aid = self.native.create_attribute(obj, name, tid, sid)?;
        Ok(self.register(Handle::Attribute(aid)))
    }

    pub fn open_attribute(&self, obj: Hid, name: &str) -> Result<Hid> {
        let aid = self.native.open_attribute(obj, name)?;
        Ok(self.register(Handle::Attribute(aid)))
    }

    pub fn attribute_type(&self, attr: Hid) -> Result<Hid> {
        let tid = self.native.attribute_type(attr)?;
        Ok(self.register(Handle::Type(tid)))
    }

    pub fn attribute_space(&self, attr: Hid) -> Result<Hid> {
        let sid = self.native.attribute_space(attr)?;
        Ok(self.register(Handle::Space(sid)))
    }

    fn run_all(&self) {
        let entries = std::mem::take(&mut *self.entries.borrow_mut());
        for entry in entries.into_iter().rev() {
            match entry {
                Cleanup::Release(handle) => {
                    if let Err(e) = handle.release(self.native) {
                        log::warn!("failed to release {handle:?}: {e}");
                    }
                }
                Cleanup::Run(what, action) => {
                    if let Err(e) = action(self.native) {
                        log::warn!("clean-up action '{what}' failed: {e}");
                    }
                }
            }
        }
    }
}

impl Drop for CleanupScope<'_> {
    fn drop(&mut self) {
        self.run_all();
    }
}

/// A single native handle that outlives one operation, released on drop.
///
/// Used where a handle must stay open across calls, e.g. for the dataset
/// behind a natural-block iteration.
pub struct OwnedHandle<'n> {
    native: &'n dyn Native,
    handle: Option<Handle>,
}

impl<'n> OwnedHandle<'n> {
    pub fn new(native: &'n dyn Native, handle: Handle) -> Self {
        Self {
            native,
            handle: Some(handle),
        }
    }

    pub fn hid(&self) -> Hid {
        self.handle.map(Handle::hid).unwrap_or(Hid::ALL)
    }

    /// Release now, surfacing the release error to the caller.
    pub fn close(mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => handle.release(self.native),
            None => Ok(()),
        }
    }
}

impl Drop for OwnedHandle<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.release(self.native) {
                log::warn!("failed to release {handle:?}: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryNative;
    use std::cell::RefCell;

    #[test]
    fn releases_run_on_drop() {
        let native = MemoryNative::new();
        {
            let scope = CleanupScope::new(&native);
            scope.create_space(&[4], None).unwrap();
            scope.create_type(&Datatype::integer(4, true)).unwrap();
            assert_eq!(native.live_handles(), 2);
            assert_eq!(scope.pending(), 2);
        }
        assert_eq!(native.live_handles(), 0);
    }

    #[test]
    fn releases_run_in_reverse_order() {
        let native = MemoryNative::new();
        let order = RefCell::new(Vec::new());
        {
            let scope = CleanupScope::new(&native);
            scope.defer("first", |_| {
                order.borrow_mut().push(1);
                Ok(())
            });
            scope.defer("second", |_| {
                order.borrow_mut().push(2);
                Ok(())
            });
        }
        assert_eq!(*order.borrow(), vec![2, 1]);
    }

    #[test]
    fn releases_run_when_operation_fails() {
        let native = MemoryNative::new();
        let op = |native: &MemoryNative| -> Result<()> {
            let scope = CleanupScope::new(native);
            scope.create_space(&[2, 2], None)?;
            scope.open_dataset(Hid::new(9999), "missing")?;
            Ok(())
        };
        assert!(op(&native).is_err());
        assert_eq!(native.live_handles(), 0);
    }

    #[test]
    fn failing_release_does_not_stop_the_rest() {
        let native = MemoryNative::new();
        {
            let scope = CleanupScope::new(&native);
            scope.create_space(&[1], None).unwrap();
            scope.register(Handle::Type(Hid::new(424242)));
        }
        assert_eq!(native.live_handles(), 0);
    }

    #[test]
    fn owned_handle_closes_once() {
        let native = MemoryNative::new();
        let sid = native.create_space(&[3], None).unwrap();
        let owned = OwnedHandle::new(&native, Handle::Space(sid));
        assert_eq!(owned.hid(), sid);
        owned.close().unwrap();
        assert_eq!(native.live_handles(), 0);
    }
}
