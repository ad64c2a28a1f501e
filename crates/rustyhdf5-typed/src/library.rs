//! Process-wide native library lifecycle.
//!
//! The native library is initialised once per process. [`init`] is
//! idempotent: only the first call after start-up (or after [`reset`])
//! reaches the native layer. Opening or creating a file initialises the
//! library implicitly.
//!
//! The state tracks one native library per process, not one per backend
//! value: once any backend has initialised it, [`init`] returns without
//! calling into a second backend until [`reset`] runs.

use std::sync::Mutex;

use rustyhdf5_typemap::Native;

use crate::error::Result;

#[derive(Debug, Default)]
struct LibraryState {
    initialized: bool,
    /// Number of times the native layer was actually initialised.
    generation: u64,
}

/// Init-once/reset state of a native library.
#[derive(Debug)]
pub struct Library {
    state: Mutex<LibraryState>,
}

impl Default for Library {
    fn default() -> Self {
        Self::new()
    }
}

impl Library {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(LibraryState {
                initialized: false,
                generation: 0,
            }),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut LibraryState) -> T) -> T {
        // The state is plain data and stays consistent through a poisoned lock.
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Initialise the native library through `native` unless it already is.
    pub fn init(&self, native: &dyn Native) -> Result<()> {
        self.with_state(|state| {
            if state.initialized {
                return Ok(());
            }
            native.init()?;
            state.initialized = true;
            state.generation += 1;
            log::debug!("native library initialised (generation {})", state.generation);
            Ok(())
        })
    }

    /// Release all native library state. A later [`Library::init`] starts
    /// afresh.
    pub fn reset(&self, native: &dyn Native) -> Result<()> {
        self.with_state(|state| {
            if !state.initialized {
                return Ok(());
            }
            native.reset()?;
            state.initialized = false;
            log::debug!("native library reset");
            Ok(())
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.with_state(|state| state.initialized)
    }

    /// How many times the native layer has been initialised.
    pub fn generation(&self) -> u64 {
        self.with_state(|state| state.generation)
    }
}

static LIBRARY: Library = Library::new();

/// Initialise the process-wide native library unless it already is.
pub fn init(native: &dyn Native) -> Result<()> {
    LIBRARY.init(native)
}

/// Release the process-wide native library state.
pub fn reset(native: &dyn Native) -> Result<()> {
    LIBRARY.reset(native)
}

pub fn is_initialized() -> bool {
    LIBRARY.is_initialized()
}

/// How many times the native layer has been initialised in this process.
pub fn generation() -> u64 {
    LIBRARY.generation()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustyhdf5_typemap::MemoryNative;

    #[test]
    fn init_is_idempotent_and_reset_reinitialises() {
        let library = Library::new();
        let native = MemoryNative::new();
        library.init(&native).unwrap();
        library.init(&native).unwrap();
        assert!(library.is_initialized());
        assert_eq!(library.generation(), 1);

        library.reset(&native).unwrap();
        library.reset(&native).unwrap();
        assert!(!library.is_initialized());
        library.init(&native).unwrap();
        assert_eq!(library.generation(), 2);
    }

    #[test]
    fn one_library_per_process_whatever_the_backend() {
        let library = Library::new();
        let first = MemoryNative::new();
        let second = MemoryNative::new();
        library.init(&first).unwrap();
        library.init(&second).unwrap();
        assert_eq!(library.generation(), 1);

        library.reset(&first).unwrap();
        library.init(&second).unwrap();
        assert_eq!(library.generation(), 2);
    }

    #[test]
    fn files_initialise_the_process_library() {
        let native = std::rc::Rc::new(MemoryNative::new());
        let _file = crate::H5File::create(native, "library.h5").unwrap();
        assert!(generation() >= 1);
    }
}
