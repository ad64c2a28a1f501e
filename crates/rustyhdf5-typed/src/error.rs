//! Error types for the typed reader/writer API.

use rustyhdf5_typemap::{NativeError, TypeMapError, TypeVariant};

/// Errors produced by the typed facades.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// A failure from the type-mapping core or the native layer.
    #[error(transparent)]
    TypeMap(#[from] TypeMapError),

    /// A core failure attributed to the object it happened on.
    #[error("'{path}': {source}")]
    AtPath {
        path: String,
        #[source]
        source: TypeMapError,
    },

    /// The file handle was closed.
    #[error("file '{0}' is closed")]
    FileClosed(String),

    /// The stored type cannot be represented by the requested host type.
    #[error("'{path}' stores {found}, which cannot be read as {requested}")]
    Incompatible {
        path: String,
        requested: String,
        found: String,
    },

    /// The stored type variant is not the one the reader expects.
    #[error("'{path}' has type variant {found:?}, expected {expected:?}")]
    WrongTypeVariant {
        path: String,
        expected: TypeVariant,
        found: TypeVariant,
    },
}

impl Error {
    /// The core error behind this error, if any.
    pub fn type_map(&self) -> Option<&TypeMapError> {
        match self {
            Error::TypeMap(e) | Error::AtPath { source: e, .. } => Some(e),
            _ => None,
        }
    }

    /// The native error code pair behind this error, if any.
    pub fn native(&self) -> Option<&NativeError> {
        self.type_map().and_then(TypeMapError::native)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Attach an object path to core errors.
pub(crate) trait AtPath<T> {
    fn at(self, path: &str) -> Result<T>;
}

impl<T> AtPath<T> for std::result::Result<T, TypeMapError> {
    fn at(self, path: &str) -> Result<T> {
        self.map_err(|source| Error::AtPath {
            path: path.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustyhdf5_typemap::{ErrorMajor, ErrorMinor};

    #[test]
    fn path_is_part_of_the_message() {
        let err: Result<()> = Err(TypeMapError::RankMismatch {
            expected: 2,
            actual: 1,
        })
        .at("/grid");
        let msg = err.unwrap_err().to_string();
        assert!(msg.starts_with("'/grid': rank mismatch"), "{msg}");
    }

    #[test]
    fn native_code_pair_is_reachable() {
        let native = NativeError::new(ErrorMajor::Dataset, ErrorMinor::NotFound, "gone");
        let err: Result<()> = Err(TypeMapError::from(native.clone())).at("/x");
        let err = err.unwrap_err();
        assert_eq!(err.native(), Some(&native));
        assert_eq!(Error::FileClosed("f".into()).native(), None);
    }
}
