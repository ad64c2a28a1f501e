//! Error types for type mapping, layout planning and selection planning.

/// Major error class reported by the native layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorMajor {
    Args,
    Attribute,
    Dataset,
    Dataspace,
    Datatype,
    File,
    Link,
    Reference,
    Resource,
    Storage,
}

/// Minor error detail reported by the native layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorMinor {
    BadValue,
    BadRange,
    BadSelect,
    CantInit,
    CantConvert,
    CantExtend,
    CantOpenObj,
    CantRelease,
    Closed,
    Exists,
    NotFound,
    Unsupported,
}

/// A failure raised by the native call surface, with its major/minor code pair.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("native error [{major:?}/{minor:?}]: {message}")]
pub struct NativeError {
    pub major: ErrorMajor,
    pub minor: ErrorMinor,
    pub message: String,
}

impl NativeError {
    pub fn new(major: ErrorMajor, minor: ErrorMinor, message: impl Into<String>) -> Self {
        Self {
            major,
            minor,
            message: message.into(),
        }
    }

    /// `DATATYPE/CANTINIT`: no conversion path between memory and storage type.
    ///
    /// This exact pair is the trigger for re-reading a scalar-shaped buffer
    /// as an array type.
    pub fn is_conversion_path_failure(&self) -> bool {
        self.major == ErrorMajor::Datatype && self.minor == ErrorMinor::CantInit
    }
}

/// Errors produced by the type-mapping core.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TypeMapError {
    #[error("invalid {what} length {length}: must be positive")]
    InvalidLength { what: &'static str, length: i64 },

    #[error("rank mismatch: expected {expected} dimensions, got {actual}")]
    RankMismatch { expected: usize, actual: usize },

    #[error(
        "out of bounds on axis {axis}: requested offset {offset} with block {block}, \
         but the {what} size is {size}"
    )]
    OutOfBounds {
        what: &'static str,
        axis: usize,
        offset: u64,
        block: u64,
        size: u64,
    },

    #[error("unknown datatype class id {0}")]
    UnknownClass(i32),

    #[error("type mismatch for {context}: expected {expected}, found {found}")]
    TypeMismatch {
        context: String,
        expected: String,
        found: String,
    },

    #[error("member '{member}' not found in stored compound type")]
    MissingMember { member: String },

    #[error("duplicate compound member '{0}'")]
    DuplicateMember(String),

    #[error("cannot infer {what} for member '{member}'")]
    Uninferable { member: String, what: &'static str },

    #[error("bit vector for '{member}' has bit {highest} set but its declared length is {declared}")]
    BitVectorTooWide {
        member: String,
        highest: usize,
        declared: usize,
    },

    #[error("'{member}' needs {needed} bytes but the stored type only holds {available}")]
    Overrun {
        member: String,
        needed: usize,
        available: usize,
    },

    #[error("cannot access member '{member}': {reason}")]
    Access { member: String, reason: String },

    #[error("value {value} out of range for {target}")]
    ValueOutOfRange { target: String, value: String },

    #[error("buffer too short: need {needed} bytes, have {available}")]
    BufferTooShort { needed: usize, available: usize },

    #[error(transparent)]
    Native(#[from] NativeError),
}

impl TypeMapError {
    pub(crate) fn mismatch(
        context: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        TypeMapError::TypeMismatch {
            context: context.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// The native error carried by this error, if any.
    pub fn native(&self) -> Option<&NativeError> {
        match self {
            TypeMapError::Native(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, TypeMapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_bounds_message_names_offset_and_size() {
        let err = TypeMapError::OutOfBounds {
            what: "dataset",
            axis: 0,
            offset: 12,
            block: 4,
            size: 10,
        };
        let msg = err.to_string();
        assert!(msg.contains("offset 12"));
        assert!(msg.contains("size is 10"));
    }

    #[test]
    fn conversion_path_failure_is_exact_pair() {
        let e = NativeError::new(ErrorMajor::Datatype, ErrorMinor::CantInit, "no path");
        assert!(e.is_conversion_path_failure());
        let e = NativeError::new(ErrorMajor::Datatype, ErrorMinor::CantConvert, "no path");
        assert!(!e.is_conversion_path_failure());
        let e = NativeError::new(ErrorMajor::Dataset, ErrorMinor::CantInit, "no path");
        assert!(!e.is_conversion_path_failure());
    }
}
