//! Reader, writer and dataset creation settings.
//!
//! These follow the property-list style: start from `Default` (or `new`)
//! and chain consuming setters.

use rustyhdf5_typemap::{OutOfBoundsPolicy, StorageLayout, UNLIMITED};

/// Settings applied to every read through a file handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderConfig {
    /// What a block read starting past the end of a dataset does.
    pub out_of_bounds: OutOfBoundsPolicy,
    /// Retry a failed scalar-typed read as an array-typed read when the
    /// native layer reports no conversion path.
    pub array_fallback: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            out_of_bounds: OutOfBoundsPolicy::Fail,
            array_fallback: true,
        }
    }
}

impl ReaderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `None` instead of failing on out-of-bounds block reads.
    pub fn none_on_out_of_bounds(mut self) -> Self {
        self.out_of_bounds = OutOfBoundsPolicy::ReturnNone;
        self
    }

    pub fn array_fallback(mut self, enabled: bool) -> Self {
        self.array_fallback = enabled;
        self
    }
}

/// Settings applied to every write through a file handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterConfig {
    /// Replace an existing dataset instead of writing into it.
    pub overwrite: bool,
    /// Create new datasets chunked with unlimited maximum dimensions.
    pub extendable: bool,
    /// Chunk length along each axis for extendable datasets, clipped to the
    /// initial extent (at least 1).
    pub default_chunk: u64,
    /// Persist type variants as `__TYPE_VARIANT__`/`__TYPE_VARIANTS__`
    /// attributes.
    pub type_variant_attributes: bool,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            overwrite: false,
            extendable: true,
            default_chunk: 1024,
            type_variant_attributes: true,
        }
    }
}

impl WriterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn overwrite(mut self) -> Self {
        self.overwrite = true;
        self
    }

    /// New datasets get fixed dimensions and contiguous storage.
    pub fn fixed_size(mut self) -> Self {
        self.extendable = false;
        self
    }

    pub fn default_chunk(mut self, chunk: u64) -> Self {
        self.default_chunk = chunk.max(1);
        self
    }

    pub fn without_type_variants(mut self) -> Self {
        self.type_variant_attributes = false;
        self
    }
}

/// Storage layout of a dataset about to be created.
///
/// When no layout is chosen the writer's [`WriterConfig`] decides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageFeatures {
    pub layout: Option<StorageLayout>,
}

impl StorageFeatures {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contiguous(mut self) -> Self {
        self.layout = Some(StorageLayout::Contiguous);
        self
    }

    pub fn compact(mut self) -> Self {
        self.layout = Some(StorageLayout::Compact);
        self
    }

    pub fn chunked(mut self, chunk_dims: &[u64]) -> Self {
        self.layout = Some(StorageLayout::Chunked(chunk_dims.to_vec()));
        self
    }

    /// The chunk dimensions that will be used, if the dataset is chunked.
    pub fn chunk_dims(&self) -> Option<&[u64]> {
        self.layout.as_ref().and_then(StorageLayout::chunk_dims)
    }

    /// Resolve the layout and maximum dimensions for a dataset of `dims`.
    ///
    /// Only chunked datasets are created extendable.
    pub(crate) fn resolve(&self, dims: &[u64], writer: &WriterConfig) -> (StorageLayout, Option<Vec<u64>>) {
        let layout = match &self.layout {
            Some(layout) => layout.clone(),
            None if writer.extendable => {
                let chunk = dims.iter().map(|&d| d.clamp(1, writer.default_chunk)).collect();
                StorageLayout::Chunked(chunk)
            }
            None => StorageLayout::Contiguous,
        };
        let max_dims = match (&layout, writer.extendable) {
            (StorageLayout::Chunked(_), true) => Some(vec![UNLIMITED; dims.len()]),
            _ => None,
        };
        (layout, max_dims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_extendable_and_strict() {
        let reader = ReaderConfig::default();
        assert_eq!(reader.out_of_bounds, OutOfBoundsPolicy::Fail);
        assert!(reader.array_fallback);
        let writer = WriterConfig::default();
        assert!(writer.extendable && !writer.overwrite);
    }

    #[test]
    fn default_layout_chunks_extendable_writes() {
        let writer = WriterConfig::new().default_chunk(4);
        let (layout, max) = StorageFeatures::new().resolve(&[10, 2, 0], &writer);
        assert_eq!(layout, StorageLayout::Chunked(vec![4, 2, 1]));
        assert_eq!(max, Some(vec![UNLIMITED; 3]));
    }

    #[test]
    fn explicit_layout_wins() {
        let writer = WriterConfig::new();
        let (layout, max) = StorageFeatures::new().compact().resolve(&[3], &writer);
        assert_eq!(layout, StorageLayout::Compact);
        assert_eq!(max, None);

        let (layout, max) = StorageFeatures::new().resolve(&[3], &WriterConfig::new().fixed_size());
        assert_eq!(layout, StorageLayout::Contiguous);
        assert_eq!(max, None);
    }
}
