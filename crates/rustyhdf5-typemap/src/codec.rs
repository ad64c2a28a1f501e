//! Whole-record encoding and decoding.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::byteify::Form;
use crate::datatype::Datatype;
use crate::error::{Result, TypeMapError};
use crate::layout::CompoundLayout;
use crate::mapping::CompoundMapping;
use crate::native::{Hid, Native, VlenHeap};
use crate::record::{H5Compound, HostRecord};

/// Serializes records of type `R` to and from flat compound buffers.
///
/// The codec owns its layout; clones share it.
pub struct CompoundCodec<R> {
    layout: Arc<CompoundLayout>,
    _record: PhantomData<fn() -> R>,
}

impl<R> Clone for CompoundCodec<R> {
    fn clone(&self) -> Self {
        Self {
            layout: Arc::clone(&self.layout),
            _record: PhantomData,
        }
    }
}

impl<R> std::fmt::Debug for CompoundCodec<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompoundCodec")
            .field("layout", &self.layout)
            .finish()
    }
}

impl<R: H5Compound> CompoundCodec<R> {
    /// Codec for a type that declares its own mapping.
    pub fn for_type() -> Result<Self> {
        Self::new(&R::mapping()?)
    }
}

impl<R: HostRecord> CompoundCodec<R> {
    pub fn new(mapping: &CompoundMapping) -> Result<Self> {
        Ok(Self::from_layout(Arc::new(CompoundLayout::plan::<R>(mapping, None)?)))
    }

    /// Codec whose layout is reconciled against a stored compound type.
    pub fn reconciled(mapping: &CompoundMapping, stored: &Datatype) -> Result<Self> {
        Ok(Self::from_layout(Arc::new(CompoundLayout::plan::<R>(
            mapping,
            Some(stored),
        )?)))
    }

    pub fn from_layout(layout: Arc<CompoundLayout>) -> Self {
        Self {
            layout,
            _record: PhantomData,
        }
    }

    pub fn layout(&self) -> &Arc<CompoundLayout> {
        &self.layout
    }

    pub fn record_size(&self, form: Form) -> usize {
        self.layout.record_size(form)
    }

    pub fn encode(&self, record: &R, form: Form, heap: &dyn VlenHeap) -> Result<Vec<u8>> {
        let mut out = vec![0u8; self.record_size(form)];
        self.encode_into(record, form, heap, &mut out)?;
        Ok(out)
    }

    pub fn encode_into(&self, record: &R, form: Form, heap: &dyn VlenHeap, out: &mut [u8]) -> Result<()> {
        self.layout.encode_record(record, form, heap, out)
    }

    /// Encode a run of records back to back.
    pub fn encode_all(&self, records: &[R], form: Form, heap: &dyn VlenHeap) -> Result<Vec<u8>> {
        let size = self.record_size(form);
        let mut out = vec![0u8; size * records.len()];
        for (record, chunk) in records.iter().zip(out.chunks_exact_mut(size)) {
            self.encode_into(record, form, heap, chunk)?;
        }
        Ok(out)
    }

    /// Encode `records` into memory form, storing variable-length payloads
    /// on the native heap.
    ///
    /// When a record fails to encode, the payloads already stored for the
    /// earlier members and records are released before the error returns.
    pub fn encode_all_reclaiming(&self, native: &dyn Native, mem_type: Hid, records: &[R]) -> Result<Vec<u8>> {
        let size = self.record_size(Form::Memory);
        let mut out = vec![0u8; size * records.len()];
        let encoded = records
            .iter()
            .zip(out.chunks_exact_mut(size))
            .try_for_each(|(record, chunk)| self.encode_into(record, Form::Memory, native.heap(), chunk));
        match encoded {
            Ok(()) => Ok(out),
            Err(e) => {
                if self.layout.has_variable_length() {
                    if let Err(r) = native.reclaim(mem_type, &mut out) {
                        log::warn!("failed to reclaim partially encoded write buffer: {r}");
                    }
                }
                Err(e)
            }
        }
    }

    pub fn decode(&self, bytes: &[u8], form: Form, heap: &dyn VlenHeap) -> Result<R> {
        let mut record = R::fresh(self.layout.members().len());
        self.decode_into(&mut record, bytes, form, heap)?;
        Ok(record)
    }

    /// Populate an existing record.
    pub fn decode_into(&self, record: &mut R, bytes: &[u8], form: Form, heap: &dyn VlenHeap) -> Result<()> {
        self.layout.decode_record(record, bytes, form, heap)
    }

    pub fn decode_all(&self, bytes: &[u8], count: usize, form: Form, heap: &dyn VlenHeap) -> Result<Vec<R>> {
        let size = self.record_size(form);
        if bytes.len() < size * count {
            return Err(TypeMapError::BufferTooShort {
                needed: size * count,
                available: bytes.len(),
            });
        }
        bytes
            .chunks_exact(size)
            .take(count)
            .map(|chunk| self.decode(chunk, form, heap))
            .collect()
    }

    /// Decode `count` memory-form records produced by a native read, then
    /// release the variable-length payloads they reference.
    ///
    /// Reclamation runs whether or not decoding succeeds.
    pub fn decode_all_reclaiming(
        &self,
        native: &dyn Native,
        mem_type: Hid,
        buf: &mut [u8],
        count: usize,
    ) -> Result<Vec<R>> {
        if !self.layout.has_variable_length() {
            return self.decode_all(buf, count, Form::Memory, native.heap());
        }
        let guard = Reclaim {
            native,
            mem_type,
            buf,
        };
        let decoded = self.decode_all(&*guard.buf, count, Form::Memory, native.heap());
        drop(guard);
        decoded
    }
}

/// Releases the variable-length data referenced from a read buffer on drop.
struct Reclaim<'a> {
    native: &'a dyn Native,
    mem_type: Hid,
    buf: &'a mut [u8],
}

impl Drop for Reclaim<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.native.reclaim(self.mem_type, self.buf) {
            log::warn!("failed to reclaim variable-length read buffer: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::BitSet;
    use crate::mapping::MemberType;
    use crate::memory::{MemoryNative, VlenArena};
    use crate::value::Value;
    use std::collections::BTreeMap;

    type Map = BTreeMap<String, Value>;

    fn mapping() -> CompoundMapping {
        CompoundMapping::new()
            .member("id", MemberType::Int { size: 4, signed: false })
            .member("name", MemberType::VlenString)
            .member("bits", MemberType::BitField { bits: Some(70) })
    }

    fn record(id: u64, name: &str, bits: &[usize]) -> Map {
        let mut m = Map::new();
        m.insert("id".into(), Value::UInt(id));
        m.insert("name".into(), Value::Str(name.into()));
        m.insert("bits".into(), Value::Bits(BitSet::from_indices(bits.iter().copied())));
        m
    }

    #[test]
    fn records_round_trip_in_both_forms() {
        let codec = CompoundCodec::<Map>::new(&mapping()).unwrap();
        let heap = VlenArena::default();
        let records = vec![record(1, "one", &[0, 69]), record(2, "", &[])];
        for form in [Form::Storage, Form::Memory] {
            let bytes = codec.encode_all(&records, form, &heap).unwrap();
            assert_eq!(bytes.len(), 2 * codec.record_size(form));
            assert_eq!(codec.decode_all(&bytes, 2, form, &heap).unwrap(), records);
        }
    }

    #[test]
    fn decode_all_checks_buffer_length() {
        let codec = CompoundCodec::<Map>::new(&mapping()).unwrap();
        let heap = VlenArena::default();
        assert!(matches!(
            codec.decode_all(&[0u8; 10], 1, Form::Memory, &heap),
            Err(TypeMapError::BufferTooShort { .. })
        ));
    }

    #[test]
    fn reclaim_runs_even_when_decoding_fails() {
        let native = MemoryNative::new();
        let codec = CompoundCodec::<Map>::new(&mapping()).unwrap();
        let tid = native.create_type(&codec.layout().memory_type()).unwrap();

        let mut buf = codec
            .encode(&record(7, "leaky", &[1]), Form::Memory, native.heap())
            .unwrap();
        assert_eq!(native.live_vlen(), 1);
        // A wider mapping cannot decode the buffer.
        let strict = CompoundCodec::<Map>::new(
            &CompoundMapping::new()
                .member("id", MemberType::Int { size: 4, signed: false })
                .member("name", MemberType::VlenString)
                .member("bits", MemberType::BitField { bits: Some(70) })
                .member("extra", MemberType::Bool),
        )
        .unwrap();
        assert!(strict
            .decode_all_reclaiming(&native, tid, &mut buf, 1)
            .is_err());
        assert_eq!(native.live_vlen(), 0);
        native.close_type(tid).unwrap();
    }

    #[test]
    fn failed_encode_releases_stored_payloads() {
        let native = MemoryNative::new();
        let mapping = CompoundMapping::new()
            .member("name", MemberType::VlenString)
            .member("id", MemberType::Int { size: 1, signed: false });
        let codec = CompoundCodec::<Map>::new(&mapping).unwrap();
        let tid = native.create_type(&codec.layout().memory_type()).unwrap();
        let rec = |name: &str, id| {
            let mut m = Map::new();
            m.insert("name".into(), Value::Str(name.into()));
            m.insert("id".into(), Value::UInt(id));
            m
        };

        let err = codec
            .encode_all_reclaiming(&native, tid, &[rec("fine", 1), rec("too big", 1000)])
            .unwrap_err();
        assert!(matches!(err, TypeMapError::ValueOutOfRange { .. }));
        assert_eq!(native.live_vlen(), 0);

        let mut buf = codec
            .encode_all_reclaiming(&native, tid, &[rec("a", 1), rec("b", 2)])
            .unwrap();
        assert_eq!(native.live_vlen(), 2);
        native.reclaim(tid, &mut buf).unwrap();
        assert_eq!(native.live_vlen(), 0);
        native.close_type(tid).unwrap();
    }

    #[test]
    fn reclaim_after_successful_decode() {
        let native = MemoryNative::new();
        let codec = CompoundCodec::<Map>::new(&mapping()).unwrap();
        let tid = native.create_type(&codec.layout().memory_type()).unwrap();
        let mut buf = codec
            .encode_all(&[record(1, "a", &[]), record(2, "b", &[3])], Form::Memory, native.heap())
            .unwrap();
        assert_eq!(native.live_vlen(), 2);
        let decoded = codec
            .decode_all_reclaiming(&native, tid, &mut buf, 2)
            .unwrap();
        assert_eq!(decoded[1], record(2, "b", &[3]));
        assert_eq!(native.live_vlen(), 0);
        native.close_type(tid).unwrap();
    }
}
