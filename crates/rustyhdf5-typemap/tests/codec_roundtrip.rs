//! Compound records through the derive macro, the codec and a native dataset.

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use rustyhdf5_typemap::{
    BitSet, CleanupScope, CompoundCodec, CompoundLayout, Datatype, Form, H5Compound, Hid,
    MemoryNative, Native, ObjectRef, StorageLayout, TypeMapError,
};
use rustyhdf5_typemap_derive::{H5Compound, H5Enum};

// ---- Test records ----

#[derive(H5Enum, Debug, Clone, Copy, PartialEq, Default)]
enum Colour {
    #[default]
    Red,
    Green,
    Blue,
}

#[derive(H5Compound, Debug, Clone, PartialEq, Default)]
struct Inner {
    x: i16,
    y: f32,
}

#[derive(H5Compound, Debug, Clone, PartialEq, Default)]
struct Sample {
    id: u32,
    #[h5(len = 6)]
    tag: String,
    #[h5(vlen)]
    note: String,
    flag: bool,
    #[h5(bits = 70)]
    mask: BitSet,
    colour: Colour,
    coords: [f64; 3],
    inner: Inner,
    at: DateTime<Utc>,
    #[h5(duration = "seconds")]
    took: TimeDelta,
    target: ObjectRef,
    #[h5(skip)]
    scratch: u64,
}

#[derive(H5Compound, Debug, Clone, PartialEq, Default)]
struct Renamed {
    #[h5(name = "ID")]
    id: i64,
    #[h5(name = "Value")]
    value: f64,
}

fn sample(i: u32) -> Sample {
    Sample {
        id: i,
        tag: format!("t{i}"),
        note: if i % 2 == 0 { String::new() } else { format!("note number {i}") },
        flag: i % 3 == 0,
        mask: BitSet::from_indices([0, i as usize % 70, 69]),
        colour: [Colour::Red, Colour::Green, Colour::Blue][i as usize % 3],
        coords: [i as f64, -(i as f64), 0.5],
        inner: Inner {
            x: -(i as i16),
            y: i as f32 * 0.25,
        },
        at: Utc.timestamp_millis_opt(1_700_000_000_000 + i as i64).single().unwrap(),
        took: TimeDelta::try_seconds(i as i64 * 60).unwrap(),
        target: ObjectRef(u64::from(i) * 8),
        scratch: 0,
    }
}

#[test]
fn derived_mapping_lists_stored_fields_in_order() {
    let mapping = Sample::mapping().unwrap();
    let names: Vec<_> = mapping.members().iter().map(|m| m.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["id", "tag", "note", "flag", "mask", "colour", "coords", "inner", "at", "took", "target"]
    );
}

#[test]
fn derived_records_round_trip_in_both_forms() {
    let native = MemoryNative::new();
    let codec = CompoundCodec::<Sample>::for_type().unwrap();
    let records: Vec<Sample> = (0..8).map(sample).collect();
    for form in [Form::Storage, Form::Memory] {
        let bytes = codec.encode_all(&records, form, native.heap()).unwrap();
        let back = codec.decode_all(&bytes, records.len(), form, native.heap()).unwrap();
        assert_eq!(back, records);
    }
}

#[test]
fn skipped_fields_come_back_as_default() {
    let native = MemoryNative::new();
    let codec = CompoundCodec::<Sample>::for_type().unwrap();
    let mut record = sample(1);
    record.scratch = 99;
    let bytes = codec.encode(&record, Form::Storage, native.heap()).unwrap();
    let back = codec.decode(&bytes, Form::Storage, native.heap()).unwrap();
    assert_eq!(back.scratch, 0);
    assert_eq!(back.id, 1);
}

#[test]
fn member_names_can_differ_from_fields() {
    let layout = CompoundLayout::plan::<Renamed>(&Renamed::mapping().unwrap(), None).unwrap();
    match layout.storage_type() {
        Datatype::Compound { members, size } => {
            assert_eq!(size, 16);
            assert_eq!(members[0].name, "ID");
            assert_eq!(members[1].name, "Value");
        }
        other => panic!("expected compound, got {other:?}"),
    }
}

#[test]
fn records_survive_a_native_dataset() {
    let native = MemoryNative::new();
    let codec = CompoundCodec::<Sample>::for_type().unwrap();
    let records: Vec<Sample> = (0..5).map(sample).collect();

    let file = native.create_file("records.h5").unwrap();
    {
        let scope = CleanupScope::new(&native);
        let file_type = scope.create_type(&codec.layout().storage_type()).unwrap();
        let mem_type = scope.create_type(&codec.layout().memory_type()).unwrap();
        let space = scope.create_space(&[5], None).unwrap();
        let ds = scope
            .create_dataset(file, "samples", file_type, space, &StorageLayout::Contiguous)
            .unwrap();

        let mut buf = codec.encode_all(&records, Form::Memory, native.heap()).unwrap();
        native.write_dataset(ds, mem_type, Hid::ALL, Hid::ALL, &buf).unwrap();
        native.reclaim(mem_type, &mut buf).unwrap();
        assert_eq!(native.live_vlen(), 0);

        let mut read = vec![0u8; buf.len()];
        native.read_dataset(ds, mem_type, Hid::ALL, Hid::ALL, &mut read).unwrap();
        let back = codec.decode_all_reclaiming(&native, mem_type, &mut read, 5).unwrap();
        assert_eq!(back, records);
        assert_eq!(native.live_vlen(), 0);
    }

    // The stored bytes are the codec's storage form.
    let (_, dims, raw) = native.raw_dataset("records.h5", "samples").unwrap();
    assert_eq!(dims, vec![5]);
    let decoded = codec
        .decode_all(&raw, 5, Form::Storage, native.storage_heap())
        .unwrap();
    assert_eq!(decoded, records);

    native.close_file(file).unwrap();
    assert_eq!(native.live_handles(), 0);
}

#[test]
fn reconciled_layout_rejects_missing_members() {
    let stored = CompoundLayout::plan::<Renamed>(&Renamed::mapping().unwrap(), None)
        .unwrap()
        .storage_type();
    let err = CompoundCodec::<Inner>::reconciled(&Inner::mapping().unwrap(), &stored).unwrap_err();
    assert!(matches!(err, TypeMapError::MissingMember { .. }));
}

#[test]
fn enum_values_decode_by_name() {
    let native = MemoryNative::new();
    let codec = CompoundCodec::<Sample>::for_type().unwrap();
    let record = sample(2);
    let bytes = codec.encode(&record, Form::Storage, native.heap()).unwrap();
    let colour = codec.layout().member("colour").unwrap();
    let offset = colour.descriptor.storage_offset;
    assert_eq!(bytes[offset], 2);
}
