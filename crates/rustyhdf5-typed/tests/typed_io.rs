//! Typed readers and writers end to end against the in-memory backend.

use std::collections::BTreeMap;
use std::rc::Rc;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use rustyhdf5_typed::typemap::{MemoryNative, TypeMapError};
use rustyhdf5_typed::{
    BitSet, BoundIndices, Error, H5Compound, H5Enum, H5File, MdArray, ReaderConfig,
    StorageFeatures, TimeUnit, TypeVariant, Value, WriterConfig,
};

#[derive(H5Enum, Debug, Clone, Copy, PartialEq, Default)]
enum Colour {
    #[default]
    Red,
    Green,
    Blue,
}

/// Same values as `Colour`, numbered differently.
#[derive(H5Enum, Debug, Clone, Copy, PartialEq, Default)]
#[h5(name = "Colour")]
enum ColourByName {
    #[default]
    Blue,
    Red,
    Green,
}

#[derive(H5Compound, Debug, Clone, PartialEq, Default)]
struct Reading {
    id: u32,
    #[h5(vlen)]
    note: String,
    colour: Colour,
    value: f64,
    at: DateTime<Utc>,
    #[h5(duration = "seconds")]
    took: TimeDelta,
}

fn reading(i: u32) -> Reading {
    Reading {
        id: i,
        note: if i % 2 == 0 { String::new() } else { format!("reading {i}") },
        colour: [Colour::Red, Colour::Green, Colour::Blue][i as usize % 3],
        value: i as f64 * 0.25,
        at: Utc.timestamp_millis_opt(1_600_000_000_000 + i as i64).unwrap(),
        took: TimeDelta::seconds(i as i64),
    }
}

fn new_file() -> (Rc<MemoryNative>, H5File) {
    let native = Rc::new(MemoryNative::new());
    let file = H5File::create(native.clone(), "typed.h5").unwrap();
    (native, file)
}

// ---- compounds ----

#[test]
fn derived_records_round_trip_without_leaks() {
    let (native, file) = new_file();
    let records: Vec<Reading> = (0..7).map(reading).collect();
    file.compound_writer::<Reading>()
        .unwrap()
        .write_array("/readings", &records)
        .unwrap();

    let reader = file.compound_reader::<Reading>().unwrap();
    assert_eq!(reader.read_array("/readings").unwrap(), records);
    assert_eq!(reader.read_block("/readings", 3, 1).unwrap().unwrap(), records[3..6]);
    assert_eq!(reader.read_block("/readings", 3, 2).unwrap().unwrap(), records[6..]);

    drop(reader);
    drop(file);
    assert_eq!(native.live_handles(), 0);
    assert_eq!(native.live_vlen(), 0);
}

#[test]
fn map_reader_restores_member_variants() {
    let (_native, file) = new_file();
    file.compound_writer::<Reading>()
        .unwrap()
        .write_array("/readings", &[reading(3)])
        .unwrap();

    let rows = file.map_reader().read_array("/readings").unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row["id"], Value::UInt(3));
    assert_eq!(row["note"], Value::Str("reading 3".into()));
    assert_eq!(row["at"], Value::Timestamp(1_600_000_000_003));
    assert_eq!(row["took"], Value::Duration(3, TimeUnit::Seconds));
}

#[test]
fn map_writer_infers_the_layout_from_the_first_record() {
    let (native, file) = new_file();
    let rows: Vec<BTreeMap<String, Value>> = (0..3)
        .map(|i| {
            BTreeMap::from([
                ("n".to_string(), Value::Int(i)),
                ("x".to_string(), Value::Float(i as f64 / 2.0)),
                ("label".to_string(), Value::Str(format!("row{i}"))),
            ])
        })
        .collect();
    file.map_writer().write_array("/rows", &rows).unwrap();
    assert_eq!(file.map_reader().read_array("/rows").unwrap(), rows);
    drop(file);
    assert_eq!(native.live_vlen(), 0);
}

#[test]
fn compound_natural_blocks_follow_the_chunks() {
    let (_native, file) = new_file();
    let records: Vec<Reading> = (0..10).map(reading).collect();
    file.compound_writer::<Reading>()
        .unwrap()
        .write_array_with("/r", &records, &StorageFeatures::new().chunked(&[4]))
        .unwrap();

    let reader = file.compound_reader::<Reading>().unwrap();
    let mut sizes = Vec::new();
    let mut all = Vec::new();
    for block in reader.natural_blocks("/r").unwrap() {
        let (chunk, position) = block.unwrap();
        assert_eq!(position.offset, all.len() as u64);
        sizes.push(position.size);
        all.extend(chunk);
    }
    assert_eq!(sizes, vec![4, 4, 2]);
    assert_eq!(all, records);
}

// ---- primitives ----

#[test]
fn natural_blocks_cover_the_dataset_once() {
    let (native, file) = new_file();
    let values: Vec<i32> = (0..10).collect();
    file.writer::<i32>()
        .write_array_with("/v", &values, &StorageFeatures::new().chunked(&[4]))
        .unwrap();

    let blocks = file.reader::<i32>().natural_blocks("/v").unwrap();
    assert_eq!(blocks.block_count(), 3);
    let collected: Vec<(Vec<i32>, u64)> = blocks
        .map(|b| b.map(|(data, block)| (data, block.index)))
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(collected[2], (vec![8, 9], 2));
    let flat: Vec<i32> = collected.into_iter().flat_map(|(data, _)| data).collect();
    assert_eq!(flat, values);

    let contiguous = StorageFeatures::new().contiguous();
    file.writer::<i32>().write_array_with("/c", &values, &contiguous).unwrap();
    assert_eq!(file.reader::<i32>().natural_blocks("/c").unwrap().block_count(), 1);
    drop(file);
    assert_eq!(native.live_handles(), 0);
}

#[test]
fn md_natural_blocks_tile_the_grid() {
    let (_native, file) = new_file();
    let array = MdArray::new(&[3, 4], (0..12).collect::<Vec<u16>>()).unwrap();
    file.writer::<u16>()
        .write_md_array_with("/grid", &array, &StorageFeatures::new().chunked(&[2, 3]))
        .unwrap();
    let mut seen = 0;
    for block in file.reader::<u16>().natural_md_blocks("/grid").unwrap() {
        let (tile, position) = block.unwrap();
        assert_eq!(tile.dims(), position.size.as_slice());
        for (i, value) in tile.data().iter().enumerate() {
            let row = position.offset[0] + i as u64 / position.size[1];
            let col = position.offset[1] + i as u64 % position.size[1];
            assert_eq!(*value as u64, row * 4 + col);
        }
        seen += tile.len();
    }
    assert_eq!(seen, 12);
}

#[test]
fn slices_match_the_equivalent_block() {
    let (_native, file) = new_file();
    let cube = MdArray::new(&[2, 3, 4], (0..24).map(|v| v as f32).collect()).unwrap();
    file.writer::<f32>().write_md_array("/cube", &cube).unwrap();
    let reader = file.reader::<f32>();

    let slice = reader.read_slice("/cube", &BoundIndices::new().bind(0, 1)).unwrap();
    let block = reader
        .read_md_block_with_offset("/cube", &[1, 3, 4], &[1, 0, 0])
        .unwrap()
        .unwrap();
    assert_eq!(slice.dims(), &[3, 4]);
    assert_eq!(slice.data(), block.data());

    let column = reader.read_slice("/cube", &BoundIndices::new().bind(0, 0).bind(2, 2)).unwrap();
    assert_eq!(column.data(), &[2.0, 6.0, 10.0]);
}

#[test]
fn sliced_block_writes_land_on_the_bound_plane() {
    let (_native, file) = new_file();
    file.writer::<i64>()
        .create_md_array("/m", &[2, 2, 3], &StorageFeatures::new().contiguous())
        .unwrap();
    let plane = MdArray::new(&[2, 3], vec![1, 2, 3, 4, 5, 6]).unwrap();
    file.writer::<i64>()
        .write_sliced_block("/m", &plane, &BoundIndices::new().bind(0, 1), &[0, 0])
        .unwrap();
    let back = file.reader::<i64>().read_md_array("/m").unwrap();
    assert_eq!(&back.data()[..6], &[0; 6]);
    assert_eq!(&back.data()[6..], plane.data());
}

#[test]
fn extendable_datasets_grow_with_block_writes() {
    let (_native, file) = new_file();
    let writer = file.writer::<u8>();
    writer
        .create_array("/log", 0, &StorageFeatures::new().chunked(&[4]))
        .unwrap();
    writer.write_block("/log", &[1, 2, 3, 4], 0).unwrap();
    writer.write_block("/log", &[5, 6, 7, 8], 1).unwrap();
    writer.write_block_with_offset("/log", &[9], 8).unwrap();
    assert_eq!(file.reader::<u8>().read_array("/log").unwrap(), (1..=9).collect::<Vec<u8>>());
    let info = file.dataset_info("/log").unwrap();
    assert_eq!(info.dims, vec![9]);
    assert!(info.max_dims.is_some());
}

#[test]
fn fixed_size_datasets_reject_writes_past_their_end() {
    let native = Rc::new(MemoryNative::new());
    let file = H5File::create(native, "fixed.h5")
        .unwrap()
        .with_writer_config(WriterConfig::new().fixed_size());
    file.writer::<u8>().write_array("/a", &[1, 2, 3]).unwrap();
    assert_eq!(file.dataset_info("/a").unwrap().max_dims, None);
    let err = file.writer::<u8>().write_block("/a", &[4, 5], 1).unwrap_err();
    assert!(matches!(err.type_map(), Some(TypeMapError::OutOfBounds { .. })));
}

#[test]
fn out_of_bounds_reads_follow_the_policy() {
    let (native, file) = new_file();
    file.writer::<f64>().write_array("/v", &[1.0, 2.0, 3.0]).unwrap();
    let err = file.reader::<f64>().read_block("/v", 2, 5).unwrap_err();
    assert!(matches!(err.type_map(), Some(TypeMapError::OutOfBounds { .. })));
    drop(file);

    let tolerant = H5File::open(native, "typed.h5")
        .unwrap()
        .with_reader_config(ReaderConfig::new().none_on_out_of_bounds());
    assert_eq!(tolerant.reader::<f64>().read_block("/v", 2, 5).unwrap(), None);
    assert_eq!(tolerant.reader::<f64>().read_block("/v", 2, 1).unwrap(), Some(vec![3.0]));
}

#[test]
fn rewriting_reuses_or_replaces_datasets() {
    let (_native, file) = new_file();
    let writer = file.writer::<i32>();
    writer.write_array("/d", &[1, 2, 3]).unwrap();
    writer.write_array("/d", &[4, 5]).unwrap();
    assert_eq!(file.reader::<i32>().read_array("/d").unwrap(), vec![4, 5]);

    file.writer::<f32>().write_array("/d", &[0.5]).unwrap();
    assert_eq!(file.reader::<f32>().read_array("/d").unwrap(), vec![0.5]);
    assert_eq!(file.dataset_info("/d").unwrap().datatype, <f32 as rustyhdf5_typed::H5Element>::datatype());
}

// ---- enums, bit fields, references, times ----

#[test]
fn enums_convert_by_value_name() {
    let (native, file) = new_file();
    let colours = [Colour::Blue, Colour::Red, Colour::Green];
    file.enums().write_array("/colours", &colours).unwrap();
    assert_eq!(file.enums().read_array::<Colour>("/colours").unwrap(), colours);
    assert_eq!(
        file.enums().read_array::<ColourByName>("/colours").unwrap(),
        vec![ColourByName::Blue, ColourByName::Red, ColourByName::Green]
    );
    assert_eq!(file.enums().read_names("/colours").unwrap(), vec!["Blue", "Red", "Green"]);
    assert_eq!(file.enums().enum_type("/colours").unwrap().name, "Colour");

    let unknown = file
        .enums()
        .write_names("/bad", &rustyhdf5_typed::EnumType::new("Colour", &["Red", "Green", "Blue"]), &["Mauve"])
        .unwrap_err();
    assert!(matches!(unknown.type_map(), Some(TypeMapError::ValueOutOfRange { .. })));

    file.enums().write_bools("/flags", &[true, false, true]).unwrap();
    assert_eq!(file.enums().read_bools("/flags").unwrap(), vec![true, false, true]);
    drop(file);
    assert_eq!(native.live_handles(), 0);
}

#[test]
fn bit_fields_references_and_times_share_a_file() {
    let (native, file) = new_file();
    file.bitfields()
        .write_array("/masks", &[BitSet::from_indices([0, 70]), BitSet::new()], 71)
        .unwrap();
    file.references().write_array("/refs", &["/masks"]).unwrap();
    let at = Utc.timestamp_millis_opt(1_234_567).unwrap();
    file.times().write_timestamps("/at", &[at]).unwrap();
    file.times().write_durations("/took", &[2], TimeUnit::Minutes).unwrap();

    assert_eq!(file.bitfields().read_array("/masks").unwrap()[0], BitSet::from_indices([0, 70]));
    assert_eq!(file.references().read("/refs").unwrap(), "/masks");
    assert_eq!(file.times().read_timestamps("/at").unwrap(), vec![at]);
    assert_eq!(file.times().read_durations("/took", TimeUnit::Seconds).unwrap(), vec![120]);
    assert_eq!(file.type_variant("/took").unwrap(), TypeVariant::Duration(TimeUnit::Minutes));

    let err = file.times().read_timestamps("/took").unwrap_err();
    assert!(matches!(err, Error::WrongTypeVariant { .. }));
    drop(file);
    assert_eq!(native.live_handles(), 0);
}

#[test]
fn type_variant_attributes_can_be_turned_off() {
    let native = Rc::new(MemoryNative::new());
    let file = H5File::create(native, "plain.h5")
        .unwrap()
        .with_writer_config(WriterConfig::new().without_type_variants());
    file.times().write_durations("/d", &[1], TimeUnit::Hours).unwrap();
    assert_eq!(file.type_variant("/d").unwrap(), TypeVariant::None);
    assert_eq!(file.reader::<i64>().read_array("/d").unwrap(), vec![1]);
}

#[test]
fn errors_name_the_object_path() {
    let (_native, file) = new_file();
    let err = file.reader::<i32>().read_array("/nowhere").unwrap_err();
    assert!(err.to_string().contains("/nowhere"), "{err}");
    assert!(err.native().is_some());
}
