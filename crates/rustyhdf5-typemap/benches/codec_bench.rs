use std::collections::BTreeMap;
use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use rustyhdf5_typemap::{BitSet, CompoundCodec, CompoundMapping, Form, MemberType, Value, VlenArena};
use rustyhdf5_typemap_derive::H5Compound;

const N: usize = 10_000;

#[derive(H5Compound, Debug, Clone, Default, PartialEq)]
struct Reading {
    sensor: u32,
    #[h5(len = 12)]
    label: String,
    value: f64,
    flags: bool,
    window: [f32; 4],
}

fn readings() -> Vec<Reading> {
    (0..N)
        .map(|i| Reading {
            sensor: i as u32,
            label: format!("s{i}"),
            value: i as f64 * 0.5,
            flags: i % 2 == 0,
            window: [i as f32; 4],
        })
        .collect()
}

fn bench_struct_codec(c: &mut Criterion) {
    let heap = VlenArena::default();
    let codec = CompoundCodec::<Reading>::for_type().unwrap();
    let records = readings();
    let storage = codec.encode_all(&records, Form::Storage, &heap).unwrap();

    c.bench_function("encode_struct_storage_10k", |b| {
        b.iter(|| codec.encode_all(black_box(&records), Form::Storage, &heap).unwrap())
    });
    c.bench_function("decode_struct_storage_10k", |b| {
        b.iter(|| codec.decode_all(black_box(&storage), N, Form::Storage, &heap).unwrap())
    });
    c.bench_function("encode_struct_memory_10k", |b| {
        b.iter(|| codec.encode_all(black_box(&records), Form::Memory, &heap).unwrap())
    });
}

fn bench_map_codec(c: &mut Criterion) {
    let heap = VlenArena::default();
    let mapping = CompoundMapping::new()
        .member("id", MemberType::Int { size: 8, signed: true })
        .member("x", MemberType::Float { size: 8 })
        .member("bits", MemberType::BitField { bits: Some(128) });
    let codec = CompoundCodec::<BTreeMap<String, Value>>::new(&mapping).unwrap();
    let records: Vec<_> = (0..N)
        .map(|i| {
            let mut m = BTreeMap::new();
            m.insert("id".to_string(), Value::Int(i as i64));
            m.insert("x".to_string(), Value::Float(i as f64));
            m.insert("bits".to_string(), Value::Bits(BitSet::from_indices([i % 128])));
            m
        })
        .collect();
    let bytes = codec.encode_all(&records, Form::Storage, &heap).unwrap();

    c.bench_function("encode_map_storage_10k", |b| {
        b.iter(|| codec.encode_all(black_box(&records), Form::Storage, &heap).unwrap())
    });
    c.bench_function("decode_map_storage_10k", |b| {
        b.iter(|| codec.decode_all(black_box(&bytes), N, Form::Storage, &heap).unwrap())
    });
}

criterion_group!(benches, bench_struct_codec, bench_map_codec);
criterion_main!(benches);
