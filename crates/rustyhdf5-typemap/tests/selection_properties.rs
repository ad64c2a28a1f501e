//! Properties of hyperslab planning and natural-block iteration.

use rustyhdf5_typemap::space::plan;
use rustyhdf5_typemap::{
    Access, BoundIndices, CleanupScope, DataspaceParams, DatasetExtent, H5Element, Hid,
    MemoryNative, Native, NaturalBlockGrid, NaturalBlockIndex, OutOfBoundsPolicy, SpaceRequest,
    StorageLayout, TypeMapError, REST_OF_AXIS, UNLIMITED,
};

#[test]
fn clipped_reads_never_exceed_the_extent() {
    for n in 1..12u64 {
        for b in 1..8i64 {
            for o in 0..15u64 {
                let got = plan(
                    &SpaceRequest::Block1D { offset: o, block: b },
                    &DatasetExtent::fixed(&[n]),
                    Access::Read,
                    OutOfBoundsPolicy::ReturnNone,
                )
                .unwrap();
                let expected = (b as u64).min(n.saturating_sub(o));
                match got {
                    Some(p) => {
                        assert!(expected > 0);
                        assert_eq!(p.effective_block, vec![expected]);
                        assert!(o + p.effective_block[0] <= n);
                    }
                    None => assert_eq!(expected, 0, "n={n} b={b} o={o}"),
                }
            }
        }
    }
}

#[test]
fn slice_expansion_matches_free_axes() {
    // Bind axis 1 of a 4x5x6 extent; the free axes carry the request.
    let extent = DatasetExtent::fixed(&[4, 5, 6]);
    for bound_at in 0..5u64 {
        let bound = BoundIndices::new().bind(1, bound_at);
        let p = plan(
            &SpaceRequest::Slice {
                bound: &bound,
                offset: &[1, 2],
                block: &[2, REST_OF_AXIS],
            },
            &extent,
            Access::Read,
            OutOfBoundsPolicy::Fail,
        )
        .unwrap()
        .unwrap();
        assert_eq!(p.file_start, vec![1, bound_at, 2]);
        assert_eq!(p.file_count, vec![2, 1, 4]);
        assert_eq!(p.memory_dims, vec![2, 4]);
        assert_eq!(p.element_count(), 8);
    }
}

#[test]
fn natural_blocks_tile_every_extent() {
    for total in 0..40u64 {
        for chunk in 1..9u64 {
            let blocks: Vec<_> = NaturalBlockIndex::new(total, chunk).collect();
            assert_eq!(blocks.len() as u64, total.div_ceil(chunk));
            let mut expected_offset = 0;
            for b in &blocks {
                assert_eq!(b.offset, expected_offset);
                expected_offset += b.size;
            }
            assert_eq!(expected_offset, total);
        }
    }
}

#[test]
fn grid_blocks_tile_a_matrix() {
    let dims = [7u64, 5];
    let mut covered = vec![0u8; 35];
    for block in NaturalBlockGrid::new(&dims, &[3, 2]) {
        for r in block.offset[0]..block.offset[0] + block.size[0] {
            for c in block.offset[1]..block.offset[1] + block.size[1] {
                covered[(r * dims[1] + c) as usize] += 1;
            }
        }
    }
    assert!(covered.iter().all(|&c| c == 1));
}

#[test]
fn extension_then_block_write_through_native() {
    let native = MemoryNative::new();
    let file = native.create_file("grow.h5").unwrap();
    let scope = CleanupScope::new(&native);
    let tid = scope.create_type(&i32::datatype()).unwrap();
    let mem = scope.create_type(&i32::memory_datatype()).unwrap();
    let sid = scope.create_space(&[4], Some(&[UNLIMITED][..])).unwrap();
    let ds = scope
        .create_dataset(file, "grow", tid, sid, &StorageLayout::Chunked(vec![4]))
        .unwrap();

    let extent = DatasetExtent {
        dims: vec![4],
        max_dims: Some(vec![UNLIMITED]),
    };
    let p = plan(
        &SpaceRequest::Block1D { offset: 6, block: 3 },
        &extent,
        Access::Write { extendable: true },
        OutOfBoundsPolicy::Fail,
    )
    .unwrap()
    .unwrap();
    let params = DataspaceParams::open(&scope, ds, &p).unwrap();
    let data = rustyhdf5_typemap::element::to_bytes(&[7i32, 8, 9]);
    native
        .write_dataset(ds, mem, params.memory_space, params.file_space, &data)
        .unwrap();

    let mut all = vec![0u8; 9 * 4];
    native.read_dataset(ds, mem, Hid::ALL, Hid::ALL, &mut all).unwrap();
    let values: Vec<i32> = rustyhdf5_typemap::element::from_bytes(&all);
    assert_eq!(values, vec![0, 0, 0, 0, 0, 0, 7, 8, 9]);
    drop(scope);
    native.close_file(file).unwrap();
    assert_eq!(native.live_handles(), 0);
}

#[test]
fn rank_errors_surface_before_native_calls() {
    let err = plan(
        &SpaceRequest::Block {
            offset: &[0],
            block: &[1],
        },
        &DatasetExtent::fixed(&[2, 2]),
        Access::Read,
        OutOfBoundsPolicy::Fail,
    )
    .unwrap_err();
    assert_eq!(err, TypeMapError::RankMismatch { expected: 2, actual: 1 });
}
