//! Dataspace and hyperslab planning.
//!
//! [`plan`] turns a logical access request (whole dataset, 1-D block, N-D
//! block, block into a larger memory buffer, or slice with bound indices)
//! into concrete selection parameters: the file hyperslab, the memory
//! dataspace shape and the effective block size after clipping or
//! extension. Planning is pure; [`DataspaceParams::open`] then realises a
//! plan as native dataspace handles inside a [`CleanupScope`].

use std::collections::BTreeMap;

use crate::error::{Result, TypeMapError};
use crate::native::{Hid, UNLIMITED};
use crate::scope::CleanupScope;

/// What to do when a read starts beyond the end of the dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutOfBoundsPolicy {
    /// Fail with [`TypeMapError::OutOfBounds`].
    #[default]
    Fail,
    /// Return no data.
    ReturnNone,
}

/// Block dimension sentinel meaning "to the end of this axis".
pub const REST_OF_AXIS: i64 = -1;

/// Direction of the access being planned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write { extendable: bool },
}

/// Axes fixed to a single index in a slice request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoundIndices(BTreeMap<usize, u64>);

impl BoundIndices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, axis: usize, index: u64) -> Self {
        self.0.insert(axis, index);
        self
    }

    /// From a full-rank array where negative entries mark free axes.
    pub fn from_full(indices: &[i64]) -> Self {
        Self(
            indices
                .iter()
                .enumerate()
                .filter(|(_, &v)| v >= 0)
                .map(|(axis, &v)| (axis, v as u64))
                .collect(),
        )
    }

    pub fn get(&self, axis: usize) -> Option<u64> {
        self.0.get(&axis).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, u64)> + '_ {
        self.0.iter().map(|(&a, &v)| (a, v))
    }
}

/// A logical access request.
#[derive(Debug, Clone, PartialEq)]
pub enum SpaceRequest<'a> {
    Whole,
    Block1D {
        offset: u64,
        block: i64,
    },
    Block {
        offset: &'a [u64],
        block: &'a [i64],
    },
    /// An N-D block of the dataset mapped into a region of a larger
    /// in-memory array.
    BlockIntoBlock {
        offset: &'a [u64],
        block: &'a [i64],
        memory_dims: &'a [u64],
        memory_offset: &'a [u64],
    },
    /// `offset` and `block` cover the free axes only, in axis order.
    Slice {
        bound: &'a BoundIndices,
        offset: &'a [u64],
        block: &'a [i64],
    },
}

/// Current and maximum extent of a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetExtent {
    pub dims: Vec<u64>,
    pub max_dims: Option<Vec<u64>>,
}

impl DatasetExtent {
    pub fn fixed(dims: &[u64]) -> Self {
        Self {
            dims: dims.to_vec(),
            max_dims: None,
        }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    fn max_along(&self, axis: usize) -> u64 {
        match &self.max_dims {
            Some(max) => max.get(axis).copied().unwrap_or(self.dims[axis]),
            None => self.dims[axis],
        }
    }
}

/// Concrete selection parameters for one I/O call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HyperslabPlan {
    pub file_start: Vec<u64>,
    pub file_count: Vec<u64>,
    /// Shape of the memory dataspace.
    pub memory_dims: Vec<u64>,
    /// Selection within the memory dataspace, when it is larger than the block.
    pub memory_selection: Option<(Vec<u64>, Vec<u64>)>,
    /// Per-axis block size after sentinel resolution and clipping.
    pub effective_block: Vec<u64>,
    /// New dataset dimensions required before a write.
    pub extend_to: Option<Vec<u64>>,
    /// The whole dataset is selected on both sides.
    pub whole: bool,
}

impl HyperslabPlan {
    /// Number of elements transferred.
    pub fn element_count(&self) -> u64 {
        self.file_count.iter().product()
    }
}

fn check_rank(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(TypeMapError::RankMismatch { expected, actual });
    }
    Ok(())
}

/// Resolve, clip or extend one block request against the dataset extent.
///
/// Returns `None` when a read is out of bounds and the policy tolerates it.
fn block_along_axes(
    offset: &[u64],
    block: &[i64],
    extent: &DatasetExtent,
    access: Access,
    policy: OutOfBoundsPolicy,
) -> Result<Option<(Vec<u64>, Option<Vec<u64>>)>> {
    check_rank(extent.rank(), offset.len())?;
    check_rank(extent.rank(), block.len())?;

    let mut effective = Vec::with_capacity(block.len());
    let mut grown = extent.dims.clone();
    for axis in 0..extent.rank() {
        let size = extent.dims[axis];
        let start = offset[axis];
        let requested = if block[axis] < 0 {
            size.saturating_sub(start)
        } else if block[axis] == 0 {
            return Err(TypeMapError::InvalidLength {
                what: "block",
                length: 0,
            });
        } else {
            block[axis] as u64
        };
        let out_of_bounds = |what| TypeMapError::OutOfBounds {
            what,
            axis,
            offset: start,
            block: requested,
            size,
        };
        match access {
            Access::Read => {
                let available = size.saturating_sub(start);
                let clipped = requested.min(available);
                if clipped == 0 {
                    return match policy {
                        OutOfBoundsPolicy::ReturnNone => Ok(None),
                        OutOfBoundsPolicy::Fail => Err(out_of_bounds("dataset")),
                    };
                }
                effective.push(clipped);
            }
            Access::Write { extendable } => {
                if requested == 0 {
                    return Err(out_of_bounds("dataset"));
                }
                let needed = start
                    .checked_add(requested)
                    .ok_or_else(|| out_of_bounds("addressable range"))?;
                if needed > size {
                    if !extendable {
                        return Err(out_of_bounds("dataset"));
                    }
                    let max = extent.max_along(axis);
                    if max != UNLIMITED && needed > max {
                        return Err(TypeMapError::OutOfBounds {
                            what: "maximum dimension",
                            axis,
                            offset: start,
                            block: requested,
                            size: max,
                        });
                    }
                    grown[axis] = grown[axis].max(needed);
                }
                effective.push(requested);
            }
        }
    }
    let extend_to = (grown != extent.dims).then_some(grown);
    Ok(Some((effective, extend_to)))
}

/// Compute the selection parameters for `request`.
pub fn plan(
    request: &SpaceRequest<'_>,
    extent: &DatasetExtent,
    access: Access,
    policy: OutOfBoundsPolicy,
) -> Result<Option<HyperslabPlan>> {
    let planned = match request {
        SpaceRequest::Whole => Some(HyperslabPlan {
            file_start: vec![0; extent.rank()],
            file_count: extent.dims.clone(),
            memory_dims: extent.dims.clone(),
            memory_selection: None,
            effective_block: extent.dims.clone(),
            extend_to: None,
            whole: true,
        }),
        SpaceRequest::Block1D { offset, block } => {
            check_rank(1, extent.rank())?;
            return plan(
                &SpaceRequest::Block {
                    offset: &[*offset],
                    block: &[*block],
                },
                extent,
                access,
                policy,
            );
        }
        SpaceRequest::Block { offset, block } => {
            block_along_axes(offset, block, extent, access, policy)?.map(|(effective, extend_to)| {
                HyperslabPlan {
                    file_start: offset.to_vec(),
                    file_count: effective.clone(),
                    memory_dims: effective.clone(),
                    memory_selection: None,
                    effective_block: effective,
                    extend_to,
                    whole: false,
                }
            })
        }
        SpaceRequest::BlockIntoBlock {
            offset,
            block,
            memory_dims,
            memory_offset,
        } => {
            check_rank(extent.rank(), memory_dims.len())?;
            check_rank(extent.rank(), memory_offset.len())?;
            match block_along_axes(offset, block, extent, access, policy)? {
                None => None,
                Some((effective, extend_to)) => {
                    for axis in 0..effective.len() {
                        let fits = memory_offset[axis]
                            .checked_add(effective[axis])
                            .is_some_and(|end| end <= memory_dims[axis]);
                        if !fits {
                            return Err(TypeMapError::OutOfBounds {
                                what: "memory array",
                                axis,
                                offset: memory_offset[axis],
                                block: effective[axis],
                                size: memory_dims[axis],
                            });
                        }
                    }
                    Some(HyperslabPlan {
                        file_start: offset.to_vec(),
                        file_count: effective.clone(),
                        memory_dims: memory_dims.to_vec(),
                        memory_selection: Some((memory_offset.to_vec(), effective.clone())),
                        effective_block: effective,
                        extend_to,
                        whole: false,
                    })
                }
            }
        }
        SpaceRequest::Slice {
            bound,
            offset,
            block,
        } => {
            let rank = extent.rank();
            if let Some((axis, _)) = bound.iter().find(|&(axis, _)| axis >= rank) {
                return Err(TypeMapError::RankMismatch {
                    expected: rank,
                    actual: axis + 1,
                });
            }
            check_rank(rank - bound.len(), offset.len())?;
            check_rank(rank - bound.len(), block.len())?;

            let mut full_offset = Vec::with_capacity(rank);
            let mut full_block = Vec::with_capacity(rank);
            let mut free = 0;
            for axis in 0..rank {
                match bound.get(axis) {
                    Some(index) => {
                        full_offset.push(index);
                        full_block.push(1);
                    }
                    None => {
                        full_offset.push(offset[free]);
                        full_block.push(block[free]);
                        free += 1;
                    }
                }
            }
            block_along_axes(&full_offset, &full_block, extent, access, policy)?.map(
                |(effective, extend_to)| {
                    let mut memory_dims: Vec<u64> = (0..rank)
                        .filter(|&axis| bound.get(axis).is_none())
                        .map(|axis| effective[axis])
                        .collect();
                    // Binding every axis still yields a one-element block.
                    if memory_dims.is_empty() {
                        memory_dims.push(1);
                    }
                    HyperslabPlan {
                        file_start: full_offset,
                        file_count: effective.clone(),
                        memory_dims,
                        memory_selection: None,
                        effective_block: effective,
                        extend_to,
                        whole: false,
                    }
                },
            )
        }
    };
    if let Some(p) = &planned {
        log::trace!(
            "hyperslab start={:?} count={:?} memory={:?} extend={:?}",
            p.file_start,
            p.file_count,
            p.memory_dims,
            p.extend_to
        );
    }
    Ok(planned)
}

/// Native dataspace handles realising a [`HyperslabPlan`].
///
/// The handles belong to the scope they were opened in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataspaceParams {
    pub memory_space: Hid,
    pub file_space: Hid,
    pub effective_block: Vec<u64>,
    pub dims: Vec<u64>,
}

impl DataspaceParams {
    /// Extend the dataset if the plan requires it, then select the file and
    /// memory hyperslabs.
    pub fn open(scope: &CleanupScope<'_>, dataset: Hid, plan: &HyperslabPlan) -> Result<Self> {
        let native = scope.native();
        if let Some(dims) = &plan.extend_to {
            log::debug!("extending dataset {dataset:?} to {dims:?}");
            native.extend_dataset(dataset, dims)?;
        }
        if plan.whole {
            return Ok(Self {
                memory_space: Hid::ALL,
                file_space: Hid::ALL,
                effective_block: plan.effective_block.clone(),
                dims: plan.memory_dims.clone(),
            });
        }
        let file_space = scope.dataset_space(dataset)?;
        native.select_hyperslab(file_space, &plan.file_start, &plan.file_count)?;
        let memory_space = scope.create_space(&plan.memory_dims, None)?;
        if let Some((start, count)) = &plan.memory_selection {
            native.select_hyperslab(memory_space, start, count)?;
        }
        Ok(Self {
            memory_space,
            file_space,
            effective_block: plan.effective_block.clone(),
            dims: plan.memory_dims.clone(),
        })
    }
}
