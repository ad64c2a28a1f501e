//! Planned dataset transfers shared by the typed readers and writers.

use rustyhdf5_typemap::space::plan;
use rustyhdf5_typemap::{
    Access, CleanupScope, DataspaceParams, Hid, HyperslabPlan, OutOfBoundsPolicy, SpaceRequest,
};

use crate::error::{AtPath, Result};
use crate::file::H5File;

/// Bytes read for one request together with the plan that produced them.
pub(crate) struct ReadBlock {
    pub bytes: Vec<u8>,
    pub plan: HyperslabPlan,
}

impl ReadBlock {
    pub fn element_count(&self) -> usize {
        self.plan.memory_dims.iter().product::<u64>() as usize
    }
}

/// Read the selection described by `request` from `ds` as `mem_type`
/// elements.
///
/// `initial` seeds the memory buffer; block-into-block reads only touch
/// the selected region of it.
pub(crate) fn read(
    file: &H5File,
    scope: &CleanupScope<'_>,
    ds: Hid,
    mem_type: Hid,
    request: &SpaceRequest<'_>,
    initial: Option<Vec<u8>>,
    path: &str,
) -> Result<Option<ReadBlock>> {
    let policy = file.reader_config().out_of_bounds;
    let extent = file.extent(scope, ds, path)?;
    let Some(plan) = plan(request, &extent, Access::Read, policy).at(path)? else {
        log::trace!("'{path}': read request {request:?} is out of bounds, returning nothing");
        return Ok(None);
    };
    let params = DataspaceParams::open(scope, ds, &plan).at(path)?;
    let element_size = file.native().describe_type(mem_type).at(path)?.memory_size();
    let elements = plan.memory_dims.iter().product::<u64>() as usize;
    let mut bytes = initial.unwrap_or_default();
    bytes.resize(elements * element_size, 0);
    file.native()
        .read_dataset(ds, mem_type, params.memory_space, params.file_space, &mut bytes)
        .at(path)?;
    Ok(Some(ReadBlock { bytes, plan }))
}

/// Write `bytes` to the selection described by `request`, extending the
/// dataset first when it is extendable and the selection reaches past it.
pub(crate) fn write(
    file: &H5File,
    scope: &CleanupScope<'_>,
    ds: Hid,
    mem_type: Hid,
    request: &SpaceRequest<'_>,
    bytes: &[u8],
    path: &str,
) -> Result<()> {
    let extent = file.extent(scope, ds, path)?;
    let access = Access::Write {
        extendable: extent.max_dims.is_some(),
    };
    let Some(plan) = plan(request, &extent, access, OutOfBoundsPolicy::Fail).at(path)? else {
        return Ok(());
    };
    let params = DataspaceParams::open(scope, ds, &plan).at(path)?;
    file.native()
        .write_dataset(ds, mem_type, params.memory_space, params.file_space, bytes)
        .at(path)
}

/// Offset of block number `index` for blocks of `block` elements.
pub(crate) fn block_offset(index: u64, block: usize) -> u64 {
    index.saturating_mul(block as u64)
}

/// Offsets of N-D block number `index` for blocks of `dims`.
pub(crate) fn md_block_offset(index: &[u64], dims: &[u64]) -> Vec<u64> {
    index.iter().zip(dims).map(|(&i, &d)| i.saturating_mul(d)).collect()
}

pub(crate) fn as_block(dims: &[u64]) -> Vec<i64> {
    dims.iter().map(|&d| d as i64).collect()
}
