//! An in-memory implementation of the native call surface.
//!
//! `MemoryNative` keeps every file as a map of object paths to datasets and
//! committed types. Dataset and attribute bytes are held in storage form
//! (packed compounds, variable-length strings as 16-byte heap ids into a
//! file-independent global heap). Reads and writes convert between the
//! stored type and the caller's memory type element by element, matching
//! compound members by name, the way the native library does.
//!
//! Live handles and live variable-length allocations are counted so tests
//! can check that every acquisition is released.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

use byteorder::{BigEndian, ByteOrder, LittleEndian, NativeEndian};

use crate::byteify::Form;
use crate::datatype::{CompoundMember, Datatype, DatatypeByteOrder};
use crate::error::{ErrorMajor, ErrorMinor, NativeError, Result, TypeMapError};
use crate::native::{Hid, Native, StorageLayout, VlenHeap, UNLIMITED};

/// Largest raw data size of a compact dataset.
pub const COMPACT_LIMIT: usize = 64 * 1024;

fn fail(major: ErrorMajor, minor: ErrorMinor, message: impl Into<String>) -> TypeMapError {
    NativeError::new(major, minor, message).into()
}

// ---- variable-length heap ----

/// Token-addressed byte store backing variable-length data.
///
/// Tokens start at 1; 0 is the null token.
#[derive(Debug)]
pub struct VlenArena {
    slots: RefCell<BTreeMap<u64, Vec<u8>>>,
    next: Cell<u64>,
}

impl Default for VlenArena {
    fn default() -> Self {
        Self {
            slots: RefCell::new(BTreeMap::new()),
            next: Cell::new(1),
        }
    }
}

impl VlenArena {
    /// Release the payload behind `token`. Returns whether it was live.
    pub fn free(&self, token: u64) -> bool {
        self.slots.borrow_mut().remove(&token).is_some()
    }

    /// Number of live allocations.
    pub fn live(&self) -> usize {
        self.slots.borrow().len()
    }
}

impl VlenHeap for VlenArena {
    fn store(&self, bytes: &[u8]) -> Result<u64> {
        let token = self.next.get();
        self.next.set(token + 1);
        self.slots.borrow_mut().insert(token, bytes.to_vec());
        Ok(token)
    }

    fn load(&self, token: u64) -> Result<Vec<u8>> {
        self.slots.borrow().get(&token).cloned().ok_or_else(|| {
            fail(
                ErrorMajor::Resource,
                ErrorMinor::NotFound,
                format!("no variable-length data at {token:#x}"),
            )
        })
    }
}

// ---- stored objects ----

#[derive(Debug, Clone)]
struct Space {
    dims: Vec<u64>,
    max_dims: Option<Vec<u64>>,
    selection: Option<(Vec<u64>, Vec<u64>)>,
}

#[derive(Debug, Clone)]
struct StoredAttribute {
    datatype: Datatype,
    dims: Vec<u64>,
    data: Vec<u8>,
}

#[derive(Debug, Clone)]
struct StoredDataset {
    datatype: Datatype,
    dims: Vec<u64>,
    max_dims: Option<Vec<u64>>,
    layout: StorageLayout,
    data: Vec<u8>,
    address: u64,
}

#[derive(Debug, Default)]
struct FileData {
    datasets: BTreeMap<String, StoredDataset>,
    types: BTreeMap<String, (Datatype, u64)>,
    /// Attributes by owning object path; `/` is the file itself.
    attributes: BTreeMap<String, BTreeMap<String, StoredAttribute>>,
}

impl FileData {
    fn address_of(&self, path: &str) -> Option<u64> {
        self.datasets
            .get(path)
            .map(|d| d.address)
            .or_else(|| self.types.get(path).map(|(_, a)| *a))
    }

    fn path_of(&self, address: u64) -> Option<String> {
        self.datasets
            .iter()
            .find(|(_, d)| d.address == address)
            .map(|(p, _)| p.clone())
            .or_else(|| {
                self.types
                    .iter()
                    .find(|(_, (_, a))| *a == address)
                    .map(|(p, _)| p.clone())
            })
    }

    fn is_group(&self, path: &str) -> bool {
        if path == "/" {
            return true;
        }
        let prefix = format!("{path}/");
        self.datasets.keys().chain(self.types.keys()).any(|k| k.starts_with(&prefix))
    }
}

#[derive(Debug, Clone)]
enum Object {
    File(String),
    Type(Datatype),
    Space(Space),
    Dataset { file: String, path: String },
    Attribute { file: String, owner: String, name: String },
}

impl Object {
    fn kind(&self) -> &'static str {
        match self {
            Object::File(_) => "file",
            Object::Type(_) => "datatype",
            Object::Space(_) => "dataspace",
            Object::Dataset { .. } => "dataset",
            Object::Attribute { .. } => "attribute",
        }
    }
}

#[derive(Debug)]
struct State {
    initialized: bool,
    handles: BTreeMap<i64, Object>,
    next_hid: i64,
    files: BTreeMap<String, FileData>,
    next_address: u64,
}

impl Default for State {
    fn default() -> Self {
        Self {
            initialized: false,
            handles: BTreeMap::new(),
            next_hid: 1,
            files: BTreeMap::new(),
            next_address: 1,
        }
    }
}

impl State {
    fn insert(&mut self, object: Object) -> Hid {
        let id = self.next_hid;
        self.next_hid += 1;
        self.handles.insert(id, object);
        Hid::new(id)
    }

    fn address(&mut self) -> u64 {
        let a = self.next_address;
        self.next_address += 1;
        a
    }

    fn object(&self, hid: Hid) -> Result<&Object> {
        self.handles.get(&hid.raw()).ok_or_else(|| {
            fail(
                ErrorMajor::Args,
                ErrorMinor::BadValue,
                format!("{hid:?} is not a valid handle"),
            )
        })
    }

    fn remove(&mut self, hid: Hid, kind: &'static str) -> Result<()> {
        match self.handles.get(&hid.raw()) {
            Some(obj) if obj.kind() == kind => {
                self.handles.remove(&hid.raw());
                Ok(())
            }
            _ => Err(wrong_handle(hid, kind)),
        }
    }

    fn file_name(&self, hid: Hid) -> Result<String> {
        match self.object(hid)? {
            Object::File(name) => Ok(name.clone()),
            _ => Err(wrong_handle(hid, "file")),
        }
    }

    fn file(&self, name: &str) -> Result<&FileData> {
        self.files
            .get(name)
            .ok_or_else(|| fail(ErrorMajor::File, ErrorMinor::NotFound, format!("no file '{name}'")))
    }

    fn file_mut(&mut self, name: &str) -> Result<&mut FileData> {
        self.files
            .get_mut(name)
            .ok_or_else(|| fail(ErrorMajor::File, ErrorMinor::NotFound, format!("no file '{name}'")))
    }

    fn datatype(&self, hid: Hid) -> Result<&Datatype> {
        match self.object(hid)? {
            Object::Type(dt) => Ok(dt),
            _ => Err(wrong_handle(hid, "datatype")),
        }
    }

    fn space(&self, hid: Hid) -> Result<&Space> {
        match self.object(hid)? {
            Object::Space(s) => Ok(s),
            _ => Err(wrong_handle(hid, "dataspace")),
        }
    }

    fn dataset_key(&self, hid: Hid) -> Result<(String, String)> {
        match self.object(hid)? {
            Object::Dataset { file, path } => Ok((file.clone(), path.clone())),
            _ => Err(wrong_handle(hid, "dataset")),
        }
    }

    fn dataset(&self, hid: Hid) -> Result<&StoredDataset> {
        let (file, path) = self.dataset_key(hid)?;
        self.file(&file)?.datasets.get(&path).ok_or_else(|| missing_dataset(&path))
    }

    fn dataset_mut(&mut self, hid: Hid) -> Result<&mut StoredDataset> {
        let (file, path) = self.dataset_key(hid)?;
        self.file_mut(&file)?
            .datasets
            .get_mut(&path)
            .ok_or_else(|| missing_dataset(&path))
    }

    /// File and object path owning attributes of `obj`.
    fn owner(&self, obj: Hid) -> Result<(String, String)> {
        match self.object(obj)? {
            Object::File(name) => Ok((name.clone(), "/".to_string())),
            Object::Dataset { file, path } => Ok((file.clone(), path.clone())),
            _ => Err(wrong_handle(obj, "file or dataset")),
        }
    }

    fn attribute_key(&self, hid: Hid) -> Result<(String, String, String)> {
        match self.object(hid)? {
            Object::Attribute { file, owner, name } => Ok((file.clone(), owner.clone(), name.clone())),
            _ => Err(wrong_handle(hid, "attribute")),
        }
    }

    fn attribute(&self, hid: Hid) -> Result<&StoredAttribute> {
        let (file, owner, name) = self.attribute_key(hid)?;
        self.file(&file)?
            .attributes
            .get(&owner)
            .and_then(|attrs| attrs.get(&name))
            .ok_or_else(|| missing_attribute(&name))
    }
}

fn wrong_handle(hid: Hid, kind: &str) -> TypeMapError {
    fail(
        ErrorMajor::Args,
        ErrorMinor::BadValue,
        format!("{hid:?} is not a {kind} handle"),
    )
}

fn missing_dataset(path: &str) -> TypeMapError {
    fail(
        ErrorMajor::Dataset,
        ErrorMinor::NotFound,
        format!("dataset '{path}' does not exist"),
    )
}

fn missing_attribute(name: &str) -> TypeMapError {
    fail(
        ErrorMajor::Attribute,
        ErrorMinor::NotFound,
        format!("attribute '{name}' does not exist"),
    )
}

/// Canonical object path: leading `/`, no trailing `/`.
fn normalize(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    format!("/{trimmed}")
}

/// Rewrite compound members to packed offsets, as stored in a file.
fn packed(datatype: &Datatype) -> Datatype {
    match datatype {
        Datatype::Compound { members, .. } => {
            let mut sorted: Vec<&CompoundMember> = members.iter().collect();
            sorted.sort_by_key(|m| m.byte_offset);
            let mut offset = 0u64;
            let members: Vec<CompoundMember> = sorted
                .into_iter()
                .map(|m| {
                    let datatype = packed(&m.datatype);
                    let member = CompoundMember {
                        name: m.name.clone(),
                        byte_offset: offset,
                        datatype,
                    };
                    offset += member.datatype.type_size() as u64;
                    member
                })
                .collect();
            Datatype::Compound {
                size: offset as u32,
                members,
            }
        }
        Datatype::Array {
            base_type,
            dimensions,
        } => Datatype::Array {
            base_type: Box::new(packed(base_type)),
            dimensions: dimensions.clone(),
        },
        other => other.clone(),
    }
}

fn space_elements(dims: &[u64]) -> u64 {
    dims.iter().product()
}

/// Row-major linear indices selected from an extent.
fn selected_indices(dims: &[u64], selection: Option<&(Vec<u64>, Vec<u64>)>) -> Result<Vec<usize>> {
    let (start, count) = match selection {
        Some((s, c)) => (s.clone(), c.clone()),
        None => (vec![0; dims.len()], dims.to_vec()),
    };
    if start.len() != dims.len() || count.len() != dims.len() {
        return Err(fail(
            ErrorMajor::Dataspace,
            ErrorMinor::BadSelect,
            format!("selection rank {} does not match extent rank {}", start.len(), dims.len()),
        ));
    }
    for axis in 0..dims.len() {
        if start[axis] + count[axis] > dims[axis] {
            return Err(fail(
                ErrorMajor::Dataspace,
                ErrorMinor::BadRange,
                format!(
                    "selection {}+{} exceeds extent {} on axis {axis}",
                    start[axis], count[axis], dims[axis]
                ),
            ));
        }
    }
    let total = space_elements(&count) as usize;
    let mut out = Vec::with_capacity(total);
    if total == 0 {
        return Ok(out);
    }
    let mut pos = vec![0u64; dims.len()];
    loop {
        let mut linear = 0u64;
        for axis in 0..dims.len() {
            linear = linear * dims[axis] + start[axis] + pos[axis];
        }
        out.push(linear as usize);
        let mut axis = dims.len();
        loop {
            if axis == 0 {
                return Ok(out);
            }
            axis -= 1;
            pos[axis] += 1;
            if pos[axis] < count[axis] {
                break;
            }
            pos[axis] = 0;
        }
    }
}

// ---- type conversion ----

fn size_in(datatype: &Datatype, form: Form) -> usize {
    match form {
        Form::Storage => datatype.type_size(),
        Form::Memory => datatype.memory_size(),
    }
}

fn no_path(src: &Datatype, dst: &Datatype) -> TypeMapError {
    fail(
        ErrorMajor::Datatype,
        ErrorMinor::CantInit,
        format!("no conversion path from {} to {}", src.describe(), dst.describe()),
    )
}

/// Whether a conversion path exists between two types.
fn convertible(src: &Datatype, dst: &Datatype) -> bool {
    use Datatype as D;
    match (src, dst) {
        (D::FixedPoint { .. } | D::FloatingPoint { .. }, D::FixedPoint { .. } | D::FloatingPoint { .. }) => true,
        (D::String { .. }, D::String { .. }) => true,
        (D::VariableLength { is_string: true, .. }, D::VariableLength { is_string: true, .. }) => true,
        (D::BitField { .. }, D::BitField { .. }) => true,
        (D::Reference { .. }, D::Reference { .. }) => true,
        (D::Enumeration { .. }, D::Enumeration { .. }) => true,
        (D::Time { size: a }, D::Time { size: b }) => a == b,
        (D::Opaque { size: a, tag: t }, D::Opaque { size: b, tag: u }) => a == b && t == u,
        (D::Compound { members: from, .. }, D::Compound { members: to, .. }) => to.iter().all(|m| {
            from.iter()
                .find(|s| s.name == m.name)
                .map_or(true, |s| convertible(&s.datatype, &m.datatype))
        }),
        (
            D::Array {
                base_type: a,
                dimensions: x,
            },
            D::Array {
                base_type: b,
                dimensions: y,
            },
        ) => x == y && convertible(a, b),
        _ => false,
    }
}

fn read_int(bytes: &[u8], size: usize, order: DatatypeByteOrder, signed: bool) -> i128 {
    match (order, signed) {
        (DatatypeByteOrder::LittleEndian, true) => LittleEndian::read_int(bytes, size) as i128,
        (DatatypeByteOrder::LittleEndian, false) => LittleEndian::read_uint(bytes, size) as i128,
        (DatatypeByteOrder::BigEndian, true) => BigEndian::read_int(bytes, size) as i128,
        (DatatypeByteOrder::BigEndian, false) => BigEndian::read_uint(bytes, size) as i128,
    }
}

fn write_int(out: &mut [u8], size: usize, order: DatatypeByteOrder, signed: bool, value: i128) {
    let bits = size as u32 * 8;
    let (min, max) = if signed {
        (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
    } else {
        (0, (1i128 << bits) - 1)
    };
    let v = value.clamp(min, max);
    match (order, signed) {
        (DatatypeByteOrder::LittleEndian, true) => LittleEndian::write_int(out, v as i64, size),
        (DatatypeByteOrder::LittleEndian, false) => LittleEndian::write_uint(out, v as u64, size),
        (DatatypeByteOrder::BigEndian, true) => BigEndian::write_int(out, v as i64, size),
        (DatatypeByteOrder::BigEndian, false) => BigEndian::write_uint(out, v as u64, size),
    }
}

fn read_float(bytes: &[u8], size: u32, order: DatatypeByteOrder) -> f64 {
    match (order, size) {
        (DatatypeByteOrder::LittleEndian, 4) => LittleEndian::read_f32(bytes) as f64,
        (DatatypeByteOrder::BigEndian, 4) => BigEndian::read_f32(bytes) as f64,
        (DatatypeByteOrder::LittleEndian, _) => LittleEndian::read_f64(bytes),
        (DatatypeByteOrder::BigEndian, _) => BigEndian::read_f64(bytes),
    }
}

fn write_float(out: &mut [u8], size: u32, order: DatatypeByteOrder, value: f64) {
    match (order, size) {
        (DatatypeByteOrder::LittleEndian, 4) => LittleEndian::write_f32(out, value as f32),
        (DatatypeByteOrder::BigEndian, 4) => BigEndian::write_f32(out, value as f32),
        (DatatypeByteOrder::LittleEndian, _) => LittleEndian::write_f64(out, value),
        (DatatypeByteOrder::BigEndian, _) => BigEndian::write_f64(out, value),
    }
}

/// An integer or float read as a number, whichever the type is.
enum Number {
    Int(i128),
    Float(f64),
}

fn read_number(dt: &Datatype, bytes: &[u8]) -> Number {
    match dt {
        Datatype::FixedPoint {
            size,
            byte_order,
            signed,
        } => Number::Int(read_int(bytes, *size as usize, *byte_order, *signed)),
        Datatype::FloatingPoint { size, byte_order } => Number::Float(read_float(bytes, *size, *byte_order)),
        _ => Number::Int(0),
    }
}

fn write_number(dt: &Datatype, out: &mut [u8], n: Number) {
    match dt {
        Datatype::FixedPoint {
            size,
            byte_order,
            signed,
        } => {
            let v = match n {
                Number::Int(i) => i,
                // `as` saturates; NaN becomes 0.
                Number::Float(f) => f as i128,
            };
            write_int(out, *size as usize, *byte_order, *signed, v);
        }
        Datatype::FloatingPoint { size, byte_order } => {
            let v = match n {
                Number::Int(i) => i as f64,
                Number::Float(f) => f,
            };
            write_float(out, *size, *byte_order, v);
        }
        _ => {}
    }
}

fn enum_base(base: &Datatype) -> (usize, DatatypeByteOrder) {
    match base {
        Datatype::FixedPoint { size, byte_order, .. } => (*size as usize, *byte_order),
        other => (other.type_size(), DatatypeByteOrder::LittleEndian),
    }
}

/// Moves element data between the storage heap and the memory arena.
struct Converter<'a> {
    arena: &'a VlenArena,
    storage: &'a VlenArena,
    src_form: Form,
    dst_form: Form,
}

impl Converter<'_> {
    fn heap(&self, form: Form) -> &VlenArena {
        match form {
            Form::Storage => self.storage,
            Form::Memory => self.arena,
        }
    }

    fn vlen_token(form: Form, bytes: &[u8]) -> u64 {
        match form {
            Form::Storage => LittleEndian::read_u64(&bytes[4..12]),
            Form::Memory => NativeEndian::read_u64(&bytes[0..8]),
        }
    }

    fn element(&self, src: &Datatype, s: &[u8], dst: &Datatype, d: &mut [u8]) -> Result<()> {
        use Datatype as D;
        match (src, dst) {
            (D::FixedPoint { .. } | D::FloatingPoint { .. }, D::FixedPoint { .. } | D::FloatingPoint { .. }) => {
                write_number(dst, d, read_number(src, s));
            }
            (D::String { .. }, D::String { .. }) => {
                let n = s.len().min(d.len());
                d[..n].copy_from_slice(&s[..n]);
                d[n..].fill(0);
            }
            (D::VariableLength { .. }, D::VariableLength { .. }) => {
                let token = Self::vlen_token(self.src_form, s);
                let payload = if token == 0 {
                    Vec::new()
                } else {
                    self.heap(self.src_form).load(token)?
                };
                if self.dst_form == Form::Storage {
                    let old = Self::vlen_token(Form::Storage, d);
                    if old != 0 {
                        self.storage.free(old);
                    }
                }
                let new = if payload.is_empty() {
                    0
                } else {
                    self.heap(self.dst_form).store(&payload)?
                };
                match self.dst_form {
                    Form::Storage => {
                        LittleEndian::write_u32(&mut d[0..4], payload.len() as u32);
                        LittleEndian::write_u64(&mut d[4..12], new);
                        LittleEndian::write_u32(&mut d[12..16], 0);
                    }
                    Form::Memory => NativeEndian::write_u64(&mut d[0..8], new),
                }
            }
            (
                D::BitField {
                    size: ss,
                    byte_order: so,
                },
                D::BitField {
                    size: ds,
                    byte_order: dor,
                },
            ) => {
                let n = (*ss).min(*ds) as usize;
                let mut le = s[..*ss as usize].to_vec();
                if *so == DatatypeByteOrder::BigEndian {
                    le.reverse();
                }
                d.fill(0);
                d[..n].copy_from_slice(&le[..n]);
                if *dor == DatatypeByteOrder::BigEndian {
                    d[..*ds as usize].reverse();
                }
            }
            (D::Reference { .. }, D::Reference { .. }) | (D::Time { .. }, D::Time { .. }) | (D::Opaque { .. }, D::Opaque { .. }) => {
                let n = s.len().min(d.len());
                d[..n].copy_from_slice(&s[..n]);
            }
            (
                D::Enumeration {
                    base_type: sb,
                    members: sm,
                },
                D::Enumeration {
                    base_type: db,
                    members: dm,
                },
            ) => {
                let (ssize, sorder) = enum_base(sb);
                let (dsize, dorder) = enum_base(db);
                let raw = read_int(s, ssize, sorder, false);
                let name = sm
                    .iter()
                    .find(|m| LittleEndian::read_uint(&m.value, m.value.len()) as i128 == raw)
                    .map(|m| m.name.as_str());
                let target = name.and_then(|n| dm.iter().find(|m| m.name == n));
                match target {
                    Some(m) => {
                        let v = LittleEndian::read_uint(&m.value, m.value.len()) as i128;
                        write_int(d, dsize, dorder, false, v);
                    }
                    None => {
                        return Err(fail(
                            ErrorMajor::Datatype,
                            ErrorMinor::CantConvert,
                            format!("enumeration value {raw} has no counterpart in {}", dst.describe()),
                        ))
                    }
                }
            }
            (D::Compound { members: from, .. }, D::Compound { members: to, .. }) => {
                for m in to {
                    let Some(sm) = from.iter().find(|s| s.name == m.name) else {
                        continue;
                    };
                    let so = sm.byte_offset as usize;
                    let dof = m.byte_offset as usize;
                    let sl = size_in(&sm.datatype, self.src_form);
                    let dl = size_in(&m.datatype, self.dst_form);
                    self.element(&sm.datatype, &s[so..so + sl], &m.datatype, &mut d[dof..dof + dl])?;
                }
            }
            (D::Array { base_type: sb, .. }, D::Array { base_type: db, .. }) => {
                let sl = size_in(sb, self.src_form);
                let dl = size_in(db, self.dst_form);
                for (se, de) in s.chunks_exact(sl).zip(d.chunks_exact_mut(dl)) {
                    self.element(sb, se, db, de)?;
                }
            }
            _ => return Err(no_path(src, dst)),
        }
        Ok(())
    }
}

/// Free the memory-form variable-length payloads of one element.
fn reclaim_element(arena: &VlenArena, dt: &Datatype, bytes: &mut [u8]) {
    match dt {
        Datatype::VariableLength { .. } => {
            let token = NativeEndian::read_u64(&bytes[0..8]);
            if token != 0 {
                arena.free(token);
            }
            bytes[0..8].fill(0);
        }
        Datatype::Compound { members, .. } => {
            for m in members {
                let start = m.byte_offset as usize;
                let end = start + m.datatype.memory_size();
                reclaim_element(arena, &m.datatype, &mut bytes[start..end]);
            }
        }
        Datatype::Array { base_type, .. } => {
            let size = base_type.memory_size();
            for chunk in bytes.chunks_exact_mut(size) {
                reclaim_element(arena, base_type, chunk);
            }
        }
        _ => {}
    }
}

// ---- the backend ----

/// In-memory native backend.
#[derive(Debug, Default)]
pub struct MemoryNative {
    state: RefCell<State>,
    arena: VlenArena,
    storage: VlenArena,
}

impl MemoryNative {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of open handles of any kind.
    pub fn live_handles(&self) -> usize {
        self.state.borrow().handles.len()
    }

    /// Number of live memory-form variable-length allocations.
    pub fn live_vlen(&self) -> usize {
        self.arena.live()
    }

    /// The global heap holding variable-length data in storage form.
    pub fn storage_heap(&self) -> &VlenArena {
        &self.storage
    }

    /// Stored type, dimensions and raw storage-form bytes of a dataset.
    pub fn raw_dataset(&self, file: &str, path: &str) -> Option<(Datatype, Vec<u64>, Vec<u8>)> {
        let state = self.state.borrow();
        let ds = state.files.get(file)?.datasets.get(&normalize(path))?;
        Some((ds.datatype.clone(), ds.dims.clone(), ds.data.clone()))
    }

    fn converter(&self, src_form: Form, dst_form: Form) -> Converter<'_> {
        Converter {
            arena: &self.arena,
            storage: &self.storage,
            src_form,
            dst_form,
        }
    }

    /// Pair up the elements selected on both sides of a transfer.
    fn transfer_indices(
        state: &State,
        dims: &[u64],
        mem_space: Hid,
        file_space: Hid,
    ) -> Result<(Vec<usize>, Vec<usize>, usize)> {
        let file_sel = if file_space.is_all() {
            selected_indices(dims, None)?
        } else {
            let space = state.space(file_space)?;
            selected_indices(dims, space.selection.as_ref())?
        };
        let (mem_sel, mem_elements) = if mem_space.is_all() {
            let n = file_sel.len();
            ((0..n).collect(), n)
        } else {
            let space = state.space(mem_space)?;
            (
                selected_indices(&space.dims, space.selection.as_ref())?,
                space_elements(&space.dims) as usize,
            )
        };
        if mem_sel.len() != file_sel.len() {
            return Err(fail(
                ErrorMajor::Dataspace,
                ErrorMinor::BadSelect,
                format!(
                    "memory selection has {} elements but file selection has {}",
                    mem_sel.len(),
                    file_sel.len()
                ),
            ));
        }
        Ok((file_sel, mem_sel, mem_elements))
    }

    fn check_buffer(len: usize, needed: usize) -> Result<()> {
        if len < needed {
            return Err(fail(
                ErrorMajor::Args,
                ErrorMinor::BadValue,
                format!("buffer holds {len} bytes but the selection needs {needed}"),
            ));
        }
        Ok(())
    }

    fn read_elements(
        &self,
        stored: &Datatype,
        data: &[u8],
        mem_type: &Datatype,
        pairs: (&[usize], &[usize]),
        buf: &mut [u8],
    ) -> Result<()> {
        if !convertible(stored, mem_type) {
            return Err(no_path(stored, mem_type));
        }
        let ssize = stored.type_size();
        let msize = mem_type.memory_size();
        let conv = self.converter(Form::Storage, Form::Memory);
        for (&fi, &mi) in pairs.0.iter().zip(pairs.1) {
            conv.element(
                stored,
                &data[fi * ssize..(fi + 1) * ssize],
                mem_type,
                &mut buf[mi * msize..(mi + 1) * msize],
            )?;
        }
        Ok(())
    }

    fn write_elements(
        &self,
        stored: &Datatype,
        data: &mut [u8],
        mem_type: &Datatype,
        pairs: (&[usize], &[usize]),
        buf: &[u8],
    ) -> Result<()> {
        if !convertible(mem_type, stored) {
            return Err(no_path(mem_type, stored));
        }
        let ssize = stored.type_size();
        let msize = mem_type.memory_size();
        let conv = self.converter(Form::Memory, Form::Storage);
        for (&fi, &mi) in pairs.0.iter().zip(pairs.1) {
            conv.element(
                mem_type,
                &buf[mi * msize..(mi + 1) * msize],
                stored,
                &mut data[fi * ssize..(fi + 1) * ssize],
            )?;
        }
        Ok(())
    }
}

impl Native for MemoryNative {
    fn init(&self) -> Result<()> {
        self.state.borrow_mut().initialized = true;
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.initialized {
            state.handles.clear();
            state.initialized = false;
        }
        Ok(())
    }

    fn create_file(&self, name: &str) -> Result<Hid> {
        let mut state = self.state.borrow_mut();
        state.files.insert(name.to_string(), FileData::default());
        Ok(state.insert(Object::File(name.to_string())))
    }

    fn open_file(&self, name: &str) -> Result<Hid> {
        let mut state = self.state.borrow_mut();
        state.file(name)?;
        Ok(state.insert(Object::File(name.to_string())))
    }

    fn close_file(&self, file: Hid) -> Result<()> {
        self.state.borrow_mut().remove(file, "file")
    }

    fn create_type(&self, datatype: &Datatype) -> Result<Hid> {
        Ok(self.state.borrow_mut().insert(Object::Type(datatype.clone())))
    }

    fn describe_type(&self, tid: Hid) -> Result<Datatype> {
        self.state.borrow().datatype(tid).cloned()
    }

    fn close_type(&self, tid: Hid) -> Result<()> {
        self.state.borrow_mut().remove(tid, "datatype")
    }

    fn commit_type(&self, file: Hid, path: &str, tid: Hid) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let name = state.file_name(file)?;
        let datatype = state.datatype(tid)?.clone();
        let path = normalize(path);
        let address = state.address();
        let data = state.file_mut(&name)?;
        if data.datasets.contains_key(&path) || data.types.contains_key(&path) {
            return Err(fail(
                ErrorMajor::Datatype,
                ErrorMinor::Exists,
                format!("'{path}' already exists"),
            ));
        }
        data.types.insert(path, (datatype, address));
        Ok(())
    }

    fn open_committed_type(&self, file: Hid, path: &str) -> Result<Hid> {
        let mut state = self.state.borrow_mut();
        let name = state.file_name(file)?;
        let path = normalize(path);
        let datatype = state
            .file(&name)?
            .types
            .get(&path)
            .map(|(dt, _)| dt.clone())
            .ok_or_else(|| {
                fail(
                    ErrorMajor::Datatype,
                    ErrorMinor::NotFound,
                    format!("no committed type at '{path}'"),
                )
            })?;
        Ok(state.insert(Object::Type(datatype)))
    }

    fn create_space(&self, dims: &[u64], max_dims: Option<&[u64]>) -> Result<Hid> {
        if let Some(max) = max_dims {
            let valid = max.len() == dims.len() && max.iter().zip(dims).all(|(&m, &d)| m == UNLIMITED || m >= d);
            if !valid {
                return Err(fail(
                    ErrorMajor::Dataspace,
                    ErrorMinor::BadValue,
                    format!("maximum dimensions {max:?} do not cover {dims:?}"),
                ));
            }
        }
        Ok(self.state.borrow_mut().insert(Object::Space(Space {
            dims: dims.to_vec(),
            max_dims: max_dims.map(<[u64]>::to_vec),
            selection: None,
        })))
    }

    fn space_dims(&self, sid: Hid) -> Result<Vec<u64>> {
        Ok(self.state.borrow().space(sid)?.dims.clone())
    }

    fn space_max_dims(&self, sid: Hid) -> Result<Option<Vec<u64>>> {
        Ok(self.state.borrow().space(sid)?.max_dims.clone())
    }

    fn select_hyperslab(&self, sid: Hid, start: &[u64], count: &[u64]) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let dims = state.space(sid)?.dims.clone();
        let selection = (start.to_vec(), count.to_vec());
        // Validates rank and range.
        selected_indices(&dims, Some(&selection))?;
        if let Some(Object::Space(space)) = state.handles.get_mut(&sid.raw()) {
            space.selection = Some(selection);
        }
        Ok(())
    }

    fn close_space(&self, sid: Hid) -> Result<()> {
        self.state.borrow_mut().remove(sid, "dataspace")
    }

    fn create_dataset(&self, file: Hid, path: &str, tid: Hid, sid: Hid, layout: &StorageLayout) -> Result<Hid> {
        let mut state = self.state.borrow_mut();
        let name = state.file_name(file)?;
        let datatype = packed(state.datatype(tid)?);
        let space = state.space(sid)?.clone();
        let path = normalize(path);

        let bad = |msg: String| fail(ErrorMajor::Dataset, ErrorMinor::BadValue, msg);
        let extendable = space.max_dims.as_ref().is_some_and(|max| *max != space.dims);
        match layout {
            StorageLayout::Chunked(chunk) => {
                if chunk.len() != space.dims.len() || chunk.iter().any(|&c| c == 0) {
                    return Err(bad(format!(
                        "chunk {chunk:?} does not fit a rank {} dataspace",
                        space.dims.len()
                    )));
                }
            }
            _ if extendable => {
                return Err(bad(format!("'{path}': only chunked datasets can be extendable")));
            }
            StorageLayout::Compact => {
                let bytes = space_elements(&space.dims) as usize * datatype.type_size();
                if bytes > COMPACT_LIMIT {
                    return Err(bad(format!(
                        "'{path}': {bytes} bytes exceed the compact storage limit of {COMPACT_LIMIT}"
                    )));
                }
            }
            StorageLayout::Contiguous => {}
        }

        let address = state.address();
        let data = state.file_mut(&name)?;
        if data.datasets.contains_key(&path) || data.types.contains_key(&path) {
            return Err(fail(
                ErrorMajor::Dataset,
                ErrorMinor::Exists,
                format!("'{path}' already exists"),
            ));
        }
        let size = space_elements(&space.dims) as usize * datatype.type_size();
        data.datasets.insert(
            path.clone(),
            StoredDataset {
                datatype,
                dims: space.dims,
                max_dims: space.max_dims,
                layout: layout.clone(),
                data: vec![0; size],
                address,
            },
        );
        Ok(state.insert(Object::Dataset { file: name, path }))
    }

    fn open_dataset(&self, file: Hid, path: &str) -> Result<Hid> {
        let mut state = self.state.borrow_mut();
        let name = state.file_name(file)?;
        let path = normalize(path);
        if !state.file(&name)?.datasets.contains_key(&path) {
            return Err(missing_dataset(&path));
        }
        Ok(state.insert(Object::Dataset { file: name, path }))
    }

    fn dataset_type(&self, ds: Hid) -> Result<Hid> {
        let mut state = self.state.borrow_mut();
        let datatype = state.dataset(ds)?.datatype.clone();
        Ok(state.insert(Object::Type(datatype)))
    }

    fn dataset_space(&self, ds: Hid) -> Result<Hid> {
        let mut state = self.state.borrow_mut();
        let stored = state.dataset(ds)?;
        let space = Space {
            dims: stored.dims.clone(),
            max_dims: stored.max_dims.clone(),
            selection: None,
        };
        Ok(state.insert(Object::Space(space)))
    }

    fn dataset_layout(&self, ds: Hid) -> Result<StorageLayout> {
        Ok(self.state.borrow().dataset(ds)?.layout.clone())
    }

    fn extend_dataset(&self, ds: Hid, dims: &[u64]) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let stored = state.dataset_mut(ds)?;
        let cant = |msg: String| fail(ErrorMajor::Dataset, ErrorMinor::CantExtend, msg);
        if stored.layout.chunk_dims().is_none() {
            return Err(cant("only chunked datasets can change extent".to_string()));
        }
        if dims.len() != stored.dims.len() {
            return Err(cant(format!("rank {} does not match {}", dims.len(), stored.dims.len())));
        }
        let max = stored.max_dims.clone().unwrap_or_else(|| stored.dims.clone());
        if let Some(axis) = (0..dims.len()).find(|&a| max[a] != UNLIMITED && dims[a] > max[a]) {
            return Err(cant(format!(
                "extent {} exceeds maximum {} on axis {axis}",
                dims[axis], max[axis]
            )));
        }
        let size = stored.datatype.type_size();
        let mut data = vec![0u8; space_elements(dims) as usize * size];
        let common: Vec<u64> = stored.dims.iter().zip(dims).map(|(&a, &b)| a.min(b)).collect();
        let selection = (vec![0; dims.len()], common);
        let from = selected_indices(&stored.dims, Some(&selection))?;
        let to = selected_indices(dims, Some(&selection))?;
        for (f, t) in from.into_iter().zip(to) {
            data[t * size..(t + 1) * size].copy_from_slice(&stored.data[f * size..(f + 1) * size]);
        }
        stored.data = data;
        stored.dims = dims.to_vec();
        Ok(())
    }

    fn read_dataset(&self, ds: Hid, mem_type: Hid, mem_space: Hid, file_space: Hid, buf: &mut [u8]) -> Result<()> {
        let state = self.state.borrow();
        let stored = state.dataset(ds)?;
        let mem_dt = state.datatype(mem_type)?;
        let (file_sel, mem_sel, mem_elements) = Self::transfer_indices(&state, &stored.dims, mem_space, file_space)?;
        Self::check_buffer(buf.len(), mem_elements * mem_dt.memory_size())?;
        self.read_elements(&stored.datatype, &stored.data, mem_dt, (&file_sel, &mem_sel), buf)
    }

    fn write_dataset(&self, ds: Hid, mem_type: Hid, mem_space: Hid, file_space: Hid, buf: &[u8]) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let (mut data, stored_type, file_sel, mem_sel) = {
            let stored = state.dataset(ds)?;
            let mem_dt = state.datatype(mem_type)?;
            let (file_sel, mem_sel, mem_elements) =
                Self::transfer_indices(&state, &stored.dims, mem_space, file_space)?;
            Self::check_buffer(buf.len(), mem_elements * mem_dt.memory_size())?;
            (stored.data.clone(), stored.datatype.clone(), file_sel, mem_sel)
        };
        let mem_dt = state.datatype(mem_type)?.clone();
        self.write_elements(&stored_type, &mut data, &mem_dt, (&file_sel, &mem_sel), buf)?;
        state.dataset_mut(ds)?.data = data;
        Ok(())
    }

    fn close_dataset(&self, ds: Hid) -> Result<()> {
        self.state.borrow_mut().remove(ds, "dataset")
    }

    fn exists(&self, file: Hid, path: &str) -> Result<bool> {
        let state = self.state.borrow();
        let data = state.file(&state.file_name(file)?)?;
        let path = normalize(path);
        Ok(data.datasets.contains_key(&path) || data.types.contains_key(&path) || data.is_group(&path))
    }

    fn delete(&self, file: Hid, path: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let name = state.file_name(file)?;
        let data = state.file_mut(&name)?;
        let path = normalize(path);
        let prefix = format!("{path}/");
        let doomed = |k: &String| *k == path || k.starts_with(&prefix);
        let before = data.datasets.len() + data.types.len();
        data.datasets.retain(|k, _| !doomed(k));
        data.types.retain(|k, _| !doomed(k));
        data.attributes.retain(|k, _| k == "/" || !doomed(k));
        if data.datasets.len() + data.types.len() == before {
            return Err(fail(
                ErrorMajor::Link,
                ErrorMinor::NotFound,
                format!("'{path}' does not exist"),
            ));
        }
        Ok(())
    }

    fn create_attribute(&self, obj: Hid, name: &str, tid: Hid, sid: Hid) -> Result<Hid> {
        let mut state = self.state.borrow_mut();
        let (file, owner) = state.owner(obj)?;
        let datatype = packed(state.datatype(tid)?);
        let dims = state.space(sid)?.dims.clone();
        let attrs = state.file_mut(&file)?.attributes.entry(owner.clone()).or_default();
        if attrs.contains_key(name) {
            return Err(fail(
                ErrorMajor::Attribute,
                ErrorMinor::Exists,
                format!("attribute '{name}' already exists on '{owner}'"),
            ));
        }
        let size = space_elements(&dims) as usize * datatype.type_size();
        attrs.insert(
            name.to_string(),
            StoredAttribute {
                datatype,
                dims,
                data: vec![0; size],
            },
        );
        Ok(state.insert(Object::Attribute {
            file,
            owner,
            name: name.to_string(),
        }))
    }

    fn open_attribute(&self, obj: Hid, name: &str) -> Result<Hid> {
        let mut state = self.state.borrow_mut();
        if !self.has_attribute_in(&state, obj, name)? {
            return Err(missing_attribute(name));
        }
        let (file, owner) = state.owner(obj)?;
        Ok(state.insert(Object::Attribute {
            file,
            owner,
            name: name.to_string(),
        }))
    }

    fn has_attribute(&self, obj: Hid, name: &str) -> Result<bool> {
        let state = self.state.borrow();
        self.has_attribute_in(&state, obj, name)
    }

    fn delete_attribute(&self, obj: Hid, name: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let (file, owner) = state.owner(obj)?;
        let removed = state
            .file_mut(&file)?
            .attributes
            .get_mut(&owner)
            .and_then(|attrs| attrs.remove(name));
        match removed {
            Some(_) => Ok(()),
            None => Err(missing_attribute(name)),
        }
    }

    fn attribute_type(&self, attr: Hid) -> Result<Hid> {
        let mut state = self.state.borrow_mut();
        let datatype = state.attribute(attr)?.datatype.clone();
        Ok(state.insert(Object::Type(datatype)))
    }

    fn attribute_space(&self, attr: Hid) -> Result<Hid> {
        let mut state = self.state.borrow_mut();
        let dims = state.attribute(attr)?.dims.clone();
        Ok(state.insert(Object::Space(Space {
            dims,
            max_dims: None,
            selection: None,
        })))
    }

    fn read_attribute(&self, attr: Hid, mem_type: Hid, buf: &mut [u8]) -> Result<()> {
        let state = self.state.borrow();
        let stored = state.attribute(attr)?;
        let mem_dt = state.datatype(mem_type)?;
        let n = space_elements(&stored.dims) as usize;
        Self::check_buffer(buf.len(), n * mem_dt.memory_size())?;
        let all: Vec<usize> = (0..n).collect();
        self.read_elements(&stored.datatype, &stored.data, mem_dt, (&all, &all), buf)
    }

    fn write_attribute(&self, attr: Hid, mem_type: Hid, buf: &[u8]) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let stored = state.attribute(attr)?.clone();
        let mem_dt = state.datatype(mem_type)?.clone();
        let n = space_elements(&stored.dims) as usize;
        Self::check_buffer(buf.len(), n * mem_dt.memory_size())?;
        let all: Vec<usize> = (0..n).collect();
        let mut data = stored.data;
        self.write_elements(&stored.datatype, &mut data, &mem_dt, (&all, &all), buf)?;

        let (file, owner, name) = state.attribute_key(attr)?;
        if let Some(target) = state
            .file_mut(&file)?
            .attributes
            .get_mut(&owner)
            .and_then(|attrs| attrs.get_mut(&name))
        {
            target.data = data;
        }
        Ok(())
    }

    fn close_attribute(&self, attr: Hid) -> Result<()> {
        self.state.borrow_mut().remove(attr, "attribute")
    }

    fn heap(&self) -> &dyn VlenHeap {
        &self.arena
    }

    fn reclaim(&self, mem_type: Hid, buf: &mut [u8]) -> Result<()> {
        let datatype = self.describe_type(mem_type)?;
        if !datatype.has_variable_length() {
            return Ok(());
        }
        let size = datatype.memory_size();
        for element in buf.chunks_exact_mut(size) {
            reclaim_element(&self.arena, &datatype, element);
        }
        Ok(())
    }

    fn object_reference(&self, file: Hid, path: &str) -> Result<u64> {
        let state = self.state.borrow();
        let path = normalize(path);
        state
            .file(&state.file_name(file)?)?
            .address_of(&path)
            .ok_or_else(|| {
                fail(
                    ErrorMajor::Reference,
                    ErrorMinor::NotFound,
                    format!("cannot reference '{path}': no such object"),
                )
            })
    }

    fn dereference(&self, file: Hid, reference: u64) -> Result<String> {
        let state = self.state.borrow();
        if reference == 0 {
            return Err(fail(ErrorMajor::Reference, ErrorMinor::BadValue, "null reference"));
        }
        state
            .file(&state.file_name(file)?)?
            .path_of(reference)
            .ok_or_else(|| {
                fail(
                    ErrorMajor::Reference,
                    ErrorMinor::NotFound,
                    format!("no object at address {reference:#x}"),
                )
            })
    }
}

impl MemoryNative {
    fn has_attribute_in(&self, state: &State, obj: Hid, name: &str) -> Result<bool> {
        let (file, owner) = state.owner(obj)?;
        Ok(state
            .file(&file)?
            .attributes
            .get(&owner)
            .is_some_and(|attrs| attrs.contains_key(name)))
    }
}
