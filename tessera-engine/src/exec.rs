//! Query execution against the in-memory cell store.
//!
//! Reads enumerate matching cells (per-dimension union of ranges,
//! intersected across dimensions, defaulting to the whole domain) in the
//! selected layout order and deliver them until some registered buffer
//! would overflow; a partial delivery leaves a continuation cursor behind.
//! Writes consume registered buffers whole and materialize cells into the
//! store.

use std::collections::{BTreeSet, HashMap};

use itertools::Itertools;
use log::debug;
use tessera_dtype::{ArrayType, Datatype, Layout, QueryStatus, QueryType};

use crate::array::ArrayStore;
use crate::cells::{CellKey, CoordValue};
use crate::error::{engine_bail, engine_err, EngineResult};
use crate::query::{resolve_field, QueryState, RangeBytes, RawBinding, ReadPlan, ResolvedField};
use crate::scalar;
use crate::schema::{DimensionData, SchemaData};

pub(crate) fn execute(
    array: &ArrayStore,
    query_type: QueryType,
    state: &mut QueryState,
) -> EngineResult<QueryStatus> {
    if state.buffers.is_empty() {
        engine_bail!("no buffers are set on the query");
    }
    match query_type {
        QueryType::Read => execute_read(array, state),
        QueryType::Write => execute_write(array, state),
    }
}

fn fixed_width(datatype: Datatype) -> EngineResult<u64> {
    datatype.byte_width().map_err(|e| engine_err!("{}", e))
}

/// Whether `coord` falls in the union of `ranges` on its dimension. No
/// registered ranges select everything.
fn dim_matches(
    dim: &DimensionData,
    ranges: &[RangeBytes],
    coord: &CoordValue,
) -> EngineResult<bool> {
    if ranges.is_empty() {
        return Ok(true);
    }
    match coord {
        CoordValue::Int(v) => {
            for r in ranges {
                let lo = scalar::read_int(&r.start, dim.datatype)?;
                let hi = scalar::read_int(&r.end, dim.datatype)?;
                if lo <= *v && *v <= hi {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        CoordValue::Bytes(b) => Ok(ranges
            .iter()
            .any(|r| r.start.as_slice() <= b.as_slice() && b.as_slice() <= r.end.as_slice())),
    }
}

/// The ascending coordinate list selected on one dense dimension.
fn selected_coords(dim: &DimensionData, ranges: &[RangeBytes]) -> EngineResult<Vec<i128>> {
    let (lo, hi) = dim.int_bounds()?;
    if ranges.is_empty() {
        return Ok((lo..=hi).collect());
    }
    let mut selected = BTreeSet::new();
    for r in ranges {
        let start = scalar::read_int(&r.start, dim.datatype)?;
        let end = scalar::read_int(&r.end, dim.datatype)?;
        if start > end {
            engine_bail!(
                "range start {} exceeds end {} on dimension '{}'",
                start,
                end,
                dim.name
            );
        }
        if start < lo || end > hi {
            engine_bail!(
                "range [{}, {}] lies outside domain [{}, {}] of dimension '{}'",
                start,
                end,
                lo,
                hi,
                dim.name
            );
        }
        selected.extend(start..=end);
    }
    Ok(selected.into_iter().collect())
}

/// Enumerate the selected cells of a dense array in layout order.
/// Global-order and unordered layouts fall back to the global (row-major)
/// cell order.
fn dense_cells(schema: &SchemaData, state: &QueryState) -> EngineResult<Vec<CellKey>> {
    let mut lists = Vec::with_capacity(schema.domain.dimensions.len());
    for (d, dim) in schema.domain.dimensions.iter().enumerate() {
        lists.push(selected_coords(dim, &state.ranges[d])?);
    }
    let col_major = state.layout == Layout::ColMajor;
    if col_major {
        lists.reverse();
    }
    Ok(lists
        .iter()
        .map(|l| l.iter().copied())
        .multi_cartesian_product()
        .map(|mut coords| {
            if col_major {
                coords.reverse();
            }
            coords.into_iter().map(CoordValue::Int).collect()
        })
        .collect())
}

/// Collect and order the stored cells of a sparse array matching the
/// query's ranges.
fn sparse_cells(array: &ArrayStore, state: &QueryState) -> EngineResult<Vec<CellKey>> {
    let schema = array.schema();
    let table = array.cells.read();
    let mut keys = Vec::new();
    for (key, _) in table.iter() {
        let mut matched = true;
        for (d, dim) in schema.domain.dimensions.iter().enumerate() {
            if !dim_matches(dim, &state.ranges[d], &key[d])? {
                matched = false;
                break;
            }
        }
        if matched {
            keys.push(key.clone());
        }
    }
    match state.layout {
        Layout::ColMajor => keys.sort_by(|a, b| a.iter().rev().cmp(b.iter().rev())),
        _ => keys.sort(),
    }
    Ok(keys)
}

/// How one registered buffer participates in a read.
enum FieldPlan {
    Coords { dims: Vec<Datatype> },
    DimFixed { index: usize, datatype: Datatype },
    DimVar { index: usize },
    AttrFixed { name: String, cell_len: usize },
    AttrVar { name: String },
}

fn read_field_plans(
    schema: &SchemaData,
    buffers: &HashMap<String, RawBinding>,
) -> EngineResult<Vec<(RawBinding, FieldPlan)>> {
    let mut fields = Vec::with_capacity(buffers.len());
    for (name, binding) in buffers {
        let plan = match resolve_field(schema, name)? {
            ResolvedField::Coords => {
                let domain_type = schema.domain.datatype()?;
                if !domain_type.is_integer() {
                    engine_bail!("coordinate tuples require an integer-typed domain");
                }
                FieldPlan::Coords {
                    dims: schema.domain.dimensions.iter().map(|d| d.datatype).collect(),
                }
            }
            ResolvedField::Dimension(index, dim) => {
                if dim.cell_val_num.is_var() {
                    FieldPlan::DimVar { index }
                } else {
                    FieldPlan::DimFixed {
                        index,
                        datatype: dim.datatype,
                    }
                }
            }
            ResolvedField::Attribute(attr) => {
                if attr.cell_val_num.is_var() {
                    FieldPlan::AttrVar { name: name.clone() }
                } else {
                    let cell_len = (fixed_width(attr.datatype)?
                        * attr.cell_val_num.fixed_or_one() as u64)
                        as usize;
                    FieldPlan::AttrFixed {
                        name: name.clone(),
                        cell_len,
                    }
                }
            }
        };
        fields.push((*binding, plan));
    }
    Ok(fields)
}

fn execute_read(array: &ArrayStore, state: &mut QueryState) -> EngineResult<QueryStatus> {
    let schema = array.schema();
    let stale = state.plan.as_ref().map_or(true, |p| p.epoch != state.epoch);
    if stale {
        let cells = match schema.array_type {
            ArrayType::Dense => dense_cells(schema, state)?,
            ArrayType::Sparse => sparse_cells(array, state)?,
        };
        debug!("planned read of {} cells from '{}'", cells.len(), array.uri());
        state.plan = Some(ReadPlan {
            cells,
            cursor: 0,
            epoch: state.epoch,
        });
    }

    let fields = read_field_plans(schema, &state.buffers)?;
    let table = array.cells.read();

    let plan = match state.plan.as_mut() {
        Some(p) => p,
        None => engine_bail!("read plan missing after planning"),
    };

    // (offsets bytes, data bytes) used so far per field.
    let mut used = vec![(0u64, 0u64); fields.len()];
    let mut count = 0usize;

    'cells: for key in &plan.cells[plan.cursor..] {
        let mut payloads = Vec::with_capacity(fields.len());
        for (_, plan) in &fields {
            let bytes = match plan {
                FieldPlan::Coords { dims } => {
                    let mut out = Vec::new();
                    for (d, dt) in dims.iter().enumerate() {
                        match &key[d] {
                            CoordValue::Int(v) => scalar::write_int(*v, *dt, &mut out)?,
                            CoordValue::Bytes(_) => engine_bail!(
                                "coordinate tuples require fixed-width dimensions"
                            ),
                        }
                    }
                    out
                }
                FieldPlan::DimFixed { index, datatype } => {
                    let mut out = Vec::new();
                    match &key[*index] {
                        CoordValue::Int(v) => scalar::write_int(*v, *datatype, &mut out)?,
                        CoordValue::Bytes(_) => {
                            engine_bail!("dimension stores string coordinates; bind it variable")
                        }
                    }
                    out
                }
                FieldPlan::DimVar { index } => match &key[*index] {
                    CoordValue::Bytes(b) => b.clone(),
                    CoordValue::Int(_) => {
                        engine_bail!("dimension stores scalar coordinates; bind it fixed")
                    }
                },
                FieldPlan::AttrFixed { name, cell_len } => {
                    match table.get(key).and_then(|row| row.values.get(name)) {
                        Some(v) => v.clone(),
                        // Unwritten dense cells read as zeroed fill.
                        None => vec![0u8; *cell_len],
                    }
                }
                FieldPlan::AttrVar { name } => table
                    .get(key)
                    .and_then(|row| row.values.get(name))
                    .cloned()
                    .unwrap_or_default(),
            };
            payloads.push(bytes);
        }

        for (i, (binding, _)) in fields.iter().enumerate() {
            let (off_used, data_used) = used[i];
            if data_used + payloads[i].len() as u64 > binding.data_capacity {
                break 'cells;
            }
            if let Some(off) = binding.offsets {
                if off_used + 8 > off.capacity {
                    break 'cells;
                }
            }
        }

        for (i, (binding, _)) in fields.iter().enumerate() {
            let payload = &payloads[i];
            let (off_used, data_used) = &mut used[i];
            if let Some(off) = binding.offsets {
                unsafe {
                    *off.ptr.get().add((*off_used / 8) as usize) = *data_used;
                }
                *off_used += 8;
            }
            unsafe {
                std::ptr::copy_nonoverlapping(
                    payload.as_ptr(),
                    binding.data.get().add(*data_used as usize),
                    payload.len(),
                );
            }
            *data_used += payload.len() as u64;
        }
        count += 1;
    }

    for (i, (binding, _)) in fields.iter().enumerate() {
        let (off_used, data_used) = used[i];
        unsafe {
            *binding.data_size.get() = data_used;
        }
        if let Some(off) = binding.offsets {
            unsafe {
                *off.size.get() = off_used;
            }
        }
    }

    plan.cursor += count;
    let finished = plan.cursor >= plan.cells.len();
    debug!(
        "read delivered {} cells ({} of {})",
        count,
        plan.cursor,
        plan.cells.len()
    );
    state.delivered = count as u64;
    if finished {
        state.plan = None;
        Ok(QueryStatus::Completed)
    } else {
        Ok(QueryStatus::Incomplete)
    }
}

fn execute_write(array: &ArrayStore, state: &mut QueryState) -> EngineResult<QueryStatus> {
    let schema = array.schema();
    match schema.array_type {
        ArrayType::Dense => match state.layout {
            Layout::RowMajor | Layout::ColMajor => dense_write(array, state),
            Layout::GlobalOrder => dense_global_write(array, state),
            Layout::Unordered => engine_bail!("unordered layout is not valid for dense writes"),
        },
        ArrayType::Sparse => match state.layout {
            Layout::Unordered | Layout::GlobalOrder => sparse_write(array, state),
            other => engine_bail!("{} layout is not valid for sparse writes", other),
        },
    }
}

/// Split a registered variable-sized buffer into per-cell payloads using
/// its offsets (byte positions into the data buffer).
fn var_cells(offsets: &[u64], data: &[u8]) -> EngineResult<Vec<Vec<u8>>> {
    let mut out = Vec::with_capacity(offsets.len());
    for (i, &start) in offsets.iter().enumerate() {
        let end = offsets.get(i + 1).copied().unwrap_or(data.len() as u64);
        if start > end || end > data.len() as u64 {
            engine_bail!("offsets do not ascend within the data buffer");
        }
        out.push(data[start as usize..end as usize].to_vec());
    }
    Ok(out)
}

/// Per-cell payloads held by a registered buffer, plus the byte counts
/// consumed when `take` cells are written.
fn bound_cells(binding: &RawBinding, cell_len: Option<usize>) -> EngineResult<Vec<Vec<u8>>> {
    match (binding.offsets, cell_len) {
        (None, Some(len)) => {
            let n = binding.data_capacity as usize / len;
            let data =
                unsafe { std::slice::from_raw_parts(binding.data.get(), n * len) };
            Ok(data.chunks_exact(len).map(|c| c.to_vec()).collect())
        }
        (Some(off), None) => {
            let n = (off.capacity / 8) as usize;
            let offsets = unsafe { std::slice::from_raw_parts(off.ptr.get(), n) };
            let data = unsafe {
                std::slice::from_raw_parts(binding.data.get(), binding.data_capacity as usize)
            };
            var_cells(offsets, data)
        }
        _ => engine_bail!("buffer registration form does not match the field"),
    }
}

fn consumed_bytes(binding: &RawBinding, cells: &[Vec<u8>], taken: usize) -> (u64, u64) {
    let data: u64 = cells[..taken].iter().map(|c| c.len() as u64).sum();
    let offsets = if binding.offsets.is_some() {
        8 * taken as u64
    } else {
        0
    };
    (offsets, data)
}

fn write_size_cells(binding: &RawBinding, offsets_used: u64, data_used: u64) {
    unsafe {
        *binding.data_size.get() = data_used;
    }
    if let Some(off) = binding.offsets {
        unsafe {
            *off.size.get() = offsets_used;
        }
    }
}

/// The bound attribute buffers of a write, split into per-cell payloads.
/// Every schema attribute must be bound; dimension or coordinate buffers
/// are only legal for sparse writes.
fn write_attr_cells(
    schema: &SchemaData,
    state: &QueryState,
    coords_legal: bool,
) -> EngineResult<Vec<(String, RawBinding, Vec<Vec<u8>>)>> {
    let mut out = Vec::new();
    for attr in &schema.attributes {
        let binding = match state.buffers.get(&attr.name) {
            Some(b) => b,
            None => engine_bail!("write requires a buffer for attribute '{}'", attr.name),
        };
        let cell_len = if attr.cell_val_num.is_var() {
            None
        } else {
            Some((fixed_width(attr.datatype)? * attr.cell_val_num.fixed_or_one() as u64) as usize)
        };
        out.push((
            attr.name.clone(),
            *binding,
            bound_cells(binding, cell_len)?,
        ));
    }
    if !coords_legal {
        for name in state.buffers.keys() {
            if !matches!(resolve_field(schema, name)?, ResolvedField::Attribute(_)) {
                engine_bail!("dense writes take attribute buffers only, got '{}'", name);
            }
        }
    }
    Ok(out)
}

fn store_cells(
    array: &ArrayStore,
    keys: &[CellKey],
    attrs: &[(String, RawBinding, Vec<Vec<u8>>)],
    from: usize,
    n: usize,
) {
    let mut table = array.cells.write();
    for (name, _, cells) in attrs {
        for i in 0..n {
            table.upsert(keys[from + i].clone(), name, cells[i].clone());
        }
    }
}

fn dense_write(array: &ArrayStore, state: &mut QueryState) -> EngineResult<QueryStatus> {
    let schema = array.schema();
    let keys = dense_cells(schema, state)?;
    let attrs = write_attr_cells(schema, state, false)?;
    for (name, _, cells) in &attrs {
        if cells.len() < keys.len() {
            engine_bail!(
                "buffer for '{}' holds {} cells, subarray write needs {}",
                name,
                cells.len(),
                keys.len()
            );
        }
    }
    store_cells(array, &keys, &attrs, 0, keys.len());
    for (_, binding, cells) in &attrs {
        let (off_used, data_used) = consumed_bytes(binding, cells, keys.len());
        write_size_cells(binding, off_used, data_used);
    }
    debug!("dense write stored {} cells into '{}'", keys.len(), array.uri());
    state.delivered = keys.len() as u64;
    Ok(QueryStatus::Completed)
}

fn dense_global_write(array: &ArrayStore, state: &mut QueryState) -> EngineResult<QueryStatus> {
    let schema = array.schema();
    let keys = dense_cells(schema, state)?;
    let attrs = write_attr_cells(schema, state, false)?;
    let start = state.global_cursor as usize;
    let available = attrs.iter().map(|(_, _, c)| c.len()).min().unwrap_or(0);
    if start + available > keys.len() {
        engine_bail!(
            "global-order write of {} cells exceeds the subarray ({} of {} already written)",
            available,
            start,
            keys.len()
        );
    }
    store_cells(array, &keys, &attrs, start, available);
    for (_, binding, cells) in &attrs {
        let (off_used, data_used) = consumed_bytes(binding, cells, available);
        write_size_cells(binding, off_used, data_used);
    }
    state.global_cursor += available as u64;
    debug!(
        "global-order write stored {} cells ({} of {})",
        available, state.global_cursor, keys.len()
    );
    state.delivered = available as u64;
    Ok(QueryStatus::Completed)
}

pub(crate) fn finalize_global_write(
    array: &ArrayStore,
    state: &mut QueryState,
) -> EngineResult<()> {
    let schema = array.schema();
    if schema.array_type != ArrayType::Dense {
        return Ok(());
    }
    let total = dense_cells(schema, state)?.len() as u64;
    if state.global_cursor != total {
        engine_bail!(
            "global-order write finalized after {} of {} cells",
            state.global_cursor,
            total
        );
    }
    Ok(())
}

/// Coordinate tuples of a sparse write, from either the coordinate
/// sentinel buffer or per-dimension buffers.
fn sparse_write_keys(schema: &SchemaData, state: &QueryState) -> EngineResult<Vec<CellKey>> {
    let ndim = schema.domain.ndim() as usize;
    let from_coords = state.buffers.get(tessera_dtype::COORDS);
    let dim_bound = schema
        .domain
        .dimensions
        .iter()
        .any(|d| state.buffers.contains_key(&d.name));
    if from_coords.is_some() && dim_bound {
        engine_bail!("bind either the coordinate tuple or per-dimension buffers, not both");
    }

    if let Some(binding) = from_coords {
        let domain_type = schema.domain.datatype()?;
        if !domain_type.is_integer() {
            engine_bail!("coordinate tuples require an integer-typed domain");
        }
        let width = fixed_width(domain_type)? as usize;
        let stride = width * ndim;
        let total = binding.data_capacity as usize;
        if stride == 0 || total % stride != 0 {
            engine_bail!("coordinate buffer is not a whole number of tuples");
        }
        let src = unsafe { std::slice::from_raw_parts(binding.data.get(), total) };
        let mut keys = Vec::with_capacity(total / stride);
        for tuple in src.chunks_exact(stride) {
            let mut key = Vec::with_capacity(ndim);
            for d in 0..ndim {
                key.push(CoordValue::Int(scalar::read_int(
                    &tuple[d * width..],
                    domain_type,
                )?));
            }
            keys.push(key);
        }
        return Ok(keys);
    }

    let mut per_dim: Vec<Vec<CoordValue>> = Vec::with_capacity(ndim);
    for dim in &schema.domain.dimensions {
        let binding = match state.buffers.get(&dim.name) {
            Some(b) => b,
            None => engine_bail!(
                "sparse write requires coordinates; bind '{}' or the coordinate tuple",
                dim.name
            ),
        };
        let coords = if dim.cell_val_num.is_var() {
            bound_cells(binding, None)?
                .into_iter()
                .map(CoordValue::Bytes)
                .collect()
        } else {
            let width = fixed_width(dim.datatype)? as usize;
            bound_cells(binding, Some(width))?
                .into_iter()
                .map(|bytes| scalar::read_int(&bytes, dim.datatype).map(CoordValue::Int))
                .collect::<EngineResult<Vec<_>>>()?
        };
        per_dim.push(coords);
    }
    let n = per_dim[0].len();
    if per_dim.iter().any(|c| c.len() != n) {
        engine_bail!("dimension buffers disagree on the number of cells");
    }
    Ok((0..n)
        .map(|i| per_dim.iter().map(|c| c[i].clone()).collect())
        .collect())
}

fn sparse_write(array: &ArrayStore, state: &mut QueryState) -> EngineResult<QueryStatus> {
    let schema = array.schema();
    let keys = sparse_write_keys(schema, state)?;
    let n = keys.len();

    // Coordinates must fall inside the domain.
    for key in &keys {
        for (d, dim) in schema.domain.dimensions.iter().enumerate() {
            if let CoordValue::Int(v) = &key[d] {
                let (lo, hi) = dim.int_bounds()?;
                if *v < lo || *v > hi {
                    engine_bail!(
                        "coordinate {} lies outside domain [{}, {}] of dimension '{}'",
                        v,
                        lo,
                        hi,
                        dim.name
                    );
                }
            }
        }
    }

    let attrs = write_attr_cells(schema, state, true)?;
    for (name, _, cells) in &attrs {
        if cells.len() != n {
            engine_bail!(
                "buffer for '{}' holds {} cells, coordinates supply {}",
                name,
                cells.len(),
                n
            );
        }
    }
    store_cells(array, &keys, &attrs, 0, n);

    for (_, binding, cells) in &attrs {
        let (off_used, data_used) = consumed_bytes(binding, cells, n);
        write_size_cells(binding, off_used, data_used);
    }
    // Coordinate buffers are consumed whole.
    for (name, binding) in &state.buffers {
        let consumed_as_coords = name == tessera_dtype::COORDS
            || schema.domain.dimension(name).is_some();
        if consumed_as_coords {
            let off_used = binding.offsets.map(|o| (o.capacity / 8) * 8).unwrap_or(0);
            write_size_cells(binding, off_used, binding.data_capacity);
        }
    }

    debug!("sparse write stored {} cells into '{}'", n, array.uri());
    state.delivered = n as u64;
    Ok(QueryStatus::Completed)
}
