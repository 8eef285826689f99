//! Ring-buffer pipelining of one sequential loop.
//!
//! Every array the loop sweeps at constant offsets `min..=max` from the loop
//! variable gets a local buffer of `max - min + 3` slots along the swept axis.
//! Inside the loop, offset `o` lives in slot `o - min + 1`; slot `0` and slot
//! `max - min + 2` take the element the next iteration needs, for negative and
//! positive steps respectively. The loop is reshaped as
//!
//! ```text
//! before -> prefetch -> first -> guard -> [shift -> body] -> last -> store -> after
//! ```
//!
//! where `first` and `last` are the peeled boundary iterations, `prefetch`
//! loads the initial window, `shift` rotates the buffer by one slot and every
//! iteration loads the one new element it brings into the window. Writes stay
//! in the buffer and are written back one iteration late, so the write-back
//! never races the computation producing the value. Arrays selected for
//! storing are written back, and so is every array a state outside the loop
//! refers to.

use std::collections::BTreeSet;

use strata_ir::{AccessType, Expr, Lifetime, Match, Memlet, Node, Pattern, Program, Range, State, StateId, Subset};
use tracing::{debug, trace};

use crate::config::PrefetchConfig;
use crate::error::*;
use crate::loops::{LoopInfo, bypass_loop, detect_loop, loop_pattern, matched_loop, peel_loop};
use crate::transform::Transformation;

pub const BUFFER_PREFIX: &str = "_loc_buf_";
pub const STAGING_PREFIX: &str = "_tmp_loc_buf_";

/// Iteration count assumed for loops with symbolic bounds.
pub const SYMBOLIC_NITER: i64 = 3;

pub fn buffer_name(name: &str) -> String {
    format!("{BUFFER_PREFIX}{name}")
}

pub fn staging_name(name: &str) -> String {
    format!("{STAGING_PREFIX}{name}")
}

#[derive(Debug, Clone, Default)]
pub struct PrefetchField {
    pub config: PrefetchConfig,
    /// Arrays never buffered, whatever the config selects.
    pub exclude: BTreeSet<String>,
}

impl PrefetchField {
    pub fn new(config: PrefetchConfig) -> Self {
        Self { config, exclude: BTreeSet::new() }
    }

    /// Windows of the arrays to buffer, or `None` if the loop cannot be
    /// pipelined with this configuration.
    fn plan(&self, program: &Program, info: &LoopInfo) -> Option<Vec<Window>> {
        if info.body.len() != 1 || info.bounds.stride.abs() != 1 {
            return None;
        }
        let state = program.state(info.first()).ok()?;
        let explicit = self.config.arrays.is_some();
        let mut windows = Vec::new();
        for name in program.arrays.keys().filter(|n| self.config.selects(n) && !self.exclude.contains(*n)) {
            if name.starts_with("__tmp") || name.starts_with(BUFFER_PREFIX) || name.starts_with(STAGING_PREFIX) {
                continue;
            }
            if program.arrays.contains_key(&buffer_name(name)) {
                continue;
            }
            match footprint(state, name, &info.var) {
                Footprint::Untouched => {}
                Footprint::Swept(window) => windows.push(window),
                Footprint::Unsupported(reason) if explicit => {
                    trace!(array = %name, reason, "cannot buffer selected array");
                    return None;
                }
                Footprint::Unsupported(reason) => trace!(array = %name, reason, "skipping array"),
            }
        }
        (!windows.is_empty()).then_some(windows)
    }
}

impl Transformation for PrefetchField {
    fn name(&self) -> &'static str {
        "prefetch_field"
    }

    fn patterns(&self) -> Vec<Pattern> {
        vec![loop_pattern()]
    }

    fn can_be_applied(&self, program: &Program, candidate: &Match) -> bool {
        matched_loop(program, candidate).is_some_and(|info| self.plan(program, &info).is_some())
    }

    fn apply(&self, program: &mut Program, candidate: &Match) -> Result<()> {
        let info = matched_loop(program, candidate).ok_or_else(|| {
            LoopNotDetectedSnafu { pass: self.name(), state: candidate.node(1).map_or(0, |s| s.index()) }.build()
        })?;
        let windows = self.plan(program, &info).ok_or_else(|| {
            UnsupportedLoopSnafu { pass: self.name(), reason: "no array can be buffered" }.build()
        })?;
        pipeline(program, &info, &windows, &self.config)
    }
}

// ============================================================================
// Footprint analysis
// ============================================================================

/// Accesses of one array along the swept axis, as offsets from the loop
/// variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub name: String,
    pub axis: usize,
    pub min: i64,
    pub max: i64,
    /// Offsets read from the array.
    pub reads: BTreeSet<i64>,
    /// The single offset written, if any.
    pub write: Option<i64>,
    /// Union of the subsets read from / written to access nodes of the array.
    pub read_box: Option<Subset>,
    pub write_box: Option<Subset>,
}

impl Window {
    pub fn span(&self) -> i64 {
        self.max - self.min
    }

    /// Number of buffer slots along the swept axis.
    pub fn len(&self) -> i64 {
        self.span() + 3
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Footprint {
    /// The state never indexes the array with the loop variable.
    Untouched,
    Unsupported(&'static str),
    Swept(Window),
}

/// How `state` accesses `name` along the axis indexed by `var`.
pub fn footprint(state: &State, name: &str, var: &str) -> Footprint {
    let mut axis = None;
    let mut offsets = BTreeSet::new();
    let mut reads = BTreeSet::new();
    let mut writes = BTreeSet::new();
    let mut read_box: Option<Subset> = None;
    let mut write_box: Option<Subset> = None;

    for e in state.edge_ids() {
        let (Some(edge), Some((src, dst))) = (state.edge(e), state.endpoints(e)) else { continue };
        let from = state.node(src).is_ok_and(|n| n.is_access_to(name));
        let to = state.node(dst).is_ok_and(|n| n.is_access_to(name));
        if !edge.memlet.data_is(name) {
            if from || to {
                return Footprint::Unsupported("copy described by another array");
            }
            continue;
        }
        if edge.memlet.other_subset.is_some() {
            return Footprint::Unsupported("copy between arrays");
        }
        let subset = &edge.memlet.subset;
        let dims = subset.dims_with_symbol(var);
        let &[d] = dims.as_slice() else {
            return Footprint::Unsupported("loop variable does not index exactly one dimension");
        };
        if axis.replace(d).is_some_and(|a| a != d) {
            return Footprint::Unsupported("loop variable indexes different dimensions");
        }
        let Some(range) = subset.dim(d) else { return Footprint::Unsupported("rank mismatch") };
        let (Some(begin), Some(end)) = (range.begin.offset_from(var), range.end.offset_from(var)) else {
            return Footprint::Unsupported("index is not the loop variable plus a constant");
        };
        offsets.extend([begin, end]);
        if from {
            reads.extend([begin, end]);
            read_box = Some(match read_box {
                Some(b) => b.union(subset).unwrap_or(b),
                None => subset.clone(),
            });
        }
        if to {
            if begin != end {
                return Footprint::Unsupported("write covers several elements of the swept axis");
            }
            writes.insert(begin);
            write_box = Some(match write_box {
                Some(b) => b.union(subset).unwrap_or(b),
                None => subset.clone(),
            });
        }
    }

    let Some(axis) = axis else { return Footprint::Untouched };
    if writes.len() > 1 {
        return Footprint::Unsupported("written at several offsets");
    }
    let (Some(&min), Some(&max)) = (offsets.first(), offsets.last()) else { return Footprint::Untouched };
    Footprint::Swept(Window {
        name: name.to_owned(),
        axis,
        min,
        max,
        reads,
        write: writes.first().copied(),
        read_box,
        write_box,
    })
}

// ============================================================================
// Rewrite
// ============================================================================

/// Pipeline `info`'s loop for `windows`.
#[tracing::instrument(skip_all, fields(guard = info.guard.index(), var = %info.var))]
pub fn pipeline(program: &mut Program, info: &LoopInfo, windows: &[Window], config: &PrefetchConfig) -> Result<()> {
    let niter = info.niter().unwrap_or(SYMBOLIC_NITER);
    let stride = info.bounds.stride;
    // Peeled copies land outside the body, so look before peeling.
    let escaping: BTreeSet<&str> =
        windows.iter().map(|w| w.name.as_str()).filter(|name| referenced_outside(program, info, name)).collect();
    let (start, end) = (info.bounds.start.clone(), info.bounds.end.clone());
    let redetect = |program: &Program| {
        detect_loop(program, info.guard)
            .ok_or_else(|| LoopNotDetectedSnafu { pass: "prefetch_field", state: info.guard.index() }.build())
    };

    if niter <= 0 {
        bypass_loop(program, info);
        debug!(niter, "removed empty loop");
        return Ok(());
    }
    if niter == 1 {
        peel_loop(program, info, 1, true)?;
        let residual = redetect(program)?;
        bypass_loop(program, &residual);
        debug!(niter, "inlined single iteration");
        return Ok(());
    }

    let first = first_copy(peel_loop(program, info, 1, true)?)?;
    let shortened = redetect(program)?;
    let last = first_copy(peel_loop(program, &shortened, 1, false)?)?;
    let residual = niter >= 3;
    if !residual {
        let empty = redetect(program)?;
        bypass_loop(program, &empty);
    }

    let label = program.name.clone();
    let prefetch = program.add_state_before(first, format!("{label}_prefetch_state"));
    let store = program.add_state_after(last, format!("{label}_store_state"));
    let shift = residual.then(|| program.add_state_before(info.first(), format!("{label}_shift_state")));
    let body = info.first();
    let var = Expr::sym(&info.var);

    for window in windows {
        let name = window.name.as_str();
        let mut buffer = program.array(name)?.clone();
        if let Some(extent) = buffer.shape.get_mut(window.axis) {
            *extent = Expr::int(window.len());
        }
        buffer.transient = true;
        buffer.storage = config.storage;
        buffer.lifetime = Lifetime::Program;
        program.add_array(buffer_name(name), buffer.clone())?;
        program.add_array(staging_name(name), buffer)?;
        let stored = (config.stores(name) || escaping.contains(name)) && window.write.is_some();

        localize(program.state_mut(first)?, window, &start, 1);
        localize(program.state_mut(last)?, window, &end, 1 + stride);
        prefetch_all(program.state_mut(prefetch)?, window, &start);
        prefetch_next(program.state_mut(first)?, window, &start, stride);
        if stored {
            store_deferred(program.state_mut(last)?, window, &end, stride, 1 + stride);
            store_last(program.state_mut(store)?, window, &end, stride);
        }
        if let Some(shift) = shift {
            localize(program.state_mut(body)?, window, &var, 1);
            prefetch_next(program.state_mut(body)?, window, &var, stride);
            shift_buffer(program, shift, window, stride)?;
            if stored {
                store_deferred(program.state_mut(body)?, window, &var, stride, 1);
            }
        }
        debug!(array = name, len = window.len(), write = ?window.write, stored, "buffered array");
    }
    debug!(niter, arrays = windows.len(), residual, "pipelined loop");
    Ok(())
}

/// Whether a state outside the loop body refers to `name`.
fn referenced_outside(program: &Program, info: &LoopInfo, name: &str) -> bool {
    program.state_ids().into_iter().filter(|sid| *sid != info.guard && !info.body.contains(sid)).any(|sid| {
        program.state(sid).is_ok_and(|state| !state.access_nodes(name).is_empty())
    })
}

fn first_copy(copies: Vec<StateId>) -> Result<StateId> {
    copies.first().copied().ok_or_else(|| {
        StructuralAssumptionSnafu { pass: "prefetch_field", reason: "peeling produced no state" }.build()
    })
}

/// `subset` with the swept axis replaced by `range`.
fn on_axis(subset: &Subset, axis: usize, range: Range) -> Subset {
    let mut out = subset.clone();
    if let Some(dim) = out.dim_mut(axis) {
        *dim = range;
    }
    out
}

/// Redirect every access to the array in `state` to its buffer. `kval` is the
/// loop variable's value in the state and `base` the slot of offset `min`.
fn localize(state: &mut State, window: &Window, kval: &Expr, base: i64) {
    let buffer = buffer_name(&window.name);
    let shift = Expr::int(base - window.min) - kval.clone();
    for e in state.edge_ids() {
        let Some(edge) = state.edge_mut(e) else { continue };
        if !edge.memlet.data_is(&window.name) {
            continue;
        }
        edge.memlet.subset = edge.memlet.subset.offset_dim(window.axis, &shift);
        edge.memlet.data = Some(buffer.clone());
    }
    for node in state.access_nodes(&window.name) {
        if let Ok(Node::Access(access)) = state.node_mut(node) {
            access.data = buffer.clone();
        }
    }
}

/// Load the window of the first iteration into slots `1..=span + 1`.
fn prefetch_all(state: &mut State, window: &Window, start: &Expr) {
    let Some(read_box) = &window.read_box else { return };
    let outer = on_axis(read_box, window.axis, Range::new(start.clone() + window.min, start.clone() + window.max, 1));
    let local = on_axis(read_box, window.axis, Range::new(1, window.span() + 1, 1));
    let src = state.add_read(&window.name);
    let dst = state.add_write(buffer_name(&window.name));
    state.add_edge(src, None, dst, None, Memlet::new(&window.name, outer).with_other_subset(local));
}

/// Load the element the next iteration adds to the window.
///
/// Skipped when every read trails the write in the direction of the sweep:
/// those elements are produced in the buffer before they are read.
fn prefetch_next(state: &mut State, window: &Window, kval: &Expr, stride: i64) {
    let Some(read_box) = &window.read_box else { return };
    if let Some(write) = window.write {
        let trailing = if stride > 0 {
            window.reads.last().is_some_and(|&r| r < write)
        } else {
            window.reads.first().is_some_and(|&r| r > write)
        };
        if trailing {
            return;
        }
    }
    let (offset, slot) = if stride > 0 { (window.max, window.span() + 2) } else { (window.min, 0) };
    let outer = on_axis(read_box, window.axis, Range::index(kval.clone() + (stride + offset)));
    let local = on_axis(read_box, window.axis, Range::index(slot));
    let src = state.add_read(&window.name);
    let dst = state.add_write(buffer_name(&window.name));
    state.add_edge(src, None, dst, None, Memlet::new(&window.name, outer).with_other_subset(local));
}

/// Rotate the buffer by one slot against the direction of the sweep.
fn shift_buffer(program: &mut Program, sid: StateId, window: &Window, stride: i64) -> Result<()> {
    let buffer = buffer_name(&window.name);
    let staging = staging_name(&window.name);
    let full = Subset::full(&program.array(&buffer)?.shape);
    let len = window.len();
    let (from, to) = if stride > 0 {
        (Range::new(1, len - 1, 1), Range::new(0, len - 2, 1))
    } else {
        (Range::new(0, len - 2, 1), Range::new(1, len - 1, 1))
    };
    let state = program.state_mut(sid)?;
    let src = state.add_read(&buffer);
    let tmp = state.add_access(&staging, AccessType::ReadWrite);
    let dst = state.add_write(&buffer);
    state.add_edge(src, None, tmp, None, Memlet::new(&buffer, full.clone()));
    let moved =
        Memlet::new(&staging, on_axis(&full, window.axis, from)).with_other_subset(on_axis(&full, window.axis, to));
    state.add_edge(tmp, None, dst, None, moved);
    Ok(())
}

/// Write back the value the previous iteration produced.
fn store_deferred(state: &mut State, window: &Window, kval: &Expr, stride: i64, base: i64) {
    let (Some(write), Some(write_box)) = (window.write, &window.write_box) else { return };
    let local = on_axis(write_box, window.axis, Range::index(write - window.min - stride + base));
    let outer = on_axis(write_box, window.axis, Range::index(kval.clone() + (write - stride)));
    let src = state.add_read(buffer_name(&window.name));
    let dst = state.add_write(&window.name);
    state.add_edge(src, None, dst, None, Memlet::new(buffer_name(&window.name), local).with_other_subset(outer));
}

/// Write back the value of the last iteration.
fn store_last(state: &mut State, window: &Window, end: &Expr, stride: i64) {
    let (Some(write), Some(write_box)) = (window.write, &window.write_box) else { return };
    let local = on_axis(write_box, window.axis, Range::index(write - window.min + 1 + stride));
    let outer = on_axis(write_box, window.axis, Range::index(end.clone() + write));
    let src = state.add_read(buffer_name(&window.name));
    let dst = state.add_write(&window.name);
    state.add_edge(src, None, dst, None, Memlet::new(buffer_name(&window.name), local).with_other_subset(outer));
}
