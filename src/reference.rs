//! The Reference tensor algebra: an N-dimensional tagged tensor with skip-value
//! semantics and a small set of pure combinators (`cross_product`, `cross_action`,
//! `element_action`, `join`, `slice`, `append`, `transpose`).
//!
//! A [`Reference`] stores its tensor as a `serde_json::Value`: nested JSON arrays
//! whose depth equals `axes.len()`. A cell need not be a scalar — several
//! combinators intentionally produce compound cells (JSON arrays) that sit one
//! level "inside" the tracked axes, exactly mirroring how the value algebra this
//! crate implements treats a cell's content as opaque payload.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::{Error, Result};

/// Sentinel cell value marking a missing/absent entry.
pub const SKIP_VALUE: &str = "@#SKIP#@";

/// Reserved axis name for singleton references; auto-elided when combined with
/// any other axis.
pub const NONE_AXIS: &str = "_none_axis";

/// True if `value` is the skip sentinel.
pub fn is_skip(value: &Json) -> bool {
    matches!(value, Json::String(s) if s == SKIP_VALUE)
}

/// Builds the skip sentinel as a JSON value.
pub fn skip_json() -> Json {
    Json::String(SKIP_VALUE.to_string())
}

/// An N-dimensional tagged tensor.
///
/// Invariants: `axes` are unique; `shape.len() == axes.len()`; `data` is a
/// nested JSON array padded with [`skip_json`] to `shape` along every axis (or
/// ragged with `shape` equal to the maximum observed extent per axis).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    /// Ordered, unique axis names.
    pub axes: Vec<String>,
    /// Extent along each axis, same length and order as `axes`.
    pub shape: Vec<usize>,
    /// Nested JSON array of depth `axes.len()`.
    pub data: Json,
}

fn axis_pos(axes: &[String], name: &str) -> Result<usize> {
    axes.iter()
        .position(|a| a == name)
        .ok_or_else(|| Error::Shape(format!("axis '{name}' not found in {axes:?}")))
}

fn filled_with_skip(shape: &[usize]) -> Json {
    if shape.is_empty() {
        return skip_json();
    }
    Json::Array((0..shape[0]).map(|_| filled_with_skip(&shape[1..])).collect())
}

fn pad_tensor(value: &Json, shape: &[usize]) -> Json {
    if shape.is_empty() {
        return value.clone();
    }
    let dim = shape[0];
    let items: &[Json] = match value {
        Json::Array(v) => v.as_slice(),
        _ => &[],
    };
    let skip = skip_json();
    Json::Array(
        (0..dim)
            .map(|i| pad_tensor(items.get(i).unwrap_or(&skip), &shape[1..]))
            .collect(),
    )
}

fn infer_shape(value: &Json) -> Vec<usize> {
    match value {
        Json::Array(v) => {
            let mut shape = vec![v.len()];
            let sub_shapes: Vec<Vec<usize>> =
                v.iter().filter(|e| e.is_array()).map(infer_shape).collect();
            if let Some(max_len) = sub_shapes.iter().map(|s| s.len()).max() {
                for dim in 0..max_len {
                    let max_extent = sub_shapes.iter().filter_map(|s| s.get(dim)).copied().max().unwrap_or(0);
                    shape.push(max_extent);
                }
            }
            shape
        }
        _ => vec![],
    }
}

fn get_leaves(value: &Json, out: &mut Vec<Json>) {
    match value {
        Json::Array(items) => {
            for item in items {
                get_leaves(item, out);
            }
        }
        v if is_skip(v) => {}
        v => out.push(v.clone()),
    }
}

fn reshape_from_list(items: &mut impl Iterator<Item = Json>, shape: &[usize]) -> Json {
    if shape.is_empty() {
        return items.next().unwrap_or_else(skip_json);
    }
    Json::Array((0..shape[0]).map(|_| reshape_from_list(items, &shape[1..])).collect())
}

fn remove_skip_values(value: &Json) -> Json {
    match value {
        Json::Array(items) => {
            let mut result = Vec::new();
            for item in items {
                if is_skip(item) {
                    continue;
                }
                if item.is_array() {
                    let cleaned = remove_skip_values(item);
                    if matches!(&cleaned, Json::Array(a) if !a.is_empty()) {
                        result.push(cleaned);
                    }
                } else {
                    result.push(item.clone());
                }
            }
            Json::Array(result)
        }
        other => other.clone(),
    }
}

fn drop_axis(data: &Json, axis_idx: usize) -> Json {
    if axis_idx == 0 {
        match data {
            Json::Array(v) if !v.is_empty() => v[0].clone(),
            other => other.clone(),
        }
    } else {
        match data {
            Json::Array(v) => Json::Array(v.iter().map(|item| drop_axis(item, axis_idx - 1)).collect()),
            other => other.clone(),
        }
    }
}

/// Resolves a fallible cell computation per the dev-mode skip-or-propagate rule.
/// `NeedsUserInteraction` always propagates regardless of `dev_mode`.
fn resolve_cell<T>(result: Result<T>, dev_mode: bool, on_skip: impl FnOnce() -> T) -> Result<T> {
    match result {
        Ok(v) => Ok(v),
        Err(e) if e.is_needs_user_interaction() => Err(e),
        Err(e) if dev_mode => Err(e),
        Err(e) => {
            tracing::debug!(error = %e, "combinator callable failed; degrading to skip");
            Ok(on_skip())
        }
    }
}

impl Reference {
    /// Builds a reference of the given axes/shape filled entirely with the skip
    /// sentinel.
    pub fn new(axes: Vec<String>, shape: Vec<usize>) -> Result<Self> {
        if axes.len() != shape.len() {
            return Err(Error::Shape("axes and shape must have the same length".into()));
        }
        let mut seen = std::collections::HashSet::new();
        if !axes.iter().all(|a| seen.insert(a.clone())) {
            return Err(Error::Shape("axes must be unique".into()));
        }
        let data = filled_with_skip(&shape);
        Ok(Self { axes, shape, data })
    }

    /// Builds a reference from nested JSON array data, inferring shape (and axis
    /// names, if not supplied) from the data's irregular extent per axis.
    pub fn from_data(data: Json, axis_names: Option<Vec<String>>) -> Result<Self> {
        if !data.is_array() {
            return Err(Error::Shape("data must be a nested array".into()));
        }
        let mut shape = infer_shape(&data);
        let axes = match axis_names {
            Some(names) => {
                if names.len() > shape.len() {
                    return Err(Error::Shape(format!(
                        "axis name count ({}) exceeds data rank ({})",
                        names.len(),
                        shape.len()
                    )));
                }
                if names.len() < shape.len() {
                    shape.truncate(names.len());
                }
                names
            }
            None => (0..shape.len()).map(|i| format!("axis_{i}")).collect(),
        };
        let padded = pad_tensor(&data, &shape);
        Ok(Self { axes, shape, data: padded })
    }

    /// Returns the raw tensor, or (if `ignore_skip`) the tensor with every skip
    /// cell and resulting empty sublist removed.
    pub fn get_tensor(&self, ignore_skip: bool) -> Json {
        if ignore_skip {
            remove_skip_values(&self.data)
        } else {
            self.data.clone()
        }
    }

    /// Renames a single axis in place (as a new value), leaving data untouched.
    pub fn rename_axis(&self, from: &str, to: &str) -> Result<Self> {
        let pos = axis_pos(&self.axes, from)?;
        let mut axes = self.axes.clone();
        axes[pos] = to.to_string();
        Ok(Self { axes, shape: self.shape.clone(), data: self.data.clone() })
    }

    /// True iff at least one leaf cell of this reference is not the skip
    /// sentinel. Used by readiness checks: a "complete" concept whose
    /// reference is entirely skip values has not actually produced data.
    pub fn has_any_data(&self) -> bool {
        fn rec(value: &Json) -> bool {
            match value {
                Json::Array(items) => items.iter().any(rec),
                other => !is_skip(other),
            }
        }
        rec(&self.data)
    }

    /// Full-rank cell access by positional index, aligned to `self.axes` order.
    pub fn get_full(&self, idx: &[usize]) -> Json {
        fn rec(data: &Json, idx: &[usize]) -> Json {
            if idx.is_empty() {
                return data.clone();
            }
            match data {
                Json::Array(v) => {
                    if idx[0] >= v.len() || is_skip(&v[idx[0]]) {
                        skip_json()
                    } else {
                        rec(&v[idx[0]], &idx[1..])
                    }
                }
                _ => skip_json(),
            }
        }
        rec(&self.data, idx)
    }

    /// Full-rank cell mutation by positional index, extending with skip as needed.
    pub fn set_full(&mut self, idx: &[usize], value: Json) -> Result<()> {
        if idx.len() != self.axes.len() {
            return Err(Error::Shape("index rank must match axes".into()));
        }
        fn rec(data: &mut Json, idx: &[usize], value: Json) {
            if idx.is_empty() {
                *data = value;
                return;
            }
            if !data.is_array() {
                *data = Json::Array(vec![]);
            }
            let arr = data.as_array_mut().expect("just coerced to array");
            while arr.len() <= idx[0] {
                arr.push(skip_json());
            }
            rec(&mut arr[idx[0]], &idx[1..], value);
        }
        rec(&mut self.data, idx, value);
        if idx[0] >= self.shape.first().copied().unwrap_or(0) {
            // grown past declared shape: keep shape honest for axis 0 growth
            if let Some(first) = self.shape.first_mut() {
                *first = (*first).max(idx[0] + 1);
            }
        }
        Ok(())
    }

    /// Gets a partial selection: axes named in `fixed` take the given index; all
    /// other axes keep their full range, producing a nested sub-tensor.
    pub fn get_partial(&self, fixed: &BTreeMap<&str, usize>) -> Json {
        fn rec(axes: &[String], shape: &[usize], data: &Json, fixed: &BTreeMap<&str, usize>) -> Json {
            if axes.is_empty() {
                return data.clone();
            }
            let axis = axes[0].as_str();
            match fixed.get(axis) {
                Some(&i) => match data {
                    Json::Array(v) if i < v.len() && !is_skip(&v[i]) => rec(&axes[1..], &shape[1..], &v[i], fixed),
                    _ => skip_json(),
                },
                None => {
                    let n = shape[0];
                    match data {
                        Json::Array(v) => Json::Array(
                            (0..n)
                                .map(|i| {
                                    if i < v.len() && !is_skip(&v[i]) {
                                        rec(&axes[1..], &shape[1..], &v[i], fixed)
                                    } else {
                                        skip_json()
                                    }
                                })
                                .collect(),
                        ),
                        _ => skip_json(),
                    }
                }
            }
        }
        rec(&self.axes, &self.shape, &self.data, fixed)
    }

    /// Selects (and reorders to) a subset of axes. Each cell of the result holds
    /// the sub-tensor over the remaining, unselected axes; calling with a full
    /// permutation of `axes` is equivalent to [`Reference::transpose`]. Calling
    /// with no axes wraps the entire tensor as a single `_none_axis` cell.
    pub fn slice(&self, selected_axes: &[&str]) -> Result<Self> {
        if selected_axes.is_empty() {
            return Ok(Self {
                axes: vec![NONE_AXIS.to_string()],
                shape: vec![1],
                data: Json::Array(vec![self.data.clone()]),
            });
        }
        let mut seen = std::collections::HashSet::new();
        for axis in selected_axes {
            if !self.axes.iter().any(|a| a == axis) {
                return Err(Error::Shape(format!("axis '{axis}' not found in {:?}", self.axes)));
            }
            if !seen.insert(*axis) {
                return Err(Error::Shape("duplicate axes in selection".into()));
            }
        }
        let new_shape: Vec<usize> = selected_axes
            .iter()
            .map(|a| self.shape[axis_pos(&self.axes, a).expect("validated above")])
            .collect();

        fn build(selected: &[&str], shape: &[usize], idx: &mut BTreeMap<&str, usize>, ref_: &Reference) -> Json {
            if selected.is_empty() {
                let sub = ref_.get_partial(idx);
                let has_skip = is_skip(&sub)
                    || matches!(&sub, Json::Array(arr) if arr.iter().any(is_skip));
                return if has_skip { skip_json() } else { sub };
            }
            let axis = selected[0];
            let n = shape[0];
            Json::Array(
                (0..n)
                    .map(|i| {
                        idx.insert(axis, i);
                        let v = build(&selected[1..], &shape[1..], idx, ref_);
                        idx.remove(axis);
                        v
                    })
                    .collect(),
            )
        }
        let mut idx = BTreeMap::new();
        let data = build(selected_axes, &new_shape, &mut idx, self);
        Ok(Self {
            axes: selected_axes.iter().map(|s| s.to_string()).collect(),
            shape: new_shape,
            data,
        })
    }

    /// Permutes axes into `new_order` (must be a permutation of `self.axes`).
    pub fn transpose(&self, new_order: &[&str]) -> Result<Self> {
        if new_order.len() != self.axes.len() {
            return Err(Error::Shape("transpose order must cover every axis".into()));
        }
        self.slice(new_order)
    }

    /// Applies `view` via [`Reference::slice`]; an empty/`None` view keeps every axis.
    pub fn shape_view(&self, view: Option<&[&str]>) -> Result<Self> {
        match view {
            Some(axes) if !axes.is_empty() => self.slice(axes),
            _ => {
                let all: Vec<&str> = self.axes.iter().map(String::as_str).collect();
                self.slice(&all)
            }
        }
    }

    /// Drops `_none_axis` from the axes/shape/data whenever another axis is also
    /// present, flattening that dimension into the contained value.
    pub fn auto_remove_none_axis(self) -> Self {
        if let Some(pos) = self.axes.iter().position(|a| a == NONE_AXIS) {
            if self.axes.len() > 1 {
                let mut axes = self.axes.clone();
                axes.remove(pos);
                let mut shape = self.shape.clone();
                shape.remove(pos);
                let data = drop_axis(&self.data, pos);
                return Self { axes, shape, data };
            }
        }
        self
    }

    fn infer_append_axis(&self, other: &Self) -> Result<String> {
        if self.axes.is_empty() {
            return Err(Error::Shape("cannot infer append axis on an axis-less reference".into()));
        }
        let mut other_axes_list = other.axes.clone();
        let mut unmatched_target_axes = Vec::new();
        for axis in &self.axes {
            if let Some(pos) = other_axes_list.iter().position(|a| a == axis) {
                other_axes_list.remove(pos);
            } else {
                unmatched_target_axes.push(axis.clone());
            }
        }
        if unmatched_target_axes.len() == 1 {
            return Ok(unmatched_target_axes[0].clone());
        }
        let unmatched_source_count = other_axes_list.len();
        if unmatched_source_count > 0 && unmatched_source_count < unmatched_target_axes.len() {
            let index = unmatched_target_axes.len() - unmatched_source_count;
            return Ok(unmatched_target_axes[index].clone());
        }
        Ok(self.axes[self.axes.len() - 1].clone())
    }

    /// Extends `by_axis` (or an inferred axis) with data from `other`.
    ///
    /// Two regimes: if the axis is not the destination's last axis, `other`'s
    /// leaves are reshaped into slices matching the destination's trailing axes
    /// and appended as new rows; if it is the last axis, the append is either
    /// elementwise (when the non-target axes line up by name and size) or a
    /// broadcast concatenation.
    pub fn append(&self, other: &Self, by_axis: Option<&str>) -> Result<Self> {
        let axis = match by_axis {
            Some(a) => a.to_string(),
            None => self.infer_append_axis(other)?,
        };
        let axis_idx = axis_pos(&self.axes, &axis)?;
        let mut new_ref = self.clone();

        if axis_idx < self.axes.len() - 1 {
            let slice_shape = &self.shape[axis_idx + 1..];
            let slice_len: usize = if slice_shape.is_empty() { 1 } else { slice_shape.iter().product() };
            let mut other_leaves = Vec::new();
            get_leaves(&other.data, &mut other_leaves);

            let new_slices: Vec<Json> = if slice_len > 0 {
                if !other_leaves.is_empty() && other_leaves.len() % slice_len != 0 {
                    return Err(Error::Shape(format!(
                        "cannot reshape {} leaves into slices of shape {:?} (slice size {})",
                        other_leaves.len(),
                        slice_shape,
                        slice_len
                    )));
                }
                let num_new_slices = other_leaves.len() / slice_len;
                let mut it = other_leaves.into_iter();
                (0..num_new_slices).map(|_| reshape_from_list(&mut it, slice_shape)).collect()
            } else {
                if !other_leaves.is_empty() {
                    return Err(Error::Shape(format!("cannot append data to zero-sized slice shape {slice_shape:?}")));
                }
                Vec::new()
            };

            let added = new_slices.len();
            if axis_idx == 0 {
                if let Json::Array(v) = &mut new_ref.data {
                    v.extend(new_slices);
                }
            } else {
                fn insert_at(data: &mut Json, depth: usize, target_depth: usize, slices: &[Json]) {
                    if depth == target_depth {
                        if let Json::Array(v) = data {
                            for sub in v.iter_mut() {
                                if let Json::Array(sv) = sub {
                                    sv.extend(slices.iter().cloned());
                                }
                            }
                        }
                        return;
                    }
                    if let Json::Array(v) = data {
                        for sub in v.iter_mut() {
                            insert_at(sub, depth + 1, target_depth, slices);
                        }
                    }
                }
                insert_at(&mut new_ref.data, 0, axis_idx - 1, &new_slices);
            }
            new_ref.shape[axis_idx] += added;
            Ok(new_ref)
        } else {
            let is_elementwise = if self.axes.len() > 1 {
                let self_prefix: Vec<&String> = self.axes[..self.axes.len() - 1].iter().collect();
                let other_prefix: Vec<&String> = other.axes.iter().filter(|a| self_prefix.contains(a)).collect();
                let self_prefix_set: std::collections::HashSet<&String> = self_prefix.iter().copied().collect();
                let other_prefix_set: std::collections::HashSet<&String> = other_prefix.iter().copied().collect();
                if self_prefix_set == other_prefix_set {
                    self_prefix.iter().all(|axis| {
                        let si = axis_pos(&self.axes, axis).expect("axis in self");
                        let oi = axis_pos(&other.axes, axis).expect("axis in other_prefix_set");
                        self.shape[si] == other.shape[oi]
                    })
                } else {
                    false
                }
            } else {
                false
            };

            fn append_elementwise(self_data: &Json, other_data: &Json, depth: usize, axis_idx: usize) -> Result<Json> {
                if depth == axis_idx {
                    let mut merged = match self_data {
                        Json::Array(v) => v.clone(),
                        _ => Vec::new(),
                    };
                    let mut leaves = Vec::new();
                    get_leaves(other_data, &mut leaves);
                    merged.extend(leaves);
                    Ok(Json::Array(merged))
                } else {
                    let self_v = match self_data {
                        Json::Array(v) => v.clone(),
                        _ => Vec::new(),
                    };
                    let other_v = match other_data {
                        Json::Array(v) => v.clone(),
                        _ => Vec::new(),
                    };
                    if self_v.len() != other_v.len() {
                        return Err(Error::Shape(format!(
                            "shape mismatch during elementwise append at depth {depth}: {} vs {}",
                            self_v.len(),
                            other_v.len()
                        )));
                    }
                    let merged = self_v
                        .iter()
                        .zip(other_v.iter())
                        .map(|(s, o)| append_elementwise(s, o, depth + 1, axis_idx))
                        .collect::<Result<Vec<_>>>()?;
                    Ok(Json::Array(merged))
                }
            }

            fn append_broadcast(self_data: &Json, other_leaves: &[Json], depth: usize, axis_idx: usize) -> Json {
                if depth == axis_idx {
                    let mut merged = match self_data {
                        Json::Array(v) => v.clone(),
                        _ => Vec::new(),
                    };
                    merged.extend(other_leaves.iter().cloned());
                    Json::Array(merged)
                } else {
                    match self_data {
                        Json::Array(v) => Json::Array(
                            v.iter()
                                .map(|item| append_broadcast(item, other_leaves, depth + 1, axis_idx))
                                .collect(),
                        ),
                        other => other.clone(),
                    }
                }
            }

            new_ref.data = if is_elementwise {
                append_elementwise(&self.data, &other.data, 0, axis_idx)?
            } else {
                let mut other_leaves = Vec::new();
                get_leaves(&other.data, &mut other_leaves);
                append_broadcast(&self.data, &other_leaves, 0, axis_idx)
            };
            new_ref.shape = infer_shape(&new_ref.data);
            Ok(new_ref)
        }
    }
}

fn combined_axes_shape(refs: &[&Reference]) -> Result<(Vec<String>, Vec<usize>)> {
    if refs.is_empty() {
        return Err(Error::Shape("at least one reference must be provided".into()));
    }
    let mut axis_order = Vec::new();
    let mut axis_shapes: BTreeMap<String, usize> = BTreeMap::new();
    for r in refs {
        for (i, axis) in r.axes.iter().enumerate() {
            match axis_shapes.get(axis) {
                None => {
                    axis_order.push(axis.clone());
                    axis_shapes.insert(axis.clone(), r.shape[i]);
                }
                Some(&existing) if existing != r.shape[i] => {
                    return Err(Error::Shape(format!(
                        "shape mismatch for axis '{axis}': {} vs {existing}",
                        r.shape[i]
                    )));
                }
                _ => {}
            }
        }
    }
    let shape = axis_order.iter().map(|a| axis_shapes[a]).collect();
    Ok((axis_order, shape))
}

/// Outer product over the union of `refs`' axes. Each output cell is a JSON
/// array of the operand cells, in input order; any operand cell equal to the
/// skip sentinel makes the whole output cell skip.
pub fn cross_product(refs: &[&Reference]) -> Result<Reference> {
    let (combined_axes, combined_shape) = combined_axes_shape(refs)?;

    fn build(depth: usize, axes: &[String], shape: &[usize], idx: &mut Vec<usize>, refs: &[&Reference]) -> Json {
        if depth == axes.len() {
            let mut elements = Vec::with_capacity(refs.len());
            let mut any_skip = false;
            for r in refs {
                let full_idx: Vec<usize> = r.axes.iter().map(|a| idx[axis_pos(axes, a).expect("axis present")]).collect();
                let v = r.get_full(&full_idx);
                if is_skip(&v) {
                    any_skip = true;
                }
                elements.push(v);
            }
            if any_skip {
                skip_json()
            } else {
                Json::Array(elements)
            }
        } else {
            Json::Array(
                (0..shape[depth])
                    .map(|i| {
                        idx.push(i);
                        let v = build(depth + 1, axes, shape, idx, refs);
                        idx.pop();
                        v
                    })
                    .collect(),
            )
        }
    }

    let mut idx = Vec::new();
    let data = build(0, &combined_axes, &combined_shape, &mut idx, refs);
    Ok(Reference {
        axes: combined_axes,
        shape: combined_shape,
        data,
    }
    .auto_remove_none_axis())
}

/// Stacks equal-shape references along a new outermost axis, realigning axis
/// order when the operands differ only by permutation.
pub fn join(refs: &[&Reference], new_axis_name: &str) -> Result<Reference> {
    if refs.is_empty() {
        return Err(Error::Shape("at least one reference must be provided for join".into()));
    }
    let first = refs[0];
    let common_axes = first.axes.clone();
    let common_shape = first.shape.clone();
    let mut aligned = vec![first.clone()];
    for r in &refs[1..] {
        let aligned_ref = if r.axes != common_axes {
            let common_set: std::collections::HashSet<&String> = common_axes.iter().collect();
            let r_set: std::collections::HashSet<&String> = r.axes.iter().collect();
            if common_set == r_set {
                let axes_str: Vec<&str> = common_axes.iter().map(String::as_str).collect();
                r.slice(&axes_str)?
            } else {
                return Err(Error::Shape(format!("axis mismatch: expected {common_axes:?}, got {:?}", r.axes)));
            }
        } else {
            (*r).clone()
        };
        if aligned_ref.shape != common_shape {
            return Err(Error::Shape(format!(
                "shape mismatch: expected {common_shape:?}, got {:?}",
                aligned_ref.shape
            )));
        }
        aligned.push(aligned_ref);
    }

    let new_axes: Vec<String> = std::iter::once(new_axis_name.to_string()).chain(common_axes).collect();
    let new_shape: Vec<usize> = std::iter::once(aligned.len()).chain(common_shape).collect();
    let data = Json::Array(aligned.iter().map(|r| r.data.clone()).collect());
    Ok(Reference {
        axes: new_axes,
        shape: new_shape,
        data,
    })
}

/// A grid of callables, the "function operand" of [`cross_action`]. Stored
/// separately from [`Reference`] because closures cannot live in `serde_json::Value`.
#[derive(Clone)]
pub struct FunctionGrid {
    /// Axes of the grid.
    pub axes: Vec<String>,
    /// Extent along each axis.
    pub shape: Vec<usize>,
    cells: Vec<Option<Arc<dyn Fn(&Json) -> Result<Vec<Json>> + Send + Sync>>>,
}

impl std::fmt::Debug for FunctionGrid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionGrid").field("axes", &self.axes).field("shape", &self.shape).finish()
    }
}

impl FunctionGrid {
    /// Builds a grid of the given axes/shape with every cell initially skipped
    /// (`None`).
    pub fn new(axes: Vec<String>, shape: Vec<usize>) -> Self {
        let total: usize = shape.iter().product::<usize>().max(if shape.is_empty() { 1 } else { 0 });
        Self {
            axes,
            shape,
            cells: vec![None; total],
        }
    }

    fn strides(&self) -> Vec<usize> {
        let mut strides = vec![1usize; self.shape.len()];
        for i in (0..self.shape.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * self.shape[i + 1];
        }
        strides
    }

    fn flat_index(&self, idx: &[usize]) -> usize {
        let strides = self.strides();
        idx.iter().zip(strides.iter()).map(|(i, s)| i * s).sum()
    }

    /// Stores a callable at `idx`.
    pub fn set(&mut self, idx: &[usize], f: Arc<dyn Fn(&Json) -> Result<Vec<Json>> + Send + Sync>) {
        let flat = self.flat_index(idx);
        if flat < self.cells.len() {
            self.cells[flat] = Some(f);
        }
    }

    /// Reads the callable at `idx`, if any is stored there.
    pub fn get(&self, idx: &[usize]) -> Option<&Arc<dyn Fn(&Json) -> Result<Vec<Json>> + Send + Sync>> {
        let flat = self.flat_index(idx);
        self.cells.get(flat).and_then(|c| c.as_ref())
    }
}

/// Applies each callable in `f` to the matching cell of `b` along shared axes,
/// appending `new_axis_name` for the returned list. Skip semantics and dev-mode
/// error handling mirror [`element_action`].
pub fn cross_action(f: &FunctionGrid, b: &Reference, new_axis_name: &str, dev_mode: bool) -> Result<Reference> {
    let mut combined_axes = f.axes.clone();
    for axis in &b.axes {
        if !combined_axes.contains(axis) {
            combined_axes.push(axis.clone());
        }
    }
    let mut combined_shape = Vec::with_capacity(combined_axes.len());
    for axis in &combined_axes {
        let in_f = f.axes.iter().position(|a| a == axis);
        let in_b = b.axes.iter().position(|a| a == axis);
        match (in_f, in_b) {
            (Some(fi), Some(bi)) => {
                if f.shape[fi] != b.shape[bi] {
                    return Err(Error::Shape(format!("shape mismatch for shared axis '{axis}'")));
                }
                combined_shape.push(f.shape[fi]);
            }
            (Some(fi), None) => combined_shape.push(f.shape[fi]),
            (None, Some(bi)) => combined_shape.push(b.shape[bi]),
            (None, None) => unreachable!("axis drawn from f or b"),
        }
    }

    fn build(
        depth: usize,
        axes: &[String],
        shape: &[usize],
        idx: &mut Vec<usize>,
        f: &FunctionGrid,
        b: &Reference,
        dev_mode: bool,
    ) -> Result<Json> {
        if depth == axes.len() {
            let f_idx: Vec<usize> = f.axes.iter().map(|a| idx[axis_pos(axes, a).expect("axis present")]).collect();
            let b_idx: Vec<usize> = b.axes.iter().map(|a| idx[axis_pos(axes, a).expect("axis present")]).collect();
            let input_val = b.get_full(&b_idx);
            let func = f.get(&f_idx);
            if func.is_none() || is_skip(&input_val) {
                return Ok(skip_json());
            }
            let func = func.expect("checked above");
            let outcome = func(&input_val).and_then(|result| {
                if result.iter().any(is_skip) {
                    Ok(Vec::new())
                } else {
                    Ok(result)
                }
            });
            let resolved = resolve_cell(outcome, dev_mode, Vec::new)?;
            if resolved.is_empty() {
                Ok(skip_json())
            } else {
                Ok(Json::Array(resolved))
            }
        } else {
            let n = shape[depth];
            let mut items = Vec::with_capacity(n);
            for i in 0..n {
                idx.push(i);
                let v = build(depth + 1, axes, shape, idx, f, b, dev_mode)?;
                idx.pop();
                items.push(v);
            }
            Ok(Json::Array(items))
        }
    }

    let mut idx = Vec::new();
    let data = build(0, &combined_axes, &combined_shape, &mut idx, f, b, dev_mode)?;

    // Peek a representative leaf to discover the new axis extent, mirroring the
    // post-hoc structural peek the original design performs.
    let mut peek = &data;
    for _ in 0..combined_shape.len() {
        match peek {
            Json::Array(v) if !v.is_empty() => peek = &v[0],
            _ => break,
        }
    }
    let new_axis_extent = match peek {
        Json::Array(v) => v.len(),
        _ => 1,
    };

    let new_axes: Vec<String> = combined_axes.into_iter().chain(std::iter::once(new_axis_name.to_string())).collect();
    let new_shape: Vec<usize> = combined_shape.into_iter().chain(std::iter::once(new_axis_extent)).collect();
    Ok(Reference {
        axes: new_axes,
        shape: new_shape,
        data,
    }
    .auto_remove_none_axis())
}

/// Pointwise n-ary map across the union of axes. `index_awareness` controls
/// whether `f` additionally receives the index dict for the cell it produced.
pub fn element_action(
    f: &(dyn Fn(&[Json], Option<&BTreeMap<String, usize>>) -> Result<Json> + Sync),
    refs: &[&Reference],
    index_awareness: bool,
    dev_mode: bool,
) -> Result<Reference> {
    let (combined_axes, combined_shape) = combined_axes_shape(refs)?;

    fn build(
        depth: usize,
        axes: &[String],
        shape: &[usize],
        idx: &mut Vec<usize>,
        refs: &[&Reference],
        f: &(dyn Fn(&[Json], Option<&BTreeMap<String, usize>>) -> Result<Json> + Sync),
        index_awareness: bool,
        dev_mode: bool,
    ) -> Result<Json> {
        if depth == axes.len() {
            let mut elements = Vec::with_capacity(refs.len());
            for r in refs {
                let full_idx: Vec<usize> = r.axes.iter().map(|a| idx[axis_pos(axes, a).expect("axis present")]).collect();
                elements.push(r.get_full(&full_idx));
            }
            if elements.iter().any(is_skip) {
                return Ok(skip_json());
            }
            let index_dict: Option<BTreeMap<String, usize>> = if index_awareness {
                Some(axes.iter().cloned().zip(idx.iter().copied()).collect())
            } else {
                None
            };
            let outcome = f(&elements, index_dict.as_ref());
            resolve_cell(outcome, dev_mode, skip_json)
        } else {
            let n = shape[depth];
            let mut items = Vec::with_capacity(n);
            for i in 0..n {
                idx.push(i);
                let v = build(depth + 1, axes, shape, idx, refs, f, index_awareness, dev_mode)?;
                idx.pop();
                items.push(v);
            }
            Ok(Json::Array(items))
        }
    }

    let mut idx = Vec::new();
    let data = build(0, &combined_axes, &combined_shape, &mut idx, refs, f, index_awareness, dev_mode)?;
    Ok(Reference {
        axes: combined_axes,
        shape: combined_shape,
        data,
    }
    .auto_remove_none_axis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn r(data: Json, axes: &[&str]) -> Reference {
        Reference::from_data(data, Some(axes.iter().map(|s| s.to_string()).collect())).unwrap()
    }

    #[test]
    fn from_data_infers_ragged_shape() {
        let reference = r(json!([["5", "2"], ["3", "4"]]), &["pair", "digit"]);
        assert_eq!(reference.shape, vec![2, 2]);
        assert_eq!(reference.get_full(&[0, 1]), json!("2"));
    }

    #[test]
    fn cross_product_unions_axes_and_propagates_skip() {
        let a = r(json!(["1", "@#SKIP#@"]), &["x"]);
        let b = r(json!(["10", "20"]), &["y"]);
        let out = cross_product(&[&a, &b]).unwrap();
        assert_eq!(out.axes, vec!["x".to_string(), "y".to_string()]);
        assert_eq!(out.shape, vec![2, 2]);
        assert_eq!(out.get_full(&[0, 0]), json!(["1", "10"]));
        assert_eq!(out.get_full(&[1, 0]), skip_json());
    }

    #[test]
    fn element_action_propagates_skip() {
        let a = r(json!(["1", "2"]), &["x"]);
        let b = r(json!(["10", "@#SKIP#@"]), &["x"]);
        let sum = element_action(
            &|elems, _| {
                let a = elems[0].as_str().unwrap().parse::<i64>().unwrap();
                let b = elems[1].as_str().unwrap().parse::<i64>().unwrap();
                Ok(json!((a + b).to_string()))
            },
            &[&a, &b],
            false,
            false,
        )
        .unwrap();
        assert_eq!(sum.get_full(&[0]), json!("11"));
        assert_eq!(sum.get_full(&[1]), skip_json());
    }

    #[test]
    fn slice_with_no_axes_wraps_singleton() {
        let reference = r(json!([["1", "2"], ["3", "4"]]), &["a", "b"]);
        let wrapped = reference.slice(&[]).unwrap();
        assert_eq!(wrapped.axes, vec![NONE_AXIS.to_string()]);
        assert_eq!(wrapped.shape, vec![1]);
    }

    #[test]
    fn append_elementwise_last_axis() {
        let target = r(json!([[1, 2], [3, 4]]), &["b", "a"]);
        let source = r(json!([[5], [6]]), &["b", "c"]);
        let result = target.append(&source, Some("a")).unwrap();
        assert_eq!(result.get_full(&[0, 2]), json!(5));
        assert_eq!(result.get_full(&[1, 2]), json!(6));
    }

    #[test]
    fn join_stacks_equal_shape_references() {
        let a = r(json!([1, 2]), &["x"]);
        let b = r(json!([3, 4]), &["x"]);
        let joined = join(&[&a, &b], "pair").unwrap();
        assert_eq!(joined.axes, vec!["pair".to_string(), "x".to_string()]);
        assert_eq!(joined.shape, vec![2, 2]);
    }
}

#[cfg(test)]
mod algebra_properties {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn axis(len: usize, name: &str) -> Reference {
        Reference::from_data(Json::Array((0..len).map(|i| json!(i as i64)).collect()), Some(vec![name.to_string()])).unwrap()
    }

    fn axis_with_skips(skips: &[bool], name: &str) -> Reference {
        let data = skips
            .iter()
            .enumerate()
            .map(|(i, &skip)| if skip { skip_json() } else { json!(i as i64) })
            .collect();
        Reference::from_data(Json::Array(data), Some(vec![name.to_string()])).unwrap()
    }

    proptest! {
        /// Shared axes never change extent: differing axes are unioned, and the
        /// combined shape is exactly the extents of each operand's own axis.
        #[test]
        fn cross_product_shape_is_the_union_of_operand_extents(a_len in 1usize..6, b_len in 1usize..6) {
            let a = axis(a_len, "x");
            let b = axis(b_len, "y");
            let out = cross_product(&[&a, &b]).unwrap();
            prop_assert_eq!(out.axes, vec!["x".to_string(), "y".to_string()]);
            prop_assert_eq!(out.shape, vec![a_len, b_len]);
        }

        /// A skip cell in either operand makes the whole combined cell skip.
        #[test]
        fn cross_product_propagates_skip_elementwise(a_skips in prop::collection::vec(any::<bool>(), 1..6)) {
            let a = axis_with_skips(&a_skips, "x");
            let b = axis(1, "y");
            let out = cross_product(&[&a, &b]).unwrap();
            for (i, &should_skip) in a_skips.iter().enumerate() {
                prop_assert_eq!(is_skip(&out.get_full(&[i, 0])), should_skip);
            }
        }

        /// No combinator mutates its operands.
        #[test]
        fn cross_product_does_not_mutate_its_operands(a_len in 1usize..6, b_len in 1usize..6) {
            let a = axis(a_len, "x");
            let b = axis(b_len, "y");
            let (a_before, b_before) = (a.clone(), b.clone());
            let _ = cross_product(&[&a, &b]).unwrap();
            prop_assert_eq!(a.data, a_before.data);
            prop_assert_eq!(b.data, b_before.data);
        }
    }
}
