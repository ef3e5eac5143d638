//! The Grouper: combines several value references by shared ("group
//! identity") and distinguishing ("group content") axes (spec §4.6).
//!
//! Two marker-driven modes share the same `by_axes` input:
//!
//! - [`GroupMarker::AndIn`] keeps group identity axes on the output and packs
//!   each combination's restricted content from every value reference into a
//!   tuple cell — the shape Quantifying/Looping consume to iterate "for each
//!   group, do X with all of {value1, value2, ...}".
//! - [`GroupMarker::OrAcross`] drops the distinguishing axes entirely,
//!   flattening every value reference's content (across both the
//!   distinguishing axes and the list of references) into one candidate-list
//!   axis per group — the shape Quantifying/Looping consume to iterate "for
//!   each group, visit each candidate element in turn".

use std::collections::BTreeMap;

use serde_json::Value as Json;

use crate::error::{Error, Result};
use crate::reference::{is_skip, skip_json, Reference};

/// Which grouping marker to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupMarker {
    /// `and_in`: one output cell per group, holding a tuple of restricted content.
    AndIn,
    /// `or_across`: one output cell per flattened candidate element.
    OrAcross,
}

/// Stateless grouping operation.
pub struct Grouper;

impl Grouper {
    /// Applies `marker` to `value_refs`, grouping by `by_axes`.
    ///
    /// `by_axes` must be a subset of the union of every value reference's
    /// axes; axes absent from `by_axes` are the "distinguishing" axes that
    /// get collapsed into group content.
    pub fn group(marker: GroupMarker, value_refs: &[&Reference], by_axes: &[&str]) -> Result<Reference> {
        if value_refs.is_empty() {
            return Err(Error::Shape("grouper requires at least one value reference".into()));
        }
        let group_shape = Self::resolve_group_shape(value_refs, by_axes)?;
        match marker {
            GroupMarker::AndIn => Self::and_in(value_refs, by_axes, &group_shape),
            GroupMarker::OrAcross => Self::or_across(value_refs, by_axes, &group_shape),
        }
    }

    fn resolve_group_shape(value_refs: &[&Reference], by_axes: &[&str]) -> Result<Vec<usize>> {
        let mut shape = Vec::with_capacity(by_axes.len());
        for axis in by_axes {
            let extent = value_refs.iter().find_map(|r| {
                r.axes.iter().position(|a| a == axis).map(|pos| r.shape[pos])
            });
            match extent {
                Some(n) => shape.push(n),
                None => return Err(Error::Shape(format!("group axis '{axis}' not found in any value reference"))),
            }
        }
        Ok(shape)
    }

    fn and_in(value_refs: &[&Reference], by_axes: &[&str], group_shape: &[usize]) -> Result<Reference> {
        fn build(
            depth: usize,
            by_axes: &[&str],
            group_shape: &[usize],
            idx: &mut BTreeMap<&str, usize>,
            value_refs: &[&Reference],
        ) -> Json {
            if depth == by_axes.len() {
                let tuple: Vec<Json> = value_refs.iter().map(|r| r.get_partial(idx)).collect();
                if tuple.iter().all(is_skip) {
                    skip_json()
                } else {
                    Json::Array(tuple)
                }
            } else {
                let axis = by_axes[depth];
                Json::Array(
                    (0..group_shape[depth])
                        .map(|i| {
                            idx.insert(axis, i);
                            let v = build(depth + 1, by_axes, group_shape, idx, value_refs);
                            idx.remove(axis);
                            v
                        })
                        .collect(),
                )
            }
        }
        let mut idx = BTreeMap::new();
        let data = build(0, by_axes, group_shape, &mut idx, value_refs);
        Reference {
            axes: by_axes.iter().map(|s| s.to_string()).collect(),
            shape: group_shape.to_vec(),
            data,
        }
        .try_finish()
    }

    fn or_across(value_refs: &[&Reference], by_axes: &[&str], group_shape: &[usize]) -> Result<Reference> {
        fn flatten_leaves(value: &Json, out: &mut Vec<Json>) {
            match value {
                Json::Array(items) => {
                    for item in items {
                        flatten_leaves(item, out);
                    }
                }
                other if !is_skip(other) => out.push(other.clone()),
                _ => {}
            }
        }

        fn build(
            depth: usize,
            by_axes: &[&str],
            group_shape: &[usize],
            idx: &mut BTreeMap<&str, usize>,
            value_refs: &[&Reference],
        ) -> Vec<Json> {
            if depth == by_axes.len() {
                let mut flat = Vec::new();
                for r in value_refs {
                    flatten_leaves(&r.get_partial(idx), &mut flat);
                }
                flat
            } else {
                let axis = by_axes[depth];
                let mut out = Vec::new();
                for i in 0..group_shape[depth] {
                    idx.insert(axis, i);
                    out.push(Json::Array(build(depth + 1, by_axes, group_shape, idx, value_refs)));
                    idx.remove(axis);
                }
                out
            }
        }

        if by_axes.is_empty() {
            let mut flat = Vec::new();
            for r in value_refs {
                flatten_leaves(&r.data, &mut flat);
            }
            let n = flat.len();
            return Reference {
                axes: vec!["candidate".to_string()],
                shape: vec![n],
                data: Json::Array(flat),
            }
            .try_finish();
        }

        let mut idx = BTreeMap::new();
        let data = build(0, by_axes, group_shape, &mut idx, value_refs);
        let axes: Vec<String> = by_axes.iter().map(|s| s.to_string()).chain(std::iter::once("candidate".to_string())).collect();
        let candidate_extent = {
            fn count(value: &Json) -> usize {
                match value {
                    Json::Array(items) if items.first().map(|v| v.is_array()).unwrap_or(false) => {
                        items.iter().map(count).max().unwrap_or(0)
                    }
                    Json::Array(items) => items.len(),
                    _ => 0,
                }
            }
            count(&Json::Array(data.clone()))
        };
        let shape: Vec<usize> = group_shape.iter().copied().chain(std::iter::once(candidate_extent)).collect();
        Reference { axes, shape, data: Json::Array(data) }.try_finish()
    }
}

trait TryFinish {
    fn try_finish(self) -> Result<Reference>;
}

impl TryFinish for Reference {
    fn try_finish(self) -> Result<Reference> {
        Ok(self.auto_remove_none_axis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn r(data: Json, axes: &[&str]) -> Reference {
        Reference::from_data(data, Some(axes.iter().map(|s| s.to_string()).collect())).unwrap()
    }

    #[test]
    fn and_in_packs_tuple_per_group() {
        let scores = r(json!([[90, 80], [70, 60]]), &["student", "score"]);
        let grouped = Grouper::group(GroupMarker::AndIn, &[&scores], &["student"]).unwrap();
        assert_eq!(grouped.axes, vec!["student".to_string()]);
        assert_eq!(grouped.shape, vec![2]);
        assert_eq!(grouped.get_full(&[0]), json!([[90, 80]]));
    }

    #[test]
    fn or_across_flattens_candidates() {
        let a = r(json!(["x", "y"]), &["doc"]);
        let b = r(json!(["z"]), &["other"]);
        let grouped = Grouper::group(GroupMarker::OrAcross, &[&a, &b], &[]).unwrap();
        assert_eq!(grouped.axes, vec!["candidate".to_string()]);
        assert_eq!(grouped.shape, vec![3]);
    }
}
