//! The Assigner: implements the five assigning markers (`=`, `%`, `.`, `+`,
//! `-`) an `assigning` sequence's AR step dispatches on (spec §4.6).

use serde_json::Value as Json;

use crate::blackboard::Blackboard;
use crate::error::{Error, Result};
use crate::reference::{element_action, is_skip, skip_json, Reference};

/// The closed set of assigning markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignMarker {
    /// `=` — register identity between two concepts; produces no reference.
    Identity,
    /// `%` — build a reference directly from a literal face value.
    Abstraction,
    /// `.` — pick the first non-empty candidate reference.
    Specification,
    /// `+` — append source onto destination along an axis.
    Continuation,
    /// `-` — structural selection from each element.
    Derelation,
}

impl AssignMarker {
    /// Parses the marker from its declarative string form.
    pub fn parse(marker: &str) -> Result<Self> {
        match marker {
            "=" => Ok(Self::Identity),
            "%" => Ok(Self::Abstraction),
            "." => Ok(Self::Specification),
            "+" => Ok(Self::Continuation),
            "-" => Ok(Self::Derelation),
            other => Err(Error::Repo(format!("unknown assigning marker '{other}'"))),
        }
    }
}

/// How [`Assigner::derelation`] selects from a source element.
#[derive(Debug, Clone)]
pub enum Derelation {
    /// Select the `i`-th positional element of an array cell.
    Index(usize),
    /// Select a named field of an object cell.
    Key(String),
    /// Take the whole array cell and flatten it into sibling cells along a
    /// new axis (rather than a single pointwise selection).
    Unpack,
    /// Unpack first, then apply the inner selector to every unpacked element
    /// before flattening the results into sibling cells.
    UnpackBeforeSelection(Box<Derelation>),
}

impl Derelation {
    fn select_scalar(&self, cell: &Json) -> Result<Json> {
        match self {
            Derelation::Index(i) => cell
                .as_array()
                .and_then(|a| a.get(*i))
                .cloned()
                .ok_or_else(|| Error::Shape(format!("derelation index {i} out of range"))),
            Derelation::Key(k) => cell
                .as_object()
                .and_then(|o| o.get(k))
                .cloned()
                .ok_or_else(|| Error::Shape(format!("derelation key '{k}' not found"))),
            Derelation::Unpack | Derelation::UnpackBeforeSelection(_) => {
                Err(Error::Shape("unpack selectors must go through Assigner::derelation, not select_scalar".into()))
            }
        }
    }

    fn unpacked_values(&self, cell: &Json) -> Result<Vec<Json>> {
        match self {
            Derelation::Unpack => Ok(cell.as_array().cloned().unwrap_or_default()),
            Derelation::UnpackBeforeSelection(inner) => {
                let items = cell.as_array().cloned().unwrap_or_default();
                items.iter().map(|item| inner.select_scalar(item)).collect()
            }
            _ => unreachable!("only called for unpack variants"),
        }
    }
}

/// Stateless assigning operation.
pub struct Assigner;

impl Assigner {
    /// `=` marker: registers identity between `canonical` and `alias` on the
    /// blackboard. Produces no reference.
    pub fn identity(blackboard: &mut Blackboard, canonical: &str, alias: &str) {
        blackboard.register_identity(canonical, alias);
    }

    /// `%` marker: builds a reference directly from a literal face value.
    pub fn abstraction(face_value: &Json, axis_names: Option<Vec<String>>) -> Result<Reference> {
        match face_value {
            Json::Array(_) => Reference::from_data(face_value.clone(), axis_names),
            scalar => Reference::from_data(Json::Array(vec![scalar.clone()]), axis_names.or_else(|| Some(vec!["_none_axis".to_string()]))),
        }
    }

    /// `.` marker: picks the first non-empty reference from `sources` in
    /// priority order, falling back to `destination`, else an empty
    /// reference over whichever candidate's axes/shape are available.
    pub fn specification(sources: &[&Reference], destination: Option<&Reference>) -> Result<Reference> {
        for candidate in sources {
            if candidate.has_any_data() {
                return Ok((*candidate).clone());
            }
        }
        if let Some(dest) = destination {
            return Ok(dest.clone());
        }
        if let Some(first) = sources.first() {
            return Ok((*first).clone());
        }
        Reference::new(vec!["_none_axis".to_string()], vec![1])
    }

    /// `+` marker: extends `destination` with `source`'s data along the first
    /// axis of `by_axes`, defaulting to `destination`'s first axis.
    pub fn continuation(destination: &Reference, source: &Reference, by_axes: &[&str]) -> Result<Reference> {
        let axis = by_axes.first().copied();
        destination.append(source, axis)
    }

    /// `-` marker: applies `selector` to every element of `source`. Plain
    /// `Index`/`Key` selectors run through `element_action`, preserving
    /// shape; `Unpack`/`UnpackBeforeSelection` flatten each cell's unpacked
    /// values into a new trailing axis.
    pub fn derelation(selector: &Derelation, source: &Reference, dev_mode: bool) -> Result<Reference> {
        match selector {
            Derelation::Index(_) | Derelation::Key(_) => element_action(
                &|elems, _| selector.select_scalar(&elems[0]),
                &[source],
                false,
                dev_mode,
            ),
            Derelation::Unpack | Derelation::UnpackBeforeSelection(_) => {
                Self::derelation_unpack(selector, source)
            }
        }
    }

    fn derelation_unpack(selector: &Derelation, source: &Reference) -> Result<Reference> {
        let mut leaves: Vec<Vec<Json>> = Vec::new();
        fn walk(value: &Json, depth: usize, rank: usize, selector: &Derelation, out: &mut Vec<Vec<Json>>) -> Result<()> {
            if depth < rank {
                match value {
                    Json::Array(items) => {
                        for item in items {
                            walk(item, depth + 1, rank, selector, out)?;
                        }
                        Ok(())
                    }
                    other => {
                        out.push(if is_skip(other) { Vec::new() } else { selector.unpacked_values(other)? });
                        Ok(())
                    }
                }
            } else if is_skip(value) {
                out.push(Vec::new());
                Ok(())
            } else {
                out.push(selector.unpacked_values(value)?);
                Ok(())
            }
        }
        walk(&source.data, 0, source.axes.len(), selector, &mut leaves)?;

        let max_len = leaves.iter().map(Vec::len).max().unwrap_or(0);
        let new_axis_extent = max_len.max(1);
        let skip = skip_json();
        let flattened: Vec<Json> = leaves
            .into_iter()
            .map(|mut values| {
                values.resize(new_axis_extent, skip.clone());
                Json::Array(values)
            })
            .collect();

        let mut axes = source.axes.clone();
        axes.push("unpacked".to_string());
        let mut shape = source.shape.clone();
        shape.push(new_axis_extent);
        Reference::from_data(reshape(&flattened, &source.shape), Some(axes)).map(|r| Reference { shape, ..r })
    }
}

fn reshape(flattened: &[Json], shape: &[usize]) -> Json {
    fn rec(it: &mut std::slice::Iter<Json>, shape: &[usize]) -> Json {
        if shape.is_empty() {
            return it.next().cloned().unwrap_or_else(skip_json);
        }
        Json::Array((0..shape[0]).map(|_| rec(it, &shape[1..])).collect())
    }
    let mut it = flattened.iter();
    rec(&mut it, shape)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_rejects_unknown_marker() {
        assert!(AssignMarker::parse("?").is_err());
    }

    #[test]
    fn specification_prefers_first_non_empty_source() {
        let empty = Reference::new(vec!["_none_axis".into()], vec![1]).unwrap();
        let filled = Reference::from_data(json!(["5"]), Some(vec!["_none_axis".into()])).unwrap();
        let result = Assigner::specification(&[&empty, &filled], None).unwrap();
        assert_eq!(result.data, filled.data);
    }

    #[test]
    fn continuation_appends_along_destination_first_axis() {
        let dest = Reference::from_data(json!([1, 2]), Some(vec!["pair".into()])).unwrap();
        let source = Reference::from_data(json!([3]), Some(vec!["pair".into()])).unwrap();
        let result = Assigner::continuation(&dest, &source, &[]).unwrap();
        assert_eq!(result.shape, vec![3]);
    }

    #[test]
    fn derelation_index_selects_positionally() {
        let source = Reference::from_data(json!([[1, 2], [3, 4]]), Some(vec!["row".into()])).unwrap();
        let result = Assigner::derelation(&Derelation::Index(1), &source, false).unwrap();
        assert_eq!(result.get_full(&[0]), json!(2));
        assert_eq!(result.get_full(&[1]), json!(4));
    }
}
