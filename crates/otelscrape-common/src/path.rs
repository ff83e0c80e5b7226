//! Dotted/indexed/sliced JSON path resolution.
//!
//! Syntax: segments separated by `.`; a segment may be `name`, `name[i]`
//! (index), `name[i:j]` (slice), or `name[]` (expand — following segments
//! apply to each element and results flatten). A leading `$root.` anchors at
//! the response root. `/.` inside a key embeds a literal dot.

use serde_json::Value;

/// Result of resolving a path: either a single value or a flattened
/// sequence produced by one or more `[]` expansions.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    One(Value),
    Many(Vec<Value>),
}

impl Resolved {
    /// Flatten into a `Vec`, treating `One` as a single-element sequence.
    pub fn into_vec(self) -> Vec<Value> {
        match self {
            Self::One(v) => vec![v],
            Self::Many(v) => v,
        }
    }

    pub fn as_single(&self) -> Option<&Value> {
        match self {
            Self::One(v) => Some(v),
            Self::Many(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Index(i64),
    Slice(Option<i64>, Option<i64>),
    Expand,
}

/// Parse a path string into segments. `$root.` is stripped (it is the
/// implicit anchor for every path; kept as a no-op prefix for readability).
fn parse(path: &str) -> Vec<Segment> {
    let path = path.strip_prefix("$root.").unwrap_or(path);
    split_dotted(path)
        .into_iter()
        .flat_map(|raw| parse_segment(&raw))
        .collect()
}

/// Split on unescaped dots. `/.` is an escape for a literal dot inside a key.
fn split_dotted(path: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '/' && chars.peek() == Some(&'.') {
            current.push('.');
            chars.next();
        } else if c == '.' {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    parts.push(current);
    parts
}

/// Parse one dotted segment, which may carry `[...]` suffixes. Multiple
/// bracket groups on a single segment (e.g. `a[0][1]`) are not part of the
/// grammar; only the first bracket group per segment is honored, per the
/// `name[i]` / `name[i:j]` / `name[]` forms this extractor supports.
fn parse_segment(raw: &str) -> Vec<Segment> {
    let Some(bracket_start) = raw.find('[') else {
        if raw.is_empty() {
            return Vec::new();
        }
        return vec![Segment::Key(raw.to_string())];
    };
    let key = &raw[..bracket_start];
    let Some(bracket_end) = raw.find(']') else {
        return vec![Segment::Key(raw.to_string())];
    };
    let inner = &raw[bracket_start + 1..bracket_end];

    let mut segs = Vec::new();
    if !key.is_empty() {
        segs.push(Segment::Key(key.to_string()));
    }
    if inner.is_empty() {
        segs.push(Segment::Expand);
    } else if let Some((lo, hi)) = inner.split_once(':') {
        let lo = lo.trim().parse::<i64>().ok();
        let hi = hi.trim().parse::<i64>().ok();
        segs.push(Segment::Slice(lo, hi));
    } else if let Ok(idx) = inner.trim().parse::<i64>() {
        segs.push(Segment::Index(idx));
    } else {
        segs.push(Segment::Key(raw.to_string()));
    }
    segs
}

fn resolve_index(arr: &[Value], idx: i64) -> Option<Value> {
    let len = arr.len() as i64;
    let real = if idx < 0 { len + idx } else { idx };
    if real < 0 || real >= len {
        return None;
    }
    arr.get(real as usize).cloned()
}

fn resolve_slice(arr: &[Value], lo: Option<i64>, hi: Option<i64>) -> Vec<Value> {
    let len = arr.len() as i64;
    let norm = |v: i64| -> i64 {
        let r = if v < 0 { len + v } else { v };
        r.clamp(0, len)
    };
    let start = lo.map_or(0, norm);
    let end = hi.map_or(len, norm);
    if start >= end {
        return Vec::new();
    }
    arr[start as usize..end as usize].to_vec()
}

/// Resolve one step against a single (non-expanded) value. Returns `None`
/// ("absent") if the segment cannot be resolved.
fn step(value: &Value, seg: &Segment) -> Option<Resolved> {
    match seg {
        Segment::Key(k) => value.get(k).cloned().map(Resolved::One),
        Segment::Index(i) => value.as_array().and_then(|a| resolve_index(a, *i)).map(Resolved::One),
        Segment::Slice(lo, hi) => value
            .as_array()
            .map(|a| Resolved::Many(resolve_slice(a, *lo, *hi))),
        Segment::Expand => value.as_array().map(|a| Resolved::Many(a.clone())),
    }
}

/// Resolve a path against a JSON value. Returns `None` if any segment
/// fails to resolve ("absent", distinct from a present JSON `null`).
pub fn extract(path: &str, root: &Value) -> Option<Resolved> {
    let segments = parse(path);
    resolve_segments(&segments, root)
}

fn resolve_segments(segments: &[Segment], root: &Value) -> Option<Resolved> {
    let mut current = Resolved::One(root.clone());
    let mut expanded = false;

    for seg in segments {
        current = match current {
            Resolved::One(v) => step(&v, seg)?,
            Resolved::Many(items) => {
                expanded = true;
                let mut out = Vec::with_capacity(items.len());
                for item in &items {
                    match step(item, seg)? {
                        Resolved::One(v) => out.push(v),
                        Resolved::Many(vs) => out.extend(vs),
                    }
                }
                Resolved::Many(out)
            }
        };
    }

    if expanded && matches!(current, Resolved::One(_)) {
        // An earlier segment expanded but a later Key/Index collapsed each
        // branch back to One — still a sequence overall.
        if let Resolved::One(v) = current {
            return Some(Resolved::Many(vec![v]));
        }
    }
    Some(current)
}

/// Convenience: resolve a path and coerce to `f64`, used by gauge/counter
/// extraction. Returns `None` for absent, non-numeric, or sequence results.
pub fn extract_f64(path: &str, root: &Value) -> Option<f64> {
    match extract(path, root)?.as_single()? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_simple_key() {
        let v = json!({"id": 1});
        assert_eq!(extract("id", &v), Some(Resolved::One(json!(1))));
    }

    #[test]
    fn root_prefix_is_transparent() {
        let v = json!({"id": 1});
        assert_eq!(extract("$root.id", &v), extract("id", &v));
    }

    #[test]
    fn absent_key_is_none() {
        let v = json!({"id": 1});
        assert_eq!(extract("missing", &v), None);
    }

    #[test]
    fn null_is_present_not_absent() {
        let v = json!({"id": null});
        assert_eq!(extract("id", &v), Some(Resolved::One(Value::Null)));
    }

    #[test]
    fn index_access() {
        let v = json!({"items": [10, 20, 30]});
        assert_eq!(extract("items[1]", &v), Some(Resolved::One(json!(20))));
    }

    #[test]
    fn negative_index_access() {
        let v = json!({"items": [10, 20, 30]});
        assert_eq!(extract("items[-1]", &v), Some(Resolved::One(json!(30))));
    }

    #[test]
    fn slice_access() {
        let v = json!({"items": [10, 20, 30, 40]});
        assert_eq!(
            extract("items[1:3]", &v),
            Some(Resolved::Many(vec![json!(20), json!(30)]))
        );
    }

    #[test]
    fn expand_then_field() {
        let v = json!({"items": [{"id": 1}, {"id": 2}]});
        assert_eq!(
            extract("items[].id", &v),
            Some(Resolved::Many(vec![json!(1), json!(2)]))
        );
    }

    #[test]
    fn escaped_dot_in_key() {
        let v = json!({"a.b": 5});
        assert_eq!(extract("a/.b", &v), Some(Resolved::One(json!(5))));
    }

    #[test]
    fn nested_expand_flattens() {
        let v = json!({"groups": [{"items": [1, 2]}, {"items": [3]}]});
        assert_eq!(
            extract("groups[].items[]", &v),
            Some(Resolved::Many(vec![json!(1), json!(2), json!(3)]))
        );
    }

    #[test]
    fn extract_f64_from_number() {
        let v = json!({"x": 3.5});
        assert_eq!(extract_f64("x", &v), Some(3.5));
    }

    #[test]
    fn extract_f64_from_numeric_string() {
        let v = json!({"x": "42"});
        assert_eq!(extract_f64("x", &v), Some(42.0));
    }

    #[test]
    fn extract_f64_absent_is_none() {
        let v = json!({});
        assert_eq!(extract_f64("x", &v), None);
    }

    #[test]
    fn stable_across_whitespace_and_key_order() {
        let a: Value = serde_json::from_str(r#"{"a":1,"b":2}"#).unwrap();
        let b: Value = serde_json::from_str("{\n  \"b\": 2,\n  \"a\": 1\n}").unwrap();
        assert_eq!(extract("a", &a), extract("a", &b));
    }

    #[test]
    fn out_of_range_index_is_absent() {
        let v = json!({"items": [1, 2]});
        assert_eq!(extract("items[5]", &v), None);
    }

    #[test]
    fn slice_out_of_range_clamps() {
        let v = json!({"items": [1, 2]});
        assert_eq!(
            extract("items[0:10]", &v),
            Some(Resolved::Many(vec![json!(1), json!(2)]))
        );
    }
}
