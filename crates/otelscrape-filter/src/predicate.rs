//! Predicate grammar evaluation (§4.7): `{field, matchType, value}` against
//! one record, with numeric coercion and the regex anchoring rule.

use otelscrape_common::config::{MatchType, Predicate, PredicateValue};
use otelscrape_common::path;
use regex::Regex;
use serde_json::Value;

/// Evaluate one predicate against `record`. A field that does not resolve
/// (absent, not present JSON `null`) matches only `NotEquals`.
pub fn matches(predicate: &Predicate, record: &Value) -> bool {
    let field = path::extract(&predicate.field, record).and_then(|r| r.as_single().cloned());

    let Some(field_value) = field else {
        return matches!(predicate.match_type, MatchType::NotEquals);
    };

    match predicate.match_type {
        MatchType::Equals => scalar_matches(&field_value, &predicate.value),
        MatchType::NotEquals => !scalar_matches(&field_value, &predicate.value),
        MatchType::In => list_matches(&field_value, &predicate.value),
        MatchType::Regex => regex_matches(&field_value, &predicate.value),
    }
}

fn scalar_matches(field_value: &Value, predicate_value: &PredicateValue) -> bool {
    match predicate_value {
        PredicateValue::Scalar(v) => scalar_eq(field_value, v),
        PredicateValue::List(values) => values.iter().any(|v| scalar_eq(field_value, v)),
    }
}

fn list_matches(field_value: &Value, predicate_value: &PredicateValue) -> bool {
    match predicate_value {
        PredicateValue::List(values) => values.iter().any(|v| scalar_eq(field_value, v)),
        PredicateValue::Scalar(v) => scalar_eq(field_value, v),
    }
}

fn regex_matches(field_value: &Value, predicate_value: &PredicateValue) -> bool {
    let pattern = match predicate_value {
        PredicateValue::Scalar(Value::String(s)) => s.as_str(),
        _ => return false,
    };
    let Ok(re) = build_anchored_regex(pattern) else {
        return false;
    };
    re.is_match(&stringify(field_value))
}

/// Anchor the pattern at both ends unless it already contains `.*`
/// (per §4.7: "anchored at both ends unless the pattern explicitly
/// contains `.*`").
fn build_anchored_regex(pattern: &str) -> Result<Regex, regex::Error> {
    if pattern.contains(".*") {
        Regex::new(pattern)
    } else {
        Regex::new(&format!("^(?:{pattern})$"))
    }
}

/// Coerce numeric equality when both sides parse as numbers; otherwise
/// fall back to string equality.
fn scalar_eq(a: &Value, b: &Value) -> bool {
    if let (Some(af), Some(bf)) = (as_f64(a), as_f64(b)) {
        return af == bf;
    }
    stringify(a) == stringify(b)
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

fn stringify(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use otelscrape_common::config::MatchType;
    use serde_json::json;

    fn predicate(field: &str, match_type: MatchType, value: PredicateValue) -> Predicate {
        Predicate {
            field: field.to_string(),
            match_type,
            value,
        }
    }

    #[test]
    fn equals_string_match() {
        let record = json!({"status": "ok"});
        let p = predicate("status", MatchType::Equals, PredicateValue::Scalar(json!("ok")));
        assert!(matches(&p, &record));
    }

    #[test]
    fn equals_numeric_coercion() {
        let record = json!({"count": "5"});
        let p = predicate("count", MatchType::Equals, PredicateValue::Scalar(json!(5)));
        assert!(matches(&p, &record));
    }

    #[test]
    fn not_equals_on_absent_field_is_true() {
        let record = json!({});
        let p = predicate("missing", MatchType::NotEquals, PredicateValue::Scalar(json!("x")));
        assert!(matches(&p, &record));
    }

    #[test]
    fn equals_on_absent_field_is_false() {
        let record = json!({});
        let p = predicate("missing", MatchType::Equals, PredicateValue::Scalar(json!("x")));
        assert!(!matches(&p, &record));
    }

    #[test]
    fn in_matches_any_list_member() {
        let record = json!({"status": "fail"});
        let p = predicate(
            "status",
            MatchType::In,
            PredicateValue::List(vec![json!("ok"), json!("fail")]),
        );
        assert!(matches(&p, &record));
    }

    #[test]
    fn regex_is_anchored_by_default() {
        let record = json!({"name": "foobar"});
        let p = predicate("name", MatchType::Regex, PredicateValue::Scalar(json!("foo")));
        assert!(!matches(&p, &record), "unanchored-looking pattern must still be anchored");

        let p_full = predicate("name", MatchType::Regex, PredicateValue::Scalar(json!("foobar")));
        assert!(matches(&p_full, &record));
    }

    #[test]
    fn regex_with_dotstar_is_not_anchored() {
        let record = json!({"name": "foobar"});
        let p = predicate("name", MatchType::Regex, PredicateValue::Scalar(json!(".*oob.*")));
        assert!(matches(&p, &record));
    }
}
