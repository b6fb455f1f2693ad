//! Stateless helpers shared by the conversion, projection and source modules.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::conf::C_SEP_KEY;
use crate::spec::ExportError;

////////////////////////////////////////////////////////////////////////////////
// #region ValueInspection

/// Loose emptiness: null, `""`, `"0"`, zero, `false`, empty list/map.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty() || s == "0",
        Value::Array(l_items) => l_items.is_empty(),
        Value::Object(dict) => dict.is_empty(),
    }
}

/// Loose truthiness, the inverse of [`is_empty_value`].
pub fn is_truthy_value(value: &Value) -> bool {
    !is_empty_value(value)
}

/// Numeric reading of numbers and numeric strings.
pub fn parse_numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

/// Truncating integer cast; non-numeric input reads its leading digits or 0.
pub fn cast_int(value: &Value) -> i64 {
    match value {
        Value::Null => 0,
        Value::Bool(b) => i64::from(*b),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .unwrap_or(0),
        Value::String(s) => {
            let c_text = s.trim();
            if let Ok(n) = c_text.parse::<i64>() {
                return n;
            }
            if let Ok(f) = c_text.parse::<f64>()
                && f.is_finite()
            {
                return f.trunc() as i64;
            }
            parse_int_prefix(c_text)
        }
        Value::Array(l_items) => i64::from(!l_items.is_empty()),
        Value::Object(dict) => i64::from(!dict.is_empty()),
    }
}

fn parse_int_prefix(text: &str) -> i64 {
    let mut n_end = 0;
    for (n_idx, chr) in text.char_indices() {
        if chr.is_ascii_digit() || (n_idx == 0 && (chr == '-' || chr == '+')) {
            n_end = n_idx + chr.len_utf8();
        } else {
            break;
        }
    }
    text[..n_end].parse::<i64>().unwrap_or(0)
}

/// Plain text of a raw value.
pub fn render_value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => if *b { "True" } else { "False" }.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Order two raw values: numerically when both are numeric, else as text.
pub fn compare_values(left: &Value, right: &Value) -> std::cmp::Ordering {
    match (parse_numeric(left), parse_numeric(right)) {
        (Some(l), Some(r)) => l.total_cmp(&r),
        _ => render_value_text(left).cmp(&render_value_text(right)),
    }
}

/// Whether two raw values are loosely equal.
pub fn is_loosely_equal(left: &Value, right: &Value) -> bool {
    compare_values(left, right) == std::cmp::Ordering::Equal
}

/// Case-insensitive SQL `LIKE` match with `%` and `_` wildcards.
pub fn is_like_match(text: &str, pattern: &str) -> bool {
    let l_text: Vec<char> = text.to_lowercase().chars().collect();
    let l_pattern: Vec<char> = pattern.to_lowercase().chars().collect();

    let (mut n_t, mut n_p) = (0usize, 0usize);
    let mut tup_backtrack: Option<(usize, usize)> = None;
    while n_t < l_text.len() {
        if n_p < l_pattern.len() && (l_pattern[n_p] == '_' || l_pattern[n_p] == l_text[n_t]) {
            n_t += 1;
            n_p += 1;
        } else if n_p < l_pattern.len() && l_pattern[n_p] == '%' {
            tup_backtrack = Some((n_p, n_t));
            n_p += 1;
        } else if let Some((n_p_star, n_t_star)) = tup_backtrack {
            n_p = n_p_star + 1;
            n_t = n_t_star + 1;
            tup_backtrack = Some((n_p_star, n_t_star + 1));
        } else {
            return false;
        }
    }
    l_pattern[n_p..].iter().all(|chr| *chr == '%')
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region KeyNaming

/// Underscore-join relation names and the leaf column name.
pub fn join_key(prefix: &[String], leaf: &str) -> String {
    let mut l_parts: Vec<&str> = prefix.iter().map(String::as_str).collect();
    l_parts.push(leaf);
    l_parts.join(C_SEP_KEY)
}

/// Normalize a key for label lookup: lowercase snake case.
pub fn derive_label_key(key: &str) -> String {
    let mut c_key = String::with_capacity(key.len());
    let mut if_pending_sep = false;
    let mut if_prev_lower = false;
    for chr in key.trim().chars() {
        if chr.is_alphanumeric() {
            if chr.is_uppercase() && if_prev_lower {
                if_pending_sep = true;
            }
            if if_pending_sep && !c_key.is_empty() {
                c_key.push('_');
            }
            if_pending_sep = false;
            if_prev_lower = chr.is_lowercase() || chr.is_numeric();
            c_key.extend(chr.to_lowercase());
        } else {
            if_pending_sep = true;
            if_prev_lower = false;
        }
    }
    c_key
}

/// Validate that `keys` has no duplicated names.
pub fn validate_unique_keys(keys: &[String]) -> Result<(), ExportError> {
    if keys.len() == keys.iter().collect::<BTreeSet<_>>().len() {
        return Ok(());
    }

    let mut dict_pos: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (n_idx, c_key) in keys.iter().enumerate() {
        dict_pos.entry(c_key).or_default().push(n_idx);
    }

    let c_msg = dict_pos
        .iter()
        .filter(|(_, l_pos)| l_pos.len() > 1)
        .map(|(c_key, l_pos)| format!("{c_key:?} x{} at indices {:?}", l_pos.len(), l_pos))
        .collect::<Vec<_>>()
        .join("; ");

    Err(ExportError::Configuration(format!(
        "Duplicate column keys detected: {c_msg}"
    )))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn empty_values_follow_loose_rules() {
        for value in [json!(null), json!(""), json!("0"), json!(0), json!(false), json!([])] {
            assert!(is_empty_value(&value), "{value} should be empty");
        }
        for value in [json!("a"), json!(1), json!(true), json!([0]), json!("0.0")] {
            assert!(!is_empty_value(&value), "{value} should not be empty");
        }
    }

    #[test]
    fn int_cast_truncates_and_reads_prefix() {
        assert_eq!(cast_int(&json!("42")), 42);
        assert_eq!(cast_int(&json!("4.9")), 4);
        assert_eq!(cast_int(&json!(-4.9)), -4);
        assert_eq!(cast_int(&json!("12abc")), 12);
        assert_eq!(cast_int(&json!("abc")), 0);
        assert_eq!(cast_int(&json!(true)), 1);
        assert_eq!(cast_int(&json!(null)), 0);
    }

    #[test]
    fn like_matches_wildcards() {
        assert!(is_like_match("Ana Silva", "%silva"));
        assert!(is_like_match("Ana Silva", "ana%"));
        assert!(is_like_match("Ana Silva", "%a s%"));
        assert!(is_like_match("cat", "c_t"));
        assert!(!is_like_match("cart", "c_t"));
        assert!(!is_like_match("Ana", "%bob%"));
    }

    #[test]
    fn compare_values_prefers_numbers() {
        assert!(compare_values(&json!("10"), &json!(9)).is_gt());
        assert!(compare_values(&json!("b"), &json!("a")).is_gt());
        assert!(is_loosely_equal(&json!("3"), &json!(3)));
    }

    #[test]
    fn label_keys_are_snake_case() {
        assert_eq!(derive_label_key("Hired On"), "hired_on");
        assert_eq!(derive_label_key("team.lead-name"), "team_lead_name");
        assert_eq!(derive_label_key("hired_on"), "hired_on");
        assert_eq!(derive_label_key("FullTime"), "full_time");
        assert_eq!(derive_label_key("teamLead2Name"), "team_lead2_name");
    }

    #[test]
    fn duplicate_keys_are_reported() {
        let l_keys = vec!["a".to_string(), "b".to_string(), "a".to_string()];
        let err = validate_unique_keys(&l_keys).unwrap_err();
        assert!(err.to_string().contains("\"a\" x2 at indices [0, 2]"));
        assert!(validate_unique_keys(&l_keys[..2]).is_ok());
    }

    #[test]
    fn join_key_uses_underscores() {
        let l_prefix = vec!["team".to_string(), "lead".to_string()];
        assert_eq!(join_key(&l_prefix, "name"), "team_lead_name");
        assert_eq!(join_key(&[], "name"), "name");
    }
}
