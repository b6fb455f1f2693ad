//! Value conversion from raw record values to display cells.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::Value;

use crate::conf::{C_SEP_CONCAT, SpecExportSettings, TUP_LABEL_BOOL};
use crate::spec::{EnumCellValue, EnumColumnKind, ExportError};
use crate::util::{
    cast_int, derive_label_key, is_empty_value, is_truthy_value, parse_numeric, render_value_text,
};

////////////////////////////////////////////////////////////////////////////////
// #region Collaborators

/// Label translation collaborator: normalized key to human label.
pub trait LabelResolver: Send + Sync {
    /// Translation of `key`, or `None` when no mapping exists.
    fn translate(&self, key: &str) -> Option<String>;
}

/// Label resolver without any mapping.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLabels;

impl LabelResolver for NoLabels {
    fn translate(&self, _key: &str) -> Option<String> {
        None
    }
}

/// Map-backed label catalog; keys are normalized on insert and lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecLabelCatalog {
    dict_labels: BTreeMap<String, String>,
}

impl SpecLabelCatalog {
    /// Build from `(key, label)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut catalog = Self::default();
        for (key, label) in pairs {
            catalog.insert(key.as_ref(), label);
        }
        catalog
    }

    /// Add or replace one label.
    pub fn insert(&mut self, key: &str, label: impl Into<String>) {
        self.dict_labels.insert(derive_label_key(key), label.into());
    }
}

impl LabelResolver for SpecLabelCatalog {
    fn translate(&self, key: &str) -> Option<String> {
        self.dict_labels.get(&derive_label_key(key)).cloned()
    }
}

/// Resolve `key` to its label; falls back to the key with `.` replaced by `_`.
pub fn resolve_label(labels: &dyn LabelResolver, key: &str) -> String {
    labels
        .translate(&derive_label_key(key))
        .unwrap_or_else(|| key.replace('.', "_"))
}

/// Single-argument conversion bound to a named column kind.
pub trait ValueResolver: Send + Sync {
    /// Convert a raw value to its display cell.
    fn resolve(&self, value: &Value) -> EnumCellValue;
}

impl<F> ValueResolver for F
where
    F: Fn(&Value) -> EnumCellValue + Send + Sync,
{
    fn resolve(&self, value: &Value) -> EnumCellValue {
        self(value)
    }
}

/// Resolvers by type tag, populated at startup.
#[derive(Clone, Default)]
pub struct SpecResolverRegistry {
    dict_resolvers: BTreeMap<String, Arc<dyn ValueResolver>>,
}

impl SpecResolverRegistry {
    /// Register `resolver` under `name`, replacing any previous binding.
    pub fn register(&mut self, name: impl Into<String>, resolver: Arc<dyn ValueResolver>) {
        self.dict_resolvers.insert(name.into(), resolver);
    }

    /// Builder-style [`Self::register`].
    pub fn with(mut self, name: impl Into<String>, resolver: Arc<dyn ValueResolver>) -> Self {
        self.register(name, resolver);
        self
    }

    /// Resolver bound to `name`.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ValueResolver>> {
        self.dict_resolvers.get(name)
    }

    /// Registered names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.dict_resolvers.keys().map(String::as_str)
    }
}

impl fmt::Debug for SpecResolverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.dict_resolvers.keys()).finish()
    }
}

/// Collaborators and settings shared by one export call.
#[derive(Clone)]
pub struct SpecExportContext {
    /// Label translation.
    pub labels: Arc<dyn LabelResolver>,
    /// Named value resolvers.
    pub resolvers: SpecResolverRegistry,
    /// Formats, batch size and defaults.
    pub settings: SpecExportSettings,
}

impl Default for SpecExportContext {
    fn default() -> Self {
        Self {
            labels: Arc::new(NoLabels),
            resolvers: SpecResolverRegistry::default(),
            settings: SpecExportSettings::default(),
        }
    }
}

impl fmt::Debug for SpecExportContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpecExportContext")
            .field("resolvers", &self.resolvers)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SpecExportContext {
    /// Replace the label resolver.
    pub fn with_labels(mut self, labels: Arc<dyn LabelResolver>) -> Self {
        self.labels = labels;
        self
    }

    /// Replace the resolver registry.
    pub fn with_resolvers(mut self, resolvers: SpecResolverRegistry) -> Self {
        self.resolvers = resolvers;
        self
    }

    /// Replace the settings.
    pub fn with_settings(mut self, settings: SpecExportSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Resolve a heading or value label.
    pub fn label(&self, key: &str) -> String {
        resolve_label(self.labels.as_ref(), key)
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ValueConversion

/// Convert a raw value according to its declared kind.
///
/// Only `date`/`datetime` parsing can fail; every other kind falls back to
/// the raw value when it does not fit.
pub fn convert_value(
    raw: &Value,
    kind: &EnumColumnKind,
    ctx: &SpecExportContext,
) -> Result<EnumCellValue, ExportError> {
    let cell = match kind {
        EnumColumnKind::Text => derive_cell_from_value(raw),
        EnumColumnKind::Date => convert_date(raw, kind, &ctx.settings.date_format)?,
        EnumColumnKind::Datetime => convert_date(raw, kind, &ctx.settings.datetime_format)?,
        EnumColumnKind::Array => match raw {
            Value::Array(l_items) => EnumCellValue::String(
                l_items
                    .iter()
                    .filter(|item| !is_empty_value(item))
                    .map(render_value_text)
                    .collect::<Vec<_>>()
                    .join(C_SEP_CONCAT),
            ),
            _ => derive_cell_from_value(raw),
        },
        EnumColumnKind::Int => EnumCellValue::Number(cast_int(raw) as f64),
        EnumColumnKind::Float => match parse_numeric(raw) {
            Some(n) => EnumCellValue::Number(n),
            None => derive_cell_from_value(raw),
        },
        EnumColumnKind::Money => match parse_decimal(raw) {
            Some(amount) => EnumCellValue::String(format_money(amount)),
            None => derive_cell_from_value(raw),
        },
        EnumColumnKind::Bool => {
            let (c_key, c_fallback) = if is_truthy_value(raw) {
                TUP_LABEL_BOOL[0]
            } else {
                TUP_LABEL_BOOL[1]
            };
            EnumCellValue::String(
                ctx.labels
                    .translate(c_key)
                    .unwrap_or_else(|| c_fallback.to_string()),
            )
        }
        EnumColumnKind::ClassPath => {
            let c_text = render_value_text(raw);
            EnumCellValue::String(ctx.label(derive_trailing_segment(&c_text)))
        }
        EnumColumnKind::Resolver(name) => match ctx.resolvers.get(name) {
            Some(resolver) => resolver.resolve(raw),
            None => derive_cell_from_value(raw),
        },
    };
    Ok(cell)
}

/// Display cell of an unconverted raw value.
pub fn derive_cell_from_value(raw: &Value) -> EnumCellValue {
    match raw {
        Value::Null => EnumCellValue::None,
        Value::Number(n) => n
            .as_f64()
            .map(EnumCellValue::Number)
            .unwrap_or_else(|| EnumCellValue::String(n.to_string())),
        _ => EnumCellValue::String(render_value_text(raw)),
    }
}

fn convert_date(
    raw: &Value,
    kind: &EnumColumnKind,
    fmt_out: &str,
) -> Result<EnumCellValue, ExportError> {
    if is_empty_value(raw) {
        return Ok(EnumCellValue::String(String::new()));
    }
    let Some(dt) = parse_datetime_value(raw) else {
        return Err(ExportError::Conversion {
            kind: kind.tag().to_string(),
            value: render_value_text(raw),
            message: "unrecognized date/time format".to_string(),
        });
    };
    Ok(EnumCellValue::String(dt.format(fmt_out).to_string()))
}

const L_FMT_DATETIME_INPUT: [&str; 6] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%d-%m-%Y %H:%M:%S",
];

const L_FMT_DATE_INPUT: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%d-%m-%Y"];

/// Parse a raw date/time value (text or unix seconds).
///
/// Offsets are kept as wall-clock time in the given offset.
pub fn parse_datetime_value(raw: &Value) -> Option<NaiveDateTime> {
    match raw {
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(|dt| dt.naive_utc()),
        Value::String(s) => parse_datetime_text(s.trim()),
        _ => None,
    }
}

fn parse_datetime_text(text: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_local());
    }
    for c_fmt in L_FMT_DATETIME_INPUT {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, c_fmt) {
            return Some(dt);
        }
    }
    for c_fmt in L_FMT_DATE_INPUT {
        if let Ok(date) = NaiveDate::parse_from_str(text, c_fmt) {
            return Some(date.and_time(NaiveTime::MIN));
        }
    }
    None
}

fn parse_decimal(raw: &Value) -> Option<Decimal> {
    match raw {
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(Decimal::from(i)),
            None => n.as_f64().and_then(Decimal::from_f64),
        },
        Value::String(s) => {
            let c_text = s.trim();
            Decimal::from_str(c_text)
                .or_else(|_| Decimal::from_scientific(c_text))
                .ok()
        }
        _ => None,
    }
}

/// Two decimals, `.` separator, no grouping, half away from zero.
pub fn format_money(amount: Decimal) -> String {
    let amount = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    format!("{amount:.2}")
}

/// Segment after the last `\`, `/` or `::`.
pub fn derive_trailing_segment(text: &str) -> &str {
    let n_start = [
        text.rfind('\\').map(|n| n + 1),
        text.rfind('/').map(|n| n + 1),
        text.rfind("::").map(|n| n + 2),
    ]
    .into_iter()
    .flatten()
    .max()
    .unwrap_or(0);
    &text[n_start..]
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn build_context() -> SpecExportContext {
        let labels = SpecLabelCatalog::from_pairs([
            ("yes", "Sim"),
            ("no", "Não"),
            ("full_time", "Full time"),
        ]);
        let resolvers = SpecResolverRegistry::default().with(
            "StatusEnum",
            Arc::new(|value: &Value| {
                EnumCellValue::String(match value.as_i64() {
                    Some(1) => "Active".to_string(),
                    _ => "Inactive".to_string(),
                })
            }),
        );
        SpecExportContext::default()
            .with_labels(Arc::new(labels))
            .with_resolvers(resolvers)
    }

    fn convert(raw: Value, kind: EnumColumnKind) -> EnumCellValue {
        convert_value(&raw, &kind, &build_context()).unwrap()
    }

    fn text(s: &str) -> EnumCellValue {
        EnumCellValue::String(s.to_string())
    }

    #[test]
    fn dates_drop_time_and_datetimes_keep_it() {
        assert_eq!(convert(json!("2024-03-05T10:00:00"), EnumColumnKind::Date), text("2024-03-05"));
        assert_eq!(
            convert(json!("2024-03-05T10:00:00.250Z"), EnumColumnKind::Datetime),
            text("2024-03-05 10:00:00")
        );
        assert_eq!(
            convert(json!("2024-03-05"), EnumColumnKind::Datetime),
            text("2024-03-05 00:00:00")
        );
        assert_eq!(convert(json!(0), EnumColumnKind::Date), text(""));
        assert_eq!(convert(json!(1_709_632_800), EnumColumnKind::Date), text("2024-03-05"));
    }

    #[test]
    fn empty_dates_are_blank_text() {
        assert_eq!(convert(json!(null), EnumColumnKind::Date), text(""));
        assert_eq!(convert(json!(""), EnumColumnKind::Datetime), text(""));
    }

    #[test]
    fn malformed_dates_fail_conversion() {
        let err = convert_value(&json!("not a date"), &EnumColumnKind::Date, &build_context())
            .unwrap_err();
        assert!(matches!(err, ExportError::Conversion { ref kind, .. } if kind == "date"));
    }

    #[test]
    fn money_formats_numeric_values_only() {
        assert_eq!(convert(json!("19.5"), EnumColumnKind::Money), text("19.50"));
        assert_eq!(convert(json!(1234.567), EnumColumnKind::Money), text("1234.57"));
        assert_eq!(convert(json!(2.005), EnumColumnKind::Money), text("2.01"));
        assert_eq!(convert(json!(7), EnumColumnKind::Money), text("7.00"));
        assert_eq!(convert(json!("abc"), EnumColumnKind::Money), text("abc"));
    }

    #[test]
    fn bools_use_translated_labels() {
        assert_eq!(convert(json!(1), EnumColumnKind::Bool), text("Sim"));
        assert_eq!(convert(json!(0), EnumColumnKind::Bool), text("Não"));
        let cell = convert_value(&json!(true), &EnumColumnKind::Bool, &SpecExportContext::default())
            .unwrap();
        assert_eq!(cell, text("Yes"));
    }

    #[test]
    fn numbers_cast_or_pass_through() {
        assert_eq!(convert(json!("42.9"), EnumColumnKind::Int), EnumCellValue::Number(42.0));
        assert_eq!(convert(json!("1.5"), EnumColumnKind::Float), EnumCellValue::Number(1.5));
        assert_eq!(convert(json!("n/a"), EnumColumnKind::Float), text("n/a"));
    }

    #[test]
    fn arrays_join_non_empty_items() {
        assert_eq!(convert(json!(["a", "", null, "b"]), EnumColumnKind::Array), text("a, b"));
        assert_eq!(convert(json!("single"), EnumColumnKind::Array), text("single"));
    }

    #[test]
    fn class_paths_use_trailing_segment_label() {
        assert_eq!(
            convert(json!("App\\Enums\\FullTime"), EnumColumnKind::ClassPath),
            text("Full time")
        );
        assert_eq!(convert(json!("app::kinds::Contract"), EnumColumnKind::ClassPath), text("Contract"));
    }

    #[test]
    fn resolvers_apply_or_pass_through() {
        let kind = EnumColumnKind::Resolver("StatusEnum".to_string());
        assert_eq!(convert(json!(1), kind.clone()), text("Active"));
        let kind = EnumColumnKind::Resolver("UnknownEnum".to_string());
        assert_eq!(convert(json!(1), kind), EnumCellValue::Number(1.0));
    }

    #[test]
    fn text_conversion_is_idempotent() {
        let cell = convert(json!("Ana"), EnumColumnKind::Text);
        let EnumCellValue::String(c_once) = &cell else {
            panic!("expected text");
        };
        assert_eq!(convert(json!(c_once), EnumColumnKind::Text), cell);
    }

    #[test]
    fn labels_fall_back_to_key() {
        assert_eq!(resolve_label(&NoLabels, "team.name"), "team_name");
        let catalog = SpecLabelCatalog::from_pairs([("Hired On", "Hired On")]);
        assert_eq!(resolve_label(&catalog, "hired_on"), "Hired On");
    }
}
