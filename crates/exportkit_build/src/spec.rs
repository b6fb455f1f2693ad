//! Schema, runtime filter, cell value and error models.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::conf::{C_DATE_COLUMN_DEFAULT, C_KEY_COLUMN_DEFAULT, C_SEP_CONCAT};
use crate::source::QueryDirective;

/// Boxed error returned by external collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

////////////////////////////////////////////////////////////////////////////////
// #region ColumnKinds

/// Declared column type; drives value coercion.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EnumColumnKind {
    /// Raw value, unchanged.
    Text,
    /// Calendar date without time component.
    Date,
    /// Date and time.
    Datetime,
    /// Sequence joined into one text cell.
    Array,
    /// Truncating integer cast.
    Int,
    /// Float when numeric, raw otherwise.
    Float,
    /// Two-decimal money text when numeric, raw otherwise.
    Money,
    /// Localized yes/no label.
    Bool,
    /// Trailing path segment passed through label resolution.
    ClassPath,
    /// Named resolver registered in [`crate::convert::SpecResolverRegistry`].
    Resolver(String),
}

impl EnumColumnKind {
    /// Parse a type tag. Unknown tags name a resolver.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim() {
            "text" => Self::Text,
            "date" => Self::Date,
            "datetime" => Self::Datetime,
            "array" => Self::Array,
            "int" => Self::Int,
            "float" => Self::Float,
            "money" => Self::Money,
            "bool" | "boolean" => Self::Bool,
            "classPath" => Self::ClassPath,
            other => Self::Resolver(other.to_string()),
        }
    }

    /// Canonical type tag.
    pub fn tag(&self) -> &str {
        match self {
            Self::Text => "text",
            Self::Date => "date",
            Self::Datetime => "datetime",
            Self::Array => "array",
            Self::Int => "int",
            Self::Float => "float",
            Self::Money => "money",
            Self::Bool => "bool",
            Self::ClassPath => "classPath",
            Self::Resolver(name) => name,
        }
    }
}

impl fmt::Display for EnumColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Aggregation applied to a many-relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnumAggregateMode {
    /// Ordered sequence of the value column.
    List,
    /// Number of related records.
    Count,
    /// Value column joined with `", "`.
    Concat,
}

impl EnumAggregateMode {
    /// Parse `list` / `count` / `concat`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "list" => Some(Self::List),
            "count" => Some(Self::Count),
            "concat" => Some(Self::Concat),
            _ => None,
        }
    }
}

/// Declared relation cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnumCardinality {
    /// At most one related record per parent.
    One,
    /// Zero or more related records per parent.
    Many(EnumAggregateMode),
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region SchemaSpecification

/// One declared column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecColumn {
    /// Attribute name; a dotted name is a nested path.
    pub name: String,
    /// Declared type.
    pub kind: EnumColumnKind,
}

impl SpecColumn {
    /// Build a column from name and kind.
    pub fn new(name: impl Into<String>, kind: EnumColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Whether the column name is a dotted nested path.
    pub fn is_nested_path(&self) -> bool {
        self.name.contains('.')
    }
}

/// One entry of a relation body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnumFieldSpec {
    /// Column read from the related record.
    Column(SpecColumn),
    /// Relation of the related record.
    Relation(SpecRelation),
}

/// Declared relation with its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecRelation {
    /// Relation name on the parent record.
    pub name: String,
    /// Declared cardinality.
    pub cardinality: EnumCardinality,
    /// Foreign key column selected on the parent for one-relations.
    pub foreign_key: Option<String>,
    /// Designated value column for list/concat aggregation.
    pub value_column: Option<String>,
    /// Ordered body fields.
    pub fields: Vec<EnumFieldSpec>,
}

impl SpecRelation {
    /// One-relation without body.
    pub fn one(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cardinality: EnumCardinality::One,
            foreign_key: None,
            value_column: None,
            fields: Vec::new(),
        }
    }

    /// Many-relation aggregated with `mode`.
    pub fn many(name: impl Into<String>, mode: EnumAggregateMode) -> Self {
        Self {
            name: name.into(),
            cardinality: EnumCardinality::Many(mode),
            foreign_key: None,
            value_column: None,
            fields: Vec::new(),
        }
    }

    /// Many-relation in count mode.
    pub fn count(name: impl Into<String>) -> Self {
        Self::many(name, EnumAggregateMode::Count)
    }

    /// Append a body column.
    pub fn with_column(mut self, name: impl Into<String>, kind: EnumColumnKind) -> Self {
        self.fields
            .push(EnumFieldSpec::Column(SpecColumn::new(name, kind)));
        self
    }

    /// Append a nested relation.
    pub fn with_relation(mut self, relation: SpecRelation) -> Self {
        self.fields.push(EnumFieldSpec::Relation(relation));
        self
    }

    /// Set the foreign key column.
    pub fn with_foreign_key(mut self, column: impl Into<String>) -> Self {
        self.foreign_key = Some(column.into());
        self
    }

    /// Set the value column; adds it as a text column when not declared yet.
    pub fn with_value_column(mut self, column: impl Into<String>) -> Self {
        let column = column.into();
        if self.column_kind(&column).is_none() {
            self.fields.push(EnumFieldSpec::Column(SpecColumn::new(
                column.clone(),
                EnumColumnKind::Text,
            )));
        }
        self.value_column = Some(column);
        self
    }

    /// Aggregation mode for many-relations.
    pub fn mode(&self) -> Option<EnumAggregateMode> {
        match self.cardinality {
            EnumCardinality::One => None,
            EnumCardinality::Many(mode) => Some(mode),
        }
    }

    /// Body columns in declaration order.
    pub fn columns(&self) -> impl Iterator<Item = &SpecColumn> {
        self.fields.iter().filter_map(|field| match field {
            EnumFieldSpec::Column(column) => Some(column),
            EnumFieldSpec::Relation(_) => None,
        })
    }

    /// Nested relations in declaration order.
    pub fn relations(&self) -> impl Iterator<Item = &SpecRelation> {
        self.fields.iter().filter_map(|field| match field {
            EnumFieldSpec::Relation(relation) => Some(relation),
            EnumFieldSpec::Column(_) => None,
        })
    }

    /// Declared kind of a body column.
    pub fn column_kind(&self, name: &str) -> Option<&EnumColumnKind> {
        self.columns()
            .find(|column| column.name == name)
            .map(|column| &column.kind)
    }
}

/// Additional query directive bound to the column it produces.
#[derive(Clone)]
pub struct SpecDirective {
    /// Output attribute name (also the heading key).
    pub name: String,
    /// Query mutator.
    pub directive: Arc<dyn QueryDirective>,
}

impl fmt::Debug for SpecDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpecDirective")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Full declarative export schema.
#[derive(Debug, Clone)]
pub struct SpecSchemaConfig {
    /// Model/source identifier handed to the record source.
    pub source: String,
    /// Stable per-record identifier column.
    pub key_column: String,
    /// Column used by date-range predicates.
    pub date_column: String,
    /// Base columns.
    pub columns: Vec<SpecColumn>,
    /// One-relations.
    pub relations_one: Vec<SpecRelation>,
    /// Many-relations in any aggregation mode.
    pub relations_many: Vec<SpecRelation>,
    /// Extra eager-load paths.
    pub custom_eager_load: Vec<String>,
    /// Extra selected columns.
    pub custom_select: Vec<String>,
    /// Additional directives, in declaration order.
    pub directives: Vec<SpecDirective>,
}

impl SpecSchemaConfig {
    /// Start a schema for `source`.
    pub fn builder(source: impl Into<String>) -> SpecSchemaConfigBuilder {
        SpecSchemaConfigBuilder {
            schema: SpecSchemaConfig {
                source: source.into(),
                key_column: C_KEY_COLUMN_DEFAULT.to_string(),
                date_column: C_DATE_COLUMN_DEFAULT.to_string(),
                columns: Vec::new(),
                relations_one: Vec::new(),
                relations_many: Vec::new(),
                custom_eager_load: Vec::new(),
                custom_select: Vec::new(),
                directives: Vec::new(),
            },
        }
    }

    /// Many-relations in list/concat mode.
    pub fn relations_aggregated(&self) -> impl Iterator<Item = &SpecRelation> {
        self.relations_many.iter().filter(|relation| {
            matches!(
                relation.cardinality,
                EnumCardinality::Many(EnumAggregateMode::List | EnumAggregateMode::Concat)
            )
        })
    }

    /// Many-relations in count mode.
    pub fn relations_counted(&self) -> impl Iterator<Item = &SpecRelation> {
        self.relations_many.iter().filter(|relation| {
            relation.cardinality == EnumCardinality::Many(EnumAggregateMode::Count)
        })
    }
}

/// Fluent builder for [`SpecSchemaConfig`].
#[derive(Debug, Clone)]
pub struct SpecSchemaConfigBuilder {
    schema: SpecSchemaConfig,
}

impl SpecSchemaConfigBuilder {
    /// Override the key column.
    pub fn key_column(mut self, column: impl Into<String>) -> Self {
        self.schema.key_column = column.into();
        self
    }

    /// Override the date column.
    pub fn date_column(mut self, column: impl Into<String>) -> Self {
        self.schema.date_column = column.into();
        self
    }

    /// Append a base column.
    pub fn column(mut self, name: impl Into<String>, kind: EnumColumnKind) -> Self {
        self.schema.columns.push(SpecColumn::new(name, kind));
        self
    }

    /// Append a relation; routed by its declared cardinality.
    pub fn relation(mut self, relation: SpecRelation) -> Self {
        match relation.cardinality {
            EnumCardinality::One => self.schema.relations_one.push(relation),
            EnumCardinality::Many(_) => self.schema.relations_many.push(relation),
        }
        self
    }

    /// Append an eager-load path.
    pub fn eager_load(mut self, path: impl Into<String>) -> Self {
        self.schema.custom_eager_load.push(path.into());
        self
    }

    /// Append a selected column.
    pub fn select(mut self, column: impl Into<String>) -> Self {
        self.schema.custom_select.push(column.into());
        self
    }

    /// Append an additional directive producing column `name`.
    pub fn directive(
        mut self,
        name: impl Into<String>,
        directive: Arc<dyn QueryDirective>,
    ) -> Self {
        self.schema.directives.push(SpecDirective {
            name: name.into(),
            directive,
        });
        self
    }

    /// Finish the schema. Validation happens when an engine is configured.
    pub fn build(self) -> SpecSchemaConfig {
        self.schema
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region RuntimeFilter

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnumSortDirection {
    /// Ascending (default).
    #[default]
    Asc,
    /// Descending.
    Desc,
}

/// Comparison operator of an explicit condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum EnumConditionOperator {
    /// `=`
    #[serde(rename = "=")]
    Eq,
    /// `!=` / `<>`
    #[serde(rename = "!=", alias = "<>")]
    Ne,
    /// `>`
    #[serde(rename = ">")]
    Gt,
    /// `>=`
    #[serde(rename = ">=")]
    Ge,
    /// `<`
    #[serde(rename = "<")]
    Lt,
    /// `<=`
    #[serde(rename = "<=")]
    Le,
    /// SQL `LIKE` with `%` / `_` wildcards.
    #[serde(rename = "like")]
    Like,
    /// Membership in a list value.
    #[serde(rename = "in")]
    In,
    /// Non-membership in a list value.
    #[serde(rename = "not in")]
    NotIn,
}

/// Explicit `{key, operator, value}` condition.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SpecCondition {
    /// Column key.
    pub key: String,
    /// Operator; defaults to `=`.
    #[serde(default = "derive_default_operator")]
    pub operator: EnumConditionOperator,
    /// Compared value.
    pub value: Value,
}

fn derive_default_operator() -> EnumConditionOperator {
    EnumConditionOperator::Eq
}

/// Advanced `{key, value}` condition: key in value(s).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SpecAdvancedCondition {
    /// Column key or many-relation name.
    pub key: String,
    /// Scalar or list of accepted values.
    pub value: Value,
}

impl SpecAdvancedCondition {
    /// Accepted values, wrapping a scalar into a one-element list.
    pub fn values(&self) -> Vec<Value> {
        match &self.value {
            Value::Array(l_values) => l_values.clone(),
            Value::Null => Vec::new(),
            other => vec![other.clone()],
        }
    }
}

/// Per-call runtime filter.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct SpecRuntimeFilter {
    /// Inclusive lower date bound (`YYYY-MM-DD`).
    #[serde(alias = "start")]
    pub date_range_start: Option<String>,
    /// Inclusive upper date bound (`YYYY-MM-DD`).
    #[serde(alias = "end")]
    pub date_range_end: Option<String>,
    /// Free-text search over scalar columns.
    #[serde(alias = "search")]
    pub search_term: Option<String>,
    /// Explicit conditions.
    #[serde(alias = "conditions")]
    pub explicit_conditions: Vec<SpecCondition>,
    /// Advanced conditions.
    #[serde(alias = "advanced")]
    pub advanced_conditions: Vec<SpecAdvancedCondition>,
    /// Column allow-list (heading keys).
    #[serde(alias = "columns")]
    pub column_allow_list: Option<Vec<String>>,
    /// Relation allow-list (relation/directive names).
    #[serde(alias = "related")]
    pub related_allow_list: Option<Vec<String>>,
    /// Type tag matched against heading keys.
    #[serde(alias = "type")]
    pub column_type_tag: Option<String>,
    /// Ordering column.
    pub order_by: Option<String>,
    /// Ordering direction.
    pub order_direction: Option<EnumSortDirection>,
    /// Maximum number of records.
    pub limit: Option<usize>,
    /// Export definition name.
    pub page: Option<String>,
    /// Output format tag (`xlsx`, `csv`, `xls`).
    pub format: Option<String>,
    /// Output base file name.
    pub filename: Option<String>,
    /// Timestamp appended to the file name.
    pub timestamp: Option<String>,
}

impl SpecRuntimeFilter {
    /// Whether an allow-list narrows the columns; empty lists count as absent.
    pub fn has_allow_list(&self) -> bool {
        let is_present =
            |l_allow: &Option<Vec<String>>| l_allow.as_ref().is_some_and(|l| !l.is_empty());
        is_present(&self.column_allow_list) || is_present(&self.related_allow_list)
    }

    /// Non-empty type tag, if any.
    pub fn type_tag(&self) -> Option<&str> {
        self.column_type_tag
            .as_deref()
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
    }

    /// Non-empty search term, if any.
    pub fn search(&self) -> Option<&str> {
        self.search_term
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region CellValues

/// Display value of one output cell.
#[derive(Debug, Clone, PartialEq)]
pub enum EnumCellValue {
    /// Missing/blank value.
    None,
    /// Text value.
    String(String),
    /// Numeric value.
    Number(f64),
    /// Sequence produced by list aggregation.
    List(Vec<EnumCellValue>),
}

impl EnumCellValue {
    /// Whether the cell is blank.
    pub fn is_blank(&self) -> bool {
        match self {
            Self::None => true,
            Self::String(s) => s.is_empty(),
            Self::Number(_) => false,
            Self::List(l_items) => l_items.is_empty(),
        }
    }

    /// Render as text, joining lists with `sep`.
    pub fn to_text_with(&self, sep: &str) -> String {
        match self {
            Self::None => String::new(),
            Self::String(s) => s.clone(),
            Self::Number(n) => format_number(*n),
            Self::List(l_items) => l_items
                .iter()
                .map(|item| item.to_text_with(sep))
                .collect::<Vec<_>>()
                .join(sep),
        }
    }
}

impl fmt::Display for EnumCellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text_with(C_SEP_CONCAT))
    }
}

/// Render a number without a trailing `.0` for integral values.
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ExportTable

/// Final `(headings, rows)` output of one export.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpecExportTable {
    /// Heading keys, in column order.
    pub keys: Vec<String>,
    /// Resolved heading labels, aligned with `keys`.
    pub headings: Vec<String>,
    /// Rows; `rows[i][j]` belongs to `keys[j]`.
    pub rows: Vec<Vec<EnumCellValue>>,
}

impl SpecExportTable {
    /// Number of columns.
    pub fn width(&self) -> usize {
        self.keys.len()
    }

    /// Number of rows.
    pub fn height(&self) -> usize {
        self.rows.len()
    }

    /// Keyed view of each row.
    pub fn iter_rows_keyed(&self) -> impl Iterator<Item = BTreeMap<&str, &EnumCellValue>> {
        self.rows.iter().map(|row| {
            self.keys
                .iter()
                .map(String::as_str)
                .zip(row.iter())
                .collect()
        })
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Errors

/// Failure of an export call.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// Missing or invalid schema; raised before any fetch.
    #[error("Invalid export configuration: {0}")]
    Configuration(String),

    /// Requested export definition does not exist.
    #[error("Export not found: {0}")]
    NotFound(String),

    /// Export definition exists but is disabled.
    #[error("Export is disabled: {0}")]
    Permission(String),

    /// A value failed type coercion.
    #[error("Cannot convert {value:?} to {kind}: {message}")]
    Conversion {
        /// Target type tag.
        kind: String,
        /// Offending raw value.
        value: String,
        /// Parser message.
        message: String,
    },

    /// The record source failed.
    #[error("Record source failed: {0}")]
    Source(#[source] BoxError),

    /// Spreadsheet encoding failed.
    #[error("Failed to encode export: {0}")]
    Encode(String),

    /// Settings or schema file could not be read.
    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),

    /// Settings or schema file could not be parsed.
    #[error("Failed to parse TOML: {0}")]
    Toml(#[from] toml::de::Error),
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_kind_tags_parse_and_fall_back_to_resolver() {
        assert_eq!(EnumColumnKind::from_tag("money"), EnumColumnKind::Money);
        assert_eq!(EnumColumnKind::from_tag("boolean"), EnumColumnKind::Bool);
        assert_eq!(
            EnumColumnKind::from_tag("StatusEnum"),
            EnumColumnKind::Resolver("StatusEnum".to_string())
        );
        assert_eq!(EnumColumnKind::ClassPath.tag(), "classPath");
    }

    #[test]
    fn value_column_is_declared_once() {
        let relation = SpecRelation::many("tags", EnumAggregateMode::List)
            .with_column("label", EnumColumnKind::Text)
            .with_value_column("label");
        assert_eq!(relation.columns().count(), 1);

        let relation = SpecRelation::many("tags", EnumAggregateMode::Concat).with_value_column("code");
        assert_eq!(relation.column_kind("code"), Some(&EnumColumnKind::Text));
    }

    #[test]
    fn builder_routes_relations_by_cardinality() {
        let schema = SpecSchemaConfig::builder("employees")
            .column("name", EnumColumnKind::Text)
            .relation(SpecRelation::one("team").with_column("name", EnumColumnKind::Text))
            .relation(SpecRelation::count("shifts"))
            .relation(SpecRelation::many("tags", EnumAggregateMode::List).with_value_column("label"))
            .build();

        assert_eq!(schema.relations_one.len(), 1);
        assert_eq!(schema.relations_many.len(), 2);
        assert_eq!(schema.relations_counted().count(), 1);
        assert_eq!(schema.relations_aggregated().count(), 1);
        assert_eq!(schema.key_column, "id");
        assert_eq!(schema.date_column, "created_at");
    }

    #[test]
    fn runtime_filter_accepts_short_aliases() {
        let filter: SpecRuntimeFilter = serde_json::from_value(serde_json::json!({
            "start": "2024-01-01",
            "search": "ana",
            "columns": ["name"],
            "type": "date",
            "conditions": [{"key": "age", "operator": ">=", "value": 30}],
            "advanced": [{"key": "tags", "value": 3}],
            "order_direction": "desc"
        }))
        .unwrap();

        assert_eq!(filter.date_range_start.as_deref(), Some("2024-01-01"));
        assert_eq!(filter.search(), Some("ana"));
        assert_eq!(filter.column_allow_list, Some(vec!["name".to_string()]));
        assert_eq!(filter.type_tag(), Some("date"));
        assert_eq!(filter.explicit_conditions[0].operator, EnumConditionOperator::Ge);
        assert_eq!(filter.advanced_conditions[0].values(), vec![serde_json::json!(3)]);
        assert_eq!(filter.order_direction, Some(EnumSortDirection::Desc));
    }

    #[test]
    fn cell_values_render_as_text() {
        assert_eq!(EnumCellValue::Number(2.0).to_string(), "2");
        assert_eq!(EnumCellValue::Number(2.5).to_string(), "2.5");
        let cell = EnumCellValue::List(vec![
            EnumCellValue::String("x".to_string()),
            EnumCellValue::String("y".to_string()),
        ]);
        assert_eq!(cell.to_string(), "x, y");
        assert_eq!(cell.to_text_with("\n"), "x\ny");
        assert!(EnumCellValue::List(vec![]).is_blank());
    }

    #[test]
    fn export_table_exposes_keyed_rows() {
        let table = SpecExportTable {
            keys: vec!["name".to_string(), "age".to_string()],
            headings: vec!["Name".to_string(), "Age".to_string()],
            rows: vec![vec![
                EnumCellValue::String("Ana".to_string()),
                EnumCellValue::Number(31.0),
            ]],
        };
        let l_rows: Vec<_> = table.iter_rows_keyed().collect();
        assert_eq!(l_rows[0]["age"], &EnumCellValue::Number(31.0));
        assert_eq!(table.width(), 2);
        assert_eq!(table.height(), 1);
    }
}
