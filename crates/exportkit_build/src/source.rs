//! Fetch plan, query directives and the record source collaborator.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::Value;

use crate::conf::SpecExportSettings;
use crate::convert::parse_datetime_value;
use crate::record::{EnumRelated, SpecRecord, resolve_path};
use crate::spec::{
    BoxError, EnumConditionOperator, EnumSortDirection, ExportError, SpecRelation,
    SpecRuntimeFilter, SpecSchemaConfig,
};
use crate::util::{compare_values, is_like_match, is_loosely_equal, render_value_text};

////////////////////////////////////////////////////////////////////////////////
// #region FetchPlan

/// One filter predicate; all predicates of a plan are AND-ed.
#[derive(Debug, Clone, PartialEq)]
pub enum EnumPredicate {
    /// Date part of `column` on or after `date`.
    DateFrom { column: String, date: NaiveDate },
    /// Date part of `column` on or before `date`.
    DateTo { column: String, date: NaiveDate },
    /// `term` occurs in any of `columns` (case-insensitive).
    SearchAny { columns: Vec<String>, term: String },
    /// `key <operator> value`.
    Compare {
        key: String,
        operator: EnumConditionOperator,
        value: Value,
    },
    /// At least one related record under `relation` has `key_column` in `values`.
    RelatedIn {
        relation: String,
        key_column: String,
        values: Vec<Value>,
    },
}

/// Relation path to eager-load with its selected columns; empty = all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecEagerLoad {
    pub path: String,
    pub columns: Vec<String>,
}

/// Result ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecOrdering {
    pub column: String,
    pub direction: EnumSortDirection,
}

/// Everything a [`RecordSource`] needs to run one export query.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecFetchPlan {
    /// Source (table/model) identifier.
    pub source: String,
    /// Base-query columns; empty = all.
    pub select: Vec<String>,
    /// Relations to eager-load.
    pub eager_loads: Vec<SpecEagerLoad>,
    /// Relations requested as `{name}_count` attributes.
    pub count_relations: Vec<String>,
    /// AND-ed predicates.
    pub predicates: Vec<EnumPredicate>,
    /// Ordering, if any.
    pub ordering: Option<SpecOrdering>,
    /// Maximum number of records.
    pub limit: Option<usize>,
    /// Records per batch.
    pub batch_size: usize,
}

impl SpecFetchPlan {
    /// Empty plan over `source`.
    pub fn new(source: impl Into<String>, batch_size: usize) -> Self {
        Self {
            source: source.into(),
            select: Vec::new(),
            eager_loads: Vec::new(),
            count_relations: Vec::new(),
            predicates: Vec::new(),
            ordering: None,
            limit: None,
            batch_size: batch_size.max(1),
        }
    }

    /// Add a base-query column once.
    pub fn add_select(&mut self, column: impl Into<String>) {
        let column = column.into();
        if !self.select.contains(&column) {
            self.select.push(column);
        }
    }

    /// Add an eager load, merging columns into an existing entry for `path`.
    pub fn add_eager_load(&mut self, path: impl Into<String>, columns: Vec<String>) {
        let path = path.into();
        match self.eager_loads.iter_mut().find(|load| load.path == path) {
            Some(load) => {
                if load.columns.is_empty() || columns.is_empty() {
                    load.columns.clear();
                } else {
                    for column in columns {
                        if !load.columns.contains(&column) {
                            load.columns.push(column);
                        }
                    }
                }
            }
            None => self.eager_loads.push(SpecEagerLoad { path, columns }),
        }
    }

    /// Add a predicate.
    pub fn add_predicate(&mut self, predicate: EnumPredicate) {
        self.predicates.push(predicate);
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Directives

/// Extra query modification applied after the plan is derived.
///
/// The directive's output column is read from the record attribute named
/// after the directive.
pub trait QueryDirective: Send + Sync {
    /// Modify the plan in place.
    fn apply(&self, plan: &mut SpecFetchPlan);
}

impl<F> QueryDirective for F
where
    F: Fn(&mut SpecFetchPlan) + Send + Sync,
{
    fn apply(&self, plan: &mut SpecFetchPlan) {
        self(plan)
    }
}

/// Directives by name, used when schemas are loaded from files.
#[derive(Clone, Default)]
pub struct SpecDirectiveRegistry {
    dict_directives: BTreeMap<String, Arc<dyn QueryDirective>>,
}

impl SpecDirectiveRegistry {
    /// Register `directive` under `name`.
    pub fn register(&mut self, name: impl Into<String>, directive: Arc<dyn QueryDirective>) {
        self.dict_directives.insert(name.into(), directive);
    }

    /// Builder-style [`Self::register`].
    pub fn with(mut self, name: impl Into<String>, directive: Arc<dyn QueryDirective>) -> Self {
        self.register(name, directive);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn QueryDirective>> {
        self.dict_directives.get(name)
    }
}

impl fmt::Debug for SpecDirectiveRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.dict_directives.keys()).finish()
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region PlanDerivation

/// Derive the fetch plan of `schema` under `filter`.
pub fn derive_fetch_plan(
    schema: &SpecSchemaConfig,
    filter: &SpecRuntimeFilter,
    settings: &SpecExportSettings,
) -> Result<SpecFetchPlan, ExportError> {
    let mut plan = SpecFetchPlan::new(schema.source.clone(), settings.batch_size);

    plan.add_select(schema.key_column.clone());
    for column in schema.columns.iter().filter(|column| !column.is_nested_path()) {
        plan.add_select(column.name.clone());
    }
    for relation in &schema.relations_one {
        if let Some(c_fk) = &relation.foreign_key {
            plan.add_select(c_fk.clone());
        }
    }
    for column in &schema.custom_select {
        plan.add_select(column.clone());
    }

    for relation in schema.relations_one.iter().chain(schema.relations_aggregated()) {
        push_eager_loads(&mut plan, relation, None);
    }
    for path in &schema.custom_eager_load {
        plan.add_eager_load(path.clone(), Vec::new());
    }
    plan.count_relations = schema
        .relations_counted()
        .map(|relation| relation.name.clone())
        .collect();

    if let Some(c_start) = &filter.date_range_start {
        plan.add_predicate(EnumPredicate::DateFrom {
            column: schema.date_column.clone(),
            date: parse_filter_date(c_start)?,
        });
    }
    if let Some(c_end) = &filter.date_range_end {
        plan.add_predicate(EnumPredicate::DateTo {
            column: schema.date_column.clone(),
            date: parse_filter_date(c_end)?,
        });
    }
    if let Some(c_term) = filter.search() {
        let l_columns: Vec<String> = schema
            .columns
            .iter()
            .filter(|column| !column.is_nested_path())
            .map(|column| column.name.clone())
            .collect();
        if !l_columns.is_empty() {
            plan.add_predicate(EnumPredicate::SearchAny {
                columns: l_columns,
                term: c_term.to_string(),
            });
        }
    }
    for condition in &filter.explicit_conditions {
        plan.add_predicate(EnumPredicate::Compare {
            key: condition.key.clone(),
            operator: condition.operator,
            value: condition.value.clone(),
        });
    }
    for condition in &filter.advanced_conditions {
        let if_many_relation = schema
            .relations_many
            .iter()
            .any(|relation| relation.name == condition.key);
        let predicate = if if_many_relation {
            EnumPredicate::RelatedIn {
                relation: condition.key.clone(),
                key_column: schema.key_column.clone(),
                values: condition.values(),
            }
        } else {
            EnumPredicate::Compare {
                key: condition.key.clone(),
                operator: EnumConditionOperator::In,
                value: Value::Array(condition.values()),
            }
        };
        plan.add_predicate(predicate);
    }

    if let Some(c_column) = &filter.order_by {
        plan.ordering = Some(SpecOrdering {
            column: c_column.clone(),
            direction: filter.order_direction.unwrap_or_default(),
        });
    }
    plan.limit = filter.limit;

    for item in &schema.directives {
        item.directive.apply(&mut plan);
    }
    Ok(plan)
}

fn push_eager_loads(plan: &mut SpecFetchPlan, relation: &SpecRelation, parent: Option<&str>) {
    let c_path = match parent {
        Some(c_parent) => format!("{c_parent}.{}", relation.name),
        None => relation.name.clone(),
    };
    let mut l_columns: Vec<String> = relation
        .columns()
        .filter(|column| !column.is_nested_path())
        .map(|column| column.name.clone())
        .collect();
    for nested in relation.relations() {
        if let Some(c_fk) = &nested.foreign_key
            && !l_columns.contains(c_fk)
        {
            l_columns.push(c_fk.clone());
        }
    }
    plan.add_eager_load(c_path.clone(), l_columns);
    for nested in relation.relations() {
        push_eager_loads(plan, nested, Some(&c_path));
    }
}

fn parse_filter_date(text: &str) -> Result<NaiveDate, ExportError> {
    parse_datetime_value(&Value::String(text.to_string()))
        .map(|dt| dt.date())
        .ok_or_else(|| ExportError::Conversion {
            kind: "date".to_string(),
            value: text.to_string(),
            message: "invalid date range bound".to_string(),
        })
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region RecordSource

/// Batches of fetched records; a failed batch aborts the export.
pub type BoxRecordBatches<'a> = Box<dyn Iterator<Item = Result<Vec<SpecRecord>, BoxError>> + 'a>;

/// Query collaborator: executes a fetch plan.
pub trait RecordSource: Send + Sync {
    /// Start fetching; batches hold at most `plan.batch_size` records.
    fn fetch_batches<'a>(&'a self, plan: &SpecFetchPlan) -> Result<BoxRecordBatches<'a>, BoxError>;
}

/// In-memory record source evaluating plans over a fixed record set.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordSource {
    l_records: Vec<SpecRecord>,
}

impl MemoryRecordSource {
    pub fn new(records: Vec<SpecRecord>) -> Self {
        Self { l_records: records }
    }

    /// Records matching `plan`, ordered, limited and shaped.
    pub fn select(&self, plan: &SpecFetchPlan) -> Vec<SpecRecord> {
        let mut l_matched: Vec<&SpecRecord> = self
            .l_records
            .iter()
            .filter(|record| plan.predicates.iter().all(|p| is_predicate_match(record, p)))
            .collect();

        if let Some(ordering) = &plan.ordering {
            l_matched.sort_by(|a, b| {
                let order = compare_values(
                    &resolve_path(*a, &ordering.column),
                    &resolve_path(*b, &ordering.column),
                );
                match ordering.direction {
                    EnumSortDirection::Asc => order,
                    EnumSortDirection::Desc => order.reverse(),
                }
            });
        }
        if let Some(n_limit) = plan.limit {
            l_matched.truncate(n_limit);
        }

        l_matched
            .into_iter()
            .map(|record| derive_shaped_record(record, plan))
            .collect()
    }
}

impl RecordSource for MemoryRecordSource {
    fn fetch_batches<'a>(&'a self, plan: &SpecFetchPlan) -> Result<BoxRecordBatches<'a>, BoxError> {
        let l_records = self.select(plan);
        let n_size_batch = plan.batch_size.max(1);
        log::debug!(
            "memory source {}: {} records in batches of {}",
            plan.source,
            l_records.len(),
            n_size_batch
        );
        let l_batches: Vec<Vec<SpecRecord>> = l_records
            .chunks(n_size_batch)
            .map(<[SpecRecord]>::to_vec)
            .collect();
        Ok(Box::new(l_batches.into_iter().map(Ok)))
    }
}

/// Apply the plan's select list and counts to one record.
fn derive_shaped_record(record: &SpecRecord, plan: &SpecFetchPlan) -> SpecRecord {
    let mut shaped = record.clone();
    if !plan.select.is_empty() {
        let set_select: BTreeSet<&str> = plan.select.iter().map(String::as_str).collect();
        shaped
            .attributes
            .retain(|name, _| set_select.contains(name.as_str()));
    }
    for c_relation in &plan.count_relations {
        let n_count = match record.related(c_relation) {
            Some(EnumRelated::Many(l_related)) => l_related.len(),
            Some(EnumRelated::One(Some(_))) => 1,
            Some(EnumRelated::One(None)) | None => continue,
        };
        shaped
            .attributes
            .insert(format!("{c_relation}_count"), Value::from(n_count));
    }
    shaped
}

fn is_predicate_match(record: &SpecRecord, predicate: &EnumPredicate) -> bool {
    match predicate {
        EnumPredicate::DateFrom { column, date } => {
            derive_record_date(record, column).is_some_and(|value| value >= *date)
        }
        EnumPredicate::DateTo { column, date } => {
            derive_record_date(record, column).is_some_and(|value| value <= *date)
        }
        EnumPredicate::SearchAny { columns, term } => {
            let c_pattern = format!("%{term}%");
            columns.iter().any(|column| {
                is_like_match(&render_value_text(&resolve_path(record, column)), &c_pattern)
            })
        }
        EnumPredicate::Compare {
            key,
            operator,
            value,
        } => is_compare_match(&resolve_path(record, key), *operator, value),
        EnumPredicate::RelatedIn {
            relation,
            key_column,
            values,
        } => {
            let l_related: Vec<&SpecRecord> = match record.related(relation) {
                Some(EnumRelated::Many(l_related)) => l_related.iter().collect(),
                Some(EnumRelated::One(Some(related))) => vec![related.as_ref()],
                _ => Vec::new(),
            };
            l_related.iter().any(|related| {
                let key = resolve_path(*related, key_column);
                values.iter().any(|value| is_loosely_equal(&key, value))
            })
        }
    }
}

fn derive_record_date(record: &SpecRecord, column: &str) -> Option<NaiveDate> {
    parse_datetime_value(&resolve_path(record, column)).map(|dt| dt.date())
}

fn is_compare_match(actual: &Value, operator: EnumConditionOperator, expected: &Value) -> bool {
    let is_in = |expected: &Value| match expected {
        Value::Array(l_values) => l_values.iter().any(|value| is_loosely_equal(actual, value)),
        other => is_loosely_equal(actual, other),
    };
    match operator {
        EnumConditionOperator::Eq => is_loosely_equal(actual, expected),
        EnumConditionOperator::Ne => !is_loosely_equal(actual, expected),
        EnumConditionOperator::Gt => !actual.is_null() && compare_values(actual, expected) == Ordering::Greater,
        EnumConditionOperator::Ge => !actual.is_null() && compare_values(actual, expected) != Ordering::Less,
        EnumConditionOperator::Lt => !actual.is_null() && compare_values(actual, expected) == Ordering::Less,
        EnumConditionOperator::Le => !actual.is_null() && compare_values(actual, expected) != Ordering::Greater,
        EnumConditionOperator::Like => {
            is_like_match(&render_value_text(actual), &render_value_text(expected))
        }
        EnumConditionOperator::In => is_in(expected),
        EnumConditionOperator::NotIn => !is_in(expected),
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::spec::{EnumAggregateMode, EnumColumnKind, SpecAdvancedCondition, SpecCondition};

    fn build_schema() -> SpecSchemaConfig {
        SpecSchemaConfig::builder("employees")
            .date_column("hired_on")
            .column("name", EnumColumnKind::Text)
            .column("hired_on", EnumColumnKind::Date)
            .column("meta.city", EnumColumnKind::Text)
            .relation(
                SpecRelation::one("team")
                    .with_foreign_key("team_id")
                    .with_column("name", EnumColumnKind::Text)
                    .with_relation(
                        SpecRelation::one("lead")
                            .with_foreign_key("lead_id")
                            .with_column("name", EnumColumnKind::Text),
                    ),
            )
            .relation(SpecRelation::many("tags", EnumAggregateMode::List).with_value_column("label"))
            .relation(SpecRelation::count("shifts"))
            .select("salary")
            .eager_load("documents")
            .build()
    }

    fn build_records() -> Vec<SpecRecord> {
        vec![
            SpecRecord::from_json(json!({"id": 1, "name": "Ana", "hired_on": "2024-03-05 10:00:00", "salary": 10}))
                .with_many("tags", vec![SpecRecord::from_json(json!({"id": 3, "label": "x"}))])
                .with_many("shifts", vec![SpecRecord::default(), SpecRecord::default()]),
            SpecRecord::from_json(json!({"id": 2, "name": "Bruno", "hired_on": "2023-12-31", "salary": 30}))
                .with_many("tags", vec![]),
            SpecRecord::from_json(json!({"id": 3, "name": "Carla", "hired_on": "2024-06-01", "salary": 20})),
        ]
    }

    #[test]
    fn plan_selects_scalar_columns_foreign_keys_and_custom_select() {
        let plan = derive_fetch_plan(
            &build_schema(),
            &SpecRuntimeFilter::default(),
            &SpecExportSettings::default(),
        )
        .unwrap();

        assert_eq!(plan.select, vec!["id", "name", "hired_on", "team_id", "salary"]);
        assert_eq!(plan.count_relations, vec!["shifts"]);
        assert_eq!(plan.batch_size, 100);
        assert_eq!(
            plan.eager_loads,
            vec![
                SpecEagerLoad {
                    path: "team".to_string(),
                    columns: vec!["name".to_string(), "lead_id".to_string()],
                },
                SpecEagerLoad {
                    path: "team.lead".to_string(),
                    columns: vec!["name".to_string()],
                },
                SpecEagerLoad {
                    path: "tags".to_string(),
                    columns: vec!["label".to_string()],
                },
                SpecEagerLoad {
                    path: "documents".to_string(),
                    columns: vec![],
                },
            ]
        );
    }

    #[test]
    fn plan_routes_advanced_conditions_by_relation() {
        let filter = SpecRuntimeFilter {
            advanced_conditions: vec![
                SpecAdvancedCondition {
                    key: "tags".to_string(),
                    value: json!([3]),
                },
                SpecAdvancedCondition {
                    key: "status".to_string(),
                    value: json!("active"),
                },
            ],
            ..Default::default()
        };
        let plan =
            derive_fetch_plan(&build_schema(), &filter, &SpecExportSettings::default()).unwrap();

        assert_eq!(
            plan.predicates,
            vec![
                EnumPredicate::RelatedIn {
                    relation: "tags".to_string(),
                    key_column: "id".to_string(),
                    values: vec![json!(3)],
                },
                EnumPredicate::Compare {
                    key: "status".to_string(),
                    operator: EnumConditionOperator::In,
                    value: json!(["active"]),
                },
            ]
        );
    }

    #[test]
    fn plan_rejects_malformed_date_bounds() {
        let filter = SpecRuntimeFilter {
            date_range_start: Some("yesterday".to_string()),
            ..Default::default()
        };
        let err = derive_fetch_plan(&build_schema(), &filter, &SpecExportSettings::default())
            .unwrap_err();
        assert!(matches!(err, ExportError::Conversion { .. }));
    }

    #[test]
    fn directives_modify_the_plan() {
        let schema = SpecSchemaConfig::builder("employees")
            .column("name", EnumColumnKind::Text)
            .directive(
                "latest_first",
                Arc::new(|plan: &mut SpecFetchPlan| {
                    plan.ordering = Some(SpecOrdering {
                        column: "hired_on".to_string(),
                        direction: EnumSortDirection::Desc,
                    });
                }),
            )
            .build();
        let plan = derive_fetch_plan(&schema, &SpecRuntimeFilter::default(), &SpecExportSettings::default())
            .unwrap();
        assert_eq!(plan.ordering.map(|o| o.column), Some("hired_on".to_string()));
    }

    #[test]
    fn memory_source_filters_orders_and_counts() {
        let source = MemoryRecordSource::new(build_records());
        let filter = SpecRuntimeFilter {
            date_range_start: Some("2024-01-01".to_string()),
            order_by: Some("salary".to_string()),
            order_direction: Some(EnumSortDirection::Desc),
            ..Default::default()
        };
        let plan =
            derive_fetch_plan(&build_schema(), &filter, &SpecExportSettings::default()).unwrap();
        let l_records = source.select(&plan);

        let l_names: Vec<_> = l_records.iter().map(|r| r.attribute("name").cloned()).collect();
        assert_eq!(l_names, vec![Some(json!("Carla")), Some(json!("Ana"))]);
        assert_eq!(l_records[1].attribute("shifts_count"), Some(&json!(2)));
        assert_eq!(l_records[1].attribute("salary"), Some(&json!(10)));
    }

    #[test]
    fn memory_source_evaluates_conditions_and_search() {
        let source = MemoryRecordSource::new(build_records());
        let mut plan = SpecFetchPlan::new("employees", 100);
        plan.add_predicate(EnumPredicate::SearchAny {
            columns: vec!["name".to_string()],
            term: "AR".to_string(),
        });
        plan.add_predicate(EnumPredicate::Compare {
            key: "salary".to_string(),
            operator: EnumConditionOperator::Ge,
            value: json!("20"),
        });
        let l_records = source.select(&plan);
        assert_eq!(l_records.len(), 1);
        assert_eq!(l_records[0].attribute("name"), Some(&json!("Carla")));

        let filter = SpecRuntimeFilter {
            explicit_conditions: vec![SpecCondition {
                key: "id".to_string(),
                operator: EnumConditionOperator::NotIn,
                value: json!([1, 2]),
            }],
            advanced_conditions: vec![SpecAdvancedCondition {
                key: "tags".to_string(),
                value: json!(3),
            }],
            ..Default::default()
        };
        let plan =
            derive_fetch_plan(&build_schema(), &filter, &SpecExportSettings::default()).unwrap();
        assert!(source.select(&plan).is_empty());
    }

    #[test]
    fn memory_source_respects_batch_size_and_limit() {
        let source = MemoryRecordSource::new(build_records());
        let mut plan = SpecFetchPlan::new("employees", 2);
        let l_sizes: Vec<usize> = source
            .fetch_batches(&plan)
            .unwrap()
            .map(|batch| batch.unwrap().len())
            .collect();
        assert_eq!(l_sizes, vec![2, 1]);

        plan.limit = Some(1);
        let n_total: usize = source
            .fetch_batches(&plan)
            .unwrap()
            .map(|batch| batch.unwrap().len())
            .sum();
        assert_eq!(n_total, 1);
    }
}
