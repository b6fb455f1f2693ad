//! Export orchestration: validate, fetch, flatten, project, filter.

use std::fmt;

use crate::convert::SpecExportContext;
use crate::flatten::flatten_relations;
use crate::project::{SpecProjection, apply_filter, materialize_rows, project_schema};
use crate::record::{SpecRecord, derive_record_keys};
use crate::source::{RecordSource, derive_fetch_plan};
use crate::spec::{
    EnumAggregateMode, EnumCardinality, EnumColumnKind, ExportError, SpecExportTable,
    SpecRelation, SpecRuntimeFilter, SpecSchemaConfig,
};
use crate::util::validate_unique_keys;

/// Lifecycle of one export run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumExportStage {
    Configured,
    Fetching,
    Flattening,
    Projecting,
    Filtering,
    Done,
    Failed,
}

impl fmt::Display for EnumExportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c_name = match self {
            Self::Configured => "configured",
            Self::Fetching => "fetching",
            Self::Flattening => "flattening",
            Self::Projecting => "projecting",
            Self::Filtering => "filtering",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(c_name)
    }
}

/// Single-use export job over one schema and filter.
///
/// The column plan (schema projection narrowed by the filter) is fixed while
/// `Configured`, so flattening converts only the relation columns it keeps.
/// Filtering then applies the kept selectors to every record.
///
/// Headings are only produced together with all rows; a failure at any
/// stage leaves the engine in [`EnumExportStage::Failed`] with no output.
pub struct ExportEngine<'a> {
    schema: &'a SpecSchemaConfig,
    filter: &'a SpecRuntimeFilter,
    context: &'a SpecExportContext,
    source: &'a dyn RecordSource,
    stage: EnumExportStage,
    stage_failed: Option<EnumExportStage>,
}

impl<'a> ExportEngine<'a> {
    pub fn new(
        schema: &'a SpecSchemaConfig,
        filter: &'a SpecRuntimeFilter,
        context: &'a SpecExportContext,
        source: &'a dyn RecordSource,
    ) -> Self {
        Self {
            schema,
            filter,
            context,
            source,
            stage: EnumExportStage::Configured,
            stage_failed: None,
        }
    }

    /// Current lifecycle stage.
    pub fn stage(&self) -> EnumExportStage {
        self.stage
    }

    /// Stage that was running when the export failed.
    pub fn failed_at(&self) -> Option<EnumExportStage> {
        self.stage_failed
    }

    /// Run the export to completion.
    ///
    /// # Errors
    /// `Configuration` for invalid schemas or a second run, `Source` when
    /// the record source fails, `Conversion` for unparsable dates.
    pub fn run(&mut self) -> Result<SpecExportTable, ExportError> {
        if self.stage != EnumExportStage::Configured {
            return Err(ExportError::Configuration(format!(
                "export of {} already ran (stage: {})",
                self.schema.source, self.stage
            )));
        }
        match self.run_stages() {
            Ok(table) => {
                self.stage = EnumExportStage::Done;
                log::info!(
                    "exported {} rows x {} columns from {}",
                    table.height(),
                    table.width(),
                    self.schema.source
                );
                Ok(table)
            }
            Err(err) => {
                log::warn!(
                    "export of {} failed while {}: {err}",
                    self.schema.source,
                    self.stage
                );
                self.stage_failed = Some(self.stage);
                self.stage = EnumExportStage::Failed;
                Err(err)
            }
        }
    }

    fn run_stages(&mut self) -> Result<SpecExportTable, ExportError> {
        // Column plan: columns the filter drops are never converted.
        let projection = apply_filter(&validate_schema(self.schema, self.context)?, self.filter);

        self.stage = EnumExportStage::Fetching;
        let l_records = self.fetch_records()?;

        self.stage = EnumExportStage::Flattening;
        let l_record_keys = derive_record_keys(&l_records, &self.schema.key_column);
        let derived = flatten_relations(&l_records, &l_record_keys, &projection, self.context)?;

        self.stage = EnumExportStage::Projecting;
        let l_keys = projection.keys();
        let l_headings = projection.heading_labels(self.context.labels.as_ref());

        self.stage = EnumExportStage::Filtering;
        let l_rows = materialize_rows(
            &l_records,
            &l_record_keys,
            &projection,
            &derived,
            self.context,
        )?;

        Ok(SpecExportTable {
            keys: l_keys,
            headings: l_headings,
            rows: l_rows,
        })
    }

    fn fetch_records(&self) -> Result<Vec<SpecRecord>, ExportError> {
        let plan = derive_fetch_plan(self.schema, self.filter, &self.context.settings)?;
        let batches = self
            .source
            .fetch_batches(&plan)
            .map_err(ExportError::Source)?;

        let mut l_records = Vec::new();
        let mut n_batches = 0usize;
        for batch in batches {
            l_records.extend(batch.map_err(ExportError::Source)?);
            n_batches += 1;
        }
        log::debug!(
            "fetched {} records from {} in {n_batches} batches",
            l_records.len(),
            self.schema.source
        );
        Ok(l_records)
    }
}

/// Run one export job end to end.
pub fn run_export(
    schema: &SpecSchemaConfig,
    filter: &SpecRuntimeFilter,
    context: &SpecExportContext,
    source: &dyn RecordSource,
) -> Result<SpecExportTable, ExportError> {
    ExportEngine::new(schema, filter, context, source).run()
}

/// Validate `schema` and return its full projection.
pub fn validate_schema(
    schema: &SpecSchemaConfig,
    context: &SpecExportContext,
) -> Result<SpecProjection, ExportError> {
    if schema.source.trim().is_empty() {
        return Err(ExportError::Configuration(
            "schema.source must not be empty.".to_string(),
        ));
    }
    if schema.columns.is_empty() {
        return Err(ExportError::Configuration(format!(
            "schema {} declares no columns.",
            schema.source
        )));
    }
    for relation in schema.relations_one.iter().chain(&schema.relations_many) {
        validate_relation(relation, context)?;
    }
    for column in &schema.columns {
        warn_unbound_resolver(&column.kind, &column.name, context);
    }

    let projection = project_schema(schema);
    validate_unique_keys(&projection.keys())?;
    Ok(projection)
}

fn validate_relation(relation: &SpecRelation, context: &SpecExportContext) -> Result<(), ExportError> {
    match relation.cardinality {
        EnumCardinality::One => {
            if relation.fields.is_empty() {
                return Err(ExportError::Configuration(format!(
                    "relation {} declares no fields.",
                    relation.name
                )));
            }
        }
        EnumCardinality::Many(EnumAggregateMode::List | EnumAggregateMode::Concat) => {
            if relation.value_column.is_none() {
                return Err(ExportError::Configuration(format!(
                    "relation {} aggregates without a value column.",
                    relation.name
                )));
            }
        }
        EnumCardinality::Many(EnumAggregateMode::Count) => {}
    }
    for column in relation.columns() {
        warn_unbound_resolver(&column.kind, &column.name, context);
    }
    for nested in relation.relations() {
        validate_relation(nested, context)?;
    }
    Ok(())
}

fn warn_unbound_resolver(kind: &EnumColumnKind, column: &str, context: &SpecExportContext) {
    if let EnumColumnKind::Resolver(name) = kind
        && context.resolvers.get(name).is_none()
    {
        log::warn!("column {column}: no resolver registered for {name}, values pass through");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{Value, json};

    use super::*;
    use crate::convert::SpecLabelCatalog;
    use crate::source::{BoxRecordBatches, MemoryRecordSource, SpecFetchPlan};
    use crate::spec::{BoxError, EnumCellValue};

    fn text(s: &str) -> EnumCellValue {
        EnumCellValue::String(s.to_string())
    }

    fn build_context() -> SpecExportContext {
        let labels = SpecLabelCatalog::from_pairs([
            ("name", "Name"),
            ("hired_on", "Hired On"),
            ("yes", "Yes"),
            ("no", "No"),
        ]);
        SpecExportContext::default().with_labels(Arc::new(labels))
    }

    fn build_schema() -> SpecSchemaConfig {
        SpecSchemaConfig::builder("employees")
            .column("name", EnumColumnKind::Text)
            .column("hired_on", EnumColumnKind::Date)
            .build()
    }

    #[test]
    fn exports_headings_and_converted_rows() {
        let source = MemoryRecordSource::new(vec![SpecRecord::from_json(
            json!({"id": 1, "name": "Ana", "hired_on": "2024-03-05T10:00:00"}),
        )]);
        let schema = build_schema();
        let filter = SpecRuntimeFilter::default();
        let context = build_context();
        let mut engine = ExportEngine::new(&schema, &filter, &context, &source);

        let table = engine.run().unwrap();
        assert_eq!(table.headings, vec!["Name", "Hired On"]);
        assert_eq!(table.rows, vec![vec![text("Ana"), text("2024-03-05")]]);
        assert_eq!(engine.stage(), EnumExportStage::Done);
    }

    #[test]
    fn column_allow_list_restricts_output() {
        let source = MemoryRecordSource::new(vec![SpecRecord::from_json(
            json!({"id": 1, "name": "Ana", "hired_on": "2024-03-05"}),
        )]);
        let filter = SpecRuntimeFilter {
            column_allow_list: Some(vec!["name".to_string()]),
            ..Default::default()
        };
        let table = run_export(&build_schema(), &filter, &build_context(), &source).unwrap();
        assert_eq!(table.headings, vec!["Name"]);
        assert_eq!(table.rows, vec![vec![text("Ana")]]);
    }

    #[test]
    fn rows_align_with_headings_across_relations() {
        let schema = SpecSchemaConfig::builder("employees")
            .column("name", EnumColumnKind::Text)
            .column("active", EnumColumnKind::Bool)
            .relation(
                SpecRelation::one("team")
                    .with_foreign_key("team_id")
                    .with_column("name", EnumColumnKind::Text),
            )
            .relation(SpecRelation::many("tags", EnumAggregateMode::Concat).with_value_column("label"))
            .relation(SpecRelation::count("shifts"))
            .build();
        let source = MemoryRecordSource::new(vec![
            SpecRecord::from_json(json!({"id": 1, "name": "Ana", "active": 1, "team_id": 4}))
                .with_one("team", Some(SpecRecord::from_json(json!({"name": "Core"}))))
                .with_many(
                    "tags",
                    vec![
                        SpecRecord::from_json(json!({"label": "x"})),
                        SpecRecord::from_json(json!({"label": "y"})),
                    ],
                )
                .with_many("shifts", vec![SpecRecord::default()]),
            SpecRecord::from_json(json!({"id": 2, "name": "Rui", "active": 0}))
                .with_one("team", None),
        ]);

        let table = run_export(&schema, &SpecRuntimeFilter::default(), &build_context(), &source)
            .unwrap();
        assert_eq!(
            table.keys,
            vec!["name", "active", "team_name", "tags_label", "shifts_count"]
        );
        assert!(table.rows.iter().all(|row| row.len() == table.headings.len()));
        assert_eq!(
            table.rows[0],
            vec![
                text("Ana"),
                text("Yes"),
                text("Core"),
                text("x, y"),
                EnumCellValue::Number(1.0),
            ]
        );
        assert_eq!(
            table.rows[1],
            vec![
                text("Rui"),
                text("No"),
                EnumCellValue::None,
                text(""),
                EnumCellValue::Number(0.0),
            ]
        );
    }

    #[test]
    fn duplicate_record_ids_keep_separate_rows() {
        let schema = SpecSchemaConfig::builder("employees")
            .column("name", EnumColumnKind::Text)
            .relation(SpecRelation::count("shifts"))
            .build();
        let source = MemoryRecordSource::new(vec![
            SpecRecord::from_json(json!({"id": 1, "name": "Ana"})).with_many("shifts", vec![]),
            SpecRecord::from_json(json!({"id": 1, "name": "Ana B"}))
                .with_many("shifts", vec![SpecRecord::default(), SpecRecord::default()]),
        ]);
        let table = run_export(&schema, &SpecRuntimeFilter::default(), &build_context(), &source)
            .unwrap();
        assert_eq!(table.rows[0][1], EnumCellValue::Number(0.0));
        assert_eq!(table.rows[1][1], EnumCellValue::Number(2.0));
    }

    #[test]
    fn invalid_schemas_fail_before_fetching() {
        let source = MemoryRecordSource::default();
        let context = build_context();
        let filter = SpecRuntimeFilter::default();

        let schema = SpecSchemaConfig::builder("employees").build();
        let mut engine = ExportEngine::new(&schema, &filter, &context, &source);
        assert!(matches!(engine.run(), Err(ExportError::Configuration(_))));
        assert_eq!(engine.stage(), EnumExportStage::Failed);

        let schema = SpecSchemaConfig::builder("employees")
            .column("name", EnumColumnKind::Text)
            .relation(SpecRelation::many("tags", EnumAggregateMode::List))
            .build();
        assert!(matches!(
            run_export(&schema, &filter, &context, &source),
            Err(ExportError::Configuration(_))
        ));

        let schema = SpecSchemaConfig::builder("employees")
            .column("team_name", EnumColumnKind::Text)
            .relation(SpecRelation::one("team").with_column("name", EnumColumnKind::Text))
            .build();
        let err = run_export(&schema, &filter, &context, &source).unwrap_err();
        assert!(err.to_string().contains("team_name"));
    }

    #[test]
    fn engine_runs_once() {
        let source = MemoryRecordSource::default();
        let schema = build_schema();
        let filter = SpecRuntimeFilter::default();
        let context = build_context();
        let mut engine = ExportEngine::new(&schema, &filter, &context, &source);

        assert!(engine.run().unwrap().rows.is_empty());
        assert!(matches!(engine.run(), Err(ExportError::Configuration(_))));
        assert_eq!(engine.stage(), EnumExportStage::Done);
    }

    struct FailingSource;

    impl RecordSource for FailingSource {
        fn fetch_batches<'a>(&'a self, _plan: &SpecFetchPlan) -> Result<BoxRecordBatches<'a>, BoxError> {
            let l_batches: Vec<Result<Vec<SpecRecord>, BoxError>> = vec![
                Ok(vec![SpecRecord::from_json(json!({"id": 1, "name": "Ana"}))]),
                Err("connection reset".into()),
            ];
            Ok(Box::new(l_batches.into_iter()))
        }
    }

    #[test]
    fn source_failures_abort_with_cause() {
        let schema = build_schema();
        let filter = SpecRuntimeFilter::default();
        let context = build_context();
        let mut engine = ExportEngine::new(&schema, &filter, &context, &FailingSource);

        let err = engine.run().unwrap_err();
        assert!(matches!(err, ExportError::Source(_)));
        assert_eq!(
            std::error::Error::source(&err).map(|cause| cause.to_string()),
            Some("connection reset".to_string())
        );
        assert_eq!(engine.stage(), EnumExportStage::Failed);
    }

    #[test]
    fn directive_columns_read_their_attribute() {
        let schema = SpecSchemaConfig::builder("employees")
            .column("name", EnumColumnKind::Text)
            .directive(
                "seniority",
                Arc::new(|plan: &mut SpecFetchPlan| plan.add_select("seniority")),
            )
            .build();
        let source = MemoryRecordSource::new(vec![
            SpecRecord::from_json(json!({"id": 1, "name": "Ana", "seniority": "senior"})),
            SpecRecord::from_json(json!({"id": 2, "name": "Rui"})),
        ]);
        let table = run_export(&schema, &SpecRuntimeFilter::default(), &build_context(), &source)
            .unwrap();
        assert_eq!(table.rows[0][1], text("senior"));
        assert_eq!(table.rows[1][1], text(""));
    }

    #[test]
    fn filter_date_range_uses_date_column() {
        let schema = SpecSchemaConfig::builder("employees")
            .date_column("hired_on")
            .column("name", EnumColumnKind::Text)
            .build();
        let source = MemoryRecordSource::new(vec![
            SpecRecord::from_json(json!({"id": 1, "name": "Ana", "hired_on": "2024-03-05 23:59:00"})),
            SpecRecord::from_json(json!({"id": 2, "name": "Rui", "hired_on": "2024-03-06"})),
        ]);
        let filter: SpecRuntimeFilter =
            serde_json::from_value(json!({"start": "2024-03-01", "end": "2024-03-05"})).unwrap();
        let table = run_export(&schema, &filter, &build_context(), &source).unwrap();
        let l_names: Vec<Value> = table
            .rows
            .iter()
            .map(|row| json!(row[0].to_string()))
            .collect();
        assert_eq!(l_names, vec![json!("Ana")]);
    }

    fn build_garbage_schema() -> SpecSchemaConfig {
        SpecSchemaConfig::builder("employees")
            .column("name", EnumColumnKind::Text)
            .column("fired_on", EnumColumnKind::Date)
            .relation(
                SpecRelation::one("team")
                    .with_foreign_key("team_id")
                    .with_column("founded", EnumColumnKind::Date),
            )
            .build()
    }

    fn build_garbage_source() -> MemoryRecordSource {
        MemoryRecordSource::new(vec![
            SpecRecord::from_json(json!({"id": 1, "name": "Ana", "fired_on": "garbage", "team_id": 4}))
                .with_one("team", Some(SpecRecord::from_json(json!({"founded": "garbage"})))),
        ])
    }

    #[test]
    fn columns_dropped_by_filter_are_never_converted() {
        let filter: SpecRuntimeFilter = serde_json::from_value(json!({"columns": ["name"]})).unwrap();
        let table = run_export(
            &build_garbage_schema(),
            &filter,
            &build_context(),
            &build_garbage_source(),
        )
        .unwrap();
        assert_eq!(table.keys, vec!["name"]);
        assert_eq!(table.rows, vec![vec![text("Ana")]]);
    }

    #[test]
    fn failures_name_the_stage_that_raised_them() {
        let schema = build_garbage_schema();
        let source = build_garbage_source();
        let context = build_context();

        let filter: SpecRuntimeFilter =
            serde_json::from_value(json!({"columns": ["name", "team_founded"]})).unwrap();
        let mut engine = ExportEngine::new(&schema, &filter, &context, &source);
        assert!(matches!(engine.run(), Err(ExportError::Conversion { .. })));
        assert_eq!(engine.failed_at(), Some(EnumExportStage::Flattening));

        let filter: SpecRuntimeFilter =
            serde_json::from_value(json!({"columns": ["name", "fired_on"]})).unwrap();
        let mut engine = ExportEngine::new(&schema, &filter, &context, &source);
        assert!(matches!(engine.run(), Err(ExportError::Conversion { .. })));
        assert_eq!(engine.failed_at(), Some(EnumExportStage::Filtering));

        let empty = SpecSchemaConfig::builder("employees").build();
        let mut engine = ExportEngine::new(&empty, &filter, &context, &source);
        assert!(engine.run().is_err());
        assert_eq!(engine.failed_at(), Some(EnumExportStage::Configured));
    }
}
