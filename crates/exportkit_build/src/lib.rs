//! `exportkit_build` v1:
//! Schema-driven export table builder.
//!
//! Modules:
//! - `conf`    : constants, settings and default presets
//! - `spec`    : schema/filter/cell models and errors
//! - `record`  : fetched records and dotted-path resolution
//! - `convert` : value conversion and label/resolver collaborators
//! - `source`  : fetch plan, query directives and record sources
//! - `flatten` : relation flattening and aggregation
//! - `project` : schema projection, column filtering, row materialization
//! - `engine`  : export orchestration
//! - `load`    : TOML schema documents
//! - `util`    : shared helper functions
pub mod conf;
pub mod convert;
pub mod engine;
pub mod flatten;
pub mod load;
pub mod project;
pub mod record;
pub mod source;
pub mod spec;
pub mod util;

pub use conf::{SpecExportSettings, derive_default_export_settings};
pub use convert::{
    LabelResolver, NoLabels, SpecExportContext, SpecLabelCatalog, SpecResolverRegistry,
    ValueResolver, convert_value, resolve_label,
};
pub use engine::{EnumExportStage, ExportEngine, run_export, validate_schema};
pub use flatten::{DictDerived, flatten_relations};
pub use load::{load_schema, parse_schema_toml};
pub use project::{
    EnumColumnGroup, EnumSelector, SpecProjectedColumn, SpecProjection, apply_filter,
    project_schema,
};
pub use record::{EnumRelated, PathAccess, SpecRecord, resolve_path};
pub use source::{
    BoxRecordBatches, EnumPredicate, MemoryRecordSource, QueryDirective, RecordSource,
    SpecDirectiveRegistry, SpecFetchPlan, derive_fetch_plan,
};
pub use spec::{
    BoxError, EnumAggregateMode, EnumCardinality, EnumCellValue, EnumColumnKind,
    EnumConditionOperator, EnumSortDirection, ExportError, SpecColumn, SpecExportTable,
    SpecRelation, SpecRuntimeFilter, SpecSchemaConfig,
};
