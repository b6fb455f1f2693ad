//! Schema projection, post-hoc column filtering and row materialization.
//!
//! One walk over the schema yields the ordered [`SpecProjection`]; headings
//! and value selectors are two views of that same vector.

use std::collections::BTreeMap;

use crate::convert::{
    LabelResolver, SpecExportContext, convert_value, derive_cell_from_value, resolve_label,
};
use crate::record::{SpecRecord, resolve_path};
use crate::spec::{
    EnumAggregateMode, EnumCardinality, EnumCellValue, EnumColumnKind, ExportError,
    SpecRelation, SpecRuntimeFilter, SpecSchemaConfig,
};
use crate::util::join_key;

////////////////////////////////////////////////////////////////////////////////
// #region ProjectionModel

/// Schema section a projected column comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnumColumnGroup {
    /// Base-record column.
    Column,
    /// Declared under a one-relation.
    One,
    /// Declared under a list/concat many-relation.
    Many,
    /// Count relation.
    Count,
    /// Additional directive output.
    Directive,
}

/// One relation step of a selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecHop {
    pub relation: String,
    pub cardinality: EnumCardinality,
}

/// Where a projected value comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnumSelector {
    /// Path on the base record.
    Column { path: String, kind: EnumColumnKind },
    /// Path on the record(s) reached through `hops`.
    ///
    /// `mode` is the aggregation of the first many hop, `None` when every hop
    /// is a one-relation.
    Related {
        hops: Vec<SpecHop>,
        path: String,
        kind: EnumColumnKind,
        mode: Option<EnumAggregateMode>,
    },
    /// Number of records reached through `hops`.
    Count { hops: Vec<SpecHop> },
    /// Attribute written by the named directive.
    Directive { name: String },
}

/// One output column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecProjectedColumn {
    /// Unique output key, also the label lookup key.
    pub key: String,
    /// Top-level column, relation or directive name.
    pub root: String,
    pub group: EnumColumnGroup,
    pub selector: EnumSelector,
}

/// Ordered output columns.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecProjection {
    pub columns: Vec<SpecProjectedColumn>,
}

impl SpecProjection {
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Output keys in order.
    pub fn keys(&self) -> Vec<String> {
        self.columns.iter().map(|column| column.key.clone()).collect()
    }

    /// Headings in order, each key passed through label resolution.
    pub fn heading_labels(&self, labels: &dyn LabelResolver) -> Vec<String> {
        self.columns
            .iter()
            .map(|column| resolve_label(labels, &column.key))
            .collect()
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region SchemaWalk

/// Project `schema` into its ordered output columns.
///
/// Order: columns, one-relations, list/concat relations, count relations,
/// directives. Relations keep declaration order and nested keys are prefixed
/// with every outer relation name.
pub fn project_schema(schema: &SpecSchemaConfig) -> SpecProjection {
    let mut l_columns = Vec::new();

    for column in &schema.columns {
        l_columns.push(SpecProjectedColumn {
            key: column.name.clone(),
            root: column.name.clone(),
            group: EnumColumnGroup::Column,
            selector: EnumSelector::Column {
                path: column.name.clone(),
                kind: column.kind.clone(),
            },
        });
    }
    for relation in &schema.relations_one {
        let group = EnumColumnGroup::One;
        push_relation_columns(&mut l_columns, relation, &[], &[], group, &relation.name);
    }
    for relation in schema.relations_aggregated() {
        let group = EnumColumnGroup::Many;
        push_relation_columns(&mut l_columns, relation, &[], &[], group, &relation.name);
    }
    for relation in schema.relations_counted() {
        let group = EnumColumnGroup::Count;
        push_relation_columns(&mut l_columns, relation, &[], &[], group, &relation.name);
    }
    for item in &schema.directives {
        l_columns.push(SpecProjectedColumn {
            key: item.name.clone(),
            root: item.name.clone(),
            group: EnumColumnGroup::Directive,
            selector: EnumSelector::Directive {
                name: item.name.clone(),
            },
        });
    }

    SpecProjection { columns: l_columns }
}

fn push_relation_columns(
    l_columns: &mut Vec<SpecProjectedColumn>,
    relation: &SpecRelation,
    l_prefix_outer: &[String],
    l_hops_outer: &[SpecHop],
    group: EnumColumnGroup,
    root: &str,
) {
    let mut l_prefix = l_prefix_outer.to_vec();
    l_prefix.push(relation.name.clone());
    let mut l_hops = l_hops_outer.to_vec();
    l_hops.push(SpecHop {
        relation: relation.name.clone(),
        cardinality: relation.cardinality,
    });
    let mode = l_hops.iter().find_map(|hop| match hop.cardinality {
        EnumCardinality::Many(mode) => Some(mode),
        EnumCardinality::One => None,
    });

    match relation.cardinality {
        EnumCardinality::One => {
            for column in relation.columns() {
                l_columns.push(derive_related_column(
                    &l_prefix, &l_hops, mode, group, root, &column.name, &column.kind,
                ));
            }
        }
        EnumCardinality::Many(EnumAggregateMode::Count) => {
            l_columns.push(SpecProjectedColumn {
                key: join_key(&l_prefix, "count"),
                root: root.to_string(),
                group,
                selector: EnumSelector::Count { hops: l_hops },
            });
            return;
        }
        EnumCardinality::Many(_) => {
            if let Some(c_value_column) = &relation.value_column {
                let kind = relation
                    .column_kind(c_value_column)
                    .cloned()
                    .unwrap_or(EnumColumnKind::Text);
                l_columns.push(derive_related_column(
                    &l_prefix, &l_hops, mode, group, root, c_value_column, &kind,
                ));
            }
        }
    }

    for nested in relation.relations() {
        push_relation_columns(l_columns, nested, &l_prefix, &l_hops, group, root);
    }
}

fn derive_related_column(
    l_prefix: &[String],
    l_hops: &[SpecHop],
    mode: Option<EnumAggregateMode>,
    group: EnumColumnGroup,
    root: &str,
    c_leaf: &str,
    kind: &EnumColumnKind,
) -> SpecProjectedColumn {
    SpecProjectedColumn {
        key: join_key(l_prefix, c_leaf),
        root: root.to_string(),
        group,
        selector: EnumSelector::Related {
            hops: l_hops.to_vec(),
            path: c_leaf.to_string(),
            kind: kind.clone(),
            mode,
        },
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ColumnFilter

/// Derive the projection restricted by the filter's allow-lists or type tag.
///
/// Allow-list mode (either list non-empty): base columns survive when their key
/// is in the column list; other entries survive when their key is in the
/// column list or their root name is in the related list. Type-tag mode keeps
/// keys containing the tag plus every dotted key. Otherwise the projection is
/// returned unchanged.
pub fn apply_filter(projection: &SpecProjection, filter: &SpecRuntimeFilter) -> SpecProjection {
    if filter.has_allow_list() {
        let l_allow_columns = filter.column_allow_list.as_deref().unwrap_or_default();
        let l_allow_related = filter.related_allow_list.as_deref().unwrap_or_default();
        let is_allowed = |column: &SpecProjectedColumn| {
            let if_key = l_allow_columns.contains(&column.key);
            match column.group {
                EnumColumnGroup::Column => if_key,
                _ => if_key || l_allow_related.contains(&column.root),
            }
        };
        return SpecProjection {
            columns: projection
                .columns
                .iter()
                .filter(|column| is_allowed(column))
                .cloned()
                .collect(),
        };
    }

    if let Some(c_tag) = filter.type_tag() {
        return SpecProjection {
            columns: projection
                .columns
                .iter()
                .filter(|column| column.key.contains(c_tag) || column.key.contains('.'))
                .cloned()
                .collect(),
        };
    }

    projection.clone()
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region RowMaterialization

/// Build one positional row per record, aligned with `projection`.
///
/// Base columns are converted here; relation values come from `derived`
/// (keyed by record key, then column key). Absent derived entries are
/// [`EnumCellValue::None`].
pub fn materialize_rows(
    records: &[SpecRecord],
    record_keys: &[String],
    projection: &SpecProjection,
    derived: &BTreeMap<String, BTreeMap<String, EnumCellValue>>,
    ctx: &SpecExportContext,
) -> Result<Vec<Vec<EnumCellValue>>, ExportError> {
    let mut l_rows = Vec::with_capacity(records.len());
    for (record, c_record_key) in records.iter().zip(record_keys) {
        let dict_derived = derived.get(c_record_key);
        let mut l_row = Vec::with_capacity(projection.len());
        for column in &projection.columns {
            let cell = match &column.selector {
                EnumSelector::Column { path, kind } => {
                    convert_value(&resolve_path(record, path), kind, ctx)?
                }
                EnumSelector::Directive { name } => record
                    .attribute(name)
                    .map(derive_cell_from_value)
                    .unwrap_or_else(|| EnumCellValue::String(String::new())),
                EnumSelector::Related { .. } | EnumSelector::Count { .. } => dict_derived
                    .and_then(|dict| dict.get(&column.key))
                    .cloned()
                    .unwrap_or(EnumCellValue::None),
            };
            l_row.push(cell);
        }
        l_rows.push(l_row);
    }
    Ok(l_rows)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
