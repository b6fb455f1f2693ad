//! Relation flattening: related records to keyed derived cells.

use std::collections::BTreeMap;

use crate::conf::C_SEP_CONCAT;
use crate::convert::{SpecExportContext, convert_value};
use crate::project::{EnumSelector, SpecHop, SpecProjection};
use crate::record::{EnumRelated, SpecRecord, resolve_path};
use crate::spec::{EnumAggregateMode, EnumCardinality, EnumCellValue, ExportError};
use crate::util::cast_int;

/// Derived cells by record key, then by projected column key.
pub type DictDerived = BTreeMap<String, BTreeMap<String, EnumCellValue>>;

/// Flatten the relation columns of `projection` for every record.
///
/// * one-relation values: missing related record, no entry;
/// * list: ordered sequence of non-blank converted values, `[]` when empty;
/// * concat: the same sequence joined by `", "`, `""` when empty;
/// * count: number of related records, `0` when empty.
pub fn flatten_relations(
    records: &[SpecRecord],
    record_keys: &[String],
    projection: &SpecProjection,
    ctx: &SpecExportContext,
) -> Result<DictDerived, ExportError> {
    let mut dict_derived = DictDerived::new();
    for (record, c_record_key) in records.iter().zip(record_keys) {
        let mut dict_row = BTreeMap::new();
        for column in &projection.columns {
            let cell = match &column.selector {
                EnumSelector::Related {
                    hops,
                    path,
                    kind,
                    mode,
                } => {
                    let l_targets = collect_targets(record, hops);
                    match mode {
                        None => match l_targets.first() {
                            Some(target) => Some(convert_value(&resolve_path(*target, path), kind, ctx)?),
                            None => None,
                        },
                        Some(mode) => {
                            let mut l_cells = Vec::with_capacity(l_targets.len());
                            for target in &l_targets {
                                let cell = convert_value(&resolve_path(*target, path), kind, ctx)?;
                                if !cell.is_blank() {
                                    l_cells.push(cell);
                                }
                            }
                            Some(aggregate_cells(l_cells, *mode))
                        }
                    }
                }
                EnumSelector::Count { hops } => Some(EnumCellValue::Number(count_targets(record, hops) as f64)),
                EnumSelector::Column { .. } | EnumSelector::Directive { .. } => None,
            };
            if let Some(cell) = cell {
                dict_row.insert(column.key.clone(), cell);
            }
        }
        dict_derived.insert(c_record_key.clone(), dict_row);
    }
    Ok(dict_derived)
}

fn aggregate_cells(l_cells: Vec<EnumCellValue>, mode: EnumAggregateMode) -> EnumCellValue {
    match mode {
        EnumAggregateMode::List => EnumCellValue::List(l_cells),
        EnumAggregateMode::Concat => EnumCellValue::String(
            l_cells
                .iter()
                .map(|cell| cell.to_text_with(C_SEP_CONCAT))
                .collect::<Vec<_>>()
                .join(C_SEP_CONCAT),
        ),
        EnumAggregateMode::Count => EnumCellValue::Number(l_cells.len() as f64),
    }
}

/// Records reached from `record` through `hops`, in order.
///
/// A one-hop keeps the first record of a loaded list; a many-hop accepts a
/// single loaded record as a one-element list.
fn collect_targets<'a>(record: &'a SpecRecord, hops: &[SpecHop]) -> Vec<&'a SpecRecord> {
    let mut l_current = vec![record];
    for hop in hops {
        let mut l_next = Vec::new();
        for node in l_current {
            match (node.related(&hop.relation), hop.cardinality) {
                (Some(EnumRelated::One(Some(related))), _) => l_next.push(related.as_ref()),
                (Some(EnumRelated::Many(l_related)), EnumCardinality::One) => {
                    l_next.extend(l_related.first());
                }
                (Some(EnumRelated::Many(l_related)), EnumCardinality::Many(_)) => {
                    l_next.extend(l_related.iter());
                }
                (Some(EnumRelated::One(None)), _) | (None, _) => {}
            }
        }
        l_current = l_next;
    }
    l_current
}

/// Count of records through `hops`; a top-level relation the source only
/// counted is read from the `{relation}_count` attribute.
fn count_targets(record: &SpecRecord, hops: &[SpecHop]) -> usize {
    if let [hop] = hops
        && record.related(&hop.relation).is_none()
    {
        return record
            .attribute(&format!("{}_count", hop.relation))
            .map(|value| cast_int(value).max(0) as usize)
            .unwrap_or(0);
    }
    collect_targets(record, hops).len()
}
