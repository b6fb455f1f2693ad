//! Fetched record model and dotted-path resolution.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};

use crate::util::render_value_text;

////////////////////////////////////////////////////////////////////////////////
// #region Records

/// Related record(s) eager-loaded under one relation name.
#[derive(Debug, Clone, PartialEq)]
pub enum EnumRelated {
    /// One-relation; `None` when no related record exists.
    One(Option<Box<SpecRecord>>),
    /// Many-relation.
    Many(Vec<SpecRecord>),
}

/// One record returned by a [`crate::source::RecordSource`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpecRecord {
    /// Attribute values by name.
    pub attributes: Map<String, Value>,
    /// Loaded relations by name.
    pub relations: BTreeMap<String, EnumRelated>,
}

impl SpecRecord {
    /// Build a record from a JSON object; non-object values give an empty record.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(attributes) => Self {
                attributes,
                relations: BTreeMap::new(),
            },
            _ => Self::default(),
        }
    }

    /// Set an attribute.
    pub fn with_attribute(mut self, name: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    /// Attach a one-relation.
    pub fn with_one(mut self, name: impl Into<String>, related: Option<SpecRecord>) -> Self {
        self.relations
            .insert(name.into(), EnumRelated::One(related.map(Box::new)));
        self
    }

    /// Attach a many-relation.
    pub fn with_many(mut self, name: impl Into<String>, related: Vec<SpecRecord>) -> Self {
        self.relations.insert(name.into(), EnumRelated::Many(related));
        self
    }

    /// Attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Relation by name.
    pub fn related(&self, name: &str) -> Option<&EnumRelated> {
        self.relations.get(name)
    }
}

/// Derive one unique key per record from `key_column`.
///
/// Records without a usable key, or repeating an earlier key, fall back to
/// their position (`#<idx>`).
pub fn derive_record_keys(records: &[SpecRecord], key_column: &str) -> Vec<String> {
    let mut set_keys_seen = BTreeSet::new();
    records
        .iter()
        .enumerate()
        .map(|(n_idx, record)| {
            let c_key = record
                .attribute(key_column)
                .map(render_value_text)
                .filter(|key| !key.is_empty() && !set_keys_seen.contains(key))
                .unwrap_or_else(|| format!("#{n_idx}"));
            set_keys_seen.insert(c_key.clone());
            c_key
        })
        .collect()
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region PathResolution

/// One step of a path walk.
pub enum EnumPathStep<'a> {
    /// Borrowed plain value.
    Value(&'a Value),
    /// Borrowed navigable node.
    Node(&'a dyn PathAccess),
    /// Value materialized during the walk.
    Owned(Value),
}

impl EnumPathStep<'_> {
    fn into_value(self) -> Value {
        match self {
            Self::Value(value) => value.clone(),
            Self::Node(node) => node.to_value(),
            Self::Owned(value) => value,
        }
    }
}

/// Anything a dotted path can walk through.
pub trait PathAccess {
    /// Descend one path segment.
    fn step(&self, segment: &str) -> Option<EnumPathStep<'_>>;

    /// Materialize the node as a plain value.
    fn to_value(&self) -> Value;
}

impl PathAccess for Value {
    fn step(&self, segment: &str) -> Option<EnumPathStep<'_>> {
        match self {
            Value::Object(dict) => dict.get(segment).map(EnumPathStep::Value),
            Value::Array(l_items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|n_idx| l_items.get(n_idx))
                .map(EnumPathStep::Value),
            _ => None,
        }
    }

    fn to_value(&self) -> Value {
        self.clone()
    }
}

impl PathAccess for SpecRecord {
    fn step(&self, segment: &str) -> Option<EnumPathStep<'_>> {
        if let Some(value) = self.attributes.get(segment) {
            return Some(EnumPathStep::Value(value));
        }
        match self.relations.get(segment)? {
            EnumRelated::One(Some(related)) => Some(EnumPathStep::Node(related.as_ref())),
            EnumRelated::One(None) => None,
            EnumRelated::Many(l_related) => Some(EnumPathStep::Owned(Value::Array(
                l_related.iter().map(PathAccess::to_value).collect(),
            ))),
        }
    }

    fn to_value(&self) -> Value {
        let mut dict = self.attributes.clone();
        for (name, related) in &self.relations {
            let value = match related {
                EnumRelated::One(Some(record)) => record.to_value(),
                EnumRelated::One(None) => Value::Null,
                EnumRelated::Many(l_records) => {
                    Value::Array(l_records.iter().map(PathAccess::to_value).collect())
                }
            };
            dict.entry(name.clone()).or_insert(value);
        }
        Value::Object(dict)
    }
}

/// Resolve a dotted path against `root`; `Null` when any segment is missing.
pub fn resolve_path(root: &dyn PathAccess, path: &str) -> Value {
    let mut step = EnumPathStep::Node(root);
    for segment in path.split('.') {
        let step_next = match step {
            EnumPathStep::Node(node) => node.step(segment),
            EnumPathStep::Value(value) => value.step(segment),
            EnumPathStep::Owned(value) => value
                .step(segment)
                .map(|step_owned| EnumPathStep::Owned(step_owned.into_value())),
        };
        let Some(step_next) = step_next else {
            return Value::Null;
        };
        step = step_next;
    }
    step.into_value()
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
