//! Schema documents in TOML.
//!
//! ```toml
//! source = "employees"
//! date_column = "hired_on"
//! select = ["salary"]
//! eager_load = ["documents"]
//! directives = ["seniority"]
//!
//! [[columns]]
//! name = "name"
//! type = "text"
//!
//! [[relations]]
//! name = "team"
//! kind = "one"
//! foreign_key = "team_id"
//! columns = [{ name = "name", type = "text" }]
//!
//! [[relations]]
//! name = "tags"
//! kind = "concat"
//! value_column = "label"
//! ```
//!
//! Relation `kind` is one of `one`, `list`, `concat`, `count`. Directive
//! names must be registered in the [`SpecDirectiveRegistry`] passed in.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::source::SpecDirectiveRegistry;
use crate::spec::{
    EnumAggregateMode, EnumColumnKind, ExportError, SpecRelation, SpecSchemaConfig,
};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSchema {
    source: String,
    key_column: Option<String>,
    date_column: Option<String>,
    #[serde(default)]
    columns: Vec<RawColumn>,
    #[serde(default)]
    relations: Vec<RawRelation>,
    #[serde(default)]
    eager_load: Vec<String>,
    #[serde(default)]
    select: Vec<String>,
    #[serde(default)]
    directives: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawColumn {
    name: String,
    #[serde(rename = "type", default = "derive_default_type")]
    type_tag: String,
}

fn derive_default_type() -> String {
    EnumColumnKind::Text.tag().to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRelation {
    name: String,
    kind: String,
    foreign_key: Option<String>,
    value_column: Option<String>,
    #[serde(default)]
    columns: Vec<RawColumn>,
    #[serde(default)]
    relations: Vec<RawRelation>,
}

impl RawRelation {
    fn into_relation(self) -> Result<SpecRelation, ExportError> {
        let mut relation = match self.kind.trim() {
            "one" => SpecRelation::one(self.name),
            other => match EnumAggregateMode::from_tag(other) {
                Some(mode) => SpecRelation::many(self.name, mode),
                None => {
                    return Err(ExportError::Configuration(format!(
                        "relation {}: unknown kind {other:?} (expected one, list, concat or count)",
                        self.name
                    )));
                }
            },
        };
        for column in self.columns {
            relation = relation.with_column(column.name, EnumColumnKind::from_tag(&column.type_tag));
        }
        if let Some(c_fk) = self.foreign_key {
            relation = relation.with_foreign_key(c_fk);
        }
        if let Some(c_value_column) = self.value_column {
            relation = relation.with_value_column(c_value_column);
        }
        for nested in self.relations {
            relation = relation.with_relation(nested.into_relation()?);
        }
        Ok(relation)
    }
}

/// Parse a schema document; directive names resolve through `directives`.
pub fn parse_schema_toml(
    text: &str,
    directives: &SpecDirectiveRegistry,
) -> Result<SpecSchemaConfig, ExportError> {
    let raw: RawSchema = toml::from_str(text)?;

    let mut builder = SpecSchemaConfig::builder(raw.source);
    if let Some(c_key) = raw.key_column {
        builder = builder.key_column(c_key);
    }
    if let Some(c_date) = raw.date_column {
        builder = builder.date_column(c_date);
    }
    for column in raw.columns {
        builder = builder.column(column.name, EnumColumnKind::from_tag(&column.type_tag));
    }
    for relation in raw.relations {
        builder = builder.relation(relation.into_relation()?);
    }
    for path in raw.eager_load {
        builder = builder.eager_load(path);
    }
    for column in raw.select {
        builder = builder.select(column);
    }
    for c_name in raw.directives {
        let Some(directive) = directives.get(&c_name) else {
            return Err(ExportError::Configuration(format!(
                "directive {c_name:?} is not registered."
            )));
        };
        let directive = directive.clone();
        builder = builder.directive(c_name, directive);
    }
    Ok(builder.build())
}

/// Load a schema document from a TOML file.
pub fn load_schema<P: AsRef<Path>>(
    path: P,
    directives: &SpecDirectiveRegistry,
) -> Result<SpecSchemaConfig, ExportError> {
    let text = fs::read_to_string(path.as_ref())?;
    let schema = parse_schema_toml(&text, directives)?;
    log::debug!(
        "loaded export schema {} from {}",
        schema.source,
        path.as_ref().display()
    );
    Ok(schema)
}
