//! Export constants, settings model and default preset factories.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::spec::ExportError;

/// Records requested from the source per batch.
pub const N_SIZE_FETCH_BATCH_DEFAULT: usize = 100;
/// Default stable per-record identifier column.
pub const C_KEY_COLUMN_DEFAULT: &str = "id";
/// Default date column used by date-range predicates.
pub const C_DATE_COLUMN_DEFAULT: &str = "created_at";
/// Output format of `date` columns.
pub const C_FMT_DATE_DEFAULT: &str = "%Y-%m-%d";
/// Output format of `datetime` columns.
pub const C_FMT_DATETIME_DEFAULT: &str = "%Y-%m-%d %H:%M:%S";
/// Default lookup prefix of export definitions.
pub const C_NAMESPACE_DEFAULT: &str = "App::Tools::Export";
/// Default output format tag.
pub const C_FORMAT_DEFAULT: &str = "xlsx";
/// Default worksheet name.
pub const C_SHEET_NAME_DEFAULT: &str = "Export";
/// Separator of concat aggregation and array columns.
pub const C_SEP_CONCAT: &str = ", ";
/// Separator of derived key segments.
pub const C_SEP_KEY: &str = "_";
/// Label keys and fallbacks of boolean columns.
pub const TUP_LABEL_BOOL: [(&str, &str); 2] = [("yes", "Yes"), ("no", "No")];

/// Process-wide export settings.
///
/// Example `export.toml`:
/// ```toml
/// namespace = "App::Reports"
/// format = "csv"
/// batch_size = 250
/// date_format = "%d/%m/%Y"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SpecExportSettings {
    /// Lookup prefix of export definitions.
    pub namespace: String,
    /// Format used when the filter names none.
    pub format: String,
    /// Records per source batch.
    pub batch_size: usize,
    /// `date` output format (chrono syntax).
    pub date_format: String,
    /// `datetime` output format (chrono syntax).
    pub datetime_format: String,
    /// Worksheet name of spreadsheet output.
    pub sheet_name: String,
}

impl Default for SpecExportSettings {
    fn default() -> Self {
        Self {
            namespace: C_NAMESPACE_DEFAULT.to_string(),
            format: C_FORMAT_DEFAULT.to_string(),
            batch_size: N_SIZE_FETCH_BATCH_DEFAULT,
            date_format: C_FMT_DATE_DEFAULT.to_string(),
            datetime_format: C_FMT_DATETIME_DEFAULT.to_string(),
            sheet_name: C_SHEET_NAME_DEFAULT.to_string(),
        }
    }
}

impl SpecExportSettings {
    /// Parse settings from TOML text; missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ExportError> {
        let settings: Self = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ExportError> {
        let text = fs::read_to_string(path.as_ref())?;
        log::debug!("loaded export settings from {}", path.as_ref().display());
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> Result<(), ExportError> {
        if self.batch_size == 0 {
            return Err(ExportError::Configuration(
                "settings.batch_size must be >= 1.".to_string(),
            ));
        }
        if self.namespace.trim().is_empty() {
            return Err(ExportError::Configuration(
                "settings.namespace must not be empty.".to_string(),
            ));
        }
        Ok(())
    }
}

/// Build default export settings.
pub fn derive_default_export_settings() -> SpecExportSettings {
    SpecExportSettings::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_from_toml_keep_defaults_for_missing_keys() {
        let settings = SpecExportSettings::from_toml_str(
            "namespace = \"App::Reports\"\nbatch_size = 250\n",
        )
        .unwrap();
        assert_eq!(settings.namespace, "App::Reports");
        assert_eq!(settings.batch_size, 250);
        assert_eq!(settings.format, "xlsx");
        assert_eq!(settings.date_format, "%Y-%m-%d");
    }

    #[test]
    fn settings_reject_zero_batch_size() {
        let err = SpecExportSettings::from_toml_str("batch_size = 0").unwrap_err();
        assert!(matches!(err, ExportError::Configuration(_)));
    }

    #[test]
    fn settings_report_toml_syntax_errors() {
        let err = SpecExportSettings::from_toml_str("batch_size = ").unwrap_err();
        assert!(matches!(err, ExportError::Toml(_)));
    }
}
