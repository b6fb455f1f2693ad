//! Output format, cell format, write option and report models.

use exportkit_build::conf::C_SHEET_NAME_DEFAULT;

use crate::conf::C_SEP_CELL_LIST;

////////////////////////////////////////////////////////////////////////////////
// #region ExportFormat

/// Download file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EnumExportFormat {
    /// Office Open XML workbook.
    #[default]
    Xlsx,
    /// Comma-separated values.
    Csv,
    /// Legacy Excel workbook; encoded as XLSX.
    Xls,
}

impl EnumExportFormat {
    /// Parse a format tag; unknown or empty tags select XLSX.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "csv" => Self::Csv,
            "xls" => Self::Xls,
            _ => Self::Xlsx,
        }
    }

    /// Canonical tag.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Xlsx => "xlsx",
            Self::Csv => "csv",
            Self::Xls => "xls",
        }
    }

    /// Format actually written by [`crate::writer::SheetEncoder`].
    pub fn encoded_as(self) -> Self {
        match self {
            Self::Xls => Self::Xlsx,
            other => other,
        }
    }

    /// File extension of the encoded output, without the dot.
    pub fn extension(self) -> &'static str {
        self.encoded_as().tag()
    }

    /// MIME type of the encoded output.
    pub fn content_type(self) -> &'static str {
        match self.encoded_as() {
            Self::Csv => "text/csv",
            _ => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region CellFormatSpecification

/// Cell format specification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SpecCellFormat {
    /// Font family name.
    pub font_name: Option<String>,
    /// Font size in points.
    pub font_size: Option<i64>,
    /// Bold style.
    pub bold: Option<bool>,

    /// Horizontal alignment.
    pub align: Option<String>,
    /// Vertical alignment.
    pub valign: Option<String>,
    /// Border style for all sides.
    pub border: Option<i64>,
    /// Text wrap.
    pub text_wrap: Option<bool>,

    /// Number format code.
    pub num_format: Option<String>,
    /// Background fill color.
    pub bg_color: Option<String>,
}

impl SpecCellFormat {
    /// Return a new format by overlaying `patch` onto `self`.
    pub fn with_(&self, patch: SpecCellFormat) -> SpecCellFormat {
        self.merge(&patch)
    }

    /// Merge two formats with right-side non-`None` overwrite semantics.
    pub fn merge(&self, other: &SpecCellFormat) -> SpecCellFormat {
        SpecCellFormat {
            font_name: other.font_name.clone().or_else(|| self.font_name.clone()),
            font_size: other.font_size.or(self.font_size),
            bold: other.bold.or(self.bold),
            align: other.align.clone().or_else(|| self.align.clone()),
            valign: other.valign.clone().or_else(|| self.valign.clone()),
            border: other.border.or(self.border),
            text_wrap: other.text_wrap.or(self.text_wrap),
            num_format: other.num_format.clone().or_else(|| self.num_format.clone()),
            bg_color: other.bg_color.clone().or_else(|| self.bg_color.clone()),
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region WriteOptions

/// Column width inference policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecAutofitPolicy {
    /// Infer widths at all.
    pub if_autofit: bool,
    /// Max body rows inspected.
    pub height_body_inferred_max: Option<usize>,
    /// Minimum final width.
    pub width_cell_min: usize,
    /// Maximum final width.
    pub width_cell_max: usize,
    /// Width padding added after inference.
    pub width_cell_padding: usize,
}

impl Default for SpecAutofitPolicy {
    fn default() -> Self {
        Self {
            if_autofit: true,
            height_body_inferred_max: Some(20_000),
            width_cell_min: 8,
            width_cell_max: 60,
            width_cell_padding: 2,
        }
    }
}

/// Options of one encoded sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecSheetWriteOptions {
    /// Base worksheet name; split parts get `_N` suffixes.
    pub sheet_name: String,
    /// Header row format.
    pub fmt_header: SpecCellFormat,
    /// Text cell format.
    pub fmt_text: SpecCellFormat,
    /// Number cell format.
    pub fmt_number: SpecCellFormat,
    /// List cell format.
    pub fmt_list: SpecCellFormat,
    /// Separator used to join list cells.
    pub sep_list: String,
    /// Freeze the header row.
    pub if_freeze_header: bool,
    /// Column width inference.
    pub policy_autofit: SpecAutofitPolicy,
}

impl Default for SpecSheetWriteOptions {
    fn default() -> Self {
        Self {
            sheet_name: C_SHEET_NAME_DEFAULT.to_string(),
            fmt_header: SpecCellFormat {
                bold: Some(true),
                ..Default::default()
            },
            fmt_text: SpecCellFormat::default(),
            fmt_number: SpecCellFormat::default(),
            fmt_list: SpecCellFormat {
                text_wrap: Some(true),
                ..Default::default()
            },
            sep_list: C_SEP_CELL_LIST.to_string(),
            if_freeze_header: true,
            policy_autofit: SpecAutofitPolicy::default(),
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ReportSpecification

/// Concrete sheet part emitted to the workbook (after Excel-limit slicing).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecSheetSlice {
    /// Actual unique sheet name in workbook.
    pub sheet_name: String,
    /// Inclusive source row start.
    pub row_start_inclusive: usize,
    /// Exclusive source row end.
    pub row_end_exclusive: usize,
    /// Inclusive source column start.
    pub col_start_inclusive: usize,
    /// Exclusive source column end.
    pub col_end_exclusive: usize,
}

/// Per-encode report.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecSheetReport {
    /// Format actually written.
    pub format: EnumExportFormat,
    /// Sheet slices produced (empty for CSV).
    pub sheets: Vec<SpecSheetSlice>,
    /// Non-fatal warnings.
    pub warnings: Vec<String>,
}

impl SpecSheetReport {
    /// Add a warning message.
    pub fn warn(&mut self, msg: impl AsRef<str>) {
        log::warn!("{}", msg.as_ref());
        self.warnings.push(msg.as_ref().to_string());
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_tags_default_to_xlsx() {
        assert_eq!(EnumExportFormat::from_tag("CSV"), EnumExportFormat::Csv);
        assert_eq!(EnumExportFormat::from_tag("xls"), EnumExportFormat::Xls);
        assert_eq!(EnumExportFormat::from_tag("pdf"), EnumExportFormat::Xlsx);
        assert_eq!(EnumExportFormat::from_tag(""), EnumExportFormat::Xlsx);
    }

    #[test]
    fn legacy_xls_is_encoded_as_xlsx() {
        assert_eq!(EnumExportFormat::Xls.encoded_as(), EnumExportFormat::Xlsx);
        assert_eq!(EnumExportFormat::Xls.extension(), "xlsx");
        assert_eq!(EnumExportFormat::Csv.extension(), "csv");
        assert_eq!(EnumExportFormat::Csv.content_type(), "text/csv");
    }

    #[test]
    fn cell_format_merge_prefers_patch() {
        let base = SpecCellFormat {
            font_name: Some("Calibri".to_string()),
            bold: Some(false),
            ..Default::default()
        };
        let merged = base.with_(SpecCellFormat {
            bold: Some(true),
            ..Default::default()
        });
        assert_eq!(merged.font_name.as_deref(), Some("Calibri"));
        assert_eq!(merged.bold, Some(true));
    }
}
