//! Sheet constants and default preset factories.

use std::collections::BTreeMap;

use crate::spec::{SpecCellFormat, SpecSheetWriteOptions};

/// Excel worksheet maximum row count.
pub const N_NROWS_EXCEL_MAX: usize = 1_048_576;
/// Excel worksheet maximum column count.
pub const N_NCOLS_EXCEL_MAX: usize = 16_384;
/// Excel sheet name maximum length.
pub const N_LEN_EXCEL_SHEET_NAME_MAX: usize = 31;
/// Characters not allowed in sheet names.
pub const TUP_EXCEL_ILLEGAL: [&str; 7] = ["*", ":", "?", "/", "\\", "[", "]"];
/// Separator of list cells in spreadsheet output.
pub const C_SEP_CELL_LIST: &str = "\n";
/// Timestamp format of download file names.
pub const C_FMT_TIMESTAMP_FILE: &str = "%Y%m%d_%H%M%S";
/// Suffix of export definition lookup keys.
pub const C_SUFFIX_EXPORT: &str = "Export";
/// Fallback file name stem when slugging leaves nothing.
pub const C_FILE_STEM_FALLBACK: &str = "export";

/// Build default named format presets used by [`crate::writer::SheetEncoder`].
pub fn derive_default_sheet_formats() -> BTreeMap<String, SpecCellFormat> {
    let cfg_base_fmt_spec = SpecCellFormat {
        font_name: Some("Calibri".to_string()),
        font_size: Some(11),
        valign: Some("vcenter".to_string()),
        ..Default::default()
    };

    let mut dict_fmt = BTreeMap::new();
    dict_fmt.insert("text".to_string(), cfg_base_fmt_spec.clone());
    dict_fmt.insert(
        "header".to_string(),
        cfg_base_fmt_spec.with_(SpecCellFormat {
            bold: Some(true),
            border: Some(1),
            align: Some("center".to_string()),
            bg_color: Some("#D9E1F2".to_string()),
            ..Default::default()
        }),
    );
    dict_fmt.insert(
        "number".to_string(),
        cfg_base_fmt_spec.with_(SpecCellFormat {
            num_format: Some("General".to_string()),
            align: Some("right".to_string()),
            ..Default::default()
        }),
    );
    dict_fmt.insert(
        "list".to_string(),
        cfg_base_fmt_spec.with_(SpecCellFormat {
            text_wrap: Some(true),
            ..Default::default()
        }),
    );

    dict_fmt
}

/// Build default sheet write options named `sheet_name`.
pub fn derive_default_sheet_write_options(sheet_name: &str) -> SpecSheetWriteOptions {
    let dict_fmt = derive_default_sheet_formats();
    let fmt_of = |key: &str| dict_fmt.get(key).cloned().unwrap_or_default();
    SpecSheetWriteOptions {
        sheet_name: sheet_name.to_string(),
        fmt_header: fmt_of("header"),
        fmt_text: fmt_of("text"),
        fmt_number: fmt_of("number"),
        fmt_list: fmt_of("list"),
        ..Default::default()
    }
}
