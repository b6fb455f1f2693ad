//! Stateless helpers used by the sheet encoder and the dispatcher.

use std::collections::BTreeSet;

use exportkit_build::EnumCellValue;

use crate::conf::{
    C_FILE_STEM_FALLBACK, C_SUFFIX_EXPORT, N_LEN_EXCEL_SHEET_NAME_MAX, N_NCOLS_EXCEL_MAX,
    N_NROWS_EXCEL_MAX, TUP_EXCEL_ILLEGAL,
};
use crate::spec::{EnumExportFormat, SpecSheetReport, SpecSheetSlice};

////////////////////////////////////////////////////////////////////////////////
// #region SheetNormalization

/// Replace invalid chars and trim to valid Excel sheet name.
pub fn sanitize_sheet_name(name: &str, replace_to: &str) -> String {
    let mut c_name = name.to_string();
    for c_illegal in TUP_EXCEL_ILLEGAL {
        c_name = c_name.replace(c_illegal, replace_to);
    }
    c_name = c_name.trim().trim_matches('\'').to_string();
    if c_name.is_empty() {
        c_name = "Sheet".to_string();
    }

    c_name.chars().take(N_LEN_EXCEL_SHEET_NAME_MAX).collect()
}

/// Split a `height x width` table into Excel-compliant sheet slices.
///
/// One header row is reserved per sheet. Overflow splits columns first, then
/// rows, and is reported as a warning.
pub fn plan_sheet_slices(
    height_table: usize,
    width_table: usize,
    sheet_name: &str,
    report: &mut SpecSheetReport,
) -> Vec<SpecSheetSlice> {
    let n_rows_data_max = N_NROWS_EXCEL_MAX - 1;

    let mut l_col_slices = Vec::new();
    let mut n_col_start = 0;
    while n_col_start < width_table {
        let n_col_end = usize::min(width_table, n_col_start + N_NCOLS_EXCEL_MAX);
        l_col_slices.push((n_col_start, n_col_end));
        n_col_start = n_col_end;
    }
    if l_col_slices.is_empty() {
        l_col_slices.push((0, 0));
    }

    let mut l_row_slices = Vec::new();
    let mut n_row_start = 0;
    while n_row_start < height_table {
        let n_row_end = usize::min(height_table, n_row_start + n_rows_data_max);
        l_row_slices.push((n_row_start, n_row_end));
        n_row_start = n_row_end;
    }
    if l_row_slices.is_empty() {
        l_row_slices.push((0, 0));
    }

    let n_parts_total = l_col_slices.len() * l_row_slices.len();

    let mut l_sheet_parts = Vec::with_capacity(n_parts_total);
    let mut n_idx_part = 1;
    for (col_start, col_end) in &l_col_slices {
        for (row_start, row_end) in &l_row_slices {
            let c_part_sheet_name = if n_parts_total == 1 {
                sheet_name.to_string()
            } else {
                create_sheet_identifier(sheet_name, n_idx_part)
            };

            l_sheet_parts.push(SpecSheetSlice {
                sheet_name: c_part_sheet_name,
                row_start_inclusive: *row_start,
                row_end_exclusive: *row_end,
                col_start_inclusive: *col_start,
                col_end_exclusive: *col_end,
            });
            n_idx_part += 1;
        }
    }

    if n_parts_total > 1 {
        report.warn(format!(
            "Excel limit overflow: split into {} sheets (columns-first, then rows).",
            l_sheet_parts.len()
        ));
    }

    l_sheet_parts
}

/// Create suffixed sheet name (`base_1`, `base_2`, ...), respecting length cap.
pub fn create_sheet_identifier(base_name: &str, part_idx_1based: usize) -> String {
    let c_sheet_name_suffix = format!("_{part_idx_1based}");
    let n_len_base_name_max = N_LEN_EXCEL_SHEET_NAME_MAX.saturating_sub(c_sheet_name_suffix.len());

    let c_sheet_name_base: String = base_name
        .chars()
        .take(usize::max(1, n_len_base_name_max))
        .collect();

    format!("{c_sheet_name_base}{c_sheet_name_suffix}")
}

/// Make `names` unique by suffixing repeats with `__2`, `__3`, ...
pub fn derive_unique_names(names: &[String]) -> Vec<String> {
    let mut set_seen = BTreeSet::new();
    names
        .iter()
        .map(|c_name| {
            let mut c_candidate = c_name.clone();
            let mut n_idx = 2usize;
            while set_seen.contains(&c_candidate) {
                c_candidate = format!("{c_name}__{n_idx}");
                n_idx += 1;
            }
            set_seen.insert(c_candidate.clone());
            c_candidate
        })
        .collect()
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region WidthEstimation

/// Estimate displayed width units of one cell.
pub fn estimate_width_len(value: &EnumCellValue, sep_list: &str) -> usize {
    match value {
        EnumCellValue::None => 0,
        EnumCellValue::List(l_items) => l_items
            .iter()
            .map(|item| estimate_width_len(item, sep_list))
            .max()
            .unwrap_or(0),
        other => other
            .to_text_with(sep_list)
            .lines()
            .map(estimate_unicode_string_width)
            .max()
            .unwrap_or(0),
    }
}

/// Width units of a string; non-ASCII characters count wider.
pub fn estimate_unicode_string_width(s: &str) -> usize {
    let n_ascii = s.chars().filter(|chr| chr.is_ascii()).count();
    let n_non_ascii = s.chars().count().saturating_sub(n_ascii);
    n_ascii + (n_non_ascii as f64 * 1.6).round() as usize
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region FileNaming

/// URL slug: lowercase ASCII alphanumerics joined by single `-`.
///
/// `_` counts as a separator. Empty results fall back to `export`.
pub fn slugify(text: &str) -> String {
    let mut c_slug = String::with_capacity(text.len());
    let mut if_pending_sep = false;
    for chr in text.chars() {
        if chr.is_ascii_alphanumeric() {
            if if_pending_sep && !c_slug.is_empty() {
                c_slug.push('-');
            }
            if_pending_sep = false;
            c_slug.push(chr.to_ascii_lowercase());
        } else if chr == '-' || chr == '_' || chr.is_whitespace() {
            if_pending_sep = true;
        }
    }
    if c_slug.is_empty() {
        return C_FILE_STEM_FALLBACK.to_string();
    }
    c_slug
}

/// Studly case: split on `-`, `_` and whitespace, upper-case each first letter.
pub fn derive_studly_name(name: &str) -> String {
    name.split(|chr: char| chr == '-' || chr == '_' || chr.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// Lookup key of an export page under `namespace`.
pub fn derive_export_lookup_key(namespace: &str, page: &str) -> String {
    format!(
        "{}::{}{C_SUFFIX_EXPORT}",
        namespace.trim_end_matches(':'),
        derive_studly_name(page)
    )
}

/// Download file name: `slug("{stem}_{timestamp}").{ext}`.
pub fn derive_export_file_name(stem: &str, timestamp: &str, format: EnumExportFormat) -> String {
    format!("{}.{}", slugify(&format!("{stem}_{timestamp}")), format.extension())
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
