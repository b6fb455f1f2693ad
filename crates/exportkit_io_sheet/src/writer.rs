//! Sheet encoder that turns an export table into XLSX or CSV bytes.

use exportkit_build::{EnumCellValue, ExportError, SpecExportTable};
use polars::prelude::{Column, CsvWriter, DataFrame, PolarsError, SerWriter};
use rust_xlsxwriter::{Format, FormatAlign, FormatBorder, Workbook, Worksheet, XlsxError};

use crate::spec::{
    EnumExportFormat, SpecAutofitPolicy, SpecCellFormat, SpecSheetReport, SpecSheetSlice,
    SpecSheetWriteOptions,
};
use crate::util::{
    derive_unique_names, estimate_unicode_string_width, estimate_width_len, plan_sheet_slices,
    sanitize_sheet_name,
};

/// Stateful table encoder; keeps one report per encode call.
#[derive(Debug, Clone, Default)]
pub struct SheetEncoder {
    write_options: SpecSheetWriteOptions,
    l_reports: Vec<SpecSheetReport>,
}

impl SheetEncoder {
    pub fn new(write_options: SpecSheetWriteOptions) -> Self {
        Self {
            write_options,
            l_reports: Vec::new(),
        }
    }

    /// Return immutable snapshot of per-encode reports.
    pub fn report(&self) -> Vec<SpecSheetReport> {
        self.l_reports.clone()
    }

    /// Report of the latest encode call.
    pub fn last_report(&self) -> Option<&SpecSheetReport> {
        self.l_reports.last()
    }

    /// Encode `table` in `format`.
    ///
    /// Rows must be aligned with headings. `xls` is written as XLSX and the
    /// substitution is reported as a warning.
    pub fn encode(
        &mut self,
        table: &SpecExportTable,
        format: EnumExportFormat,
    ) -> Result<Vec<u8>, ExportError> {
        if table.keys.len() != table.headings.len() {
            return Err(ExportError::Encode(format!(
                "{} keys for {} headings.",
                table.keys.len(),
                table.headings.len()
            )));
        }
        if let Some((n_idx, row)) = table
            .rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != table.headings.len())
        {
            return Err(ExportError::Encode(format!(
                "row {n_idx} has {} cells for {} headings.",
                row.len(),
                table.headings.len()
            )));
        }

        let mut report = SpecSheetReport {
            format: format.encoded_as(),
            ..Default::default()
        };
        if format == EnumExportFormat::Xls {
            report.warn("legacy xls output is not supported; writing xlsx instead.");
        }

        let v_content = match format.encoded_as() {
            EnumExportFormat::Csv => self.encode_csv(table)?,
            _ => self.encode_xlsx(table, &mut report)?,
        };
        log::debug!(
            "encoded {} rows as {} ({} bytes)",
            table.height(),
            report.format.tag(),
            v_content.len()
        );
        self.l_reports.push(report);
        Ok(v_content)
    }

    fn encode_xlsx(
        &self,
        table: &SpecExportTable,
        report: &mut SpecSheetReport,
    ) -> Result<Vec<u8>, ExportError> {
        let options = &self.write_options;
        let fmt_header = derive_rust_xlsx_format(&options.fmt_header);
        let fmt_text = derive_rust_xlsx_format(&options.fmt_text);
        let fmt_number = derive_rust_xlsx_format(&options.fmt_number);
        let fmt_list = derive_rust_xlsx_format(&options.fmt_list);

        let c_sheet_name = sanitize_sheet_name(&options.sheet_name, "_");
        let l_slices = plan_sheet_slices(table.height(), table.width(), &c_sheet_name, report);

        let mut workbook = Workbook::new();
        for slice in &l_slices {
            let worksheet = workbook.add_worksheet();
            worksheet.set_name(&slice.sheet_name).map_err(derive_xlsx_error)?;

            for (n_col, c_heading) in table.headings[slice.col_start_inclusive..slice.col_end_exclusive]
                .iter()
                .enumerate()
            {
                worksheet
                    .write_string_with_format(0, cast_col_num(n_col)?, c_heading, &fmt_header)
                    .map_err(derive_xlsx_error)?;
            }

            for (n_row, row) in table.rows[slice.row_start_inclusive..slice.row_end_exclusive]
                .iter()
                .enumerate()
            {
                for (n_col, cell) in row[slice.col_start_inclusive..slice.col_end_exclusive]
                    .iter()
                    .enumerate()
                {
                    let format = match cell {
                        EnumCellValue::Number(_) => &fmt_number,
                        EnumCellValue::List(_) => &fmt_list,
                        _ => &fmt_text,
                    };
                    write_cell_with_format(
                        worksheet,
                        n_row + 1,
                        n_col,
                        cell,
                        format,
                        &options.sep_list,
                    )?;
                }
            }

            if options.if_freeze_header {
                worksheet.set_freeze_panes(1, 0).map_err(derive_xlsx_error)?;
            }
            if options.policy_autofit.if_autofit {
                let l_widths = derive_autofit_widths(table, slice, &options.policy_autofit, &options.sep_list);
                for (n_col, n_width) in l_widths.into_iter().enumerate() {
                    worksheet
                        .set_column_width(cast_col_num(n_col)?, n_width as f64)
                        .map_err(derive_xlsx_error)?;
                }
            }
        }
        report.sheets.extend(l_slices);

        workbook.save_to_buffer().map_err(derive_xlsx_error)
    }

    fn encode_csv(&self, table: &SpecExportTable) -> Result<Vec<u8>, ExportError> {
        let sep_list = &self.write_options.sep_list;
        let l_names = derive_unique_names(&table.headings);
        let l_columns: Vec<Column> = l_names
            .iter()
            .enumerate()
            .map(|(n_col, c_name)| {
                let l_values: Vec<Option<String>> = table
                    .rows
                    .iter()
                    .map(|row| match &row[n_col] {
                        EnumCellValue::None => None,
                        cell => Some(cell.to_text_with(sep_list)),
                    })
                    .collect();
                Column::new(c_name.as_str().into(), l_values)
            })
            .collect();

        let mut df = DataFrame::new(l_columns).map_err(derive_polars_error)?;
        let mut v_content = Vec::new();
        CsvWriter::new(&mut v_content)
            .include_header(true)
            .finish(&mut df)
            .map_err(derive_polars_error)?;
        Ok(v_content)
    }
}

/// Column widths of one slice from header and (bounded) body cells.
pub fn derive_autofit_widths(
    table: &SpecExportTable,
    slice: &SpecSheetSlice,
    policy: &SpecAutofitPolicy,
    sep_list: &str,
) -> Vec<usize> {
    let n_rows_inspected = policy
        .height_body_inferred_max
        .unwrap_or(usize::MAX)
        .min(slice.row_end_exclusive - slice.row_start_inclusive);
    (slice.col_start_inclusive..slice.col_end_exclusive)
        .map(|n_col| {
            let n_width_header = estimate_unicode_string_width(&table.headings[n_col]);
            let n_width_body = table.rows
                [slice.row_start_inclusive..slice.row_start_inclusive + n_rows_inspected]
                .iter()
                .map(|row| estimate_width_len(&row[n_col], sep_list))
                .max()
                .unwrap_or(0);
            (n_width_header.max(n_width_body) + policy.width_cell_padding)
                .clamp(policy.width_cell_min, policy.width_cell_max)
        })
        .collect()
}

fn write_cell_with_format(
    worksheet: &mut Worksheet,
    row_idx: usize,
    col_idx: usize,
    value: &EnumCellValue,
    format: &Format,
    sep_list: &str,
) -> Result<(), ExportError> {
    let n_row = cast_row_num(row_idx)?;
    let n_col = cast_col_num(col_idx)?;
    match value {
        EnumCellValue::None => {
            worksheet
                .write_blank(n_row, n_col, format)
                .map_err(derive_xlsx_error)?;
        }
        EnumCellValue::Number(val) if val.is_finite() => {
            worksheet
                .write_number_with_format(n_row, n_col, *val, format)
                .map_err(derive_xlsx_error)?;
        }
        other => {
            worksheet
                .write_string_with_format(n_row, n_col, other.to_text_with(sep_list), format)
                .map_err(derive_xlsx_error)?;
        }
    }
    Ok(())
}

fn derive_rust_xlsx_format(spec: &SpecCellFormat) -> Format {
    let mut format = Format::new();

    if let Some(val) = &spec.font_name {
        format = format.set_font_name(val.clone());
    }
    if let Some(val) = spec.font_size {
        format = format.set_font_size(val as f64);
    }
    if spec.bold.unwrap_or(false) {
        format = format.set_bold();
    }

    if let Some(val) = &spec.align
        && let Some(align) = derive_format_align(val)
    {
        format = format.set_align(align);
    }
    if let Some(val) = &spec.valign
        && let Some(align) = derive_format_align(val)
    {
        format = format.set_align(align);
    }

    if let Some(val) = &spec.num_format {
        format = format.set_num_format(val.clone());
    }
    if let Some(val) = &spec.bg_color {
        format = format.set_background_color(val.as_str());
    }
    if let Some(val) = spec.border {
        format = format.set_border(derive_format_border(val));
    }
    if spec.text_wrap.unwrap_or(false) {
        format = format.set_text_wrap();
    }

    format
}

fn derive_format_border(border: i64) -> FormatBorder {
    match border {
        1 => FormatBorder::Thin,
        2 => FormatBorder::Medium,
        3 => FormatBorder::Dashed,
        4 => FormatBorder::Dotted,
        5 => FormatBorder::Thick,
        6 => FormatBorder::Double,
        7 => FormatBorder::Hair,
        _ => FormatBorder::None,
    }
}

fn derive_format_align(align: &str) -> Option<FormatAlign> {
    let value = align.trim().to_ascii_lowercase();
    match value.as_str() {
        "general" => Some(FormatAlign::General),
        "left" => Some(FormatAlign::Left),
        "center" => Some(FormatAlign::Center),
        "right" => Some(FormatAlign::Right),
        "top" => Some(FormatAlign::Top),
        "bottom" => Some(FormatAlign::Bottom),
        "vcenter" | "vertical_center" => Some(FormatAlign::VerticalCenter),
        _ => None,
    }
}

fn cast_row_num(value: usize) -> Result<u32, ExportError> {
    u32::try_from(value).map_err(|_| ExportError::Encode(format!("row index overflow: {value}")))
}

fn cast_col_num(value: usize) -> Result<u16, ExportError> {
    u16::try_from(value)
        .map_err(|_| ExportError::Encode(format!("column index overflow: {value}")))
}

fn derive_xlsx_error(err: XlsxError) -> ExportError {
    ExportError::Encode(format!("xlsx write error: {err}"))
}

fn derive_polars_error(err: PolarsError) -> ExportError {
    ExportError::Encode(format!("csv write error: {err}"))
}
