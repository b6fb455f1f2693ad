//! `exportkit_io_sheet` v1:
//! Spreadsheet output and download dispatch for `exportkit_build` tables.
//!
//! Modules:
//! - `conf`     : sheet limits, file naming constants, default format presets
//! - `spec`     : output format, cell format, write options and reports
//! - `util`     : sheet slicing, width estimation, slug and lookup naming
//! - `writer`   : XLSX (rust_xlsxwriter) and CSV (polars) encoder
//! - `dispatch` : export registry and downloader
pub mod conf;
pub mod dispatch;
pub mod spec;
pub mod util;
pub mod writer;

pub use conf::{derive_default_sheet_formats, derive_default_sheet_write_options};
pub use dispatch::{Downloader, ExportDefinition, ExportRegistry, SpecDownload};
pub use spec::{
    EnumExportFormat, SpecAutofitPolicy, SpecCellFormat, SpecSheetReport, SpecSheetSlice,
    SpecSheetWriteOptions,
};
pub use writer::SheetEncoder;
