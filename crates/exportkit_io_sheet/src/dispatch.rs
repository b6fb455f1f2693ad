//! Export lookup by page name and download assembly.

use std::collections::BTreeMap;
use std::sync::Arc;

use exportkit_build::{
    ExportError, RecordSource, SpecExportContext, SpecExportSettings, SpecRuntimeFilter,
    SpecSchemaConfig, run_export,
};

use crate::conf::{C_FMT_TIMESTAMP_FILE, derive_default_sheet_write_options};
use crate::spec::{EnumExportFormat, SpecSheetReport, SpecSheetWriteOptions};
use crate::util::{derive_export_file_name, derive_export_lookup_key};
use crate::writer::SheetEncoder;

/// One exportable page: its schema, its records, and whether it may run.
pub trait ExportDefinition: Send + Sync {
    /// Schema for this call; may depend on the filter.
    fn schema(&self, filter: &SpecRuntimeFilter) -> Result<SpecSchemaConfig, ExportError>;

    /// Record source the schema is fetched from.
    fn source(&self) -> &dyn RecordSource;

    fn is_enabled(&self, _filter: &SpecRuntimeFilter) -> bool {
        true
    }
}

/// Export definitions keyed by `{namespace}::{Studly}Export`.
#[derive(Clone)]
pub struct ExportRegistry {
    namespace: String,
    dict_definitions: BTreeMap<String, Arc<dyn ExportDefinition>>,
}

impl std::fmt::Debug for ExportRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportRegistry")
            .field("namespace", &self.namespace)
            .field("definitions", &self.dict_definitions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ExportRegistry {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            dict_definitions: BTreeMap::new(),
        }
    }

    pub fn from_settings(settings: &SpecExportSettings) -> Self {
        Self::new(settings.namespace.clone())
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Register `definition` under the lookup key of `page`.
    pub fn register(&mut self, page: &str, definition: Arc<dyn ExportDefinition>) {
        let c_key = derive_export_lookup_key(&self.namespace, page);
        log::debug!("registered export {c_key}");
        self.dict_definitions.insert(c_key, definition);
    }

    pub fn with(mut self, page: &str, definition: Arc<dyn ExportDefinition>) -> Self {
        self.register(page, definition);
        self
    }

    /// Definition registered for `page`.
    ///
    /// # Errors
    /// `NotFound` naming the lookup key.
    pub fn resolve(&self, page: &str) -> Result<&Arc<dyn ExportDefinition>, ExportError> {
        let c_key = derive_export_lookup_key(&self.namespace, page);
        self.dict_definitions
            .get(&c_key)
            .ok_or(ExportError::NotFound(c_key))
    }
}

/// Encoded export ready to be served.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecDownload {
    pub file_name: String,
    pub format: EnumExportFormat,
    pub content: Vec<u8>,
    pub report: SpecSheetReport,
}

impl SpecDownload {
    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }
}

/// Runs registered exports and encodes their tables.
#[derive(Debug, Clone)]
pub struct Downloader {
    registry: ExportRegistry,
    context: SpecExportContext,
    write_options: SpecSheetWriteOptions,
}

impl Downloader {
    pub fn new(registry: ExportRegistry, context: SpecExportContext) -> Self {
        let write_options = derive_default_sheet_write_options(&context.settings.sheet_name);
        Self {
            registry,
            context,
            write_options,
        }
    }

    pub fn with_write_options(mut self, write_options: SpecSheetWriteOptions) -> Self {
        self.write_options = write_options;
        self
    }

    pub fn registry(&self) -> &ExportRegistry {
        &self.registry
    }

    /// Resolve, run and encode the export named by `filter.page`.
    ///
    /// # Errors
    /// `Configuration` when no page is named, `NotFound`/`Permission` from
    /// the lookup, and anything the export or the encoder raises. Every
    /// failure is logged with the page before it is returned.
    pub fn download(&self, filter: &SpecRuntimeFilter) -> Result<SpecDownload, ExportError> {
        let Some(c_page) = filter
            .page
            .as_deref()
            .map(str::trim)
            .filter(|page| !page.is_empty())
        else {
            let err = ExportError::Configuration("filter.page is required.".to_string());
            log::error!("export failed: {err}");
            return Err(err);
        };

        self.download_page(c_page, filter).inspect_err(|err| {
            log::error!("export of page {c_page:?} failed: {err}");
        })
    }

    fn download_page(
        &self,
        page: &str,
        filter: &SpecRuntimeFilter,
    ) -> Result<SpecDownload, ExportError> {
        let definition = self.registry.resolve(page)?;
        if !definition.is_enabled(filter) {
            log::warn!("export of page {page:?} is disabled");
            return Err(ExportError::Permission(page.to_string()));
        }

        let schema = definition.schema(filter)?;
        let table = run_export(&schema, filter, &self.context, definition.source())?;

        let format = EnumExportFormat::from_tag(
            filter
                .format
                .as_deref()
                .unwrap_or(&self.context.settings.format),
        );
        let mut encoder = SheetEncoder::new(self.write_options.clone());
        let content = encoder.encode(&table, format)?;
        let report = encoder.last_report().cloned().unwrap_or_default();

        let c_stem = filter
            .filename
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(page);
        let c_timestamp = match filter.timestamp.as_deref() {
            Some(val) if !val.trim().is_empty() => val.to_string(),
            _ => chrono::Local::now().format(C_FMT_TIMESTAMP_FILE).to_string(),
        };
        let file_name = derive_export_file_name(c_stem, &c_timestamp, format);
        log::info!("export of page {page:?} ready as {file_name}");

        Ok(SpecDownload {
            file_name,
            format: format.encoded_as(),
            content,
            report,
        })
    }
}
