mod classify;
mod csv_out;
mod error;
mod field_extract;
mod fuzzy;
mod model;
mod options;
mod page_type;
mod pages;
mod process;
mod session;
mod specialized;
mod table_parse;
mod template;
mod validation;
mod warning;

use std::path::Path;

pub use classify::{MATCH_THRESHOLD, PageClassifier};
pub use csv_out::{CSV_HEADERS, write_csv, write_csv_to_string, write_json, write_json_to_string};
pub use error::ExtractError;
pub use field_extract::{FieldExtractor, FieldSpec, extract_field};
pub use fuzzy::{partial_ratio, ratio};
pub use model::{
    CONFIDENCE_EMBEDDED, CONFIDENCE_LABEL_AND_REGEX, CONFIDENCE_LABEL_ONLY, CONFIDENCE_NONE,
    CONFIDENCE_REGEX_ONLY, CONFIDENCE_TABLE_FALLBACK, ClassificationResult, ExtractedField,
    FieldMatch, NamedTable, PageExtraction, PageText, RowExtraction, SourceConfig, TableRow,
};
pub use options::{ExtractOptions, OutputFormat, PageSelection};
pub use page_type::PageType;
pub use pages::{load_pages, split_pages};
pub use process::process;
pub use session::{DocumentSession, ExtractionReport, PageOutcome};
pub use specialized::{ChecklistStatus, post_process};
pub use table_parse::extract_table_rows;
pub use template::{
    ExtractionTemplate, ParameterRow, RowFilter, TableConfig, TableSpec, TemplateRegistry,
};
pub use validation::{
    CleanedValue, FieldType, ReviewPriority, ValidationOutcome, ValidationRules, review_priority,
    validate_value,
};
pub use warning::{ExtractWarning, WarningCode};

/// Classifies every selected page of a document without extracting anything.
pub fn classify_document(
    input: &Path,
    options: &ExtractOptions,
) -> Result<Vec<PageOutcome>, ExtractError> {
    let pages = load_pages(input, options.pages.as_ref())?;
    if pages.is_empty() {
        return Err(ExtractError::NoPagesSelected);
    }

    let mut classifier = PageClassifier::new();
    Ok(pages
        .iter()
        .map(|page| PageOutcome {
            page_number: page.page_number,
            classification: classifier.classify(&page.text, &format!("page {}", page.page_number)),
            extraction: None,
        })
        .collect())
}

/// Loads templates and pages from disk and runs the full pipeline over one document.
///
/// Template loading warnings come first in the report, followed by per-page warnings.
pub fn extract_document(
    input: &Path,
    template_dir: &Path,
    options: &ExtractOptions,
) -> Result<ExtractionReport, ExtractError> {
    let (registry, mut warnings) =
        TemplateRegistry::load_dir(template_dir, options.strict_templates)?;
    let pages = load_pages(input, options.pages.as_ref())?;

    let mut session = DocumentSession::new(&registry, options.clone());
    let mut report = session.process_document(&pages)?;
    warnings.append(&mut report.warnings);
    report.warnings = warnings;
    Ok(report)
}
