//! Per-document pipeline: classification, extraction and review signals.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::classify::PageClassifier;
use crate::error::ExtractError;
use crate::model::{ClassificationResult, PageExtraction, PageText};
use crate::options::ExtractOptions;
use crate::page_type::PageType;
use crate::process::process;
use crate::specialized::post_process;
use crate::template::{ExtractionTemplate, TemplateRegistry};
use crate::validation::{ValidationRules, review_priority};
use crate::warning::{ExtractWarning, WarningCode};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageOutcome {
    pub page_number: u32,
    pub classification: ClassificationResult,
    /// `None` when the page was not extracted (unknown type or no template).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction: Option<PageExtraction>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionReport {
    pub page_count: usize,
    pub extracted_pages: usize,
    /// Leaf fields that carry a non-empty value across all pages.
    pub field_count: usize,
    pub pages: Vec<PageOutcome>,
    pub warnings: Vec<ExtractWarning>,
}

#[derive(Debug, Clone)]
struct CachedHeader {
    value: String,
    confidence: f32,
    page: u32,
}

/// State for one document. Create a fresh session per document.
#[derive(Debug)]
pub struct DocumentSession<'a> {
    classifier: PageClassifier,
    registry: &'a TemplateRegistry,
    options: ExtractOptions,
    header_cache: HashMap<PageType, HashMap<String, CachedHeader>>,
}

impl<'a> DocumentSession<'a> {
    #[must_use]
    pub fn new(registry: &'a TemplateRegistry, options: ExtractOptions) -> Self {
        Self {
            classifier: PageClassifier::new(),
            registry,
            options,
            header_cache: HashMap::new(),
        }
    }

    #[must_use]
    pub fn classifier(&self) -> &PageClassifier {
        &self.classifier
    }

    /// Classifies and extracts one page. Pages must arrive in document order.
    pub fn process_page(
        &mut self,
        page: &PageText,
        warnings: &mut Vec<ExtractWarning>,
    ) -> PageOutcome {
        let context = format!("page {}", page.page_number);
        let classification = self.classifier.classify(&page.text, &context);
        info!(
            context = %context,
            page_type = %classification.page_type,
            score = classification.score,
            "classified page"
        );

        let mut outcome = PageOutcome {
            page_number: page.page_number,
            classification,
            extraction: None,
        };
        let page_type = outcome.classification.page_type;

        if page_type == PageType::Unknown {
            warn!(context = %context, "page type unknown, skipping extraction");
            warnings.push(
                ExtractWarning::new(WarningCode::UnknownPageType, "page could not be classified")
                    .with_page(page.page_number),
            );
            return outcome;
        }

        let registry = self.registry;
        let Some(template) = registry.get(page_type) else {
            warn!(context = %context, page_type = %page_type, "no template for page type");
            warnings.push(
                ExtractWarning::new(
                    WarningCode::MissingTemplate,
                    format!("no extraction template for {page_type}"),
                )
                .with_page(page.page_number),
            );
            return outcome;
        };

        let mut extraction = process(&page.text, template);
        post_process(page_type, &page.text, &mut extraction);
        if self.options.inherit_headers {
            self.persist_headers(page_type, page.page_number, &mut extraction);
        }
        assign_priorities(template, &mut extraction);

        if extraction.value_count() == 0 {
            warnings.push(
                ExtractWarning::new(
                    WarningCode::NoFieldsExtracted,
                    format!("no values extracted for {page_type}"),
                )
                .with_page(page.page_number),
            );
        }

        outcome.extraction = Some(extraction);
        outcome
    }

    /// Runs every selected page in order and summarizes the document.
    pub fn process_document(
        &mut self,
        pages: &[PageText],
    ) -> Result<ExtractionReport, ExtractError> {
        let selected = pages
            .iter()
            .filter(|page| {
                self.options
                    .pages
                    .as_ref()
                    .is_none_or(|selection| selection.contains(page.page_number))
            })
            .collect::<Vec<_>>();
        if selected.is_empty() {
            return Err(ExtractError::NoPagesSelected);
        }

        let mut warnings = Vec::new();
        let outcomes = selected
            .into_iter()
            .map(|page| self.process_page(page, &mut warnings))
            .collect::<Vec<_>>();

        let extracted = outcomes
            .iter()
            .filter_map(|outcome| outcome.extraction.as_ref())
            .collect::<Vec<_>>();

        Ok(ExtractionReport {
            page_count: outcomes.len(),
            extracted_pages: extracted.len(),
            field_count: extracted.iter().map(|extraction| extraction.value_count()).sum(),
            pages: outcomes,
            warnings,
        })
    }

    /// Empty headers take the latest value seen for the same page type;
    /// fresh values refresh the cache.
    fn persist_headers(
        &mut self,
        page_type: PageType,
        page_number: u32,
        extraction: &mut PageExtraction,
    ) {
        let cache = self.header_cache.entry(page_type).or_default();
        for field in &mut extraction.headers {
            if field.has_value() {
                let value = field.value.clone().unwrap_or_default();
                cache.insert(
                    field.name.clone(),
                    CachedHeader {
                        value,
                        confidence: field.confidence,
                        page: page_number,
                    },
                );
            } else if let Some(cached) = cache.get(&field.name) {
                debug!(field = %field.name, from_page = cached.page, "inherited header value");
                field.value = Some(cached.value.clone());
                field.confidence = cached.confidence;
                field.inherited_from_page = Some(cached.page);
            }
        }
    }
}

fn assign_priorities(template: &ExtractionTemplate, extraction: &mut PageExtraction) {
    let default_rules = ValidationRules::default();

    for field in extraction.headers.iter_mut().chain(extraction.footers.iter_mut()) {
        let rules = template.field_rules(&field.name).unwrap_or(&default_rules);
        field.priority = Some(review_priority(field.value.as_deref(), field.confidence, rules));
    }

    for row in extraction.rows_mut() {
        let rules = template
            .parameter_rows
            .iter()
            .find(|parameter| parameter.parameter == row.parameter)
            .map_or(&default_rules, |parameter| &parameter.rules);
        let value = row
            .result
            .clone()
            .or_else(|| Some(row.extracted.text()).filter(|text| !text.trim().is_empty()));
        row.priority = Some(review_priority(value.as_deref(), row.confidence, rules));
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::DocumentSession;
    use crate::error::ExtractError;
    use crate::model::PageText;
    use crate::options::{ExtractOptions, PageSelection};
    use crate::page_type::PageType;
    use crate::template::{ExtractionTemplate, TemplateRegistry};
    use crate::validation::ReviewPriority;
    use crate::warning::WarningCode;

    const QC_TEMPLATE: &str = r#"{
        "page_type": "QC_TEST_REPORT",
        "extraction_template": {
            "header_fields": {
                "BATCH_NO": {"label": "Batch No", "regex": "B\\d+"},
                "PRODUCT_NAME": "Product Name"
            },
            "test_parameters_table": [
                {"sr_no": 1, "parameter": "pH",
                 "validation_rules": {"type": "number", "min_value": 6, "max_value": 8}}
            ]
        }
    }"#;

    fn registry() -> TemplateRegistry {
        let (template, warnings) =
            ExtractionTemplate::from_json_str(QC_TEMPLATE, true).expect("template parses");
        assert!(warnings.is_empty(), "warnings: {warnings:?}");
        let mut registry = TemplateRegistry::new();
        registry.insert(template);
        registry
    }

    fn page(page_number: u32, text: &str) -> PageText {
        PageText {
            page_number,
            text: text.to_string(),
        }
    }

    fn qc_page(body: &str) -> String {
        format!("# Finished Good Q.C. Test Report for Speciality Chemicals\n{body}")
    }

    #[test]
    fn extracts_and_prioritizes_a_known_page() {
        let registry = registry();
        let mut session = DocumentSession::new(&registry, ExtractOptions::default());
        let text = qc_page(
            "Batch No: B12345\nProduct Name: Resin RL-5065\n\n\
             | Sr. No | Parameter | Result |\n|---|---|---|\n| 1 | pH | 7.1 |",
        );

        let mut warnings = Vec::new();
        let outcome = session.process_page(&page(1, &text), &mut warnings);
        assert!(warnings.is_empty(), "warnings: {warnings:?}");
        assert_eq!(outcome.classification.page_type, PageType::QcTestReport);

        let extraction = outcome.extraction.expect("page is extracted");
        let batch = extraction.header("BATCH_NO").expect("batch header");
        assert_eq!(batch.value.as_deref(), Some("B12345"));
        assert_eq!(batch.priority, Some(ReviewPriority::Green));
        assert_eq!(
            extraction.header("PRODUCT_NAME").and_then(|field| field.priority),
            Some(ReviewPriority::Yellow)
        );

        assert_eq!(extraction.rows.len(), 1);
        assert_eq!(extraction.rows[0].result.as_deref(), Some("7.1"));
        assert_eq!(extraction.rows[0].priority, Some(ReviewPriority::Yellow));
    }

    #[test]
    fn empty_header_inherits_from_earlier_page_of_same_type() {
        let registry = registry();
        let mut session = DocumentSession::new(&registry, ExtractOptions::default());
        let pages = vec![
            page(1, &qc_page("Batch No: B777\nProduct Name: Resin")),
            page(2, &qc_page("Product Name: Resin")),
        ];

        let report = session.process_document(&pages).expect("document processes");
        let second = report.pages[1].extraction.as_ref().expect("second page extracted");
        let batch = second.header("BATCH_NO").expect("batch header");
        assert_eq!(batch.value.as_deref(), Some("B777"));
        assert_eq!(batch.inherited_from_page, Some(1));
    }

    #[test]
    fn inheritance_can_be_switched_off() {
        let registry = registry();
        let options = ExtractOptions {
            inherit_headers: false,
            ..ExtractOptions::default()
        };
        let mut session = DocumentSession::new(&registry, options);
        let pages = vec![
            page(1, &qc_page("Batch No: B777")),
            page(2, &qc_page("Product Name: Resin")),
        ];

        let report = session.process_document(&pages).expect("document processes");
        let second = report.pages[1].extraction.as_ref().expect("second page extracted");
        assert_eq!(second.header("BATCH_NO").and_then(|field| field.value.clone()), None);
        assert_eq!(
            second.header("BATCH_NO").and_then(|field| field.priority),
            Some(ReviewPriority::Red)
        );
    }

    #[test]
    fn unknown_and_untemplated_pages_warn_without_failing() {
        let registry = registry();
        let mut session = DocumentSession::new(&registry, ExtractOptions::default());
        let pages = vec![
            page(1, "Random document text with no identifiable header"),
            page(2, "PRODUCTION REPORT\nShift: A"),
        ];

        let report = session.process_document(&pages).expect("document processes");
        assert_eq!(report.page_count, 2);
        assert_eq!(report.extracted_pages, 0);
        assert_eq!(report.field_count, 0);
        let codes = report.warnings.iter().map(|warning| warning.code).collect::<Vec<_>>();
        assert_eq!(codes, vec![WarningCode::UnknownPageType, WarningCode::MissingTemplate]);
        assert_eq!(report.warnings[1].page, Some(2));
    }

    #[test]
    fn selection_filters_pages_and_rejects_empty_result() {
        let registry = registry();
        let options = ExtractOptions {
            pages: Some("2".parse::<PageSelection>().expect("selection parses")),
            ..ExtractOptions::default()
        };
        let mut session = DocumentSession::new(&registry, options.clone());
        let pages = vec![page(1, &qc_page("Batch No: B1")), page(2, &qc_page("Batch No: B2"))];
        let report = session.process_document(&pages).expect("document processes");
        assert_eq!(report.page_count, 1);
        assert_eq!(report.pages[0].page_number, 2);

        let mut session = DocumentSession::new(&registry, options);
        let error = session
            .process_document(&pages[..1])
            .expect_err("nothing selected");
        assert!(matches!(error, ExtractError::NoPagesSelected));
    }
}
