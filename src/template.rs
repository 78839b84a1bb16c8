//! Per-page-type extraction templates loaded from JSON.
//!
//! Templates are deserialized into loose shapes (unknown keys ignored,
//! declared key order kept) and then normalized once into compiled
//! [`FieldExtractor`]s so processing never re-inspects raw configuration.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::marker::PhantomData;
use std::path::Path;
use std::str::FromStr;

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ExtractError;
use crate::field_extract::{FieldExtractor, FieldSpec};
use crate::page_type::PageType;
use crate::validation::{FieldType, ValidationRules};
use crate::warning::{ExtractWarning, WarningCode};

/// JSON object whose entries keep their declared order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMap<T>(pub Vec<(String, T)>);

impl<T> Default for OrderedMap<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for OrderedMap<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for OrderedVisitor<T> {
            type Value = OrderedMap<T>;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, value)) = access.next_entry::<String, T>()? {
                    entries.push((key, value));
                }
                Ok(OrderedMap(entries))
            }
        }

        deserializer.deserialize_map(OrderedVisitor(PhantomData))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum RawLabels {
    One(String),
    Many(Vec<String>),
}

impl RawLabels {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(label) => vec![label],
            Self::Many(labels) => labels,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawRules {
    #[serde(rename = "type")]
    field_type: Option<String>,
    regex: Option<String>,
    min_value: Option<f64>,
    max_value: Option<f64>,
    expected_range: Option<Vec<f64>>,
    unit_allowed: Option<RawLabels>,
    format: Option<String>,
    allowed_values: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawFieldConfig {
    label: Option<String>,
    expected_label: Option<RawLabels>,
    regex: Option<String>,
    validation_rules: Option<RawRules>,
    validation: Option<RawRules>,
    #[serde(rename = "type")]
    field_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawFieldEntry {
    Label(String),
    Labels(Vec<String>),
    Config(RawFieldConfig),
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawTableSpec {
    section_header: Option<String>,
    column_mapping: Option<OrderedMap<RawLabels>>,
    row_filter: Option<RowFilter>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawParameterRow {
    sr_no: Option<u32>,
    parameter: String,
    result: Option<String>,
    observation_label: Option<String>,
    result_label: Option<String>,
    extracted_label: Option<String>,
    value_label: Option<String>,
    validation_rules: Option<RawRules>,
}

impl RawParameterRow {
    /// First non-blank of the row's result column labels.
    fn result_label(&self) -> Option<String> {
        [
            &self.observation_label,
            &self.result_label,
            &self.extracted_label,
            &self.value_label,
        ]
        .into_iter()
        .flatten()
        .find(|label| !label.trim().is_empty())
        .cloned()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawExtractionTemplate {
    header_fields: Option<OrderedMap<RawFieldEntry>>,
    tables: Option<OrderedMap<RawTableSpec>>,
    test_parameters_table: Option<Vec<RawParameterRow>>,
    table_config: Option<TableConfig>,
    footer_fields: Option<OrderedMap<RawFieldEntry>>,
    noise_markers: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawPageTemplate {
    page_type: String,
    extraction_template: Option<RawExtractionTemplate>,
}

/// Keyword lists steering table detection and legacy row matching.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TableConfig {
    pub parameter_column_keywords: Vec<String>,
    pub result_column_keywords: Vec<String>,
    pub index_column_keywords: Vec<String>,
    pub header_identifier_keywords: Vec<String>,
    /// Export every non-empty cell of a matched row, not only its result.
    pub extract_all_columns: bool,
    pub dynamic_rows: bool,
    #[serde(skip_serializing)]
    column_mapping: Option<OrderedMap<RawLabels>>,
    pub noise_markers: Vec<String>,
}

impl Default for TableConfig {
    fn default() -> Self {
        let words = |values: &[&str]| values.iter().map(ToString::to_string).collect::<Vec<_>>();
        Self {
            parameter_column_keywords: words(&["parameter", "test", "field"]),
            result_column_keywords: words(&["result", "value"]),
            index_column_keywords: words(&["sr. no", "index", "sl. no"]),
            header_identifier_keywords: words(&["parameter", "test", "field", "observation"]),
            extract_all_columns: false,
            dynamic_rows: false,
            column_mapping: None,
            noise_markers: Vec::new(),
        }
    }
}

impl TableConfig {
    /// Canonical column name to accepted header aliases, in declared order.
    #[must_use]
    pub fn column_mapping(&self) -> Vec<(String, Vec<String>)> {
        normalize_mapping(self.column_mapping.as_ref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RowFilter {
    /// Rows whose text contains any of these (case-insensitive) are dropped.
    pub exclude_keywords: Vec<String>,
    /// Canonical columns that must be present and non-empty.
    pub required_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableSpec {
    pub name: String,
    pub section_header: Option<String>,
    pub column_mapping: Vec<(String, Vec<String>)>,
    pub row_filter: RowFilter,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sr_no: Option<u32>,
    pub parameter: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Header of the column holding this row's result, matched fuzzily.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_label: Option<String>,
    pub rules: ValidationRules,
}

#[derive(Debug, Clone)]
pub struct ExtractionTemplate {
    pub page_type: PageType,
    pub header_fields: Vec<FieldExtractor>,
    pub tables: Vec<TableSpec>,
    pub parameter_rows: Vec<ParameterRow>,
    pub table_config: Option<TableConfig>,
    pub footer_fields: Vec<FieldExtractor>,
    pub noise_markers: Vec<String>,
}

impl ExtractionTemplate {
    /// Parses one template document. Malformed parts are reported as
    /// warnings and skipped unless `strict` is set.
    pub fn from_json_str(
        json: &str,
        strict: bool,
    ) -> Result<(Self, Vec<ExtractWarning>), ExtractError> {
        let raw: RawPageTemplate = serde_json::from_str(json)?;
        let page_type = PageType::from_str(&raw.page_type)?;
        let mut builder = TemplateBuilder {
            page_type,
            strict,
            warnings: Vec::new(),
        };
        let template = builder.build(raw.extraction_template.unwrap_or_default())?;
        Ok((template, builder.warnings))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.header_fields.is_empty()
            && self.tables.is_empty()
            && self.parameter_rows.is_empty()
            && self.footer_fields.is_empty()
            && !self.table_config.as_ref().is_some_and(|config| config.dynamic_rows)
    }

    /// Rules for a header or footer by field name.
    #[must_use]
    pub fn field_rules(&self, name: &str) -> Option<&ValidationRules> {
        self.header_fields
            .iter()
            .chain(&self.footer_fields)
            .map(FieldExtractor::spec)
            .find(|spec| spec.name == name)
            .map(|spec| &spec.rules)
    }
}

struct TemplateBuilder {
    page_type: PageType,
    strict: bool,
    warnings: Vec<ExtractWarning>,
}

impl TemplateBuilder {
    fn build(&mut self, raw: RawExtractionTemplate) -> Result<ExtractionTemplate, ExtractError> {
        let header_fields = self.section(raw.header_fields.unwrap_or_default(), false)?;
        let footer_fields = self.section(raw.footer_fields.unwrap_or_default(), true)?;

        let mut tables = Vec::new();
        for (name, spec) in raw.tables.unwrap_or_default().0 {
            let column_mapping = normalize_mapping(spec.column_mapping.as_ref());
            if spec.section_header.as_deref().is_none_or(|header| header.trim().is_empty())
                && column_mapping.is_empty()
            {
                self.malformed(&name, "table has neither a section header nor a column mapping")?;
                continue;
            }
            tables.push(TableSpec {
                name,
                section_header: spec.section_header.filter(|header| !header.trim().is_empty()),
                column_mapping,
                row_filter: spec.row_filter.unwrap_or_default(),
            });
        }

        let mut parameter_rows = Vec::new();
        for row in raw.test_parameters_table.unwrap_or_default() {
            if row.parameter.trim().is_empty() {
                self.malformed("test_parameters_table", "parameter row without a parameter name")?;
                continue;
            }
            let rules = self.rules(&row.parameter, row.validation_rules.as_ref(), None);
            let result_label = row.result_label();
            parameter_rows.push(ParameterRow {
                sr_no: row.sr_no,
                parameter: row.parameter,
                result: row.result,
                result_label,
                rules,
            });
        }

        let mut noise_markers = raw.noise_markers.unwrap_or_default();
        if let Some(config) = &raw.table_config {
            for marker in &config.noise_markers {
                if !noise_markers.contains(marker) {
                    noise_markers.push(marker.clone());
                }
            }
        }

        debug!(
            page_type = %self.page_type,
            headers = header_fields.len(),
            tables = tables.len(),
            parameters = parameter_rows.len(),
            footers = footer_fields.len(),
            "template normalized"
        );

        Ok(ExtractionTemplate {
            page_type: self.page_type,
            header_fields,
            tables,
            parameter_rows,
            table_config: raw.table_config,
            footer_fields,
            noise_markers,
        })
    }

    /// Normalizes one header or footer section; every label in the section
    /// bounds every field of it.
    fn section(
        &mut self,
        entries: OrderedMap<RawFieldEntry>,
        expand_lists: bool,
    ) -> Result<Vec<FieldExtractor>, ExtractError> {
        let mut specs = Vec::new();
        for (name, entry) in entries.0 {
            match entry {
                RawFieldEntry::Label(label) => specs.push(FieldSpec::new(name, [label])),
                RawFieldEntry::Labels(labels) if expand_lists => {
                    for (index, label) in labels.into_iter().enumerate() {
                        specs.push(FieldSpec::new(format!("{name}_{index}"), [label]));
                    }
                }
                RawFieldEntry::Labels(labels) => specs.push(FieldSpec::new(name, labels)),
                RawFieldEntry::Config(config) => {
                    if let Some(spec) = self.field_config(name, config)? {
                        specs.push(spec);
                    }
                }
            }
        }

        for spec in &specs {
            if spec.is_unusable() {
                self.malformed(&spec.name, "field has no label and no regex")?;
            }
        }

        let boundary_labels = specs
            .iter()
            .flat_map(|spec| spec.labels().iter().cloned())
            .collect::<Vec<_>>();

        Ok(specs
            .into_iter()
            .map(|spec| FieldExtractor::compile(spec, &boundary_labels))
            .collect())
    }

    fn field_config(
        &mut self,
        name: String,
        config: RawFieldConfig,
    ) -> Result<Option<FieldSpec>, ExtractError> {
        let mut labels = config.label.into_iter().collect::<Vec<_>>();
        labels.extend(config.expected_label.map(RawLabels::into_vec).unwrap_or_default());

        let rules_source = config.validation_rules.as_ref().or(config.validation.as_ref());
        let regex = config
            .regex
            .clone()
            .or_else(|| config.validation_rules.as_ref().and_then(|rules| rules.regex.clone()))
            .or_else(|| config.validation.as_ref().and_then(|rules| rules.regex.clone()))
            .filter(|pattern| !pattern.trim().is_empty());
        let rules = self.rules(&name, rules_source, config.field_type.as_deref());

        let spec = FieldSpec::new(name, labels).with_rules(rules);
        let Some(pattern) = regex else {
            return Ok(Some(spec));
        };

        let field_name = spec.name.clone();
        match spec.clone().with_regex(&pattern) {
            Ok(spec) => Ok(Some(spec)),
            Err(error) if self.strict => Err(error),
            Err(error) => {
                self.warn(
                    ExtractWarning::new(
                        WarningCode::MalformedTemplate,
                        format!("regex dropped: {error}"),
                    )
                    .with_field(field_name),
                );
                if spec.labels().is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(spec))
                }
            }
        }
    }

    fn rules(
        &mut self,
        name: &str,
        raw: Option<&RawRules>,
        field_type: Option<&str>,
    ) -> ValidationRules {
        let Some(raw) = raw else {
            return ValidationRules {
                field_type: self.field_type(name, field_type),
                ..ValidationRules::default()
            };
        };

        let (range_min, range_max) = match raw.expected_range.as_deref() {
            Some([min, max, ..]) => (Some(*min), Some(*max)),
            _ => (None, None),
        };

        ValidationRules {
            field_type: self.field_type(name, raw.field_type.as_deref().or(field_type)),
            min_value: raw.min_value.or(range_min),
            max_value: raw.max_value.or(range_max),
            unit_allowed: raw.unit_allowed.clone().map(RawLabels::into_vec).unwrap_or_default(),
            date_format: raw.format.clone(),
            allowed_values: raw.allowed_values.clone().unwrap_or_default(),
        }
    }

    fn field_type(&mut self, name: &str, value: Option<&str>) -> FieldType {
        match value.map(FieldType::from_str) {
            None => FieldType::String,
            Some(Ok(field_type)) => field_type,
            Some(Err(message)) => {
                self.warn(
                    ExtractWarning::new(
                        WarningCode::MalformedTemplate,
                        format!("{message}; treated as string"),
                    )
                    .with_field(name),
                );
                FieldType::String
            }
        }
    }

    fn malformed(&mut self, field: &str, message: &str) -> Result<(), ExtractError> {
        if self.strict {
            return Err(ExtractError::MalformedTemplate {
                page_type: self.page_type.to_string(),
                message: format!("{field}: {message}"),
            });
        }
        self.warn(ExtractWarning::new(WarningCode::MalformedTemplate, message).with_field(field));
        Ok(())
    }

    fn warn(&mut self, warning: ExtractWarning) {
        warn!(
            page_type = %self.page_type,
            field = warning.field.as_deref().unwrap_or_default(),
            "{}",
            warning.message
        );
        self.warnings.push(warning);
    }
}

fn normalize_mapping(mapping: Option<&OrderedMap<RawLabels>>) -> Vec<(String, Vec<String>)> {
    mapping
        .map(|mapping| {
            mapping
                .0
                .iter()
                .map(|(canonical, aliases)| (canonical.clone(), aliases.clone().into_vec()))
                .collect()
        })
        .unwrap_or_default()
}

/// Templates keyed by page type.
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: HashMap<PageType, ExtractionTemplate>,
}

impl TemplateRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every `*.json` file in `dir`. In lenient mode an unreadable or
    /// unparsable file becomes a warning; in strict mode it is an error.
    pub fn load_dir(dir: &Path, strict: bool) -> Result<(Self, Vec<ExtractWarning>), ExtractError> {
        let mut registry = Self::new();
        let mut warnings = Vec::new();

        let mut paths = fs::read_dir(dir)?
            .map(|entry| entry.map(|entry| entry.path()))
            .collect::<Result<Vec<_>, _>>()?;
        paths.retain(|path| path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json")));
        paths.sort();

        for path in paths {
            let loaded = fs::read_to_string(&path)
                .map_err(ExtractError::from)
                .and_then(|json| ExtractionTemplate::from_json_str(&json, strict));
            match loaded {
                Ok((template, template_warnings)) => {
                    debug!(
                        path = %path.display(),
                        page_type = %template.page_type,
                        "loaded template"
                    );
                    warnings.extend(template_warnings);
                    registry.insert(template);
                }
                Err(error) if strict => {
                    return Err(ExtractError::TemplateParse {
                        path,
                        message: error.to_string(),
                    });
                }
                Err(error) => {
                    warn!(path = %path.display(), error = %error, "template skipped");
                    warnings.push(ExtractWarning::new(
                        WarningCode::MalformedTemplate,
                        format!("{}: {error}", path.display()),
                    ));
                }
            }
        }

        Ok((registry, warnings))
    }

    /// Adds a template, replacing any earlier one for the same page type.
    pub fn insert(&mut self, template: ExtractionTemplate) {
        if self.templates.contains_key(&template.page_type) {
            warn!(page_type = %template.page_type, "duplicate template replaces earlier one");
        }
        self.templates.insert(template.page_type, template);
    }

    #[must_use]
    pub fn get(&self, page_type: PageType) -> Option<&ExtractionTemplate> {
        self.templates.get(&page_type)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{ExtractionTemplate, TemplateRegistry};
    use crate::page_type::PageType;
    use crate::validation::FieldType;
    use crate::warning::WarningCode;
    use std::fs;

    const QC_TEMPLATE: &str = r#"{
        "page_type": "QC_TEST_REPORT",
        "base_width": 1000,
        "extraction_template": {
            "header_fields": {
                "PRODUCT_NAME": "Product Name",
                "BATCH_NO": {"label": "Batch No", "expected_label": ["Batch Number"],
                             "validation_rules": {"type": "string", "regex": "B\\d+"}},
                "MFG_DATE": {"label": "Mfg. Date",
                             "validation_rules": {"type": "date", "format": "DD/MM/YY"}}
            },
            "tables": {
                "results": {"section_header": "Test Results",
                            "column_mapping": {"parameter": ["Parameter", "Test"],
                                               "result": ["Result"]}}
            },
            "footer_fields": {
                "CHECKED_BY": {"label": "Checked By"},
                "APPROVALS": ["Approved By", "Released By"]
            },
            "noise_markers": ["Page"]
        }
    }"#;

    #[test]
    fn parses_template_in_declared_order() {
        let (template, warnings) =
            ExtractionTemplate::from_json_str(QC_TEMPLATE, false).expect("template should parse");

        assert!(warnings.is_empty(), "warnings: {warnings:?}");
        assert_eq!(template.page_type, PageType::QcTestReport);
        let names = template
            .header_fields
            .iter()
            .map(|field| field.spec().name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["PRODUCT_NAME", "BATCH_NO", "MFG_DATE"]);

        let batch = template.header_fields[1].spec();
        assert_eq!(batch.labels(), ["Batch Number", "Batch No"]);
        assert_eq!(batch.regex(), Some(r"B\d+"));
        assert_eq!(
            template.field_rules("MFG_DATE").map(|rules| rules.field_type),
            Some(FieldType::Date)
        );
    }

    #[test]
    fn footer_lists_expand_to_numbered_fields() {
        let (template, _) =
            ExtractionTemplate::from_json_str(QC_TEMPLATE, false).expect("template should parse");
        let names = template
            .footer_fields
            .iter()
            .map(|field| field.spec().name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["CHECKED_BY", "APPROVALS_0", "APPROVALS_1"]);
        assert_eq!(template.tables[0].column_mapping[0].0, "parameter");
    }

    #[test]
    fn bad_regex_is_a_warning_unless_strict() {
        let json = r#"{"page_type": "BMR", "extraction_template": {
            "header_fields": {"BATCH_NO": {"label": "Batch No", "regex": "(B\\d+"}}}}"#;

        let (template, warnings) =
            ExtractionTemplate::from_json_str(json, false).expect("lenient load should succeed");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code, WarningCode::MalformedTemplate);
        assert_eq!(template.header_fields[0].spec().regex(), None);

        assert!(ExtractionTemplate::from_json_str(json, true).is_err());
    }

    #[test]
    fn unusable_entries_are_reported() {
        let json = r#"{"page_type": "SOP", "extraction_template": {
            "header_fields": {"EMPTY": {"label": ""}},
            "tables": {"nothing": {}}}}"#;
        let (template, warnings) =
            ExtractionTemplate::from_json_str(json, false).expect("lenient load should succeed");

        assert_eq!(warnings.len(), 2);
        assert!(template.tables.is_empty());
        assert_eq!(template.header_fields.len(), 1);
    }

    #[test]
    fn unknown_page_type_is_an_error() {
        let json = r#"{"page_type": "INVOICE"}"#;
        assert!(ExtractionTemplate::from_json_str(json, false).is_err());
    }

    #[test]
    fn table_config_defaults_fill_missing_keys() {
        let json = r#"{"page_type": "PRODUCTION_REPORT", "extraction_template": {
            "table_config": {"dynamic_rows": true, "future_option": 3}}}"#;
        let (template, _) =
            ExtractionTemplate::from_json_str(json, false).expect("template should parse");
        let config = template.table_config.as_ref().expect("table config should be kept");

        assert!(config.dynamic_rows);
        assert!(!config.extract_all_columns);
        assert_eq!(config.index_column_keywords, vec!["sr. no", "index", "sl. no"]);
        assert!(!template.is_empty());
    }

    #[test]
    fn parameter_rows_keep_their_first_result_label() {
        let json = r#"{"page_type": "QC_TEST_REPORT", "extraction_template": {
            "test_parameters_table": [
                {"parameter": "pH", "result_label": "Reading", "value_label": "Value"},
                {"parameter": "Appearance", "observation_label": " ",
                 "extracted_label": "Observed"},
                {"parameter": "Colour"}
            ],
            "table_config": {"extract_all_columns": true}}}"#;
        let (template, warnings) =
            ExtractionTemplate::from_json_str(json, true).expect("template should parse");

        assert!(warnings.is_empty(), "warnings: {warnings:?}");
        let labels = template
            .parameter_rows
            .iter()
            .map(|row| row.result_label.as_deref())
            .collect::<Vec<_>>();
        assert_eq!(labels, vec![Some("Reading"), Some("Observed"), None]);
        assert!(
            template
                .table_config
                .as_ref()
                .is_some_and(|config| config.extract_all_columns)
        );
    }

    #[test]
    fn load_dir_skips_broken_files_in_lenient_mode() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        fs::write(dir.path().join("qc.json"), QC_TEMPLATE).expect("write template");
        fs::write(dir.path().join("broken.json"), "{ not json").expect("write broken");
        fs::write(dir.path().join("notes.txt"), "ignored").expect("write notes");

        let (registry, warnings) =
            TemplateRegistry::load_dir(dir.path(), false).expect("lenient load should succeed");
        assert_eq!(registry.len(), 1);
        assert!(registry.get(PageType::QcTestReport).is_some());
        assert_eq!(warnings.len(), 1);

        assert!(TemplateRegistry::load_dir(dir.path(), true).is_err());
    }
}
