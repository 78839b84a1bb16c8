use std::collections::HashMap;

use regex::{Regex, RegexBuilder};
use tracing::{debug, info};

use crate::field_extract::FieldExtractor;
use crate::fuzzy::{partial_ratio, ratio};
use crate::model::{
    CONFIDENCE_LABEL_ONLY, CONFIDENCE_NONE, CONFIDENCE_TABLE_FALLBACK, ExtractedField, NamedTable,
    PageExtraction, RowExtraction, SourceConfig, TableRow,
};
use crate::table_parse::extract_table_rows;
use crate::template::{ExtractionTemplate, RowFilter, TableConfig, TableSpec};

const SECTION_MATCH_THRESHOLD: f32 = 0.75;
const COLUMN_ALIAS_THRESHOLD: f32 = 0.70;
const MIN_COLUMN_OVERLAP: usize = 2;
const PARAMETER_MATCH_THRESHOLD: f32 = 0.85;
const EXPLICIT_COLUMN_BONUS: f32 = 0.05;
const SHORT_PARAMETER_CHARS: usize = 3;
const RESULT_COLUMN_THRESHOLD: f32 = 0.85;

const DEFAULT_PARAMETER_KEYWORDS: [&str; 2] = ["parameter", "test"];
const DEFAULT_RESULT_KEYWORDS: [&str; 2] = ["result", "value"];
const GENERIC_RESULT_WORDS: [&str; 4] = ["result", "value", "observation", "finding"];

/// Rows located through a table's headers count as label matches.
const ROW_CONFIDENCE: f32 = CONFIDENCE_LABEL_ONLY;

/// Applies one template to one page of OCR markdown.
///
/// Sections the template does not declare stay empty; nothing here fails.
#[must_use]
pub fn process(markdown: &str, template: &ExtractionTemplate) -> PageExtraction {
    let config = template.table_config.as_ref();
    let dynamic = config.is_some_and(|config| config.dynamic_rows);

    let mut extraction = PageExtraction {
        headers: extract_fields(markdown, &template.header_fields),
        extract_all_columns: config.is_some_and(|config| config.extract_all_columns),
        ..PageExtraction::default()
    };

    let needs_rows = !template.tables.is_empty()
        || !template.parameter_rows.is_empty()
        || dynamic
        || !template.footer_fields.is_empty();
    let rows = if needs_rows {
        extract_table_rows(markdown, config)
    } else {
        Vec::new()
    };

    if !template.tables.is_empty() {
        extraction.tables = template
            .tables
            .iter()
            .map(|spec| named_table(spec, &rows))
            .collect();
    } else if dynamic || !template.parameter_rows.is_empty() {
        extraction.rows = legacy_rows(template, &rows);
    }

    let result_keywords = config.map_or_else(
        || DEFAULT_RESULT_KEYWORDS.iter().map(ToString::to_string).collect(),
        |config| lowercase_all(&config.result_column_keywords),
    );
    for row in extraction.rows_mut() {
        let result_label = template
            .parameter_rows
            .iter()
            .find(|parameter| parameter.parameter == row.parameter)
            .and_then(|parameter| parameter.result_label.as_deref());
        if let Some((column, value)) = result_cell(&row.extracted, result_label, &result_keywords) {
            row.result_column = Some(column);
            row.result = Some(value);
        }
    }

    extraction.footers = extract_footers(markdown, template, &rows);
    extraction
}

/// Runs one section's fields in declared order over a shared cursor.
fn extract_fields(markdown: &str, fields: &[FieldExtractor]) -> Vec<ExtractedField> {
    let mut cursor = 0;
    fields
        .iter()
        .map(|extractor| {
            let spec = extractor.spec();
            let found = extractor.extract(markdown, cursor);
            if found.value.is_some() {
                cursor = found.end_pos;
            }
            ExtractedField::new(spec.name.clone(), found.value, found.confidence, spec.source())
        })
        .collect()
}

fn extract_footers(
    markdown: &str,
    template: &ExtractionTemplate,
    rows: &[TableRow],
) -> Vec<ExtractedField> {
    let noise = template
        .noise_markers
        .iter()
        .filter(|marker| !marker.trim().is_empty())
        .filter_map(|marker| case_insensitive(marker))
        .collect::<Vec<_>>();

    let mut fields = extract_fields(markdown, &template.footer_fields);
    for (field, extractor) in fields.iter_mut().zip(&template.footer_fields) {
        if !field.has_value()
            && let Some((label, value)) = table_fallback(extractor.spec().labels(), rows)
        {
            debug!(field = %field.name, label = %label, "footer found in table cells");
            field.value = Some(value);
            field.confidence = CONFIDENCE_TABLE_FALLBACK;
            field.source = SourceConfig::TableFallback { label };
        }

        if let Some(value) = field.value.as_mut() {
            *value = clean_footer(value, &noise);
        }
    }
    fields
}

fn case_insensitive(text: &str) -> Option<Regex> {
    RegexBuilder::new(&regex::escape(text))
        .case_insensitive(true)
        .build()
        .ok()
}

/// Looks for a footer label in table headers, then inside cell text.
fn table_fallback(labels: &[String], rows: &[TableRow]) -> Option<(String, String)> {
    for label in labels {
        let Some(label_re) = case_insensitive(label) else {
            continue;
        };

        for row in rows {
            if let Some((_, value)) = row.iter().find(|(column, _)| label_re.is_match(column))
                && !value.trim().is_empty()
            {
                return Some((label.clone(), value.trim().to_string()));
            }

            if let Some((value, found)) = row
                .values()
                .find_map(|value| label_re.find(value).map(|found| (value, found)))
            {
                let tail = value[found.end()..].trim();
                if !tail.is_empty() {
                    return Some((label.clone(), tail.to_string()));
                }
            }
        }
    }
    None
}

fn clean_footer(value: &str, noise: &[Regex]) -> String {
    let mut cleaned = value
        .trim_start_matches([' ', ':', '-', '='])
        .trim()
        .to_string();
    for marker in noise {
        if let Some(found) = marker.find(&cleaned) {
            cleaned = cleaned[..found.start()].trim().to_string();
        }
    }
    cleaned
}

fn named_table(spec: &TableSpec, rows: &[TableRow]) -> NamedTable {
    let mut selected = match &spec.section_header {
        Some(header) => {
            let in_section = rows_in_section(header, rows);
            if in_section.is_empty() && !spec.column_mapping.is_empty() {
                debug!(table = %spec.name, "no section match, trying column overlap");
                rows_by_columns(&spec.column_mapping, rows)
            } else {
                in_section
            }
        }
        None => {
            let by_columns = rows_by_columns(&spec.column_mapping, rows);
            if by_columns.is_empty() {
                rows.to_vec()
            } else {
                by_columns
            }
        }
    };

    if !spec.column_mapping.is_empty() {
        selected = normalize_columns(selected, &spec.column_mapping);
    }
    selected.retain(|row| keep_row(row, &spec.row_filter));

    let rows = selected
        .into_iter()
        .map(|row| {
            let parameter = row.parameter_label().unwrap_or("Row").to_string();
            RowExtraction::new(parameter, row, ROW_CONFIDENCE)
        })
        .collect::<Vec<_>>();

    info!(table = %spec.name, rows = rows.len(), "table extracted");
    NamedTable {
        name: spec.name.clone(),
        rows,
    }
}

/// Rows from the first section whose heading matches, up to the next differently named section.
fn rows_in_section(header: &str, rows: &[TableRow]) -> Vec<TableRow> {
    let wanted = header.to_lowercase();
    let mut in_section = false;
    let mut selected = Vec::new();

    for row in rows {
        let section = row.table_name.as_deref().unwrap_or_default();
        if !section.is_empty() {
            if partial_ratio(&wanted, &section.to_lowercase()) > SECTION_MATCH_THRESHOLD {
                in_section = true;
            } else if in_section {
                break;
            }
        }
        if in_section {
            selected.push(row.clone());
        }
    }
    selected
}

fn rows_by_columns(mapping: &[(String, Vec<String>)], rows: &[TableRow]) -> Vec<TableRow> {
    let mut targets = mapping
        .iter()
        .flat_map(|(_, aliases)| aliases.iter().map(|alias| alias.to_lowercase()))
        .collect::<Vec<_>>();
    targets.sort();
    targets.dedup();

    rows.iter()
        .filter(|row| {
            let columns = row.columns().map(str::to_lowercase).collect::<Vec<_>>();
            let overlap = targets
                .iter()
                .filter(|target| {
                    columns
                        .iter()
                        .any(|column| ratio(target, column) > COLUMN_ALIAS_THRESHOLD)
                })
                .count();
            overlap >= MIN_COLUMN_OVERLAP
        })
        .cloned()
        .collect()
}

/// Renames observed columns to their best-matching canonical names.
fn normalize_columns(rows: Vec<TableRow>, mapping: &[(String, Vec<String>)]) -> Vec<TableRow> {
    let mut cache = HashMap::<String, String>::new();
    rows.into_iter()
        .map(|row| {
            let mut renamed = TableRow::new(row.table_name.clone());
            for (column, value) in row.iter() {
                let name = cache
                    .entry(column.to_string())
                    .or_insert_with(|| canonical_column(column, mapping))
                    .clone();
                renamed.insert(name, value);
            }
            renamed
        })
        .collect()
}

fn canonical_column(column: &str, mapping: &[(String, Vec<String>)]) -> String {
    let observed = column.to_lowercase();
    let mut best: Option<(f32, &str)> = None;
    for (canonical, aliases) in mapping {
        for alias in aliases {
            let score = ratio(&alias.to_lowercase(), &observed);
            if score > COLUMN_ALIAS_THRESHOLD && best.is_none_or(|(top, _)| score > top) {
                best = Some((score, canonical.as_str()));
            }
        }
    }
    best.map_or_else(|| column.to_string(), |(_, canonical)| canonical.to_string())
}

fn keep_row(row: &TableRow, filter: &RowFilter) -> bool {
    let text = row.text().to_lowercase();
    let excluded = filter
        .exclude_keywords
        .iter()
        .map(|keyword| keyword.trim().to_lowercase())
        .any(|keyword| !keyword.is_empty() && text.contains(&keyword));
    let complete = filter
        .required_columns
        .iter()
        .all(|column| row.get(column).is_some_and(|value| !value.trim().is_empty()));
    !excluded && complete
}

fn legacy_rows(template: &ExtractionTemplate, rows: &[TableRow]) -> Vec<RowExtraction> {
    let config = template.table_config.as_ref();
    let mapping = config.map(TableConfig::column_mapping).unwrap_or_default();
    let rows = if mapping.is_empty() {
        rows.to_vec()
    } else {
        normalize_columns(rows.to_vec(), &mapping)
    };

    if config.is_some_and(|config| config.dynamic_rows) {
        return rows
            .into_iter()
            .map(|row| {
                let parameter = row.parameter_label().unwrap_or("Row").to_string();
                RowExtraction::new(parameter, row, ROW_CONFIDENCE)
            })
            .collect();
    }

    let keywords = config.map_or_else(
        || DEFAULT_PARAMETER_KEYWORDS.iter().map(ToString::to_string).collect(),
        |config| lowercase_all(&config.parameter_column_keywords),
    );

    template
        .parameter_rows
        .iter()
        .map(|parameter| {
            let name = parameter.parameter.clone();
            match best_parameter_row(&parameter.parameter, &rows, &keywords) {
                Some(row) => RowExtraction::new(name, row.clone(), ROW_CONFIDENCE),
                None => {
                    debug!(parameter = %name, "no table row matched");
                    RowExtraction::new(name, TableRow::default(), CONFIDENCE_NONE)
                }
            }
        })
        .collect()
}

fn best_parameter_row<'a>(
    parameter: &str,
    rows: &'a [TableRow],
    keywords: &[String],
) -> Option<&'a TableRow> {
    let wanted = parameter.to_lowercase();
    let short = wanted.chars().count() <= SHORT_PARAMETER_CHARS;
    let mut best: Option<(f32, &TableRow)> = None;

    for row in rows {
        let explicit = row.iter().find(|(column, _)| {
            let column = column.to_lowercase();
            keywords.iter().any(|keyword| column.contains(keyword.as_str()))
        });
        let (value, bonus) = match explicit {
            Some((_, value)) => (value, EXPLICIT_COLUMN_BONUS),
            None => match row.iter().nth(1) {
                Some((_, value)) => (value, 0.0),
                None => continue,
            },
        };

        let value = value.to_lowercase();
        let similarity = if short {
            ratio(&wanted, &value)
        } else {
            partial_ratio(&wanted, &value)
        };
        let score = similarity + bonus;
        if score > PARAMETER_MATCH_THRESHOLD && best.is_none_or(|(top, _)| score > top) {
            best = Some((score, row));
        }
    }

    best.map(|(_, row)| row)
}

/// Picks the cell holding a row's result: the column named by the row's own
/// result label, then the best keyword-matching column, then any generically
/// named result column, then the last column.
fn result_cell(
    row: &TableRow,
    result_label: Option<&str>,
    keywords: &[String],
) -> Option<(String, String)> {
    let column = result_label
        .and_then(|label| best_column(row, &[label.to_lowercase()]))
        .or_else(|| best_column(row, keywords))
        .or_else(|| {
            row.columns().find(|column| {
                let lowered = column.to_lowercase();
                GENERIC_RESULT_WORDS.iter().any(|word| lowered.contains(word))
            })
        })
        .or_else(|| row.columns().last())?;
    row.get(column)
        .map(|value| (column.to_string(), value.to_string()))
}

fn best_column<'a>(row: &'a TableRow, wanted: &[String]) -> Option<&'a str> {
    let mut best: Option<(f32, &str)> = None;
    for column in row.columns() {
        let lowered = column.to_lowercase();
        for keyword in wanted {
            let score = partial_ratio(keyword, &lowered);
            if score > RESULT_COLUMN_THRESHOLD && best.is_none_or(|(top, _)| score > top) {
                best = Some((score, column));
            }
        }
    }
    best.map(|(_, column)| column)
}

fn lowercase_all(values: &[String]) -> Vec<String> {
    values.iter().map(|value| value.to_lowercase()).collect()
}

#[cfg(test)]
mod tests {
    use super::process;
    use crate::model::SourceConfig;
    use crate::template::ExtractionTemplate;

    fn template(json: &str) -> ExtractionTemplate {
        let (template, warnings) =
            ExtractionTemplate::from_json_str(json, true).expect("template should load");
        assert!(warnings.is_empty(), "warnings: {warnings:?}");
        template
    }

    const QC_PAGE: &str = "\
# Finished Good Q.C. Test Report for Speciality Chemicals
Product Name: Resin RL-5065 Batch No: B12345
Mfg Date: 03/01/26

| Sr. No | Parameter | Result |
|---|---|---|
| 1 | pH | 7.1 |
| 2 | Approved By J. Shah | |

Checked By: A. Rao Page 1 of 2";

    #[test]
    fn headers_share_cursor_and_footers_fall_back_to_tables() {
        let template = template(
            r#"{"page_type": "QC_TEST_REPORT", "extraction_template": {
                "header_fields": {
                    "PRODUCT": "Product Name",
                    "BATCH_NO": {"label": "Batch No", "regex": "B\\d+"},
                    "MFG_DATE": "Mfg Date"
                },
                "footer_fields": {
                    "CHECKED_BY": {"label": "Checked By"},
                    "APPROVED_BY": {"label": "Approved By"}
                },
                "noise_markers": ["Page"]}}"#,
        );
        let page = process(QC_PAGE, &template);

        let value = |name: &str| page.header(name).and_then(|field| field.value.clone());
        assert_eq!(value("PRODUCT").as_deref(), Some("Resin RL-5065"));
        assert_eq!(value("BATCH_NO").as_deref(), Some("B12345"));
        assert_eq!(value("MFG_DATE").as_deref(), Some("03/01/26"));
        assert!((page.header("BATCH_NO").expect("batch").confidence - 0.95).abs() < f32::EPSILON);

        let checked = page.footer("CHECKED_BY").expect("checked by");
        assert_eq!(checked.value.as_deref(), Some("A. Rao"));

        let approved = page.footer("APPROVED_BY").expect("approved by");
        assert_eq!(approved.value.as_deref(), Some("J. Shah"));
        assert!((approved.confidence - 0.60).abs() < f32::EPSILON);
        assert_eq!(
            approved.source,
            SourceConfig::TableFallback {
                label: "Approved By".to_string()
            }
        );
    }

    #[test]
    fn named_tables_match_by_section_or_columns() {
        let template = template(
            r#"{"page_type": "QC_TEST_REPORT", "extraction_template": {
                "tables": {
                    "results": {"section_header": "Test Results",
                                "column_mapping": {"parameter": ["Parameter", "Test"],
                                                   "result": ["Result", "Observed"]},
                                "row_filter": {"exclude_keywords": ["not tested"]}},
                    "packing": {"column_mapping": {"drum": ["Drum No", "Drum"],
                                                   "net": ["Net Wt", "Net Weight"]}}
                }}}"#,
        );
        let markdown = "\
## Test Results
| Sr. No | Test | Observed |
|---|---|---|
| 1 | pH | 7.1 |
| 2 | Colour | Not tested |

## Packing
| Drum | Net Wt |
|---|---|
| D1 | 200 |";
        let page = process(markdown, &template);

        let results = page.table("results").expect("results table");
        assert_eq!(results.rows.len(), 1);
        let row = &results.rows[0];
        assert_eq!(row.parameter, "pH");
        assert_eq!(
            row.extracted.columns().collect::<Vec<_>>(),
            vec!["Sr. No", "parameter", "result"]
        );
        assert_eq!(row.result.as_deref(), Some("7.1"));

        let packing = page.table("packing").expect("packing table");
        assert_eq!(packing.rows.len(), 1);
        assert_eq!(packing.rows[0].extracted.get("drum"), Some("D1"));
        assert_eq!(packing.rows[0].extracted.get("net"), Some("200"));
    }

    #[test]
    fn legacy_parameters_keep_declared_cardinality() {
        let template = template(
            r#"{"page_type": "QC_TEST_REPORT", "extraction_template": {
                "test_parameters_table": [
                    {"sr_no": 1, "parameter": "pH"},
                    {"sr_no": 2, "parameter": "Viscosity"},
                    {"sr_no": 3, "parameter": "Moisture"}
                ]}}"#,
        );
        let markdown = "\
| Sr. No | Parameter | Result |
|---|---|---|
| 1 | Appearance | Clear |
| 2 | Viscosity at 25 C | 80 CPS |
| 3 | pH | 7.1 |";
        let page = process(markdown, &template);

        assert_eq!(page.rows.len(), 3);
        assert_eq!(page.rows[0].extracted.get("Result"), Some("7.1"));
        assert_eq!(page.rows[1].result.as_deref(), Some("80 CPS"));
        assert!(page.rows[2].extracted.is_empty());
        assert_eq!(page.rows[2].result, None);
        assert!(page.rows[2].confidence.abs() < f32::EPSILON);
    }

    #[test]
    fn row_result_label_outranks_keywords_and_last_column() {
        let template = template(
            r#"{"page_type": "QC_TEST_REPORT", "extraction_template": {
                "test_parameters_table": [
                    {"sr_no": 1, "parameter": "pH", "result_label": "Reading"},
                    {"sr_no": 2, "parameter": "Viscosity"}
                ]}}"#,
        );
        let markdown = "\
| Sr. No | Parameter | Reading | Remarks |
|---|---|---|---|
| 1 | pH | 7.1 | Complies |
| 2 | Viscosity | 80 CPS | Complies |";
        let page = process(markdown, &template);

        assert_eq!(page.rows[0].result.as_deref(), Some("7.1"));
        assert_eq!(page.rows[0].result_column.as_deref(), Some("Reading"));
        assert_eq!(page.rows[1].result.as_deref(), Some("Complies"));
        assert!(!page.extract_all_columns);
    }

    #[test]
    fn extract_all_columns_is_carried_to_the_page() {
        let template = template(
            r#"{"page_type": "QC_TEST_REPORT", "extraction_template": {
                "test_parameters_table": [{"sr_no": 1, "parameter": "pH"}],
                "table_config": {"extract_all_columns": true}}}"#,
        );
        let markdown = "| Sr. No | Parameter | Result |\n|---|---|---|\n| 1 | pH | 7.1 |";
        let page = process(markdown, &template);

        assert!(page.extract_all_columns);
        assert_eq!(page.rows[0].result_column.as_deref(), Some("Result"));
        assert_eq!(page.rows[0].extracted.len(), 3);
    }

    #[test]
    fn dynamic_rows_emit_every_parsed_row() {
        let template = template(
            r#"{"page_type": "PRODUCTION_REPORT", "extraction_template": {
                "table_config": {"dynamic_rows": true}}}"#,
        );
        let markdown = "\
| Sr. No | Step | Time |
|---|---|---|
| 1 | Charge | 10:00 |
| 2 | Heat | 11:30 |";
        let page = process(markdown, &template);

        let parameters = page.rows.iter().map(|row| row.parameter.as_str()).collect::<Vec<_>>();
        assert_eq!(parameters, vec!["Charge", "Heat"]);
        assert_eq!(page.rows[1].result.as_deref(), Some("11:30"));
    }

    #[test]
    fn empty_template_gives_empty_extraction() {
        let template = template(r#"{"page_type": "SOP"}"#);
        let page = process("Standard Operating Procedure\nStep 1", &template);
        assert_eq!(page.value_count(), 0);
        assert!(page.headers.is_empty() && page.rows.is_empty() && page.footers.is_empty());
    }
}
