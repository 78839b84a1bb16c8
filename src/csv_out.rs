use std::fs;
use std::path::Path;

use csv::WriterBuilder;

use crate::error::ExtractError;
use crate::model::{ExtractedField, RowExtraction};
use crate::session::{ExtractionReport, PageOutcome};

pub const CSV_HEADERS: [&str; 9] = [
    "page",
    "page_type",
    "section",
    "table",
    "row",
    "field",
    "value",
    "confidence",
    "priority",
];

/// One record per leaf field of every extracted page.
fn leaf_records(report: &ExtractionReport) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    for outcome in &report.pages {
        let Some(extraction) = &outcome.extraction else {
            continue;
        };
        for field in &extraction.headers {
            records.push(field_record(outcome, "header", field));
        }
        for row in &extraction.rows {
            let table = row.extracted.table_name.clone().unwrap_or_default();
            if extraction.extract_all_columns {
                records.extend(cell_records(outcome, "rows", &table, row));
            } else {
                records.push(result_record(outcome, &table, row));
            }
        }
        for table in &extraction.tables {
            for row in &table.rows {
                records.extend(cell_records(outcome, "table", &table.name, row));
            }
        }
        for field in &extraction.footers {
            records.push(field_record(outcome, "footer", field));
        }
    }
    records
}

fn field_record(outcome: &PageOutcome, section: &str, field: &ExtractedField) -> Vec<String> {
    vec![
        outcome.page_number.to_string(),
        outcome.classification.page_type.to_string(),
        section.to_string(),
        String::new(),
        String::new(),
        field.name.clone(),
        field.value.clone().unwrap_or_default(),
        format!("{:.2}", field.confidence),
        field.priority.map(|priority| priority.as_str().to_string()).unwrap_or_default(),
    ]
}

fn row_record(
    outcome: &PageOutcome,
    section: &str,
    table: &str,
    row: &RowExtraction,
    column: &str,
    value: &str,
) -> Vec<String> {
    vec![
        outcome.page_number.to_string(),
        outcome.classification.page_type.to_string(),
        section.to_string(),
        table.to_string(),
        row.parameter.clone(),
        column.to_string(),
        value.to_string(),
        format!("{:.2}", row.confidence),
        row.priority.map(|priority| priority.as_str().to_string()).unwrap_or_default(),
    ]
}

/// The row's result cell; a row without one still gets an empty record.
fn result_record(outcome: &PageOutcome, table: &str, row: &RowExtraction) -> Vec<String> {
    row_record(
        outcome,
        "rows",
        table,
        row,
        row.result_column.as_deref().unwrap_or("result"),
        row.result.as_deref().unwrap_or_default(),
    )
}

/// One record per non-empty cell.
fn cell_records<'a>(
    outcome: &'a PageOutcome,
    section: &'a str,
    table: &'a str,
    row: &'a RowExtraction,
) -> impl Iterator<Item = Vec<String>> + 'a {
    row.extracted
        .iter()
        .filter(|(_, value)| !value.trim().is_empty())
        .map(move |(column, value)| row_record(outcome, section, table, row, column, value.trim()))
}

pub fn write_csv(
    path: &Path,
    report: &ExtractionReport,
    delimiter: u8,
) -> Result<(), ExtractError> {
    let mut writer = WriterBuilder::new().delimiter(delimiter).from_path(path)?;
    writer.write_record(CSV_HEADERS)?;
    for record in leaf_records(report) {
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_csv_to_string(
    report: &ExtractionReport,
    delimiter: u8,
) -> Result<String, ExtractError> {
    let mut writer = WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(Vec::<u8>::new());
    writer.write_record(CSV_HEADERS)?;
    for record in leaf_records(report) {
        writer.write_record(&record)?;
    }
    writer.flush()?;

    let bytes = writer
        .into_inner()
        .map_err(|error| ExtractError::Csv(error.into_error().into()))?;
    String::from_utf8(bytes)
        .map_err(|error| ExtractError::InvalidOption(format!("invalid utf-8 csv output: {error}")))
}

pub fn write_json(path: &Path, report: &ExtractionReport) -> Result<(), ExtractError> {
    fs::write(path, write_json_to_string(report)?)?;
    Ok(())
}

pub fn write_json_to_string(report: &ExtractionReport) -> Result<String, ExtractError> {
    Ok(serde_json::to_string_pretty(report)?)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{leaf_records, write_csv_to_string, write_json_to_string};
    use crate::model::{
        ClassificationResult, ExtractedField, PageExtraction, RowExtraction, SourceConfig, TableRow,
    };
    use crate::page_type::PageType;
    use crate::session::{ExtractionReport, PageOutcome};
    use crate::validation::ReviewPriority;

    fn report() -> ExtractionReport {
        let mut batch = ExtractedField::new(
            "BATCH_NO",
            Some("B12345".to_string()),
            0.95,
            SourceConfig::Field {
                labels: vec!["Batch No".to_string()],
                regex: Some(r"B\d+".to_string()),
            },
        );
        batch.priority = Some(ReviewPriority::Green);

        let mut cells = TableRow::new(Some("Results".to_string()));
        cells.insert("Parameter", "pH");
        cells.insert("Result", "7.1");
        cells.insert("Remarks", " ");
        let mut row = RowExtraction::new("pH", cells, 0.80);
        row.result_column = Some("Result".to_string());
        row.result = Some("7.1".to_string());
        row.priority = Some(ReviewPriority::Yellow);

        let classification = ClassificationResult {
            page_type: PageType::QcTestReport,
            page_num: Some(1),
            total_pages: Some(2),
            score: 1.0,
            matched_line: None,
        };

        ExtractionReport {
            page_count: 2,
            extracted_pages: 1,
            field_count: 2,
            pages: vec![
                PageOutcome {
                    page_number: 1,
                    classification: classification.clone(),
                    extraction: Some(PageExtraction {
                        headers: vec![batch],
                        rows: vec![row],
                        ..PageExtraction::default()
                    }),
                },
                PageOutcome {
                    page_number: 2,
                    classification,
                    extraction: None,
                },
            ],
            warnings: Vec::new(),
        }
    }

    #[test]
    fn one_record_per_leaf_field() {
        let records = leaf_records(&report());
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0],
            vec!["1", "QC_TEST_REPORT", "header", "", "", "BATCH_NO", "B12345", "0.95", "GREEN"]
        );
        assert_eq!(
            records[1],
            vec!["1", "QC_TEST_REPORT", "rows", "Results", "pH", "Result", "7.1", "0.80", "YELLOW"]
        );
    }

    #[test]
    fn all_columns_mode_emits_each_non_empty_cell() {
        let mut report = report();
        if let Some(extraction) = report.pages[0].extraction.as_mut() {
            extraction.extract_all_columns = true;
        }

        let fields = leaf_records(&report)
            .into_iter()
            .filter(|record| record[2] == "rows")
            .map(|record| (record[5].clone(), record[6].clone()))
            .collect::<Vec<_>>();
        assert_eq!(
            fields,
            vec![
                ("Parameter".to_string(), "pH".to_string()),
                ("Result".to_string(), "7.1".to_string()),
            ]
        );
    }

    #[test]
    fn csv_honours_delimiter() {
        let csv = write_csv_to_string(&report(), b';').expect("csv should render");
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("page;page_type;section;table;row;field;value;confidence;priority")
        );
        assert_eq!(lines.count(), 2);
    }

    #[test]
    fn json_report_omits_unextracted_pages_body() {
        let json = write_json_to_string(&report()).expect("json should render");
        let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
        assert_eq!(value["pages"][0]["extraction"]["headers"][0]["priority"], "GREEN");
        assert!(value["pages"][1].get("extraction").is_none());
    }
}
