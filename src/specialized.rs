//! Post-processing for page types whose layout defeats the generic template pass.

use std::cmp::Reverse;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::model::{
    CONFIDENCE_EMBEDDED, CONFIDENCE_LABEL_ONLY, ExtractedField, PageExtraction, RowExtraction,
    SourceConfig, TableRow,
};
use crate::page_type::PageType;
use crate::table_parse::extract_table_rows;

const CHECK_GLYPHS: [char; 2] = ['☑', '✓'];
const CHECKLIST_SKIP_WORDS: [&str; 2] = ["review points", "attachments"];
const PACKING_SUBHEADER_WORDS: [&str; 4] = ["net wet =", "gross wet =", "drum no", "tare wt"];
const MIN_POINT_CHARS: usize = 5;
const POINT_SUMMARY_CHARS: usize = 50;

static PRODUCT_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Name\s*of\s*Product\s*[:\-]*\s*(.*?)\s*(?:Batch|$)")
        .expect("product name pattern is valid")
});
static BATCH_NO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Batch\s*No\.?\s*[:\-]*\s*(.*)").expect("batch number pattern is valid")
});
static TOTAL_QTY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Total\s*Qty\s*[:\-]*\s*(.*?)\s*(?:Tare|$)")
        .expect("total quantity pattern is valid")
});
static TARE_WT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Tare\s*We?t\.?\s*[:\-]*\s*(.*)").expect("tare weight pattern is valid")
});
static BALANCE_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Balance\s*ID\.?\s*(?:No\.?)?\s*[:\-]*\s*(.*?)\s*(?:Calibration|$)")
        .expect("balance id pattern is valid")
});
static CALIBRATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Calibration\s*status\s*[:\-]*\s*(.*)")
        .expect("calibration status pattern is valid")
});
static PAGE_INFO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Page\s*No\.?[\s\-:]*(\d+\s*of\s*\d+)").expect("page info pattern is valid")
});
static REF_BMR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Ref\.\s*BMR\s*No\.?\s*[:\-]*\s*([\w\-.]+)")
        .expect("reference BMR pattern is valid")
});
static DOCUMENT_NO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)DOCUMENT\s*NO\.?\s*\|\s*([\w\-/]+)").expect("document number pattern is valid")
});

/// Header fields OCR places inside table cells on packing pages.
struct EmbeddedGroup {
    trigger: &'static str,
    fields: [(&'static str, &'static LazyLock<Regex>); 2],
}

static EMBEDDED_GROUPS: [EmbeddedGroup; 3] = [
    EmbeddedGroup {
        trigger: "name of product",
        fields: [("PRODUCT_NAME", &PRODUCT_NAME_RE), ("BATCH_NO", &BATCH_NO_RE)],
    },
    EmbeddedGroup {
        trigger: "total qty",
        fields: [("TOTAL_QTY", &TOTAL_QTY_RE), ("TARE_WT", &TARE_WT_RE)],
    },
    EmbeddedGroup {
        trigger: "balance id",
        fields: [("BALANCE_ID", &BALANCE_ID_RE), ("CALIBRATION_STATUS", &CALIBRATION_RE)],
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecklistStatus {
    Yes,
    No,
    NotApplicable,
    CheckedUnknownColumn,
    Pending,
}

impl ChecklistStatus {
    /// Status from the column holding the checkmark in a `Sr | Point | Yes | No | NA` row.
    #[must_use]
    pub fn from_column(column: Option<usize>) -> Self {
        match column {
            Some(2) => Self::Yes,
            Some(3) => Self::No,
            Some(4) => Self::NotApplicable,
            Some(_) => Self::CheckedUnknownColumn,
            None => Self::Pending,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Yes => "Yes",
            Self::No => "No",
            Self::NotApplicable => "NA",
            Self::CheckedUnknownColumn => "Checked (Unknown Col)",
            Self::Pending => "Pending",
        }
    }
}

/// Runs the variant-specific pass for `page_type`, if it has one.
pub fn post_process(page_type: PageType, markdown: &str, extraction: &mut PageExtraction) {
    match page_type {
        PageType::PackingDetails => packing_details(markdown, extraction),
        PageType::BmrChecklist => checklist(markdown, extraction),
        _ => {}
    }
}

fn source_rows(markdown: &str, extraction: &PageExtraction) -> Vec<TableRow> {
    if extraction.rows.is_empty() {
        extract_table_rows(markdown, None)
    } else {
        extraction.rows.iter().map(|row| row.extracted.clone()).collect()
    }
}

fn embedded(name: &str, value: &str) -> ExtractedField {
    ExtractedField::new(
        name,
        Some(value.to_string()),
        CONFIDENCE_EMBEDDED,
        SourceConfig::Embedded {
            key: name.to_string(),
        },
    )
}

fn has_value(extraction: &PageExtraction, name: &str) -> bool {
    extraction.header(name).is_some_and(ExtractedField::has_value)
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|captures| captures.get(1))
        .map(|value| value.as_str().trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Pulls header fields out of table cells and keeps the remaining rows as packing entries.
fn packing_details(markdown: &str, extraction: &mut PageExtraction) {
    let mut body = Vec::new();

    for row in source_rows(markdown, extraction) {
        let row_text = row.values().collect::<Vec<_>>().join(" ");
        let lowered = row_text.to_lowercase();
        let mut consumed = false;

        for group in EMBEDDED_GROUPS.iter().filter(|group| lowered.contains(group.trigger)) {
            consumed = true;
            for cell in row.values().filter(|cell| cell.to_lowercase().contains(group.trigger)) {
                for (name, re) in &group.fields {
                    if let Some(value) = capture(re, cell) {
                        debug!(field = name, value = %value, "embedded header found");
                        extraction.set_header(embedded(name, &value));
                    }
                }
            }
        }

        if lowered.contains("page no")
            && !has_value(extraction, "PAGE_INFO")
            && let Some(value) = capture(&PAGE_INFO_RE, &row_text)
        {
            extraction.set_header(embedded("PAGE_INFO", &value));
        }
        if lowered.contains("ref. bmr no")
            && !has_value(extraction, "REF_BMR_NO")
            && let Some(value) = capture(&REF_BMR_RE, &row_text)
        {
            extraction.set_header(embedded("REF_BMR_NO", &value));
        }

        if consumed || PACKING_SUBHEADER_WORDS.iter().any(|word| lowered.contains(word)) {
            continue;
        }
        body.push(RowExtraction::new("Packing Entry", row, CONFIDENCE_LABEL_ONLY));
    }

    extraction.rows = body;
    extraction.extract_all_columns = true;
}

/// Turns checkmark positions into a tri-state status per review point.
fn checklist(markdown: &str, extraction: &mut PageExtraction) {
    if !has_value(extraction, "DOCUMENT_NO")
        && let Some(value) = capture(&DOCUMENT_NO_RE, markdown)
    {
        extraction.set_header(embedded("DOCUMENT_NO", &value));
    }

    let mut points = Vec::new();
    for row in source_rows(markdown, extraction) {
        let lowered = row.text().to_lowercase();
        if CHECKLIST_SKIP_WORDS.iter().any(|word| lowered.contains(word)) {
            continue;
        }

        let values = row.values().map(str::trim).collect::<Vec<_>>();
        let Some(point) = values
            .iter()
            .copied()
            .min_by_key(|value| Reverse(value.chars().count()))
            .filter(|value| {
                value.chars().count() > MIN_POINT_CHARS && !value.contains(CHECK_GLYPHS)
            })
        else {
            continue;
        };

        let checked_column = values
            .iter()
            .position(|value| value.contains(CHECK_GLYPHS));
        let status = ChecklistStatus::from_column(checked_column);

        let mut checked = TableRow::new(row.table_name.clone());
        checked.insert("Point", point);
        checked.insert("Status", status.as_str());
        let mut entry = RowExtraction::new(summary(point), checked, CONFIDENCE_LABEL_ONLY);
        entry.result_column = Some("Status".to_string());
        entry.result = Some(status.as_str().to_string());
        points.push(entry);
    }

    extraction.rows = points;
}

fn summary(point: &str) -> String {
    let flat = point.replace('\n', " ");
    let flat = flat.trim();
    if flat.chars().count() > POINT_SUMMARY_CHARS {
        let head = flat.chars().take(POINT_SUMMARY_CHARS).collect::<String>();
        format!("{}...", head.trim_end())
    } else {
        flat.to_string()
    }
}
