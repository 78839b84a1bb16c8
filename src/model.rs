use serde::Serialize;

use crate::page_type::PageType;
use crate::validation::ReviewPriority;

/// Label matched and the value passed its validation regex.
pub const CONFIDENCE_LABEL_AND_REGEX: f32 = 0.95;
/// Header recovered from inside a table cell by a specialized variant.
pub const CONFIDENCE_EMBEDDED: f32 = 0.90;
/// Label matched, no validation regex configured.
pub const CONFIDENCE_LABEL_ONLY: f32 = 0.80;
/// No label matched; the validation regex alone found a value.
pub const CONFIDENCE_REGEX_ONLY: f32 = 0.70;
/// Footer value recovered by scanning parsed table cells.
pub const CONFIDENCE_TABLE_FALLBACK: f32 = 0.60;
pub const CONFIDENCE_NONE: f32 = 0.0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageText {
    pub page_number: u32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub page_type: PageType,
    pub page_num: Option<u32>,
    pub total_pages: Option<u32>,
    pub score: f32,
    pub matched_line: Option<String>,
}

impl ClassificationResult {
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            page_type: PageType::Unknown,
            page_num: None,
            total_pages: None,
            score: 0.0,
            matched_line: None,
        }
    }
}

/// One parsed markdown table row: cells keyed by column name, in column order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableRow {
    cells: Vec<(String, String)>,
    /// Nearest markdown heading above the table the row came from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
}

impl TableRow {
    #[must_use]
    pub fn new(table_name: Option<String>) -> Self {
        Self {
            cells: Vec::new(),
            table_name,
        }
    }

    /// Inserts a cell; a repeated column name keeps its position and takes the new value.
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<String>) {
        let column = column.into();
        let value = value.into();
        if let Some(existing) = self.cells.iter_mut().find(|(name, _)| *name == column) {
            existing.1 = value;
        } else {
            self.cells.push((column, value));
        }
    }

    #[must_use]
    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(name, _)| name.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cells
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// All cell values joined by a space.
    #[must_use]
    pub fn text(&self) -> String {
        self.values().collect::<Vec<_>>().join(" ")
    }

    /// Column used as the row's parameter label: the second column when present.
    #[must_use]
    pub fn parameter_label(&self) -> Option<&str> {
        self.cells
            .get(1)
            .or_else(|| self.cells.first())
            .map(|(_, value)| value.as_str())
    }
}

/// Where a leaf value came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    Field {
        labels: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        regex: Option<String>,
    },
    TableFallback {
        label: String,
    },
    Embedded {
        key: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedField {
    pub name: String,
    pub value: Option<String>,
    pub confidence: f32,
    pub source: SourceConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inherited_from_page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<ReviewPriority>,
}

impl ExtractedField {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        value: Option<String>,
        confidence: f32,
        source: SourceConfig,
    ) -> Self {
        Self {
            name: name.into(),
            value,
            confidence,
            source,
            inherited_from_page: None,
            priority: None,
        }
    }

    #[must_use]
    pub fn has_value(&self) -> bool {
        self.value.as_deref().is_some_and(|value| !value.trim().is_empty())
    }
}

/// Result of one field extraction call.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMatch {
    pub value: Option<String>,
    /// Byte offset just past the consumed text; unchanged when nothing matched.
    pub end_pos: usize,
    pub confidence: f32,
}

impl FieldMatch {
    #[must_use]
    pub fn none(start_pos: usize) -> Self {
        Self {
            value: None,
            end_pos: start_pos,
            confidence: CONFIDENCE_NONE,
        }
    }
}

/// A table row paired with the template parameter it was matched to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowExtraction {
    pub parameter: String,
    pub extracted: TableRow,
    /// Column the result was read from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_column: Option<String>,
    /// Value of the row's result column, when one could be identified.
    pub result: Option<String>,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<ReviewPriority>,
}

impl RowExtraction {
    #[must_use]
    pub fn new(parameter: impl Into<String>, extracted: TableRow, confidence: f32) -> Self {
        Self {
            parameter: parameter.into(),
            extracted,
            result_column: None,
            result: None,
            confidence,
            priority: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamedTable {
    pub name: String,
    pub rows: Vec<RowExtraction>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PageExtraction {
    pub headers: Vec<ExtractedField>,
    pub tables: Vec<NamedTable>,
    /// Rows of the single-table template format.
    pub rows: Vec<RowExtraction>,
    pub footers: Vec<ExtractedField>,
    /// Single-table rows export every non-empty cell instead of the result alone.
    #[serde(skip)]
    pub extract_all_columns: bool,
}

impl PageExtraction {
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&ExtractedField> {
        self.headers.iter().find(|field| field.name == name)
    }

    #[must_use]
    pub fn footer(&self, name: &str) -> Option<&ExtractedField> {
        self.footers.iter().find(|field| field.name == name)
    }

    #[must_use]
    pub fn table(&self, name: &str) -> Option<&NamedTable> {
        self.tables.iter().find(|table| table.name == name)
    }

    /// Replaces a header with the same name or appends a new one.
    pub fn set_header(&mut self, field: ExtractedField) {
        if let Some(existing) = self.headers.iter_mut().find(|header| header.name == field.name) {
            *existing = field;
        } else {
            self.headers.push(field);
        }
    }

    /// Legacy rows followed by the rows of every named table.
    pub fn all_rows(&self) -> impl Iterator<Item = &RowExtraction> {
        self.rows
            .iter()
            .chain(self.tables.iter().flat_map(|table| table.rows.iter()))
    }

    /// Header, footer and row leaves that carry a non-empty value.
    #[must_use]
    pub fn value_count(&self) -> usize {
        self.headers.iter().filter(|field| field.has_value()).count()
            + self.footers.iter().filter(|field| field.has_value()).count()
            + self.all_rows().filter(|row| !row.extracted.is_empty()).count()
    }

    pub fn rows_mut(&mut self) -> impl Iterator<Item = &mut RowExtraction> {
        self.rows
            .iter_mut()
            .chain(self.tables.iter_mut().flat_map(|table| table.rows.iter_mut()))
    }
}

#[cfg(test)]
mod tests {
    use super::TableRow;

    #[test]
    fn repeated_column_keeps_position_and_last_value() {
        let mut row = TableRow::new(Some("Results".to_string()));
        row.insert("Sr. No", "1");
        row.insert("Result", "first");
        row.insert("Result", "second");

        assert_eq!(row.columns().collect::<Vec<_>>(), vec!["Sr. No", "Result"]);
        assert_eq!(row.get("Result"), Some("second"));
        assert_eq!(row.parameter_label(), Some("second"));
    }

    #[test]
    fn parameter_label_falls_back_to_single_column() {
        let mut row = TableRow::new(None);
        row.insert("Only", "value");
        assert_eq!(row.parameter_label(), Some("value"));
        assert_eq!(TableRow::default().parameter_label(), None);
    }
}
