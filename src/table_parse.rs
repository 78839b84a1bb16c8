use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::model::TableRow;
use crate::template::TableConfig;

const DEFAULT_INDEX_KEYWORDS: [&str; 2] = ["sr. no", "index"];
const DEFAULT_HEADER_KEYWORDS: [&str; 3] = ["parameter", "test", "field"];

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#+\s*(.*)$").expect("heading pattern is valid"));
static SEPARATOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\|[\s:|]*-[\s\-:|]*\|$").expect("separator pattern is valid")
});
static INDEX_CELL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\)?\s*$").expect("index cell pattern is valid"));

/// Parses every pipe table in `markdown` into rows keyed by header name.
///
/// Wrapped continuation lines are merged back into the row they belong to,
/// a mid-table row that looks like a header (index keyword plus header
/// keyword) redefines the columns once per table, and each row is tagged
/// with the nearest markdown heading above its table.
#[must_use]
pub fn extract_table_rows(markdown: &str, config: Option<&TableConfig>) -> Vec<TableRow> {
    let (index_keywords, header_keywords) = match config {
        Some(config) => (
            lowercase_all(&config.index_column_keywords),
            lowercase_all(&config.header_identifier_keywords),
        ),
        None => (
            DEFAULT_INDEX_KEYWORDS.iter().map(ToString::to_string).collect(),
            DEFAULT_HEADER_KEYWORDS.iter().map(ToString::to_string).collect(),
        ),
    };

    let lines = markdown.lines().collect::<Vec<_>>();
    let mut scanner = TableScanner::new(index_keywords, header_keywords);

    for (index, line) in lines.iter().enumerate() {
        let next = lines.get(index + 1).copied();
        scanner.feed(index, line, index.checked_sub(1).map(|prev| lines[prev]), next);
    }

    scanner.finish()
}

fn lowercase_all(keywords: &[String]) -> Vec<String> {
    keywords.iter().map(|keyword| keyword.to_lowercase()).collect()
}

struct BufferedRow {
    cells: Vec<String>,
    line: usize,
}

struct TableScanner {
    index_keywords: Vec<String>,
    header_keywords: Vec<String>,
    rows: Vec<TableRow>,
    header: Vec<String>,
    buffered: Vec<BufferedRow>,
    in_table: bool,
    repromoted: bool,
    section: Option<String>,
    table_section: Option<String>,
}

impl TableScanner {
    fn new(index_keywords: Vec<String>, header_keywords: Vec<String>) -> Self {
        Self {
            index_keywords,
            header_keywords,
            rows: Vec::new(),
            header: Vec::new(),
            buffered: Vec::new(),
            in_table: false,
            repromoted: false,
            section: None,
            table_section: None,
        }
    }

    fn feed(&mut self, index: usize, line: &str, previous: Option<&str>, next: Option<&str>) {
        let trimmed = line.trim();

        if let Some(captures) = HEADING_RE.captures(trimmed) {
            let heading = captures[1].trim();
            self.section = (!heading.is_empty()).then(|| heading.to_string());
        }

        let is_pipe = trimmed.contains('|');

        if SEPARATOR_RE.is_match(trimmed)
            && let Some(previous) = previous.filter(|previous| previous.contains('|'))
        {
            // Inside a running table the header line was buffered as data.
            if self.buffered.last().is_some_and(|row| row.line + 1 == index) {
                self.buffered.pop();
            }
            self.flush();
            self.start_table(header_cells(previous));
            return;
        }

        if !self.in_table
            && is_pipe
            && trimmed.matches('|').count() >= 2
            && next.is_some_and(|next| next.trim().matches('|').count() >= 2)
            && trimmed.split('|').any(|cell| !cell.trim().is_empty())
        {
            self.start_table(header_cells(line));
            return;
        }

        if !self.in_table {
            return;
        }

        if is_pipe {
            self.table_line(index, trimmed);
        } else if trimmed.is_empty() && !self.buffered.is_empty() {
            if next.is_some_and(|next| !next.contains('|')) {
                self.end_table();
            }
        } else {
            self.end_table();
        }
    }

    fn table_line(&mut self, index: usize, trimmed: &str) {
        let mut cells = split_cells(trimmed);
        let expected = self.header.len();

        if !trimmed.starts_with('|')
            && expected > 0
            && let Some(previous) = self.buffered.last_mut()
        {
            if previous.cells.len() == expected && cells.len() < expected {
                append_to_last(&mut previous.cells, &cells.join(" "));
                return;
            }

            if previous.cells.len() < expected && !cells.is_empty() {
                if !cells[0].is_empty() && !INDEX_CELL_RE.is_match(&cells[0]) {
                    let first = cells.remove(0);
                    append_to_last(&mut previous.cells, &first);
                }
                previous.cells.extend(cells);
                return;
            }
        }

        if self.looks_like_header(&cells) {
            if self.repromoted {
                debug!(
                    row = %cells.join(" | "),
                    "header-like row kept as data after one re-promotion"
                );
            } else {
                self.flush();
                self.header = name_columns(&cells);
                self.repromoted = true;
                debug!(headers = ?self.header, "promoted row to headers");
                return;
            }
        }

        self.buffered.push(BufferedRow { cells, line: index });
    }

    fn looks_like_header(&self, cells: &[String]) -> bool {
        let row_text = cells.join(" ").to_lowercase();
        self.index_keywords.iter().any(|keyword| row_text.contains(keyword.as_str()))
            && self
                .header_keywords
                .iter()
                .any(|keyword| row_text.contains(keyword.as_str()))
    }

    fn start_table(&mut self, header: Vec<String>) {
        debug!(headers = ?header, "detected table headers");
        self.header = header;
        self.in_table = true;
        self.repromoted = false;
        self.table_section.clone_from(&self.section);
    }

    fn end_table(&mut self) {
        self.flush();
        self.in_table = false;
        self.header.clear();
    }

    fn flush(&mut self) {
        if self.header.is_empty() {
            self.buffered.clear();
            return;
        }

        for buffered in self.buffered.drain(..) {
            let mut row = TableRow::new(self.table_section.clone());
            for (position, column) in self.header.iter().enumerate() {
                let value = buffered
                    .cells
                    .get(position)
                    .map(|cell| strip_emphasis(cell))
                    .unwrap_or_default();
                row.insert(column.clone(), value);
            }
            self.rows.push(row);
        }
    }

    fn finish(mut self) -> Vec<TableRow> {
        self.flush();
        debug!(rows = self.rows.len(), "extracted table rows");
        self.rows
    }
}

fn append_to_last(cells: &mut [String], text: &str) {
    if let Some(last) = cells.last_mut() {
        *last = format!("{last} {text}").trim().to_string();
    }
}

fn strip_emphasis(cell: &str) -> String {
    cell.replace('*', "").trim().to_string()
}

/// Splits a pipe row, dropping the empty cells produced by outer pipes.
pub(crate) fn split_cells(line: &str) -> Vec<String> {
    let mut cells = line
        .split('|')
        .map(|cell| cell.trim().to_string())
        .collect::<Vec<_>>();
    if cells.first().is_some_and(String::is_empty) {
        cells.remove(0);
    }
    if cells.last().is_some_and(String::is_empty) {
        cells.pop();
    }
    cells
}

fn header_cells(line: &str) -> Vec<String> {
    name_columns(&split_cells(line.trim()))
}

fn name_columns(cells: &[String]) -> Vec<String> {
    cells
        .iter()
        .enumerate()
        .map(|(position, cell)| {
            let name = strip_emphasis(cell);
            if name.is_empty() {
                format!("Col_{position}")
            } else {
                name
            }
        })
        .collect()
}
