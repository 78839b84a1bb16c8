use std::collections::BTreeSet;
use std::str::FromStr;

use crate::error::ExtractError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Csv,
    Json,
}

impl FromStr for OutputFormat {
    type Err = ExtractError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => Err(ExtractError::InvalidOption(format!(
                "unsupported output format '{other}', expected csv or json"
            ))),
        }
    }
}

/// Document pages to run, numbered from 1 in reading order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSelection {
    pages: BTreeSet<u32>,
}

impl PageSelection {
    #[must_use]
    pub fn contains(&self, page: u32) -> bool {
        self.pages.contains(&page)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

fn document_page(text: &str, token: &str) -> Result<u32, ExtractError> {
    let invalid = |reason: &str| ExtractError::InvalidPageSelection(format!("'{token}' {reason}"));
    let page = text
        .trim()
        .parse::<u32>()
        .map_err(|_| invalid("is not a page number"))?;
    if page == 0 {
        return Err(invalid("names page 0, document pages start at 1"));
    }
    Ok(page)
}

impl FromStr for PageSelection {
    type Err = ExtractError;

    /// Accepts comma separated pages and inclusive ranges, e.g. `1-3,5`.
    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let mut pages = BTreeSet::new();
        for token in spec
            .split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
        {
            match token.split_once('-') {
                Some((first, last)) => {
                    let first = document_page(first, token)?;
                    let last = document_page(last, token)?;
                    if last < first {
                        return Err(ExtractError::InvalidPageSelection(format!(
                            "range '{token}' runs backwards"
                        )));
                    }
                    pages.extend(first..=last);
                }
                None => {
                    pages.insert(document_page(token, token)?);
                }
            }
        }

        if pages.is_empty() {
            return Err(ExtractError::InvalidPageSelection(
                "no pages named".to_string(),
            ));
        }
        Ok(Self { pages })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractOptions {
    pub pages: Option<PageSelection>,
    /// Carry an empty header forward from the last page of the same type.
    pub inherit_headers: bool,
    pub strict_templates: bool,
    pub delimiter: u8,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            pages: None,
            inherit_headers: true,
            strict_templates: false,
            delimiter: b',',
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{OutputFormat, PageSelection};
    use crate::error::ExtractError;
    use std::str::FromStr;

    #[test]
    fn selection_mixes_ranges_and_single_pages() {
        let selection = PageSelection::from_str("1-3, 5,").expect("selection should parse");
        assert!(selection.contains(1));
        assert!(selection.contains(2));
        assert!(selection.contains(3));
        assert!(selection.contains(5));
        assert!(!selection.contains(4));
        assert!(!selection.is_empty());
    }

    #[test]
    fn bad_selections_report_the_offending_token() {
        let err = PageSelection::from_str("3-1").expect_err("backwards range should fail");
        assert!(matches!(err, ExtractError::InvalidPageSelection(_)));
        assert!(
            err.to_string().contains("'3-1' runs backwards"),
            "unexpected error: {err}"
        );

        let err = PageSelection::from_str("2,0").expect_err("page zero should fail");
        assert!(
            err.to_string().contains("start at 1"),
            "unexpected error: {err}"
        );

        let err = PageSelection::from_str("2-x").expect_err("non-number should fail");
        assert_eq!(
            err.to_string(),
            "invalid page selection: '2-x' is not a page number"
        );

        assert!(matches!(
            PageSelection::from_str(" , "),
            Err(ExtractError::InvalidPageSelection(_))
        ));
    }

    #[test]
    fn parse_output_format() {
        assert_eq!(OutputFormat::from_str("CSV").ok(), Some(OutputFormat::Csv));
        assert_eq!(OutputFormat::from_str(" json ").ok(), Some(OutputFormat::Json));
        assert!(matches!(
            OutputFormat::from_str("xml"),
            Err(ExtractError::InvalidOption(_))
        ));
    }
}
