use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::ExtractError;
use crate::model::PageText;
use crate::options::PageSelection;

const PAGE_BREAK: char = '\u{000C}';

/// Reads a document's OCR pages.
///
/// A directory yields one page per `*.md` file, ordered by the trailing number
/// in the file stem (`page_12.md` is page 12). A plain file is split on
/// form-feed characters and numbered from 1.
pub fn load_pages(
    path: &Path,
    selection: Option<&PageSelection>,
) -> Result<Vec<PageText>, ExtractError> {
    let pages = if path.is_dir() {
        pages_from_dir(path)?
    } else {
        split_pages(&fs::read_to_string(path)?)
    };
    debug!(path = %path.display(), pages = pages.len(), "loaded pages");

    Ok(match selection {
        Some(selection) => pages
            .into_iter()
            .filter(|page| selection.contains(page.page_number))
            .collect(),
        None => pages,
    })
}

fn pages_from_dir(dir: &Path) -> Result<Vec<PageText>, ExtractError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|extension| extension.eq_ignore_ascii_case("md")) {
            files.push(path);
        }
    }
    files.sort();

    let mut numbered = files
        .into_iter()
        .enumerate()
        .map(|(position, path)| {
            let fallback = u32::try_from(position + 1).unwrap_or(u32::MAX);
            (trailing_number(&path).unwrap_or(fallback), path)
        })
        .collect::<Vec<(u32, PathBuf)>>();
    numbered.sort_by_key(|(number, _)| *number);

    numbered
        .into_iter()
        .map(|(page_number, path)| {
            Ok(PageText {
                page_number,
                text: fs::read_to_string(&path)?,
            })
        })
        .collect()
}

fn trailing_number(path: &Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?;
    let digits_start = stem
        .char_indices()
        .rev()
        .take_while(|(_, ch)| ch.is_ascii_digit())
        .last()
        .map(|(index, _)| index)?;
    stem[digits_start..].parse().ok()
}

/// Splits form-feed separated text into pages numbered from 1.
#[must_use]
pub fn split_pages(text: &str) -> Vec<PageText> {
    let mut parts = text.split(PAGE_BREAK).collect::<Vec<_>>();
    if parts.len() > 1 && parts.last().is_some_and(|part| part.trim().is_empty()) {
        parts.pop();
    }

    parts
        .into_iter()
        .zip(1..)
        .map(|(text, page_number)| PageText {
            page_number,
            text: text.to_string(),
        })
        .collect()
}
