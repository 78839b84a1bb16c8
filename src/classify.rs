//! Header-title page classifier with per-document history.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::fuzzy::partial_ratio;
use crate::model::ClassificationResult;
use crate::page_type::PageType;

pub const MATCH_THRESHOLD: f32 = 0.82;
pub const HEADER_SCAN_LINES: usize = 30;
pub const MIN_LINE_LEN: usize = 4;
/// Pages shorter than this never inherit the previous page's type.
pub const INHERIT_MIN_CHARS: usize = 100;
pub const EMAIL_SCORE: f32 = 0.85;
const EMAIL_TRIGGERS: [&str; 2] = ["mail.google.com", "rishabh metals"];
const EMAIL_POSITION_MARKER: &str = "MAIL.GOOGLE.COM";
const EMAIL_EDGE_LINES: usize = 5;
const EMAIL_TITLE: &str = "Email Signature";
const EMAIL_LINE_INDEX: usize = 99;
const PAGE_INFO_TOP_LINES: usize = 20;
const PAGE_INFO_BOTTOM_LINES: usize = 10;

static MARKDOWN_NOISE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[#*_>]+").expect("markdown noise pattern is valid"));

static PAGE_INFO_PATTERNS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r"PAGE\s*(?:NO\.:)?\s*(\d+)\s*OF\s*(\d+)").expect("page-of pattern is valid"),
        Regex::new(r"PAGE\s*(\d+)\s*/\s*(\d+)").expect("page-slash pattern is valid"),
        Regex::new(r"SHEET\s*NO\.:\s*(\d+)").expect("sheet pattern is valid"),
    ]
});

#[derive(Debug, Clone)]
struct Candidate {
    page_type: PageType,
    title_len: usize,
    score: f32,
    line: String,
    index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct PageInfo {
    page_num: Option<u32>,
    total_pages: Option<u32>,
}

fn normalize_for_match(value: &str) -> String {
    MARKDOWN_NOISE_RE
        .replace_all(value, " ")
        .trim()
        .to_lowercase()
        .replace(". ", ".")
        .replace('.', "")
}

/// Scores how well a page line matches a canonical header title, in `[0, 1]`.
///
/// Containment either way after normalization is an exact match; anything
/// else falls back to a partial (substring-tolerant) similarity.
#[must_use]
pub fn match_score(line: &str, title: &str) -> f32 {
    if line.trim().is_empty() || title.trim().is_empty() {
        return 0.0;
    }

    let line_norm = normalize_for_match(line);
    let title_norm = normalize_for_match(title);
    if line_norm.is_empty() || title_norm.is_empty() {
        return 0.0;
    }

    if line_norm.contains(&title_norm) || title_norm.contains(&line_norm) {
        return 1.0;
    }

    partial_ratio(&line_norm, &title_norm)
}

fn header_candidates(lines: &[String]) -> Vec<Candidate> {
    let mut candidates = Vec::new();

    for (index, raw_line) in lines.iter().enumerate() {
        let line = raw_line.trim();
        if line.chars().count() < MIN_LINE_LEN {
            continue;
        }

        for page_type in PageType::header_matched() {
            let Some(title) = page_type.canonical_title() else {
                continue;
            };

            let raw_score = match_score(line, title);
            if raw_score < MATCH_THRESHOLD {
                continue;
            }

            #[allow(clippy::cast_precision_loss)]
            let position_boost = (20.0 - index as f32).max(0.0) / 400.0;
            candidates.push(Candidate {
                page_type,
                title_len: title.chars().count(),
                score: (raw_score + position_boost).min(1.0),
                line: line.to_string(),
                index,
            });
        }
    }

    candidates
}

fn email_candidate(text: &str, scanned: &[String]) -> Option<Candidate> {
    let lower = text.to_lowercase();
    if !EMAIL_TRIGGERS.iter().any(|trigger| lower.contains(trigger)) {
        return None;
    }

    let all_upper = text.to_uppercase();
    let all_lines = all_upper.lines().collect::<Vec<_>>();
    let bottom = &all_lines[all_lines.len().saturating_sub(EMAIL_EDGE_LINES)..];
    let at_edge = scanned
        .iter()
        .take(EMAIL_EDGE_LINES)
        .map(String::as_str)
        .chain(bottom.iter().copied())
        .any(|line| line.contains(EMAIL_POSITION_MARKER));

    at_edge.then(|| Candidate {
        page_type: PageType::Email,
        title_len: EMAIL_TITLE.len(),
        score: EMAIL_SCORE,
        line: "GMAIL_FOOTER".to_string(),
        index: EMAIL_LINE_INDEX,
    })
}

fn best_candidate(mut candidates: Vec<Candidate>) -> Option<Candidate> {
    candidates.sort_by(|left, right| {
        right
            .score
            .total_cmp(&left.score)
            .then_with(|| right.title_len.cmp(&left.title_len))
            .then_with(|| left.index.cmp(&right.index))
    });
    candidates.into_iter().next()
}

fn extract_page_info(text: &str, context: &str) -> PageInfo {
    let lines = text.lines().collect::<Vec<_>>();
    let bottom_start = lines.len().saturating_sub(PAGE_INFO_BOTTOM_LINES);
    let search_lines = lines
        .iter()
        .take(PAGE_INFO_TOP_LINES)
        .chain(lines[bottom_start..].iter());

    for line in search_lines {
        let upper = line.to_uppercase();
        for pattern in PAGE_INFO_PATTERNS.iter() {
            let Some(captures) = pattern.captures(&upper) else {
                continue;
            };

            let Some(page_num) = captures.get(1).and_then(|m| m.as_str().parse::<u32>().ok())
            else {
                debug!(
                    context = %context,
                    line = %line,
                    "page number did not parse, trying next pattern"
                );
                continue;
            };

            let total_pages = match captures.get(2) {
                Some(total) => match total.as_str().parse::<u32>() {
                    Ok(total) => Some(total),
                    Err(_) => {
                        debug!(
                            context = %context,
                            line = %line,
                            "page total did not parse, trying next pattern"
                        );
                        continue;
                    }
                },
                None => None,
            };

            return PageInfo {
                page_num: Some(page_num),
                total_pages,
            };
        }
    }

    PageInfo::default()
}

/// Classifies the pages of one document in order.
///
/// The classifier owns the document's classification history; create one
/// per document and drop it when the document is finished.
#[derive(Debug, Clone, Default)]
pub struct PageClassifier {
    history: Vec<ClassificationResult>,
}

impl PageClassifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn history(&self) -> &[ClassificationResult] {
        &self.history
    }

    pub fn classify(&mut self, text: &str, context: &str) -> ClassificationResult {
        let result = self.resolve(text, context);
        self.history.push(result.clone());
        result
    }

    fn resolve(&self, text: &str, context: &str) -> ClassificationResult {
        if text.is_empty() {
            warn!(context = %context, "empty OCR text, classifying as UNKNOWN");
            return ClassificationResult::unknown();
        }

        let scanned = text
            .to_uppercase()
            .lines()
            .take(HEADER_SCAN_LINES)
            .map(str::to_string)
            .collect::<Vec<_>>();

        let mut candidates = header_candidates(&scanned);
        candidates.extend(email_candidate(text, &scanned));

        let previous = self.history.last();
        let (page_type, score, matched_line) = match best_candidate(candidates) {
            Some(best) => (best.page_type, best.score, Some(best.line)),
            None => match previous {
                Some(prev)
                    if text.chars().count() > INHERIT_MIN_CHARS
                        && !matches!(prev.page_type, PageType::Email | PageType::Unknown) =>
                {
                    info!(
                        context = %context,
                        page_type = %prev.page_type,
                        "no header match, inheriting from previous page"
                    );
                    (prev.page_type, prev.score, None)
                }
                _ => (PageType::Unknown, 0.0, None),
            },
        };

        let mut info = extract_page_info(text, context);
        if info.page_num.is_none()
            && let Some(prev) = previous
            && prev.page_type == page_type
            && let (Some(prev_num), Some(prev_total)) = (prev.page_num, prev.total_pages)
            && prev_num < prev_total
        {
            info = PageInfo {
                page_num: Some(prev_num + 1),
                total_pages: Some(prev_total),
            };
            info!(
                context = %context,
                page_num = prev_num + 1,
                total_pages = prev_total,
                "interpolated sub-page index"
            );
        }

        let result = ClassificationResult {
            page_type,
            page_num: info.page_num,
            total_pages: info.total_pages,
            score,
            matched_line,
        };

        match (result.page_num, result.total_pages) {
            (Some(num), Some(total)) => {
                info!(
                    context = %context,
                    page_type = %result.page_type,
                    "classified (page {num}/{total})"
                );
            }
            _ => info!(context = %context, page_type = %result.page_type, "classified"),
        }

        result
    }
}
