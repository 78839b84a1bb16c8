//! Label-anchored value extraction with tiered confidence.
//!
//! A value starts right after its label and runs until the earliest
//! boundary: a sibling field's label, a capitalized `Word:` label, a pipe,
//! or the end of the text.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};

use crate::error::ExtractError;
use crate::model::{
    CONFIDENCE_LABEL_AND_REGEX, CONFIDENCE_LABEL_ONLY, CONFIDENCE_REGEX_ONLY, FieldMatch,
    SourceConfig,
};
use crate::validation::ValidationRules;

const MAX_LABEL_CHARS: usize = 120;
const MAX_BOUNDARY_LABELS: usize = 64;
const PATTERN_SIZE_LIMIT: usize = 1 << 20;
const SHORT_VALUE_CHARS: usize = 100;

const GENERIC_BOUNDARY: &str = r"\s+(?-i:[A-Z])[a-zA-Z0-9./()&._]{3,}\s*[:\-=]";

static LABEL_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[:\-=.]+$").expect("label suffix pattern is valid"));
static LEADING_SEPARATORS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[.\s:\-=|]+").expect("leading separator pattern is valid"));
static TRAILING_SEPARATORS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.\s:\-=|]+$").expect("trailing separator pattern is valid"));
static SIGNATURE_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Signature[:\s]*").expect("signature marker pattern is valid")
});

/// Normalized description of one field: candidate labels, optional regex and type rules.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    labels: Vec<String>,
    regex: Option<String>,
    validator: Option<Regex>,
    fallback: Option<Regex>,
    pub rules: ValidationRules,
}

impl FieldSpec {
    /// Labels are cleaned of trailing separators, deduplicated and ordered longest first.
    #[must_use]
    pub fn new<I, S>(name: impl Into<String>, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut cleaned = Vec::<String>::new();
        for label in labels {
            let label = clean_label(label.as_ref());
            if !label.is_empty() && !cleaned.contains(&label) {
                cleaned.push(label);
            }
        }
        cleaned.sort_by_key(|label| std::cmp::Reverse(label.chars().count()));

        Self {
            name: name.into(),
            labels: cleaned,
            regex: None,
            validator: None,
            fallback: None,
            rules: ValidationRules::default(),
        }
    }

    /// Attaches a validation regex, compiled once for validation and once for the fallback search.
    pub fn with_regex(mut self, pattern: &str) -> Result<Self, ExtractError> {
        let invalid = |error: regex::Error| ExtractError::InvalidPattern {
            field: self.name.clone(),
            message: error.to_string(),
        };
        let validator = RegexBuilder::new(pattern)
            .size_limit(PATTERN_SIZE_LIMIT)
            .build()
            .map_err(invalid)?;
        let fallback = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .dot_matches_new_line(true)
            .size_limit(PATTERN_SIZE_LIMIT)
            .build()
            .map_err(invalid)?;

        self.regex = Some(pattern.to_string());
        self.validator = Some(validator);
        self.fallback = Some(fallback);
        Ok(self)
    }

    #[must_use]
    pub fn with_rules(mut self, rules: ValidationRules) -> Self {
        self.rules = rules;
        self
    }

    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    #[must_use]
    pub fn regex(&self) -> Option<&str> {
        self.regex.as_deref()
    }

    /// A field with neither a label nor a regex can never match.
    #[must_use]
    pub fn is_unusable(&self) -> bool {
        self.labels.is_empty() && self.regex.is_none()
    }

    #[must_use]
    pub fn source(&self) -> SourceConfig {
        SourceConfig::Field {
            labels: self.labels.clone(),
            regex: self.regex.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct LabelPattern {
    label: String,
    label_re: Regex,
    boundary_re: Regex,
}

/// A field spec with its label and boundary patterns compiled for one template section.
#[derive(Debug, Clone)]
pub struct FieldExtractor {
    spec: FieldSpec,
    patterns: Vec<LabelPattern>,
}

impl FieldExtractor {
    #[must_use]
    pub fn compile(spec: FieldSpec, boundary_labels: &[String]) -> Self {
        let boundaries = boundary_labels
            .iter()
            .map(|label| clean_label(label))
            .filter(|label| !label.is_empty() && label.chars().count() <= MAX_LABEL_CHARS)
            .take(MAX_BOUNDARY_LABELS)
            .collect::<Vec<_>>();

        let mut patterns = Vec::with_capacity(spec.labels.len());
        for label in &spec.labels {
            if label.chars().count() > MAX_LABEL_CHARS {
                warn!(field = %spec.name, label = %label, "label too long, skipped");
                continue;
            }
            match compile_label(label, &boundaries) {
                Ok(pattern) => patterns.push(pattern),
                Err(error) => {
                    warn!(
                        field = %spec.name,
                        label = %label,
                        error = %error,
                        "label pattern rejected"
                    );
                }
            }
        }

        Self { spec, patterns }
    }

    #[must_use]
    pub fn spec(&self) -> &FieldSpec {
        &self.spec
    }

    /// Searches `text[start_pos..]` for this field.
    ///
    /// Label matches are tried longest label first; a value failing the
    /// validation regex moves on to the next label. Only when no label
    /// yields a value does the regex alone search the window.
    #[must_use]
    pub fn extract(&self, text: &str, start_pos: usize) -> FieldMatch {
        let start = char_boundary_at_or_after(text, start_pos);
        let window = &text[start..];

        for pattern in &self.patterns {
            let Some(label_match) = pattern.label_re.find(window) else {
                continue;
            };
            let value_start = label_match.end();
            let value_end = pattern
                .boundary_re
                .find_at(window, value_start)
                .map_or(window.len(), |boundary| boundary.start());
            let value = clean_value(&window[value_start..value_end]);

            if let Some(validator) = &self.spec.validator {
                if !validator.is_match(&value) {
                    debug!(
                        field = %self.spec.name,
                        label = %pattern.label,
                        value = %value,
                        "value failed validation regex"
                    );
                    continue;
                }
                return FieldMatch {
                    value: Some(value),
                    end_pos: start + value_end,
                    confidence: CONFIDENCE_LABEL_AND_REGEX,
                };
            }

            return FieldMatch {
                value: Some(value),
                end_pos: start + value_end,
                confidence: CONFIDENCE_LABEL_ONLY,
            };
        }

        if let Some(fallback) = &self.spec.fallback
            && let Some(captures) = fallback.captures(window)
            && let Some(whole) = captures.get(0)
        {
            let value = captures.get(1).unwrap_or(whole).as_str().trim().to_string();
            debug!(field = %self.spec.name, value = %value, "value found by regex alone");
            return FieldMatch {
                value: Some(value),
                end_pos: start + whole.end(),
                confidence: CONFIDENCE_REGEX_ONLY,
            };
        }

        debug!(field = %self.spec.name, "no value found");
        FieldMatch::none(start_pos)
    }
}

/// One-off extraction; templates pre-compile through [`FieldExtractor`] instead.
#[must_use]
pub fn extract_field(
    text: &str,
    spec: &FieldSpec,
    boundary_labels: &[String],
    start_pos: usize,
) -> FieldMatch {
    FieldExtractor::compile(spec.clone(), boundary_labels).extract(text, start_pos)
}

pub(crate) fn clean_label(label: &str) -> String {
    LABEL_SUFFIX_RE.replace(label.trim(), "").trim().to_string()
}

fn flexible_pattern(label: &str) -> String {
    label
        .split_whitespace()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"\s+")
}

fn compile_label(label: &str, boundaries: &[String]) -> Result<LabelPattern, regex::Error> {
    let word_end = if label.chars().last().is_some_and(char::is_alphanumeric) {
        r"\b"
    } else {
        ""
    };
    let label_re = RegexBuilder::new(&format!(
        r"(?:^|\||\s){}{word_end}[.\s]*?[:\-=]*",
        flexible_pattern(label)
    ))
    .case_insensitive(true)
    .dot_matches_new_line(true)
    .size_limit(PATTERN_SIZE_LIMIT)
    .build()?;

    let lowered = label.to_lowercase();
    let mut parts = boundaries
        .iter()
        .filter(|boundary| {
            let boundary = boundary.to_lowercase();
            boundary != lowered && !lowered.contains(&boundary)
        })
        .map(|boundary| format!(r"(?:^|\||\s){}", flexible_pattern(boundary)))
        .collect::<Vec<_>>();
    parts.push(GENERIC_BOUNDARY.to_string());
    parts.push(r"\|".to_string());

    let boundary_re = RegexBuilder::new(&parts.join("|"))
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .size_limit(PATTERN_SIZE_LIMIT)
        .build()?;

    Ok(LabelPattern {
        label: label.to_string(),
        label_re,
        boundary_re,
    })
}

fn clean_value(raw: &str) -> String {
    let value = LEADING_SEPARATORS_RE.replace(raw.trim(), "");
    let value = SIGNATURE_MARKER_RE.replace_all(value.trim(), "");
    let value = TRAILING_SEPARATORS_RE.replace(value.trim(), "");
    let value = value.trim();

    if value.contains('\n') && value.chars().count() < SHORT_VALUE_CHARS {
        value.lines().next().unwrap_or_default().trim().to_string()
    } else {
        value.to_string()
    }
}

fn char_boundary_at_or_after(text: &str, position: usize) -> usize {
    if position >= text.len() {
        return text.len();
    }
    (position..=text.len())
        .find(|&index| text.is_char_boundary(index))
        .unwrap_or(text.len())
}
