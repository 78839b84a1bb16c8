//! Type validation of extracted values and the review-priority signal.

use std::str::FromStr;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;

use crate::model::{CONFIDENCE_LABEL_AND_REGEX, CONFIDENCE_LABEL_ONLY};

static NUMERIC_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\d.]+").expect("numeric token pattern is valid"));
static NUMERIC_UNIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([\d.]+)\s*([a-zA-Z%]+)?").expect("numeric unit pattern is valid")
});
static INTEGER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+-]?\d[\d,]*$").expect("integer pattern is valid"));
static SIGNATURE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[.*?\]\(.*?\)").expect("signature pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[default]
    String,
    Integer,
    Number,
    NumericWithUnit,
    Percentage,
    Date,
    Enum,
    Signature,
}

impl FromStr for FieldType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "string" | "text" => Ok(Self::String),
            "integer" | "int" => Ok(Self::Integer),
            "float" | "number" | "numeric" => Ok(Self::Number),
            "numeric_with_unit" => Ok(Self::NumericWithUnit),
            "percentage" => Ok(Self::Percentage),
            "date" => Ok(Self::Date),
            "enum" => Ok(Self::Enum),
            "signature" => Ok(Self::Signature),
            other => Err(format!("unknown field type '{other}'")),
        }
    }
}

/// Normalized validation rules for one field.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationRules {
    pub field_type: FieldType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unit_allowed: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_format: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CleanedValue {
    Text(String),
    Number(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub errors: Vec<String>,
    pub cleaned_value: CleanedValue,
}

impl ValidationOutcome {
    fn passed(cleaned_value: CleanedValue) -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            cleaned_value,
        }
    }

    fn failed(original: &str, error: String) -> Self {
        Self {
            valid: false,
            errors: vec![error],
            cleaned_value: CleanedValue::Text(original.to_string()),
        }
    }
}

/// Coarse review signal derived from the extraction confidence tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReviewPriority {
    Green,
    Yellow,
    Red,
}

impl ReviewPriority {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Green => "GREEN",
            Self::Yellow => "YELLOW",
            Self::Red => "RED",
        }
    }
}

/// Parses a number out of noisy OCR text such as `"98 CPS"` or `"1O,5"`.
#[must_use]
pub fn parse_number(value: &str) -> Option<f64> {
    let cleaned = value
        .trim()
        .replace(',', ".")
        .replace('O', "0")
        .replace(['l', 'I'], "1");
    NUMERIC_TOKEN_RE
        .find(&cleaned)
        .and_then(|token| token.as_str().parse::<f64>().ok())
}

/// Splits `"78 CPS"` into `(78.0, "CPS")`; an empty allow-list accepts any unit.
pub fn parse_numeric_with_unit(
    value: &str,
    allowed_units: &[String],
) -> Result<(f64, String), String> {
    let captures = NUMERIC_UNIT_RE
        .captures(value)
        .ok_or_else(|| format!("no number in '{value}'"))?;
    let number = captures
        .get(1)
        .and_then(|token| token.as_str().parse::<f64>().ok())
        .ok_or_else(|| format!("no number in '{value}'"))?;
    let unit = captures
        .get(2)
        .map(|unit| unit.as_str().to_string())
        .unwrap_or_default();

    if !allowed_units.is_empty()
        && !unit.is_empty()
        && !allowed_units
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&unit))
    {
        return Err(format!("unit '{unit}' is not allowed in '{value}'"));
    }

    Ok((number, unit))
}

fn chrono_format(format: Option<&str>) -> &'static str {
    match format.map(str::trim) {
        Some("DD/MM/YYYY") => "%d/%m/%Y",
        Some("MM/DD/YY") => "%m/%d/%y",
        Some("MM/DD/YYYY") => "%m/%d/%Y",
        Some("YYYY-MM-DD") => "%Y-%m-%d",
        _ => "%d/%m/%y",
    }
}

/// Validates an OCR date, returning it in the configured format.
#[must_use]
pub fn parse_date(value: &str, format: Option<&str>) -> Option<String> {
    let cleaned = value.trim().replace(['.', ','], "/");
    if cleaned.is_empty() {
        return None;
    }

    if cleaned.len() >= 6 && cleaned.chars().all(|ch| ch.is_ascii_digit()) {
        let compact = format!("{}/{}/{}", &cleaned[..2], &cleaned[2..4], &cleaned[4..6]);
        if NaiveDate::parse_from_str(&compact, "%d/%m/%y").is_ok() {
            return Some(compact);
        }
    }

    let pattern = chrono_format(format);
    NaiveDate::parse_from_str(&cleaned, pattern)
        .ok()
        .map(|date| date.format(pattern).to_string())
}

fn check_range(number: f64, rules: &ValidationRules, errors: &mut Vec<String>) {
    if let Some(min) = rules.min_value
        && number < min
    {
        errors.push(format!("value {number} below minimum {min}"));
    }
    if let Some(max) = rules.max_value
        && number > max
    {
        errors.push(format!("value {number} above maximum {max}"));
    }
}

fn numeric_outcome(value: &str, number: f64, rules: &ValidationRules) -> ValidationOutcome {
    let mut errors = Vec::new();
    check_range(number, rules, &mut errors);
    if errors.is_empty() {
        ValidationOutcome::passed(CleanedValue::Number(number))
    } else {
        ValidationOutcome {
            valid: false,
            errors,
            cleaned_value: CleanedValue::Text(value.to_string()),
        }
    }
}

#[must_use]
pub fn validate_value(value: &str, rules: &ValidationRules) -> ValidationOutcome {
    let trimmed = value.trim();
    match rules.field_type {
        FieldType::String => ValidationOutcome::passed(CleanedValue::Text(trimmed.to_string())),
        FieldType::Integer => {
            if !INTEGER_RE.is_match(trimmed) {
                return ValidationOutcome::failed(value, format!("invalid integer: '{value}'"));
            }
            match trimmed.replace(',', "").parse::<i64>() {
                #[allow(clippy::cast_precision_loss)]
                Ok(number) => numeric_outcome(value, number as f64, rules),
                Err(_) => ValidationOutcome::failed(value, format!("invalid integer: '{value}'")),
            }
        }
        FieldType::Number | FieldType::NumericWithUnit | FieldType::Percentage => {
            let allowed = if rules.field_type == FieldType::Percentage {
                vec!["%".to_string()]
            } else {
                rules.unit_allowed.clone()
            };
            let parsed = parse_numeric_with_unit(trimmed, &allowed).or_else(|error| {
                if rules.field_type == FieldType::Number {
                    parse_number(trimmed).map(|number| (number, String::new())).ok_or(error)
                } else {
                    Err(error)
                }
            });
            match parsed {
                Ok((number, _)) => numeric_outcome(value, number, rules),
                Err(error) => ValidationOutcome::failed(value, error),
            }
        }
        FieldType::Date => match parse_date(trimmed, rules.date_format.as_deref()) {
            Some(date) => ValidationOutcome::passed(CleanedValue::Text(date)),
            None => ValidationOutcome::failed(value, format!("cannot parse as date: '{value}'")),
        },
        FieldType::Enum => {
            if rules.allowed_values.is_empty()
                || rules
                    .allowed_values
                    .iter()
                    .any(|allowed| allowed.trim().eq_ignore_ascii_case(trimmed))
            {
                ValidationOutcome::passed(CleanedValue::Text(trimmed.to_string()))
            } else {
                ValidationOutcome::failed(value, format!("'{value}' is not an allowed value"))
            }
        }
        FieldType::Signature => {
            if SIGNATURE_RE.is_match(value) {
                ValidationOutcome::passed(CleanedValue::Text(trimmed.to_string()))
            } else {
                ValidationOutcome::failed(
                    value,
                    format!("'{value}' is not a signature image reference"),
                )
            }
        }
    }
}

/// Buckets a field for human review.
///
/// Empty or type-invalid values are always red; otherwise the confidence
/// tier decides: label+regex is green, label-only yellow, anything lower red.
#[must_use]
pub fn review_priority(
    value: Option<&str>,
    confidence: f32,
    rules: &ValidationRules,
) -> ReviewPriority {
    let Some(value) = value.filter(|value| !value.trim().is_empty()) else {
        return ReviewPriority::Red;
    };

    if !validate_value(value, rules).valid {
        return ReviewPriority::Red;
    }

    if confidence >= CONFIDENCE_LABEL_AND_REGEX {
        ReviewPriority::Green
    } else if confidence >= CONFIDENCE_LABEL_ONLY {
        ReviewPriority::Yellow
    } else {
        ReviewPriority::Red
    }
}
