//! Similarity scores in `[0, 1]` used for header, section and column matching.

/// Whole-string similarity: normalized Levenshtein distance over chars.
#[must_use]
pub fn ratio(left: &str, right: &str) -> f32 {
    if left.is_empty() && right.is_empty() {
        return 1.0;
    }
    #[allow(clippy::cast_possible_truncation)]
    let score = strsim::normalized_levenshtein(left, right) as f32;
    score
}

/// Best similarity of the shorter string against any substring of the longer.
///
/// Computed as a semi-global edit distance: the shorter string must be
/// consumed completely while the longer one may start and end anywhere, so
/// a title embedded in a longer header line still scores near `1.0`.
/// Every inserted, deleted or substituted char inside the aligned span costs
/// one edit against the shorter string's length; scores are not rounded.
#[must_use]
pub fn partial_ratio(left: &str, right: &str) -> f32 {
    let left_chars = left.chars().collect::<Vec<_>>();
    let right_chars = right.chars().collect::<Vec<_>>();
    let (short, long) = if left_chars.len() <= right_chars.len() {
        (left_chars, right_chars)
    } else {
        (right_chars, left_chars)
    };

    if short.is_empty() {
        return 0.0;
    }

    let mut previous = vec![0_usize; long.len() + 1];
    let mut current = vec![0_usize; long.len() + 1];
    for (row, short_ch) in short.iter().enumerate() {
        current[0] = row + 1;
        for (col, long_ch) in long.iter().enumerate() {
            let substitution = previous[col] + usize::from(short_ch != long_ch);
            let deletion = previous[col + 1] + 1;
            let insertion = current[col] + 1;
            current[col + 1] = substitution.min(deletion).min(insertion);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    let best = previous.iter().copied().min().unwrap_or(short.len());
    #[allow(clippy::cast_precision_loss)]
    let score = 1.0 - best as f32 / short.len() as f32;
    score.max(0.0)
}

#[cfg(test)]
mod tests {
    use super::{partial_ratio, ratio};

    #[test]
    fn ratio_is_one_for_identical_and_lower_for_edits() {
        assert!((ratio("result", "result") - 1.0).abs() < f32::EPSILON);
        let edited = ratio("result", "resutl");
        assert!(edited > 0.6 && edited < 1.0, "score: {edited}");
        assert!(ratio("result", "xyz") < 0.2);
    }

    #[test]
    fn partial_ratio_finds_embedded_title() {
        let score = partial_ratio("production report", "daily production report - plant 2");
        assert!((score - 1.0).abs() < f32::EPSILON, "score: {score}");
    }

    #[test]
    fn partial_ratio_tolerates_single_substitution() {
        let score = partial_ratio(
            "batch manufactoring record (bmr)",
            "batch manufacturing record (bmr)",
        );
        assert!(score > 0.95 && score < 1.0, "score: {score}");
    }

    #[test]
    fn partial_ratio_is_symmetric_and_zero_for_empty() {
        let forward = partial_ratio("packing details", "packing detials sheet");
        let backward = partial_ratio("packing detials sheet", "packing details");
        assert!((forward - backward).abs() < f32::EPSILON);
        assert!(partial_ratio("", "anything").abs() < f32::EPSILON);
    }

    #[test]
    fn scores_charge_each_edit_against_the_shorter_string() {
        let spaced = partial_ratio("batch no", "batch  no.");
        assert!((spaced - 0.875).abs() < f32::EPSILON, "score: {spaced}");

        // Three gaps inside the span cost three edits, not a shifted window.
        let scattered = partial_ratio("abcd", "axbxcxd");
        assert!((scattered - 0.25).abs() < f32::EPSILON, "score: {scattered}");

        // Whole-string ratio divides by the longer length.
        let dotted = ratio("sr no", "sr. no");
        assert!((dotted - 5.0 / 6.0).abs() < 1e-6, "score: {dotted}");
    }
}
