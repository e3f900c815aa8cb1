//! Placeholder substitution applied to a section's chosen fragment before
//! assembly. Pure text transforms; unmatched placeholders stay verbatim.

/// `[Name]` -> the student's first name. Applied to every section kind.
pub fn substitute_name(text: &str, first_name: &str) -> String {
    text.replace("[Name]", first_name)
}

/// `[Score]` -> formatted score, assessment sections only. Substituted only
/// when a numeric score has been entered; `percentage` renders `"{score}%"`,
/// anything else `"{score} out of {maxScore}"`.
pub fn substitute_score(
    text: &str,
    score: Option<f64>,
    score_type: &str,
    max_score: Option<f64>,
) -> String {
    let Some(score) = score else {
        return text.to_string();
    };
    let rendered = if score_type == "percentage" {
        format!("{}%", fmt_number(score))
    } else {
        format!(
            "{} out of {}",
            fmt_number(score),
            max_score.map(fmt_number).unwrap_or_default()
        )
    };
    text.replace("[Score]", &rendered)
}

const INFO_PLACEHOLDERS: [&str; 3] = [
    "[Personal Information]",
    "[Personalised Information]",
    "[Information]",
];

/// Personalised-comment info placeholders, matched case-insensitively.
/// Substituted only when the section's `personalisedInfo` text is non-empty.
pub fn substitute_personal_info(text: &str, info: &str) -> String {
    if info.trim().is_empty() {
        return text.to_string();
    }
    let mut out = text.to_string();
    for placeholder in INFO_PLACEHOLDERS {
        out = replace_case_insensitive(&out, placeholder, info);
    }
    out
}

// The placeholders are all ASCII, so matching byte-wise with ASCII case
// folding is exact and never slices the surrounding text off a char
// boundary, whatever the fragment itself contains.
fn replace_case_insensitive(haystack: &str, needle: &str, replacement: &str) -> String {
    let bytes = haystack.as_bytes();
    let needle_bytes = needle.as_bytes();
    if needle_bytes.is_empty() || bytes.len() < needle_bytes.len() {
        return haystack.to_string();
    }

    let mut out = String::with_capacity(haystack.len());
    let mut last = 0;
    let mut i = 0;
    while i + needle_bytes.len() <= bytes.len() {
        if bytes[i..i + needle_bytes.len()].eq_ignore_ascii_case(needle_bytes) {
            out.push_str(&haystack[last..i]);
            out.push_str(replacement);
            i += needle_bytes.len();
            last = i;
        } else {
            i += 1;
        }
    }
    out.push_str(&haystack[last..]);
    out
}

/// Renders whole numbers without a trailing `.0` ("85%", not "85.0%").
fn fmt_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_substitution() {
        assert_eq!(
            substitute_name("[Name] is doing well.", "Alex"),
            "Alex is doing well."
        );
    }

    #[test]
    fn score_percentage() {
        assert_eq!(
            substitute_score("Scored [Score].", Some(85.0), "percentage", None),
            "Scored 85%."
        );
    }

    #[test]
    fn score_out_of() {
        assert_eq!(
            substitute_score("Scored [Score].", Some(15.0), "outOf", Some(20.0)),
            "Scored 15 out of 20."
        );
    }

    #[test]
    fn score_left_verbatim_without_numeric_entry() {
        assert_eq!(
            substitute_score("Scored [Score].", None, "percentage", None),
            "Scored [Score]."
        );
    }

    #[test]
    fn personal_info_is_case_insensitive() {
        assert_eq!(
            substitute_personal_info("Enjoys [personal information].", "chess club"),
            "Enjoys chess club."
        );
        assert_eq!(
            substitute_personal_info("Enjoys [INFORMATION].", "chess club"),
            "Enjoys chess club."
        );
    }

    #[test]
    fn personal_info_needs_non_empty_text() {
        assert_eq!(
            substitute_personal_info("Enjoys [Information].", "  "),
            "Enjoys [Information]."
        );
    }

    #[test]
    fn multibyte_text_before_a_placeholder_stays_intact() {
        assert_eq!(
            substitute_personal_info("İpek loves [Information].", "robotics"),
            "İpek loves robotics."
        );
        assert_eq!(
            substitute_personal_info("Zoë enjoys [personal information] übermäßig.", "chess"),
            "Zoë enjoys chess übermäßig."
        );
    }

    #[test]
    fn unmatched_placeholders_pass_through() {
        assert_eq!(substitute_name("Keep [Going]!", "Alex"), "Keep [Going]!");
    }

    #[test]
    fn fractional_scores_keep_their_decimals() {
        assert_eq!(
            substitute_score("[Score]", Some(17.5), "outOf", Some(20.0)),
            "17.5 out of 20"
        );
    }
}
