//! Deterministic rule guards applied over the LLM output.
//!
//! Guards match against normalized (lowercased, whitespace-collapsed)
//! `subject ∪ body` text and override the model when a phrase set fires.
//! Applying the guards twice is a fixed point: `guards(guards(x)) = guards(x)`.
//!
//! The phrase sets are English-only; behavior on other languages is undefined.

use regex::Regex;
use std::sync::LazyLock;

use crate::models::Category;

/// Lowercase and collapse all whitespace runs to single spaces.
pub fn normalize_text(parts: &[&str]) -> String {
    let joined = parts.join(" ").to_lowercase();
    let mut out = String::with_capacity(joined.len());
    let mut last_ws = false;
    for ch in joined.chars() {
        if ch.is_whitespace() {
            if !last_ws {
                out.push(' ');
            }
            last_ws = true;
        } else {
            out.push(ch);
            last_ws = false;
        }
    }
    out.trim().to_string()
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("static guard pattern compiles"))
        .collect()
}

static REJECTION_PHRASES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"unfortunately",
        r"regret to inform",
        r"we(?:'|\u{2019})?re sorry to inform",
        r"not moving forward",
        r"will not be moving forward",
        r"decided to pursue other candidates",
        r"decided to move forward with other candidates",
        r"not selected",
        r"position has been filled",
        r"after careful consideration",
        r"we will not proceed",
    ])
});

static CONDITIONAL_INTERVIEW_PHRASES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"if (?:you(?:'|\u{2019})?re|we(?:'|\u{2019})?re) selected for an? interview",
        r"if selected for an? interview",
        r"if we decide to move forward",
        r"if we move forward",
        r"should you advance to the next step",
        r"should you advance",
        r"if chosen to move forward",
    ])
});

static CONCRETE_INVITATION_PHRASES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"we(?:'|\u{2019})?d like to invite",
        r"would like to invite",
        r"please schedule",
        r"scheduled for",
        r"hackerrank",
        r"codesignal",
        r"codility",
        r"take[- ]?home",
    ])
});

static SCREENING_PHRASES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"phone screen",
        r"recruiter screen",
        r"screening call",
        r"intro(?:ductory)? call",
        r"15 min(?:ute)? call",
        r"15-30 min(?:ute)? call",
        r"get to know you call",
    ])
});

static OFFER_PHRASES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"we(?:'|\u{2019})?re pleased to offer",
        r"pleased to offer",
        r"offer letter",
        r"extend an? offer",
        r"congratulations on your offer",
        r"compensation package",
    ])
});

fn matches_any(text: &str, patterns: &LazyLock<Vec<Regex>>) -> bool {
    patterns.iter().any(|re| re.is_match(text))
}

pub fn has_rejection_language(text: &str) -> bool {
    matches_any(text, &REJECTION_PHRASES)
}

pub fn has_conditional_interview_language(text: &str) -> bool {
    matches_any(text, &CONDITIONAL_INTERVIEW_PHRASES)
}

pub fn has_concrete_invitation(text: &str) -> bool {
    matches_any(text, &CONCRETE_INVITATION_PHRASES)
}

pub fn has_screening_language(text: &str) -> bool {
    matches_any(text, &SCREENING_PHRASES)
}

pub fn has_offer_language(text: &str) -> bool {
    matches_any(text, &OFFER_PHRASES)
}

/// Apply the rule guards over a model-proposed category.
///
/// The conditional-interview downgrade runs first and the rejection override
/// runs over its result, so rejection language always wins and re-applying
/// the guards is a no-op. `text` must be the output of [`normalize_text`]
/// over subject and body.
pub fn apply_guards(category: Category, text: &str) -> Category {
    let mut category = category;

    // "If selected for an interview..." is a receipt, not an invitation,
    // unless a concrete scheduling phrase is also present.
    if category == Category::InterviewAssessment
        && has_conditional_interview_language(text)
        && !has_concrete_invitation(text)
    {
        category = Category::JobApplicationConfirmation;
    }

    // Clear rejection language beats an optimistic confirmation.
    if has_rejection_language(text)
        && matches!(
            category,
            Category::JobApplicationConfirmation | Category::TalentCommunity
        )
    {
        category = Category::JobRejection;
    }

    category
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(subject: &str, body: &str) -> String {
        normalize_text(&[subject, body])
    }

    #[test]
    fn normalizes_case_and_whitespace() {
        assert_eq!(
            normalize_text(&["Hello\t World", "FOO\n\nbar"]),
            "hello world foo bar"
        );
    }

    #[test]
    fn rejection_overrides_confirmation() {
        let text = norm(
            "Thank you for your interest in Respondology",
            "After careful consideration, we have determined that your skills do not match.",
        );
        assert_eq!(
            apply_guards(Category::JobApplicationConfirmation, &text),
            Category::JobRejection
        );
    }

    #[test]
    fn rejection_overrides_talent_community() {
        let text = norm("Update", "Unfortunately we are not moving forward at this time.");
        assert_eq!(
            apply_guards(Category::TalentCommunity, &text),
            Category::JobRejection
        );
    }

    #[test]
    fn rejection_does_not_touch_other_classes() {
        let text = norm("Update", "Unfortunately the sale ended.");
        assert_eq!(
            apply_guards(Category::PromotionalMarketing, &text),
            Category::PromotionalMarketing
        );
    }

    #[test]
    fn conditional_interview_downgrades_to_confirmation() {
        let text = norm(
            "Thanks for applying to MyJunior AI!",
            "Thank you for applying for the Senior Full Stack Engineer role. \
             If selected for an interview, a recruiter will reach out.",
        );
        assert_eq!(
            apply_guards(Category::InterviewAssessment, &text),
            Category::JobApplicationConfirmation
        );
    }

    #[test]
    fn concrete_invitation_is_not_downgraded() {
        let text = norm(
            "Next Steps with Magic",
            "If we decide to move forward you will hear from us, but first: \
             we would like to invite you to complete our 90-minute assessment on CodeSignal.",
        );
        assert_eq!(
            apply_guards(Category::InterviewAssessment, &text),
            Category::InterviewAssessment
        );
    }

    #[test]
    fn guards_are_a_fixed_point() {
        let samples = [
            norm("Rejected", "unfortunately we will not proceed"),
            norm("Receipt", "if selected for an interview we will call"),
            norm("Invite", "please schedule your interview"),
            norm("Noise", "buy one get one free"),
        ];
        for text in &samples {
            for category in crate::models::Category::ALL {
                let once = apply_guards(category, text);
                let twice = apply_guards(once, text);
                assert_eq!(once, twice, "guard not idempotent for {:?} / {}", category, text);
            }
        }
    }

    #[test]
    fn offer_and_screening_phrase_sets_match() {
        assert!(has_offer_language("we're pleased to offer you the position"));
        assert!(has_offer_language("your compensation package is attached"));
        assert!(!has_offer_language("we offer many products"));
        assert!(has_screening_language("a quick phone screen next week"));
        assert!(has_screening_language("schedule a 15 min call"));
    }
}
