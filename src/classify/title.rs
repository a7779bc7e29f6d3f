//! Deterministic job-title extraction.
//!
//! Pattern-based extraction over subject and body, run both before the LLM
//! call (to seed the prompt with candidates) and after it (to validate or
//! replace an implausible model title). Favors recall while keeping titles
//! close to the email's wording, with obvious wrappers and noise removed.

use regex::Regex;
use std::sync::LazyLock;

/// A ranked title candidate. Subject patterns score higher than body patterns
/// because subjects are usually the cleanest source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleCandidate {
    pub value: String,
    pub score: i32,
    pub source: &'static str,
}

static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

fn collapse_ws(s: &str) -> String {
    WS_RE.replace_all(s.trim(), " ").to_string()
}

static WRAPPER_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:the\s+)?(?:role|position|title|opening|opportunity)\s*[:\-]\s*").unwrap()
});
static JOB_TITLE_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^job\s*title\s*[:\-]\s*").unwrap());
static ROLE_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+(?:role|position)\s*$").unwrap());
static AT_COMPANY_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+(?:at|with)\s+[A-Z0-9][\w&.,' \-]{1,80}\s*$").unwrap());
static REQ_ID_BRACKET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*[(\[{]\s*(?:req(?:uisition)?|job|role)?\s*#?\s*[A-Z0-9][\w\-]*\s*[)\]}]\s*$")
        .unwrap()
});
static REQ_ID_DASH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*-\s*(?:Req|Requisition)\s*#?\s*[A-Z0-9][\w\-]*\s*$").unwrap());
static URL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)https?://|www\.").unwrap());
static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[\w.\-]+@[\w.\-]+\.\w+\b").unwrap());
static LETTER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-Za-z]").unwrap());

/// Clean a raw extracted title while keeping it close to the email's wording.
pub fn clean_job_title(raw: Option<&str>) -> Option<String> {
    let raw = raw?;
    let mut s = collapse_ws(raw);
    if s.is_empty() {
        return None;
    }

    let quote_chars: &[char] = &[' ', '\t', '\r', '\n', '"', '\'', '\u{201c}', '\u{201d}',
        '\u{2018}', '\u{2019}', '`'];
    s = s.trim_matches(quote_chars).to_string();

    s = WRAPPER_PREFIX_RE.replace(&s, "").to_string();
    s = JOB_TITLE_PREFIX_RE.replace(&s, "").to_string();
    s = ROLE_SUFFIX_RE.replace(&s, "").to_string();
    s = AT_COMPANY_SUFFIX_RE.replace(&s, "").trim().to_string();
    s = s.trim_matches(quote_chars).to_string();
    s = REQ_ID_BRACKET_RE.replace(&s, "").trim().to_string();
    s = REQ_ID_DASH_RE.replace(&s, "").trim().to_string();

    s = s
        .trim_end_matches([' ', '.', ',', ':', ';', '|', '/', '\\', '-'])
        .to_string();
    s = collapse_ws(&s);

    if s.is_empty() { None } else { Some(s) }
}

/// Conservative plausibility filter: reject obvious junk, keep recall high.
pub fn is_plausible_job_title(title: Option<&str>) -> bool {
    let Some(title) = title else {
        return false;
    };
    let s = collapse_ws(title);
    if s.len() < 3 || s.len() > 90 {
        return false;
    }
    if !LETTER_RE.is_match(&s) {
        return false;
    }
    if URL_RE.is_match(&s) || EMAIL_RE.is_match(&s) {
        return false;
    }
    if s.split_whitespace().count() > 10 {
        return false;
    }

    // Known non-titles / boilerplate.
    const BANNED: [&str; 10] = [
        "thank you for applying",
        "your application",
        "next steps",
        "application received",
        "interview invitation",
        "candidate",
        "opportunity",
        "position",
        "role",
        "job",
    ];
    let lowered = s.to_lowercase();
    !BANNED.contains(&lowered.as_str())
}

struct Pattern {
    re: &'static LazyLock<Regex>,
    score: i32,
    source: &'static str,
}

static SUBJ_INTERVIEW_FOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)\b(?:interview|phone\s*screen|screening)\b.*?\bfor\b\s+(.+?)\s*$").unwrap()
});
static SUBJ_APPLIED_FOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)\b(?:application|applied|thanks\s+for\s+applying|thank\s+you\s+for\s+applying)\b.*?(?:for|-\s*)\s+(.+?)\s*$",
    )
    .unwrap()
});
static SUBJ_TITLE_DASH_LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*([A-Za-z][^|]{3,80}?)\s+-\s+(?:remote|hybrid|onsite)\b").unwrap()
});
static SUBJ_ROLE_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)\b(?:role|position|title|opening|opportunity)\s*[:\-]\s*(.+?)\s*$").unwrap()
});
static SUBJ_TITLE_AT_COMPANY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*(.+?)\s+\b(?:at|with)\b\s+[A-Z0-9]").unwrap());

static BODY_THANKS_FOR_APPLYING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)thank you for applying for (?:the )?(.+?)(?:\s+(?:role|position))?\s+(?:at|with)\b",
    )
    .unwrap()
});
static BODY_YOUR_APPLICATION_FOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\byour application (?:was received|for)\s*(?:for\s+)?(.+?)\s*(?:\n|\.|,|$)")
        .unwrap()
});
static BODY_INVITE_FOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\binvit(?:e|ing)\s+you\b.*?\bfor\b\s+(.+?)\s*(?:\n|\.|,|$)").unwrap()
});
static BODY_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:position|role|job title|title|hiring)\s*[:\-]\s*(.+?)\s*(?:\n|\.|,|$)")
        .unwrap()
});

static SUBJECT_PATTERNS: [Pattern; 5] = [
    Pattern { re: &SUBJ_INTERVIEW_FOR, score: 120, source: "subject:interview_for" },
    Pattern { re: &SUBJ_APPLIED_FOR, score: 110, source: "subject:applied_for" },
    Pattern { re: &SUBJ_TITLE_DASH_LOCATION, score: 105, source: "subject:title_dash_location" },
    Pattern { re: &SUBJ_ROLE_LABEL, score: 100, source: "subject:role_label" },
    Pattern { re: &SUBJ_TITLE_AT_COMPANY, score: 95, source: "subject:title_at_company" },
];

static BODY_PATTERNS: [Pattern; 4] = [
    Pattern { re: &BODY_THANKS_FOR_APPLYING, score: 90, source: "body:thanks_for_applying" },
    Pattern { re: &BODY_YOUR_APPLICATION_FOR, score: 80, source: "body:your_application_for" },
    Pattern { re: &BODY_INVITE_FOR, score: 75, source: "body:invite_for" },
    Pattern { re: &BODY_LABEL, score: 70, source: "body:label" },
];

fn extract_with_patterns(text: &str, patterns: &[Pattern]) -> Vec<TitleCandidate> {
    let mut out = Vec::new();
    for pattern in patterns {
        let Some(caps) = pattern.re.captures(text) else {
            continue;
        };
        let raw = caps
            .get(1)
            .or_else(|| caps.get(0))
            .map(|m| m.as_str())
            .unwrap_or_default();
        if let Some(cleaned) = clean_job_title(Some(raw)) {
            if is_plausible_job_title(Some(&cleaned)) {
                out.push(TitleCandidate {
                    value: cleaned,
                    score: pattern.score,
                    source: pattern.source,
                });
            }
        }
    }
    out
}

fn dedupe_keep_best(cands: Vec<TitleCandidate>) -> Vec<TitleCandidate> {
    let mut best: std::collections::HashMap<String, TitleCandidate> = std::collections::HashMap::new();
    for c in cands {
        let key = collapse_ws(&c.value).to_lowercase();
        match best.get(&key) {
            Some(existing) if existing.score >= c.score => {}
            _ => {
                best.insert(key, c);
            }
        }
    }
    let mut out: Vec<TitleCandidate> = best.into_values().collect();
    out.sort_by(|a, b| b.score.cmp(&a.score));
    out
}

const MAX_BODY_CHARS: usize = 2500;

/// Extract ranked job title candidates from subject + body.
pub fn get_job_title_candidates(subject: &str, body: &str) -> Vec<TitleCandidate> {
    let body_sample: String = body.chars().take(MAX_BODY_CHARS).collect();

    let mut cands = extract_with_patterns(subject, &SUBJECT_PATTERNS);
    cands.extend(extract_with_patterns(&body_sample, &BODY_PATTERNS));
    dedupe_keep_best(cands)
}

/// Given an optional model-suggested title, return a best-effort title.
/// Prefer the model output when it looks plausible; otherwise the top candidate.
pub fn pick_best_job_title(
    subject: &str,
    body: &str,
    llm_suggested: Option<&str>,
) -> Option<String> {
    let suggested = clean_job_title(llm_suggested);
    if is_plausible_job_title(suggested.as_deref()) {
        return suggested;
    }

    get_job_title_candidates(subject, body)
        .into_iter()
        .next()
        .map(|c| c.value)
}
