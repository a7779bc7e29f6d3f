//! Prompt construction for the classification graph.
//!
//! The prompt embeds compact per-class guidance (indicators, negative
//! indicators, one example) and the deterministic title candidates extracted
//! before the call, so the model validates rather than invents titles.

use crate::classify::title::TitleCandidate;
use crate::models::Category;

pub const SYSTEM_PROMPT: &str =
    "Return strict JSON only. Do not add markdown or commentary.";

const BODY_SAMPLE_CHARS: usize = 2000;
const BATCH_BODY_SAMPLE_CHARS: usize = 1500;

struct ClassGuidance {
    category: Category,
    indicators: &'static str,
    negative: &'static str,
    example: &'static str,
}

static GUIDANCE: [ClassGuidance; 14] = [
    ClassGuidance {
        category: Category::JobApplicationConfirmation,
        indicators: "automated receipt that an application was submitted; 'thank you for applying'; \
                     'we received your application'; conditional language like 'if selected for an interview'",
        negative: "concrete interview scheduling, assessments, rejections",
        example: "Subject: Thank you for applying to DigitalOcean!",
    },
    ClassGuidance {
        category: Category::JobRejection,
        indicators: "'unfortunately', 'regret to inform', 'not moving forward', 'not selected', \
                     'position has been filled', 'decided to pursue other candidates'",
        negative: "marketing unsubscribe language without an application context",
        example: "Subject: Update on your application — we will not be moving forward",
    },
    ClassGuidance {
        category: Category::InterviewAssessment,
        indicators: "concrete invitation to interview, phone screen, onsite, or coding assessment; \
                     'we'd like to invite you', 'please schedule', HackerRank/CodeSignal/Codility, take-home",
        negative: "conditional phrasing like 'if selected for an interview' (that is a confirmation)",
        example: "Subject: Next Steps — schedule your technical interview",
    },
    ClassGuidance {
        category: Category::ApplicationFollowup,
        indicators: "status update on an in-flight application that is neither rejection nor interview; \
                     'your application is under review', 'still reviewing'",
        negative: "first-touch receipts, outreach about new roles",
        example: "Subject: Your application status at Acme",
    },
    ClassGuidance {
        category: Category::RecruiterOutreach,
        indicators: "unsolicited recruiter contact about an opportunity; 'came across your profile', \
                     'would you be interested'",
        negative: "responses to an application the user made",
        example: "Subject: Exciting Backend Engineer opportunity",
    },
    ClassGuidance {
        category: Category::TalentCommunity,
        indicators: "joined a talent pool / community; 'we'll keep your resume on file'; \
                     future-roles framing without a specific application outcome",
        negative: "explicit rejection of a specific application",
        example: "Subject: Welcome to the Acme Talent Community",
    },
    ClassGuidance {
        category: Category::LinkedinConnectionRequest,
        indicators: "LinkedIn invitation to connect",
        negative: "recruiter InMail with a concrete role (that is recruiter_outreach)",
        example: "Subject: John Doe wants to connect",
    },
    ClassGuidance {
        category: Category::LinkedinMessage,
        indicators: "LinkedIn direct message notification",
        negative: "job digests, connection invites",
        example: "Subject: You have a new message from Jane",
    },
    ClassGuidance {
        category: Category::LinkedinJobRecommendations,
        indicators: "LinkedIn job digest / 'jobs you may be interested in'",
        negative: "alerts from other job boards (job_alerts)",
        example: "Subject: 8 new jobs for you",
    },
    ClassGuidance {
        category: Category::LinkedinProfileActivity,
        indicators: "LinkedIn profile views, post reactions, appearance in searches",
        negative: "messages or job digests",
        example: "Subject: You appeared in 12 searches this week",
    },
    ClassGuidance {
        category: Category::JobAlerts,
        indicators: "job board alert digests (Indeed, Glassdoor, ZipRecruiter, company alerts)",
        negative: "a reply about an application the user made",
        example: "Subject: New jobs matching 'Software Engineer'",
    },
    ClassGuidance {
        category: Category::VerificationSecurity,
        indicators: "account verification codes, password resets, sign-in alerts",
        negative: "anything about an application outcome",
        example: "Subject: Your verification code is 882211",
    },
    ClassGuidance {
        category: Category::PromotionalMarketing,
        indicators: "newsletters, product promotion, event invitations unrelated to an application",
        negative: "application receipts that merely look automated",
        example: "Subject: Last chance: 20% off annual plans",
    },
    ClassGuidance {
        category: Category::ReceiptsInvoices,
        indicators: "purchase receipts, invoices, billing statements",
        negative: "job-related mail of any kind",
        example: "Subject: Your receipt from Acme Cloud #1199",
    },
];

fn guidance_block() -> String {
    let mut out = String::new();
    for g in &GUIDANCE {
        out.push_str(&format!(
            "- {}: {}. NOT: {}. Example: {}\n",
            g.category.as_str(),
            g.indicators,
            g.negative,
            g.example
        ));
    }
    out
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn candidates_block(candidates: &[TitleCandidate]) -> String {
    if candidates.is_empty() {
        return "(none found)".to_string();
    }
    candidates
        .iter()
        .take(5)
        .map(|c| format!("- {}", c.value))
        .collect::<Vec<_>>()
        .join("\n")
}

const RESPONSE_KEYS: &str = r#"- class: one of the listed classes
- confidence: number 0.0 to 1.0
- reasoning: one short sentence
- company: hiring company name or "Unknown"
- job_title: string or null
- seniority: one of intern, junior, mid, senior, staff, principal, lead, manager, director, executive, or null"#;

/// Build the single-message classification prompt.
pub fn build_single_prompt(
    subject: &str,
    sender: &str,
    body: &str,
    candidates: &[TitleCandidate],
) -> String {
    format!(
        r#"You are an email triage model for job-application workflows.
Follow the class definitions exactly and return strict JSON only.
Important: phrases like "if selected for an interview" or "if we move forward"
mean job_application_confirmation, not interview_assessment.

Class definitions (pick the best match):
{guidance}
Job title candidates extracted deterministically from this email
(prefer one of these over inventing a title):
{candidates}

Return a JSON object with exactly these keys (use null for unknown):
{keys}

Email:
Subject: {subject}
From: {sender}
Body: {body}

Return ONLY valid JSON, no other text."#,
        guidance = guidance_block(),
        candidates = candidates_block(candidates),
        keys = RESPONSE_KEYS,
        subject = subject,
        sender = sender,
        body = truncate_chars(body, BODY_SAMPLE_CHARS),
    )
}

/// Build the batched classification prompt; the response must be a JSON object
/// with a top-level `results` array of the same length and order as the input.
pub fn build_batch_prompt(emails: &[(String, String, String)]) -> String {
    let mut parts = Vec::with_capacity(emails.len());
    for (i, (subject, sender, body)) in emails.iter().enumerate() {
        parts.push(format!(
            "--- Email {} ---\nSubject: {}\nFrom: {}\nBody: {}",
            i + 1,
            subject,
            sender,
            truncate_chars(body, BATCH_BODY_SAMPLE_CHARS),
        ));
    }
    let combined = parts.join("\n\n");

    format!(
        r#"You are an email triage model for job-application workflows.
Return strict JSON only. Do not infer interviews from conditional language like
"if selected for an interview" or "if we move forward" (these are job_application_confirmation).

Classify each of the following emails.

Class definitions (pick the best match for each email):
{guidance}
Return a JSON object with a top-level "results" array. Each array item must
have exactly these keys (use null for unknown):
{keys}

Emails:

{combined}

Return ONLY a valid JSON object with a "results" array of {count} items, no other text."#,
        guidance = guidance_block(),
        keys = RESPONSE_KEYS,
        combined = combined,
        count = emails.len(),
    )
}
