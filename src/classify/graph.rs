//! The classification graph: a linear, deterministic pipeline run per message.
//!
//! Node order:
//!
//! 1. **Classify + extract** — one LLM call returning strict JSON
//!    `{class, confidence, reasoning, company, job_title, seniority}`.
//! 2. **Rule guards** — deterministic overrides on normalized subject + body.
//! 3. **Title post-validation** — replace absent or implausible model titles
//!    with the top deterministic candidate.
//! 4. **Resume matcher** — interface-preserving no-op.
//! 5. **Stage assignment** — class → stage table plus body-phrase overrides.
//!
//! The graph is stateless: all inputs go in, one [`EmailState`] comes out.
//! An LLM failure never propagates; it yields a flagged fallback state
//! (`promotional_marketing`, confidence 0.0, `needs_review`).

use std::sync::Arc;

use crate::classify::guards;
use crate::classify::llm::{ChatModel, ChatRequest, parse_json_lenient};
use crate::classify::prompt;
use crate::classify::title;
use crate::config::ClassifySettings;
use crate::models::{Category, EmailMessage, Stage};
use serde_json::Value;

/// Confidence below which a classification is flagged for human review.
pub const NEEDS_REVIEW_THRESHOLD: f32 = 0.65;

/// Classification calls are pinned at or below this temperature regardless of
/// the configured default.
const CLASSIFY_MAX_TEMPERATURE: f32 = 0.1;

const SINGLE_MAX_TOKENS: u32 = 450;
const BATCH_MAX_TOKENS_CAP: u32 = 4096;

/// Resume-matching output. The matcher is a no-op today; the shape is kept so
/// downstream consumers do not change when matching lands.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResumeMatch {
    pub resume_matched: Option<bool>,
    pub resume_file_id: Option<String>,
    pub resume_version: Option<i32>,
}

/// Typed record holding the graph inputs and every node output.
#[derive(Debug, Clone)]
pub struct EmailState {
    pub input: EmailMessage,
    pub category: Category,
    pub confidence: f32,
    pub reasoning: String,
    pub company: String,
    pub job_title: Option<String>,
    pub seniority: Option<String>,
    pub resume: ResumeMatch,
    pub stage: Stage,
    pub requires_action: bool,
    pub action_items: Vec<String>,
    pub needs_review: bool,
    pub model: String,
    /// True when the LLM call failed and the state is the flagged fallback.
    pub llm_failed: bool,
}

/// Raw fields pulled out of one model JSON object, before validation.
#[derive(Debug, Clone, Default)]
struct LlmExtraction {
    category: Option<Category>,
    confidence: Option<f32>,
    reasoning: String,
    company: Option<String>,
    job_title: Option<String>,
    seniority: Option<String>,
}

impl LlmExtraction {
    fn from_value(value: &Value) -> Self {
        let str_field = |key: &str| -> Option<String> {
            value
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null"))
                .map(str::to_string)
        };

        let category = str_field("class")
            .or_else(|| str_field("category"))
            .and_then(|raw| Category::parse(&raw));
        let confidence = value
            .get("confidence")
            .and_then(Value::as_f64)
            .map(|c| c.clamp(0.0, 1.0) as f32);

        Self {
            category,
            confidence,
            reasoning: str_field("reasoning").unwrap_or_default(),
            company: str_field("company").or_else(|| str_field("company_name")),
            job_title: str_field("job_title"),
            seniority: str_field("seniority"),
        }
    }
}

/// Strip corporate suffixes and trim; `"Unknown"` passes through unchanged.
pub fn normalize_company(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed == "Unknown" {
        return "Unknown".to_string();
    }

    let mut out = trimmed.to_string();
    for suffix in ["Inc", "LLC", "Corp", "Ltd", "Co", "Company", "L.L.C"] {
        let lowered = out.to_lowercase();
        let suffix_lower = suffix.to_lowercase();
        for tail in [
            format!(", {}.", suffix_lower),
            format!(", {}", suffix_lower),
            format!(" {}.", suffix_lower),
            format!(" {}", suffix_lower),
        ] {
            if lowered.ends_with(&tail) {
                out.truncate(out.len() - tail.len());
                out = out.trim_end_matches([' ', ',']).to_string();
                break;
            }
        }
    }

    let out = out.trim();
    if out.is_empty() {
        "Unknown".to_string()
    } else {
        out.chars().take(255).collect()
    }
}

/// Deterministic seniority fallback when the model omits it.
pub fn infer_seniority(title: Option<&str>) -> Option<String> {
    let title = title?.to_lowercase();
    let table: [(&str, &str); 12] = [
        ("intern", "intern"),
        ("junior", "junior"),
        ("jr.", "junior"),
        ("principal", "principal"),
        ("staff", "staff"),
        ("senior", "senior"),
        ("sr.", "senior"),
        ("lead", "lead"),
        ("director", "director"),
        ("vp ", "executive"),
        ("head of", "director"),
        ("manager", "manager"),
    ];
    for (needle, level) in table {
        if title.contains(needle) {
            return Some(level.to_string());
        }
    }
    None
}

/// Class → stage mapping before body overrides.
fn base_stage(category: Category) -> Stage {
    match category {
        Category::JobApplicationConfirmation | Category::ApplicationFollowup => Stage::Applied,
        Category::InterviewAssessment => Stage::Interview,
        Category::RecruiterOutreach => Stage::Contacted,
        Category::JobRejection => Stage::Rejected,
        Category::TalentCommunity => Stage::Pipeline,
        _ => Stage::Other,
    }
}

/// Class → requires-action table before the offer override.
fn base_requires_action(category: Category) -> bool {
    matches!(
        category,
        Category::InterviewAssessment | Category::RecruiterOutreach
    )
}

fn base_action_items(category: Category) -> Vec<String> {
    match category {
        Category::InterviewAssessment => {
            vec!["Complete the assessment or schedule the interview".to_string()]
        }
        Category::RecruiterOutreach => vec!["Reply to the recruiter if interested".to_string()],
        _ => Vec::new(),
    }
}

/// Stage assignment node: fixed table plus screening/offer body overrides.
///
/// The offer override is a substring scan of the body; ambiguous phrases such
/// as "we are pleased to offer an interview" land on `Offer` intentionally.
fn assign_stage(category: Category, body_text: &str) -> (Stage, bool, Vec<String>) {
    let mut stage = base_stage(category);
    let mut requires_action = base_requires_action(category);
    let mut action_items = base_action_items(category);

    if category == Category::InterviewAssessment && guards::has_screening_language(body_text) {
        stage = Stage::Screening;
    }

    if guards::has_offer_language(body_text) {
        stage = Stage::Offer;
        requires_action = true;
        action_items.push("Review offer details and respond".to_string());
    }

    (stage, requires_action, action_items)
}

/// Runs the pipeline over decoded messages. Cheap to clone; workers hold one
/// each and share the chat model behind an `Arc`.
#[derive(Clone)]
pub struct ClassificationGraph {
    chat: Arc<dyn ChatModel>,
    settings: ClassifySettings,
}

impl ClassificationGraph {
    pub fn new(chat: Arc<dyn ChatModel>, settings: ClassifySettings) -> Self {
        Self { chat, settings }
    }

    fn temperature(&self) -> f32 {
        self.settings.temperature.min(CLASSIFY_MAX_TEMPERATURE)
    }

    /// Assemble a full state from one extraction by running the deterministic
    /// nodes (guards, title validation, resume matcher, stage assignment).
    fn assemble(&self, input: &EmailMessage, extraction: LlmExtraction, llm_failed: bool) -> EmailState {
        let guard_text = guards::normalize_text(&[&input.subject, &input.body]);
        let body_text = guards::normalize_text(&[&input.body]);

        let category = match extraction.category {
            Some(category) if !llm_failed => guards::apply_guards(category, &guard_text),
            // Unusable model output: default class, flagged below.
            _ => guards::apply_guards(Category::PromotionalMarketing, &guard_text),
        };

        let confidence = if llm_failed {
            0.0
        } else {
            extraction.confidence.unwrap_or(0.0)
        };

        let job_title = title::pick_best_job_title(
            &input.subject,
            &input.body,
            extraction.job_title.as_deref(),
        );

        let seniority = extraction
            .seniority
            .map(|s| s.to_lowercase())
            .or_else(|| infer_seniority(job_title.as_deref()));

        let (stage, requires_action, action_items) = assign_stage(category, &body_text);

        EmailState {
            input: input.clone(),
            category,
            confidence,
            reasoning: extraction.reasoning,
            company: normalize_company(extraction.company.as_deref().unwrap_or("Unknown")),
            job_title,
            seniority,
            resume: ResumeMatch::default(),
            stage,
            requires_action,
            action_items,
            needs_review: llm_failed || confidence < NEEDS_REVIEW_THRESHOLD,
            model: self.chat.model_id(),
            llm_failed,
        }
    }

    fn fallback_state(&self, input: &EmailMessage) -> EmailState {
        self.assemble(input, LlmExtraction::default(), true)
    }

    /// Classify one message through the full pipeline.
    pub async fn classify(&self, input: &EmailMessage) -> EmailState {
        let candidates = title::get_job_title_candidates(&input.subject, &input.body);
        let user = prompt::build_single_prompt(
            &input.subject,
            &input.sender,
            &input.body,
            &candidates,
        );

        let request = ChatRequest {
            system: prompt::SYSTEM_PROMPT.to_string(),
            user,
            temperature: self.temperature(),
            max_tokens: SINGLE_MAX_TOKENS,
        };

        let response = match self.chat.complete(request).await {
            Ok(text) => text,
            Err(err) => {
                log::warn!("classification call failed for {}: {}", input.message_id, err);
                return self.fallback_state(input);
            }
        };

        match parse_json_lenient(&response) {
            Some(value) => self.assemble(input, LlmExtraction::from_value(&value), false),
            None => {
                log::warn!(
                    "classification returned unparseable JSON for {}",
                    input.message_id
                );
                self.fallback_state(input)
            }
        }
    }

    /// Classify a batch of messages.
    ///
    /// With ≥2 messages and batching enabled, issues one LLM call per chunk of
    /// up to `classification_batch_size` messages. Low-confidence results for
    /// outcome-critical classes (rejection, interview/assessment, confirmation)
    /// are re-classified individually. A malformed or length-mismatched batch
    /// response falls back to per-message classification for that chunk.
    pub async fn classify_batch(&self, inputs: &[EmailMessage]) -> Vec<EmailState> {
        if inputs.len() < 2 || !self.settings.use_batch {
            let mut out = Vec::with_capacity(inputs.len());
            for input in inputs {
                out.push(self.classify(input).await);
            }
            return out;
        }

        let mut out = Vec::with_capacity(inputs.len());
        for chunk in inputs.chunks(self.settings.batch_size.max(1)) {
            out.extend(self.classify_chunk(chunk).await);
        }
        out
    }

    async fn classify_chunk(&self, chunk: &[EmailMessage]) -> Vec<EmailState> {
        let payload: Vec<(String, String, String)> = chunk
            .iter()
            .map(|m| (m.subject.clone(), m.sender.clone(), m.body.clone()))
            .collect();

        let request = ChatRequest {
            system: prompt::SYSTEM_PROMPT.to_string(),
            user: prompt::build_batch_prompt(&payload),
            temperature: self.temperature(),
            max_tokens: (SINGLE_MAX_TOKENS * chunk.len() as u32 + 200).min(BATCH_MAX_TOKENS_CAP),
        };

        let results = match self.chat.complete(request).await {
            Ok(text) => parse_json_lenient(&text)
                .and_then(|value| value.get("results").cloned())
                .and_then(|results| results.as_array().cloned()),
            Err(err) => {
                // Timeouts and transport blips are transient here; the
                // per-message path retries each email on its own.
                log::warn!("batch classification call failed: {}", err);
                None
            }
        };

        let results = match results {
            Some(results) if results.len() == chunk.len() => results,
            Some(results) => {
                log::warn!(
                    "batch classification length mismatch: expected {}, got {}; \
                     falling back to per-message",
                    chunk.len(),
                    results.len()
                );
                return self.classify_each(chunk).await;
            }
            None => return self.classify_each(chunk).await,
        };

        let mut out = Vec::with_capacity(chunk.len());
        for (input, value) in chunk.iter().zip(results.iter()) {
            let state = self.assemble(input, LlmExtraction::from_value(value), false);

            let critical = matches!(
                state.category,
                Category::JobRejection
                    | Category::InterviewAssessment
                    | Category::JobApplicationConfirmation
            );
            if critical && state.confidence < self.settings.batch_confidence_threshold {
                log::debug!(
                    "re-classifying {} individually (batch confidence {:.2})",
                    input.message_id,
                    state.confidence
                );
                out.push(self.classify(input).await);
            } else {
                out.push(state);
            }
        }
        out
    }

    async fn classify_each(&self, chunk: &[EmailMessage]) -> Vec<EmailState> {
        let mut out = Vec::with_capacity(chunk.len());
        for input in chunk {
            out.push(self.classify(input).await);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::llm::{LlmError, MockChatModel};
    use chrono::Utc;

    fn message(subject: &str, sender: &str, body: &str) -> EmailMessage {
        EmailMessage {
            message_id: "m-1".into(),
            subject: subject.into(),
            sender: sender.into(),
            body: body.into(),
            received: Some(Utc::now()),
        }
    }

    fn settings() -> ClassifySettings {
        ClassifySettings {
            base_url: "http://localhost".into(),
            api_key: "test".into(),
            model: "test-model".into(),
            temperature: 0.2,
            batch_size: 10,
            batch_confidence_threshold: 0.6,
            use_batch: true,
        }
    }

    fn graph_with(mock: MockChatModel) -> ClassificationGraph {
        ClassificationGraph::new(Arc::new(mock), settings())
    }

    fn llm_json(class: &str, confidence: f64, company: &str, title: Option<&str>) -> String {
        serde_json::json!({
            "class": class,
            "confidence": confidence,
            "reasoning": "test reasoning",
            "company": company,
            "job_title": title,
            "seniority": null,
        })
        .to_string()
    }

    #[tokio::test]
    async fn plain_confirmation_with_conditional_language() {
        let mut mock = MockChatModel::new();
        mock.expect_model_id().return_const("test-model".to_string());
        // The model over-weights conditional interview language; the guard
        // must pull it back to a confirmation.
        mock.expect_complete().times(1).returning(|_| {
            Ok(llm_json(
                "interview_assessment",
                0.9,
                "MyJunior AI",
                Some("Senior Full Stack Engineer"),
            ))
        });

        let state = graph_with(mock)
            .classify(&message(
                "Thanks for applying to MyJunior AI!",
                "careers@myjunior.ai",
                "Thank you for applying for the Senior Full Stack Engineer role at MyJunior AI. \
                 If selected for an interview, a recruiter will reach out.",
            ))
            .await;

        assert_eq!(state.category, Category::JobApplicationConfirmation);
        assert_eq!(state.stage, Stage::Applied);
        assert_eq!(state.job_title.as_deref(), Some("Senior Full Stack Engineer"));
        assert!(!state.requires_action);
        assert!(!state.needs_review);
    }

    #[tokio::test]
    async fn polite_rejection_overrides_llm() {
        let mut mock = MockChatModel::new();
        mock.expect_model_id().return_const("test-model".to_string());
        mock.expect_complete().times(1).returning(|_| {
            Ok(llm_json(
                "job_application_confirmation",
                0.8,
                "Respondology",
                None,
            ))
        });

        let state = graph_with(mock)
            .classify(&message(
                "Thank you for your interest in Respondology",
                "talent@respondology.com",
                "After reviewing your application, we have determined that your skills and \
                 experience do not quite match the requirements. Unfortunately we will not \
                 be moving forward.",
            ))
            .await;

        assert_eq!(state.category, Category::JobRejection);
        assert_eq!(state.stage, Stage::Rejected);
    }

    #[tokio::test]
    async fn concrete_assessment_invite_keeps_interview_class() {
        let mut mock = MockChatModel::new();
        mock.expect_model_id().return_const("test-model".to_string());
        mock.expect_complete().times(1).returning(|_| {
            Ok(llm_json("interview_assessment", 0.88, "Magic", None))
        });

        let state = graph_with(mock)
            .classify(&message(
                "Next Steps with Magic",
                "recruiting@magic.dev",
                "We would like to invite you to complete our 90-minute technical assessment \
                 on CodeSignal.",
            ))
            .await;

        assert_eq!(state.category, Category::InterviewAssessment);
        assert_eq!(state.stage, Stage::Interview);
        assert!(state.requires_action);
        assert!(
            state
                .action_items
                .iter()
                .any(|a| a.to_lowercase().contains("assessment")
                    || a.to_lowercase().contains("interview"))
        );
    }

    #[tokio::test]
    async fn offer_body_overrides_stage_and_pushes_action() {
        let mut mock = MockChatModel::new();
        mock.expect_model_id().return_const("test-model".to_string());
        mock.expect_complete().times(1).returning(|_| {
            Ok(llm_json("job_application_confirmation", 0.9, "Acme", None))
        });

        let state = graph_with(mock)
            .classify(&message(
                "Offer Letter - Acme",
                "hr@acme.com",
                "We're pleased to offer you the position. Compensation package attached.",
            ))
            .await;

        assert_eq!(state.stage, Stage::Offer);
        assert!(state.requires_action);
        assert!(
            state
                .action_items
                .contains(&"Review offer details and respond".to_string())
        );
    }

    #[tokio::test]
    async fn screening_phrases_downgrade_interview_stage() {
        let mut mock = MockChatModel::new();
        mock.expect_model_id().return_const("test-model".to_string());
        mock.expect_complete().times(1).returning(|_| {
            Ok(llm_json("interview_assessment", 0.85, "Acme", None))
        });

        let state = graph_with(mock)
            .classify(&message(
                "Quick chat?",
                "recruiter@acme.com",
                "We'd love to set up a phone screen. Please schedule a 15 min call.",
            ))
            .await;

        assert_eq!(state.category, Category::InterviewAssessment);
        assert_eq!(state.stage, Stage::Screening);
    }

    #[tokio::test]
    async fn llm_failure_yields_flagged_fallback() {
        let mut mock = MockChatModel::new();
        mock.expect_model_id().return_const("test-model".to_string());
        mock.expect_complete()
            .times(1)
            .returning(|_| Err(LlmError::EmptyResponse));

        let state = graph_with(mock)
            .classify(&message("Anything", "x@y.com", "body"))
            .await;

        assert!(state.llm_failed);
        assert!(state.needs_review);
        assert_eq!(state.category, Category::PromotionalMarketing);
        assert_eq!(state.confidence, 0.0);
    }

    #[tokio::test]
    async fn low_confidence_flags_needs_review() {
        let mut mock = MockChatModel::new();
        mock.expect_model_id().return_const("test-model".to_string());
        mock.expect_complete()
            .times(1)
            .returning(|_| Ok(llm_json("job_alerts", 0.5, "Unknown", None)));

        let state = graph_with(mock)
            .classify(&message("New jobs for you", "alerts@board.com", "10 new jobs"))
            .await;

        assert!(state.needs_review);
        assert_eq!(state.category, Category::JobAlerts);
    }

    #[tokio::test]
    async fn batch_malformed_response_falls_back_per_message() {
        let mut mock = MockChatModel::new();
        mock.expect_model_id().return_const("test-model".to_string());
        // First call: the batch, malformed. Then one call per message.
        let mut sequence = 0;
        mock.expect_complete().times(3).returning(move |_| {
            sequence += 1;
            if sequence == 1 {
                Ok("not json at all".to_string())
            } else {
                Ok(llm_json("job_alerts", 0.9, "Unknown", None))
            }
        });

        let inputs = vec![
            message("Jobs A", "a@board.com", "digest a"),
            message("Jobs B", "b@board.com", "digest b"),
        ];
        let states = graph_with(mock).classify_batch(&inputs).await;

        assert_eq!(states.len(), 2);
        assert!(states.iter().all(|s| s.category == Category::JobAlerts));
    }

    #[tokio::test]
    async fn batch_low_confidence_critical_class_reclassifies_individually() {
        let mut mock = MockChatModel::new();
        mock.expect_model_id().return_const("test-model".to_string());
        let mut sequence = 0;
        mock.expect_complete().times(2).returning(move |_| {
            sequence += 1;
            if sequence == 1 {
                // Batch response: second result is a low-confidence rejection.
                Ok(serde_json::json!({
                    "results": [
                        {"class": "job_alerts", "confidence": 0.9, "company": "Unknown"},
                        {"class": "job_rejection", "confidence": 0.3, "company": "Acme"},
                    ]
                })
                .to_string())
            } else {
                Ok(llm_json("job_rejection", 0.92, "Acme", None))
            }
        });

        let inputs = vec![
            message("Jobs digest", "alerts@board.com", "jobs"),
            message("Your application", "hr@acme.com", "unfortunately we are not moving forward"),
        ];
        let states = graph_with(mock).classify_batch(&inputs).await;

        assert_eq!(states[0].category, Category::JobAlerts);
        assert_eq!(states[1].category, Category::JobRejection);
        assert!((states[1].confidence - 0.92).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn batch_length_mismatch_falls_back_per_message() {
        let mut mock = MockChatModel::new();
        mock.expect_model_id().return_const("test-model".to_string());
        let mut sequence = 0;
        mock.expect_complete().times(3).returning(move |_| {
            sequence += 1;
            if sequence == 1 {
                Ok(serde_json::json!({
                    "results": [{"class": "job_alerts", "confidence": 0.9}]
                })
                .to_string())
            } else {
                Ok(llm_json("promotional_marketing", 0.8, "Unknown", None))
            }
        });

        let inputs = vec![
            message("A", "a@x.com", "a"),
            message("B", "b@x.com", "b"),
        ];
        let states = graph_with(mock).classify_batch(&inputs).await;
        assert_eq!(states.len(), 2);
    }

    #[tokio::test]
    async fn single_message_batch_uses_single_path() {
        let mut mock = MockChatModel::new();
        mock.expect_model_id().return_const("test-model".to_string());
        mock.expect_complete()
            .times(1)
            .returning(|_| Ok(llm_json("job_alerts", 0.9, "Unknown", None)));

        let inputs = vec![message("A", "a@x.com", "a")];
        let states = graph_with(mock).classify_batch(&inputs).await;
        assert_eq!(states.len(), 1);
    }

    #[test]
    fn company_normalization_strips_suffixes() {
        assert_eq!(normalize_company("Acme Inc."), "Acme");
        assert_eq!(normalize_company("Acme, LLC"), "Acme");
        assert_eq!(normalize_company("Globex Corp"), "Globex");
        assert_eq!(normalize_company("Unknown"), "Unknown");
        assert_eq!(normalize_company("  "), "Unknown");
        assert_eq!(normalize_company("Initech"), "Initech");
    }

    #[test]
    fn seniority_inference_from_title() {
        assert_eq!(
            infer_seniority(Some("Senior Software Engineer")).as_deref(),
            Some("senior")
        );
        assert_eq!(
            infer_seniority(Some("Staff Platform Engineer")).as_deref(),
            Some("staff")
        );
        assert_eq!(infer_seniority(Some("Software Engineer")), None);
        assert_eq!(infer_seniority(None), None);
    }

    #[test]
    fn stage_table_covers_all_categories() {
        assert_eq!(base_stage(Category::JobApplicationConfirmation), Stage::Applied);
        assert_eq!(base_stage(Category::ApplicationFollowup), Stage::Applied);
        assert_eq!(base_stage(Category::InterviewAssessment), Stage::Interview);
        assert_eq!(base_stage(Category::RecruiterOutreach), Stage::Contacted);
        assert_eq!(base_stage(Category::JobRejection), Stage::Rejected);
        assert_eq!(base_stage(Category::TalentCommunity), Stage::Pipeline);
        assert_eq!(base_stage(Category::LinkedinMessage), Stage::Other);
        assert_eq!(base_stage(Category::ReceiptsInvoices), Stage::Other);
    }
}
