use chrono::NaiveDate;
use serde::Serialize;
use tera::{Context, Tera};
use thiserror::Error;

use studymate_core::domain::research::{ResearchOrigin, ResearchOutcome};

use crate::llm::ToolSpec;

const SYSTEM_PROMPT: &str = "system_prompt.txt";
const USER_CONTEXT: &str = "user_context.txt";

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt template failed: {0}")]
    Template(#[from] tera::Error),
}

/// Response-shaping preset selected by the client's `action` field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ActionPreset {
    #[default]
    General,
    SummariseCase,
    GenerateFlashcards,
    GenerateQuiz,
    JournalReflection,
    ResearchGuidance,
}

impl ActionPreset {
    pub fn from_action(action: Option<&str>) -> Self {
        let Some(action) = action else {
            return Self::General;
        };
        let normalized = action.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "summarise_case" | "summarize_case" | "case_summary" => Self::SummariseCase,
            "generate_flashcards" | "flashcards" => Self::GenerateFlashcards,
            "generate_quiz" | "quiz" => Self::GenerateQuiz,
            "journal_reflection" | "journal" => Self::JournalReflection,
            "research_guidance" | "legal_research" | "search_guidance" => Self::ResearchGuidance,
            _ => Self::General,
        }
    }

    pub fn task_section(&self) -> &'static str {
        match self {
            Self::General => {
                "Act as a patient law tutor. Explain concepts step by step, check understanding, \
                 and help the student plan and organise their study."
            }
            Self::SummariseCase => {
                "Summarise the case the student provides using these headings: Citation, Facts, \
                 Issues, Holding, Ratio Decidendi, Obiter Dicta, Significance. Keep each section \
                 tight and flag anything you are unsure of."
            }
            Self::GenerateFlashcards => {
                "Create clear question-and-answer flashcards from the material. One idea per card, \
                 short answers. When the student wants to keep them, save them with \
                 create_flashcard_deck."
            }
            Self::GenerateQuiz => {
                "Write multiple-choice questions with four options each, one correct answer, and \
                 a one-line explanation. When the student wants to keep the quiz, save it with \
                 create_quiz."
            }
            Self::JournalReflection => {
                "Help the student reflect on their study session: what went well, what was hard, \
                 and one concrete next step. Be warm and supportive. Offer to save the reflection \
                 with create_journal_entry."
            }
            Self::ResearchGuidance => {
                "Guide the student through legal research: which primary sources to consult, \
                 search terms to try, and how to check that authorities are still good law."
            }
        }
    }
}

pub struct SystemPromptInput<'a> {
    pub preset: ActionPreset,
    pub research: &'a ResearchOutcome,
    pub user_context: &'a str,
    pub tools: &'a [ToolSpec],
    pub has_images: bool,
    pub today: NaiveDate,
}

#[derive(Serialize)]
struct ToolLine<'a> {
    name: &'a str,
    description: &'a str,
}

/// Renders prompt text from the embedded templates.
pub struct PromptRenderer {
    tera: Tera,
}

impl PromptRenderer {
    pub fn new() -> Result<Self, PromptError> {
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![
            (SYSTEM_PROMPT, include_str!("../templates/system_prompt.txt")),
            (USER_CONTEXT, include_str!("../templates/user_context.txt")),
        ])?;
        Ok(Self { tera })
    }

    pub fn render_system_prompt(
        &self,
        input: &SystemPromptInput<'_>,
    ) -> Result<String, PromptError> {
        let mut context = Context::new();
        context.insert("today", &input.today.format("%A, %-d %B %Y").to_string());
        context.insert("task_section", input.preset.task_section());
        context.insert("has_images", &input.has_images);
        context.insert("user_context", input.user_context.trim());
        context.insert(
            "tools",
            &input
                .tools
                .iter()
                .map(|tool| ToolLine { name: &tool.name, description: &tool.description })
                .collect::<Vec<_>>(),
        );
        insert_research(&mut context, input.research);

        Ok(self.tera.render(SYSTEM_PROMPT, &context)?)
    }

    pub(crate) fn render_user_context(&self, context: &Context) -> Result<String, PromptError> {
        Ok(self.tera.render(USER_CONTEXT, context)?)
    }
}

fn insert_research(context: &mut Context, research: &ResearchOutcome) {
    let mut mode = "none";
    let mut topic = "";
    let mut jurisdiction = "";
    let mut brief = "";
    let mut sources: Vec<&str> = Vec::new();
    let mut verified = String::new();
    let mut daily_limit = 0;
    let mut reason = "";

    match research {
        ResearchOutcome::NotRequested => {}
        ResearchOutcome::Grounded { topic: t, brief: b, sources: s, origin, verified_at } => {
            mode = if *origin == ResearchOrigin::Stale { "stale" } else { "grounded" };
            topic = &t.topic;
            jurisdiction = &t.jurisdiction;
            brief = b;
            sources = s.lines().map(str::trim).filter(|line| !line.is_empty()).collect();
            verified = verified_at.format("%-d %B %Y").to_string();
        }
        ResearchOutcome::QuotaExhausted { topic: t, daily_limit: limit } => {
            mode = "quota";
            topic = &t.topic;
            jurisdiction = &t.jurisdiction;
            daily_limit = *limit;
        }
        ResearchOutcome::Unavailable { reason: r } => {
            mode = "unavailable";
            reason = r;
        }
    }

    context.insert("research_mode", mode);
    context.insert("research_topic", topic);
    context.insert("research_jurisdiction", jurisdiction);
    context.insert("research_brief", brief);
    context.insert("research_sources", &sources);
    context.insert("research_verified", &verified);
    context.insert("daily_limit", &daily_limit);
    context.insert("research_reason", reason);
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};
    use serde_json::json;

    use studymate_core::domain::research::{ResearchOrigin, ResearchOutcome, ResearchTopic};

    use super::{ActionPreset, PromptRenderer, SystemPromptInput};
    use crate::llm::ToolSpec;

    fn render(research: &ResearchOutcome, preset: ActionPreset, has_images: bool) -> String {
        let tools = vec![ToolSpec {
            name: "add_study_task".into(),
            description: "Add a study task to the student's planner.".into(),
            parameters: json!({"type": "object"}),
        }];
        PromptRenderer::new()
            .expect("templates compile")
            .render_system_prompt(&SystemPromptInput {
                preset,
                research,
                user_context: "## Student context\nStudent: Mwila",
                tools: &tools,
                has_images,
                today: NaiveDate::from_ymd_opt(2026, 3, 2).expect("date"),
            })
            .expect("render")
    }

    fn topic() -> ResearchTopic {
        ResearchTopic { topic: "breach of contract damages".into(), jurisdiction: "Zambia".into() }
    }

    #[test]
    fn actions_map_to_presets_with_general_fallback() {
        assert_eq!(ActionPreset::from_action(Some("summarise_case")), ActionPreset::SummariseCase);
        assert_eq!(
            ActionPreset::from_action(Some("Generate-Flashcards")),
            ActionPreset::GenerateFlashcards
        );
        assert_eq!(
            ActionPreset::from_action(Some("journal reflection")),
            ActionPreset::JournalReflection
        );
        assert_eq!(ActionPreset::from_action(Some("dance")), ActionPreset::General);
        assert_eq!(ActionPreset::from_action(None), ActionPreset::General);
    }

    #[test]
    fn grounded_research_lists_each_source() {
        let research = ResearchOutcome::Grounded {
            topic: topic(),
            brief: "Damages are compensatory.".into(),
            sources: "https://zambialii.org/a\nhttps://zambialii.org/b".into(),
            origin: ResearchOrigin::Fresh,
            verified_at: Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap(),
        };
        let prompt = render(&research, ActionPreset::General, false);

        assert!(prompt.contains("Today is Monday, 2 March 2026."));
        assert!(prompt.contains("Damages are compensatory."));
        assert!(prompt.contains("- https://zambialii.org/a\n"));
        assert!(prompt.contains("- https://zambialii.org/b\n"));
        assert!(prompt.contains("Student: Mwila"));
        assert!(prompt.contains("- add_study_task: Add a study task to the student's planner."));
        assert!(!prompt.contains("attached one or more images"));
    }

    #[test]
    fn quota_exhaustion_is_spelled_out_for_the_model() {
        let research = ResearchOutcome::QuotaExhausted { topic: topic(), daily_limit: 5 };
        let prompt = render(&research, ActionPreset::General, false);
        assert!(prompt.contains("used all 5 verified research searches for today"));
        assert!(prompt.contains("general knowledge only"));
    }

    #[test]
    fn stale_and_unavailable_research_ask_for_hedging() {
        let stale = ResearchOutcome::Grounded {
            topic: topic(),
            brief: "Old brief".into(),
            sources: "https://old".into(),
            origin: ResearchOrigin::Stale,
            verified_at: Utc.with_ymd_and_hms(2025, 11, 20, 8, 0, 0).unwrap(),
        };
        let stale_prompt = render(&stale, ActionPreset::General, false);
        assert!(stale_prompt.contains("last verified on 20 November 2025"));

        let unavailable =
            ResearchOutcome::Unavailable { reason: "web search returned no results".into() };
        let prompt = render(&unavailable, ActionPreset::General, false);
        assert!(prompt.contains("not grounded in verified sources"));
        assert!(prompt.contains("web search returned no results"));
    }

    #[test]
    fn preset_and_images_shape_the_task_section() {
        let prompt = render(&ResearchOutcome::NotRequested, ActionPreset::SummariseCase, true);
        assert!(prompt.contains("Ratio Decidendi"));
        assert!(prompt.contains("attached one or more images"));
        assert!(prompt.contains("No external research was done"));
    }
}
