use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use studymate_core::domain::study::{Flashcard, FlashcardDeck, Quiz, QuizQuestion};

use super::{optional_str, required_str, Tool, ToolContext, ToolError, ToolOutput};

fn array_arg<T>(args: &Value, key: &str) -> Result<Vec<T>, ToolError>
where
    T: serde::de::DeserializeOwned,
{
    let raw = args
        .get(key)
        .cloned()
        .ok_or_else(|| ToolError::InvalidArguments(format!("`{key}` is required")))?;
    serde_json::from_value(raw)
        .map_err(|error| ToolError::InvalidArguments(format!("`{key}` is malformed: {error}")))
}

pub struct CreateFlashcardDeckTool;

#[async_trait]
impl Tool for CreateFlashcardDeckTool {
    fn name(&self) -> &'static str {
        "create_flashcard_deck"
    }

    fn description(&self) -> &'static str {
        "Save a deck of question/answer flashcards for the student."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": {"type": "string"},
                "subject": {"type": "string"},
                "cards": {
                    "type": "array",
                    "minItems": 1,
                    "items": {
                        "type": "object",
                        "properties": {
                            "front": {"type": "string"},
                            "back": {"type": "string"}
                        },
                        "required": ["front", "back"]
                    }
                }
            },
            "required": ["title", "cards"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: &Value) -> Result<ToolOutput, ToolError> {
        let title = required_str(args, "title")?;
        let cards: Vec<Flashcard> = array_arg::<Flashcard>(args, "cards")?
            .into_iter()
            .filter(|card| !card.front.trim().is_empty() && !card.back.trim().is_empty())
            .collect();
        if cards.is_empty() {
            return Err(ToolError::InvalidArguments(
                "a deck needs at least one card with both sides filled in".to_string(),
            ));
        }

        let deck = FlashcardDeck {
            id: Uuid::new_v4().to_string(),
            user_id: ctx.user_id.clone(),
            title,
            subject: optional_str(args, "subject"),
            cards,
            created_at: ctx.now,
        };
        ctx.store.insert_deck(deck.clone()).await?;

        Ok(ToolOutput::new(
            format!("Saved flashcard deck \"{}\" with {} card(s).", deck.title, deck.cards.len()),
            json!({"deck_id": deck.id, "title": deck.title, "card_count": deck.cards.len()}),
        ))
    }
}

pub struct CreateQuizTool;

#[async_trait]
impl Tool for CreateQuizTool {
    fn name(&self) -> &'static str {
        "create_quiz"
    }

    fn description(&self) -> &'static str {
        "Save a multiple-choice quiz for the student to practise later."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": {"type": "string"},
                "subject": {"type": "string"},
                "questions": {
                    "type": "array",
                    "minItems": 1,
                    "items": {
                        "type": "object",
                        "properties": {
                            "question": {"type": "string"},
                            "options": {
                                "type": "array",
                                "items": {"type": "string"},
                                "minItems": 2
                            },
                            "correct_index": {"type": "integer", "minimum": 0},
                            "explanation": {"type": "string"}
                        },
                        "required": ["question", "options", "correct_index"]
                    }
                }
            },
            "required": ["title", "questions"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: &Value) -> Result<ToolOutput, ToolError> {
        let title = required_str(args, "title")?;
        let questions: Vec<QuizQuestion> = array_arg(args, "questions")?;
        if questions.is_empty() {
            let message = "a quiz needs at least one question".to_string();
            return Err(ToolError::InvalidArguments(message));
        }
        for question in &questions {
            question.validate()?;
        }

        let quiz = Quiz {
            id: Uuid::new_v4().to_string(),
            user_id: ctx.user_id.clone(),
            title,
            subject: optional_str(args, "subject"),
            questions,
            created_at: ctx.now,
        };
        ctx.store.insert_quiz(quiz.clone()).await?;

        let count = quiz.questions.len();
        Ok(ToolOutput::new(
            format!("Saved quiz \"{}\" with {count} question(s).", quiz.title),
            json!({"quiz_id": quiz.id, "title": quiz.title, "question_count": count}),
        ))
    }
}
