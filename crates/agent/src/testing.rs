//! Scripted collaborators for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use futures::stream;

use studymate_core::domain::conversation::ToolCall;
use studymate_core::domain::identity::UserId;
use studymate_core::domain::rate_limit::QuotaDecision;
use studymate_core::domain::study::{
    Enrollment, FlashcardDeck, JournalEntry, Profile, ProgressStats, Quiz, StoredFile,
    StudySession, StudyTask, TaskId,
};
use studymate_db::repositories::{RateLimitRepository, RepositoryError, StudyStore};

use crate::llm::{ChatCompletion, ChatRequest, LlmClient, LlmError, TokenStream};
use crate::search::{SearchError, SearchHit, WebSearch};

#[derive(Default)]
pub struct ScriptedLlm {
    completes: Mutex<VecDeque<Result<ChatCompletion, LlmError>>>,
    streams: Mutex<VecDeque<Result<Vec<String>, LlmError>>>,
    complete_requests: Mutex<Vec<ChatRequest>>,
    stream_requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedLlm {
    pub fn push_complete(&self, completion: ChatCompletion) {
        self.completes.lock().expect("lock").push_back(Ok(completion));
    }

    pub fn push_complete_text(&self, text: &str) {
        self.push_complete(ChatCompletion::text(text));
    }

    pub fn push_tool_calls(&self, calls: Vec<ToolCall>) {
        self.push_complete(ChatCompletion { content: String::new(), tool_calls: calls });
    }

    pub fn push_complete_error(&self, error: LlmError) {
        self.completes.lock().expect("lock").push_back(Err(error));
    }

    pub fn push_stream(&self, tokens: &[&str]) {
        let tokens = tokens.iter().map(ToString::to_string).collect();
        self.streams.lock().expect("lock").push_back(Ok(tokens));
    }

    pub fn push_stream_error(&self, error: LlmError) {
        self.streams.lock().expect("lock").push_back(Err(error));
    }

    pub fn complete_requests(&self) -> Vec<ChatRequest> {
        self.complete_requests.lock().expect("lock").clone()
    }

    pub fn stream_requests(&self) -> Vec<ChatRequest> {
        self.stream_requests.lock().expect("lock").clone()
    }
}

fn exhausted() -> LlmError {
    LlmError::Upstream { status: 500, message: "script exhausted".to_string() }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, request: ChatRequest) -> Result<ChatCompletion, LlmError> {
        self.complete_requests.lock().expect("lock").push(request);
        self.completes.lock().expect("lock").pop_front().unwrap_or_else(|| Err(exhausted()))
    }

    async fn stream(&self, request: ChatRequest) -> Result<TokenStream, LlmError> {
        self.stream_requests.lock().expect("lock").push(request);
        let next = self.streams.lock().expect("lock").pop_front();
        let tokens = next.unwrap_or_else(|| Err(exhausted()))?;
        Ok(Box::pin(stream::iter(tokens.into_iter().map(Ok))))
    }
}

#[derive(Default)]
pub struct ScriptedSearch {
    responses: Mutex<VecDeque<Result<Vec<SearchHit>, SearchError>>>,
    queries: Mutex<Vec<String>>,
}

impl ScriptedSearch {
    pub fn push_ok(&self, hits: Vec<SearchHit>) {
        self.responses.lock().expect("lock").push_back(Ok(hits));
    }

    pub fn push_err(&self, error: SearchError) {
        self.responses.lock().expect("lock").push_back(Err(error));
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().expect("lock").clone()
    }
}

#[async_trait]
impl WebSearch for ScriptedSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        self.queries.lock().expect("lock").push(query.to_string());
        self.responses
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| Err(SearchError::Transport("script exhausted".to_string())))
    }
}

pub fn sample_hits() -> Vec<SearchHit> {
    vec![
        SearchHit {
            title: "Contract damages in Zambian courts".to_string(),
            url: "https://zambialii.org/a".to_string(),
            content: "Damages are compensatory, not punitive.".to_string(),
        },
        SearchHit {
            title: "Remoteness of damage".to_string(),
            url: "https://zambialii.org/b".to_string(),
            content: "Hadley v Baxendale has been applied by the Supreme Court.".to_string(),
        },
    ]
}

pub struct FailingRateLimit;

#[async_trait]
impl RateLimitRepository for FailingRateLimit {
    async fn check_and_consume(
        &self,
        _user_id: &UserId,
        _day: NaiveDate,
        _limit: u32,
    ) -> Result<QuotaDecision, RepositoryError> {
        Err(RepositoryError::Decode("rate limit store offline".to_string()))
    }
}

/// Every call fails, as if the data service were unreachable.
pub struct FailingStudyStore;

fn offline<T>() -> Result<T, RepositoryError> {
    Err(RepositoryError::Decode("study store offline".to_string()))
}

#[async_trait]
impl StudyStore for FailingStudyStore {
    async fn profile(&self, _: &UserId) -> Result<Option<Profile>, RepositoryError> {
        offline()
    }

    async fn tasks_between(
        &self,
        _: &UserId,
        _: NaiveDate,
        _: NaiveDate,
    ) -> Result<Vec<StudyTask>, RepositoryError> {
        offline()
    }

    async fn list_tasks(&self, _: &UserId) -> Result<Vec<StudyTask>, RepositoryError> {
        offline()
    }

    async fn find_task(
        &self,
        _: &UserId,
        _: &TaskId,
    ) -> Result<Option<StudyTask>, RepositoryError> {
        offline()
    }

    async fn insert_task(&self, _: StudyTask) -> Result<(), RepositoryError> {
        offline()
    }

    async fn update_task(&self, _: &StudyTask) -> Result<bool, RepositoryError> {
        offline()
    }

    async fn delete_task(&self, _: &UserId, _: &TaskId) -> Result<bool, RepositoryError> {
        offline()
    }

    async fn upcoming_sessions(
        &self,
        _: &UserId,
        _: DateTime<Utc>,
        _: u32,
    ) -> Result<Vec<StudySession>, RepositoryError> {
        offline()
    }

    async fn active_enrollments(&self, _: &UserId) -> Result<Vec<Enrollment>, RepositoryError> {
        offline()
    }

    async fn recent_files(&self, _: &UserId, _: u32) -> Result<Vec<StoredFile>, RepositoryError> {
        offline()
    }

    async fn insert_deck(&self, _: FlashcardDeck) -> Result<(), RepositoryError> {
        offline()
    }

    async fn insert_quiz(&self, _: Quiz) -> Result<(), RepositoryError> {
        offline()
    }

    async fn insert_journal_entry(&self, _: JournalEntry) -> Result<(), RepositoryError> {
        offline()
    }

    async fn progress_stats(
        &self,
        _: &UserId,
        _: NaiveDate,
    ) -> Result<ProgressStats, RepositoryError> {
        offline()
    }
}
