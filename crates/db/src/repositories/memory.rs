use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;

use studymate_core::domain::identity::UserId;
use studymate_core::domain::rate_limit::QuotaDecision;
use studymate_core::domain::research::ResearchCacheEntry;
use studymate_core::domain::study::{
    Enrollment, FlashcardDeck, JournalEntry, Profile, ProgressStats, Quiz, StoredFile,
    StudySession, StudyTask, TaskId,
};

use super::{RateLimitRepository, RepositoryError, ResearchCacheRepository, StudyStore};

#[derive(Default)]
pub struct InMemoryResearchCacheRepository {
    entries: RwLock<HashMap<String, ResearchCacheEntry>>,
}

impl InMemoryResearchCacheRepository {
    /// Current entry without counting an access.
    pub async fn peek(&self, cache_key: &str) -> Option<ResearchCacheEntry> {
        self.entries.read().await.get(cache_key).cloned()
    }
}

#[async_trait::async_trait]
impl ResearchCacheRepository for InMemoryResearchCacheRepository {
    async fn lookup(&self, cache_key: &str) -> Result<Option<ResearchCacheEntry>, RepositoryError> {
        let mut entries = self.entries.write().await;
        Ok(entries.get_mut(cache_key).map(|entry| {
            entry.access_count += 1;
            entry.clone()
        }))
    }

    async fn store(&self, mut entry: ResearchCacheEntry) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.get(&entry.cache_key) {
            entry.access_count = existing.access_count;
        }
        entries.insert(entry.cache_key.clone(), entry);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryRateLimitRepository {
    counts: RwLock<HashMap<(String, NaiveDate), u32>>,
}

#[async_trait::async_trait]
impl RateLimitRepository for InMemoryRateLimitRepository {
    async fn check_and_consume(
        &self,
        user_id: &UserId,
        day: NaiveDate,
        limit: u32,
    ) -> Result<QuotaDecision, RepositoryError> {
        let mut counts = self.counts.write().await;
        let count = counts.entry((user_id.0.clone(), day)).or_insert(0);
        if *count >= limit {
            return Ok(QuotaDecision::denied());
        }
        *count += 1;
        Ok(QuotaDecision::consumed(*count, limit))
    }
}

#[derive(Default)]
pub struct InMemoryStudyStore {
    profiles: RwLock<HashMap<String, Profile>>,
    tasks: RwLock<Vec<StudyTask>>,
    sessions: RwLock<Vec<StudySession>>,
    enrollments: RwLock<Vec<Enrollment>>,
    files: RwLock<Vec<StoredFile>>,
    decks: RwLock<Vec<FlashcardDeck>>,
    quizzes: RwLock<Vec<Quiz>>,
    journal: RwLock<Vec<JournalEntry>>,
}

impl InMemoryStudyStore {
    pub async fn put_profile(&self, profile: Profile) {
        self.profiles.write().await.insert(profile.user_id.0.clone(), profile);
    }

    pub async fn add_session(&self, session: StudySession) {
        self.sessions.write().await.push(session);
    }

    pub async fn add_enrollment(&self, enrollment: Enrollment) {
        self.enrollments.write().await.push(enrollment);
    }

    pub async fn add_file(&self, file: StoredFile) {
        self.files.write().await.push(file);
    }

    pub async fn all_tasks(&self) -> Vec<StudyTask> {
        self.tasks.read().await.clone()
    }

    pub async fn all_decks(&self) -> Vec<FlashcardDeck> {
        self.decks.read().await.clone()
    }

    pub async fn all_quizzes(&self) -> Vec<Quiz> {
        self.quizzes.read().await.clone()
    }

    pub async fn all_journal_entries(&self) -> Vec<JournalEntry> {
        self.journal.read().await.clone()
    }
}

#[async_trait::async_trait]
impl StudyStore for InMemoryStudyStore {
    async fn profile(&self, user_id: &UserId) -> Result<Option<Profile>, RepositoryError> {
        Ok(self.profiles.read().await.get(&user_id.0).cloned())
    }

    async fn tasks_between(
        &self,
        user_id: &UserId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<StudyTask>, RepositoryError> {
        let mut tasks: Vec<StudyTask> = self
            .tasks
            .read()
            .await
            .iter()
            .filter(|task| {
                &task.user_id == user_id && task.scheduled_date >= from && task.scheduled_date <= to
            })
            .cloned()
            .collect();
        tasks.sort_by(|a, b| {
            a.scheduled_date
                .cmp(&b.scheduled_date)
                .then(a.start_time.is_none().cmp(&b.start_time.is_none()))
                .then(a.start_time.cmp(&b.start_time))
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(tasks)
    }

    async fn list_tasks(&self, user_id: &UserId) -> Result<Vec<StudyTask>, RepositoryError> {
        let mut tasks: Vec<StudyTask> = self
            .tasks
            .read()
            .await
            .iter()
            .filter(|task| &task.user_id == user_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| {
            b.scheduled_date.cmp(&a.scheduled_date).then(b.created_at.cmp(&a.created_at))
        });
        Ok(tasks)
    }

    async fn find_task(
        &self,
        user_id: &UserId,
        task_id: &TaskId,
    ) -> Result<Option<StudyTask>, RepositoryError> {
        Ok(self
            .tasks
            .read()
            .await
            .iter()
            .find(|task| &task.user_id == user_id && &task.id == task_id)
            .cloned())
    }

    async fn insert_task(&self, task: StudyTask) -> Result<(), RepositoryError> {
        self.tasks.write().await.push(task);
        Ok(())
    }

    async fn update_task(&self, task: &StudyTask) -> Result<bool, RepositoryError> {
        let mut tasks = self.tasks.write().await;
        let found = tasks
            .iter_mut()
            .find(|existing| existing.user_id == task.user_id && existing.id == task.id);
        match found {
            Some(existing) => {
                *existing = task.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_task(
        &self,
        user_id: &UserId,
        task_id: &TaskId,
    ) -> Result<bool, RepositoryError> {
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|task| !(&task.user_id == user_id && &task.id == task_id));
        Ok(tasks.len() != before)
    }

    async fn upcoming_sessions(
        &self,
        user_id: &UserId,
        after: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<StudySession>, RepositoryError> {
        let mut sessions: Vec<StudySession> = self
            .sessions
            .read()
            .await
            .iter()
            .filter(|session| &session.user_id == user_id && session.starts_at >= after)
            .cloned()
            .collect();
        sessions.sort_by_key(|session| session.starts_at);
        sessions.truncate(limit as usize);
        Ok(sessions)
    }

    async fn active_enrollments(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<Enrollment>, RepositoryError> {
        let mut enrollments: Vec<Enrollment> = self
            .enrollments
            .read()
            .await
            .iter()
            .filter(|enrollment| &enrollment.user_id == user_id && enrollment.active)
            .cloned()
            .collect();
        enrollments.sort_by(|a, b| a.course_title.cmp(&b.course_title));
        Ok(enrollments)
    }

    async fn recent_files(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<StoredFile>, RepositoryError> {
        let mut files: Vec<StoredFile> = self
            .files
            .read()
            .await
            .iter()
            .filter(|file| &file.user_id == user_id)
            .cloned()
            .collect();
        files.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        files.truncate(limit as usize);
        Ok(files)
    }

    async fn insert_deck(&self, deck: FlashcardDeck) -> Result<(), RepositoryError> {
        self.decks.write().await.push(deck);
        Ok(())
    }

    async fn insert_quiz(&self, quiz: Quiz) -> Result<(), RepositoryError> {
        self.quizzes.write().await.push(quiz);
        Ok(())
    }

    async fn insert_journal_entry(&self, entry: JournalEntry) -> Result<(), RepositoryError> {
        self.journal.write().await.push(entry);
        Ok(())
    }

    async fn progress_stats(
        &self,
        user_id: &UserId,
        week_start: NaiveDate,
    ) -> Result<ProgressStats, RepositoryError> {
        let profile = self.profile(user_id).await?;
        let tasks = self.tasks.read().await;
        let owned = tasks.iter().filter(|task| &task.user_id == user_id);
        let count = |items: usize| u32::try_from(items).unwrap_or(u32::MAX);

        Ok(ProgressStats {
            study_streak_days: profile.as_ref().map_or(0, |p| p.study_streak_days),
            total_study_minutes: profile.as_ref().map_or(0, |p| p.total_study_minutes),
            tasks_total: count(owned.clone().count()),
            tasks_completed: count(owned.clone().filter(|task| task.completed).count()),
            tasks_completed_this_week: count(
                owned
                    .filter(|task| {
                        task.completed
                            && task
                                .completed_at
                                .is_some_and(|done| done.date_naive() >= week_start)
                    })
                    .count(),
            ),
            flashcard_decks: count(
                self.decks.read().await.iter().filter(|d| &d.user_id == user_id).count(),
            ),
            quizzes: count(
                self.quizzes.read().await.iter().filter(|q| &q.user_id == user_id).count(),
            ),
            journal_entries: count(
                self.journal.read().await.iter().filter(|j| &j.user_id == user_id).count(),
            ),
        })
    }
}
