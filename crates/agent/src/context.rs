use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tera::Context;
use tracing::warn;

use studymate_core::domain::identity::UserId;
use studymate_core::domain::study::{Enrollment, Profile, StoredFile, StudySession, StudyTask};
use studymate_db::repositories::{RepositoryError, StudyStore};

use crate::prompt::PromptRenderer;

const UPCOMING_SESSION_LIMIT: u32 = 5;
const RECENT_FILE_LIMIT: u32 = 10;

/// Everything the assistant knows about the student for one turn.
#[derive(Clone, Debug, Default)]
pub struct StudentSnapshot {
    pub profile: Option<Profile>,
    pub tasks_today: Vec<StudyTask>,
    pub upcoming_sessions: Vec<StudySession>,
    pub enrollments: Vec<Enrollment>,
    pub recent_files: Vec<StoredFile>,
}

#[derive(Serialize)]
struct TaskLine<'a> {
    id: &'a str,
    title: &'a str,
    completed: bool,
    time: Option<String>,
    duration_minutes: u32,
    priority: &'static str,
    subject: Option<&'a str>,
}

#[derive(Serialize)]
struct SessionLine<'a> {
    title: &'a str,
    when: String,
    location: Option<&'a str>,
}

pub struct ContextBuilder {
    store: Arc<dyn StudyStore>,
    renderer: Arc<PromptRenderer>,
}

impl ContextBuilder {
    pub fn new(store: Arc<dyn StudyStore>, renderer: Arc<PromptRenderer>) -> Self {
        Self { store, renderer }
    }

    pub async fn snapshot(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<StudentSnapshot, RepositoryError> {
        let today = now.date_naive();
        let (profile, tasks_today, upcoming_sessions, enrollments, recent_files) = tokio::try_join!(
            self.store.profile(user_id),
            self.store.tasks_between(user_id, today, today),
            self.store.upcoming_sessions(user_id, now, UPCOMING_SESSION_LIMIT),
            self.store.active_enrollments(user_id),
            self.store.recent_files(user_id, RECENT_FILE_LIMIT),
        )?;

        Ok(StudentSnapshot { profile, tasks_today, upcoming_sessions, enrollments, recent_files })
    }

    /// Renders the student context block. Failures leave the prompt without it.
    pub async fn build_context(&self, user_id: &UserId, now: DateTime<Utc>) -> String {
        let snapshot = match self.snapshot(user_id, now).await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                warn!(
                    event_name = "assistant.context.unavailable",
                    user_id = %user_id,
                    error = %error,
                    "student context could not be loaded"
                );
                return String::new();
            }
        };

        match self.render(&snapshot) {
            Ok(rendered) => rendered,
            Err(error) => {
                warn!(
                    event_name = "assistant.context.render_failed",
                    user_id = %user_id,
                    error = %error,
                    "student context template failed"
                );
                String::new()
            }
        }
    }

    fn render(&self, snapshot: &StudentSnapshot) -> Result<String, crate::prompt::PromptError> {
        let tasks: Vec<TaskLine<'_>> = snapshot
            .tasks_today
            .iter()
            .map(|task| TaskLine {
                id: &task.id.0,
                title: &task.title,
                completed: task.completed,
                time: task.start_time.map(|time| time.format("%H:%M").to_string()),
                duration_minutes: task.duration_minutes,
                priority: task.priority.as_str(),
                subject: task.subject.as_deref(),
            })
            .collect();
        let sessions: Vec<SessionLine<'_>> = snapshot
            .upcoming_sessions
            .iter()
            .map(|session| SessionLine {
                title: &session.title,
                when: session.starts_at.format("%a %-d %b %H:%M").to_string(),
                location: session.location.as_deref(),
            })
            .collect();

        let mut context = Context::new();
        context.insert("profile", &snapshot.profile);
        context.insert("tasks", &tasks);
        context.insert("sessions", &sessions);
        context.insert("enrollments", &snapshot.enrollments);
        context.insert("files", &snapshot.recent_files);
        self.renderer.render_user_context(&context)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, NaiveTime, TimeZone, Utc};

    use studymate_core::domain::identity::UserId;
    use studymate_core::domain::study::{
        Enrollment, Profile, StoredFile, StudySession, StudyTask, TaskId, TaskPriority,
    };
    use studymate_db::repositories::{InMemoryStudyStore, StudyStore};

    use super::ContextBuilder;
    use crate::prompt::PromptRenderer;
    use crate::testing::FailingStudyStore;

    fn renderer() -> Arc<PromptRenderer> {
        Arc::new(PromptRenderer::new().expect("templates compile"))
    }

    #[tokio::test]
    async fn context_lists_today_sessions_courses_and_files() {
        let store = Arc::new(InMemoryStudyStore::default());
        let user = UserId("u-1".into());
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 7, 30, 0).unwrap();

        store
            .put_profile(Profile {
                user_id: user.clone(),
                display_name: "Mwila".into(),
                university: Some("University of Zambia".into()),
                year_of_study: Some(3),
                study_streak_days: 4,
                total_study_minutes: 620,
            })
            .await;
        store
            .insert_task(StudyTask {
                id: TaskId("t-1".into()),
                user_id: user.clone(),
                title: "Read Donoghue v Stevenson".into(),
                description: None,
                subject: Some("Torts".into()),
                scheduled_date: now.date_naive(),
                start_time: NaiveTime::from_hms_opt(14, 0, 0),
                duration_minutes: 45,
                priority: TaskPriority::High,
                completed: false,
                completed_at: None,
                created_at: now,
            })
            .await
            .expect("task");
        store
            .insert_task(StudyTask {
                id: TaskId("t-2".into()),
                user_id: user.clone(),
                title: "Tomorrow's reading".into(),
                description: None,
                subject: None,
                scheduled_date: now.date_naive() + Duration::days(1),
                start_time: None,
                duration_minutes: 30,
                priority: TaskPriority::Low,
                completed: false,
                completed_at: None,
                created_at: now,
            })
            .await
            .expect("task");
        store
            .add_session(StudySession {
                id: "s-1".into(),
                user_id: user.clone(),
                title: "Contract law tutorial".into(),
                starts_at: now + Duration::hours(3),
                duration_minutes: 60,
                location: Some("Room 12".into()),
            })
            .await;
        store
            .add_enrollment(Enrollment {
                id: "e-1".into(),
                user_id: user.clone(),
                course_title: "Law of Contract".into(),
                progress_pct: 40,
                active: true,
            })
            .await;
        store
            .add_file(StoredFile {
                id: "f-1".into(),
                user_id: user.clone(),
                file_name: "tort-notes.pdf".into(),
                file_type: "pdf".into(),
                uploaded_at: now - Duration::days(1),
            })
            .await;

        let context = ContextBuilder::new(store, renderer()).build_context(&user, now).await;

        assert!(context.contains("Student: Mwila, University of Zambia, year 3"));
        let reading = "- Read Donoghue v Stevenson at 14:00 (45 min, high priority, Torts, id t-1)";
        assert!(context.contains(reading));
        assert!(!context.contains("Tomorrow's reading"));
        assert!(context.contains("- Contract law tutorial on Mon 2 Mar 10:30 at Room 12"));
        assert!(context.contains("- Law of Contract (40% complete)"));
        assert!(context.contains("- tort-notes.pdf (pdf)"));
    }

    #[tokio::test]
    async fn empty_store_renders_placeholders() {
        let store = Arc::new(InMemoryStudyStore::default());
        let context = ContextBuilder::new(store, renderer())
            .build_context(&UserId("u-new".into()), Utc::now())
            .await;

        assert!(context.contains("- nothing scheduled"));
        assert!(!context.contains("Student:"));
    }

    #[tokio::test]
    async fn store_failure_yields_empty_context() {
        let context = ContextBuilder::new(Arc::new(FailingStudyStore), renderer())
            .build_context(&UserId("u-1".into()), Utc::now())
            .await;
        assert!(context.is_empty());
    }
}
