use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use studymate_core::domain::identity::UserId;
use studymate_core::domain::study::{
    Enrollment, FlashcardDeck, JournalEntry, Profile, ProgressStats, Quiz, StoredFile,
    StudySession, StudyTask, TaskId, TaskPriority,
};

use super::{format_day, format_timestamp, parse_timestamp, RepositoryError, StudyStore};
use crate::DbPool;

const TASK_COLUMNS: &str = "id, user_id, title, description, subject, scheduled_date, start_time,
     duration_minutes, priority, completed, completed_at, created_at";

pub struct SqlStudyStore {
    pool: DbPool,
}

impl SqlStudyStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn decode<T>(row: &SqliteRow, column: &str) -> Result<T, RepositoryError>
where
    T: for<'r> sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column).map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn decode_u32(row: &SqliteRow, column: &str) -> Result<u32, RepositoryError> {
    let value: i64 = decode(row, column)?;
    u32::try_from(value).map_err(|_| RepositoryError::Decode(format!("{column}: {value}")))
}

fn parse_day(column: &str, value: &str) -> Result<NaiveDate, RepositoryError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

fn parse_time(value: &str) -> Result<NaiveTime, RepositoryError> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|e| RepositoryError::Decode(format!("start_time: {e}")))
}

fn row_to_task(row: &SqliteRow) -> Result<StudyTask, RepositoryError> {
    let scheduled_date: String = decode(row, "scheduled_date")?;
    let start_time: Option<String> = decode(row, "start_time")?;
    let priority: String = decode(row, "priority")?;
    let completed_at: Option<String> = decode(row, "completed_at")?;
    let created_at: String = decode(row, "created_at")?;

    Ok(StudyTask {
        id: TaskId(decode(row, "id")?),
        user_id: UserId(decode(row, "user_id")?),
        title: decode(row, "title")?,
        description: decode(row, "description")?,
        subject: decode(row, "subject")?,
        scheduled_date: parse_day("scheduled_date", &scheduled_date)?,
        start_time: start_time.as_deref().map(parse_time).transpose()?,
        duration_minutes: decode_u32(row, "duration_minutes")?,
        priority: priority
            .parse::<TaskPriority>()
            .map_err(|e| RepositoryError::Decode(e.to_string()))?,
        completed: decode(row, "completed")?,
        completed_at: completed_at
            .as_deref()
            .map(|value| parse_timestamp("completed_at", value))
            .transpose()?,
        created_at: parse_timestamp("created_at", &created_at)?,
    })
}

fn row_to_session(row: &SqliteRow) -> Result<StudySession, RepositoryError> {
    let starts_at: String = decode(row, "starts_at")?;
    Ok(StudySession {
        id: decode(row, "id")?,
        user_id: UserId(decode(row, "user_id")?),
        title: decode(row, "title")?,
        starts_at: parse_timestamp("starts_at", &starts_at)?,
        duration_minutes: decode_u32(row, "duration_minutes")?,
        location: decode(row, "location")?,
    })
}

fn row_to_enrollment(row: &SqliteRow) -> Result<Enrollment, RepositoryError> {
    let progress: i64 = decode(row, "progress_pct")?;
    Ok(Enrollment {
        id: decode(row, "id")?,
        user_id: UserId(decode(row, "user_id")?),
        course_title: decode(row, "course_title")?,
        progress_pct: u8::try_from(progress)
            .map_err(|_| RepositoryError::Decode(format!("progress_pct: {progress}")))?,
        active: decode(row, "active")?,
    })
}

fn row_to_file(row: &SqliteRow) -> Result<StoredFile, RepositoryError> {
    let uploaded_at: String = decode(row, "uploaded_at")?;
    Ok(StoredFile {
        id: decode(row, "id")?,
        user_id: UserId(decode(row, "user_id")?),
        file_name: decode(row, "file_name")?,
        file_type: decode(row, "file_type")?,
        uploaded_at: parse_timestamp("uploaded_at", &uploaded_at)?,
    })
}

fn row_to_profile(row: &SqliteRow) -> Result<Profile, RepositoryError> {
    let year: Option<i64> = decode(row, "year_of_study")?;
    Ok(Profile {
        user_id: UserId(decode(row, "user_id")?),
        display_name: decode(row, "display_name")?,
        university: decode(row, "university")?,
        year_of_study: year.and_then(|value| u8::try_from(value).ok()),
        study_streak_days: decode_u32(row, "study_streak_days")?,
        total_study_minutes: decode_u32(row, "total_study_minutes")?,
    })
}

fn optional_time(value: Option<NaiveTime>) -> Option<String> {
    value.map(|time| time.format("%H:%M").to_string())
}

async fn count_for_user(
    pool: &DbPool,
    table: &str,
    user_id: &UserId,
) -> Result<u32, RepositoryError> {
    let row = sqlx::query(&format!("SELECT COUNT(*) AS count FROM {table} WHERE user_id = ?"))
        .bind(user_id.as_str())
        .fetch_one(pool)
        .await?;
    decode_u32(&row, "count")
}

#[async_trait::async_trait]
impl StudyStore for SqlStudyStore {
    async fn profile(&self, user_id: &UserId) -> Result<Option<Profile>, RepositoryError> {
        let row = sqlx::query(
            "SELECT user_id, display_name, university, year_of_study,
                    study_streak_days, total_study_minutes
             FROM profile WHERE user_id = ?",
        )
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_profile).transpose()
    }

    async fn tasks_between(
        &self,
        user_id: &UserId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<StudyTask>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM study_task
             WHERE user_id = ? AND scheduled_date BETWEEN ? AND ?
             ORDER BY scheduled_date ASC, start_time IS NULL, start_time ASC, created_at ASC"
        ))
        .bind(user_id.as_str())
        .bind(format_day(from))
        .bind(format_day(to))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_task).collect()
    }

    async fn list_tasks(&self, user_id: &UserId) -> Result<Vec<StudyTask>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM study_task
             WHERE user_id = ?
             ORDER BY scheduled_date DESC, created_at DESC"
        ))
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_task).collect()
    }

    async fn find_task(
        &self,
        user_id: &UserId,
        task_id: &TaskId,
    ) -> Result<Option<StudyTask>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM study_task WHERE id = ? AND user_id = ?"
        ))
        .bind(&task_id.0)
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_task).transpose()
    }

    async fn insert_task(&self, task: StudyTask) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO study_task
                (id, user_id, title, description, subject, scheduled_date, start_time,
                 duration_minutes, priority, completed, completed_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&task.id.0)
        .bind(task.user_id.as_str())
        .bind(&task.title)
        .bind(&task.description)
        .bind(&task.subject)
        .bind(format_day(task.scheduled_date))
        .bind(optional_time(task.start_time))
        .bind(i64::from(task.duration_minutes))
        .bind(task.priority.as_str())
        .bind(task.completed)
        .bind(task.completed_at.map(format_timestamp))
        .bind(format_timestamp(task.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_task(&self, task: &StudyTask) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE study_task
             SET title = ?, description = ?, subject = ?, scheduled_date = ?, start_time = ?,
                 duration_minutes = ?, priority = ?, completed = ?, completed_at = ?
             WHERE id = ? AND user_id = ?",
        )
        .bind(&task.title)
        .bind(&task.description)
        .bind(&task.subject)
        .bind(format_day(task.scheduled_date))
        .bind(optional_time(task.start_time))
        .bind(i64::from(task.duration_minutes))
        .bind(task.priority.as_str())
        .bind(task.completed)
        .bind(task.completed_at.map(format_timestamp))
        .bind(&task.id.0)
        .bind(task.user_id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_task(
        &self,
        user_id: &UserId,
        task_id: &TaskId,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM study_task WHERE id = ? AND user_id = ?")
            .bind(&task_id.0)
            .bind(user_id.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn upcoming_sessions(
        &self,
        user_id: &UserId,
        after: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<StudySession>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, user_id, title, starts_at, duration_minutes, location
             FROM study_session
             WHERE user_id = ? AND starts_at >= ?
             ORDER BY starts_at ASC
             LIMIT ?",
        )
        .bind(user_id.as_str())
        .bind(format_timestamp(after))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_session).collect()
    }

    async fn active_enrollments(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<Enrollment>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, user_id, course_title, progress_pct, active
             FROM enrollment
             WHERE user_id = ? AND active = 1
             ORDER BY course_title ASC",
        )
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_enrollment).collect()
    }

    async fn recent_files(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<StoredFile>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, user_id, file_name, file_type, uploaded_at
             FROM user_file
             WHERE user_id = ?
             ORDER BY uploaded_at DESC
             LIMIT ?",
        )
        .bind(user_id.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_file).collect()
    }

    async fn insert_deck(&self, deck: FlashcardDeck) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO flashcard_deck (id, user_id, title, subject, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&deck.id)
        .bind(deck.user_id.as_str())
        .bind(&deck.title)
        .bind(&deck.subject)
        .bind(format_timestamp(deck.created_at))
        .execute(&mut *tx)
        .await?;

        for (position, card) in deck.cards.iter().enumerate() {
            sqlx::query(
                "INSERT INTO flashcard (deck_id, position, front, back) VALUES (?, ?, ?, ?)",
            )
            .bind(&deck.id)
            .bind(position as i64)
            .bind(&card.front)
            .bind(&card.back)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn insert_quiz(&self, quiz: Quiz) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO quiz (id, user_id, title, subject, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&quiz.id)
        .bind(quiz.user_id.as_str())
        .bind(&quiz.title)
        .bind(&quiz.subject)
        .bind(format_timestamp(quiz.created_at))
        .execute(&mut *tx)
        .await?;

        for (position, question) in quiz.questions.iter().enumerate() {
            let options = serde_json::to_string(&question.options)
                .map_err(|e| RepositoryError::Decode(e.to_string()))?;
            sqlx::query(
                "INSERT INTO quiz_question
                    (quiz_id, position, question, options_json, correct_index, explanation)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&quiz.id)
            .bind(position as i64)
            .bind(&question.question)
            .bind(options)
            .bind(question.correct_index as i64)
            .bind(&question.explanation)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn insert_journal_entry(&self, entry: JournalEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO journal_entry (id, user_id, title, content, mood, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(entry.user_id.as_str())
        .bind(&entry.title)
        .bind(&entry.content)
        .bind(&entry.mood)
        .bind(format_timestamp(entry.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn progress_stats(
        &self,
        user_id: &UserId,
        week_start: NaiveDate,
    ) -> Result<ProgressStats, RepositoryError> {
        let profile = self.profile(user_id).await?;

        let tasks = sqlx::query(
            "SELECT
                 COUNT(*) AS total,
                 COALESCE(SUM(completed), 0) AS completed,
                 COALESCE(SUM(CASE WHEN completed = 1 AND completed_at >= ? THEN 1 ELSE 0 END), 0)
                     AS completed_this_week
             FROM study_task
             WHERE user_id = ?",
        )
        .bind(format_day(week_start))
        .bind(user_id.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(ProgressStats {
            study_streak_days: profile.as_ref().map_or(0, |p| p.study_streak_days),
            total_study_minutes: profile.as_ref().map_or(0, |p| p.total_study_minutes),
            tasks_total: decode_u32(&tasks, "total")?,
            tasks_completed: decode_u32(&tasks, "completed")?,
            tasks_completed_this_week: decode_u32(&tasks, "completed_this_week")?,
            flashcard_decks: count_for_user(&self.pool, "flashcard_deck", user_id).await?,
            quizzes: count_for_user(&self.pool, "quiz", user_id).await?,
            journal_entries: count_for_user(&self.pool, "journal_entry", user_id).await?,
        })
    }
}
