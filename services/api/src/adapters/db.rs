//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use companion_core::domain::{
    ChildProfile, ConversationSession, PhraseCard, PhraseCategory, Speaker, Turn, User,
    UserCredentials, WeekId, WeeklyReport,
};
use companion_core::ports::{DatabaseService, NewChild, PortError, PortResult};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == "23505")
}

fn to_u32(value: i32) -> u32 {
    value.max(0) as u32
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    user_id: Uuid,
    email: Option<String>,
}
impl UserRecord {
    fn to_domain(self) -> User {
        User {
            user_id: self.user_id,
            email: self.email,
        }
    }
}

#[derive(FromRow)]
struct CredentialsRecord {
    user_id: Uuid,
    email: String,
    hashed_password: Option<String>,
}

#[derive(FromRow)]
struct ChildRecord {
    id: Uuid,
    user_id: Uuid,
    name: String,
    age: Option<i16>,
    interests: Vec<String>,
    photo_path: Option<String>,
    created_at: DateTime<Utc>,
}
impl ChildRecord {
    fn to_domain(self) -> ChildProfile {
        ChildProfile {
            id: self.id,
            user_id: self.user_id,
            name: self.name,
            age: self.age.and_then(|a| u8::try_from(a).ok()),
            interests: self.interests,
            photo_path: self.photo_path,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct SessionRecord {
    id: Uuid,
    child_id: Uuid,
    user_id: Uuid,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    turn_count: i32,
    opening_line: Option<String>,
}
impl SessionRecord {
    fn to_domain(self) -> ConversationSession {
        ConversationSession {
            id: self.id,
            child_id: self.child_id,
            user_id: self.user_id,
            started_at: self.started_at,
            ended_at: self.ended_at,
            turn_count: to_u32(self.turn_count),
            opening_line: self.opening_line,
        }
    }
}

#[derive(FromRow)]
struct TurnRecord {
    id: Uuid,
    session_id: Uuid,
    sequence: i32,
    speaker: String,
    text: String,
    created_at: DateTime<Utc>,
}
impl TurnRecord {
    fn to_domain(self) -> PortResult<Turn> {
        Ok(Turn {
            id: self.id,
            session_id: self.session_id,
            sequence: to_u32(self.sequence),
            speaker: self
                .speaker
                .parse::<Speaker>()
                .map_err(|e| PortError::Unexpected(e.to_string()))?,
            text: self.text,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct PhraseCardRecord {
    id: Uuid,
    user_id: Uuid,
    text: String,
    category: String,
    is_preset: bool,
    usage_count: i32,
    last_used_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}
impl PhraseCardRecord {
    fn to_domain(self) -> PortResult<PhraseCard> {
        Ok(PhraseCard {
            id: self.id,
            user_id: self.user_id,
            text: self.text,
            category: self
                .category
                .parse::<PhraseCategory>()
                .map_err(|e| PortError::Unexpected(e.to_string()))?,
            is_preset: self.is_preset,
            usage_count: to_u32(self.usage_count),
            last_used_at: self.last_used_at,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct WeeklyReportRecord {
    child_id: Uuid,
    week_id: String,
    summary: String,
    highlights: Vec<String>,
    suggestions: Vec<String>,
    sessions_considered: i32,
    session_count_snapshot: i32,
    generated_at: DateTime<Utc>,
}
impl WeeklyReportRecord {
    fn to_domain(self) -> PortResult<WeeklyReport> {
        Ok(WeeklyReport {
            child_id: self.child_id,
            week: self
                .week_id
                .parse::<WeekId>()
                .map_err(|e| PortError::Unexpected(e.to_string()))?,
            summary: self.summary,
            highlights: self.highlights,
            suggestions: self.suggestions,
            sessions_considered: to_u32(self.sessions_considered),
            session_count_snapshot: to_u32(self.session_count_snapshot),
            generated_at: self.generated_at,
        })
    }
}

const CHILD_COLUMNS: &str = "id, user_id, name, age, interests, photo_path, created_at";
const SESSION_COLUMNS: &str =
    "id, child_id, user_id, started_at, ended_at, turn_count, opening_line";
const TURN_COLUMNS: &str = "id, session_id, sequence, speaker, text, created_at";
const CARD_COLUMNS: &str =
    "id, user_id, text, category, is_preset, usage_count, last_used_at, created_at";

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    // --- Auth ---

    async fn create_user_with_email(&self, email: &str, hashed_password: &str) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(
            "INSERT INTO users (user_id, email, hashed_password) VALUES ($1, $2, $3) RETURNING user_id, email",
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(hashed_password)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                PortError::Conflict(format!("Email {} is already registered", email))
            } else {
                unexpected(e)
            }
        })?;
        Ok(record.to_domain())
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        let record = sqlx::query_as::<_, CredentialsRecord>(
            "SELECT user_id, email, hashed_password FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("User {} not found", email)))?;

        let hashed_password = record
            .hashed_password
            .ok_or_else(|| PortError::NotFound(format!("User {} has no password", email)))?;
        Ok(UserCredentials {
            user_id: record.user_id,
            email: record.email,
            hashed_password,
        })
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        sqlx::query("INSERT INTO auth_sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(session_id)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT user_id FROM auth_sessions WHERE id = $1 AND expires_at > NOW()",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or(PortError::Unauthorized)
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    // --- Children ---

    async fn create_child(&self, user_id: Uuid, child: NewChild) -> PortResult<ChildProfile> {
        let record = sqlx::query_as::<_, ChildRecord>(&format!(
            "INSERT INTO children (id, user_id, name, age, interests) VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            CHILD_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(&child.name)
        .bind(child.age.map(i16::from))
        .bind(&child.interests)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn get_child(&self, child_id: Uuid) -> PortResult<ChildProfile> {
        let record = sqlx::query_as::<_, ChildRecord>(&format!(
            "SELECT {} FROM children WHERE id = $1",
            CHILD_COLUMNS
        ))
        .bind(child_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("Child {} not found", child_id)))?;
        Ok(record.to_domain())
    }

    async fn list_children(&self, user_id: Uuid) -> PortResult<Vec<ChildProfile>> {
        let records = sqlx::query_as::<_, ChildRecord>(&format!(
            "SELECT {} FROM children WHERE user_id = $1 ORDER BY created_at ASC",
            CHILD_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn set_child_photo_path(&self, child_id: Uuid, photo_path: &str) -> PortResult<()> {
        let result = sqlx::query("UPDATE children SET photo_path = $1 WHERE id = $2")
            .bind(photo_path)
            .bind(child_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Child {} not found", child_id)));
        }
        Ok(())
    }

    // --- Conversation Sessions ---

    async fn create_conversation_session(
        &self,
        user_id: Uuid,
        child_id: Uuid,
    ) -> PortResult<ConversationSession> {
        let record = sqlx::query_as::<_, SessionRecord>(&format!(
            "INSERT INTO conversation_sessions (id, child_id, user_id) VALUES ($1, $2, $3) RETURNING {}",
            SESSION_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(child_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn get_conversation_session(&self, session_id: Uuid) -> PortResult<ConversationSession> {
        let record = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {} FROM conversation_sessions WHERE id = $1",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("Session {} not found", session_id)))?;
        Ok(record.to_domain())
    }

    async fn end_conversation_session(
        &self,
        session_id: Uuid,
        ended_at: DateTime<Utc>,
    ) -> PortResult<ConversationSession> {
        // Ending twice keeps the first end time.
        let record = sqlx::query_as::<_, SessionRecord>(&format!(
            "UPDATE conversation_sessions SET ended_at = COALESCE(ended_at, $1) WHERE id = $2 RETURNING {}",
            SESSION_COLUMNS
        ))
        .bind(ended_at)
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("Session {} not found", session_id)))?;
        Ok(record.to_domain())
    }

    async fn list_sessions_for_child(&self, child_id: Uuid) -> PortResult<Vec<ConversationSession>> {
        let records = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {} FROM conversation_sessions WHERE child_id = $1 ORDER BY started_at DESC",
            SESSION_COLUMNS
        ))
        .bind(child_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn count_sessions_for_child(&self, child_id: Uuid) -> PortResult<u32> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM conversation_sessions WHERE child_id = $1",
        )
        .bind(child_id)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn list_sessions_between(
        &self,
        child_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> PortResult<Vec<ConversationSession>> {
        let records = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {} FROM conversation_sessions \
             WHERE child_id = $1 AND started_at >= $2 AND started_at < $3 \
             ORDER BY started_at ASC",
            SESSION_COLUMNS
        ))
        .bind(child_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    // --- Turns ---

    async fn append_turn(&self, session_id: Uuid, speaker: Speaker, text: &str) -> PortResult<Turn> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        // The row lock taken by this UPDATE serializes concurrent appends to one session.
        let turn_count = sqlx::query_scalar::<_, i32>(
            "UPDATE conversation_sessions \
             SET turn_count = turn_count + 1, \
                 opening_line = CASE WHEN opening_line IS NULL AND $2 = 'child' THEN $3 ELSE opening_line END \
             WHERE id = $1 AND ended_at IS NULL \
             RETURNING turn_count",
        )
        .bind(session_id)
        .bind(speaker.as_str())
        .bind(text)
        .fetch_optional(&mut *tx)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| {
            PortError::NotFound(format!("Active session {} not found", session_id))
        })?;

        let record = sqlx::query_as::<_, TurnRecord>(&format!(
            "INSERT INTO turns (id, session_id, sequence, speaker, text) VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            TURN_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(session_id)
        .bind(turn_count)
        .bind(speaker.as_str())
        .bind(text)
        .fetch_one(&mut *tx)
        .await
        .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)?;
        record.to_domain()
    }

    async fn get_turns_for_session(&self, session_id: Uuid) -> PortResult<Vec<Turn>> {
        let records = sqlx::query_as::<_, TurnRecord>(&format!(
            "SELECT {} FROM turns WHERE session_id = $1 ORDER BY sequence ASC",
            TURN_COLUMNS
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        records.into_iter().map(|r| r.to_domain()).collect()
    }

    // --- Phrase Cards ---

    async fn create_phrase_card(
        &self,
        user_id: Uuid,
        text: &str,
        category: PhraseCategory,
    ) -> PortResult<PhraseCard> {
        let record = sqlx::query_as::<_, PhraseCardRecord>(&format!(
            "INSERT INTO phrase_cards (id, user_id, text, category) VALUES ($1, $2, $3, $4) RETURNING {}",
            CARD_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(text)
        .bind(category.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        record.to_domain()
    }

    async fn list_phrase_cards(&self, user_id: Uuid) -> PortResult<Vec<PhraseCard>> {
        let records = sqlx::query_as::<_, PhraseCardRecord>(&format!(
            "SELECT {} FROM phrase_cards WHERE user_id = $1 \
             ORDER BY category ASC, usage_count DESC, created_at ASC",
            CARD_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn record_phrase_card_usage(
        &self,
        user_id: Uuid,
        card_id: Uuid,
        used_at: DateTime<Utc>,
    ) -> PortResult<PhraseCard> {
        let record = sqlx::query_as::<_, PhraseCardRecord>(&format!(
            "UPDATE phrase_cards SET usage_count = usage_count + 1, last_used_at = $1 \
             WHERE id = $2 AND user_id = $3 RETURNING {}",
            CARD_COLUMNS
        ))
        .bind(used_at)
        .bind(card_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("Phrase card {} not found", card_id)))?;
        record.to_domain()
    }

    async fn delete_phrase_card(&self, user_id: Uuid, card_id: Uuid) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM phrase_cards WHERE id = $1 AND user_id = $2")
            .bind(card_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Phrase card {} not found", card_id)));
        }
        Ok(())
    }

    // --- Weekly Reports ---

    async fn get_weekly_report(
        &self,
        child_id: Uuid,
        week: WeekId,
    ) -> PortResult<Option<WeeklyReport>> {
        let record = sqlx::query_as::<_, WeeklyReportRecord>(
            "SELECT child_id, week_id, summary, highlights, suggestions, sessions_considered, \
             session_count_snapshot, generated_at FROM weekly_reports WHERE child_id = $1 AND week_id = $2",
        )
        .bind(child_id)
        .bind(week.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        record.map(|r| r.to_domain()).transpose()
    }

    async fn upsert_weekly_report(&self, report: &WeeklyReport) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO weekly_reports (child_id, week_id, summary, highlights, suggestions, \
             sessions_considered, session_count_snapshot, generated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (child_id, week_id) DO UPDATE SET \
             summary = EXCLUDED.summary, highlights = EXCLUDED.highlights, \
             suggestions = EXCLUDED.suggestions, sessions_considered = EXCLUDED.sessions_considered, \
             session_count_snapshot = EXCLUDED.session_count_snapshot, generated_at = EXCLUDED.generated_at",
        )
        .bind(report.child_id)
        .bind(report.week.to_string())
        .bind(&report.summary)
        .bind(&report.highlights)
        .bind(&report.suggestions)
        .bind(report.sessions_considered as i32)
        .bind(report.session_count_snapshot as i32)
        .bind(report.generated_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }
}
