//! Limiter state and conversation windows.

use chrono::Utc;
use sqlx::Row;

use skylark_core::storage::ConversationRepository;
use skylark_types::conversation::{LimitState, ReleaseDeadline, Turn, TurnRole};
use skylark_types::error::RepositoryError;
use skylark_types::user::UserKey;

use super::{SqliteStore, format_datetime, parse_datetime, query_error};

const NEVER: &str = "never";

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct LimitRow {
    last_response_at: Option<String>,
    turns: i64,
    blocked_until: Option<String>,
}

impl LimitRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            last_response_at: row.try_get("last_response_at")?,
            turns: row.try_get("turns")?,
            blocked_until: row.try_get("blocked_until")?,
        })
    }

    fn into_state(self) -> Result<LimitState, RepositoryError> {
        let last_response_at = self
            .last_response_at
            .as_deref()
            .map(parse_datetime)
            .transpose()?;
        let blocked_until = match self.blocked_until.as_deref() {
            None => None,
            Some(NEVER) => Some(ReleaseDeadline::Never),
            Some(at) => Some(ReleaseDeadline::At(parse_datetime(at)?)),
        };
        Ok(LimitState {
            last_response_at,
            turns: u32::try_from(self.turns).unwrap_or(0),
            blocked_until,
        })
    }
}

fn format_deadline(deadline: Option<&ReleaseDeadline>) -> Option<String> {
    deadline.map(|d| match d {
        ReleaseDeadline::At(at) => format_datetime(at),
        ReleaseDeadline::Never => NEVER.to_string(),
    })
}

// ---------------------------------------------------------------------------
// ConversationRepository implementation
// ---------------------------------------------------------------------------

impl ConversationRepository for SqliteStore {
    async fn load_limit_state(&self, user: &UserKey) -> Result<Option<LimitState>, RepositoryError> {
        let row = sqlx::query(
            "SELECT last_response_at, turns, blocked_until FROM response_limit_state WHERE user_key = ?",
        )
        .bind(user.as_str())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_error)?;

        match row {
            Some(row) => {
                let limit_row = LimitRow::from_row(&row).map_err(query_error)?;
                Ok(Some(limit_row.into_state()?))
            }
            None => Ok(None),
        }
    }

    async fn save_limit_state(
        &self,
        user: &UserKey,
        state: &LimitState,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO response_limit_state (user_key, last_response_at, turns, blocked_until, updated_at)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT (user_key) DO UPDATE SET
                   last_response_at = excluded.last_response_at,
                   turns = excluded.turns,
                   blocked_until = excluded.blocked_until,
                   updated_at = excluded.updated_at"#,
        )
        .bind(user.as_str())
        .bind(state.last_response_at.as_ref().map(format_datetime))
        .bind(i64::from(state.turns))
        .bind(format_deadline(state.blocked_until.as_ref()))
        .bind(format_datetime(&Utc::now()))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn load_turns(&self, user: &UserKey, limit: usize) -> Result<Vec<Turn>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT role, content FROM (
                   SELECT id, role, content FROM conversation_turns
                   WHERE user_key = ? ORDER BY id DESC LIMIT ?
               ) ORDER BY id ASC"#,
        )
        .bind(user.as_str())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        let mut turns = Vec::with_capacity(rows.len());
        for row in &rows {
            let role: String = row.try_get("role").map_err(query_error)?;
            let content: String = row.try_get("content").map_err(query_error)?;
            let role = TurnRole::parse(&role)
                .ok_or_else(|| RepositoryError::Query(format!("invalid turn role: {role}")))?;
            turns.push(Turn {
                role,
                text: content,
            });
        }
        Ok(turns)
    }

    async fn append_turns(
        &self,
        user: &UserKey,
        turns: &[Turn],
        keep: usize,
    ) -> Result<(), RepositoryError> {
        let now = format_datetime(&Utc::now());
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        for turn in turns {
            sqlx::query(
                "INSERT INTO conversation_turns (user_key, role, content, created_at) VALUES (?, ?, ?, ?)",
            )
            .bind(user.as_str())
            .bind(turn.role.as_str())
            .bind(&turn.text)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;
        }

        sqlx::query(
            r#"DELETE FROM conversation_turns
               WHERE user_key = ? AND id NOT IN (
                   SELECT id FROM conversation_turns WHERE user_key = ? ORDER BY id DESC LIMIT ?
               )"#,
        )
        .bind(user.as_str())
        .bind(user.as_str())
        .bind(i64::try_from(keep).unwrap_or(i64::MAX))
        .execute(&mut *tx)
        .await
        .map_err(query_error)?;

        tx.commit().await.map_err(query_error)?;
        Ok(())
    }

    async fn clear_turns(&self, user: Option<&UserKey>) -> Result<u64, RepositoryError> {
        let result = match user {
            Some(user) => sqlx::query("DELETE FROM conversation_turns WHERE user_key = ?")
                .bind(user.as_str())
                .execute(&self.pool.writer)
                .await,
            None => sqlx::query("DELETE FROM conversation_turns")
                .execute(&self.pool.writer)
                .await,
        }
        .map_err(query_error)?;

        Ok(result.rows_affected())
    }
}
