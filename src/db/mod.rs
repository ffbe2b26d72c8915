use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{migrate::MigrateDatabase, Row, Sqlite};

use crate::error::{PollError, Result};
use crate::models::{Poll, PollAttachment, PollStatus, SubPoll, Vote};

pub struct Database {
    pool: SqlitePool,
}

const POLL_COLUMNS: &str = "id, guild_id, channel_id, message_id, title, description, deadline, status, is_secret, notify_members, created_by, created_at";

impl Database {
    pub async fn new(db_url: &str, max_connections: u32) -> Result<Self> {
        if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
            Sqlite::create_database(db_url).await?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(db_url)
            .await?;

        Self::init_schema(&pool).await?;

        Ok(Self { pool })
    }

    /// Private in-memory database. A single connection that never expires keeps it alive.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    async fn init_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS polls (
                id TEXT PRIMARY KEY,
                guild_id TEXT NOT NULL,
                channel_id TEXT NOT NULL,
                message_id TEXT,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                deadline TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'completed')),
                is_secret BOOLEAN NOT NULL DEFAULT TRUE,
                notify_members BOOLEAN NOT NULL DEFAULT FALSE,
                created_by TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sub_polls (
                id TEXT PRIMARY KEY,
                poll_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                position INTEGER NOT NULL,
                FOREIGN KEY (poll_id) REFERENCES polls(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        // One row per member and question; a second submission fails here even if it raced the eligibility check.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS votes (
                id TEXT PRIMARY KEY,
                poll_id TEXT NOT NULL,
                sub_poll_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                vote TEXT NOT NULL CHECK (vote IN ('favor', 'against', 'abstain')),
                comment TEXT,
                voted_at TEXT NOT NULL,
                UNIQUE (user_id, sub_poll_id),
                FOREIGN KEY (poll_id) REFERENCES polls(id) ON DELETE CASCADE,
                FOREIGN KEY (sub_poll_id) REFERENCES sub_polls(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_votes_poll ON votes (poll_id, user_id);")
            .execute(pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS poll_attachments (
                id TEXT PRIMARY KEY,
                poll_id TEXT NOT NULL,
                file_name TEXT NOT NULL,
                path TEXT NOT NULL,
                size INTEGER NOT NULL,
                mime_type TEXT,
                uploaded_by TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (poll_id) REFERENCES polls(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    // Polls

    /// Writes the poll, its sub-polls and an optional attachment in one transaction.
    pub async fn insert_poll(&self, poll: &Poll, attachment: Option<&PollAttachment>) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO polls (id, guild_id, channel_id, message_id, title, description, deadline, status, is_secret, notify_members, created_by, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&poll.id)
        .bind(&poll.guild_id)
        .bind(&poll.channel_id)
        .bind(&poll.message_id)
        .bind(&poll.title)
        .bind(&poll.description)
        .bind(poll.deadline)
        .bind(poll.status.as_str())
        .bind(poll.is_secret)
        .bind(poll.notify_members)
        .bind(&poll.created_by)
        .bind(poll.created_at)
        .execute(&mut *tx)
        .await?;

        for sub_poll in &poll.sub_polls {
            sqlx::query(
                r#"
                INSERT INTO sub_polls (id, poll_id, title, description, position)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&sub_poll.id)
            .bind(&poll.id)
            .bind(&sub_poll.title)
            .bind(&sub_poll.description)
            .bind(sub_poll.position)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(attachment) = attachment {
            Self::insert_attachment_with(&mut *tx, attachment).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_poll(&self, poll_id: &str) -> Result<Poll> {
        let row = sqlx::query(&format!("SELECT {} FROM polls WHERE id = ?", POLL_COLUMNS))
            .bind(poll_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(PollError::PollNotFound)?;

        let sub_polls = self.get_sub_polls(poll_id).await?;
        poll_from_row(&row, sub_polls)
    }

    pub async fn get_sub_polls(&self, poll_id: &str) -> Result<Vec<SubPoll>> {
        sqlx::query(
            r#"
            SELECT id, poll_id, title, description, position
            FROM sub_polls
            WHERE poll_id = ?
            ORDER BY position
            "#,
        )
        .bind(poll_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(sub_poll_from_row)
        .collect()
    }

    /// Polls of a guild, newest first, optionally filtered by status.
    pub async fn list_polls(&self, guild_id: &str, status: Option<PollStatus>) -> Result<Vec<Poll>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {} FROM polls WHERE guild_id = ? AND status = ? ORDER BY created_at DESC",
                    POLL_COLUMNS
                ))
                .bind(guild_id)
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM polls WHERE guild_id = ? ORDER BY created_at DESC",
                    POLL_COLUMNS
                ))
                .bind(guild_id)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut polls = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.try_get("id")?;
            let sub_polls = self.get_sub_polls(&id).await?;
            polls.push(poll_from_row(row, sub_polls)?);
        }
        Ok(polls)
    }

    /// Active polls whose deadline is before `now`, across all guilds.
    pub async fn get_expired_polls(&self, now: DateTime<Utc>) -> Result<Vec<Poll>> {
        let rows = sqlx::query(&format!("SELECT {} FROM polls WHERE status = 'active'", POLL_COLUMNS))
            .fetch_all(&self.pool)
            .await?;

        // Deadlines are compared as timestamps here rather than as text in SQL.
        let mut expired = Vec::new();
        for row in &rows {
            let poll = poll_from_row(row, Vec::new())?;
            if poll.deadline_passed(now) {
                expired.push(poll);
            }
        }
        Ok(expired)
    }

    /// Writes the poll's metadata and the text of every sub-poll in one transaction.
    pub async fn update_poll(&self, poll: &Poll) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE polls
            SET title = ?, description = ?, deadline = ?, is_secret = ?, notify_members = ?
            WHERE id = ?
            "#,
        )
        .bind(&poll.title)
        .bind(&poll.description)
        .bind(poll.deadline)
        .bind(poll.is_secret)
        .bind(poll.notify_members)
        .bind(&poll.id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(PollError::PollNotFound);
        }

        for sub_poll in &poll.sub_polls {
            let updated = sqlx::query(
                r#"
                UPDATE sub_polls
                SET title = ?, description = ?
                WHERE id = ? AND poll_id = ?
                "#,
            )
            .bind(&sub_poll.title)
            .bind(&sub_poll.description)
            .bind(&sub_poll.id)
            .bind(&poll.id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if updated == 0 {
                return Err(PollError::SubPollNotFound(sub_poll.id.clone()));
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Sets the status and, if given, a new deadline. Returns false when the poll does not exist.
    pub async fn set_poll_status(
        &self,
        poll_id: &str,
        status: PollStatus,
        deadline: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let result = match deadline {
            Some(deadline) => {
                sqlx::query("UPDATE polls SET status = ?, deadline = ? WHERE id = ?")
                    .bind(status.as_str())
                    .bind(deadline)
                    .bind(poll_id)
                    .execute(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("UPDATE polls SET status = ? WHERE id = ?")
                    .bind(status.as_str())
                    .bind(poll_id)
                    .execute(&self.pool)
                    .await?
            }
        };
        Ok(result.rows_affected() > 0)
    }

    pub async fn update_poll_message_id(&self, poll_id: &str, message_id: &str) -> Result<()> {
        sqlx::query("UPDATE polls SET message_id = ? WHERE id = ?")
            .bind(message_id)
            .bind(poll_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // Votes

    /// Inserts a whole ballot in one transaction. Nothing is written if any row fails.
    pub async fn insert_votes(&self, votes: &[Vote]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for vote in votes {
            sqlx::query(
                r#"
                INSERT INTO votes (id, poll_id, sub_poll_id, user_id, vote, comment, voted_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&vote.id)
            .bind(&vote.poll_id)
            .bind(&vote.sub_poll_id)
            .bind(&vote.user_id)
            .bind(vote.vote.as_str())
            .bind(&vote.comment)
            .bind(vote.voted_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_poll_votes(&self, poll_id: &str) -> Result<Vec<Vote>> {
        sqlx::query(
            r#"
            SELECT id, poll_id, sub_poll_id, user_id, vote, comment, voted_at
            FROM votes
            WHERE poll_id = ?
            "#,
        )
        .bind(poll_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(vote_from_row)
        .collect()
    }

    pub async fn get_user_poll_votes(&self, poll_id: &str, user_id: &str) -> Result<Vec<Vote>> {
        sqlx::query(
            r#"
            SELECT id, poll_id, sub_poll_id, user_id, vote, comment, voted_at
            FROM votes
            WHERE poll_id = ? AND user_id = ?
            "#,
        )
        .bind(poll_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(vote_from_row)
        .collect()
    }

    pub async fn user_has_voted(&self, poll_id: &str, user_id: &str) -> Result<bool> {
        let exists = sqlx::query("SELECT 1 FROM votes WHERE poll_id = ? AND user_id = ? LIMIT 1")
            .bind(poll_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .is_some();
        Ok(exists)
    }

    pub async fn count_poll_votes(&self, poll_id: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM votes WHERE poll_id = ?")
            .bind(poll_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    pub async fn delete_user_votes(&self, poll_id: &str, user_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM votes WHERE poll_id = ? AND user_id = ?")
            .bind(poll_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_all_votes(&self, poll_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM votes WHERE poll_id = ?")
            .bind(poll_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // Attachments

    pub async fn insert_attachment(&self, attachment: &PollAttachment) -> Result<()> {
        Self::insert_attachment_with(&self.pool, attachment).await
    }

    async fn insert_attachment_with<'e, E>(executor: E, attachment: &PollAttachment) -> Result<()>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            r#"
            INSERT INTO poll_attachments (id, poll_id, file_name, path, size, mime_type, uploaded_by, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&attachment.id)
        .bind(&attachment.poll_id)
        .bind(&attachment.file_name)
        .bind(&attachment.path)
        .bind(attachment.size as i64)
        .bind(&attachment.mime_type)
        .bind(&attachment.uploaded_by)
        .bind(attachment.created_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn list_attachments(&self, poll_id: &str) -> Result<Vec<PollAttachment>> {
        sqlx::query(
            r#"
            SELECT id, poll_id, file_name, path, size, mime_type, uploaded_by, created_at
            FROM poll_attachments
            WHERE poll_id = ?
            ORDER BY created_at
            "#,
        )
        .bind(poll_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(attachment_from_row)
        .collect()
    }
}

fn poll_from_row(row: &SqliteRow, sub_polls: Vec<SubPoll>) -> Result<Poll> {
    let status: String = row.try_get("status")?;
    Ok(Poll {
        id: row.try_get("id")?,
        guild_id: row.try_get("guild_id")?,
        channel_id: row.try_get("channel_id")?,
        message_id: row.try_get("message_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        deadline: row.try_get("deadline")?,
        status: status.parse()?,
        is_secret: row.try_get("is_secret")?,
        notify_members: row.try_get("notify_members")?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
        sub_polls,
    })
}

fn sub_poll_from_row(row: &SqliteRow) -> Result<SubPoll> {
    Ok(SubPoll {
        id: row.try_get("id")?,
        poll_id: row.try_get("poll_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        position: row.try_get("position")?,
    })
}

fn attachment_from_row(row: &SqliteRow) -> Result<PollAttachment> {
    Ok(PollAttachment {
        id: row.try_get("id")?,
        poll_id: row.try_get("poll_id")?,
        file_name: row.try_get("file_name")?,
        path: row.try_get("path")?,
        size: row.try_get::<i64, _>("size")?.max(0) as u64,
        mime_type: row.try_get("mime_type")?,
        uploaded_by: row.try_get("uploaded_by")?,
        created_at: row.try_get("created_at")?,
    })
}

fn vote_from_row(row: &SqliteRow) -> Result<Vote> {
    let vote: String = row.try_get("vote")?;
    Ok(Vote {
        id: row.try_get("id")?,
        poll_id: row.try_get("poll_id")?,
        sub_poll_id: row.try_get("sub_poll_id")?,
        user_id: row.try_get("user_id")?,
        vote: vote.parse()?,
        comment: row.try_get("comment")?,
        voted_at: row.try_get("voted_at")?,
    })
}
