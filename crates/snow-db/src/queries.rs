use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use snow_types::models::Role;

use crate::error::{is_foreign_key_violation, is_unique_violation};
use crate::models::{ChatMessageRow, ConversationRow, PostRow, UserRow};
use crate::{Database, DatabaseError, Result, format_timestamp, now, parse_timestamp};

impl Database {
    // -- Users --

    /// Insert a user. A taken username surfaces as [`DatabaseError::AlreadyExists`].
    pub fn create_user(&self, id: &str, username: &str, password_hash: &str) -> Result<UserRow> {
        let created_at = format_timestamp(now());
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, created_at) VALUES (?1, ?2, ?3, ?4)",
                (id, username, password_hash, &created_at),
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    DatabaseError::AlreadyExists {
                        entity: "User",
                        id: username.to_string(),
                    }
                } else {
                    e.into()
                }
            })?;

            Ok(UserRow {
                id: id.to_string(),
                username: username.to_string(),
                password: password_hash.to_string(),
                created_at,
            })
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    // -- Posts --

    pub fn insert_post(
        &self,
        id: &str,
        title: &str,
        content: &str,
        author_id: &str,
        image_url: Option<&str>,
    ) -> Result<PostRow> {
        let created_at = format_timestamp(now());
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO posts (id, title, content, author_id, created_at, image_url)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![id, title, content, author_id, &created_at, image_url],
            )
            .map_err(|e| missing_parent(e, "User", author_id))?;

            let author_username: String = conn
                .query_row("SELECT username FROM users WHERE id = ?1", [author_id], |row| {
                    row.get(0)
                })?;

            Ok(PostRow {
                id: id.to_string(),
                title: title.to_string(),
                content: content.to_string(),
                author_id: author_id.to_string(),
                author_username,
                created_at,
                image_url: image_url.map(str::to_string),
            })
        })
    }

    /// Most recent posts first, each joined with its author's username.
    pub fn recent_posts(&self, limit: u32) -> Result<Vec<PostRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT p.id, p.title, p.content, p.author_id, u.username, p.created_at, p.image_url
                 FROM posts p
                 JOIN users u ON p.author_id = u.id
                 ORDER BY p.created_at DESC, p.rowid DESC
                 LIMIT ?1",
            )?;

            let rows = stmt
                .query_map([limit], |row| {
                    Ok(PostRow {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        content: row.get(2)?,
                        author_id: row.get(3)?,
                        author_username: row.get(4)?,
                        created_at: row.get(5)?,
                        image_url: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Conversations --

    pub fn insert_conversation(&self, id: &str, user_id: &str, title: &str) -> Result<ConversationRow> {
        let created_at = format_timestamp(now());
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversations (id, user_id, title, created_at) VALUES (?1, ?2, ?3, ?4)",
                (id, user_id, title, &created_at),
            )
            .map_err(|e| missing_parent(e, "User", user_id))?;

            Ok(ConversationRow {
                id: id.to_string(),
                user_id: user_id.to_string(),
                title: title.to_string(),
                created_at,
            })
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, user_id, title, created_at FROM conversations WHERE id = ?1",
                    [id],
                    conversation_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Conversations owned by `user_id`, most recently created first.
    pub fn list_conversations(&self, user_id: &str) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, title, created_at
                 FROM conversations
                 WHERE user_id = ?1
                 ORDER BY created_at DESC, rowid DESC",
            )?;

            let rows = stmt
                .query_map([user_id], conversation_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Delete a conversation and all of its messages in one transaction.
    /// Returns false when there was nothing to delete.
    pub fn delete_conversation(&self, id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM chat_messages WHERE conversation_id = ?1", [id])?;
            let removed = tx.execute("DELETE FROM conversations WHERE id = ?1", [id])?;
            tx.commit()?;

            Ok(removed > 0)
        })
    }

    // -- Chat messages --

    /// Append a message. Its timestamp is strictly later than every earlier
    /// message in the same conversation, even if the wall clock is not.
    pub fn insert_chat_message(
        &self,
        id: &str,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> Result<ChatMessageRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let exists = tx
                .query_row("SELECT 1 FROM conversations WHERE id = ?1", [conversation_id], |_| {
                    Ok(())
                })
                .optional()?
                .is_some();
            if !exists {
                return Err(DatabaseError::NotFound {
                    entity: "Conversation",
                    id: conversation_id.to_string(),
                });
            }

            let last: Option<String> = tx.query_row(
                "SELECT MAX(timestamp) FROM chat_messages WHERE conversation_id = ?1",
                [conversation_id],
                |row| row.get(0),
            )?;
            let last = last
                .map(|ts| parse_timestamp("chat_messages.timestamp", &ts))
                .transpose()?;
            let timestamp = format_timestamp(next_message_timestamp(now(), last));

            tx.execute(
                "INSERT INTO chat_messages (id, conversation_id, role, content, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (id, conversation_id, role.as_str(), content, &timestamp),
            )?;
            tx.commit()?;

            Ok(ChatMessageRow {
                id: id.to_string(),
                conversation_id: conversation_id.to_string(),
                role: role.as_str().to_string(),
                content: content.to_string(),
                timestamp,
            })
        })
    }

    /// Messages of a conversation in timestamp order, ties by insertion order.
    pub fn chat_history(&self, conversation_id: &str) -> Result<Vec<ChatMessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, role, content, timestamp
                 FROM chat_messages
                 WHERE conversation_id = ?1
                 ORDER BY timestamp ASC, rowid ASC",
            )?;

            let rows = stmt
                .query_map([conversation_id], |row| {
                    Ok(ChatMessageRow {
                        id: row.get(0)?,
                        conversation_id: row.get(1)?,
                        role: row.get(2)?,
                        content: row.get(3)?,
                        timestamp: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT id, username, password, created_at FROM users WHERE {column} = ?1");
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn missing_parent(err: rusqlite::Error, entity: &'static str, id: &str) -> DatabaseError {
    if is_foreign_key_violation(&err) {
        DatabaseError::NotFound {
            entity,
            id: id.to_string(),
        }
    } else {
        err.into()
    }
}

fn next_message_timestamp(now: DateTime<Utc>, last: Option<DateTime<Utc>>) -> DateTime<Utc> {
    match last {
        Some(last) if now <= last => last + Duration::microseconds(1),
        _ => now,
    }
}
