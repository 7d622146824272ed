//! Database row types. These map directly to SQLite rows and are kept apart
//! from the snow-types models so the DB layer stays independent; the
//! `into_*` helpers do the decoding.

use snow_types::models::{ChatMessage, Conversation, Post, Role, User};
use uuid::Uuid;

use crate::{DatabaseError, Result, parse_timestamp};

#[derive(Debug)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    /// Argon2 PHC string, never the plaintext.
    pub password: String,
    pub created_at: String,
}

#[derive(Debug)]
pub struct PostRow {
    pub id: String,
    pub title: String,
    pub content: String,
    pub author_id: String,
    pub author_username: String,
    pub created_at: String,
    pub image_url: Option<String>,
}

pub struct ConversationRow {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: String,
}

#[derive(Debug)]
pub struct ChatMessageRow {
    pub id: String,
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    pub timestamp: String,
}

fn parse_uuid(column: &'static str, value: &str) -> Result<Uuid> {
    value.parse().map_err(|_| DatabaseError::Corrupt {
        column,
        value: value.to_string(),
    })
}

impl UserRow {
    pub fn into_user(self) -> Result<User> {
        Ok(User {
            id: parse_uuid("users.id", &self.id)?,
            username: self.username,
            created_at: parse_timestamp("users.created_at", &self.created_at)?,
        })
    }
}

impl PostRow {
    pub fn into_post(self) -> Result<Post> {
        Ok(Post {
            id: parse_uuid("posts.id", &self.id)?,
            title: self.title,
            content: self.content,
            author_id: parse_uuid("posts.author_id", &self.author_id)?,
            author_username: self.author_username,
            created_at: parse_timestamp("posts.created_at", &self.created_at)?,
            image_url: self.image_url,
        })
    }
}

impl ConversationRow {
    pub fn into_conversation(self) -> Result<Conversation> {
        Ok(Conversation {
            id: parse_uuid("conversations.id", &self.id)?,
            user_id: parse_uuid("conversations.user_id", &self.user_id)?,
            title: self.title,
            created_at: parse_timestamp("conversations.created_at", &self.created_at)?,
        })
    }
}

impl ChatMessageRow {
    pub fn into_message(self) -> Result<ChatMessage> {
        let role: Role = self.role.parse().map_err(|_| DatabaseError::Corrupt {
            column: "chat_messages.role",
            value: self.role.clone(),
        })?;

        Ok(ChatMessage {
            id: parse_uuid("chat_messages.id", &self.id)?,
            conversation_id: parse_uuid("chat_messages.conversation_id", &self.conversation_id)?,
            role,
            content: self.content,
            timestamp: parse_timestamp("chat_messages.timestamp", &self.timestamp)?,
        })
    }
}
