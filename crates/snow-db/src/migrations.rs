use rusqlite::Connection;
use tracing::info;

use crate::Result;

/// Create the schema. Safe to call on every startup.
pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS posts (
            id          TEXT PRIMARY KEY,
            title       TEXT NOT NULL,
            content     TEXT NOT NULL,
            author_id   TEXT NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_posts_created
            ON posts(created_at);

        CREATE TABLE IF NOT EXISTS conversations (
            id          TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL REFERENCES users(id),
            title       TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_user
            ON conversations(user_id, created_at);

        CREATE TABLE IF NOT EXISTS chat_messages (
            id              TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            role            TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
            content         TEXT NOT NULL,
            timestamp       TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_chat_messages_conversation
            ON chat_messages(conversation_id, timestamp);
        ",
    )?;

    // Post images shipped after the first release
    add_column_if_missing(conn, "posts", "image_url", "TEXT")?;

    info!("Database migrations complete");
    Ok(())
}

fn add_column_if_missing(conn: &Connection, table: &str, column: &str, decl: &str) -> Result<()> {
    if has_column(conn, table, column)? {
        return Ok(());
    }

    conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl};"))?;
    info!("Added column {}.{}", table, column);
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(names.iter().any(|name| name == column))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();
        assert!(has_column(&conn, "posts", "image_url").unwrap());
    }

    #[test]
    fn adds_image_url_to_legacy_posts_table() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE users (
                id TEXT PRIMARY KEY, username TEXT NOT NULL UNIQUE,
                password TEXT NOT NULL, created_at TEXT NOT NULL
            );
            CREATE TABLE posts (
                id TEXT PRIMARY KEY, title TEXT NOT NULL, content TEXT NOT NULL,
                author_id TEXT NOT NULL REFERENCES users(id), created_at TEXT NOT NULL
            );
            INSERT INTO users VALUES ('u1', 'alice', 'x', '2024-01-01T00:00:00.000000Z');
            INSERT INTO posts VALUES ('p1', 'Old', 'body', 'u1', '2024-01-01T00:00:00.000000Z');
            ",
        )
        .unwrap();
        assert!(!has_column(&conn, "posts", "image_url").unwrap());

        run(&conn).unwrap();

        assert!(has_column(&conn, "posts", "image_url").unwrap());
        let (title, image): (String, Option<String>) = conn
            .query_row("SELECT title, image_url FROM posts WHERE id = 'p1'", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!(title, "Old");
        assert_eq!(image, None);
    }
}
