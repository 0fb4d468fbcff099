use crate::Database;
use crate::models::{ChatRow, MessageRow, StreamRow};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};

impl Database {
    // -- Chats --

    pub fn insert_chat(&self, chat: &ChatRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO chats (id, user_id, title, visibility, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![chat.id, chat.user_id, chat.title, chat.visibility, chat.created_at],
            )?;
            Ok(())
        })
    }

    pub fn get_chat(&self, id: &str) -> Result<Option<ChatRow>> {
        self.with_conn(|conn| query_chat(conn, id))
    }

    /// Delete a chat with its messages and stream records. Returns the removed row,
    /// or `None` if no chat had that id.
    pub fn delete_chat(&self, id: &str) -> Result<Option<ChatRow>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let Some(chat) = query_chat(&tx, id)? else {
                return Ok(None);
            };
            tx.execute("DELETE FROM messages WHERE chat_id = ?1", [id])?;
            tx.execute("DELETE FROM streams WHERE chat_id = ?1", [id])?;
            tx.execute("DELETE FROM chats WHERE id = ?1", [id])?;
            tx.commit()?;
            Ok(Some(chat))
        })
    }

    // -- Messages --

    /// Insert a batch of messages in one transaction: either all rows land or none do.
    pub fn insert_messages(&self, rows: &[MessageRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO messages (id, chat_id, role, parts, attachments, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for row in rows {
                    stmt.execute(rusqlite::params![
                        row.id,
                        row.chat_id,
                        row.role,
                        row.parts,
                        row.attachments,
                        row.created_at,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// All messages of a chat, oldest first. Insertion order breaks timestamp ties.
    pub fn get_messages(&self, chat_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, chat_id, role, parts, attachments, created_at
                 FROM messages
                 WHERE chat_id = ?1
                 ORDER BY created_at ASC, rowid ASC",
            )?;

            let rows = stmt
                .query_map([chat_id], |row| {
                    Ok(MessageRow {
                        id: row.get(0)?,
                        chat_id: row.get(1)?,
                        role: row.get(2)?,
                        parts: row.get(3)?,
                        attachments: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Number of `user` messages across all chats owned by `user_id` created at or after `since`.
    pub fn count_user_messages(&self, user_id: &str, since: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*)
                 FROM messages m
                 JOIN chats c ON m.chat_id = c.id
                 WHERE c.user_id = ?1 AND m.role = 'user' AND m.created_at >= ?2",
                rusqlite::params![user_id, since],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    // -- Streams --

    pub fn insert_stream(&self, stream: &StreamRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO streams (id, chat_id, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![stream.id, stream.chat_id, stream.created_at],
            )?;
            Ok(())
        })
    }

    /// Stream records of a chat, oldest first.
    pub fn get_streams(&self, chat_id: &str) -> Result<Vec<StreamRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, chat_id, created_at FROM streams
                 WHERE chat_id = ?1
                 ORDER BY created_at ASC, rowid ASC",
            )?;
            let rows = stmt
                .query_map([chat_id], |row| {
                    Ok(StreamRow {
                        id: row.get(0)?,
                        chat_id: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn query_chat(conn: &Connection, id: &str) -> Result<Option<ChatRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, title, visibility, created_at FROM chats WHERE id = ?1",
    )?;

    let row = stmt
        .query_row([id], |row| {
            Ok(ChatRow {
                id: row.get(0)?,
                user_id: row.get(1)?,
                title: row.get(2)?,
                visibility: row.get(3)?,
                created_at: row.get(4)?,
            })
        })
        .optional()?;

    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(id: &str, owner: &str) -> ChatRow {
        ChatRow {
            id: id.into(),
            user_id: owner.into(),
            title: "t".into(),
            visibility: "private".into(),
            created_at: "2026-01-01T00:00:00.000000Z".into(),
        }
    }

    fn message(id: &str, chat_id: &str, role: &str, at: &str) -> MessageRow {
        MessageRow {
            id: id.into(),
            chat_id: chat_id.into(),
            role: role.into(),
            parts: r#"[{"type":"text","text":"hi"}]"#.into(),
            attachments: "[]".into(),
            created_at: at.into(),
        }
    }

    #[test]
    fn batch_insert_is_all_or_nothing() {
        let db = Database::open_in_memory().unwrap();
        db.insert_chat(&chat("c1", "u1")).unwrap();

        let batch = vec![
            message("m1", "c1", "user", "2026-01-01T00:00:01.000000Z"),
            // Unknown chat violates the foreign key and must roll back m1 too.
            message("m2", "missing", "assistant", "2026-01-01T00:00:02.000000Z"),
        ];
        assert!(db.insert_messages(&batch).is_err());
        assert!(db.get_messages("c1").unwrap().is_empty());
    }

    #[test]
    fn counts_only_recent_user_messages_of_owner() {
        let db = Database::open_in_memory().unwrap();
        db.insert_chat(&chat("c1", "u1")).unwrap();
        db.insert_chat(&chat("c2", "u2")).unwrap();
        db.insert_messages(&[
            message("old", "c1", "user", "2026-01-01T00:00:00.000000Z"),
            message("new", "c1", "user", "2026-01-03T00:00:00.000000Z"),
            message("bot", "c1", "assistant", "2026-01-03T00:00:01.000000Z"),
            message("other", "c2", "user", "2026-01-03T00:00:02.000000Z"),
        ])
        .unwrap();

        assert_eq!(db.count_user_messages("u1", "2026-01-02T00:00:00.000000Z").unwrap(), 1);
        assert_eq!(db.count_user_messages("u1", "2025-12-31T00:00:00.000000Z").unwrap(), 2);
    }

    #[test]
    fn delete_removes_messages_and_streams() {
        let db = Database::open_in_memory().unwrap();
        db.insert_chat(&chat("c1", "u1")).unwrap();
        db.insert_messages(&[message("m1", "c1", "user", "2026-01-01T00:00:01.000000Z")])
            .unwrap();
        db.insert_stream(&StreamRow {
            id: "s1".into(),
            chat_id: "c1".into(),
            created_at: "2026-01-01T00:00:01.000000Z".into(),
        })
        .unwrap();

        let deleted = db.delete_chat("c1").unwrap().unwrap();
        assert_eq!(deleted.id, "c1");
        assert!(db.get_chat("c1").unwrap().is_none());
        assert!(db.get_messages("c1").unwrap().is_empty());
        assert!(db.get_streams("c1").unwrap().is_empty());
        assert!(db.delete_chat("c1").unwrap().is_none());
    }
}
