//! Reply persistence using SQLite

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use super::ReplyRepository;
use crate::models::{Prompt, Reply, TenantId};
use crate::{Error, Result};

/// SQLite-based reply repository
#[derive(Clone)]
pub struct SqliteReplyRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteReplyRepository {
    /// Open (or create) the database at the given path
    pub fn new(db_path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    /// Create an in-memory repository (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let repo = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        repo.init_tables()?;
        Ok(repo)
    }

    /// Initialize database tables
    fn init_tables(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS prompts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                enterprise_id TEXT NOT NULL,
                body TEXT NOT NULL,
                available INTEGER NOT NULL DEFAULT 1
            );
            CREATE TABLE IF NOT EXISTS replies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                enterprise_id TEXT NOT NULL,
                trigger_text TEXT NOT NULL,
                body TEXT NOT NULL,
                ending INTEGER NOT NULL DEFAULT 0,
                available INTEGER NOT NULL DEFAULT 1
            );
            CREATE INDEX IF NOT EXISTS idx_prompts_enterprise ON prompts(enterprise_id);
            CREATE INDEX IF NOT EXISTS idx_replies_enterprise ON replies(enterprise_id);",
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::LockPoisoned)
    }

    /// Insert a prompt for a tenant
    pub fn insert_prompt(&self, tenant: &TenantId, prompt: &Prompt) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO prompts (enterprise_id, body, available) VALUES (?1, ?2, ?3)",
            params![tenant.as_str(), prompt.body, prompt.available],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Insert a reply for a tenant
    pub fn insert_reply(&self, tenant: &TenantId, reply: &Reply) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO replies (enterprise_id, trigger_text, body, ending, available)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                tenant.as_str(),
                reply.trigger,
                reply.body,
                reply.ending,
                reply.available
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn query_prompt(&self, tenant: &TenantId) -> Result<Option<Prompt>> {
        let conn = self.lock()?;
        let prompt = conn
            .query_row(
                "SELECT body, available FROM prompts
                 WHERE enterprise_id = ?1 AND available = 1
                 ORDER BY id DESC LIMIT 1",
                params![tenant.as_str()],
                |row| {
                    Ok(Prompt {
                        body: row.get(0)?,
                        available: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(prompt)
    }

    // SQLite's LOWER() only folds ASCII, so triggers are compared in Rust.
    fn query_reply(&self, tenant: &TenantId, trigger: &str) -> Result<Option<Reply>> {
        let wanted = trigger.to_lowercase();
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT trigger_text, body, ending, available FROM replies
             WHERE enterprise_id = ?1 AND available = 1
             ORDER BY id ASC",
        )?;

        let replies = stmt.query_map(params![tenant.as_str()], |row| {
            Ok(Reply {
                trigger: row.get(0)?,
                body: row.get(1)?,
                ending: row.get(2)?,
                available: row.get(3)?,
            })
        })?;

        for reply in replies {
            let reply = reply?;
            if reply.trigger.to_lowercase() == wanted {
                return Ok(Some(reply));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl ReplyRepository for SqliteReplyRepository {
    async fn find_prompt(&self, tenant: &TenantId) -> Result<Option<Prompt>> {
        let repo = self.clone();
        let tenant = tenant.clone();
        let prompt = tokio::task::spawn_blocking(move || repo.query_prompt(&tenant))
            .await
            .map_err(|e| Error::Other(format!("Prompt lookup task failed: {}", e)))??;
        debug!(found = prompt.is_some(), "Prompt lookup");
        Ok(prompt)
    }

    async fn find_reply(&self, tenant: &TenantId, trigger: &str) -> Result<Option<Reply>> {
        let repo = self.clone();
        let tenant = tenant.clone();
        let trigger = trigger.to_string();
        let reply = tokio::task::spawn_blocking(move || repo.query_reply(&tenant, &trigger))
            .await
            .map_err(|e| Error::Other(format!("Reply lookup task failed: {}", e)))??;
        debug!(found = reply.is_some(), "Reply lookup");
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(trigger: &str, body: &str, ending: bool, available: bool) -> Reply {
        Reply {
            trigger: trigger.to_string(),
            body: body.to_string(),
            ending,
            available,
        }
    }

    #[tokio::test]
    async fn test_find_prompt() {
        let repo = SqliteReplyRepository::in_memory().unwrap();
        let tenant = TenantId::from("acme");

        assert!(repo.find_prompt(&tenant).await.unwrap().is_none());

        repo.insert_prompt(
            &tenant,
            &Prompt {
                body: "Welcome! Type 1 or 2".to_string(),
                available: true,
            },
        )
        .unwrap();

        let prompt = repo.find_prompt(&tenant).await.unwrap().unwrap();
        assert_eq!(prompt.body, "Welcome! Type 1 or 2");
    }

    #[tokio::test]
    async fn test_unavailable_prompt_is_ignored() {
        let repo = SqliteReplyRepository::in_memory().unwrap();
        let tenant = TenantId::from("acme");
        repo.insert_prompt(
            &tenant,
            &Prompt {
                body: "hidden".to_string(),
                available: false,
            },
        )
        .unwrap();

        assert!(repo.find_prompt(&tenant).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_reply_case_insensitive() {
        let repo = SqliteReplyRepository::in_memory().unwrap();
        let tenant = TenantId::from("acme");
        repo.insert_reply(&tenant, &reply("hi", "Hello there", true, true))
            .unwrap();

        let found = repo.find_reply(&tenant, "HI").await.unwrap().unwrap();
        assert_eq!(found.body, "Hello there");
        assert!(found.ending);

        assert!(repo.find_reply(&tenant, "hi!").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_reply_non_ascii_trigger() {
        let repo = SqliteReplyRepository::in_memory().unwrap();
        let tenant = TenantId::from("acme");
        repo.insert_reply(&tenant, &reply("Olá", "Oi!", false, true))
            .unwrap();

        let found = repo.find_reply(&tenant, "OLÁ").await.unwrap();
        assert_eq!(found.map(|r| r.body), Some("Oi!".to_string()));
    }

    #[tokio::test]
    async fn test_poisoned_lock_is_reported() {
        let repo = SqliteReplyRepository::in_memory().unwrap();
        let conn = Arc::clone(&repo.conn);
        let _ = std::thread::spawn(move || {
            let _guard = conn.lock().unwrap();
            panic!("poison the connection lock");
        })
        .join();

        let result = repo.find_prompt(&TenantId::from("acme")).await;
        assert!(matches!(result, Err(Error::LockPoisoned)));
    }

    #[tokio::test]
    async fn test_find_reply_filters() {
        let repo = SqliteReplyRepository::in_memory().unwrap();
        let acme = TenantId::from("acme");
        let other = TenantId::from("other");
        repo.insert_reply(&acme, &reply("menu", "off", false, false))
            .unwrap();
        repo.insert_reply(&other, &reply("menu", "other menu", false, true))
            .unwrap();

        assert!(repo.find_reply(&acme, "menu").await.unwrap().is_none());
        let found = repo.find_reply(&other, "Menu").await.unwrap().unwrap();
        assert_eq!(found.body, "other menu");
    }

    #[tokio::test]
    async fn test_file_backed_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("replies.db");
        let path = path.to_str().unwrap();

        let repo = SqliteReplyRepository::new(path).unwrap();
        repo.insert_reply(&TenantId::from("acme"), &reply("1", "one", false, true))
            .unwrap();
        drop(repo);

        let reopened = SqliteReplyRepository::new(path).unwrap();
        let found = reopened
            .find_reply(&TenantId::from("acme"), "1")
            .await
            .unwrap();
        assert!(found.is_some());
    }
}
