use crate::error::StoreError;
use crate::models::*;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::sync::Mutex;
use uuid::Uuid;

/// Message Store (§4.1) + Agent Repository (§4.2) over a single SQLite
/// connection. All access goes through one `Mutex<Connection>`, the
/// reference codebase's convention; every insert additionally runs inside an
/// `IMMEDIATE` transaction so the per-agent sequence read/insert pair (I2) is
/// atomic even if the mutex is later relaxed to a connection pool.
pub struct Database {
    conn: Mutex<Connection>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_db_with_agent() -> (Database, String) {
        let db = Database::new(":memory:").expect("in-memory db should initialize");
        let agent = Agent::new(AgentKind::Synthetic, "hello world", Configuration::default());
        db.save_agent(&agent).expect("agent should insert");
        (db, agent.id)
    }

    #[test]
    fn save_message_assigns_gap_free_sequence_numbers() {
        let (db, agent_id) = setup_db_with_agent();
        for i in 0..5 {
            let m = db
                .save_message(NewMessage {
                    agent_id: agent_id.clone(),
                    kind: MessageKind::Assistant,
                    role: None,
                    content: format!("line {i}"),
                    raw: None,
                    metadata: None,
                })
                .expect("message should insert");
            assert_eq!(m.sequence_number, i + 1);
        }
        let all = db.find_by_agent_id(&agent_id).expect("query should succeed");
        assert_eq!(all.len(), 5);
        let seqs: Vec<i64> = all.iter().map(|m| m.sequence_number).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn save_message_on_missing_agent_fails_and_inserts_nothing() {
        let db = Database::new(":memory:").expect("in-memory db should initialize");
        let result = db.save_message(NewMessage {
            agent_id: Uuid::new_v4().to_string(),
            kind: MessageKind::User,
            role: None,
            content: "orphan".to_string(),
            raw: None,
            metadata: None,
        });
        assert!(matches!(result, Err(StoreError::ForeignKey(_))));
    }

    #[test]
    fn empty_string_content_is_distinct_from_absent_metadata() {
        let (db, agent_id) = setup_db_with_agent();
        let m = db
            .save_message(NewMessage {
                agent_id,
                kind: MessageKind::System,
                role: None,
                content: String::new(),
                raw: None,
                metadata: None,
            })
            .expect("empty content should be valid for system messages");
        assert_eq!(m.content, "");
        assert!(m.metadata.is_none());
    }

    #[test]
    fn find_by_agent_id_since_returns_only_newer_messages() {
        let (db, agent_id) = setup_db_with_agent();
        for i in 0..3 {
            db.save_message(NewMessage {
                agent_id: agent_id.clone(),
                kind: MessageKind::Assistant,
                role: None,
                content: format!("m{i}"),
                raw: None,
                metadata: None,
            })
            .unwrap();
        }
        let since = db.find_by_agent_id_since(&agent_id, 1).unwrap();
        assert_eq!(since.len(), 2);
        assert_eq!(since[0].sequence_number, 2);
    }

    #[test]
    fn delete_agent_cascades_to_messages() {
        let (db, agent_id) = setup_db_with_agent();
        db.save_message(NewMessage {
            agent_id: agent_id.clone(),
            kind: MessageKind::User,
            role: None,
            content: "hi".to_string(),
            raw: None,
            metadata: None,
        })
        .unwrap();
        db.delete_agent(&agent_id).expect("delete should succeed");
        assert!(db.find_by_agent_id(&agent_id).unwrap().is_empty());
        assert!(!db.agent_exists(&agent_id).unwrap());
    }

    #[test]
    fn save_agent_updates_in_place_and_preserves_messages() {
        let (db, agent_id) = setup_db_with_agent();
        db.save_message(NewMessage {
            agent_id: agent_id.clone(),
            kind: MessageKind::User,
            role: None,
            content: "hi".to_string(),
            raw: None,
            metadata: None,
        })
        .unwrap();

        let mut agent = db.find_agent_by_id(&agent_id).unwrap().expect("agent exists");
        agent.status = AgentStatus::Running;
        db.save_agent(&agent).expect("status update should succeed");

        let reloaded = db.find_agent_by_id(&agent_id).unwrap().unwrap();
        assert_eq!(reloaded.status, AgentStatus::Running);
        assert_eq!(db.find_by_agent_id(&agent_id).unwrap().len(), 1);
    }

    #[test]
    fn gap_detection_flags_a_missing_sequence_number() {
        assert!(!Database::has_gap(&[1, 2, 3]));
        assert!(Database::has_gap(&[1, 3, 4]));
        assert!(!Database::has_gap(&[]));
        assert!(!Database::has_gap(&[1]));
    }

    #[test]
    fn schema_bootstrap_is_idempotent() {
        let db = Database::new(":memory:").expect("first bootstrap should succeed");
        db.initialize().expect("second bootstrap should be a no-op");
    }
}

impl Database {
    pub fn new(path: &str) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.initialize()?;
        Ok(db)
    }

    /// Idempotent schema bootstrap (§6): safe to run on every startup.
    fn initialize(&self) -> rusqlite::Result<()> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                type TEXT NOT NULL,
                status TEXT NOT NULL,
                prompt TEXT NOT NULL,
                configuration TEXT NOT NULL,
                error TEXT,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT
            );
            CREATE TABLE IF NOT EXISTS agent_messages (
                id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
                sequence_number INTEGER NOT NULL,
                type TEXT NOT NULL,
                role TEXT,
                content TEXT NOT NULL,
                raw TEXT,
                metadata TEXT,
                created_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_agent_messages_agent_seq
                ON agent_messages(agent_id, sequence_number);
            ",
        )
    }

    // ── Message Store (§4.1) ────────────────────────────────────────────

    pub fn save_message(&self, new_message: NewMessage) -> Result<Message, StoreError> {
        let mut conn = self.conn.lock().expect("db mutex poisoned");
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let agent_exists: bool = tx
            .query_row(
                "SELECT 1 FROM agents WHERE id = ?1",
                params![new_message.agent_id],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        if !agent_exists {
            return Err(StoreError::ForeignKey(format!(
                "agent {} does not exist",
                new_message.agent_id
            )));
        }

        let next_seq: i64 = tx.query_row(
            "SELECT COALESCE(MAX(sequence_number), 0) + 1 FROM agent_messages WHERE agent_id = ?1",
            params![new_message.agent_id],
            |row| row.get(0),
        )?;

        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let metadata_json = new_message
            .metadata
            .as_ref()
            .map(|v| serde_json::to_string(v))
            .transpose()
            .map_err(|e| StoreError::Invalid(e.to_string()))?;

        tx.execute(
            "INSERT INTO agent_messages
                (id, agent_id, sequence_number, type, role, content, raw, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id,
                new_message.agent_id,
                next_seq,
                new_message.kind.as_str(),
                new_message.role,
                new_message.content,
                new_message.raw,
                metadata_json,
                created_at.to_rfc3339(),
            ],
        )?;
        tx.commit()?;

        Ok(Message {
            id,
            agent_id: new_message.agent_id,
            sequence_number: next_seq,
            kind: new_message.kind,
            role: new_message.role,
            content: new_message.content,
            raw: new_message.raw,
            metadata: new_message.metadata,
            created_at,
        })
    }

    pub fn find_by_agent_id(&self, agent_id: &str) -> Result<Vec<Message>, StoreError> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, agent_id, sequence_number, type, role, content, raw, metadata, created_at
             FROM agent_messages WHERE agent_id = ?1 ORDER BY sequence_number ASC",
        )?;
        let rows = stmt
            .query_map(params![agent_id], Self::row_to_message)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn find_by_agent_id_since(
        &self,
        agent_id: &str,
        since_sequence: i64,
    ) -> Result<Vec<Message>, StoreError> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, agent_id, sequence_number, type, role, content, raw, metadata, created_at
             FROM agent_messages
             WHERE agent_id = ?1 AND sequence_number > ?2
             ORDER BY sequence_number ASC",
        )?;
        let rows = stmt
            .query_map(params![agent_id, since_sequence], Self::row_to_message)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Given ordered sequence numbers, report whether any adjacent pair
    /// differs by more than 1 (consumer-facing reconnect helper, §4.1).
    pub fn has_gap(sequence_numbers: &[i64]) -> bool {
        sequence_numbers
            .windows(2)
            .any(|pair| pair[1] - pair[0] > 1)
    }

    fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<Message> {
        let kind_raw: String = row.get(3)?;
        let metadata_raw: Option<String> = row.get(7)?;
        let created_raw: String = row.get(8)?;
        Ok(Message {
            id: row.get(0)?,
            agent_id: row.get(1)?,
            sequence_number: row.get(2)?,
            kind: MessageKind::parse(&kind_raw).unwrap_or(MessageKind::System),
            role: row.get(4)?,
            content: row.get(5)?,
            raw: row.get(6)?,
            metadata: metadata_raw
                .map(|raw| serde_json::from_str::<Value>(&raw))
                .transpose()
                .unwrap_or(None),
            created_at: DateTime::parse_from_rfc3339(&created_raw)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }

    // ── Agent Repository (§4.2) ─────────────────────────────────────────

    /// Upsert via `UPDATE` rather than `REPLACE` so cascade-delete is never
    /// triggered by a status change (I3).
    pub fn save_agent(&self, agent: &Agent) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let configuration_json = serde_json::to_string(&agent.configuration)
            .map_err(|e| StoreError::Invalid(e.to_string()))?;

        let updated = conn.execute(
            "UPDATE agents SET
                type = ?2, status = ?3, prompt = ?4, configuration = ?5,
                error = ?6, started_at = ?7, completed_at = ?8
             WHERE id = ?1",
            params![
                agent.id,
                agent.kind.as_str(),
                agent.status.as_str(),
                agent.prompt,
                configuration_json,
                agent.error,
                agent.started_at.map(|t| t.to_rfc3339()),
                agent.completed_at.map(|t| t.to_rfc3339()),
            ],
        )?;

        if updated == 0 {
            conn.execute(
                "INSERT INTO agents
                    (id, type, status, prompt, configuration, error, created_at, started_at, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    agent.id,
                    agent.kind.as_str(),
                    agent.status.as_str(),
                    agent.prompt,
                    configuration_json,
                    agent.error,
                    agent.created_at.to_rfc3339(),
                    agent.started_at.map(|t| t.to_rfc3339()),
                    agent.completed_at.map(|t| t.to_rfc3339()),
                ],
            )?;
        }
        Ok(())
    }

    pub fn find_agent_by_id(&self, id: &str) -> Result<Option<Agent>, StoreError> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        conn.query_row(
            "SELECT id, type, status, prompt, configuration, error, created_at, started_at, completed_at
             FROM agents WHERE id = ?1",
            params![id],
            Self::row_to_agent,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn find_all_agents(&self) -> Result<Vec<Agent>, StoreError> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, type, status, prompt, configuration, error, created_at, started_at, completed_at
             FROM agents ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map([], Self::row_to_agent)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn find_agents_by_status(&self, status: AgentStatus) -> Result<Vec<Agent>, StoreError> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, type, status, prompt, configuration, error, created_at, started_at, completed_at
             FROM agents WHERE status = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map(params![status.as_str()], Self::row_to_agent)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn find_agents_by_kind(&self, kind: AgentKind) -> Result<Vec<Agent>, StoreError> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, type, status, prompt, configuration, error, created_at, started_at, completed_at
             FROM agents WHERE type = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map(params![kind.as_str()], Self::row_to_agent)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn delete_agent(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        conn.execute("DELETE FROM agents WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn agent_exists(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let exists = conn
            .query_row("SELECT 1 FROM agents WHERE id = ?1", params![id], |_| Ok(true))
            .optional()?
            .unwrap_or(false);
        Ok(exists)
    }

    fn row_to_agent(row: &rusqlite::Row) -> rusqlite::Result<Agent> {
        let kind_raw: String = row.get(1)?;
        let status_raw: String = row.get(2)?;
        let configuration_raw: String = row.get(4)?;
        let created_raw: String = row.get(6)?;
        let started_raw: Option<String> = row.get(7)?;
        let completed_raw: Option<String> = row.get(8)?;

        let parse_ts = |raw: &str| {
            DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now())
        };

        Ok(Agent {
            id: row.get(0)?,
            kind: AgentKind::parse(&kind_raw).unwrap_or(AgentKind::Synthetic),
            status: AgentStatus::parse(&status_raw).unwrap_or(AgentStatus::Failed),
            prompt: row.get(3)?,
            configuration: serde_json::from_str(&configuration_raw).unwrap_or_default(),
            error: row.get(5)?,
            created_at: parse_ts(&created_raw),
            started_at: started_raw.as_deref().map(parse_ts),
            completed_at: completed_raw.as_deref().map(parse_ts),
        })
    }
}
