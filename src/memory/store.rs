//! Long-term memory over SQLite.
//!
//! Records are append-only. Each row carries the embedding it was indexed
//! with; search scores every row of a category by cosine similarity and keeps
//! the top k. There is no recency bias.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DatabaseError, MemoryError};
use crate::memory::embeddings::{EmbeddingProvider, cosine_similarity};

/// What kind of thing a record remembers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    /// One exchange between the user and the agent.
    Conversation,
    /// Something the user asked to be remembered.
    Fact,
}

impl MemoryCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conversation => "conversation",
            Self::Fact => "fact",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "conversation" => Some(Self::Conversation),
            "fact" => Some(Self::Fact),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryRecord {
    /// Time-ordered UUIDv7.
    pub id: String,
    pub category: MemoryCategory,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredRecord {
    pub record: MemoryRecord,
    pub score: f32,
}

pub struct LongTermMemory {
    conn: Mutex<Connection>,
    embeddings: Arc<dyn EmbeddingProvider>,
}

impl LongTermMemory {
    pub fn open(path: &Path, embeddings: Arc<dyn EmbeddingProvider>) -> Result<Self, MemoryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DatabaseError::from)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn, embeddings)
    }

    pub fn open_in_memory(embeddings: Arc<dyn EmbeddingProvider>) -> Result<Self, MemoryError> {
        Self::with_connection(Connection::open_in_memory()?, embeddings)
    }

    fn with_connection(
        conn: Connection,
        embeddings: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, MemoryError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS memory_records (
                id TEXT PRIMARY KEY,
                category TEXT NOT NULL,
                text TEXT NOT NULL,
                created_at TEXT NOT NULL,
                embedding BLOB NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_memory_category
                ON memory_records(category);
            ",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            embeddings,
        })
    }

    /// Embed and store `text`. Returns the new record.
    pub async fn append(
        &self,
        category: MemoryCategory,
        text: &str,
    ) -> Result<MemoryRecord, MemoryError> {
        let embedding = self.embeddings.embed(text).await?;
        let record = MemoryRecord {
            id: Uuid::now_v7().to_string(),
            category,
            text: text.to_string(),
            created_at: Utc::now(),
        };

        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO memory_records (id, category, text, created_at, embedding)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.id,
                category.as_str(),
                record.text,
                record.created_at.to_rfc3339(),
                f32_to_bytes(&embedding),
            ],
        )?;

        tracing::debug!(id = %record.id, category = category.as_str(), "Stored memory record");
        Ok(record)
    }

    /// Top `k` records of `category` by similarity to `query`, best first.
    pub async fn search(
        &self,
        category: MemoryCategory,
        query: &str,
        k: usize,
    ) -> Result<Vec<ScoredRecord>, MemoryError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query_vec = self.embeddings.embed(query).await?;

        let rows = {
            let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
            let mut stmt = conn.prepare(
                "SELECT id, category, text, created_at, embedding
                 FROM memory_records WHERE category = ?1",
            )?;
            stmt.query_map(params![category.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Vec<u8>>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?
        };

        let mut scored = Vec::new();
        for (id, cat, text, created_at, blob) in rows {
            let stored = bytes_to_f32(&blob);
            // Indexed under a different embedding provider.
            if stored.len() != query_vec.len() {
                continue;
            }
            let record = row_to_record(id, &cat, text, &created_at)?;
            scored.push(ScoredRecord {
                score: cosine_similarity(&query_vec, &stored),
                record,
            });
        }

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }

    /// Number of records in a category.
    pub fn count(&self, category: MemoryCategory) -> Result<usize, MemoryError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM memory_records WHERE category = ?1",
            params![category.as_str()],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }
}

fn row_to_record(
    id: String,
    category: &str,
    text: String,
    created_at: &str,
) -> Result<MemoryRecord, DatabaseError> {
    let corrupt = |reason: String| DatabaseError::CorruptRow {
        table: "memory_records".to_string(),
        reason,
    };
    let category = MemoryCategory::parse(category)
        .ok_or_else(|| corrupt(format!("unknown category {category:?}")))?;
    let created_at = DateTime::parse_from_rfc3339(created_at)
        .map_err(|e| corrupt(format!("bad timestamp: {e}")))?
        .with_timezone(&Utc);
    Ok(MemoryRecord {
        id,
        category,
        text,
        created_at,
    })
}

fn f32_to_bytes(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_f32(b: &[u8]) -> Vec<f32> {
    b.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::HashedEmbeddings;

    fn memory() -> LongTermMemory {
        LongTermMemory::open_in_memory(Arc::new(HashedEmbeddings::default())).unwrap()
    }

    #[tokio::test]
    async fn test_append_and_search_by_category() {
        let mem = memory();
        mem.append(MemoryCategory::Fact, "my dog is called Rex").await.unwrap();
        mem.append(MemoryCategory::Fact, "I work as a network engineer").await.unwrap();
        mem.append(MemoryCategory::Conversation, "User: what's my dog's name\nkvclaw: Rex")
            .await
            .unwrap();

        let hits = mem.search(MemoryCategory::Fact, "dog name", 3).await.unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record.text, "my dog is called Rex");
        assert!(hits.iter().all(|h| h.record.category == MemoryCategory::Fact));
    }

    #[tokio::test]
    async fn test_search_is_top_k() {
        let mem = memory();
        for i in 0..6 {
            mem.append(MemoryCategory::Conversation, &format!("exchange {i}"))
                .await
                .unwrap();
        }
        let hits = mem
            .search(MemoryCategory::Conversation, "exchange", 4)
            .await
            .unwrap();
        assert_eq!(hits.len(), 4);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_mismatched_dimension_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.db");

        let small = LongTermMemory::open(&path, Arc::new(HashedEmbeddings::new(16))).unwrap();
        small.append(MemoryCategory::Fact, "old fact").await.unwrap();
        drop(small);

        let large = LongTermMemory::open(&path, Arc::new(HashedEmbeddings::new(64))).unwrap();
        large.append(MemoryCategory::Fact, "new fact").await.unwrap();

        let hits = large.search(MemoryCategory::Fact, "fact", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.text, "new fact");
        assert_eq!(large.count(MemoryCategory::Fact).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_ids_are_time_ordered() {
        let mem = memory();
        let a = mem.append(MemoryCategory::Fact, "a").await.unwrap();
        let b = mem.append(MemoryCategory::Fact, "b").await.unwrap();
        assert!(a.id < b.id);
    }

    #[test]
    fn test_blob_roundtrip_is_little_endian() {
        let bytes = f32_to_bytes(&[1.0]);
        assert_eq!(bytes, 1.0f32.to_le_bytes().to_vec());
        assert_eq!(bytes_to_f32(&bytes), vec![1.0]);
    }
}
