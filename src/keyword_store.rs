//! KeywordStore (§4.5): BM25 (Okapi, `k1=1.2`, `b=0.75`) over postings kept in
//! a small SQLite file (`keywords.db`), so `open` is cheap and queries work
//! immediately after daemon startup without replaying ingest history.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Error, Result};

const K1: f32 = 1.2;
const B: f32 = 0.75;

pub struct KeywordStore {
    pool: SqlitePool,
}

impl KeywordStore {
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| Error::Ingest(format!("invalid keyword store path: {e}")))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| Error::Ingest(format!("failed to open keyword store: {e}")))?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                length INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS term_postings (
                term TEXT NOT NULL,
                id TEXT NOT NULL,
                freq INTEGER NOT NULL,
                PRIMARY KEY (term, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS term_postings_term_idx ON term_postings(term)")
            .execute(&self.pool)
            .await
            .map_err(sqlx_err)?;

        Ok(())
    }

    /// Replaces `id`'s postings with those derived from `text`. Idempotent:
    /// re-upserting the same text leaves document frequencies unchanged.
    pub async fn upsert(&self, id: &str, text: &str) -> Result<()> {
        let freqs = term_frequencies(text);
        let length: i64 = freqs.values().sum::<u32>() as i64;

        let mut tx = self.pool.begin().await.map_err(sqlx_err)?;
        sqlx::query("DELETE FROM term_postings WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(sqlx_err)?;
        sqlx::query("INSERT OR REPLACE INTO documents (id, length) VALUES (?, ?)")
            .bind(id)
            .bind(length)
            .execute(&mut *tx)
            .await
            .map_err(sqlx_err)?;

        for (term, freq) in &freqs {
            sqlx::query("INSERT INTO term_postings (term, id, freq) VALUES (?, ?, ?)")
                .bind(term)
                .bind(id)
                .bind(*freq as i64)
                .execute(&mut *tx)
                .await
                .map_err(sqlx_err)?;
        }
        tx.commit().await.map_err(sqlx_err)?;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(sqlx_err)?;
        sqlx::query("DELETE FROM term_postings WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(sqlx_err)?;
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(sqlx_err)?;
        tx.commit().await.map_err(sqlx_err)?;
        Ok(())
    }

    /// BM25 (Okapi) search, untransformed scores, descending then id ascending.
    pub async fn search(&self, query_text: &str, k: usize) -> Result<Vec<(String, f32)>> {
        let query_terms: Vec<String> = term_frequencies(query_text).into_keys().collect();
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let total_docs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await
            .map_err(sqlx_err)?;
        if total_docs == 0 {
            return Ok(Vec::new());
        }

        let avg_length: f64 = sqlx::query_scalar("SELECT COALESCE(AVG(length), 0) FROM documents")
            .fetch_one(&self.pool)
            .await
            .map_err(sqlx_err)?;
        let avg_length = (avg_length as f32).max(1.0);

        let mut scores: HashMap<String, f32> = HashMap::new();
        let mut lengths: HashMap<String, f32> = HashMap::new();

        for term in &query_terms {
            let rows = sqlx::query("SELECT id, freq FROM term_postings WHERE term = ?")
                .bind(term)
                .fetch_all(&self.pool)
                .await
                .map_err(sqlx_err)?;
            if rows.is_empty() {
                continue;
            }
            let doc_freq = rows.len() as f32;
            let idf = (((total_docs as f32 - doc_freq + 0.5) / (doc_freq + 0.5)) + 1.0).ln();

            for row in rows {
                let id: String = row.get("id");
                let freq: i64 = row.get("freq");
                let freq = freq as f32;

                let length = match lengths.get(&id) {
                    Some(l) => *l,
                    None => {
                        let l: i64 = sqlx::query_scalar("SELECT length FROM documents WHERE id = ?")
                            .bind(&id)
                            .fetch_one(&self.pool)
                            .await
                            .map_err(sqlx_err)?;
                        let l = l as f32;
                        lengths.insert(id.clone(), l);
                        l
                    }
                };

                let numerator = freq * (K1 + 1.0);
                let denominator = freq + K1 * (1.0 - B + B * (length / avg_length));
                let contribution = idf * (numerator / denominator);
                *scores.entry(id).or_insert(0.0) += contribution;
            }
        }

        let mut results: Vec<(String, f32)> = scores.into_iter().collect();
        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0)));
        results.truncate(k);
        Ok(results)
    }
}

/// Lowercase, split on non-alphanumeric boundaries, drop tokens outside
/// `[2, 40]` characters. No stemming.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2 && t.len() <= 40)
        .map(|t| t.to_string())
        .collect()
}

fn term_frequencies(text: &str) -> HashMap<String, u32> {
    let mut freqs = HashMap::new();
    for token in tokenize(text) {
        *freqs.entry(token).or_insert(0) += 1;
    }
    freqs
}

fn sqlx_err(e: sqlx::Error) -> Error {
    Error::Ingest(format!("keyword store error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn tokenizer_lowercases_and_splits_on_punctuation() {
        let tokens = tokenize("Hello, World! a ab abc");
        assert_eq!(tokens, vec!["hello", "world", "ab", "abc"]);
    }

    #[test]
    fn tokenizer_drops_long_tokens() {
        let long = "a".repeat(41);
        let tokens = tokenize(&long);
        assert!(tokens.is_empty());
    }

    #[tokio::test]
    async fn search_ranks_higher_term_frequency_first() {
        let dir = tempdir().unwrap();
        let store = KeywordStore::open(&dir.path().join("keywords.db")).await.unwrap();
        store.upsert("doc-a", "rust rust rust systems programming").await.unwrap();
        store.upsert("doc-b", "rust programming language").await.unwrap();

        let results = store.search("rust", 10).await.unwrap();
        assert_eq!(results[0].0, "doc-a");
    }

    #[tokio::test]
    async fn delete_removes_document_from_results() {
        let dir = tempdir().unwrap();
        let store = KeywordStore::open(&dir.path().join("keywords.db")).await.unwrap();
        store.upsert("doc-a", "rust programming").await.unwrap();
        store.delete("doc-a").await.unwrap();

        let results = store.search("rust", 10).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn empty_query_yields_no_results() {
        let dir = tempdir().unwrap();
        let store = KeywordStore::open(&dir.path().join("keywords.db")).await.unwrap();
        store.upsert("doc-a", "rust programming").await.unwrap();

        let results = store.search("   ", 10).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn reupserting_same_text_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = KeywordStore::open(&dir.path().join("keywords.db")).await.unwrap();
        store.upsert("doc-a", "rust programming language").await.unwrap();
        store.upsert("doc-a", "rust programming language").await.unwrap();

        let results = store.search("rust", 10).await.unwrap();
        assert_eq!(results.len(), 1);
    }
}
