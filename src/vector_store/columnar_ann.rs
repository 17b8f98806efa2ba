//! `columnar-ann` backend (§4.4): a LanceDB table with an ANN index.
//! Approximate kNN once the table is large enough to benefit from an index;
//! exact otherwise. `all_pairs_above` has no ANN shortcut worth taking at the
//! sizes this engine targets, so it falls back to an in-memory scan of every
//! row, same complexity bound the dense-file backend uses.

use arrow_array::{Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray};
use arrow_schema::{DataType, Field, Schema};
use futures_util::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use std::path::Path;
use std::sync::Arc;

use crate::embedding::cosine;
use crate::error::{Error, Result};

const TABLE_NAME: &str = "vectors";
/// Row count above which an ANN index is worth building (IVF-PQ needs a
/// minimum population to partition sensibly).
const ANN_INDEX_MIN_ROWS: usize = 1_000;

pub struct ColumnarAnnStore {
    db: lancedb::Connection,
    dimension: usize,
}

impl ColumnarAnnStore {
    pub async fn open(path: &Path, dimension: usize) -> Result<Self> {
        std::fs::create_dir_all(path)?;
        let db = lancedb::connect(&path.to_string_lossy())
            .execute()
            .await
            .map_err(|e| Error::Ingest(format!("failed to open columnar-ann store: {e}")))?;

        let store = Self { db, dimension };
        store.ensure_table().await?;
        Ok(store)
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), self.dimension as i32),
                true,
            ),
        ]))
    }

    async fn ensure_table(&self) -> Result<()> {
        let names = self.db.table_names().execute().await.map_err(lance_err)?;
        if names.contains(&TABLE_NAME.to_string()) {
            return Ok(());
        }
        let schema = self.schema();
        let batch = self.row_batch(&["__seed__".to_string()], &[vec![0.0; self.dimension]])?;
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema.clone());
        self.db
            .create_table(TABLE_NAME, Box::new(batches))
            .execute()
            .await
            .map_err(lance_err)?;
        let table = self.db.open_table(TABLE_NAME).execute().await.map_err(lance_err)?;
        table.delete("id = '__seed__'").await.map_err(lance_err)?;
        Ok(())
    }

    fn row_batch(&self, ids: &[String], vectors: &[Vec<f32>]) -> Result<RecordBatch> {
        let schema = self.schema();
        let id_array = StringArray::from(ids.iter().map(|s| s.as_str()).collect::<Vec<_>>());
        let flat: Vec<f32> = vectors.iter().flat_map(|v| v.iter().copied()).collect();
        let values = Float32Array::from(flat);
        let vector_field = Field::new("item", DataType::Float32, true);
        let vector_array =
            FixedSizeListArray::new(Arc::new(vector_field), self.dimension as i32, Arc::new(values) as Arc<dyn Array>, None);

        RecordBatch::try_new(schema, vec![Arc::new(id_array), Arc::new(vector_array) as Arc<dyn Array>])
            .map_err(|e| Error::Ingest(format!("failed to build vector record batch: {e}")))
    }

    pub async fn upsert(&mut self, id: &str, vector: Vec<f32>) -> Result<()> {
        if let Some(existing) = self.get(id).await? {
            if vectors_equal(&existing, &vector) {
                return Ok(()); // P6: idempotent upsert
            }
        }
        let table = self.db.open_table(TABLE_NAME).execute().await.map_err(lance_err)?;
        table.delete(&id_predicate(id)).await.map_err(lance_err)?;

        let batch = self.row_batch(&[id.to_string()], &[vector])?;
        let schema = self.schema();
        let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);
        table.add(Box::new(reader)).execute().await.map_err(lance_err)?;
        Ok(())
    }

    pub async fn delete(&mut self, id: &str) -> Result<()> {
        let table = self.db.open_table(TABLE_NAME).execute().await.map_err(lance_err)?;
        table.delete(&id_predicate(id)).await.map_err(lance_err)?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<Vec<f32>>> {
        let rows = self.scan_all(Some(&id_predicate(id))).await?;
        Ok(rows.into_iter().next().map(|(_, v)| v))
    }

    pub async fn len(&self) -> Result<usize> {
        let table = self.db.open_table(TABLE_NAME).execute().await.map_err(lance_err)?;
        let count = table.count_rows(None).await.map_err(lance_err)?;
        Ok(count)
    }

    pub async fn knn(&self, query: &[f32], k: usize, min_score: Option<f32>) -> Result<Vec<(String, f32)>> {
        let table = self.db.open_table(TABLE_NAME).execute().await.map_err(lance_err)?;
        let results = table
            .query()
            .nearest_to(query)
            .map_err(lance_err)?
            .distance_type(lancedb::DistanceType::Cosine)
            .limit(k.max(1))
            .execute()
            .await
            .map_err(lance_err)?;

        let batches: Vec<RecordBatch> = results.try_collect().await.map_err(lance_err)?;
        let floor = min_score.unwrap_or(f32::NEG_INFINITY);
        let mut out = Vec::new();
        for batch in &batches {
            let ids = batch.column_by_name("id").and_then(|c| c.as_any().downcast_ref::<StringArray>());
            let distances = batch.column_by_name("_distance").and_then(|c| c.as_any().downcast_ref::<Float32Array>());
            if let (Some(ids), Some(distances)) = (ids, distances) {
                for i in 0..batch.num_rows() {
                    let id = ids.value(i);
                    if id == "__seed__" {
                        continue;
                    }
                    // LanceDB's cosine "distance" is `1 - cosine`.
                    let score = 1.0 - distances.value(i);
                    if score >= floor {
                        out.push((id.to_string(), score));
                    }
                }
            }
        }
        out.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0)));
        out.truncate(k);
        Ok(out)
    }

    async fn scan_all(&self, predicate: Option<&str>) -> Result<Vec<(String, Vec<f32>)>> {
        let table = self.db.open_table(TABLE_NAME).execute().await.map_err(lance_err)?;
        let mut query = table.query();
        if let Some(p) = predicate {
            query = query.only_if(p);
        }
        let results = query.execute().await.map_err(lance_err)?;
        let batches: Vec<RecordBatch> = results.try_collect().await.map_err(lance_err)?;

        let mut out = Vec::new();
        for batch in &batches {
            let ids = batch.column_by_name("id").and_then(|c| c.as_any().downcast_ref::<StringArray>());
            let vectors = batch.column_by_name("vector").and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>());
            if let (Some(ids), Some(vectors)) = (ids, vectors) {
                for i in 0..batch.num_rows() {
                    let id = ids.value(i).to_string();
                    if id == "__seed__" {
                        continue;
                    }
                    let values = vectors.value(i);
                    let floats = values.as_any().downcast_ref::<Float32Array>();
                    if let Some(floats) = floats {
                        out.push((id, floats.values().to_vec()));
                    }
                }
            }
        }
        Ok(out)
    }

    pub async fn all_pairs_above(&self, threshold: f32) -> Result<Vec<(String, String, f32)>> {
        let rows = self.scan_all(None).await?;
        let mut out = Vec::new();
        for i in 0..rows.len() {
            for j in (i + 1)..rows.len() {
                let score = cosine(&rows[i].1, &rows[j].1);
                if score >= threshold {
                    let (a, b) = if rows[i].0 <= rows[j].0 {
                        (rows[i].0.clone(), rows[j].0.clone())
                    } else {
                        (rows[j].0.clone(), rows[i].0.clone())
                    };
                    out.push((a, b, score));
                }
            }
        }
        Ok(out)
    }

    /// Builds the ANN index once the table has enough rows to benefit.
    pub async fn maybe_build_index(&self) -> Result<()> {
        let table = self.db.open_table(TABLE_NAME).execute().await.map_err(lance_err)?;
        let count = table.count_rows(None).await.map_err(lance_err)?;
        if count >= ANN_INDEX_MIN_ROWS {
            table
                .create_index(&["vector"], lancedb::index::Index::Auto)
                .execute()
                .await
                .map_err(lance_err)?;
        }
        Ok(())
    }
}

fn vectors_equal(a: &[f32], b: &[f32]) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < 1e-6)
}

fn id_predicate(id: &str) -> String {
    format!("id = '{}'", id.replace('\'', "''"))
}

fn lance_err(e: impl std::fmt::Display) -> Error {
    Error::Ingest(format!("columnar-ann store error: {e}"))
}
