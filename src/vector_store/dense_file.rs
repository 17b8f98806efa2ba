//! `dense-file` backend (§4.4): a single append-only `{N × D}` float32
//! matrix plus a sidecar of ids, kept fully in memory and mirrored to disk.
//! Exact kNN via full scan; suited to ≤10k items. Deletions are tombstoned
//! in place and compacted once tombstones exceed 20% of N.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::embedding::cosine;
use crate::error::Result;

const COMPACTION_TOMBSTONE_RATIO: f32 = 0.2;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct Sidecar {
    dimension: usize,
    ids: Vec<Option<String>>, // None marks a tombstoned row
}

pub struct DenseFileStore {
    matrix_path: PathBuf,
    sidecar_path: PathBuf,
    dimension: usize,
    ids: Vec<Option<String>>,
    vectors: Vec<f32>, // flattened row-major, len == ids.len() * dimension
    id_to_row: HashMap<String, usize>,
    tombstones: usize,
    dirty: bool,
}

impl DenseFileStore {
    pub fn open(path: &Path, dimension: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let sidecar_path = sidecar_path_for(path);

        let (ids, vectors) = if path.exists() && sidecar_path.exists() {
            let sidecar_bytes = std::fs::read(&sidecar_path)?;
            let (sidecar, _): (Sidecar, usize) =
                bincode::serde::decode_from_slice(&sidecar_bytes, bincode::config::standard())
                    .unwrap_or((Sidecar { dimension, ids: Vec::new() }, 0));
            let raw = std::fs::read(path)?;
            let vectors = bytes_to_f32(&raw);
            (sidecar.ids, vectors)
        } else {
            (Vec::new(), Vec::new())
        };

        let mut id_to_row = HashMap::new();
        let mut tombstones = 0;
        for (row, id) in ids.iter().enumerate() {
            match id {
                Some(id) => {
                    id_to_row.insert(id.clone(), row);
                }
                None => tombstones += 1,
            }
        }

        Ok(Self {
            matrix_path: path.to_path_buf(),
            sidecar_path,
            dimension,
            ids,
            vectors,
            id_to_row,
            tombstones,
            dirty: false,
        })
    }

    fn row_vector(&self, row: usize) -> &[f32] {
        let start = row * self.dimension;
        &self.vectors[start..start + self.dimension]
    }

    pub fn get(&self, id: &str) -> Option<Vec<f32>> {
        self.id_to_row.get(id).map(|&row| self.row_vector(row).to_vec())
    }

    pub fn len(&self) -> usize {
        self.id_to_row.len()
    }

    /// Idempotent (P6): an upsert identical to the currently stored vector
    /// is a no-op. Otherwise tombstones the old row (if any) and appends.
    pub fn upsert(&mut self, id: &str, vector: Vec<f32>) -> Result<()> {
        debug_assert_eq!(vector.len(), self.dimension);

        if let Some(&row) = self.id_to_row.get(id) {
            if vectors_equal(self.row_vector(row), &vector) {
                return Ok(());
            }
            self.ids[row] = None;
            self.tombstones += 1;
        }

        let new_row = self.ids.len();
        self.ids.push(Some(id.to_string()));
        self.vectors.extend_from_slice(&vector);
        self.id_to_row.insert(id.to_string(), new_row);
        self.dirty = true;

        self.maybe_compact();
        self.flush()
    }

    pub fn delete(&mut self, id: &str) -> Result<()> {
        if let Some(row) = self.id_to_row.remove(id) {
            self.ids[row] = None;
            self.tombstones += 1;
            self.dirty = true;
            self.maybe_compact();
            self.flush()?;
        }
        Ok(())
    }

    fn maybe_compact(&mut self) {
        if self.ids.is_empty() {
            return;
        }
        let ratio = self.tombstones as f32 / self.ids.len() as f32;
        if ratio <= COMPACTION_TOMBSTONE_RATIO {
            return;
        }

        let mut new_ids = Vec::with_capacity(self.id_to_row.len());
        let mut new_vectors = Vec::with_capacity(self.id_to_row.len() * self.dimension);
        let mut new_id_to_row = HashMap::with_capacity(self.id_to_row.len());

        for (row, id) in self.ids.iter().enumerate() {
            if let Some(id) = id {
                let new_row = new_ids.len();
                new_ids.push(Some(id.clone()));
                new_vectors.extend_from_slice(self.row_vector(row));
                new_id_to_row.insert(id.clone(), new_row);
            }
        }

        self.ids = new_ids;
        self.vectors = new_vectors;
        self.id_to_row = new_id_to_row;
        self.tombstones = 0;
    }

    pub fn knn(&self, query: &[f32], k: usize, min_score: Option<f32>) -> Result<Vec<(String, f32)>> {
        let floor = min_score.unwrap_or(f32::NEG_INFINITY);
        let mut scored: Vec<(String, f32)> = self
            .id_to_row
            .iter()
            .filter_map(|(id, &row)| {
                let score = cosine(query, self.row_vector(row));
                if score >= floor {
                    Some((id.clone(), score))
                } else {
                    None
                }
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(k);
        Ok(scored)
    }

    /// Blocked O(N²/2) fallback scan used to build the similarity graph.
    pub fn all_pairs_above(&self, threshold: f32) -> Result<Vec<(String, String, f32)>> {
        let mut entries: Vec<(&str, usize)> = self.id_to_row.iter().map(|(id, &row)| (id.as_str(), row)).collect();
        entries.sort_by_key(|(id, _)| *id);

        let mut out = Vec::new();
        for i in 0..entries.len() {
            for j in (i + 1)..entries.len() {
                let (id_a, row_a) = entries[i];
                let (id_b, row_b) = entries[j];
                let score = cosine(self.row_vector(row_a), self.row_vector(row_b));
                if score >= threshold {
                    let (a, b) = if id_a <= id_b { (id_a, id_b) } else { (id_b, id_a) };
                    out.push((a.to_string(), b.to_string(), score));
                }
            }
        }
        Ok(out)
    }

    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let sidecar = Sidecar { dimension: self.dimension, ids: self.ids.clone() };
        let sidecar_bytes = bincode::serde::encode_to_vec(&sidecar, bincode::config::standard())
            .map_err(|e| crate::error::Error::Ingest(format!("failed to encode vector sidecar: {e}")))?;

        write_shadow_then_rename(&self.sidecar_path, &sidecar_bytes)?;
        write_shadow_then_rename(&self.matrix_path, &f32_to_bytes(&self.vectors))?;
        self.dirty = false;
        Ok(())
    }
}

fn vectors_equal(a: &[f32], b: &[f32]) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < 1e-6)
}

fn sidecar_path_for(path: &Path) -> PathBuf {
    let file_name = path.file_name().and_then(|f| f.to_str()).unwrap_or("vectors.bin");
    path.with_file_name(format!("{file_name}.ids"))
}

fn f32_to_bytes(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for x in v {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

fn bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn write_shadow_then_rename(path: &Path, content: &[u8]) -> Result<()> {
    use std::io::Write;
    let file_name = path.file_name().and_then(|f| f.to_str()).unwrap_or("file");
    let shadow = path.with_file_name(format!("shadow.{file_name}"));
    let mut f = std::fs::File::create(&shadow)?;
    f.write_all(content)?;
    f.sync_all()?;
    std::fs::rename(&shadow, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("vectors.bin")
    }

    #[test]
    fn upsert_then_knn_returns_self_as_top_hit() {
        let dir = tempdir().unwrap();
        let mut store = DenseFileStore::open(&path(&dir), 4).unwrap();
        store.upsert("a", vec![1.0, 0.0, 0.0, 0.0]).unwrap();
        store.upsert("b", vec![0.0, 1.0, 0.0, 0.0]).unwrap();

        let results = store.knn(&[1.0, 0.0, 0.0, 0.0], 2, None).unwrap();
        assert_eq!(results[0].0, "a");
        assert!((results[0].1 - 1.0).abs() < 1e-4);
    }

    #[test]
    fn repeated_identical_upsert_is_noop() {
        let dir = tempdir().unwrap();
        let mut store = DenseFileStore::open(&path(&dir), 2).unwrap();
        store.upsert("a", vec![1.0, 0.0]).unwrap();
        store.upsert("a", vec![1.0, 0.0]).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.tombstones, 0);
    }

    #[test]
    fn delete_removes_id() {
        let dir = tempdir().unwrap();
        let mut store = DenseFileStore::open(&path(&dir), 2).unwrap();
        store.upsert("a", vec![1.0, 0.0]).unwrap();
        store.delete("a").unwrap();
        assert_eq!(store.len(), 0);
        assert!(store.get("a").is_none());
    }

    #[test]
    fn reopen_restores_state() {
        let dir = tempdir().unwrap();
        let p = path(&dir);
        {
            let mut store = DenseFileStore::open(&p, 3).unwrap();
            store.upsert("a", vec![1.0, 0.0, 0.0]).unwrap();
        }
        let store = DenseFileStore::open(&p, 3).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.get("a").is_some());
    }

    #[test]
    fn all_pairs_above_threshold_finds_similar_ids() {
        let dir = tempdir().unwrap();
        let mut store = DenseFileStore::open(&path(&dir), 2).unwrap();
        store.upsert("a", vec![1.0, 0.0]).unwrap();
        store.upsert("b", vec![0.99, 0.01]).unwrap();
        store.upsert("c", vec![0.0, 1.0]).unwrap();

        let pairs = store.all_pairs_above(0.9).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!((pairs[0].0.as_str(), pairs[0].1.as_str()), ("a", "b"));
    }
}
