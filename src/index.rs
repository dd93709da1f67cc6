//! Exact inner-product vector index.
//!
//! Vectors are L2-normalised on insert and queries are normalised before
//! scoring, so every score is a cosine similarity. Search is brute force
//! over a contiguous row-major `f32` buffer, which is what a flat index
//! amounts to at the sizes a single-upload knowledge base reaches.
//!
//! # File format
//!
//! ```text
//! magic  b"RAGIDX01"        8 bytes
//! dims   u32 little-endian  4 bytes
//! count  u64 little-endian  8 bytes
//! data   count × dims × f32 little-endian
//! ```

use std::io::{Read, Write};
use std::path::Path;
use thiserror::Error;

use crate::embedding::{dot, normalize};

const MAGIC: &[u8; 8] = b"RAGIDX01";

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("vector dimension mismatch: index has {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("corrupt index file: {0}")]
    Corrupt(String),
    #[error("index I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dims: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            data: Vec::new(),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        if self.dims == 0 {
            0
        } else {
            self.data.len() / self.dims
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append vectors. Either all are added or, on a dimension mismatch,
    /// none are.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<(), IndexError> {
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dims) {
            return Err(IndexError::DimensionMismatch {
                expected: self.dims,
                got: bad.len(),
            });
        }
        self.data.reserve(vectors.len() * self.dims);
        for v in vectors {
            let start = self.data.len();
            self.data.extend_from_slice(v);
            normalize(&mut self.data[start..]);
        }
        Ok(())
    }

    /// Drop every vector, keeping the dimension.
    pub fn reset(&mut self) {
        self.data.clear();
    }

    /// The `k` best rows as `(position, score)`, best first. Ties go to the
    /// lower position. `k` larger than the index returns every row.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>, IndexError> {
        if query.len() != self.dims {
            return Err(IndexError::DimensionMismatch {
                expected: self.dims,
                got: query.len(),
            });
        }
        if self.dims == 0 || k == 0 {
            return Ok(Vec::new());
        }

        let mut q = query.to_vec();
        normalize(&mut q);

        let mut scored: Vec<(usize, f32)> = self
            .data
            .chunks_exact(self.dims)
            .enumerate()
            .map(|(i, row)| (i, dot(row, &q)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        Ok(scored)
    }

    pub fn write_to<W: Write>(&self, mut w: W) -> Result<(), IndexError> {
        let dims = u32::try_from(self.dims)
            .map_err(|_| IndexError::Corrupt(format!("dimension {} too large", self.dims)))?;
        w.write_all(MAGIC)?;
        w.write_all(&dims.to_le_bytes())?;
        w.write_all(&(self.len() as u64).to_le_bytes())?;
        let mut bytes = Vec::with_capacity(self.data.len() * 4);
        for v in &self.data {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        w.write_all(&bytes)?;
        w.flush()?;
        Ok(())
    }

    pub fn read_from<R: Read>(mut r: R) -> Result<Self, IndexError> {
        let mut magic = [0u8; 8];
        read_header(&mut r, &mut magic)?;
        if &magic != MAGIC {
            return Err(IndexError::Corrupt("bad magic".to_string()));
        }

        let mut dims_buf = [0u8; 4];
        read_header(&mut r, &mut dims_buf)?;
        let dims = u32::from_le_bytes(dims_buf) as usize;

        let mut count_buf = [0u8; 8];
        read_header(&mut r, &mut count_buf)?;
        let count = usize::try_from(u64::from_le_bytes(count_buf))
            .map_err(|_| IndexError::Corrupt("vector count overflows".to_string()))?;

        let expected = count
            .checked_mul(dims)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| IndexError::Corrupt("index size overflows".to_string()))?;

        let mut payload = Vec::new();
        r.read_to_end(&mut payload)?;
        if payload.len() != expected {
            return Err(IndexError::Corrupt(format!(
                "expected {} data bytes, found {}",
                expected,
                payload.len()
            )));
        }

        let data = payload
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        Ok(Self { dims, data })
    }

    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let file = std::fs::File::open(path)?;
        Self::read_from(std::io::BufReader::new(file))
    }
}

fn read_header<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<(), IndexError> {
    r.read_exact(buf).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => IndexError::Corrupt("truncated header".to_string()),
        _ => IndexError::Io(e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FlatIndex {
        let mut idx = FlatIndex::new(3);
        idx.add(&[
            vec![1.0, 0.0, 0.0],
            vec![0.0, 2.0, 0.0],
            vec![1.0, 1.0, 0.0],
        ])
        .unwrap();
        idx
    }

    #[test]
    fn search_ranks_by_cosine() {
        let idx = sample();
        let hits = idx.search(&[0.0, 5.0, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, 1);
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
        assert_eq!(hits[1].0, 2);
        assert!((hits[1].1 - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-5);
    }

    #[test]
    fn k_is_clamped_to_len() {
        let idx = sample();
        assert_eq!(idx.search(&[1.0, 0.0, 0.0], 10).unwrap().len(), 3);
        assert!(idx.search(&[1.0, 0.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn ties_prefer_lower_position() {
        let mut idx = FlatIndex::new(2);
        idx.add(&[vec![1.0, 0.0], vec![2.0, 0.0]]).unwrap();
        let hits = idx.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(hits[0].0, 0);
        assert_eq!(hits[1].0, 1);
    }

    #[test]
    fn dimension_mismatch_is_rejected_atomically() {
        let mut idx = sample();
        let err = idx.add(&[vec![1.0, 0.0, 0.0], vec![1.0]]).unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { expected: 3, got: 1 }));
        assert_eq!(idx.len(), 3);
        assert!(idx.search(&[1.0], 1).is_err());
    }

    #[test]
    fn reset_empties_the_index() {
        let mut idx = sample();
        idx.reset();
        assert!(idx.is_empty());
        assert_eq!(idx.dims(), 3);
    }

    #[test]
    fn serialized_index_reloads_identically() {
        let idx = sample();
        let mut buf = Vec::new();
        idx.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), 8 + 4 + 8 + 3 * 3 * 4);
        let back = FlatIndex::read_from(buf.as_slice()).unwrap();
        assert_eq!(back, idx);
    }

    #[test]
    fn truncated_or_foreign_files_are_corrupt() {
        let mut buf = Vec::new();
        sample().write_to(&mut buf).unwrap();

        let truncated = &buf[..buf.len() - 2];
        assert!(matches!(
            FlatIndex::read_from(truncated).unwrap_err(),
            IndexError::Corrupt(_)
        ));
        assert!(matches!(
            FlatIndex::read_from(&buf[..5]).unwrap_err(),
            IndexError::Corrupt(_)
        ));
        assert!(matches!(
            FlatIndex::read_from(&b"NOTANIDXxxxxxxxxxxxxxxxx"[..]).unwrap_err(),
            IndexError::Corrupt(_)
        ));
    }
}
