//! The knowledge base: chunk records, their embeddings and the vector index.
//!
//! Three files under the database directory hold the whole state:
//!
//! | File | Content |
//! |------|---------|
//! | `documents.json` | `Vec<ChunkRecord>` in index order |
//! | `embeddings.json` | producing model, dimension, and one vector per record |
//! | `index.bin` | [`FlatIndex`] binary dump |
//!
//! The invariant `records.len() == embeddings.len() == index.len()` holds
//! in memory and on disk. Every mutation builds the next state on the side,
//! persists it, and only then swaps it in, so a failed upload leaves the
//! knowledge base exactly as it was.
//!
//! Vectors are only comparable within one embedding model. The model that
//! produced the stored vectors is persisted with them; when the configured
//! embedder differs, queries fail with [`StoreError::ModelChanged`] and the
//! next rebuild re-embeds every chunk.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chunk::{chunk_words, clean_text, ChunkingError, ChunkingParams};
use crate::config::StorageConfig;
use crate::embedding::{check_vectors, Embedder};
use crate::index::{FlatIndex, IndexError};
use crate::llm::{AnswerGenerator, LlmError};
use crate::loader::{sanitize_file_name, LoadError};
use crate::models::{
    preview, AddOutcome, ChunkRecord, DocumentSummary, DocumentsInfo, KnowledgeBaseStatus,
    QueryAnswer, SourceHit,
};

pub const NO_DOCUMENTS_ANSWER: &str =
    "No documents available. Please upload some documents first.";
pub const NO_CONTEXT_ANSWER: &str = "I don't have enough information to answer this question.";

const DOCUMENTS_FILE: &str = "documents.json";
const EMBEDDINGS_FILE: &str = "embeddings.json";
const INDEX_FILE: &str = "index.bin";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document produced no text chunks")]
    EmptyDocument,
    #[error("question must not be empty")]
    EmptyQuestion,
    #[error("top_k must be at least 1")]
    InvalidTopK,
    #[error(
        "knowledge base was indexed with {indexed} but the embedder is {current}; \
         run `rag reindex` or upload a document to rebuild it"
    )]
    ModelChanged { indexed: String, current: String },
    #[error(transparent)]
    Chunking(#[from] ChunkingError),
    #[error(transparent)]
    FileName(#[from] LoadError),
    #[error("embedding failed: {0:#}")]
    Embedding(anyhow::Error),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("persistence failed: {0:#}")]
    Persist(anyhow::Error),
}

/// Where the knowledge base keeps its files.
#[derive(Debug, Clone)]
pub struct StorePaths {
    /// Raw text copies of uploaded documents.
    pub data_dir: PathBuf,
    /// `documents.json`, `embeddings.json` and `index.bin`.
    pub database_dir: PathBuf,
}

impl StorePaths {
    pub fn from_config(storage: &StorageConfig) -> Self {
        Self {
            data_dir: storage.data_dir.clone(),
            database_dir: storage.database_dir.clone(),
        }
    }

    pub fn documents_file(&self) -> PathBuf {
        self.database_dir.join(DOCUMENTS_FILE)
    }

    pub fn embeddings_file(&self) -> PathBuf {
        self.database_dir.join(EMBEDDINGS_FILE)
    }

    pub fn index_file(&self) -> PathBuf {
        self.database_dir.join(INDEX_FILE)
    }
}

/// The embedding model and dimension that produced a set of vectors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingSpace {
    pub model: String,
    pub dims: usize,
}

impl EmbeddingSpace {
    /// Whether vectors in this space are comparable with `embedder`'s output.
    /// An embedder reporting `0` dims is matched on model name alone.
    pub fn matches(&self, embedder: &dyn Embedder) -> bool {
        self.model == embedder.model_name()
            && (embedder.dims() == 0 || embedder.dims() == self.dims)
    }
}

impl std::fmt::Display for EmbeddingSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "'{}' ({} dims)", self.model, self.dims)
    }
}

pub struct KnowledgeBase {
    paths: StorePaths,
    params: ChunkingParams,
    records: Vec<ChunkRecord>,
    embeddings: Vec<Vec<f32>>,
    space: Option<EmbeddingSpace>,
    index: Option<FlatIndex>,
}

struct Snapshot {
    records: Vec<ChunkRecord>,
    space: EmbeddingSpace,
    embeddings: Vec<Vec<f32>>,
    index: FlatIndex,
}

#[derive(Serialize)]
struct EmbeddingsFileRef<'a> {
    model: &'a str,
    dims: usize,
    vectors: &'a [Vec<f32>],
}

#[derive(Deserialize)]
struct EmbeddingsFile {
    model: String,
    dims: usize,
    vectors: Vec<Vec<f32>>,
}

impl KnowledgeBase {
    /// Open the knowledge base, creating its directories and loading any
    /// persisted state. Missing, corrupt or mutually inconsistent files are
    /// logged and discarded; only directory creation can fail.
    pub fn open(paths: StorePaths, params: ChunkingParams) -> Result<Self, StoreError> {
        params.validate()?;
        for dir in [&paths.data_dir, &paths.database_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))
                .map_err(StoreError::Persist)?;
        }

        let mut kb = Self {
            paths,
            params,
            records: Vec::new(),
            embeddings: Vec::new(),
            space: None,
            index: None,
        };

        match load_snapshot(&kb.paths) {
            Ok(Some(snapshot)) => {
                info!(
                    chunks = snapshot.records.len(),
                    model = %snapshot.space.model,
                    dims = snapshot.space.dims,
                    "loaded knowledge base"
                );
                kb.commit(snapshot);
            }
            Ok(None) => debug!("no persisted knowledge base, starting empty"),
            Err(e) => warn!(error = %format!("{:#}", e), "discarding persisted knowledge base"),
        }

        Ok(kb)
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    pub fn params(&self) -> ChunkingParams {
        self.params
    }

    pub fn set_chunking(&mut self, params: ChunkingParams) -> Result<(), StoreError> {
        params.validate()?;
        self.params = params;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[ChunkRecord] {
        &self.records
    }

    pub fn index(&self) -> Option<&FlatIndex> {
        self.index.as_ref()
    }

    /// Model and dimension of the stored vectors, if any are stored.
    pub fn embedding_space(&self) -> Option<&EmbeddingSpace> {
        self.space.as_ref()
    }

    /// Clean, chunk, embed and index a document with the current chunking
    /// settings. See [`KnowledgeBase::add_document_with`].
    pub async fn add_document(
        &mut self,
        embedder: &dyn Embedder,
        file_name: &str,
        raw_text: &str,
    ) -> Result<AddOutcome, StoreError> {
        let params = self.params;
        self.add_document_with(embedder, file_name, raw_text, params)
            .await
    }

    /// Clean, chunk, embed and index a document using `params`.
    ///
    /// Chunks previously stored under the same sanitized file name are
    /// replaced. The index is rebuilt from every record; vectors of chunks
    /// whose text is unchanged are reused rather than re-embedded, as long
    /// as they came from the same model. `params` become the current
    /// chunking settings only when the document was stored.
    pub async fn add_document_with(
        &mut self,
        embedder: &dyn Embedder,
        file_name: &str,
        raw_text: &str,
        params: ChunkingParams,
    ) -> Result<AddOutcome, StoreError> {
        params.validate()?;
        let stored_name = sanitize_file_name(file_name)?;
        let cleaned = clean_text(raw_text);
        let spans = chunk_words(&cleaned, params)?;
        if spans.is_empty() {
            return Err(StoreError::EmptyDocument);
        }

        let document_id = Uuid::new_v4().to_string();
        let ingested_at = chrono::Utc::now().timestamp();
        let original_preview = preview(raw_text);

        let mut records = Vec::with_capacity(self.records.len() + spans.len());
        let mut replaced = 0;
        for record in &self.records {
            if same_document(&record.file_name, &stored_name) {
                replaced += 1;
            } else {
                records.push(record.clone());
            }
        }
        let chunks_added = spans.len();
        records.extend(spans.into_iter().map(|span| ChunkRecord {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.clone(),
            file_name: file_name.to_string(),
            chunk_index: span.index,
            content: span.text,
            hash: span.hash,
            original_preview: original_preview.clone(),
            ingested_at,
        }));

        let snapshot = self.rebuild(embedder, records, true).await?;
        save_snapshot(&self.paths, &snapshot).map_err(StoreError::Persist)?;

        info!(
            file = %file_name,
            chunks = chunks_added,
            replaced,
            total = snapshot.records.len(),
            "document indexed"
        );
        self.commit(snapshot);
        self.params = params;

        let raw_path = self.paths.data_dir.join(format!("{}.txt", stored_name));
        if let Err(e) = std::fs::write(&raw_path, raw_text) {
            warn!(path = %raw_path.display(), error = %e, "failed to keep raw text copy");
        }

        Ok(AddOutcome {
            document_id,
            file_name: file_name.to_string(),
            chunks_added,
            replaced_chunks: replaced,
        })
    }

    /// Re-embed every stored chunk with `embedder` and rebuild the index.
    /// Returns the number of chunks embedded.
    pub async fn reindex(&mut self, embedder: &dyn Embedder) -> Result<usize, StoreError> {
        if self.records.is_empty() {
            return Ok(0);
        }
        let snapshot = self.rebuild(embedder, self.records.clone(), false).await?;
        save_snapshot(&self.paths, &snapshot).map_err(StoreError::Persist)?;
        let count = snapshot.records.len();
        info!(
            chunks = count,
            model = %snapshot.space.model,
            dims = snapshot.space.dims,
            "knowledge base reindexed"
        );
        self.commit(snapshot);
        Ok(count)
    }

    fn commit(&mut self, snapshot: Snapshot) {
        self.records = snapshot.records;
        self.embeddings = snapshot.embeddings;
        self.space = Some(snapshot.space);
        self.index = Some(snapshot.index);
    }

    /// Embed `records` and build the index over them.
    async fn rebuild(
        &self,
        embedder: &dyn Embedder,
        records: Vec<ChunkRecord>,
        reuse: bool,
    ) -> Result<Snapshot, StoreError> {
        let embeddings = self.embed_records(embedder, &records, reuse).await?;
        let dims = embeddings.first().map(Vec::len).unwrap_or(0);
        let mut index = FlatIndex::new(dims);
        index.add(&embeddings)?;
        Ok(Snapshot {
            records,
            space: EmbeddingSpace {
                model: embedder.model_name().to_string(),
                dims,
            },
            embeddings,
            index,
        })
    }

    /// Vectors for `records`, in order, embedding only texts whose hash has
    /// no usable cached vector. Cached vectors are usable only when they were
    /// produced by the same model as `embedder`.
    async fn embed_records(
        &self,
        embedder: &dyn Embedder,
        records: &[ChunkRecord],
        reuse: bool,
    ) -> Result<Vec<Vec<f32>>, StoreError> {
        let dims = embedder.dims();
        let reusable = reuse
            && self
                .space
                .as_ref()
                .is_some_and(|space| space.matches(embedder));
        if !reusable && !self.records.is_empty() {
            debug!(
                previous = ?self.space,
                model = embedder.model_name(),
                "stored vectors not reusable, embedding every chunk"
            );
        }
        let cache: HashMap<&str, &Vec<f32>> = if reusable {
            self.records
                .iter()
                .zip(&self.embeddings)
                .filter(|(_, v)| dims == 0 || v.len() == dims)
                .map(|(r, v)| (r.hash.as_str(), v))
                .collect()
        } else {
            HashMap::new()
        };

        let mut missing: Vec<String> = Vec::new();
        let mut missing_hashes: Vec<&str> = Vec::new();
        for record in records {
            let hash = record.hash.as_str();
            if !cache.contains_key(hash) && !missing_hashes.contains(&hash) {
                missing.push(record.content.clone());
                missing_hashes.push(hash);
            }
        }

        debug!(
            reused = records.len() - missing.len(),
            embedding = missing.len(),
            "embedding chunks"
        );

        let vectors = if missing.is_empty() {
            Vec::new()
        } else {
            let vectors = embedder
                .embed(&missing)
                .await
                .map_err(StoreError::Embedding)?;
            check_vectors(&vectors, missing.len(), dims).map_err(StoreError::Embedding)?;
            vectors
        };
        let fresh: HashMap<&str, &Vec<f32>> = missing_hashes.into_iter().zip(&vectors).collect();

        records
            .iter()
            .map(|r| {
                let hash = r.hash.as_str();
                cache
                    .get(hash)
                    .or_else(|| fresh.get(hash))
                    .map(|v| (*v).clone())
                    .ok_or_else(|| {
                        StoreError::Embedding(anyhow::anyhow!("no vector for chunk {}", r.id))
                    })
            })
            .collect()
    }

    /// Fails when the stored vectors and `embedder` live in different
    /// embedding spaces. `query_dims` is the length of an embedded query.
    fn check_space(
        &self,
        embedder: &dyn Embedder,
        query_dims: Option<usize>,
    ) -> Result<(), StoreError> {
        let Some(space) = &self.space else {
            return Ok(());
        };
        let dims_ok = query_dims.map_or(true, |d| d == space.dims);
        if space.matches(embedder) && dims_ok {
            return Ok(());
        }
        Err(StoreError::ModelChanged {
            indexed: space.to_string(),
            current: EmbeddingSpace {
                model: embedder.model_name().to_string(),
                dims: query_dims.unwrap_or_else(|| embedder.dims()),
            }
            .to_string(),
        })
    }

    /// The `top_k` chunks most similar to `question`, best first.
    pub async fn retrieve(
        &self,
        embedder: &dyn Embedder,
        question: &str,
        top_k: usize,
    ) -> Result<Vec<SourceHit>, StoreError> {
        if question.trim().is_empty() {
            return Err(StoreError::EmptyQuestion);
        }
        if top_k == 0 {
            return Err(StoreError::InvalidTopK);
        }
        let index = match &self.index {
            Some(index) if !index.is_empty() => index,
            _ => return Ok(Vec::new()),
        };

        self.check_space(embedder, None)?;

        let query = embedder
            .embed_query(question)
            .await
            .map_err(StoreError::Embedding)?;
        self.check_space(embedder, Some(query.len()))?;
        let hits = index.search(&query, top_k.min(index.len()))?;

        Ok(hits
            .into_iter()
            .filter_map(|(pos, score)| {
                self.records.get(pos).map(|r| SourceHit {
                    id: r.id.clone(),
                    file_name: r.file_name.clone(),
                    chunk_index: r.chunk_index,
                    score,
                    content: r.content.clone(),
                })
            })
            .collect())
    }

    /// Retrieve context for `question` and have `generator` answer it.
    ///
    /// An empty knowledge base answers with [`NO_DOCUMENTS_ANSWER`] without
    /// touching the embedder or the generator.
    pub async fn query(
        &self,
        embedder: &dyn Embedder,
        generator: &dyn AnswerGenerator,
        question: &str,
        top_k: usize,
    ) -> Result<QueryAnswer, StoreError> {
        if question.trim().is_empty() {
            return Err(StoreError::EmptyQuestion);
        }
        if top_k == 0 {
            return Err(StoreError::InvalidTopK);
        }
        if self.is_empty() {
            return Ok(QueryAnswer {
                answer: NO_DOCUMENTS_ANSWER.to_string(),
                sources: Vec::new(),
                confidence: 0.0,
            });
        }

        let sources = self.retrieve(embedder, question, top_k).await?;
        if sources.is_empty() {
            return Ok(QueryAnswer {
                answer: NO_CONTEXT_ANSWER.to_string(),
                sources,
                confidence: 0.0,
            });
        }
        let confidence = sources[0].score;

        let context = sources
            .iter()
            .map(|s| s.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let answer = generator.generate(question, &context).await?;

        Ok(QueryAnswer {
            answer,
            sources,
            confidence,
        })
    }

    pub fn status(&self) -> KnowledgeBaseStatus {
        let files: BTreeSet<&str> = self.records.iter().map(|r| r.file_name.as_str()).collect();
        let (index_size, dimension) = self
            .index
            .as_ref()
            .map(|i| (i.len(), i.dims()))
            .unwrap_or((0, 0));
        KnowledgeBaseStatus {
            documents_count: self.records.len(),
            files_count: files.len(),
            index_status: if index_size > 0 { "ready" } else { "not_ready" }.to_string(),
            index_size,
            dimension,
            chunk_size: self.params.chunk_size,
            chunk_overlap: self.params.chunk_overlap,
        }
    }

    pub fn documents_info(&self) -> DocumentsInfo {
        DocumentsInfo {
            total_documents: self.records.len(),
            documents: self
                .records
                .iter()
                .map(|r| DocumentSummary {
                    id: r.id.clone(),
                    file_name: r.file_name.clone(),
                    chunk_index: r.chunk_index,
                    content_preview: preview(&r.content),
                    original_text_preview: r.original_preview.clone(),
                })
                .collect(),
        }
    }

    /// Drop every document, delete the persisted files and empty the data
    /// directory. Returns the number of chunks removed.
    pub fn clear(&mut self) -> Result<usize, StoreError> {
        let removed = self.records.len();
        for path in [
            self.paths.documents_file(),
            self.paths.embeddings_file(),
            self.paths.index_file(),
        ] {
            remove_if_exists(&path).map_err(StoreError::Persist)?;
        }
        match std::fs::remove_dir_all(&self.paths.data_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(StoreError::Persist(anyhow::Error::new(e).context(format!(
                    "Failed to remove {}",
                    self.paths.data_dir.display()
                ))))
            }
        }
        std::fs::create_dir_all(&self.paths.data_dir)
            .with_context(|| format!("Failed to create {}", self.paths.data_dir.display()))
            .map_err(StoreError::Persist)?;

        self.records.clear();
        self.embeddings.clear();
        self.space = None;
        self.index = None;
        info!(removed, "knowledge base cleared");
        Ok(removed)
    }
}

fn remove_if_exists(path: &Path) -> anyhow::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(anyhow::Error::new(e).context(format!("Failed to remove {}", path.display()))),
    }
}

/// Same-document test for replacement: names are compared after
/// sanitizing, since that is the name the raw copy is stored under.
fn same_document(existing: &str, stored_name: &str) -> bool {
    sanitize_file_name(existing).is_ok_and(|name| name == stored_name)
}

fn tmp_path(path: &Path) -> PathBuf {
    path.with_extension("tmp")
}

/// Write all three files next to their targets first, then move them into
/// place. A failed write removes the staged files and leaves the previous
/// snapshot untouched.
fn save_snapshot(paths: &StorePaths, snapshot: &Snapshot) -> anyhow::Result<()> {
    let mut index_bytes = Vec::new();
    snapshot.index.write_to(&mut index_bytes)?;
    let embeddings_bytes = serde_json::to_vec(&EmbeddingsFileRef {
        model: &snapshot.space.model,
        dims: snapshot.space.dims,
        vectors: &snapshot.embeddings,
    })?;
    let documents_bytes = serde_json::to_vec_pretty(&snapshot.records)?;

    let files = [
        (paths.index_file(), index_bytes),
        (paths.embeddings_file(), embeddings_bytes),
        (paths.documents_file(), documents_bytes),
    ];

    let mut staged: Vec<PathBuf> = Vec::with_capacity(files.len());
    for (path, bytes) in &files {
        let tmp = tmp_path(path);
        if let Err(e) = std::fs::write(&tmp, bytes) {
            for written in &staged {
                let _ = std::fs::remove_file(written);
            }
            return Err(anyhow::Error::new(e).context(format!("Failed to write {}", tmp.display())));
        }
        staged.push(tmp);
    }

    for (path, _) in &files {
        std::fs::rename(tmp_path(path), path)
            .with_context(|| format!("Failed to move {} into place", path.display()))?;
    }
    Ok(())
}

fn load_snapshot(paths: &StorePaths) -> anyhow::Result<Option<Snapshot>> {
    let files = [
        paths.documents_file(),
        paths.embeddings_file(),
        paths.index_file(),
    ];
    let present = files.iter().filter(|p| p.exists()).count();
    if present == 0 {
        return Ok(None);
    }
    if present != files.len() {
        anyhow::bail!("only {} of {} knowledge base files exist", present, files.len());
    }

    let records: Vec<ChunkRecord> = serde_json::from_slice(
        &std::fs::read(&files[0]).with_context(|| format!("Failed to read {}", files[0].display()))?,
    )
    .with_context(|| format!("Failed to parse {}", files[0].display()))?;
    let embeddings: EmbeddingsFile = serde_json::from_slice(
        &std::fs::read(&files[1]).with_context(|| format!("Failed to read {}", files[1].display()))?,
    )
    .with_context(|| format!("Failed to parse {}", files[1].display()))?;
    let index = FlatIndex::load(&files[2])
        .with_context(|| format!("Failed to load {}", files[2].display()))?;

    let vectors = embeddings.vectors;
    if records.len() != vectors.len() || records.len() != index.len() {
        anyhow::bail!(
            "inconsistent counts: {} chunks, {} embeddings, {} indexed vectors",
            records.len(),
            vectors.len(),
            index.len()
        );
    }
    if embeddings.dims != index.dims() {
        anyhow::bail!(
            "embeddings recorded as {} dims but index has {}",
            embeddings.dims,
            index.dims()
        );
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != index.dims()) {
        anyhow::bail!(
            "embedding of dimension {} does not match index dimension {}",
            bad.len(),
            index.dims()
        );
    }

    Ok(Some(Snapshot {
        records,
        space: EmbeddingSpace {
            model: embeddings.model,
            dims: embeddings.dims,
        },
        embeddings: vectors,
        index,
    }))
}
