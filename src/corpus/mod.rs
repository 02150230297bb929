//! Chunk records and corpus ingestion
//!
//! The retrieval core operates on pre-chunked text. Upstream document
//! processing (PDF/DOCX extraction, section splitting) happens elsewhere;
//! this module accepts its output as JSONL chunk records, or chunks plain
//! text files directly for self-contained corpora.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::CorpusConfig;
use crate::error::{Result, VitaqError};

/// One indexed slice of a source document. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Owning document identifier (typically a filename)
    pub source_id: String,
    /// Section label within the source
    pub section: String,
    /// Chunk order within the source
    pub sequence: u32,
    /// Chunk text content
    pub text: String,
    /// Candidate identifier derived from the source (filename stem)
    #[serde(default)]
    pub candidate: String,
}

impl ChunkRecord {
    /// Identity used for deduplication and merge across retrieval paths.
    pub fn key(&self) -> ChunkKey {
        ChunkKey {
            source_id: self.source_id.clone(),
            sequence: self.sequence,
        }
    }
}

/// Identity of a chunk: owning source plus position within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    pub source_id: String,
    pub sequence: u32,
}

/// Derive a candidate identifier from a source identifier (filename stem).
pub fn candidate_from_source(source_id: &str) -> String {
    Path::new(source_id)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| source_id.to_string())
}

/// Split text into fixed-size character windows with overlap.
///
/// Windows advance by `chunk_size - overlap` characters; the final partial
/// window is kept. Empty input yields no chunks.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    if text.is_empty() || chunk_size == 0 {
        return Vec::new();
    }
    let step = chunk_size.saturating_sub(overlap).max(1);
    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        start += step;
    }
    chunks
}

/// Load chunk records from a JSONL file (one record per line).
///
/// Blank lines are skipped. Records without a candidate field get one
/// derived from their source identifier.
pub fn load_jsonl(path: &Path) -> Result<Vec<ChunkRecord>> {
    let data = fs::read_to_string(path).map_err(|e| VitaqError::Io {
        source: e,
        context: format!("reading chunk records from {}", path.display()),
    })?;

    let mut records = Vec::new();
    for (lineno, line) in data.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let mut record: ChunkRecord =
            serde_json::from_str(line).map_err(|e| VitaqError::Json {
                source: e,
                context: format!("{}:{}", path.display(), lineno + 1),
            })?;
        if record.candidate.is_empty() {
            record.candidate = candidate_from_source(&record.source_id);
        }
        records.push(record);
    }
    Ok(records)
}

/// Load a directory of plain text files as one source document each.
///
/// Every `*.txt` file becomes a source with section label `general`,
/// chunked by the configured window size. Files are visited in name order
/// so repeated ingestion produces identical records.
pub fn load_text_dir(dir: &Path, config: &CorpusConfig) -> Result<Vec<ChunkRecord>> {
    let mut paths: Vec<_> = fs::read_dir(dir)
        .map_err(|e| VitaqError::Io {
            source: e,
            context: format!("reading corpus directory {}", dir.display()),
        })?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "txt"))
        .collect();
    paths.sort();

    let mut records = Vec::new();
    for path in &paths {
        let text = fs::read_to_string(path).map_err(|e| VitaqError::Io {
            source: e,
            context: format!("reading {}", path.display()),
        })?;
        let source_id = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let candidate = candidate_from_source(&source_id);
        for (sequence, text) in split_text(&text, config.chunk_size, config.chunk_overlap)
            .into_iter()
            .enumerate()
        {
            records.push(ChunkRecord {
                source_id: source_id.clone(),
                section: "general".to_string(),
                sequence: sequence as u32,
                text,
                candidate: candidate.clone(),
            });
        }
    }
    Ok(records)
}

/// Load a corpus from a path: a `.jsonl` file of chunk records, or a
/// directory of plain text files.
pub fn load_corpus(path: &Path, config: &CorpusConfig) -> Result<Vec<ChunkRecord>> {
    if path.is_dir() {
        load_text_dir(path, config)
    } else if path.extension().is_some_and(|ext| ext == "jsonl") {
        load_jsonl(path)
    } else {
        Err(VitaqError::Corpus(format!(
            "unsupported corpus path {} (expected a directory of .txt files or a .jsonl file)",
            path.display()
        )))
    }
}
