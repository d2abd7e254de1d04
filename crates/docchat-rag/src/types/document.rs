//! Document identity, chunk and retrieval result types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Stable identity of an ingested document, owned by the relational layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub i64);

impl DocumentId {
    /// Namespace key in the vector index backend
    pub fn namespace(&self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for DocumentId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Supported file types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// PDF document
    Pdf,
    /// Plain text file
    Txt,
    /// Microsoft Word document (.docx)
    Docx,
}

impl FileType {
    /// Detect file type from extension
    pub fn from_extension(ext: &str) -> Result<Self> {
        match ext.trim_start_matches('.').to_lowercase().as_str() {
            "pdf" => Ok(Self::Pdf),
            "txt" => Ok(Self::Txt),
            "docx" => Ok(Self::Docx),
            other => Err(Error::UnsupportedFileType(other.to_string())),
        }
    }

    /// Detect file type from a path's extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| Error::UnsupportedFileType(path.display().to_string()))?;
        Self::from_extension(ext)
    }

    /// Canonical extension
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Txt => "txt",
            Self::Docx => "docx",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// A stored upload ready for ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRef {
    /// Document identity (namespace key)
    pub id: DocumentId,
    /// Location of the stored file
    pub path: PathBuf,
    /// Source file type
    pub file_type: FileType,
    /// Human-readable label used for attribution (original filename)
    pub source_label: String,
}

impl DocumentRef {
    /// Create a reference labelled with the file name of `path`
    pub fn new(id: impl Into<DocumentId>, path: impl Into<PathBuf>, file_type: FileType) -> Self {
        let path = path.into();
        let source_label = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            id: id.into(),
            path,
            file_type,
            source_label,
        }
    }

    /// Create a reference whose file type comes from the path extension
    pub fn from_path(id: impl Into<DocumentId>, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file_type = FileType::from_path(&path)?;
        Ok(Self::new(id, path, file_type))
    }

    /// Override the attribution label (e.g. the name the user uploaded)
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.source_label = label.into();
        self
    }
}

/// One retrieval-addressable segment of a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic id: `{document_id}-{index}`
    pub id: String,
    /// Originating document
    pub document_id: DocumentId,
    /// Position within the document (0-based)
    pub index: u32,
    /// Chunk text
    pub content: String,
    /// Attribution label
    pub source: String,
}

impl Chunk {
    /// Create a new chunk
    pub fn new(document_id: DocumentId, index: u32, content: String, source: String) -> Self {
        Self {
            id: format!("{}-{}", document_id, index),
            document_id,
            index,
            content,
            source,
        }
    }

    /// Length in characters (the unit the chunker bounds)
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}

/// A scored candidate chunk from a similarity search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    /// Chunk text
    pub content: String,
    /// Attribution label
    pub source: String,
    /// Namespace the result came from
    pub namespace: String,
    /// Similarity score (higher is more similar)
    pub similarity: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_type_detection() {
        assert_eq!(FileType::from_extension("PDF").unwrap(), FileType::Pdf);
        assert_eq!(FileType::from_extension(".docx").unwrap(), FileType::Docx);
        assert_eq!(FileType::from_path(Path::new("/tmp/a/notes.txt")).unwrap(), FileType::Txt);
        assert!(matches!(
            FileType::from_extension("xlsx"),
            Err(Error::UnsupportedFileType(ext)) if ext == "xlsx"
        ));
        assert!(FileType::from_path(Path::new("/tmp/README")).is_err());
    }

    #[test]
    fn test_document_ref_label() {
        let doc = DocumentRef::new(DocumentId(7), "/uploads/3f2a.pdf", FileType::Pdf);
        assert_eq!(doc.source_label, "3f2a.pdf");
        assert_eq!(doc.id.namespace(), "7");

        let doc = doc.with_label("handbook.pdf");
        assert_eq!(doc.source_label, "handbook.pdf");
    }

    #[test]
    fn test_chunk_id_is_deterministic() {
        let a = Chunk::new(DocumentId(4), 2, "text".into(), "a.txt".into());
        let b = Chunk::new(DocumentId(4), 2, "other".into(), "a.txt".into());
        assert_eq!(a.id, "4-2");
        assert_eq!(a.id, b.id);
    }
}
