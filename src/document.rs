//! The document set bound to a single query.

use serde::{Deserialize, Serialize};

/// One caller-supplied document. `text` is opaque, untrusted bytes — the engine
/// never inspects it except to measure length and forward it, always behind an
/// untrusted-content wrapper, to a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub name: String,
    pub mime: String,
    pub text: String,
}

impl Document {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        mime: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            mime: mime.into(),
            text: text.into(),
        }
    }
}

/// An ordered, read-only sequence of documents bound to one query. Owned by the
/// caller for the duration of the query; the engine only ever holds a shared
/// reference to it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentSet {
    documents: Vec<Document>,
}

impl DocumentSet {
    pub fn new(documents: Vec<Document>) -> Self {
        Self { documents }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Document> {
        self.documents.iter()
    }

    pub fn as_slice(&self) -> &[Document] {
        &self.documents
    }

    /// Per-document character lengths, in order — used to template the system
    /// prompt (spec §4.4.1).
    pub fn lengths(&self) -> Vec<usize> {
        self.documents.iter().map(|d| d.text.chars().count()).collect()
    }

    pub fn total_chars(&self) -> usize {
        self.documents.iter().map(|d| d.text.chars().count()).sum()
    }

    /// The ordered `documents` text list bound as `context` for a worker's
    /// `exec` frame (spec §4.3.4).
    pub fn texts(&self) -> Vec<String> {
        self.documents.iter().map(|d| d.text.clone()).collect()
    }
}

impl From<Vec<Document>> for DocumentSet {
    fn from(documents: Vec<Document>) -> Self {
        Self::new(documents)
    }
}
