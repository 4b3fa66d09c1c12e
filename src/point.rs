//! The point record stored in a namespace: a vector plus optional metadata
//! and text, and the result shape returned by every search operation.

use serde::{Deserialize, Serialize};

use crate::metadata::Metadata;

/// A single indexed item: an id, a vector, optional structured metadata,
/// and optional free text for the BM25 channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Point {
    pub id: u64,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub text: Option<String>,
}

impl Point {
    #[must_use]
    pub fn new(id: u64, vector: Vec<f32>) -> Self {
        Self {
            id,
            vector,
            metadata: Metadata::new(),
            text: None,
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.vector.len()
    }
}

/// One scored hit returned by a search operation. `score` is a distance for
/// vector-channel results (smaller is better) and a fused or BM25 score for
/// text/hybrid results (larger is better) — callers distinguish by the
/// operation they called, not by inspecting this type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub id: u64,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    /// Populated on hybrid results: the vector channel's raw distance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_score: Option<f32>,
    /// Populated on hybrid results: the BM25 channel's raw score.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_score: Option<f32>,
}

impl SearchResult {
    #[must_use]
    pub const fn new(id: u64, score: f32) -> Self {
        Self {
            id,
            score,
            metadata: None,
            vector_score: None,
            text_score: None,
        }
    }

    #[must_use]
    pub const fn with_channel_scores(mut self, vector_score: Option<f32>, text_score: Option<f32>) -> Self {
        self.vector_score = vector_score;
        self.text_score = text_score;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}
