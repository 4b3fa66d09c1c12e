//! The HNSW (Hierarchical Navigable Small World) graph index.

mod graph;
mod params;

pub use graph::{HnswIndex, HnswNodeView, HnswSearchResult, HnswStats};
pub use params::{HnswParams, SearchQuality};
