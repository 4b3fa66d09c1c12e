//! Index implementations: the in-memory HNSW graph, the batch-built
//! DiskANN-style disk graph, IVF/IVF-PQ, product quantization, and the
//! BM25 full-text index.

pub mod bm25;
pub mod diskann;
pub mod hnsw;
pub mod ivf;
pub mod pq;
