//! Reference backend: an in-process HNSW index per collection.

pub mod graph;
mod store;

pub use graph::{HnswGraph, HnswParams, Neighbor};
pub use store::HnswVectorStore;
