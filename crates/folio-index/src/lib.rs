//! Handbook ingestion: the normalized handbook model, the markdown chunker,
//! and the orchestrator that writes both into a graph backend.

pub mod chunker;
pub mod handbook;
pub mod indexer;

pub use chunker::{ChunkMetadata, ChunkerConfig, DocumentChunker};
pub use handbook::{
    DocumentSpec, ExampleSpec, FieldSpec, Handbook, OperationPolicy, OperationSpec,
    ParameterSpec, ServiceSpec, TagSpec,
};
pub use indexer::{IndexReport, IndexingOrchestrator};
