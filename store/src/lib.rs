//! Sandbox Image Store - Layered Template Storage
//!
//! Templates are chains of immutable layers stored one directory per layer.
//! Templates derived from a common base share its layers on disk, deletion
//! only removes layers no other template depends on, and resolution turns a
//! template name into a materialized root filesystem plus the merged launch
//! configuration.

#![allow(clippy::result_large_err)]

pub mod delete;
pub mod id;
pub mod index;
pub mod ingest;
pub mod layer;
pub mod layer_store;
pub mod lock;
pub mod materialize;
pub mod resolve;
pub mod source;
pub mod template_store;

// Re-export common types
pub use delete::{Deleter, SweepReport};
pub use id::LayerId;
pub use index::NameIndex;
pub use ingest::{IngestReport, Ingestor};
pub use layer::{Layer, LayerConfig, LayerMeta, PayloadFormat};
pub use layer_store::{LayerStore, StagedLayer};
pub use lock::StoreLock;
pub use materialize::{Materializer, RunArtifact};
pub use resolve::{DiskMount, LaunchSpec, ResolvedTemplate, Resolver, RunOptions};
pub use source::{
    FetchRequest, ImageReference, LayerDescriptor, OciLayoutSource, RegistryAuth,
    RegistrySource, SourceRegistry, TemplateSource, DEFAULT_SOURCE,
};
pub use template_store::{TemplateStore, TemplateSummary};

/// Sandbox Image Store version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
