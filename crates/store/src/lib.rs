//! Store side of a chunkvault transfer.
//!
//! Chunks land in a [`ChunkSink`]: [`IndexedSink`] keeps one record per
//! chunk id for parallel uploads, [`OffsetSink`] writes a single stream
//! destination at absolute offsets. [`merge::finalize`] turns indexed
//! records into the published artifact. [`StoreService`] exposes all of it
//! as an [`ArtifactService`](chunkvault_rpc::ArtifactService).

pub mod config;
pub mod layout;
pub mod merge;
pub mod service;
pub mod sink;
pub mod status;

pub use config::StoreConfig;
pub use merge::{Declared, Published};
pub use service::StoreService;
pub use sink::{ChunkSink, ChunkSlot, IndexedSink, OffsetSink, open_sink};
