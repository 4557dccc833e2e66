pub mod bits;
pub mod config;
pub mod counting;
pub mod error;
pub mod hasher;
pub mod order;
pub mod pipeline;
pub mod record;
pub mod run;

pub use config::Config;
pub use counting::{CountingBlock, SortStrategy};
pub use error::{Error, Result};
pub use hasher::KeyHasher;
pub use order::{ContextOrder, OrderKind, PrefixOrder, SortOrder};
pub use pipeline::{Pipeline, PipelineOutput, PipelineStats, RunFile};
pub use record::{Record, WordId, SENTENCE_BREAK};
pub use run::{FrontCodedBlockReader, FrontCodedWriter, RunManifest, RunReader, BLOCK_BYTES};
