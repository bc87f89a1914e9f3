pub mod checkpoint;
pub mod config;
pub mod error;
pub mod models;
pub mod pager;
pub mod parse;
pub mod pipeline;
pub mod report;
pub mod retry;
pub mod stages;
pub mod traits;

pub mod testutil;

pub use checkpoint::{CheckpointState, CheckpointStore, JsonCheckpointFile};
pub use config::{HarvestConfig, Pacing};
pub use error::HarvestError;
pub use models::{AuthorRecord, Cursor, FollowEdge, FollowerProfile, Page, PostRecord};
pub use pipeline::{HarvestPipeline, RunSummary};
pub use retry::BackoffPolicy;
pub use traits::{ContentSource, ProfileStore};
