//! Conversation segmentation: token estimates, topic boundaries, chunk
//! construction and the advisory incomplete-exchange detector.

mod builder;
mod incomplete;
mod tokens;
mod topics;

pub use builder::{ChunkBuilder, ChunkingConfig, ConversationChunk};
pub use incomplete::{IncompleteReason, IncompleteTopic, IncompleteTopicDetector};
pub use tokens::{TokenEstimator, is_wide};
pub use topics::{TopicBoundaryDetector, TopicCategory, classify, dominant_topic};
