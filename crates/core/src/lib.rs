//! Pure domain logic for the cachewatch job monitor.
//!
//! Nothing in this crate performs I/O. It defines the submission payload,
//! the classification of inbound status frames, and the aggregate-state
//! machine that folds those frames into run progress and decides when a
//! run has finished. The `cachewatch-client` crate drives it over a live
//! WebSocket connection.

pub mod aggregator;
pub mod completion;
pub mod error;
pub mod inbound;
pub mod submission;
pub mod summary;
pub mod types;

pub use aggregator::{AggregateState, Aggregator, Facet, StateDelta};
pub use completion::{CompletionPolicy, TerminationReason};
pub use error::CoreError;
pub use inbound::{classify, InboundEvent};
pub use submission::{CacheStrategy, LoadBalancerPolicy, SubmitRequest};
pub use summary::{RunOutcome, RunSummary};
