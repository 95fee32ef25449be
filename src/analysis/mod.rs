//! Analysis modules.
//!
//! Extraction turns one simulation's output into a per-timestep table;
//! aggregation reduces the tables of a whole experiment.

pub mod aggregator;
pub mod extractor;

pub use aggregator::{AggregationPlan, Aggregator, ReduceOutcome};
pub use extractor::{ChannelExtractor, ExtractorConfig};
