//! Inbound side: thread router + classification pipeline.

pub mod pipeline;
pub mod router;

pub use pipeline::{InboundPipeline, spawn_inbound_listener};
pub use router::{RouteOutcome, route};
