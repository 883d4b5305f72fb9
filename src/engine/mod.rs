//! The engine seam: what a runtime must offer for a topology to be
//! assembled against it.
//!
//! Assembly never talks to a concrete runtime directly; it registers nodes
//! through [`Engine`] and wires edges through the [`NodeHandle`] each
//! registration returns. [`LocalEngine`] is the bundled in-process runtime,
//! used for trial runs and tests.

mod local;

pub use local::{LocalEngine, TrialReport};

use crate::component::{ProcessorComponent, SourceComponent};
use crate::error::Result;
use crate::grouping::Grouping;

/// One wired edge as the engine records it: the upstream node, the optional
/// named stream, and the grouping policy.
#[derive(Debug, Clone, PartialEq)]
pub struct WiredEdge {
    /// Identifier of the upstream node.
    pub upstream: String,
    /// Named stream on the upstream node, if any.
    pub stream: Option<String>,
    /// Load-balancing policy for this edge.
    pub grouping: Grouping,
}

impl WiredEdge {
    /// Build a wired edge.
    pub fn new(upstream: &str, stream: Option<&str>, grouping: Grouping) -> Self {
        Self {
            upstream: upstream.to_string(),
            stream: stream.map(String::from),
            grouping,
        }
    }
}

/// Per-node configuration surface returned by a registration: edge wiring
/// plus the optional task-count and tick-interval knobs.
pub trait NodeHandle {
    /// Override the number of task slots for this node.
    fn set_num_tasks(&mut self, n: u32);

    /// Request periodic tick notifications every `secs` seconds.
    fn set_tick_interval(&mut self, secs: u32);

    /// Wire an edge with round-robin delivery.
    fn shuffle_grouping(&mut self, source: &str, stream: Option<&str>);

    /// Wire an edge with key-based delivery on `field`.
    fn fields_grouping(&mut self, source: &str, stream: Option<&str>, field: &str);

    /// Wire an edge delivering everything to one designated task.
    fn global_grouping(&mut self, source: &str, stream: Option<&str>);
}

/// A runtime that topologies are assembled against.
pub trait Engine {
    /// Register an ingress node. `token` is the per-instance distinguishing
    /// token the component was constructed with.
    fn register_source(
        &mut self,
        id: &str,
        component: Box<dyn SourceComponent>,
        token: String,
        parallelism: u32,
    ) -> Result<&mut dyn NodeHandle>;

    /// Register an intermediate processing node.
    fn register_transform(
        &mut self,
        id: &str,
        component: Box<dyn ProcessorComponent>,
        parallelism: u32,
    ) -> Result<&mut dyn NodeHandle>;

    /// Register an egress node. Sinks have no downstream; anything they
    /// try to emit is dropped.
    fn register_sink(
        &mut self,
        id: &str,
        component: Box<dyn ProcessorComponent>,
        parallelism: u32,
    ) -> Result<&mut dyn NodeHandle>;
}
