//! Declarative assembly of stream-processing topologies.
//!
//! A topology is described in an XML document: sources feed records into
//! transforms, transforms feed sinks, and every connection declares how
//! records are load-balanced across the downstream node's parallel task
//! instances. This crate parses that document, constructs the declared
//! components through a registry of implementations, wires the acyclic
//! processing graph, and runs it against an engine.
//!
//! The bundled [`engine::LocalEngine`] executes a topology in-process for
//! trial runs and tests; production deployments implement
//! [`engine::Engine`] for their runtime of choice.
//!
//! ```no_run
//! use std::sync::Arc;
//! use weir::config::ConfigDocument;
//! use weir::component::ComponentFactory;
//! use weir::engine::LocalEngine;
//! use weir::topology::TopologyBuilder;
//!
//! # fn main() -> weir::Result<()> {
//! let doc = Arc::new(ConfigDocument::from_path("topology.xml")?);
//! let factory = ComponentFactory::new();
//! // factory.register(...) for each implementation the document names
//! let mut engine = LocalEngine::new(Arc::clone(&doc));
//! let graph = TopologyBuilder::assemble(&doc, &factory, &mut engine)?;
//! let report = engine.run_trial(10)?;
//! println!("{} nodes, {} records acknowledged", graph.node_count(), report.acked);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod component;
pub mod config;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod grouping;
pub mod topology;
pub mod worker;

pub use error::{Error, Result};

/// Commonly used items, re-exported for one-line imports.
pub mod prelude {
    pub use crate::component::{
        Component, ComponentFactory, Constructor, ProcessorComponent, ProcessorContext,
        SourceComponent, SourceContext, SourceNode,
    };
    pub use crate::config::{ComponentKind, ConfigDocument, ConfigResolver};
    pub use crate::engine::{Engine, LocalEngine, NodeHandle};
    pub use crate::envelope::TupleEnvelope;
    pub use crate::error::{Error, Result};
    pub use crate::grouping::Grouping;
    pub use crate::topology::{TopologyBuilder, TopologyGraph};
}
