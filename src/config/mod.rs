//! Configuration: the parsed topology document and per-node property lookup.
//!
//! A topology is described by a hierarchical XML document with four root
//! sections: `sources`, `transforms`, `sinks`, and `options`. The document
//! is parsed once per topology build ([`ConfigDocument`]) and is read-only
//! thereafter; nodes look their properties up through a [`ConfigResolver`]
//! scoped to their kind and identifier.

mod document;
mod resolver;

pub use document::{
    ComplexItem, ComponentKind, ConfigDocument, EdgeDeclaration, NodeDeclaration, PropertyValue,
};
pub use resolver::ConfigResolver;
