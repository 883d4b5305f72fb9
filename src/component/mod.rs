//! The component-runtime contract shared by every node.
//!
//! User code implements [`SourceComponent`] or [`ProcessorComponent`]; the
//! lifecycle runners in this module wrap those implementations with the
//! dispatch, acknowledgment, and fault-isolation behavior every node gets
//! for free. The [`ComponentFactory`] constructs live instances from their
//! configured implementation identifiers.

mod factory;
mod lifecycle;

pub use factory::{
    Component, ComponentFactory, Constructor, IngestAdapter, SourceNode, StandardCtor,
    TokenizedCtor,
};
pub use lifecycle::{
    AckToken, Emitted, LifecycleState, ProcessorComponent, ProcessorContext, ProcessorRunner,
    Record, Signal, SourceComponent, SourceContext, SourceRunner,
};
