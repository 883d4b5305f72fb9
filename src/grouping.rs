//! Load-balancing strategies for edges and their wiring against the engine.
//!
//! A declared edge carries one of three grouping strategies that decide how
//! records are spread across the downstream node's parallel task instances:
//!
//! - `shuffle` — round-robin / any-task delivery
//! - `field` — records sharing the same key-field value go to the same task
//! - `global` — all records go to exactly one designated task
//!
//! An unrecognized strategy string fails loudly with
//! [`Error::InvalidGroupingConfig`] rather than silently dropping the edge.

use crate::config::EdgeDeclaration;
use crate::engine::NodeHandle;
use crate::error::{Error, Result};

/// The load-balancing policy for one edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grouping {
    /// Round-robin delivery across downstream task instances.
    Shuffle,
    /// Key-based delivery: same key-field value, same task instance.
    Field(String),
    /// All records delivered to one designated task instance.
    Global,
}

impl Grouping {
    /// Parse a grouping from its configured strategy string and optional
    /// key field attribute. Strategy matching is case-insensitive.
    pub fn from_config(strategy: &str, field: Option<&str>) -> Result<Self> {
        match strategy.to_lowercase().as_str() {
            "shuffle" => Ok(Grouping::Shuffle),
            "field" => match field {
                Some(f) if !f.is_empty() => Ok(Grouping::Field(f.to_string())),
                _ => Err(Error::InvalidGroupingConfig(
                    "field grouping requires a non-empty key field".to_string(),
                )),
            },
            "global" => Ok(Grouping::Global),
            other => Err(Error::InvalidGroupingConfig(format!(
                "unrecognized grouping strategy '{other}'"
            ))),
        }
    }

    /// The strategy name as it appears in configuration.
    pub fn strategy(&self) -> &'static str {
        match self {
            Grouping::Shuffle => "shuffle",
            Grouping::Field(_) => "field",
            Grouping::Global => "global",
        }
    }

    /// The key field, for field grouping.
    pub fn key_field(&self) -> Option<&str> {
        match self {
            Grouping::Field(f) => Some(f.as_str()),
            _ => None,
        }
    }
}

impl std::fmt::Display for Grouping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Grouping::Field(key) => write!(f, "field({key})"),
            other => f.write_str(other.strategy()),
        }
    }
}

/// Translates declared edges into wiring calls against the engine.
pub struct GroupingResolver;

impl GroupingResolver {
    /// Issue exactly one wiring call for `edge` against `handle`.
    pub fn wire(edge: &EdgeDeclaration, handle: &mut dyn NodeHandle) -> Result<()> {
        let source = edge.source_id.as_str();
        let stream = edge.stream_id.as_deref();
        match &edge.grouping {
            Grouping::Shuffle => handle.shuffle_grouping(source, stream),
            Grouping::Field(key) => handle.fields_grouping(source, stream, key),
            Grouping::Global => handle.global_grouping(source, stream),
        }
        Ok(())
    }
}
