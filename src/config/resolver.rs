//! Per-node configuration property resolution.

use super::document::{ComplexItem, ComponentKind, ConfigDocument, PropertyValue};
use crate::error::{Error, Result};
use std::sync::Arc;

/// Resolves properties for one configuration scope: a node (by kind and
/// identifier) or the global options map.
///
/// The resolver is stateless beyond the parsed document; repeated lookups
/// are idempotent because the document never mutates after parse.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    doc: Arc<ConfigDocument>,
    kind: ComponentKind,
    node_id: Option<String>,
}

impl ConfigResolver {
    /// Create a resolver scoped to one node.
    pub fn for_node(doc: Arc<ConfigDocument>, kind: ComponentKind, node_id: impl Into<String>) -> Self {
        Self {
            doc,
            kind,
            node_id: Some(node_id.into()),
        }
    }

    /// Create a resolver scoped to the global options map.
    pub fn for_options(doc: Arc<ConfigDocument>) -> Self {
        Self {
            doc,
            kind: ComponentKind::Options,
            node_id: None,
        }
    }

    /// The document this resolver reads from.
    pub fn document(&self) -> &Arc<ConfigDocument> {
        &self.doc
    }

    /// The kind of this resolver's scope.
    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    /// Get a scalar property, or `None` if absent.
    pub fn get(&self, property: &str) -> Option<&str> {
        match self.kind {
            ComponentKind::Options => self.doc.option(property),
            _ => self.node_decl()?.property(property),
        }
    }

    /// Get a scalar property, failing with [`Error::ConfigMissing`] if it is
    /// absent or empty.
    pub fn get_required(&self, property: &str) -> Result<&str> {
        match self.get(property) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(self.missing(property)),
        }
    }

    /// Get an integer property. Absent resolves to `Ok(None)`; a present
    /// value that is not representable as an integer fails with
    /// [`Error::ConfigMissing`].
    pub fn get_int(&self, property: &str) -> Result<Option<i64>> {
        match self.get(property) {
            None => Ok(None),
            Some(value) => value
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|_| self.missing(property)),
        }
    }

    /// Get an integer property, failing with [`Error::ConfigMissing`] if it
    /// is absent or not an integer.
    pub fn get_int_required(&self, property: &str) -> Result<i64> {
        self.get_int(property)?.ok_or_else(|| self.missing(property))
    }

    /// Get a list property. A scalar resolves as a one-element list;
    /// absent resolves to `None`.
    pub fn get_list(&self, property: &str) -> Option<Vec<&str>> {
        match self.kind {
            ComponentKind::Options => self.doc.option(property).map(|v| vec![v]),
            _ => self
                .node_decl()?
                .property_value(property)
                .map(PropertyValue::as_list),
        }
    }

    /// Get a complex property: a list of labeled sub-records.
    pub fn get_complex(&self, property: &str) -> Option<&[ComplexItem]> {
        match self.kind {
            ComponentKind::Options => None,
            _ => self.node_decl()?.complex_property(property),
        }
    }

    fn node_decl(&self) -> Option<&super::document::NodeDeclaration> {
        self.doc.node(self.kind, self.node_id.as_deref()?)
    }

    fn missing(&self, property: &str) -> Error {
        let property = match &self.node_id {
            Some(id) => format!("{id}.{property}"),
            None => property.to_string(),
        };
        Error::ConfigMissing { property }
    }
}
