//! Topology configuration document parsing.
//!
//! The document format:
//!
//! ```xml
//! <topology>
//!   <sources>
//!     <source id="S" impl="feed">
//!       <parallelism>1</parallelism>
//!       <tickInterval>60</tickInterval>
//!       <entity>item</entity>
//!       <url>http://a</url><url>http://b</url>
//!     </source>
//!   </sources>
//!   <transforms>
//!     <transform id="T" impl="filter">
//!       <parallelism>2</parallelism>
//!       <sources>
//!         <source>
//!           <sourceId>S</sourceId>
//!           <grouping>shuffle</grouping>
//!         </source>
//!       </sources>
//!     </transform>
//!   </transforms>
//!   <sinks>...</sinks>
//!   <options><debug>false</debug></options>
//! </topology>
//! ```
//!
//! Scalar properties are leaf elements; a repeated leaf name becomes a list
//! property; an element whose children themselves have children is a
//! "complex" property (a list of labeled sub-records). Key-based grouping
//! carries its key in a `field` attribute: `<grouping field="user">field</grouping>`.

use crate::error::{Error, Result};
use crate::grouping::Grouping;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::BTreeMap;
use std::path::Path;

/// The kind of a configuration scope: one of the three node collections,
/// or the global options map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    /// Ingress-only node.
    Source,
    /// Node with both inputs and outputs.
    Transform,
    /// Egress-only node.
    Sink,
    /// Global topology options.
    Options,
}

impl ComponentKind {
    /// The section name this kind reads from.
    pub fn section(&self) -> &'static str {
        match self {
            ComponentKind::Source => "sources",
            ComponentKind::Transform => "transforms",
            ComponentKind::Sink => "sinks",
            ComponentKind::Options => "options",
        }
    }
}

/// A scalar or list property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// A single text value.
    Scalar(String),
    /// A repeated element, in declaration order.
    List(Vec<String>),
}

impl PropertyValue {
    /// View as a scalar. A list property has no scalar view.
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            PropertyValue::Scalar(s) => Some(s),
            PropertyValue::List(_) => None,
        }
    }

    /// View as a list; a scalar is a one-element list.
    pub fn as_list(&self) -> Vec<&str> {
        match self {
            PropertyValue::Scalar(s) => vec![s.as_str()],
            PropertyValue::List(items) => items.iter().map(String::as_str).collect(),
        }
    }
}

/// One labeled sub-record of a complex property.
pub type ComplexItem = BTreeMap<String, String>;

/// A declared edge: where a node's records come from and how they are
/// load-balanced across its task instances.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeDeclaration {
    /// Identifier of the upstream node. Must reference a node declared
    /// earlier in the document.
    pub source_id: String,
    /// Optional named substream; `None` means the default substream.
    pub stream_id: Option<String>,
    /// Load-balancing strategy for this edge.
    pub grouping: Grouping,
}

/// One node declaration from the document.
#[derive(Debug, Clone)]
pub struct NodeDeclaration {
    /// Unique identifier within its collection.
    pub id: String,
    /// Implementation identifier naming the unit to instantiate.
    pub implementation: String,
    /// Number of parallel task instances.
    pub parallelism: u32,
    /// Optional explicit task count override.
    pub num_tasks: Option<u32>,
    /// Optional periodic tick interval, in seconds.
    pub tick_interval_secs: Option<u32>,
    /// Incoming edges (transforms and sinks).
    pub edges: Vec<EdgeDeclaration>,
    properties: Vec<(String, PropertyValue)>,
    complex: Vec<(String, Vec<ComplexItem>)>,
}

impl NodeDeclaration {
    /// Look up a scalar property by name.
    pub fn property(&self, name: &str) -> Option<&str> {
        self.property_value(name).and_then(PropertyValue::as_scalar)
    }

    /// Look up a scalar or list property by name.
    pub fn property_value(&self, name: &str) -> Option<&PropertyValue> {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Look up a complex property (list of labeled sub-records) by name.
    pub fn complex_property(&self, name: &str) -> Option<&[ComplexItem]> {
        self.complex
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, items)| items.as_slice())
    }

    /// All scalar/list properties in declaration order.
    pub fn properties(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.properties.iter().map(|(n, v)| (n.as_str(), v))
    }
}

/// An immutable, parsed topology configuration document.
#[derive(Debug, Clone)]
pub struct ConfigDocument {
    sources: Vec<NodeDeclaration>,
    transforms: Vec<NodeDeclaration>,
    sinks: Vec<NodeDeclaration>,
    options: Vec<(String, String)>,
}

impl ConfigDocument {
    /// Parse a document from an XML string.
    pub fn parse_str(input: &str) -> Result<Self> {
        let root = XmlElement::parse(input)?;
        let mut doc = Self {
            sources: Vec::new(),
            transforms: Vec::new(),
            sinks: Vec::new(),
            options: Vec::new(),
        };

        for section in &root.children {
            match section.name.as_str() {
                "sources" => doc.sources = parse_collection(section)?,
                "transforms" => doc.transforms = parse_collection(section)?,
                "sinks" => doc.sinks = parse_collection(section)?,
                "options" => {
                    doc.options = section
                        .children
                        .iter()
                        .map(|c| (c.name.clone(), c.text.clone()))
                        .collect();
                }
                _ => {}
            }
        }

        Ok(doc)
    }

    /// Parse a document from a file on disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let input = std::fs::read_to_string(path)?;
        Self::parse_str(&input)
    }

    /// Source declarations in document order.
    pub fn sources(&self) -> &[NodeDeclaration] {
        &self.sources
    }

    /// Transform declarations in document order.
    pub fn transforms(&self) -> &[NodeDeclaration] {
        &self.transforms
    }

    /// Sink declarations in document order.
    pub fn sinks(&self) -> &[NodeDeclaration] {
        &self.sinks
    }

    /// Look up a node declaration by kind and identifier.
    pub fn node(&self, kind: ComponentKind, id: &str) -> Option<&NodeDeclaration> {
        let collection = match kind {
            ComponentKind::Source => &self.sources,
            ComponentKind::Transform => &self.transforms,
            ComponentKind::Sink => &self.sinks,
            ComponentKind::Options => return None,
        };
        collection.iter().find(|n| n.id == id)
    }

    /// Look up a global option by name.
    pub fn option(&self, name: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

fn parse_collection(section: &XmlElement) -> Result<Vec<NodeDeclaration>> {
    let mut nodes: Vec<NodeDeclaration> = Vec::new();
    for element in &section.children {
        let node = parse_node(element)?;
        if nodes.iter().any(|n| n.id == node.id) {
            return Err(Error::DuplicateNode { id: node.id });
        }
        nodes.push(node);
    }
    Ok(nodes)
}

fn parse_node(element: &XmlElement) -> Result<NodeDeclaration> {
    let id = required_attr(element, "id")?;
    let implementation = required_attr(element, "impl")?;

    let mut node = NodeDeclaration {
        id,
        implementation,
        parallelism: 0,
        num_tasks: None,
        tick_interval_secs: None,
        edges: Vec::new(),
        properties: Vec::new(),
        complex: Vec::new(),
    };

    let mut parallelism: Option<u32> = None;
    for child in &element.children {
        match child.name.as_str() {
            "parallelism" => parallelism = Some(parse_positive_int(&child.text, "parallelism")?),
            "numTasks" => node.num_tasks = Some(parse_positive_int(&child.text, "numTasks")?),
            "tickInterval" => {
                node.tick_interval_secs = Some(parse_positive_int(&child.text, "tickInterval")?)
            }
            "sources" => node.edges = parse_edges(child)?,
            _ if child.children.is_empty() => push_scalar(&mut node.properties, child),
            _ => node.complex.push((child.name.clone(), parse_complex(child))),
        }
    }

    node.parallelism = parallelism.ok_or_else(|| Error::ConfigMissing {
        property: format!("{}.parallelism", node.id),
    })?;

    Ok(node)
}

fn push_scalar(properties: &mut Vec<(String, PropertyValue)>, child: &XmlElement) {
    let text = child.text.clone();
    if let Some((_, value)) = properties.iter_mut().find(|(n, _)| *n == child.name) {
        match value {
            PropertyValue::Scalar(first) => {
                let first = std::mem::take(first);
                *value = PropertyValue::List(vec![first, text]);
            }
            PropertyValue::List(items) => items.push(text),
        }
    } else {
        properties.push((child.name.clone(), PropertyValue::Scalar(text)));
    }
}

fn parse_complex(property: &XmlElement) -> Vec<ComplexItem> {
    property
        .children
        .iter()
        .map(|item| {
            item.children
                .iter()
                .map(|field| (field.name.clone(), field.text.clone()))
                .collect()
        })
        .collect()
}

fn parse_edges(sources: &XmlElement) -> Result<Vec<EdgeDeclaration>> {
    let mut edges = Vec::new();
    for entry in &sources.children {
        let source_id = entry
            .child_text("sourceId")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::ConfigMissing {
                property: "sourceId".to_string(),
            })?
            .to_string();
        let stream_id = entry
            .child_text("streamId")
            .filter(|s| !s.is_empty())
            .map(String::from);

        let grouping_el = entry
            .children
            .iter()
            .find(|c| c.name == "grouping")
            .ok_or_else(|| Error::ConfigMissing {
                property: "grouping".to_string(),
            })?;
        let field = grouping_el.attr("field");
        let grouping = Grouping::from_config(&grouping_el.text, field)?;

        edges.push(EdgeDeclaration {
            source_id,
            stream_id,
            grouping,
        });
    }
    Ok(edges)
}

fn required_attr(element: &XmlElement, name: &str) -> Result<String> {
    element
        .attr(name)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .ok_or_else(|| Error::ConfigMissing {
            property: format!("@{name}"),
        })
}

fn parse_positive_int(text: &str, property: &str) -> Result<u32> {
    match text.trim().parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(Error::ConfigMissing {
            property: property.to_string(),
        }),
    }
}

// ============================================================================
// Generic XML tree
// ============================================================================

/// A minimal in-memory XML element tree. The document model above is an
/// interpretation of this tree; the tree itself carries no topology
/// semantics.
#[derive(Debug, Clone, Default)]
struct XmlElement {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<XmlElement>,
    text: String,
}

impl XmlElement {
    fn parse(input: &str) -> Result<XmlElement> {
        let mut reader = Reader::from_str(input);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;

        loop {
            match reader
                .read_event()
                .map_err(|e| Error::ConfigParse(e.to_string()))?
            {
                Event::Start(start) => stack.push(Self::from_start(&start)?),
                Event::Empty(start) => {
                    let element = Self::from_start(&start)?;
                    Self::attach(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    let unescaped = text
                        .unescape()
                        .map_err(|e| Error::ConfigParse(e.to_string()))?;
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&unescaped);
                    }
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| Error::ConfigParse("unbalanced end tag".to_string()))?;
                    Self::attach(&mut stack, &mut root, element)?;
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(Error::ConfigParse("unclosed element".to_string()));
        }
        root.ok_or_else(|| Error::ConfigParse("document has no root element".to_string()))
    }

    fn from_start(start: &BytesStart<'_>) -> Result<XmlElement> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attrs = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| Error::ConfigParse(e.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| Error::ConfigParse(e.to_string()))?
                .into_owned();
            attrs.push((key, value));
        }
        Ok(XmlElement {
            name,
            attrs,
            children: Vec::new(),
            text: String::new(),
        })
    }

    fn attach(
        stack: &mut [XmlElement],
        root: &mut Option<XmlElement>,
        element: XmlElement,
    ) -> Result<()> {
        match stack.last_mut() {
            Some(parent) => parent.children.push(element),
            None if root.is_none() => *root = Some(element),
            None => {
                return Err(Error::ConfigParse(
                    "multiple root elements in document".to_string(),
                ))
            }
        }
        Ok(())
    }

    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    fn child_text(&self, name: &str) -> Option<&str> {
        self.children
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.text.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
        <topology>
          <sources>
            <source id="S" impl="feed">
              <parallelism>1</parallelism>
              <tickInterval>60</tickInterval>
              <entity>item</entity>
              <url>http://a</url>
              <url>http://b</url>
              <bars>
                <bar><label>x</label><value>1</value></bar>
                <bar><label>y</label><value>2</value></bar>
              </bars>
            </source>
          </sources>
          <transforms>
            <transform id="T" impl="filter">
              <parallelism>2</parallelism>
              <numTasks>4</numTasks>
              <field>user.name</field>
              <sources>
                <source>
                  <sourceId>S</sourceId>
                  <grouping>shuffle</grouping>
                </source>
              </sources>
            </transform>
          </transforms>
          <sinks>
            <sink id="K" impl="console">
              <parallelism>1</parallelism>
              <sources>
                <source>
                  <sourceId>T</sourceId>
                  <streamId>alerts</streamId>
                  <grouping field="user">field</grouping>
                </source>
              </sources>
            </sink>
          </sinks>
          <options>
            <debug>false</debug>
          </options>
        </topology>
    "#;

    #[test]
    fn test_parse_sections() {
        let doc = ConfigDocument::parse_str(DOC).unwrap();
        assert_eq!(doc.sources().len(), 1);
        assert_eq!(doc.transforms().len(), 1);
        assert_eq!(doc.sinks().len(), 1);
        assert_eq!(doc.option("debug"), Some("false"));
    }

    #[test]
    fn test_parse_node_attributes() {
        let doc = ConfigDocument::parse_str(DOC).unwrap();
        let source = &doc.sources()[0];
        assert_eq!(source.id, "S");
        assert_eq!(source.implementation, "feed");
        assert_eq!(source.parallelism, 1);
        assert_eq!(source.tick_interval_secs, Some(60));
        assert_eq!(source.num_tasks, None);

        let transform = &doc.transforms()[0];
        assert_eq!(transform.parallelism, 2);
        assert_eq!(transform.num_tasks, Some(4));
    }

    #[test]
    fn test_scalar_and_list_properties() {
        let doc = ConfigDocument::parse_str(DOC).unwrap();
        let source = &doc.sources()[0];
        assert_eq!(source.property("entity"), Some("item"));
        assert_eq!(
            source.property_value("url").unwrap().as_list(),
            vec!["http://a", "http://b"]
        );
        // a list property has no scalar view
        assert_eq!(source.property("url"), None);
    }

    #[test]
    fn test_complex_property() {
        let doc = ConfigDocument::parse_str(DOC).unwrap();
        let bars = doc.sources()[0].complex_property("bars").unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].get("label").map(String::as_str), Some("x"));
        assert_eq!(bars[1].get("value").map(String::as_str), Some("2"));
    }

    #[test]
    fn test_edges() {
        let doc = ConfigDocument::parse_str(DOC).unwrap();
        let transform = &doc.transforms()[0];
        assert_eq!(transform.edges.len(), 1);
        assert_eq!(transform.edges[0].source_id, "S");
        assert_eq!(transform.edges[0].stream_id, None);
        assert_eq!(transform.edges[0].grouping, Grouping::Shuffle);

        let sink = &doc.sinks()[0];
        assert_eq!(sink.edges[0].stream_id.as_deref(), Some("alerts"));
        assert_eq!(sink.edges[0].grouping, Grouping::Field("user".to_string()));
    }

    #[test]
    fn test_missing_parallelism_fails() {
        let doc = r#"<topology><sources>
            <source id="S" impl="feed"><entity>x</entity></source>
        </sources></topology>"#;
        assert!(matches!(
            ConfigDocument::parse_str(doc),
            Err(Error::ConfigMissing { .. })
        ));
    }

    #[test]
    fn test_non_integer_parallelism_fails() {
        let doc = r#"<topology><sources>
            <source id="S" impl="feed"><parallelism>many</parallelism></source>
        </sources></topology>"#;
        assert!(matches!(
            ConfigDocument::parse_str(doc),
            Err(Error::ConfigMissing { .. })
        ));
    }

    #[test]
    fn test_duplicate_id_fails() {
        let doc = r#"<topology><sources>
            <source id="S" impl="a"><parallelism>1</parallelism></source>
            <source id="S" impl="b"><parallelism>1</parallelism></source>
        </sources></topology>"#;
        assert!(matches!(
            ConfigDocument::parse_str(doc),
            Err(Error::DuplicateNode { .. })
        ));
    }

    #[test]
    fn test_field_grouping_without_key_fails() {
        let doc = r#"<topology><transforms>
            <transform id="T" impl="filter">
              <parallelism>1</parallelism>
              <sources><source>
                <sourceId>S</sourceId>
                <grouping>field</grouping>
              </source></sources>
            </transform>
        </transforms></topology>"#;
        assert!(matches!(
            ConfigDocument::parse_str(doc),
            Err(Error::InvalidGroupingConfig(_))
        ));
    }

    #[test]
    fn test_unknown_grouping_fails() {
        let doc = r#"<topology><transforms>
            <transform id="T" impl="filter">
              <parallelism>1</parallelism>
              <sources><source>
                <sourceId>S</sourceId>
                <grouping>sticky</grouping>
              </source></sources>
            </transform>
        </transforms></topology>"#;
        assert!(matches!(
            ConfigDocument::parse_str(doc),
            Err(Error::InvalidGroupingConfig(_))
        ));
    }

    #[test]
    fn test_malformed_xml_fails() {
        assert!(matches!(
            ConfigDocument::parse_str("<topology><sources>"),
            Err(Error::ConfigParse(_))
        ));
    }

    #[test]
    fn test_node_lookup() {
        let doc = ConfigDocument::parse_str(DOC).unwrap();
        assert!(doc.node(ComponentKind::Source, "S").is_some());
        assert!(doc.node(ComponentKind::Transform, "T").is_some());
        assert!(doc.node(ComponentKind::Transform, "S").is_none());
    }
}
