//! Topology assembly: from a parsed configuration document to a registered,
//! wired processing graph.
//!
//! Assembly walks the document in declaration order (sources, then
//! transforms, then sinks), constructs each node through the
//! [`ComponentFactory`], registers it against the [`Engine`], wires its
//! declared edges, and records the result in an acyclic [`TopologyGraph`].
//! Every structural defect fails assembly up front; nothing is silently
//! dropped.

use crate::component::ComponentFactory;
use crate::config::{ComponentKind, ConfigDocument, NodeDeclaration};
use crate::engine::{Engine, NodeHandle, WiredEdge};
use crate::error::{Error, Result};
use crate::grouping::GroupingResolver;
use daggy::{Dag, NodeIndex, Walker};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// One assembled node as recorded in the graph.
#[derive(Debug, Clone)]
pub struct TopologyNode {
    /// The node's declared identifier.
    pub id: String,
    /// Which collection it was declared in.
    pub kind: ComponentKind,
    /// Implementation identifier it was constructed from.
    pub implementation: String,
    /// Declared parallelism.
    pub parallelism: u32,
    /// Explicit task-count override, if declared.
    pub num_tasks: Option<u32>,
    /// Periodic tick interval in seconds, if declared.
    pub tick_interval_secs: Option<u32>,
}

/// The assembled topology: an acyclic graph with one vertex per declared
/// node and one edge per wired connection.
pub struct TopologyGraph {
    dag: Dag<TopologyNode, WiredEdge>,
    index: HashMap<String, NodeIndex>,
}

impl TopologyGraph {
    /// Look up a node by identifier.
    pub fn node(&self, id: &str) -> Option<&TopologyNode> {
        self.dag.node_weight(*self.index.get(id)?)
    }

    /// Number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.dag.node_count()
    }

    /// Number of wired edges in the graph.
    pub fn edge_count(&self) -> usize {
        self.dag.edge_count()
    }

    /// All nodes of the given kind, in assembly order.
    pub fn nodes_of_kind(&self, kind: ComponentKind) -> Vec<&TopologyNode> {
        self.dag
            .graph()
            .node_weights()
            .filter(|n| n.kind == kind)
            .collect()
    }

    /// The ingress nodes.
    pub fn sources(&self) -> Vec<&TopologyNode> {
        self.nodes_of_kind(ComponentKind::Source)
    }

    /// The egress nodes.
    pub fn sinks(&self) -> Vec<&TopologyNode> {
        self.nodes_of_kind(ComponentKind::Sink)
    }

    /// The wired edges feeding a node.
    pub fn edges_into(&self, id: &str) -> Vec<&WiredEdge> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        self.dag
            .parents(idx)
            .iter(&self.dag)
            .filter_map(|(e, _)| self.dag.edge_weight(e))
            .collect()
    }

    /// The underlying acyclic graph.
    pub fn dag(&self) -> &Dag<TopologyNode, WiredEdge> {
        &self.dag
    }
}

/// Assembles topologies from configuration.
pub struct TopologyBuilder;

impl TopologyBuilder {
    /// Assemble the topology described by `doc` against `engine`,
    /// constructing components through `factory`.
    ///
    /// Fails with [`Error::EmptyTopology`] when the document declares no
    /// sources or no sinks, [`Error::NoSourcesDeclared`] when a processing
    /// node has no incoming edges, and [`Error::UnknownUpstream`] when an
    /// edge references anything other than a source or transform declared
    /// before it.
    pub fn assemble(
        doc: &Arc<ConfigDocument>,
        factory: &ComponentFactory,
        engine: &mut dyn Engine,
    ) -> Result<TopologyGraph> {
        if doc.sources().is_empty() {
            return Err(Error::EmptyTopology("sources"));
        }
        if doc.sinks().is_empty() {
            return Err(Error::EmptyTopology("sinks"));
        }

        let mut graph = TopologyGraph {
            dag: Dag::new(),
            index: HashMap::new(),
        };

        for decl in doc.sources() {
            let (component, token) =
                factory.build_source(&decl.implementation, &decl.id, doc)?;
            let handle =
                engine.register_source(&decl.id, component, token, decl.parallelism)?;
            apply_knobs(decl, handle);
            add_vertex(&mut graph, decl, ComponentKind::Source);
        }

        for decl in doc.transforms() {
            let component = factory.build_processor(&decl.implementation, &decl.id, doc)?;
            let handle =
                engine.register_transform(&decl.id, component, decl.parallelism)?;
            wire_edges(decl, handle, &graph)?;
            apply_knobs(decl, handle);
            add_vertex(&mut graph, decl, ComponentKind::Transform);
            link_edges(&mut graph, decl)?;
        }

        for decl in doc.sinks() {
            let component = factory.build_processor(&decl.implementation, &decl.id, doc)?;
            let handle = engine.register_sink(&decl.id, component, decl.parallelism)?;
            wire_edges(decl, handle, &graph)?;
            apply_knobs(decl, handle);
            add_vertex(&mut graph, decl, ComponentKind::Sink);
            link_edges(&mut graph, decl)?;
        }

        info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "topology assembled"
        );
        Ok(graph)
    }
}

fn apply_knobs(decl: &NodeDeclaration, handle: &mut dyn NodeHandle) {
    if let Some(n) = decl.num_tasks {
        handle.set_num_tasks(n);
    }
    if let Some(secs) = decl.tick_interval_secs {
        handle.set_tick_interval(secs);
    }
}

fn wire_edges(
    decl: &NodeDeclaration,
    handle: &mut dyn NodeHandle,
    graph: &TopologyGraph,
) -> Result<()> {
    if decl.edges.is_empty() {
        return Err(Error::NoSourcesDeclared {
            node: decl.id.clone(),
        });
    }
    for edge in &decl.edges {
        // valid upstreams are sources and transforms declared earlier;
        // sinks are egress-only and never feed another node
        match graph.node(&edge.source_id) {
            Some(upstream) if upstream.kind != ComponentKind::Sink => {}
            _ => {
                return Err(Error::UnknownUpstream {
                    node: decl.id.clone(),
                    source_id: edge.source_id.clone(),
                })
            }
        }
        GroupingResolver::wire(edge, handle)?;
    }
    Ok(())
}

fn add_vertex(graph: &mut TopologyGraph, decl: &NodeDeclaration, kind: ComponentKind) {
    let idx = graph.dag.add_node(TopologyNode {
        id: decl.id.clone(),
        kind,
        implementation: decl.implementation.clone(),
        parallelism: decl.parallelism,
        num_tasks: decl.num_tasks,
        tick_interval_secs: decl.tick_interval_secs,
    });
    graph.index.insert(decl.id.clone(), idx);
}

fn link_edges(graph: &mut TopologyGraph, decl: &NodeDeclaration) -> Result<()> {
    let to = graph.index[&decl.id];
    for edge in &decl.edges {
        let from = graph.index[&edge.source_id];
        let weight = WiredEdge::new(
            &edge.source_id,
            edge.stream_id.as_deref(),
            edge.grouping.clone(),
        );
        graph
            .dag
            .add_edge(from, to, weight)
            .map_err(|_| Error::ConfigParse(format!("edge into '{}' forms a cycle", decl.id)))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{
        Component, Constructor, ProcessorComponent, ProcessorContext, SourceComponent,
        SourceContext, SourceNode,
    };
    use crate::engine::LocalEngine;
    use crate::grouping::Grouping;

    struct Feed;

    impl SourceComponent for Feed {
        fn open(&mut self, _ctx: &mut SourceContext) -> Result<()> {
            Ok(())
        }
        fn next(&mut self, _ctx: &mut SourceContext) -> Result<()> {
            Ok(())
        }
    }

    struct Pass;

    impl ProcessorComponent for Pass {
        fn prepare(&mut self, _ctx: &mut ProcessorContext) -> Result<()> {
            Ok(())
        }
        fn execute(&mut self, _ctx: &mut ProcessorContext) -> Result<()> {
            Ok(())
        }
    }

    fn factory() -> ComponentFactory {
        let mut f = ComponentFactory::new();
        f.register(
            "feed",
            Constructor::standard(|_, _| Ok(Component::Source(SourceNode::Native(Box::new(Feed))))),
        );
        f.register(
            "pass",
            Constructor::standard(|_, _| Ok(Component::Processor(Box::new(Pass)))),
        );
        f
    }

    fn parse(xml: &str) -> Arc<ConfigDocument> {
        Arc::new(ConfigDocument::parse_str(xml).unwrap())
    }

    const LINEAR: &str = r#"
        <topology>
          <sources>
            <source id="S" impl="feed"><parallelism>1</parallelism><entity>e</entity></source>
          </sources>
          <transforms>
            <transform id="T" impl="pass">
              <parallelism>2</parallelism>
              <numTasks>4</numTasks>
              <sources><source><sourceId>S</sourceId><grouping>shuffle</grouping></source></sources>
            </transform>
          </transforms>
          <sinks>
            <sink id="K" impl="pass">
              <parallelism>1</parallelism>
              <sources><source><sourceId>T</sourceId><grouping field="user">field</grouping></source></sources>
            </sink>
          </sinks>
        </topology>
    "#;

    #[test]
    fn test_linear_topology_assembles() {
        let doc = parse(LINEAR);
        let mut engine = LocalEngine::new(Arc::clone(&doc));
        let graph = TopologyBuilder::assemble(&doc, &factory(), &mut engine).unwrap();

        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.sources().len(), 1);
        assert_eq!(graph.sinks().len(), 1);

        let t = graph.node("T").unwrap();
        assert_eq!(t.parallelism, 2);
        assert_eq!(t.num_tasks, Some(4));

        let into_t = graph.edges_into("T");
        assert_eq!(into_t.len(), 1);
        assert_eq!(into_t[0].upstream, "S");
        assert_eq!(into_t[0].grouping, Grouping::Shuffle);

        let into_k = graph.edges_into("K");
        assert_eq!(into_k[0].grouping, Grouping::Field("user".to_string()));

        // the engine saw the same wiring
        assert_eq!(engine.edges_of("T").unwrap().len(), 1);
        assert_eq!(engine.edges_of("K").unwrap().len(), 1);
    }

    #[test]
    fn test_no_sources_section_fails() {
        let doc = parse(
            r#"<topology>
                 <sinks>
                   <sink id="K" impl="pass">
                     <parallelism>1</parallelism>
                     <sources><source><sourceId>S</sourceId><grouping>shuffle</grouping></source></sources>
                   </sink>
                 </sinks>
               </topology>"#,
        );
        let mut engine = LocalEngine::new(Arc::clone(&doc));
        assert!(matches!(
            TopologyBuilder::assemble(&doc, &factory(), &mut engine),
            Err(Error::EmptyTopology("sources"))
        ));
    }

    #[test]
    fn test_no_sinks_section_fails() {
        let doc = parse(
            r#"<topology>
                 <sources>
                   <source id="S" impl="feed"><parallelism>1</parallelism><entity>e</entity></source>
                 </sources>
               </topology>"#,
        );
        let mut engine = LocalEngine::new(Arc::clone(&doc));
        assert!(matches!(
            TopologyBuilder::assemble(&doc, &factory(), &mut engine),
            Err(Error::EmptyTopology("sinks"))
        ));
    }

    #[test]
    fn test_edgeless_processor_fails() {
        let doc = parse(
            r#"<topology>
                 <sources>
                   <source id="S" impl="feed"><parallelism>1</parallelism><entity>e</entity></source>
                 </sources>
                 <sinks>
                   <sink id="K" impl="pass"><parallelism>1</parallelism></sink>
                 </sinks>
               </topology>"#,
        );
        let mut engine = LocalEngine::new(Arc::clone(&doc));
        assert!(matches!(
            TopologyBuilder::assemble(&doc, &factory(), &mut engine),
            Err(Error::NoSourcesDeclared { node }) if node == "K"
        ));
    }

    #[test]
    fn test_unknown_upstream_fails() {
        let doc = parse(
            r#"<topology>
                 <sources>
                   <source id="S" impl="feed"><parallelism>1</parallelism><entity>e</entity></source>
                 </sources>
                 <sinks>
                   <sink id="K" impl="pass">
                     <parallelism>1</parallelism>
                     <sources><source><sourceId>missing</sourceId><grouping>shuffle</grouping></source></sources>
                   </sink>
                 </sinks>
               </topology>"#,
        );
        let mut engine = LocalEngine::new(Arc::clone(&doc));
        assert!(matches!(
            TopologyBuilder::assemble(&doc, &factory(), &mut engine),
            Err(Error::UnknownUpstream { node, source_id }) if node == "K" && source_id == "missing"
        ));
    }

    #[test]
    fn test_sink_upstream_rejected() {
        let doc = parse(
            r#"<topology>
                 <sources>
                   <source id="S" impl="feed"><parallelism>1</parallelism><entity>e</entity></source>
                 </sources>
                 <sinks>
                   <sink id="K1" impl="pass">
                     <parallelism>1</parallelism>
                     <sources><source><sourceId>S</sourceId><grouping>shuffle</grouping></source></sources>
                   </sink>
                   <sink id="K2" impl="pass">
                     <parallelism>1</parallelism>
                     <sources><source><sourceId>K1</sourceId><grouping>shuffle</grouping></source></sources>
                   </sink>
                 </sinks>
               </topology>"#,
        );
        let mut engine = LocalEngine::new(Arc::clone(&doc));
        assert!(matches!(
            TopologyBuilder::assemble(&doc, &factory(), &mut engine),
            Err(Error::UnknownUpstream { node, source_id }) if node == "K2" && source_id == "K1"
        ));
    }

    #[test]
    fn test_unknown_implementation_fails() {
        let doc = parse(
            r#"<topology>
                 <sources>
                   <source id="S" impl="no-such"><parallelism>1</parallelism><entity>e</entity></source>
                 </sources>
                 <sinks>
                   <sink id="K" impl="pass">
                     <parallelism>1</parallelism>
                     <sources><source><sourceId>S</sourceId><grouping>shuffle</grouping></source></sources>
                   </sink>
                 </sinks>
               </topology>"#,
        );
        let mut engine = LocalEngine::new(Arc::clone(&doc));
        assert!(matches!(
            TopologyBuilder::assemble(&doc, &factory(), &mut engine),
            Err(Error::UnknownComponentType { .. })
        ));
    }

    #[test]
    fn test_fan_in_assembles() {
        let doc = parse(
            r#"<topology>
                 <sources>
                   <source id="A" impl="feed"><parallelism>1</parallelism><entity>e</entity></source>
                   <source id="B" impl="feed"><parallelism>1</parallelism><entity>e</entity></source>
                 </sources>
                 <sinks>
                   <sink id="K" impl="pass">
                     <parallelism>1</parallelism>
                     <sources>
                       <source><sourceId>A</sourceId><grouping>shuffle</grouping></source>
                       <source><sourceId>B</sourceId><grouping>global</grouping></source>
                     </sources>
                   </sink>
                 </sinks>
               </topology>"#,
        );
        let mut engine = LocalEngine::new(Arc::clone(&doc));
        let graph = TopologyBuilder::assemble(&doc, &factory(), &mut engine).unwrap();
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.edges_into("K").len(), 2);
    }
}
