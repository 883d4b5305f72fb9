//! Construction of component instances from implementation identifiers.
//!
//! Each registered implementation declares up front which constructor shape
//! it uses: the standard two-argument form, or the tokenized form for
//! components that need a per-instance distinguishing token. The factory
//! dispatches on that declaration; there is no trial-and-error fallback.

use super::lifecycle::{ProcessorComponent, SourceComponent};
use crate::config::ConfigDocument;
use crate::error::{Error, Result};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A constructed component instance, classified by its role.
pub enum Component {
    /// An ingress node.
    Source(SourceNode),
    /// A transform or sink node.
    Processor(Box<dyn ProcessorComponent>),
}

/// An ingress node: either a native source implementation, or an adapter
/// wrapping an external ingestion client that must be unwrapped before the
/// engine can run it.
pub enum SourceNode {
    /// A directly runnable source.
    Native(Box<dyn SourceComponent>),
    /// A wrapper around an external ingestion client.
    Adapter(Box<dyn IngestAdapter>),
}

/// A wrapper around an external ingestion client (for example a message
/// queue consumer) that can surrender the underlying source.
pub trait IngestAdapter: Send {
    /// Name of the wrapped client, for logging.
    fn client_name(&self) -> &str;

    /// Surrender the underlying runnable source.
    fn into_source(self: Box<Self>) -> Box<dyn SourceComponent>;
}

/// Standard constructor: node identifier plus the parsed configuration.
pub type StandardCtor = Box<dyn Fn(&str, Arc<ConfigDocument>) -> Result<Component> + Send + Sync>;

/// Tokenized constructor: additionally receives a generated per-instance
/// distinguishing token.
pub type TokenizedCtor =
    Box<dyn Fn(&str, Arc<ConfigDocument>, &str) -> Result<Component> + Send + Sync>;

/// The constructor shape an implementation declares at registration.
pub enum Constructor {
    /// Two-argument form.
    Standard(StandardCtor),
    /// Three-argument form with a distinguishing token.
    Tokenized(TokenizedCtor),
}

impl Constructor {
    /// Wrap a standard two-argument constructor.
    pub fn standard<F>(f: F) -> Self
    where
        F: Fn(&str, Arc<ConfigDocument>) -> Result<Component> + Send + Sync + 'static,
    {
        Constructor::Standard(Box::new(f))
    }

    /// Wrap a tokenized three-argument constructor.
    pub fn tokenized<F>(f: F) -> Self
    where
        F: Fn(&str, Arc<ConfigDocument>, &str) -> Result<Component> + Send + Sync + 'static,
    {
        Constructor::Tokenized(Box::new(f))
    }
}

/// Registry of component implementations, keyed by the implementation
/// identifier used in topology configuration.
#[derive(Default)]
pub struct ComponentFactory {
    constructors: HashMap<String, Constructor>,
}

impl ComponentFactory {
    /// Create an empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an implementation under its configuration identifier.
    /// Re-registering an identifier replaces the previous constructor.
    pub fn register(&mut self, implementation: impl Into<String>, ctor: Constructor) {
        self.constructors.insert(implementation.into(), ctor);
    }

    /// Whether an implementation identifier is registered.
    pub fn is_registered(&self, implementation: &str) -> bool {
        self.constructors.contains_key(implementation)
    }

    /// Construct a source instance.
    ///
    /// Adapter-wrapped sources are unwrapped here; the caller always gets a
    /// directly runnable source. Returns the instance together with the
    /// token it was (or would have been) constructed with.
    pub fn build_source(
        &self,
        implementation: &str,
        node_id: &str,
        doc: &Arc<ConfigDocument>,
    ) -> Result<(Box<dyn SourceComponent>, String)> {
        let (component, token) = self.construct(implementation, node_id, doc)?;
        match component {
            Component::Source(SourceNode::Native(source)) => Ok((source, token)),
            Component::Source(SourceNode::Adapter(adapter)) => {
                debug!(node = %node_id, client = %adapter.client_name(), "unwrapping ingest adapter");
                Ok((adapter.into_source(), token))
            }
            Component::Processor(_) => Err(Error::UnknownComponentType {
                implementation: format!("'{implementation}' does not construct a source"),
            }),
        }
    }

    /// Construct a transform or sink instance.
    pub fn build_processor(
        &self,
        implementation: &str,
        node_id: &str,
        doc: &Arc<ConfigDocument>,
    ) -> Result<Box<dyn ProcessorComponent>> {
        let (component, _token) = self.construct(implementation, node_id, doc)?;
        match component {
            Component::Processor(processor) => Ok(processor),
            Component::Source(_) => Err(Error::UnknownComponentType {
                implementation: format!("'{implementation}' does not construct a processor"),
            }),
        }
    }

    fn construct(
        &self,
        implementation: &str,
        node_id: &str,
        doc: &Arc<ConfigDocument>,
    ) -> Result<(Component, String)> {
        let ctor = self
            .constructors
            .get(implementation)
            .ok_or_else(|| Error::UnknownComponentType {
                implementation: implementation.to_string(),
            })?;
        let token = generate_token();
        let component = match ctor {
            Constructor::Standard(f) => f(node_id, Arc::clone(doc))?,
            Constructor::Tokenized(f) => f(node_id, Arc::clone(doc), &token)?,
        };
        Ok((component, token))
    }
}

/// Generate a distinguishing token: the decimal rendering of a random
/// negative integer, unique enough to tell concurrent instances apart.
pub fn generate_token() -> String {
    let n: i64 = rand::thread_rng().gen_range(1..1_000_000_000);
    format!("-{n}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::lifecycle::{
        ProcessorContext, SourceContext,
    };
    use crate::config::ConfigDocument;

    struct NullSource;

    impl SourceComponent for NullSource {
        fn open(&mut self, _ctx: &mut SourceContext) -> Result<()> {
            Ok(())
        }
        fn next(&mut self, _ctx: &mut SourceContext) -> Result<()> {
            Ok(())
        }
    }

    struct NullProcessor;

    impl ProcessorComponent for NullProcessor {
        fn prepare(&mut self, _ctx: &mut ProcessorContext) -> Result<()> {
            Ok(())
        }
        fn execute(&mut self, _ctx: &mut ProcessorContext) -> Result<()> {
            Ok(())
        }
    }

    struct QueueAdapter;

    impl IngestAdapter for QueueAdapter {
        fn client_name(&self) -> &str {
            "queue-consumer"
        }
        fn into_source(self: Box<Self>) -> Box<dyn SourceComponent> {
            Box::new(NullSource)
        }
    }

    struct TokenSource {
        token: String,
    }

    impl SourceComponent for TokenSource {
        fn open(&mut self, _ctx: &mut SourceContext) -> Result<()> {
            Ok(())
        }
        fn next(&mut self, ctx: &mut SourceContext) -> Result<()> {
            ctx.set("token", self.token.clone());
            ctx.emit();
            Ok(())
        }
    }

    fn doc() -> Arc<ConfigDocument> {
        Arc::new(
            ConfigDocument::parse_str(
                r#"
            <topology>
              <sources>
                <source id="S" impl="null"><parallelism>1</parallelism><entity>e</entity></source>
              </sources>
              <sinks>
                <sink id="K" impl="null-sink">
                  <parallelism>1</parallelism>
                  <sources><source><sourceId>S</sourceId><grouping>shuffle</grouping></source></sources>
                </sink>
              </sinks>
            </topology>
        "#,
            )
            .unwrap(),
        )
    }

    fn factory() -> ComponentFactory {
        let mut f = ComponentFactory::new();
        f.register(
            "null",
            Constructor::standard(|_, _| {
                Ok(Component::Source(SourceNode::Native(Box::new(NullSource))))
            }),
        );
        f.register(
            "null-sink",
            Constructor::standard(|_, _| Ok(Component::Processor(Box::new(NullProcessor)))),
        );
        f.register(
            "queue",
            Constructor::standard(|_, _| {
                Ok(Component::Source(SourceNode::Adapter(Box::new(QueueAdapter))))
            }),
        );
        f.register(
            "tokenized",
            Constructor::tokenized(|_, _, token| {
                Ok(Component::Source(SourceNode::Native(Box::new(TokenSource {
                    token: token.to_string(),
                }))))
            }),
        );
        f
    }

    #[test]
    fn test_builds_registered_source() {
        let f = factory();
        assert!(f.is_registered("null"));
        f.build_source("null", "S", &doc()).unwrap();
    }

    #[test]
    fn test_unknown_implementation_fails() {
        let f = factory();
        let err = f.build_source("no-such", "S", &doc()).unwrap_err();
        assert!(matches!(err, Error::UnknownComponentType { .. }));
    }

    #[test]
    fn test_adapter_is_unwrapped() {
        let f = factory();
        // the caller gets a runnable source, not the adapter
        let (source, _) = f.build_source("queue", "S", &doc()).unwrap();
        drop(source);
    }

    #[test]
    fn test_kind_mismatch_fails() {
        let f = factory();
        assert!(matches!(
            f.build_processor("null", "S", &doc()),
            Err(Error::UnknownComponentType { .. })
        ));
        assert!(matches!(
            f.build_source("null-sink", "K", &doc()),
            Err(Error::UnknownComponentType { .. })
        ));
    }

    #[test]
    fn test_tokenized_constructor_receives_negative_token() {
        let f = factory();
        let (_, token) = f.build_source("tokenized", "S", &doc()).unwrap();
        assert!(token.starts_with('-'));
        assert!(token[1..].parse::<i64>().is_ok());
    }

    #[test]
    fn test_tokens_distinguish_instances() {
        let tokens: Vec<String> = (0..8).map(|_| generate_token()).collect();
        for t in &tokens {
            assert!(t.starts_with('-'));
        }
        // at least two of eight random draws differ
        assert!(tokens.iter().any(|t| t != &tokens[0]) || tokens.len() == 1);
    }
}
