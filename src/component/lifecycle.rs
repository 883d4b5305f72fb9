//! Component lifecycle: the shared contract each node kind implements, and
//! the runners that drive it.
//!
//! The lifecycle state machine is Uninitialized → Ready → (Processing ⇄
//! Ready) → Closed. `Processing` is internal to a single dispatch call;
//! per task instance processing is strictly sequential, so re-entry cannot
//! occur.
//!
//! Failures raised by user logic during processing are not fatal: the
//! runner logs them, the record is still acknowledged exactly once, and the
//! task instance continues with the next record.

use crate::config::ConfigResolver;
use crate::envelope::TupleEnvelope;
use crate::error::{Error, Result};
use crate::worker::WorkerIdentity;
use serde_json::Value;
use tracing::{debug, warn};

/// Acknowledgment token assigned by the engine when a record is delivered.
pub type AckToken = u64;

/// A record on the wire: entity tag plus the serialized payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Semantic type of the record.
    pub entity: String,
    /// Canonical serialized payload.
    pub payload: String,
}

/// What a task instance receives on its sequential signal stream: either a
/// regular record or the designated system-level tick marker.
#[derive(Debug)]
pub enum Signal {
    /// A regular record, with the token to acknowledge it by.
    Record {
        /// The record to process.
        record: Record,
        /// Token for the exactly-once acknowledgment.
        ack: AckToken,
    },
    /// A periodic tick notification.
    Tick,
}

/// A record emitted downstream, tagged with the node that produced it and
/// the substream it was emitted on.
#[derive(Debug, Clone)]
pub struct Emitted {
    /// Identifier of the emitting node.
    pub from: String,
    /// Named substream, or `None` for the default substream.
    pub stream: Option<String>,
    /// The emitted record.
    pub record: Record,
}

/// Lifecycle state of a runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Created but not yet initialized.
    Uninitialized,
    /// Initialized and accepting signals.
    Ready,
    /// Torn down; no further calls occur.
    Closed,
}

// ============================================================================
// Component traits
// ============================================================================

/// A source component: the user-facing contract for ingress nodes.
///
/// `next` is called once per scheduling tick; the implementation populates
/// the context's working envelope and calls [`SourceContext::emit`] for
/// each record it wants to send downstream.
pub trait SourceComponent: Send {
    /// One-time initialization. Connections and state go here.
    fn open(&mut self, ctx: &mut SourceContext) -> Result<()>;

    /// Produce the next record(s). Called once per scheduling tick.
    fn next(&mut self, ctx: &mut SourceContext) -> Result<()>;

    /// One-time teardown, invoked at most once.
    fn close(&mut self) {}

    /// Name for logging.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl std::fmt::Debug for dyn SourceComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceComponent")
            .field("name", &self.name())
            .finish()
    }
}

/// A processor component: the user-facing contract for transforms and sinks.
pub trait ProcessorComponent: Send {
    /// One-time initialization with the resolved per-node configuration.
    fn prepare(&mut self, ctx: &mut ProcessorContext) -> Result<()>;

    /// Process one incoming record. The current envelope is available
    /// through the context; call [`ProcessorContext::emit`] to send the
    /// (possibly mutated) envelope downstream.
    fn execute(&mut self, ctx: &mut ProcessorContext) -> Result<()>;

    /// Handle a periodic tick notification. Default: no-op.
    fn on_tick(&mut self, _ctx: &mut ProcessorContext) {}

    /// One-time teardown, invoked at most once.
    fn close(&mut self) {}

    /// Name for logging.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

// ============================================================================
// Contexts
// ============================================================================

/// Execution context handed to a [`SourceComponent`].
pub struct SourceContext {
    node_id: String,
    token: String,
    resolver: ConfigResolver,
    entity: String,
    envelope: TupleEnvelope,
    emit_tx: kanal::Sender<Emitted>,
}

impl SourceContext {
    /// The node's declared identifier.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// The generated distinguishing token for this instance.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Configuration lookup scoped to this node.
    pub fn resolver(&self) -> &ConfigResolver {
        &self.resolver
    }

    /// Set a payload field on the working envelope (dot paths supported).
    pub fn set(&mut self, path: &str, value: impl Into<Value>) {
        self.envelope.set(path, value);
    }

    /// Get a payload field from the working envelope.
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.envelope.get(path)
    }

    /// Replace the entity tag for subsequently emitted records.
    pub fn set_entity(&mut self, entity: impl Into<String>) {
        self.envelope.set_entity(entity);
    }

    /// The working envelope.
    pub fn envelope_mut(&mut self) -> &mut TupleEnvelope {
        &mut self.envelope
    }

    /// Emit the working envelope on the default substream and start a
    /// fresh one.
    ///
    /// A serialization failure produces no output for this record; it is
    /// logged and processing continues.
    pub fn emit(&mut self) {
        self.emit_inner(None);
    }

    /// Emit the working envelope on a named substream and start a fresh one.
    pub fn emit_to(&mut self, stream: &str) {
        self.emit_inner(Some(stream));
    }

    fn emit_inner(&mut self, stream: Option<&str>) {
        let fresh = TupleEnvelope::new(self.envelope.entity().to_string());
        let envelope = std::mem::replace(&mut self.envelope, fresh);
        send_envelope(&self.emit_tx, &self.node_id, stream, envelope);
    }
}

/// Execution context handed to a [`ProcessorComponent`].
pub struct ProcessorContext {
    node_id: String,
    resolver: ConfigResolver,
    default_entity: Option<String>,
    envelope: TupleEnvelope,
    emit_tx: Option<kanal::Sender<Emitted>>,
    ack_tx: kanal::Sender<AckToken>,
}

impl ProcessorContext {
    /// The node's declared identifier.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Configuration lookup scoped to this node.
    pub fn resolver(&self) -> &ConfigResolver {
        &self.resolver
    }

    /// Get a payload field from the current envelope.
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.envelope.get(path)
    }

    /// Set a payload field on the current envelope.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) {
        self.envelope.set(path, value);
    }

    /// Remove a payload field from the current envelope.
    pub fn remove(&mut self, path: &str) -> Option<Value> {
        self.envelope.remove(path)
    }

    /// Check whether a payload field exists on the current envelope.
    pub fn exists(&self, path: &str) -> bool {
        self.envelope.exists(path)
    }

    /// The current envelope.
    pub fn envelope(&self) -> &TupleEnvelope {
        &self.envelope
    }

    /// The current envelope, mutably.
    pub fn envelope_mut(&mut self) -> &mut TupleEnvelope {
        &mut self.envelope
    }

    /// Replace the entity tag for subsequently emitted records.
    pub fn set_entity(&mut self, entity: impl Into<String>) {
        self.envelope.set_entity(entity);
    }

    /// Emit the current envelope on the default substream.
    ///
    /// Sinks have no downstream; their emit is logged and dropped. A
    /// serialization failure likewise produces no output and processing
    /// continues.
    pub fn emit(&mut self) {
        self.emit_inner(None);
    }

    /// Emit the current envelope on a named substream.
    pub fn emit_to(&mut self, stream: &str) {
        self.emit_inner(Some(stream));
    }

    fn emit_inner(&mut self, stream: Option<&str>) {
        match &self.emit_tx {
            Some(tx) => send_envelope(tx, &self.node_id, stream, self.envelope.clone()),
            None => warn!(node = %self.node_id, "emit from an egress node has no downstream"),
        }
    }

    fn load(&mut self, envelope: TupleEnvelope) {
        self.envelope = envelope;
    }

    fn ack(&mut self, token: AckToken) {
        if self.ack_tx.send(token).is_err() {
            warn!(node = %self.node_id, token, "acknowledgment channel closed");
        }
    }
}

fn send_envelope(
    tx: &kanal::Sender<Emitted>,
    node_id: &str,
    stream: Option<&str>,
    envelope: TupleEnvelope,
) {
    match envelope.to_wire() {
        Ok(payload) => {
            let emitted = Emitted {
                from: node_id.to_string(),
                stream: stream.map(String::from),
                record: Record {
                    entity: envelope.entity().to_string(),
                    payload,
                },
            };
            if tx.send(emitted).is_err() {
                warn!(node = %node_id, "emission channel closed; record dropped");
            }
        }
        Err(e) => warn!(node = %node_id, error = %e, "envelope serialization failed; no output"),
    }
}

// ============================================================================
// Runners
// ============================================================================

/// Lifecycle wrapper driving a [`SourceComponent`].
pub struct SourceRunner {
    component: Box<dyn SourceComponent>,
    ctx: SourceContext,
    state: LifecycleState,
    worker: Option<WorkerIdentity>,
}

impl SourceRunner {
    /// Create a runner for one task instance of a source node.
    pub fn new(
        node_id: impl Into<String>,
        component: Box<dyn SourceComponent>,
        resolver: ConfigResolver,
        emit_tx: kanal::Sender<Emitted>,
        token: impl Into<String>,
    ) -> Self {
        let node_id = node_id.into();
        Self {
            component,
            ctx: SourceContext {
                node_id,
                token: token.into(),
                resolver,
                entity: String::new(),
                envelope: TupleEnvelope::new(""),
                emit_tx,
            },
            state: LifecycleState::Uninitialized,
            worker: None,
        }
    }

    /// Record host/worker identity; the worker-location marker is written
    /// during `open`.
    pub fn with_worker_identity(mut self, identity: WorkerIdentity) -> Self {
        self.worker = Some(identity);
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// The node this runner belongs to.
    pub fn node_id(&self) -> &str {
        &self.ctx.node_id
    }

    /// One-time initialization: resolves the required entity tag, writes
    /// the worker-location marker if an identity is configured, and calls
    /// the component's `open`.
    pub fn open(&mut self) -> Result<()> {
        self.ensure(LifecycleState::Uninitialized, "open")?;
        if let Some(identity) = &self.worker {
            crate::worker::write_worker_marker(identity)?;
        }
        let entity = self.ctx.resolver.get_required("entity")?.to_string();
        self.ctx.entity = entity.clone();
        self.ctx.envelope = TupleEnvelope::new(entity);
        self.component.open(&mut self.ctx)?;
        self.state = LifecycleState::Ready;
        debug!(node = %self.ctx.node_id, component = %self.component.name(), "source opened");
        Ok(())
    }

    /// One scheduling tick: gives the component a fresh working envelope
    /// and calls `next`. Faults raised by user logic are logged and
    /// swallowed; the task instance keeps running.
    pub fn next(&mut self) -> Result<()> {
        self.ensure(LifecycleState::Ready, "next")?;
        self.ctx.envelope = TupleEnvelope::new(self.ctx.entity.clone());
        if let Err(e) = self.component.next(&mut self.ctx) {
            warn!(node = %self.ctx.node_id, error = %e, "source fault; continuing");
        }
        Ok(())
    }

    /// One-time teardown. Idempotent.
    pub fn close(&mut self) {
        if self.state != LifecycleState::Closed {
            self.component.close();
            self.state = LifecycleState::Closed;
        }
    }

    fn ensure(&self, expected: LifecycleState, op: &str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::Lifecycle(format!(
                "{op} called on node '{}' in state {:?}",
                self.ctx.node_id, self.state
            )))
        }
    }
}

/// Lifecycle wrapper driving a [`ProcessorComponent`] (transform or sink).
pub struct ProcessorRunner {
    component: Box<dyn ProcessorComponent>,
    ctx: ProcessorContext,
    state: LifecycleState,
    worker: Option<WorkerIdentity>,
}

impl ProcessorRunner {
    /// Create a runner for one task instance of a transform or sink node.
    ///
    /// Sinks pass `None` for `emit_tx`; they have no downstream.
    pub fn new(
        node_id: impl Into<String>,
        component: Box<dyn ProcessorComponent>,
        resolver: ConfigResolver,
        emit_tx: Option<kanal::Sender<Emitted>>,
        ack_tx: kanal::Sender<AckToken>,
    ) -> Self {
        let node_id = node_id.into();
        Self {
            component,
            ctx: ProcessorContext {
                node_id,
                resolver,
                default_entity: None,
                envelope: TupleEnvelope::new(""),
                emit_tx,
                ack_tx,
            },
            state: LifecycleState::Uninitialized,
            worker: None,
        }
    }

    /// Record host/worker identity; the worker-location marker is written
    /// during `prepare`.
    pub fn with_worker_identity(mut self, identity: WorkerIdentity) -> Self {
        self.worker = Some(identity);
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// The node this runner belongs to.
    pub fn node_id(&self) -> &str {
        &self.ctx.node_id
    }

    /// One-time initialization.
    pub fn prepare(&mut self) -> Result<()> {
        self.ensure(LifecycleState::Uninitialized, "prepare")?;
        if let Some(identity) = &self.worker {
            crate::worker::write_worker_marker(identity)?;
        }
        self.ctx.default_entity = self.ctx.resolver.get("entity").map(String::from);
        self.component.prepare(&mut self.ctx)?;
        self.state = LifecycleState::Ready;
        debug!(node = %self.ctx.node_id, component = %self.component.name(), "processor prepared");
        Ok(())
    }

    /// Dispatch one signal.
    ///
    /// Tick notifications route to the component's tick handler. Regular
    /// records are deserialized and handed to `execute`; whatever happens —
    /// a deserialization failure or a fault in user logic — the record is
    /// acknowledged exactly once and the task instance continues.
    pub fn handle(&mut self, signal: Signal) -> Result<()> {
        self.ensure(LifecycleState::Ready, "handle")?;
        match signal {
            Signal::Tick => self.component.on_tick(&mut self.ctx),
            Signal::Record { record, ack } => {
                let entity = self
                    .ctx
                    .default_entity
                    .clone()
                    .unwrap_or_else(|| record.entity.clone());
                match TupleEnvelope::from_wire(entity, &record.payload) {
                    Ok(envelope) => {
                        self.ctx.load(envelope);
                        if let Err(e) = self.component.execute(&mut self.ctx) {
                            warn!(
                                node = %self.ctx.node_id,
                                error = %e,
                                "processing fault; record acknowledged without output"
                            );
                        }
                    }
                    Err(e) => {
                        warn!(node = %self.ctx.node_id, error = %e, "undecodable record; acknowledged");
                    }
                }
                self.ctx.ack(ack);
            }
        }
        Ok(())
    }

    /// One-time teardown. Idempotent.
    pub fn close(&mut self) {
        if self.state != LifecycleState::Closed {
            self.component.close();
            self.state = LifecycleState::Closed;
        }
    }

    fn ensure(&self, expected: LifecycleState, op: &str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::Lifecycle(format!(
                "{op} called on node '{}' in state {:?}",
                self.ctx.node_id, self.state
            )))
        }
    }
}
