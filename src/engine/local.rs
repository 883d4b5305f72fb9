//! In-process trial engine.
//!
//! `LocalEngine` runs every registered node on the calling thread in
//! deterministic rounds: each round delivers due ticks, lets each source
//! produce, then routes emissions along the wired edges until the topology
//! drains. It exists for trial runs and tests; production deployments
//! target a real runtime through the same [`Engine`] seam.

use super::{Engine, NodeHandle, WiredEdge};
use crate::component::{
    AckToken, Emitted, ProcessorComponent, ProcessorRunner, Record, Signal, SourceComponent,
    SourceRunner,
};
use crate::config::{ComponentKind, ConfigDocument, ConfigResolver};
use crate::envelope::TupleEnvelope;
use crate::error::{Error, Result};
use crate::grouping::Grouping;
use crate::worker::WorkerIdentity;
use smallvec::SmallVec;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{debug, info};

enum NodeRunner {
    Source(SourceRunner),
    Processor(ProcessorRunner),
}

struct LocalNode {
    id: String,
    edges: SmallVec<[WiredEdge; 2]>,
    tick_interval: Option<u32>,
    num_tasks: Option<u32>,
    parallelism: u32,
    // deliveries per designated task slot, slot_counts.len() == parallelism
    slot_counts: Vec<u64>,
    runner: NodeRunner,
}

impl LocalNode {
    /// Pick the task slot a record is designated to, honoring the edge's
    /// grouping: global pins slot 0, shuffle round-robins, field hashes the
    /// key value so equal keys always land on the same slot.
    fn select_slot(&self, grouping: &Grouping, record: &Record) -> usize {
        let slots = self.slot_counts.len();
        match grouping {
            Grouping::Global => 0,
            Grouping::Shuffle => (self.slot_counts.iter().sum::<u64>() as usize) % slots,
            Grouping::Field(key) => {
                let value = TupleEnvelope::from_wire(record.entity.clone(), &record.payload)
                    .ok()
                    .and_then(|env| env.get(key).cloned());
                let mut hasher = DefaultHasher::new();
                // absent key hashes as the empty string, like a null key
                value.map(|v| v.to_string()).unwrap_or_default().hash(&mut hasher);
                (hasher.finish() as usize) % slots
            }
        }
    }
}

impl NodeHandle for LocalNode {
    fn set_num_tasks(&mut self, n: u32) {
        self.num_tasks = Some(n);
    }

    fn set_tick_interval(&mut self, secs: u32) {
        self.tick_interval = Some(secs);
    }

    fn shuffle_grouping(&mut self, source: &str, stream: Option<&str>) {
        self.edges
            .push(WiredEdge::new(source, stream, crate::grouping::Grouping::Shuffle));
    }

    fn fields_grouping(&mut self, source: &str, stream: Option<&str>, field: &str) {
        self.edges.push(WiredEdge::new(
            source,
            stream,
            crate::grouping::Grouping::Field(field.to_string()),
        ));
    }

    fn global_grouping(&mut self, source: &str, stream: Option<&str>) {
        self.edges
            .push(WiredEdge::new(source, stream, crate::grouping::Grouping::Global));
    }
}

/// Outcome of a trial run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialReport {
    /// Number of rounds executed.
    pub rounds: u32,
    /// Records delivered to processing nodes.
    pub delivered: u64,
    /// Records acknowledged. Equal to `delivered` when every node upholds
    /// the acknowledge-always contract.
    pub acked: u64,
}

/// Single-threaded engine that executes the whole topology in-process.
pub struct LocalEngine {
    doc: Arc<ConfigDocument>,
    nodes: Vec<LocalNode>,
    index: HashMap<String, usize>,
    emit_tx: kanal::Sender<Emitted>,
    emit_rx: kanal::Receiver<Emitted>,
    ack_tx: kanal::Sender<AckToken>,
    ack_rx: kanal::Receiver<AckToken>,
    worker: Option<WorkerIdentity>,
    next_token: AckToken,
}

impl LocalEngine {
    /// Create an engine over a parsed topology document.
    pub fn new(doc: Arc<ConfigDocument>) -> Self {
        let (emit_tx, emit_rx) = kanal::unbounded();
        let (ack_tx, ack_rx) = kanal::unbounded();
        Self {
            doc,
            nodes: Vec::new(),
            index: HashMap::new(),
            emit_tx,
            emit_rx,
            ack_tx,
            ack_rx,
            worker: None,
            next_token: 0,
        }
    }

    /// Write worker-location markers for every node when it initializes.
    pub fn with_worker_identity(mut self, identity: WorkerIdentity) -> Self {
        self.worker = Some(identity);
        self
    }

    /// Identifiers of the registered nodes, in registration order.
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.id.as_str())
    }

    /// The edges wired into a node, if it is registered.
    pub fn edges_of(&self, id: &str) -> Option<&[WiredEdge]> {
        self.index.get(id).map(|&i| self.nodes[i].edges.as_slice())
    }

    /// Declared parallelism of a node, if it is registered.
    pub fn parallelism_of(&self, id: &str) -> Option<u32> {
        self.index.get(id).map(|&i| self.nodes[i].parallelism)
    }

    /// Deliveries per designated task slot for a node, if it is registered.
    pub fn slot_deliveries(&self, id: &str) -> Option<&[u64]> {
        self.index.get(id).map(|&i| self.nodes[i].slot_counts.as_slice())
    }

    fn insert(&mut self, node: LocalNode) -> Result<&mut dyn NodeHandle> {
        if self.index.contains_key(&node.id) {
            return Err(Error::DuplicateNode {
                id: node.id.clone(),
            });
        }
        let idx = self.nodes.len();
        self.index.insert(node.id.clone(), idx);
        self.nodes.push(node);
        Ok(&mut self.nodes[idx] as &mut dyn NodeHandle)
    }

    /// Run `rounds` deterministic rounds: due ticks, one production call
    /// per source, then emission routing until the topology drains.
    pub fn run_trial(&mut self, rounds: u32) -> Result<TrialReport> {
        for node in &mut self.nodes {
            match &mut node.runner {
                NodeRunner::Source(r) => r.open()?,
                NodeRunner::Processor(r) => r.prepare()?,
            }
        }
        info!(nodes = self.nodes.len(), rounds, "trial run starting");

        let mut delivered: u64 = 0;
        for round in 1..=rounds {
            // tick notifications for nodes whose interval divides the round
            for i in 0..self.nodes.len() {
                let due = matches!(self.nodes[i].tick_interval, Some(t) if t > 0 && round % t == 0);
                if due {
                    if let NodeRunner::Processor(r) = &mut self.nodes[i].runner {
                        r.handle(Signal::Tick)?;
                    }
                }
            }
            for node in &mut self.nodes {
                if let NodeRunner::Source(r) = &mut node.runner {
                    r.next()?;
                }
            }
            delivered += self.route_until_drained()?;
        }

        let mut acked: u64 = 0;
        while let Ok(Some(_)) = self.ack_rx.try_recv() {
            acked += 1;
        }

        for node in &mut self.nodes {
            match &mut node.runner {
                NodeRunner::Source(r) => r.close(),
                NodeRunner::Processor(r) => r.close(),
            }
        }
        info!(delivered, acked, "trial run finished");
        Ok(TrialReport {
            rounds,
            delivered,
            acked,
        })
    }

    fn route_until_drained(&mut self) -> Result<u64> {
        let mut delivered = 0;
        loop {
            let mut pending = Vec::new();
            while let Ok(Some(emitted)) = self.emit_rx.try_recv() {
                pending.push(emitted);
            }
            if pending.is_empty() {
                return Ok(delivered);
            }
            for emitted in pending {
                // an edge subscribes to one upstream substream; emissions on
                // other substreams never reach it
                let matches: Vec<(usize, Grouping)> = self
                    .nodes
                    .iter()
                    .enumerate()
                    .flat_map(|(i, n)| {
                        n.edges
                            .iter()
                            .filter(|e| {
                                e.upstream == emitted.from
                                    && e.stream.as_deref() == emitted.stream.as_deref()
                            })
                            .map(move |e| (i, e.grouping.clone()))
                    })
                    .collect();
                for (i, grouping) in matches {
                    let slot = self.nodes[i].select_slot(&grouping, &emitted.record);
                    let token = self.next_token;
                    self.next_token += 1;
                    debug!(
                        from = %emitted.from,
                        to = %self.nodes[i].id,
                        slot,
                        token,
                        "routing record"
                    );
                    let node = &mut self.nodes[i];
                    if let NodeRunner::Processor(r) = &mut node.runner {
                        node.slot_counts[slot] += 1;
                        r.handle(Signal::Record {
                            record: Record {
                                entity: emitted.record.entity.clone(),
                                payload: emitted.record.payload.clone(),
                            },
                            ack: token,
                        })?;
                        delivered += 1;
                    }
                }
            }
        }
    }

    fn resolver(&self, kind: ComponentKind, id: &str) -> ConfigResolver {
        ConfigResolver::for_node(Arc::clone(&self.doc), kind, id)
    }
}

impl Engine for LocalEngine {
    fn register_source(
        &mut self,
        id: &str,
        component: Box<dyn SourceComponent>,
        token: String,
        parallelism: u32,
    ) -> Result<&mut dyn NodeHandle> {
        let mut runner = SourceRunner::new(
            id,
            component,
            self.resolver(ComponentKind::Source, id),
            self.emit_tx.clone(),
            token,
        );
        if let Some(identity) = &self.worker {
            runner = runner.with_worker_identity(identity.clone());
        }
        self.insert(LocalNode {
            id: id.to_string(),
            edges: SmallVec::new(),
            tick_interval: None,
            num_tasks: None,
            parallelism,
            slot_counts: vec![0; parallelism.max(1) as usize],
            runner: NodeRunner::Source(runner),
        })
    }

    fn register_transform(
        &mut self,
        id: &str,
        component: Box<dyn ProcessorComponent>,
        parallelism: u32,
    ) -> Result<&mut dyn NodeHandle> {
        let mut runner = ProcessorRunner::new(
            id,
            component,
            self.resolver(ComponentKind::Transform, id),
            Some(self.emit_tx.clone()),
            self.ack_tx.clone(),
        );
        if let Some(identity) = &self.worker {
            runner = runner.with_worker_identity(identity.clone());
        }
        self.insert(LocalNode {
            id: id.to_string(),
            edges: SmallVec::new(),
            tick_interval: None,
            num_tasks: None,
            parallelism,
            slot_counts: vec![0; parallelism.max(1) as usize],
            runner: NodeRunner::Processor(runner),
        })
    }

    fn register_sink(
        &mut self,
        id: &str,
        component: Box<dyn ProcessorComponent>,
        parallelism: u32,
    ) -> Result<&mut dyn NodeHandle> {
        let mut runner = ProcessorRunner::new(
            id,
            component,
            self.resolver(ComponentKind::Sink, id),
            None,
            self.ack_tx.clone(),
        );
        if let Some(identity) = &self.worker {
            runner = runner.with_worker_identity(identity.clone());
        }
        self.insert(LocalNode {
            id: id.to_string(),
            edges: SmallVec::new(),
            tick_interval: None,
            num_tasks: None,
            parallelism,
            slot_counts: vec![0; parallelism.max(1) as usize],
            runner: NodeRunner::Processor(runner),
        })
    }
}
