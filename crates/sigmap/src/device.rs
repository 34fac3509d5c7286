//! The device: the top-level handle an application holds. Owns the admin
//! and data transports, the local signal/instance tables, and the graph
//! cache of everything else seen on the bus (spec §4.A "Device").

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::admin_proto::{AdminMessage, DeviceFsm, DeviceState, MapFsm};
use crate::alloc::Allocator;
use crate::config::{DeviceConfig, GraphConfig, MapConfig};
use crate::error::{Error, Result};
use crate::expr::compiler::{compile, InputSchema, SourceSchema};
use crate::graph::{DeviceEntry, DeviceId, DeviceStatus, Graph, MapEntry, MapId, MapStatus, SignalEntry, SignalId};
use crate::net::{AdminBus, DataTransport, PollEvents, Queue, QueueHandle};
use crate::signal::instance::{InstanceOwner, InstanceTable};
use crate::signal::runtime::MapPipeline;
use crate::signal::SignalDecl;
use crate::time::TimeTag;

const ORDINAL_RANGE: (u32, u32) = (1, 9_999);
const PORT_RANGE: (u32, u32) = (9_000, 9_999);

struct LocalSignal {
    decl: SignalDecl,
    instances: InstanceTable,
}

/// A live device: the unit of identity on the admin bus.
pub struct Device {
    name: String,
    config: DeviceConfig,
    fsm: DeviceFsm,
    ordinal: Allocator,
    port: Allocator,
    admin: AdminBus,
    data: DataTransport,
    graph: Graph,
    self_id: DeviceId,
    signals: HashMap<String, LocalSignal>,
    maps: HashMap<MapId, (MapPipeline, MapFsm)>,
    /// Resolves a wire identity (`name`, `ordinal`) to the graph's local id.
    peers: HashMap<(String, u32), DeviceId>,
    queue: Queue,
    next_map_id: MapId,
}

impl Device {
    /// Construct and bind a device: joins the admin bus, binds the data
    /// socket, and starts the ordinal/port allocation race.
    pub async fn new(name: impl Into<String>, config: DeviceConfig) -> Result<Self> {
        let name = name.into();
        let admin = AdminBus::bind(config.admin_addr, config.admin_port, config.interface.as_deref()).await?;
        let data = DataTransport::bind(config.interface.as_deref()).await?;

        let ordinal = Allocator::new("ordinal", ORDINAL_RANGE.0, ORDINAL_RANGE.1);
        let port = match config.port {
            Some(preferred) => Allocator::new("port", preferred as u32, preferred as u32),
            None => Allocator::new("port", PORT_RANGE.0, PORT_RANGE.1),
        };

        let mut fsm = DeviceFsm::new();
        fsm.start_announcing();

        let mut graph = Graph::new(GraphConfig::new());
        let self_id = graph.allocate_id();

        trace!(device = %name, "device constructed, announcing ordinal/port");

        Ok(Self {
            name,
            config,
            fsm,
            ordinal,
            port,
            admin,
            data,
            graph,
            self_id,
            signals: HashMap::new(),
            maps: HashMap::new(),
            peers: HashMap::new(),
            queue: Queue::new(),
            next_map_id: 1,
        })
    }

    /// This device's name, as advertised on the bus.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DeviceState {
        self.fsm.state()
    }

    /// True once ordinal and port have both locked and the device is
    /// advertising a stable identity.
    pub fn is_ready(&self) -> bool {
        self.fsm.state() == DeviceState::Ready
    }

    /// This device's allocated ordinal, final only once [`Device::is_ready`].
    pub fn ordinal(&self) -> u32 {
        self.ordinal.value()
    }

    /// Declare a new signal owned by this device.
    pub fn add_signal(&mut self, decl: SignalDecl) -> Result<()> {
        if self.signals.contains_key(&decl.name) {
            return Err(Error::InvalidArgument(format!("signal {:?} already exists", decl.name)));
        }
        let id = self.graph.allocate_id();
        self.graph.upsert_signal(SignalEntry {
            id,
            device: self.self_id,
            name: decl.name.clone(),
            direction: decl.direction,
            value_type: decl.value_type,
            length: decl.length,
            last_heard: std::time::Instant::now(),
        });
        let instances = InstanceTable::new(decl.capacity(), crate::signal::instance::StealMode::None);
        self.signals.insert(decl.name.clone(), LocalSignal { decl, instances });
        Ok(())
    }

    /// Withdraw a previously declared signal, tearing down any map
    /// attached to it.
    pub fn remove_signal(&mut self, name: &str) {
        if self.signals.remove(name).is_none() {
            return;
        }
        let signal_id = self.graph.signals().find(|s| s.name == name && s.device == self.self_id).map(|s| s.id);
        let gone: Vec<MapId> = self
            .graph
            .maps()
            .filter(|m| self.signal_path(m.dst) == Some(name.to_string()) || m.sources.iter().any(|s| self.signal_path(*s) == Some(name.to_string())))
            .map(|m| m.id)
            .collect();
        for id in gone {
            self.maps.remove(&id);
            self.graph.remove_map(id);
        }
        if let Some(id) = signal_id {
            self.graph.remove_signal(id);
        }
    }

    fn signal_path(&self, id: SignalId) -> Option<String> {
        self.graph.signal(id).map(|s| s.name.clone())
    }

    /// Push a new value for a local signal's implicit (non-instanced) slot,
    /// evaluating and forwarding through any attached maps.
    pub async fn update_signal(&mut self, name: &str, value: Vec<f64>) -> Result<()> {
        self.update_instance(name, 0, value).await
    }

    /// Push a new value for one instance of a local signal.
    pub async fn update_instance(&mut self, name: &str, instance: u64, value: Vec<f64>) -> Result<()> {
        let value_type = self
            .signals
            .get(name)
            .map(|s| s.decl.value_type)
            .ok_or_else(|| Error::NotFound(format!("signal {name:?}")))?;
        let sample = crate::signal::Sample::new(value_type, value, TimeTag::now());
        if let Some(sig) = self.signals.get_mut(name) {
            sig.instances.update(instance, InstanceOwner::Local, sample.clone());
        }

        let source_id = self
            .graph
            .signals()
            .find(|s| s.name == name && s.device == self.self_id)
            .map(|s| s.id);
        let Some(source_id) = source_id else { return Ok(()) };

        let affected: Vec<(MapId, usize)> = self
            .maps
            .keys()
            .filter_map(|id| {
                let entry = self.graph.map(*id)?;
                let idx = entry.sources.iter().position(|s| *s == source_id)?;
                Some((*id, idx))
            })
            .collect();

        for (map_id, idx) in affected {
            self.tick_map(map_id, idx, instance, sample.clone()).await?;
        }
        Ok(())
    }

    async fn tick_map(&mut self, map_id: MapId, source_idx: usize, instance: u64, sample: crate::signal::Sample) -> Result<()> {
        let Some((pipeline, fsm)) = self.maps.get_mut(&map_id) else {
            return Ok(());
        };
        if !fsm.is_live() {
            return Ok(());
        }
        let now = TimeTag::now();
        let outcome = pipeline.on_source_update(source_idx, instance, sample, now);
        let Some(outcome) = outcome else { return Ok(()) };
        match outcome {
            crate::error::EvalOutcome::Produced(out_sample) => {
                fsm.on_data();
                self.forward_map_output(map_id, out_sample).await?;
            }
            crate::error::EvalOutcome::Dropped(reason) => {
                trace!(map = map_id, ?reason, "map tick produced no output");
            }
        }
        Ok(())
    }

    async fn forward_map_output(&mut self, map_id: MapId, sample: crate::signal::Sample) -> Result<()> {
        let Some(entry) = self.graph.map(map_id) else { return Ok(()) };
        let Some(dst) = self.graph.signal(entry.dst) else { return Ok(()) };

        if dst.device == self.self_id {
            // Destination lives on this same device: deliver directly
            // rather than round-tripping through the network.
            let dst_name = dst.name.clone();
            if let Some(sig) = self.signals.get_mut(dst_name.as_str()) {
                sig.instances.update(0, InstanceOwner::Local, sample);
            }
            return Ok(());
        }

        let Some(dst_device) = self.graph.device(dst.device) else { return Ok(()) };
        let dest = SocketAddr::new(dst_device.host, dst_device.port);
        let mut msg = crate::codec::Message::new(format!("/{}", dst.name));
        for arg in sample.to_wire_args() {
            msg = msg.arg(arg);
        }
        let protocol = entry.protocol;
        self.data.send(dest, protocol, &msg).await
    }

    /// Service both transports once: blocks up to `block_ms` on socket I/O,
    /// then drains whatever else is immediately queued, ticks allocation
    /// timers, and expires stale graph entries. Returns how much work was
    /// done, per spec §6 "poll".
    pub async fn poll(&mut self, block_ms: u64) -> Result<PollEvents> {
        let mut events = PollEvents::default();

        if !self.ordinal.is_locked() && self.ordinal.tick() {
            debug!(device = %self.name, ordinal = self.ordinal.value(), "ordinal locked");
        }
        if !self.port.is_locked() && self.port.tick() {
            debug!(device = %self.name, port = self.port.value(), "port locked");
        }
        if self.ordinal.is_locked() && self.port.is_locked() && self.fsm.state() == DeviceState::Announcing {
            self.fsm.allocators_locked();
            self.announce().await?;
        }

        let budget = Duration::from_millis(block_ms);
        let (mut admin_bundles, mut data_bundles) = tokio::select! {
            b = self.admin.recv_with_budget(budget) => (b, Vec::new()),
            b = self.data.recv_with_budget(budget) => (Vec::new(), b),
        };
        admin_bundles.extend(self.admin.try_recv_all().await);
        data_bundles.extend(self.data.try_recv_all().await);

        for bundle in &admin_bundles {
            for msg in &bundle.messages {
                events.admin += 1;
                if let Err(e) = self.handle_admin_message(msg) {
                    warn!(error = %e, address = %msg.address, "dropping admin message");
                }
            }
        }

        for bundle in &data_bundles {
            for msg in &bundle.messages {
                events.data += 1;
                self.handle_data_message(msg);
            }
        }

        events.expired = self.graph.expire_stale();
        Ok(events)
    }

    async fn announce(&mut self) -> Result<()> {
        let msg = AdminMessage::DeviceAnnounce {
            name: self.name.clone(),
            ordinal: self.ordinal.value(),
            port: self.port.value() as u16,
            version: 0,
        };
        self.admin.send_message(&msg.to_message()).await?;
        Ok(())
    }

    fn handle_admin_message(&mut self, msg: &crate::codec::Message) -> Result<()> {
        let parsed = AdminMessage::from_message(msg)?;
        match parsed {
            AdminMessage::Who => {
                trace!(device = %self.name, "/who received, deferring reply to next poll announce");
            }
            AdminMessage::DeviceAnnounce {
                name,
                ordinal,
                port,
                version,
            } => {
                if name == self.name && ordinal == self.ordinal.value() {
                    // Someone else is using the candidate we're probing.
                    if let Err(e) = self.ordinal.collide() {
                        warn!(error = %e, device = %self.name, "ordinal allocation exhausted retries, restarting");
                        self.ordinal.restart();
                    }
                    return Ok(());
                }
                let id = self.graph.allocate_id();
                let id = *self.peers.get(&(name.clone(), ordinal)).unwrap_or(&id);
                self.graph.upsert_device(DeviceEntry {
                    id,
                    name: name.clone(),
                    ordinal,
                    host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                    port,
                    version,
                    last_heard: std::time::Instant::now(),
                    status: DeviceStatus::Ready,
                });
                self.peers.insert((name, ordinal), id);
            }
            AdminMessage::SignalAnnounce {
                device,
                ordinal,
                name,
                direction,
                value_type,
                length,
                ..
            } => {
                let Some(&device_id) = self.peers.get(&(device, ordinal)) else {
                    return Ok(());
                };
                let id = self.graph.allocate_id();
                self.graph.upsert_signal(SignalEntry {
                    id,
                    device: device_id,
                    name,
                    direction,
                    value_type,
                    length,
                    last_heard: std::time::Instant::now(),
                });
            }
            AdminMessage::SignalRemoved { device, ordinal, name } => {
                if let Some(&device_id) = self.peers.get(&(device, ordinal)) {
                    if let Some(id) = self.graph.signals().find(|s| s.device == device_id && s.name == name).map(|s| s.id) {
                        self.graph.remove_signal(id);
                    }
                }
            }
            AdminMessage::MapPropose {
                id,
                sources,
                dst,
                expression,
                protocol,
            } => {
                // The wire `MapPropose` message predates mute/instance
                // config and carries neither; remote proposals default to
                // unmuted with instance propagation enabled.
                self.accept_map_proposal(id, sources, dst, expression, protocol, false, true)?;
            }
            AdminMessage::Mapped { id } => {
                if let Some((_, fsm)) = self.maps.get_mut(&id) {
                    fsm.on_ack();
                }
            }
            AdminMessage::MapModify { id, expression } => {
                debug!(map = id, expression = %expression, "map modify received, unimplemented: requires recompile");
            }
            AdminMessage::Unmap { id } | AdminMessage::Unmapped { id } => {
                self.maps.remove(&id);
                self.graph.remove_map(id);
            }
            AdminMessage::Subscribe { .. } => {
                trace!(device = %self.name, "subscribe request noted");
            }
            AdminMessage::Sync { device, ordinal, .. } => {
                if let Some(&device_id) = self.peers.get(&(device, ordinal)) {
                    if let Some(entry) = self.graph.device(device_id).cloned() {
                        self.graph.upsert_device(entry);
                    }
                }
            }
        }
        Ok(())
    }

    fn handle_data_message(&mut self, msg: &crate::codec::Message) {
        let Some(name) = msg.address.strip_prefix('/') else { return };
        let Some(sig) = self.signals.get_mut(name) else { return };
        let sample = crate::signal::Sample::from_wire_args(sig.decl.value_type, &msg.args, TimeTag::now());
        sig.instances.update(0, InstanceOwner::Remote("peer".into()), sample);
    }

    fn accept_map_proposal(
        &mut self,
        id: MapId,
        sources: Vec<String>,
        dst: String,
        expression: String,
        protocol: u8,
        muted: bool,
        use_instances: bool,
    ) -> Result<MapId> {
        let Some(dst_local) = self.signals.get(dst.as_str()) else {
            return Ok(id);
        };
        let mut source_schemas = Vec::with_capacity(sources.len());
        let mut source_ids = Vec::with_capacity(sources.len());
        for path in &sources {
            let Some(local) = self.signals.get(path.as_str()) else {
                return Err(Error::NotFound(format!("source signal {path:?}")));
            };
            source_schemas.push(SourceSchema {
                value_type: local.decl.value_type,
                length: local.decl.length,
            });
            let sig_id = self
                .graph
                .signals()
                .find(|s| s.name == *path && s.device == self.self_id)
                .map(|s| s.id)
                .unwrap_or_else(|| self.graph.allocate_id());
            source_ids.push(sig_id);
        }
        let schema = InputSchema {
            sources: source_schemas,
            output: SourceSchema {
                value_type: dst_local.decl.value_type,
                length: dst_local.decl.length,
            },
        };
        let program = compile(&expression, self.config.dsl, &schema)?;
        let dst_id = self
            .graph
            .signals()
            .find(|s| s.name == dst && s.device == self.self_id)
            .map(|s| s.id)
            .unwrap_or_else(|| self.graph.allocate_id());

        let kept_id = self.graph.upsert_map(MapEntry {
            id,
            sources: source_ids,
            dst: dst_id,
            expression,
            protocol,
            status: MapStatus::Staged,
            scope: Vec::new(),
            last_heard: std::time::Instant::now(),
        });
        if kept_id != id {
            // A smaller-id equivalent map already exists; this proposal
            // lost the tie-break and contributes no new pipeline.
            return Ok(kept_id);
        }
        let required = sources.len() as u32 + 1;
        self.maps.insert(
            id,
            (MapPipeline::with_options(program, muted, use_instances), MapFsm::new(required)),
        );
        Ok(id)
    }

    /// Propose a new map from `sources` to `dst` (local signal names or
    /// `device/signal` wire paths for remote destinations). Returns the
    /// id that actually won the proposal, which may differ from the id
    /// this call would have assigned if an equivalent map already exists
    /// and wins the tie-break (spec §4.E "Tie-breaks"). Shorthand for
    /// [`Device::map_with_config`] with instance propagation enabled.
    pub fn map(&mut self, sources: &[&str], dst: &str, expression: &str, protocol: u8) -> Result<MapId> {
        let config = MapConfig::new(expression).protocol(protocol).use_instances(true);
        self.map_with_config(sources, dst, &config)
    }

    /// Propose a new map using full map configuration options (spec §6
    /// `muted`/`use_instances`/etc.), rather than [`Device::map`]'s
    /// shorthand.
    pub fn map_with_config(&mut self, sources: &[&str], dst: &str, config: &MapConfig) -> Result<MapId> {
        let id = self.next_map_id;
        self.next_map_id += 1;
        self.accept_map_proposal(
            id,
            sources.iter().map(|s| s.to_string()).collect(),
            dst.to_string(),
            config.expression.clone(),
            config.protocol,
            config.muted,
            config.use_instances,
        )
    }

    /// Open a bundle window for grouping several signal updates under one
    /// timestamp, mirroring libmapper's start/send-queue pair.
    pub fn begin_queue(&mut self, t: TimeTag) -> QueueHandle {
        self.queue.begin(t)
    }

    /// Append a raw message to an open queue window.
    pub fn queue_value(&mut self, handle: QueueHandle, msg: crate::codec::Message) {
        self.queue.set_value(handle, msg);
    }

    /// Flush and send a queue window's accumulated bundle.
    pub async fn send_queue(&mut self, handle: QueueHandle) -> Result<()> {
        if let Some(bundle) = self.queue.end(handle) {
            self.admin.send_bundle(&bundle).await?;
        }
        Ok(())
    }

    /// Tear the device down: mark it freed. Callers should stop polling
    /// afterward; no further admin traffic is sent.
    pub fn free(&mut self) {
        self.fsm.free();
    }

    /// Liveness timeout applied to remote graph entries.
    pub fn set_liveness_timeout(&mut self, timeout: Duration) {
        self.graph.set_liveness_timeout(timeout);
    }

    /// Read-only access to the graph cache, for [`crate::map::MapHandle`]
    /// accessors.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Current negotiation state of a map this device knows about.
    pub fn map_state(&self, id: MapId) -> Option<crate::admin_proto::MapState> {
        self.maps.get(&id).map(|(_, fsm)| fsm.state())
    }

    /// Diagnostic drop count for a map's pipeline.
    pub fn map_drop_count(&self, id: MapId) -> Option<u64> {
        self.maps.get(&id).map(|(pipeline, _)| pipeline.drop_count())
    }

    /// Current value of a local signal's implicit (instance 0) slot.
    pub fn signal_value(&self, name: &str) -> Option<crate::signal::Sample> {
        self.signals.get(name)?.instances.get(0)?.value.clone()
    }

    /// The graph this device maintains, for `graph.get_list`/`list.filter`
    /// queries (spec §4.D/§6).
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Tear a map down: notify peers and drop local state.
    pub async fn unmap(&mut self, id: MapId) -> Result<()> {
        self.maps.remove(&id);
        self.graph.remove_map(id);
        self.admin.send_message(&AdminMessage::Unmap { id }.to_message()).await
    }
}
