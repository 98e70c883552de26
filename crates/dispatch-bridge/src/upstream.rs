//! The single active upstream authority.
//!
//! An upstream is either the in-process Dispatch Simulator or a remote
//! authority speaking the line protocol over TCP. At most one is open at a
//! time; opening another closes the previous one first. Everything an
//! upstream emits goes to the [`Hub`]; commands from observers go the
//! other way through [`UpstreamSlot::forward`].

use std::sync::Arc;
use std::time::Duration;

use dispatch_core::config::SourceKind;
use dispatch_core::runner::{COMMAND_QUEUE_CAPACITY, CommandRequest, RunnerSettings};
use dispatch_core::{
    AuthorityCallback, AuthorityHandle, AuthorityStatus, CommandOutcome, CommandRejected,
    CommandReply, SimulationConfig, Simulator, TickError, TickOutcome, spawn_authority,
};
use dispatch_proto::{DecodeError, FramedReader, FramedWriter, Message, ProtocolError, decode_line};
use dispatch_types::{Command, HistoryItem, InfoMessage, Snapshot};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, MutexGuard, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::RouteError;
use crate::hub::Hub;

/// Name of the built-in simulator source.
pub const SIMULATOR_SOURCE: &str = "sim";

/// Prefix for ad-hoc remote sources, e.g. `tcp://10.0.0.5:9000`.
pub const TCP_SCHEME: &str = "tcp://";

/// One entry of `GET /ports`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceInfo {
    /// Name accepted by `POST /open`.
    pub name: String,
    /// `simulator` or `tcp`.
    pub kind: &'static str,
    /// Remote address for TCP sources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addr: Option<String>,
    /// Whether this source is the open one.
    pub active: bool,
}

/// How a forwarded command ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandDelivery {
    /// The local authority applied it.
    Applied(CommandOutcome),
    /// The local authority refused it; the world is unchanged.
    Rejected(CommandRejected),
    /// Written to a remote authority, which does not answer per command.
    Forwarded,
}

#[derive(Debug)]
enum Target {
    Simulator,
    Tcp(String),
}

#[derive(Debug, Clone)]
enum Link {
    Simulator(mpsc::Sender<CommandRequest>),
    Tcp(mpsc::Sender<Command>),
}

#[derive(Debug)]
enum Connection {
    Simulator(AuthorityHandle),
    Tcp(JoinHandle<()>),
}

#[derive(Debug)]
struct Active {
    name: String,
    link: Link,
    connection: Connection,
}

impl Active {
    fn is_finished(&self) -> bool {
        match &self.connection {
            Connection::Simulator(handle) => handle.is_finished(),
            Connection::Tcp(task) => task.is_finished(),
        }
    }
}

/// Holder of the active upstream.
#[derive(Debug)]
pub struct UpstreamSlot {
    hub: Arc<Hub>,
    config: SimulationConfig,
    active: Mutex<Option<Active>>,
}

impl UpstreamSlot {
    /// An empty slot publishing into `hub`.
    pub fn new(hub: Arc<Hub>, config: SimulationConfig) -> Self {
        Self {
            hub,
            config,
            active: Mutex::new(None),
        }
    }

    /// Lock the slot, first clearing an upstream whose connection has ended.
    async fn live(&self) -> MutexGuard<'_, Option<Active>> {
        let mut active = self.active.lock().await;
        if let Some(ended) = active.take_if(|active| active.is_finished()) {
            info!(upstream = %ended.name, "Upstream connection ended");
            self.shut(ended).await;
        }
        active
    }

    fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.config.bridge.command_timeout_ms.max(1))
    }

    /// Every source that can be opened. The simulator comes first.
    pub async fn sources(&self) -> Vec<SourceInfo> {
        let active = self.active_name().await;
        let is_active = |name: &str| active.as_deref() == Some(name);

        let mut sources = vec![SourceInfo {
            name: SIMULATOR_SOURCE.to_owned(),
            kind: "simulator",
            addr: None,
            active: is_active(SIMULATOR_SOURCE),
        }];
        for source in &self.config.bridge.sources {
            if source.name == SIMULATOR_SOURCE {
                continue;
            }
            sources.push(SourceInfo {
                name: source.name.clone(),
                kind: match source.kind {
                    SourceKind::Simulator => "simulator",
                    SourceKind::Tcp => "tcp",
                },
                addr: source.addr.clone(),
                active: is_active(&source.name),
            });
        }
        if let Some(name) = active {
            if !sources.iter().any(|source| source.name == name) {
                sources.push(SourceInfo {
                    addr: name.strip_prefix(TCP_SCHEME).map(str::to_owned),
                    name,
                    kind: "tcp",
                    active: true,
                });
            }
        }
        sources
    }

    /// Name of the open source.
    pub async fn active_name(&self) -> Option<String> {
        self.live().await.as_ref().map(|active| active.name.clone())
    }

    /// Status of the local authority, when the simulator is open.
    pub async fn authority_status(&self) -> Option<AuthorityStatus> {
        let active = self.live().await;
        match active.as_ref().map(|active| &active.connection) {
            Some(Connection::Simulator(handle)) => Some(handle.operator().status().await),
            Some(Connection::Tcp(_)) | None => None,
        }
    }

    fn resolve(&self, path: &str) -> Result<Target, RouteError> {
        if path == SIMULATOR_SOURCE {
            return Ok(Target::Simulator);
        }
        if let Some(addr) = path.strip_prefix(TCP_SCHEME) {
            return Ok(Target::Tcp(addr.to_owned()));
        }
        let source = self
            .config
            .bridge
            .sources
            .iter()
            .find(|source| source.name == path)
            .ok_or_else(|| RouteError::UnknownSource {
                name: path.to_owned(),
            })?;
        match (source.kind, &source.addr) {
            (SourceKind::Simulator, _) => Ok(Target::Simulator),
            (SourceKind::Tcp, Some(addr)) => Ok(Target::Tcp(addr.clone())),
            (SourceKind::Tcp, None) => Err(RouteError::unavailable(format!(
                "source {path} has no address"
            ))),
        }
    }

    /// Open `path`, closing whatever was open before.
    ///
    /// `path` is `sim`, a configured source name, or `tcp://host:port`.
    pub async fn open(&self, path: &str) -> Result<String, RouteError> {
        let target = self.resolve(path)?;
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            self.shut(previous).await;
        }

        let opened = match target {
            Target::Simulator => self.start_simulator(path)?,
            Target::Tcp(addr) => self.connect_tcp(path, &addr).await?,
        };
        info!(upstream = %opened.name, "Upstream opened");
        self.hub.record(format!("upstream {} opened", opened.name));
        let name = opened.name.clone();
        *active = Some(opened);
        Ok(name)
    }

    /// Close the open source, if any. Returns its name.
    pub async fn close(&self) -> Option<String> {
        let previous = self.live().await.take()?;
        let name = previous.name.clone();
        self.shut(previous).await;
        Some(name)
    }

    async fn shut(&self, active: Active) {
        let Active {
            name, connection, ..
        } = active;
        match connection {
            Connection::Simulator(handle) => {
                if let Some(summary) = handle.shutdown().await {
                    info!(
                        upstream = %name,
                        total_ticks = summary.total_ticks,
                        commands_applied = summary.commands_applied,
                        commands_rejected = summary.commands_rejected,
                        "Simulator stopped"
                    );
                }
            }
            Connection::Tcp(task) => task.abort(),
        }
        self.hub.record(format!("upstream {name} closed"));
    }

    fn start_simulator(&self, name: &str) -> Result<Active, RouteError> {
        let sim = Simulator::new(&self.config)
            .map_err(|err| RouteError::unavailable(format!("simulator: {err}")))?;
        self.hub.publish(&Message::state(sim.snapshot()));

        let settings = RunnerSettings {
            tick_interval_ms: self.config.world.tick_interval_ms,
            stagger_ms: self.config.stress.stagger_ms,
        };
        let handle = spawn_authority(
            sim,
            settings,
            self.config.world.max_ticks,
            HubSink {
                hub: Arc::clone(&self.hub),
            },
        );
        Ok(Active {
            name: name.to_owned(),
            link: Link::Simulator(handle.sender()),
            connection: Connection::Simulator(handle),
        })
    }

    async fn connect_tcp(&self, name: &str, addr: &str) -> Result<Active, RouteError> {
        let stream = tokio::time::timeout(self.command_timeout(), TcpStream::connect(addr))
            .await
            .map_err(|_elapsed| RouteError::unavailable(format!("connect to {addr} timed out")))?
            .map_err(|err| RouteError::unavailable(format!("connect to {addr}: {err}")))?;

        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let task = tokio::spawn(pump_remote(
            stream,
            name.to_owned(),
            Arc::clone(&self.hub),
            rx,
            self.config.bridge.max_frame_bytes,
        ));
        Ok(Active {
            name: name.to_owned(),
            link: Link::Tcp(tx),
            connection: Connection::Tcp(task),
        })
    }

    /// Hand `command` to the open authority.
    ///
    /// With the local simulator this waits (bounded) for the outcome. A
    /// remote authority only confirms that the line was queued for writing.
    /// Every result is also written to the bridge history, and the command
    /// stays pending in the hub until the authority's next snapshot.
    pub async fn forward(&self, origin: &str, command: Command) -> Result<CommandDelivery, RouteError> {
        let name = command.name();
        let link = self
            .live()
            .await
            .as_ref()
            .map(|active| active.link.clone());
        if link.is_some() {
            self.hub.stage(command.clone());
        }
        let result = match link {
            None => Err(RouteError::unavailable("no upstream is open")),
            Some(Link::Simulator(tx)) => self.submit(&tx, origin, command).await,
            Some(Link::Tcp(tx)) => tx
                .send(command)
                .await
                .map(|()| CommandDelivery::Forwarded)
                .map_err(|_closed| RouteError::unavailable("upstream connection closed")),
        };

        let summary = match &result {
            Ok(CommandDelivery::Applied(outcome)) => {
                info!(origin, cmd = name, %outcome, "Command applied");
                format!("{origin}: {name} ok ({outcome})")
            }
            Ok(CommandDelivery::Rejected(reason)) => {
                info!(origin, cmd = name, %reason, "Command rejected");
                format!("{origin}: {name} rejected ({reason})")
            }
            Ok(CommandDelivery::Forwarded) => {
                debug!(origin, cmd = name, "Command forwarded");
                format!("{origin}: {name} forwarded")
            }
            Err(err) => {
                warn!(origin, cmd = name, error = %err, "Command not delivered");
                format!("{origin}: {name} failed ({err})")
            }
        };
        self.hub.record(summary);
        result
    }

    async fn submit(
        &self,
        tx: &mpsc::Sender<CommandRequest>,
        origin: &str,
        command: Command,
    ) -> Result<CommandDelivery, RouteError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(CommandRequest {
            command,
            origin: origin.to_owned(),
            reply: Some(reply_tx),
        })
        .await
        .map_err(|_closed| RouteError::unavailable("authority is not running"))?;

        let timeout = self.command_timeout();
        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(Ok(outcome))) => Ok(CommandDelivery::Applied(outcome)),
            Ok(Ok(Err(rejected))) => Ok(CommandDelivery::Rejected(rejected)),
            Ok(Err(_dropped)) => Err(RouteError::unavailable(
                "authority stopped before answering",
            )),
            Err(_elapsed) => Err(RouteError::unavailable(format!(
                "authority did not answer within {} ms",
                timeout.as_millis()
            ))),
        }
    }
}

/// Publishes everything the local simulator produces.
struct HubSink {
    hub: Arc<Hub>,
}

impl AuthorityCallback for HubSink {
    fn on_tick(&mut self, outcome: &TickOutcome) {
        for event in &outcome.events {
            self.hub.publish(&Message::Event(event.clone()));
        }
        if !outcome.notes.is_empty() {
            self.hub.publish(&Message::history(outcome.notes.clone()));
        }
        self.hub.publish(&Message::state(outcome.snapshot.clone()));
    }

    fn on_command(&mut self, _origin: &str, _command: &Command, reply: &CommandReply, snapshot: &Snapshot) {
        if reply.is_ok() {
            self.hub.publish(&Message::state(snapshot.clone()));
        }
    }

    fn on_tick_failed(&mut self, error: &TickError, t: u64) {
        let msg = format!("simulator paused after a failed tick: {error}");
        self.hub.publish(&Message::Info(InfoMessage::error(msg.clone())));
        self.hub.publish(&Message::history(vec![HistoryItem::new(t, msg)]));
    }
}

/// Relay a remote authority into the hub and write commands back to it.
async fn pump_remote(
    stream: TcpStream,
    name: String,
    hub: Arc<Hub>,
    mut commands: mpsc::Receiver<Command>,
    max_frame_bytes: usize,
) {
    let (read, write) = stream.into_split();
    let mut reader = FramedReader::new(read, max_frame_bytes);
    let mut writer = FramedWriter::new(write);

    let reason = loop {
        tokio::select! {
            line = reader.next_line() => match line {
                Ok(Some(Ok(line))) => relay_line(&hub, &name, &line),
                Ok(Some(Err(err))) => {
                    warn!(upstream = %name, error = %err, "Upstream frame dropped");
                    if let Some(raw) = err.raw() {
                        hub.publish(&Message::raw(raw));
                    }
                }
                Ok(None) => break String::from("end of stream"),
                Err(err) => break err.to_string(),
            },
            command = commands.recv() => {
                let Some(command) = command else {
                    debug!(upstream = %name, "Upstream link released");
                    return;
                };
                if let Err(err) = writer.send(&Message::Cmd(command)).await {
                    break err.to_string();
                }
            }
        }
    };

    warn!(upstream = %name, %reason, "Upstream disconnected");
    hub.publish(&Message::Info(InfoMessage::warn(format!(
        "upstream {name} disconnected: {reason}"
    ))));
}

fn relay_line(hub: &Hub, name: &str, line: &str) {
    match decode_line(line) {
        Ok(Message::Cmd(command)) => {
            let err = ProtocolError::UnexpectedKind {
                kind: "cmd",
                from: "upstream",
            };
            warn!(upstream = %name, cmd = command.name(), error = %err, "Message ignored");
        }
        Ok(message) => {
            hub.publish(&message);
        }
        Err(DecodeError::Framing(err)) => {
            debug!(upstream = %name, error = %err, "Relaying unstructured line");
            hub.publish(&Message::raw(line));
        }
        Err(DecodeError::Protocol(err)) => {
            warn!(upstream = %name, error = %err, "Message ignored");
        }
    }
}
