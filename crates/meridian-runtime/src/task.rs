//! Task reactor
//!
//! Every controller runs as one task: a single loop that owns all of
//! the task's ports, timers, and pending requests, and feeds a
//! synchronous handler. Channel I/O happens in per-port driver tasks
//! that forward into the reactor mailbox, so the handler never sees
//! concurrency.
//!
//! Dial ports redial on their own: a dropped connection is retried
//! after a uniformly jittered delay until the port is closed. The
//! handler only observes `Connected` and `Disconnected`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use meridian_core::{
    Direction, Event, MeridianError, PortId, PortKind, PortState, Signal, TaskId, TimerId,
};
use meridian_transport::{Channel, ChannelAddr, ChannelFactory, ChannelListener};

use crate::config::TaskConfig;
use crate::pending::PendingTable;
use crate::port::{PortEntry, PortOrigin};
use crate::timer::{TimerPurpose, TimerTable};

/// What the reactor reports to a handler
#[derive(Clone, Debug, PartialEq)]
pub enum TaskEvent {
    /// Delivered once, before anything else
    Started,
    /// A dial port reached its peer
    Connected { port: PortId, name: String },
    /// A port lost its peer; dial ports will redial on their own
    Disconnected { port: PortId, name: String },
    /// A listener produced a new connected port
    Accepted {
        listener: PortId,
        port: PortId,
        peer: String,
    },
    /// An event arrived on a port
    Received { port: PortId, event: Event },
    /// A request went unanswered past the configured deadline, or its
    /// port dropped while the request was in flight
    RequestTimedOut {
        port: PortId,
        seq_nr: u16,
        signal: Signal,
    },
    /// A handler timer fired
    Timer { id: TimerId, token: u64 },
}

/// Handler verdict after each event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// A task's behavior; driven synchronously by the reactor
pub trait TaskHandler: Send + 'static {
    fn handle(&mut self, ctx: &mut TaskContext<'_>, event: TaskEvent) -> Flow;
}

/// Reactor counters
#[derive(Clone, Debug, Default)]
pub struct TaskStats {
    pub events_in: u64,
    pub events_out: u64,
    pub accepts: u64,
    pub disconnects: u64,
    pub stale_replies: u64,
    pub timeouts: u64,
    pub dropped_sends: u64,
}

/// Internal mailbox traffic
pub(crate) enum TaskMessage {
    ChannelUp {
        port: PortId,
    },
    ChannelDown {
        port: PortId,
    },
    Inbound {
        port: PortId,
        event: Event,
    },
    Accepted {
        listener: PortId,
        channel: Box<dyn Channel>,
        peer: ChannelAddr,
    },
    TimerFired {
        id: TimerId,
    },
}

pub(crate) struct TaskInner {
    pub(crate) task_id: TaskId,
    pub(crate) name: String,
    pub(crate) config: TaskConfig,
    pub(crate) mailbox_tx: mpsc::Sender<TaskMessage>,
    pub(crate) cancel: CancellationToken,
    pub(crate) ports: BTreeMap<PortId, PortEntry>,
    pub(crate) next_port: u32,
    pub(crate) timers: TimerTable,
    pub(crate) stats: TaskStats,
}

impl TaskInner {
    pub(crate) fn alloc_port_id(&mut self) -> PortId {
        self.next_port += 1;
        PortId::new(self.next_port)
    }

    fn shutdown(&mut self) {
        // Port drivers and timers hold child tokens of the task token
        self.cancel.cancel();
        self.timers.cancel_all();
        self.ports.clear();
    }
}

/// Handler-facing access to the reactor while an event is processed
pub struct TaskContext<'a> {
    inner: &'a mut TaskInner,
}

impl<'a> TaskContext<'a> {
    pub fn task_id(&self) -> TaskId {
        self.inner.task_id
    }

    pub fn task_name(&self) -> &str {
        &self.inner.name
    }

    pub fn port_named(&self, name: &str) -> Option<PortId> {
        self.inner
            .ports
            .iter()
            .find(|(_, entry)| entry.name == name)
            .map(|(id, _)| *id)
    }

    pub fn port_name(&self, port: PortId) -> Option<&str> {
        self.inner.ports.get(&port).map(|entry| entry.name.as_str())
    }

    pub fn is_connected(&self, port: PortId) -> bool {
        self.inner
            .ports
            .get(&port)
            .map(|entry| entry.state.is_connected())
            .unwrap_or(false)
    }

    pub fn stats(&self) -> &TaskStats {
        &self.inner.stats
    }

    /// Send a fire-and-forget event; the sequence number is left as
    /// given (zero for plain notifications)
    pub fn send(&mut self, port: PortId, event: Event) {
        let Some(entry) = self.inner.ports.get_mut(&port) else {
            tracing::warn!("task {}: send on unknown port {}", self.inner.name, port);
            self.inner.stats.dropped_sends += 1;
            return;
        };
        assert!(
            entry.kind.may_send(event.signal.direction()),
            "{:?} port {} cannot send {:?}",
            entry.kind,
            entry.name,
            event.signal
        );
        assert_eq!(
            entry.protocol,
            event.signal.protocol(),
            "signal {:?} does not match protocol of port {}",
            event.signal,
            entry.name
        );
        if entry.state != PortState::Connected {
            tracing::debug!(
                "task {}: port {} not connected, {:?} dropped",
                self.inner.name,
                entry.name,
                event.signal
            );
            self.inner.stats.dropped_sends += 1;
            return;
        }
        let Some(out_tx) = &entry.out_tx else {
            panic!("send on listener port {}", entry.name);
        };
        match out_tx.try_send(event) {
            Ok(()) => self.inner.stats.events_out += 1,
            Err(_) => {
                self.inner.stats.dropped_sends += 1;
                tracing::warn!(
                    "task {}: send queue full on port {}, event dropped",
                    self.inner.name,
                    entry.name
                );
            }
        }
    }

    /// Send a request expecting a reply; returns the assigned sequence
    /// number, or `None` when the event could not be queued
    pub fn send_request(&mut self, port: PortId, mut event: Event) -> Option<u16> {
        let signal = event.signal;
        let Some(entry) = self.inner.ports.get_mut(&port) else {
            tracing::warn!(
                "task {}: send_request on unknown port {}",
                self.inner.name,
                port
            );
            self.inner.stats.dropped_sends += 1;
            return None;
        };
        assert!(
            entry.kind.may_send(signal.direction()),
            "{:?} port {} cannot send {:?}",
            entry.kind,
            entry.name,
            signal
        );
        assert_eq!(
            entry.protocol,
            signal.protocol(),
            "signal {:?} does not match protocol of port {}",
            signal,
            entry.name
        );
        if entry.state != PortState::Connected {
            tracing::debug!(
                "task {}: port {} not connected, {:?} request dropped",
                self.inner.name,
                entry.name,
                signal
            );
            self.inner.stats.dropped_sends += 1;
            return None;
        }
        let Some(out_tx) = entry.out_tx.clone() else {
            panic!("send_request on listener port {}", entry.name);
        };

        let seq = entry.alloc_seq();
        event.seq_nr = seq;
        match out_tx.try_send(event) {
            Ok(()) => {
                entry.pending.insert(seq, signal);
                self.inner.stats.events_out += 1;
                self.inner.timers.arm(
                    self.inner.config.request_timeout,
                    false,
                    TimerPurpose::RequestExpiry { port, seq_nr: seq },
                    self.inner.mailbox_tx.clone(),
                    &self.inner.cancel,
                );
                Some(seq)
            }
            Err(_) => {
                self.inner.stats.dropped_sends += 1;
                tracing::warn!(
                    "task {}: send queue full on port {}, request dropped",
                    self.inner.name,
                    entry.name
                );
                None
            }
        }
    }

    /// Answer a received request, echoing its sequence number
    pub fn reply(&mut self, port: PortId, request_seq: u16, mut event: Event) {
        event.seq_nr = request_seq;
        self.send(port, event);
    }

    pub fn set_timer(&mut self, after: Duration, token: u64) -> TimerId {
        self.inner.timers.arm(
            after,
            false,
            TimerPurpose::User { token },
            self.inner.mailbox_tx.clone(),
            &self.inner.cancel,
        )
    }

    pub fn set_periodic(&mut self, period: Duration, token: u64) -> TimerId {
        self.inner.timers.arm(
            period,
            true,
            TimerPurpose::User { token },
            self.inner.mailbox_tx.clone(),
            &self.inner.cancel,
        )
    }

    pub fn cancel_timer(&mut self, id: TimerId) {
        self.inner.timers.cancel(id);
    }
}

fn dispatch(inner: &mut TaskInner, handler: &mut dyn TaskHandler, event: TaskEvent) -> Flow {
    let mut ctx = TaskContext { inner };
    handler.handle(&mut ctx, event)
}

enum Verdict {
    Deliver,
    Stale,
    Drop,
}

fn on_message(inner: &mut TaskInner, handler: &mut dyn TaskHandler, message: TaskMessage) -> Flow {
    match message {
        TaskMessage::ChannelUp { port } => {
            let name = {
                let Some(entry) = inner.ports.get_mut(&port) else {
                    return Flow::Continue;
                };
                entry.state = PortState::Connected;
                entry.name.clone()
            };
            tracing::debug!("task {}: port {} connected", inner.name, name);
            dispatch(inner, handler, TaskEvent::Connected { port, name })
        }

        TaskMessage::ChannelDown { port } => {
            let (name, failed, accepted) = {
                let Some(entry) = inner.ports.get_mut(&port) else {
                    return Flow::Continue;
                };
                entry.state = PortState::Disconnected;
                (
                    entry.name.clone(),
                    entry.pending.drain(),
                    matches!(entry.origin, PortOrigin::Accepted { .. }),
                )
            };
            inner.stats.disconnects += 1;
            tracing::debug!("task {}: port {} disconnected", inner.name, name);

            // Outstanding requests cannot be answered anymore
            for request in failed {
                inner.stats.timeouts += 1;
                let event = TaskEvent::RequestTimedOut {
                    port,
                    seq_nr: request.seq_nr,
                    signal: request.signal,
                };
                if dispatch(inner, handler, event) == Flow::Stop {
                    return Flow::Stop;
                }
            }

            let flow = dispatch(inner, handler, TaskEvent::Disconnected { port, name });
            if accepted {
                // Accepted ports do not redial; the peer reconnects
                if let Some(entry) = inner.ports.remove(&port) {
                    entry.cancel.cancel();
                }
            }
            flow
        }

        TaskMessage::Inbound { port, event } => {
            inner.stats.events_in += 1;
            let verdict = {
                let Some(entry) = inner.ports.get_mut(&port) else {
                    return Flow::Continue;
                };
                if event.signal.protocol() != entry.protocol {
                    tracing::warn!(
                        "task {}: {} event on {} port {}, dropped",
                        inner.name,
                        event.signal.protocol(),
                        entry.protocol,
                        entry.name
                    );
                    Verdict::Drop
                } else if event.seq_nr != 0
                    && event.signal.direction() == Direction::Out
                    && entry.pending.complete(event.seq_nr).is_none()
                {
                    Verdict::Stale
                } else {
                    Verdict::Deliver
                }
            };
            match verdict {
                Verdict::Drop => Flow::Continue,
                Verdict::Stale => {
                    inner.stats.stale_replies += 1;
                    tracing::warn!(
                        "task {}: stale reply {:?} seq {} on port {}, dropped",
                        inner.name,
                        event.signal,
                        event.seq_nr,
                        port
                    );
                    Flow::Continue
                }
                Verdict::Deliver => dispatch(inner, handler, TaskEvent::Received { port, event }),
            }
        }

        TaskMessage::Accepted {
            listener,
            channel,
            peer,
        } => {
            let Some((listener_name, protocol)) = inner
                .ports
                .get(&listener)
                .map(|entry| (entry.name.clone(), entry.protocol))
            else {
                return Flow::Continue;
            };
            inner.stats.accepts += 1;

            let port = inner.alloc_port_id();
            let name = format!("{}#{}", listener_name, port);
            let (out_tx, out_rx) = mpsc::channel(inner.config.send_queue_depth);
            let cancel = inner.cancel.child_token();
            inner.ports.insert(
                port,
                PortEntry {
                    name,
                    kind: PortKind::Response,
                    protocol,
                    state: PortState::Connected,
                    origin: PortOrigin::Accepted { listener },
                    out_tx: Some(out_tx),
                    next_seq: 0,
                    pending: PendingTable::new(),
                    cancel: cancel.clone(),
                },
            );
            spawn_accepted(port, channel, out_rx, inner.mailbox_tx.clone(), cancel);
            tracing::debug!("task {}: accepted {} as port {}", inner.name, peer, port);

            let peer = peer.to_string();
            dispatch(
                inner,
                handler,
                TaskEvent::Accepted {
                    listener,
                    port,
                    peer,
                },
            )
        }

        TaskMessage::TimerFired { id } => match inner.timers.fired(id) {
            None => Flow::Continue,
            Some(TimerPurpose::User { token }) => {
                dispatch(inner, handler, TaskEvent::Timer { id, token })
            }
            Some(TimerPurpose::RequestExpiry { port, seq_nr }) => {
                let request = match inner.ports.get_mut(&port) {
                    Some(entry) => entry.pending.complete(seq_nr),
                    None => None,
                };
                match request {
                    Some(request) => {
                        inner.stats.timeouts += 1;
                        tracing::warn!(
                            "task {}: request {:?} seq {} timed out after {:?}",
                            inner.name,
                            request.signal,
                            seq_nr,
                            request.sent_at.elapsed()
                        );
                        dispatch(
                            inner,
                            handler,
                            TaskEvent::RequestTimedOut {
                                port,
                                seq_nr,
                                signal: request.signal,
                            },
                        )
                    }
                    // Answered in time; the fire is stale
                    None => Flow::Continue,
                }
            }
        },
    }
}

pub(crate) async fn run_task(
    mut inner: TaskInner,
    mut handler: Box<dyn TaskHandler>,
    mut mailbox_rx: mpsc::Receiver<TaskMessage>,
) {
    let cancel = inner.cancel.clone();
    tracing::debug!("task {} started", inner.name);

    if dispatch(&mut inner, handler.as_mut(), TaskEvent::Started) == Flow::Stop {
        inner.shutdown();
        return;
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            message = mailbox_rx.recv() => {
                let Some(message) = message else { break };
                if on_message(&mut inner, handler.as_mut(), message) == Flow::Stop {
                    break;
                }
            }
        }
    }

    inner.shutdown();
    tracing::debug!("task {} stopped", inner.name);
}

async fn pump_channel(
    mut channel: Box<dyn Channel>,
    out_rx: &mut mpsc::Receiver<Event>,
    mailbox: &mpsc::Sender<TaskMessage>,
    port: PortId,
    cancel: &CancellationToken,
) -> bool {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = channel.shutdown().await;
                return true;
            }
            outbound = out_rx.recv() => match outbound {
                Some(event) => {
                    if let Err(e) = channel.send(&event).await {
                        tracing::debug!("port {} send failed: {}", port, e);
                        return false;
                    }
                }
                None => return true,
            },
            inbound = channel.recv() => match inbound {
                Ok(event) => {
                    if mailbox
                        .send(TaskMessage::Inbound { port, event })
                        .await
                        .is_err()
                    {
                        return true;
                    }
                }
                Err(e) => {
                    tracing::debug!("port {} channel closed: {}", port, e);
                    return false;
                }
            },
        }
    }
}

fn reconnect_delay(config: &TaskConfig) -> Duration {
    let floor = config.reconnect_floor.as_millis() as u64;
    let ceiling = (config.reconnect_ceiling.as_millis() as u64).max(floor);
    let millis = rand::thread_rng().gen_range(floor..=ceiling);
    Duration::from_millis(millis)
}

pub(crate) fn spawn_dialer(
    port: PortId,
    name: String,
    addr: ChannelAddr,
    factory: Arc<dyn ChannelFactory>,
    mut out_rx: mpsc::Receiver<Event>,
    mailbox: mpsc::Sender<TaskMessage>,
    config: TaskConfig,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let attempt = tokio::select! {
                _ = cancel.cancelled() => return,
                result = factory.connect(&addr) => result,
            };
            match attempt {
                Ok(channel) => {
                    // Events queued while the port was down are stale
                    while out_rx.try_recv().is_ok() {}

                    if mailbox.send(TaskMessage::ChannelUp { port }).await.is_err() {
                        return;
                    }
                    let cancelled =
                        pump_channel(channel, &mut out_rx, &mailbox, port, &cancel).await;
                    if mailbox
                        .send(TaskMessage::ChannelDown { port })
                        .await
                        .is_err()
                        || cancelled
                    {
                        return;
                    }
                }
                Err(e) => {
                    tracing::debug!("port {} dial {} failed: {}", name, addr, e);
                }
            }

            let delay = reconnect_delay(&config);
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    });
}

fn spawn_accepted(
    port: PortId,
    channel: Box<dyn Channel>,
    mut out_rx: mpsc::Receiver<Event>,
    mailbox: mpsc::Sender<TaskMessage>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let cancelled = pump_channel(channel, &mut out_rx, &mailbox, port, &cancel).await;
        if !cancelled {
            let _ = mailbox.send(TaskMessage::ChannelDown { port }).await;
        }
    });
}

pub(crate) fn spawn_listener(
    port: PortId,
    name: String,
    mut listener: Box<dyn ChannelListener>,
    mailbox: mpsc::Sender<TaskMessage>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => return,
                result = listener.accept() => result,
            };
            match accepted {
                Ok((channel, peer)) => {
                    let message = TaskMessage::Accepted {
                        listener: port,
                        channel,
                        peer,
                    };
                    if mailbox.send(message).await.is_err() {
                        return;
                    }
                }
                Err(MeridianError::ChannelClosed) => {
                    tracing::debug!("listener {} closed", name);
                    return;
                }
                Err(e) => {
                    tracing::warn!("listener {} accept failed: {}", name, e);
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use meridian_core::{DeviceSignal, PortKind, ProtocolId};
    use meridian_transport::{ChannelAddr, MemoryHub, StaticResolver};

    use crate::port::PortSpec;
    use crate::station::{Station, TaskSpec};

    /// Forwards every reactor event to the test body
    struct Probe(mpsc::UnboundedSender<TaskEvent>);

    impl TaskHandler for Probe {
        fn handle(&mut self, _ctx: &mut TaskContext<'_>, event: TaskEvent) -> Flow {
            let _ = self.0.send(event);
            Flow::Continue
        }
    }

    /// Replies to every Claim with `replies` copies of Claimed
    struct ReplyingServer {
        replies: usize,
    }

    impl TaskHandler for ReplyingServer {
        fn handle(&mut self, ctx: &mut TaskContext<'_>, event: TaskEvent) -> Flow {
            if let TaskEvent::Received { port, event } = event {
                if event.signal == Signal::Device(DeviceSignal::Claim) {
                    for _ in 0..self.replies {
                        ctx.reply(
                            port,
                            event.seq_nr,
                            Event::new(Signal::Device(DeviceSignal::Claimed)),
                        );
                    }
                }
            }
            Flow::Continue
        }
    }

    /// Accepts connections and never answers
    struct SilentServer;

    impl TaskHandler for SilentServer {
        fn handle(&mut self, _ctx: &mut TaskContext<'_>, _event: TaskEvent) -> Flow {
            Flow::Continue
        }
    }

    /// Sends one Claim request as soon as the port connects, then
    /// forwards everything to the probe
    struct RequestingClient {
        probe: mpsc::UnboundedSender<TaskEvent>,
    }

    impl TaskHandler for RequestingClient {
        fn handle(&mut self, ctx: &mut TaskContext<'_>, event: TaskEvent) -> Flow {
            if let TaskEvent::Connected { port, .. } = &event {
                ctx.send_request(*port, Event::new(Signal::Device(DeviceSignal::Claim)));
            }
            let _ = self.probe.send(event);
            Flow::Continue
        }
    }

    fn sim_station(hub: MemoryHub) -> Station {
        let resolver = Arc::new(StaticResolver::single("svc", ChannelAddr::memory("svc")));
        Station::with_config("sim", Arc::new(hub), resolver, TaskConfig::fast())
    }

    fn server_spec() -> TaskSpec {
        TaskSpec::new("server").port(
            PortSpec::listen("svc", ProtocolId::Device).with_addr(ChannelAddr::memory("svc")),
        )
    }

    fn client_spec() -> TaskSpec {
        TaskSpec::new("client").port(PortSpec::dial("svc", PortKind::Request, ProtocolId::Device))
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<TaskEvent>) -> TaskEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for task event")
            .expect("probe channel closed")
    }

    #[tokio::test]
    async fn test_request_reply_roundtrip() {
        let station = sim_station(MemoryHub::new());
        let server = station
            .spawn(server_spec(), Box::new(ReplyingServer { replies: 1 }))
            .await
            .unwrap();

        let (probe_tx, mut probe) = mpsc::unbounded_channel();
        let client = station
            .spawn(client_spec(), Box::new(RequestingClient { probe: probe_tx }))
            .await
            .unwrap();

        loop {
            match next_event(&mut probe).await {
                TaskEvent::Received { event, .. } => {
                    assert_eq!(event.signal, Signal::Device(DeviceSignal::Claimed));
                    assert_eq!(event.seq_nr, 1);
                    break;
                }
                TaskEvent::Started | TaskEvent::Connected { .. } => {}
                other => panic!("unexpected event {:?}", other),
            }
        }

        client.stop().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn test_duplicate_reply_dropped() {
        let station = sim_station(MemoryHub::new());
        let server = station
            .spawn(server_spec(), Box::new(ReplyingServer { replies: 2 }))
            .await
            .unwrap();

        let (probe_tx, mut probe) = mpsc::unbounded_channel();
        let client = station
            .spawn(client_spec(), Box::new(RequestingClient { probe: probe_tx }))
            .await
            .unwrap();

        loop {
            if let TaskEvent::Received { .. } = next_event(&mut probe).await {
                break;
            }
        }

        // The second copy of the reply must be swallowed as stale
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(probe.try_recv().is_err());

        client.stop().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn test_request_timeout_delivered() {
        let station = sim_station(MemoryHub::new());
        let server = station
            .spawn(server_spec(), Box::new(SilentServer))
            .await
            .unwrap();

        let (probe_tx, mut probe) = mpsc::unbounded_channel();
        let client = station
            .spawn(client_spec(), Box::new(RequestingClient { probe: probe_tx }))
            .await
            .unwrap();

        loop {
            match next_event(&mut probe).await {
                TaskEvent::RequestTimedOut { seq_nr, signal, .. } => {
                    assert_eq!(seq_nr, 1);
                    assert_eq!(signal, Signal::Device(DeviceSignal::Claim));
                    break;
                }
                TaskEvent::Started | TaskEvent::Connected { .. } => {}
                other => panic!("unexpected event {:?}", other),
            }
        }

        client.stop().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn test_dial_retries_until_listener_appears() {
        let station = sim_station(MemoryHub::new());

        let (probe_tx, mut probe) = mpsc::unbounded_channel();
        let client = station
            .spawn(client_spec(), Box::new(RequestingClient { probe: probe_tx }))
            .await
            .unwrap();

        // Let a few dial attempts fail before the listener exists
        tokio::time::sleep(Duration::from_millis(250)).await;
        while let Ok(event) = probe.try_recv() {
            assert!(!matches!(event, TaskEvent::Connected { .. }));
        }

        let server = station
            .spawn(server_spec(), Box::new(SilentServer))
            .await
            .unwrap();

        loop {
            if let TaskEvent::Connected { .. } = next_event(&mut probe).await {
                break;
            }
        }

        client.stop().await;
        server.stop().await;
    }

    /// Counts periodic fires and stops itself after three
    struct Ticker {
        probe: mpsc::UnboundedSender<TaskEvent>,
        fires: u32,
    }

    impl TaskHandler for Ticker {
        fn handle(&mut self, ctx: &mut TaskContext<'_>, event: TaskEvent) -> Flow {
            match event {
                TaskEvent::Started => {
                    ctx.set_periodic(Duration::from_millis(50), 7);
                    Flow::Continue
                }
                TaskEvent::Timer { token, .. } => {
                    assert_eq!(token, 7);
                    self.fires += 1;
                    let _ = self.probe.send(event);
                    if self.fires == 3 {
                        Flow::Stop
                    } else {
                        Flow::Continue
                    }
                }
                _ => Flow::Continue,
            }
        }
    }

    #[tokio::test]
    async fn test_periodic_timer_fires_until_stop() {
        let station = sim_station(MemoryHub::new());

        let (probe_tx, mut probe) = mpsc::unbounded_channel();
        let ticker = station
            .spawn(
                TaskSpec::new("ticker"),
                Box::new(Ticker {
                    probe: probe_tx,
                    fires: 0,
                }),
            )
            .await
            .unwrap();

        for _ in 0..3 {
            let event = next_event(&mut probe).await;
            assert!(matches!(event, TaskEvent::Timer { token: 7, .. }));
        }

        // Flow::Stop ends the task on its own
        ticker.wait().await;
    }
}
