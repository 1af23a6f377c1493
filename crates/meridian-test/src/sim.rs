//! In-process station simulation
//!
//! A [`StationSim`] is a [`Station`] over the memory hub with a
//! resolver the test fills in by name, tightened reconnect timings, and
//! a bind-retry spawn for tasks that restart during a scenario.
//!
//! Tests drive the station through a [`Controller`] task: commands are
//! queued from the test body, pumped out as requests by the reactor,
//! and everything the controller's ports see comes back as [`Observed`]
//! values in reactor order.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use meridian_core::{Event, MeridianResult, PortKind, ProtocolId, Signal};
use meridian_runtime::{
    Flow, PortSpec, Station, TaskConfig, TaskContext, TaskEvent, TaskHandle, TaskHandler, TaskSpec,
};
use meridian_transport::{ChannelAddr, MemoryHub, StaticResolver};

/// How long observation helpers wait before failing the test
pub const OBSERVE_DEADLINE: Duration = Duration::from_secs(5);

const PUMP_TOKEN: u64 = 101;
const PUMP_INTERVAL: Duration = Duration::from_millis(10);

/// One simulated station over a private memory hub
pub struct StationSim {
    station: Station,
}

impl StationSim {
    pub fn new() -> Self {
        let config = TaskConfig {
            reconnect_floor: Duration::from_millis(50),
            reconnect_ceiling: Duration::from_millis(150),
            request_timeout: Duration::from_secs(2),
            ..TaskConfig::default()
        };
        let station = Station::with_config(
            "sim",
            Arc::new(MemoryHub::new()),
            Arc::new(StaticResolver::new()),
            config,
        );
        StationSim { station }
    }

    pub fn station(&self) -> &Station {
        &self.station
    }

    /// Make `name` reachable as a memory endpoint
    pub fn endpoint(&self, name: &str) {
        self.station
            .resolver()
            .insert(name, ChannelAddr::memory(name));
    }

    pub async fn spawn(
        &self,
        spec: TaskSpec,
        handler: Box<dyn TaskHandler>,
    ) -> MeridianResult<TaskHandle> {
        self.station.spawn(spec, handler).await
    }

    /// Spawn a task whose listener name may still be held by a task
    /// that is winding down; the bind is retried briefly
    pub async fn respawn(
        &self,
        spec: TaskSpec,
        mut handler: impl FnMut() -> Box<dyn TaskHandler>,
    ) -> MeridianResult<TaskHandle> {
        let mut attempts = 0;
        loop {
            match self.station.spawn(spec.clone(), handler()).await {
                Ok(handle) => return Ok(handle),
                Err(e) if attempts < 50 => {
                    attempts += 1;
                    tracing::debug!(task = %spec.name, error = %e, "respawn waiting");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for StationSim {
    fn default() -> Self {
        StationSim::new()
    }
}

/// What a controller port saw, tagged with the port name
#[derive(Clone, Debug)]
pub enum Observed {
    Connected { name: String },
    Disconnected { name: String },
    Received { name: String, event: Event },
    TimedOut { name: String, signal: Signal },
}

/// Reactor side of the test controller
///
/// Queued commands go out as requests on the named dial port; every
/// reactor event is mirrored back to the [`ControllerHandle`].
pub struct Controller {
    commands: mpsc::UnboundedReceiver<(String, Event)>,
    observed: mpsc::UnboundedSender<Observed>,
}

impl Controller {
    pub fn new() -> (Controller, ControllerHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (observed_tx, observed_rx) = mpsc::unbounded_channel();
        (
            Controller {
                commands: command_rx,
                observed: observed_tx,
            },
            ControllerHandle {
                commands: command_tx,
                observed: observed_rx,
            },
        )
    }

    /// Controller task with one request port per target
    pub fn spec(name: impl Into<String>, targets: &[(&str, ProtocolId)]) -> TaskSpec {
        let mut spec = TaskSpec::new(name);
        for (target, protocol) in targets {
            spec = spec.port(PortSpec::dial(*target, PortKind::Request, *protocol));
        }
        spec
    }

    fn pump(&mut self, ctx: &mut TaskContext<'_>) {
        while let Ok((target, event)) = self.commands.try_recv() {
            let Some(port) = ctx.port_named(&target) else {
                tracing::warn!(%target, "command for unknown port; dropped");
                continue;
            };
            ctx.send_request(port, event);
        }
    }
}

impl TaskHandler for Controller {
    fn handle(&mut self, ctx: &mut TaskContext<'_>, event: TaskEvent) -> Flow {
        match event {
            TaskEvent::Started => {
                ctx.set_periodic(PUMP_INTERVAL, PUMP_TOKEN);
            }
            TaskEvent::Connected { name, .. } => {
                let _ = self.observed.send(Observed::Connected { name });
            }
            TaskEvent::Disconnected { name, .. } => {
                let _ = self.observed.send(Observed::Disconnected { name });
            }
            TaskEvent::Received { port, event } => {
                let name = ctx.port_name(port).unwrap_or("?").to_string();
                let _ = self.observed.send(Observed::Received { name, event });
            }
            TaskEvent::RequestTimedOut { port, signal, .. } => {
                let name = ctx.port_name(port).unwrap_or("?").to_string();
                let _ = self.observed.send(Observed::TimedOut { name, signal });
            }
            TaskEvent::Timer {
                token: PUMP_TOKEN, ..
            } => self.pump(ctx),
            _ => {}
        }
        Flow::Continue
    }
}

/// Test-body side of the controller
pub struct ControllerHandle {
    commands: mpsc::UnboundedSender<(String, Event)>,
    observed: mpsc::UnboundedReceiver<Observed>,
}

impl ControllerHandle {
    /// Queue a request for `target`; the reactor assigns its sequence
    /// number on the next pump
    pub fn command(&self, target: &str, event: Event) {
        let _ = self.commands.send((target.to_string(), event));
    }

    /// Next observation, in reactor order; fails the test when nothing
    /// arrives within [`OBSERVE_DEADLINE`]
    pub async fn observe(&mut self) -> Observed {
        match timeout(OBSERVE_DEADLINE, self.observed.recv()).await {
            Ok(Some(observed)) => observed,
            Ok(None) => panic!("controller task is gone"),
            Err(_) => panic!("no observation within {:?}", OBSERVE_DEADLINE),
        }
    }

    pub fn try_observe(&mut self) -> Option<Observed> {
        self.observed.try_recv().ok()
    }

    /// Skip everything until the named port connects
    pub async fn await_connected(&mut self, name: &str) {
        loop {
            if let Observed::Connected { name: port } = self.observe().await {
                if port == name {
                    return;
                }
            }
        }
    }

    /// Skip connection traffic until an event with `signal` arrives; a
    /// request timeout fails the test immediately
    pub async fn await_signal(&mut self, signal: Signal) -> Event {
        loop {
            match self.observe().await {
                Observed::Received { event, .. } if event.signal == signal => return event,
                Observed::TimedOut { name, signal: lost } => {
                    panic!("request {:?} on port {} timed out", lost, name)
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::DeviceSignal;

    struct Noop;

    impl TaskHandler for Noop {
        fn handle(&mut self, _ctx: &mut TaskContext<'_>, _event: TaskEvent) -> Flow {
            Flow::Continue
        }
    }

    /// Answers every Claim with Claimed
    struct ClaimServer;

    impl TaskHandler for ClaimServer {
        fn handle(&mut self, ctx: &mut TaskContext<'_>, event: TaskEvent) -> Flow {
            if let TaskEvent::Received { port, event } = event {
                if event.signal == Signal::Device(DeviceSignal::Claim) {
                    ctx.reply(
                        port,
                        event.seq_nr,
                        Event::new(Signal::Device(DeviceSignal::Claimed)),
                    );
                }
            }
            Flow::Continue
        }
    }

    #[tokio::test]
    async fn test_controller_command_round_trip() {
        let sim = StationSim::new();
        sim.endpoint("mount");

        let server = sim
            .spawn(
                TaskSpec::new("mount").port(PortSpec::listen("mount", ProtocolId::Device)),
                Box::new(ClaimServer),
            )
            .await
            .unwrap();

        let (controller, mut handle) = Controller::new();
        let controller = sim
            .spawn(
                Controller::spec("controller", &[("mount", ProtocolId::Device)]),
                Box::new(controller),
            )
            .await
            .unwrap();

        handle.await_connected("mount").await;
        handle.command("mount", Event::new(Signal::Device(DeviceSignal::Claim)));

        let reply = handle
            .await_signal(Signal::Device(DeviceSignal::Claimed))
            .await;
        assert_eq!(reply.seq_nr, 1);

        controller.stop().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn test_respawn_reclaims_listener_name() {
        let sim = StationSim::new();
        sim.endpoint("mount");

        let spec = TaskSpec::new("mount").port(PortSpec::listen("mount", ProtocolId::Device));
        let first = sim.spawn(spec.clone(), Box::new(Noop)).await.unwrap();
        first.stop().await;

        // The listener driver may not have released the name yet
        let second = sim.respawn(spec, || Box::new(Noop)).await.unwrap();
        second.stop().await;
    }
}
