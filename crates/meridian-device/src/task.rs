//! Device task shell
//!
//! [`DeviceTask`] binds a [`LogicalDevice`] to the task reactor. It owns
//! a control listener the device's controller connects to plus one dial
//! port per child, translates reactor events into [`DeviceEvent`]s, and
//! carries the machine's [`DeviceAction`]s out against the context.
//!
//! Port naming convention: the control listener carries the device's own
//! name, child dial ports carry the child device's name. With a resolver
//! entry per device name the whole tree wires itself up.

use meridian_core::{
    DeviceSignal, Direction, Event, PortId, PortKind, ProtocolId, ResultCode, Signal, TimerId,
};
use meridian_runtime::{Flow, PortSpec, TaskContext, TaskEvent, TaskHandler, TaskSpec};
use meridian_wire::ResultReply;
use tracing::warn;

use crate::device::{DeviceAction, DeviceControl, DeviceEvent, LogicalDevice};

const QUALITY_TOKEN: u64 = 1;

/// Reactor shell around a [`LogicalDevice`]
pub struct DeviceTask<C: DeviceControl> {
    device: LogicalDevice<C>,
    /// Accepted port of the controller that commanded us last
    command_port: Option<PortId>,
    quality_timer: Option<TimerId>,
}

impl<C: DeviceControl> DeviceTask<C> {
    pub fn new(device: LogicalDevice<C>) -> Self {
        DeviceTask {
            device,
            command_port: None,
            quality_timer: None,
        }
    }

    /// Build the task spec for a device: a control listener named after
    /// the device and a dial port per child
    pub fn spec(device: &LogicalDevice<C>) -> TaskSpec {
        let mut spec = TaskSpec::new(device.name())
            .port(PortSpec::listen(device.name(), ProtocolId::Device));
        for child in device.children().names() {
            spec = spec.port(PortSpec::dial(child, PortKind::Request, ProtocolId::Device));
        }
        spec
    }

    pub fn device(&self) -> &LogicalDevice<C> {
        &self.device
    }

    fn on_received(
        &mut self,
        port: PortId,
        port_name: Option<String>,
        event: Event,
    ) -> Vec<DeviceAction> {
        let Signal::Device(signal) = event.signal else {
            return Vec::new();
        };

        if signal.direction() == Direction::In {
            self.command_port = Some(port);
            return self.device.step(DeviceEvent::Command {
                signal,
                seq_nr: event.seq_nr,
            });
        }

        // Completions arrive on the dial port named after the child
        let Some(child) = port_name else {
            return Vec::new();
        };
        if !self.device.children().contains(&child) {
            warn!(
                device = %self.device.name(),
                port = %port,
                "completion on non-child port; dropped"
            );
            return Vec::new();
        }
        let result = match ResultReply::decode(&event.payload) {
            Ok(reply) => reply.result,
            Err(e) => {
                warn!(
                    device = %self.device.name(),
                    %child,
                    error = %e,
                    "malformed completion payload; dropped"
                );
                return Vec::new();
            }
        };
        self.device.step(DeviceEvent::ChildReport {
            child,
            signal,
            result,
        })
    }

    fn command_child(&self, ctx: &mut TaskContext<'_>, child: &str, signal: DeviceSignal) {
        let Some(port) = ctx.port_named(child) else {
            return;
        };
        let _ = ctx.send_request(port, Event::new(Signal::Device(signal)));
    }

    fn run_actions(&mut self, ctx: &mut TaskContext<'_>, actions: Vec<DeviceAction>) -> Flow {
        let mut flow = Flow::Continue;
        for action in actions {
            match action {
                DeviceAction::Reply {
                    signal,
                    seq_nr,
                    result,
                } => {
                    let Some(port) = self.command_port else {
                        warn!(
                            device = %self.device.name(),
                            signal = ?signal,
                            "no controller connected; completion dropped"
                        );
                        continue;
                    };
                    let payload = ResultReply::new(result).encode();
                    ctx.reply(port, seq_nr, Event::with_payload(Signal::Device(signal), payload));
                }
                DeviceAction::Notify { signal, result } => {
                    let Some(port) = self.command_port else {
                        warn!(
                            device = %self.device.name(),
                            signal = ?signal,
                            "no controller connected; notification dropped"
                        );
                        continue;
                    };
                    let payload = ResultReply::new(result).encode();
                    ctx.send(port, Event::with_payload(Signal::Device(signal), payload));
                }
                DeviceAction::CommandChildren { signal } => {
                    let connected: Vec<String> = self
                        .device
                        .children()
                        .connected()
                        .map(str::to_string)
                        .collect();
                    for child in connected {
                        self.command_child(ctx, &child, signal);
                    }
                }
                DeviceAction::CommandChild { child, signal } => {
                    self.command_child(ctx, &child, signal);
                }
                DeviceAction::StartQualityTimer => {
                    let interval = self.device.config().quality_interval;
                    self.quality_timer = Some(ctx.set_timer(interval, QUALITY_TOKEN));
                }
                DeviceAction::CancelQualityTimer => {
                    if let Some(id) = self.quality_timer.take() {
                        ctx.cancel_timer(id);
                    }
                }
                DeviceAction::Stop => flow = Flow::Stop,
            }
        }
        flow
    }
}

impl<C: DeviceControl> TaskHandler for DeviceTask<C> {
    fn handle(&mut self, ctx: &mut TaskContext<'_>, event: TaskEvent) -> Flow {
        let actions = match event {
            TaskEvent::Started => self.device.step(DeviceEvent::Started),
            TaskEvent::Connected { name, .. } => {
                if self.device.children().contains(&name) {
                    self.device.step(DeviceEvent::ChildUp { child: name })
                } else {
                    Vec::new()
                }
            }
            TaskEvent::Disconnected { port, name } => {
                if self.command_port == Some(port) {
                    self.command_port = None;
                }
                if self.device.children().contains(&name) {
                    self.device.step(DeviceEvent::ChildDown { child: name })
                } else {
                    Vec::new()
                }
            }
            TaskEvent::Accepted { .. } => Vec::new(),
            TaskEvent::Received { port, event } => {
                let name = ctx.port_name(port).map(str::to_string);
                self.on_received(port, name, event)
            }
            TaskEvent::RequestTimedOut { port, signal, .. } => {
                // An unanswered child command counts as a refusal
                let child = ctx.port_name(port).map(str::to_string);
                match (child, signal) {
                    (Some(child), Signal::Device(command)) => match command.completion() {
                        Some(completion) => self.device.step(DeviceEvent::ChildReport {
                            child,
                            signal: completion,
                            result: ResultCode::TimedOut,
                        }),
                        None => Vec::new(),
                    },
                    _ => Vec::new(),
                }
            }
            TaskEvent::Timer {
                token: QUALITY_TOKEN,
                ..
            } => {
                self.quality_timer = None;
                self.device.step(DeviceEvent::QualityTick)
            }
            TaskEvent::Timer { .. } => Vec::new(),
        };
        self.run_actions(ctx, actions)
    }
}
