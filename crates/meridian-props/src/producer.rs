//! Producer task shell
//!
//! [`ProducerTask`] is the forwarding daemon that runs next to a piece
//! of hardware: it owns one [`PropertySet`] and one [`UpdateForwarder`],
//! keeps the directory and collector handshakes alive, serves link
//! requests for its set, and pumps sampled value changes upstream on a
//! heartbeat.
//!
//! Ports: a listener named after the set's scope serving link/unlink, a
//! dial port to the directory, and a dial port to the collector.

use std::collections::BTreeMap;

use tracing::warn;

use meridian_core::{
    DirectorySignal, Event, ForwardSignal, PortId, PortKind, PropertyValue, ProtocolId,
    ResultCode, Signal,
};
use meridian_runtime::{Flow, PortSpec, TaskContext, TaskEvent, TaskHandler, TaskSpec};
use meridian_wire::{LinkReply, LinkRequest, RegisterReply, ResultReply, UpdateAck, UpdateBatch};

use crate::collector::COLLECTOR_PORT;
use crate::directory::DIRECTORY_PORT;
use crate::forwarder::UpdateForwarder;
use crate::set::{LinkCompletion, LinkStart, PropertySet, SetState};

const FLUSH_TOKEN: u64 = 1;

/// Source of local value changes, polled once per heartbeat
pub type Sampler = Box<dyn FnMut() -> Vec<(String, PropertyValue)> + Send>;

/// Reactor shell around a property set and its forwarder
pub struct ProducerTask {
    set: PropertySet,
    forwarder: UpdateForwarder,
    sampler: Option<Sampler>,
    /// Cleared when the directory refuses the scope; loading is never
    /// retried after a refusal
    auto_load: bool,
    register_seq: Option<u16>,
}

impl ProducerTask {
    pub fn new(set: PropertySet, forwarder: UpdateForwarder) -> Self {
        ProducerTask {
            set,
            forwarder,
            sampler: None,
            auto_load: true,
            register_seq: None,
        }
    }

    pub fn with_sampler(mut self, sampler: Sampler) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Task spec for a producer serving `scope`
    pub fn spec(task: impl Into<String>, scope: &str) -> TaskSpec {
        TaskSpec::new(task)
            .port(PortSpec::listen(scope, ProtocolId::Directory))
            .port(PortSpec::dial(
                DIRECTORY_PORT,
                PortKind::Request,
                ProtocolId::Directory,
            ))
            .port(PortSpec::dial(
                COLLECTOR_PORT,
                PortKind::Request,
                ProtocolId::Forward,
            ))
    }

    pub fn set(&self) -> &PropertySet {
        &self.set
    }

    pub fn forwarder(&self) -> &UpdateForwarder {
        &self.forwarder
    }

    fn try_load(&mut self, ctx: &mut TaskContext<'_>, port: PortId) {
        if !self.auto_load {
            return;
        }
        let (_, request) = self.set.load();
        if let Some(request) = request {
            let _ = ctx.send_request(
                port,
                Event::with_payload(
                    Signal::Directory(DirectorySignal::RegisterScope),
                    request.encode(),
                ),
            );
        }
    }

    fn send_collector_register(&mut self, ctx: &mut TaskContext<'_>, port: PortId) {
        let request = self.forwarder.register_request();
        self.register_seq = ctx.send_request(
            port,
            Event::with_payload(Signal::Forward(ForwardSignal::Register), request.encode()),
        );
    }

    fn transmit(&self, ctx: &mut TaskContext<'_>, batches: impl IntoIterator<Item = UpdateBatch>) {
        let Some(port) = ctx.port_named(COLLECTOR_PORT) else {
            return;
        };
        for batch in batches {
            ctx.send(
                port,
                Event::with_payload(Signal::Forward(ForwardSignal::Update), batch.encode()),
            );
        }
    }

    fn on_tick(&mut self, ctx: &mut TaskContext<'_>) {
        // Keep the two handshakes alive across timeouts and restarts
        if self.auto_load && self.set.state() == SetState::Unloaded {
            if let Some(port) = ctx.port_named(DIRECTORY_PORT) {
                if ctx.is_connected(port) {
                    self.try_load(ctx, port);
                }
            }
        }
        if !self.forwarder.is_registered() && self.register_seq.is_none() {
            if let Some(port) = ctx.port_named(COLLECTOR_PORT) {
                if ctx.is_connected(port) {
                    self.send_collector_register(ctx, port);
                }
            }
        }

        // Sample local changes, then let the forwarder decide what goes
        // out. Batches sealed by a push reappear in the tick slice, so
        // the outgoing set is keyed to send each sequence number once.
        let mut outgoing: BTreeMap<u32, UpdateBatch> = BTreeMap::new();
        if let Some(sampler) = self.sampler.as_mut() {
            for (name, value) in sampler() {
                match self.set.set_value(&name, value) {
                    Ok(Some((qualified, value))) => {
                        if let Some(batch) = self.forwarder.push(qualified, value) {
                            outgoing.insert(batch.seq_nr, batch);
                        }
                    }
                    Ok(None) => {}
                    Err(result) => {
                        warn!(scope = %self.set.scope(), property = %name, result = ?result, "sampled unknown property");
                    }
                }
            }
        }
        for batch in self.forwarder.tick() {
            outgoing.entry(batch.seq_nr).or_insert(batch);
        }
        self.transmit(ctx, outgoing.into_values());
    }

    fn on_link(&mut self, ctx: &mut TaskContext<'_>, port: PortId, event: &Event) {
        let request = match LinkRequest::decode(&event.payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(scope = %self.set.scope(), error = %e, "malformed link request; dropped");
                return;
            }
        };
        if request.scope != self.set.scope() {
            self.reply_link(
                ctx,
                port,
                event.seq_nr,
                DirectorySignal::PropertiesLinked,
                LinkCompletion {
                    result: ResultCode::PropertySetGone,
                    missing: 0,
                },
            );
            return;
        }

        // Local links confirm on the spot; collect the names that will
        // enter the round before starting it.
        let to_confirm: Vec<String> = request
            .names
            .iter()
            .filter(|name| self.set.contains(name) && !self.set.is_linked(name))
            .cloned()
            .collect();

        let completion = match self.set.link_properties(&request.names) {
            LinkStart::Refused(result) => Some(LinkCompletion { result, missing: 0 }),
            LinkStart::Complete(completion) => Some(completion),
            LinkStart::InFlight => {
                let mut done = None;
                for name in &to_confirm {
                    done = self.set.confirm_link(name, true);
                }
                done
            }
        };
        match completion {
            Some(completion) => self.reply_link(
                ctx,
                port,
                event.seq_nr,
                DirectorySignal::PropertiesLinked,
                completion,
            ),
            None => warn!(scope = %self.set.scope(), "link round did not complete"),
        }
    }

    fn on_unlink(&mut self, ctx: &mut TaskContext<'_>, port: PortId, event: &Event) {
        let request = match LinkRequest::decode(&event.payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(scope = %self.set.scope(), error = %e, "malformed unlink request; dropped");
                return;
            }
        };
        let completion = if request.scope != self.set.scope() {
            LinkCompletion {
                result: ResultCode::PropertySetGone,
                missing: 0,
            }
        } else if self.set.links_in_flight() {
            LinkCompletion {
                result: ResultCode::Busy,
                missing: 0,
            }
        } else {
            self.set.unlink_properties(&request.names);
            LinkCompletion {
                result: ResultCode::NoError,
                missing: 0,
            }
        };
        self.reply_link(
            ctx,
            port,
            event.seq_nr,
            DirectorySignal::PropertiesUnlinked,
            completion,
        );
    }

    fn reply_link(
        &self,
        ctx: &mut TaskContext<'_>,
        port: PortId,
        seq_nr: u16,
        signal: DirectorySignal,
        completion: LinkCompletion,
    ) {
        ctx.reply(
            port,
            seq_nr,
            Event::with_payload(
                Signal::Directory(signal),
                LinkReply::new(completion.result, completion.missing).encode(),
            ),
        );
    }

    fn on_received(&mut self, ctx: &mut TaskContext<'_>, port: PortId, event: Event) {
        match event.signal {
            Signal::Directory(DirectorySignal::ScopeRegistered) => {
                match ResultReply::decode(&event.payload) {
                    Ok(reply) => {
                        let result = self.set.on_register_reply(reply.result);
                        if !result.is_ok() && result != ResultCode::TimedOut {
                            // Somebody else holds the scope; do not
                            // fight over it.
                            self.auto_load = false;
                        }
                    }
                    Err(e) => {
                        warn!(scope = %self.set.scope(), error = %e, "malformed register reply");
                    }
                }
            }
            Signal::Directory(DirectorySignal::ScopeUnregistered) => {
                match ResultReply::decode(&event.payload) {
                    Ok(reply) => {
                        self.set.on_unregister_reply(reply.result);
                    }
                    Err(e) => {
                        warn!(scope = %self.set.scope(), error = %e, "malformed unregister reply");
                    }
                }
            }
            Signal::Directory(DirectorySignal::LinkProperties) => self.on_link(ctx, port, &event),
            Signal::Directory(DirectorySignal::UnlinkProperties) => {
                self.on_unlink(ctx, port, &event)
            }
            Signal::Forward(ForwardSignal::Registered) => {
                self.register_seq = None;
                match RegisterReply::decode(&event.payload) {
                    Ok(reply) => {
                        let resend = self.forwarder.on_registered(&reply);
                        self.transmit(ctx, resend);
                    }
                    Err(e) => {
                        warn!(producer = %self.forwarder.producer_id(), error = %e, "malformed registration reply");
                    }
                }
            }
            Signal::Forward(ForwardSignal::Ack) => match UpdateAck::decode(&event.payload) {
                Ok(ack) => {
                    self.forwarder.on_ack(ack.seq_nr);
                }
                Err(e) => {
                    warn!(producer = %self.forwarder.producer_id(), error = %e, "malformed ack");
                }
            },
            other => {
                warn!(scope = %self.set.scope(), signal = ?other, "unhandled signal; dropped");
            }
        }
    }
}

impl TaskHandler for ProducerTask {
    fn handle(&mut self, ctx: &mut TaskContext<'_>, event: TaskEvent) -> Flow {
        match event {
            TaskEvent::Started => {
                ctx.set_periodic(self.forwarder.config().heartbeat, FLUSH_TOKEN);
            }
            TaskEvent::Connected { port, name } => match name.as_str() {
                DIRECTORY_PORT => self.try_load(ctx, port),
                COLLECTOR_PORT => self.send_collector_register(ctx, port),
                _ => {}
            },
            TaskEvent::Disconnected { name, .. } => {
                if name == COLLECTOR_PORT {
                    self.register_seq = None;
                    self.forwarder.on_disconnected();
                }
            }
            TaskEvent::Received { port, event } => self.on_received(ctx, port, event),
            TaskEvent::RequestTimedOut { signal, .. } => match signal {
                Signal::Directory(DirectorySignal::RegisterScope) => {
                    self.set.on_register_reply(ResultCode::TimedOut);
                }
                Signal::Directory(DirectorySignal::UnregisterScope) => {
                    self.set.on_unregister_reply(ResultCode::TimedOut);
                }
                Signal::Forward(ForwardSignal::Register) => {
                    // retried on the next heartbeat
                    self.register_seq = None;
                }
                _ => {}
            },
            TaskEvent::Timer {
                token: FLUSH_TOKEN, ..
            } => self.on_tick(ctx),
            _ => {}
        }
        Flow::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_runtime::PortMode;

    #[test]
    fn test_producer_spec_ports() {
        let spec = ProducerTask::spec("pump", "station.cabinet");
        assert_eq!(spec.ports.len(), 3);

        assert_eq!(spec.ports[0].name, "station.cabinet");
        assert_eq!(spec.ports[0].mode, PortMode::Listen);
        assert_eq!(spec.ports[0].protocol, ProtocolId::Directory);

        assert_eq!(spec.ports[1].name, DIRECTORY_PORT);
        assert_eq!(spec.ports[1].mode, PortMode::Dial);

        assert_eq!(spec.ports[2].name, COLLECTOR_PORT);
        assert_eq!(spec.ports[2].protocol, ProtocolId::Forward);
    }
}
