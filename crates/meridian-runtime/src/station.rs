//! Station: the factory and registry a process spawns its tasks from
//!
//! One station holds the transport factory, the endpoint resolver, and
//! the reactor configuration shared by every task in the process.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use meridian_core::{MeridianResult, PortState, TaskId};
use meridian_transport::{ChannelAddr, ChannelFactory, StaticResolver};

use crate::config::TaskConfig;
use crate::pending::PendingTable;
use crate::port::{PortEntry, PortMode, PortOrigin, PortSpec};
use crate::task::{run_task, spawn_dialer, spawn_listener, TaskHandler, TaskInner, TaskStats};
use crate::timer::TimerTable;

/// Declaration of one task and its ports
#[derive(Clone, Debug)]
pub struct TaskSpec {
    pub name: String,
    pub ports: Vec<PortSpec>,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>) -> Self {
        TaskSpec {
            name: name.into(),
            ports: Vec::new(),
        }
    }

    pub fn port(mut self, spec: PortSpec) -> Self {
        self.ports.push(spec);
        self
    }
}

/// Shared spawning context for all tasks of a process
pub struct Station {
    name: String,
    factory: Arc<dyn ChannelFactory>,
    resolver: Arc<StaticResolver>,
    config: TaskConfig,
    next_task: AtomicU32,
}

impl Station {
    pub fn new(
        name: impl Into<String>,
        factory: Arc<dyn ChannelFactory>,
        resolver: Arc<StaticResolver>,
    ) -> Self {
        Station::with_config(name, factory, resolver, TaskConfig::default())
    }

    pub fn with_config(
        name: impl Into<String>,
        factory: Arc<dyn ChannelFactory>,
        resolver: Arc<StaticResolver>,
        config: TaskConfig,
    ) -> Self {
        Station {
            name: name.into(),
            factory,
            resolver,
            config,
            next_task: AtomicU32::new(1),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resolver(&self) -> &StaticResolver {
        &self.resolver
    }

    /// Spawn a task: bind its listeners, start its dialers, and run the
    /// reactor. Listener bind failures fail the spawn; dial targets are
    /// retried in the background.
    pub async fn spawn(
        &self,
        spec: TaskSpec,
        handler: Box<dyn TaskHandler>,
    ) -> MeridianResult<TaskHandle> {
        let task_id = TaskId::new(self.next_task.fetch_add(1, Ordering::Relaxed));
        let cancel = CancellationToken::new();
        let (mailbox_tx, mailbox_rx) = mpsc::channel(self.config.mailbox_depth);

        let mut inner = TaskInner {
            task_id,
            name: format!("{}/{}", self.name, spec.name),
            config: self.config.clone(),
            mailbox_tx: mailbox_tx.clone(),
            cancel: cancel.clone(),
            ports: BTreeMap::new(),
            next_port: 0,
            timers: TimerTable::new(),
            stats: TaskStats::default(),
        };

        let mut bound = Vec::new();
        for port_spec in spec.ports {
            let addr = match &port_spec.addr {
                Some(addr) => addr.clone(),
                None => self.resolver.resolve(&port_spec.name)?,
            };
            let port = inner.alloc_port_id();
            let token = cancel.child_token();

            match port_spec.mode {
                PortMode::Listen => {
                    let listener = self.factory.bind(&addr).await?;
                    bound.push((port_spec.name.clone(), listener.local_addr()));
                    inner.ports.insert(
                        port,
                        PortEntry {
                            name: port_spec.name.clone(),
                            kind: port_spec.kind,
                            protocol: port_spec.protocol,
                            state: PortState::Connected,
                            origin: PortOrigin::Listener,
                            out_tx: None,
                            next_seq: 0,
                            pending: PendingTable::new(),
                            cancel: token.clone(),
                        },
                    );
                    spawn_listener(port, port_spec.name, listener, mailbox_tx.clone(), token);
                }
                PortMode::Dial => {
                    let (out_tx, out_rx) = mpsc::channel(self.config.send_queue_depth);
                    inner.ports.insert(
                        port,
                        PortEntry {
                            name: port_spec.name.clone(),
                            kind: port_spec.kind,
                            protocol: port_spec.protocol,
                            state: PortState::Connecting,
                            origin: PortOrigin::Dialed,
                            out_tx: Some(out_tx),
                            next_seq: 0,
                            pending: PendingTable::new(),
                            cancel: token.clone(),
                        },
                    );
                    spawn_dialer(
                        port,
                        port_spec.name,
                        addr,
                        self.factory.clone(),
                        out_rx,
                        mailbox_tx.clone(),
                        self.config.clone(),
                        token,
                    );
                }
            }
        }

        let join = tokio::spawn(run_task(inner, handler, mailbox_rx));
        Ok(TaskHandle {
            task_id,
            bound,
            cancel,
            join,
        })
    }
}

/// Owning handle for a spawned task
pub struct TaskHandle {
    pub task_id: TaskId,
    /// Listener addresses actually bound, by port name; useful when
    /// binding to an ephemeral TCP port
    pub bound: Vec<(String, ChannelAddr)>,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl TaskHandle {
    pub fn bound_addr(&self, name: &str) -> Option<ChannelAddr> {
        self.bound
            .iter()
            .find(|(port, _)| port == name)
            .map(|(_, addr)| addr.clone())
    }

    /// Cancel the task and wait for the reactor to wind down
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.join.await;
    }

    /// Wait for the task to stop on its own
    pub async fn wait(self) {
        let _ = self.join.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::ProtocolId;
    use meridian_transport::MemoryHub;

    use crate::task::{Flow, TaskContext, TaskEvent};

    struct Noop;

    impl TaskHandler for Noop {
        fn handle(&mut self, _ctx: &mut TaskContext<'_>, _event: TaskEvent) -> Flow {
            Flow::Continue
        }
    }

    #[tokio::test]
    async fn test_spawn_reports_bound_listener_addr() {
        let hub = MemoryHub::new();
        let station = Station::new(
            "station7",
            Arc::new(hub),
            Arc::new(StaticResolver::new()),
        );

        let spec = TaskSpec::new("directory").port(
            PortSpec::listen("registry", ProtocolId::Directory)
                .with_addr(ChannelAddr::memory("registry")),
        );
        let handle = station.spawn(spec, Box::new(Noop)).await.unwrap();

        assert_eq!(
            handle.bound_addr("registry"),
            Some(ChannelAddr::memory("registry"))
        );
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_spawn_fails_on_unresolvable_dial_name() {
        let station = Station::new(
            "station7",
            Arc::new(MemoryHub::new()),
            Arc::new(StaticResolver::new()),
        );

        let spec = TaskSpec::new("client").port(PortSpec::dial(
            "nowhere",
            meridian_core::PortKind::Request,
            ProtocolId::Device,
        ));
        assert!(station.spawn(spec, Box::new(Noop)).await.is_err());
    }
}
