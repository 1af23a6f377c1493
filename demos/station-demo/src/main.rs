//! End-to-end station demonstration
//!
//! Brings up a miniature installation on TCP loopback: a property
//! directory, an update collector, two antenna arms under an array
//! device, and a telemetry producer per arm. A commander task links the
//! telemetry and walks the array through claim, prepare, and resume;
//! once the array is active the collected values are printed and the
//! station winds down.
//!
//! Run with `RUST_LOG=debug` for the full reactor trace.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use meridian_core::{
    DeviceSignal, DirectorySignal, Event, PortKind, ProducerId, PropertyValue, ProtocolId,
    ResultCode, Signal, TimerId,
};
use meridian_device::{ChildSet, DeviceConfig, DeviceTask, LogicalDevice, NullControl};
use meridian_props::{
    CollectorTask, DirectoryTask, ForwarderConfig, ProducerTask, PropertySet, Sampler,
    SharedCollector, SharedDirectory, UpdateForwarder, COLLECTOR_PORT, DIRECTORY_PORT,
};
use meridian_runtime::{
    Flow, PortSpec, Station, TaskContext, TaskEvent, TaskHandle, TaskHandler, TaskSpec,
};
use meridian_transport::{ChannelAddr, StaticResolver, TcpFactory};
use meridian_wire::{LinkReply, LinkRequest, ResultReply};

const ARRAY: &str = "array";
const ARMS: [&str; 2] = ["arm-east", "arm-west"];
const PROPERTIES: [&str; 2] = ["azimuth", "elevation"];

const RELINK_TOKEN: u64 = 1;
const RELINK_DELAY: Duration = Duration::from_millis(100);

fn scope_of(arm: &str) -> String {
    format!("station.{}", arm)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("station demo starting on TCP loopback");

    let resolver = Arc::new(StaticResolver::new());
    let station = Station::new("station7", Arc::new(TcpFactory), resolver.clone());

    // Every endpoint starts on an ephemeral port; the real address is
    // published once the listener reports what it bound.
    let unbound = ChannelAddr::Tcp("127.0.0.1:0".parse()?);
    resolver.insert(DIRECTORY_PORT, unbound.clone());
    resolver.insert(COLLECTOR_PORT, unbound.clone());
    resolver.insert(ARRAY, unbound.clone());
    for arm in ARMS {
        resolver.insert(arm, unbound.clone());
        resolver.insert(scope_of(arm), unbound.clone());
    }

    let directory = SharedDirectory::new();
    let directory_task = station
        .spawn(
            DirectoryTask::spec("directory"),
            Box::new(DirectoryTask::new(directory.clone())),
        )
        .await?;
    publish(&station, &directory_task, DIRECTORY_PORT)?;

    let collector = SharedCollector::new();
    let collector_task = station
        .spawn(
            CollectorTask::spec("collector"),
            Box::new(CollectorTask::new(collector.clone())),
        )
        .await?;
    publish(&station, &collector_task, COLLECTOR_PORT)?;

    // Leaf devices first, then the array that dials them
    let mut arm_tasks = Vec::new();
    for arm in ARMS {
        let device = LogicalDevice::new(arm, DeviceConfig::default(), NullControl, ChildSet::default());
        let spec = DeviceTask::spec(&device);
        let handle = station.spawn(spec, Box::new(DeviceTask::new(device))).await?;
        publish(&station, &handle, arm)?;
        arm_tasks.push(handle);
    }

    let device = LogicalDevice::new(
        ARRAY,
        DeviceConfig::default(),
        NullControl,
        ChildSet::new(ARMS),
    );
    let spec = DeviceTask::spec(&device);
    let array_task = station.spawn(spec, Box::new(DeviceTask::new(device))).await?;
    publish(&station, &array_task, ARRAY)?;

    // One telemetry producer per arm, sampling on a tight heartbeat so
    // the demo converges quickly
    let mut producer_tasks = Vec::new();
    for (nr, arm) in ARMS.iter().enumerate() {
        let scope = scope_of(arm);
        let mut set = PropertySet::new(scope.as_str());
        for property in PROPERTIES {
            set = set.property(property, PropertyValue::Float(0.0));
        }
        let forwarder = UpdateForwarder::new(
            ProducerId::new(nr as u32 + 1),
            ForwarderConfig {
                heartbeat: Duration::from_millis(200),
                ..ForwarderConfig::default()
            },
        );
        let producer = ProducerTask::new(set, forwarder)
            .with_sampler(telemetry_sampler(180.0 * nr as f64));
        let handle = station
            .spawn(
                ProducerTask::spec(format!("{}-telemetry", arm), &scope),
                Box::new(producer),
            )
            .await?;
        publish(&station, &handle, &scope)?;
        producer_tasks.push(handle);
    }

    let scopes: Vec<String> = ARMS.iter().map(|arm| scope_of(arm)).collect();
    let (commander, mut active) = Commander::new(scopes.clone());
    let commander_task = station
        .spawn(Commander::spec(&scopes), Box::new(commander))
        .await?;

    let _ = timeout(Duration::from_secs(10), active.recv())
        .await
        .map_err(|_| "array never became active")?;

    // Let telemetry flow until every property has reached the collector
    let expected = ARMS.len() * PROPERTIES.len();
    let deadline = Instant::now() + Duration::from_secs(5);
    while collector.lock().value_count() < expected {
        if Instant::now() >= deadline {
            return Err("telemetry never reached the collector".into());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    for (name, value) in collector.lock().values() {
        info!(%name, ?value, "collected");
    }

    commander_task.stop().await;
    for handle in producer_tasks {
        handle.stop().await;
    }
    array_task.stop().await;
    for handle in arm_tasks {
        handle.stop().await;
    }
    collector_task.stop().await;
    directory_task.stop().await;

    info!("station demo complete");
    Ok(())
}

/// Re-register `name` with the address its listener actually bound
fn publish(
    station: &Station,
    handle: &TaskHandle,
    name: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = handle
        .bound_addr(name)
        .ok_or_else(|| format!("{} bound no listener", name))?;
    info!(%name, %addr, "endpoint up");
    station.resolver().insert(name, addr);
    Ok(())
}

/// Synthetic antenna readings: a slow azimuth sweep and a nodding
/// elevation, one reading per heartbeat
fn telemetry_sampler(azimuth_start: f64) -> Sampler {
    let mut beat = 0u64;
    Box::new(move || {
        beat += 1;
        let sweep = (azimuth_start + beat as f64 * 0.25) % 360.0;
        let nod = 30.0 + (beat as f64 * 0.1).sin() * 5.0;
        vec![
            ("azimuth".to_string(), PropertyValue::Float(sweep)),
            ("elevation".to_string(), PropertyValue::Float(nod)),
        ]
    })
}

/// Drives the station: links each arm's telemetry and walks the array
/// through the claim ladder, reporting on the channel when it is active
struct Commander {
    scopes: Vec<String>,
    linked: BTreeSet<String>,
    relink_timer: Option<TimerId>,
    active: mpsc::UnboundedSender<()>,
}

impl Commander {
    fn new(scopes: Vec<String>) -> (Commander, mpsc::UnboundedReceiver<()>) {
        let (active, active_rx) = mpsc::unbounded_channel();
        (
            Commander {
                scopes,
                linked: BTreeSet::new(),
                relink_timer: None,
                active,
            },
            active_rx,
        )
    }

    fn spec(scopes: &[String]) -> TaskSpec {
        let mut spec = TaskSpec::new("commander").port(PortSpec::dial(
            ARRAY,
            PortKind::Request,
            ProtocolId::Device,
        ));
        for scope in scopes {
            spec = spec.port(PortSpec::dial(
                scope.as_str(),
                PortKind::Request,
                ProtocolId::Directory,
            ));
        }
        spec
    }

    fn send_link(&self, ctx: &mut TaskContext<'_>, scope: &str) {
        let Some(port) = ctx.port_named(scope) else {
            return;
        };
        let names = PROPERTIES.iter().map(|name| name.to_string()).collect();
        let request = LinkRequest::new(scope, names);
        let _ = ctx.send_request(
            port,
            Event::with_payload(
                Signal::Directory(DirectorySignal::LinkProperties),
                request.encode(),
            ),
        );
    }

    fn on_linked(&mut self, ctx: &mut TaskContext<'_>, scope: String, event: &Event) {
        let reply = match LinkReply::decode(&event.payload) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(%scope, error = %e, "malformed link reply");
                return;
            }
        };
        match reply.result {
            ResultCode::NoError => {
                info!(%scope, "telemetry linked");
                self.linked.insert(scope);
            }
            // The producer has not finished registering its scope yet
            ResultCode::PropertySetGone | ResultCode::Busy => {
                if self.relink_timer.is_none() {
                    self.relink_timer = Some(ctx.set_timer(RELINK_DELAY, RELINK_TOKEN));
                }
            }
            other => warn!(%scope, result = ?other, "link refused"),
        }
    }

    fn on_completion(&mut self, ctx: &mut TaskContext<'_>, signal: DeviceSignal, event: &Event) {
        let result = match ResultReply::decode(&event.payload) {
            Ok(reply) => reply.result,
            Err(e) => {
                warn!(error = %e, "malformed completion payload");
                return;
            }
        };
        if !result.is_ok() {
            warn!(?signal, ?result, "array refused a command");
            return;
        }
        let Some(port) = ctx.port_named(ARRAY) else {
            return;
        };
        match signal {
            DeviceSignal::Claimed => {
                info!("array claimed; preparing");
                let _ = ctx.send_request(port, Event::new(Signal::Device(DeviceSignal::Prepare)));
            }
            DeviceSignal::Prepared => {
                info!("array prepared; resuming");
                let _ = ctx.send_request(port, Event::new(Signal::Device(DeviceSignal::Resume)));
            }
            DeviceSignal::Resumed => {
                info!("array active");
                let _ = self.active.send(());
            }
            other => debug!(signal = ?other, "notification"),
        }
    }
}

impl TaskHandler for Commander {
    fn handle(&mut self, ctx: &mut TaskContext<'_>, event: TaskEvent) -> Flow {
        match event {
            TaskEvent::Connected { port, name } => {
                if name == ARRAY {
                    info!("array control port connected; claiming");
                    let _ =
                        ctx.send_request(port, Event::new(Signal::Device(DeviceSignal::Claim)));
                } else {
                    self.send_link(ctx, &name);
                }
            }
            TaskEvent::Received { port, event } => match event.signal {
                Signal::Device(signal) => self.on_completion(ctx, signal, &event),
                Signal::Directory(DirectorySignal::PropertiesLinked) => {
                    if let Some(scope) = ctx.port_name(port).map(str::to_string) {
                        self.on_linked(ctx, scope, &event);
                    }
                }
                other => debug!(signal = ?other, "unhandled signal"),
            },
            TaskEvent::Timer {
                token: RELINK_TOKEN,
                ..
            } => {
                self.relink_timer = None;
                let pending: Vec<String> = self
                    .scopes
                    .iter()
                    .filter(|scope| !self.linked.contains(*scope))
                    .cloned()
                    .collect();
                for scope in pending {
                    self.send_link(ctx, &scope);
                }
            }
            TaskEvent::RequestTimedOut { signal, .. } => {
                warn!(?signal, "request went unanswered");
            }
            _ => {}
        }
        Flow::Continue
    }
}
