//! Device tree scenarios
//!
//! A parent device and its leaf children run as real reactor tasks
//! over the memory hub; a [`Controller`] dials the parent's control
//! port and walks the claim ladder the way a station controller would.

use meridian_core::{DeviceSignal, Event, MeridianResult, ProtocolId, Signal};
use meridian_device::{ChildSet, DeviceConfig, DeviceTask, LogicalDevice, NullControl};
use meridian_runtime::{TaskHandle, TaskSpec};

use crate::sim::{Controller, ControllerHandle, StationSim};

fn leaf_device(name: &str) -> LogicalDevice<NullControl> {
    LogicalDevice::new(name, DeviceConfig::default(), NullControl, ChildSet::default())
}

fn leaf_spec(name: &str) -> TaskSpec {
    DeviceTask::spec(&leaf_device(name))
}

/// Spawn a childless device task listening under its own name
pub async fn spawn_leaf(sim: &StationSim, name: &str) -> MeridianResult<TaskHandle> {
    sim.spawn(leaf_spec(name), Box::new(DeviceTask::new(leaf_device(name))))
        .await
}

/// One parent device over leaf children, plus the controller driving it
pub struct DeviceTreeRig {
    pub sim: StationSim,
    pub handle: ControllerHandle,
    parent_name: String,
    parent: TaskHandle,
    children: Vec<(String, TaskHandle)>,
    controller: TaskHandle,
}

impl DeviceTreeRig {
    /// Bring up the whole tree and wait for the controller to reach
    /// the parent's control port
    pub async fn start(
        parent: &str,
        children: &[&str],
        config: DeviceConfig,
    ) -> MeridianResult<Self> {
        let sim = StationSim::new();
        sim.endpoint(parent);
        for child in children {
            sim.endpoint(child);
        }

        let mut spawned = Vec::new();
        for child in children {
            spawned.push(((*child).to_string(), spawn_leaf(&sim, child).await?));
        }

        let device = LogicalDevice::new(
            parent,
            config,
            NullControl,
            ChildSet::new(children.iter().copied()),
        );
        let spec = DeviceTask::spec(&device);
        let parent_task = sim.spawn(spec, Box::new(DeviceTask::new(device))).await?;

        let (controller, mut handle) = Controller::new();
        let controller_task = sim
            .spawn(
                Controller::spec("controller", &[(parent, ProtocolId::Device)]),
                Box::new(controller),
            )
            .await?;
        handle.await_connected(parent).await;

        Ok(DeviceTreeRig {
            sim,
            handle,
            parent_name: parent.to_string(),
            parent: parent_task,
            children: spawned,
            controller: controller_task,
        })
    }

    /// Issue a lifecycle command to the parent and wait for its
    /// completion event
    pub async fn command(&mut self, command: DeviceSignal) -> Event {
        let Some(completion) = command.completion() else {
            panic!("{:?} is not a command", command)
        };
        self.handle
            .command(&self.parent_name, Event::new(Signal::Device(command)));
        self.handle.await_signal(Signal::Device(completion)).await
    }

    /// Kill one child task; the parent sees its dial port drop
    pub async fn stop_child(&mut self, name: &str) {
        let Some(at) = self.children.iter().position(|(child, _)| child == name) else {
            panic!("no child named {}", name)
        };
        let (_, handle) = self.children.remove(at);
        handle.stop().await;
    }

    /// Bring a child back as a fresh task; the parent reconnects and
    /// walks it up to the tree's state on its own
    pub async fn restart_child(&mut self, name: &str) -> MeridianResult<()> {
        let owned = name.to_string();
        let handle = self
            .sim
            .respawn(leaf_spec(name), || {
                Box::new(DeviceTask::new(leaf_device(&owned)))
            })
            .await?;
        self.children.push((name.to_string(), handle));
        Ok(())
    }

    pub async fn shutdown(self) {
        self.controller.stop().await;
        self.parent.stop().await;
        for (_, child) in self.children {
            child.stop().await;
        }
    }
}
