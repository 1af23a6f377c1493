//! Property distribution scenarios
//!
//! Directory, collector, and one producer run as real reactor tasks
//! over the memory hub. A [`Controller`] dials the producer's scope
//! port to link properties; collector state is inspected through its
//! shared handle, the same way an embedding process would read it.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use meridian_core::{
    DirectorySignal, Event, MeridianResult, ProducerId, PropertyValue, ProtocolId, ResultCode,
    Signal,
};
use meridian_props::{
    Collector, CollectorTask, DirectoryTask, ForwarderConfig, ProducerTask, PropertySet, Sampler,
    SharedCollector, SharedDirectory, UpdateForwarder, COLLECTOR_PORT, DIRECTORY_PORT,
};
use meridian_runtime::TaskHandle;
use meridian_wire::{LinkReply, LinkRequest};

use crate::sim::{Controller, ControllerHandle, StationSim, OBSERVE_DEADLINE};

/// Hand-fed value source: the test queues changes, the producer's
/// sampler drains them on its next heartbeat
#[derive(Clone, Default)]
pub struct ValueFeed(Arc<Mutex<VecDeque<(String, PropertyValue)>>>);

impl ValueFeed {
    pub fn new() -> Self {
        ValueFeed::default()
    }

    pub fn push(&self, name: impl Into<String>, value: PropertyValue) {
        self.0.lock().push_back((name.into(), value));
    }

    pub fn sampler(&self) -> Sampler {
        let feed = self.clone();
        Box::new(move || feed.0.lock().drain(..).collect())
    }
}

/// Directory, collector, and one producer, plus the controller that
/// links properties on the producer's scope port
pub struct DistributionRig {
    pub sim: StationSim,
    pub handle: ControllerHandle,
    pub feed: ValueFeed,
    pub directory: SharedDirectory,
    pub collector: SharedCollector,
    pub producer_id: ProducerId,
    scope: String,
    directory_task: TaskHandle,
    collector_task: Option<TaskHandle>,
    producer_task: TaskHandle,
    controller_task: TaskHandle,
}

impl DistributionRig {
    pub async fn start(
        scope: &str,
        properties: &[&str],
        config: ForwarderConfig,
    ) -> MeridianResult<Self> {
        let sim = StationSim::new();
        sim.endpoint(DIRECTORY_PORT);
        sim.endpoint(COLLECTOR_PORT);
        sim.endpoint(scope);

        let directory = SharedDirectory::new();
        let directory_task = sim
            .spawn(
                DirectoryTask::spec("directory"),
                Box::new(DirectoryTask::new(directory.clone())),
            )
            .await?;

        let collector = SharedCollector::new();
        let collector_task = sim
            .spawn(
                CollectorTask::spec("collector"),
                Box::new(CollectorTask::new(collector.clone())),
            )
            .await?;

        let producer_id = ProducerId::new(7);
        let mut set = PropertySet::new(scope);
        for name in properties {
            set = set.property(*name, PropertyValue::Int(0));
        }
        let feed = ValueFeed::new();
        let producer = ProducerTask::new(set, UpdateForwarder::new(producer_id, config))
            .with_sampler(feed.sampler());
        let producer_task = sim
            .spawn(ProducerTask::spec("producer", scope), Box::new(producer))
            .await?;

        let (controller, mut handle) = Controller::new();
        let controller_task = sim
            .spawn(
                Controller::spec("link-client", &[(scope, ProtocolId::Directory)]),
                Box::new(controller),
            )
            .await?;
        handle.await_connected(scope).await;

        Ok(DistributionRig {
            sim,
            handle,
            feed,
            directory,
            collector,
            producer_id,
            scope: scope.to_string(),
            directory_task,
            collector_task: Some(collector_task),
            producer_task,
            controller_task,
        })
    }

    /// Link `names` on the producer's scope port; retried while the
    /// set is still loading
    pub async fn link(&mut self, names: &[&str]) -> LinkReply {
        let deadline = Instant::now() + OBSERVE_DEADLINE;
        loop {
            let request = LinkRequest::new(
                self.scope.as_str(),
                names.iter().map(|name| name.to_string()).collect(),
            );
            self.handle.command(
                &self.scope,
                Event::with_payload(
                    Signal::Directory(DirectorySignal::LinkProperties),
                    request.encode(),
                ),
            );
            let event = self
                .handle
                .await_signal(Signal::Directory(DirectorySignal::PropertiesLinked))
                .await;
            let reply = decode_link_reply(&event);
            if reply.result == ResultCode::PropertySetGone && Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(25)).await;
                continue;
            }
            return reply;
        }
    }

    pub async fn unlink(&mut self, names: &[&str]) -> LinkReply {
        let request = LinkRequest::new(
            self.scope.as_str(),
            names.iter().map(|name| name.to_string()).collect(),
        );
        self.handle.command(
            &self.scope,
            Event::with_payload(
                Signal::Directory(DirectorySignal::UnlinkProperties),
                request.encode(),
            ),
        );
        let event = self
            .handle
            .await_signal(Signal::Directory(DirectorySignal::PropertiesUnlinked))
            .await;
        decode_link_reply(&event)
    }

    /// Poll the collector until `predicate` holds; fails the test when
    /// it never does
    pub async fn await_collector(&self, what: &str, predicate: impl Fn(&Collector) -> bool) {
        let deadline = Instant::now() + OBSERVE_DEADLINE;
        loop {
            if predicate(&self.collector.lock()) {
                return;
            }
            if Instant::now() >= deadline {
                panic!("collector never reached: {}", what);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn stop_collector(&mut self) {
        if let Some(handle) = self.collector_task.take() {
            handle.stop().await;
        }
    }

    /// Bring the collector back with its store intact; the producer
    /// reconnects and resynchronizes on its own
    pub async fn restart_collector(&mut self) -> MeridianResult<()> {
        let shared = self.collector.clone();
        let handle = self
            .sim
            .respawn(CollectorTask::spec("collector"), move || {
                Box::new(CollectorTask::new(shared.clone()))
            })
            .await?;
        self.collector_task = Some(handle);
        Ok(())
    }

    pub async fn shutdown(self) {
        self.controller_task.stop().await;
        self.producer_task.stop().await;
        if let Some(collector) = self.collector_task {
            collector.stop().await;
        }
        self.directory_task.stop().await;
    }
}

fn decode_link_reply(event: &Event) -> LinkReply {
    match LinkReply::decode(&event.payload) {
        Ok(reply) => reply,
        Err(e) => panic!("malformed link reply: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use proptest::prelude::*;

    use meridian_props::LinkStart;
    use meridian_wire::{RegisterReply, UpdateBatch};

    fn fast_forwarder(max_batch_updates: usize) -> ForwarderConfig {
        ForwarderConfig {
            max_batch_updates,
            heartbeat: Duration::from_millis(25),
            ..ForwarderConfig::default()
        }
    }

    #[tokio::test]
    async fn test_link_reports_missing_properties() {
        let mut rig =
            DistributionRig::start("station.array", &["ra", "dec"], ForwarderConfig::default())
                .await
                .unwrap();

        let reply = rig.link(&["ra", "dec", "focus"]).await;
        assert_eq!(reply.result, ResultCode::MissingProperties);
        assert_eq!(reply.missing, 1);

        // The known names did link; asking again completes on the spot
        let again = rig.link(&["ra", "dec"]).await;
        assert_eq!(again.result, ResultCode::NoError);
        assert_eq!(again.missing, 0);

        rig.shutdown().await;
    }

    #[tokio::test]
    async fn test_burst_splits_into_threshold_batches() {
        let names: Vec<String> = (0..25).map(|i| format!("p{:02}", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let mut rig = DistributionRig::start("station.array", &refs, fast_forwarder(10))
            .await
            .unwrap();
        assert_eq!(rig.link(&refs).await.result, ResultCode::NoError);

        for (i, name) in names.iter().enumerate() {
            rig.feed.push(name.as_str(), PropertyValue::Int(i as i64));
        }

        let producer = rig.producer_id;
        rig.await_collector("25 updates in 3 batches", |c| {
            c.last_seq(producer) == 3 && c.value_count() == 25
        })
        .await;

        let collector = rig.collector.lock();
        assert_eq!(collector.applied(), 3);
        assert_eq!(
            collector.value("station.array.p00"),
            Some(&PropertyValue::Int(0))
        );
        assert_eq!(
            collector.value("station.array.p24"),
            Some(&PropertyValue::Int(24))
        );
        drop(collector);

        rig.shutdown().await;
    }

    #[tokio::test]
    async fn test_collector_restart_resends_only_unseen_batches() {
        let mut rig =
            DistributionRig::start("station.array", &["az", "el", "focus"], fast_forwarder(1))
                .await
                .unwrap();
        assert_eq!(rig.link(&["az", "el", "focus"]).await.result, ResultCode::NoError);

        for (name, value) in [("az", 1), ("el", 2), ("focus", 3), ("az", 4)] {
            rig.feed.push(name, PropertyValue::Int(value));
        }
        let producer = rig.producer_id;
        rig.await_collector("four batches applied", |c| c.last_seq(producer) == 4)
            .await;

        // The fifth batch is sealed while the collector is down
        rig.stop_collector().await;
        rig.feed.push("el", PropertyValue::Int(5));
        tokio::time::sleep(Duration::from_millis(150)).await;

        rig.restart_collector().await.unwrap();
        rig.await_collector("resynchronized", |c| c.last_seq(producer) == 5)
            .await;

        // Exactly one batch was applied on top of the four survivors
        let collector = rig.collector.lock();
        assert_eq!(collector.applied(), 5);
        assert_eq!(
            collector.value("station.array.az"),
            Some(&PropertyValue::Int(4))
        );
        assert_eq!(
            collector.value("station.array.el"),
            Some(&PropertyValue::Int(5))
        );
        assert_eq!(
            collector.value("station.array.focus"),
            Some(&PropertyValue::Int(3))
        );
        drop(collector);

        rig.shutdown().await;
    }

    #[tokio::test]
    async fn test_unlink_stops_forwarding() {
        let mut rig = DistributionRig::start("station.array", &["ra", "dec"], fast_forwarder(1))
            .await
            .unwrap();
        assert_eq!(rig.link(&["ra"]).await.result, ResultCode::NoError);

        rig.feed.push("ra", PropertyValue::Int(1));
        let producer = rig.producer_id;
        rig.await_collector("first update applied", |c| c.last_seq(producer) == 1)
            .await;

        assert_eq!(rig.unlink(&["ra"]).await.result, ResultCode::NoError);
        rig.feed.push("ra", PropertyValue::Int(2));
        tokio::time::sleep(Duration::from_millis(200)).await;

        let collector = rig.collector.lock();
        assert_eq!(collector.last_seq(producer), 1);
        assert_eq!(
            collector.value("station.array.ra"),
            Some(&PropertyValue::Int(1))
        );
        drop(collector);

        rig.shutdown().await;
    }

    const VOCAB: &[&str] = &[
        "az", "el", "focus", "gain", "band", "dither", "atten", "clock",
    ];

    proptest! {
        /// Any mix of known and unknown names: each unknown one is
        /// counted, every known one ends up linked
        #[test]
        fn prop_link_counts_each_unknown_name(
            known in proptest::sample::subsequence(VOCAB.to_vec(), 0..=VOCAB.len()),
            requested in proptest::sample::subsequence(VOCAB.to_vec(), 1..=VOCAB.len()),
        ) {
            let mut set = PropertySet::new("station.rig");
            for name in &known {
                set = set.property(*name, PropertyValue::Int(0));
            }
            let (result, request) = set.load();
            prop_assert_eq!(result, ResultCode::NoError);
            prop_assert!(request.is_some());
            set.on_register_reply(ResultCode::NoError);

            let confirmable: Vec<&str> = requested
                .iter()
                .copied()
                .filter(|name| known.contains(name))
                .collect();
            let expected_missing = (requested.len() - confirmable.len()) as u16;

            let completion = match set.link_properties(&requested) {
                LinkStart::Complete(done) => done,
                LinkStart::InFlight => {
                    let mut done = None;
                    for name in &confirmable {
                        done = set.confirm_link(name, true);
                    }
                    match done {
                        Some(done) => done,
                        None => panic!("round never completed"),
                    }
                }
                LinkStart::Refused(result) => panic!("link refused with {:?}", result),
            };

            if expected_missing > 0 {
                prop_assert_eq!(completion.result, ResultCode::MissingProperties);
            } else {
                prop_assert_eq!(completion.result, ResultCode::NoError);
            }
            prop_assert_eq!(completion.missing, expected_missing);
            for name in &confirmable {
                prop_assert!(set.is_linked(name));
            }
        }
    }

    #[derive(Clone, Copy, Debug)]
    enum Churn {
        Push,
        Tick,
        DropLink,
        Relink,
    }

    fn churn_strategy() -> impl Strategy<Value = Churn> {
        prop_oneof![
            4 => Just(Churn::Push),
            2 => Just(Churn::Tick),
            1 => Just(Churn::DropLink),
            1 => Just(Churn::Relink),
        ]
    }

    /// Apply one delivery turn: the collector applies every batch it
    /// has not seen and acknowledges all of them
    fn deliver(
        forwarder: &mut UpdateForwarder,
        collector_last: &mut u32,
        applied: &mut BTreeSet<u32>,
        batches: Vec<UpdateBatch>,
    ) {
        for batch in batches {
            if batch.seq_nr > *collector_last {
                *collector_last = batch.seq_nr;
                applied.insert(batch.seq_nr);
            }
            forwarder.on_ack(batch.seq_nr);
        }
    }

    proptest! {
        /// Disconnects, reconnects, and overflow drops never leave a
        /// hole: once drained, the applied sequence numbers are exactly
        /// 1..=last_seq
        #[test]
        fn prop_delivery_is_gapless_under_churn(
            ops in proptest::collection::vec(churn_strategy(), 1..80),
        ) {
            let config = ForwarderConfig {
                max_batch_updates: 2,
                max_in_flight: 4,
                ..ForwarderConfig::default()
            };
            let producer = ProducerId::new(3);
            let mut forwarder = UpdateForwarder::new(producer, config);
            let mut collector_last = 0u32;
            let mut applied = BTreeSet::new();
            let mut nr = 0i64;

            let out = forwarder.on_registered(&RegisterReply::new(producer, 0));
            deliver(&mut forwarder, &mut collector_last, &mut applied, out);

            for op in ops {
                match op {
                    Churn::Push => {
                        nr += 1;
                        let out = forwarder.push(format!("p{}", nr), PropertyValue::Int(nr));
                        deliver(
                            &mut forwarder,
                            &mut collector_last,
                            &mut applied,
                            out.into_iter().collect(),
                        );
                    }
                    Churn::Tick => {
                        let out = forwarder.tick();
                        deliver(&mut forwarder, &mut collector_last, &mut applied, out);
                    }
                    Churn::DropLink => forwarder.on_disconnected(),
                    Churn::Relink => {
                        let out = forwarder
                            .on_registered(&RegisterReply::new(producer, collector_last));
                        deliver(&mut forwarder, &mut collector_last, &mut applied, out);
                    }
                }
                prop_assert!(forwarder.in_flight_len() <= 4);
            }

            // Drain: reconnect and tick until everything is acknowledged
            if !forwarder.is_registered() {
                let out = forwarder.on_registered(&RegisterReply::new(producer, collector_last));
                deliver(&mut forwarder, &mut collector_last, &mut applied, out);
            }
            for _ in 0..100 {
                if forwarder.in_flight_len() == 0 && forwarder.buffered() == 0 {
                    break;
                }
                let out = forwarder.tick();
                deliver(&mut forwarder, &mut collector_last, &mut applied, out);
            }

            prop_assert_eq!(forwarder.in_flight_len(), 0);
            let expected: BTreeSet<u32> = (1..=forwarder.last_seq()).collect();
            prop_assert_eq!(applied, expected);
        }
    }
}
