//! Logical-device lifecycle state machine
//!
//! [`LogicalDevice`] is the pure core of a device task: it consumes
//! [`DeviceEvent`]s and answers with [`DeviceAction`]s, never touching a
//! port or a clock itself. The shell in [`crate::task`] owns the IO.
//!
//! The lifecycle runs Idle -> Claiming -> Claimed -> Preparing ->
//! Suspended -> Active and back down through Releasing. Claiming,
//! Preparing and Releasing wait for a quorum of children to confirm;
//! Resume and Suspend take effect at once and fan out on the way.
//! While Active the device samples its own quality on a timer and
//! suspends itself when the sample falls below the configured floor.

use std::time::Duration;

use meridian_core::{DeviceSignal, DeviceState, ResultCode};
use tracing::{debug, warn};

use crate::children::ChildSet;

/// What becomes of a device after a completed release
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ReleaseOutcome {
    /// Return to `Idle` and await the next claim
    #[default]
    Idle,
    /// Terminate; the owning task stops
    GoingDown,
}

/// Hardware hooks a device consults at each lifecycle step
///
/// Every hook defaults to success, so a pure aggregation node needs no
/// code of its own. A hook returning anything but `NoError` refuses the
/// command: the refusal is reported upstream and no transition happens.
pub trait DeviceControl: Send + 'static {
    fn on_claim(&mut self) -> ResultCode {
        ResultCode::NoError
    }

    fn on_prepare(&mut self) -> ResultCode {
        ResultCode::NoError
    }

    fn on_resume(&mut self) -> ResultCode {
        ResultCode::NoError
    }

    fn on_suspend(&mut self) -> ResultCode {
        ResultCode::NoError
    }

    fn on_release(&mut self) -> ResultCode {
        ResultCode::NoError
    }

    /// Current hardware quality in `0.0..=1.0`, sampled while Active
    fn quality(&mut self) -> f64 {
        1.0
    }

    fn release_outcome(&mut self) -> ReleaseOutcome {
        ReleaseOutcome::Idle
    }
}

/// A control with no hardware behind it; used by aggregation nodes
#[derive(Debug, Default)]
pub struct NullControl;

impl DeviceControl for NullControl {}

/// Tunables for one logical device
#[derive(Clone, Copy, Debug)]
pub struct DeviceConfig {
    /// Fraction of children that must confirm a gated transition
    pub quorum: f64,
    /// Quality floor; samples below it suspend the device. Zero
    /// disables degradation entirely.
    pub quality_threshold: f64,
    /// Interval between quality samples while Active
    pub quality_interval: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            quorum: 1.0,
            quality_threshold: 0.0,
            quality_interval: Duration::from_secs(1),
        }
    }
}

/// Input to one state-machine step
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceEvent {
    /// The owning task came up; leaves `Initial`
    Started,
    /// A child port connected
    ChildUp { child: String },
    /// A child port dropped
    ChildDown { child: String },
    /// A lifecycle command from the controller
    Command { signal: DeviceSignal, seq_nr: u16 },
    /// A completion notification from a child
    ChildReport {
        child: String,
        signal: DeviceSignal,
        result: ResultCode,
    },
    /// The quality timer fired
    QualityTick,
}

/// Output of one state-machine step, executed by the shell
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceAction {
    /// Answer the controller, echoing the command's sequence number
    Reply {
        signal: DeviceSignal,
        seq_nr: u16,
        result: ResultCode,
    },
    /// Unsolicited notification to the controller
    Notify {
        signal: DeviceSignal,
        result: ResultCode,
    },
    /// Fan a command out to every connected child
    CommandChildren { signal: DeviceSignal },
    /// Command a single child, used when walking a late child up
    CommandChild { child: String, signal: DeviceSignal },
    StartQualityTimer,
    CancelQualityTimer,
    /// The device is gone; the owning task should stop
    Stop,
}

/// Hierarchical lifecycle state machine for one device
pub struct LogicalDevice<C: DeviceControl> {
    name: String,
    state: DeviceState,
    config: DeviceConfig,
    control: C,
    children: ChildSet,
    /// Sequence number of the command awaiting a quorum-gated reply
    pending_reply: Option<u16>,
}

impl<C: DeviceControl> LogicalDevice<C> {
    pub fn new(
        name: impl Into<String>,
        config: DeviceConfig,
        control: C,
        children: ChildSet,
    ) -> Self {
        LogicalDevice {
            name: name.into(),
            state: DeviceState::Initial,
            config,
            control,
            children,
            pending_reply: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn children(&self) -> &ChildSet {
        &self.children
    }

    pub fn control_mut(&mut self) -> &mut C {
        &mut self.control
    }

    /// Advance the machine by one event
    pub fn step(&mut self, event: DeviceEvent) -> Vec<DeviceAction> {
        let mut actions = Vec::new();
        match event {
            DeviceEvent::Started => {
                if self.state == DeviceState::Initial {
                    self.state = DeviceState::Idle;
                    debug!(device = %self.name, "device ready");
                }
            }
            DeviceEvent::ChildUp { child } => {
                if !self.children.mark_up(&child) {
                    warn!(device = %self.name, %child, "link event for unknown child");
                    return actions;
                }
                debug!(device = %self.name, %child, "child link up");
                // A reconnected child restarts at Idle and is walked up
                // to where this device already stands.
                if let Some(signal) = self.catch_up_command() {
                    actions.push(DeviceAction::CommandChild { child, signal });
                }
                self.try_complete(&mut actions);
            }
            DeviceEvent::ChildDown { child } => {
                if !self.children.mark_down(&child) {
                    warn!(device = %self.name, %child, "link event for unknown child");
                    return actions;
                }
                debug!(device = %self.name, %child, "child link down");
                // The child now counts as Idle, which can close a
                // release that was waiting on it.
                self.try_complete(&mut actions);
            }
            DeviceEvent::Command { signal, seq_nr } => {
                self.on_command(signal, seq_nr, &mut actions);
            }
            DeviceEvent::ChildReport {
                child,
                signal,
                result,
            } => {
                self.on_child_report(child, signal, result, &mut actions);
            }
            DeviceEvent::QualityTick => self.on_quality_tick(&mut actions),
        }
        actions
    }

    fn on_command(&mut self, signal: DeviceSignal, seq_nr: u16, actions: &mut Vec<DeviceAction>) {
        let Some(completion) = signal.completion() else {
            warn!(device = %self.name, signal = ?signal, "notification received as command; dropped");
            return;
        };

        let accepted = matches!(
            (self.state, signal),
            (DeviceState::Idle, DeviceSignal::Claim)
                | (DeviceState::Claimed, DeviceSignal::Prepare)
                | (DeviceState::Suspended, DeviceSignal::Resume)
                | (DeviceState::Active, DeviceSignal::Suspend)
                | (
                    DeviceState::Claimed | DeviceState::Suspended | DeviceState::Active,
                    DeviceSignal::Release,
                )
        );
        if !accepted {
            warn!(
                device = %self.name,
                state = %self.state,
                signal = ?signal,
                "command not valid in this state; dropped"
            );
            return;
        }

        let guard = match signal {
            DeviceSignal::Claim => self.control.on_claim(),
            DeviceSignal::Prepare => self.control.on_prepare(),
            DeviceSignal::Resume => self.control.on_resume(),
            DeviceSignal::Suspend => self.control.on_suspend(),
            DeviceSignal::Release => self.control.on_release(),
            _ => ResultCode::NoError,
        };
        if !guard.is_ok() {
            debug!(device = %self.name, signal = ?signal, result = ?guard, "command refused");
            actions.push(DeviceAction::Reply {
                signal: completion,
                seq_nr,
                result: guard,
            });
            return;
        }

        match signal {
            DeviceSignal::Claim => {
                self.state = DeviceState::Claiming;
                self.pending_reply = Some(seq_nr);
                actions.push(DeviceAction::CommandChildren {
                    signal: DeviceSignal::Claim,
                });
                self.try_complete(actions);
            }
            DeviceSignal::Prepare => {
                self.state = DeviceState::Preparing;
                self.pending_reply = Some(seq_nr);
                actions.push(DeviceAction::CommandChildren {
                    signal: DeviceSignal::Prepare,
                });
                self.try_complete(actions);
            }
            DeviceSignal::Resume => {
                self.state = DeviceState::Active;
                actions.push(DeviceAction::Reply {
                    signal: completion,
                    seq_nr,
                    result: ResultCode::NoError,
                });
                actions.push(DeviceAction::CommandChildren {
                    signal: DeviceSignal::Resume,
                });
                actions.push(DeviceAction::StartQualityTimer);
            }
            DeviceSignal::Suspend => {
                self.state = DeviceState::Suspended;
                actions.push(DeviceAction::Reply {
                    signal: completion,
                    seq_nr,
                    result: ResultCode::NoError,
                });
                actions.push(DeviceAction::CommandChildren {
                    signal: DeviceSignal::Suspend,
                });
                actions.push(DeviceAction::CancelQualityTimer);
            }
            DeviceSignal::Release => {
                let was_active = self.state == DeviceState::Active;
                self.state = DeviceState::Releasing;
                self.pending_reply = Some(seq_nr);
                if was_active {
                    actions.push(DeviceAction::CancelQualityTimer);
                }
                actions.push(DeviceAction::CommandChildren {
                    signal: DeviceSignal::Release,
                });
                self.try_complete(actions);
            }
            _ => {}
        }
    }

    fn on_child_report(
        &mut self,
        child: String,
        signal: DeviceSignal,
        result: ResultCode,
        actions: &mut Vec<DeviceAction>,
    ) {
        if !self.children.contains(&child) {
            warn!(device = %self.name, %child, "report from unknown child");
            return;
        }
        let Some(implied) = signal.reported_state() else {
            warn!(device = %self.name, %child, signal = ?signal, "report implies no state; dropped");
            return;
        };
        if !result_reflects_state(result) {
            debug!(
                device = %self.name,
                %child,
                signal = ?signal,
                result = ?result,
                "child refused command"
            );
            return;
        }

        self.children.record_state(&child, implied);
        if let Some(next) = self.ladder_command(implied) {
            actions.push(DeviceAction::CommandChild {
                child,
                signal: next,
            });
        }
        self.try_complete(actions);
    }

    fn on_quality_tick(&mut self, actions: &mut Vec<DeviceAction>) {
        if self.state != DeviceState::Active {
            // Tick raced a suspend; nothing to sample.
            return;
        }
        let quality = self.control.quality();
        if self.config.quality_threshold > 0.0 && quality < self.config.quality_threshold {
            warn!(
                device = %self.name,
                quality,
                threshold = self.config.quality_threshold,
                "quality below threshold; suspending"
            );
            self.state = DeviceState::Suspended;
            actions.push(DeviceAction::Notify {
                signal: DeviceSignal::Suspended,
                result: ResultCode::LowQuality,
            });
            actions.push(DeviceAction::CommandChildren {
                signal: DeviceSignal::Suspend,
            });
        } else {
            actions.push(DeviceAction::StartQualityTimer);
        }
    }

    /// First command for a child that just connected at `Idle`
    fn catch_up_command(&self) -> Option<DeviceSignal> {
        match self.state {
            DeviceState::Claiming
            | DeviceState::Claimed
            | DeviceState::Preparing
            | DeviceState::Suspended
            | DeviceState::Active => Some(DeviceSignal::Claim),
            _ => None,
        }
    }

    /// Next command for a child that just confirmed `child_state`
    fn ladder_command(&self, child_state: DeviceState) -> Option<DeviceSignal> {
        match (self.state, child_state) {
            (
                DeviceState::Preparing | DeviceState::Suspended | DeviceState::Active,
                DeviceState::Claimed,
            ) => Some(DeviceSignal::Prepare),
            (DeviceState::Active, DeviceState::Suspended) => Some(DeviceSignal::Resume),
            (DeviceState::Suspended, DeviceState::Active) => Some(DeviceSignal::Suspend),
            (
                DeviceState::Releasing,
                DeviceState::Claimed | DeviceState::Suspended | DeviceState::Active,
            ) => Some(DeviceSignal::Release),
            _ => None,
        }
    }

    /// Close the transitional state if the child quorum is in
    fn try_complete(&mut self, actions: &mut Vec<DeviceAction>) {
        let target = match self.state {
            DeviceState::Claiming => DeviceState::Claimed,
            DeviceState::Preparing => DeviceState::Suspended,
            DeviceState::Releasing => DeviceState::Idle,
            _ => return,
        };
        if !self.children.quorum_reached(target, self.config.quorum) {
            return;
        }

        match self.state {
            DeviceState::Claiming => {
                self.state = DeviceState::Claimed;
                self.finish(DeviceSignal::Claimed, actions);
            }
            DeviceState::Preparing => {
                self.state = DeviceState::Suspended;
                self.finish(DeviceSignal::Prepared, actions);
            }
            DeviceState::Releasing => match self.control.release_outcome() {
                ReleaseOutcome::Idle => {
                    self.state = DeviceState::Idle;
                    self.finish(DeviceSignal::Released, actions);
                }
                ReleaseOutcome::GoingDown => {
                    self.state = DeviceState::GoingDown;
                    self.finish(DeviceSignal::Released, actions);
                    actions.push(DeviceAction::Stop);
                }
            },
            _ => {}
        }
        debug!(device = %self.name, state = %self.state, "transition complete");
    }

    /// Emit the completion exactly once, as a reply when a command is
    /// pending and as a notification otherwise
    fn finish(&mut self, signal: DeviceSignal, actions: &mut Vec<DeviceAction>) {
        match self.pending_reply.take() {
            Some(seq_nr) => actions.push(DeviceAction::Reply {
                signal,
                seq_nr,
                result: ResultCode::NoError,
            }),
            None => actions.push(DeviceAction::Notify {
                signal,
                result: ResultCode::NoError,
            }),
        }
    }
}

/// Does this result code report a state the child actually reached?
///
/// `LowQuality` accompanies a real self-suspend; refusal codes do not
/// move the child.
fn result_reflects_state(result: ResultCode) -> bool {
    matches!(result, ResultCode::NoError | ResultCode::LowQuality)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestControl {
        refuse_claim: Option<ResultCode>,
        quality: f64,
        outcome: ReleaseOutcome,
        claims: usize,
    }

    impl Default for TestControl {
        fn default() -> Self {
            TestControl {
                refuse_claim: None,
                quality: 1.0,
                outcome: ReleaseOutcome::Idle,
                claims: 0,
            }
        }
    }

    impl DeviceControl for TestControl {
        fn on_claim(&mut self) -> ResultCode {
            self.claims += 1;
            self.refuse_claim.unwrap_or(ResultCode::NoError)
        }

        fn quality(&mut self) -> f64 {
            self.quality
        }

        fn release_outcome(&mut self) -> ReleaseOutcome {
            self.outcome
        }
    }

    fn leaf(control: TestControl, config: DeviceConfig) -> LogicalDevice<TestControl> {
        let mut device =
            LogicalDevice::new("leaf", config, control, ChildSet::new(Vec::<String>::new()));
        device.step(DeviceEvent::Started);
        device
    }

    fn parent(children: &[&str], quorum: f64) -> LogicalDevice<TestControl> {
        let config = DeviceConfig {
            quorum,
            ..DeviceConfig::default()
        };
        let mut device = LogicalDevice::new(
            "parent",
            config,
            TestControl::default(),
            ChildSet::new(children.iter().copied()),
        );
        device.step(DeviceEvent::Started);
        for child in children {
            device.step(DeviceEvent::ChildUp {
                child: (*child).to_string(),
            });
        }
        device
    }

    fn command(signal: DeviceSignal, seq_nr: u16) -> DeviceEvent {
        DeviceEvent::Command { signal, seq_nr }
    }

    fn report(child: &str, signal: DeviceSignal) -> DeviceEvent {
        DeviceEvent::ChildReport {
            child: child.to_string(),
            signal,
            result: ResultCode::NoError,
        }
    }

    fn reply_in(actions: &[DeviceAction]) -> Option<(DeviceSignal, u16, ResultCode)> {
        actions.iter().find_map(|action| match action {
            DeviceAction::Reply {
                signal,
                seq_nr,
                result,
            } => Some((*signal, *seq_nr, *result)),
            _ => None,
        })
    }

    #[test]
    fn test_leaf_claim_completes_immediately() {
        let mut device = leaf(TestControl::default(), DeviceConfig::default());
        let actions = device.step(command(DeviceSignal::Claim, 7));

        assert_eq!(device.state(), DeviceState::Claimed);
        assert_eq!(
            reply_in(&actions),
            Some((DeviceSignal::Claimed, 7, ResultCode::NoError))
        );
        assert_eq!(device.control_mut().claims, 1);
    }

    #[test]
    fn test_refused_claim_stays_idle() {
        let control = TestControl {
            refuse_claim: Some(ResultCode::Busy),
            ..TestControl::default()
        };
        let mut device = leaf(control, DeviceConfig::default());
        let actions = device.step(command(DeviceSignal::Claim, 5));

        assert_eq!(device.state(), DeviceState::Idle);
        assert_eq!(
            actions,
            vec![DeviceAction::Reply {
                signal: DeviceSignal::Claimed,
                seq_nr: 5,
                result: ResultCode::Busy,
            }]
        );
    }

    #[test]
    fn test_command_invalid_in_state_dropped() {
        let mut device = leaf(TestControl::default(), DeviceConfig::default());
        let actions = device.step(command(DeviceSignal::Prepare, 1));
        assert!(actions.is_empty());
        assert_eq!(device.state(), DeviceState::Idle);

        device.step(command(DeviceSignal::Claim, 2));
        let actions = device.step(command(DeviceSignal::Claim, 3));
        assert!(actions.is_empty());
        assert_eq!(device.state(), DeviceState::Claimed);
    }

    #[test]
    fn test_claim_waits_for_full_quorum() {
        let mut device = parent(&["a", "b"], 1.0);

        let actions = device.step(command(DeviceSignal::Claim, 3));
        assert_eq!(device.state(), DeviceState::Claiming);
        assert!(actions.contains(&DeviceAction::CommandChildren {
            signal: DeviceSignal::Claim
        }));
        assert_eq!(reply_in(&actions), None);

        let actions = device.step(report("a", DeviceSignal::Claimed));
        assert_eq!(device.state(), DeviceState::Claiming);
        assert_eq!(reply_in(&actions), None);

        let actions = device.step(report("b", DeviceSignal::Claimed));
        assert_eq!(device.state(), DeviceState::Claimed);
        assert_eq!(
            reply_in(&actions),
            Some((DeviceSignal::Claimed, 3, ResultCode::NoError))
        );
    }

    #[test]
    fn test_partial_quorum_replies_exactly_once() {
        let mut device = parent(&["a", "b", "c"], 0.66);
        device.step(command(DeviceSignal::Claim, 8));

        let actions = device.step(report("a", DeviceSignal::Claimed));
        assert_eq!(reply_in(&actions), None);

        // ceil(0.66 * 3) = 2 children close the quorum
        let actions = device.step(report("b", DeviceSignal::Claimed));
        assert_eq!(device.state(), DeviceState::Claimed);
        assert_eq!(
            reply_in(&actions),
            Some((DeviceSignal::Claimed, 8, ResultCode::NoError))
        );

        // the straggler must not trigger a second reply
        let actions = device.step(report("c", DeviceSignal::Claimed));
        assert_eq!(reply_in(&actions), None);
        assert!(!actions
            .iter()
            .any(|a| matches!(a, DeviceAction::Notify { .. })));
    }

    #[test]
    fn test_refusing_child_does_not_count() {
        let mut device = parent(&["a"], 1.0);
        device.step(command(DeviceSignal::Claim, 4));

        let actions = device.step(DeviceEvent::ChildReport {
            child: "a".to_string(),
            signal: DeviceSignal::Claimed,
            result: ResultCode::Busy,
        });
        assert_eq!(device.state(), DeviceState::Claiming);
        assert!(actions.is_empty());

        let actions = device.step(report("a", DeviceSignal::Claimed));
        assert_eq!(device.state(), DeviceState::Claimed);
        assert_eq!(
            reply_in(&actions),
            Some((DeviceSignal::Claimed, 4, ResultCode::NoError))
        );
    }

    #[test]
    fn test_full_ladder_to_active_and_back() {
        let mut device = parent(&["a"], 1.0);

        device.step(command(DeviceSignal::Claim, 1));
        device.step(report("a", DeviceSignal::Claimed));
        assert_eq!(device.state(), DeviceState::Claimed);

        let actions = device.step(command(DeviceSignal::Prepare, 2));
        assert_eq!(device.state(), DeviceState::Preparing);
        assert!(actions.contains(&DeviceAction::CommandChildren {
            signal: DeviceSignal::Prepare
        }));

        let actions = device.step(report("a", DeviceSignal::Prepared));
        assert_eq!(device.state(), DeviceState::Suspended);
        assert_eq!(
            reply_in(&actions),
            Some((DeviceSignal::Prepared, 2, ResultCode::NoError))
        );

        let actions = device.step(command(DeviceSignal::Resume, 3));
        assert_eq!(device.state(), DeviceState::Active);
        assert_eq!(
            reply_in(&actions),
            Some((DeviceSignal::Resumed, 3, ResultCode::NoError))
        );
        assert!(actions.contains(&DeviceAction::StartQualityTimer));

        let actions = device.step(command(DeviceSignal::Suspend, 4));
        assert_eq!(device.state(), DeviceState::Suspended);
        assert_eq!(
            reply_in(&actions),
            Some((DeviceSignal::Suspended, 4, ResultCode::NoError))
        );
        assert!(actions.contains(&DeviceAction::CancelQualityTimer));
    }

    #[test]
    fn test_child_reconnect_walks_the_ladder() {
        let mut device = parent(&["a"], 1.0);
        device.step(command(DeviceSignal::Claim, 1));
        device.step(report("a", DeviceSignal::Claimed));
        device.step(command(DeviceSignal::Prepare, 2));
        assert_eq!(device.state(), DeviceState::Preparing);

        let actions = device.step(DeviceEvent::ChildDown {
            child: "a".to_string(),
        });
        assert_eq!(device.state(), DeviceState::Preparing);
        assert!(actions.is_empty());

        let actions = device.step(DeviceEvent::ChildUp {
            child: "a".to_string(),
        });
        assert_eq!(
            actions,
            vec![DeviceAction::CommandChild {
                child: "a".to_string(),
                signal: DeviceSignal::Claim,
            }]
        );

        let actions = device.step(report("a", DeviceSignal::Claimed));
        assert_eq!(
            actions,
            vec![DeviceAction::CommandChild {
                child: "a".to_string(),
                signal: DeviceSignal::Prepare,
            }]
        );

        let actions = device.step(report("a", DeviceSignal::Prepared));
        assert_eq!(device.state(), DeviceState::Suspended);
        assert_eq!(
            reply_in(&actions),
            Some((DeviceSignal::Prepared, 2, ResultCode::NoError))
        );
    }

    #[test]
    fn test_low_quality_suspends() {
        let control = TestControl {
            quality: 0.2,
            ..TestControl::default()
        };
        let config = DeviceConfig {
            quality_threshold: 0.5,
            ..DeviceConfig::default()
        };
        let mut device = leaf(control, config);
        device.step(command(DeviceSignal::Claim, 1));
        device.step(command(DeviceSignal::Prepare, 2));
        device.step(command(DeviceSignal::Resume, 3));
        assert_eq!(device.state(), DeviceState::Active);

        let actions = device.step(DeviceEvent::QualityTick);
        assert_eq!(device.state(), DeviceState::Suspended);
        assert!(actions.contains(&DeviceAction::Notify {
            signal: DeviceSignal::Suspended,
            result: ResultCode::LowQuality,
        }));
        assert!(actions.contains(&DeviceAction::CommandChildren {
            signal: DeviceSignal::Suspend
        }));

        // a later resume is allowed once conditions recover
        device.control_mut().quality = 0.9;
        let actions = device.step(command(DeviceSignal::Resume, 4));
        assert_eq!(device.state(), DeviceState::Active);
        assert_eq!(
            reply_in(&actions),
            Some((DeviceSignal::Resumed, 4, ResultCode::NoError))
        );
    }

    #[test]
    fn test_good_quality_rearms_timer() {
        let config = DeviceConfig {
            quality_threshold: 0.5,
            ..DeviceConfig::default()
        };
        let mut device = leaf(TestControl::default(), config);
        device.step(command(DeviceSignal::Claim, 1));
        device.step(command(DeviceSignal::Prepare, 2));
        device.step(command(DeviceSignal::Resume, 3));

        let actions = device.step(DeviceEvent::QualityTick);
        assert_eq!(actions, vec![DeviceAction::StartQualityTimer]);
        assert_eq!(device.state(), DeviceState::Active);
    }

    #[test]
    fn test_stale_quality_tick_ignored() {
        let config = DeviceConfig {
            quality_threshold: 0.5,
            ..DeviceConfig::default()
        };
        let mut device = leaf(TestControl::default(), config);
        device.step(command(DeviceSignal::Claim, 1));
        device.step(command(DeviceSignal::Prepare, 2));
        device.step(command(DeviceSignal::Resume, 3));
        device.step(command(DeviceSignal::Suspend, 4));

        let actions = device.step(DeviceEvent::QualityTick);
        assert!(actions.is_empty());
        assert_eq!(device.state(), DeviceState::Suspended);
    }

    #[test]
    fn test_release_returns_to_idle_and_can_reclaim() {
        let mut device = leaf(TestControl::default(), DeviceConfig::default());
        device.step(command(DeviceSignal::Claim, 1));

        let actions = device.step(command(DeviceSignal::Release, 2));
        assert_eq!(device.state(), DeviceState::Idle);
        assert_eq!(
            reply_in(&actions),
            Some((DeviceSignal::Released, 2, ResultCode::NoError))
        );

        device.step(command(DeviceSignal::Claim, 3));
        assert_eq!(device.state(), DeviceState::Claimed);
    }

    #[test]
    fn test_release_going_down_stops_task() {
        let control = TestControl {
            outcome: ReleaseOutcome::GoingDown,
            ..TestControl::default()
        };
        let mut device = leaf(control, DeviceConfig::default());
        device.step(command(DeviceSignal::Claim, 1));

        let actions = device.step(command(DeviceSignal::Release, 2));
        assert_eq!(device.state(), DeviceState::GoingDown);
        assert_eq!(
            reply_in(&actions),
            Some((DeviceSignal::Released, 2, ResultCode::NoError))
        );
        assert!(actions.contains(&DeviceAction::Stop));

        let actions = device.step(command(DeviceSignal::Claim, 3));
        assert!(actions.is_empty());
        assert_eq!(device.state(), DeviceState::GoingDown);
    }

    #[test]
    fn test_release_counts_departed_children_as_idle() {
        let mut device = parent(&["a", "b"], 1.0);
        device.step(command(DeviceSignal::Claim, 1));
        device.step(report("a", DeviceSignal::Claimed));
        device.step(report("b", DeviceSignal::Claimed));

        device.step(command(DeviceSignal::Release, 2));
        assert_eq!(device.state(), DeviceState::Releasing);

        let actions = device.step(report("a", DeviceSignal::Released));
        assert_eq!(device.state(), DeviceState::Releasing);
        assert_eq!(reply_in(&actions), None);

        // b vanishes instead of confirming; its session state is gone
        let actions = device.step(DeviceEvent::ChildDown {
            child: "b".to_string(),
        });
        assert_eq!(device.state(), DeviceState::Idle);
        assert_eq!(
            reply_in(&actions),
            Some((DeviceSignal::Released, 2, ResultCode::NoError))
        );
    }

    #[test]
    fn test_release_pushes_straggler_children_down() {
        let mut device = parent(&["a", "b", "c"], 0.6);
        device.step(command(DeviceSignal::Claim, 1));
        device.step(report("a", DeviceSignal::Claimed));
        device.step(report("b", DeviceSignal::Claimed));
        assert_eq!(device.state(), DeviceState::Claimed);

        device.step(command(DeviceSignal::Release, 2));
        assert_eq!(device.state(), DeviceState::Releasing);

        // c reports its late claim mid-release and is sent back down
        let actions = device.step(report("c", DeviceSignal::Claimed));
        assert!(actions.contains(&DeviceAction::CommandChild {
            child: "c".to_string(),
            signal: DeviceSignal::Release,
        }));

        device.step(report("c", DeviceSignal::Released));
        assert_eq!(device.state(), DeviceState::Releasing);
        let actions = device.step(report("a", DeviceSignal::Released));
        assert_eq!(device.state(), DeviceState::Idle);
        assert_eq!(
            reply_in(&actions),
            Some((DeviceSignal::Released, 2, ResultCode::NoError))
        );
    }
}
