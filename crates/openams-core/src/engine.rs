//! Reconciliation engine
//!
//! Drives the provisioning state machine: scan the bus, record discovered
//! node identifiers, write them into the host configuration once both boards
//! are known, and restart the downstream motion-controller service exactly
//! once per successful completion. Transient conditions (quiet bus, scan
//! hiccups) are absorbed here and never surface as operator-visible errors.

use std::time::Duration;

use crate::board::{BoardKind, CanNode};
use crate::error::{Error, Result};
use crate::prompt::Prompter;
use crate::state::{Phase, ProvisioningState};

/// Bus scanner seam
///
/// A quiet bus is an empty vec, not an error.
pub trait BusScan {
    fn scan(&mut self, timeout: Duration) -> Result<Vec<CanNode>>;
}

/// Config writer seam
pub trait ConfigSink {
    fn write_uuids(&mut self, fps_uuid: &str, mainboard_uuid: &str) -> Result<()>;
}

/// Downstream service control seam
pub trait ServiceControl {
    fn restart(&mut self) -> Result<()>;
}

/// What to do when a recorded board disappears and a different board of the
/// same kind shows up in its place
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SwapPolicy {
    /// Adopt the replacement identifier without asking
    Overwrite,
    /// Ask the operator; an unanswered prompt leaves things as they are
    Confirm,
    /// Log the replacement and keep the recorded identifier
    #[default]
    Ignore,
}

/// Engine tuning knobs
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// How long each bus scan listens for responses
    pub scan_timeout: Duration,
    /// Delay between one-shot retry attempts
    pub poll_interval: Duration,
    pub swap_policy: SwapPolicy,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_secs(2),
            swap_policy: SwapPolicy::default(),
        }
    }
}

/// The reconciliation engine proper
///
/// Owns the [`ProvisioningState`] value threaded through every cycle; the
/// caller decides how often to cycle (bounded one-shot or daemon loop) and
/// when to persist the state.
pub struct Engine<'a> {
    scanner: &'a mut dyn BusScan,
    sink: &'a mut dyn ConfigSink,
    service: &'a mut dyn ServiceControl,
    prompter: &'a mut dyn Prompter,
    options: EngineOptions,
    state: ProvisioningState,
    /// Set after ConfigUnwritable: stop touching the file, keep polling
    config_blocked: bool,
}

impl<'a> Engine<'a> {
    pub fn new(
        scanner: &'a mut dyn BusScan,
        sink: &'a mut dyn ConfigSink,
        service: &'a mut dyn ServiceControl,
        prompter: &'a mut dyn Prompter,
        options: EngineOptions,
        state: ProvisioningState,
    ) -> Self {
        Self {
            scanner,
            sink,
            service,
            prompter,
            options,
            state,
            config_blocked: false,
        }
    }

    pub fn state(&self) -> &ProvisioningState {
        &self.state
    }

    /// Take the state back out, e.g. to persist it between daemon cycles
    pub fn into_state(self) -> ProvisioningState {
        self.state
    }

    /// Whether a ConfigUnwritable error has stopped the writer
    pub fn config_blocked(&self) -> bool {
        self.config_blocked
    }

    /// Run one reconciliation cycle
    ///
    /// Never fails: every error is absorbed into `last_error` and the same
    /// phase is re-entered on the next cycle. Returns the phase after the
    /// cycle.
    pub fn poll_once(&mut self) -> Phase {
        self.state.attempt_count += 1;

        let nodes = match self.scanner.scan(self.options.scan_timeout) {
            Ok(nodes) => nodes,
            Err(e) => {
                log::warn!("bus scan failed: {}", e);
                self.state.last_error = Some(e.to_string());
                return self.state.phase();
            }
        };

        if self.state.phase() == Phase::ConfigWritten {
            self.health_check(&nodes);
        }

        for node in &nodes {
            if let Some(kind) = self.state.record_node(node) {
                log::info!("{} node discovered: canbus_uuid={}", kind, node.uuid);
            }
        }

        if self.state.phase() == Phase::BothPresent {
            self.try_write_config();
        }

        self.state.phase()
    }

    /// Run cycles until the terminal phase or the attempt budget runs out
    ///
    /// An unwritable configuration ends the run at once: no amount of
    /// rescanning fixes the file, so the remaining attempts are not spent.
    pub fn run_to_completion(&mut self, max_attempts: u32) -> Phase {
        for attempt in 0..max_attempts {
            if attempt > 0 {
                std::thread::sleep(self.options.poll_interval);
            }
            let phase = self.poll_once();
            log::debug!("attempt {}: {}", attempt + 1, phase);
            if phase == Phase::ConfigWritten {
                return phase;
            }
            if self.config_blocked {
                break;
            }
        }
        self.state.phase()
    }

    fn try_write_config(&mut self) {
        if self.config_blocked {
            log::debug!("config writer blocked by earlier error, still polling");
            return;
        }
        // Both slots are guaranteed set in BothPresent
        let fps = self.state.fps_uuid.clone().unwrap_or_default();
        let mainboard = self.state.mainboard_uuid.clone().unwrap_or_default();
        match self.sink.write_uuids(&fps, &mainboard) {
            Ok(()) => {
                self.state.config_written = true;
                self.state.last_error = None;
                // Exactly one restart per transition into ConfigWritten
                if let Err(e) = self.service.restart() {
                    log::error!("motion-controller restart failed: {}", e);
                    self.state.last_error = Some(e.to_string());
                }
            }
            Err(e @ Error::ConfigUnwritable(_)) => {
                log::error!("{}", e);
                self.state.last_error = Some(e.to_string());
                self.config_blocked = true;
            }
            Err(e) => {
                // Write is idempotent, retrying next cycle is safe
                log::warn!("config write failed, will retry: {}", e);
                self.state.last_error = Some(e.to_string());
            }
        }
    }

    /// Detect recorded boards that vanished from the bus
    ///
    /// An empty scan proves nothing (the bus may just have been quiet for
    /// this window) and changes nothing. With a non-empty scan, a recorded
    /// identifier that no longer answers either regresses the state (board
    /// unplugged) or, when a different board of the same kind answers
    /// instead, is handled per the configured swap policy.
    fn health_check(&mut self, nodes: &[CanNode]) {
        if nodes.is_empty() {
            return;
        }
        for kind in [BoardKind::Fps, BoardKind::Mainboard] {
            let Some(recorded) = self.state.uuid_for(kind).map(str::to_string) else {
                continue;
            };
            if nodes.iter().any(|n| n.uuid == recorded) {
                continue;
            }
            let replacement = nodes
                .iter()
                .find(|n| n.kind == Some(kind) && n.uuid != recorded)
                .cloned();
            match replacement {
                Some(node) => self.handle_swap(kind, &recorded, &node),
                None => {
                    log::warn!(
                        "{} node {} no longer answers, regressing to rediscovery",
                        kind,
                        recorded
                    );
                    self.state.forget(kind);
                }
            }
        }
    }

    fn handle_swap(&mut self, kind: BoardKind, recorded: &str, node: &CanNode) {
        let adopt = match self.options.swap_policy {
            SwapPolicy::Overwrite => true,
            SwapPolicy::Confirm => self
                .prompter
                .confirm(&format!(
                    "{} board changed from {} to {}; adopt the new board?",
                    kind, recorded, node.uuid
                ))
                .unwrap_or(false),
            SwapPolicy::Ignore => false,
        };
        if adopt {
            log::warn!("{} board swapped: {} -> {}", kind, recorded, node.uuid);
            self.state.forget(kind);
            self.state.record_node(node);
        } else {
            log::warn!(
                "{} board {} replaced by {} on the bus; keeping recorded identifier",
                kind,
                recorded,
                node.uuid
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::NonInteractive;
    use std::cell::{Cell, RefCell};

    /// Scanner that replays a scripted sequence of scan results
    struct ScriptedBus {
        script: Vec<Result<Vec<CanNode>>>,
        cursor: usize,
    }

    impl ScriptedBus {
        fn new(script: Vec<Result<Vec<CanNode>>>) -> Self {
            Self { script, cursor: 0 }
        }
    }

    impl BusScan for ScriptedBus {
        fn scan(&mut self, _timeout: Duration) -> Result<Vec<CanNode>> {
            let i = self.cursor.min(self.script.len().saturating_sub(1));
            self.cursor += 1;
            match &self.script[i] {
                Ok(nodes) => Ok(nodes.clone()),
                Err(_) => Err(Error::Bus("scripted failure".into())),
            }
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        writes: RefCell<Vec<(String, String)>>,
        fail_next: Cell<bool>,
        unwritable: Cell<bool>,
    }

    impl ConfigSink for &RecordingSink {
        fn write_uuids(&mut self, fps: &str, mainboard: &str) -> Result<()> {
            if self.unwritable.get() {
                return Err(Error::ConfigUnwritable("read-only filesystem".into()));
            }
            if self.fail_next.get() {
                self.fail_next.set(false);
                return Err(Error::Io(std::io::Error::other("disk hiccup")));
            }
            self.writes
                .borrow_mut()
                .push((fps.to_string(), mainboard.to_string()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingService {
        restarts: Cell<u32>,
    }

    impl ServiceControl for &CountingService {
        fn restart(&mut self) -> Result<()> {
            self.restarts.set(self.restarts.get() + 1);
            Ok(())
        }
    }

    fn fps(uuid: &str) -> CanNode {
        CanNode::new(uuid, Some(BoardKind::Fps))
    }

    fn mainboard(uuid: &str) -> CanNode {
        CanNode::new(uuid, Some(BoardKind::Mainboard))
    }

    fn options() -> EngineOptions {
        EngineOptions {
            scan_timeout: Duration::ZERO,
            poll_interval: Duration::ZERO,
            swap_policy: SwapPolicy::default(),
        }
    }

    #[test]
    fn empty_scan_is_not_an_error_and_does_not_transition() {
        let mut bus = ScriptedBus::new(vec![Ok(vec![])]);
        let sink = RecordingSink::default();
        let mut sink_ref = &sink;
        let service = CountingService::default();
        let mut service_ref = &service;
        let mut prompter = NonInteractive;
        let mut engine = Engine::new(
            &mut bus,
            &mut sink_ref,
            &mut service_ref,
            &mut prompter,
            options(),
            ProvisioningState::default(),
        );

        assert_eq!(engine.poll_once(), Phase::AwaitingFps);
        assert_eq!(engine.poll_once(), Phase::AwaitingFps);
        assert!(engine.state().last_error.is_none());
        assert!(sink.writes.borrow().is_empty());
    }

    #[test]
    fn nodes_appearing_across_polls_reach_config_written() {
        // Scenario: FPS answers first, the mainboard only in a later poll
        let mut bus = ScriptedBus::new(vec![
            Ok(vec![fps("FPS-ABC123")]),
            Ok(vec![]),
            Ok(vec![fps("FPS-ABC123"), mainboard("MB-XYZ789")]),
        ]);
        let sink = RecordingSink::default();
        let mut sink_ref = &sink;
        let service = CountingService::default();
        let mut service_ref = &service;
        let mut prompter = NonInteractive;
        let mut engine = Engine::new(
            &mut bus,
            &mut sink_ref,
            &mut service_ref,
            &mut prompter,
            options(),
            ProvisioningState::default(),
        );

        assert_eq!(engine.poll_once(), Phase::AwaitingMainboard);
        assert_eq!(engine.poll_once(), Phase::AwaitingMainboard);
        assert_eq!(engine.poll_once(), Phase::ConfigWritten);

        assert_eq!(
            *sink.writes.borrow(),
            vec![("FPS-ABC123".into(), "MB-XYZ789".into())]
        );
        assert_eq!(service.restarts.get(), 1);

        // Further polls neither rewrite nor restart again
        assert_eq!(engine.poll_once(), Phase::ConfigWritten);
        assert_eq!(sink.writes.borrow().len(), 1);
        assert_eq!(service.restarts.get(), 1);
    }

    #[test]
    fn phase_is_monotonic_for_any_scan_sequence() {
        let mut bus = ScriptedBus::new(vec![
            Ok(vec![mainboard("MB-1")]),
            Err(Error::Bus("x".into())),
            Ok(vec![]),
            Ok(vec![fps("FPS-1")]),
            Ok(vec![]),
            Ok(vec![fps("FPS-1"), mainboard("MB-1")]),
        ]);
        let sink = RecordingSink::default();
        let mut sink_ref = &sink;
        let service = CountingService::default();
        let mut service_ref = &service;
        let mut prompter = NonInteractive;
        let mut engine = Engine::new(
            &mut bus,
            &mut sink_ref,
            &mut service_ref,
            &mut prompter,
            options(),
            ProvisioningState::default(),
        );

        let mut last = Phase::AwaitingFps;
        for _ in 0..6 {
            let phase = engine.poll_once();
            assert!(phase >= last, "phase regressed: {} < {}", phase, last);
            last = phase;
        }
        assert_eq!(last, Phase::ConfigWritten);
    }

    #[test]
    fn transient_write_failure_retries_next_cycle() {
        let both = vec![fps("FPS-1"), mainboard("MB-1")];
        let mut bus = ScriptedBus::new(vec![Ok(both.clone()), Ok(both)]);
        let sink = RecordingSink {
            fail_next: Cell::new(true),
            ..Default::default()
        };
        let mut sink_ref = &sink;
        let service = CountingService::default();
        let mut service_ref = &service;
        let mut prompter = NonInteractive;
        let mut engine = Engine::new(
            &mut bus,
            &mut sink_ref,
            &mut service_ref,
            &mut prompter,
            options(),
            ProvisioningState::default(),
        );

        assert_eq!(engine.poll_once(), Phase::BothPresent);
        assert!(engine.state().last_error.is_some());
        assert_eq!(service.restarts.get(), 0);

        assert_eq!(engine.poll_once(), Phase::ConfigWritten);
        assert_eq!(sink.writes.borrow().len(), 1);
        assert_eq!(service.restarts.get(), 1);
    }

    #[test]
    fn config_unwritable_stops_the_writer_but_not_polling() {
        let both = vec![fps("FPS-1"), mainboard("MB-1")];
        let mut bus = ScriptedBus::new(vec![Ok(both.clone()), Ok(both)]);
        let sink = RecordingSink {
            unwritable: Cell::new(true),
            ..Default::default()
        };
        let mut sink_ref = &sink;
        let service = CountingService::default();
        let mut service_ref = &service;
        let mut prompter = NonInteractive;
        let mut engine = Engine::new(
            &mut bus,
            &mut sink_ref,
            &mut service_ref,
            &mut prompter,
            options(),
            ProvisioningState::default(),
        );

        assert_eq!(engine.poll_once(), Phase::BothPresent);
        assert!(engine.config_blocked());

        // Polling continues, writes do not
        sink.unwritable.set(false);
        assert_eq!(engine.poll_once(), Phase::BothPresent);
        assert!(sink.writes.borrow().is_empty());
    }

    #[test]
    fn disappeared_node_regresses_only_on_nonempty_scan() {
        let both = vec![fps("FPS-1"), mainboard("MB-1")];
        let mut bus = ScriptedBus::new(vec![
            Ok(both.clone()),
            Ok(vec![]),                // quiet bus: no regression
            Ok(vec![mainboard("MB-1")]), // FPS gone while mainboard answers
        ]);
        let sink = RecordingSink::default();
        let mut sink_ref = &sink;
        let service = CountingService::default();
        let mut service_ref = &service;
        let mut prompter = NonInteractive;
        let mut engine = Engine::new(
            &mut bus,
            &mut sink_ref,
            &mut service_ref,
            &mut prompter,
            options(),
            ProvisioningState::default(),
        );

        assert_eq!(engine.poll_once(), Phase::ConfigWritten);
        assert_eq!(engine.poll_once(), Phase::ConfigWritten);
        assert_eq!(engine.poll_once(), Phase::AwaitingFps);
    }

    #[test]
    fn completing_again_after_regression_restarts_again() {
        let both = vec![fps("FPS-1"), mainboard("MB-1")];
        let mut bus = ScriptedBus::new(vec![
            Ok(both.clone()),
            Ok(vec![mainboard("MB-1")]),
            Ok(both),
        ]);
        let sink = RecordingSink::default();
        let mut sink_ref = &sink;
        let service = CountingService::default();
        let mut service_ref = &service;
        let mut prompter = NonInteractive;
        let mut engine = Engine::new(
            &mut bus,
            &mut sink_ref,
            &mut service_ref,
            &mut prompter,
            options(),
            ProvisioningState::default(),
        );

        assert_eq!(engine.poll_once(), Phase::ConfigWritten);
        assert_eq!(engine.poll_once(), Phase::AwaitingFps);
        assert_eq!(engine.poll_once(), Phase::ConfigWritten);
        assert_eq!(service.restarts.get(), 2);
    }

    #[test]
    fn swap_policy_ignore_keeps_recorded_identifier() {
        let mut bus = ScriptedBus::new(vec![
            Ok(vec![fps("FPS-1"), mainboard("MB-1")]),
            Ok(vec![fps("FPS-2"), mainboard("MB-1")]),
        ]);
        let sink = RecordingSink::default();
        let mut sink_ref = &sink;
        let service = CountingService::default();
        let mut service_ref = &service;
        let mut prompter = NonInteractive;
        let mut engine = Engine::new(
            &mut bus,
            &mut sink_ref,
            &mut service_ref,
            &mut prompter,
            options(),
            ProvisioningState::default(),
        );

        assert_eq!(engine.poll_once(), Phase::ConfigWritten);
        assert_eq!(engine.poll_once(), Phase::ConfigWritten);
        assert_eq!(engine.state().fps_uuid.as_deref(), Some("FPS-1"));
    }

    #[test]
    fn swap_policy_overwrite_adopts_replacement() {
        let mut bus = ScriptedBus::new(vec![
            Ok(vec![fps("FPS-1"), mainboard("MB-1")]),
            Ok(vec![fps("FPS-2"), mainboard("MB-1")]),
            Ok(vec![fps("FPS-2"), mainboard("MB-1")]),
        ]);
        let sink = RecordingSink::default();
        let mut sink_ref = &sink;
        let service = CountingService::default();
        let mut service_ref = &service;
        let mut prompter = NonInteractive;
        let mut engine = Engine::new(
            &mut bus,
            &mut sink_ref,
            &mut service_ref,
            &mut prompter,
            EngineOptions {
                swap_policy: SwapPolicy::Overwrite,
                ..options()
            },
            ProvisioningState::default(),
        );

        assert_eq!(engine.poll_once(), Phase::ConfigWritten);
        // Swap regresses the written flag, then the new identifier is
        // recorded in the same cycle and the config rewritten
        engine.poll_once();
        assert_eq!(engine.state().fps_uuid.as_deref(), Some("FPS-2"));
        assert_eq!(engine.poll_once(), Phase::ConfigWritten);
        assert_eq!(sink.writes.borrow().last().unwrap().0, "FPS-2");
        assert_eq!(service.restarts.get(), 2);
    }

    #[test]
    fn run_to_completion_reports_final_phase() {
        let mut bus = ScriptedBus::new(vec![Ok(vec![])]);
        let sink = RecordingSink::default();
        let mut sink_ref = &sink;
        let service = CountingService::default();
        let mut service_ref = &service;
        let mut prompter = NonInteractive;
        let mut engine = Engine::new(
            &mut bus,
            &mut sink_ref,
            &mut service_ref,
            &mut prompter,
            options(),
            ProvisioningState::default(),
        );

        assert_eq!(engine.run_to_completion(3), Phase::AwaitingFps);
        assert_eq!(engine.state().attempt_count, 3);
    }

    #[test]
    fn run_to_completion_gives_up_once_config_is_unwritable() {
        let both = vec![fps("FPS-1"), mainboard("MB-1")];
        let mut bus = ScriptedBus::new(vec![Ok(both)]);
        let sink = RecordingSink {
            unwritable: Cell::new(true),
            ..Default::default()
        };
        let mut sink_ref = &sink;
        let service = CountingService::default();
        let mut service_ref = &service;
        let mut prompter = NonInteractive;
        let mut engine = Engine::new(
            &mut bus,
            &mut sink_ref,
            &mut service_ref,
            &mut prompter,
            options(),
            ProvisioningState::default(),
        );

        assert_eq!(engine.run_to_completion(10), Phase::BothPresent);
        // The fatal write error ends the run on the first attempt
        assert_eq!(engine.state().attempt_count, 1);
        assert!(engine.config_blocked());
        assert!(engine.state().last_error.is_some());
    }
}
