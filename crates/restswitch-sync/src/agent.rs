//! # Shadow Sync Loop
//!
//! Main orchestrator: polls the transport, reacts to deltas and pulse
//! commands, and sends the pending echo.
//!
//! ## Loop Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        ShadowSyncLoop                                   │
//! │                                                                         │
//! │  step():                                                                │
//! │    1. transport.poll(200ms, &mut engine)                                │
//! │         on_delta   ─► PendingEcho.store ─► DeltaDecoder ─► write outputs│
//! │         on_message ─► PulseDecoder ─► pulse each bit                    │
//! │         on_update_ack ─► log + count                                    │
//! │    2. status: Success / Reconnected ─► Idle                             │
//! │               Reconnecting          ─► Reconnecting (no send)           │
//! │               Fatal(code)           ─► Fatal (loop ends)                │
//! │    3. Idle with a pending echo ─► send_report, flag cleared on dispatch │
//! │                                                                         │
//! │  STATE MACHINE                                                          │
//! │  ─────────────                                                          │
//! │        ┌──────┐  reconnecting  ┌──────────────┐                         │
//! │   ───► │ Idle │ ─────────────► │ Reconnecting │                         │
//! │        └──┬───┘ ◄───────────── └──────┬───────┘                         │
//! │           │    success/reconnected    │                                 │
//! │           └────────────┬──────────────┘                                 │
//! │                        ▼ fatal status / send failure                    │
//! │                    ┌───────┐                                            │
//! │                    │ Fatal │                                            │
//! │                    └───────┘                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Decode and register failures are logged and the message is dropped.
//! Acknowledgements never block or retry anything.

use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use restswitch_core::{DeltaDecoder, PulseDecoder, ReportBuilder};

use crate::config::AgentConfig;
use crate::dispatch::{RegisterBus, RegisterDispatch};
use crate::error::{SyncError, SyncResult};
use crate::pending::PendingEcho;
use crate::transport::{AckStatus, InboundHandler, PollStatus, ShadowTransport};

// =============================================================================
// Loop State & Stats
// =============================================================================

/// State of the sync loop after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Reconnecting,
    Fatal(i32),
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopState::Idle => write!(f, "idle"),
            LoopState::Reconnecting => write!(f, "reconnecting"),
            LoopState::Fatal(code) => write!(f, "fatal({})", code),
        }
    }
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub deltas_received: u64,
    pub decode_failures: u64,
    pub echoes_sent: u64,
    /// Echoes overwritten before sending or that did not fit the buffer.
    pub echoes_dropped: u64,
    pub pulses_dispatched: u64,
    pub pulse_failures: u64,
    pub register_failures: u64,
    pub acks_accepted: u64,
    pub acks_rejected: u64,
    pub acks_timed_out: u64,
}

// =============================================================================
// Shadow Engine
// =============================================================================

/// Reacts to inbound events. Owns the decoders, the echo slot and the
/// register dispatch; the transport calls into it during poll.
///
/// Input lines in a delta are decoded but never written to hardware.
pub struct ShadowEngine<R> {
    pulse_topic: String,
    deltas: DeltaDecoder,
    pulses: PulseDecoder,
    reports: ReportBuilder,
    pending: PendingEcho,
    dispatch: RegisterDispatch<R>,
    stats: SyncStats,
}

impl<R: RegisterBus> ShadowEngine<R> {
    pub fn new(config: &AgentConfig, thing_name: &str, bus: R) -> Self {
        ShadowEngine {
            pulse_topic: config.pulse_topic(thing_name),
            deltas: DeltaDecoder::with_capacity(config.engine.delta_token_capacity),
            pulses: PulseDecoder::with_capacity(config.engine.pulse_token_capacity),
            reports: ReportBuilder::new(thing_name),
            pending: PendingEcho::with_capacity(config.engine.echo_capacity),
            dispatch: RegisterDispatch::new(
                bus,
                config.hardware.output_register,
                config.pulse_duration(),
            ),
            stats: SyncStats::default(),
        }
    }

    pub fn has_pending_echo(&self) -> bool {
        self.pending.is_pending()
    }
}

impl<R: RegisterBus> InboundHandler for ShadowEngine<R> {
    fn on_delta(&mut self, payload: &[u8]) {
        self.stats.deltas_received += 1;
        debug!(payload = %String::from_utf8_lossy(payload), "Received delta");

        // The echo goes out even if the delta does not translate.
        let had_pending = self.pending.is_pending();
        match self.pending.store(&mut self.reports, payload) {
            Ok(true) => {
                warn!("Unsent echo replaced by newer delta");
                self.stats.echoes_dropped += 1;
            }
            Ok(false) => {}
            Err(e) => {
                error!(error = %e, "Failed to build echo report");
                self.stats.echoes_dropped += 1 + u64::from(had_pending);
            }
        }

        let delta = match self.deltas.decode(payload) {
            Ok(delta) => delta,
            Err(e) => {
                if e.is_payload_error() {
                    error!(error = %e, "Failed to decode delta");
                } else {
                    error!(error = %e, "Delta exceeds engine.delta_token_capacity");
                }
                self.stats.decode_failures += 1;
                return;
            }
        };

        if !delta.inputs.is_empty() {
            debug!(
                value = format_args!("{:#04x}", delta.inputs.value),
                mask = format_args!("{:#04x}", delta.inputs.mask),
                "Input lines in delta are not dispatched"
            );
        }

        if let Err(e) = self.dispatch.apply_outputs(&delta.outputs) {
            error!(error = %e, "Failed to write outputs");
            self.stats.register_failures += 1;
        }
    }

    fn on_message(&mut self, topic: &str, payload: &[u8]) {
        if topic != self.pulse_topic {
            debug!(%topic, "Ignoring message on unexpected topic");
            return;
        }
        debug!(%topic, payload = %String::from_utf8_lossy(payload), "Received pulse command");

        let request = match self.pulses.decode(payload) {
            Ok(request) => request,
            Err(e) => {
                if e.is_payload_error() {
                    error!(error = %e, "Failed to decode pulse command");
                } else {
                    error!(error = %e, "Pulse command exceeds engine.pulse_token_capacity");
                }
                self.stats.decode_failures += 1;
                return;
            }
        };

        let outcome = self.dispatch.pulse(request);
        self.stats.pulses_dispatched += u64::from(outcome.pulsed);
        self.stats.pulse_failures += u64::from(outcome.failed);
    }

    fn on_update_ack(&mut self, client_token: &str, status: AckStatus) {
        match status {
            AckStatus::Accepted => {
                info!(%client_token, "Update accepted");
                self.stats.acks_accepted += 1;
            }
            AckStatus::Rejected => {
                warn!(%client_token, "Update rejected");
                self.stats.acks_rejected += 1;
            }
            AckStatus::Timeout => {
                warn!(%client_token, "Update timed out");
                self.stats.acks_timed_out += 1;
            }
        }
    }
}

// =============================================================================
// Sync Loop
// =============================================================================

/// The poll-react-report loop for one thing.
pub struct ShadowSyncLoop<T, R> {
    thing_name: String,
    poll_timeout: Duration,
    transport: T,
    engine: ShadowEngine<R>,
    state: LoopState,
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl<T: ShadowTransport, R: RegisterBus> ShadowSyncLoop<T, R> {
    pub fn new(config: &AgentConfig, thing_name: impl Into<String>, transport: T, bus: R) -> Self {
        let thing_name = thing_name.into();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        ShadowSyncLoop {
            engine: ShadowEngine::new(config, &thing_name, bus),
            poll_timeout: config.poll_timeout(),
            thing_name,
            transport,
            state: LoopState::Idle,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Returns a handle that can stop [`run`](Self::run) from another task.
    pub fn handle(&self) -> SyncLoopHandle {
        SyncLoopHandle {
            shutdown_tx: self.shutdown_tx.clone(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> &SyncStats {
        &self.engine.stats
    }

    pub fn bus(&self) -> &R {
        self.engine.dispatch.bus()
    }

    pub fn has_pending_echo(&self) -> bool {
        self.engine.has_pending_echo()
    }

    /// Runs one poll-react-report iteration.
    pub async fn step(&mut self) -> LoopState {
        let status = self
            .transport
            .poll(self.poll_timeout, &mut self.engine)
            .await;

        let mut next = match status {
            PollStatus::Success | PollStatus::Reconnected => LoopState::Idle,
            PollStatus::Reconnecting => LoopState::Reconnecting,
            PollStatus::Fatal(code) => LoopState::Fatal(code),
        };

        if next == LoopState::Idle {
            if let Err(e) = self.send_pending().await {
                error!(error = %e, "Failed to send echo report");
                next = LoopState::Fatal(e.fatal_code());
            }
        }

        self.transition(next);
        next
    }

    /// Steps until shutdown is requested or the transport fails.
    pub async fn run(&mut self) -> SyncResult<()> {
        info!(thing_name = %self.thing_name, "Shadow sync loop starting");

        let result = loop {
            if self.shutdown_rx.try_recv().is_ok() {
                info!("Shadow sync loop received shutdown signal");
                break Ok(());
            }

            if let LoopState::Fatal(code) = self.step().await {
                break Err(SyncError::TransportFatal { code });
            }
        };

        self.transport.close().await;
        info!(stats = ?self.engine.stats, "Shadow sync loop stopped");
        result
    }

    async fn send_pending(&mut self) -> SyncResult<()> {
        let Some(report) = self.engine.pending.take() else {
            return Ok(());
        };

        debug!(client_token = %report.client_token, "Sending echo report");
        self.transport
            .send_report(&self.thing_name, &report)
            .await?;
        self.engine.stats.echoes_sent += 1;
        Ok(())
    }

    fn transition(&mut self, next: LoopState) {
        if next != self.state {
            info!(from = %self.state, to = %next, "Sync loop state changed");
            self.state = next;
        }
    }
}

// =============================================================================
// Loop Handle
// =============================================================================

/// Cloneable handle for stopping a running [`ShadowSyncLoop`].
#[derive(Clone)]
pub struct SyncLoopHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl SyncLoopHandle {
    /// Asks the loop to stop after its current iteration.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use restswitch_core::RegisterId;
    use std::collections::VecDeque;

    use crate::error::RegisterError;
    use crate::transport::EchoReport;

    // =========================================================================
    // Test Doubles
    // =========================================================================

    enum Event {
        Delta(&'static str),
        Message(&'static str, &'static str),
        Ack(&'static str, AckStatus),
    }

    /// Plays back one scripted poll per step, then reports success.
    #[derive(Default)]
    struct ScriptedTransport {
        script: VecDeque<(PollStatus, Vec<Event>)>,
        sent: Vec<(String, String, String)>,
        fail_send: bool,
        closed: bool,
    }

    impl ScriptedTransport {
        fn then(mut self, status: PollStatus, events: Vec<Event>) -> Self {
            self.script.push_back((status, events));
            self
        }
    }

    impl ShadowTransport for ScriptedTransport {
        async fn poll<H: InboundHandler>(&mut self, _timeout: Duration, handler: &mut H) -> PollStatus {
            let Some((status, events)) = self.script.pop_front() else {
                return PollStatus::Success;
            };
            for event in events {
                match event {
                    Event::Delta(payload) => handler.on_delta(payload.as_bytes()),
                    Event::Message(topic, payload) => handler.on_message(topic, payload.as_bytes()),
                    Event::Ack(token, ack) => handler.on_update_ack(token, ack),
                }
            }
            status
        }

        async fn send_report(&mut self, thing_name: &str, report: &EchoReport<'_>) -> SyncResult<()> {
            if self.fail_send {
                return Err(SyncError::ChannelError("closed".into()));
            }
            self.sent.push((
                thing_name.to_string(),
                report.client_token.to_string(),
                String::from_utf8_lossy(report.document).into_owned(),
            ));
            Ok(())
        }

        async fn close(&mut self) {
            self.closed = true;
        }
    }

    /// Records bus calls; rejects pulses on `reject_bits`.
    #[derive(Default)]
    struct RecordingBus {
        writes: Vec<(RegisterId, u8, u8)>,
        pulses: Vec<(RegisterId, u8, Duration)>,
        reject_bits: u8,
    }

    impl RegisterBus for RecordingBus {
        fn write_register(&mut self, register: RegisterId, value: u8, mask: u8) -> Result<(), RegisterError> {
            self.writes.push((register, value, mask));
            Ok(())
        }

        fn pulse_register_bit(
            &mut self,
            register: RegisterId,
            bit: u8,
            duration: Duration,
        ) -> Result<(), RegisterError> {
            if self.reject_bits & (1 << bit) != 0 {
                return Err(RegisterError::PulseRejected { register, bit });
            }
            self.pulses.push((register, bit, duration));
            Ok(())
        }
    }

    fn sync_loop(transport: ScriptedTransport) -> ShadowSyncLoop<ScriptedTransport, RecordingBus> {
        ShadowSyncLoop::new(&AgentConfig::default(), "dev", transport, RecordingBus::default())
    }

    // =========================================================================
    // Tests
    // =========================================================================

    #[tokio::test]
    async fn test_delta_writes_outputs_and_echoes() {
        let transport = ScriptedTransport::default()
            .then(PollStatus::Success, vec![Event::Delta(r#"{"o1":1,"o2":1,"o3":1}"#)]);
        let mut sync = sync_loop(transport);

        assert_eq!(sync.step().await, LoopState::Idle);

        assert_eq!(sync.bus().writes, vec![(RegisterId::OUTPUT_1, 0b0000_1110, 0b0000_1110)]);
        assert_eq!(
            sync.transport.sent,
            vec![(
                "dev".to_string(),
                "dev-0".to_string(),
                r#"{"state":{"reported":{"o1":1,"o2":1,"o3":1}},"clientToken":"dev-0"}"#.to_string()
            )]
        );
        assert!(!sync.has_pending_echo());
        assert_eq!(sync.stats().echoes_sent, 1);
    }

    #[tokio::test]
    async fn test_input_only_delta_writes_nothing() {
        let transport = ScriptedTransport::default()
            .then(PollStatus::Success, vec![Event::Delta(r#"{"i0":1}"#)]);
        let mut sync = sync_loop(transport);

        sync.step().await;

        assert!(sync.bus().writes.is_empty());
        assert_eq!(sync.transport.sent.len(), 1);
    }

    #[tokio::test]
    async fn test_pulse_command() {
        let transport = ScriptedTransport::default().then(
            PollStatus::Success,
            vec![Event::Message("a140808/dev", r#"{"p1","p3"}"#)],
        );
        let mut sync = sync_loop(transport);

        sync.step().await;

        let ms250 = Duration::from_millis(250);
        assert_eq!(
            sync.bus().pulses,
            vec![(RegisterId::OUTPUT_1, 1, ms250), (RegisterId::OUTPUT_1, 3, ms250)]
        );
        assert!(sync.transport.sent.is_empty());
        assert_eq!(sync.stats().pulses_dispatched, 2);
    }

    #[tokio::test]
    async fn test_pulse_failure_does_not_stop_other_bits() {
        let transport = ScriptedTransport::default().then(
            PollStatus::Success,
            vec![Event::Message("a140808/dev", r#"{"p1","p3"}"#)],
        );
        let mut sync = ShadowSyncLoop::new(
            &AgentConfig::default(),
            "dev",
            transport,
            RecordingBus {
                reject_bits: 0b0000_0010,
                ..Default::default()
            },
        );

        sync.step().await;

        assert_eq!(sync.bus().pulses.len(), 1);
        assert_eq!(sync.bus().pulses[0].1, 3);
        assert_eq!(sync.stats().pulse_failures, 1);
    }

    #[tokio::test]
    async fn test_foreign_topic_and_bad_pulse_are_dropped() {
        let transport = ScriptedTransport::default().then(
            PollStatus::Success,
            vec![
                Event::Message("other/dev", r#"{"p1"}"#),
                Event::Message("a140808/dev", r#"{"o1"}"#),
            ],
        );
        let mut sync = sync_loop(transport);

        assert_eq!(sync.step().await, LoopState::Idle);
        assert!(sync.bus().pulses.is_empty());
        assert_eq!(sync.stats().decode_failures, 1);
    }

    #[tokio::test]
    async fn test_pulse_over_token_budget_is_dropped() {
        let transport = ScriptedTransport::default().then(
            PollStatus::Success,
            vec![Event::Message(
                "a140808/dev",
                r#"{"p0","p1","p2","p3","p4","p5","p6","p7","p0"}"#,
            )],
        );
        let mut sync = sync_loop(transport);

        assert_eq!(sync.step().await, LoopState::Idle);
        assert!(sync.bus().pulses.is_empty());
        assert_eq!(sync.stats().decode_failures, 1);
    }

    #[tokio::test]
    async fn test_malformed_delta_still_echoes() {
        let transport = ScriptedTransport::default()
            .then(PollStatus::Success, vec![Event::Delta(r#"{"o1":}"#)])
            .then(PollStatus::Success, vec![]);
        let mut sync = sync_loop(transport);

        assert_eq!(sync.step().await, LoopState::Idle);
        assert!(sync.bus().writes.is_empty());
        assert_eq!(sync.stats().decode_failures, 1);
        assert_eq!(sync.transport.sent.len(), 1);

        assert_eq!(sync.step().await, LoopState::Idle);
    }

    #[tokio::test]
    async fn test_reconnecting_keeps_pending_echo() {
        let transport = ScriptedTransport::default()
            .then(PollStatus::Reconnecting, vec![Event::Delta(r#"{"o1":1}"#)])
            .then(PollStatus::Reconnecting, vec![])
            .then(PollStatus::Reconnected, vec![]);
        let mut sync = sync_loop(transport);

        assert_eq!(sync.step().await, LoopState::Reconnecting);
        assert!(sync.has_pending_echo());
        assert_eq!(sync.step().await, LoopState::Reconnecting);
        assert!(sync.has_pending_echo());
        assert!(sync.transport.sent.is_empty());

        assert_eq!(sync.step().await, LoopState::Idle);
        assert!(!sync.has_pending_echo());
        assert_eq!(sync.transport.sent.len(), 1);
    }

    #[tokio::test]
    async fn test_unsent_echo_is_overwritten() {
        let transport = ScriptedTransport::default().then(
            PollStatus::Success,
            vec![Event::Delta(r#"{"o1":1}"#), Event::Delta(r#"{"o1":0}"#)],
        );
        let mut sync = sync_loop(transport);

        sync.step().await;

        assert_eq!(sync.transport.sent.len(), 1);
        assert_eq!(sync.transport.sent[0].1, "dev-1");
        assert_eq!(sync.stats().echoes_dropped, 1);
        assert_eq!(sync.bus().writes.len(), 2);
    }

    #[tokio::test]
    async fn test_oversized_echo_drops_older_echo() {
        let transport = ScriptedTransport::default().then(
            PollStatus::Success,
            vec![
                Event::Delta(r#"{"o1":1}"#),
                Event::Delta(r#"{"o1":0,"o2":0,"o3":0,"o4":0,"o5":0,"o6":0}"#),
            ],
        );
        let mut config = AgentConfig::default();
        config.engine.echo_capacity = 64;
        let mut sync = ShadowSyncLoop::new(&config, "dev", transport, RecordingBus::default());

        assert_eq!(sync.step().await, LoopState::Idle);

        assert_eq!(
            sync.bus().writes,
            vec![
                (RegisterId::OUTPUT_1, 0b0000_0010, 0b0000_0010),
                (RegisterId::OUTPUT_1, 0, 0b0111_1110),
            ]
        );
        assert!(sync.transport.sent.is_empty());
        assert!(!sync.has_pending_echo());
        assert_eq!(sync.stats().echoes_dropped, 2);
    }

    #[tokio::test]
    async fn test_acks_are_counted() {
        let transport = ScriptedTransport::default().then(
            PollStatus::Success,
            vec![
                Event::Ack("dev-0", AckStatus::Accepted),
                Event::Ack("dev-1", AckStatus::Rejected),
                Event::Ack("dev-2", AckStatus::Timeout),
            ],
        );
        let mut sync = sync_loop(transport);

        assert_eq!(sync.step().await, LoopState::Idle);
        let stats = sync.stats();
        assert_eq!(
            (stats.acks_accepted, stats.acks_rejected, stats.acks_timed_out),
            (1, 1, 1)
        );
    }

    #[tokio::test]
    async fn test_fatal_status_ends_run() {
        let transport = ScriptedTransport::default()
            .then(PollStatus::Success, vec![])
            .then(PollStatus::Fatal(-5), vec![]);
        let mut sync = sync_loop(transport);

        let err = sync.run().await.unwrap_err();
        assert!(matches!(err, SyncError::TransportFatal { code: -5 }));
        assert_eq!(sync.state(), LoopState::Fatal(-5));
        assert!(sync.transport.closed);
    }

    #[tokio::test]
    async fn test_send_failure_is_fatal() {
        let mut transport = ScriptedTransport::default()
            .then(PollStatus::Success, vec![Event::Delta(r#"{"o1":1}"#)]);
        transport.fail_send = true;
        let mut sync = sync_loop(transport);

        assert_eq!(sync.step().await, LoopState::Fatal(-2));
        assert!(!sync.has_pending_echo());
    }

    #[tokio::test]
    async fn test_shutdown_stops_run() {
        let mut sync = sync_loop(ScriptedTransport::default());
        sync.handle().shutdown().await;

        assert!(sync.run().await.is_ok());
        assert!(sync.transport.closed);
    }

    #[test]
    fn test_loop_state_display() {
        assert_eq!(LoopState::Fatal(-1).to_string(), "fatal(-1)");
        assert_eq!(LoopState::Reconnecting.to_string(), "reconnecting");
    }
}
