//! Main loop: telemetry in, lights and tasks out.
//!
//! Startup waits for the first heartbeat (flight mode only). Each iteration
//! then checks liveness, drains the link, dispatches one scheduled task and
//! samples the stop switch. Teardown runs on every exit path.

use crate::config::Config;
use crate::drivers::mavlink::{DecodedMessage, MessageKind, Payload};
use crate::hal::{Clock, Display, Indicator, StopSwitch, Transport};
use crate::link::MavLink;
use crate::liveness::{LinkState, LivenessSupervisor, Transition, WarningBeacon};
use crate::patterns::{FlightState, LightControl};
use crate::scheduler::{Cancelled, Scheduler, TaskAction};
use crate::sensor_log::SharedDisplay;
use crate::state::{RunMode, TaskContext};

pub const BANNER: &str = "MPSP v0.2";

/// Degraded-startup blink: every indicator toggled together.
const DEGRADED_TOGGLES: u32 = 11;
const DEGRADED_STEP_MS: u32 = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StartupError {
    /// No heartbeat within the startup timeout.
    NoHeartbeat,
}

impl StartupError {
    pub const fn as_str(&self) -> &'static str {
        match self {
            StartupError::NoHeartbeat => "no heartbeat",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StopReason {
    Switch,
    Cancelled,
}

impl StopReason {
    pub const fn as_str(&self) -> &'static str {
        match self {
            StopReason::Switch => "switch",
            StopReason::Cancelled => "cancelled",
        }
    }
}

/// Indicator outputs the loop steers.
pub struct Outputs<'a, L, W, F> {
    pub lights: &'a L,
    pub beacon: &'a WarningBeacon<W>,
    pub fault_led: F,
}

pub struct ControlLoop<'a, T: Transport, C, L, W, A, S, F, const N: usize> {
    config: Config,
    link: MavLink<T>,
    clock: C,
    outputs: Outputs<'a, L, W, F>,
    scheduler: Scheduler<A, N>,
    stop: S,
    supervisor: LivenessSupervisor,
    ctx: TaskContext,
    iterations: u32,
}

impl<'a, T, C, L, W, A, S, F, const N: usize> ControlLoop<'a, T, C, L, W, A, S, F, N>
where
    T: Transport,
    C: Clock,
    L: LightControl,
    W: Indicator,
    A: TaskAction,
    S: StopSwitch,
    F: Indicator,
{
    pub fn new(
        config: Config,
        link: MavLink<T>,
        clock: C,
        outputs: Outputs<'a, L, W, F>,
        scheduler: Scheduler<A, N>,
        stop: S,
    ) -> Self {
        Self {
            supervisor: LivenessSupervisor::new(config.liveness_timeout_ms),
            ctx: TaskContext::new(config.display_enabled),
            config,
            link,
            clock,
            outputs,
            scheduler,
            stop,
            iterations: 0,
        }
    }

    pub fn context(&self) -> &TaskContext {
        &self.ctx
    }

    pub fn link_state(&self) -> LinkState {
        self.supervisor.state()
    }

    pub fn supervisor(&self) -> &LivenessSupervisor {
        &self.supervisor
    }

    pub fn scheduler(&self) -> &Scheduler<A, N> {
        &self.scheduler
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub async fn run(&mut self, mode: RunMode) -> Result<StopReason, StartupError> {
        log_info!("payload: starting, mode={}", mode.tag());
        self.outputs.lights.enable();

        if mode == RunMode::Flight {
            let first = self
                .link
                .wait_for(
                    &self.clock,
                    Some(MessageKind::Heartbeat),
                    self.config.startup_timeout_ms,
                )
                .await;
            match first {
                Ok(msg) => self.handle_message(msg),
                Err(e) => {
                    log_error!("payload: startup failed, link {}", e.as_str());
                    self.outputs.lights.shutdown();
                    self.degraded_startup().await;
                    self.teardown().await;
                    return Err(StartupError::NoHeartbeat);
                }
            }
        }

        let reason = self.run_loop(mode).await;
        log_info!(
            "payload: stopping ({}) after {} iterations",
            reason.as_str(),
            self.iterations
        );
        self.teardown().await;
        Ok(reason)
    }

    async fn run_loop(&mut self, mode: RunMode) -> StopReason {
        loop {
            if self.iterate(mode).await.is_err() {
                return StopReason::Cancelled;
            }
            if self.stop.pressed() {
                return StopReason::Switch;
            }
            if self.config.loop_period_ms > 0 {
                self.clock.delay_ms(self.config.loop_period_ms).await;
            }
        }
    }

    /// One pass of the loop body, without the stop check or the pause.
    pub async fn iterate(&mut self, mode: RunMode) -> Result<(), Cancelled> {
        self.iterations = self.iterations.wrapping_add(1);

        if mode == RunMode::Flight {
            if let Some(t) = self.supervisor.check(self.clock.now_ms()) {
                self.apply(t);
            }
            let batch = self
                .link
                .get_messages(&self.clock, self.config.link_idle_ms)
                .await;
            for msg in batch {
                self.handle_message(msg);
            }
        }

        let now = self.clock.now_ms();
        self.scheduler
            .dispatch_next(now, &mut self.ctx, &mut self.outputs.fault_led)
            .await?;
        Ok(())
    }

    fn handle_message(&mut self, msg: DecodedMessage) {
        if msg.kind() == MessageKind::Heartbeat {
            if let Some(t) = self.supervisor.on_heartbeat(self.clock.now_ms()) {
                self.apply(t);
            }
            return;
        }

        match msg.payload {
            Some(Payload::GlobalPositionInt(pos)) => {
                self.ctx.gps = Some(pos);
                self.outputs.lights.select(FlightState::from_position(&pos));
            }
            Some(Payload::Attitude(att)) => self.ctx.attitude = Some(att),
            Some(Payload::StatusText(text)) => {
                log_info!("autopilot[{}]: {}", text.severity, text.text());
            }
            _ => {}
        }
    }

    fn apply(&mut self, transition: Transition) {
        match transition {
            Transition::Connected => log_info!("link: heartbeat received"),
            Transition::Lost => {
                self.outputs.beacon.set_active(true);
                self.outputs.lights.suspend_status(true);
            }
            Transition::Recovered => {
                log_info!("link: heartbeat restored");
                self.outputs.beacon.set_active(false);
                self.outputs.lights.suspend_status(false);
            }
        }
    }

    async fn degraded_startup(&mut self) {
        let mut on = true;
        self.set_all(on);
        for _ in 0..DEGRADED_TOGGLES {
            on = !on;
            self.set_all(on);
            self.clock.delay_ms(DEGRADED_STEP_MS).await;
        }
    }

    fn set_all(&mut self, on: bool) {
        self.outputs.beacon.force(on);
        self.outputs.lights.force_outputs(on);
        self.outputs.fault_led.set(on);
    }

    async fn teardown(&mut self) {
        self.outputs.lights.shutdown();
        self.outputs.beacon.shutdown();
        self.scheduler.close_all().await;
    }
}

/// Title line on the status display.
pub async fn show_banner<D: Display>(display: &SharedDisplay<D>, mode: RunMode) {
    let mut title: heapless::String<16> = heapless::String::new();
    let _ = title.push_str(BANNER);
    let _ = title.push_str("  ");
    let _ = title.push_str(mode.tag());
    if display.lock().await.header(&title, "  ").await.is_err() {
        log_warn!("display: header failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT;
    use crate::drivers::mavlink::TrailerCheck;
    use crate::mock::{
        gps, heartbeat, ManualClock, PressAfter, RecordingBus, RecordingDisplay, RecordingIndicator,
        ScriptedTransport,
    };
    use crate::patterns::{PatternEngine, SharedLights, TAIL_CLEAR};
    use crate::scheduler::{ScheduledTask, TaskFault};
    use embassy_futures::block_on;
    use std::cell::Cell;
    use std::rc::Rc;

    type Lights = SharedLights<RecordingIndicator, RecordingIndicator, RecordingBus>;

    #[derive(Clone, Default)]
    struct Counter {
        fires: Rc<Cell<u32>>,
        closed: Rc<Cell<bool>>,
        cancel_after: Option<u32>,
    }

    impl TaskAction for Counter {
        async fn fire(&mut self, _ctx: &mut TaskContext) -> Result<(), TaskFault> {
            self.fires.set(self.fires.get() + 1);
            match self.cancel_after {
                Some(n) if self.fires.get() >= n => Err(TaskFault::Cancelled),
                _ => Ok(()),
            }
        }

        async fn close(&mut self) {
            self.closed.set(true);
        }
    }

    struct Rig {
        clock: ManualClock,
        tx: ScriptedTransport,
        status: RecordingIndicator,
        dome: RecordingIndicator,
        bus: RecordingBus,
        warning: RecordingIndicator,
        fault: RecordingIndicator,
        lights: Lights,
        beacon: WarningBeacon<RecordingIndicator>,
        counter: Counter,
    }

    impl Rig {
        fn new(counter: Counter) -> Self {
            let clock = ManualClock::new(0);
            let status = RecordingIndicator::new();
            let dome = RecordingIndicator::new();
            let bus = RecordingBus::new();
            let warning = RecordingIndicator::new();
            Self {
                tx: ScriptedTransport::timed(&clock),
                lights: SharedLights::new(PatternEngine::new(status.clone(), dome.clone(), bus.clone())),
                beacon: WarningBeacon::new(warning.clone()),
                fault: RecordingIndicator::new(),
                clock,
                status,
                dome,
                bus,
                warning,
                counter,
            }
        }

        fn control(
            &self,
            config: Config,
            stop: PressAfter,
        ) -> ControlLoop<'_, ScriptedTransport, ManualClock, Lights, RecordingIndicator, Counter, PressAfter, RecordingIndicator, 4>
        {
            let mut sched = Scheduler::new();
            let _ = sched.add(ScheduledTask::new(self.counter.clone(), 0, 0));
            ControlLoop::new(
                config,
                MavLink::new(self.tx.clone(), TrailerCheck::Ignore),
                self.clock.clone(),
                Outputs {
                    lights: &self.lights,
                    beacon: &self.beacon,
                    fault_led: self.fault.clone(),
                },
                sched,
                stop,
            )
        }
    }

    fn quick_config() -> Config {
        Config {
            startup_timeout_ms: 100,
            ..DEFAULT
        }
    }

    #[test]
    fn missing_heartbeat_runs_degraded_sequence() {
        let rig = Rig::new(Counter::default());
        let mut lp = rig.control(quick_config(), PressAfter::never());

        let res = block_on(lp.run(RunMode::Flight));
        assert_eq!(res, Err(StartupError::NoHeartbeat));

        // On, then eleven toggles.
        let fault = rig.fault.history();
        assert_eq!(fault.len(), 12);
        assert!(fault.windows(2).all(|w| w[0] != w[1]));
        assert!(!fault[11]);

        assert!(rig.clock.now_ms() >= 100 + 11 * 250);
        assert!(!rig.warning.is_on());
        assert!(!rig.dome.is_on());
        assert!(!rig.status.is_on());
        assert_eq!(rig.bus.writes().last().unwrap(), &TAIL_CLEAR.bytes.to_vec());
        assert!(rig.counter.closed.get());
        assert_eq!(rig.counter.fires.get(), 0);
        assert_eq!(lp.iterations(), 0);
    }

    #[test]
    fn stop_switch_ends_loop_and_tears_down() {
        let rig = Rig::new(Counter::default());
        rig.tx.push(heartbeat(1));
        let mut lp = rig.control(quick_config(), PressAfter::new(3));

        assert_eq!(block_on(lp.run(RunMode::Flight)), Ok(StopReason::Switch));
        assert_eq!(lp.iterations(), 3);
        assert_eq!(rig.counter.fires.get(), 3);
        assert_eq!(lp.link_state(), LinkState::Alive);
        assert!(rig.counter.closed.get());
        assert_eq!(rig.lights.tick(), crate::patterns::TickOutcome::Disabled);
    }

    #[test]
    fn position_updates_context_and_lights() {
        let rig = Rig::new(Counter::default());
        rig.tx.push(heartbeat(1));
        rig.tx.push(gps(2, 1200, 0));
        let mut lp = rig.control(quick_config(), PressAfter::never());

        block_on(async {
            let first = lp.link.wait_for(&lp.clock, Some(MessageKind::Heartbeat), 100).await;
            lp.handle_message(first.unwrap());
            lp.iterate(RunMode::Flight).await.unwrap();
        });

        assert_eq!(lp.context().gps.map(|g| g.alt), Some(1200));
        assert_eq!(rig.lights.state(), Some(FlightState::Flight));
    }

    #[test]
    fn heartbeat_loss_and_recovery() {
        let rig = Rig::new(Counter::default());
        rig.tx.push(heartbeat(1));
        let mut lp = rig.control(quick_config(), PressAfter::never());
        rig.lights.enable();

        block_on(lp.iterate(RunMode::Flight)).unwrap();
        assert_eq!(lp.link_state(), LinkState::Alive);
        // Stamped when the batch is handled, after the idle gap.
        let hb = lp.supervisor().last_heartbeat_ms();
        assert_eq!(hb, 5);

        rig.clock.set(hb + 4000);
        block_on(lp.iterate(RunMode::Flight)).unwrap();
        assert!(!rig.beacon.is_active());

        rig.clock.set(hb + 5000);
        block_on(lp.iterate(RunMode::Flight)).unwrap();
        assert_eq!(lp.link_state(), LinkState::Warning);
        assert!(rig.beacon.is_active());

        // Status is frozen while the warning blinks.
        let status_before = rig.status.history().len();
        rig.lights.tick();
        rig.beacon.tick();
        assert_eq!(rig.status.history().len(), status_before);
        assert!(rig.warning.is_on());

        rig.tx.push_at(6000, heartbeat(2));
        rig.clock.set(6000);
        block_on(lp.iterate(RunMode::Flight)).unwrap();
        assert_eq!(lp.link_state(), LinkState::Alive);
        assert!(!rig.beacon.is_active());
        assert!(!rig.warning.is_on());
        assert_eq!(lp.supervisor().losses(), 1);

        rig.lights.tick();
        assert_eq!(rig.status.history().len(), status_before + 1);
    }

    #[test]
    fn cancellation_from_task_stops_loop() {
        let rig = Rig::new(Counter {
            cancel_after: Some(2),
            ..Default::default()
        });
        let mut lp = rig.control(quick_config(), PressAfter::never());

        assert_eq!(block_on(lp.run(RunMode::GroundTest)), Ok(StopReason::Cancelled));
        assert_eq!(rig.counter.fires.get(), 2);
        assert!(rig.counter.closed.get());
        assert!(!rig.warning.is_on());
    }

    #[test]
    fn ground_test_never_touches_the_link() {
        let rig = Rig::new(Counter::default());
        rig.tx.push(heartbeat(1));
        let mut lp = rig.control(quick_config(), PressAfter::new(2));

        assert_eq!(block_on(lp.run(RunMode::GroundTest)), Ok(StopReason::Switch));
        assert_eq!(lp.link_state(), LinkState::AwaitingFirst);
        assert!(rig.tx.remaining() > 0);
        assert_eq!(lp.iterations(), 2);
        // The first pass lands inside the task's first period.
        assert_eq!(rig.counter.fires.get(), 1);
    }

    #[test]
    fn banner_names_mode() {
        let display = SharedDisplay::new(RecordingDisplay::default());
        block_on(show_banner(&display, RunMode::Flight));
        let headers = display.try_lock().unwrap().headers.clone();
        assert_eq!(headers, vec![("MPSP v0.2  F".to_string(), "  ".to_string())]);
    }
}
