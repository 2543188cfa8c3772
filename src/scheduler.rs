//! Cooperative periodic tasks.
//!
//! The control loop dispatches exactly one task per iteration, round-robin.
//! A task fires when its period has elapsed and idles otherwise. Faults stop
//! at the scheduler: they light the fault LED, get logged and counted, and
//! the next task runs as usual. Only cancellation escapes.

#![allow(async_fn_in_trait)]

use crate::hal::Indicator;
use crate::state::TaskContext;

/// Iteration counter rolls over here.
pub const ITERATION_THRESHOLD: u32 = 100;

/// Per-task display output switches off for good at this iteration.
pub const DISPLAY_CUTOFF_ITERATION: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TaskFault {
    Sensor,
    Storage,
    Display,
    /// Stop the control loop; the only fault that propagates.
    Cancelled,
}

impl TaskFault {
    pub const fn as_str(&self) -> &'static str {
        match self {
            TaskFault::Sensor => "sensor",
            TaskFault::Storage => "storage",
            TaskFault::Display => "display",
            TaskFault::Cancelled => "cancelled",
        }
    }
}

/// Returned by dispatch when a task asked the loop to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Cancelled;

pub trait TaskAction {
    async fn fire(&mut self, ctx: &mut TaskContext) -> Result<(), TaskFault>;

    async fn idle(&mut self, _ctx: &mut TaskContext) -> Result<(), TaskFault> {
        Ok(())
    }

    /// Teardown hook: flush and close whatever the action holds open.
    async fn close(&mut self) {}

    fn name(&self) -> &'static str {
        "task"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PollOutcome {
    Fired,
    Idle,
    FireFault(TaskFault),
    IdleFault(TaskFault),
}

impl PollOutcome {
    fn fault(self) -> Option<TaskFault> {
        match self {
            PollOutcome::FireFault(f) | PollOutcome::IdleFault(f) => Some(f),
            _ => None,
        }
    }
}

pub struct ScheduledTask<A> {
    action: A,
    period_ms: u32,
    last_fire_ms: u32,
    /// Fires since `last_fire_ms` was last reset.
    pending: u32,
    count_threshold: u32,
    iteration: u32,
    iteration_threshold: u32,
    display_enabled: bool,
    fault_flag: bool,
    fires: u32,
    faults: u32,
}

impl<A: TaskAction> ScheduledTask<A> {
    /// The first fire comes one full period after `now_ms`.
    pub fn new(action: A, period_ms: u32, now_ms: u32) -> Self {
        Self {
            action,
            period_ms,
            last_fire_ms: now_ms,
            pending: 0,
            count_threshold: 0,
            iteration: 0,
            iteration_threshold: ITERATION_THRESHOLD,
            display_enabled: true,
            fault_flag: false,
            fires: 0,
            faults: 0,
        }
    }

    /// Keep firing on consecutive polls until `n + 1` fires, then restart
    /// the period.
    pub fn with_count_threshold(mut self, n: u32) -> Self {
        self.count_threshold = n;
        self
    }

    pub fn with_iteration_threshold(mut self, n: u32) -> Self {
        self.iteration_threshold = n.max(1);
        self
    }

    pub fn action(&self) -> &A {
        &self.action
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn fires(&self) -> u32 {
        self.fires
    }

    pub fn faults(&self) -> u32 {
        self.faults
    }

    /// Set by the last poll if it faulted.
    pub fn faulted(&self) -> bool {
        self.fault_flag
    }

    pub fn display_enabled(&self) -> bool {
        self.display_enabled
    }

    pub async fn poll(&mut self, now_ms: u32, ctx: &mut TaskContext) -> PollOutcome {
        if self.iteration == DISPLAY_CUTOFF_ITERATION {
            self.display_enabled = false;
        }

        let outcome = if now_ms.wrapping_sub(self.last_fire_ms) > self.period_ms {
            let global_display = ctx.display_enabled;
            ctx.display_enabled = global_display && self.display_enabled;
            ctx.iteration = self.iteration;
            let res = self.action.fire(ctx).await;
            ctx.display_enabled = global_display;

            self.fires = self.fires.wrapping_add(1);
            self.pending += 1;
            self.iteration += 1;
            if self.iteration >= self.iteration_threshold {
                self.iteration = 0;
            }
            if self.pending > self.count_threshold {
                self.last_fire_ms = now_ms;
                self.pending = 0;
            }

            match res {
                Ok(()) => PollOutcome::Fired,
                Err(f) => PollOutcome::FireFault(f),
            }
        } else {
            match self.action.idle(ctx).await {
                Ok(()) => PollOutcome::Idle,
                Err(f) => PollOutcome::IdleFault(f),
            }
        };

        self.fault_flag = outcome.fault().is_some();
        if self.fault_flag {
            self.faults = self.faults.wrapping_add(1);
        }
        outcome
    }
}

/// Fixed-capacity task list with a round-robin cursor.
pub struct Scheduler<A, const N: usize> {
    tasks: heapless::Vec<ScheduledTask<A>, N>,
    cursor: usize,
}

impl<A: TaskAction, const N: usize> Scheduler<A, N> {
    pub const fn new() -> Self {
        Self {
            tasks: heapless::Vec::new(),
            cursor: 0,
        }
    }

    /// Hands the task back when the list is full.
    pub fn add(&mut self, task: ScheduledTask<A>) -> Result<(), ScheduledTask<A>> {
        self.tasks.push(task)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn tasks(&self) -> impl Iterator<Item = &ScheduledTask<A>> {
        self.tasks.iter()
    }

    /// Poll the next task in turn. `Ok(None)` when there are no tasks.
    pub async fn dispatch_next<F: Indicator>(
        &mut self,
        now_ms: u32,
        ctx: &mut TaskContext,
        fault_led: &mut F,
    ) -> Result<Option<PollOutcome>, Cancelled> {
        if self.tasks.is_empty() {
            return Ok(None);
        }
        if self.cursor >= self.tasks.len() {
            self.cursor = 0;
        }
        let task = &mut self.tasks[self.cursor];
        self.cursor += 1;

        let outcome = task.poll(now_ms, ctx).await;
        match outcome.fault() {
            Some(TaskFault::Cancelled) => {
                log_info!("scheduler: {} cancelled the loop", task.action.name());
                return Err(Cancelled);
            }
            Some(fault) => {
                fault_led.set(true);
                log_warn!(
                    "scheduler: {} fault={} (total {})",
                    task.action.name(),
                    fault.as_str(),
                    task.faults
                );
            }
            None => {}
        }
        Ok(Some(outcome))
    }

    pub async fn close_all(&mut self) {
        for task in self.tasks.iter_mut() {
            task.action.close().await;
        }
    }
}

impl<A: TaskAction, const N: usize> Default for Scheduler<A, N> {
    fn default() -> Self {
        Self::new()
    }
}
