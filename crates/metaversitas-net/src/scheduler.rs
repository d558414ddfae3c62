//! Explicit frame/tick driver replacing engine lifecycle callbacks.
//!
//! Each frame runs three stages in a fixed order:
//!
//! 1. [`Stage::Input`] once (render rate, gathers device input),
//! 2. [`Stage::Simulation`] zero or more times at the fixed tick rate
//!    (authority-gated writes happen here),
//! 3. [`Stage::Render`] once (read-only: UI, camera, animation).
//!
//! Callbacks within a stage run in registration order.

/// Default simulation rate in Hz.
pub const DEFAULT_TICK_RATE: u32 = 60;

/// Maximum number of simulation steps per frame to prevent spiral-of-death.
pub const DEFAULT_MAX_FIXED_STEPS: u32 = 10;

/// Scheduler stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Per-frame input gathering.
    Input,
    /// Fixed-rate simulation tick.
    Simulation,
    /// Per-frame presentation.
    Render,
}

/// Timing information handed to every callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickInfo {
    /// Simulation tick number. During `Simulation` this is the tick being
    /// run; during `Input`/`Render` it is the last completed tick.
    pub tick: u64,
    /// Simulation rate in Hz.
    pub tick_rate: u32,
    /// Wall-clock seconds covered by the current frame.
    pub frame_dt: f64,
}

type StageCallback<C> = Box<dyn FnMut(&mut C, &TickInfo)>;

/// Ordered stage runner over an application context `C`.
pub struct TickScheduler<C> {
    input: Vec<StageCallback<C>>,
    simulation: Vec<StageCallback<C>>,
    render: Vec<StageCallback<C>>,
    accumulator: f64,
    tick_rate: u32,
    tick_dt: f64,
    max_fixed_steps: u32,
    tick: u64,
}

impl<C> TickScheduler<C> {
    /// Scheduler at [`DEFAULT_TICK_RATE`].
    pub fn new() -> Self {
        Self::with_tick_rate(DEFAULT_TICK_RATE)
    }

    /// Scheduler at a custom rate. A rate of zero is clamped to 1 Hz.
    pub fn with_tick_rate(hz: u32) -> Self {
        let hz = hz.max(1);
        Self {
            input: Vec::new(),
            simulation: Vec::new(),
            render: Vec::new(),
            accumulator: 0.0,
            tick_rate: hz,
            tick_dt: 1.0 / hz as f64,
            max_fixed_steps: DEFAULT_MAX_FIXED_STEPS,
            tick: 0,
        }
    }

    /// Overrides the per-frame simulation step cap.
    pub fn with_max_fixed_steps(mut self, steps: u32) -> Self {
        self.max_fixed_steps = steps.max(1);
        self
    }

    /// Registers a callback into `stage`.
    pub fn add(&mut self, stage: Stage, callback: impl FnMut(&mut C, &TickInfo) + 'static) {
        let list = match stage {
            Stage::Input => &mut self.input,
            Stage::Simulation => &mut self.simulation,
            Stage::Render => &mut self.render,
        };
        list.push(Box::new(callback));
    }

    /// Runs one frame. Returns the number of simulation ticks executed.
    pub fn run(&mut self, ctx: &mut C, frame_dt: f64) -> u32 {
        let mut info = TickInfo {
            tick: self.tick,
            tick_rate: self.tick_rate,
            frame_dt,
        };
        for callback in &mut self.input {
            callback(ctx, &info);
        }

        self.accumulator += frame_dt.max(0.0);
        let mut steps = 0u32;
        while self.accumulator >= self.tick_dt && steps < self.max_fixed_steps {
            self.accumulator -= self.tick_dt;
            self.tick += 1;
            info.tick = self.tick;
            for callback in &mut self.simulation {
                callback(ctx, &info);
            }
            steps += 1;
        }
        if steps == self.max_fixed_steps && self.accumulator >= self.tick_dt {
            tracing::warn!(
                dropped_secs = self.accumulator,
                "simulation fell behind; dropping accumulated time"
            );
            self.accumulator = 0.0;
        }

        for callback in &mut self.render {
            callback(ctx, &info);
        }
        steps
    }

    /// Last completed simulation tick.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Simulation rate in Hz.
    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    /// Seconds per simulation tick.
    pub fn tick_duration_secs(&self) -> f64 {
        self.tick_dt
    }
}

impl<C> Default for TickScheduler<C> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// TickTimer
// ---------------------------------------------------------------------------

/// A countdown measured in simulation ticks rather than wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickTimer {
    /// Tick at which the timer expires; `None` when not running.
    target: Option<u64>,
}

impl TickTimer {
    /// A timer that is not running.
    pub fn none() -> Self {
        Self { target: None }
    }

    /// Starts a timer at `now` lasting `ticks`.
    pub fn from_ticks(now: u64, ticks: u32) -> Self {
        Self {
            target: Some(now + ticks as u64),
        }
    }

    /// Starts a timer lasting `secs` at `tick_rate`, rounded up to whole
    /// ticks.
    pub fn from_seconds(now: u64, secs: f32, tick_rate: u32) -> Self {
        Self::from_ticks(now, secs_to_ticks(secs, tick_rate))
    }

    /// `true` once `now` reached the target tick.
    pub fn expired(&self, now: u64) -> bool {
        matches!(self.target, Some(target) if now >= target)
    }

    /// `true` if the timer is running.
    pub fn is_running(&self) -> bool {
        self.target.is_some()
    }

    /// Expired, or never started.
    pub fn expired_or_not_running(&self, now: u64) -> bool {
        self.target.is_none_or(|target| now >= target)
    }

    /// Ticks left until expiry (zero when expired or not running).
    pub fn remaining_ticks(&self, now: u64) -> u32 {
        self.target
            .map(|target| target.saturating_sub(now).min(u32::MAX as u64) as u32)
            .unwrap_or(0)
    }
}

/// Converts seconds to whole ticks, rounding up.
pub fn secs_to_ticks(secs: f32, tick_rate: u32) -> u32 {
    (secs.max(0.0) as f64 * tick_rate as f64).ceil() as u32
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
