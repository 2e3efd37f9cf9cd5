//! Desk height controller.
//!
//! Turns a target height into timed relay actuation. Every move locates the
//! desk, measures the actual travel speed, drives continuously with a deadline
//! derived from the remaining distance and finishes with short bursts close to
//! the target. Faults stop the move and are never retried on their own.

pub mod relay;
pub mod state;

#[cfg(test)]
mod tests;

use core::{cell::RefCell, fmt};

use embassy_sync::blocking_mutex::{Mutex, raw::CriticalSectionRawMutex};
use embassy_time::Ticker;
use log::{debug, info, warn};

use crate::{
    clock::{Clock, Duration, Instant, elapsed},
    config::*,
    diagnostics::{Diagnostics, truncated},
    desk::{
        relay::{Direction, Relays},
        state::{DeskError, DeskStatus, Phase, Pulse, RequesterId, StopReason},
    },
    ranging::{Consumer, DistanceSample, Ranging},
};

/// Time allowed to cover `remaining_mm`
pub fn travel_budget(remaining_mm: u16) -> Duration {
    Duration::millis(remaining_mm as u64 * DESK_ADJUST_TIMEOUT_PER_MM_MS)
}

pub struct Desk<'a, R: Relays, C: Clock> {
    ranging: &'a Ranging<C>,
    control: Mutex<CriticalSectionRawMutex, RefCell<DeskControl<'a, R, C>>>,
}

impl<'a, R: Relays, C: Clock> Desk<'a, R, C> {
    pub fn new(mut relays: R, ranging: &'a Ranging<C>, diagnostics: &'a Diagnostics) -> Self {
        info!("Desk Control Init");
        relays.drive(Direction::Stopped);

        Self {
            ranging,
            control: Mutex::new(RefCell::new(DeskControl {
                ranging,
                diagnostics,
                relays,
                phase: Phase::Idle,
                direction: Direction::Stopped,
                output: Direction::Stopped,
                target: None,
                requester: RequesterId::new(),
                speed: None,
                stop_reason: None,
            })),
        }
    }

    /// Start moving to `target`, replacing any move in progress.
    /// Targets outside the configured range are rejected without side effects
    pub fn adjust_height(&self, target: u16, requester: &str) -> Result<(), DeskError> {
        if !(DESK_HEIGHT_MIN_MM..=DESK_HEIGHT_MAX_MM).contains(&target) {
            let err = DeskError::TargetOutOfRange {
                target,
                min: DESK_HEIGHT_MIN_MM,
                max: DESK_HEIGHT_MAX_MM,
            };
            warn!("Rejected command from {}: {}", requester, err);
            return Err(err);
        }

        let now = self.ranging.now();
        let sample = self.ranging.latest_sample();
        self.control
            .lock(|control| control.borrow_mut().command(now, sample, target, requester));
        Ok(())
    }

    /// Release the relays and cancel the move. Safe to call at any time
    pub fn stop(&self) {
        self.control.lock(|control| control.borrow_mut().stop());
    }

    /// Advance the state machine. Has to be called every DESK_TICK_INTERVAL_MS
    pub fn tick(&self) {
        let now = self.ranging.now();
        let sample = self.ranging.latest_sample();
        self.control
            .lock(|control| control.borrow_mut().tick(now, sample));
    }

    pub fn is_moving(&self) -> bool {
        self.control
            .lock(|control| control.borrow().phase.is_active())
    }

    pub fn moving_direction(&self) -> Direction {
        self.control.lock(|control| control.borrow().direction)
    }

    pub fn target(&self) -> Option<u16> {
        self.control.lock(|control| control.borrow().target)
    }

    pub fn phase(&self) -> Phase {
        self.control.lock(|control| control.borrow().phase)
    }

    /// When the move in progress is aborted at the latest
    pub fn deadline(&self) -> Option<Instant> {
        self.control
            .lock(|control| control.borrow().phase.deadline())
    }

    /// Calibrated speed of the current or last move in mm/s
    pub fn speed(&self) -> Option<f32> {
        self.control
            .lock(|control| control.borrow().speed.map(|speed| speed * 1000.0))
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.control.lock(|control| control.borrow().stop_reason)
    }

    /// Height from the shared ranging sample, if it is still fresh
    pub fn current_height(&self) -> Option<u16> {
        self.ranging.latest_sample().height_mm()
    }

    pub fn ranging(&self) -> &'a Ranging<C> {
        self.ranging
    }

    pub fn status(&self) -> DeskStatus {
        let height = self.current_height();
        self.control.lock(|control| {
            let control = control.borrow();
            DeskStatus {
                phase: control.phase.kind(),
                direction: control.direction,
                target: control.target,
                height,
                speed: control.speed.map(|speed| speed * 1000.0),
                stop_reason: control.stop_reason,
                requester: control.requester.clone(),
            }
        })
    }
}

/// Run the desk state machine forever
pub async fn run_desk<R: Relays, C: Clock>(desk: &Desk<'_, R, C>) {
    let mut ticker = Ticker::every(embassy_time::Duration::from_millis(DESK_TICK_INTERVAL_MS));

    info!("Task Desk Started");

    loop {
        desk.tick();
        ticker.next().await;
    }
}

struct DeskControl<'a, R: Relays, C: Clock> {
    ranging: &'a Ranging<C>,
    diagnostics: &'a Diagnostics,
    relays: R,
    phase: Phase,
    // Direction of the move in flight
    direction: Direction,
    // What the relays assert right now
    output: Direction,
    target: Option<u16>,
    requester: RequesterId,
    // In mm/ms
    speed: Option<f32>,
    stop_reason: Option<StopReason>,
}

impl<R: Relays, C: Clock> DeskControl<'_, R, C> {
    fn command(&mut self, now: Instant, sample: DistanceSample, target: u16, requester: &str) {
        info!("Adjusting height to {} mm for {}", target, requester);

        self.target = Some(target);
        self.requester = truncated(requester);
        self.stop_reason = None;
        self.diagnostics.clear();

        if matches!(self.phase, Phase::Locating { .. }) {
            // The new target is picked up once the height is known
            return;
        }

        // Without demand held the shared sample is not trusted
        match sample.height_mm() {
            Some(height) if self.phase.is_active() => self.plan(now, height),
            _ => self.transition(Phase::Locating { since: now }),
        }
    }

    fn stop(&mut self) {
        let was_active = self.phase.is_active();
        self.transition(Phase::Idle);

        if was_active {
            info!("Desk stopped on request");
            self.set_stop_reason(StopReason::Requested);
        }
    }

    fn tick(&mut self, now: Instant, sample: DistanceSample) {
        match self.phase {
            Phase::Idle | Phase::ErrorStopped => {}
            Phase::Locating { since } => {
                if sample.valid && sample.time > since {
                    self.plan(now, sample.distance_mm);
                } else if elapsed(now, since) > Duration::millis(DESK_RANGING_TIMEOUT_MS) {
                    self.fault(
                        StopReason::SensorFault,
                        format_args!("No height within {} ms", DESK_RANGING_TIMEOUT_MS),
                    );
                }
            }
            _ if !sample.valid => self.fault(
                StopReason::SensorFault,
                format_args!(
                    "No height for more than {} ms while moving",
                    DESK_RANGING_TIMEOUT_MS
                ),
            ),
            Phase::CalibratingSpeed {
                attempt,
                window_start,
                start_height,
            } => self.calibrate(now, sample.distance_mm, attempt, window_start, start_height),
            Phase::Moving { deadline } => self.travel(now, sample.distance_mm, deadline),
            Phase::FineAdjusting { deadline, pulse } => {
                self.fine_adjust(now, sample, deadline, pulse)
            }
        }
    }

    /// Decide how to get from `height` to the target
    fn plan(&mut self, now: Instant, height: u16) {
        let Some(target) = self.target else {
            self.transition(Phase::Idle);
            return;
        };

        let error = height.abs_diff(target);
        if error <= DESK_HEIGHT_TOLERANCE_MM {
            let reason = match self.phase {
                Phase::Locating { .. } => StopReason::AlreadyAtTarget,
                _ => StopReason::Reached,
            };
            self.complete(reason);
            return;
        }

        let direction = Direction::towards(height, target);
        let same_direction = direction == self.direction;

        match self.phase {
            Phase::Moving { .. } if same_direction && error > DESK_FINE_ADJUST_RANGE_MM => {
                let deadline = now + travel_budget(error);
                info!("Re-planned to {} mm, {} mm left", target, error);
                self.transition(Phase::Moving { deadline });
            }
            // Keep the calibration window running
            Phase::CalibratingSpeed { .. }
                if same_direction && error > DESK_FINE_ADJUST_RANGE_MM => {}
            Phase::FineAdjusting { .. } if error <= DESK_FINE_ADJUST_RANGE_MM => {}
            _ => {
                self.direction = direction;
                if error <= DESK_FINE_ADJUST_RANGE_MM {
                    // A move in flight keeps its travel deadline
                    let deadline = self
                        .phase
                        .deadline()
                        .unwrap_or(now + Duration::millis(DESK_FINE_ADJUST_TIMEOUT_MS));
                    self.enter_fine_adjust(now, deadline);
                } else {
                    info!("Moving {:?} from {} mm to {} mm", direction, height, target);
                    self.speed = None;
                    self.transition(Phase::CalibratingSpeed {
                        attempt: 0,
                        window_start: now,
                        start_height: height,
                    });
                }
            }
        }
    }

    fn calibrate(
        &mut self,
        now: Instant,
        height: u16,
        attempt: u8,
        window_start: Instant,
        start_height: u16,
    ) {
        let Some(target) = self.target else {
            self.transition(Phase::Idle);
            return;
        };

        let window_ms = elapsed(now, window_start).to_millis();
        let progress = self.direction.progress(start_height, height);
        let remaining = self.direction.remaining(height, target);

        if remaining <= DESK_FINE_ADJUST_RANGE_MM as i32 {
            // Reached the fine adjust band before the window was over
            if progress > 0 && window_ms > 0 {
                self.speed = Some(progress as f32 / window_ms as f32);
            }
            self.enter_fine_adjust(now, now + Duration::millis(DESK_FINE_ADJUST_TIMEOUT_MS));
            return;
        }

        if window_ms < DESK_CALCULATE_SPEED_TIME_MS {
            return;
        }

        let speed = progress as f32 / window_ms as f32;
        if speed < DESK_SPEED_MIN {
            let attempt = attempt + 1;
            if attempt >= DESK_SPEED_TRIES {
                self.fault(
                    StopReason::Stall,
                    format_args!(
                        "Stall: moved {} mm in {} ms, {} tries",
                        progress, window_ms, attempt
                    ),
                );
            } else {
                warn!(
                    "Desk barely moved ({} mm in {} ms), try {}/{}",
                    progress, window_ms, attempt, DESK_SPEED_TRIES
                );
                self.transition(Phase::CalibratingSpeed {
                    attempt,
                    window_start: now,
                    start_height: height,
                });
            }
            return;
        }

        self.speed = Some(speed);

        // The budget starts now, calibration time does not count against it
        let budget = travel_budget(remaining as u16);
        info!(
            "Speed {} mm/s, {} mm left, {} ms allowed",
            speed * 1000.0,
            remaining,
            budget.to_millis()
        );
        self.transition(Phase::Moving {
            deadline: now + budget,
        });
    }

    fn travel(&mut self, now: Instant, height: u16, deadline: Instant) {
        let Some(target) = self.target else {
            self.transition(Phase::Idle);
            return;
        };

        if height.abs_diff(target) <= DESK_HEIGHT_TOLERANCE_MM {
            self.complete(StopReason::Reached);
        } else if now >= deadline {
            self.fault(
                StopReason::Timeout,
                format_args!("Timeout at {} mm, target {} mm", height, target),
            );
        } else if self.direction.remaining(height, target) <= DESK_FINE_ADJUST_RANGE_MM as i32 {
            self.enter_fine_adjust(now, deadline);
        }
    }

    fn enter_fine_adjust(&mut self, now: Instant, deadline: Instant) {
        let deadline = deadline.min(now + Duration::millis(DESK_FINE_ADJUST_TIMEOUT_MS));
        self.transition(Phase::FineAdjusting {
            deadline,
            pulse: self.settle(now),
        });
    }

    fn settle(&self, now: Instant) -> Pulse {
        Pulse::Settling {
            since: now,
            until: now + Duration::millis(DESK_FINE_ADJUST_SETTLE_MS),
        }
    }

    fn fine_adjust(&mut self, now: Instant, sample: DistanceSample, deadline: Instant, pulse: Pulse) {
        let Some(target) = self.target else {
            self.transition(Phase::Idle);
            return;
        };

        let height = sample.distance_mm;
        let on_target = height.abs_diff(target) <= DESK_HEIGHT_TOLERANCE_MM;

        match pulse {
            Pulse::Driving {
                direction,
                since,
                until,
            } => {
                let measured = sample.time > since;
                if measured && on_target {
                    self.complete(StopReason::Reached);
                } else if now >= deadline {
                    self.fine_adjust_timeout(height, target);
                } else if now >= until || (measured && direction.remaining(height, target) < 0) {
                    let pulse = self.settle(now);
                    self.transition(Phase::FineAdjusting { deadline, pulse });
                }
            }
            Pulse::Settling { since, until } => {
                // Only trust a height taken after the relays were released
                let settled = now >= until && sample.time > since;
                if settled && on_target {
                    self.complete(StopReason::Reached);
                } else if now >= deadline {
                    self.fine_adjust_timeout(height, target);
                } else if settled {
                    let error = height.abs_diff(target);
                    let direction = Direction::towards(height, target);
                    let length = self.pulse_length(error);
                    debug!("Burst {:?} for {} ms, {} mm off", direction, length, error);

                    self.direction = direction;
                    self.transition(Phase::FineAdjusting {
                        deadline,
                        pulse: Pulse::Driving {
                            direction,
                            since: now,
                            until: now + Duration::millis(length),
                        },
                    });
                }
            }
        }
    }

    fn fine_adjust_timeout(&mut self, height: u16, target: u16) {
        self.fault(
            StopReason::Timeout,
            format_args!("Fine adjust timeout at {} mm, target {} mm", height, target),
        );
    }

    /// Cover about half of the error per burst
    fn pulse_length(&self, error_mm: u16) -> u64 {
        match self.speed {
            Some(speed) if speed > 0.0 => ((error_mm as f32 / speed / 2.0) as u64)
                .clamp(DESK_FINE_ADJUST_PULSE_MIN_MS, DESK_FINE_ADJUST_PULSE_MAX_MS),
            _ => DESK_FINE_ADJUST_PULSE_MIN_MS,
        }
    }

    fn complete(&mut self, reason: StopReason) {
        self.transition(Phase::Idle);
        info!("Desk stopped: {} (target {:?} mm)", reason, self.target);
        self.set_stop_reason(reason);
    }

    fn fault(&mut self, reason: StopReason, message: fmt::Arguments) {
        self.transition(Phase::ErrorStopped);
        self.set_stop_reason(reason);
        self.diagnostics.set_last_error(message);
    }

    fn set_stop_reason(&mut self, reason: StopReason) {
        self.stop_reason = Some(reason);
        self.diagnostics.set_stop_reason(reason);
    }

    /// The only place the relays and the ranging demand of the desk change
    fn transition(&mut self, phase: Phase) {
        if !phase.is_active() {
            self.direction = Direction::Stopped;
        }

        let output = phase.output(self.direction);
        if output != self.output || output == Direction::Stopped {
            if self.output != Direction::Stopped && output != Direction::Stopped {
                // Never flip straight from one relay to the other
                self.relays.drive(Direction::Stopped);
            }
            self.relays.drive(output);
            if output != self.output {
                debug!("Relays {:?} -> {:?}", self.output, output);
            }
            self.output = output;
        }

        if phase.kind() != self.phase.kind() {
            info!("Desk {} -> {}", self.phase.kind().name(), phase.kind().name());
        }

        if phase.is_active() {
            self.ranging.acquire(Consumer::Desk);
        } else {
            self.ranging.release(Consumer::Desk);
        }

        self.phase = phase;
    }
}
