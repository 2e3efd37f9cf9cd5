use embassy_time::Timer;
use log::{debug, info, warn};

use crate::{
    clock::{Clock, Duration, Instant},
    config::{
        RANGING_CONFIG, RANGING_POLL_INTERVAL_MS, RANGING_REINIT_ATTEMPTS,
        RANGING_REINIT_DELAY_MS, RANGING_UNUSED_TIMEOUT_MS,
    },
    diagnostics::Diagnostics,
    ranging::{
        Ranging,
        sensor::{RangeStatus, RangingSensor},
    },
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunnerPhase {
    /// Acquisition stopped, waiting for demand
    Idle,
    Acquiring,
    /// Sensor is being reset after a fault
    Recovering { attempts: u8, retry_at: Instant },
    /// Reinit gave up. Parked until demand drops to zero or a consumer joins
    Faulted,
}

impl RunnerPhase {
    fn is_active(&self) -> bool {
        matches!(self, Self::Acquiring | Self::Recovering { .. })
    }
}

/// Owns the sensor and runs the acquisition loop of a [`Ranging`] handle
pub struct RangingRunner<'a, S: RangingSensor, C: Clock> {
    ranging: &'a Ranging<C>,
    diagnostics: &'a Diagnostics,
    sensor: S,
    initialized: bool,
    phase: RunnerPhase,
    // Demand cycle during which reinit gave up
    faulted_cycle: u32,
}

impl<'a, S: RangingSensor, C: Clock> RangingRunner<'a, S, C> {
    pub fn new(ranging: &'a Ranging<C>, diagnostics: &'a Diagnostics, sensor: S) -> Self {
        Self {
            ranging,
            diagnostics,
            sensor,
            initialized: false,
            phase: RunnerPhase::Idle,
            faulted_cycle: 0,
        }
    }

    pub fn phase(&self) -> RunnerPhase {
        self.phase
    }

    /// Boot-time sensor initialisation. A failure is reported and the
    /// initialisation is retried on the next demand cycle
    pub fn init(&mut self) -> bool {
        match self.sensor.init(&RANGING_CONFIG) {
            Ok(()) => {
                self.initialized = true;
                info!("Ranging sensor initialized");
            }
            Err(err) => {
                self.initialized = false;
                self.diagnostics
                    .set_last_error(format_args!("Ranging init: {:?}", err));
            }
        }
        self.initialized
    }

    /// Run one iteration of the acquisition loop
    pub fn step(&mut self) -> RunnerPhase {
        let now = self.ranging.now();
        let cycle = self.ranging.demand_cycle();

        let phase = match self.phase {
            RunnerPhase::Idle => {
                if self.ranging.has_demand() {
                    self.begin(now)
                } else {
                    RunnerPhase::Idle
                }
            }
            RunnerPhase::Faulted => {
                if !self.ranging.has_demand() {
                    info!("Ranging fault cleared, no more demand");
                    RunnerPhase::Idle
                } else if cycle != self.faulted_cycle {
                    info!("New ranging demand, retrying the sensor");
                    self.begin(now)
                } else {
                    RunnerPhase::Faulted
                }
            }
            _ if self.unused_expired(now) => {
                self.shutdown();
                RunnerPhase::Idle
            }
            RunnerPhase::Acquiring => self.poll(now),
            RunnerPhase::Recovering { attempts, retry_at } => {
                if now >= retry_at {
                    self.recover(attempts, now)
                } else {
                    self.phase
                }
            }
        };

        if phase.is_active() != self.phase.is_active() {
            self.ranging.set_active(phase.is_active());
        }
        if phase == RunnerPhase::Faulted {
            self.faulted_cycle = cycle;
        }
        self.phase = phase;
        phase
    }

    /// Run the acquisition loop forever. Parks while there is no demand.
    /// [`Self::init`] is expected to have run before
    pub async fn run(mut self) {
        info!("Task Ranging Started");

        loop {
            match self.step() {
                RunnerPhase::Idle | RunnerPhase::Faulted => {
                    self.ranging.wait_for_demand_change().await;
                }
                RunnerPhase::Acquiring | RunnerPhase::Recovering { .. } => {
                    Timer::after_millis(RANGING_POLL_INTERVAL_MS).await;
                }
            }
        }
    }

    fn unused_expired(&self, now: Instant) -> bool {
        self.ranging.unused_for(now) > Duration::millis(RANGING_UNUSED_TIMEOUT_MS)
    }

    fn begin(&mut self, now: Instant) -> RunnerPhase {
        if !self.initialized {
            return self.recover(0, now);
        }

        match self.start() {
            Ok(()) => {
                info!("Ranging started");
                RunnerPhase::Acquiring
            }
            Err(err) => {
                self.diagnostics
                    .set_last_error(format_args!("Ranging start: {:?}", err));
                RunnerPhase::Recovering {
                    attempts: 0,
                    retry_at: now,
                }
            }
        }
    }

    fn poll(&mut self, now: Instant) -> RunnerPhase {
        match self.sensor.data_ready() {
            Ok(true) => match self.read() {
                Ok(distance_mm) => {
                    debug!("Distance {} mm", distance_mm);
                    self.ranging.publish(distance_mm, now);
                    return RunnerPhase::Acquiring;
                }
                Err(err) => self.report(format_args!("Ranging read: {:?}", err)),
            },
            Ok(false) => match self.sensor.range_status() {
                Ok(RangeStatus::Valid) => return RunnerPhase::Acquiring,
                Ok(RangeStatus::Fault(status)) => {
                    self.report(format_args!("Ranging status: {}", status))
                }
                Err(err) => self.report(format_args!("Ranging status read: {:?}", err)),
            },
            Err(err) => self.report(format_args!("Ranging data ready: {:?}", err)),
        }

        // Demand is kept, the sensor is recovered in place
        self.recover(0, now)
    }

    fn read(&mut self) -> Result<u16, S::Error> {
        let distance_mm = self.sensor.distance_mm()?;
        self.sensor.clear_interrupt()?;
        Ok(distance_mm)
    }

    fn report(&self, message: core::fmt::Arguments) {
        self.diagnostics.set_last_error(message);
    }

    fn start(&mut self) -> Result<(), S::Error> {
        self.sensor.clear_interrupt()?;
        self.sensor.start_ranging()
    }

    fn shutdown(&mut self) {
        if let Err(err) = self
            .sensor
            .stop_ranging()
            .and_then(|_| self.sensor.clear_interrupt())
        {
            warn!("Could not stop ranging cleanly: {:?}", err);
        }
        info!(
            "Ranging stopped, unused for more than {} ms",
            RANGING_UNUSED_TIMEOUT_MS
        );
    }

    /// Full stop, shutdown, reinit and restart of the sensor
    fn recover(&mut self, attempts: u8, now: Instant) -> RunnerPhase {
        if self.initialized {
            self.sensor.stop_ranging().ok();
            self.sensor.clear_interrupt().ok();
        }
        self.sensor.deinit();
        self.initialized = false;

        let result = self
            .sensor
            .init(&RANGING_CONFIG)
            .and_then(|_| {
                self.initialized = true;
                self.start()
            });

        match result {
            Ok(()) => {
                info!("Ranging sensor (re)initialized and started");
                RunnerPhase::Acquiring
            }
            Err(err) => {
                let attempts = attempts + 1;
                if attempts >= RANGING_REINIT_ATTEMPTS {
                    self.diagnostics.set_last_error(format_args!(
                        "Ranging unavailable after {} reinit attempts: {:?}",
                        attempts, err
                    ));
                    RunnerPhase::Faulted
                } else {
                    warn!(
                        "Ranging reinit attempt {}/{} failed: {:?}",
                        attempts, RANGING_REINIT_ATTEMPTS, err
                    );
                    RunnerPhase::Recovering {
                        attempts,
                        retry_at: now + Duration::millis(RANGING_REINIT_DELAY_MS),
                    }
                }
            }
        }
    }
}
