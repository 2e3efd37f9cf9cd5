//! Simulated desk: an actuator that moves at a fixed speed while a relay is
//! energised, and a distance sensor looking at it.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use desk_motion::{
    desk::relay::{Direction, Relays},
    ranging::sensor::{RangeStatus, RangingConfig, RangingSensor},
};
use log::{debug, info, warn};

// In mm/s
const DESK_SPEED: f32 = 35.0;
const PHYSICS_INTERVAL_MS: u64 = 5;

pub struct PlantState {
    pub height: f32,
    pub output: Direction,
    pub stalled_until: Option<Instant>,
    pub fault_pending: bool,
    ranging: bool,
    timing_budget: Duration,
    last_reading: Instant,
}

#[derive(Clone)]
pub struct Plant(Arc<Mutex<PlantState>>);

impl Plant {
    pub fn new(height: f32) -> Self {
        Self(Arc::new(Mutex::new(PlantState {
            height,
            output: Direction::Stopped,
            stalled_until: None,
            fault_pending: false,
            ranging: false,
            timing_budget: Duration::from_millis(100),
            last_reading: Instant::now(),
        })))
    }

    pub fn state(&self) -> MutexGuard<'_, PlantState> {
        // A panic elsewhere already ends the simulation
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Integrate the actuator forever
    pub async fn run(self) {
        let mut interval = tokio::time::interval(Duration::from_millis(PHYSICS_INTERVAL_MS));
        let mut last = Instant::now();
        loop {
            interval.tick().await;
            let now = Instant::now();
            let dt = now.duration_since(last).as_secs_f32();
            last = now;

            let mut state = self.state();
            if state.stalled_until.is_some_and(|until| now < until) {
                continue;
            }
            state.stalled_until = None;
            match state.output {
                Direction::Up => state.height += DESK_SPEED * dt,
                Direction::Down => state.height -= DESK_SPEED * dt,
                Direction::Stopped => {}
            }
        }
    }
}

pub struct SimRelays(pub Plant);

impl Relays for SimRelays {
    fn drive(&mut self, direction: Direction) {
        let mut state = self.0.state();
        if state.output != direction {
            info!("Relays {:?} at {:.1} mm", direction, state.height);
        }
        state.output = direction;
    }
}

#[derive(Debug)]
pub enum SimSensorError {
    NotRanging,
}

pub struct SimSensor(pub Plant);

impl RangingSensor for SimSensor {
    type Error = SimSensorError;

    fn init(&mut self, config: &RangingConfig) -> Result<(), Self::Error> {
        debug!("Sensor init {:?}", config);
        self.0.state().timing_budget = Duration::from_millis(config.timing_budget_ms as u64);
        Ok(())
    }

    fn deinit(&mut self) {
        self.0.state().ranging = false;
    }

    fn start_ranging(&mut self) -> Result<(), Self::Error> {
        let mut state = self.0.state();
        state.ranging = true;
        state.last_reading = Instant::now();
        Ok(())
    }

    fn stop_ranging(&mut self) -> Result<(), Self::Error> {
        self.0.state().ranging = false;
        Ok(())
    }

    fn clear_interrupt(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn data_ready(&mut self) -> Result<bool, Self::Error> {
        let state = self.0.state();
        Ok(state.ranging && state.last_reading.elapsed() >= state.timing_budget)
    }

    fn distance_mm(&mut self) -> Result<u16, Self::Error> {
        let mut state = self.0.state();
        if !state.ranging {
            return Err(SimSensorError::NotRanging);
        }
        state.last_reading = Instant::now();
        Ok(state.height.round() as u16)
    }

    fn range_status(&mut self) -> Result<RangeStatus, Self::Error> {
        let mut state = self.0.state();
        if state.fault_pending {
            state.fault_pending = false;
            warn!("Injecting a range fault");
            // Wrap target fail
            return Ok(RangeStatus::Fault(7));
        }
        Ok(RangeStatus::Valid)
    }
}
