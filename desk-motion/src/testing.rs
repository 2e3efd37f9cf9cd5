//! Stepping harness for the controller and the ranging loop.
//!
//! A tiny actuator model sits behind fake relays and a fake sensor. Time only
//! moves when the rig is stepped.

use std::{
    boxed::Box,
    cell::{Ref, RefCell, RefMut},
    rc::Rc,
    vec::Vec,
};

pub use crate::clock::testing::FakeClock;
use crate::{
    clock::Clock,
    desk::{
        Desk,
        relay::{Direction, Relays},
    },
    diagnostics::Diagnostics,
    ranging::{
        Ranging,
        runner::RangingRunner,
        sensor::{RangeStatus, RangingConfig, RangingSensor},
    },
};

pub type TestClock = &'static FakeClock;

const STEP_MS: u64 = 10;
// Matches the configured timing budget
const READING_INTERVAL_MS: u64 = 100;

pub struct Plant {
    pub height: f32,
    // In mm/ms
    pub speed: f32,
    pub stalled: bool,
    pub output: Direction,
    /// Every call to the relays, in order
    pub drives: Vec<Direction>,
    /// Set when the relays were flipped without passing through neutral
    pub direct_reversal: bool,

    pub ranging: bool,
    pub frozen: bool,
    pub fault_once: bool,
    pub init_failures: u8,
    pub inits: u32,
    pub starts: u32,
    since_reading_ms: u64,
}

impl Plant {
    pub fn at(height: f32) -> Self {
        Self {
            height,
            speed: 0.035,
            stalled: false,
            output: Direction::Stopped,
            drives: Vec::new(),
            direct_reversal: false,
            ranging: false,
            frozen: false,
            fault_once: false,
            init_failures: 0,
            inits: 0,
            starts: 0,
            since_reading_ms: 0,
        }
    }

    fn advance(&mut self, ms: u64) {
        if !self.stalled {
            let travel = self.speed * ms as f32;
            match self.output {
                Direction::Up => self.height += travel,
                Direction::Down => self.height -= travel,
                Direction::Stopped => {}
            }
        }
        self.since_reading_ms += ms;
    }

    /// Relays were energized at some point
    pub fn energized(&self) -> bool {
        self.drives.iter().any(|drive| *drive != Direction::Stopped)
    }
}

pub type SharedPlant = Rc<RefCell<Plant>>;

pub struct FakeRelays(SharedPlant);

impl Relays for FakeRelays {
    fn drive(&mut self, direction: Direction) {
        let mut plant = self.0.borrow_mut();
        if plant.output != Direction::Stopped
            && direction != Direction::Stopped
            && plant.output != direction
        {
            plant.direct_reversal = true;
        }
        plant.output = direction;
        plant.drives.push(direction);
    }
}

#[derive(Debug)]
pub enum FakeSensorError {
    InitFailed,
    NotInitialized,
}

pub struct FakeSensor {
    plant: SharedPlant,
    initialized: bool,
}

impl RangingSensor for FakeSensor {
    type Error = FakeSensorError;

    fn init(&mut self, _config: &RangingConfig) -> Result<(), Self::Error> {
        let mut plant = self.plant.borrow_mut();
        plant.inits += 1;
        if plant.init_failures > 0 {
            plant.init_failures -= 1;
            return Err(FakeSensorError::InitFailed);
        }
        self.initialized = true;
        Ok(())
    }

    fn deinit(&mut self) {
        self.initialized = false;
        self.plant.borrow_mut().ranging = false;
    }

    fn start_ranging(&mut self) -> Result<(), Self::Error> {
        if !self.initialized {
            return Err(FakeSensorError::NotInitialized);
        }
        let mut plant = self.plant.borrow_mut();
        plant.ranging = true;
        plant.starts += 1;
        plant.since_reading_ms = 0;
        Ok(())
    }

    fn stop_ranging(&mut self) -> Result<(), Self::Error> {
        self.plant.borrow_mut().ranging = false;
        Ok(())
    }

    fn clear_interrupt(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn data_ready(&mut self) -> Result<bool, Self::Error> {
        let plant = self.plant.borrow();
        Ok(plant.ranging && !plant.frozen && plant.since_reading_ms >= READING_INTERVAL_MS)
    }

    fn distance_mm(&mut self) -> Result<u16, Self::Error> {
        let mut plant = self.plant.borrow_mut();
        plant.since_reading_ms = 0;
        Ok(plant.height.round() as u16)
    }

    fn range_status(&mut self) -> Result<RangeStatus, Self::Error> {
        let mut plant = self.plant.borrow_mut();
        if plant.fault_once {
            plant.fault_once = false;
            return Ok(RangeStatus::Fault(4));
        }
        Ok(RangeStatus::Valid)
    }
}

pub struct Rig {
    pub clock: TestClock,
    pub ranging: &'static Ranging<TestClock>,
    pub diagnostics: &'static Diagnostics,
    pub runner: RangingRunner<'static, FakeSensor, TestClock>,
    pub desk: Desk<'static, FakeRelays, TestClock>,
    plant: SharedPlant,
}

impl Rig {
    /// Desk resting at its lowest position
    pub fn new() -> Self {
        Self::with_plant(Plant::at(650.0))
    }

    pub fn with_plant(plant: Plant) -> Self {
        let clock: TestClock = Box::leak(Box::new(FakeClock::new()));
        let ranging: &'static Ranging<TestClock> = Box::leak(Box::new(Ranging::new(clock)));
        let diagnostics: &'static Diagnostics = Box::leak(Box::new(Diagnostics::new()));
        let plant = Rc::new(RefCell::new(plant));

        let mut runner = RangingRunner::new(
            ranging,
            diagnostics,
            FakeSensor {
                plant: plant.clone(),
                initialized: false,
            },
        );
        runner.init();
        let desk = Desk::new(FakeRelays(plant.clone()), ranging, diagnostics);

        Self {
            clock,
            ranging,
            diagnostics,
            runner,
            desk,
            plant,
        }
    }

    pub fn plant(&self) -> Ref<'_, Plant> {
        self.plant.borrow()
    }

    pub fn plant_mut(&self) -> RefMut<'_, Plant> {
        self.plant.borrow_mut()
    }

    /// Another sensor on the same plant, not initialized yet
    pub fn sensor(&self) -> FakeSensor {
        FakeSensor {
            plant: self.plant.clone(),
            initialized: false,
        }
    }

    pub fn height(&self) -> f32 {
        self.plant().height
    }

    /// One 10 ms slice: physics, then the ranging loop, then the controller
    pub fn step(&mut self) {
        self.clock.advance_ms(STEP_MS);
        self.plant.borrow_mut().advance(STEP_MS);
        self.runner.step();
        self.desk.tick();
    }

    pub fn run_ms(&mut self, ms: u64) {
        for _ in 0..ms / STEP_MS {
            self.step();
        }
    }

    /// Step until `done` holds. False if it did not within `limit_ms`
    pub fn run_until(&mut self, limit_ms: u64, done: impl Fn(&Self) -> bool) -> bool {
        for _ in 0..limit_ms / STEP_MS {
            if done(self) {
                return true;
            }
            self.step();
        }
        done(self)
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now().ticks() / 1000
    }
}
