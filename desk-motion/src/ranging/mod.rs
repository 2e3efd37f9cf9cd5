//! Sharing one distance sensor between several consumers.
//!
//! Consumers never touch the sensor. They hold a demand token through
//! [`Ranging::acquire`] and read the shared [`DistanceSample`]. The
//! [`runner::RangingRunner`] owns the sensor and keeps it acquiring exactly
//! while somebody holds demand, plus a grace period after the last release.

pub mod runner;
pub mod sensor;

use core::cell::RefCell;

use embassy_sync::{
    blocking_mutex::{Mutex, raw::CriticalSectionRawMutex},
    signal::Signal,
};
use embassy_time::Timer;
use enum_iterator::Sequence;
use heapless::Vec;
use log::debug;

use crate::{
    clock::{Clock, Duration, Instant, elapsed},
    config::{RANGING_FRESHNESS_MS, RANGING_WAIT_POLL_INTERVAL_MS},
};

/// A height reading as published by the ranging runner
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DistanceSample {
    pub distance_mm: u16,
    // When the reading was taken off the sensor
    pub time: Instant,
    pub valid: bool,
}

impl DistanceSample {
    pub const fn invalid() -> Self {
        Self {
            distance_mm: 0,
            time: Instant::from_ticks(0),
            valid: false,
        }
    }

    pub fn age(&self, now: Instant) -> Duration {
        elapsed(now, self.time)
    }

    pub fn is_fresh(&self, now: Instant) -> bool {
        self.valid && self.age(now) <= Duration::millis(RANGING_FRESHNESS_MS)
    }

    /// The sample as seen at `now`. Stale samples come back invalid
    pub fn checked(self, now: Instant) -> Self {
        Self {
            valid: self.is_fresh(now),
            ..self
        }
    }

    pub fn height_mm(&self) -> Option<u16> {
        self.valid.then_some(self.distance_mm)
    }
}

/// Named holders of ranging demand
#[derive(Clone, Copy, Debug, PartialEq, Eq, Sequence)]
pub enum Consumer {
    Desk,
    Reporter,
    Buttons,
}

const MAX_CONSUMERS: usize = <Consumer as Sequence>::CARDINALITY;

/// The set of consumers currently wanting samples
#[derive(Clone, Debug, Default)]
pub struct Demand {
    holders: Vec<Consumer, MAX_CONSUMERS>,
}

impl Demand {
    pub const fn new() -> Self {
        Self {
            holders: Vec::new(),
        }
    }

    /// Returns true if the consumer was not holding demand before
    pub fn insert(&mut self, consumer: Consumer) -> bool {
        if self.contains(consumer) {
            return false;
        }
        // Holders are unique so there is always room
        self.holders.push(consumer).is_ok()
    }

    /// Returns true if the consumer was holding demand
    pub fn remove(&mut self, consumer: Consumer) -> bool {
        match self.holders.iter().position(|c| *c == consumer) {
            Some(index) => {
                self.holders.swap_remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, consumer: Consumer) -> bool {
        self.holders.contains(&consumer)
    }

    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Consumer> + '_ {
        self.holders.iter().copied()
    }
}

struct RangingState {
    demand: Demand,
    sample: DistanceSample,
    active: bool,
    // Last instant at which the demand set was non-empty
    last_demand: Instant,
    // Bumped whenever a consumer joins the demand set
    cycle: u32,
}

/// Shared handle of the ranging arbiter
pub struct Ranging<C: Clock> {
    clock: C,
    state: Mutex<CriticalSectionRawMutex, RefCell<RangingState>>,
    demand_changed: Signal<CriticalSectionRawMutex, ()>,
}

impl<C: Clock> Ranging<C> {
    pub fn new(clock: C) -> Self {
        let now = clock.now();
        Self {
            clock,
            state: Mutex::new(RefCell::new(RangingState {
                demand: Demand::new(),
                sample: DistanceSample::invalid(),
                active: false,
                last_demand: now,
                cycle: 0,
            })),
            demand_changed: Signal::new(),
        }
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Register demand. A no-op if the consumer already holds it
    pub fn acquire(&self, consumer: Consumer) {
        let now = self.now();
        let added = self.state.lock(|state| {
            let mut state = state.borrow_mut();
            state.last_demand = now;
            let added = state.demand.insert(consumer);
            if added {
                state.cycle = state.cycle.wrapping_add(1);
            }
            added
        });
        if added {
            debug!("Ranging acquired by {:?}", consumer);
            self.demand_changed.signal(());
        }
    }

    /// Drop demand. A no-op if the consumer does not hold it
    pub fn release(&self, consumer: Consumer) {
        let now = self.now();
        let removed = self.state.lock(|state| {
            let mut state = state.borrow_mut();
            let removed = state.demand.remove(consumer);
            if removed {
                state.last_demand = now;
            }
            removed
        });
        if removed {
            debug!("Ranging released by {:?}", consumer);
            self.demand_changed.signal(());
        }
    }

    pub fn is_held(&self, consumer: Consumer) -> bool {
        self.state
            .lock(|state| state.borrow().demand.contains(consumer))
    }

    pub fn has_demand(&self) -> bool {
        self.state.lock(|state| !state.borrow().demand.is_empty())
    }

    pub fn demand(&self) -> Demand {
        self.state.lock(|state| state.borrow().demand.clone())
    }

    /// Whether the runner currently keeps the sensor acquiring
    pub fn is_active(&self) -> bool {
        self.state.lock(|state| state.borrow().active)
    }

    /// The most recent sample, invalid if it is older than the freshness window.
    /// Only meaningful while the caller holds demand
    pub fn latest_sample(&self) -> DistanceSample {
        let now = self.now();
        self.state
            .lock(|state| state.borrow().sample)
            .checked(now)
    }

    /// Wait for a valid sample taken after the call.
    /// On timeout the latest sample is returned marked invalid
    pub async fn wait_for_fresh_sample(&self, timeout: Duration) -> DistanceSample {
        let since = self.now();
        self.wait_for(timeout, |sample| sample.valid && sample.time > since)
            .await
    }

    /// Wait until the shared sample is valid, however old within the freshness window
    pub async fn wait_for_valid_sample(&self, timeout: Duration) -> DistanceSample {
        self.wait_for(timeout, |sample| sample.valid).await
    }

    async fn wait_for(
        &self,
        timeout: Duration,
        accept: impl Fn(&DistanceSample) -> bool,
    ) -> DistanceSample {
        let start = self.now();
        loop {
            let sample = self.latest_sample();
            if accept(&sample) {
                return sample;
            }
            if elapsed(self.now(), start) >= timeout {
                return DistanceSample {
                    valid: false,
                    ..sample
                };
            }
            Timer::after_millis(RANGING_WAIT_POLL_INTERVAL_MS).await;
        }
    }

    /// Changes every time a consumer starts holding demand
    pub(crate) fn demand_cycle(&self) -> u32 {
        self.state.lock(|state| state.borrow().cycle)
    }

    pub(crate) fn publish(&self, distance_mm: u16, time: Instant) {
        self.state.lock(|state| {
            state.borrow_mut().sample = DistanceSample {
                distance_mm,
                time,
                valid: true,
            };
        });
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.state
            .lock(|state| state.borrow_mut().active = active);
    }

    /// How long nobody held demand. Zero while demand is held
    pub(crate) fn unused_for(&self, now: Instant) -> Duration {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            if state.demand.is_empty() {
                elapsed(now, state.last_demand)
            } else {
                state.last_demand = now;
                Duration::from_ticks(0)
            }
        })
    }

    pub(crate) async fn wait_for_demand_change(&self) {
        self.demand_changed.wait().await;
    }
}
