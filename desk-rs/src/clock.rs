use desk_motion::clock::{Clock, Instant};

#[derive(Clone, Copy)]
pub struct EspClock {}

impl EspClock {
    pub fn new() -> Self {
        Self {}
    }
}

impl Clock for EspClock {
    fn now(&self) -> Instant {
        let duration = esp_hal::time::Instant::now().duration_since_epoch();

        Instant::from_ticks(duration.as_micros())
    }
}
