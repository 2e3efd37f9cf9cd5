pub type ClockDuration = fugit::Duration<u64, 1, 1_000_000>;
pub type ClockInstant = fugit::Instant<u64, 1, 1_000_000>;

pub use ClockDuration as Duration;
pub use ClockInstant as Instant;

/// Monotonic time source for the desk core
pub trait Clock {
    fn now(&self) -> Instant;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// Clock backed by the embassy time driver of the platform
#[derive(Clone, Copy, Default)]
pub struct EmbassyClock;

impl Clock for EmbassyClock {
    fn now(&self) -> Instant {
        Instant::from_ticks(embassy_time::Instant::now().as_micros())
    }
}

/// Time elapsed from `since` to `now`. Zero if `since` is in the future.
pub fn elapsed(now: Instant, since: Instant) -> Duration {
    now.checked_duration_since(since)
        .unwrap_or(Duration::from_ticks(0))
}
