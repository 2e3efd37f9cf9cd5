use core::fmt::Debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DistanceMode {
    Short,
    Long,
}

/// Everything that has to be reapplied after the sensor was reinitialised
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangingConfig {
    pub distance_mode: DistanceMode,
    pub timing_budget_ms: u16,
    // (column, row) of the region of interest center in the SPAD array
    pub roi_center: (u8, u8),
    pub roi_width: u16,
    pub roi_height: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RangeStatus {
    Valid,
    // Raw status code reported by the sensor
    Fault(u8),
}

/// A time-of-flight distance sensor. Only the ranging runner talks to it
pub trait RangingSensor {
    type Error: Debug;

    /// Boot the sensor and apply the config. Leaves acquisition stopped
    fn init(&mut self, config: &RangingConfig) -> Result<(), Self::Error>;

    /// Shut the sensor down completely, ignoring errors
    fn deinit(&mut self);

    fn start_ranging(&mut self) -> Result<(), Self::Error>;

    fn stop_ranging(&mut self) -> Result<(), Self::Error>;

    /// Clear the data ready latch
    fn clear_interrupt(&mut self) -> Result<(), Self::Error>;

    fn data_ready(&mut self) -> Result<bool, Self::Error>;

    /// Distance of the last measurement in mm
    fn distance_mm(&mut self) -> Result<u16, Self::Error>;

    fn range_status(&mut self) -> Result<RangeStatus, Self::Error>;
}
