use crate::ranging::sensor::{DistanceMode, RangingConfig};

// ---- User Parameters ----
// The lowest height the desk can be sent to in mm
pub const DESK_HEIGHT_MIN_MM: u16 = 650;
// The highest height the desk can be sent to in mm
pub const DESK_HEIGHT_MAX_MM: u16 = 1100;
// A move is done once the desk is this close to the target in mm
pub const DESK_HEIGHT_TOLERANCE_MM: u16 = 2;
// Switch from continuous driving to short bursts this close to the target in mm
pub const DESK_FINE_ADJUST_RANGE_MM: u16 = 20;
// Travel time allowed per mm of remaining distance
pub const DESK_ADJUST_TIMEOUT_PER_MM_MS: u64 = 75;
// Abort the move when no valid height was seen for this long
pub const DESK_RANGING_TIMEOUT_MS: u64 = 1000;

// ---- Speed calibration ----
// How long the desk is driven to measure its speed
pub const DESK_CALCULATE_SPEED_TIME_MS: u64 = 1000;
// In mm/ms. Anything slower is treated as a stall
pub const DESK_SPEED_MIN: f32 = 0.01;
// Calibration windows before giving up with a stall
pub const DESK_SPEED_TRIES: u8 = 3;

// ---- Fine adjustment ----
// Relays are released for this long before the height is sampled again
pub const DESK_FINE_ADJUST_SETTLE_MS: u64 = 250;
// Shortest burst. Also used when the speed is unknown
pub const DESK_FINE_ADJUST_PULSE_MIN_MS: u64 = 40;
pub const DESK_FINE_ADJUST_PULSE_MAX_MS: u64 = 300;
// Upper bound for the whole fine adjustment
pub const DESK_FINE_ADJUST_TIMEOUT_MS: u64 = 5000;

// ---- Ranging ----
// VL53L1X SPAD 199 is column 8, row 8 of the 16x16 array
pub const RANGING_CONFIG: RangingConfig = RangingConfig {
    distance_mode: DistanceMode::Short,
    timing_budget_ms: 100,
    roi_center: (8, 8),
    roi_width: 4,
    roi_height: 16,
};
// A sample older than this is never trusted
pub const RANGING_FRESHNESS_MS: u64 = DESK_RANGING_TIMEOUT_MS;
// Stop the sensor after nobody wanted samples for this long
pub const RANGING_UNUSED_TIMEOUT_MS: u64 = 2000;

// ---- Reporting ----
pub const REPORT_PERIOD_MS: u64 = 60_000;
pub const REPORT_MOVING_PERIOD_MS: u64 = 1000;
pub const REPORT_SAMPLE_TIMEOUT_MS: u64 = 500;

// ---- Buttons ----
pub const BUTTON_REQUESTER: &str = "button";

// ---- Critical parameters. No touchy unless you know what you are doing ----
// How often the desk state machine runs
pub const DESK_TICK_INTERVAL_MS: u64 = 10;
// How often the sensor is polled while ranging
pub const RANGING_POLL_INTERVAL_MS: u64 = 10;
// How often waiting consumers look at the shared sample
pub const RANGING_WAIT_POLL_INTERVAL_MS: u64 = 1;
// Sensor reinit attempts per fault before giving up until the next demand cycle
pub const RANGING_REINIT_ATTEMPTS: u8 = 3;
pub const RANGING_REINIT_DELAY_MS: u64 = 100;
pub const REPORT_POLL_INTERVAL_MS: u64 = 100;
// Buttons are sampled, not debounced
pub const BUTTON_POLL_INTERVAL_MS: u64 = 20;

// ---- String limits ----
pub const MAX_REQUESTER_LENGTH: usize = 32;
pub const MAX_DIAGNOSTIC_LENGTH: usize = 64;
pub const MAX_STATUS_LENGTH: usize = 192;
