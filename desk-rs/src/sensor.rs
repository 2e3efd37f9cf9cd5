use desk_motion::ranging::{
    runner::RangingRunner,
    sensor::{DistanceMode, RangeStatus, RangingConfig, RangingSensor},
};
use esp_hal::{i2c::master::I2c, Blocking};
use vl53l1x_uld::{self, roi::ROICenter, roi::ROI, IOVoltage, VL53L1X};

use crate::EspClock;

type Vl53l1xError = vl53l1x_uld::Error<esp_hal::i2c::master::Error>;

/// VL53L1X on the shared I2C bus, driven through the ultra lite driver
pub struct Vl53l1xSensor {
    device: VL53L1X<I2c<'static, Blocking>>,
}

impl Vl53l1xSensor {
    pub fn new(i2c: I2c<'static, Blocking>) -> Self {
        Self {
            device: VL53L1X::new(i2c, vl53l1x_uld::DEFAULT_ADDRESS),
        }
    }
}

impl RangingSensor for Vl53l1xSensor {
    type Error = Vl53l1xError;

    fn init(&mut self, config: &RangingConfig) -> Result<(), Self::Error> {
        self.device.init(IOVoltage::Volt2_8)?;
        self.device.set_distance_mode(match config.distance_mode {
            DistanceMode::Short => vl53l1x_uld::DistanceMode::Short,
            DistanceMode::Long => vl53l1x_uld::DistanceMode::Long,
        })?;
        self.device.set_timing_budget_ms(config.timing_budget_ms)?;
        self.device
            .set_roi(ROI::new(config.roi_width, config.roi_height))?;
        self.device
            .set_roi_center(ROICenter::new(config.roi_center.0, config.roi_center.1))?;
        Ok(())
    }

    // The ULD has no shutdown. A stopped sensor is reinitialised from scratch
    fn deinit(&mut self) {}

    fn start_ranging(&mut self) -> Result<(), Self::Error> {
        self.device.start_ranging()
    }

    fn stop_ranging(&mut self) -> Result<(), Self::Error> {
        self.device.stop_ranging()
    }

    fn clear_interrupt(&mut self) -> Result<(), Self::Error> {
        self.device.clear_interrupt()
    }

    fn data_ready(&mut self) -> Result<bool, Self::Error> {
        self.device.is_data_ready()
    }

    fn distance_mm(&mut self) -> Result<u16, Self::Error> {
        self.device.get_distance()
    }

    fn range_status(&mut self) -> Result<RangeStatus, Self::Error> {
        Ok(match self.device.get_range_status()? {
            vl53l1x_uld::RangeStatus::Valid => RangeStatus::Valid,
            status => RangeStatus::Fault(status as u8),
        })
    }
}

#[embassy_executor::task]
pub async fn ranging_task(runner: RangingRunner<'static, Vl53l1xSensor, EspClock>) {
    runner.run().await;
}
