use desk_motion::buttons::{Button, ButtonInputs, Buttons};
use esp_hal::gpio::Input;

use crate::{relays::GpioRelays, EspClock};

/// Buttons pull the input low when pressed
pub struct GpioButtons {
    pub up: Input<'static>,
    pub down: Input<'static>,
    pub stop: Input<'static>,
}

impl ButtonInputs for GpioButtons {
    fn is_pressed(&mut self, button: Button) -> bool {
        match button {
            Button::Up => self.up.is_low(),
            Button::Down => self.down.is_low(),
            Button::Stop => self.stop.is_low(),
        }
    }
}

#[embassy_executor::task]
pub async fn buttons_task(buttons: Buttons<'static, 'static, GpioRelays, EspClock, GpioButtons>) {
    buttons.run().await;
}
