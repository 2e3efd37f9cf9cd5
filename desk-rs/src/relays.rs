use desk_motion::desk::relay::{Direction, Relays};
use esp_hal::gpio::Output;

/// Two active high relays. Energising one always releases the other first
pub struct GpioRelays {
    up: Output<'static>,
    down: Output<'static>,
}

impl GpioRelays {
    pub fn new(up: Output<'static>, down: Output<'static>) -> Self {
        Self { up, down }
    }
}

impl Relays for GpioRelays {
    fn drive(&mut self, direction: Direction) {
        match direction {
            Direction::Stopped => {
                self.up.set_low();
                self.down.set_low();
            }
            Direction::Up => {
                self.down.set_low();
                self.up.set_high();
            }
            Direction::Down => {
                self.up.set_low();
                self.down.set_high();
            }
        }
    }
}
