use esp_hal::gpio::AnyPin;

pub struct Pins {
    pub sensor_sda: AnyPin<'static>,
    pub sensor_scl: AnyPin<'static>,
    pub relay_up: AnyPin<'static>,
    pub relay_down: AnyPin<'static>,
    pub button_up: AnyPin<'static>,
    pub button_down: AnyPin<'static>,
    pub button_stop: AnyPin<'static>,
}
