#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]

#[cfg(not(feature = "board_selected"))]
compile_error!("No board selected!");

mod board;
mod buttons;
mod clock;
mod desk;
mod relays;
mod sensor;

pub use clock::EspClock;
pub use desk_motion::config;

use crate::board::Pins;
use crate::buttons::{buttons_task, GpioButtons};
use crate::desk::{desk_task, report_task, EspDesk};
use crate::relays::GpioRelays;
use crate::sensor::{ranging_task, Vl53l1xSensor};

use desk_motion::{
    buttons::Buttons, desk::Desk, diagnostics::Diagnostics, ranging::runner::RangingRunner,
    ranging::Ranging,
};
use embassy_executor::Spawner;
use embassy_time::{Duration, Timer};
use esp_hal::{
    clock::CpuClock,
    gpio::{Input, InputConfig, Level, Output, OutputConfig, Pin, Pull},
    i2c::{self, master::I2c},
    time::Rate,
    timer::systimer::SystemTimer,
};
use log::info;

#[cfg(target_arch = "riscv32")]
use esp_hal::interrupt::software::SoftwareInterruptControl;

use {esp_backtrace as _, esp_println as _};

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

// When you are okay with using a nightly compiler it's better to use https://docs.rs/static_cell/2.1.0/static_cell/macro.make_static.html
macro_rules! mk_static {
    ($t:ty,$val:expr) => {{
        static STATIC_CELL: static_cell::StaticCell<$t> = static_cell::StaticCell::new();
        #[deny(unused_attributes)]
        let x = STATIC_CELL.uninit().write(($val));
        x
    }};
}

static DIAGNOSTICS: Diagnostics = Diagnostics::new();

#[esp_rtos::main]
async fn main(spawner: Spawner) {
    esp_println::logger::init_logger_from_env();

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(size: 32 * 1024);

    info!("Welcome to desk-rs");
    info!("Version: {}", env!("VERGEN_GIT_DESCRIBE"));

    // Dummy board to avoid LSP complaints
    #[cfg(not(feature = "board_selected"))]
    let pins = {
        Pins {
            sensor_sda: peripherals.GPIO8.degrade(),
            sensor_scl: peripherals.GPIO9.degrade(),
            relay_up: peripherals.GPIO10.degrade(),
            relay_down: peripherals.GPIO11.degrade(),
            button_up: peripherals.GPIO17.degrade(),
            button_down: peripherals.GPIO18.degrade(),
            button_stop: peripherals.GPIO14.degrade(),
        }
    };

    #[cfg(feature = "board_devkit_s3")]
    let pins = {
        info!("Board: ESP32-S3 DevKit");
        Pins {
            sensor_sda: peripherals.GPIO8.degrade(),
            sensor_scl: peripherals.GPIO9.degrade(),
            relay_up: peripherals.GPIO10.degrade(),
            relay_down: peripherals.GPIO11.degrade(),
            button_up: peripherals.GPIO17.degrade(),
            button_down: peripherals.GPIO18.degrade(),
            button_stop: peripherals.GPIO14.degrade(),
        }
    };

    #[cfg(feature = "board_devkit_c6")]
    let pins = {
        info!("Board: ESP32-C6 DevKit");
        Pins {
            sensor_sda: peripherals.GPIO6.degrade(),
            sensor_scl: peripherals.GPIO7.degrade(),
            relay_up: peripherals.GPIO10.degrade(),
            relay_down: peripherals.GPIO11.degrade(),
            button_up: peripherals.GPIO2.degrade(),
            button_down: peripherals.GPIO3.degrade(),
            button_stop: peripherals.GPIO4.degrade(),
        }
    };

    #[cfg(feature = "board_xiao_c6")]
    let pins = {
        info!("Board: Seeed Xiao C6");
        Pins {
            sensor_sda: peripherals.GPIO22.degrade(),
            sensor_scl: peripherals.GPIO23.degrade(),
            relay_up: peripherals.GPIO0.degrade(),
            relay_down: peripherals.GPIO1.degrade(),
            button_up: peripherals.GPIO2.degrade(),
            button_down: peripherals.GPIO21.degrade(),
            button_stop: peripherals.GPIO16.degrade(),
        }
    };

    let systimer = SystemTimer::new(peripherals.SYSTIMER);

    #[cfg(target_arch = "riscv32")]
    let sw_int = SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);

    esp_rtos::start(
        systimer.alarm0,
        #[cfg(target_arch = "riscv32")]
        sw_int.software_interrupt0,
    );

    // Relays first so the actuator is released as early as possible
    let relays = GpioRelays::new(
        Output::new(pins.relay_up, Level::Low, OutputConfig::default()),
        Output::new(pins.relay_down, Level::Low, OutputConfig::default()),
    );

    let i2c = I2c::new(
        peripherals.I2C0,
        i2c::master::Config::default().with_frequency(Rate::from_khz(400)),
    )
    .expect("Failed to initialize I2C")
    .with_sda(pins.sensor_sda)
    .with_scl(pins.sensor_scl);

    let ranging = &*mk_static!(Ranging<EspClock>, Ranging::new(EspClock::new()));
    let desk = &*mk_static!(EspDesk, Desk::new(relays, ranging, &DIAGNOSTICS));

    let mut runner = RangingRunner::new(ranging, &DIAGNOSTICS, Vl53l1xSensor::new(i2c));
    // Let the sensor boot
    Timer::after(Duration::from_millis(100)).await;
    runner.init();

    let input_config = InputConfig::default().with_pull(Pull::Up);
    let buttons = GpioButtons {
        up: Input::new(pins.button_up, input_config),
        down: Input::new(pins.button_down, input_config),
        stop: Input::new(pins.button_stop, input_config),
    };

    spawner.must_spawn(ranging_task(runner));
    spawner.must_spawn(desk_task(desk));
    spawner.must_spawn(report_task(desk));
    spawner.must_spawn(buttons_task(Buttons::new(desk, buttons)));

    loop {
        Timer::after(Duration::from_millis(5000)).await;
    }
}
