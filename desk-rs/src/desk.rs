use desk_motion::{
    desk::{run_desk, Desk},
    report::{run_reporter, LogSink},
};

use crate::{relays::GpioRelays, EspClock};

pub type EspDesk = Desk<'static, GpioRelays, EspClock>;

#[embassy_executor::task]
pub async fn desk_task(desk: &'static EspDesk) {
    run_desk(desk).await;
}

#[embassy_executor::task]
pub async fn report_task(desk: &'static EspDesk) {
    run_reporter(desk, LogSink).await;
}
