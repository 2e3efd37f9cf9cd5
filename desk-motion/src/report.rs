//! Periodic status reports towards the messaging bridge.

use embassy_time::Ticker;
use log::info;

use crate::{
    clock::{Clock, Duration, Instant, elapsed},
    config::{
        REPORT_MOVING_PERIOD_MS, REPORT_PERIOD_MS, REPORT_POLL_INTERVAL_MS,
        REPORT_SAMPLE_TIMEOUT_MS,
    },
    desk::{
        Desk,
        relay::{Direction, Relays},
        state::DeskStatus,
    },
    ranging::Consumer,
};

/// Where finished reports go
pub trait StatusSink {
    fn publish(&mut self, status: &DeskStatus);
}

/// Writes every report to the log as JSON
pub struct LogSink;

impl StatusSink for LogSink {
    fn publish(&mut self, status: &DeskStatus) {
        info!("Status {}", status.as_json());
    }
}

pub struct Reporter<'d, 'a, R: Relays, C: Clock, S: StatusSink> {
    desk: &'d Desk<'a, R, C>,
    sink: S,
    last_report: Option<Instant>,
    last_direction: Direction,
}

impl<'d, 'a, R: Relays, C: Clock, S: StatusSink> Reporter<'d, 'a, R, C, S> {
    pub fn new(desk: &'d Desk<'a, R, C>, sink: S) -> Self {
        Self {
            desk,
            sink,
            last_report: None,
            last_direction: Direction::Stopped,
        }
    }

    /// Whether `status` has to be reported at `now`
    pub fn is_due(&self, now: Instant, status: &DeskStatus) -> bool {
        let Some(last_report) = self.last_report else {
            return true;
        };

        if status.direction != self.last_direction {
            return true;
        }

        let period = if status.is_moving() {
            REPORT_MOVING_PERIOD_MS
        } else {
            REPORT_PERIOD_MS
        };
        elapsed(now, last_report) >= Duration::millis(period)
    }

    /// Produce one report. Ranging demand is only held while waiting for the height
    pub async fn report(&mut self) {
        let ranging = self.desk.ranging();

        ranging.acquire(Consumer::Reporter);
        let sample = ranging
            .wait_for_valid_sample(Duration::millis(REPORT_SAMPLE_TIMEOUT_MS))
            .await;
        ranging.release(Consumer::Reporter);

        let mut status = self.desk.status();
        status.height = sample.height_mm();

        self.last_report = Some(ranging.now());
        self.last_direction = status.direction;
        self.sink.publish(&status);
    }

    pub async fn run(mut self) {
        let mut ticker =
            Ticker::every(embassy_time::Duration::from_millis(REPORT_POLL_INTERVAL_MS));

        info!("Task Reporter Started");

        loop {
            let status = self.desk.status();
            if self.is_due(self.desk.ranging().now(), &status) {
                self.report().await;
            }
            ticker.next().await;
        }
    }
}

pub async fn run_reporter<R: Relays, C: Clock, S: StatusSink>(desk: &Desk<'_, R, C>, sink: S) {
    Reporter::new(desk, sink).run().await;
}
