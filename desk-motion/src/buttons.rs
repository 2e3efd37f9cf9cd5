//! Local buttons. Arrows move the desk while held, the stop button stops it.

use embassy_time::Ticker;
use enum_iterator::{Sequence, all};
use log::{info, warn};

use crate::{
    clock::Clock,
    config::{BUTTON_POLL_INTERVAL_MS, BUTTON_REQUESTER, DESK_HEIGHT_MAX_MM, DESK_HEIGHT_MIN_MM},
    desk::{Desk, relay::Relays},
    ranging::Consumer,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Sequence)]
pub enum Button {
    Up,
    Down,
    Stop,
}

/// Raw button levels
pub trait ButtonInputs {
    fn is_pressed(&mut self, button: Button) -> bool;
}

pub struct Buttons<'d, 'a, R: Relays, C: Clock, I: ButtonInputs> {
    desk: &'d Desk<'a, R, C>,
    inputs: I,
    pressed: [bool; Button::CARDINALITY],
}

impl<'d, 'a, R: Relays, C: Clock, I: ButtonInputs> Buttons<'d, 'a, R, C, I> {
    pub fn new(desk: &'d Desk<'a, R, C>, inputs: I) -> Self {
        Self {
            desk,
            inputs,
            pressed: [false; Button::CARDINALITY],
        }
    }

    /// Sample every button once and act on the edges
    pub fn poll(&mut self) {
        for button in all::<Button>() {
            let pressed = self.inputs.is_pressed(button);
            let index = button as usize;
            if pressed != self.pressed[index] {
                self.pressed[index] = pressed;
                self.on_edge(button, pressed);
            }
        }
    }

    fn on_edge(&mut self, button: Button, pressed: bool) {
        let ranging = self.desk.ranging();

        match (button, pressed) {
            (Button::Stop, true) => {
                info!("Stop button");
                self.desk.stop();
            }
            (Button::Stop, false) => {}
            (Button::Up | Button::Down, true) => {
                ranging.acquire(Consumer::Buttons);
                let target = match button {
                    Button::Up => DESK_HEIGHT_MAX_MM,
                    _ => DESK_HEIGHT_MIN_MM,
                };
                if let Err(err) = self.desk.adjust_height(target, BUTTON_REQUESTER) {
                    warn!("Button move refused: {}", err);
                }
            }
            (Button::Up | Button::Down, false) => {
                self.desk.stop();
                if !self.arrow_held() {
                    ranging.release(Consumer::Buttons);
                }
            }
        }
    }

    fn arrow_held(&self) -> bool {
        self.pressed[Button::Up as usize] || self.pressed[Button::Down as usize]
    }

    pub async fn run(mut self) {
        let mut ticker =
            Ticker::every(embassy_time::Duration::from_millis(BUTTON_POLL_INTERVAL_MS));

        info!("Task Buttons Started");

        loop {
            self.poll();
            ticker.next().await;
        }
    }
}
