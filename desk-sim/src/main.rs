mod plant;
mod script;

use std::{env, time::Duration};

use desk_motion::{
    clock::EmbassyClock,
    desk::{Desk, run_desk, state::DeskStatus},
    diagnostics::Diagnostics,
    ranging::{Ranging, runner::RangingRunner},
    report::{StatusSink, run_reporter},
};
use log::{error, info};
use tokio::task;

use crate::{
    plant::{Plant, SimRelays, SimSensor},
    script::{Command, DEFAULT_SCRIPT},
};

const START_HEIGHT_MM: f32 = 700.0;

type SimDesk = Desk<'static, SimRelays, EmbassyClock>;

struct PrintSink;

impl StatusSink for PrintSink {
    fn publish(&mut self, status: &DeskStatus) {
        println!("{}", status.as_json());
    }
}

fn process_command(command: Command, desk: &SimDesk, plant: &Plant) {
    match command {
        Command::Adjust(target) => {
            if let Err(err) = desk.adjust_height(target, "sim") {
                error!("{}", err);
            }
        }
        Command::Stop => desk.stop(),
        Command::Fault => plant.state().fault_pending = true,
        Command::Stall(ms) => {
            plant.state().stalled_until = Some(std::time::Instant::now() + Duration::from_millis(ms));
        }
        Command::Wait(_) => {}
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args: Vec<String> = env::args().skip(1).collect();
    let script = if args.is_empty() {
        DEFAULT_SCRIPT.iter().map(|command| command.to_string()).collect()
    } else {
        args
    };
    let commands = script
        .iter()
        .map(|command| Command::parse(command))
        .collect::<Result<Vec<_>, _>>()?;

    let plant = Plant::new(START_HEIGHT_MM);
    let diagnostics: &'static Diagnostics = Box::leak(Box::new(Diagnostics::new()));
    let ranging: &'static Ranging<EmbassyClock> = Box::leak(Box::new(Ranging::new(EmbassyClock)));
    let desk: &'static SimDesk = Box::leak(Box::new(Desk::new(
        SimRelays(plant.clone()),
        ranging,
        diagnostics,
    )));

    let mut runner = RangingRunner::new(ranging, diagnostics, SimSensor(plant.clone()));
    runner.init();

    let _plant = task::spawn(plant.clone().run());
    let _ranging = task::spawn(runner.run());
    let _desk = task::spawn(run_desk(desk));
    let _reporter = task::spawn(run_reporter(desk, PrintSink));

    for command in commands {
        info!("Command {:?}", command);
        match command {
            Command::Wait(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
            command => process_command(command, desk, &plant),
        }
    }

    // Let the last move finish
    while desk.is_moving() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let status = desk.status();
    println!("{}", status.as_json());
    if !diagnostics.last_error().is_empty() {
        info!("Last error: {}", diagnostics.last_error());
    }
    Ok(())
}
