use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Adjust(u16),
    Stop,
    Wait(u64),
    /// Make the sensor report one range fault
    Fault,
    /// Block the actuator for a while
    Stall(u64),
}

#[derive(Debug, PartialEq, Eq)]
pub struct ScriptError(String);

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ScriptError {}

impl Command {
    pub fn parse(command: &str) -> Result<Self, ScriptError> {
        let mut split_command = command.split(":");

        let Some(cmd) = split_command.next() else {
            return Err(ScriptError(format!("Invalid command {}", command)));
        };
        let value = split_command.next();

        let parsed = match (cmd, value) {
            ("stop", None) => Command::Stop,
            ("fault", None) => Command::Fault,
            ("adjust", Some(value)) => Command::Adjust(parse_value(cmd, value)?),
            ("wait", Some(value)) => Command::Wait(parse_value(cmd, value)?),
            ("stall", Some(value)) => Command::Stall(parse_value(cmd, value)?),
            ("adjust" | "wait" | "stall", None) => {
                return Err(ScriptError(format!("No value after {}", cmd)));
            }
            _ => return Err(ScriptError(format!("Invalid command {}", command))),
        };

        if split_command.next().is_some() {
            return Err(ScriptError(format!("Trailing data in {}", command)));
        }
        Ok(parsed)
    }
}

fn parse_value<T: std::str::FromStr>(cmd: &str, value: &str) -> Result<T, ScriptError> {
    value
        .parse::<T>()
        .map_err(|_| ScriptError(format!("Could not parse {} value {}", cmd, value)))
}

/// Used when no commands are given on the command line
pub const DEFAULT_SCRIPT: [&str; 9] = [
    "adjust:900",
    "wait:12000",
    "adjust:720",
    "wait:3000",
    "fault",
    "wait:8000",
    "stall:4000",
    "adjust:1000",
    "wait:8000",
];
