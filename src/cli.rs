//! Command-line interface for farmware.

use clap::{Parser, Subcommand};
use serde_json::Value;
use std::time::Duration;

/// Parse a `KEY=VALUE` input.
///
/// The value is read as JSON when it parses (`1`, `true`, `"x"`, `{..}`),
/// otherwise it is kept as a plain string.
pub fn parse_key_value(s: &str) -> Result<(String, Value), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{s}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in `{s}`"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Parse a duration given in (possibly fractional) seconds.
pub fn parse_seconds(s: &str) -> Result<Duration, String> {
    let seconds: f64 = s.parse().map_err(|e| format!("invalid seconds `{s}`: {e}"))?;
    Duration::try_from_secs_f64(seconds).map_err(|e| format!("invalid seconds `{s}`: {e}"))
}

/// Send Celery Script commands to FarmBot OS from a Farmware.
#[derive(Debug, Parser)]
#[command(name = "farmware", version, about)]
pub struct Cli {
    /// Correlation label for the request (generated when omitted).
    #[arg(long, global = true)]
    pub label: Option<String>,

    /// Seconds to wait for a reply on the pipe transport.
    #[arg(long, global = true, default_value = "10", value_parser = parse_seconds)]
    pub timeout: Duration,

    /// Ignore any configured transport and only print commands.
    #[arg(long, global = true, env = "FARMWARE_OFFLINE")]
    pub offline: bool,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Send a raw Celery Script node given as JSON.
    Send {
        /// The node, e.g. '{"kind":"read_status","args":{}}'.
        json: String,
    },

    /// Post a log message.
    Log {
        message: String,

        /// success, busy, warn, error, info, fun, or debug.
        #[arg(long = "type", short = 't', default_value = "info")]
        message_type: String,

        /// ticker, toast, email, or espeak (can be repeated).
        #[arg(long, short, value_delimiter = ',')]
        channel: Vec<String>,
    },

    /// Print the device state tree as JSON.
    State,

    /// Print the current position.
    Position {
        /// x, y, z, or all.
        #[arg(default_value = "all")]
        axis: String,
    },

    /// Print the last reported value of a pin.
    Pin { number: i64 },

    /// Print the resolved environment.
    Env,

    /// Move an axis to zero.
    Home {
        #[arg(default_value = "all")]
        axis: String,
    },

    /// Find home using encoders or endstops.
    FindHome {
        #[arg(default_value = "all")]
        axis: String,
    },

    /// Measure an axis length.
    Calibrate { axis: String },

    /// Set the current position of an axis as zero.
    Zero { axis: String },

    /// Move to an absolute coordinate.
    MoveAbsolute {
        #[arg(allow_negative_numbers = true)]
        x: f64,
        #[arg(allow_negative_numbers = true)]
        y: f64,
        #[arg(allow_negative_numbers = true)]
        z: f64,

        /// Percentage of max speed (1-100).
        #[arg(long, short, default_value = "100")]
        speed: i64,

        /// Offset as X,Y,Z.
        #[arg(long, value_delimiter = ',', allow_negative_numbers = true, default_values_t = [0.0, 0.0, 0.0])]
        offset: Vec<f64>,
    },

    /// Move relative to the current position.
    MoveRelative {
        #[arg(allow_negative_numbers = true)]
        x: f64,
        #[arg(allow_negative_numbers = true)]
        y: f64,
        #[arg(allow_negative_numbers = true)]
        z: f64,

        #[arg(long, short, default_value = "100")]
        speed: i64,
    },

    /// Write a pin value.
    WritePin {
        pin_number: i64,
        pin_value: i64,

        /// 0 = digital, 1 = analog.
        #[arg(long, default_value = "0")]
        mode: i64,
    },

    /// Read a pin into the device state.
    ReadPin {
        pin_number: i64,

        #[arg(long, default_value = "pin")]
        pin_label: String,

        #[arg(long, default_value = "0")]
        mode: i64,
    },

    /// Toggle a digital pin.
    TogglePin { pin_number: i64 },

    TakePhoto,

    Sync,

    ReadStatus,

    EmergencyLock,

    EmergencyUnlock,

    /// Run another Farmware.
    ExecuteScript {
        /// Farmware name.
        name: String,

        /// Farmware input (KEY=VALUE, can be repeated).
        #[arg(long, short, value_name = "KEY=VALUE", value_parser = parse_key_value)]
        input: Vec<(String, Value)>,
    },

    /// Set a user environment variable on the device.
    SetUserEnv {
        key: String,
        value: String,
    },

    /// Pause for a number of milliseconds.
    Wait { milliseconds: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_key_value_json_values() {
        assert_eq!(parse_key_value("a=1"), Ok(("a".into(), json!(1))));
        assert_eq!(parse_key_value("b=true"), Ok(("b".into(), json!(true))));
        assert_eq!(parse_key_value("c=two"), Ok(("c".into(), json!("two"))));
        assert_eq!(parse_key_value("d=x=y"), Ok(("d".into(), json!("x=y"))));
        assert_eq!(parse_key_value("e="), Ok(("e".into(), json!(""))));
    }

    #[test]
    fn test_parse_key_value_invalid() {
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=1").is_err());
    }

    #[test]
    fn test_parse_seconds() {
        assert_eq!(parse_seconds("0.5"), Ok(Duration::from_millis(500)));
        assert_eq!(parse_seconds("10"), Ok(Duration::from_secs(10)));
        assert!(parse_seconds("-1").is_err());
        assert!(parse_seconds("soon").is_err());
    }

    #[test]
    fn test_cli_parses_move_absolute() {
        let cli = Cli::parse_from(["farmware", "move-absolute", "1", "-2", "3", "--speed", "50"]);
        match cli.command {
            Command::MoveAbsolute { x, y, z, speed, offset } => {
                assert!((x - 1.0).abs() < f64::EPSILON);
                assert!((y + 2.0).abs() < f64::EPSILON);
                assert!((z - 3.0).abs() < f64::EPSILON);
                assert_eq!(speed, 50);
                assert_eq!(offset, vec![0.0, 0.0, 0.0]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_parses_execute_script_inputs() {
        let cli = Cli::parse_from([
            "farmware",
            "--label",
            "abc",
            "execute-script",
            "My Farmware",
            "-i",
            "input_1=1",
            "-i",
            "input_2=two",
        ]);
        assert_eq!(cli.label.as_deref(), Some("abc"));
        match cli.command {
            Command::ExecuteScript { name, input } => {
                assert_eq!(name, "My Farmware");
                assert_eq!(
                    input,
                    vec![("input_1".into(), json!(1)), ("input_2".into(), json!("two"))]
                );
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
