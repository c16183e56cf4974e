//! Fuzz target for command assembly.
//!
//! Uses arbitrary to generate assembler arguments and verify that every
//! accepted command is well-formed and every rejected one names its kind.

#![no_main]

use arbitrary::Arbitrary;
use farmware_tools::{CeleryScript, Error, celery, commands};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum FuzzCommand {
    Axis { axis: String },
    Move { x: f64, y: f64, z: f64, speed: i64 },
    WritePin { pin_number: i64, pin_value: i64, pin_mode: i64 },
    Servo { pin_number: i64, pin_value: i64 },
    Gpio { sequence_id: i64, pin_number: i64 },
    Message { message: String, message_type: String, channels: Vec<String> },
    Script { label: String, inputs: Vec<(String, String)> },
}

fuzz_target!(|cmd: FuzzCommand| {
    let (kind, result): (&str, Result<CeleryScript, Error>) = match cmd {
        FuzzCommand::Axis { axis } => ("home", commands::home(&axis)),
        FuzzCommand::Move { x, y, z, speed } => {
            ("move_relative", commands::move_relative(x, y, z, speed))
        }
        FuzzCommand::WritePin { pin_number, pin_value, pin_mode } => {
            ("write_pin", commands::write_pin(pin_number, pin_value, pin_mode))
        }
        FuzzCommand::Servo { pin_number, pin_value } => {
            ("set_servo_angle", commands::set_servo_angle(pin_number, pin_value))
        }
        FuzzCommand::Gpio { sequence_id, pin_number } => {
            ("register_gpio", commands::register_gpio(sequence_id, pin_number))
        }
        FuzzCommand::Message { message, message_type, channels } => {
            let channels: Vec<&str> = channels.iter().map(String::as_str).collect();
            ("send_message", commands::send_message(&message, &message_type, &channels))
        }
        FuzzCommand::Script { label, inputs } => (
            "execute_script",
            Ok(commands::execute_script_with_inputs(&label, inputs)),
        ),
    };

    match result {
        Ok(node) => {
            assert_eq!(node.kind, kind);
            celery::validate(&node.to_value()).expect("assembled node is valid");
        }
        Err(Error::Validation { kind: rejected, .. }) => assert_eq!(rejected, kind),
        Err(other) => panic!("unexpected error {other:?}"),
    }
});
