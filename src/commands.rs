//! Command assemblers.
//!
//! One constructor per Celery Script kind. Each checks its constrained
//! arguments against the accepted set before building, so a rejected call
//! never produces a node that could reach the transport. Building and
//! sending are separate steps: pass the result to
//! [`crate::Device::dispatch`] to transmit it.

use crate::celery::CeleryScript;
use crate::error::{Error, Result};
use serde_json::{Map, Value, json};
use std::fmt::Display;
use std::ops::RangeInclusive;

/// Accepted values for every `axis` argument.
pub const AXES: &[&str] = &["x", "y", "z", "all"];
/// Accepted `message_type` values for `send_message`.
pub const MESSAGE_TYPES: &[&str] = &["success", "busy", "warn", "error", "info", "fun", "debug"];
/// Accepted channel names for `send_message`.
pub const CHANNELS: &[&str] = &["ticker", "toast", "email", "espeak"];
/// Packages accepted by `check_updates`.
pub const UPDATE_PACKAGES: &[&str] = &["farmbot_os", "arduino_firmware", "farmware"];
/// Packages accepted by `factory_reset`.
pub const RESET_PACKAGES: &[&str] = &["farmbot_os", "arduino_firmware"];

const SPEED: RangeInclusive<i64> = 1..=100;
const PIN_NUMBER: RangeInclusive<i64> = 0..=69;
const PIN_MODE: RangeInclusive<i64> = 0..=1;
const PIN_IO_MODE: RangeInclusive<i64> = 0..=2;
const SERVO_PIN: RangeInclusive<i64> = 4..=5;
const SERVO_ANGLE: RangeInclusive<i64> = 0..=359;
const GPIO_PIN: RangeInclusive<i64> = 1..=29;

fn check_arg(kind: &str, arg: &str, accepted: &[&str]) -> Result<()> {
    if accepted.contains(&arg) {
        Ok(())
    } else {
        Err(Error::validation(kind, arg))
    }
}

fn check_range<T>(kind: &str, arg: T, accepted: &RangeInclusive<i64>) -> Result<()>
where
    T: Into<i64> + Copy + Display,
{
    if accepted.contains(&arg.into()) {
        Ok(())
    } else {
        Err(Error::validation(kind, arg))
    }
}

fn args(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn bare(kind: &str) -> CeleryScript {
    CeleryScript::new(kind, Map::new())
}

/// Lower-case a Farmware name and turn spaces and hyphens into underscores.
///
/// This is the prefix FarmBot OS uses to namespace Farmware inputs.
#[must_use]
pub fn normalize_farmware_name(name: &str) -> String {
    name.replace([' ', '-'], "_").to_lowercase()
}

/// Build a `coordinate` node.
#[must_use]
pub fn assemble_coordinate(x: f64, y: f64, z: f64) -> CeleryScript {
    CeleryScript::new("coordinate", args(json!({"x": x, "y": y, "z": z})))
}

/// Build a `pair` body node.
pub fn assemble_pair(label: &str, value: impl Into<Value>) -> CeleryScript {
    CeleryScript::new(
        "pair",
        args(json!({"label": label, "value": value.into()})),
    )
}

fn assemble_channel(name: &str) -> CeleryScript {
    CeleryScript::new("channel", args(json!({"channel_name": name})))
}

/// Check that a node is a coordinate with exactly the `x`, `y`, `z` args.
pub fn check_coordinate(coordinate: &CeleryScript) -> Result<()> {
    let mut keys: Vec<&str> = coordinate.args.keys().map(String::as_str).collect();
    keys.sort_unstable();
    if coordinate.kind == "coordinate" && keys == ["x", "y", "z"] {
        Ok(())
    } else {
        Err(Error::validation("coordinate", coordinate.to_value()))
    }
}

/// `send_message`: post a log to the Web App through FarmBot OS.
///
/// An empty `channels` slice produces a node without a body.
pub fn send_message(message: &str, message_type: &str, channels: &[&str]) -> Result<CeleryScript> {
    let kind = "send_message";
    check_arg(kind, message_type, MESSAGE_TYPES)?;
    for channel in channels {
        check_arg(kind, channel, CHANNELS)?;
    }
    let node_args = args(json!({"message": message, "message_type": message_type}));
    if channels.is_empty() {
        Ok(CeleryScript::new(kind, node_args))
    } else {
        let body = channels.iter().map(|c| assemble_channel(c)).collect();
        Ok(CeleryScript::with_body(kind, node_args, body))
    }
}

fn axis_command(kind: &str, axis: &str) -> Result<CeleryScript> {
    check_arg(kind, axis, AXES)?;
    Ok(CeleryScript::new(kind, args(json!({"axis": axis}))))
}

/// `calibrate`: measure the length of an axis.
pub fn calibrate(axis: &str) -> Result<CeleryScript> {
    axis_command("calibrate", axis)
}

/// `find_home`: home an axis using encoders or endstops.
pub fn find_home(axis: &str) -> Result<CeleryScript> {
    axis_command("find_home", axis)
}

/// `home`: move an axis to its zero position.
pub fn home(axis: &str) -> Result<CeleryScript> {
    axis_command("home", axis)
}

/// `zero`: set the current position of an axis as zero.
pub fn zero(axis: &str) -> Result<CeleryScript> {
    axis_command("zero", axis)
}

/// `check_updates`
pub fn check_updates(package: &str) -> Result<CeleryScript> {
    let kind = "check_updates";
    check_arg(kind, package, UPDATE_PACKAGES)?;
    Ok(CeleryScript::new(kind, args(json!({"package": package}))))
}

/// `factory_reset`
pub fn factory_reset(package: &str) -> Result<CeleryScript> {
    let kind = "factory_reset";
    check_arg(kind, package, RESET_PACKAGES)?;
    Ok(CeleryScript::new(kind, args(json!({"package": package}))))
}

/// `emergency_lock`
#[must_use]
pub fn emergency_lock() -> CeleryScript {
    bare("emergency_lock")
}

/// `emergency_unlock`
#[must_use]
pub fn emergency_unlock() -> CeleryScript {
    bare("emergency_unlock")
}

/// `execute`: run a sequence by id.
#[must_use]
pub fn execute(sequence_id: i64) -> CeleryScript {
    CeleryScript::new("execute", args(json!({"sequence_id": sequence_id})))
}

/// `execute_script` without inputs.
#[must_use]
pub fn execute_script(label: &str) -> CeleryScript {
    CeleryScript::new("execute_script", args(json!({"label": label})))
}

/// `execute_script` with Farmware inputs.
///
/// Each input becomes a `pair` body node, in input order, whose label is
/// namespaced with the normalized Farmware name unless it already is.
pub fn execute_script_with_inputs<I, K, V>(label: &str, inputs: I) -> CeleryScript
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<Value>,
{
    let farmware = normalize_farmware_name(label);
    let body = inputs
        .into_iter()
        .map(|(key, value)| {
            let key = key.as_ref();
            if key.starts_with(&farmware) {
                assemble_pair(key, value)
            } else {
                assemble_pair(&format!("{farmware}_{key}"), value)
            }
        })
        .collect();
    CeleryScript::with_body("execute_script", args(json!({"label": label})), body)
}

/// `run_farmware`: older name for [`execute_script`].
#[must_use]
pub fn run_farmware(label: &str) -> CeleryScript {
    CeleryScript::new("run_farmware", args(json!({"label": label})))
}

/// `install_farmware`: install from a manifest URL.
#[must_use]
pub fn install_farmware(url: &str) -> CeleryScript {
    CeleryScript::new("install_farmware", args(json!({"url": url})))
}

/// `install_first_party_farmware`
#[must_use]
pub fn install_first_party_farmware() -> CeleryScript {
    bare("install_first_party_farmware")
}

/// `remove_farmware`
#[must_use]
pub fn remove_farmware(package: &str) -> CeleryScript {
    CeleryScript::new("remove_farmware", args(json!({"package": package})))
}

/// `update_farmware`
#[must_use]
pub fn update_farmware(package: &str) -> CeleryScript {
    CeleryScript::new("update_farmware", args(json!({"package": package})))
}

/// `move_absolute`: move to `location` plus `offset`.
pub fn move_absolute(
    location: CeleryScript,
    speed: i64,
    offset: CeleryScript,
) -> Result<CeleryScript> {
    let kind = "move_absolute";
    check_coordinate(&location)?;
    check_coordinate(&offset)?;
    check_range(kind, speed, &SPEED)?;
    let mut node_args = Map::new();
    node_args.insert("location".into(), location.to_value());
    node_args.insert("speed".into(), speed.into());
    node_args.insert("offset".into(), offset.to_value());
    Ok(CeleryScript::new(kind, node_args))
}

/// `move_relative`: move by the given distances.
pub fn move_relative(x: f64, y: f64, z: f64, speed: i64) -> Result<CeleryScript> {
    let kind = "move_relative";
    check_range(kind, speed, &SPEED)?;
    Ok(CeleryScript::new(
        kind,
        args(json!({"x": x, "y": y, "z": z, "speed": speed})),
    ))
}

/// `power_off`
#[must_use]
pub fn power_off() -> CeleryScript {
    bare("power_off")
}

/// `read_pin`: read a pin value into the device state under `label`.
pub fn read_pin(pin_number: i64, label: &str, pin_mode: i64) -> Result<CeleryScript> {
    let kind = "read_pin";
    check_range(kind, pin_number, &PIN_NUMBER)?;
    check_range(kind, pin_mode, &PIN_MODE)?;
    Ok(CeleryScript::new(
        kind,
        args(json!({"pin_number": pin_number, "label": label, "pin_mode": pin_mode})),
    ))
}

/// `read_status`
#[must_use]
pub fn read_status() -> CeleryScript {
    bare("read_status")
}

/// `reboot`
#[must_use]
pub fn reboot() -> CeleryScript {
    bare("reboot")
}

/// `register_gpio`: run a sequence when a GPIO pin is triggered.
pub fn register_gpio(sequence_id: i64, pin_number: i64) -> Result<CeleryScript> {
    let kind = "register_gpio";
    check_range(kind, pin_number, &GPIO_PIN)?;
    Ok(CeleryScript::new(
        kind,
        args(json!({"sequence_id": sequence_id, "pin_number": pin_number})),
    ))
}

/// `unregister_gpio`
pub fn unregister_gpio(pin_number: i64) -> Result<CeleryScript> {
    let kind = "unregister_gpio";
    check_range(kind, pin_number, &PIN_NUMBER)?;
    Ok(CeleryScript::new(kind, args(json!({"pin_number": pin_number}))))
}

/// `set_pin_io_mode`: 0 = input, 1 = output, 2 = input with pull-up.
pub fn set_pin_io_mode(pin_io_mode: i64, pin_number: i64) -> Result<CeleryScript> {
    let kind = "set_pin_io_mode";
    check_range(kind, pin_io_mode, &PIN_IO_MODE)?;
    check_range(kind, pin_number, &PIN_NUMBER)?;
    Ok(CeleryScript::new(
        kind,
        args(json!({"pin_io_mode": pin_io_mode, "pin_number": pin_number})),
    ))
}

/// `set_servo_angle`: only pins 4 and 5 drive servos.
pub fn set_servo_angle(pin_number: i64, pin_value: i64) -> Result<CeleryScript> {
    let kind = "set_servo_angle";
    check_range(kind, pin_number, &SERVO_PIN)?;
    check_range(kind, pin_value, &SERVO_ANGLE)?;
    Ok(CeleryScript::new(
        kind,
        args(json!({"pin_number": pin_number, "pin_value": pin_value})),
    ))
}

/// `set_user_env`: always a single `pair` body node.
pub fn set_user_env(key: &str, value: impl Into<Value>) -> CeleryScript {
    CeleryScript::with_body("set_user_env", Map::new(), vec![assemble_pair(key, value)])
}

/// `sync`
#[must_use]
pub fn sync() -> CeleryScript {
    bare("sync")
}

/// `take_photo`
#[must_use]
pub fn take_photo() -> CeleryScript {
    bare("take_photo")
}

/// `toggle_pin`
pub fn toggle_pin(pin_number: i64) -> Result<CeleryScript> {
    let kind = "toggle_pin";
    check_range(kind, pin_number, &PIN_NUMBER)?;
    Ok(CeleryScript::new(kind, args(json!({"pin_number": pin_number}))))
}

/// `wait`
#[must_use]
pub fn wait(milliseconds: u64) -> CeleryScript {
    CeleryScript::new("wait", args(json!({"milliseconds": milliseconds})))
}

/// `write_pin`: 0 = digital, 1 = analog.
pub fn write_pin(pin_number: i64, pin_value: i64, pin_mode: i64) -> Result<CeleryScript> {
    let kind = "write_pin";
    check_range(kind, pin_number, &PIN_NUMBER)?;
    check_range(kind, pin_mode, &PIN_MODE)?;
    Ok(CeleryScript::new(
        kind,
        args(json!({"pin_number": pin_number, "pin_value": pin_value, "pin_mode": pin_mode})),
    ))
}

/// Check an axis name used by state accessors.
pub fn check_axis(kind: &str, axis: &str) -> Result<()> {
    check_arg(kind, axis, AXES)
}
