//! farmware — send Celery Script to FarmBot OS

use clap::Parser;
use farmware_tools::{
    Cli, Command, Device, Dispatched, Env, Error, Reply, RpcConfig, WebAppCredentials, commands,
};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("farmware_tools=debug,farmware=debug")
    } else {
        EnvFilter::new("farmware_tools=warn,farmware=warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let env = Env::from_env();

    if let Command::Env = cli.command {
        print_env(&env);
        return;
    }

    let device = if cli.offline {
        Device::offline()
    } else {
        let rpc = RpcConfig {
            reply_timeout: cli.timeout,
            ..RpcConfig::default()
        };
        match Device::connect_with(&env, rpc).await {
            Ok(device) => device,
            Err(e) => {
                error!("{}", e);
                Device::offline().report(&e).await;
                std::process::exit(1);
            }
        }
    };

    if let Err(e) = run(&device, cli.label.as_deref(), cli.command).await {
        error!("{}", e);
        device.report(&e).await;
        std::process::exit(1);
    }
}

fn print_env(env: &Env) {
    let transport = env
        .transport()
        .map_or_else(|e| format!("invalid ({e})"), |t| t.name().to_string());
    println!("FarmBot OS version: {}", env.fbos_version);
    println!("Transport: {transport}");
    if let Some(dir) = &env.images_dir {
        println!("Images directory: {}", dir.display());
    }
    match WebAppCredentials::from_env(env) {
        Ok(creds) => println!("Web App: {}", creds.base_url),
        Err(e) => println!("Web App: unavailable ({e})"),
    }
}

async fn run(device: &Device, label: Option<&str>, command: Command) -> Result<(), Error> {
    let node = match command {
        Command::Send { json } => farmware_tools::celery::parse(&json)?,
        Command::Log {
            message,
            message_type,
            channel,
        } => {
            let channels: Vec<&str> = channel.iter().map(String::as_str).collect();
            commands::send_message(&message, &message_type, &channels)?
        }
        Command::State => {
            let state = device.get_bot_state().await?;
            println!("{}", serde_json::to_string_pretty(&state).map_err(Error::Serialize)?);
            return Ok(());
        }
        Command::Position { axis } => {
            print_value(device.get_current_position(&axis).await?);
            return Ok(());
        }
        Command::Pin { number } => {
            print_value(device.get_pin_value(number).await?);
            return Ok(());
        }
        Command::Env => return Ok(()),
        Command::Home { axis } => commands::home(&axis)?,
        Command::FindHome { axis } => commands::find_home(&axis)?,
        Command::Calibrate { axis } => commands::calibrate(&axis)?,
        Command::Zero { axis } => commands::zero(&axis)?,
        Command::MoveAbsolute {
            x,
            y,
            z,
            speed,
            offset,
        } => {
            let [ox, oy, oz] = offset[..] else {
                return Err(Error::validation("move_absolute", format!("{offset:?}")));
            };
            commands::move_absolute(
                commands::assemble_coordinate(x, y, z),
                speed,
                commands::assemble_coordinate(ox, oy, oz),
            )?
        }
        Command::MoveRelative { x, y, z, speed } => commands::move_relative(x, y, z, speed)?,
        Command::WritePin {
            pin_number,
            pin_value,
            mode,
        } => commands::write_pin(pin_number, pin_value, mode)?,
        Command::ReadPin {
            pin_number,
            pin_label,
            mode,
        } => commands::read_pin(pin_number, &pin_label, mode)?,
        Command::TogglePin { pin_number } => commands::toggle_pin(pin_number)?,
        Command::TakePhoto => commands::take_photo(),
        Command::Sync => commands::sync(),
        Command::ReadStatus => commands::read_status(),
        Command::EmergencyLock => commands::emergency_lock(),
        Command::EmergencyUnlock => commands::emergency_unlock(),
        Command::ExecuteScript { name, input } => {
            if input.is_empty() {
                commands::execute_script(&name)
            } else {
                commands::execute_script_with_inputs(&name, input)
            }
        }
        Command::SetUserEnv { key, value } => commands::set_user_env(&key, value),
        Command::Wait { milliseconds } => commands::wait(milliseconds),
    };

    let dispatched = match label {
        Some(label) => device.dispatch_labeled(node, label).await?,
        None => device.dispatch(node).await?,
    };
    print_reply(&dispatched);
    Ok(())
}

fn print_value(value: Option<serde_json::Value>) {
    match value {
        Some(value) => println!("{value}"),
        None => println!("null"),
    }
}

fn print_reply(dispatched: &Dispatched) {
    match &dispatched.reply {
        Reply::Received(reply) => println!("{reply}"),
        Reply::NoResponse => eprintln!("no response for {}", dispatched.label()),
        Reply::Accepted | Reply::Echoed => {}
    }
}
