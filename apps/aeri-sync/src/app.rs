use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::cli::{ChangePinArgs, Cli, Command, ResetArgs, SetArgs};
use crate::config::Config;
use crate::engine::{SyncEngine, SyncHandle};
use crate::error::CliError;
use crate::model::{DeviceSnapshot, Field};
use crate::sync::{Connectivity, SyncEvent};
use crate::transport::{wire, DeviceTransport, HttpTransport};

const POLL_STEP: Duration = Duration::from_millis(50);

pub async fn run(cli: Cli) -> Result<(), CliError> {
    let mut config = Config::from_env()?;
    if let Some(device) = cli.device.as_deref() {
        config = config.with_device_url(device)?;
    }
    info!(target: "aeri.engine", device = %config.device_url, "using controller");

    let transport: Arc<dyn DeviceTransport> = Arc::new(HttpTransport::new(&config)?);
    let handle = SyncEngine::spawn(transport, &config);
    let result = match cli.command {
        Command::Watch => watch(&handle).await,
        Command::Set(args) => set(&handle, &config, args).await,
        Command::State => state(&handle, &config).await,
        Command::Preset(args) => {
            let details = handle.preset_details(args.slot).await?;
            println!(
                "preset {}: {}",
                args.slot,
                details.name.as_deref().unwrap_or("(unnamed)")
            );
            if let Some(summary) = details.summary {
                println!("{summary}");
            }
            Ok(())
        }
        Command::ChangePin(args) => change_pin(&handle, args).await,
        Command::Reset(args) => reset(&handle, &config, args).await,
    };
    handle.shutdown();
    result
}

async fn watch(handle: &SyncHandle) -> Result<(), CliError> {
    let states = handle.on_state_changed(|snapshot| println!("{}", describe(snapshot)));
    let links = handle.on_connectivity_changed(|state| println!("-- {state}"));
    let notices = handle.on_notice(|notice| eprintln!("!! {notice}"));

    tokio::signal::ctrl_c()
        .await
        .map_err(|err| CliError::Failed(format!("failed to wait for Ctrl-C: {err}")))?;

    for task in [states, links, notices] {
        task.abort();
    }
    Ok(())
}

async fn set(handle: &SyncHandle, config: &Config, args: SetArgs) -> Result<(), CliError> {
    let answer = answer_window(config);
    let mut notices = handle.subscribe_notices();
    wait_until(answer, || handle.connectivity() != Connectivity::Unknown).await;

    if args.sync {
        handle.set_sync_mode(true)?;
    }
    handle
        .set(&args.zone, &args.field, &args.value, args.debounced)
        .await?;

    let settle = config.debounce + answer;
    if !wait_until(settle, || handle.is_idle()).await {
        return Err(CliError::NoAnswer(settle));
    }
    if handle.connectivity() == Connectivity::Disconnected {
        return Err(CliError::Failed(
            "device unreachable; the change was not delivered".into(),
        ));
    }
    let failure = notices.drain().into_iter().find_map(|event| match event {
        SyncEvent::Notice(notice) => Some(notice),
        _ => None,
    });
    if let Some(notice) = failure {
        return Err(CliError::Failed(notice.to_string()));
    }
    println!("{} {} = {}", args.zone, args.field, args.value);
    Ok(())
}

async fn state(handle: &SyncHandle, config: &Config) -> Result<(), CliError> {
    let answer = answer_window(config);
    let settled = wait_until(answer, || {
        handle.is_hydrated() || handle.connectivity() == Connectivity::Disconnected
    })
    .await;
    if !settled {
        return Err(CliError::NoAnswer(answer));
    }
    if !handle.is_hydrated() {
        return Err(CliError::Failed("device unreachable".into()));
    }
    println!("{}", wire::encode_snapshot(&handle.snapshot())?);
    Ok(())
}

async fn change_pin(handle: &SyncHandle, args: ChangePinArgs) -> Result<(), CliError> {
    handle.change_pin(&args.current, &args.new).await?;
    println!("PIN updated");
    Ok(())
}

async fn reset(handle: &SyncHandle, config: &Config, args: ResetArgs) -> Result<(), CliError> {
    if !args.yes {
        return Err(CliError::Failed(
            "factory reset discards every zone setting; pass --yes to confirm".into(),
        ));
    }
    handle.reset_to_default().await?;
    state(handle, config).await
}

/// Time allowed for one request plus scheduling slack.
fn answer_window(config: &Config) -> Duration {
    config.command_timeout + Duration::from_secs(1)
}

async fn wait_until(limit: Duration, mut ready: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while !ready() {
        if Instant::now() >= deadline {
            debug!(target: "aeri.engine", ?limit, "gave up waiting");
            return false;
        }
        sleep(POLL_STEP).await;
    }
    true
}

/// One line per zone, e.g. `alis    mode 1   speed 60%  brightness 85%  target both  #FF0000  leds 30`.
pub fn describe(snapshot: &DeviceSnapshot) -> String {
    snapshot
        .zones()
        .map(|(id, zone)| {
            let mut line = format!("{:<7} mode {:<2}", id.as_str(), zone.mode());
            for field in [Field::Speed, Field::Brightness, Field::Target] {
                if let Some(value) = zone.get(field) {
                    line.push_str(&format!("  {field} {value}"));
                }
            }
            for color in zone.active_colors() {
                line.push_str(&format!("  {}", color.to_hex()));
            }
            line.push_str(&format!("  leds {}", zone.led_count()));
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}
