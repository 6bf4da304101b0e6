mod console;

use anyhow::Context;
use audiodash_sync::bindings::{ControlKey, Flag, LevelKey};
use audiodash_sync::config::{self, DashboardConfig, MixerRoute};
use audiodash_sync::dashboard::{Dashboard, DashboardView};
use clap::Parser;
use console::{ConsoleCommand, ConsoleView};
use std::io::Write;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "audiodash", about = "Headless console for the audio DSP dashboard")]
struct Args {
    /// WebSocket endpoint of the device (overrides AUDIODASH_WS_URL).
    #[arg(long)]
    ws_url: Option<String>,

    #[arg(long)]
    reconnect_base_ms: Option<u64>,

    #[arg(long)]
    max_attempts: Option<u32>,

    /// `channel` or `http`.
    #[arg(long)]
    mixer_route: Option<MixerRoute>,

    #[arg(long)]
    http_base: Option<String>,
}

fn load_config(args: &Args) -> anyhow::Result<DashboardConfig> {
    let mut cfg = DashboardConfig::from_env()?;
    if let Some(url) = args.ws_url.as_deref() {
        cfg.endpoint = config::parse_url("--ws-url", url)?;
    }
    if let Some(ms) = args.reconnect_base_ms {
        cfg.reconnect.base_delay = Duration::from_millis(ms);
    }
    if let Some(n) = args.max_attempts {
        cfg.reconnect.max_attempts = n;
    }
    if let Some(route) = args.mixer_route {
        cfg.mixer_route = route;
    }
    if let Some(base) = args.http_base.as_deref() {
        cfg.http_base = Some(config::parse_url("--http-base", base)?);
    }
    cfg.validate()?;
    Ok(cfg)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let cfg = load_config(&args)?;
    info!(endpoint = %cfg.endpoint, route = ?cfg.mixer_route, "connecting");

    let view = ConsoleView::new(std::io::stdout());
    let (mut dash, mut events) =
        Dashboard::connect(&cfg, view).context("failed to start dashboard")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => dash.handle_event(event),
                None => break,
            },
            line = lines.next_line() => {
                let Some(line) = line.context("stdin read failed")? else {
                    break;
                };
                match console::parse_line(&line) {
                    Ok(Some(ConsoleCommand::Quit)) => break,
                    Ok(Some(cmd)) => run_command(&mut dash, cmd),
                    Ok(None) => {}
                    Err(e) => eprintln!("{e}"),
                }
            }
        }
    }

    dash.close();
    Ok(())
}

fn run_command<V: DashboardView>(dash: &mut Dashboard<V>, cmd: ConsoleCommand) {
    let result = match cmd {
        ConsoleCommand::Commit(key, value) => dash.commit_edit(key, value).map(|_| ()),
        ConsoleCommand::Drag(key, value) => dash.preview(key, value).map(|_| ()),
        ConsoleCommand::Release(key) => match console::pending_release(dash.registry(), key) {
            Some(value) => dash.commit_edit(key, value).map(|_| ()),
            None => {
                println!("nothing to release on {key}");
                Ok(())
            }
        },
        ConsoleCommand::Cancel(key) => {
            dash.cancel_edit(key);
            Ok(())
        }
        ConsoleCommand::Toggle(target) => {
            dash.toggle(target);
            Ok(())
        }
        ConsoleCommand::Refresh => {
            dash.request_current_eq();
            Ok(())
        }
        ConsoleCommand::Retry => {
            dash.retry();
            Ok(())
        }
        ConsoleCommand::State => {
            print_state(dash);
            Ok(())
        }
        ConsoleCommand::Help => {
            println!("{}", console::HELP);
            Ok(())
        }
        ConsoleCommand::Quit => Ok(()),
    };
    if let Err(e) = result {
        warn!(error = %e, "command rejected");
    }
}

fn print_state<V: DashboardView>(dash: &Dashboard<V>) {
    let reg = dash.registry();
    let keys = LevelKey::ALL
        .into_iter()
        .map(ControlKey::Level)
        .chain(Flag::ALL.into_iter().map(ControlKey::Flag))
        .chain(std::iter::once(ControlKey::Mode));

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let _ = writeln!(out, "link: {}", dash.link_state());
    for key in keys {
        let _ = writeln!(out, "  {}", console::format_binding(key, &reg.view(key)));
    }
}
