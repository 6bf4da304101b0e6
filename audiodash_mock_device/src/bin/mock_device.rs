use audiodash_mock_device::{MockDevice, MockDeviceOptions};
use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

const DEFAULT_ADDR: &str = "127.0.0.1:0";

fn parse_arg_value(args: &[String], name: &str) -> Option<String> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    let addr = parse_arg_value(&args, "--addr")
        .or_else(|| std::env::var("AUDIODASH_MOCK_ADDR").ok())
        .unwrap_or_else(|| DEFAULT_ADDR.to_string());

    let addr_file = parse_arg_value(&args, "--addr-file").map(PathBuf::from);
    let run_for = parse_arg_value(&args, "--run-for-ms")
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis);
    let knob_every = parse_arg_value(&args, "--knob-every-ms")
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis);
    let seed = parse_arg_value(&args, "--seed").and_then(|s| s.parse::<u64>().ok());

    let device = match MockDevice::start_with(&addr, MockDeviceOptions { knob_every, seed }) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("mock_device bind failed on {addr}: {e}");
            std::process::exit(1);
        }
    };

    if let Some(path) = &addr_file {
        let _ = fs::write(path, device.addr().to_string());
    }

    println!("mock_device listening on {}", device.ws_url());

    let start = Instant::now();
    loop {
        thread::sleep(Duration::from_millis(50));
        if let Some(max) = run_for {
            if start.elapsed() >= max {
                break;
            }
        }
    }
}
