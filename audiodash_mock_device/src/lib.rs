//! Simulated audio DSP device: a WebSocket server that speaks the dashboard protocol.
//!
//! [`NetworkThread`] owns the sockets, [`MainLoop`] owns the device state, and the two
//! talk over bounded crossbeam channels. [`MockDevice`] wires both onto a background
//! thread for tests and the `mock_device` binary.

mod main_loop;
mod net;
mod protocol;

pub use crate::main_loop::{DeviceState, MainLoop};
pub use crate::net::NetworkThread;
pub use crate::protocol::{ClientId, InboundMsg, OutboundMsg, INBOUND_CAP, OUTBOUND_CAP};

use audiodash_protocol::Band;
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::info;

const TICK: Duration = Duration::from_millis(5);

enum Control {
    TurnKnob(Band, f64),
    DropClients,
    Stop,
}

#[derive(Debug, Clone, Default)]
pub struct MockDeviceOptions {
    /// Turn a random knob this often.
    pub knob_every: Option<Duration>,
    pub seed: Option<u64>,
}

/// A running device: network thread plus a loop thread ticking the state machine.
pub struct MockDevice {
    net: NetworkThread,
    control: Sender<Control>,
    state: Arc<Mutex<DeviceState>>,
    worker: Option<JoinHandle<()>>,
}

impl MockDevice {
    pub fn start(addr: &str) -> io::Result<Self> {
        Self::start_with(addr, MockDeviceOptions::default())
    }

    pub fn start_with(addr: &str, opts: MockDeviceOptions) -> io::Result<Self> {
        let (in_tx, in_rx) = bounded(INBOUND_CAP);
        let (out_tx, out_rx) = bounded(OUTBOUND_CAP);
        let net = NetworkThread::spawn_with_addr(addr, in_tx, out_rx)?;

        let (control, control_rx) = bounded(64);
        let state = Arc::new(Mutex::new(DeviceState::default()));
        let state_for_thread = Arc::clone(&state);
        let main_loop = MainLoop::new(in_rx, out_tx);
        let worker =
            thread::spawn(move || run_loop(main_loop, control_rx, state_for_thread, opts));

        Ok(Self {
            net,
            control,
            state,
            worker: Some(worker),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.net.listen_addr()
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr())
    }

    pub fn state(&self) -> DeviceState {
        match self.state.lock() {
            Ok(s) => s.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn turn_knob(&self, band: Band, db: f64) {
        let _ = self.control.send(Control::TurnKnob(band, db));
    }

    pub fn drop_clients(&self) {
        let _ = self.control.send(Control::DropClients);
    }

    pub fn shutdown(&mut self) {
        let _ = self.control.send(Control::Stop);
        if let Some(h) = self.worker.take() {
            let _ = h.join();
        }
        self.net.shutdown();
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_loop(
    mut main_loop: MainLoop,
    control: Receiver<Control>,
    state: Arc<Mutex<DeviceState>>,
    opts: MockDeviceOptions,
) {
    let mut rng = match opts.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut last_knob = Instant::now();

    loop {
        main_loop.tick();

        loop {
            match control.try_recv() {
                Ok(Control::TurnKnob(band, db)) => main_loop.turn_knob(band, db),
                Ok(Control::DropClients) => main_loop.drop_clients(),
                Ok(Control::Stop) | Err(TryRecvError::Disconnected) => {
                    info!("device loop stopped");
                    return;
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        if let Some(every) = opts.knob_every {
            if last_knob.elapsed() >= every {
                main_loop.turn_random_knob(&mut rng);
                last_knob = Instant::now();
            }
        }

        if let Ok(mut s) = state.lock() {
            if *s != *main_loop.state() {
                *s = main_loop.state().clone();
            }
        }
        thread::sleep(TICK);
    }
}
