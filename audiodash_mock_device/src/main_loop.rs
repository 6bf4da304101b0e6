use crate::protocol::{ClientId, InboundMsg, OutboundMsg};
use audiodash_protocol::{
    limits, Band, ControlSource, ControlSources, DialUpdate, EqLevels, InboundMessage,
    MixerLevels, MixerParam, OutboundCommand, StateSnapshot, UartParam, VoiceMode,
};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use rand::Rng;
use tracing::{debug, info, warn};

/// Everything the simulated device remembers.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    pub mode: VoiceMode,
    pub eq: [f64; 3],
    pub control_sources: [ControlSource; 3],
    pub ducking: bool,
    pub feedback: bool,
    pub mute: bool,
    pub mixer: [f64; 4],
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            mode: VoiceMode::Off,
            eq: [0.0; 3],
            control_sources: [ControlSource::Physical; 3],
            ducking: false,
            feedback: false,
            mute: false,
            mixer: MixerParam::ALL.map(MixerParam::neutral),
        }
    }
}

impl DeviceState {
    pub fn eq(&self, band: Band) -> f64 {
        self.eq[band_index(band)]
    }

    pub fn mixer(&self, param: MixerParam) -> f64 {
        self.mixer[mixer_index(param)]
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            mode: Some(self.mode.clone()),
            eq: Some(self.eq_levels()),
            ducking: Some(self.ducking),
            feedback: Some(self.feedback),
            mute: Some(self.mute),
            dsp_mixer: Some(self.mixer_levels()),
        }
    }

    /// Answer to `get_current_eq`: mode and EQ only.
    pub fn eq_snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            mode: Some(self.mode.clone()),
            eq: Some(self.eq_levels()),
            ..Default::default()
        }
    }

    fn eq_levels(&self) -> EqLevels {
        let mut eq = EqLevels::default();
        for band in Band::ALL {
            eq.set(band, self.eq(band));
        }
        eq
    }

    fn mixer_levels(&self) -> MixerLevels {
        let mut levels = MixerLevels::default();
        for param in MixerParam::ALL {
            levels.set(param, self.mixer(param));
        }
        levels
    }

    fn dial(&self, changed: Band) -> DialUpdate {
        let mut sources = ControlSources::default();
        sources.set(changed, self.control_sources[band_index(changed)]);
        DialUpdate {
            low: Some(self.eq(Band::Low)),
            mid: Some(self.eq(Band::Mid)),
            high: Some(self.eq(Band::High)),
            control_sources: Some(sources),
        }
    }

    fn next_mode(&self) -> VoiceMode {
        let pos = VoiceMode::CYCLE.iter().position(|m| *m == self.mode);
        match pos {
            Some(i) => VoiceMode::CYCLE[(i + 1) % VoiceMode::CYCLE.len()].clone(),
            None => VoiceMode::Music,
        }
    }
}

pub struct MainLoop {
    inbound_rx: Receiver<InboundMsg>,
    outbound_tx: Sender<OutboundMsg>,
    state: DeviceState,
}

impl MainLoop {
    pub fn new(inbound_rx: Receiver<InboundMsg>, outbound_tx: Sender<OutboundMsg>) -> Self {
        Self {
            inbound_rx,
            outbound_tx,
            state: DeviceState::default(),
        }
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    /// Drains everything the network thread queued since the last call.
    pub fn tick(&mut self) {
        loop {
            match self.inbound_rx.try_recv() {
                Ok(InboundMsg::ClientConnected {
                    client,
                    socket_addr,
                }) => {
                    debug!(client, %socket_addr, "pushing initial state");
                    self.send_to(client, InboundMessage::InitialState(self.state.snapshot()));
                }
                Ok(InboundMsg::ClientDisconnected { client }) => {
                    debug!(client, "client gone");
                }
                Ok(InboundMsg::Frame { client, text }) => self.handle_frame(client, &text),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn handle_frame(&mut self, client: ClientId, text: &str) {
        let cmd: OutboundCommand = match serde_json::from_str(text) {
            Ok(c) => c,
            Err(e) => {
                warn!(client, error = %e, "ignoring unparseable command");
                return;
            }
        };
        debug!(client, command = ?cmd, "command");
        self.apply(client, cmd);
    }

    pub fn apply(&mut self, client: ClientId, cmd: OutboundCommand) {
        match cmd {
            OutboundCommand::EqUpdate { band, value } => {
                self.set_band(band, value, ControlSource::Digital);
            }
            OutboundCommand::UartCommand { param, value } => {
                let param = mixer_param(param);
                let (lo, hi) = param.domain();
                if !value.is_finite() {
                    warn!(%param, "ignoring non-finite mixer value");
                    return;
                }
                self.state.mixer[mixer_index(param)] = value.clamp(lo, hi);
                self.broadcast(InboundMessage::DspMixer(self.state.mixer_levels()));
            }
            OutboundCommand::ToggleVoiceMode => {
                self.state.mode = self.state.next_mode();
                info!(mode = %self.state.mode, "voice mode");
                self.broadcast(InboundMessage::Mode {
                    mode: self.state.mode.clone(),
                });
            }
            OutboundCommand::ToggleDucking => {
                self.state.ducking = !self.state.ducking;
                self.broadcast(InboundMessage::Ducking {
                    enabled: self.state.ducking,
                });
            }
            OutboundCommand::ToggleFeedback => {
                self.state.feedback = !self.state.feedback;
                self.broadcast(InboundMessage::Feedback {
                    enabled: self.state.feedback,
                });
            }
            OutboundCommand::ToggleMute => {
                self.state.mute = !self.state.mute;
                self.broadcast(InboundMessage::Mute {
                    enabled: self.state.mute,
                });
            }
            OutboundCommand::GetCurrentEq => {
                self.send_to(client, InboundMessage::InitialState(self.state.eq_snapshot()));
            }
        }
    }

    /// Simulates the hardware knob for `band`.
    pub fn turn_knob(&mut self, band: Band, db: f64) {
        self.set_band(band, db, ControlSource::Physical);
    }

    pub fn turn_random_knob<R: Rng>(&mut self, rng: &mut R) {
        let band = Band::ALL[rng.gen_range(0..Band::ALL.len())];
        let db = rng.gen_range(limits::EQ_MIN_DB..=limits::EQ_MAX_DB).round();
        self.turn_knob(band, db);
    }

    /// Cuts every connection as if the access point went away.
    pub fn drop_clients(&mut self) {
        let _ = self.outbound_tx.try_send(OutboundMsg::DropClients);
    }

    fn set_band(&mut self, band: Band, db: f64, source: ControlSource) {
        if !db.is_finite() {
            warn!(%band, "ignoring non-finite eq value");
            return;
        }
        let i = band_index(band);
        self.state.eq[i] = db.clamp(limits::EQ_MIN_DB, limits::EQ_MAX_DB);
        self.state.control_sources[i] = source;
        debug!(%band, db = self.state.eq[i], ?source, "eq");
        self.broadcast(InboundMessage::Dial(self.state.dial(band)));
    }

    fn broadcast(&self, msg: InboundMessage) {
        if self.outbound_tx.try_send(OutboundMsg::Broadcast { msg }).is_err() {
            warn!("outbound queue full, broadcast dropped");
        }
    }

    fn send_to(&self, client: ClientId, msg: InboundMessage) {
        if self
            .outbound_tx
            .try_send(OutboundMsg::SendTo { client, msg })
            .is_err()
        {
            warn!(client, "outbound queue full, reply dropped");
        }
    }
}

fn mixer_param(param: UartParam) -> MixerParam {
    match param {
        UartParam::Master => MixerParam::MasterGain,
        UartParam::G1 => MixerParam::GainCh1,
        UartParam::G2 => MixerParam::GainCh2,
        UartParam::Pan => MixerParam::Pan,
    }
}

fn band_index(band: Band) -> usize {
    match band {
        Band::Low => 0,
        Band::Mid => 1,
        Band::High => 2,
    }
}

fn mixer_index(param: MixerParam) -> usize {
    match param {
        MixerParam::MasterGain => 0,
        MixerParam::GainCh1 => 1,
        MixerParam::GainCh2 => 2,
        MixerParam::Pan => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rig() -> (MainLoop, Sender<InboundMsg>, Receiver<OutboundMsg>) {
        let (in_tx, in_rx) = bounded(16);
        let (out_tx, out_rx) = bounded(16);
        (MainLoop::new(in_rx, out_tx), in_tx, out_rx)
    }

    fn broadcasts(out_rx: &Receiver<OutboundMsg>) -> Vec<InboundMessage> {
        out_rx
            .try_iter()
            .filter_map(|m| match m {
                OutboundMsg::Broadcast { msg } => Some(msg),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn connect_pushes_full_snapshot_to_that_client() {
        let (mut ml, in_tx, out_rx) = rig();
        in_tx
            .send(InboundMsg::ClientConnected {
                client: 7,
                socket_addr: "127.0.0.1:5555".parse().unwrap(),
            })
            .unwrap();
        ml.tick();
        match out_rx.try_recv().unwrap() {
            OutboundMsg::SendTo {
                client: 7,
                msg: InboundMessage::InitialState(s),
            } => {
                assert_eq!(s.mode, Some(VoiceMode::Off));
                assert!(s.dsp_mixer.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn mode_toggle_cycles_through_all_modes() {
        let (mut ml, _in_tx, out_rx) = rig();
        let mut seen = Vec::new();
        for _ in 0..5 {
            ml.apply(1, OutboundCommand::ToggleVoiceMode);
            seen.push(ml.state().mode.clone());
        }
        assert_eq!(seen, VoiceMode::CYCLE.to_vec());
        assert_eq!(broadcasts(&out_rx).len(), 5);
    }

    #[test]
    fn eq_update_marks_band_digital_and_clamps() {
        let (mut ml, _in_tx, out_rx) = rig();
        ml.apply(1, OutboundCommand::EqUpdate { band: Band::High, value: 30.0 });
        assert_eq!(ml.state().eq(Band::High), 12.0);
        match broadcasts(&out_rx).pop() {
            Some(InboundMessage::Dial(d)) => {
                assert_eq!(d.high, Some(12.0));
                assert_eq!(
                    d.control_sources.and_then(|s| s.high),
                    Some(ControlSource::Digital)
                );
            }
            other => panic!("expected dial, got {other:?}"),
        }
    }

    #[test]
    fn uart_command_updates_mixer() {
        let (mut ml, _in_tx, out_rx) = rig();
        ml.apply(1, OutboundCommand::UartCommand { param: UartParam::Pan, value: -0.4 });
        assert_eq!(ml.state().mixer(MixerParam::Pan), -0.4);
        assert!(matches!(
            broadcasts(&out_rx).pop(),
            Some(InboundMessage::DspMixer(m)) if m.pan == Some(-0.4)
        ));
    }

    #[test]
    fn current_eq_answer_is_partial_and_private() {
        let (mut ml, _in_tx, out_rx) = rig();
        ml.apply(3, OutboundCommand::GetCurrentEq);
        match out_rx.try_recv().unwrap() {
            OutboundMsg::SendTo {
                client: 3,
                msg: InboundMessage::InitialState(s),
            } => {
                assert!(s.eq.is_some());
                assert!(s.mute.is_none());
                assert!(s.dsp_mixer.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn garbage_frames_are_ignored() {
        let (mut ml, in_tx, out_rx) = rig();
        in_tx
            .send(InboundMsg::Frame {
                client: 1,
                text: r#"{"action":"self_destruct"}"#.to_string(),
            })
            .unwrap();
        ml.tick();
        assert!(out_rx.try_recv().is_err());
        assert_eq!(ml.state(), &DeviceState::default());
    }

    #[test]
    fn random_knob_stays_in_range_and_is_physical() {
        let (mut ml, _in_tx, _out_rx) = rig();
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..10 {
            ml.turn_random_knob(&mut rng);
        }
        for band in Band::ALL {
            let v = ml.state().eq(band);
            assert!((-12.0..=12.0).contains(&v));
        }
        assert!(ml
            .state()
            .control_sources
            .iter()
            .all(|s| *s == ControlSource::Physical));
    }
}
