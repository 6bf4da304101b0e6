//! Pure mapping from operator intents to outbound commands.

use crate::bindings::LevelKey;
use crate::protocol::{limits, Band, MixerParam, OutboundCommand, UartParam};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToggleTarget {
    VoiceMode,
    Ducking,
    Feedback,
    Mute,
}

impl FromStr for ToggleTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mode" | "voice_mode" => Ok(ToggleTarget::VoiceMode),
            "ducking" => Ok(ToggleTarget::Ducking),
            "feedback" => Ok(ToggleTarget::Feedback),
            "mute" => Ok(ToggleTarget::Mute),
            other => Err(format!("unknown toggle: {other}")),
        }
    }
}

impl fmt::Display for ToggleTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ToggleTarget::VoiceMode => "mode",
            ToggleTarget::Ducking => "ducking",
            ToggleTarget::Feedback => "feedback",
            ToggleTarget::Mute => "mute",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Intent {
    /// Value must already be sanitized by the registry.
    Commit(LevelKey, f64),
    Toggle(ToggleTarget),
    RequestEq,
}

/// Linear dB to hardware gain. -12 dB is silence, 0 dB unity, +12 dB double.
pub fn eq_db_to_gain(db: f64) -> f64 {
    (1.0 + db / limits::EQ_MAX_DB).clamp(limits::GAIN_MIN, limits::GAIN_MAX)
}

/// Hardware gain stage driven by a band. The mid band has none.
pub fn band_gain_param(band: Band) -> Option<UartParam> {
    match band {
        Band::Low => Some(UartParam::G1),
        Band::Mid => None,
        Band::High => Some(UartParam::G2),
    }
}

pub fn mixer_uart_param(param: MixerParam) -> UartParam {
    match param {
        MixerParam::MasterGain => UartParam::Master,
        MixerParam::GainCh1 => UartParam::G1,
        MixerParam::GainCh2 => UartParam::G2,
        MixerParam::Pan => UartParam::Pan,
    }
}

pub fn toggle_command(target: ToggleTarget) -> OutboundCommand {
    match target {
        ToggleTarget::VoiceMode => OutboundCommand::ToggleVoiceMode,
        ToggleTarget::Ducking => OutboundCommand::ToggleDucking,
        ToggleTarget::Feedback => OutboundCommand::ToggleFeedback,
        ToggleTarget::Mute => OutboundCommand::ToggleMute,
    }
}

pub fn eq_commands(band: Band, db: f64) -> Vec<OutboundCommand> {
    let mut out = vec![OutboundCommand::EqUpdate { band, value: db }];
    if let Some(param) = band_gain_param(band) {
        out.push(OutboundCommand::UartCommand {
            param,
            value: eq_db_to_gain(db),
        });
    }
    out
}

pub fn mixer_command(param: MixerParam, value: f64) -> OutboundCommand {
    OutboundCommand::UartCommand {
        param: mixer_uart_param(param),
        value,
    }
}

pub fn translate(intent: Intent) -> Vec<OutboundCommand> {
    match intent {
        Intent::Commit(LevelKey::Eq(band), db) => eq_commands(band, db),
        Intent::Commit(LevelKey::Mixer(param), value) => vec![mixer_command(param, value)],
        Intent::Toggle(target) => vec![toggle_command(target)],
        Intent::RequestEq => vec![OutboundCommand::GetCurrentEq],
    }
}
