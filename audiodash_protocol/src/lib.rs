use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod limits {
    pub const EQ_MIN_DB: f64 = -12.0;
    pub const EQ_MAX_DB: f64 = 12.0;
    pub const GAIN_MIN: f64 = 0.0;
    pub const GAIN_MAX: f64 = 2.0;
    pub const PAN_MIN: f64 = -1.0;
    pub const PAN_MAX: f64 = 1.0;
    /// Enforced by the network configuration screens, not by this crate.
    pub const MIN_PASSWORD_LENGTH: usize = 8;
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Band {
    Low,
    Mid,
    High,
}

impl Band {
    pub const ALL: [Band; 3] = [Band::Low, Band::Mid, Band::High];

    pub fn as_str(self) -> &'static str {
        match self {
            Band::Low => "low",
            Band::Mid => "mid",
            Band::High => "high",
        }
    }
}

impl FromStr for Band {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Band::ALL
            .into_iter()
            .find(|b| b.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown band: {s}"))
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mixer quantities as the dashboard names them (`dsp_mixer` payloads, HTTP side-channel).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MixerParam {
    MasterGain,
    GainCh1,
    GainCh2,
    Pan,
}

impl MixerParam {
    pub const ALL: [MixerParam; 4] = [
        MixerParam::MasterGain,
        MixerParam::GainCh1,
        MixerParam::GainCh2,
        MixerParam::Pan,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MixerParam::MasterGain => "master_gain",
            MixerParam::GainCh1 => "gain_ch1",
            MixerParam::GainCh2 => "gain_ch2",
            MixerParam::Pan => "pan",
        }
    }

    /// Inclusive value domain accepted by the device.
    pub fn domain(self) -> (f64, f64) {
        match self {
            MixerParam::Pan => (limits::PAN_MIN, limits::PAN_MAX),
            _ => (limits::GAIN_MIN, limits::GAIN_MAX),
        }
    }

    pub fn neutral(self) -> f64 {
        match self {
            MixerParam::Pan => 0.0,
            _ => 1.0,
        }
    }
}

impl FromStr for MixerParam {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MixerParam::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown mixer param: {s}"))
    }
}

impl fmt::Display for MixerParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hardware gain parameters addressed by `uart_command`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum UartParam {
    Master,
    G1,
    G2,
    Pan,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ControlSource {
    #[default]
    Physical,
    Digital,
}

/// Voice processing mode reported by the device. Unrecognised names are kept verbatim.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, Default)]
#[serde(from = "String", into = "String")]
pub enum VoiceMode {
    Music,
    Live,
    Club,
    Monitor,
    #[default]
    Off,
    Other(String),
}

impl VoiceMode {
    /// Cycle order used by the device's mode toggle.
    pub const CYCLE: [VoiceMode; 5] = [
        VoiceMode::Music,
        VoiceMode::Live,
        VoiceMode::Club,
        VoiceMode::Monitor,
        VoiceMode::Off,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            VoiceMode::Music => "music",
            VoiceMode::Live => "live",
            VoiceMode::Club => "club",
            VoiceMode::Monitor => "monitor",
            VoiceMode::Off => "off",
            VoiceMode::Other(s) => s,
        }
    }
}

impl From<String> for VoiceMode {
    fn from(s: String) -> Self {
        match s.as_str() {
            "music" => VoiceMode::Music,
            "live" => VoiceMode::Live,
            "club" => VoiceMode::Club,
            "monitor" => VoiceMode::Monitor,
            "off" => VoiceMode::Off,
            _ => VoiceMode::Other(s),
        }
    }
}

impl From<VoiceMode> for String {
    fn from(mode: VoiceMode) -> Self {
        match mode {
            VoiceMode::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for VoiceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct EqLevels {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<f64>,
}

impl EqLevels {
    pub fn get(&self, band: Band) -> Option<f64> {
        match band {
            Band::Low => self.low,
            Band::Mid => self.mid,
            Band::High => self.high,
        }
    }

    pub fn set(&mut self, band: Band, value: f64) {
        let slot = match band {
            Band::Low => &mut self.low,
            Band::Mid => &mut self.mid,
            Band::High => &mut self.high,
        };
        *slot = Some(value);
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ControlSources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<ControlSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid: Option<ControlSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<ControlSource>,
}

impl ControlSources {
    pub fn get(&self, band: Band) -> Option<ControlSource> {
        match band {
            Band::Low => self.low,
            Band::Mid => self.mid,
            Band::High => self.high,
        }
    }

    pub fn set(&mut self, band: Band, source: ControlSource) {
        let slot = match band {
            Band::Low => &mut self.low,
            Band::Mid => &mut self.mid,
            Band::High => &mut self.high,
        };
        *slot = Some(source);
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct MixerLevels {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_gain: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gain_ch1: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gain_ch2: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pan: Option<f64>,
}

impl MixerLevels {
    pub fn get(&self, param: MixerParam) -> Option<f64> {
        match param {
            MixerParam::MasterGain => self.master_gain,
            MixerParam::GainCh1 => self.gain_ch1,
            MixerParam::GainCh2 => self.gain_ch2,
            MixerParam::Pan => self.pan,
        }
    }

    pub fn set(&mut self, param: MixerParam, value: f64) {
        let slot = match param {
            MixerParam::MasterGain => &mut self.master_gain,
            MixerParam::GainCh1 => &mut self.gain_ch1,
            MixerParam::GainCh2 => &mut self.gain_ch2,
            MixerParam::Pan => &mut self.pan,
        };
        *slot = Some(value);
    }
}

/// Full (or, for `get_current_eq` answers, partial) device state.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct StateSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<VoiceMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eq: Option<EqLevels>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ducking: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mute: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dsp_mixer: Option<MixerLevels>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DialUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_sources: Option<ControlSources>,
}

impl DialUpdate {
    pub fn level(&self, band: Band) -> Option<f64> {
        match band {
            Band::Low => self.low,
            Band::Mid => self.mid,
            Band::High => self.high,
        }
    }
}

/// Device -> dashboard frames.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum InboundMessage {
    InitialState(StateSnapshot),
    Dial(DialUpdate),
    Mode { mode: VoiceMode },
    Ducking { enabled: bool },
    Feedback { enabled: bool },
    Mute { enabled: bool },
    DspMixer(MixerLevels),
}

impl InboundMessage {
    pub const TAGS: [&'static str; 7] = [
        "initial_state",
        "dial",
        "mode",
        "ducking",
        "feedback",
        "mute",
        "dsp_mixer",
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            InboundMessage::InitialState(_) => "initial_state",
            InboundMessage::Dial(_) => "dial",
            InboundMessage::Mode { .. } => "mode",
            InboundMessage::Ducking { .. } => "ducking",
            InboundMessage::Feedback { .. } => "feedback",
            InboundMessage::Mute { .. } => "mute",
            InboundMessage::DspMixer(_) => "dsp_mixer",
        }
    }
}

/// Dashboard -> device frames.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum OutboundCommand {
    EqUpdate { band: Band, value: f64 },
    UartCommand { param: UartParam, value: f64 },
    ToggleVoiceMode,
    ToggleDucking,
    ToggleFeedback,
    ToggleMute,
    GetCurrentEq,
}

/// Body of the HTTP mixer side-channel.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MixerUpdateRequest {
    pub param: MixerParam,
    pub value: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MixerUpdateResponse {
    pub success: bool,
    #[serde(default, alias = "message", skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_initial_state_from_device() {
        let raw = r#"{"type":"initial_state","mode":"off","feedback":false,"ducking":true,
            "mute":false,"eq":{"low":-3,"mid":0,"high":5},
            "dsp_mixer":{"master_gain":1.0,"gain_ch1":0.5,"gain_ch2":1.5,"pan":-0.25}}"#;
        let msg: InboundMessage = serde_json::from_str(raw).unwrap();
        let InboundMessage::InitialState(s) = msg else {
            panic!("expected initial_state");
        };
        assert_eq!(s.mode, Some(VoiceMode::Off));
        assert_eq!(s.ducking, Some(true));
        let eq = s.eq.unwrap();
        assert_eq!((eq.low, eq.mid, eq.high), (Some(-3.0), Some(0.0), Some(5.0)));
        assert_eq!(s.dsp_mixer.unwrap().pan, Some(-0.25));
    }

    #[test]
    fn dial_with_empty_control_sources() {
        let raw = r#"{"type":"dial","low":1.5,"mid":0,"high":-2,"control_sources":{}}"#;
        let msg: InboundMessage = serde_json::from_str(raw).unwrap();
        let InboundMessage::Dial(d) = msg else {
            panic!("expected dial");
        };
        assert_eq!(d.level(Band::Low), Some(1.5));
        assert_eq!(d.control_sources, Some(ControlSources::default()));
    }

    #[test]
    fn unknown_mode_name_is_preserved() {
        let msg: InboundMessage = serde_json::from_str(r#"{"type":"mode","mode":"karaoke"}"#).unwrap();
        assert_eq!(
            msg,
            InboundMessage::Mode {
                mode: VoiceMode::Other("karaoke".to_string())
            }
        );
    }

    #[test]
    fn outbound_commands_use_action_tag() {
        let eq = serde_json::to_value(OutboundCommand::EqUpdate {
            band: Band::Low,
            value: -6.0,
        })
        .unwrap();
        assert_eq!(eq, serde_json::json!({"action":"eq_update","band":"low","value":-6.0}));

        let uart = serde_json::to_value(OutboundCommand::UartCommand {
            param: UartParam::G1,
            value: 0.5,
        })
        .unwrap();
        assert_eq!(uart, serde_json::json!({"action":"uart_command","param":"g1","value":0.5}));

        let toggle = serde_json::to_value(OutboundCommand::ToggleMute).unwrap();
        assert_eq!(toggle, serde_json::json!({"action":"toggle_mute"}));
    }

    #[test]
    fn mixer_response_accepts_message_as_error() {
        let r: MixerUpdateResponse =
            serde_json::from_str(r#"{"success":false,"message":"Pan value must be between -1.0 and 1.0"}"#)
                .unwrap();
        assert!(!r.success);
        assert!(r.error.unwrap().starts_with("Pan value"));
    }

    #[test]
    fn parses_names_case_insensitively() {
        assert_eq!("HIGH".parse::<Band>().unwrap(), Band::High);
        assert_eq!("gain_ch2".parse::<MixerParam>().unwrap(), MixerParam::GainCh2);
        assert!("treble".parse::<Band>().is_err());
    }
}
