//! Routes decoded device messages into the binding registry and tracks link state.

use crate::bindings::{BindingRegistry, ControlKey, Flag, FieldUpdate, LevelKey};
use crate::channel::ChannelEvent;
use crate::protocol::{Band, InboundMessage, MixerParam};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Open,
    Reconnecting {
        attempt: u32,
        delay: Duration,
    },
    /// Reconnect budget spent. Left only through a manual retry.
    Exhausted,
}

impl LinkState {
    /// Applies a lifecycle event. Returns whether the state changed.
    pub fn advance(&mut self, event: &ChannelEvent) -> bool {
        let next = match event {
            ChannelEvent::Connecting { .. } => LinkState::Connecting,
            ChannelEvent::Opened => LinkState::Open,
            ChannelEvent::Closed { .. } => LinkState::Disconnected,
            ChannelEvent::Reconnecting { attempt, delay } => LinkState::Reconnecting {
                attempt: *attempt,
                delay: *delay,
            },
            ChannelEvent::GaveUp { .. } => LinkState::Exhausted,
            ChannelEvent::Message(_) => return false,
        };
        if next == *self {
            return false;
        }
        debug!(from = %self, to = %next, "link state");
        *self = next;
        true
    }

    pub fn is_open(&self) -> bool {
        matches!(self, LinkState::Open)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Disconnected => f.write_str("disconnected"),
            LinkState::Connecting => f.write_str("connecting"),
            LinkState::Open => f.write_str("open"),
            LinkState::Reconnecting { attempt, delay } => {
                write!(f, "reconnecting (attempt {attempt} in {}ms)", delay.as_millis())
            }
            LinkState::Exhausted => f.write_str("gave up"),
        }
    }
}

/// Applies one device message. Returns the keys whose displayed state changed,
/// in application order and without duplicates.
pub fn reconcile(registry: &mut BindingRegistry, msg: InboundMessage) -> Vec<ControlKey> {
    let mut touched = Vec::new();
    match msg {
        InboundMessage::InitialState(snapshot) => {
            info!("applying device snapshot");
            touched = registry.apply_bulk_snapshot(&snapshot);
        }
        InboundMessage::Dial(dial) => {
            for band in Band::ALL {
                let key = ControlKey::Level(LevelKey::Eq(band));
                if let Some(v) = dial.level(band) {
                    if registry.apply_remote(FieldUpdate::Level(LevelKey::Eq(band), v)) {
                        touched.push(key);
                    } else {
                        debug!(%band, "dial update held back during edit");
                    }
                }
                let source = dial.control_sources.as_ref().and_then(|s| s.get(band));
                if let Some(source) = source {
                    if registry.set_control_source(band, source) && !touched.contains(&key) {
                        touched.push(key);
                    }
                }
            }
        }
        InboundMessage::Mode { mode } => {
            if registry.apply_remote(FieldUpdate::Mode(mode)) {
                touched.push(ControlKey::Mode);
            }
        }
        InboundMessage::Ducking { enabled } => {
            push_flag(registry, &mut touched, Flag::Ducking, enabled)
        }
        InboundMessage::Feedback { enabled } => {
            push_flag(registry, &mut touched, Flag::Feedback, enabled)
        }
        InboundMessage::Mute { enabled } => push_flag(registry, &mut touched, Flag::Mute, enabled),
        InboundMessage::DspMixer(levels) => {
            for param in MixerParam::ALL {
                if let Some(v) = levels.get(param) {
                    let key = LevelKey::Mixer(param);
                    if registry.apply_remote(FieldUpdate::Level(key, v)) {
                        touched.push(ControlKey::Level(key));
                    }
                }
            }
            if touched.is_empty() {
                debug!("dsp_mixer message changed nothing");
            }
        }
    }
    touched
}

fn push_flag(registry: &mut BindingRegistry, touched: &mut Vec<ControlKey>, flag: Flag, on: bool) {
    if registry.apply_remote(FieldUpdate::Flag(flag, on)) {
        touched.push(ControlKey::Flag(flag));
    }
}
