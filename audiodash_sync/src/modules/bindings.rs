use crate::protocol::{limits, Band, ControlSource, MixerParam, StateSnapshot, VoiceMode};
use std::fmt;
use thiserror::Error;

/// Who wrote the currently displayed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Device,
    Operator,
}

/// Continuous controls: the only ones an operator can drag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LevelKey {
    Eq(Band),
    Mixer(MixerParam),
}

impl LevelKey {
    pub const ALL: [LevelKey; 7] = [
        LevelKey::Eq(Band::Low),
        LevelKey::Eq(Band::Mid),
        LevelKey::Eq(Band::High),
        LevelKey::Mixer(MixerParam::MasterGain),
        LevelKey::Mixer(MixerParam::GainCh1),
        LevelKey::Mixer(MixerParam::GainCh2),
        LevelKey::Mixer(MixerParam::Pan),
    ];

    pub fn domain(self) -> (f64, f64) {
        match self {
            LevelKey::Eq(_) => (limits::EQ_MIN_DB, limits::EQ_MAX_DB),
            LevelKey::Mixer(p) => p.domain(),
        }
    }

    pub fn neutral(self) -> f64 {
        match self {
            LevelKey::Eq(_) => 0.0,
            LevelKey::Mixer(p) => p.neutral(),
        }
    }
}

impl fmt::Display for LevelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LevelKey::Eq(b) => write!(f, "eq.{b}"),
            LevelKey::Mixer(p) => write!(f, "mixer.{p}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    Ducking,
    Feedback,
    Mute,
}

impl Flag {
    pub const ALL: [Flag; 3] = [Flag::Ducking, Flag::Feedback, Flag::Mute];

    fn index(self) -> usize {
        match self {
            Flag::Ducking => 0,
            Flag::Feedback => 1,
            Flag::Mute => 2,
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Flag::Ducking => "ducking",
            Flag::Feedback => "feedback",
            Flag::Mute => "mute",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlKey {
    Level(LevelKey),
    Flag(Flag),
    Mode,
}

impl fmt::Display for ControlKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlKey::Level(k) => k.fmt(f),
            ControlKey::Flag(k) => k.fmt(f),
            ControlKey::Mode => f.write_str("mode"),
        }
    }
}

/// One device-reported field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    Level(LevelKey, f64),
    Flag(Flag, bool),
    Mode(VoiceMode),
}

impl FieldUpdate {
    pub fn key(&self) -> ControlKey {
        match self {
            FieldUpdate::Level(k, _) => ControlKey::Level(*k),
            FieldUpdate::Flag(k, _) => ControlKey::Flag(*k),
            FieldUpdate::Mode(_) => ControlKey::Mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlValue {
    Level(f64),
    Flag(bool),
    Mode(VoiceMode),
}

impl fmt::Display for ControlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlValue::Level(v) => write!(f, "{v:.1}"),
            ControlValue::Flag(on) => f.write_str(if *on { "on" } else { "off" }),
            ControlValue::Mode(m) => m.fmt(f),
        }
    }
}

/// Read-only snapshot of one binding, handed to view collaborators.
#[derive(Debug, Clone, PartialEq)]
pub struct BindingView {
    pub value: ControlValue,
    pub source: Source,
    pub is_being_edited: bool,
    /// Only present for EQ bands.
    pub control_source: Option<ControlSource>,
}

#[derive(Debug, Error, PartialEq)]
pub enum BindingError {
    #[error("non-finite value for {0}")]
    NonFinite(LevelKey),
}

/// Rejects NaN/inf and clamps into the control's domain.
pub fn sanitize_level(key: LevelKey, value: f64) -> Result<f64, BindingError> {
    if !value.is_finite() {
        return Err(BindingError::NonFinite(key));
    }
    let (lo, hi) = key.domain();
    Ok(value.clamp(lo, hi))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Binding<T> {
    value: T,
    source: Source,
    editing: bool,
    before_edit: Option<(T, Source)>,
    deferred: Option<T>,
}

impl<T: Clone> Binding<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            source: Source::Device,
            editing: false,
            before_edit: None,
            deferred: None,
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn is_being_edited(&self) -> bool {
        self.editing
    }

    /// Device update. Held back while an operator gesture is in progress; returns whether
    /// the displayed value was written.
    pub fn apply_remote(&mut self, value: T) -> bool {
        if self.editing {
            self.deferred = Some(value);
            return false;
        }
        self.value = value;
        self.source = Source::Device;
        true
    }

    pub fn begin_edit(&mut self) {
        if self.editing {
            return;
        }
        self.editing = true;
        self.before_edit = Some((self.value.clone(), self.source));
        self.deferred = None;
    }

    /// Local-only display update during a gesture.
    pub fn preview(&mut self, value: T) {
        self.begin_edit();
        self.value = value;
    }

    pub fn commit(&mut self, value: T) {
        self.value = value;
        self.source = Source::Operator;
        self.editing = false;
        self.before_edit = None;
        self.deferred = None;
    }

    /// Ends a gesture without committing. The latest held-back device value wins,
    /// otherwise the pre-edit state comes back. Returns whether anything was editing.
    pub fn cancel_edit(&mut self) -> bool {
        if !self.editing {
            return false;
        }
        self.editing = false;
        let restored = self.before_edit.take();
        match self.deferred.take() {
            Some(value) => {
                self.value = value;
                self.source = Source::Device;
            }
            None => {
                if let Some((value, source)) = restored {
                    self.value = value;
                    self.source = source;
                }
            }
        }
        true
    }
}

/// Owns every binding on the dashboard.
#[derive(Debug, Clone)]
pub struct BindingRegistry {
    eq: [Binding<f64>; 3],
    eq_sources: [ControlSource; 3],
    mixer: [Binding<f64>; 4],
    flags: [Binding<bool>; 3],
    mode: Binding<VoiceMode>,
}

impl Default for BindingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BindingRegistry {
    pub fn new() -> Self {
        Self {
            eq: Band::ALL.map(|b| Binding::new(LevelKey::Eq(b).neutral())),
            eq_sources: [ControlSource::Physical; 3],
            mixer: MixerParam::ALL.map(|p| Binding::new(p.neutral())),
            flags: [
                Binding::new(false),
                Binding::new(false),
                Binding::new(false),
            ],
            mode: Binding::new(VoiceMode::Off),
        }
    }

    pub fn level(&self, key: LevelKey) -> &Binding<f64> {
        match key {
            LevelKey::Eq(b) => &self.eq[band_index(b)],
            LevelKey::Mixer(p) => &self.mixer[mixer_index(p)],
        }
    }

    fn level_mut(&mut self, key: LevelKey) -> &mut Binding<f64> {
        match key {
            LevelKey::Eq(b) => &mut self.eq[band_index(b)],
            LevelKey::Mixer(p) => &mut self.mixer[mixer_index(p)],
        }
    }

    pub fn flag(&self, flag: Flag) -> &Binding<bool> {
        &self.flags[flag.index()]
    }

    pub fn mode(&self) -> &Binding<VoiceMode> {
        &self.mode
    }

    pub fn control_source(&self, band: Band) -> ControlSource {
        self.eq_sources[band_index(band)]
    }

    /// Returns whether the stored source changed.
    pub fn set_control_source(&mut self, band: Band, source: ControlSource) -> bool {
        let slot = &mut self.eq_sources[band_index(band)];
        let changed = *slot != source;
        *slot = source;
        changed
    }

    pub fn apply_remote(&mut self, update: FieldUpdate) -> bool {
        match update {
            FieldUpdate::Level(k, v) => self.level_mut(k).apply_remote(v),
            FieldUpdate::Flag(f, v) => self.flags[f.index()].apply_remote(v),
            FieldUpdate::Mode(m) => self.mode.apply_remote(m),
        }
    }

    pub fn begin_edit(&mut self, key: LevelKey) {
        self.level_mut(key).begin_edit();
    }

    pub fn preview(&mut self, key: LevelKey, value: f64) -> Result<f64, BindingError> {
        let value = sanitize_level(key, value)?;
        self.level_mut(key).preview(value);
        Ok(value)
    }

    /// Makes the operator's value authoritative and returns it as it will be sent.
    pub fn commit_edit(&mut self, key: LevelKey, value: f64) -> Result<f64, BindingError> {
        let value = sanitize_level(key, value)?;
        self.level_mut(key).commit(value);
        if let LevelKey::Eq(band) = key {
            self.set_control_source(band, ControlSource::Digital);
        }
        Ok(value)
    }

    pub fn cancel_edit(&mut self, key: LevelKey) -> bool {
        self.level_mut(key).cancel_edit()
    }

    /// Applies every field present in the snapshot; absent fields keep their value.
    /// Returns the keys whose display was written.
    pub fn apply_bulk_snapshot(&mut self, snapshot: &StateSnapshot) -> Vec<ControlKey> {
        snapshot_updates(snapshot)
            .into_iter()
            .filter_map(|u| {
                let key = u.key();
                self.apply_remote(u).then_some(key)
            })
            .collect()
    }

    pub fn view(&self, key: ControlKey) -> BindingView {
        match key {
            ControlKey::Level(k) => {
                let b = self.level(k);
                BindingView {
                    value: ControlValue::Level(*b.value()),
                    source: b.source(),
                    is_being_edited: b.is_being_edited(),
                    control_source: match k {
                        LevelKey::Eq(band) => Some(self.control_source(band)),
                        LevelKey::Mixer(_) => None,
                    },
                }
            }
            ControlKey::Flag(f) => {
                let b = self.flag(f);
                BindingView {
                    value: ControlValue::Flag(*b.value()),
                    source: b.source(),
                    is_being_edited: false,
                    control_source: None,
                }
            }
            ControlKey::Mode => BindingView {
                value: ControlValue::Mode(self.mode.value().clone()),
                source: self.mode.source(),
                is_being_edited: false,
                control_source: None,
            },
        }
    }
}

/// Flattens a snapshot into independent per-field updates.
pub fn snapshot_updates(snapshot: &StateSnapshot) -> Vec<FieldUpdate> {
    let mut out = Vec::new();
    if let Some(mode) = &snapshot.mode {
        out.push(FieldUpdate::Mode(mode.clone()));
    }
    if let Some(eq) = &snapshot.eq {
        for band in Band::ALL {
            if let Some(v) = eq.get(band) {
                out.push(FieldUpdate::Level(LevelKey::Eq(band), v));
            }
        }
    }
    for (flag, value) in [
        (Flag::Ducking, snapshot.ducking),
        (Flag::Feedback, snapshot.feedback),
        (Flag::Mute, snapshot.mute),
    ] {
        if let Some(v) = value {
            out.push(FieldUpdate::Flag(flag, v));
        }
    }
    if let Some(mixer) = &snapshot.dsp_mixer {
        for param in MixerParam::ALL {
            if let Some(v) = mixer.get(param) {
                out.push(FieldUpdate::Level(LevelKey::Mixer(param), v));
            }
        }
    }
    out
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
