use audiodash_sync::bindings::{
    BindingRegistry, BindingView, ControlKey, ControlValue, LevelKey, Source,
};
use audiodash_sync::dashboard::DashboardView;
use audiodash_sync::dispatcher::LinkState;
use audiodash_sync::protocol::{Band, ControlSource, MixerParam};
use audiodash_sync::translator::ToggleTarget;
use std::io::Write;

pub const HELP: &str = "\
commands:
  eq <low|mid|high> <db>        commit an EQ band
  mixer <param> <value>         commit master_gain|gain_ch1|gain_ch2|pan
  drag <control> <value>        preview without sending
  release <control>             commit the previewed value
  cancel <control>              abandon a drag
  toggle <mode|ducking|feedback|mute>
  refresh                       ask the device for current EQ
  retry                         reconnect after giving up
  state                         print every control
  quit";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Commit(LevelKey, f64),
    Drag(LevelKey, f64),
    Release(LevelKey),
    Cancel(LevelKey),
    Toggle(ToggleTarget),
    Refresh,
    Retry,
    State,
    Help,
    Quit,
}

pub fn parse_control(name: &str) -> Result<LevelKey, String> {
    if let Ok(band) = name.parse::<Band>() {
        return Ok(LevelKey::Eq(band));
    }
    name.parse::<MixerParam>()
        .map(LevelKey::Mixer)
        .map_err(|_| format!("unknown control: {name}"))
}

fn parse_number(s: Option<&str>) -> Result<f64, String> {
    let s = s.ok_or("missing value")?;
    s.parse::<f64>().map_err(|_| format!("not a number: {s}"))
}

pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let arg = words.next();
    let value = words.next();
    let control = || parse_control(arg.ok_or("missing control")?);

    let cmd = match verb.to_ascii_lowercase().as_str() {
        "eq" => {
            let band: Band = arg.ok_or("missing band")?.parse()?;
            ConsoleCommand::Commit(LevelKey::Eq(band), parse_number(value)?)
        }
        "mixer" => {
            let param: MixerParam = arg.ok_or("missing param")?.parse()?;
            ConsoleCommand::Commit(LevelKey::Mixer(param), parse_number(value)?)
        }
        "drag" => ConsoleCommand::Drag(control()?, parse_number(value)?),
        "release" => ConsoleCommand::Release(control()?),
        "cancel" => ConsoleCommand::Cancel(control()?),
        "toggle" => ConsoleCommand::Toggle(arg.ok_or("missing toggle")?.parse()?),
        "refresh" => ConsoleCommand::Refresh,
        "retry" => ConsoleCommand::Retry,
        "state" => ConsoleCommand::State,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => return Err(format!("unknown command: {other} (try `help`)")),
    };
    Ok(Some(cmd))
}

/// The previewed value to commit, if a drag on `key` is in progress.
pub fn pending_release(registry: &BindingRegistry, key: LevelKey) -> Option<f64> {
    let binding = registry.level(key);
    binding.is_being_edited().then(|| *binding.value())
}

/// Prints one line per change to stdout.
pub struct ConsoleView<W: Write> {
    out: W,
}

impl<W: Write> ConsoleView<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}

pub fn format_binding(key: ControlKey, view: &BindingView) -> String {
    let unit = match (key, &view.value) {
        (ControlKey::Level(LevelKey::Eq(_)), ControlValue::Level(_)) => " dB",
        _ => "",
    };
    let mut line = format!("{key}: {}{unit}", view.value);
    let source = match view.source {
        Source::Device => "device",
        Source::Operator => "operator",
    };
    line.push_str(&format!(" [{source}"));
    if let Some(cs) = view.control_source {
        line.push_str(match cs {
            ControlSource::Physical => ", knob",
            ControlSource::Digital => ", web",
        });
    }
    if view.is_being_edited {
        line.push_str(", editing");
    }
    line.push(']');
    line
}

impl<W: Write> DashboardView for ConsoleView<W> {
    fn render(&mut self, key: ControlKey, view: &BindingView) {
        let _ = writeln!(self.out, "{}", format_binding(key, view));
    }

    fn link_changed(&mut self, state: LinkState) {
        let _ = match state {
            LinkState::Exhausted => writeln!(
                self.out,
                "link: gave up reconnecting; type `retry` to try again"
            ),
            other => writeln!(self.out, "link: {other}"),
        };
    }
}
