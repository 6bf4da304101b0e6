//! State synchronisation between an operator dashboard and a remote audio DSP device.
//!
//! The [`channel`] module owns the WebSocket link, [`bindings`] holds the displayed
//! value of every control, [`translator`] turns committed edits into wire commands and
//! [`dispatcher`] folds device frames back into the bindings. [`dashboard::Dashboard`]
//! wires them together as the single application context.

mod modules;

pub use modules::{bindings, channel, codec, config, dashboard, dispatcher, mixer_http, translator};

pub use audiodash_protocol as protocol;
