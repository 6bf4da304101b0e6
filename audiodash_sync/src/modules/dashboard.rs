//! Application context: one object that owns the registry and link state and holds
//! the channel handle, the mixer route and the view. Every operator gesture and
//! every channel event goes through it.

use crate::bindings::{BindingError, BindingRegistry, BindingView, ControlKey, LevelKey};
use crate::channel::{self, ChannelEvent, ChannelHandle};
use crate::config::{ConfigError, DashboardConfig, MixerRoute};
use crate::dispatcher::{reconcile, LinkState};
use crate::mixer_http::{MixerHttpClient, MixerHttpError};
use crate::translator::{self, Intent, ToggleTarget};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Presentation boundary. Implementations draw; they never mutate bindings.
pub trait DashboardView {
    fn render(&mut self, key: ControlKey, view: &BindingView);
    fn link_changed(&mut self, state: LinkState);
}

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Mixer(#[from] MixerHttpError),
}

#[derive(Debug)]
enum MixerSink {
    Channel,
    Http(MixerHttpClient),
}

pub struct Dashboard<V> {
    registry: BindingRegistry,
    link: LinkState,
    channel: ChannelHandle,
    mixer: MixerSink,
    view: V,
}

impl<V: DashboardView> Dashboard<V> {
    pub fn new(channel: ChannelHandle, view: V) -> Self {
        Self {
            registry: BindingRegistry::new(),
            link: LinkState::Disconnected,
            channel,
            mixer: MixerSink::Channel,
            view,
        }
    }

    /// Routes mixer commits to the HTTP side-channel instead of the socket.
    pub fn with_http_mixer(mut self, client: MixerHttpClient) -> Self {
        self.mixer = MixerSink::Http(client);
        self
    }

    /// Spawns the channel manager on the current runtime and wires the context.
    pub fn connect(
        cfg: &DashboardConfig,
        view: V,
    ) -> Result<(Self, mpsc::Receiver<ChannelEvent>), DashboardError> {
        cfg.validate()?;
        let (handle, events) = channel::spawn(cfg.endpoint.clone(), cfg.reconnect, cfg.command_queue);
        let mut dash = Self::new(handle, view);
        if cfg.mixer_route == MixerRoute::Http {
            let client = MixerHttpClient::new(&cfg.mixer_http_base()?)?;
            info!(url = %client.url(), "mixer commits go over http");
            dash = dash.with_http_mixer(client);
        }
        Ok((dash, events))
    }

    pub fn registry(&self) -> &BindingRegistry {
        &self.registry
    }

    pub fn link_state(&self) -> LinkState {
        self.link
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn handle_event(&mut self, event: ChannelEvent) {
        if self.link.advance(&event) {
            self.view.link_changed(self.link);
        }
        if let ChannelEvent::Message(msg) = event {
            for key in reconcile(&mut self.registry, msg) {
                self.render(key);
            }
        }
    }

    /// Drains channel events until the manager goes away.
    pub async fn run(&mut self, events: &mut mpsc::Receiver<ChannelEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
        debug!("event stream ended");
    }

    pub fn begin_edit(&mut self, key: LevelKey) {
        self.registry.begin_edit(key);
        self.render(ControlKey::Level(key));
    }

    /// Local-only update while dragging. Nothing goes on the wire.
    pub fn preview(&mut self, key: LevelKey, value: f64) -> Result<f64, BindingError> {
        let value = self.registry.preview(key, value)?;
        self.render(ControlKey::Level(key));
        Ok(value)
    }

    /// Makes the value authoritative and transmits it. Returns the value as sent.
    ///
    /// HTTP mixer posts run on their own task; the outcome only reaches the log.
    pub fn commit_edit(&mut self, key: LevelKey, value: f64) -> Result<f64, BindingError> {
        let value = self.registry.commit_edit(key, value)?;
        self.render(ControlKey::Level(key));

        match (&self.mixer, key) {
            (MixerSink::Http(client), LevelKey::Mixer(param)) => {
                let client = client.clone();
                tokio::spawn(async move {
                    client.update_logged(param, value).await;
                });
            }
            _ => self.send_all(Intent::Commit(key, value)),
        }
        Ok(value)
    }

    pub fn cancel_edit(&mut self, key: LevelKey) {
        if self.registry.cancel_edit(key) {
            self.render(ControlKey::Level(key));
        }
    }

    /// Requests a flip. The local value only changes when the device echoes it.
    pub fn toggle(&mut self, target: ToggleTarget) {
        self.send_all(Intent::Toggle(target));
    }

    pub fn request_current_eq(&mut self) {
        self.send_all(Intent::RequestEq);
    }

    pub fn retry(&self) {
        if self.link != LinkState::Exhausted {
            debug!(link = %self.link, "retry requested while a cycle is active");
        }
        self.channel.retry();
    }

    pub fn close(&self) {
        self.channel.close();
    }

    fn send_all(&self, intent: Intent) {
        for cmd in translator::translate(intent) {
            self.channel.send(cmd);
        }
    }

    fn render(&mut self, key: ControlKey) {
        let view = self.registry.view(key);
        self.view.render(key, &view);
    }
}
