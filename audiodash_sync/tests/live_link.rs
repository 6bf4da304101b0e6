use audiodash_mock_device::MockDevice;
use audiodash_sync::bindings::{BindingView, ControlKey, Flag, LevelKey, Source};
use audiodash_sync::channel::{self, ChannelEvent, ChannelStatus, ReconnectPolicy};
use audiodash_sync::dashboard::{Dashboard, DashboardView};
use audiodash_sync::dispatcher::LinkState;
use audiodash_sync::protocol::{Band, InboundMessage, MixerParam};
use audiodash_sync::translator::ToggleTarget;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use url::Url;

#[derive(Default)]
struct Recorder {
    links: Vec<LinkState>,
    renders: usize,
}

impl DashboardView for Recorder {
    fn render(&mut self, _key: ControlKey, _view: &BindingView) {
        self.renders += 1;
    }

    fn link_changed(&mut self, state: LinkState) {
        self.links.push(state);
    }
}

fn fast_policy() -> ReconnectPolicy {
    ReconnectPolicy {
        base_delay: Duration::from_millis(10),
        max_attempts: 5,
    }
}

async fn next_event(rx: &mut mpsc::Receiver<ChannelEvent>) -> ChannelEvent {
    tokio::time::timeout(Duration::from_secs(3), rx.recv())
        .await
        .expect("timed out waiting for channel event")
        .expect("channel manager ended")
}

/// Feeds events into the dashboard until `done` holds.
async fn pump_until(
    dash: &mut Dashboard<Recorder>,
    rx: &mut mpsc::Receiver<ChannelEvent>,
    mut done: impl FnMut(&Dashboard<Recorder>) -> bool,
) {
    while !done(dash) {
        let event = next_event(rx).await;
        dash.handle_event(event);
    }
}

async fn wait_for_device<F: Fn(&audiodash_mock_device::DeviceState) -> bool>(
    device: &MockDevice,
    pred: F,
) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while !pred(&device.state()) {
        assert!(Instant::now() < deadline, "device never reached expected state");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn snapshot_commit_and_toggle_round_trip() {
    let device = MockDevice::start("127.0.0.1:0").expect("start device");
    device.turn_knob(Band::High, 5.0);
    wait_for_device(&device, |s| s.eq(Band::High) == 5.0).await;

    let endpoint = Url::parse(&device.ws_url()).unwrap();
    let (handle, mut rx) = channel::spawn(endpoint, fast_policy(), 16);
    let mut dash = Dashboard::new(handle.clone(), Recorder::default());

    pump_until(&mut dash, &mut rx, |d| {
        d.link_state() == LinkState::Open
            && *d.registry().level(LevelKey::Eq(Band::High)).value() == 5.0
    })
    .await;
    assert_eq!(handle.status(), ChannelStatus::Open);
    assert_eq!(
        dash.registry().level(LevelKey::Eq(Band::High)).source(),
        Source::Device
    );

    let low = LevelKey::Eq(Band::Low);
    dash.begin_edit(low);
    dash.preview(low, -6.0).unwrap();
    dash.commit_edit(low, -6.0).unwrap();
    wait_for_device(&device, |s| {
        s.eq(Band::Low) == -6.0 && s.mixer(MixerParam::GainCh1) == 0.5
    })
    .await;

    dash.toggle(ToggleTarget::Mute);
    assert!(!*dash.registry().flag(Flag::Mute).value());
    pump_until(&mut dash, &mut rx, |d| *d.registry().flag(Flag::Mute).value()).await;
    assert!(dash.view().renders > 0);

    dash.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reconnects_after_unexpected_close_and_rebaselines() {
    let device = MockDevice::start("127.0.0.1:0").expect("start device");
    let endpoint = Url::parse(&device.ws_url()).unwrap();
    let (handle, mut rx) = channel::spawn(endpoint, fast_policy(), 16);

    assert_eq!(next_event(&mut rx).await, ChannelEvent::Connecting { attempt: 0 });
    assert_eq!(next_event(&mut rx).await, ChannelEvent::Opened);
    assert!(matches!(
        next_event(&mut rx).await,
        ChannelEvent::Message(InboundMessage::InitialState(_))
    ));

    device.turn_knob(Band::Mid, -3.0);
    assert!(matches!(
        next_event(&mut rx).await,
        ChannelEvent::Message(InboundMessage::Dial(_))
    ));

    device.drop_clients();
    assert!(matches!(next_event(&mut rx).await, ChannelEvent::Closed { .. }));
    assert_eq!(
        next_event(&mut rx).await,
        ChannelEvent::Reconnecting {
            attempt: 1,
            delay: Duration::from_millis(10)
        }
    );
    assert_eq!(next_event(&mut rx).await, ChannelEvent::Connecting { attempt: 1 });
    assert_eq!(next_event(&mut rx).await, ChannelEvent::Opened);
    match next_event(&mut rx).await {
        ChannelEvent::Message(InboundMessage::InitialState(s)) => {
            assert_eq!(s.eq.and_then(|e| e.mid), Some(-3.0));
        }
        other => panic!("expected fresh snapshot, got {other:?}"),
    }

    // A successful open resets the counter: the next drop starts at attempt 1 again.
    device.drop_clients();
    assert!(matches!(next_event(&mut rx).await, ChannelEvent::Closed { .. }));
    assert!(matches!(
        next_event(&mut rx).await,
        ChannelEvent::Reconnecting { attempt: 1, .. }
    ));
    handle.close();
}

#[tokio::test]
async fn gives_up_after_budget_and_retry_restarts() {
    let port = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    };
    let endpoint = Url::parse(&format!("ws://127.0.0.1:{port}/ws")).unwrap();
    let (handle, mut rx) = channel::spawn(endpoint, fast_policy(), 16);

    let mut connects = Vec::new();
    let mut delays = Vec::new();
    let gave_up = loop {
        match next_event(&mut rx).await {
            ChannelEvent::Connecting { attempt } => connects.push(attempt),
            ChannelEvent::Reconnecting { delay, .. } => delays.push(delay.as_millis() as u64),
            ChannelEvent::GaveUp { attempts } => break attempts,
            ChannelEvent::Closed { .. } => {}
            other => panic!("unexpected event {other:?}"),
        }
    };
    assert_eq!(gave_up, 5);
    assert_eq!(connects, vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(delays, vec![10, 20, 30, 40, 50]);
    assert_eq!(handle.status(), ChannelStatus::Closed);

    // Parked: nothing more happens on its own.
    let quiet = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(quiet.is_err(), "manager must stay parked after giving up");
    assert!(!handle.send(audiodash_sync::protocol::OutboundCommand::ToggleMute));

    handle.retry();
    assert_eq!(next_event(&mut rx).await, ChannelEvent::Connecting { attempt: 0 });
    handle.close();
}
