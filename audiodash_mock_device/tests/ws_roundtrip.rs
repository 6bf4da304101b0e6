use audiodash_mock_device::MockDevice;
use audiodash_protocol::{Band, ControlSource, InboundMessage, OutboundCommand, VoiceMode};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};
use tungstenite::Message;

type Ws = tungstenite::WebSocket<TcpStream>;

fn connect(addr: SocketAddr) -> Ws {
    let stream = TcpStream::connect(addr).expect("tcp connect");
    let _ = stream.set_read_timeout(Some(Duration::from_millis(50)));
    let _ = stream.set_write_timeout(Some(Duration::from_millis(200)));
    let (ws, _) = tungstenite::client(format!("ws://{addr}/ws"), stream).expect("ws connect");
    ws
}

fn read_device_message(ws: &mut Ws, timeout: Duration) -> InboundMessage {
    let deadline = Instant::now() + timeout;
    loop {
        match ws.read() {
            Ok(Message::Text(s)) => return serde_json::from_str(s.as_str()).expect("valid device json"),
            Ok(_) => continue,
            Err(tungstenite::Error::Io(e))
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                if Instant::now() >= deadline {
                    panic!("timeout waiting for device message");
                }
            }
            Err(e) => panic!("ws read failed: {e:?}"),
        }
    }
}

fn send(ws: &mut Ws, cmd: &OutboundCommand) {
    ws.send(Message::Text(serde_json::to_string(cmd).unwrap().into()))
        .unwrap();
}

#[test]
fn initial_state_toggle_echo_and_eq_request() {
    let device = MockDevice::start("127.0.0.1:0").expect("start device");
    let mut ws = connect(device.addr());

    match read_device_message(&mut ws, Duration::from_secs(2)) {
        InboundMessage::InitialState(s) => {
            assert_eq!(s.mode, Some(VoiceMode::Off));
            assert_eq!(s.mute, Some(false));
            assert!(s.eq.is_some());
            assert!(s.dsp_mixer.is_some());
        }
        other => panic!("expected initial_state, got {other:?}"),
    }

    send(&mut ws, &OutboundCommand::ToggleMute);
    assert_eq!(
        read_device_message(&mut ws, Duration::from_secs(2)),
        InboundMessage::Mute { enabled: true }
    );

    send(&mut ws, &OutboundCommand::ToggleVoiceMode);
    assert_eq!(
        read_device_message(&mut ws, Duration::from_secs(2)),
        InboundMessage::Mode {
            mode: VoiceMode::Music
        }
    );

    ws.send(Message::Text("{definitely not json".to_string().into()))
        .unwrap();
    send(&mut ws, &OutboundCommand::GetCurrentEq);
    match read_device_message(&mut ws, Duration::from_secs(2)) {
        InboundMessage::InitialState(s) => {
            assert_eq!(s.mode, Some(VoiceMode::Music));
            assert!(s.eq.is_some());
            assert!(s.mute.is_none(), "eq answer carries mode and eq only");
        }
        other => panic!("expected eq snapshot, got {other:?}"),
    }
}

#[test]
fn broadcasts_reach_every_client() {
    let device = MockDevice::start("127.0.0.1:0").expect("start device");
    let mut a = connect(device.addr());
    let mut b = connect(device.addr());
    for ws in [&mut a, &mut b] {
        assert!(matches!(
            read_device_message(ws, Duration::from_secs(2)),
            InboundMessage::InitialState(_)
        ));
    }

    send(&mut a, &OutboundCommand::EqUpdate {
        band: Band::Low,
        value: -4.0,
    });
    for ws in [&mut a, &mut b] {
        match read_device_message(ws, Duration::from_secs(2)) {
            InboundMessage::Dial(d) => {
                assert_eq!(d.low, Some(-4.0));
                assert_eq!(d.control_sources.and_then(|s| s.low), Some(ControlSource::Digital));
            }
            other => panic!("expected dial, got {other:?}"),
        }
    }

    device.turn_knob(Band::High, 7.0);
    match read_device_message(&mut b, Duration::from_secs(2)) {
        InboundMessage::Dial(d) => {
            assert_eq!(d.high, Some(7.0));
            assert_eq!(d.control_sources.and_then(|s| s.high), Some(ControlSource::Physical));
        }
        other => panic!("expected dial, got {other:?}"),
    }
}
