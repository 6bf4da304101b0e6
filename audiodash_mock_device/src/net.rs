use crate::protocol::{ClientId, InboundMsg, OutboundMsg};
use audiodash_protocol::InboundMessage;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);
const READ_TIMEOUT: Duration = Duration::from_millis(10);

struct Client {
    id: ClientId,
    ws: tungstenite::WebSocket<TcpStream>,
    socket_addr: SocketAddr,
}

pub struct NetworkThread {
    shutdown: Arc<AtomicBool>,
    listen_addr: SocketAddr,
    join_handle: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkThread {
    /// Binds `addr` (port 0 picks a free one) and serves any number of clients.
    pub fn spawn_with_addr(
        addr: &str,
        in_tx: Sender<InboundMsg>,
        out_rx: Receiver<OutboundMsg>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let listen_addr = listener.local_addr()?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_for_thread = Arc::clone(&shutdown);
        let join_handle =
            thread::spawn(move || run_server(listener, in_tx, out_rx, shutdown_for_thread));

        info!(%listen_addr, "mock device listening");
        Ok(Self {
            shutdown,
            listen_addr,
            join_handle: Mutex::new(Some(join_handle)),
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Ok(mut h) = self.join_handle.lock() {
            if let Some(h) = h.take() {
                let _ = h.join();
            }
        }
    }
}

impl Drop for NetworkThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_server(
    listener: TcpListener,
    in_tx: Sender<InboundMsg>,
    out_rx: Receiver<OutboundMsg>,
    shutdown: Arc<AtomicBool>,
) {
    let mut clients: Vec<Client> = Vec::new();
    let mut next_id: ClientId = 1;

    while !shutdown.load(Ordering::Relaxed) {
        loop {
            match listener.accept() {
                Ok((stream, socket_addr)) => {
                    let _ = stream.set_nonblocking(false);
                    let _ = stream.set_nodelay(true);
                    let _ = stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT));
                    let _ = stream.set_write_timeout(Some(Duration::from_millis(200)));

                    let ws = match tungstenite::accept(stream) {
                        Ok(ws) => ws,
                        Err(e) => {
                            warn!(%socket_addr, error = %e, "ws handshake failed");
                            continue;
                        }
                    };
                    let _ = ws.get_ref().set_read_timeout(Some(READ_TIMEOUT));

                    let id = next_id;
                    next_id += 1;
                    if in_tx
                        .try_send(InboundMsg::ClientConnected {
                            client: id,
                            socket_addr,
                        })
                        .is_err()
                    {
                        warn!(%socket_addr, "device loop busy, refusing client");
                        let mut ws = ws;
                        let _ = ws.close(None);
                        continue;
                    }
                    info!(client = id, %socket_addr, "client connected");
                    clients.push(Client {
                        id,
                        ws,
                        socket_addr,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, "ws accept failed");
                    break;
                }
            }
        }

        let mut dead: Vec<ClientId> = Vec::new();
        loop {
            match out_rx.try_recv() {
                Ok(OutboundMsg::Broadcast { msg }) => {
                    for client in clients.iter_mut() {
                        if send_message(&mut client.ws, &msg).is_err() {
                            dead.push(client.id);
                        }
                    }
                }
                Ok(OutboundMsg::SendTo { client, msg }) => {
                    if let Some(c) = clients.iter_mut().find(|c| c.id == client) {
                        if send_message(&mut c.ws, &msg).is_err() {
                            dead.push(c.id);
                        }
                    }
                }
                Ok(OutboundMsg::DropClients) => {
                    info!(count = clients.len(), "dropping all clients");
                    dead.extend(clients.iter().map(|c| c.id));
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return,
            }
        }

        // One read per client per pass; the read timeout keeps the loop moving.
        for client in clients.iter_mut() {
            if dead.contains(&client.id) {
                continue;
            }
            match client.ws.read() {
                Ok(msg) => {
                    if handle_inbound(&in_tx, client, msg).is_err() {
                        dead.push(client.id);
                    }
                }
                Err(tungstenite::Error::Io(e))
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) => {
                    debug!(client = client.id, error = %e, "client read failed");
                    dead.push(client.id);
                }
            }
        }

        if !dead.is_empty() {
            clients.retain(|c| {
                if dead.contains(&c.id) {
                    info!(client = c.id, socket_addr = %c.socket_addr, "client disconnected");
                    let _ = in_tx.try_send(InboundMsg::ClientDisconnected { client: c.id });
                    false
                } else {
                    true
                }
            });
        }

        if clients.is_empty() {
            thread::sleep(Duration::from_millis(10));
        }
    }

    for mut client in clients {
        let _ = client.ws.close(None);
        let _ = client.ws.flush();
    }
}

fn handle_inbound(in_tx: &Sender<InboundMsg>, client: &mut Client, msg: Message) -> Result<(), ()> {
    let text = match msg {
        Message::Text(s) => s.as_str().to_string(),
        Message::Binary(_) => return Ok(()),
        Message::Ping(payload) => {
            let _ = client.ws.send(Message::Pong(payload));
            return Ok(());
        }
        Message::Pong(_) => return Ok(()),
        Message::Close(_) => return Err(()),
        Message::Frame(_) => return Ok(()),
    };

    if in_tx
        .try_send(InboundMsg::Frame {
            client: client.id,
            text,
        })
        .is_err()
    {
        warn!(client = client.id, "device loop busy, frame dropped");
    }
    Ok(())
}

fn send_message(ws: &mut tungstenite::WebSocket<TcpStream>, msg: &InboundMessage) -> Result<(), ()> {
    let payload = serde_json::to_string(msg).map_err(|_| ())?;
    ws.send(Message::Text(payload.into())).map_err(|_| ())
}
