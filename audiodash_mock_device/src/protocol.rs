use audiodash_protocol::InboundMessage;
use std::net::SocketAddr;

pub const INBOUND_CAP: usize = 256;
pub const OUTBOUND_CAP: usize = 256;

pub type ClientId = u64;

/// Network thread -> device loop.
#[derive(Debug)]
pub enum InboundMsg {
    ClientConnected {
        client: ClientId,
        socket_addr: SocketAddr,
    },
    ClientDisconnected {
        client: ClientId,
    },
    Frame {
        client: ClientId,
        text: String,
    },
}

/// Device loop -> network thread.
#[derive(Debug)]
pub enum OutboundMsg {
    Broadcast { msg: InboundMessage },
    SendTo { client: ClientId, msg: InboundMessage },
    /// Drops every socket without a close handshake.
    DropClients,
}
