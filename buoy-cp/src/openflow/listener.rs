//! Switch-facing TCP listener and per-connection handshake.
//!
//! Each accepted connection runs its own task: exchange HELLO, learn
//! the datapath id from a features reply, then forward packet-ins to
//! the dispatcher until the peer goes away. The write half of the
//! socket becomes the switch's [`ControlChannel`].

use crate::flow::FlowRule;
use crate::openflow::wire::{self, MsgHeader};
use crate::openflow::{ControlChannel, DatapathId, SwitchEvent};
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

/// Accept switch connections until the listener is torn down.
pub async fn run(listener: TcpListener, events: mpsc::Sender<SwitchEvent>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("accept failed: {e}");
                continue;
            }
        };

        debug!(%peer, "switch transport connected");
        let events = events.clone();
        tokio::spawn(async move {
            match handle_connection(stream, peer, events).await {
                Ok(()) => info!(%peer, "switch disconnected"),
                Err(e) => warn!(%peer, "switch connection failed: {e}"),
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    events: mpsc::Sender<SwitchEvent>,
) -> io::Result<()> {
    stream.set_nodelay(true)?;
    let (mut reader, writer) = stream.into_split();
    let channel = Arc::new(TcpChannel::new(peer, writer));

    let xid = channel.next_xid();
    channel.send_raw(&wire::hello(xid)).await?;

    let mut dpid: Option<DatapathId> = None;
    loop {
        let (header, body) = match read_message(&mut reader).await {
            Ok(msg) => msg,
            // A clean close is the normal end of a connection.
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        };

        match header.msg_type {
            wire::OFPT_HELLO => {
                let xid = channel.next_xid();
                channel.send_raw(&wire::features_request(xid)).await?;
            }
            wire::OFPT_FEATURES_REPLY => {
                let Some(id) = wire::parse_features_reply(&body) else {
                    warn!(%peer, "truncated features reply");
                    continue;
                };
                dpid = Some(id);
                if send_event(
                    &events,
                    SwitchEvent::Connected {
                        dpid: id,
                        channel: channel.clone(),
                    },
                )
                .await
                .is_err()
                {
                    return Ok(());
                }
            }
            wire::OFPT_ECHO_REQUEST => {
                channel.send_raw(&wire::echo_reply(header.xid, &body)).await?;
            }
            wire::OFPT_PACKET_IN => {
                let Some(dpid) = dpid else {
                    debug!(%peer, "packet-in before features reply, dropping");
                    continue;
                };
                let Some((in_port, data)) = wire::parse_packet_in(&body) else {
                    debug!(%peer, "truncated packet-in, dropping");
                    continue;
                };
                if send_event(&events, SwitchEvent::PacketIn { dpid, in_port, data })
                    .await
                    .is_err()
                {
                    return Ok(());
                }
            }
            wire::OFPT_ERROR => {
                warn!(%peer, body_len = body.len(), "switch reported an error");
            }
            other => {
                debug!(%peer, msg_type = other, "ignoring message");
            }
        }
    }
}

async fn send_event(
    events: &mpsc::Sender<SwitchEvent>,
    event: SwitchEvent,
) -> Result<(), mpsc::error::SendError<SwitchEvent>> {
    let result = events.send(event).await;
    if result.is_err() {
        debug!("event channel closed, dropping connection");
    }
    result
}

async fn read_message(reader: &mut OwnedReadHalf) -> io::Result<(MsgHeader, Vec<u8>)> {
    let mut header_buf = [0u8; wire::OFP_HEADER_LEN];
    reader.read_exact(&mut header_buf).await?;
    let header = MsgHeader::parse(&header_buf);

    if usize::from(header.length) < wire::OFP_HEADER_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("message length {} below header size", header.length),
        ));
    }

    let mut body = vec![0u8; usize::from(header.length) - wire::OFP_HEADER_LEN];
    reader.read_exact(&mut body).await?;
    Ok((header, body))
}

/// Write half of a switch connection.
struct TcpChannel {
    peer: SocketAddr,
    writer: Mutex<OwnedWriteHalf>,
    xid: AtomicU32,
}

impl TcpChannel {
    fn new(peer: SocketAddr, writer: OwnedWriteHalf) -> Self {
        TcpChannel {
            peer,
            writer: Mutex::new(writer),
            xid: AtomicU32::new(1),
        }
    }

    fn next_xid(&self) -> u32 {
        self.xid.fetch_add(1, Ordering::Relaxed)
    }

    async fn send_raw(&self, bytes: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await
    }
}

#[async_trait]
impl ControlChannel for TcpChannel {
    async fn add_flow(&self, rule: &FlowRule) -> io::Result<()> {
        debug!(peer = %self.peer, table = rule.table, "sending flow mod");
        self.send_raw(&wire::flow_mod(self.next_xid(), rule)).await
    }

    async fn enable_flow_mod_table_id(&self, enable: bool) -> io::Result<()> {
        self.send_raw(&wire::flow_mod_table_id(self.next_xid(), enable))
            .await
    }
}
