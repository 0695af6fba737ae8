//! Drives the switch listener with a scripted switch over real TCP.

use buoy_cp::flow::{FlowConfig, Timeouts, north_to_south};
use buoy_cp::openflow::wire::{
    self, NXT_FLOW_MOD, NXT_FLOW_MOD_TABLE_ID, OFPT_ECHO_REPLY, OFPT_FEATURES_REQUEST, OFPT_HELLO,
    OFPT_VENDOR,
};
use buoy_cp::openflow::{DatapathId, SwitchEvent, listener};
use buoy_cp::route::Route;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

const DPID: u64 = 0x0000_0000_0000_00FE;

async fn read_msg(stream: &mut TcpStream) -> (wire::MsgHeader, Vec<u8>) {
    let mut header_buf = [0u8; 8];
    timeout(Duration::from_secs(5), stream.read_exact(&mut header_buf))
        .await
        .expect("timed out reading header")
        .unwrap();
    let header = wire::MsgHeader::parse(&header_buf);

    let mut body = vec![0u8; usize::from(header.length) - 8];
    timeout(Duration::from_secs(5), stream.read_exact(&mut body))
        .await
        .expect("timed out reading body")
        .unwrap();
    (header, body)
}

async fn next_event(rx: &mut mpsc::Receiver<SwitchEvent>) -> SwitchEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

fn features_reply(xid: u32) -> Vec<u8> {
    let mut msg = vec![wire::OFP_VERSION, wire::OFPT_FEATURES_REPLY, 0, 32];
    msg.extend_from_slice(&xid.to_be_bytes());
    msg.extend_from_slice(&DPID.to_be_bytes());
    msg.extend_from_slice(&[0u8; 16]); // buffers, tables, capabilities, actions
    msg
}

#[tokio::test]
async fn handshake_registers_the_datapath() {
    let socket = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let (tx, mut rx) = mpsc::channel(16);
    tokio::spawn(listener::run(socket, tx));

    let mut switch = TcpStream::connect(addr).await.unwrap();

    // The controller opens with HELLO.
    let (header, _) = read_msg(&mut switch).await;
    assert_eq!(header.msg_type, OFPT_HELLO);
    assert_eq!(header.version, wire::OFP_VERSION);

    // Answering HELLO triggers a features request.
    switch.write_all(&wire::hello(100)).await.unwrap();
    let (header, _) = read_msg(&mut switch).await;
    assert_eq!(header.msg_type, OFPT_FEATURES_REQUEST);

    switch.write_all(&features_reply(header.xid)).await.unwrap();
    match next_event(&mut rx).await {
        SwitchEvent::Connected { dpid, channel } => {
            assert_eq!(dpid, DatapathId(DPID));

            // Exercise the channel: the capability message and a flow
            // mod must arrive on the switch side of the socket.
            channel.enable_flow_mod_table_id(true).await.unwrap();
            let (header, body) = read_msg(&mut switch).await;
            assert_eq!(header.msg_type, OFPT_VENDOR);
            assert_eq!(
                u32::from_be_bytes(body[4..8].try_into().unwrap()),
                NXT_FLOW_MOD_TABLE_ID
            );
            assert_eq!(body[8], 1);

            let route = Route::new(
                "203.0.113.5".parse().unwrap(),
                ["10.0.0.1".parse().unwrap()],
            );
            let rules =
                north_to_south(&route, &FlowConfig::default(), Timeouts::PERMANENT).unwrap();
            channel.add_flow(&rules[0]).await.unwrap();
            let (header, body) = read_msg(&mut switch).await;
            assert_eq!(header.msg_type, OFPT_VENDOR);
            assert_eq!(
                u32::from_be_bytes(body[4..8].try_into().unwrap()),
                NXT_FLOW_MOD
            );
        }
        other => panic!("expected Connected, got {other:?}"),
    }
}

#[tokio::test]
async fn packet_in_is_forwarded_with_the_frame() {
    let socket = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let (tx, mut rx) = mpsc::channel(16);
    tokio::spawn(listener::run(socket, tx));

    let mut switch = TcpStream::connect(addr).await.unwrap();
    let _ = read_msg(&mut switch).await; // HELLO
    switch.write_all(&wire::hello(100)).await.unwrap();
    let (features, _) = read_msg(&mut switch).await;
    switch
        .write_all(&features_reply(features.xid))
        .await
        .unwrap();
    let _ = next_event(&mut rx).await; // Connected

    // Scripted packet-in: buffer_id, total_len, in_port 7, reason, pad.
    let frame = [0xABu8, 0xCD, 0xEF, 0x01];
    let mut msg = vec![wire::OFP_VERSION, wire::OFPT_PACKET_IN, 0, 0];
    msg.extend_from_slice(&200u32.to_be_bytes());
    msg.extend_from_slice(&wire::OFP_NO_BUFFER.to_be_bytes());
    msg.extend_from_slice(&(frame.len() as u16).to_be_bytes());
    msg.extend_from_slice(&7u16.to_be_bytes());
    msg.push(0);
    msg.push(0);
    msg.extend_from_slice(&frame);
    let len = msg.len() as u16;
    msg[2..4].copy_from_slice(&len.to_be_bytes());
    switch.write_all(&msg).await.unwrap();

    match next_event(&mut rx).await {
        SwitchEvent::PacketIn { dpid, in_port, data } => {
            assert_eq!(dpid, DatapathId(DPID));
            assert_eq!(in_port, 7);
            assert_eq!(data, frame);
        }
        other => panic!("expected PacketIn, got {other:?}"),
    }
}

#[tokio::test]
async fn echo_requests_are_answered() {
    let socket = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let (tx, _rx) = mpsc::channel(16);
    tokio::spawn(listener::run(socket, tx));

    let mut switch = TcpStream::connect(addr).await.unwrap();
    let _ = read_msg(&mut switch).await; // HELLO

    let mut echo = vec![wire::OFP_VERSION, wire::OFPT_ECHO_REQUEST, 0, 12];
    echo.extend_from_slice(&77u32.to_be_bytes());
    echo.extend_from_slice(&[1, 2, 3, 4]);
    switch.write_all(&echo).await.unwrap();

    let (header, body) = read_msg(&mut switch).await;
    assert_eq!(header.msg_type, OFPT_ECHO_REPLY);
    assert_eq!(header.xid, 77);
    assert_eq!(body, vec![1, 2, 3, 4]);
}
