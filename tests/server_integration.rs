//! End-to-end tests against a live TCP server on localhost.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use font_agent_protocol::protocol::sanitize::sanitized;
use font_agent_protocol::{
    connect, AcceptAll, AgentServer, AuthRequest, AuthResponse, FontInstallRequest,
    FontInstallResponse, FontSpec, HwidAllowList, NetworkConfig, Packet, PacketRegistry,
    ProtocolConfig, ProtocolError, Result, ServerHandle, TcpServer,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn local_config() -> NetworkConfig {
    NetworkConfig::default_with_overrides(|c| {
        c.server.address = "127.0.0.1:0".into();
        c.server.shutdown_timeout = Duration::from_secs(2);
    })
}

async fn start(server: TcpServer) -> (ServerHandle, JoinHandle<Result<()>>) {
    let listening = server.listen().await.unwrap();
    let handle = listening.handle();
    let task = tokio::spawn(listening.run_until(std::future::pending()));
    (handle, task)
}

async fn start_agents(config: NetworkConfig) -> (ServerHandle, AgentServer, JoinHandle<Result<()>>) {
    let mut server = TcpServer::new(config);
    let agents = AgentServer::attach(&mut server, AcceptAll);
    let (handle, task) = start(server).await;
    (handle, agents, task)
}

async fn eventually<F: Fn() -> bool>(what: &str, cond: F) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

fn auth(name: &str, hwid: &str) -> Packet {
    Packet::AuthRequest(AuthRequest {
        version: 1,
        client_name: name.into(),
        client_hwid: hwid.into(),
    })
}

async fn read_packet(
    framed: &mut tokio_util::codec::Framed<TcpStream, font_agent_protocol::FrameCodec>,
    registry: &PacketRegistry,
) -> Packet {
    let frame = timeout(WAIT, framed.next())
        .await
        .expect("reply in time")
        .expect("stream open")
        .expect("valid frame");
    sanitized(registry.decode(frame.packet_type, &frame.payload).unwrap())
}

#[tokio::test]
async fn test_auth_install_roundtrip() {
    let (handle, agents, task) = start_agents(local_config()).await;
    let registry = handle.registry().clone();

    let mut agent = connect(handle.local_addr(), registry.clone(), &ProtocolConfig::default())
        .await
        .unwrap();
    agent.send(auth("alice", "HW123")).await.unwrap();

    let reply = read_packet(&mut agent, &registry).await;
    assert_eq!(
        reply,
        Packet::AuthResponse(AuthResponse::accepted("Authentication successful"))
    );
    assert_eq!(agents.directory().lookup("HW123").unwrap().name, "alice");
    assert_eq!(handle.clients().len(), 1);

    let font = FontSpec {
        file_hash: "9e107d9d372bb6826bd81d3542a419d6".into(),
        name: "Inter".into(),
        style: "Bold".into(),
        file_type: "ttf".into(),
    };
    agents.install_font("HW123", &font).unwrap();
    agents.uninstall_font("HW123", &font).unwrap();

    for install in [true, false] {
        match read_packet(&mut agent, &registry).await {
            Packet::FontInstallRequest(FontInstallRequest {
                name, install: flag, ..
            }) => {
                assert_eq!(name, "Inter");
                assert_eq!(flag, install);
            }
            other => panic!("unexpected packet {other:?}"),
        }
    }

    agent
        .send(Packet::FontInstallResponse(FontInstallResponse {
            success: true,
            message: "installed".into(),
        }))
        .await
        .unwrap();
    eventually("install report", || {
        agents
            .directory()
            .lookup("HW123")
            .and_then(|r| r.last_install_report)
            .is_some_and(|r| r.message == "installed")
    })
    .await;

    handle.shutdown();
    timeout(WAIT, task).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_install_to_unknown_agent() {
    let (handle, agents, task) = start_agents(local_config()).await;
    let err = agents
        .install_font("nobody", &FontSpec::default())
        .unwrap_err();
    assert!(matches!(err, ProtocolError::ClientNotFound(ref hwid) if hwid == "nobody"));

    handle.shutdown();
    timeout(WAIT, task).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_rejected_agent_is_not_recorded() {
    let mut server = TcpServer::new(local_config());
    let agents = AgentServer::attach(&mut server, HwidAllowList::new(["GOOD"]));
    let (handle, task) = start(server).await;
    let registry = handle.registry().clone();

    let mut agent = connect(handle.local_addr(), registry.clone(), &ProtocolConfig::default())
        .await
        .unwrap();
    agent.send(auth("mallory", "BAD")).await.unwrap();

    match read_packet(&mut agent, &registry).await {
        Packet::AuthResponse(resp) => {
            assert!(!resp.success);
            assert_eq!(resp.message, "Authentication failed");
        }
        other => panic!("unexpected packet {other:?}"),
    }
    assert!(agents.directory().is_empty());

    handle.shutdown();
    timeout(WAIT, task).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_malformed_and_unknown_frames_do_not_end_session() {
    let (handle, _agents, task) = start_agents(local_config()).await;
    let registry = PacketRegistry::standard();

    let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();

    // type 1 with an invalid bool byte
    let mut bad = vec![1u8, 0, 7];
    bad.resize(259, 0);
    stream.write_all(&bad).await.unwrap();
    // unknown type header
    stream.write_all(&[0x63, 0x00]).await.unwrap();
    stream
        .write_all(&registry.encode_frame(&auth("bob", "HW9")).unwrap())
        .await
        .unwrap();

    let mut reply = vec![0u8; 259];
    timeout(WAIT, stream.read_exact(&mut reply))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&reply[..3], &[1, 0, 1]);

    let metrics = handle.metrics().snapshot();
    assert_eq!(metrics.malformed_frames, 1);
    assert_eq!(metrics.unknown_types, 1);
    assert_eq!(metrics.frames_received, 2);
    assert_eq!(metrics.packets_dispatched, 1);

    handle.shutdown();
    timeout(WAIT, task).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_disconnect_cleans_up() {
    let (handle, agents, task) = start_agents(local_config()).await;
    let registry = handle.registry().clone();

    let mut agent = connect(handle.local_addr(), registry.clone(), &ProtocolConfig::default())
        .await
        .unwrap();
    agent.send(auth("carol", "HW-C")).await.unwrap();
    read_packet(&mut agent, &registry).await;
    assert_eq!(agents.directory().len(), 1);

    drop(agent);
    eventually("client removal", || handle.clients().is_empty()).await;
    eventually("agent removal", || agents.directory().is_empty()).await;
    assert_eq!(handle.metrics().snapshot().connections_active, 0);

    handle.shutdown();
    timeout(WAIT, task).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_reauth_from_new_connection_wins() {
    let (handle, agents, task) = start_agents(local_config()).await;
    let registry = handle.registry().clone();

    let mut first = connect(handle.local_addr(), registry.clone(), &ProtocolConfig::default())
        .await
        .unwrap();
    first.send(auth("desk", "HW-R")).await.unwrap();
    read_packet(&mut first, &registry).await;

    let mut second = connect(handle.local_addr(), registry.clone(), &ProtocolConfig::default())
        .await
        .unwrap();
    second.send(auth("desk", "HW-R")).await.unwrap();
    read_packet(&mut second, &registry).await;

    let second_peer = second.get_ref().local_addr().unwrap();
    assert_eq!(
        agents.directory().lookup("HW-R").unwrap().connection.peer_addr(),
        second_peer
    );

    // the stale connection going away must not evict the live record
    drop(first);
    eventually("first removal", || handle.clients().len() == 1).await;
    assert!(agents.directory().lookup("HW-R").is_some());

    handle.shutdown();
    timeout(WAIT, task).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_duplicate_peer_address_is_closed() {
    let mut server = TcpServer::new(local_config());
    let disconnects = Arc::new(Mutex::new(0));
    {
        let disconnects = disconnects.clone();
        server.on_disconnect(move |_| {
            *disconnects.lock().unwrap() += 1;
            Ok(())
        });
    }
    server.on_auth_request(|conn, req| {
        conn.send(&AuthResponse::accepted(format!("hello {}", req.client_name)).into())
    });
    let (handle, task) = start(server).await;
    let registry = handle.registry().clone();
    let peer: SocketAddr = "10.9.8.7:5555".parse().unwrap();

    let (mut live_client, live) = tokio::io::duplex(1024);
    let live_session = handle.attach(live, peer);
    eventually("first registration", || handle.clients().contains(&peer)).await;
    let live_id = handle.lookup(&peer).unwrap().id();

    let (mut dup_client, dup) = tokio::io::duplex(1024);
    timeout(WAIT, handle.attach(dup, peer)).await.unwrap().unwrap();

    let mut buf = [0u8; 1];
    assert_eq!(dup_client.read(&mut buf).await.unwrap(), 0);
    assert_eq!(handle.lookup(&peer).unwrap().id(), live_id);
    assert_eq!(handle.metrics().snapshot().connections_rejected, 1);
    assert_eq!(*disconnects.lock().unwrap(), 0);

    // the first connection keeps working after the rejection
    let frame = registry.encode_frame(&auth("first", "HW-F")).unwrap();
    live_client.write_all(&frame).await.unwrap();
    let mut reply = vec![0u8; 259];
    timeout(WAIT, live_client.read_exact(&mut reply))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        sanitized(registry.decode(1, &reply[2..]).unwrap()),
        Packet::AuthResponse(AuthResponse::accepted("hello first"))
    );

    handle.shutdown();
    timeout(WAIT, live_session).await.unwrap().unwrap();
    timeout(WAIT, task).await.unwrap().unwrap().unwrap();
    assert_eq!(*disconnects.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_reply_delivered_after_half_close() {
    let (handle, agents, task) = start_agents(local_config()).await;
    let registry = handle.registry().clone();

    for round in 0..25 {
        let hwid = format!("HW-HALF-{round}");
        let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();
        let frame = registry.encode_frame(&auth("half", &hwid)).unwrap();
        stream.write_all(&frame).await.unwrap();
        stream.shutdown().await.unwrap();

        let mut reply = Vec::new();
        timeout(WAIT, stream.read_to_end(&mut reply))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.len(), 259, "round {round}");
        assert_eq!(&reply[..2], &[1, 0]);
        assert_eq!(
            sanitized(registry.decode(1, &reply[2..]).unwrap()),
            Packet::AuthResponse(AuthResponse::accepted("Authentication successful"))
        );
    }

    eventually("sessions to end", || handle.clients().is_empty()).await;
    assert!(agents.directory().is_empty());

    handle.shutdown();
    timeout(WAIT, task).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_connection_limit() {
    let config = NetworkConfig::default_with_overrides(|c| {
        c.server.address = "127.0.0.1:0".into();
        c.server.max_connections = 1;
    });
    let (handle, _agents, task) = start_agents(config).await;
    let registry = handle.registry().clone();

    let mut first = connect(handle.local_addr(), registry.clone(), &ProtocolConfig::default())
        .await
        .unwrap();
    first.send(auth("one", "HW-1")).await.unwrap();
    read_packet(&mut first, &registry).await;

    let mut second = connect(handle.local_addr(), registry.clone(), &ProtocolConfig::default())
        .await
        .unwrap();
    let closed = timeout(WAIT, second.next()).await.unwrap();
    assert!(closed.is_none() || matches!(closed, Some(Err(_))));
    assert_eq!(handle.metrics().snapshot().connections_rejected, 1);

    handle.shutdown();
    timeout(WAIT, task).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_clients() {
    let (handle, _agents, task) = start_agents(local_config()).await;
    let registry = handle.registry().clone();

    let mut agent = connect(handle.local_addr(), registry.clone(), &ProtocolConfig::default())
        .await
        .unwrap();
    agent.send(auth("dave", "HW-D")).await.unwrap();
    read_packet(&mut agent, &registry).await;

    handle.shutdown();
    assert!(handle.is_shutdown());
    timeout(WAIT, task).await.unwrap().unwrap().unwrap();

    let next = timeout(WAIT, agent.next()).await.unwrap();
    assert!(next.is_none() || matches!(next, Some(Err(_))));
    assert!(handle.clients().is_empty());
}

#[tokio::test]
async fn test_send_unregistered_type_surfaces_error() {
    let mut registry = PacketRegistry::new();
    for descriptor in font_agent_protocol::PacketDescriptor::standard()
        .into_iter()
        .filter(|d| d.packet_type != 2)
    {
        registry.register(descriptor).unwrap();
    }
    let mut server = TcpServer::with_registry(local_config(), registry);
    let agents = AgentServer::attach(&mut server, AcceptAll);
    let (handle, task) = start(server).await;
    let client_registry = Arc::new(PacketRegistry::standard());

    let mut agent = connect(handle.local_addr(), client_registry.clone(), &ProtocolConfig::default())
        .await
        .unwrap();
    agent.send(auth("erin", "HW-E")).await.unwrap();
    read_packet(&mut agent, &client_registry).await;

    let err = agents
        .install_font("HW-E", &FontSpec::default())
        .unwrap_err();
    assert!(matches!(err, ProtocolError::UnknownPacketType(2)));

    handle.shutdown();
    timeout(WAIT, task).await.unwrap().unwrap().unwrap();
}
