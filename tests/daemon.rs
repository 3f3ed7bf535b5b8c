//! End-to-end tests that drive [`fs9p_cored::daemon::DaemonController`] the
//! way a real client would: over an actual TCP socket, speaking the wire
//! protocol directly, and through the control file's shutdown write.

use std::time::Duration;

use fs9p_cored::config::DaemonConfig;
use fs9p_cored::control::ShutdownDisposition;
use fs9p_cored::daemon::DaemonController;
use fs9p_cored::mount::MountFactories;
use fs9p_cored::wire::{self, FCall, Msg};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

async fn send(stream: &mut TcpStream, tag: u16, body: FCall) -> Msg {
    let bytes = wire::encode(&Msg { tag, body }).unwrap();
    stream.write_all(&bytes).await.unwrap();

    let mut size_buf = [0u8; 4];
    stream.read_exact(&mut size_buf).await.unwrap();
    let size = u32::from_le_bytes(size_buf) as usize;
    let mut rest = vec![0u8; size - 4];
    stream.read_exact(&mut rest).await.unwrap();
    wire::decode(&rest).unwrap()
}

#[tokio::test]
async fn walk_attach_and_getattr_round_trip() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config_with_port = DaemonConfig::default();
    config_with_port.listen.push(format!("/ip4/127.0.0.1/tcp/{}", addr.port()));
    let controller = DaemonController::new(config_with_port, MountFactories::new()).await.unwrap();
    let handle = controller.handle();
    let run = tokio::spawn(controller.run());
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let reply = send(
        &mut stream,
        0xffff,
        FCall::Tversion { msize: 1 << 16, version: "9P2000.L".to_string() },
    )
    .await;
    match reply.body {
        FCall::Rversion { version, .. } => assert_eq!(version, "9P2000.L"),
        other => panic!("unexpected reply to Tversion: {other:?}"),
    }

    let reply = send(
        &mut stream,
        1,
        FCall::Tattach { fid: 0, afid: u32::MAX, uname: String::new(), aname: String::new(), n_uname: u32::MAX },
    )
    .await;
    assert!(matches!(reply.body, FCall::Rattach { .. }), "unexpected reply: {:?}", reply.body);

    let reply = send(&mut stream, 2, FCall::Tgetattr { fid: 0, req_mask: u64::MAX }).await;
    assert!(matches!(reply.body, FCall::Rgetattr(_)), "unexpected reply: {:?}", reply.body);

    drop(stream);
    handle.request_shutdown(ShutdownDisposition::Immediate).await;
    let result = tokio::time::timeout(Duration::from_secs(5), run).await;
    assert!(result.is_ok(), "daemon did not shut down after immediate disposition");
}

#[tokio::test]
async fn listener_subtree_stops_accepting_new_addresses_after_shutdown_starts() {
    let controller = DaemonController::new(DaemonConfig::default(), MountFactories::new()).await.unwrap();
    let root = controller.root();
    let handle = controller.handle();
    let run = tokio::spawn(controller.run());

    handle.request_shutdown(ShutdownDisposition::Patient).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let listeners = root.walk1("listeners").await.unwrap().as_dir().unwrap();
    let result = listeners.mkdir("ip4".to_string(), 0o755, None, None).await;
    assert!(result.is_err(), "listener subtree accepted a new address after shutdown began");

    handle.request_shutdown(ShutdownDisposition::Immediate).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), run).await;
}
