//! End-to-end tests driving a real manager instance over loopback sockets.

use std::sync::Arc;
use std::time::Duration;

use messip::client::{self, Channel, ReceiveOutcome, RecvBuf, SendReply, Timeout};
use messip::config::ManagerConfig;
use messip::manager;

async fn spawn_manager() -> (manager::ManagerHandle, u16) {
    let config = ManagerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        http_port: 0,
        log_dir: None,
    };
    let handle = manager::spawn(config).await.expect("manager failed to bind");
    let port = handle.local_addr.port();
    (handle, port)
}

#[tokio::test]
async fn s1_simple_exchange() {
    let (mgr, port) = spawn_manager().await;

    let server_cnx = Arc::new(client::connect(Some("127.0.0.1"), port, "server", Timeout::NoTimeout).await.unwrap());
    let owned = Channel::create(server_cnx, "one", Timeout::NoTimeout, 0).await.unwrap();

    let server = tokio::spawn({
        let owned = owned.clone();
        async move {
            let mut buf = [0u8; 128];
            let outcome = owned.receive(RecvBuf::Fixed(&mut buf), Timeout::NoTimeout).await.unwrap();
            let msg = match outcome {
                ReceiveOutcome::Message(msg) => msg,
                other => panic!("expected Message, got {other:?}"),
            };
            assert_eq!(msg.user_type, 1961);
            assert_eq!(&buf[..msg.filled], b"Hello");
            owned.reply(msg.index, 3005, b"Bonjour", Timeout::NoTimeout).await.unwrap();
        }
    });

    let client_cnx = Arc::new(client::connect(Some("127.0.0.1"), port, "client", Timeout::NoTimeout).await.unwrap());
    let connected = Channel::connect(client_cnx, "one", Timeout::NoTimeout).await.unwrap();
    let mut reply_buf = [0u8; 80];
    let SendReply { answer, filled, .. } =
        connected.send(1961, b"Hello", RecvBuf::Fixed(&mut reply_buf), Timeout::NoTimeout).await.unwrap();

    assert_eq!(answer, 3005);
    assert_eq!(&reply_buf[..filled], b"Bonjour");

    server.await.unwrap();
    mgr.shutdown();
}

#[tokio::test]
async fn s2_two_clients_out_of_order_reply() {
    let (mgr, port) = spawn_manager().await;

    let server_cnx = Arc::new(client::connect(Some("127.0.0.1"), port, "server", Timeout::NoTimeout).await.unwrap());
    let owned = Channel::create(server_cnx, "two", Timeout::NoTimeout, 0).await.unwrap();

    let server = tokio::spawn({
        let owned = owned.clone();
        async move {
            let mut buf1 = [0u8; 64];
            let first = match owned.receive(RecvBuf::Fixed(&mut buf1), Timeout::NoTimeout).await.unwrap() {
                ReceiveOutcome::Message(m) => m,
                other => panic!("expected Message, got {other:?}"),
            };
            let first_payload = buf1[..first.filled].to_vec();

            let mut buf2 = [0u8; 64];
            let second = match owned.receive(RecvBuf::Fixed(&mut buf2), Timeout::NoTimeout).await.unwrap() {
                ReceiveOutcome::Message(m) => m,
                other => panic!("expected Message, got {other:?}"),
            };
            let second_payload = buf2[..second.filled].to_vec();

            tokio::time::sleep(Duration::from_millis(20)).await;

            let (c1, c2) = if first_payload.as_slice() == b"Hello1" {
                (first.index, second.index)
            } else {
                (second.index, first.index)
            };
            owned.reply(c1, 1234, b"Bonjour1", Timeout::NoTimeout).await.unwrap();
            owned.reply(c2, 2345, b"Bonjour2", Timeout::NoTimeout).await.unwrap();
        }
    });

    let cnx1 = Arc::new(client::connect(Some("127.0.0.1"), port, "c1", Timeout::NoTimeout).await.unwrap());
    let cnx2 = Arc::new(client::connect(Some("127.0.0.1"), port, "c2", Timeout::NoTimeout).await.unwrap());
    let conn1 = Channel::connect(cnx1, "two", Timeout::NoTimeout).await.unwrap();
    let conn2 = Channel::connect(cnx2, "two", Timeout::NoTimeout).await.unwrap();

    let send1 = tokio::spawn(async move { conn1.send(0, b"Hello1", RecvBuf::Dynamic, Timeout::NoTimeout).await.unwrap() });
    let send2 = tokio::spawn(async move { conn2.send(0, b"Hello2", RecvBuf::Dynamic, Timeout::NoTimeout).await.unwrap() });

    let reply1 = send1.await.unwrap();
    let reply2 = send2.await.unwrap();

    assert_eq!(reply1.answer, 1234);
    assert_eq!(reply1.owned.unwrap(), b"Bonjour1".to_vec());
    assert_eq!(reply2.answer, 2345);
    assert_eq!(reply2.owned.unwrap(), b"Bonjour2".to_vec());

    server.await.unwrap();
    mgr.shutdown();
}

#[tokio::test]
async fn s3_buffered_overflow() {
    let (mgr, port) = spawn_manager().await;

    let server_cnx = Arc::new(client::connect(Some("127.0.0.1"), port, "server", Timeout::NoTimeout).await.unwrap());
    let owned = Channel::create(server_cnx, "three", Timeout::NoTimeout, 3).await.unwrap();

    let client_cnx = Arc::new(client::connect(Some("127.0.0.1"), port, "client", Timeout::NoTimeout).await.unwrap());
    let connected = Channel::connect(client_cnx, "three", Timeout::NoTimeout).await.unwrap();

    let types = [8001, 7002, 1, 3, 5];
    let mut depths = Vec::new();
    for user_type in &types[..3] {
        let depth = connected.buffered_send(*user_type, b"x", Timeout::Millis(2_000)).await.unwrap();
        depths.push(depth);
    }
    assert_eq!(depths, vec![0, 1, 2]);

    let connected_fourth = connected.clone();
    let fourth = tokio::spawn(async move { connected_fourth.buffered_send(types[3], b"x", Timeout::Millis(5_000)).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!fourth.is_finished(), "4th buffered send should block while queue is at capacity");

    let mut buf = [0u8; 8];
    let drained = owned.receive(RecvBuf::Fixed(&mut buf), Timeout::NoTimeout).await.unwrap();
    assert!(matches!(drained, ReceiveOutcome::NoReply));

    let fourth_depth = fourth.await.unwrap().unwrap();
    assert!(fourth_depth <= 3);

    mgr.shutdown();
}

#[tokio::test]
async fn s4_over_length_payload_preserves_overflow_until_reply() {
    let (mgr, port) = spawn_manager().await;

    let server_cnx = Arc::new(client::connect(Some("127.0.0.1"), port, "server", Timeout::NoTimeout).await.unwrap());
    let owned = Channel::create(server_cnx, "four", Timeout::NoTimeout, 0).await.unwrap();

    let client_cnx = Arc::new(client::connect(Some("127.0.0.1"), port, "client", Timeout::NoTimeout).await.unwrap());
    let connected = Channel::connect(client_cnx, "four", Timeout::NoTimeout).await.unwrap();

    let payload = vec![7u8; 341];
    let send_task = tokio::spawn({
        let payload = payload.clone();
        async move {
            let mut reply_buf = [0u8; 79];
            connected.send(0, &payload, RecvBuf::Fixed(&mut reply_buf), Timeout::Millis(5_000)).await
        }
    });

    let mut buf = [0u8; 79];
    let msg = match owned.receive(RecvBuf::Fixed(&mut buf), Timeout::NoTimeout).await.unwrap() {
        ReceiveOutcome::Message(m) => m,
        other => panic!("expected Message, got {other:?}"),
    };
    assert_eq!(msg.filled, 79);

    let overflow = owned.take_overflow(msg.index).await.expect("overflow should be retained");
    assert_eq!(overflow.len(), 341 - 79);

    owned.reply(msg.index, 0, b"", Timeout::NoTimeout).await.unwrap();
    assert!(owned.take_overflow(msg.index).await.is_none(), "overflow released after Reply");

    send_task.await.unwrap().unwrap();
    mgr.shutdown();
}

#[tokio::test]
async fn s5_death_notification() {
    let (mgr, port) = spawn_manager().await;

    let a_cnx = Arc::new(client::connect(Some("127.0.0.1"), port, "procA", Timeout::NoTimeout).await.unwrap());
    let alpha = Channel::create(a_cnx.clone(), "alpha", Timeout::NoTimeout, 0).await.unwrap();
    // DeathNotify applies to channels this connection already owns at the time of the call.
    a_cnx.death_notify(true, Timeout::NoTimeout).await.unwrap();

    {
        let c_cnx = Arc::new(client::connect(Some("127.0.0.1"), port, "procC", Timeout::NoTimeout).await.unwrap());
        let _connected = Channel::connect(c_cnx, "alpha", Timeout::NoTimeout).await.unwrap();
        // procC exits here without an explicit Disconnect: both handles drop, closing its
        // control link and peer socket.
    }

    let first = alpha.receive(RecvBuf::Dynamic, Timeout::Millis(5_000)).await.unwrap();
    assert!(matches!(first, ReceiveOutcome::Dismissed), "expected Dismissed, got {first:?}");

    let second = alpha.receive(RecvBuf::Dynamic, Timeout::Millis(5_000)).await.unwrap();
    assert!(matches!(second, ReceiveOutcome::DeathProcess), "expected DeathProcess, got {second:?}");

    mgr.shutdown();
}

#[tokio::test]
async fn channel_delete_refused_while_clients_connected() {
    let (mgr, port) = spawn_manager().await;

    let server_cnx = Arc::new(client::connect(Some("127.0.0.1"), port, "server", Timeout::NoTimeout).await.unwrap());
    let owned = Channel::create(server_cnx, "busy", Timeout::NoTimeout, 0).await.unwrap();

    let client_cnx = Arc::new(client::connect(Some("127.0.0.1"), port, "client", Timeout::NoTimeout).await.unwrap());
    let connected = Channel::connect(client_cnx, "busy", Timeout::NoTimeout).await.unwrap();

    let n_clients = owned.clone().delete(Timeout::NoTimeout).await.unwrap();
    assert_eq!(n_clients, 1, "delete must be refused while a client is connected");

    connected.disconnect(Timeout::NoTimeout).await.unwrap();
    let n_clients = owned.delete(Timeout::NoTimeout).await.unwrap();
    assert_eq!(n_clients, 0, "delete succeeds once the last client disconnects");

    mgr.shutdown();
}

#[tokio::test]
async fn timer_fires_periodically_with_short_intervals() {
    let (mgr, port) = spawn_manager().await;

    let cnx = Arc::new(client::connect(Some("127.0.0.1"), port, "towner", Timeout::NoTimeout).await.unwrap());
    let owned = Channel::create(cnx, "timed", Timeout::NoTimeout, 0).await.unwrap();

    let _id = owned.timer_create(1961, 20, 30).await;

    let mut fired = 0;
    for _ in 0..2 {
        let outcome = owned.receive(RecvBuf::Dynamic, Timeout::Millis(2_000)).await.unwrap();
        match outcome {
            ReceiveOutcome::Timer { user_type } => {
                assert_eq!(user_type, 1961);
                fired += 1;
            },
            other => panic!("expected Timer, got {other:?}"),
        }
    }
    assert_eq!(fired, 2);

    mgr.shutdown();
}
