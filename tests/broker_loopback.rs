//! Broker integration over loopback TCP: client ↔ listener exchange,
//! reconnect after peer loss, many-client service.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use servkit::broker::{LineReceiver, LineSender};
use servkit::clock::{Timeout, Timestamp};
use servkit::fabric::MessageQueue;
use servkit::net::{AddrFamily, TcpAddrInfo};
use servkit::subsystem::SubsystemUnit;
use servkit::{MessageBrokerConnection, MessageBrokerListener, MessageBrokerService, MessageBus};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A free loopback port. Racy in principle, standard for tests.
fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("probe bind")
        .local_addr()
        .expect("probe addr")
        .port()
}

fn pop_within(queue: &MessageQueue<String>, secs: u64) -> Option<String> {
    queue.pop(Timestamp::limit(Timeout::new(secs, 0)))
}

#[test]
fn test_client_and_listener_exchange_lines() {
    init_logging();
    let port = free_port();
    let addr = |p| TcpAddrInfo::loopback(AddrFamily::IpV4, p).expect("resolve");

    // Listener side: collect everything the client sends.
    let server_inbox: Arc<MessageQueue<String>> = Arc::new(MessageQueue::new());
    let mut listener = MessageBrokerListener::new(
        "test-listener",
        addr(port),
        LineReceiver::new(),
        LineSender::new(),
    );
    listener.add_consumer(Arc::clone(&server_inbox) as _);

    // Client side: collect everything the server sends.
    let client_inbox: Arc<MessageQueue<String>> = Arc::new(MessageQueue::new());
    let mut client = MessageBrokerConnection::new(
        "test-client",
        addr(port),
        LineReceiver::new(),
        LineSender::new(),
    );
    client
        .set_awaiting_connection_timeout(Timeout::from_millis(100))
        .expect("configure");
    client.add_consumer(Arc::clone(&client_inbox) as _);

    listener.start().expect("start listener");
    client.start().expect("start client");

    assert!(client.send_message("hello from client".to_string()));
    assert_eq!(
        pop_within(&server_inbox, 5).as_deref(),
        Some("hello from client")
    );

    assert!(listener.send_message("hello from listener".to_string()));
    assert_eq!(
        pop_within(&client_inbox, 5).as_deref(),
        Some("hello from listener")
    );

    client.stop();
    listener.stop();
}

#[test]
fn test_listener_survives_peer_loss_and_reaccepts() {
    init_logging();
    let port = free_port();
    let addr = TcpAddrInfo::loopback(AddrFamily::IpV4, port).expect("resolve");

    let inbox: Arc<MessageQueue<String>> = Arc::new(MessageQueue::new());
    let mut listener =
        MessageBrokerListener::new("reaccept", addr, LineReceiver::new(), LineSender::new());
    listener.add_consumer(Arc::clone(&inbox) as _);
    listener.start().expect("start");

    // First peer connects, speaks, disappears.
    {
        let mut peer = connect_retry(port);
        peer.write_all(b"first peer\n").expect("write");
        assert_eq!(pop_within(&inbox, 5).as_deref(), Some("first peer"));
    }

    // Second peer is accepted after the abort.
    {
        let mut peer = connect_retry(port);
        peer.write_all(b"second peer\n").expect("write");
        assert_eq!(pop_within(&inbox, 5).as_deref(), Some("second peer"));
    }

    listener.stop();
}

/// Connect with retries: the broker may be between accept polls.
fn connect_retry(port: u16) -> TcpStream {
    for _ in 0..100 {
        if let Ok(stream) = TcpStream::connect(("127.0.0.1", port)) {
            return stream;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("could not connect to 127.0.0.1:{port}");
}

#[test]
fn test_client_reconnects_after_server_drop() {
    init_logging();
    let server = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = server.local_addr().expect("addr").port();

    let mut client = MessageBrokerConnection::new(
        "reconnect",
        TcpAddrInfo::loopback(AddrFamily::IpV4, port).expect("resolve"),
        LineReceiver::new(),
        LineSender::new(),
    );
    client
        .set_awaiting_connection_timeout(Timeout::from_millis(100))
        .expect("configure");
    client.start().expect("start");

    // First connection: receive one line, then drop the socket.
    assert!(client.send_message("one".to_string()));
    {
        let (stream, _) = server.accept().expect("first accept");
        let mut lines = BufReader::new(stream);
        let mut line = String::new();
        lines.read_line(&mut line).expect("read");
        assert_eq!(line.trim_end(), "one");
        // Connection drops here.
    }

    // Give the receiver a moment to observe the abort and clear the shared
    // socket, so the next message is held for the new connection.
    std::thread::sleep(Duration::from_millis(500));

    // The broker reconnects and delivers the next message on the new
    // connection (a message popped mid-abort is retried).
    assert!(client.send_message("two".to_string()));
    let (stream, _) = server.accept().expect("second accept");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("timeout");
    let mut lines = BufReader::new(stream);
    let mut line = String::new();
    lines.read_line(&mut line).expect("read");
    assert_eq!(
        line.trim_end(),
        "two",
        "expected the queued message on the new connection"
    );

    client.stop();
}

#[test]
fn test_service_fans_messages_between_clients_and_fabric() {
    init_logging();
    let port = free_port();
    let addr = TcpAddrInfo::loopback(AddrFamily::IpV4, port).expect("resolve");

    let inbox: Arc<MessageQueue<String>> = Arc::new(MessageQueue::new());
    let outbox: Arc<MessageBus<String>> = Arc::new(MessageBus::new());

    let mut service = MessageBrokerService::new("test-service", addr, 2, || {
        (LineReceiver::new(), LineSender::new())
    });
    service.add_consumer(Arc::clone(&inbox) as _);
    service.add_provider(Arc::clone(&outbox) as _);
    service.start().expect("start");

    let mut peer = connect_retry(port);
    peer.set_read_timeout(Some(Duration::from_secs(5))).expect("timeout");
    peer.write_all(b"from peer\n").expect("write");
    assert_eq!(pop_within(&inbox, 5).as_deref(), Some("from peer"));

    // The sender task has subscribed by now (it delivered the receive path
    // above); push an outbound message through the provider bus.
    let mut announced = false;
    for _ in 0..50 {
        if outbox.push(&"to peer".to_string()) {
            announced = true;
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(announced, "service never subscribed the connection queue");

    let mut lines = BufReader::new(peer);
    let mut line = String::new();
    lines.read_line(&mut line).expect("read");
    assert_eq!(line.trim_end(), "to peer");

    // A second client is admitted within max_clients.
    let mut peer2 = connect_retry(port);
    peer2.write_all(b"second client\n").expect("write");
    assert_eq!(pop_within(&inbox, 5).as_deref(), Some("second client"));

    service.stop();
}
