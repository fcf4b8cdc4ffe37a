//! Writer → socket → reader round trips over real loopback TCP.

use servkit::clock::Timeout;
use servkit::http::{HttpMessageParser, HttpMessageReader, HttpMessageWriter, StartLine};
use servkit::net::{AddrFamily, TcpAddrInfo, TcpSocket};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Connected (client, server) socket pair on loopback.
fn socket_pair() -> (TcpSocket, TcpSocket) {
    let mut listener = TcpSocket::new();
    listener.open(AddrFamily::IpV4).expect("open listener");
    let any = TcpAddrInfo::loopback(AddrFamily::IpV4, 0).expect("resolve");
    listener.bind(&any).expect("bind");
    listener.listen(1).expect("listen");
    let port = listener.local_addr().expect("bound addr").port();

    let mut client = TcpSocket::new();
    client.open(AddrFamily::IpV4).expect("open client");
    let addr = TcpAddrInfo::loopback(AddrFamily::IpV4, port).expect("resolve");
    client.connect(&addr, Timeout::new(5, 0)).expect("connect");

    let server = listener
        .accept(Timeout::new(5, 0))
        .expect("accept")
        .expect("peer before deadline");
    (client, server)
}

fn read_message(reader: &mut HttpMessageReader, socket: &mut TcpSocket) -> Vec<u8> {
    let mut body = Vec::new();
    let mut spins = 0;
    loop {
        reader
            .read(socket, &mut body, Timeout::from_millis(200))
            .expect("read");
        if reader.is_completed() {
            return body;
        }
        spins += 1;
        assert!(spins < 100, "message never completed");
    }
}

#[test]
fn test_identity_request_over_socket() {
    init_logging();
    let (mut client, mut server) = socket_pair();

    let mut writer = HttpMessageWriter::new(StartLine::request("POST", "/echo", "HTTP/1.1"));
    writer.set_header_field("Host", "loopback.test").expect("header");
    writer.set_header_field("X-Trace", "42").expect("header");
    assert!(writer
        .write_once(&mut client, b"payload bytes", Timeout::new(5, 0))
        .expect("write_once"));

    let mut reader = HttpMessageReader::new(HttpMessageParser::request());
    let body = read_message(&mut reader, &mut server);

    let parser = reader.parser();
    assert_eq!(parser.first_token(), "POST");
    assert_eq!(parser.second_token(), "/echo");
    assert_eq!(parser.third_token(), "HTTP/1.1");
    assert_eq!(parser.headers().value("Host").as_deref(), Some("loopback.test"));
    assert_eq!(parser.headers().value("X-Trace").as_deref(), Some("42"));
    assert_eq!(parser.headers().value("Content-Length").as_deref(), Some("13"));
    assert_eq!(body, b"payload bytes");
}

#[test]
fn test_chunked_response_with_trailer_over_socket() {
    init_logging();
    let (mut client, mut server) = socket_pair();

    let mut writer = HttpMessageWriter::new(StartLine::response("HTTP/1.1", 200, "OK"));
    writer.set_header_field("Server", "servkit-test").expect("header");
    for chunk in [&b"first "[..], &b"second "[..], &b"third"[..]] {
        assert!(writer
            .write_chunk(&mut server, chunk, Timeout::new(5, 0))
            .expect("write_chunk"));
    }
    writer.set_header_field("X-Total-Chunks", "3").expect("trailer");
    assert!(writer.finalize(&mut server, Timeout::new(5, 0)).expect("finalize"));

    let mut reader = HttpMessageReader::new(HttpMessageParser::response());
    let body = read_message(&mut reader, &mut client);

    let parser = reader.parser();
    assert_eq!(parser.first_token(), "HTTP/1.1");
    assert_eq!(parser.second_token(), "200");
    assert_eq!(parser.third_token(), "OK");
    assert!(parser.headers().contains_value("Transfer-Encoding", "chunked"));
    assert_eq!(parser.headers().value("X-Total-Chunks").as_deref(), Some("3"));
    assert_eq!(body, b"first second third");
}

#[test]
fn test_two_messages_back_to_back_on_one_connection() {
    init_logging();
    let (mut client, mut server) = socket_pair();

    let mut writer = HttpMessageWriter::new(StartLine::request("GET", "/first", "HTTP/1.1"));
    assert!(writer.write_bodyless(&mut client, Timeout::new(5, 0)).expect("first"));
    writer
        .set_start_line(StartLine::request("GET", "/second", "HTTP/1.1"))
        .expect("start line");
    assert!(writer
        .write_once(&mut client, b"x", Timeout::new(5, 0))
        .expect("second"));

    let mut reader = HttpMessageReader::new(HttpMessageParser::request());
    let body1 = read_message(&mut reader, &mut server);
    assert!(body1.is_empty());
    assert_eq!(reader.parser().second_token(), "/first");

    let body2 = read_message(&mut reader, &mut server);
    assert_eq!(reader.parser().second_token(), "/second");
    assert_eq!(body2, b"x");
}
