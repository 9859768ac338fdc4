//! Loopback test fixtures: a minimal fake FreeSWITCH peer that scripts a
//! literal sequence of wire bytes, mirroring the teacher's own
//! integration-test texture of building real sockets rather than mocking
//! the transport.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Bind an ephemeral loopback listener and return it plus the address to
/// dial.
pub async fn loopback_listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr.to_string())
}

/// Read one line (until `\n`) off `stream`, trimming the trailing `\r\n`.
pub async fn read_line(stream: &mut TcpStream) -> String {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte).await.unwrap();
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
    }
    String::from_utf8(line).unwrap().trim_end_matches('\r').to_string()
}

/// Read lines off `stream` until a blank line is hit, discarding them —
/// used to drain a command's terminating `\n\n` without caring about its
/// exact header content.
pub async fn drain_command(stream: &mut TcpStream) {
    loop {
        let line = read_line(stream).await;
        if line.is_empty() {
            break;
        }
    }
}

pub async fn send_frame(stream: &mut TcpStream, frame: &str) {
    stream.write_all(frame.as_bytes()).await.unwrap();
}
