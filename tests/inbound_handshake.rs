mod support;

use freeswitch_esl::{EslError, InboundOptions};

use support::{drain_command, loopback_listener, read_line, send_frame};

#[tokio::test]
async fn auth_ok_resolves_with_a_live_connection() {
    let (listener, addr) = loopback_listener().await;
    let parts: Vec<&str> = addr.rsplitn(2, ':').collect();
    let port: u16 = parts[0].parse().unwrap();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        send_frame(&mut stream, "Content-Type: auth/request\n\n").await;
        let command = read_line(&mut stream).await;
        assert_eq!(command, "auth ClueCon");
        drain_command(&mut stream).await;
        send_frame(&mut stream, "Content-Type: command/reply\nReply-Text: +OK accepted\n\n").await;
        // keep the socket open for the duration of the test
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    });

    let options = InboundOptions::new("127.0.0.1", port, "ClueCon");
    let inbound = freeswitch_esl::Inbound::connect(&options).await.unwrap();
    assert!(!inbound.is_closed());
}

#[tokio::test]
async fn auth_fail_rejects_with_auth_error() {
    let (listener, addr) = loopback_listener().await;
    let parts: Vec<&str> = addr.rsplitn(2, ':').collect();
    let port: u16 = parts[0].parse().unwrap();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        send_frame(&mut stream, "Content-Type: auth/request\n\n").await;
        drain_command(&mut stream).await;
        send_frame(&mut stream, "Content-Type: command/reply\nReply-Text: -ERR invalid\n\n").await;
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    });

    let options = InboundOptions::new("127.0.0.1", port, "wrong-password");
    let result = freeswitch_esl::Inbound::connect(&options).await;
    assert!(matches!(result, Err(EslError::Auth(_))));
}
