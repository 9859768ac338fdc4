mod support;

use freeswitch_esl::InboundOptions;

use support::{drain_command, loopback_listener, read_line, send_frame};

async fn authed_inbound_and_server(
) -> (freeswitch_esl::Inbound, tokio::net::TcpStream) {
    let (listener, addr) = loopback_listener().await;
    let parts: Vec<&str> = addr.rsplitn(2, ':').collect();
    let port: u16 = parts[0].parse().unwrap();

    let server_task = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        send_frame(&mut stream, "Content-Type: auth/request\n\n").await;
        drain_command(&mut stream).await;
        send_frame(&mut stream, "Content-Type: command/reply\nReply-Text: +OK accepted\n\n").await;
        stream
    });

    let options = InboundOptions::new("127.0.0.1", port, "ClueCon");
    let inbound = freeswitch_esl::Inbound::connect(&options).await.unwrap();
    let stream = server_task.await.unwrap();
    (inbound, stream)
}

#[tokio::test]
async fn api_round_trip_reports_success_and_body() {
    let (inbound, mut stream) = authed_inbound_and_server().await;

    let server = tokio::spawn(async move {
        let command = read_line(&mut stream).await;
        assert_eq!(command, "api status");
        drain_command(&mut stream).await;
        send_frame(
            &mut stream,
            "Content-Type: api/response\nContent-Length: 5\n\n+OK\n\n",
        )
        .await;
        stream
    });

    let response = inbound.send_api("status").await.unwrap();
    assert!(response.is_ok());
    assert_eq!(response.body(), "+OK\n\n");
    server.await.unwrap();
}

#[tokio::test]
async fn sequential_commands_resolve_in_fifo_order() {
    let (inbound, mut stream) = authed_inbound_and_server().await;

    let server = tokio::spawn(async move {
        for i in 0..3 {
            let command = read_line(&mut stream).await;
            assert_eq!(command, format!("command-{i}"));
            drain_command(&mut stream).await;
            send_frame(
                &mut stream,
                &format!("Content-Type: command/reply\nReply-Text: +OK reply-{i}\n\n"),
            )
            .await;
        }
    });

    let first = inbound.send_command("command-0");
    let second = inbound.send_command("command-1");
    let third = inbound.send_command("command-2");
    let (first, second, third) = tokio::join!(first, second, third);

    assert_eq!(first.unwrap().text(), "+OK reply-0");
    assert_eq!(second.unwrap().text(), "+OK reply-1");
    assert_eq!(third.unwrap().text(), "+OK reply-2");
    server.await.unwrap();
}

#[tokio::test]
async fn background_job_resolves_on_matching_job_uuid() {
    let (inbound, mut stream) = authed_inbound_and_server().await;

    let server = tokio::spawn(async move {
        let command = read_line(&mut stream).await;
        assert_eq!(command, "bgapi originate sofia/x");
        let job_line = read_line(&mut stream).await;
        assert!(job_line.starts_with("Job-UUID: "));
        let job_uuid = job_line.trim_start_matches("Job-UUID: ").to_string();
        drain_command(&mut stream).await;

        send_frame(&mut stream, "Content-Type: command/reply\nReply-Text: +OK Job-UUID: x\n\n").await;

        let body = format!("Event-Name: BACKGROUND_JOB\nJob-UUID: {job_uuid}\nContent-Length: 6\n\n+OK ok");
        send_frame(
            &mut stream,
            &format!("Content-Type: text/event-plain\nContent-Length: {}\n\n{}", body.len(), body),
        )
        .await;
    });

    let result = inbound.bg_api("originate", Some("sofia/x"), None).await.unwrap();
    assert!(result.is_ok());
    assert_eq!(result.body().as_deref(), Some("+OK ok"));
    server.await.unwrap();
}
