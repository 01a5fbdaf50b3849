//! `UreqTransport` against a bare TCP server that answers with canned bytes.

use empire_core::rows::for_each_row;
use empire_core::{ErrorKind, HttpMethod, HttpRequest, Payload, Transport, UreqTransport};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Serve one connection: read the request, answer with `status` and `body`,
/// and hand back the request text that was received.
async fn serve_once(status: u16, body: Vec<u8>) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        let mut buf = [0u8; 4096];
        let header_end = loop {
            let n = socket.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed before headers were complete");
            received.extend_from_slice(&buf[..n]);
            if let Some(pos) = received.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };
        let head = String::from_utf8_lossy(&received[..header_end]).to_lowercase();
        let length: usize = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .map(|v| v.trim().parse().unwrap())
            .unwrap_or(0);
        while received.len() < header_end + length {
            let n = socket.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed before body was complete");
            received.extend_from_slice(&buf[..n]);
        }

        let mut response = format!(
            "HTTP/1.1 {status} OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
            body.len()
        )
        .into_bytes();
        response.extend_from_slice(&body);
        socket.write_all(&response).await.unwrap();
        socket.shutdown().await.unwrap();
        String::from_utf8_lossy(&received).into_owned()
    });
    (format!("http://{addr}/empire/"), handle)
}

fn request(method: HttpMethod, url: String) -> HttpRequest {
    HttpRequest {
        method,
        url,
        headers: vec![("Content-Type".to_string(), "application/json".to_string())],
        body: "{}".to_string(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn large_query_result_is_read_in_full() {
    let row = format!("{{\"id\":\"001\",\"name\":\"{}\"}}\n", "x".repeat(1000));
    let rows = 11 * 1024 * 1024 / row.len() + 1;
    let body = row.repeat(rows);
    assert!(body.len() > 10 * 1024 * 1024);
    let (base, server) = serve_once(200, body.clone().into_bytes()).await;

    let response = UreqTransport::new()
        .send(request(HttpMethod::Post, format!("{base}query")))
        .await
        .unwrap();
    server.await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body.len(), body.len());
    let mut seen = 0;
    let count = for_each_row(&Payload::Raw(response.body), |_| seen += 1).unwrap();
    assert_eq!(count, rows);
    assert_eq!(seen, rows);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn undecodable_body_is_a_json_error_with_status() {
    let (base, server) = serve_once(200, b"{\xff\xfe}".to_vec()).await;

    let err = UreqTransport::new()
        .send(request(HttpMethod::Get, format!("{base}services")))
        .await
        .unwrap_err();
    server.await.unwrap();

    assert_eq!(err.kind, ErrorKind::Json);
    assert_eq!(err.status_code, Some(200));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn undecodable_error_body_keeps_the_status() {
    let (base, server) = serve_once(500, b"\xffboom".to_vec()).await;

    let response = UreqTransport::new()
        .send(request(HttpMethod::Get, format!("{base}services")))
        .await
        .unwrap();
    server.await.unwrap();

    assert_eq!(response.status, 500);
    assert!(response.body.ends_with("boom"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn get_and_delete_carry_the_json_body() {
    for method in [HttpMethod::Get, HttpMethod::Delete] {
        let (base, server) = serve_once(200, b"{}".to_vec()).await;

        UreqTransport::new()
            .send(request(method, format!("{base}view/v")))
            .await
            .unwrap();
        let received = server.await.unwrap();

        assert!(received.starts_with(&format!("{method} /empire/view/v")), "{received}");
        assert!(received.to_lowercase().contains("content-length: 2"), "{received}");
        assert!(received.ends_with("\r\n\r\n{}"), "{received}");
    }
}
