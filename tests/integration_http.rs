use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use reqkit::prelude::{
    Error, ErrorCode, Executor, ExecutorConfig, ExponentialBackoff, RequestDescriptor,
    RetryStrategy,
};
use reqkit::TransportErrorKind;
use serde::Deserialize;

struct CannedResponse {
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
    delay: Duration,
}

impl CannedResponse {
    fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: body.into(),
            delay: Duration::ZERO,
        }
    }

    fn json(body: &str) -> Self {
        Self {
            content_type: "application/json",
            ..Self::new(200, body)
        }
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Clone, Debug)]
struct SeenRequest {
    request_line: String,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
}

/// Serves each canned response on its own connection, in order.
struct LocalServer {
    base_url: String,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
    join: Option<JoinHandle<()>>,
}

impl LocalServer {
    fn start(responses: Vec<CannedResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind local server");
        let address = listener.local_addr().expect("read local address");
        listener
            .set_nonblocking(true)
            .expect("set listener nonblocking");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_by_server = Arc::clone(&seen);

        let join = thread::spawn(move || {
            let deadline = std::time::Instant::now() + Duration::from_secs(3);
            let mut pending = responses.into_iter();
            let mut next = pending.next();
            while let Some(response) = next.as_ref() {
                if std::time::Instant::now() >= deadline {
                    break;
                }
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        let _ = stream.set_nonblocking(false);
                        if let Ok(request) = read_request(&mut stream) {
                            seen_by_server.lock().expect("lock seen requests").push(request);
                        }
                        if !response.delay.is_zero() {
                            thread::sleep(response.delay);
                        }
                        let _ = write_response(&mut stream, response);
                        next = pending.next();
                    }
                    Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(5));
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            base_url: format!("http://{address}"),
            seen,
            join: Some(join),
        }
    }

    fn requests(&self) -> Vec<SeenRequest> {
        self.seen.lock().expect("lock seen requests").clone()
    }
}

impl Drop for LocalServer {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn read_request(stream: &mut TcpStream) -> std::io::Result<SeenRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(1)))?;
    let mut raw = Vec::new();
    let header_end = loop {
        let mut chunk = [0_u8; 1024];
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        raw.extend_from_slice(&chunk[..read]);
        if let Some(position) = raw.windows(4).position(|window| window == b"\r\n\r\n") {
            break position;
        }
    };

    let head = String::from_utf8_lossy(&raw[..header_end]).into_owned();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default().to_owned();
    let headers: BTreeMap<String, String> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_owned()))
        .collect();

    let content_length = headers
        .get("content-length")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = raw[header_end + 4..].to_vec();
    while body.len() < content_length {
        let mut chunk = [0_u8; 1024];
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }

    Ok(SeenRequest {
        request_line,
        headers,
        body,
    })
}

fn write_response(stream: &mut TcpStream, response: &CannedResponse) -> std::io::Result<()> {
    let head = format!(
        "HTTP/1.1 {} Canned\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        response.status,
        response.content_type,
        response.body.len()
    );
    stream.write_all(head.as_bytes())?;
    stream.write_all(&response.body)?;
    stream.flush()
}

fn executor(config: ExecutorConfig) -> Executor {
    Executor::with_hyper_transport(config).expect("executor should build")
}

#[derive(Debug, Deserialize)]
struct Item {
    id: u32,
    name: String,
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn get_sends_resolved_request_and_decodes_json() {
    let server = LocalServer::start(vec![CannedResponse::json(r#"{"id":7,"name":"demo"}"#)]);
    let executor = executor(ExecutorConfig::default().with_client_name("sdk-test/1.0"));
    let descriptor = RequestDescriptor::new()
        .base_url(format!("{}/v1", server.base_url))
        .route_value("id", "7")
        .query_value("expand", "owner")
        .basic_authentication("user", "pass")
        .timeout(Duration::from_secs(2));

    let response = executor
        .get(&descriptor, "items/{id}")
        .await
        .expect("request should succeed");
    let item: Item = response.json().expect("json should decode");

    assert_eq!(item.id, 7);
    assert_eq!(item.name, "demo");
    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].request_line, "GET /v1/items/7?expand=owner HTTP/1.1");
    assert_eq!(
        requests[0].headers.get("authorization").map(String::as_str),
        Some("Basic dXNlcjpwYXNz")
    );
    assert_eq!(
        requests[0].headers.get("user-agent").map(String::as_str),
        Some("sdk-test/1.0")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn post_sends_form_body() {
    let server = LocalServer::start(vec![CannedResponse::new(201, "")]);
    let executor = executor(ExecutorConfig::default());
    let descriptor = RequestDescriptor::new()
        .base_url(server.base_url.clone())
        .form_body([("grant_type", "client_credentials"), ("scope", "a b")]);

    let response = executor
        .post(&descriptor, "/oauth/token")
        .await
        .expect("request should succeed");

    assert_eq!(response.status().as_u16(), 201);
    let requests = server.requests();
    assert_eq!(requests[0].request_line, "POST /oauth/token HTTP/1.1");
    assert_eq!(requests[0].body, b"grant_type=client_credentials&scope=a+b");
    assert_eq!(
        requests[0].headers.get("content-type").map(String::as_str),
        Some("application/x-www-form-urlencoded; charset=utf-8")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn server_error_is_returned_with_body_and_not_retried() {
    let server = LocalServer::start(vec![CannedResponse::new(503, "busy")]);
    let executor = executor(ExecutorConfig::default());
    let descriptor = RequestDescriptor::new()
        .base_url(server.base_url.clone())
        .resource("items")
        .retry_strategy(RetryStrategy::ExponentialBackoff(
            ExponentialBackoff::new(3, true).base_delay(Duration::from_millis(5)),
        ));

    let error = executor
        .execute(&descriptor)
        .await
        .expect_err("503 should be rejected");

    assert_eq!(error.code(), ErrorCode::UnexpectedStatus);
    assert_eq!(
        error.response().map(|response| response.text_lossy()),
        Some("busy".to_owned())
    );
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oversized_response_body_is_rejected() {
    let server = LocalServer::start(vec![CannedResponse::new(200, vec![b'x'; 64])]);
    let executor = executor(ExecutorConfig::default().with_max_response_body_bytes(16));
    let descriptor = RequestDescriptor::new()
        .base_url(server.base_url.clone())
        .resource("large");

    let error = executor
        .execute(&descriptor)
        .await
        .expect_err("body exceeds limit");

    match error {
        Error::ResponseBodyTooLarge { limit_bytes, .. } => assert_eq!(limit_bytes, 16),
        other => panic!("unexpected error variant: {other}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_server_times_out() {
    let server = LocalServer::start(vec![
        CannedResponse::new(200, "late").delayed(Duration::from_millis(400)),
    ]);
    let executor = executor(ExecutorConfig::default());
    let descriptor = RequestDescriptor::new()
        .base_url(server.base_url.clone())
        .resource("slow")
        .timeout(Duration::from_millis(80));

    let error = executor
        .execute(&descriptor)
        .await
        .expect_err("request should time out");

    assert_eq!(error.code(), ErrorCode::Timeout);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refused_connection_is_a_connect_failure() {
    let address = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind throwaway listener");
        listener.local_addr().expect("read throwaway address")
    };
    let executor = executor(ExecutorConfig::default());
    let descriptor = RequestDescriptor::new()
        .base_url(format!("http://{address}"))
        .resource("nothing")
        .timeout(Duration::from_secs(2));

    let error = executor
        .execute(&descriptor)
        .await
        .expect_err("nothing is listening");

    match error {
        Error::Transport { kind, .. } => assert_eq!(kind, TransportErrorKind::Connect),
        other => panic!("unexpected error variant: {other}"),
    }
}
