use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use warden_connection::{ConnectionManager, HealthProbe};
use warden_core::{
    ConnectionConfig, CoreError, ErrorCategory, HttpConfig, MemoryCredentials, RouteSource,
    SystemClock, codes,
};
use warden_http::{
    BodyStream, HttpClient, HttpError, HttpErrorKind, HttpHealthProbe, HttpRequest, HttpResponse,
    HttpRouteSource, HttpTransport, Method, RequestConfig, StreamingResponse, TransferError,
    TransferStatus,
};

/// 按脚本返回响应并记录收到的请求。
#[derive(Default)]
struct FakeTransport {
    responses: Mutex<VecDeque<Result<HttpResponse, HttpError>>>,
    requests: Mutex<Vec<HttpRequest>>,
    stream: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
}

impl FakeTransport {
    fn with_responses(responses: Vec<Result<HttpResponse, HttpError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            ..Self::default()
        })
    }

    fn with_stream(rx: mpsc::Receiver<Vec<u8>>) -> Arc<Self> {
        Arc::new(Self {
            stream: Mutex::new(Some(rx)),
            ..Self::default()
        })
    }

    fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        self.requests.lock().push(request);
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(HttpError::Network("no scripted response".into())))
    }

    async fn open_stream(&self, request: HttpRequest) -> Result<StreamingResponse, HttpError> {
        self.requests.lock().push(request);
        let rx = self
            .stream
            .lock()
            .take()
            .ok_or_else(|| HttpError::Network("no scripted stream".into()))?;
        Ok(StreamingResponse {
            status: 200,
            body: Box::new(GatedBody { rx }),
        })
    }
}

/// 只有测试主动送入数据块时才返回的响应体。
struct GatedBody {
    rx: mpsc::Receiver<Vec<u8>>,
}

#[async_trait]
impl BodyStream for GatedBody {
    fn content_length(&self) -> Option<u64> {
        None
    }

    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, HttpError> {
        Ok(self.rx.recv().await)
    }
}

struct Hanging;

#[async_trait]
impl HttpTransport for Hanging {
    async fn execute(&self, _request: HttpRequest) -> Result<HttpResponse, HttpError> {
        std::future::pending::<()>().await;
        unreachable!()
    }
}

fn ok_json(value: serde_json::Value) -> Result<HttpResponse, HttpError> {
    Ok(HttpResponse {
        status: 200,
        headers: vec![("Content-Type".into(), "application/json".into())],
        body: serde_json::to_vec(&value).unwrap(),
    })
}

fn status(code: u16, body: &str) -> Result<HttpResponse, HttpError> {
    Ok(HttpResponse {
        status: code,
        headers: Vec::new(),
        body: body.as_bytes().to_vec(),
    })
}

fn http_config() -> HttpConfig {
    HttpConfig {
        base_url: "http://backend.test/".into(),
        ..HttpConfig::default()
    }
}

async fn wait_for_transferred(handle: &warden_http::TransferHandle, bytes: u64) {
    for _ in 0..200 {
        if handle.snapshot().transferred >= bytes {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("transfer never reached {bytes} bytes");
}

#[tokio::test]
async fn bearer_token_and_base_url_are_applied() {
    let transport = FakeTransport::with_responses(vec![ok_json(json!({"ok": true}))]);
    let credentials = Arc::new(MemoryCredentials::authenticated("t-123", "u-1", ["admin"]));
    let client = HttpClient::new(&http_config(), transport.clone()).with_credentials(credentials);

    let body: serde_json::Value = client.get_json("/auth/routes").await.unwrap();
    assert_eq!(body, json!({"ok": true}));

    let sent = transport.requests();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].method, Method::GET);
    assert_eq!(sent[0].url, "http://backend.test/auth/routes");
    assert!(
        sent[0]
            .headers
            .iter()
            .any(|(name, value)| name == "Authorization" && value == "Bearer t-123")
    );
}

#[tokio::test]
async fn anonymous_requests_skip_authorization() {
    let transport = FakeTransport::with_responses(vec![status(204, "")]);
    let credentials = Arc::new(MemoryCredentials::authenticated("t-123", "u-1", ["admin"]));
    let client = HttpClient::new(&http_config(), transport.clone()).with_credentials(credentials);

    let payload = json!({"user": "alice"});
    client
        .request(
            Method::POST,
            "login",
            Some(&payload),
            RequestConfig::default().anonymous(),
        )
        .await
        .unwrap();

    let sent = &transport.requests()[0];
    assert!(!sent.headers.iter().any(|(name, _)| name == "Authorization"));
    assert!(
        sent.headers
            .iter()
            .any(|(name, value)| name == "Content-Type" && value == "application/json")
    );
    assert_eq!(sent.body.as_deref(), Some(br#"{"user":"alice"}"#.as_slice()));
}

#[tokio::test]
async fn non_success_statuses_are_classified() {
    let transport = FakeTransport::with_responses(vec![
        status(401, "token expired"),
        status(503, "maintenance"),
    ]);
    let client = HttpClient::new(&http_config(), transport);

    let unauthorized = client
        .get_json::<serde_json::Value>("/auth/routes")
        .await
        .unwrap_err();
    assert!(unauthorized.is_unauthorized());
    assert_eq!(unauthorized.kind(), HttpErrorKind::Security);
    let core: CoreError = unauthorized.into();
    assert_eq!(core.code(), codes::AUTH_REJECTED);

    let server = client
        .get_json::<serde_json::Value>("/auth/routes")
        .await
        .unwrap_err();
    assert_eq!(server.kind(), HttpErrorKind::Server);
    assert!(server.is_retryable());
    assert_eq!(
        server,
        HttpError::Status {
            status: 503,
            message: "maintenance".into()
        }
    );
}

#[tokio::test(start_paused = true)]
async fn hanging_transport_times_out() {
    let client = HttpClient::new(&http_config(), Arc::new(Hanging));
    let err = client
        .request(
            Method::GET,
            "/slow",
            None,
            RequestConfig::default().with_timeout(Duration::from_secs(1)),
        )
        .await
        .unwrap_err();
    assert_eq!(err, HttpError::Timeout(Duration::from_secs(1)));
    let core: CoreError = err.into();
    assert_eq!(core.category(), ErrorCategory::Timeout);
}

#[tokio::test]
async fn route_source_accepts_bare_array_and_envelope() {
    let routes = json!([
        {"path": "/system", "name": "System", "meta": {"title": "menus.system", "rank": 2}},
        {"path": "/reports", "name": "Reports", "meta": {"roles": ["auditor"]}}
    ]);
    let transport = FakeTransport::with_responses(vec![
        ok_json(routes.clone()),
        ok_json(json!({"success": true, "data": routes})),
        ok_json(json!({"unexpected": 1})),
    ]);
    let client = HttpClient::new(&http_config(), transport);
    let source = HttpRouteSource::new(client, "/auth/routes");

    let bare = source.fetch_routes().await.unwrap();
    assert_eq!(bare.len(), 2);
    assert_eq!(bare[0].name, "System");
    assert_eq!(bare[1].meta.required_roles(), ["auditor".to_string()]);

    let enveloped = source.fetch_routes().await.unwrap();
    assert_eq!(enveloped, bare);

    let err = source.fetch_routes().await.unwrap_err();
    assert_eq!(err.code(), codes::HTTP_DECODE);
}

#[tokio::test]
async fn unreachable_backend_short_circuits_requests() {
    struct Down;

    #[async_trait]
    impl HealthProbe for Down {
        async fn probe(&self) -> warden_core::Result<()> {
            Err(CoreError::new(codes::HTTP_NETWORK, "refused"))
        }
    }

    let connection = ConnectionManager::new(
        ConnectionConfig {
            max_reconnect_attempts: 1,
            ..ConnectionConfig::default()
        },
        Arc::new(Down),
        Arc::new(SystemClock),
    );
    let transport = FakeTransport::with_responses(vec![ok_json(json!([]))]);
    let client = HttpClient::new(&http_config(), transport.clone()).with_connection(connection);

    let err = client
        .get_json::<serde_json::Value>("/auth/routes")
        .await
        .unwrap_err();
    assert!(matches!(err, HttpError::Unavailable(_)));
    assert!(err.is_retryable());
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn download_honors_pause_and_resume() {
    let (tx, rx) = mpsc::channel(4);
    let client = HttpClient::new(&http_config(), FakeTransport::with_stream(rx));
    let handle = client.start_download("/files/report.csv");

    let task = {
        let client = client.clone();
        let handle = handle.clone();
        tokio::spawn(async move { client.download(&handle).await })
    };

    tx.send(vec![1; 10]).await.unwrap();
    wait_for_transferred(&handle, 10).await;

    handle.pause().unwrap();
    tx.send(vec![2; 5]).await.unwrap();
    wait_for_transferred(&handle, 15).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(handle.status(), TransferStatus::Paused);
    assert!(!task.is_finished());

    handle.resume().unwrap();
    drop(tx);
    let data = task.await.unwrap().unwrap();
    assert_eq!(data.len(), 15);
    assert_eq!(handle.status(), TransferStatus::Completed);
    assert_eq!(client.transfers().list()[0].transferred, 15);
}

#[tokio::test]
async fn cancelled_download_stops_at_chunk_boundary() {
    let (tx, rx) = mpsc::channel(4);
    let client = HttpClient::new(&http_config(), FakeTransport::with_stream(rx));
    let handle = client.start_download("/files/big.bin");

    let task = {
        let client = client.clone();
        let handle = handle.clone();
        tokio::spawn(async move { client.download(&handle).await })
    };

    tx.send(vec![0; 8]).await.unwrap();
    wait_for_transferred(&handle, 8).await;
    handle.cancel().unwrap();
    tx.send(vec![0; 8]).await.unwrap();

    let err = task.await.unwrap().unwrap_err();
    assert_eq!(err, TransferError::Cancelled { id: handle.id() });
    assert_eq!(handle.status(), TransferStatus::Cancelled);
    assert_eq!(client.transfers().prune_finished(), 1);
}

#[tokio::test]
async fn failed_upload_marks_transfer_failed() {
    let transport = FakeTransport::with_responses(vec![status(500, "boom")]);
    let client = HttpClient::new(&http_config(), transport);
    let handle = client.start_upload("/files");

    let err = client
        .upload(&handle, b"payload".to_vec(), "application/octet-stream")
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::Http(HttpError::Status { status: 500, .. })));
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.status, TransferStatus::Failed);
    assert!(snapshot.error.unwrap().contains("boom"));
}

/// 逐个应答预置响应的最小 HTTP/1.1 服务器。
async fn canned_server(responses: Vec<(u16, &'static str)>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        for (code, body) in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let mut read = 0;
            while !buf[..read].windows(4).any(|window| window == b"\r\n\r\n") {
                let n = socket.read(&mut buf[read..]).await.unwrap();
                if n == 0 {
                    break;
                }
                read += n;
            }
            let response = format!(
                "HTTP/1.1 {code} STATUS\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        }
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn reqwest_transport_talks_to_real_socket() {
    let base_url = canned_server(vec![
        (200, r#"{"status":"UP"}"#),
        (503, r#"{"status":"DOWN"}"#),
        (200, r#"[{"path":"/system","name":"System"}]"#),
    ])
    .await;
    let config = HttpConfig {
        base_url,
        ..HttpConfig::default()
    };
    let client = HttpClient::with_reqwest(&config).unwrap();
    let probe = HttpHealthProbe::for_client(&client, &ConnectionConfig::default());
    assert!(probe.url().ends_with("/api/health"));

    assert!(probe.probe().await.is_ok());
    assert!(probe.probe().await.is_err());

    let source = HttpRouteSource::new(client, "/auth/routes");
    let routes = source.fetch_routes().await.unwrap();
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].path, "/system");
}
