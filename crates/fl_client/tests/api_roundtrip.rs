//! Client tests against a loopback HTTP server.

use std::io::Read as _;
use std::sync::{Arc, Mutex};

use similar_asserts::assert_eq;
use tiny_http::{Header, Response, Server};

use fl_client::{Client, ClientError, DataQuery, ProgressReader, UploadRequest, Value};

/// One received request: method + url, authorization header, body.
struct Received {
    line: String,
    authorization: Option<String>,
    body: Vec<u8>,
}

/// A loopback server routing each request through `handler`, which
/// gets the server's own base url (for minting signed links), the
/// request url and the request body.
struct TestServer {
    server: Arc<Server>,
    host: String,
    requests: Arc<Mutex<Vec<Received>>>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl TestServer {
    fn start(
        mut handler: impl FnMut(&str, &str, &[u8]) -> (u16, Vec<u8>) + Send + 'static,
    ) -> Self {
        let server = Arc::new(Server::http("127.0.0.1:0").unwrap());
        let host = format!("http://{}", server.server_addr().to_ip().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));

        let serve = server.clone();
        let log = requests.clone();
        let base = host.clone();
        let handle = std::thread::spawn(move || {
            while let Ok(mut request) = serve.recv() {
                let url = request.url().to_owned();
                let line = format!("{} {url}", request.method());
                let authorization = request
                    .headers()
                    .iter()
                    .find(|h| h.field.equiv("Authorization"))
                    .map(|h| h.value.to_string());

                let mut body = Vec::new();
                request.as_reader().read_to_end(&mut body).unwrap();

                let (status, response_body) = handler(&base, &url, &body);
                log.lock().unwrap().push(Received {
                    line,
                    authorization,
                    body,
                });

                let response = Response::from_data(response_body)
                    .with_status_code(status)
                    .with_header(
                        Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).unwrap(),
                    );
                let _ = request.respond(response);
            }
        });

        Self {
            server,
            host,
            requests,
            handle: Some(handle),
        }
    }

    fn client(&self) -> Client {
        Client::with_host("test-token", self.host.clone()).unwrap()
    }

    fn request_lines(&self) -> Vec<String> {
        self.requests.lock().unwrap().iter().map(|r| r.line.clone()).collect()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Frames a minimal MCAP container with one schema-free JSON channel
/// `/moods` and `count` messages `{"level": <1-based index>}`.
fn moods_container(count: u32) -> Vec<u8> {
    const MAGIC: [u8; 8] = [0x89, b'M', b'C', b'A', b'P', 0x30, 0x0d, 0x0a];

    fn record(buf: &mut Vec<u8>, opcode: u8, body: &[u8]) {
        buf.push(opcode);
        buf.extend_from_slice(&(body.len() as u64).to_le_bytes());
        buf.extend_from_slice(body);
    }

    fn string(buf: &mut Vec<u8>, s: &str) {
        buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
        buf.extend_from_slice(s.as_bytes());
    }

    let mut out = MAGIC.to_vec();

    let mut channel = 1_u16.to_le_bytes().to_vec();
    channel.extend_from_slice(&0_u16.to_le_bytes()); // schema id 0
    string(&mut channel, "/moods");
    string(&mut channel, "json");
    channel.extend_from_slice(&0_u32.to_le_bytes()); // empty metadata
    record(&mut out, 0x04, &channel);

    for i in 0..count {
        let payload = format!(r#"{{"level": {}}}"#, i + 1);
        let mut message = 1_u16.to_le_bytes().to_vec();
        message.extend_from_slice(&i.to_le_bytes());
        message.extend_from_slice(&u64::from(i).to_le_bytes());
        message.extend_from_slice(&u64::from(i).to_le_bytes());
        message.extend_from_slice(payload.as_bytes());
        record(&mut out, 0x05, &message);
    }

    record(&mut out, 0x02, &[0; 20]); // footer
    out.extend_from_slice(&MAGIC);
    out
}

fn moods_query() -> DataQuery {
    DataQuery::device_name(
        "robot-1",
        "2025-01-01T00:00:00Z".parse().unwrap(),
        "2025-01-02T00:00:00Z".parse().unwrap(),
    )
}

#[test]
fn get_devices_sends_bearer_token() {
    let server = TestServer::start(|_, url, _| {
        assert!(url.starts_with("/v1/devices"));
        (
            200,
            br#"[{"id": "dev_1", "name": "robot-1", "projectId": "prj_1"}]"#.to_vec(),
        )
    });

    let devices = server.client().get_devices(Some("prj_1")).unwrap();

    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].name, "robot-1");
    assert_eq!(devices[0].project_id.as_deref(), Some("prj_1"));

    let requests = server.requests.lock().unwrap();
    assert_eq!(requests[0].line, "GET /v1/devices?projectId=prj_1");
    assert_eq!(requests[0].authorization.as_deref(), Some("Bearer test-token"));
}

#[test]
fn client_errors_carry_the_server_message() {
    let server = TestServer::start(|_, _, _| (404, br#"{"error": "device not found"}"#.to_vec()));

    let err = server.client().get_device(Some("dev_nope"), None).unwrap_err();

    match err {
        ClientError::Api { status, message } => {
            assert_eq!(status, 404);
            assert_eq!(message, "device not found");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn iter_messages_streams_decoded_messages() {
    let server = TestServer::start(|base, url, body| match url {
        "/v1/data/stream" => {
            let body: serde_json::Value = serde_json::from_slice(body).unwrap();
            assert_eq!(body["deviceName"], "robot-1");
            assert_eq!(body["outputFormat"], "mcap");
            (200, format!(r#"{{"link": "{base}/signed/stream.mcap"}}"#).into_bytes())
        }
        "/signed/stream.mcap" => (200, moods_container(10)),
        other => panic!("unexpected request to {other}"),
    });

    let messages: Vec<_> = server
        .client()
        .iter_messages(&moods_query(), None)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(messages.len(), 10);
    for (i, message) in messages.iter().enumerate() {
        assert_eq!(message.channel.topic, "/moods");
        assert_eq!(
            message.value.get("level").and_then(Value::as_f64),
            Some((i + 1) as f64)
        );
    }
}

#[test]
fn get_messages_is_all_or_nothing() {
    // Same container, but with no decoder factories configured: the
    // bulk call must error rather than return a partial result.
    let server = TestServer::start(|base, url, _| match url {
        "/v1/data/stream" => (
            200,
            format!(r#"{{"link": "{base}/signed/stream.mcap"}}"#).into_bytes(),
        ),
        "/signed/stream.mcap" => (200, moods_container(10)),
        other => panic!("unexpected request to {other}"),
    });

    #[allow(deprecated)]
    let messages = server.client().get_messages(&moods_query(), None).unwrap();
    assert_eq!(messages.len(), 10);

    #[allow(deprecated)]
    let err = server
        .client()
        .get_messages(&moods_query(), Some(Vec::new()))
        .unwrap_err();
    assert!(matches!(
        err,
        ClientError::Mcap(fl_client::McapError::UnsupportedEncoding(_))
    ));
}

#[test]
fn download_data_reports_cumulative_progress() {
    let server = TestServer::start(|base, url, _| match url {
        "/v1/data/stream" => (
            200,
            format!(r#"{{"link": "{base}/signed/data"}}"#).into_bytes(),
        ),
        "/signed/data" => (200, vec![0xee; 70_000]),
        other => panic!("unexpected request to {other}"),
    });

    let mut progress = Vec::new();
    let data = server
        .client()
        .download_data(&moods_query(), Some(&mut |transferred| progress.push(transferred)))
        .unwrap();

    assert_eq!(data.len(), 70_000);
    assert_eq!(progress.last(), Some(&70_000));
    assert!(progress.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn upload_reports_progress_with_known_total() {
    let server = TestServer::start(|base, url, body| match url {
        "/v1/data/upload" => {
            let request: serde_json::Value = serde_json::from_slice(body).unwrap();
            assert_eq!(request["filename"], "run.mcap");
            assert_eq!(request["deviceId"], "dev_1");
            (200, format!(r#"{{"link": "{base}/signed/put"}}"#).into_bytes())
        }
        "/signed/put" => {
            assert_eq!(body.len(), 4096);
            (200, b"stored".to_vec())
        }
        other => panic!("unexpected request to {other}"),
    });

    let progress = Arc::new(Mutex::new(Vec::new()));
    let sink = progress.clone();
    let reader = ProgressReader::from_bytes(vec![0xcd; 4096]).with_callback(
        move |transferred, total| sink.lock().unwrap().push((transferred, total)),
    );

    let result = server
        .client()
        .upload_data(
            &UploadRequest {
                device_id: Some("dev_1".to_owned()),
                filename: "run.mcap".to_owned(),
                ..UploadRequest::default()
            },
            reader,
        )
        .unwrap();

    assert_eq!(result.code, 200);
    assert_eq!(result.text, "stored");
    assert_eq!(
        server.request_lines(),
        vec!["POST /v1/data/upload", "PUT /signed/put"]
    );
    assert_eq!(progress.lock().unwrap().last(), Some(&(4096, Some(4096))));
}

#[test]
fn missing_device_selector_is_rejected_before_any_request() {
    let server = TestServer::start(|_, url, _| panic!("unexpected request to {url}"));

    let query = DataQuery {
        device_name: None,
        ..moods_query()
    };
    let err = server.client().download_data(&query, None).unwrap_err();
    assert!(matches!(err, ClientError::InvalidArgument(_)));
    assert!(server.request_lines().is_empty());
}
