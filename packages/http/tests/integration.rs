use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use skein_core::{
    CompoundRequest, Credentials, Direction, Manager, ManagerConfig, Request, RequestState,
    Transport,
};
use skein_http::{ReqwestTransport, TransportConfig};

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
struct User {
    id: u64,
    name: String,
}

#[derive(Debug, PartialEq)]
enum Event {
    Success { reporter: String, status: u16, body: String },
    Error { reporter: String, message: String, status: Option<u16> },
}

struct Harness {
    manager: Manager,
    transport: Arc<ReqwestTransport>,
    sender: UnboundedSender<Event>,
    events: UnboundedReceiver<Event>,
}

impl Harness {
    fn new() -> Self {
        let transport = Arc::new(
            ReqwestTransport::with_handle(TransportConfig::default(), Handle::current()).unwrap(),
        );
        let shared: Arc<dyn Transport> = transport.clone();
        let manager = Manager::from_shared(shared, ManagerConfig::default()).unwrap();
        let (sender, events) = unbounded_channel();
        Self {
            manager,
            transport,
            sender,
            events,
        }
    }

    /// Install callbacks reporting into the harness event stream.
    fn observe<R: Request>(&self, request: R) -> R {
        let success_tx = self.sender.clone();
        let error_tx = self.sender.clone();
        request.completion(
            move |response, reporter| {
                let _ = success_tx.send(Event::Success {
                    reporter: reporter.tag(),
                    status: response.status,
                    body: response.text(),
                });
            },
            move |failure, reporter| {
                let _ = error_tx.send(Event::Error {
                    reporter: reporter.tag(),
                    message: failure.error.to_string(),
                    status: failure.response.as_ref().map(|r| r.status),
                });
            },
        )
    }

    async fn next_event(&mut self) -> Event {
        tokio::time::timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("timed out waiting for a callback")
            .expect("event channel closed")
    }

    async fn assert_quiet(&mut self, wait: Duration) {
        let event = tokio::time::timeout(wait, self.events.recv()).await;
        assert!(event.is_err(), "unexpected callback: {:?}", event);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn get_delivers_response_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(User {
            id: 123,
            name: "Alice".to_string(),
        }))
        .mount(&server)
        .await;

    let mut harness = Harness::new();
    let request = harness.observe(
        harness
            .manager
            .request()
            .url(&format!("{}/users/123", server.uri()))
            .with_tag("user"),
    );
    assert!(request.clone().get());

    match harness.next_event().await {
        Event::Success {
            reporter,
            status,
            body,
        } => {
            assert_eq!(reporter, "user");
            assert_eq!(status, 200);
            let user: User = serde_json::from_str(&body).unwrap();
            assert_eq!(user.name, "Alice");
        }
        other => panic!("expected success, got {:?}", other),
    }
    assert_eq!(request.state(), RequestState::Succeeded);
    assert!(harness.manager.registry().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn not_found_goes_to_error_callback_with_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("nope"))
        .mount(&server)
        .await;

    let mut harness = Harness::new();
    harness
        .observe(
            harness
                .manager
                .request()
                .url(&format!("{}/missing", server.uri()))
                .with_tag("missing"),
        )
        .get();

    assert_eq!(
        harness.next_event().await,
        Event::Error {
            reporter: "missing".to_string(),
            message: "Status Code 404".to_string(),
            status: Some(404),
        }
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn connection_failure_is_a_transport_error() {
    let mut harness = Harness::new();
    harness
        .observe(
            harness
                .manager
                .request()
                .url("http://127.0.0.1:9/gone")
                .timeout(Duration::from_secs(1)),
        )
        .get();

    match harness.next_event().await {
        Event::Error {
            message, status, ..
        } => {
            assert!(message.starts_with("transport error"), "{}", message);
            assert_eq!(status, None);
        }
        other => panic!("expected transport error, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn post_sends_json_body() {
    let server = MockServer::start().await;
    let user = User {
        id: 7,
        name: "Bob".to_string(),
    };
    Mock::given(method("POST"))
        .and(path("/users"))
        .and(header("content-type", "application/json"))
        .and(body_json(&user))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let mut harness = Harness::new();
    harness
        .observe(
            harness
                .manager
                .request()
                .url(&format!("{}/users", server.uri()))
                .json(&user)
                .unwrap(),
        )
        .post();

    assert!(matches!(
        harness.next_event().await,
        Event::Success { status: 201, .. }
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn chain_runs_against_server_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("token")
                .set_delay(Duration::from_millis(100)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/profile"))
        .respond_with(ResponseTemplate::new(200).set_body_string("profile"))
        .mount(&server)
        .await;

    let mut harness = Harness::new();
    let manager = harness.manager.clone();
    let chain = harness.observe(
        manager
            .chained_request()
            .with_tag("session")
            .then(harness.observe(
                manager
                    .request()
                    .url(&format!("{}/login", server.uri()))
                    .method(skein_core::Method::POST),
            ))
            .then(harness.observe(manager.request().url(&format!("{}/profile", server.uri())))),
    );
    assert!(chain.execute());

    let mut bodies = Vec::new();
    for _ in 0..3 {
        match harness.next_event().await {
            Event::Success { reporter, body, .. } => {
                assert_eq!(reporter, "session");
                bodies.push(body);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
    assert_eq!(bodies, vec!["token", "profile", ""]);

    let received = server.received_requests().await.unwrap();
    let paths: Vec<_> = received.iter().map(|r| r.url.path().to_string()).collect();
    assert_eq!(paths, vec!["/login", "/profile"]);
    assert!(harness.manager.registry().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn parallel_completes_once_after_all_children() {
    let server = MockServer::start().await;
    for (route, delay) in [("/a", 150), ("/b", 0), ("/c", 50)] {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(delay)))
            .mount(&server)
            .await;
    }

    let mut harness = Harness::new();
    let manager = harness.manager.clone();
    let group = ["/a", "/b", "/c"].iter().fold(
        harness.observe(manager.parallel_request().with_tag("fanout")),
        |group, route| group.add(manager.request().url(&format!("{}{}", server.uri(), route))),
    );
    assert!(group.execute());

    assert!(matches!(
        harness.next_event().await,
        Event::Success { reporter, .. } if reporter == "fanout"
    ));
    harness.assert_quiet(Duration::from_millis(200)).await;
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn parallel_failure_cancels_slow_siblings() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let mut harness = Harness::new();
    let manager = harness.manager.clone();
    let slow = harness.observe(manager.request().url(&format!("{}/slow", server.uri())));
    let group = harness.observe(
        manager
            .parallel_request()
            .with_tag("group")
            .add(slow.clone())
            .add(manager.request().url(&format!("{}/broken", server.uri()))),
    );
    group.execute();

    assert_eq!(
        harness.next_event().await,
        Event::Error {
            reporter: "group".to_string(),
            message: "Status Code 500".to_string(),
            status: Some(500),
        }
    );
    assert_eq!(slow.state(), RequestState::Cancelled);
    assert_eq!(harness.transport.in_flight(), 0);
    harness.assert_quiet(Duration::from_millis(300)).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_by_tag_stops_in_flight_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let mut harness = Harness::new();
    let request = harness.observe(
        harness
            .manager
            .request()
            .url(&format!("{}/slow", server.uri()))
            .with_tag("slow"),
    );
    assert!(request.clone().get());
    assert_eq!(harness.transport.in_flight(), 1);

    harness.manager.cancel_tag("slow");

    assert_eq!(request.state(), RequestState::Cancelled);
    assert_eq!(harness.transport.in_flight(), 0);
    assert!(harness.manager.registry().is_empty());
    harness.assert_quiet(Duration::from_millis(800)).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn global_headers_and_credentials_are_sent() {
    let server = MockServer::start().await;
    let credentials = Credentials::new("user", "secret");
    Mock::given(method("GET"))
        .and(path("/private"))
        .and(header("x-api-key", "k1"))
        .and(header("authorization", credentials.basic_authorization().as_str()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut harness = Harness::new();
    harness
        .manager
        .set_global_header("X-Api-Key", Some("k1"), None);
    harness
        .manager
        .set_global_credentials(Some(credentials), Some("127.0.0.1"));

    harness
        .observe(
            harness
                .manager
                .request()
                .url(&format!("{}/private", server.uri())),
        )
        .get();

    assert!(matches!(
        harness.next_event().await,
        Event::Success { status: 200, .. }
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn authentication_challenge_is_answered() {
    let server = MockServer::start().await;
    let credentials = Credentials::new("user", "secret");
    Mock::given(method("GET"))
        .and(path("/guarded"))
        .and(header("authorization", credentials.basic_authorization().as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_string("welcome"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/guarded"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let mut harness = Harness::new();
    harness
        .observe(
            harness
                .manager
                .request()
                .url(&format!("{}/guarded", server.uri()))
                .credentials(Some(credentials), false),
        )
        .get();

    assert!(matches!(
        harness.next_event().await,
        Event::Success { status: 200, body, .. } if body == "welcome"
    ));
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn download_progress_reaches_full_length() {
    let server = MockServer::start().await;
    let payload = vec![b'x'; 64 * 1024];
    Mock::given(method("GET"))
        .and(path("/blob"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload.clone()))
        .mount(&server)
        .await;

    let mut harness = Harness::new();
    let (progress_tx, mut progress_rx) = unbounded_channel();
    harness
        .observe(
            harness
                .manager
                .request()
                .url(&format!("{}/blob", server.uri()))
                .progress(move |progress| {
                    let _ = progress_tx.send(progress);
                }),
        )
        .get();

    assert!(matches!(
        harness.next_event().await,
        Event::Success { status: 200, .. }
    ));

    let mut last = None;
    while let Ok(progress) = progress_rx.try_recv() {
        last = Some(progress);
    }
    let last = last.expect("no progress reported");
    assert_eq!(last.transferred, payload.len() as u64);
    assert_eq!(last.expected, Some(payload.len() as u64));
    assert_eq!(last.fraction(), Some(1.0));
}

#[tokio::test(flavor = "multi_thread")]
async fn upload_progress_covers_whole_body() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;

    let payload = vec![b'u'; 40 * 1024];
    let mut harness = Harness::new();
    let (progress_tx, mut progress_rx) = unbounded_channel();
    harness
        .observe(
            harness
                .manager
                .request()
                .url(&format!("{}/upload", server.uri()))
                .body(payload.clone())
                .upload_progress(move |progress| {
                    let _ = progress_tx.send(progress);
                }),
        )
        .put();

    assert!(matches!(
        harness.next_event().await,
        Event::Success { status: 201, .. }
    ));

    let mut reports = Vec::new();
    while let Ok(progress) = progress_rx.try_recv() {
        reports.push(progress);
    }
    assert!(reports.len() > 1, "body was not sent in chunks");
    assert!(reports
        .windows(2)
        .all(|pair| pair[0].transferred < pair[1].transferred));
    let last = reports.last().unwrap();
    assert_eq!(last.direction, Direction::Upload);
    assert_eq!(last.transferred, payload.len() as u64);
    assert_eq!(last.fraction(), Some(1.0));

    let received = server.received_requests().await.unwrap();
    assert_eq!(received[0].body, payload);
}
