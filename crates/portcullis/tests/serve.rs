//! End-to-end tests: a real listener, the hyper adapter and an HTTP client.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use portcullis::{
    load_contract, serve, HandlerError, HttpRouter, MockHandler, OperationDescriptor, Parameters,
    Payload, Response, RouterConfig,
};
use portcullis_validator::ParameterLocation;

struct TestServer {
    addr: SocketAddr,
    router: HttpRouter,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<std::io::Result<()>>,
}

impl TestServer {
    async fn start(config: RouterConfig) -> Self {
        let contract = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/pets.yaml");
        let table = load_contract(&contract, &config).expect("contract compiles");

        let router = HttpRouter::builder(Arc::new(table), config)
            .handler("getPet", |p: Parameters, _op: Arc<OperationDescriptor>| async move {
                let id = p.get(ParameterLocation::Path, "id").cloned();
                Ok::<_, HandlerError>(Response::json(StatusCode::OK, json!({ "id": id })))
            })
            .handler("createPet", |p: Parameters, _op: Arc<OperationDescriptor>| async move {
                let body = match p.body {
                    Some(Payload::Value(value)) => value,
                    _ => json!({}),
                };
                Ok::<_, HandlerError>(Response::json(StatusCode::CREATED, body))
            })
            .handler("slow", |_p: Parameters, _op: Arc<OperationDescriptor>| async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok::<_, HandlerError>(Response::json(StatusCode::OK, json!({})))
            })
            .default_handler(MockHandler)
            .build()
            .expect("router builds");

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(serve(listener, router.clone(), async move {
            let _ = rx.await;
        }));

        Self {
            addr,
            router,
            shutdown: Some(tx),
            task,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("server loop stops")
            .expect("server task joins")
            .expect("server loop is clean");
    }
}

async fn problem(response: reqwest::Response) -> Value {
    response.json().await.expect("problem body")
}

#[tokio::test]
async fn typed_path_capture_over_http() {
    let server = TestServer::start(RouterConfig::default()).await;

    let response = reqwest::get(server.url("/pets/42")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("transaction-id"));
    assert_eq!(response.json::<Value>().await.unwrap(), json!({ "id": 42 }));

    server.stop().await;
}

#[tokio::test]
async fn capture_of_wrong_type_is_not_found() {
    let server = TestServer::start(RouterConfig::default()).await;

    let response = reqwest::get(server.url("/pets/rex")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(problem(response).await["code"], "E_NOT_FOUND");

    server.stop().await;
}

#[tokio::test]
async fn mock_extension_answers_over_http() {
    let server = TestServer::start(RouterConfig::default()).await;

    let response = reqwest::get(server.url("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.json::<Value>().await.unwrap(), json!({ "status": "up" }));

    server.stop().await;
}

#[tokio::test]
async fn json_body_round_trip() {
    let server = TestServer::start(RouterConfig::default()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(server.url("/pets"))
        .json(&json!({ "name": "rex" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.json::<Value>().await.unwrap(), json!({ "name": "rex" }));

    let response = client
        .post(server.url("/pets"))
        .json(&json!({ "age": 3 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(problem(response).await["code"], "E_BAD_REQUEST_BODY");

    server.stop().await;
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let server = TestServer::start(RouterConfig::default().with_max_body_size(16)).await;

    let response = reqwest::Client::new()
        .post(server.url("/pets"))
        .header("content-type", "application/json")
        .body(format!(r#"{{"name":"{}"}}"#, "x".repeat(64)))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_client_error());
    assert_eq!(problem(response).await["code"], "E_REQUEST_BODY_TOO_LARGE");

    server.stop().await;
}

#[tokio::test]
async fn client_transaction_id_is_echoed() {
    let server = TestServer::start(RouterConfig::default()).await;

    let response = reqwest::Client::new()
        .get(server.url("/pets/1"))
        .header("transaction-id", "abc-123")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["transaction-id"], "abc-123");

    server.stop().await;
}

#[tokio::test]
async fn concurrent_requests_get_distinct_transaction_ids() {
    let server = TestServer::start(RouterConfig::default()).await;
    let client = reqwest::Client::new();

    let requests = (0..20).map(|i| {
        let client = client.clone();
        let url = server.url(&format!("/pets/{}", i));
        tokio::spawn(async move {
            let response = client.get(url).send().await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            response.headers()["transaction-id"]
                .to_str()
                .unwrap()
                .to_string()
        })
    });

    let mut ids = HashSet::new();
    for request in requests.collect::<Vec<_>>() {
        ids.insert(request.await.unwrap());
    }
    assert_eq!(ids.len(), 20);

    // Slots are released right after the response is handed to the connection.
    tokio::time::timeout(Duration::from_secs(1), async {
        while !server.router.registry().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("registry drains");

    server.stop().await;
}

#[tokio::test]
async fn live_transaction_id_cannot_be_reused() {
    let server = TestServer::start(RouterConfig::default()).await;
    let client = reqwest::Client::new();

    let first = {
        let client = client.clone();
        let url = server.url("/slow");
        tokio::spawn(async move {
            client
                .get(url)
                .header("transaction-id", "shared")
                .send()
                .await
                .unwrap()
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let second = client
        .get(server.url("/pets/1"))
        .header("transaction-id", "shared")
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::BAD_REQUEST);
    assert_ne!(second.headers()["transaction-id"], "shared");
    assert_eq!(problem(second).await["code"], "E_TRANSACTION_ID_NOT_UNIQUE");

    let first = first.await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers()["transaction-id"], "shared");

    server.stop().await;
}

#[tokio::test]
async fn deadline_answers_gateway_timeout() {
    let config = RouterConfig::default().with_timeout(Duration::from_millis(50));
    let server = TestServer::start(config).await;

    let response = reqwest::get(server.url("/slow")).await.unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(problem(response).await["code"], "E_TRANSACTION_TIMEOUT");

    server.stop().await;
}

#[tokio::test]
async fn fatal_signal_stops_the_server() {
    let server = TestServer::start(RouterConfig::default()).await;

    server.router.fatal_signal().raise("test");
    // Hold the shutdown sender so only the fatal signal can end the loop.
    let TestServer { task, shutdown, .. } = server;
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("server loop stops")
        .expect("server task joins")
        .expect("server loop is clean");
    drop(shutdown);
}
