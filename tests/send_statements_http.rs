//! Integration tests for the `/send-statements` trigger.
//!
//! The customer directory is a real libSQL file; SMTP is replaced by a
//! recording stub. Requests go through the full axum router.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::time::timeout;
use tower::ServiceExt;

use statement_dispatch::config::{DirectoryConfig, DispatchConfig};
use statement_dispatch::dispatcher::StatementDispatcher;
use statement_dispatch::error::{DatabaseError, MailError};
use statement_dispatch::mailer::{Mailer, StatementEmail};
use statement_dispatch::routes::dispatch_routes;
use statement_dispatch::store::{CustomerDirectory, DirectorySession, LibSqlDirectory};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Mailer stub: records sends, optionally fails, stalls, or blocks until released.
#[derive(Default)]
struct StubMailer {
    sent: Mutex<Vec<StatementEmail>>,
    fail_with: Option<String>,
    gate: Option<Arc<Notify>>,
    delay: Option<Duration>,
}

impl StubMailer {
    fn sent(&self) -> Vec<StatementEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for StubMailer {
    async fn send_statement(&self, email: &StatementEmail) -> Result<(), MailError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = &self.fail_with {
            return Err(MailError::Transport(reason.clone()));
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

/// Directory whose connection can never be opened.
struct UnreachableDirectory;

#[async_trait]
impl CustomerDirectory for UnreachableDirectory {
    async fn connect(&self) -> Result<Box<dyn DirectorySession>, DatabaseError> {
        Err(DatabaseError::Connection("server not reachable".into()))
    }
}

struct Workspace {
    _tmp: tempfile::TempDir,
    statements: PathBuf,
    sent: PathBuf,
    db: DirectoryConfig,
}

impl Workspace {
    async fn new(files: &[&str]) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let statements = tmp.path().join("Statements");
        let sent = tmp.path().join("successful_sent_statements");
        std::fs::create_dir(&statements).unwrap();
        for name in files {
            std::fs::write(statements.join(name), format!("%PDF-1.4 {name}")).unwrap();
        }
        let db = seed_directory(tmp.path()).await;
        Self {
            _tmp: tmp,
            statements,
            sent,
            db,
        }
    }

    fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig::new(&self.statements, &self.sent)
    }

    async fn router(&self, mailer: Arc<StubMailer>) -> axum::Router {
        let directory = LibSqlDirectory::open(&self.db).await.unwrap();
        let dispatcher = StatementDispatcher::new(self.dispatch_config(), Arc::new(directory), mailer);
        dispatch_routes(Arc::new(dispatcher))
    }
}

async fn seed_directory(dir: &Path) -> DirectoryConfig {
    let path = dir.join("erp.db");
    let db = libsql::Builder::new_local(&path).build().await.unwrap();
    let conn = db.connect().unwrap();
    conn.execute_batch(
        r#"
        CREATE TABLE customers (customer_no TEXT PRIMARY KEY, email TEXT);
        CREATE TABLE default_copy (email TEXT);
        INSERT INTO customers VALUES ('1001', 'a@x.com');
        INSERT INTO customers VALUES ('1002', 'd@x.com');
        INSERT INTO customers VALUES ('1003', 'e@x.com');
        INSERT INTO customers VALUES ('1004', 'f@x.com');
        INSERT INTO default_copy VALUES ('b@x.com');
        "#,
    )
    .await
    .unwrap();
    DirectoryConfig::local(path.to_string_lossy())
}

async fn get(app: axum::Router, uri: &str) -> (StatusCode, String) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .uri(uri)
        .header("accept", "application/json")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn serve(app: axum::Router) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

#[tokio::test]
async fn health_reports_ok() {
    let ws = Workspace::new(&[]).await;
    let app = ws.router(Arc::new(StubMailer::default())).await;

    let (status, body) = get(app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn trigger_over_tcp() {
    timeout(TEST_TIMEOUT, async {
        let ws = Workspace::new(&["STMT_1002.pdf"]).await;
        let mailer = Arc::new(StubMailer::default());
        let app = ws.router(Arc::clone(&mailer)).await;

        let port = serve(app).await;

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream
            .write_all(b"GET /send-statements HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.ends_with("Statements processed. sent=1 skipped=0 failed=0"), "{response}");
        assert_eq!(mailer.sent()[0].to, "d@x.com");
        assert!(ws.sent.join("STMT_1002.pdf").exists());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn statement_is_sent_and_moved() {
    timeout(TEST_TIMEOUT, async {
        let ws = Workspace::new(&["STMT_1001.pdf"]).await;
        let mailer = Arc::new(StubMailer::default());
        let app = ws.router(Arc::clone(&mailer)).await;

        let (status, body) = get(app, "/send-statements").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "Statements processed. sent=1 skipped=0 failed=0");

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "a@x.com");
        assert_eq!(sent[0].cc, ["b@x.com"]);
        assert_eq!(sent[0].attachment_name, "STMT_1001.pdf");

        assert!(!ws.statements.join("STMT_1001.pdf").exists());
        let moved = std::fs::read_to_string(ws.sent.join("STMT_1001.pdf")).unwrap();
        assert_eq!(moved, "%PDF-1.4 STMT_1001.pdf");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn skipped_files_stay_in_place() {
    timeout(TEST_TIMEOUT, async {
        let ws = Workspace::new(&["garbage.pdf", "STMT_9999.pdf"]).await;
        let mailer = Arc::new(StubMailer::default());
        let app = ws.router(Arc::clone(&mailer)).await;

        let (status, body) = get(app, "/send-statements").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "Statements processed. sent=0 skipped=2 failed=0");
        assert!(mailer.sent().is_empty());
        assert!(ws.statements.join("garbage.pdf").exists());
        assert!(ws.statements.join("STMT_9999.pdf").exists());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn transport_failure_keeps_file() {
    timeout(TEST_TIMEOUT, async {
        let ws = Workspace::new(&["STMT_1001.pdf"]).await;
        let mailer = Arc::new(StubMailer {
            fail_with: Some("421 service not available".into()),
            ..Default::default()
        });
        let app = ws.router(Arc::clone(&mailer)).await;

        let (status, body) = get(app, "/send-statements").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "Statements processed. sent=0 skipped=0 failed=1");
        assert!(ws.statements.join("STMT_1001.pdf").exists());
        assert!(!ws.sent.join("STMT_1001.pdf").exists());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn database_failure_still_answers() {
    timeout(TEST_TIMEOUT, async {
        let ws = Workspace::new(&["STMT_1001.pdf", "STMT_1002.pdf"]).await;
        let mailer = Arc::new(StubMailer::default());
        let dispatcher = StatementDispatcher::new(
            ws.dispatch_config(),
            Arc::new(UnreachableDirectory),
            Arc::clone(&mailer) as Arc<dyn Mailer>,
        );
        let app = dispatch_routes(Arc::new(dispatcher));

        let (status, body) = get(app, "/send-statements").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.starts_with("Statement run aborted:"), "{body}");
        assert!(body.contains("server not reachable"), "{body}");
        assert!(body.ends_with("sent=0 skipped=0 failed=0"), "{body}");
        assert!(mailer.sent().is_empty());
        assert!(ws.statements.join("STMT_1001.pdf").exists());
        assert!(ws.statements.join("STMT_1002.pdf").exists());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn overlapping_trigger_gets_conflict() {
    timeout(TEST_TIMEOUT, async {
        let ws = Workspace::new(&["STMT_1001.pdf"]).await;
        let gate = Arc::new(Notify::new());
        let mailer = Arc::new(StubMailer {
            gate: Some(Arc::clone(&gate)),
            ..Default::default()
        });
        let app = ws.router(Arc::clone(&mailer)).await;

        let first_app = app.clone();
        let first = tokio::spawn(async move { get(first_app, "/send-statements").await });

        // The sent directory appears once the first run holds the guard.
        while !ws.sent.exists() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let (status, body) = get(app, "/send-statements").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body.contains("already in progress"));

        gate.notify_one();
        let (status, _) = first.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(mailer.sent().len(), 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn client_disconnect_does_not_cancel_run() {
    timeout(TEST_TIMEOUT, async {
        let files = ["STMT_1001.pdf", "STMT_1002.pdf", "STMT_1003.pdf", "STMT_1004.pdf"];
        let ws = Workspace::new(&files).await;
        let mailer = Arc::new(StubMailer {
            delay: Some(Duration::from_millis(100)),
            ..Default::default()
        });
        let port = serve(ws.router(Arc::clone(&mailer)).await).await;

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream
            .write_all(b"GET /send-statements HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();

        // Hang up while the run is still working through the batch.
        while mailer.sent().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        drop(stream);

        for name in files {
            while !ws.sent.join(name).exists() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
        assert_eq!(mailer.sent().len(), 4);
        for name in files {
            assert!(!ws.statements.join(name).exists(), "{name} left behind");
        }
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn json_summary_lists_outcomes() {
    timeout(TEST_TIMEOUT, async {
        let ws = Workspace::new(&["STMT_1001.pdf", "STMT_9999.pdf"]).await;
        let app = ws.router(Arc::new(StubMailer::default())).await;

        let (status, json) = get_json(app, "/send-statements").await;

        assert_eq!(status, StatusCode::OK);
        assert!(json["run_id"].is_string());
        assert!(json["finished_at"].is_string());
        let outcomes = json["outcomes"].as_array().unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0]["file"], "STMT_1001.pdf");
        assert_eq!(outcomes[0]["status"], "sent");
        assert_eq!(outcomes[1]["file"], "STMT_9999.pdf");
        assert_eq!(outcomes[1]["status"], "no_email");
        assert_eq!(outcomes[1]["customer_id"], "9999");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn json_abort_carries_error_and_summary() {
    timeout(TEST_TIMEOUT, async {
        let ws = Workspace::new(&["STMT_1001.pdf"]).await;
        let dispatcher = StatementDispatcher::new(
            ws.dispatch_config(),
            Arc::new(UnreachableDirectory),
            Arc::new(StubMailer::default()),
        );
        let app = dispatch_routes(Arc::new(dispatcher));

        let (status, json) = get_json(app, "/send-statements").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json["error"].as_str().unwrap().contains("server not reachable"));
        assert_eq!(json["summary"]["outcomes"], serde_json::json!([]));
    })
    .await
    .expect("test timed out");
}
