//! End-to-end engine tests against loopback HTTP servers
//!
//! Each scenario drives the real engine (factory, pool, workers,
//! aggregation inputs) against an axum server bound to an ephemeral
//! port, so the full materialize → send → classify path is exercised.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, Uri};
use axum::routing::{any, get, post};
use axum::Router;
use dodo_core::progress::{AcceptDefault, Confirm, NoopProgress, ProgressListener};
use dodo_core::{builtin_registry, ClientPool, DodoError, KeyValueSpec, LoadEngine, Outcome, RequestPlan};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

async fn spawn_server(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn run_plan(
    plan: RequestPlan,
    token: CancellationToken,
) -> dodo_core::Result<Vec<Outcome>> {
    let registry = Arc::new(builtin_registry());
    let compiled = Arc::new(plan.compile(&registry).unwrap());
    let pool = Arc::new(
        ClientPool::build(&compiled, Arc::new(NoopProgress), &AcceptDefault).await.unwrap(),
    );
    LoadEngine::new(compiled, pool, registry).run(Arc::new(NoopProgress), token).await
}

#[derive(Default)]
struct CountingProgress {
    increments: AtomicU64,
}

impl ProgressListener for CountingProgress {
    fn increment(&self, n: u64) {
        self.increments.fetch_add(n, Ordering::Relaxed);
    }
}

struct ScriptedConfirm {
    answer: bool,
    seen_defaults: Mutex<Vec<bool>>,
}

impl ScriptedConfirm {
    fn new(answer: bool) -> Self {
        Self {
            answer,
            seen_defaults: Mutex::new(Vec::new()),
        }
    }
}

impl Confirm for ScriptedConfirm {
    fn confirm(&self, _message: &str, default_answer: bool) -> bool {
        self.seen_defaults.lock().unwrap().push(default_answer);
        self.answer
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn direct_fixed_budget_yields_exactly_the_budget() {
    let addr = spawn_server(Router::new().route("/ok", get(|| async { "ok" }))).await;

    let mut plan = RequestPlan::new(&format!("http://{addr}/ok")).unwrap();
    plan.dodo_count = 4;
    plan.request_count = 100;
    plan.timeout = Duration::from_secs(2);

    let outcomes = run_plan(plan, CancellationToken::new()).await.unwrap();

    assert_eq!(outcomes.len(), 100);
    for outcome in &outcomes {
        assert_eq!(outcome.label, "200");
        assert!(outcome.elapsed <= Duration::from_secs(2));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn progress_receives_every_increment() {
    let addr = spawn_server(Router::new().route("/ok", get(|| async { "ok" }))).await;

    let mut plan = RequestPlan::new(&format!("http://{addr}/ok")).unwrap();
    plan.dodo_count = 3;
    plan.request_count = 50;

    let registry = Arc::new(builtin_registry());
    let compiled = Arc::new(plan.compile(&registry).unwrap());
    let pool = Arc::new(
        ClientPool::build(&compiled, Arc::new(NoopProgress), &AcceptDefault).await.unwrap(),
    );
    let progress = Arc::new(CountingProgress::default());
    LoadEngine::new(compiled, pool, registry)
        .run(progress.clone(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(progress.increments.load(Ordering::Relaxed), 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn slow_server_labels_every_outcome_timeout() {
    let addr = spawn_server(Router::new().route(
        "/slow",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            "late"
        }),
    ))
    .await;

    let mut plan = RequestPlan::new(&format!("http://{addr}/slow")).unwrap();
    plan.dodo_count = 10;
    plan.request_count = 20;
    plan.timeout = Duration::from_millis(200);

    let outcomes = run_plan(plan, CancellationToken::new()).await.unwrap();

    assert_eq!(outcomes.len(), 20);
    for outcome in &outcomes {
        assert_eq!(outcome.label, "timeout");
        assert!(outcome.elapsed >= Duration::from_millis(190), "elapsed {:?}", outcome.elapsed);
        assert!(outcome.elapsed <= Duration::from_millis(1500), "elapsed {:?}", outcome.elapsed);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duration_bounded_open_loop_returns_on_deadline() {
    let addr = spawn_server(Router::new().route("/ok", get(|| async { "ok" }))).await;

    let mut plan = RequestPlan::new(&format!("http://{addr}/ok")).unwrap();
    plan.dodo_count = 2;
    plan.request_count = 0;
    plan.duration = Some(Duration::from_secs(1));
    plan.timeout = Duration::from_millis(500);

    let started = Instant::now();
    let outcomes = run_plan(plan, CancellationToken::new()).await.unwrap();
    let wall = started.elapsed();

    assert!(wall >= Duration::from_secs(1), "returned early: {wall:?}");
    assert!(wall <= Duration::from_millis(2000), "returned late: {wall:?}");
    assert!(!outcomes.is_empty());
    for outcome in &outcomes {
        assert_eq!(outcome.label, "200");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn multi_value_bodies_are_reproducible_for_a_fixed_seed() {
    let log = Arc::new(Mutex::new(Vec::<String>::new()));
    let handler = |State(log): State<Arc<Mutex<Vec<String>>>>, body: String| async move {
        log.lock().unwrap().push(body);
        "ok"
    };
    let addr_a =
        spawn_server(Router::new().route("/echo", post(handler)).with_state(log.clone())).await;

    let make_plan = |addr: SocketAddr| {
        let mut plan = RequestPlan::new(&format!("http://{addr}/echo")).unwrap();
        plan.method = reqwest::Method::POST;
        plan.dodo_count = 1;
        plan.request_count = 300;
        plan.seed = 1234;
        plan.body = vec!["a".into(), "b".into(), "c".into()];
        plan
    };

    run_plan(make_plan(addr_a), CancellationToken::new()).await.unwrap();
    let first: Vec<String> = std::mem::take(&mut *log.lock().unwrap());

    run_plan(make_plan(addr_a), CancellationToken::new()).await.unwrap();
    let second: Vec<String> = std::mem::take(&mut *log.lock().unwrap());

    assert_eq!(first.len(), 300);
    assert_eq!(first, second, "same seed must draw the same body sequence");
    for choice in ["a", "b", "c"] {
        assert!(first.iter().any(|b| b == choice), "`{choice}` never drawn");
    }
    assert!(first.iter().all(|b| ["a", "b", "c"].contains(&b.as_str())));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn multi_value_params_stay_within_the_spec_set() {
    let log = Arc::new(Mutex::new(Vec::<String>::new()));
    let handler = |State(log): State<Arc<Mutex<Vec<String>>>>, uri: Uri| async move {
        log.lock().unwrap().push(uri.query().unwrap_or_default().to_string());
        "ok"
    };
    let addr =
        spawn_server(Router::new().route("/q", get(handler)).with_state(log.clone())).await;

    let mut plan = RequestPlan::new(&format!("http://{addr}/q")).unwrap();
    plan.dodo_count = 2;
    plan.request_count = 50;
    plan.params = vec![KeyValueSpec::new("q", vec!["x".into(), "y".into()])];

    run_plan(plan, CancellationToken::new()).await.unwrap();

    let queries = log.lock().unwrap();
    assert_eq!(queries.len(), 50);
    assert!(queries.iter().all(|q| q == "q=x" || q == "q=y"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_request_with_many_workers_issues_exactly_one() {
    let hits = Arc::new(AtomicU64::new(0));
    let handler = |State(hits): State<Arc<AtomicU64>>| async move {
        hits.fetch_add(1, Ordering::Relaxed);
        "ok"
    };
    let addr =
        spawn_server(Router::new().route("/one", get(handler)).with_state(hits.clone())).await;

    let mut plan = RequestPlan::new(&format!("http://{addr}/one")).unwrap();
    plan.dodo_count = 4;
    plan.request_count = 1;

    let outcomes = run_plan(plan, CancellationToken::new()).await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(hits.load(Ordering::Relaxed), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn more_workers_than_budget_issue_exactly_the_budget() {
    let hits = Arc::new(AtomicU64::new(0));
    let handler = |State(hits): State<Arc<AtomicU64>>| async move {
        hits.fetch_add(1, Ordering::Relaxed);
        "ok"
    };
    let addr =
        spawn_server(Router::new().route("/few", get(handler)).with_state(hits.clone())).await;

    let mut plan = RequestPlan::new(&format!("http://{addr}/few")).unwrap();
    plan.dodo_count = 8;
    plan.request_count = 3;

    let outcomes = run_plan(plan, CancellationToken::new()).await.unwrap();
    assert_eq!(outcomes.len(), 3);
    assert_eq!(hits.load(Ordering::Relaxed), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_mid_flight_stops_promptly_and_keeps_partial_outcomes() {
    let addr = spawn_server(Router::new().route(
        "/ok",
        get(|| async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            "ok"
        }),
    ))
    .await;

    let mut plan = RequestPlan::new(&format!("http://{addr}/ok")).unwrap();
    plan.dodo_count = 4;
    plan.request_count = 10_000;
    plan.timeout = Duration::from_secs(2);

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let outcomes = run_plan(plan, token).await.unwrap();
    let wall = started.elapsed();

    assert!(!outcomes.is_empty());
    assert!(outcomes.len() < 10_000);
    // Cancellation must land within one request-timeout of being raised.
    assert!(wall <= Duration::from_millis(200) + Duration::from_secs(2) + Duration::from_millis(500));
    assert!(outcomes.iter().all(|o| o.label == "200"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_before_any_outcome_returns_interrupted() {
    let addr = spawn_server(Router::new().route("/ok", get(|| async { "ok" }))).await;

    let mut plan = RequestPlan::new(&format!("http://{addr}/ok")).unwrap();
    plan.request_count = 10;

    let token = CancellationToken::new();
    token.cancel();

    let err = run_plan(plan, token).await.unwrap_err();
    assert!(matches!(err, DodoError::Interrupted));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreachable_target_is_labelled_dial_error() {
    // Port 1 on loopback refuses connections immediately.
    let mut plan = RequestPlan::new("http://127.0.0.1:1/nope").unwrap();
    plan.request_count = 5;
    plan.timeout = Duration::from_secs(2);

    let outcomes = run_plan(plan, CancellationToken::new()).await.unwrap();
    assert_eq!(outcomes.len(), 5);
    assert!(outcomes.iter().all(|o| o.label == "dial error"), "{outcomes:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn render_failures_are_labelled_template_error() {
    let addr = spawn_server(Router::new().route("/ok", get(|| async { "ok" }))).await;

    let mut plan = RequestPlan::new(&format!("http://{addr}/ok")).unwrap();
    plan.request_count = 3;
    // Compiles (arguments are free-form) but fails at render time; the
    // field renders empty and the request is still issued.
    plan.params = vec![KeyValueSpec::new("n", vec!["{{ rand_str nope }}".into()])];

    let outcomes = run_plan(plan, CancellationToken::new()).await.unwrap();
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|o| o.label == "template error"));
}

#[derive(Debug, Clone, Default)]
struct Captured {
    method: String,
    host: String,
    content_type: String,
    body: Vec<u8>,
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn materialized_request_survives_the_wire_byte_exactly() {
    let seen = Arc::new(Mutex::new(Captured::default()));
    let handler = |State(seen): State<Arc<Mutex<Captured>>>,
                   method: Method,
                   headers: HeaderMap,
                   body: Bytes| async move {
        let mut captured = seen.lock().unwrap();
        captured.method = method.to_string();
        captured.host =
            headers.get("host").map(|v| v.to_str().unwrap().to_string()).unwrap_or_default();
        captured.content_type = headers
            .get("content-type")
            .map(|v| v.to_str().unwrap().to_string())
            .unwrap_or_default();
        captured.body = body.to_vec();
        "ok"
    };
    let addr =
        spawn_server(Router::new().route("/up", any(handler)).with_state(seen.clone())).await;

    let mut plan = RequestPlan::new(&format!("http://{addr}/up")).unwrap();
    plan.method = reqwest::Method::POST;
    plan.request_count = 1;
    plan.body = vec!["{{ multipart user=alice role=admin }}".into()];

    let outcomes = run_plan(plan, CancellationToken::new()).await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].label, "200");

    let captured = seen.lock().unwrap().clone();
    assert_eq!(captured.method, "POST");
    assert_eq!(captured.host, addr.to_string());

    let boundary = captured
        .content_type
        .strip_prefix("multipart/form-data; boundary=")
        .expect("multipart content type must be synthesized")
        .to_string();
    let body = String::from_utf8(captured.body).unwrap();
    assert!(body.contains(&format!("--{boundary}\r\n")));
    assert!(body.contains("name=\"user\"\r\n\r\nalice"));
    assert!(body.ends_with(&format!("--{boundary}--\r\n")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn screening_with_no_survivors_defaults_to_no_and_interrupts() {
    let mut plan = RequestPlan::new("http://127.0.0.1:1/x").unwrap();
    plan.request_count = 10;
    plan.timeout = Duration::from_secs(2);
    // Loopback discard ports: both probes fail with a refused connection.
    plan.proxies = vec![
        "http://127.0.0.1:9".parse().unwrap(),
        "http://127.0.0.1:10".parse().unwrap(),
    ];

    let registry = Arc::new(builtin_registry());
    let compiled = Arc::new(plan.compile(&registry).unwrap());

    let confirm = ScriptedConfirm::new(false);
    let err = ClientPool::build(&compiled, Arc::new(NoopProgress), &confirm).await.unwrap_err();

    assert!(matches!(err, DodoError::Interrupted));
    let defaults = confirm.seen_defaults.lock().unwrap();
    assert_eq!(*defaults, vec![false], "prompt must run once with default no");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn screening_accepted_with_no_survivors_falls_back_to_direct() {
    let mut plan = RequestPlan::new("http://127.0.0.1:1/x").unwrap();
    plan.request_count = 10;
    plan.timeout = Duration::from_secs(2);
    plan.proxies = vec!["http://127.0.0.1:9".parse().unwrap()];

    let registry = Arc::new(builtin_registry());
    let compiled = Arc::new(plan.compile(&registry).unwrap());

    let confirm = ScriptedConfirm::new(true);
    let pool = ClientPool::build(&compiled, Arc::new(NoopProgress), &confirm).await.unwrap();

    assert_eq!(pool.len(), 1, "direct fallback client expected");
}
