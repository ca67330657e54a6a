//! 针对本地 mock 服务的端到端场景测试

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{Value, json};

use llm_loadgen::http_client::build_client;
use llm_loadgen::model::config::Config;
use llm_loadgen::recorder::{MemorySink, RecordSink, Recorder};
use llm_loadgen::runner::Runner;
use llm_loadgen::scenario::{Scenario, ScenarioContext};
use llm_loadgen::stats::StatsCollector;
use llm_loadgen::stream::StreamStatus;
use llm_loadgen::task::TaskState;
use llm_loadgen::user::{UserIdAllocator, VirtualUser};

#[derive(Clone, Default)]
struct MockState {
    polls: Arc<AtomicUsize>,
    last_image_chat: Arc<Mutex<Option<Value>>>,
}

fn sse_chunk(delta: &str, finish_reason: &str) -> String {
    let chunk = json!({"data": {"choices": [{"delta": delta, "finish_reason": finish_reason}]}});
    format!("data: {}\n\n", chunk)
}

/// 按给定分块依次写出的事件流响应，块之间稍作停顿
fn chunked_event_stream(chunks: Vec<String>) -> impl IntoResponse {
    let stream = futures::stream::iter(chunks).then(|chunk| async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok::<_, std::io::Error>(chunk)
    });
    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(stream),
    )
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn chat(headers: HeaderMap, Json(body): Json<Value>) -> impl IntoResponse {
    assert_eq!(body["stream"], json!(true));
    assert_eq!(
        headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()),
        Some("test-token")
    );
    let events = [
        r#"data: {"data":{"choices":[{"delta":""}]}}"#,
        r#"data: {"data":{"choices":[{"delta":"你"}]}}"#,
        r#"data: {"data":{"choices":[{"delta":"好","finish_reason":"stop"}]}}"#,
        "data: [DONE]",
    ];
    let body = events.map(|e| format!("{}\n\n", e)).concat();
    ([(header::CONTENT_TYPE, "text/event-stream")], body)
}

async fn chat_json() -> Json<Value> {
    Json(json!({"error": {"code": 1001, "message": "quota exceeded"}}))
}

async fn chat_image(State(state): State<MockState>, Json(body): Json<Value>) -> impl IntoResponse {
    *state.last_image_chat.lock() = Some(body);
    chunked_event_stream(vec![
        sse_chunk("![柴犬]", ""),
        sse_chunk("(https://img.example/1.png)", "stop"),
        "data: [DONE]\n\n".to_string(),
    ])
}

async fn chat_cut() -> impl IntoResponse {
    chunked_event_stream(vec![sse_chunk("半", ""), sse_chunk("句", "")])
}

async fn chat_split() -> impl IntoResponse {
    chunked_event_stream(vec![
        sse_chunk("完整", "stop"),
        "data: [DO".to_string(),
        "NE]\n\n".to_string(),
    ])
}

async fn submit(Json(body): Json<Value>) -> Json<Value> {
    assert_eq!(body["width"], json!(512));
    Json(json!({"info": {"task_id": "abc123"}}))
}

async fn poll(State(state): State<MockState>, Path(task_id): Path<String>) -> impl IntoResponse {
    if task_id != "abc123" {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "unknown task"})));
    }
    let n = state.polls.fetch_add(1, Ordering::SeqCst);
    let images = if n == 0 { json!([]) } else { json!(["img1"]) };
    (StatusCode::OK, Json(json!({"info": {"images": images}})))
}

async fn spawn_mock() -> SocketAddr {
    spawn_mock_with(MockState::default()).await
}

async fn spawn_mock_with(state: MockState) -> SocketAddr {
    let app = Router::new()
        .route("/", get(health))
        .route("/chat", post(chat))
        .route("/chat-json", post(chat_json))
        .route("/chat-image", post(chat_image))
        .route("/chat-cut", post(chat_cut))
        .route("/chat-split", post(chat_split))
        .route("/images", post(submit))
        .route("/images/{task_id}", get(poll))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn config_for(addr: SocketAddr) -> Config {
    let mut config = Config::default();
    config.host = format!("http://{}", addr);
    config.chat.path = "/chat".to_string();
    config.image_task.submit_path = "/images".to_string();
    config.image_task.poll_path = "/images/{task_id}".to_string();
    config
}

fn context(config: Config, sink: Arc<MemorySink>) -> ScenarioContext {
    let client = build_client(None, 5, Some(10), Some("test-token")).unwrap();
    let sinks: Vec<Arc<dyn RecordSink>> = vec![sink];
    ScenarioContext::new(client, Arc::new(config), Recorder::new(sinks))
}

#[tokio::test]
async fn test_health_check_records_plain_response() {
    let addr = spawn_mock().await;
    let sink = Arc::new(MemorySink::new());
    let ctx = context(config_for(addr), sink.clone());
    let ids = UserIdAllocator::new();
    let mut user = VirtualUser::new(&ids);

    Scenario::HealthCheck.run(&ctx, &mut user).await.unwrap();

    let records = sink.records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.method, "health_check");
    assert_eq!(record.user_id, 1);
    assert_eq!(record.status, Some(200));
    assert_eq!(record.body, Some(json!({"status": "ok"})));
    assert_eq!(record.stream_status, StreamStatus::NotStreamed);
    assert!(record.elapse_time_in_ms.is_some());
    assert!(record.first_char_arrival_time.is_none());
}

#[tokio::test]
async fn test_sense_chat_assembles_stream() {
    let addr = spawn_mock().await;
    let sink = Arc::new(MemorySink::new());
    let ctx = context(config_for(addr), sink.clone());
    let ids = UserIdAllocator::new();
    let mut user = VirtualUser::new(&ids);

    Scenario::SenseChat.run(&ctx, &mut user).await.unwrap();

    let records = sink.records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.method, "sense_chat");
    assert_eq!(record.prompt.as_deref(), Some("你是谁"));
    assert_eq!(record.res_message.as_deref(), Some("你好"));
    assert_eq!(record.finish_reason.as_deref(), Some("stop"));
    assert_eq!(record.stream_status, StreamStatus::Completed);
    assert!(record.body.is_none());

    let first = record.first_char_arrival_time.unwrap();
    let end = record.request_end.unwrap();
    assert!(record.request_start <= first);
    assert!(first <= end);
    assert!(record.first_char_delay_in_ms.unwrap() <= record.elapse_time_in_ms.unwrap());
}

async fn run_chat(config: Config, scenario: Scenario) -> llm_loadgen::recorder::MetricsRecord {
    let sink = Arc::new(MemorySink::new());
    let ctx = context(config, sink.clone());
    let ids = UserIdAllocator::new();
    let mut user = VirtualUser::new(&ids);

    scenario.run(&ctx, &mut user).await.unwrap();

    let mut records = sink.records();
    assert_eq!(records.len(), 1);
    records.remove(0)
}

#[tokio::test]
async fn test_non_event_stream_chat_is_read_whole() {
    let addr = spawn_mock().await;
    let mut config = config_for(addr);
    config.chat.path = "/chat-json".to_string();

    let record = run_chat(config, Scenario::SenseChat).await;

    assert_eq!(record.method, "sense_chat");
    assert_eq!(record.status, Some(200));
    assert_eq!(record.stream_status, StreamStatus::NotStreamed);
    assert_eq!(
        record.body,
        Some(json!({"error": {"code": 1001, "message": "quota exceeded"}}))
    );
    assert!(record.first_char_arrival_time.is_none());
    assert!(record.first_char_delay_in_ms.is_none());
    assert!(record.elapse_time_in_ms.is_some());
    assert!(record.request_end.is_some());
    assert!(record.decode_failures.is_none());
}

#[tokio::test]
async fn test_chat_with_image_uses_its_own_config() {
    let state = MockState::default();
    let addr = spawn_mock_with(state.clone()).await;
    let mut config = config_for(addr);
    config.chat_with_image.path = "/chat-image".to_string();
    config
        .chat_with_image
        .extra_body
        .insert("plugins".to_string(), json!({"image_generation": {"enabled": true}}));

    let record = run_chat(config, Scenario::ChatWithImage).await;

    assert_eq!(record.method, "chat_with_image");
    assert_eq!(record.prompt.as_deref(), Some("画一只在雪地里奔跑的柴犬"));
    assert_eq!(
        record.res_message.as_deref(),
        Some("![柴犬](https://img.example/1.png)")
    );
    assert_eq!(record.finish_reason.as_deref(), Some("stop"));
    assert_eq!(record.stream_status, StreamStatus::Completed);
    assert_eq!(record.decode_failures, Some(0));

    let sent = state.last_image_chat.lock().clone().unwrap();
    assert_eq!(sent["stream"], json!(true));
    assert_eq!(sent["messages"][0]["content"], json!("画一只在雪地里奔跑的柴犬"));
    assert_eq!(sent["plugins"], json!({"image_generation": {"enabled": true}}));
}

#[tokio::test]
async fn test_stream_closed_before_sentinel_is_interrupted() {
    let addr = spawn_mock().await;
    let mut config = config_for(addr);
    config.chat.path = "/chat-cut".to_string();

    let record = run_chat(config, Scenario::SenseChat).await;

    assert_eq!(record.stream_status, StreamStatus::Interrupted);
    assert_eq!(record.res_message.as_deref(), Some("半句"));
    assert!(record.first_char_arrival_time.is_some());
    assert!(record.request_end.is_none());
    assert!(record.elapse_time_in_ms.is_none());
}

#[tokio::test]
async fn test_sentinel_split_across_writes() {
    let addr = spawn_mock().await;
    let mut config = config_for(addr);
    config.chat.path = "/chat-split".to_string();

    let record = run_chat(config, Scenario::SenseChat).await;

    assert_eq!(record.stream_status, StreamStatus::Completed);
    assert_eq!(record.res_message.as_deref(), Some("完整"));
    assert!(record.elapse_time_in_ms.unwrap() >= record.first_char_delay_in_ms.unwrap());
}

#[tokio::test]
async fn test_image_task_lifecycle() {
    let addr = spawn_mock().await;
    let sink = Arc::new(MemorySink::new());
    let ctx = context(config_for(addr), sink.clone());
    let ids = UserIdAllocator::new();
    let mut user = VirtualUser::new(&ids);

    assert_eq!(user.task().state(), &TaskState::Idle);

    // 提交
    Scenario::ImageTask.run(&ctx, &mut user).await.unwrap();
    assert_eq!(user.pending_task_id(), Some("abc123"));

    // 第一次轮询未完成
    Scenario::ImageTask.run(&ctx, &mut user).await.unwrap();
    assert_eq!(user.pending_task_id(), Some("abc123"));

    // 第二次轮询完成
    Scenario::ImageTask.run(&ctx, &mut user).await.unwrap();
    assert_eq!(user.task().state(), &TaskState::Idle);

    let records = sink.records();
    let methods: Vec<&str> = records.iter().map(|r| r.method.as_str()).collect();
    assert_eq!(
        methods,
        vec!["image_task_submit", "image_task_poll", "image_task_poll"]
    );
    assert_eq!(records[0].task_id.as_deref(), Some("abc123"));
    assert!(records[1].job_elapsed_in_ms.is_none());
    assert!(records[2].job_elapsed_in_ms.unwrap() >= 0);
}

#[tokio::test]
async fn test_transport_failure_is_not_recorded() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let sink = Arc::new(MemorySink::new());
    let ctx = context(config_for(addr), sink.clone());
    let ids = UserIdAllocator::new();
    let mut user = VirtualUser::new(&ids);

    let err = Scenario::HealthCheck.run(&ctx, &mut user).await.unwrap_err();
    assert_eq!(err.method, "health_check");
    assert!(sink.records().is_empty());
}

#[tokio::test]
async fn test_runner_short_run() {
    let addr = spawn_mock().await;
    let mut config = config_for(addr);
    config.users = 3;
    config.spawn_rate = 20.0;
    config.run_time_secs = Some(1);
    config.wait_max_secs = 0.05;
    config.tags = vec!["health_check".to_string(), "sense_chat".to_string()];

    let sink = Arc::new(MemorySink::new());
    let stats = Arc::new(StatsCollector::new().unwrap());
    let client = build_client(None, 5, Some(10), Some("test-token")).unwrap();
    let sinks: Vec<Arc<dyn RecordSink>> = vec![sink.clone(), stats.clone()];
    let ctx = ScenarioContext::new(client, Arc::new(config), Recorder::new(sinks));

    let runner = Runner::new(ctx, stats).unwrap();
    assert_eq!(
        runner.scenarios(),
        vec![Scenario::HealthCheck, Scenario::SenseChat]
    );

    let summary = runner.run().await;
    assert!(summary.total_requests > 0);
    assert_eq!(summary.total_failures, 0);
    assert_eq!(summary.total_requests as usize, sink.records().len());

    let mut user_ids: Vec<u64> = sink.records().iter().map(|r| r.user_id).collect();
    user_ids.sort_unstable();
    user_ids.dedup();
    assert!(user_ids.iter().all(|id| (1..=3).contains(id)));
}
