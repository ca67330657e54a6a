//! 单次调用的指标记录

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::common::Stamp;
use crate::stream::{StreamOutcome, StreamStatus};

/// 指标记录
///
/// 每次场景调用产出一条，交给记录汇后即丢弃。字段名沿用压测报表中的既有键名。
#[derive(Debug, Clone, Serialize)]
pub struct MetricsRecord {
    pub request_id: String,
    pub method: String,
    pub prompt: Option<String>,
    pub user_id: u64,
    pub request_start: DateTime<Utc>,
    pub request_end: Option<DateTime<Utc>>,
    pub elapse_time_in_ms: Option<i64>,
    pub first_char_arrival_time: Option<DateTime<Utc>>,
    pub first_char_delay_in_ms: Option<i64>,
    pub status: Option<u16>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
    pub finish_reason: Option<String>,
    pub res_message: Option<String>,
    pub stream_status: StreamStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// 异步任务从提交到完成的跨周期耗时
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_elapsed_in_ms: Option<i64>,
    /// 事件流中解码失败被跳过的帧数，非流式响应不输出
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decode_failures: Option<usize>,
    #[serde(skip)]
    started: Stamp,
}

impl MetricsRecord {
    /// 创建只含调用标识的空记录
    pub fn new(method: impl Into<String>, user_id: u64, request_start: Stamp) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            method: method.into(),
            prompt: None,
            user_id,
            request_start: request_start.wall,
            request_end: None,
            elapse_time_in_ms: None,
            first_char_arrival_time: None,
            first_char_delay_in_ms: None,
            status: None,
            headers: BTreeMap::new(),
            body: None,
            finish_reason: None,
            res_message: None,
            stream_status: StreamStatus::NotStreamed,
            task_id: None,
            job_elapsed_in_ms: None,
            decode_failures: None,
            started: request_start,
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    /// 填入普通（非流式）响应
    pub fn with_response(
        mut self,
        status: u16,
        headers: BTreeMap<String, String>,
        body: Option<serde_json::Value>,
        request_end: Option<Stamp>,
    ) -> Self {
        self.status = Some(status);
        self.headers = headers;
        self.body = body;
        self.request_end = request_end.map(|t| t.wall);
        self.elapse_time_in_ms = self.millis_until(request_end);
        self.stream_status = StreamStatus::NotStreamed;
        self
    }

    /// 填入流式消费结果
    ///
    /// 只有收到终止哨兵（或非事件流的响应体读取完毕）时才有总耗时。
    pub fn with_stream_outcome(mut self, outcome: StreamOutcome) -> Self {
        self.status = Some(outcome.status_code);
        self.headers = outcome.response_headers;
        self.body = outcome.body;
        self.request_end = outcome.stream_end_time.map(|t| t.wall);
        self.elapse_time_in_ms = self.millis_until(outcome.stream_end_time);
        self.first_char_arrival_time = outcome.first_token_time.map(|t| t.wall);
        self.first_char_delay_in_ms = self.millis_until(outcome.first_token_time);
        self.finish_reason = outcome.finish_reason;
        self.res_message = Some(outcome.assembled_text);
        self.stream_status = outcome.stream_status;
        if outcome.stream_status != StreamStatus::NotStreamed {
            self.decode_failures = Some(outcome.decode_failures);
        }
        self
    }

    /// 从调用开始到给定时间点的耗时（单调时钟）
    fn millis_until(&self, end: Option<Stamp>) -> Option<i64> {
        end.map(|end| end.millis_since(&self.started))
    }

    pub fn with_task(mut self, task_id: impl Into<String>, job_elapsed_in_ms: Option<i64>) -> Self {
        self.task_id = Some(task_id.into());
        self.job_elapsed_in_ms = job_elapsed_in_ms;
        self
    }

    /// 状态码是否为 2xx
    pub fn is_success(&self) -> bool {
        matches!(self.status, Some(200..=299))
    }
}
