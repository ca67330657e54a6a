//! 流式响应消费
//!
//! 逐块拉取响应体，记录首字到达与流结束时间，拼接完整回复文本。

use std::collections::BTreeMap;
use std::fmt::Display;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use http::HeaderMap;
use http::header::CONTENT_TYPE;
use serde::Serialize;

use crate::common::{Stamp, log_preview};

use super::delta::{self, ChatDelta, FinishReasonLatch};
use super::frame::{Frame, FrameDecoder};

/// 事件流的 Content-Type
const EVENT_STREAM_MIME: &str = "text/event-stream";

/// 流的结束状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    /// 收到终止哨兵
    Completed,
    /// 连接在哨兵到达前关闭或读取出错
    Interrupted,
    /// 非事件流响应，整体按 JSON 解析
    NotStreamed,
}

/// 一次完整消费的结果
#[derive(Debug, Clone)]
pub struct StreamOutcome {
    pub status_code: u16,
    pub response_headers: BTreeMap<String, String>,
    pub first_token_time: Option<Stamp>,
    /// 事件流：哨兵到达时间；非事件流：响应体读取完毕的时间
    pub stream_end_time: Option<Stamp>,
    pub finish_reason: Option<String>,
    pub assembled_text: String,
    /// 非事件流响应的 JSON 体
    pub body: Option<serde_json::Value>,
    pub stream_status: StreamStatus,
    /// 解码失败被跳过的帧数
    pub decode_failures: usize,
}

/// 事件流累加器
///
/// 纯状态机，由调用方提供每一帧的到达时间，便于测试。
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    first_token_time: Option<Stamp>,
    stream_end_time: Option<Stamp>,
    finish_reason: FinishReasonLatch,
    text: String,
    decode_failures: usize,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 是否已收到终止哨兵
    pub fn is_finished(&self) -> bool {
        self.stream_end_time.is_some()
    }

    pub fn first_token_time(&self) -> Option<Stamp> {
        self.first_token_time
    }

    /// 处理一帧，返回是否应停止拉取
    pub fn on_frame(&mut self, frame: Frame, now: Stamp) -> bool {
        if self.is_finished() {
            return true;
        }
        match frame {
            Frame::Blank => {}
            Frame::Terminal => {
                self.stream_end_time = Some(now);
            }
            Frame::Data(payload) => match delta::extract(&payload) {
                Ok(delta) => self.on_delta(delta, now),
                Err(e) => {
                    self.decode_failures += 1;
                    tracing::warn!(
                        error = %e,
                        payload = %log_preview(&payload, 256),
                        "跳过无法解析的事件流帧"
                    );
                }
            },
        }
        self.is_finished()
    }

    /// 处理一个已解析的增量
    ///
    /// 首个非空白增量之前的空白增量整体丢弃；首字之后所有增量（包括空串）按序拼接。
    pub fn on_delta(&mut self, delta: ChatDelta, now: Stamp) {
        self.finish_reason.offer(delta.finish_reason.as_deref());

        if self.first_token_time.is_none() {
            if !delta.has_content() {
                return;
            }
            self.first_token_time = Some(now);
        }
        self.text.push_str(&delta.text);
    }

    /// 收尾，生成最终结果
    pub fn finish(self, status_code: u16, response_headers: BTreeMap<String, String>) -> StreamOutcome {
        let stream_status = if self.is_finished() {
            StreamStatus::Completed
        } else {
            StreamStatus::Interrupted
        };
        StreamOutcome {
            status_code,
            response_headers,
            first_token_time: self.first_token_time,
            stream_end_time: self.stream_end_time,
            finish_reason: self.finish_reason.into_inner(),
            assembled_text: self.text,
            body: None,
            stream_status,
            decode_failures: self.decode_failures,
        }
    }
}

/// Content-Type 是否声明为事件流
pub fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_ascii_lowercase().starts_with(EVENT_STREAM_MIME))
        .unwrap_or(false)
}

/// 把响应头转换为有序的字符串映射（非 UTF-8 值做有损转换，同名头以逗号合并）
pub fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut map: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        map.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    map
}

/// 把响应体解析为 JSON；空体返回 None，非 JSON 文本保留为 JSON 字符串
pub fn parse_body(bytes: &[u8]) -> Option<serde_json::Value> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    match serde_json::from_slice(bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            let text = String::from_utf8_lossy(bytes).into_owned();
            tracing::warn!(error = %e, body = %log_preview(&text, 256), "响应体不是合法 JSON");
            Some(serde_json::Value::String(text))
        }
    }
}

/// 读取完整响应体
///
/// 返回 (JSON 体, 读取完成时间)；读取失败时两者都为 None。
pub async fn read_body(response: reqwest::Response) -> (Option<serde_json::Value>, Option<Stamp>) {
    match response.bytes().await {
        Ok(bytes) => {
            let end = Stamp::now();
            (parse_body(&bytes), Some(end))
        }
        Err(e) => {
            tracing::warn!(error = %e, "读取响应体失败");
            (None, None)
        }
    }
}

/// 消费一个已经拿到响应头的 HTTP 响应
///
/// 事件流逐帧处理；否则整体按 JSON 读取，只记录总耗时。
pub async fn consume_response(response: reqwest::Response) -> StreamOutcome {
    let status_code = response.status().as_u16();
    let response_headers = header_map(response.headers());

    if !is_event_stream(response.headers()) {
        let (body, end) = read_body(response).await;
        return StreamOutcome {
            status_code,
            response_headers,
            first_token_time: None,
            stream_end_time: end,
            finish_reason: None,
            assembled_text: String::new(),
            body,
            stream_status: StreamStatus::NotStreamed,
            decode_failures: 0,
        };
    }

    consume_event_stream(status_code, response_headers, response.bytes_stream()).await
}

/// 驱动帧解码器与累加器消费事件流字节流
///
/// 见到终止哨兵立即停止拉取；传输关闭或出错时带着已拼接的部分文本结束。
pub async fn consume_event_stream<S, E>(
    status_code: u16,
    response_headers: BTreeMap<String, String>,
    body: S,
) -> StreamOutcome
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    let mut body = std::pin::pin!(body);
    let mut decoder = FrameDecoder::new();
    let mut acc = StreamAccumulator::new();

    'pull: loop {
        let (frames, closed) = match body.next().await {
            Some(Ok(chunk)) => (decoder.push(&chunk), false),
            Some(Err(e)) => {
                tracing::warn!(error = %e, "读取事件流出错，提前结束消费");
                break 'pull;
            }
            None => (decoder.finish(), true),
        };
        for frame in frames {
            if acc.on_frame(frame, Stamp::now()) {
                break 'pull;
            }
        }
        if closed {
            break;
        }
    }

    if !acc.is_finished() {
        tracing::warn!(
            status_code,
            text_len = acc.text.len(),
            "事件流在终止哨兵之前关闭"
        );
    }
    acc.finish(status_code, response_headers)
}
