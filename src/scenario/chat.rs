//! 流式聊天场景
//!
//! 普通聊天与触发图片生成的聊天共用同一套消费逻辑，只是请求配置不同。

use serde_json::json;

use crate::common::Stamp;
use crate::model::config::ChatConfig;
use crate::recorder::MetricsRecord;
use crate::stream::{StreamStatus, consume_response};
use crate::user::VirtualUser;

use super::{ScenarioContext, TransportFailure};

pub const SENSE_CHAT: &str = "sense_chat";
pub const CHAT_WITH_IMAGE: &str = "chat_with_image";

/// 构建流式聊天请求体，`extraBody` 中的字段覆盖同名字段
pub fn request_body(cfg: &ChatConfig) -> serde_json::Value {
    let mut body = json!({
        "model": cfg.model,
        "messages": [
            {"role": "user", "content": cfg.prompt}
        ],
        "stream": true
    });

    if let Some(map) = body.as_object_mut() {
        if let Some(t) = cfg.temperature {
            map.insert("temperature".into(), json!(t));
        }
        if let Some(p) = cfg.top_p {
            map.insert("top_p".into(), json!(p));
        }
        if let Some(n) = cfg.max_new_tokens {
            map.insert("max_new_tokens".into(), json!(n));
        }
        for (key, value) in &cfg.extra_body {
            map.insert(key.clone(), value.clone());
        }
    }
    body
}

pub async fn run(
    ctx: &ScenarioContext,
    user: &mut VirtualUser,
    cfg: &ChatConfig,
    method: &'static str,
) -> Result<(), TransportFailure> {
    let body = request_body(cfg);

    let request_start = Stamp::now();
    let response = ctx
        .client
        .post(ctx.config.url(&cfg.path))
        .json(&body)
        .send()
        .await
        .map_err(|e| TransportFailure::new(method, e))?;

    let outcome = consume_response(response).await;
    match outcome.stream_status {
        StreamStatus::Interrupted => tracing::warn!(
            user_id = user.id(),
            method,
            status = outcome.status_code,
            "流式响应未收到终止标记"
        ),
        StreamStatus::NotStreamed => tracing::info!(
            user_id = user.id(),
            method,
            status = outcome.status_code,
            "响应不是事件流，按 JSON 整体读取"
        ),
        StreamStatus::Completed => {}
    }

    ctx.recorder.record(
        MetricsRecord::new(method, user.id(), request_start)
            .with_prompt(cfg.prompt.as_str())
            .with_stream_outcome(outcome),
    );
    Ok(())
}
