//! 聊天增量解析
//!
//! 把数据帧的 JSON 文本解析为 [`ChatDelta`]，并提供 finish_reason 的先到先得锁存。

use serde::Deserialize;

/// 流式响应块 `{"data": {"choices": [...]}}`
#[derive(Debug, Deserialize)]
struct ChunkEnvelope {
    #[serde(default)]
    data: Option<ChunkData>,
}

#[derive(Debug, Deserialize)]
struct ChunkData {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<DeltaField>,
    #[serde(default)]
    finish_reason: Option<String>,
}

/// delta 既可能是字符串，也可能是 `{"content": "..."}` 对象
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DeltaField {
    Text(String),
    Message {
        #[serde(default)]
        content: Option<String>,
    },
}

impl DeltaField {
    fn into_text(self) -> String {
        match self {
            DeltaField::Text(text) => text,
            DeltaField::Message { content } => content.unwrap_or_default(),
        }
    }
}

/// 单帧提取结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatDelta {
    /// 增量文本，字段缺失时为空串
    pub text: String,
    /// 非空的结束原因
    pub finish_reason: Option<String>,
}

impl ChatDelta {
    /// 增量是否包含非空白内容
    pub fn has_content(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

/// 帧载荷解码错误
#[derive(Debug)]
pub enum DecodeError {
    /// 不是合法的 JSON
    InvalidJson(serde_json::Error),
    /// JSON 合法，但字段类型与预期不符
    Schema(serde_json::Error),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::InvalidJson(e) => write!(f, "invalid JSON payload: {}", e),
            DecodeError::Schema(e) => write!(f, "unexpected chunk shape: {}", e),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecodeError::InvalidJson(e) | DecodeError::Schema(e) => Some(e),
        }
    }
}

/// 从数据帧文本中提取第一个 choice 的增量与结束原因
///
/// 任何层级的字段缺失都视为空值；只有 JSON 本身非法或字段类型错误才返回错误。
pub fn extract(payload: &str) -> Result<ChatDelta, DecodeError> {
    let value: serde_json::Value =
        serde_json::from_str(payload).map_err(DecodeError::InvalidJson)?;
    let envelope: ChunkEnvelope = serde_json::from_value(value).map_err(DecodeError::Schema)?;

    let Some(choice) = envelope
        .data
        .and_then(|data| data.choices.into_iter().next())
    else {
        return Ok(ChatDelta::default());
    };

    Ok(ChatDelta {
        text: choice.delta.map(DeltaField::into_text).unwrap_or_default(),
        finish_reason: choice.finish_reason.filter(|r| !r.trim().is_empty()),
    })
}

/// finish_reason 锁存器
///
/// 只保留整个流中第一个非空的结束原因，之后的值全部忽略。
#[derive(Debug, Clone, Default)]
pub struct FinishReasonLatch(Option<String>);

impl FinishReasonLatch {
    /// 提交一个候选值，返回本次是否被锁存
    pub fn offer(&mut self, reason: Option<&str>) -> bool {
        match reason {
            Some(r) if self.0.is_none() && !r.trim().is_empty() => {
                self.0 = Some(r.to_string());
                true
            }
            _ => false,
        }
    }

    pub fn get(&self) -> Option<&str> {
        self.0.as_deref()
    }

    pub fn into_inner(self) -> Option<String> {
        self.0
    }
}
