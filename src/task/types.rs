//! 图片生成异步任务的请求 / 响应类型

use serde::{Deserialize, Serialize};

/// 提交任务请求体
#[derive(Debug, Clone, Serialize)]
pub struct SubmitRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub width: u32,
    pub height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<&'a str>,
}

/// 提交任务响应 `{"info": {"task_id": "..."}}`
#[derive(Debug, Default, Deserialize)]
pub struct SubmitResponse {
    #[serde(default)]
    pub info: Option<SubmitInfo>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SubmitInfo {
    #[serde(default)]
    pub task_id: Option<String>,
}

impl SubmitResponse {
    /// 非空的任务 ID
    pub fn task_id(&self) -> Option<&str> {
        self.info
            .as_ref()
            .and_then(|info| info.task_id.as_deref())
            .filter(|id| !id.trim().is_empty())
    }
}

/// 查询任务响应 `{"info": {"images": [...]}}`
#[derive(Debug, Default, Deserialize)]
pub struct PollResponse {
    #[serde(default)]
    pub info: Option<PollInfo>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PollInfo {
    #[serde(default)]
    pub images: Vec<serde_json::Value>,
}

impl PollResponse {
    /// 是否至少产出了一张图片
    pub fn is_complete(&self) -> bool {
        self.info
            .as_ref()
            .map(|info| !info.images.is_empty())
            .unwrap_or(false)
    }
}
