use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

use super::arg::Args;

/// 鉴权 Token 的环境变量名
pub const AUTH_TOKEN_ENV: &str = "LOAD_TEST_TOKEN";

/// 健康检查场景配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthConfig {
    #[serde(default = "default_health_path")]
    pub path: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            path: default_health_path(),
            weight: default_weight(),
        }
    }
}

/// 流式聊天场景配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatConfig {
    #[serde(default = "default_chat_path")]
    pub path: String,
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default = "default_chat_prompt")]
    pub prompt: String,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_new_tokens: Option<u32>,
    /// 合并进请求体的额外字段（例如触发图片生成的插件参数）
    #[serde(default)]
    pub extra_body: serde_json::Map<String, serde_json::Value>,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            path: default_chat_path(),
            model: default_chat_model(),
            prompt: default_chat_prompt(),
            temperature: None,
            top_p: None,
            max_new_tokens: None,
            extra_body: serde_json::Map::new(),
            weight: default_weight(),
        }
    }
}

impl ChatConfig {
    /// 带图片生成的流式聊天默认配置（默认权重 0，即不参与调度）
    pub fn chat_with_image() -> Self {
        Self {
            prompt: default_image_chat_prompt(),
            weight: 0,
            ..Self::default()
        }
    }
}

/// 异步图片生成任务场景配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageTaskConfig {
    #[serde(default = "default_image_submit_path")]
    pub submit_path: String,
    /// 轮询路径，`{task_id}` 会被替换为任务 ID
    #[serde(default = "default_image_poll_path")]
    pub poll_path: String,
    #[serde(default = "default_image_model")]
    pub model: String,
    #[serde(default = "default_image_prompt")]
    pub prompt: String,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(default = "default_image_size")]
    pub width: u32,
    #[serde(default = "default_image_size")]
    pub height: u32,
    #[serde(default)]
    pub weight: u32,
}

impl Default for ImageTaskConfig {
    fn default() -> Self {
        Self {
            submit_path: default_image_submit_path(),
            poll_path: default_image_poll_path(),
            model: default_image_model(),
            prompt: default_image_prompt(),
            negative_prompt: None,
            width: default_image_size(),
            height: default_image_size(),
            weight: 0,
        }
    }
}

impl ImageTaskConfig {
    /// 渲染指定任务的轮询路径
    ///
    /// 任务 ID 按单个路径段做百分号编码，`/`、`?`、`#` 不会改变请求的资源。
    pub fn poll_path_for(&self, task_id: &str) -> String {
        self.poll_path.replace("{task_id}", &urlencoding::encode(task_id))
    }
}

/// 压测配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// 目标服务地址
    #[serde(default = "default_host")]
    pub host: String,

    /// 虚拟用户数
    #[serde(default = "default_users")]
    pub users: usize,

    /// 每秒启动的用户数
    #[serde(default = "default_spawn_rate")]
    pub spawn_rate: f64,

    /// 运行时长（秒），未配置时一直运行到 Ctrl-C
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_time_secs: Option<u64>,

    /// 两次调用之间的最短 / 最长等待（秒）
    #[serde(default)]
    pub wait_min_secs: f64,
    #[serde(default = "default_wait_max_secs")]
    pub wait_max_secs: f64,

    /// 场景标签过滤，为空时运行全部场景
    #[serde(default)]
    pub tags: Vec<String>,

    /// Authorization 头的值，未配置时读取 LOAD_TEST_TOKEN
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    /// HTTP 代理地址（可选）
    /// 支持格式: http://host:port, https://host:port, socks5://host:port
    #[serde(default)]
    pub proxy_url: Option<String>,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// 单次请求总超时（秒），未配置时不限制
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,

    /// 指标记录 JSON Lines 输出文件（可选）
    #[serde(default)]
    pub records_path: Option<PathBuf>,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub chat: ChatConfig,

    #[serde(default = "ChatConfig::chat_with_image")]
    pub chat_with_image: ChatConfig,

    #[serde(default)]
    pub image_task: ImageTaskConfig,
}

fn default_host() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_users() -> usize {
    1
}

fn default_spawn_rate() -> f64 {
    1.0
}

fn default_wait_max_secs() -> f64 {
    0.5
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_weight() -> u32 {
    1
}

fn default_health_path() -> String {
    "/".to_string()
}

fn default_chat_path() -> String {
    "/sense-chat/v1/llm/chat-completions".to_string()
}

fn default_chat_model() -> String {
    "nova-ptc-xl-v1".to_string()
}

fn default_chat_prompt() -> String {
    "你是谁".to_string()
}

fn default_image_chat_prompt() -> String {
    "画一只在雪地里奔跑的柴犬".to_string()
}

fn default_image_submit_path() -> String {
    "/v1/imgen/generation_tasks".to_string()
}

fn default_image_poll_path() -> String {
    "/v1/imgen/generation_tasks/{task_id}".to_string()
}

fn default_image_model() -> String {
    "artist-v1".to_string()
}

fn default_image_prompt() -> String {
    "a corgi running in the snow, watercolor".to_string()
}

fn default_image_size() -> u32 {
    512
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            users: default_users(),
            spawn_rate: default_spawn_rate(),
            run_time_secs: None,
            wait_min_secs: 0.0,
            wait_max_secs: default_wait_max_secs(),
            tags: Vec::new(),
            auth_token: None,
            proxy_url: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: None,
            records_path: None,
            health: HealthConfig::default(),
            chat: ChatConfig::default(),
            chat_with_image: ChatConfig::chat_with_image(),
            image_task: ImageTaskConfig::default(),
        }
    }
}

impl Config {
    /// 获取默认配置文件路径
    pub fn default_config_path() -> &'static str {
        "config.json"
    }

    /// 从文件加载配置，文件不存在时返回默认配置
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("配置文件 {} 不存在，使用默认配置", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("解析配置文件失败: {}", path.display()))?;
        Ok(config)
    }

    /// 用命令行参数覆盖配置
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(host) = &args.host {
            self.host = host.clone();
        }
        if let Some(users) = args.users {
            self.users = users;
        }
        if let Some(rate) = args.spawn_rate {
            self.spawn_rate = rate;
        }
        if let Some(secs) = args.run_time {
            self.run_time_secs = Some(secs);
        }
        if !args.tags.is_empty() {
            self.tags = args.tags.clone();
        }
        if let Some(path) = &args.records {
            self.records_path = Some(path.clone());
        }
    }

    /// 未显式配置 authToken 时从环境变量读取
    pub fn resolve_auth_token(&mut self) {
        if self.auth_token.is_none() {
            self.auth_token = std::env::var(AUTH_TOKEN_ENV)
                .ok()
                .filter(|t| !t.trim().is_empty());
        }
    }

    /// 校验配置的取值范围
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.host.starts_with("http://") || self.host.starts_with("https://")) {
            anyhow::bail!("host 必须以 http:// 或 https:// 开头: {}", self.host);
        }
        if self.users == 0 {
            anyhow::bail!("users 至少为 1");
        }
        if self.spawn_rate <= 0.0 || !self.spawn_rate.is_finite() {
            anyhow::bail!("spawnRate 必须为正数: {}", self.spawn_rate);
        }
        if self.wait_min_secs < 0.0 || self.wait_max_secs < self.wait_min_secs {
            anyhow::bail!(
                "等待区间无效: [{}, {}]",
                self.wait_min_secs,
                self.wait_max_secs
            );
        }
        if !self.image_task.poll_path.contains("{task_id}") {
            anyhow::bail!("imageTask.pollPath 必须包含 {{task_id}} 占位符");
        }
        Ok(())
    }

    /// 拼接完整请求 URL
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.host.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
