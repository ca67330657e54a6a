//! 压测场景
//!
//! 每个场景一次调用只发一个 HTTP 请求，产出一条指标记录；
//! 只有拿不到响应的传输层失败才以 [`TransportFailure`] 返回给调度器。

pub mod chat;
pub mod health;
pub mod image;

use std::sync::Arc;

use reqwest::Client;

use crate::model::config::Config;
use crate::recorder::Recorder;
use crate::user::VirtualUser;

/// 场景执行所需的共享依赖
#[derive(Clone)]
pub struct ScenarioContext {
    pub client: Client,
    pub config: Arc<Config>,
    pub recorder: Recorder,
}

impl ScenarioContext {
    pub fn new(client: Client, config: Arc<Config>, recorder: Recorder) -> Self {
        Self {
            client,
            config,
            recorder,
        }
    }
}

/// 传输层失败：请求未发出或响应头未到达
#[derive(Debug)]
pub struct TransportFailure {
    pub method: &'static str,
    pub source: reqwest::Error,
}

impl TransportFailure {
    pub fn new(method: &'static str, source: reqwest::Error) -> Self {
        Self { method, source }
    }
}

impl std::fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} request failed: {}", self.method, self.source)
    }
}

impl std::error::Error for TransportFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// 场景
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scenario {
    HealthCheck,
    SenseChat,
    ChatWithImage,
    ImageTask,
}

impl Scenario {
    pub const ALL: [Scenario; 4] = [
        Scenario::HealthCheck,
        Scenario::SenseChat,
        Scenario::ChatWithImage,
        Scenario::ImageTask,
    ];

    /// 场景标签，同时也是流式场景记录中的调用名
    pub fn tag(self) -> &'static str {
        match self {
            Scenario::HealthCheck => health::METHOD,
            Scenario::SenseChat => chat::SENSE_CHAT,
            Scenario::ChatWithImage => chat::CHAT_WITH_IMAGE,
            Scenario::ImageTask => image::TAG,
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.tag() == tag)
    }

    /// 配置中的调度权重
    pub fn weight(self, config: &Config) -> u32 {
        match self {
            Scenario::HealthCheck => config.health.weight,
            Scenario::SenseChat => config.chat.weight,
            Scenario::ChatWithImage => config.chat_with_image.weight,
            Scenario::ImageTask => config.image_task.weight,
        }
    }

    /// 执行一次场景调用
    pub async fn run(
        self,
        ctx: &ScenarioContext,
        user: &mut VirtualUser,
    ) -> Result<(), TransportFailure> {
        match self {
            Scenario::HealthCheck => health::run(ctx, user).await,
            Scenario::SenseChat => chat::run(ctx, user, &ctx.config.chat, chat::SENSE_CHAT).await,
            Scenario::ChatWithImage => {
                chat::run(ctx, user, &ctx.config.chat_with_image, chat::CHAT_WITH_IMAGE).await
            }
            Scenario::ImageTask => image::run(ctx, user).await,
        }
    }
}

/// 按权重随机挑选场景
#[derive(Debug, Clone)]
pub struct ScenarioPicker {
    entries: Vec<(Scenario, u32)>,
    total: u32,
}

impl ScenarioPicker {
    /// 根据标签过滤与权重构建
    ///
    /// 未指定标签时启用所有权重大于 0 的场景；
    /// 指定标签时只启用这些场景，权重为 0 的按 1 处理。
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let selected: Vec<Scenario> = if config.tags.is_empty() {
            Scenario::ALL.to_vec()
        } else {
            config
                .tags
                .iter()
                .map(|tag| {
                    Scenario::from_tag(tag.trim())
                        .ok_or_else(|| anyhow::anyhow!("未知的场景标签: {}", tag))
                })
                .collect::<anyhow::Result<_>>()?
        };

        let explicit = !config.tags.is_empty();
        let mut entries: Vec<(Scenario, u32)> = Vec::new();
        for scenario in Scenario::ALL {
            if !selected.contains(&scenario) {
                continue;
            }
            let weight = match scenario.weight(config) {
                0 if explicit => 1,
                w => w,
            };
            if weight > 0 {
                entries.push((scenario, weight));
            }
        }

        if entries.is_empty() {
            anyhow::bail!("没有可运行的场景，请检查 tags 与各场景 weight 配置");
        }
        let total = entries.iter().map(|(_, w)| *w).sum();
        Ok(Self { entries, total })
    }

    /// 按权重随机挑选一个场景
    pub fn pick(&self) -> Scenario {
        self.pick_with(fastrand::u32(0..self.total))
    }

    fn pick_with(&self, mut roll: u32) -> Scenario {
        for (scenario, weight) in &self.entries {
            if roll < *weight {
                return *scenario;
            }
            roll -= weight;
        }
        self.entries[self.entries.len() - 1].0
    }

    /// 启用的场景（固定顺序）
    pub fn scenarios(&self) -> impl Iterator<Item = Scenario> + '_ {
        self.entries.iter().map(|(s, _)| *s)
    }
}
