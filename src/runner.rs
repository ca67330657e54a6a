//! 虚拟用户调度
//!
//! 按 spawnRate 逐个启动用户任务；每个用户循环执行按权重挑选的场景，
//! 两次调用之间随机等待。到达运行时长或收到 Ctrl-C 后通知所有用户停止。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::model::config::Config;
use crate::scenario::{Scenario, ScenarioContext, ScenarioPicker};
use crate::stats::{RunSummary, StatsCollector};
use crate::user::{UserIdAllocator, VirtualUser};

/// 停止后等待进行中调用结束的最长时间
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// 两次调用之间的均匀随机等待
#[derive(Debug, Clone, Copy)]
pub struct WaitTime {
    min_secs: f64,
    max_secs: f64,
}

impl WaitTime {
    /// 上限无法表示为 `Duration` 时返回错误
    pub fn between(min_secs: f64, max_secs: f64) -> anyhow::Result<Self> {
        let min_secs = min_secs.max(0.0);
        let max_secs = max_secs.max(min_secs);
        Duration::try_from_secs_f64(max_secs)
            .map_err(|e| anyhow::anyhow!("等待时间超出范围: {} 秒 ({})", max_secs, e))?;
        Ok(Self { min_secs, max_secs })
    }

    pub fn sample(&self) -> Duration {
        let secs = self.min_secs + fastrand::f64() * (self.max_secs - self.min_secs);
        Duration::from_secs_f64(secs)
    }
}

/// 压测调度器
pub struct Runner {
    config: Arc<Config>,
    ctx: ScenarioContext,
    picker: Arc<ScenarioPicker>,
    stats: Arc<StatsCollector>,
    ids: Arc<UserIdAllocator>,
    wait: WaitTime,
    spawn_interval: Duration,
}

impl Runner {
    pub fn new(ctx: ScenarioContext, stats: Arc<StatsCollector>) -> anyhow::Result<Self> {
        let picker = ScenarioPicker::from_config(&ctx.config)?;
        let wait = WaitTime::between(ctx.config.wait_min_secs, ctx.config.wait_max_secs)?;
        let spawn_interval = Duration::try_from_secs_f64(1.0 / ctx.config.spawn_rate)
            .map_err(|e| anyhow::anyhow!("spawnRate 超出范围: {} ({})", ctx.config.spawn_rate, e))?;
        Ok(Self {
            config: ctx.config.clone(),
            ctx,
            picker: Arc::new(picker),
            stats,
            ids: Arc::new(UserIdAllocator::new()),
            wait,
            spawn_interval,
        })
    }

    /// 启用的场景
    pub fn scenarios(&self) -> Vec<Scenario> {
        self.picker.scenarios().collect()
    }

    /// 并发运行直到运行时长结束或 Ctrl-C
    pub async fn run(&self) -> RunSummary {
        let deadline = self
            .config
            .run_time_secs
            .and_then(|secs| Instant::now().checked_add(Duration::from_secs(secs)));
        let stop_signal = wait_for_stop(deadline);
        tokio::pin!(stop_signal);

        let (stop_tx, stop_rx) = watch::channel(false);

        tracing::info!(
            users = self.config.users,
            spawn_rate = self.config.spawn_rate,
            run_time_secs = ?self.config.run_time_secs,
            scenarios = ?self.scenarios(),
            "开始压测"
        );

        let mut users = JoinSet::new();
        let mut stopped = false;
        for i in 0..self.config.users {
            let user = VirtualUser::new(&self.ids);
            users.spawn(user_loop(
                self.ctx.clone(),
                self.picker.clone(),
                self.stats.clone(),
                user,
                self.wait,
                stop_rx.clone(),
            ));

            if i + 1 < self.config.users {
                tokio::select! {
                    _ = tokio::time::sleep(self.spawn_interval) => {}
                    _ = &mut stop_signal => {
                        stopped = true;
                        break;
                    }
                }
            }
        }
        tracing::info!(spawned = self.ids.allocated(), "用户启动完成");

        if !stopped {
            (&mut stop_signal).await;
        }

        let _ = stop_tx.send(true);
        tracing::info!("通知所有虚拟用户停止");

        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while let Some(result) = users.join_next().await {
                if let Err(e) = result {
                    if e.is_panic() {
                        tracing::error!("虚拟用户任务 panic: {}", e);
                    }
                }
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                remaining = users.len(),
                "等待超时，强制终止仍在进行中的调用"
            );
            users.abort_all();
        }

        self.stats.summary()
    }

    /// 单用户调试：每个启用的场景依次执行一次
    pub async fn run_single_user(&self) -> RunSummary {
        let mut user = VirtualUser::new(&self.ids);
        for scenario in self.picker.scenarios() {
            invoke(&self.ctx, &self.stats, scenario, &mut user).await;
        }
        self.stats.summary()
    }
}

async fn wait_for_stop(deadline: Option<Instant>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("监听 Ctrl-C 失败: {}", e);
            std::future::pending::<()>().await;
        }
    };

    match deadline {
        Some(deadline) => {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => tracing::info!("到达运行时长"),
                _ = ctrl_c => tracing::info!("收到 Ctrl-C"),
            }
        }
        None => {
            ctrl_c.await;
            tracing::info!("收到 Ctrl-C");
        }
    }
}

/// 单个虚拟用户的执行循环
async fn user_loop(
    ctx: ScenarioContext,
    picker: Arc<ScenarioPicker>,
    stats: Arc<StatsCollector>,
    mut user: VirtualUser,
    wait: WaitTime,
    mut stop: watch::Receiver<bool>,
) {
    tracing::debug!(user_id = user.id(), "虚拟用户启动");
    while !*stop.borrow() {
        invoke(&ctx, &stats, picker.pick(), &mut user).await;

        tokio::select! {
            _ = tokio::time::sleep(wait.sample()) => {}
            _ = stop.changed() => break,
        }
    }
    tracing::debug!(user_id = user.id(), "虚拟用户退出");
}

/// 执行一次场景；传输层失败上报给统计
async fn invoke(
    ctx: &ScenarioContext,
    stats: &StatsCollector,
    scenario: Scenario,
    user: &mut VirtualUser,
) {
    if let Err(e) = scenario.run(ctx, user).await {
        tracing::warn!(
            user_id = user.id(),
            method = e.method,
            error = %e.source,
            "请求失败"
        );
        stats.record_failure(e.method, &e);
    }
}
