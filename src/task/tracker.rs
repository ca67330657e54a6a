//! 图片生成任务的提交 / 轮询状态机
//!
//! 每个虚拟用户持有一个 [`TaskTracker`]。每个调度周期只做一件事：
//! 空闲时提交，挂起时轮询一次；任务完成与否跨多个周期观察，从不阻塞等待。

use crate::common::Stamp;

use super::types::{PollResponse, SubmitResponse};

/// 任务状态
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TaskState {
    /// 没有进行中的任务
    #[default]
    Idle,
    /// 已提交，等待完成
    Pending {
        task_id: String,
        submitted_at: Stamp,
    },
}

/// 本周期应执行的动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskAction {
    Submit,
    Poll { task_id: String },
}

/// 提交结果判定
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitVerdict {
    /// 拿到任务 ID，进入挂起
    Accepted { task_id: String },
    /// 状态码非 200 或缺少任务 ID，下个周期重试
    Rejected,
    /// 当前已有挂起任务，忽略本次提交结果
    Ignored,
}

/// 轮询结果判定
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollVerdict {
    /// 任务完成，状态回到空闲
    Completed {
        task_id: String,
        job_elapsed_ms: i64,
    },
    /// 任务未完成（或本次查询失败），保持挂起
    StillPending { task_id: String },
    /// 当前没有挂起任务，忽略本次轮询结果
    Ignored,
}

/// 单个虚拟用户的异步任务跟踪器
#[derive(Debug, Clone, Default)]
pub struct TaskTracker {
    state: TaskState,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    /// 当前挂起的任务 ID
    pub fn pending_task_id(&self) -> Option<&str> {
        match &self.state {
            TaskState::Idle => None,
            TaskState::Pending { task_id, .. } => Some(task_id),
        }
    }

    /// 根据当前状态决定本周期动作
    pub fn next_action(&self) -> TaskAction {
        match &self.state {
            TaskState::Idle => TaskAction::Submit,
            TaskState::Pending { task_id, .. } => TaskAction::Poll {
                task_id: task_id.clone(),
            },
        }
    }

    /// 应用提交响应
    ///
    /// 只有 `Idle` 状态下、状态码 200 且响应中带任务 ID 时才转入 `Pending`。
    pub fn on_submit(
        &mut self,
        status: u16,
        body: Option<&serde_json::Value>,
        now: Stamp,
    ) -> SubmitVerdict {
        if !matches!(self.state, TaskState::Idle) {
            tracing::warn!(
                task_id = self.pending_task_id().unwrap_or_default(),
                "已有挂起任务，忽略提交结果"
            );
            return SubmitVerdict::Ignored;
        }
        if status != 200 {
            return SubmitVerdict::Rejected;
        }

        let task_id = body
            .and_then(|v| serde_json::from_value::<SubmitResponse>(v.clone()).ok())
            .and_then(|resp| resp.task_id().map(str::to_string));

        match task_id {
            Some(task_id) => {
                self.state = TaskState::Pending {
                    task_id: task_id.clone(),
                    submitted_at: now,
                };
                SubmitVerdict::Accepted { task_id }
            }
            None => {
                tracing::warn!("提交响应中缺少 task_id，下个周期重试");
                SubmitVerdict::Rejected
            }
        }
    }

    /// 应用轮询响应
    ///
    /// 状态码 200 且至少有一张图片时任务结束，回到 `Idle`；其余情况保持 `Pending`。
    pub fn on_poll(
        &mut self,
        status: u16,
        body: Option<&serde_json::Value>,
        now: Stamp,
    ) -> PollVerdict {
        let (task_id, submitted_at) = match &self.state {
            TaskState::Idle => return PollVerdict::Ignored,
            TaskState::Pending {
                task_id,
                submitted_at,
            } => (task_id.clone(), *submitted_at),
        };

        let complete = status == 200
            && body
                .and_then(|v| serde_json::from_value::<PollResponse>(v.clone()).ok())
                .map(|resp| resp.is_complete())
                .unwrap_or(false);

        if complete {
            self.state = TaskState::Idle;
            PollVerdict::Completed {
                task_id,
                job_elapsed_ms: now.millis_since(&submitted_at),
            }
        } else {
            PollVerdict::StillPending { task_id }
        }
    }
}
