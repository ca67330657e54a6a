//! 异步图片生成场景
//!
//! 每次调用只做一步：空闲时提交任务，挂起时查询一次状态。

use crate::common::Stamp;
use crate::model::config::ImageTaskConfig;
use crate::recorder::MetricsRecord;
use crate::stream::consumer::{header_map, read_body};
use crate::task::types::SubmitRequest;
use crate::task::{PollVerdict, SubmitVerdict, TaskAction};
use crate::user::VirtualUser;

use super::{ScenarioContext, TransportFailure};

pub const TAG: &str = "image_task";
pub const SUBMIT_METHOD: &str = "image_task_submit";
pub const POLL_METHOD: &str = "image_task_poll";

pub async fn run(ctx: &ScenarioContext, user: &mut VirtualUser) -> Result<(), TransportFailure> {
    let cfg = &ctx.config.image_task;
    let action = user.task().next_action();
    match action {
        TaskAction::Submit => submit(ctx, user, cfg).await,
        TaskAction::Poll { task_id } => poll(ctx, user, cfg, &task_id).await,
    }
}

async fn submit(
    ctx: &ScenarioContext,
    user: &mut VirtualUser,
    cfg: &ImageTaskConfig,
) -> Result<(), TransportFailure> {
    let request = SubmitRequest {
        model: &cfg.model,
        prompt: &cfg.prompt,
        width: cfg.width,
        height: cfg.height,
        negative_prompt: cfg.negative_prompt.as_deref(),
    };

    let request_start = Stamp::now();
    let response = ctx
        .client
        .post(ctx.config.url(&cfg.submit_path))
        .json(&request)
        .send()
        .await
        .map_err(|e| TransportFailure::new(SUBMIT_METHOD, e))?;

    let status = response.status().as_u16();
    let headers = header_map(response.headers());
    let (body, request_end) = read_body(response).await;

    let verdict = user
        .task_mut()
        .on_submit(status, body.as_ref(), request_end.unwrap_or_else(Stamp::now));

    let mut record = MetricsRecord::new(SUBMIT_METHOD, user.id(), request_start)
        .with_prompt(cfg.prompt.as_str())
        .with_response(status, headers, body, request_end);

    match verdict {
        SubmitVerdict::Accepted { task_id } => {
            tracing::debug!(user_id = user.id(), task_id = %task_id, "图片任务已提交");
            record = record.with_task(task_id, None);
        }
        SubmitVerdict::Rejected => {
            tracing::warn!(user_id = user.id(), status, "图片任务提交失败，下个周期重试");
        }
        SubmitVerdict::Ignored => {}
    }

    ctx.recorder.record(record);
    Ok(())
}

async fn poll(
    ctx: &ScenarioContext,
    user: &mut VirtualUser,
    cfg: &ImageTaskConfig,
    task_id: &str,
) -> Result<(), TransportFailure> {
    let request_start = Stamp::now();
    let response = ctx
        .client
        .get(ctx.config.url(&cfg.poll_path_for(task_id)))
        .send()
        .await
        .map_err(|e| TransportFailure::new(POLL_METHOD, e))?;

    let status = response.status().as_u16();
    let headers = header_map(response.headers());
    let (body, request_end) = read_body(response).await;

    let verdict = user
        .task_mut()
        .on_poll(status, body.as_ref(), request_end.unwrap_or_else(Stamp::now));

    let record = MetricsRecord::new(POLL_METHOD, user.id(), request_start)
        .with_response(status, headers, body, request_end);

    let record = match verdict {
        PollVerdict::Completed {
            task_id,
            job_elapsed_ms,
        } => {
            tracing::info!(
                user_id = user.id(),
                task_id = %task_id,
                job_elapsed_ms,
                "图片任务已完成"
            );
            record.with_task(task_id, Some(job_elapsed_ms))
        }
        PollVerdict::StillPending { task_id } => record.with_task(task_id, None),
        PollVerdict::Ignored => record,
    };

    ctx.recorder.record(record);
    Ok(())
}
