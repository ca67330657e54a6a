//! 健康检查场景：一次普通的请求 / 响应

use crate::common::Stamp;
use crate::recorder::MetricsRecord;
use crate::stream::consumer::{header_map, read_body};
use crate::user::VirtualUser;

use super::{ScenarioContext, TransportFailure};

pub const METHOD: &str = "health_check";

pub async fn run(ctx: &ScenarioContext, user: &mut VirtualUser) -> Result<(), TransportFailure> {
    let request_start = Stamp::now();
    let response = ctx
        .client
        .get(ctx.config.url(&ctx.config.health.path))
        .send()
        .await
        .map_err(|e| TransportFailure::new(METHOD, e))?;

    let status = response.status().as_u16();
    let headers = header_map(response.headers());
    let (body, request_end) = read_body(response).await;

    ctx.recorder.record(
        MetricsRecord::new(METHOD, user.id(), request_start)
            .with_response(status, headers, body, request_end),
    );
    Ok(())
}
