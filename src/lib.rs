//! 面向 LLM HTTP 接口的并发压测库
//!
//! 核心是流式响应的消费与计时（[`stream`]）以及异步图片任务的提交 / 轮询状态机（[`task`]）；
//! 调度、统计与配置作为外围组件一并提供。

pub mod common;
pub mod http_client;
pub mod model;
pub mod recorder;
pub mod runner;
pub mod scenario;
pub mod stats;
pub mod stream;
pub mod task;
pub mod user;
