//! 图片生成异步任务模块

pub mod tracker;
pub mod types;

pub use tracker::{PollVerdict, SubmitVerdict, TaskAction, TaskState, TaskTracker};
