//! 事件流消费模块
//!
//! - [`frame`]: 字节流切行并分类为数据帧 / 终止帧 / 空帧
//! - [`delta`]: 数据帧 JSON 解析为聊天增量
//! - [`consumer`]: 驱动以上两者消费完整响应并计时

pub mod consumer;
pub mod delta;
pub mod frame;

pub use consumer::{StreamOutcome, StreamStatus, consume_response};
pub use delta::{ChatDelta, DecodeError, FinishReasonLatch};
pub use frame::{Frame, FrameDecoder};
