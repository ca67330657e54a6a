//! 公共工具模块

pub mod stamp;

use std::borrow::Cow;

pub use stamp::Stamp;

/// 生成用于日志的文本预览
///
/// 启用 `sensitive-logs` feature 时原样返回；否则在不超过 `max_bytes` 的字符边界处截断，
/// 附加省略号和原始长度。
pub fn log_preview(s: &str, max_bytes: usize) -> Cow<'_, str> {
    if cfg!(feature = "sensitive-logs") || s.len() <= max_bytes {
        return Cow::Borrowed(s);
    }
    let end = s
        .char_indices()
        .map(|(i, _)| i)
        .take_while(|&i| i <= max_bytes)
        .last()
        .unwrap_or(0);
    Cow::Owned(format!("{}...({} bytes)", &s[..end], s.len()))
}
