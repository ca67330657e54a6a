//! 事件流帧解码
//!
//! 把流式响应体的字节块切分成行，再把每一行归类为 [`Frame`]。

use bytes::BytesMut;

/// 事件流 data 字段名（含冒号）
const DATA_FIELD: &str = "data:";

/// 可忽略的事件流字段
const IGNORED_FIELDS: &[&str] = &["event:", "id:", "retry:"];

/// 流结束哨兵
pub const DONE_SENTINEL: &str = "[DONE]";

/// 单行最大缓冲字节数，超过后强制切出，避免畸形流导致内存无限增长
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// 一行事件流解码后的帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// 携带待解析 JSON 文本的数据帧
    Data(String),
    /// 终止哨兵帧
    Terminal,
    /// 空行、注释行或无关字段（keep-alive 等）
    Blank,
}

impl Frame {
    /// 对单行文本分类
    ///
    /// `data:` 前缀后的单个空格按事件流约定一并去掉；
    /// 没有字段前缀的行原样作为数据载荷。
    pub fn classify(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() || line.starts_with(':') {
            return Frame::Blank;
        }

        let payload = match line.strip_prefix(DATA_FIELD) {
            Some(rest) => rest.strip_prefix(' ').unwrap_or(rest),
            None if IGNORED_FIELDS.iter().any(|f| line.starts_with(f)) => return Frame::Blank,
            None => line,
        };

        if payload.trim().is_empty() {
            Frame::Blank
        } else if payload.contains(DONE_SENTINEL) {
            Frame::Terminal
        } else {
            Frame::Data(payload.to_string())
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Frame::Terminal)
    }
}

/// 字节块到行的缓冲器
///
/// 按 `\n` 切行，行尾 `\r` 去除；多字节 UTF-8 字符跨块时保持完整。
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: BytesMut,
    /// 已扫描过、确认不含换行符的前缀长度
    scanned: usize,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个字节块，返回其中所有完整的行
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        loop {
            match self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
                Some(offset) => {
                    let line = self.buffer.split_to(self.scanned + offset + 1);
                    self.scanned = 0;
                    lines.push(decode_line(&line));
                }
                None => {
                    self.scanned = self.buffer.len();
                    break;
                }
            }
        }

        if self.buffer.len() > MAX_LINE_BYTES {
            tracing::warn!(
                "事件流单行超过 {} 字节仍未结束，强制切分",
                MAX_LINE_BYTES
            );
            let line = self.buffer.split();
            self.scanned = 0;
            lines.push(decode_line(&line));
        }

        lines
    }

    /// 连接关闭后取出缓冲区中剩余的不完整行
    pub fn finish(&mut self) -> Option<String> {
        self.scanned = 0;
        if self.buffer.is_empty() {
            return None;
        }
        let rest = self.buffer.split();
        Some(decode_line(&rest))
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// 事件流帧解码器
///
/// 组合 [`LineDecoder`] 与 [`Frame::classify`]，跳过空帧；
/// 遇到终止帧后标记完成，之后的输入全部丢弃。
#[derive(Debug, Default)]
pub struct FrameDecoder {
    lines: LineDecoder,
    done: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 是否已经见到终止哨兵
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// 解码一个字节块，返回按到达顺序排列的非空帧
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        if self.done {
            return Vec::new();
        }
        let lines = self.lines.push(chunk);
        self.classify_lines(lines)
    }

    /// 传输关闭时冲刷最后一行
    pub fn finish(&mut self) -> Vec<Frame> {
        if self.done {
            return Vec::new();
        }
        let rest = self.lines.finish().into_iter().collect();
        self.classify_lines(rest)
    }

    fn classify_lines(&mut self, lines: Vec<String>) -> Vec<Frame> {
        let mut frames = Vec::new();
        for line in lines {
            match Frame::classify(&line) {
                Frame::Blank => continue,
                Frame::Terminal => {
                    self.done = true;
                    frames.push(Frame::Terminal);
                    break;
                }
                frame => frames.push(frame),
            }
        }
        frames
    }
}
