//! 指标记录汇

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::model::MetricsRecord;

/// 记录通道容量
const CHANNEL_CAPACITY: usize = 10_000;
/// 单批最多写入条数
const MAX_BATCH: usize = 500;

/// 指标记录的接收方
///
/// 实现必须是非阻塞的：虚拟用户在自己的执行流里同步调用。
pub trait RecordSink: Send + Sync {
    fn record(&self, record: &MetricsRecord);
}

/// 结构化日志输出
#[derive(Debug, Default)]
pub struct TracingSink;

impl RecordSink for TracingSink {
    fn record(&self, record: &MetricsRecord) {
        let json = serde_json::to_string(record).unwrap_or_default();
        tracing::info!(
            target: "llm_loadgen::record",
            method = %record.method,
            user_id = record.user_id,
            status = ?record.status,
            elapse_time_in_ms = ?record.elapse_time_in_ms,
            record = %json,
            "调用记录"
        );
    }
}

/// 内存记录汇，保存所有记录供调用方取回
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<MetricsRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<MetricsRecord> {
        self.records.lock().clone()
    }
}

impl RecordSink for MemorySink {
    fn record(&self, record: &MetricsRecord) {
        self.records.lock().push(record.clone());
    }
}

/// JSON Lines 文件（同步写入端）
struct JsonlFile {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonlFile {
    fn open(path: &Path) -> anyhow::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("打开记录文件失败: {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    fn append_batch(&self, records: &[MetricsRecord]) -> anyhow::Result<()> {
        let mut writer = self.writer.lock();
        for record in records {
            serde_json::to_writer(&mut *writer, record).context("序列化记录失败")?;
            writer.write_all(b"\n")?;
        }
        writer
            .flush()
            .with_context(|| format!("写入记录文件失败: {}", self.path.display()))?;
        Ok(())
    }
}

/// 异步 JSON Lines 记录汇
///
/// 记录先进入有界 channel，由后台任务批量追加到文件；channel 满时丢弃并告警，不阻塞虚拟用户。
pub struct JsonlSink {
    sender: Mutex<Option<mpsc::Sender<MetricsRecord>>>,
    writer_task: Mutex<Option<JoinHandle<()>>>,
}

impl JsonlSink {
    /// 打开（或创建）文件并启动后台写入任务
    pub fn new(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let file = Arc::new(JsonlFile::open(path.as_ref())?);
        let (sender, mut receiver) = mpsc::channel::<MetricsRecord>(CHANNEL_CAPACITY);

        let writer_task = tokio::spawn(async move {
            while let Some(first) = receiver.recv().await {
                let mut batch = vec![first];
                while let Ok(record) = receiver.try_recv() {
                    batch.push(record);
                    if batch.len() >= MAX_BATCH {
                        break;
                    }
                }
                let file = file.clone();
                let _ = tokio::task::spawn_blocking(move || {
                    if let Err(e) = file.append_batch(&batch) {
                        tracing::error!("批量写入指标记录失败: {:#}", e);
                    }
                })
                .await;
            }
            tracing::debug!("指标记录写入任务已退出");
        });

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            writer_task: Mutex::new(Some(writer_task)),
        })
    }

    /// 关闭 channel 并等待剩余记录写完
    pub async fn shutdown(&self) {
        drop(self.sender.lock().take());
        let task = self.writer_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!("指标记录写入任务异常结束: {}", e);
            }
        }
    }
}

impl RecordSink for JsonlSink {
    fn record(&self, record: &MetricsRecord) {
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            tracing::warn!("记录文件已关闭，丢弃记录 {}", record.request_id);
            return;
        };
        if sender.try_send(record.clone()).is_err() {
            tracing::warn!("指标记录通道已满，丢弃记录 {}", record.request_id);
        }
    }
}
