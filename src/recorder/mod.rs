//! 结果记录模块
//!
//! 把每次调用组装成 [`MetricsRecord`]，分发给所有配置的记录汇。

pub mod model;
pub mod sink;

use std::sync::Arc;

pub use model::MetricsRecord;
pub use sink::{JsonlSink, MemorySink, RecordSink, TracingSink};

/// 记录分发器
#[derive(Clone, Default)]
pub struct Recorder {
    sinks: Vec<Arc<dyn RecordSink>>,
}

impl Recorder {
    pub fn new(sinks: Vec<Arc<dyn RecordSink>>) -> Self {
        Self { sinks }
    }

    /// 追加一个记录汇
    pub fn with_sink(mut self, sink: Arc<dyn RecordSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// 交付一条记录；不重试，无其他副作用
    pub fn record(&self, record: MetricsRecord) {
        for sink in &self.sinks {
            sink.record(&record);
        }
    }
}
