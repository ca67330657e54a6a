//! 压测统计汇总
//!
//! 按调用名聚合请求数、失败数与耗时分布，运行结束时输出汇总表。
//! 耗时用 HDR 直方图记录，内存占用与运行时长无关。

use std::collections::HashMap;
use std::fmt::Display;
use std::time::Instant;

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;

use crate::recorder::{MetricsRecord, RecordSink};
use crate::stream::StreamStatus;

/// 直方图可精确跟踪的最大耗时（毫秒），超出部分按上限计入
const MAX_TRACKABLE_MS: u64 = 24 * 60 * 60 * 1000;

/// 有效数字位数
const SIGNIFICANT_DIGITS: u8 = 3;

/// 单个调用名的原始样本
#[derive(Debug)]
struct MethodSamples {
    /// 收到响应的次数
    responses: u64,
    /// 传输层失败次数（没有拿到响应）
    failures: u64,
    /// 非 2xx 响应次数
    non_success: u64,
    /// 事件流在哨兵前中断的次数
    interrupted: u64,
    /// 事件流中被跳过的坏帧总数
    decode_failures: u64,
    elapsed_ms: Histogram<u64>,
    first_token_ms: Histogram<u64>,
    job_elapsed_ms: Histogram<u64>,
    last_error: Option<String>,
}

impl MethodSamples {
    fn new(template: &Histogram<u64>) -> Self {
        Self {
            responses: 0,
            failures: 0,
            non_success: 0,
            interrupted: 0,
            decode_failures: 0,
            elapsed_ms: template.clone(),
            first_token_ms: template.clone(),
            job_elapsed_ms: template.clone(),
            last_error: None,
        }
    }
}

/// 耗时分布
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LatencyStats {
    pub count: u64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub avg_ms: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

impl LatencyStats {
    fn from_histogram(hist: &Histogram<u64>) -> Option<Self> {
        if hist.is_empty() {
            return None;
        }
        Some(Self {
            count: hist.len(),
            min_ms: hist.min(),
            max_ms: hist.max(),
            avg_ms: hist.mean().round() as u64,
            p50_ms: hist.value_at_quantile(0.50),
            p95_ms: hist.value_at_quantile(0.95),
            p99_ms: hist.value_at_quantile(0.99),
        })
    }
}

/// 单个调用名的汇总
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodSummary {
    pub method: String,
    pub requests: u64,
    pub failures: u64,
    pub non_success: u64,
    pub interrupted: u64,
    pub decode_failures: u64,
    pub elapsed: Option<LatencyStats>,
    pub first_token: Option<LatencyStats>,
    pub job_elapsed: Option<LatencyStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// 整次运行的汇总
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub duration_secs: f64,
    pub total_requests: u64,
    pub total_failures: u64,
    pub methods: Vec<MethodSummary>,
}

impl RunSummary {
    /// 以表格形式打印到标准输出
    pub fn print_table(&self) {
        println!("\n=== Load Test Summary ({:.1}s) ===", self.duration_secs);
        println!(
            "{:<20} {:>8} {:>6} {:>7} {:>6} {:>7} {:>9} {:>9} {:>9} {:>10} {:>10}",
            "method", "reqs", "fails", "non2xx", "intr", "badfrm", "avg(ms)", "p50(ms)", "p95(ms)", "ttft-avg", "ttft-p95"
        );
        for m in &self.methods {
            let elapsed = m.elapsed.clone().unwrap_or_default();
            let first = m.first_token.as_ref();
            println!(
                "{:<20} {:>8} {:>6} {:>7} {:>6} {:>7} {:>9} {:>9} {:>9} {:>10} {:>10}",
                m.method,
                m.requests,
                m.failures,
                m.non_success,
                m.interrupted,
                m.decode_failures,
                elapsed.avg_ms,
                elapsed.p50_ms,
                elapsed.p95_ms,
                first.map(|s| s.avg_ms.to_string()).unwrap_or_else(|| "-".into()),
                first.map(|s| s.p95_ms.to_string()).unwrap_or_else(|| "-".into()),
            );
            if let Some(job) = &m.job_elapsed {
                println!(
                    "{:<20} jobs completed: {} avg={}ms p95={}ms",
                    "", job.count, job.avg_ms, job.p95_ms
                );
            }
        }
        println!(
            "Total: {} requests, {} failures\n",
            self.total_requests, self.total_failures
        );
    }
}

/// 进程级统计收集器（线程安全）
pub struct StatsCollector {
    methods: Mutex<HashMap<String, MethodSamples>>,
    template: Histogram<u64>,
    started: Instant,
}

impl StatsCollector {
    pub fn new() -> anyhow::Result<Self> {
        let template = Histogram::new_with_bounds(1, MAX_TRACKABLE_MS, SIGNIFICANT_DIGITS)
            .map_err(|e| anyhow::anyhow!("创建耗时直方图失败: {}", e))?;
        Ok(Self {
            methods: Mutex::new(HashMap::new()),
            template,
            started: Instant::now(),
        })
    }

    /// 记录一次传输层失败
    pub fn record_failure(&self, method: &str, error: &dyn Display) {
        let mut methods = self.methods.lock();
        let samples = methods
            .entry(method.to_string())
            .or_insert_with(|| MethodSamples::new(&self.template));
        samples.failures += 1;
        samples.last_error = Some(error.to_string());
    }

    /// 生成当前汇总（按调用名排序）
    pub fn summary(&self) -> RunSummary {
        let methods = self.methods.lock();
        let mut summaries: Vec<MethodSummary> = methods
            .iter()
            .map(|(method, s)| MethodSummary {
                method: method.clone(),
                requests: s.responses + s.failures,
                failures: s.failures,
                non_success: s.non_success,
                interrupted: s.interrupted,
                decode_failures: s.decode_failures,
                elapsed: LatencyStats::from_histogram(&s.elapsed_ms),
                first_token: LatencyStats::from_histogram(&s.first_token_ms),
                job_elapsed: LatencyStats::from_histogram(&s.job_elapsed_ms),
                last_error: s.last_error.clone(),
            })
            .collect();
        summaries.sort_by(|a, b| a.method.cmp(&b.method));

        RunSummary {
            duration_secs: self.started.elapsed().as_secs_f64(),
            total_requests: summaries.iter().map(|m| m.requests).sum(),
            total_failures: summaries.iter().map(|m| m.failures).sum(),
            methods: summaries,
        }
    }
}

fn record_ms(hist: &mut Histogram<u64>, ms: Option<i64>) {
    if let Some(ms) = ms {
        hist.saturating_record(u64::try_from(ms).unwrap_or(0));
    }
}

impl RecordSink for StatsCollector {
    fn record(&self, record: &MetricsRecord) {
        let mut methods = self.methods.lock();
        let samples = methods
            .entry(record.method.clone())
            .or_insert_with(|| MethodSamples::new(&self.template));
        samples.responses += 1;
        if !record.is_success() {
            samples.non_success += 1;
        }
        if record.stream_status == StreamStatus::Interrupted {
            samples.interrupted += 1;
        }
        samples.decode_failures += record.decode_failures.unwrap_or(0) as u64;
        record_ms(&mut samples.elapsed_ms, record.elapse_time_in_ms);
        record_ms(&mut samples.first_token_ms, record.first_char_delay_in_ms);
        record_ms(&mut samples.job_elapsed_ms, record.job_elapsed_in_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Stamp;
    use crate::stream::StreamOutcome;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn response(method: &str, status: u16, elapsed_ms: u64) -> MetricsRecord {
        let start = Stamp::now();
        MetricsRecord::new(method, 1, start).with_response(
            status,
            BTreeMap::new(),
            None,
            Some(start + Duration::from_millis(elapsed_ms)),
        )
    }

    #[test]
    fn test_histogram_percentiles() {
        let stats = StatsCollector::new().unwrap();
        for ms in 1..=100 {
            stats.record(&response("health_check", 200, ms));
        }
        let summary = stats.summary();
        let elapsed = summary.methods[0].elapsed.as_ref().unwrap();
        assert_eq!(elapsed.count, 100);
        assert_eq!(elapsed.min_ms, 1);
        assert_eq!(elapsed.max_ms, 100);
        assert!((50..=51).contains(&elapsed.p50_ms));
        assert!((99..=100).contains(&elapsed.p99_ms));
    }

    #[test]
    fn test_summary_counts_and_latency() {
        let stats = StatsCollector::new().unwrap();
        stats.record(&response("health_check", 200, 10));
        stats.record(&response("health_check", 200, 30));
        stats.record(&response("health_check", 503, 20));
        stats.record_failure("health_check", &"connection refused");

        let summary = stats.summary();
        assert_eq!(summary.total_requests, 4);
        assert_eq!(summary.total_failures, 1);

        let m = &summary.methods[0];
        assert_eq!(m.method, "health_check");
        assert_eq!(m.non_success, 1);
        assert_eq!(m.last_error.as_deref(), Some("connection refused"));
        let elapsed = m.elapsed.as_ref().unwrap();
        assert_eq!(elapsed.count, 3);
        assert_eq!(elapsed.min_ms, 10);
        assert_eq!(elapsed.max_ms, 30);
        assert_eq!(elapsed.avg_ms, 20);
        assert!(m.first_token.is_none());
    }

    #[test]
    fn test_latency_beyond_range_is_clamped() {
        let stats = StatsCollector::new().unwrap();
        stats.record(&response("image_task_poll", 200, MAX_TRACKABLE_MS * 10));
        let summary = stats.summary();
        let elapsed = summary.methods[0].elapsed.as_ref().unwrap();
        assert_eq!(elapsed.count, 1);
        assert!(elapsed.max_ms >= MAX_TRACKABLE_MS);
    }

    #[test]
    fn test_decode_failures_accumulate() {
        let stats = StatsCollector::new().unwrap();
        for bad in [2, 1] {
            let outcome = StreamOutcome {
                status_code: 200,
                response_headers: BTreeMap::new(),
                first_token_time: None,
                stream_end_time: None,
                finish_reason: None,
                assembled_text: String::new(),
                body: None,
                stream_status: StreamStatus::Interrupted,
                decode_failures: bad,
            };
            stats.record(&MetricsRecord::new("sense_chat", 1, Stamp::now()).with_stream_outcome(outcome));
        }
        let m = &stats.summary().methods[0];
        assert_eq!(m.decode_failures, 3);
        assert_eq!(m.interrupted, 2);
    }

    #[test]
    fn test_summary_sorted_by_method() {
        let stats = StatsCollector::new().unwrap();
        stats.record(&response("sense_chat", 200, 5));
        stats.record(&response("health_check", 200, 5));
        let names: Vec<String> = stats.summary().methods.into_iter().map(|m| m.method).collect();
        assert_eq!(names, vec!["health_check", "sense_chat"]);
    }
}
