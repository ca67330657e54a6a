use std::path::PathBuf;

use clap::Parser;

/// 面向 LLM 接口的并发压测工具
#[derive(Parser, Debug)]
#[command(name = "llm-loadgen", version, about, long_about = None)]
pub struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    pub config: Option<String>,

    /// 目标服务地址（覆盖配置文件）
    #[arg(long)]
    pub host: Option<String>,

    /// 虚拟用户数
    #[arg(short, long)]
    pub users: Option<usize>,

    /// 每秒启动的用户数
    #[arg(short = 'r', long)]
    pub spawn_rate: Option<f64>,

    /// 运行时长（秒）
    #[arg(short = 't', long = "run-time")]
    pub run_time: Option<u64>,

    /// 只运行带这些标签的场景（逗号分隔）
    #[arg(long, value_delimiter = ',')]
    pub tags: Vec<String>,

    /// 指标记录 JSON Lines 输出文件
    #[arg(long)]
    pub records: Option<PathBuf>,

    /// 单用户调试模式：每个启用的场景依次执行一次后退出
    #[arg(long)]
    pub single_user: bool,

    /// 日志级别（未设置 RUST_LOG 时生效）
    #[arg(long, default_value = "info")]
    pub log_level: String,
}
