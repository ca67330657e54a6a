use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use llm_loadgen::http_client::build_client_from_config;
use llm_loadgen::model::arg::Args;
use llm_loadgen::model::config::Config;
use llm_loadgen::recorder::{JsonlSink, RecordSink, Recorder, TracingSink};
use llm_loadgen::runner::Runner;
use llm_loadgen::scenario::ScenarioContext;
use llm_loadgen::stats::StatsCollector;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env 不存在时忽略
    let dotenv = dotenvy::dotenv();

    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    if let Ok(path) = dotenv {
        tracing::debug!("已加载环境文件: {}", path.display());
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| Config::default_config_path().to_string());
    let mut config = Config::load(&config_path)?;
    config.apply_args(&args);
    config.resolve_auth_token();
    config.validate()?;

    tracing::info!("目标服务: {}", config.host);

    let client = build_client_from_config(&config)?;
    let stats = Arc::new(StatsCollector::new()?);

    let jsonl = match &config.records_path {
        Some(path) => {
            tracing::info!("指标记录写入: {}", path.display());
            Some(Arc::new(JsonlSink::new(path)?))
        }
        None => None,
    };

    let sinks: Vec<Arc<dyn RecordSink>> = vec![Arc::new(TracingSink), stats.clone()];
    let mut recorder = Recorder::new(sinks);
    if let Some(sink) = &jsonl {
        recorder = recorder.with_sink(sink.clone());
    }

    let ctx = ScenarioContext::new(client, Arc::new(config), recorder);
    let runner = Runner::new(ctx, stats)?;

    let summary = if args.single_user {
        runner.run_single_user().await
    } else {
        runner.run().await
    };

    if let Some(sink) = jsonl {
        sink.shutdown().await;
    }

    tracing::info!(
        summary = %serde_json::to_string(&summary).unwrap_or_default(),
        "压测结束"
    );
    summary.print_table();
    Ok(())
}
