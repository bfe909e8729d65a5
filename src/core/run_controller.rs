use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::core::checkpoint::run_checkpoints;
use crate::core::client::{build_client, Script};
use crate::core::metrics_aggregator::MetricsAggregator;
use crate::core::progress::show_progress;
use crate::core::ramp_scheduler::{HttpUserSpawner, RampScheduler};
use crate::core::threshold_evaluator::{all_passed, evaluate};
use crate::error::{EngineError, Result};
use crate::models::result::RunReport;
use crate::models::run_config::RunPlan;

pub const EXIT_OK: i32 = 0;
pub const EXIT_THRESHOLDS_FAILED: i32 = 99;
pub const EXIT_CONFIG_ERROR: i32 = 104;
pub const EXIT_FATAL: i32 = 1;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    // 不显示进度条
    pub quiet: bool,
}

/// 执行一次完整的压测: 按阶段调整并发直到结束，然后对最终统计求阈值
///
/// 配置问题在启动任何虚拟用户之前返回`EngineError::Config`。Ctrl-C会让所有
/// 用户完成手上的请求后退出，报告照常生成并标记为`interrupted`。再按一次
/// Ctrl-C直接以退出码1结束进程。
pub async fn run(plan: RunPlan, options: &RunOptions) -> Result<RunReport> {
    // 先确认客户端和脚本都能构建，失败就是配置错误
    build_client(&plan).map_err(|e| EngineError::config(format!("{:#}", e)))?;
    let script =
        Arc::new(Script::from_plan(&plan).map_err(|e| EngineError::config(format!("{:#}", e)))?);
    let aggregator = Arc::new(MetricsAggregator::new(&plan.requests)?);
    let plan = Arc::new(plan);
    let rules = Arc::new(plan.rules.clone());

    let stop = CancellationToken::new();
    let done = CancellationToken::new();
    let interrupted = Arc::new(AtomicBool::new(false));
    let started_at = OffsetDateTime::now_utc();
    info!(
        stages = plan.ramp.stages().len(),
        peak_vus = plan.ramp.peak(),
        duration = ?plan.ramp.total_duration(),
        thresholds = rules.len(),
        "开始压测"
    );

    let interrupt = {
        let stop = stop.clone();
        let interrupted = interrupted.clone();
        tokio::spawn(async move {
            if listen_interrupt(tokio::signal::ctrl_c, stop, interrupted).await {
                error!("再次收到中断信号，立即退出");
                std::process::exit(EXIT_FATAL);
            }
        })
    };
    let (progress_tx, display) = if options.quiet {
        (None, None)
    } else {
        let (tx, rx) = watch::channel(None);
        let handle = tokio::spawn(show_progress(rx, plan.ramp.total_duration()));
        (Some(tx), Some(handle))
    };
    let checkpoints = tokio::spawn(run_checkpoints(
        aggregator.clone(),
        rules.clone(),
        plan.config.checkpoint_interval,
        progress_tx,
        done.clone(),
    ));

    let spawner = HttpUserSpawner::new(plan.clone(), script, aggregator.clone(), stop.clone());
    let scheduled = RampScheduler::new(&plan, spawner, aggregator.clone(), stop.clone())
        .run()
        .await;

    done.cancel();
    let _ = checkpoints.await;
    if let Some(display) = display {
        let _ = display.await;
    }
    interrupt.abort();
    scheduled?;

    let snapshot = aggregator.snapshot();
    let thresholds = evaluate(&snapshot, &rules);
    let passed = all_passed(&thresholds);
    let interrupted = interrupted.load(Ordering::SeqCst);
    info!(
        http_reqs = snapshot.total_requests,
        failed = snapshot.failed_requests,
        iterations = snapshot.iterations,
        passed,
        interrupted,
        "压测结束"
    );
    Ok(RunReport {
        started_at,
        total_duration: snapshot.elapsed.as_secs_f64(),
        interrupted,
        metrics: snapshot.summary(),
        requests: snapshot.request_summaries(),
        http_errors: snapshot.http_errors.clone(),
        thresholds,
        passed,
    })
}

// 第一次中断信号触发优雅退出，收到第二次时返回true，由调用方强制结束进程
//
// 压测结束后监听任务会被直接abort
async fn listen_interrupt<S, F>(mut signal: S, stop: CancellationToken, interrupted: Arc<AtomicBool>) -> bool
where
    S: FnMut() -> F,
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal().await {
        warn!(error = %e, "无法监听中断信号");
        return false;
    }
    warn!("收到中断信号，等待进行中的请求完成，再按一次Ctrl-C立即退出");
    interrupted.store(true, Ordering::SeqCst);
    stop.cancel();
    signal().await.is_ok()
}

/// 把运行结果映射成进程退出码
pub fn exit_code(result: &Result<RunReport>) -> i32 {
    match result {
        Ok(report) if report.passed => EXIT_OK,
        Ok(_) => EXIT_THRESHOLDS_FAILED,
        Err(e) if e.is_config() => EXIT_CONFIG_ERROR,
        Err(_) => EXIT_FATAL,
    }
}
