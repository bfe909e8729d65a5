use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::core::metrics_aggregator::MetricsAggregator;
use crate::core::threshold_evaluator::log_checkpoint;
use crate::models::result::MetricSnapshot;
use crate::models::threshold_rule::ThresholdRule;

/// 定期对当前统计求一次阈值并打日志，直到收到停止信号
///
/// 如果传了`progress`，每次检查的快照也会发给它(进度条用)。中途的结果不会
/// 影响最终判定。
pub async fn run_checkpoints(
    aggregator: Arc<MetricsAggregator>,
    rules: Arc<Vec<ThresholdRule>>,
    every: Duration,
    progress: Option<watch::Sender<Option<MetricSnapshot>>>,
    stop: CancellationToken,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // 第一次tick立即返回，那时还没有数据
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.cancelled() => break,
        }
        let snapshot = aggregator.snapshot();
        log_checkpoint(&snapshot, &rules);
        if let Some(sender) = &progress {
            // 没有接收方的时候直接丢掉
            let _ = sender.send(Some(snapshot));
        }
    }
}
