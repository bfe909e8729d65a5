use tracing::{info, warn};

use crate::models::result::{MetricSnapshot, ThresholdResult, TrendSnapshot};
use crate::models::threshold_rule::{Aggregation, MetricName, ThresholdRule};

/// 根据快照计算规则左边的值，没有样本的指标按0算
pub fn observe(snapshot: &MetricSnapshot, rule: &ThresholdRule) -> f64 {
    let key = &rule.key;
    // 按请求名过滤时只看这个请求的统计
    if let Some(name) = &key.request {
        let Some(request) = snapshot.request(name) else {
            return 0.0;
        };
        return match (key.metric, rule.aggregation) {
            (MetricName::HttpReqs, Aggregation::Count) => request.total as f64,
            (MetricName::HttpReqs, Aggregation::Rate) => snapshot.per_second(request.total),
            (MetricName::HttpReqFailed, _) => request.failure_rate(),
            (MetricName::HttpReqDuration, agg) => trend_value(&request.duration, agg),
            _ => 0.0,
        };
    }

    match (key.metric, rule.aggregation) {
        (MetricName::HttpReqs, Aggregation::Count) => snapshot.total_requests as f64,
        (MetricName::HttpReqs, Aggregation::Rate) => snapshot.per_second(snapshot.total_requests),
        (MetricName::HttpReqFailed, _) => snapshot.failure_rate(),
        (MetricName::HttpReqDuration, agg) => trend_value(&snapshot.http_req_duration, agg),
        (MetricName::Iterations, Aggregation::Count) => snapshot.iterations as f64,
        (MetricName::Iterations, Aggregation::Rate) => snapshot.per_second(snapshot.iterations),
        (MetricName::IterationDuration, agg) => trend_value(&snapshot.iteration_duration, agg),
        (MetricName::Checks, _) => snapshot.checks_rate(),
        (MetricName::DataReceived, Aggregation::Count) => snapshot.data_received as f64,
        (MetricName::DataReceived, Aggregation::Rate) => snapshot.per_second(snapshot.data_received),
        (MetricName::Vus, _) => snapshot.vus as f64,
        (MetricName::VusMax, _) => snapshot.vus_max as f64,
        _ => 0.0,
    }
}

fn trend_value(trend: &TrendSnapshot, aggregation: Aggregation) -> f64 {
    match aggregation {
        Aggregation::Avg => trend.avg_ms(),
        Aggregation::Min => trend.min_ms(),
        Aggregation::Max => trend.max_ms(),
        Aggregation::Med => trend.percentile_ms(50.0),
        Aggregation::Percentile(p) => trend.percentile_ms(p),
        _ => 0.0,
    }
}

/// 对同一个快照求所有规则的值，结果只取决于快照和规则
pub fn evaluate(snapshot: &MetricSnapshot, rules: &[ThresholdRule]) -> Vec<ThresholdResult> {
    rules
        .iter()
        .map(|rule| {
            let observed = observe(snapshot, rule);
            ThresholdResult {
                metric: rule.key.to_string(),
                expression: rule.source.clone(),
                observed,
                passed: rule.comparison.holds(observed, rule.reference),
            }
        })
        .collect()
}

pub fn all_passed(results: &[ThresholdResult]) -> bool {
    results.iter().all(|r| r.passed)
}

// 中途检查只打日志，不影响最终结果
pub(crate) fn log_checkpoint(snapshot: &MetricSnapshot, rules: &[ThresholdRule]) {
    let results = evaluate(snapshot, rules);
    for r in results.iter().filter(|r| !r.passed) {
        warn!(
            metric = %r.metric,
            expression = %r.expression,
            observed = r.observed,
            "阈值暂未满足"
        );
    }
    info!(
        elapsed = ?snapshot.elapsed,
        vus = snapshot.vus,
        http_reqs = snapshot.total_requests,
        failed = snapshot.failed_requests,
        p95_ms = snapshot.http_req_duration.percentile_ms(95.0),
        passing = results.iter().filter(|r| r.passed).count(),
        total = results.len(),
        "阈值检查"
    );
}
