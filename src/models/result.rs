use std::time::Duration;

use histogram::Histogram;
use serde::Serialize;
use time::OffsetDateTime;

use crate::models::http_error_stats::HttpErrorRow;

/// 耗时类指标的快照: 计数、总和、极值和分桶直方图
///
/// 直方图是有界误差的近似统计(相对误差约0.8%)，不保存原始样本
#[derive(Clone)]
pub struct TrendSnapshot {
    pub count: u64,
    pub sum_us: u64,
    pub min_us: u64,
    pub max_us: u64,
    pub histogram: Histogram,
}

impl TrendSnapshot {
    pub fn avg_ms(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum_us as f64 / self.count as f64 / 1000.0
    }

    pub fn min_ms(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.min_us as f64 / 1000.0
    }

    pub fn max_ms(&self) -> f64 {
        self.max_us as f64 / 1000.0
    }

    /// 百分位(0-100]对应的耗时，没有样本时为0
    ///
    /// 取所在桶的上界，再夹到真实的最小最大值之间
    pub fn percentile_ms(&self, percentile: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        match self.histogram.percentile(percentile) {
            Ok(bucket) => {
                let upper = (*bucket.range().end()).clamp(self.min_us, self.max_us);
                upper as f64 / 1000.0
            }
            Err(_) => 0.0,
        }
    }

    pub fn summary(&self) -> TrendSummary {
        TrendSummary {
            count: self.count,
            avg: self.avg_ms(),
            min: self.min_ms(),
            med: self.percentile_ms(50.0),
            max: self.max_ms(),
            p90: self.percentile_ms(90.0),
            p95: self.percentile_ms(95.0),
            p99: self.percentile_ms(99.0),
        }
    }
}

// 单个接口的统计
#[derive(Clone)]
pub struct RequestSnapshot {
    pub name: String,
    pub method: String,
    pub url: String,
    pub total: u64,
    pub failed: u64,
    pub duration: TrendSnapshot,
}

impl RequestSnapshot {
    pub fn failure_rate(&self) -> f64 {
        ratio(self.failed, self.total)
    }
}

/// 聚合器某一时刻的状态，每次按需重新计算
#[derive(Clone)]
pub struct MetricSnapshot {
    pub elapsed: Duration,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub http_req_duration: TrendSnapshot,
    pub iterations: u64,
    pub iteration_duration: TrendSnapshot,
    pub checks_passed: u64,
    pub checks_failed: u64,
    pub data_received: u64,
    pub vus: u64,
    pub vus_max: u64,
    pub requests: Vec<RequestSnapshot>,
    pub http_errors: Vec<HttpErrorRow>,
    pub dropped_errors: u64,
}

impl MetricSnapshot {
    pub fn failure_rate(&self) -> f64 {
        ratio(self.failed_requests, self.total_requests)
    }

    pub fn checks_rate(&self) -> f64 {
        ratio(self.checks_passed, self.checks_passed + self.checks_failed)
    }

    // 每秒的量
    pub fn per_second(&self, count: u64) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            count as f64 / secs
        } else {
            0.0
        }
    }

    pub fn request(&self, name: &str) -> Option<&RequestSnapshot> {
        self.requests.iter().find(|r| r.name == name)
    }
}

pub(crate) fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

// 以下是最终报告，可以直接序列化成json

#[derive(Debug, Clone, Serialize)]
pub struct TrendSummary {
    pub count: u64,
    pub avg: f64,
    pub min: f64,
    pub med: f64,
    pub max: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CounterSummary {
    pub count: u64,
    pub rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RateSummary {
    pub passes: u64,
    pub fails: u64,
    pub rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub http_reqs: CounterSummary,
    // 这里的passes是失败的请求数，rate是失败率
    pub http_req_failed: RateSummary,
    pub http_req_duration: TrendSummary,
    pub iterations: CounterSummary,
    pub iteration_duration: TrendSummary,
    pub checks: RateSummary,
    pub data_received: CounterSummary,
    pub vus: u64,
    pub vus_max: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestSummary {
    pub name: String,
    pub method: String,
    pub url: String,
    pub total_requests: u64,
    pub err_count: u64,
    pub error_rate: f64,
    pub duration: TrendSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThresholdResult {
    pub metric: String,
    pub expression: String,
    pub observed: f64,
    pub passed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    pub total_duration: f64,
    pub interrupted: bool,
    pub metrics: MetricsSummary,
    pub requests: Vec<RequestSummary>,
    pub http_errors: Vec<HttpErrorRow>,
    pub thresholds: Vec<ThresholdResult>,
    pub passed: bool,
}

impl MetricSnapshot {
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            http_reqs: CounterSummary {
                count: self.total_requests,
                rate: self.per_second(self.total_requests),
            },
            http_req_failed: RateSummary {
                passes: self.failed_requests,
                fails: self.total_requests.saturating_sub(self.failed_requests),
                rate: self.failure_rate(),
            },
            http_req_duration: self.http_req_duration.summary(),
            iterations: CounterSummary {
                count: self.iterations,
                rate: self.per_second(self.iterations),
            },
            iteration_duration: self.iteration_duration.summary(),
            checks: RateSummary {
                passes: self.checks_passed,
                fails: self.checks_failed,
                rate: self.checks_rate(),
            },
            data_received: CounterSummary {
                count: self.data_received,
                rate: self.per_second(self.data_received),
            },
            vus: self.vus,
            vus_max: self.vus_max,
        }
    }

    pub fn request_summaries(&self) -> Vec<RequestSummary> {
        self.requests
            .iter()
            .map(|r| RequestSummary {
                name: r.name.clone(),
                method: r.method.clone(),
                url: r.url.clone(),
                total_requests: r.total,
                err_count: r.failed,
                error_rate: r.failure_rate(),
                duration: r.duration.summary(),
            })
            .collect()
    }
}
