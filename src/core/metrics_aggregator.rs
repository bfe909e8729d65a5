use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use histogram::Histogram;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::models::http_error_stats::HttpErrorStats;
use crate::models::outcome::{OutcomeStatus, RequestOutcome};
use crate::models::request_option::RequestOption;
use crate::models::result::{MetricSnapshot, RequestSnapshot, TrendSnapshot};

// 直方图精度: 每个2的幂区间分成2^7个桶，相对误差不超过 1/128
const GROUPING_POWER: u8 = 7;
// 微秒计，最大约71分钟，超过的按最大值记
const MAX_VALUE_POWER: u8 = 32;
const MAX_VALUE_US: u64 = (1u64 << MAX_VALUE_POWER) - 1;

// 耗时类指标: 计数和极值用原子量，分布用一个只在increment时加锁的直方图
struct Trend {
    count: AtomicU64,
    sum_us: AtomicU64,
    min_us: AtomicU64,
    max_us: AtomicU64,
    histogram: Mutex<Histogram>,
}

impl Trend {
    fn new() -> Result<Self> {
        let histogram = Histogram::new(GROUPING_POWER, MAX_VALUE_POWER)
            .map_err(|e| EngineError::Metrics(format!("{:?}", e)))?;
        Ok(Trend {
            count: AtomicU64::new(0),
            sum_us: AtomicU64::new(0),
            min_us: AtomicU64::new(u64::MAX),
            max_us: AtomicU64::new(0),
            histogram: Mutex::new(histogram),
        })
    }

    fn record(&self, duration: Duration) {
        let us = (duration.as_micros() as u64).min(MAX_VALUE_US);
        if let Err(e) = self.histogram.lock().increment(us) {
            debug!(value_us = us, error = ?e, "histogram设置数据错误");
        }
        self.sum_us.fetch_add(us, Ordering::Relaxed);
        self.min_us.fetch_min(us, Ordering::Relaxed);
        self.max_us.fetch_max(us, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Release);
    }

    fn snapshot(&self) -> TrendSnapshot {
        let count = self.count.load(Ordering::Acquire);
        let histogram = self.histogram.lock().clone();
        let min_us = self.min_us.load(Ordering::Relaxed);
        TrendSnapshot {
            count,
            sum_us: self.sum_us.load(Ordering::Relaxed),
            min_us: if min_us == u64::MAX { 0 } else { min_us },
            max_us: self.max_us.load(Ordering::Relaxed),
            histogram,
        }
    }
}

// 单接口统计，下标和脚本里的请求顺序一致
struct RequestMetrics {
    name: String,
    method: String,
    url: String,
    total: AtomicU64,
    failed: AtomicU64,
    duration: Trend,
}

/// 汇总所有虚拟用户的请求结果
///
/// 所有计数都是可交换的累加，结果和到达顺序无关。写入方只会碰到自己要更新的
/// 原子量和单个直方图的锁，没有覆盖整个聚合器的大锁。
pub struct MetricsAggregator {
    started: Instant,
    total_requests: AtomicU64,
    failed_requests: AtomicU64,
    http_req_duration: Trend,
    iterations: AtomicU64,
    iteration_duration: Trend,
    checks_passed: AtomicU64,
    checks_failed: AtomicU64,
    data_received: AtomicU64,
    vus: AtomicU64,
    vus_max: AtomicU64,
    requests: Vec<RequestMetrics>,
    http_errors: Mutex<HttpErrorStats>,
}

impl MetricsAggregator {
    pub fn new(requests: &[RequestOption]) -> Result<Self> {
        let requests = requests
            .iter()
            .map(|r| {
                Ok(RequestMetrics {
                    name: r.display_name(),
                    method: r.method.to_uppercase(),
                    url: r.url.clone(),
                    total: AtomicU64::new(0),
                    failed: AtomicU64::new(0),
                    duration: Trend::new()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(MetricsAggregator {
            started: Instant::now(),
            total_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            http_req_duration: Trend::new()?,
            iterations: AtomicU64::new(0),
            iteration_duration: Trend::new()?,
            checks_passed: AtomicU64::new(0),
            checks_failed: AtomicU64::new(0),
            data_received: AtomicU64::new(0),
            vus: AtomicU64::new(0),
            vus_max: AtomicU64::new(0),
            requests,
            http_errors: Mutex::new(HttpErrorStats::new()),
        })
    }

    /// 记录一个请求结果
    ///
    /// 总数先于失败数增加，快照里先读失败数再读总数，所以快照里失败数不会超过总数
    pub fn record(&self, outcome: &RequestOutcome) {
        let per_request = self.requests.get(outcome.request_index);
        if per_request.is_none() {
            debug!(index = outcome.request_index, "请求序号越界，只计入总体统计");
        }

        self.total_requests.fetch_add(1, Ordering::SeqCst);
        if let Some(r) = per_request {
            r.total.fetch_add(1, Ordering::SeqCst);
        }

        if !outcome.is_success() {
            self.failed_requests.fetch_add(1, Ordering::SeqCst);
            if let Some(r) = per_request {
                r.failed.fetch_add(1, Ordering::SeqCst);
            }
            if let Some(message) = outcome.error_message() {
                self.http_errors
                    .lock()
                    .increment(outcome.status_code(), message, outcome.url.clone());
            }
        }

        // 没拿到响应的请求不计入耗时分布
        if let OutcomeStatus::Response(_) = outcome.status {
            self.http_req_duration.record(outcome.duration);
            if let Some(r) = per_request {
                r.duration.record(outcome.duration);
            }
        }

        self.data_received
            .fetch_add(outcome.bytes_received, Ordering::Relaxed);
    }

    pub fn record_iteration(&self, duration: Duration) {
        self.iteration_duration.record(duration);
        self.iterations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_check(&self, passed: bool) {
        if passed {
            self.checks_passed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.checks_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    // 调度器每个周期更新一次当前活跃的虚拟用户数
    pub fn set_vus(&self, active: usize) {
        let active = active as u64;
        self.vus.store(active, Ordering::Relaxed);
        self.vus_max.fetch_max(active, Ordering::Relaxed);
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn snapshot(&self) -> MetricSnapshot {
        let failed_requests = self.failed_requests.load(Ordering::SeqCst);
        let total_requests = self.total_requests.load(Ordering::SeqCst);
        let requests = self
            .requests
            .iter()
            .map(|r| {
                let failed = r.failed.load(Ordering::SeqCst);
                RequestSnapshot {
                    name: r.name.clone(),
                    method: r.method.clone(),
                    url: r.url.clone(),
                    total: r.total.load(Ordering::SeqCst),
                    failed,
                    duration: r.duration.snapshot(),
                }
            })
            .collect();
        let (http_errors, dropped_errors) = {
            let errors = self.http_errors.lock();
            (errors.rows(), errors.overflow())
        };
        MetricSnapshot {
            elapsed: self.elapsed(),
            total_requests,
            failed_requests,
            http_req_duration: self.http_req_duration.snapshot(),
            iterations: self.iterations.load(Ordering::Relaxed),
            iteration_duration: self.iteration_duration.snapshot(),
            checks_passed: self.checks_passed.load(Ordering::Relaxed),
            checks_failed: self.checks_failed.load(Ordering::Relaxed),
            data_received: self.data_received.load(Ordering::Relaxed),
            vus: self.vus.load(Ordering::Relaxed),
            vus_max: self.vus_max.load(Ordering::Relaxed),
            requests,
            http_errors,
            dropped_errors,
        }
    }
}
