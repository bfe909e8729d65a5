use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use jsonpath_lib::select;
use reqwest::Client;
use serde_json::Value;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::core::client::{PreparedRequest, Script};
use crate::core::metrics_aggregator::MetricsAggregator;
use crate::models::check_option::CheckOption;
use crate::models::outcome::{OutcomeStatus, RequestErrorKind, RequestOutcome};
use crate::models::virtual_user::{SharedState, VirtualUserState};

/// 一个虚拟用户: 循环执行脚本，每轮之后等待固定的时间
///
/// `retire`只在每轮开始前检查，调度器用它让用户跑完当前这一轮再退出；
/// `stop`是全局停止信号，当前请求完成后立即退出，不再发后面的请求。
pub struct VirtualUser {
    pub id: u64,
    client: Client,
    script: Arc<Script>,
    aggregator: Arc<MetricsAggregator>,
    state: Arc<SharedState>,
    pacing: Duration,
    retire: CancellationToken,
    stop: CancellationToken,
}

impl VirtualUser {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        client: Client,
        script: Arc<Script>,
        aggregator: Arc<MetricsAggregator>,
        state: Arc<SharedState>,
        pacing: Duration,
        retire: CancellationToken,
        stop: CancellationToken,
    ) -> Self {
        VirtualUser {
            id,
            client,
            script,
            aggregator,
            state,
            pacing,
            retire,
            stop,
        }
    }

    pub async fn run(self) {
        self.state.advance(VirtualUserState::Running);
        debug!(vu = self.id, "虚拟用户开始");
        let mut iterations = 0u64;
        'outer: loop {
            if self.retire.is_cancelled() || self.stop.is_cancelled() {
                break;
            }
            let iteration_start = Instant::now();
            for step in &self.script.steps {
                if self.stop.is_cancelled() {
                    // 被打断的这一轮不计入迭代
                    break 'outer;
                }
                self.run_step(step).await;
            }
            self.aggregator.record_iteration(iteration_start.elapsed());
            iterations += 1;

            if !self.pacing.is_zero() {
                self.state.advance(VirtualUserState::Sleeping);
                tokio::select! {
                    _ = tokio::time::sleep(self.pacing) => {}
                    _ = self.retire.cancelled() => {}
                    _ = self.stop.cancelled() => {}
                }
                self.state.advance(VirtualUserState::Running);
            }
        }
        self.state.advance(VirtualUserState::Stopping);
        debug!(vu = self.id, iterations, "虚拟用户退出");
        self.state.advance(VirtualUserState::Stopped);
    }

    // 一步里的请求并发发出，每个请求完成后马上记录，整步耗时取决于最慢的那个
    async fn run_step(&self, step: &[usize]) {
        let sends = step
            .iter()
            .filter_map(|index| self.script.requests.get(*index))
            .map(|request| async move {
                let outcome = send(&self.client, request, &self.aggregator).await;
                if let Some(kind) = outcome.error_kind() {
                    trace!(
                        vu = self.id,
                        at = %outcome.timestamp,
                        url = %outcome.url,
                        status = outcome.status_code(),
                        %kind,
                        "请求失败"
                    );
                }
                self.aggregator.record(&outcome);
            });
        join_all(sends).await;
    }
}

/// 发送一个请求并读完响应体，任何失败都只体现在返回的结果里
pub async fn send(
    client: &Client,
    request: &PreparedRequest,
    aggregator: &MetricsAggregator,
) -> RequestOutcome {
    let timestamp = OffsetDateTime::now_utc();
    let start = Instant::now();
    let status = match request.build(client).send().await {
        Ok(response) => {
            let code = response.status().as_u16();
            match response.bytes().await {
                Ok(body) => Ok((code, body)),
                Err(e) => Err((RequestErrorKind::Body, format!("读取响应失败: {}", e))),
            }
        }
        Err(e) => Err((RequestErrorKind::from(&e), e.to_string())),
    };
    let duration = start.elapsed();

    let (status, bytes_received) = match status {
        Ok((code, body)) => {
            // 断言不计入请求耗时
            if !request.checks.is_empty() {
                run_checks(&body, &request.checks, aggregator);
            }
            (OutcomeStatus::Response(code), body.len() as u64)
        }
        Err((kind, message)) => (OutcomeStatus::Error { kind, message }, 0),
    };
    RequestOutcome {
        timestamp,
        request_index: request.index,
        method: request.method.to_string(),
        url: request.url.to_string(),
        status,
        duration,
        bytes_received,
    }
}

fn run_checks(body: &[u8], checks: &[CheckOption], aggregator: &MetricsAggregator) {
    let json: Option<Value> = serde_json::from_slice(body).ok();
    for check in checks {
        let result = match &json {
            Some(json) => check_value(json, check),
            None => Err("响应体不是json，无法使用jsonpath获取到数据".to_string()),
        };
        if let Err(reason) = &result {
            trace!(jsonpath = %check.jsonpath, %reason, "断言失败");
        }
        aggregator.record_check(result.is_ok());
    }
}

// 通过jsonpath取出唯一的值和预期比较
fn check_value(json: &Value, check: &CheckOption) -> Result<(), String> {
    let results = select(json, &check.jsonpath).map_err(|e| format!("JSONPath查询失败: {:?}", e))?;
    match results.as_slice() {
        [] => Err("没有匹配到任何结果".to_string()),
        [value] if **value == check.expected => Ok(()),
        [value] => Err(format!("预期结果：{}, 实际结果：{}", check.expected, value)),
        _ => Err("匹配到多个值，无法进行断言".to_string()),
    }
}
