use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::client::{build_client, Script};
use crate::core::metrics_aggregator::MetricsAggregator;
use crate::core::virtual_user::VirtualUser;
use crate::error::{EngineError, Result};
use crate::models::run_config::RunPlan;
use crate::models::stage::RampPlan;
use crate::models::virtual_user::{SharedState, VirtualUserState};

// 退避最多跳过 2^6-1 个周期
const MAX_BACKOFF_SHIFT: u32 = 6;

/// 调度器持有的一个虚拟用户
pub struct VuHandle {
    pub id: u64,
    retire: CancellationToken,
    state: Arc<SharedState>,
    join: JoinHandle<()>,
}

impl VuHandle {
    pub fn new(
        id: u64,
        retire: CancellationToken,
        state: Arc<SharedState>,
        join: JoinHandle<()>,
    ) -> Self {
        VuHandle {
            id,
            retire,
            state,
            join,
        }
    }

    fn is_active(&self) -> bool {
        !self.join.is_finished() && self.state.get().is_active()
    }

    /// 通知用户跑完当前这一轮后退出，状态立即进入`Stopping`
    pub fn retire(&self) {
        self.state.advance(VirtualUserState::Stopping);
        self.retire.cancel();
    }
}

/// 启动一个虚拟用户，失败时调度器会在后面的周期里重试
pub trait UserSpawner: Send + Sync {
    fn spawn(&self, id: u64, retire: CancellationToken) -> anyhow::Result<VuHandle>;
}

/// 每个虚拟用户一个独立的http客户端，连接池不共享
pub struct HttpUserSpawner {
    plan: Arc<RunPlan>,
    script: Arc<Script>,
    aggregator: Arc<MetricsAggregator>,
    stop: CancellationToken,
}

impl HttpUserSpawner {
    pub fn new(
        plan: Arc<RunPlan>,
        script: Arc<Script>,
        aggregator: Arc<MetricsAggregator>,
        stop: CancellationToken,
    ) -> Self {
        HttpUserSpawner {
            plan,
            script,
            aggregator,
            stop,
        }
    }
}

impl UserSpawner for HttpUserSpawner {
    fn spawn(&self, id: u64, retire: CancellationToken) -> anyhow::Result<VuHandle> {
        let client = build_client(&self.plan)?;
        let state = Arc::new(SharedState::new());
        let user = VirtualUser::new(
            id,
            client,
            self.script.clone(),
            self.aggregator.clone(),
            state.clone(),
            self.plan.config.sleep,
            retire.clone(),
            self.stop.clone(),
        );
        let join = tokio::spawn(user.run());
        Ok(VuHandle::new(id, retire, state, join))
    }
}

/// 按阶段曲线调整虚拟用户数量
///
/// 每个周期比较期望并发和实际并发: 少了就启动新的用户，多了就让最新启动的
/// 用户跑完当前这一轮后退出。最后一个阶段结束后通知所有用户退出，最多等待
/// `graceful_stop`，超时后发出全局停止信号。
pub struct RampScheduler<S> {
    ramp: RampPlan,
    spawner: S,
    aggregator: Arc<MetricsAggregator>,
    stop: CancellationToken,
    tick_interval: Duration,
    graceful_stop: Duration,
    max_spawn_failures: u32,
}

impl<S: UserSpawner> RampScheduler<S> {
    pub fn new(
        plan: &RunPlan,
        spawner: S,
        aggregator: Arc<MetricsAggregator>,
        stop: CancellationToken,
    ) -> Self {
        RampScheduler {
            ramp: plan.ramp.clone(),
            spawner,
            aggregator,
            stop,
            tick_interval: plan.config.tick_interval,
            graceful_stop: plan.config.graceful_stop,
            max_spawn_failures: plan.config.max_spawn_failures,
        }
    }

    pub async fn run(self) -> Result<()> {
        let start = Instant::now();
        let total = self.ramp.total_duration();
        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut users: Vec<VuHandle> = Vec::new();
        let mut retiring: Vec<VuHandle> = Vec::new();
        let mut next_id = 0u64;
        let mut failures = 0u32;
        let mut skip_ticks = 0u64;
        let mut result = Ok(());

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.stop.cancelled() => break,
            }
            let elapsed = start.elapsed();
            if elapsed >= total {
                break;
            }

            users.retain(VuHandle::is_active);
            retiring.retain(|u| !u.join.is_finished());
            let desired = self.ramp.desired_at(elapsed);

            if users.len() < desired {
                if skip_ticks > 0 {
                    skip_ticks -= 1;
                } else {
                    for _ in users.len()..desired {
                        // 停止之后不再启动新用户
                        if self.stop.is_cancelled() {
                            break;
                        }
                        match self.spawner.spawn(next_id, self.stop.child_token()) {
                            Ok(handle) => {
                                next_id += 1;
                                failures = 0;
                                users.push(handle);
                            }
                            Err(e) => {
                                failures += 1;
                                warn!(failures, error = %e, "启动虚拟用户失败");
                                skip_ticks = (1u64 << (failures - 1).min(MAX_BACKOFF_SHIFT)) - 1;
                                break;
                            }
                        }
                    }
                    if failures >= self.max_spawn_failures {
                        result = Err(EngineError::ResourceExhaustion {
                            attempts: failures,
                            reason: format!("期望{}个虚拟用户，实际{}个", desired, users.len()),
                        });
                        self.stop.cancel();
                        break;
                    }
                }
            } else {
                // 缺口已经补上，之前的失败不再累计
                failures = 0;
                skip_ticks = 0;
                if users.len() > desired {
                    // 最新启动的先退出
                    for handle in users.split_off(desired).into_iter().rev() {
                        debug!(vu = handle.id, "通知虚拟用户退出");
                        handle.retire();
                        retiring.push(handle);
                    }
                }
            }
            self.aggregator.set_vus(users.len());
        }

        info!(spawned = next_id, "阶段结束，等待虚拟用户退出");
        retiring.extend(users.drain(..));
        for handle in &retiring {
            handle.retire();
        }
        self.aggregator.set_vus(0);
        self.drain(retiring).await;
        result
    }

    // 在graceful_stop内等待用户自己退出，超时后全局停止，用户完成手上的请求后退出
    async fn drain(&self, handles: Vec<VuHandle>) {
        let deadline = Instant::now() + self.graceful_stop;
        let mut pending = Vec::new();
        for mut handle in handles {
            if tokio::time::timeout_at(deadline, &mut handle.join).await.is_err() {
                pending.push(handle);
            }
        }
        if !pending.is_empty() {
            warn!(pending = pending.len(), "等待超时，发出停止信号");
        }
        self.stop.cancel();
        for handle in pending {
            if let Err(e) = handle.join.await {
                warn!(vu = handle.id, error = %e, "虚拟用户任务异常退出");
            }
        }
    }
}
