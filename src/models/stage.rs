use std::time::Duration;

use serde::{Deserialize, Serialize};

// 一个压测阶段: 在duration内把并发从上一阶段的目标线性调整到target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    #[serde(with = "crate::models::serde_duration")]
    pub duration: Duration,
    pub target: usize,
}

impl Stage {
    pub fn new(duration: Duration, target: usize) -> Self {
        Stage { duration, target }
    }
}

/// 所有阶段拼成的分段线性并发曲线
///
/// 第i个阶段从前面所有阶段时长之和开始，起点是上一阶段的target(第0个阶段
/// 用`start_vus`)，经过自己的duration到达自己的target。最后一个阶段结束后
/// 保持最后的target不变。
#[derive(Debug, Clone)]
pub struct RampPlan {
    start_vus: usize,
    stages: Vec<Stage>,
    total: Duration,
}

impl RampPlan {
    pub fn new(start_vus: usize, stages: Vec<Stage>) -> Self {
        let total = stages.iter().map(|s| s.duration).sum();
        RampPlan {
            start_vus,
            stages,
            total,
        }
    }

    pub fn total_duration(&self) -> Duration {
        self.total
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    // 所有阶段里出现过的最大并发
    pub fn peak(&self) -> usize {
        self.stages
            .iter()
            .map(|s| s.target)
            .fold(self.start_vus, usize::max)
    }

    /// 第elapsed时刻期望的并发数(四舍五入)
    pub fn desired_at(&self, elapsed: Duration) -> usize {
        let mut from = self.start_vus;
        let mut stage_start = Duration::ZERO;
        for stage in &self.stages {
            let stage_end = stage_start + stage.duration;
            if elapsed < stage_end {
                // 零时长阶段走不到这里，elapsed < stage_end 保证 duration > 0
                let progress = (elapsed - stage_start).as_secs_f64() / stage.duration.as_secs_f64();
                let value = from as f64 + (stage.target as f64 - from as f64) * progress;
                return value.round().max(0.0) as usize;
            }
            from = stage.target;
            stage_start = stage_end;
        }
        from
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn mins(m: f64) -> Duration {
        Duration::from_secs_f64(m * 60.0)
    }

    fn ramp_up_hold_down() -> RampPlan {
        RampPlan::new(
            0,
            vec![
                Stage::new(mins(5.0), 100),
                Stage::new(mins(10.0), 100),
                Stage::new(mins(5.0), 0),
            ],
        )
    }

    #[test]
    fn test_ramp_up_hold_down_curve() {
        let plan = ramp_up_hold_down();
        assert_eq!(plan.total_duration(), mins(20.0));
        assert_eq!(plan.desired_at(Duration::ZERO), 0);
        assert_eq!(plan.desired_at(mins(2.5)), 50);
        assert_eq!(plan.desired_at(mins(5.0)), 100);
        assert_eq!(plan.desired_at(mins(7.0)), 100);
        assert_eq!(plan.desired_at(mins(17.5)), 50);
        assert_eq!(plan.desired_at(mins(20.0)), 0);
        assert_eq!(plan.desired_at(mins(25.0)), 0);
        assert_eq!(plan.peak(), 100);
    }

    #[test]
    fn test_start_vus_is_first_stage_origin() {
        let plan = RampPlan::new(10, vec![Stage::new(Duration::from_secs(10), 20)]);
        assert_eq!(plan.desired_at(Duration::ZERO), 10);
        assert_eq!(plan.desired_at(Duration::from_secs(5)), 15);
        assert_eq!(plan.desired_at(Duration::from_secs(10)), 20);
    }

    #[test]
    fn test_zero_segment_stays_zero() {
        let plan = RampPlan::new(
            0,
            vec![
                Stage::new(Duration::from_secs(30), 0),
                Stage::new(Duration::from_secs(10), 10),
            ],
        );
        for s in 0..30 {
            assert_eq!(plan.desired_at(Duration::from_secs(s)), 0);
        }
        assert_eq!(plan.desired_at(Duration::from_secs(35)), 5);
    }

    #[test]
    fn test_endpoints_match_stage_targets() {
        let plans = [
            RampPlan::new(3, vec![Stage::new(Duration::from_secs(7), 9)]),
            RampPlan::new(
                0,
                vec![
                    Stage::new(Duration::from_millis(1500), 4),
                    Stage::new(Duration::from_secs(3), 1),
                    Stage::new(Duration::from_secs(2), 8),
                ],
            ),
        ];
        for plan in plans {
            assert_eq!(plan.desired_at(Duration::ZERO), plan.start_vus);
            let last = plan.stages().last().map(|s| s.target).unwrap();
            assert_eq!(plan.desired_at(plan.total_duration()), last);
        }
    }

    proptest! {
        #[test]
        fn test_curve_passes_through_every_stage_target(
            start_vus in 0usize..500,
            stages in proptest::collection::vec((1u64..10_000, 0usize..500), 1..8),
            after in 0u64..10_000,
        ) {
            let stages: Vec<Stage> = stages
                .into_iter()
                .map(|(ms, target)| Stage::new(Duration::from_millis(ms), target))
                .collect();
            let plan = RampPlan::new(start_vus, stages.clone());
            prop_assert_eq!(plan.desired_at(Duration::ZERO), start_vus);

            let mut from = start_vus;
            let mut end = Duration::ZERO;
            for stage in &stages {
                // 阶段中间的值不会越过两端
                let mid = plan.desired_at(end + stage.duration / 2);
                prop_assert!(mid >= from.min(stage.target) && mid <= from.max(stage.target));
                end += stage.duration;
                prop_assert_eq!(plan.desired_at(end), stage.target);
                from = stage.target;
            }
            prop_assert_eq!(plan.total_duration(), end);
            prop_assert_eq!(plan.desired_at(end + Duration::from_millis(after)), from);
        }
    }
}
