use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::watch;

use crate::models::result::MetricSnapshot;

// 进度条上的一行状态
pub(crate) fn status_line(snapshot: &MetricSnapshot) -> String {
    format!(
        "vus: {}  |  rps: {:.1}  |  p95: {:.1}ms  |  失败: {} ({:.2}%)",
        snapshot.vus,
        snapshot.per_second(snapshot.total_requests),
        snapshot.http_req_duration.percentile_ms(95.0),
        snapshot.failed_requests,
        snapshot.failure_rate() * 100.0,
    )
}

/// 按运行时间显示进度，每次阈值检查时刷新状态，发送端关闭后结束
pub async fn show_progress(mut rx: watch::Receiver<Option<MetricSnapshot>>, total: Duration) {
    let bar = ProgressBar::new(total.as_secs().max(1));
    if let Ok(style) = ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len}s {wide_msg}") {
        bar.set_style(style.progress_chars("=>-"));
    }
    bar.enable_steady_tick(Duration::from_millis(200));
    while rx.changed().await.is_ok() {
        let line = rx.borrow_and_update().as_ref().map(|snapshot| {
            (snapshot.elapsed.as_secs(), status_line(snapshot))
        });
        if let Some((elapsed, line)) = line {
            bar.set_position(elapsed.min(bar.length().unwrap_or(u64::MAX)));
            bar.set_message(line);
        }
    }
    bar.finish_and_clear();
}
