use std::io::Write;

use prettytable::{format, row, Cell, Row, Table};

use crate::models::result::{RunReport, TrendSummary};

fn trend_row(name: &str, t: &TrendSummary) -> Row {
    row![
        name,
        format!(
            "avg={:.2}ms min={:.2}ms med={:.2}ms max={:.2}ms p(90)={:.2}ms p(95)={:.2}ms p(99)={:.2}ms",
            t.avg, t.min, t.med, t.max, t.p90, t.p95, t.p99
        )
    ]
}

fn metrics_table(report: &RunReport) -> Table {
    let m = &report.metrics;
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);
    table.add_row(row!["指标", "值"]);
    table.add_row(row![
        "http_reqs",
        format!("{} ({:.3}/s)", m.http_reqs.count, m.http_reqs.rate)
    ]);
    table.add_row(row![
        "http_req_failed",
        format!(
            "{:.2}% ({}失败 / {}成功)",
            m.http_req_failed.rate * 100.0,
            m.http_req_failed.passes,
            m.http_req_failed.fails
        )
    ]);
    table.add_row(trend_row("http_req_duration", &m.http_req_duration));
    table.add_row(row![
        "iterations",
        format!("{} ({:.3}/s)", m.iterations.count, m.iterations.rate)
    ]);
    table.add_row(trend_row("iteration_duration", &m.iteration_duration));
    if m.checks.passes + m.checks.fails > 0 {
        table.add_row(row![
            "checks",
            format!(
                "{:.2}% ({}通过 / {}失败)",
                m.checks.rate * 100.0,
                m.checks.passes,
                m.checks.fails
            )
        ]);
    }
    table.add_row(row![
        "data_received",
        format!(
            "{:.2}kb ({:.2}kb/s)",
            m.data_received.count as f64 / 1024.0,
            m.data_received.rate / 1024.0
        )
    ]);
    table.add_row(row!["vus", m.vus]);
    table.add_row(row!["vus_max", m.vus_max]);
    table
}

fn requests_table(report: &RunReport) -> Table {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);
    table.add_row(row!["名称", "总请求数", "错误数量", "错误率", "中位响应时间", "95%响应时间", "99%响应时间"]);
    for r in &report.requests {
        table.add_row(row![
            r.name,
            r.total_requests,
            r.err_count,
            format!("{:.2}%", r.error_rate * 100.0),
            format!("{:.2}ms", r.duration.med),
            format!("{:.2}ms", r.duration.p95),
            format!("{:.2}ms", r.duration.p99)
        ]);
    }
    table
}

fn errors_table(report: &RunReport) -> Table {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);
    table.add_row(row!["错误代码", "错误信息", "url", "次数"]);
    for e in &report.http_errors {
        table.add_row(Row::new(vec![
            Cell::new(&format!("{:03}", e.status)),
            Cell::new(&e.message).style_spec("R"),
            Cell::new(&e.url),
            Cell::new(&e.count.to_string()),
        ]));
    }
    table
}

fn thresholds_table(report: &RunReport) -> Table {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);
    table.add_row(row!["", "指标", "规则", "实际值"]);
    for t in &report.thresholds {
        let mark = if t.passed { "✓" } else { "✗" };
        table.add_row(row![mark, t.metric, t.expression, format!("{:.3}", t.observed)]);
    }
    table
}

/// 以表格形式输出最终报告
pub fn write_table(report: &RunReport, out: &mut impl Write) -> std::io::Result<()> {
    if report.interrupted {
        writeln!(out, "压测被中断，以下是中断前的结果")?;
    }
    writeln!(out, "压测结果 (耗时 {:.2}s):", report.total_duration)?;
    metrics_table(report).print(out)?;

    if !report.requests.is_empty() {
        writeln!(out, "请求明细:")?;
        requests_table(report).print(out)?;
    }
    if !report.http_errors.is_empty() {
        writeln!(out, "HTTP 错误:")?;
        errors_table(report).print(out)?;
    }
    if !report.thresholds.is_empty() {
        writeln!(out, "阈值:")?;
        thresholds_table(report).print(out)?;
    }
    writeln!(out, "{}", if report.passed { "通过" } else { "未通过" })?;
    Ok(())
}

pub fn write_json(report: &RunReport, out: &mut impl Write) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(&mut *out, report)?;
    writeln!(out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::http_error_stats::HttpErrorRow;
    use crate::models::result::{
        CounterSummary, MetricsSummary, RateSummary, RequestSummary, ThresholdResult,
    };
    use time::OffsetDateTime;

    fn trend() -> TrendSummary {
        TrendSummary {
            count: 2,
            avg: 15.0,
            min: 10.0,
            med: 10.0,
            max: 20.0,
            p90: 20.0,
            p95: 20.0,
            p99: 20.0,
        }
    }

    fn report() -> RunReport {
        RunReport {
            started_at: OffsetDateTime::UNIX_EPOCH,
            total_duration: 2.0,
            interrupted: true,
            metrics: MetricsSummary {
                http_reqs: CounterSummary { count: 2, rate: 1.0 },
                http_req_failed: RateSummary {
                    passes: 1,
                    fails: 1,
                    rate: 0.5,
                },
                http_req_duration: trend(),
                iterations: CounterSummary { count: 1, rate: 0.5 },
                iteration_duration: trend(),
                checks: RateSummary {
                    passes: 0,
                    fails: 0,
                    rate: 0.0,
                },
                data_received: CounterSummary {
                    count: 2048,
                    rate: 1024.0,
                },
                vus: 0,
                vus_max: 1,
            },
            requests: vec![RequestSummary {
                name: "ip".to_string(),
                method: "GET".to_string(),
                url: "http://target/ip".to_string(),
                total_requests: 2,
                err_count: 1,
                error_rate: 0.5,
                duration: trend(),
            }],
            http_errors: vec![HttpErrorRow {
                status: 503,
                message: "Service Unavailable".to_string(),
                url: "http://target/ip".to_string(),
                count: 1,
            }],
            thresholds: vec![ThresholdResult {
                metric: "http_req_failed".to_string(),
                expression: "rate<0.1".to_string(),
                observed: 0.5,
                passed: false,
            }],
            passed: false,
        }
    }

    #[test]
    fn test_table_report() {
        let mut out = Vec::new();
        write_table(&report(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("压测被中断"));
        assert!(text.contains("http_req_failed"));
        assert!(text.contains("Service Unavailable"));
        assert!(text.contains("rate<0.1"));
        assert!(!text.contains("checks "));
        assert!(text.trim_end().ends_with("未通过"));
    }

    #[test]
    fn test_json_report() {
        let mut out = Vec::new();
        write_json(&report(), &mut out).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["passed"], false);
        assert_eq!(value["interrupted"], true);
        assert_eq!(value["started_at"], "1970-01-01T00:00:00Z");
        assert_eq!(value["metrics"]["http_reqs"]["count"], 2);
        assert_eq!(value["thresholds"][0]["observed"], 0.5);
        assert_eq!(value["http_errors"][0]["status"], 503);
    }
}
