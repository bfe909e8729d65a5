use std::io::Write;

use ramp_bomb_engine::core::run_controller::{EXIT_CONFIG_ERROR, EXIT_OK, EXIT_THRESHOLDS_FAILED};
use ramp_bomb_engine::{exit_code, run, RunConfig, RunOptions, RunPlan};

fn plan(yaml: &str) -> RunPlan {
    RunConfig::from_yaml(yaml).unwrap().into_plan().unwrap()
}

const QUIET: RunOptions = RunOptions { quiet: true };

#[tokio::test]
async fn test_staged_run_passes_thresholds() {
    let mut server = mockito::Server::new_async().await;
    let ip = server
        .mock("GET", "/ip")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"origin":"127.0.0.1"}"#)
        .expect_at_least(2)
        .create_async()
        .await;
    let post = server
        .mock("POST", "/post")
        .match_header("content-type", "application/x-www-form-urlencoded")
        .with_status(200)
        .expect_at_least(2)
        .create_async()
        .await;

    let yaml = format!(
        r#"
stages:
  - {{ duration: 300ms, target: 2 }}
  - {{ duration: 400ms, target: 2 }}
  - {{ duration: 200ms, target: 0 }}
tick_interval: 50ms
checkpoint_interval: 200ms
sleep: 20ms
thresholds:
  http_req_failed: "rate<0.01"
  http_req_duration: ["p(95)<1s", "max<2s"]
  checks: "rate==1"
  "http_reqs{{name:ip}}": "count>0"
script:
  - batch:
      - name: ip
        url: "{base}/ip"
        checks: [{{ jsonpath: "$.origin", expected: "127.0.0.1" }}]
      - method: POST
        url: "{base}/post"
        form: {{ hello: "world!" }}
"#,
        base = server.url()
    );
    let result = run(plan(&yaml), &QUIET).await;
    let report = result.as_ref().unwrap();

    assert!(report.passed, "{:?}", report.thresholds);
    assert!(!report.interrupted);
    assert_eq!(report.thresholds.len(), 5);
    assert_eq!(report.requests.len(), 2);
    assert_eq!(report.requests[0].name, "ip");
    // 同一批里的两个请求数量相同
    assert_eq!(report.requests[0].total_requests, report.requests[1].total_requests);
    assert_eq!(
        report.metrics.http_reqs.count,
        report.metrics.iterations.count * 2
    );
    assert_eq!(report.metrics.checks.passes, report.requests[0].total_requests);
    assert!(report.metrics.vus_max <= 2);
    assert_eq!(report.metrics.vus, 0);
    assert!(report.http_errors.is_empty());
    assert_eq!(exit_code(&result), EXIT_OK);
    ip.assert_async().await;
    post.assert_async().await;
}

#[tokio::test]
async fn test_failed_threshold_exit_code() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/get")
        .with_status(503)
        .create_async()
        .await;
    let yaml = format!(
        r#"
start_vus: 1
stages: [{{ duration: 300ms, target: 1 }}]
tick_interval: 50ms
sleep: 20ms
thresholds:
  http_req_failed: "rate<0.01"
script:
  - request: {{ url: "{}/get" }}
"#,
        server.url()
    );
    let result = run(plan(&yaml), &QUIET).await;
    let report = result.as_ref().unwrap();
    assert!(!report.passed);
    assert_eq!(report.thresholds[0].observed, 1.0);
    assert_eq!(report.http_errors[0].status, 503);
    assert_eq!(report.http_errors[0].count, report.metrics.http_reqs.count);
    // 非2xx的请求也有响应，计入耗时
    assert_eq!(report.metrics.http_req_duration.count, report.metrics.http_reqs.count);
    assert_eq!(exit_code(&result), EXIT_THRESHOLDS_FAILED);
}

#[tokio::test]
async fn test_host_override_keeps_logical_name() {
    let mut server = mockito::Server::new_async().await;
    let port = server.socket_address().port();
    let mock = server
        .mock("GET", "/ip")
        .match_header("host", format!("loadtest.invalid:{}", port).as_str())
        .with_status(200)
        .expect_at_least(1)
        .create_async()
        .await;
    let yaml = format!(
        r#"
start_vus: 1
stages: [{{ duration: 200ms, target: 1 }}]
tick_interval: 50ms
sleep: 20ms
hosts:
  "loadtest.invalid:{port}": "127.0.0.1:{port}"
thresholds:
  http_req_failed: "rate==0"
script:
  - request: {{ url: "http://loadtest.invalid:{port}/ip" }}
"#,
        port = port
    );
    let result = run(plan(&yaml), &QUIET).await;
    assert_eq!(exit_code(&result), EXIT_OK);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_host_override_rewrites_port() {
    let mut server = mockito::Server::new_async().await;
    let port = server.socket_address().port();
    let mock = server
        .mock("GET", "/ip")
        .match_header("host", "loadtest.invalid:8000")
        .with_status(200)
        .expect_at_least(1)
        .create_async()
        .await;
    let yaml = format!(
        r#"
start_vus: 1
stages: [{{ duration: 200ms, target: 1 }}]
tick_interval: 50ms
sleep: 20ms
hosts:
  "loadtest.invalid:8000": "127.0.0.1:{port}"
thresholds:
  http_req_failed: "rate==0"
script:
  - request: {{ name: ip, url: "http://loadtest.invalid:8000/ip" }}
"#,
        port = port
    );
    let result = run(plan(&yaml), &QUIET).await;
    assert_eq!(exit_code(&result), EXIT_OK);
    mock.assert_async().await;
    // 报告里仍然是逻辑地址
    let report = result.unwrap();
    assert_eq!(report.requests[0].url, "http://loadtest.invalid:8000/ip");
}

#[tokio::test]
async fn test_invalid_config_file() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    write!(
        file,
        r#"
stages: [{{ duration: 1m, target: 10 }}]
thresholds:
  http_req_duration: "rate<0.01"
script:
  - request: {{ url: "http://127.0.0.1:1/" }}
"#
    )
    .unwrap();

    let result = RunConfig::from_file(file.path()).and_then(RunConfig::into_plan);
    let err = result.unwrap_err();
    assert!(err.is_config());
    assert_eq!(exit_code(&Err(err)), EXIT_CONFIG_ERROR);

    let missing = RunConfig::from_file("/nonexistent/loadtest.yaml").unwrap_err();
    assert_eq!(exit_code(&Err(missing)), EXIT_CONFIG_ERROR);
}

#[test]
fn test_demo_config_is_valid() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/demos/loadtest.yaml");
    let plan = RunConfig::from_file(path)
        .and_then(RunConfig::into_plan)
        .unwrap();
    assert_eq!(plan.ramp.peak(), 100);
    assert_eq!(plan.ramp.total_duration().as_secs(), 20 * 60);
    assert_eq!(plan.requests.len(), 3);
    assert_eq!(plan.rules.len(), 3);
    assert_eq!(plan.host_overrides.len(), 1);
}
