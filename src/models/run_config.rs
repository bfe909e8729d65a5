use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use reqwest::header::{HeaderName, HeaderValue};
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::check_request_names::check_request_names;
use crate::error::{EngineError, Result};
use crate::models::request_option::{RequestOption, ScriptStep};
use crate::models::stage::{RampPlan, Stage};
use crate::models::threshold_rule::{ThresholdRule, ThresholdSet};

/// 压测配置文件(yaml或json)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    // 第0个阶段的起点并发
    #[serde(default)]
    pub start_vus: usize,
    pub stages: Vec<Stage>,
    // "逻辑主机:端口" -> "物理地址:端口"
    #[serde(default)]
    pub hosts: BTreeMap<String, String>,
    #[serde(default)]
    pub thresholds: ThresholdSet,
    pub script: Vec<ScriptStep>,
    // 每轮迭代之后的等待
    #[serde(default, with = "crate::models::serde_duration")]
    pub sleep: Duration,
    #[serde(default = "default_timeout", with = "crate::models::serde_duration")]
    pub timeout: Duration,
    #[serde(default = "default_graceful_stop", with = "crate::models::serde_duration")]
    pub graceful_stop: Duration,
    #[serde(default = "default_tick_interval", with = "crate::models::serde_duration")]
    pub tick_interval: Duration,
    #[serde(default = "default_checkpoint_interval", with = "crate::models::serde_duration")]
    pub checkpoint_interval: Duration,
    #[serde(default = "default_max_spawn_failures")]
    pub max_spawn_failures: u32,
    #[serde(default)]
    pub user_agent: Option<String>,
}

fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_graceful_stop() -> Duration {
    Duration::from_secs(30)
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_checkpoint_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_max_spawn_failures() -> u32 {
    5
}

// 一个域名在连接时被解析到的地址，Host头和SNI保持原域名
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostOverride {
    pub host: String,
    pub addrs: Vec<SocketAddr>,
    // (逻辑端口, 物理端口)，只记录两者不同的
    pub ports: Vec<(u16, u16)>,
}

impl HostOverride {
    /// 逻辑端口被改写到的物理端口
    pub fn remap(&self, port: u16) -> Option<u16> {
        self.ports
            .iter()
            .find(|(logical, _)| *logical == port)
            .map(|(_, physical)| *physical)
    }
}

/// 校验通过后的压测计划，启动之后不再修改，各组件通过Arc共享
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub config: RunConfig,
    pub ramp: RampPlan,
    pub rules: Vec<ThresholdRule>,
    // 按脚本顺序展开的所有请求，下标就是request_index
    pub requests: Vec<RequestOption>,
    pub host_overrides: Vec<HostOverride>,
}

impl RunConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            serde_json::from_str(&content)
                .map_err(|e| EngineError::config(format!("解析json配置失败: {}", e)))
        } else {
            Self::from_yaml(&content)
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| EngineError::config(format!("解析yaml配置失败: {}", e)))
    }

    // 校验所有配置，任何问题都是配置错误
    pub fn into_plan(self) -> Result<RunPlan> {
        if self.stages.is_empty() {
            return Err(EngineError::config("至少需要一个阶段"));
        }
        for (i, stage) in self.stages.iter().enumerate() {
            if stage.duration.is_zero() {
                return Err(EngineError::config(format!("第{}个阶段的时长必须大于0", i + 1)));
            }
        }
        for (name, value) in [
            ("timeout", self.timeout),
            ("tick_interval", self.tick_interval),
            ("checkpoint_interval", self.checkpoint_interval),
        ] {
            if value.is_zero() {
                return Err(EngineError::config(format!("{}必须大于0", name)));
            }
        }
        if self.max_spawn_failures == 0 {
            return Err(EngineError::config("max_spawn_failures必须大于0"));
        }
        if let Some(user_agent) = &self.user_agent {
            HeaderValue::from_str(user_agent)
                .map_err(|_| EngineError::config(format!("无效的user_agent: {}", user_agent)))?;
        }
        if self.script.is_empty() {
            return Err(EngineError::config("脚本里至少需要一个请求"));
        }

        let mut requests = Vec::new();
        for step in &self.script {
            if let ScriptStep::Batch(batch) = step {
                if batch.is_empty() {
                    return Err(EngineError::config("batch不能为空"));
                }
            }
            for request in step.requests() {
                validate_request(request)?;
                requests.push(request.clone());
            }
        }
        check_request_names(&requests)?;

        let rules = self.thresholds.rules()?;
        for rule in &rules {
            if let Some(name) = &rule.key.request {
                if !requests.iter().any(|r| r.display_name() == *name) {
                    return Err(EngineError::config(format!(
                        "阈值{}引用了不存在的请求: {}",
                        rule.key, name
                    )));
                }
            }
        }

        let host_overrides = parse_host_overrides(&self.hosts)?;
        let ramp = RampPlan::new(self.start_vus, self.stages.clone());

        Ok(RunPlan {
            config: self,
            ramp,
            rules,
            requests,
            host_overrides,
        })
    }
}

fn validate_request(request: &RequestOption) -> Result<()> {
    let name = request.display_name();
    let url = Url::parse(&request.url)
        .map_err(|e| EngineError::config(format!("{}: 无效的url: {}", name, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(EngineError::config(format!("{}: 只支持http和https", name)));
    }
    Method::from_str(&request.method.to_uppercase())
        .map_err(|_| EngineError::config(format!("{}: 无效的请求方法{}", name, request.method)))?;

    let bodies = [request.json.is_some(), request.form.is_some(), request.body.is_some()];
    if bodies.iter().filter(|b| **b).count() > 1 {
        return Err(EngineError::config(format!("{}: json、form和body不允许同时发送", name)));
    }
    if let Some(headers) = &request.headers {
        for (k, v) in headers {
            k.parse::<HeaderName>()
                .map_err(|_| EngineError::config(format!("{}: 无效的header名称{}", name, k)))?;
            v.parse::<HeaderValue>()
                .map_err(|_| EngineError::config(format!("{}: 无效的header值{}", name, v)))?;
        }
    }
    if let Some(cookies) = &request.cookies {
        HeaderValue::from_str(cookies)
            .map_err(|_| EngineError::config(format!("{}: 无效的cookie", name)))?;
    }
    if matches!(request.timeout, Some(t) if t.is_zero()) {
        return Err(EngineError::config(format!("{}: 超时时间必须大于0", name)));
    }
    if let Some(checks) = &request.checks {
        for check in checks {
            jsonpath_lib::select(&Value::Null, &check.jsonpath).map_err(|e| {
                EngineError::config(format!("{}: 无效的jsonpath {}: {:?}", name, check.jsonpath, e))
            })?;
        }
    }
    Ok(())
}

// 同一个域名的所有端口合并成一组地址交给http客户端
//
// 客户端只改写ip，端口不同时由请求自己改写url端口并带上原来的Host头，
// 所以同一主机的不同端口必须指向同一个ip
fn parse_host_overrides(hosts: &BTreeMap<String, String>) -> Result<Vec<HostOverride>> {
    let mut overrides: Vec<HostOverride> = Vec::new();
    for (logical, physical) in hosts {
        let (host, port) = split_host_port(logical)
            .ok_or_else(|| EngineError::config(format!("无效的逻辑主机: {}", logical)))?;
        let addr = match physical.parse::<SocketAddr>() {
            Ok(addr) => addr,
            Err(_) => {
                let ip = physical.parse::<IpAddr>().map_err(|_| {
                    EngineError::config(format!("{}: 物理地址必须是ip或ip:端口: {}", logical, physical))
                })?;
                SocketAddr::new(ip, port.unwrap_or(0))
            }
        };
        let remap = match port {
            Some(port) if addr.port() != port => Some((port, addr.port())),
            Some(_) => None,
            None if addr.port() != 0 => {
                return Err(EngineError::config(format!(
                    "{} -> {}: 逻辑主机没有端口时物理地址不能带端口",
                    logical, physical
                )));
            }
            None => None,
        };
        let entry = match overrides.iter().position(|o| o.host == host) {
            Some(i) => &mut overrides[i],
            None => {
                overrides.push(HostOverride {
                    host: host.to_string(),
                    addrs: Vec::new(),
                    ports: Vec::new(),
                });
                let last = overrides.len() - 1;
                &mut overrides[last]
            }
        };
        if entry.addrs.iter().any(|a| a.ip() != addr.ip()) {
            return Err(EngineError::config(format!(
                "{}: 同一主机的不同端口必须映射到同一个ip",
                host
            )));
        }
        if !entry.addrs.contains(&addr) {
            entry.addrs.push(addr);
        }
        entry.ports.extend(remap);
    }
    Ok(overrides)
}

fn split_host_port(raw: &str) -> Option<(&str, Option<u16>)> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => Some((host, Some(port.parse().ok()?))),
        Some(_) => None,
        None => Some((raw, None)),
    }
}
