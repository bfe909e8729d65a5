use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Error};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE, HOST};
use reqwest::{Client, Method, RequestBuilder, Url};
use serde_json::Value;

use crate::models::check_option::CheckOption;
use crate::models::request_option::ScriptStep;
use crate::models::run_config::{HostOverride, RunPlan};

// 默认的user-agent: 程序名 版本 (系统; 系统版本)
pub fn default_user_agent() -> String {
    let info = os_info::get();
    format!(
        "{} {} ({}; {})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        info.os_type(),
        info.version()
    )
}

/// 给一个虚拟用户构建http客户端
///
/// host映射在连接时生效，请求里的Host头和TLS的SNI仍然是原来的域名。
/// 这里只改写ip，端口的改写见`Script::from_plan`
pub fn build_client(plan: &RunPlan) -> anyhow::Result<Client> {
    let user_agent = plan
        .config
        .user_agent
        .clone()
        .unwrap_or_else(default_user_agent);
    let mut builder = Client::builder()
        .timeout(plan.config.timeout)
        .user_agent(user_agent);
    for host_override in &plan.host_overrides {
        builder = builder.resolve_to_addrs(&host_override.host, &host_override.addrs);
    }
    builder.build().context("构建http客户端失败")
}

#[derive(Debug, Clone)]
enum PreparedBody {
    Empty,
    Json(Value),
    Form(HashMap<String, String>),
    Text(String),
}

// 提前解析好的请求，每次发送时只需要克隆
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub index: usize,
    pub method: Method,
    // 报告里使用的原始url
    pub url: Url,
    // 真正发出的url，端口可能被host映射改写
    target: Url,
    headers: HeaderMap,
    body: PreparedBody,
    timeout: Option<Duration>,
    pub checks: Vec<CheckOption>,
}

impl PreparedRequest {
    pub fn build(&self, client: &Client) -> RequestBuilder {
        let mut request = client
            .request(self.method.clone(), self.target.clone())
            .headers(self.headers.clone());
        request = match &self.body {
            PreparedBody::Empty => request,
            PreparedBody::Json(value) => request.json(value),
            PreparedBody::Form(form) => request.form(form),
            PreparedBody::Text(text) => request.body(text.clone()),
        };
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        request
    }
}

/// 每轮迭代要执行的脚本: 若干步，每步是一个或一批请求的下标
#[derive(Debug, Clone)]
pub struct Script {
    pub requests: Vec<PreparedRequest>,
    pub steps: Vec<Vec<usize>>,
}

impl Script {
    pub fn from_plan(plan: &RunPlan) -> anyhow::Result<Self> {
        let mut requests = Vec::new();
        let mut steps = Vec::new();
        for step in &plan.config.script {
            let mut indices = Vec::new();
            let members = match step {
                ScriptStep::Request(r) => std::slice::from_ref(r),
                ScriptStep::Batch(batch) => batch.as_slice(),
            };
            for option in members {
                let index = requests.len();
                let name = option.display_name();
                let method = Method::from_str(&option.method.to_uppercase())
                    .map_err(|_| Error::msg(format!("{}: 构建请求方法失败", name)))?;
                let url = Url::parse(&option.url).with_context(|| format!("{}: 无效的url", name))?;
                // 构建请求头
                let mut headers = HeaderMap::new();
                if let Some(map) = &option.headers {
                    for (k, v) in map {
                        let header_name = k
                            .parse::<HeaderName>()
                            .with_context(|| format!("{}: 无效的header名称", name))?;
                        let header_value = v
                            .parse::<HeaderValue>()
                            .with_context(|| format!("{}: 无效的header值", name))?;
                        headers.insert(header_name, header_value);
                    }
                }
                // 构建cookies
                if let Some(cookies) = &option.cookies {
                    let value = HeaderValue::from_str(cookies)
                        .with_context(|| format!("{}: 设置cookie失败", name))?;
                    headers.insert(COOKIE, value);
                }
                let target = remap_port(&url, &plan.host_overrides, &mut headers)
                    .with_context(|| format!("{}: 改写端口失败", name))?;
                let body = if let Some(json) = &option.json {
                    PreparedBody::Json(json.clone())
                } else if let Some(form) = &option.form {
                    PreparedBody::Form(form.clone())
                } else if let Some(text) = &option.body {
                    PreparedBody::Text(text.clone())
                } else {
                    PreparedBody::Empty
                };
                requests.push(PreparedRequest {
                    index,
                    method,
                    url,
                    target,
                    headers,
                    body,
                    timeout: option.timeout,
                    checks: option.checks.clone().unwrap_or_default(),
                });
                indices.push(index);
            }
            steps.push(indices);
        }
        Ok(Script { requests, steps })
    }
}

// 逻辑端口被映射到别的物理端口时改写url端口，Host头保留逻辑的host:port
fn remap_port(url: &Url, overrides: &[HostOverride], headers: &mut HeaderMap) -> anyhow::Result<Url> {
    let mut target = url.clone();
    let (Some(host), Some(port)) = (url.host_str(), url.port_or_known_default()) else {
        return Ok(target);
    };
    let Some(physical) = overrides
        .iter()
        .find(|o| o.host.eq_ignore_ascii_case(host))
        .and_then(|o| o.remap(port))
    else {
        return Ok(target);
    };
    target
        .set_port(Some(physical))
        .map_err(|_| Error::msg(format!("{}不能设置端口", url)))?;
    if !headers.contains_key(HOST) {
        // 默认端口不写进Host头
        let value = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        headers.insert(HOST, HeaderValue::from_str(&value)?);
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::run_config::RunConfig;

    fn script(yaml: &str) -> Script {
        let plan = RunConfig::from_yaml(yaml).unwrap().into_plan().unwrap();
        Script::from_plan(&plan).unwrap()
    }

    #[test]
    fn test_remapped_port_keeps_logical_host() {
        let script = script(
            r#"
stages: [{duration: 1s, target: 1}]
hosts:
  "api.test:443": "127.0.0.1:8443"
  "api.test:8080": "127.0.0.1:18080"
  "other.test:80": "127.0.0.1:80"
script:
  - request: { url: "https://api.test/login" }
  - request: { url: "http://api.test:8080/ip" }
  - request: { url: "http://api.test:9000/ip" }
  - request: { url: "http://other.test/ip" }
  - request: { url: "https://api.test/ip", headers: { Host: "custom.test" } }
"#,
        );
        let login = &script.requests[0];
        assert_eq!(login.url.as_str(), "https://api.test/login");
        assert_eq!(login.target.as_str(), "https://api.test:8443/login");
        assert_eq!(login.headers[HOST], "api.test");

        let ip = &script.requests[1];
        assert_eq!(ip.target.as_str(), "http://api.test:18080/ip");
        assert_eq!(ip.headers[HOST], "api.test:8080");

        // 没有映射的端口和端口一致的映射都不改写
        for request in &script.requests[2..4] {
            assert_eq!(request.target, request.url);
            assert!(!request.headers.contains_key(HOST));
        }

        // 用户自己写的Host头不覆盖
        let custom = &script.requests[4];
        assert_eq!(custom.target.as_str(), "https://api.test:8443/ip");
        assert_eq!(custom.headers[HOST], "custom.test");
    }
}
