use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::check_option::CheckOption;

// 脚本里的一个请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestOption {
    // 为空时用 "METHOD url"
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub cookies: Option<String>,
    // json / form / body 三选一
    #[serde(default)]
    pub json: Option<Value>,
    #[serde(default)]
    pub form: Option<HashMap<String, String>>,
    #[serde(default)]
    pub body: Option<String>,
    // 不填就用全局超时
    #[serde(default, with = "crate::models::serde_duration::option")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub checks: Option<Vec<CheckOption>>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl RequestOption {
    pub fn get(url: impl Into<String>) -> Self {
        RequestOption {
            name: None,
            method: default_method(),
            url: url.into(),
            headers: None,
            cookies: None,
            json: None,
            form: None,
            body: None,
            timeout: None,
            checks: None,
        }
    }

    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("{} {}", self.method.to_uppercase(), self.url),
        }
    }
}

// 每轮迭代里的一步: 单个请求，或者并发发出的一批请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptStep {
    Request(RequestOption),
    Batch(Vec<RequestOption>),
}

impl ScriptStep {
    pub fn requests(&self) -> &[RequestOption] {
        match self {
            ScriptStep::Request(r) => std::slice::from_ref(r),
            ScriptStep::Batch(rs) => rs,
        }
    }
}
