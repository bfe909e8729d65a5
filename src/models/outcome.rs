use std::fmt;
use std::time::Duration;

use time::OffsetDateTime;

// 请求失败的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestErrorKind {
    Timeout,
    Connect,
    // 收到了响应但不是2xx
    Status,
    // 读取响应体失败
    Body,
    Other,
}

impl fmt::Display for RequestErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestErrorKind::Timeout => "timeout",
            RequestErrorKind::Connect => "connect",
            RequestErrorKind::Status => "status",
            RequestErrorKind::Body => "body",
            RequestErrorKind::Other => "other",
        };
        f.write_str(s)
    }
}

impl From<&reqwest::Error> for RequestErrorKind {
    fn from(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            RequestErrorKind::Timeout
        } else if e.is_connect() {
            RequestErrorKind::Connect
        } else if e.is_body() || e.is_decode() {
            RequestErrorKind::Body
        } else if e.is_status() {
            RequestErrorKind::Status
        } else {
            RequestErrorKind::Other
        }
    }
}

#[derive(Debug, Clone)]
pub enum OutcomeStatus {
    // 拿到了状态码(可能是非2xx)
    Response(u16),
    // 没有拿到可用的响应
    Error { kind: RequestErrorKind, message: String },
}

/// 单个请求的结果，由虚拟用户产生，交给聚合器消费一次后丢弃
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    pub timestamp: OffsetDateTime,
    // 在脚本里的请求序号，用来定位单接口统计
    pub request_index: usize,
    pub method: String,
    pub url: String,
    pub status: OutcomeStatus,
    pub duration: Duration,
    pub bytes_received: u64,
}

impl RequestOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, OutcomeStatus::Response(code) if (200..300).contains(&code))
    }

    pub fn status_code(&self) -> u16 {
        match self.status {
            OutcomeStatus::Response(code) => code,
            OutcomeStatus::Error { .. } => 0,
        }
    }

    pub fn error_kind(&self) -> Option<RequestErrorKind> {
        match &self.status {
            OutcomeStatus::Response(code) if !(200..300).contains(code) => {
                Some(RequestErrorKind::Status)
            }
            OutcomeStatus::Response(_) => None,
            OutcomeStatus::Error { kind, .. } => Some(*kind),
        }
    }

    // 错误表里用的描述
    pub fn error_message(&self) -> Option<String> {
        match &self.status {
            OutcomeStatus::Response(code) if !(200..300).contains(code) => {
                Some(format!("HTTP 错误: 状态码 {}", code))
            }
            OutcomeStatus::Response(_) => None,
            OutcomeStatus::Error { message, .. } => Some(message.clone()),
        }
    }
}
