use std::collections::HashMap;

use serde::Serialize;

// 错误表最多保留的不同条目数，超出的只计数
const MAX_DISTINCT_ERRORS: usize = 512;

#[derive(Debug, Default)]
pub struct HttpErrorStats {
    // {(状态码, 错误信息, url): 次数}
    errors: HashMap<(u16, String, String), u64>,
    // 超出上限后丢掉明细的次数
    overflow: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpErrorRow {
    pub status: u16,
    pub message: String,
    pub url: String,
    pub count: u64,
}

impl HttpErrorStats {
    pub fn new() -> Self {
        Self::default()
    }

    // 增加一个错误和对应的出现次数
    pub fn increment(&mut self, status_code: u16, error_message: String, url: String) {
        let key = (status_code, error_message, url);
        if let Some(count) = self.errors.get_mut(&key) {
            *count += 1;
        } else if self.errors.len() < MAX_DISTINCT_ERRORS {
            self.errors.insert(key, 1);
        } else {
            self.overflow += 1;
        }
    }

    pub fn overflow(&self) -> u64 {
        self.overflow
    }

    // 按次数从多到少排好
    pub fn rows(&self) -> Vec<HttpErrorRow> {
        let mut rows: Vec<HttpErrorRow> = self
            .errors
            .iter()
            .map(|((status, message, url), count)| HttpErrorRow {
                status: *status,
                message: message.clone(),
                url: url.clone(),
                count: *count,
            })
            .collect();
        rows.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.status.cmp(&b.status))
                .then_with(|| a.url.cmp(&b.url))
                .then_with(|| a.message.cmp(&b.message))
        });
        rows
    }
}
