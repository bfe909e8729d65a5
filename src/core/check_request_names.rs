use std::collections::HashSet;

use crate::error::{EngineError, Result};
use crate::models::request_option::RequestOption;

// 请求名用来区分单接口统计和阈值选择器，必须唯一
pub(crate) fn check_request_names(requests: &[RequestOption]) -> Result<()> {
    let mut names_set = HashSet::new();
    for request in requests {
        if matches!(&request.name, Some(name) if name.trim().is_empty()) {
            return Err(EngineError::config(format!("{}: 请求名称不能为空", request.url)));
        }
        let name = request.display_name();
        if !names_set.insert(name.clone()) {
            return Err(EngineError::config(format!(
                "重复的请求名: {}，同一个请求出现多次时请设置name",
                name
            )));
        }
    }
    Ok(())
}
