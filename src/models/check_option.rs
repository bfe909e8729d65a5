use serde::{Deserialize, Serialize};
use serde_json::Value;

// 响应断言: 用jsonpath取出唯一的值和expected比较，结果计入checks指标
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckOption {
    pub jsonpath: String,
    pub expected: Value,
}
