use thiserror::Error;

/// 会中止压测的错误
///
/// 请求层面的错误(网络、超时、非2xx)不在这里，只会记为失败的请求结果
#[derive(Debug, Error)]
pub enum EngineError {
    // 阶段、阈值、请求或者host映射配置不合法，在启动任何虚拟用户之前返回
    #[error("配置错误: {0}")]
    Config(String),

    // 连续多个调度周期都无法启动虚拟用户
    #[error("资源耗尽: 连续{attempts}次无法启动虚拟用户: {reason}")]
    ResourceExhaustion { attempts: u32, reason: String },

    #[error("初始化统计失败: {0}")]
    Metrics(String),

    #[error("读取配置失败: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn config(msg: impl Into<String>) -> Self {
        EngineError::Config(msg.into())
    }

    pub fn is_config(&self) -> bool {
        matches!(self, EngineError::Config(_) | EngineError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
