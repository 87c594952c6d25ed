use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 应用程序统一错误类型
/// 用于封装分配流程中可能出现的各种错误，提供统一的错误处理机制
///
/// **传播策略**:
/// - 配置错误是致命的，在任何分配开始之前直接返回
/// - 容量耗尽、兼容性错误按批次/通道收集进分配报告，不会中断整个运行
/// - 行级校验失败不使用本类型，而是记录为 `RowRejection`
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AppError {
    /// 输入/输出错误
    #[error("IO错误: {message} (Kind: {kind})")]
    IoError { message: String, kind: String },

    /// 配置相关错误（致命）
    ///
    /// **业务含义**: 批次容量、并发数不是正整数，或测试PLC通道表本身有误
    /// **处理方式**: 立即报告，不产生任何部分输出
    #[error("配置错误: {message}")]
    ConfigurationError { message: String },

    /// 验证错误（数据验证失败）
    #[error("验证错误: {message}")]
    ValidationError { message: String },

    /// 测试PLC通道容量耗尽
    ///
    /// **业务含义**: 某批次对某一兼容类别的需求超过了该类别的测试PLC通道总数
    /// **处理方式**: 该批次整体不分配（全有或全无），其余批次继续
    #[error("测试PLC通道容量不足: 批次 {batch_id} 的 {class} 需要 {requested} 个通道，仅有 {available} 个，缺口 {shortfall}")]
    CapacityExhaustionError {
        batch_id: String,
        class: String,
        requested: usize,
        available: usize,
        shortfall: usize,
    },

    /// 通道兼容性错误
    ///
    /// **业务含义**: 测试PLC上没有任何与该通道类别严格匹配的通道，不做跨类别替代
    /// **处理方式**: 该通道标记为未分配，所在批次继续
    #[error("通道兼容性错误: 批次 {batch_id} 中的 {tag} 没有匹配 {class} 的测试PLC通道")]
    CompatibilityError {
        batch_id: String,
        tag: String,
        class: String,
    },

    /// 并发/异步操作错误
    #[error("并发错误: {message}")]
    ConcurrencyError { message: String },

    /// 资源未找到错误
    #[error("资源未找到: {resource_type} - {message}")]
    NotFoundError {
        resource_type: String,
        message: String,
    },

    /// 测试执行相关错误
    #[error("测试执行错误: {test_type} - {message}")]
    TestExecutionError {
        test_type: String,
        message: String,
    },

    /// 状态转换错误
    #[error("状态转换错误: 从 {from_state} 到 {to_state} - {message}")]
    StateTransitionError {
        from_state: String,
        to_state: String,
        message: String,
    },

    /// JSON序列化/反序列化错误
    #[error("JSON序列化/反序列化错误: {message}")]
    JsonError { message: String },
}

impl AppError {
    /// 创建IO错误
    pub fn io_error(message: impl Into<String>, kind_str: impl Into<String>) -> Self {
        Self::IoError {
            message: message.into(),
            kind: kind_str.into(),
        }
    }

    /// 创建配置错误
    pub fn configuration_error(message: impl Into<String>) -> Self {
        Self::ConfigurationError {
            message: message.into(),
        }
    }

    /// 创建验证错误
    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
        }
    }

    /// 创建容量耗尽错误
    ///
    /// `shortfall` 由 `requested - available` 推出，调用方无需自行计算
    pub fn capacity_exhaustion_error(
        batch_id: impl Into<String>,
        class: impl ToString,
        requested: usize,
        available: usize,
    ) -> Self {
        Self::CapacityExhaustionError {
            batch_id: batch_id.into(),
            class: class.to_string(),
            requested,
            available,
            shortfall: requested.saturating_sub(available),
        }
    }

    /// 创建通道兼容性错误
    pub fn compatibility_error(
        batch_id: impl Into<String>,
        tag: impl Into<String>,
        class: impl ToString,
    ) -> Self {
        Self::CompatibilityError {
            batch_id: batch_id.into(),
            tag: tag.into(),
            class: class.to_string(),
        }
    }

    /// 创建并发错误
    pub fn concurrency_error(message: impl Into<String>) -> Self {
        Self::ConcurrencyError {
            message: message.into(),
        }
    }

    /// 创建资源未找到错误
    pub fn not_found_error(resource_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NotFoundError {
            resource_type: resource_type.into(),
            message: message.into(),
        }
    }

    /// 创建测试执行错误
    pub fn test_execution_error(test_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TestExecutionError {
            test_type: test_type.into(),
            message: message.into(),
        }
    }

    /// 创建状态转换错误
    pub fn state_transition_error(
        from_state: impl Into<String>,
        to_state: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::StateTransitionError {
            from_state: from_state.into(),
            to_state: to_state.into(),
            message: message.into(),
        }
    }

    /// 创建JSON序列化错误
    pub fn json_error(message: impl Into<String>) -> Self {
        Self::JsonError {
            message: message.into(),
        }
    }

    /// 是否为致命错误（需要中止整个运行）
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::ConfigurationError { .. } | AppError::IoError { .. } | AppError::JsonError { .. }
        )
    }

    /// 获取错误的简短描述
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::IoError { .. } => "IO_ERROR",
            AppError::ConfigurationError { .. } => "CONFIGURATION_ERROR",
            AppError::ValidationError { .. } => "VALIDATION_ERROR",
            AppError::CapacityExhaustionError { .. } => "CAPACITY_EXHAUSTION_ERROR",
            AppError::CompatibilityError { .. } => "COMPATIBILITY_ERROR",
            AppError::ConcurrencyError { .. } => "CONCURRENCY_ERROR",
            AppError::NotFoundError { .. } => "NOT_FOUND_ERROR",
            AppError::TestExecutionError { .. } => "TEST_EXECUTION_ERROR",
            AppError::StateTransitionError { .. } => "STATE_TRANSITION_ERROR",
            AppError::JsonError { .. } => "JSON_ERROR",
        }
    }
}

/// 标准 I/O 错误到 AppError 的转换
impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::IoError { message: err.to_string(), kind: format!("{:?}", err.kind()) }
    }
}

/// serde_json 错误到 AppError 的转换
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::JsonError { message: err.to_string() }
    }
}

/// config 库错误到 AppError 的转换
///
/// 配置文件缺失、格式错误、字段类型不符都归为配置错误
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigurationError { message: format!("加载配置失败: {}", err) }
    }
}

/// 应用程序结果类型别名
/// 简化错误处理的类型定义
pub type AppResult<T> = Result<T, AppError>;
