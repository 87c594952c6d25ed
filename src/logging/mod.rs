//! # 日志记录模块 (Logging Module)
//!
//! ## 业务说明
//! 记录分配过程中需要追溯的事件：被拒绝的点表行、批次分配失败、批次状态变化
//!
//! ## 日志策略
//! - **业务日志**: `log::info!` 记录各阶段的开始与结果
//! - **问题日志**: 下面的分类宏，统一 `[分类] 消息` 格式，便于检索
//!
//! ## Rust知识点
//! - **日志宏**: 使用log crate的宏系统
//! - **环境配置**: 通过env_logger进行环境变量配置

pub mod logger_config;

pub use logger_config::*;

/// 记录被拒绝的点表行
#[macro_export]
macro_rules! log_row_rejected {
    ($msg:expr) => {
        log::warn!("[点表行被拒绝] {}", $msg);
    };
    ($msg:expr, $($arg:tt)*) => {
        log::warn!("[点表行被拒绝] {}", format!($msg, $($arg)*));
    };
}

/// 记录测试PLC地址分配失败
#[macro_export]
macro_rules! log_allocation_failure {
    ($msg:expr) => {
        log::error!("[地址分配失败] {}", $msg);
    };
    ($msg:expr, $($arg:tt)*) => {
        log::error!("[地址分配失败] {}", format!($msg, $($arg)*));
    };
}

/// 记录批次状态变化
#[macro_export]
macro_rules! log_state_transition {
    ($msg:expr) => {
        log::info!("[批次状态] {}", $msg);
    };
    ($msg:expr, $($arg:tt)*) => {
        log::info!("[批次状态] {}", format!($msg, $($arg)*));
    };
}

// 重新导出宏
pub use crate::log_allocation_failure;
pub use crate::log_row_rejected;
pub use crate::log_state_transition;
