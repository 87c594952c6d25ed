/// FAT 测试批次分配器 - 核心库
///
/// 校验点表 → 兼容性分组 → 批次装箱 → 测试PLC地址分配 → 批次登记 → 有界并发执行
pub mod logging;
pub mod models;
pub mod services;
pub mod utils;

// 重新导出常用类型，方便使用
pub use models::*;
pub use services::*;
pub use utils::{AppConfig, AppError, AppResult};
