/// 核心枚举定义模块
pub mod enums;
/// 核心结构体定义模块
pub mod structs;
/// 测试PLC配置模型模块
pub mod test_rig_config;

// 重新导出所有类型，方便其他模块使用
pub use enums::*;
pub use structs::*;
pub use test_rig_config::*;
