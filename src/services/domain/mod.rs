/// 领域服务层模块
/// 包含分配流程的核心业务逻辑：校验 → 分组 → 装箱 → 地址分配 → 登记 → 执行调度

/// 通道定义校验器 - 把原始点表行转换为通道定义
pub mod definition_validator;

/// 兼容性分组 - 按 (模块类型, 供电类型) 分组
pub mod compatibility_grouper;

/// 批次装箱 - 贪心填充固定容量的批次
pub mod batch_packer;

/// 测试PLC通道池 - 按类别管理地址的占用与归还
pub mod test_rig_pool;

/// 测试PLC地址分配器 - 为批次内的通道分配地址
pub mod address_allocator;

/// 批次登记表 - 批次状态与统计
pub mod batch_registry;

/// 批次执行调度器 - 有界并发执行已分配的批次
pub mod batch_execution_scheduler;

// 重新导出常用类型
pub use definition_validator::{ColumnLayout, DefinitionValidator, ValidationOutcome};
pub use compatibility_grouper::{group_by_compatibility, ChannelGroup};
pub use batch_packer::{batch_id_for, pack};
pub use test_rig_pool::{ClaimOutcome, Reservation, SlotDemand, SlotOutcome, TestRigChannelPool};
pub use address_allocator::{
    AddressAllocator, BatchAllocationReport, ChannelAllocationOutcome, ChannelAllocationStatus,
};
pub use batch_registry::{BatchRegistry, RegistrySummary};
pub use batch_execution_scheduler::{
    BatchExecutionScheduler, BatchRunSummary, ChannelResult, IBatchTestExecutor,
};
