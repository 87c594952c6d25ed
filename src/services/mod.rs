/// 服务层模块
///
/// - Domain Layer: 领域服务，包含分配流程各阶段的核心逻辑
/// - 通道分配服务: 串联各阶段，处理一次完整的分配请求

/// 领域层服务模块
pub mod domain;

/// 通道分配服务模块
pub mod channel_allocation_service;

// 重新导出领域层服务
pub use domain::*;

// 重新导出通道分配服务
pub use channel_allocation_service::{
    AllocationRequest, AllocationResult, AllocationSummary, ChannelAllocationService,
    ClassStats, CompletionStatus, IChannelAllocationService,
};
