use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    AllocationState, Batch, BatchInfo, CompatibilityClass, RawChannelRow, RigAddressPolicy,
    RowRejection,
};
use crate::services::domain::{
    group_by_compatibility, pack, AddressAllocator, BatchAllocationReport, BatchRegistry,
    ClaimOutcome, ColumnLayout, DefinitionValidator, TestRigChannelPool,
};
use crate::utils::error::{AppError, AppResult};

/// 分配请求（由上游导入环节提供）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationRequest {
    /// 产品/操作信息，复制到每个批次
    #[serde(default)]
    pub batch_info: BatchInfo,
    /// 原始点表行
    pub channel_definitions: Vec<RawChannelRow>,
    /// 每批次最大通道数（必须为正整数）
    pub max_channels_per_batch: i64,
    /// 最大并发测试批次数（必须为正整数）
    pub max_concurrent_tests: i64,
    /// 分配完成后是否立即开始第一个已分配的批次
    #[serde(default)]
    pub auto_start: bool,
    /// 单元格行的列布局，缺省为紧凑布局
    #[serde(default)]
    pub column_layout: Option<ColumnLayout>,
}

impl AllocationRequest {
    /// 校验批次容量和并发数，返回 (容量, 并发数)
    pub fn validate_limits(&self) -> AppResult<(usize, usize)> {
        let capacity = positive("max_channels_per_batch", self.max_channels_per_batch)?;
        let concurrency = positive("max_concurrent_tests", self.max_concurrent_tests)?;
        Ok((capacity, concurrency))
    }
}

fn positive(name: &str, value: i64) -> AppResult<usize> {
    if value <= 0 {
        return Err(AppError::configuration_error(format!("{} 必须是正整数，实际为 {}", name, value)));
    }
    usize::try_from(value)
        .map_err(|_| AppError::configuration_error(format!("{} 超出范围: {}", name, value)))
}

/// 运行结果完整性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionStatus {
    /// 所有行都被接受，所有批次都已分配，所有需要地址的通道都拿到了地址
    Complete,
    /// 存在被拒绝的行、未分配的批次或未分配地址的通道
    Partial,
}

/// 兼容类别统计
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassStats {
    pub class: CompatibilityClass,
    /// 定义数量
    pub definition_count: usize,
    /// 涉及的批次数量
    pub batch_count: usize,
    /// 测试PLC通道数量
    pub pool_capacity: usize,
    /// 未拿到地址的通道数量
    pub unassigned_count: usize,
}

/// 分配统计信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationSummary {
    pub total_rows: usize,
    pub accepted_definitions: usize,
    pub rejected_rows: usize,
    pub total_batches: usize,
    pub allocated_batches: usize,
    pub unallocated_batches: usize,
    pub unassigned_channels: usize,
    pub max_concurrent_tests: usize,
    /// 自动开始的批次
    pub started_batch: Option<String>,
    /// 按兼容类别的统计
    pub by_class: Vec<ClassStats>,
}

/// 分配结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationResult {
    pub run_id: String,
    /// 按装箱顺序
    pub batches: Vec<Batch>,
    pub rejected_rows: Vec<RowRejection>,
    pub allocation_reports: Vec<BatchAllocationReport>,
    pub allocation_errors: Vec<AppError>,
    pub summary: AllocationSummary,
}

impl AllocationResult {
    pub fn completion(&self) -> CompletionStatus {
        if self.summary.rejected_rows == 0
            && self.summary.unallocated_batches == 0
            && self.summary.unassigned_channels == 0
        {
            CompletionStatus::Complete
        } else {
            CompletionStatus::Partial
        }
    }
}

/// 通道分配服务接口
#[async_trait::async_trait]
pub trait IChannelAllocationService: Send + Sync {
    /// 校验点表、分组、装箱、分配测试PLC地址并登记批次
    async fn allocate(&self, request: AllocationRequest) -> AppResult<AllocationResult>;
}

/// 通道分配服务实现
///
/// 地址按批次顺序逐个规划，规划本身不占用通道，
/// 后面的批次可以复用同一批测试PLC通道；真正的占用发生在批次开始测试时
pub struct ChannelAllocationService {
    pool: Arc<TestRigChannelPool>,
    registry: Arc<BatchRegistry>,
    policy: RigAddressPolicy,
}

impl ChannelAllocationService {
    pub fn new(pool: Arc<TestRigChannelPool>, registry: Arc<BatchRegistry>, policy: RigAddressPolicy) -> Self {
        Self { pool, registry, policy }
    }

    pub fn pool(&self) -> &Arc<TestRigChannelPool> {
        &self.pool
    }

    pub fn registry(&self) -> &Arc<BatchRegistry> {
        &self.registry
    }

    /// 占用第一个已分配批次的地址并开始测试
    async fn start_first_allocated(&self, batches: &[Batch]) -> AppResult<Option<String>> {
        let Some(batch) = batches.iter().find(|b| b.allocation_state == AllocationState::Allocated) else {
            log::warn!("没有已分配的批次，无法自动开始");
            return Ok(None);
        };

        let addresses: Vec<_> = batch.assigned_addresses().into_iter().cloned().collect();
        match self.pool.claim(&batch.batch_id, &addresses)? {
            ClaimOutcome::Claimed => {
                self.registry.start_batch(&batch.batch_id).await?;
                log::info!("自动开始 {} ({})", batch.batch_name, batch.batch_id);
                Ok(Some(batch.batch_id.clone()))
            }
            ClaimOutcome::Busy { address, holder } => {
                log::warn!(
                    "{} 的测试PLC地址 {} 正被批次 {} 使用，暂不自动开始",
                    batch.batch_id,
                    address,
                    holder
                );
                Ok(None)
            }
        }
    }

    fn class_stats(
        &self,
        batches: &[Batch],
        reports: &[BatchAllocationReport],
    ) -> Vec<ClassStats> {
        let mut stats: BTreeMap<CompatibilityClass, ClassStats> = BTreeMap::new();

        for batch in batches {
            let mut touched = Vec::new();
            for channel in &batch.channels {
                let class = channel.class();
                let entry = stats.entry(class).or_insert_with(|| ClassStats {
                    class,
                    definition_count: 0,
                    batch_count: 0,
                    pool_capacity: self.pool.capacity(class),
                    unassigned_count: 0,
                });
                entry.definition_count += 1;
                if !touched.contains(&class) {
                    touched.push(class);
                    entry.batch_count += 1;
                }
            }
        }

        for report in reports {
            for outcome in report.unassigned_channels() {
                if let Some(entry) = stats.get_mut(&outcome.class) {
                    entry.unassigned_count += 1;
                }
            }
        }

        stats.into_values().collect()
    }
}

#[async_trait::async_trait]
impl IChannelAllocationService for ChannelAllocationService {
    async fn allocate(&self, request: AllocationRequest) -> AppResult<AllocationResult> {
        let (capacity, max_concurrent_tests) = request.validate_limits()?;
        let run_id = Uuid::new_v4().to_string();

        log::info!("===== 开始通道分配 =====");
        log::info!(
            "运行 {}: {} 行, 产品型号: {:?}, 序列号: {:?}, 批次容量: {}",
            run_id,
            request.channel_definitions.len(),
            request.batch_info.product_model,
            request.batch_info.serial_number,
            capacity
        );

        let validator = DefinitionValidator::new(request.column_layout.clone().unwrap_or_default());
        let outcome = validator.validate_rows(&request.channel_definitions);
        let total_rows = outcome.total_rows();
        let accepted_definitions = outcome.valid.len();

        let groups = group_by_compatibility(outcome.valid);
        let mut batches = pack(groups, capacity, &run_id, &request.batch_info)?;

        let allocator = AddressAllocator::new(self.pool.clone(), self.policy);
        let mut reports = Vec::with_capacity(batches.len());
        let mut allocation_errors = Vec::new();
        for batch in batches.iter_mut() {
            let report = allocator.allocate_batch(batch)?;
            allocation_errors.extend(report.errors.iter().cloned());
            reports.push(report);
        }

        let by_class = self.class_stats(&batches, &reports);

        for batch in &batches {
            self.registry.register(batch.clone()).await?;
        }

        let started_batch = if request.auto_start {
            self.start_first_allocated(&batches).await?
        } else {
            None
        };

        let mut registered = Vec::with_capacity(batches.len());
        for batch in &batches {
            registered.push(self.registry.get(&batch.batch_id).await?);
        }

        let allocated_batches = reports.iter().filter(|r| r.allocated).count();
        let summary = AllocationSummary {
            total_rows,
            accepted_definitions,
            rejected_rows: outcome.rejected.len(),
            total_batches: registered.len(),
            allocated_batches,
            unallocated_batches: registered.len() - allocated_batches,
            unassigned_channels: reports.iter().map(|r| r.unassigned_channels().len()).sum(),
            max_concurrent_tests,
            started_batch,
            by_class,
        };

        log::info!("===== 分配完成 =====");
        log::info!(
            "结果: {} 个批次 ({} 个已分配), 拒绝 {} 行, {} 个通道未分配地址",
            summary.total_batches,
            summary.allocated_batches,
            summary.rejected_rows,
            summary.unassigned_channels
        );

        Ok(AllocationResult {
            run_id,
            batches: registered,
            rejected_rows: outcome.rejected,
            allocation_reports: reports,
            allocation_errors,
            summary,
        })
    }
}
