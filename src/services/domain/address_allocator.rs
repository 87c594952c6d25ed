//! # 测试PLC地址分配器
//!
//! ## 业务作用
//! 为批次中需要测试PLC通道的被测通道分配地址：
//! - 同一批次内地址两两不同
//! - 地址类别必须与通道类别严格对应，不做跨类别替代
//! - 某类别需求超过该类别通道总数时整个批次不分配（全有或全无）
//! - 池中完全没有某类别时只标记相关通道，批次其余部分照常分配

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::log_allocation_failure;
use crate::models::{AllocationState, Batch, CompatibilityClass, RigAddressPolicy, TestRigAddress};
use crate::services::domain::test_rig_pool::{SlotDemand, SlotOutcome, TestRigChannelPool};
use crate::utils::error::{AppError, AppResult};

/// 单通道分配状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelAllocationStatus {
    /// 已分配地址（批次未提交时为试分配结果）
    Assigned,
    /// 按分配策略不需要测试PLC通道
    NotRequired,
    /// 池中没有该类别的通道
    CompatibilityError,
    /// 该类别通道数不足
    CapacityExhausted,
}

/// 单通道分配结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelAllocationOutcome {
    pub channel_id: String,
    pub tag: String,
    pub class: CompatibilityClass,
    pub status: ChannelAllocationStatus,
    pub address: Option<TestRigAddress>,
}

/// 批次分配报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchAllocationReport {
    pub batch_id: String,
    pub batch_name: String,
    /// 地址是否已写入批次
    pub allocated: bool,
    /// 按批次通道顺序
    pub outcomes: Vec<ChannelAllocationOutcome>,
    pub errors: Vec<AppError>,
}

impl BatchAllocationReport {
    pub fn assigned_count(&self) -> usize {
        if !self.allocated {
            return 0;
        }
        self.outcomes
            .iter()
            .filter(|o| o.status == ChannelAllocationStatus::Assigned)
            .count()
    }

    /// 需要地址却没有拿到地址的通道
    pub fn unassigned_channels(&self) -> Vec<&ChannelAllocationOutcome> {
        self.outcomes
            .iter()
            .filter(|o| match o.status {
                ChannelAllocationStatus::NotRequired => false,
                ChannelAllocationStatus::Assigned => !self.allocated,
                _ => true,
            })
            .collect()
    }
}

/// 测试PLC地址分配器
pub struct AddressAllocator {
    pool: Arc<TestRigChannelPool>,
    policy: RigAddressPolicy,
}

impl AddressAllocator {
    pub fn new(pool: Arc<TestRigChannelPool>, policy: RigAddressPolicy) -> Self {
        Self { pool, policy }
    }

    pub fn pool(&self) -> &Arc<TestRigChannelPool> {
        &self.pool
    }

    /// 为一个批次分配地址
    ///
    /// 成功时地址写入各通道，批次状态为 Allocated；此时批次并不持有这些地址，
    /// 激活时再通过 `claim` 占用。容量不足时批次保持原样，状态为 Failed
    pub fn allocate_batch(&self, batch: &mut Batch) -> AppResult<BatchAllocationReport> {
        if batch.allocation_state != AllocationState::Pending {
            return Err(AppError::state_transition_error(
                format!("{:?}", batch.allocation_state),
                "Allocated",
                format!("{} 已经分配过地址", batch.batch_id),
            ));
        }

        let demands: Vec<SlotDemand> = batch
            .channels
            .iter()
            .filter(|c| self.policy.requires_rig_address(c.module_type))
            .map(|c| SlotDemand {
                channel_id: c.id.clone(),
                class: c.class(),
            })
            .collect();

        let reservation = self.pool.reserve(&batch.batch_id, &demands)?;
        let mut planned: HashMap<String, SlotOutcome> = reservation.outcomes.into_iter().collect();

        let mut errors = reservation.errors;
        let mut outcomes = Vec::with_capacity(batch.len());
        for channel in &batch.channels {
            let (status, address) = match planned.remove(&channel.id) {
                None => (ChannelAllocationStatus::NotRequired, None),
                Some(SlotOutcome::Assigned { address }) => (ChannelAllocationStatus::Assigned, Some(address)),
                Some(SlotOutcome::Incompatible) => {
                    errors.push(AppError::compatibility_error(&batch.batch_id, &channel.tag, channel.class()));
                    (ChannelAllocationStatus::CompatibilityError, None)
                }
                Some(SlotOutcome::Exhausted) => (ChannelAllocationStatus::CapacityExhausted, None),
            };
            outcomes.push(ChannelAllocationOutcome {
                channel_id: channel.id.clone(),
                tag: channel.tag.clone(),
                class: channel.class(),
                status,
                address,
            });
        }

        if reservation.committed {
            for (channel, outcome) in batch.channels.iter_mut().zip(&outcomes) {
                if let Some(address) = &outcome.address {
                    channel.assign_test_rig_address(address.clone())?;
                }
            }
            batch.allocation_state = AllocationState::Allocated;
            log::info!(
                "{} ({}) 地址分配完成: {}/{} 个通道已分配",
                batch.batch_name,
                batch.batch_id,
                batch.assigned_addresses().len(),
                batch.len()
            );
        } else {
            batch.allocation_state = AllocationState::Failed;
        }

        for error in &errors {
            log_allocation_failure!("{}", error);
        }

        Ok(BatchAllocationReport {
            batch_id: batch.batch_id.clone(),
            batch_name: batch.batch_name.clone(),
            allocated: reservation.committed,
            outcomes,
            errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        BatchInfo, ChannelDefinition, ModuleType, PointDataType, PowerSupplyType, SignalSpec,
        TestRigChannel, TestRigChannelType,
    };

    fn ai(tag: &str) -> ChannelDefinition {
        ChannelDefinition::new(
            tag,
            "40001",
            ModuleType::AI,
            PowerSupplyType::Powered,
            PointDataType::Float,
            SignalSpec::analog(4.0, 20.0).unwrap(),
        )
        .unwrap()
    }

    fn di(tag: &str) -> ChannelDefinition {
        ChannelDefinition::new(tag, "00001", ModuleType::DI, PowerSupplyType::Powered, PointDataType::Bool, SignalSpec::Digital)
            .unwrap()
    }

    fn batch(channels: Vec<ChannelDefinition>) -> Batch {
        let mut batch = Batch::new("run_batch_1", 1, 8, BatchInfo::default()).unwrap();
        for channel in channels {
            batch.push_channel(channel).unwrap();
        }
        batch
    }

    fn allocator(channels: Vec<TestRigChannel>, policy: RigAddressPolicy) -> AddressAllocator {
        AddressAllocator::new(Arc::new(TestRigChannelPool::from_channels(&channels).unwrap()), policy)
    }

    #[test]
    fn test_addresses_are_written_and_unique() {
        let _ = env_logger::builder().is_test(true).try_init();
        let allocator = allocator(
            vec![
                TestRigChannel::new("AO1_1", TestRigChannelType::AONone, "40101"),
                TestRigChannel::new("AO1_2", TestRigChannelType::AONone, "40102"),
                TestRigChannel::new("DO1_1", TestRigChannelType::DONone, "00101"),
            ],
            RigAddressPolicy::AllChannels,
        );
        let mut batch = batch(vec![ai("PT_1"), ai("PT_2"), di("XS_1")]);

        let report = allocator.allocate_batch(&mut batch).unwrap();
        assert!(report.allocated);
        assert!(report.errors.is_empty());
        assert_eq!(report.assigned_count(), 3);
        assert_eq!(batch.allocation_state, AllocationState::Allocated);
        assert!(batch.has_unique_rig_addresses());
        assert_eq!(batch.channels[2].test_rig_address().unwrap().channel_tag, "DO1_1");

        let err = allocator.allocate_batch(&mut batch).unwrap_err();
        assert_eq!(err.error_code(), "STATE_TRANSITION_ERROR");
    }

    #[test]
    fn test_exhaustion_reports_tentative_outcomes_without_writing() {
        let allocator = allocator(
            vec![TestRigChannel::new("AO1_1", TestRigChannelType::AONone, "40101")],
            RigAddressPolicy::AllChannels,
        );
        let mut batch = batch(vec![ai("PT_1"), ai("PT_2")]);

        let report = allocator.allocate_batch(&mut batch).unwrap();
        assert!(!report.allocated);
        assert_eq!(report.outcomes[0].status, ChannelAllocationStatus::Assigned);
        assert_eq!(report.outcomes[1].status, ChannelAllocationStatus::CapacityExhausted);
        assert!(matches!(
            report.errors[0],
            AppError::CapacityExhaustionError { requested: 2, available: 1, shortfall: 1, .. }
        ));
        assert_eq!(batch.allocation_state, AllocationState::Failed);
        assert!(batch.assigned_addresses().is_empty());
        assert_eq!(report.unassigned_channels().len(), 2);
    }

    #[test]
    fn test_missing_class_flags_channel_only() {
        let allocator = allocator(
            vec![TestRigChannel::new("AO1_1", TestRigChannelType::AONone, "40101")],
            RigAddressPolicy::AllChannels,
        );
        let mut batch = batch(vec![ai("PT_1"), di("XS_1")]);

        let report = allocator.allocate_batch(&mut batch).unwrap();
        assert!(report.allocated);
        assert_eq!(report.outcomes[1].status, ChannelAllocationStatus::CompatibilityError);
        assert_eq!(report.errors[0].error_code(), "COMPATIBILITY_ERROR");
        assert_eq!(batch.assigned_addresses().len(), 1);
    }

    #[test]
    fn test_analog_only_policy_skips_digital_channels() {
        let allocator = allocator(
            vec![TestRigChannel::new("AO1_1", TestRigChannelType::AONone, "40101")],
            RigAddressPolicy::AnalogOnly,
        );
        let mut batch = batch(vec![ai("PT_1"), di("XS_1")]);

        let report = allocator.allocate_batch(&mut batch).unwrap();
        assert!(report.errors.is_empty());
        assert_eq!(report.outcomes[1].status, ChannelAllocationStatus::NotRequired);
        assert!(batch.channels[1].test_rig_address().is_none());
    }
}
