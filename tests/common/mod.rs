//! 集成测试共用的点表行与测试PLC通道构造函数

#![allow(dead_code)]

use std::sync::Arc;

use fat_allocator::services::{BatchRegistry, ChannelAllocationService, TestRigChannelPool};
use fat_allocator::{
    AllocationRequest, BatchInfo, CompatibilityClass, ModuleType, PowerSupplyType, RawChannelRow,
    RigAddressPolicy, TestRigChannel, TestRigChannelType,
};
use serde_json::json;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 紧凑布局的点表行；模拟量带 0~100 量程
pub fn row(tag: &str, module_type: &str, power: &str) -> RawChannelRow {
    let analog = matches!(module_type, "AI" | "AO");
    let value = if analog {
        json!([tag, "", "", "", "", "", module_type, power, "FLOAT", "40001", 0, 100])
    } else {
        json!([tag, "", "", "", "", "", module_type, power, "BOOL", "00001"])
    };
    serde_json::from_value(value).unwrap()
}

pub fn rows(prefix: &str, count: usize, module_type: &str, power: &str) -> Vec<RawChannelRow> {
    (1..=count)
        .map(|i| row(&format!("{}_{}", prefix, i), module_type, power))
        .collect()
}

pub fn class(module_type: ModuleType, power: PowerSupplyType) -> CompatibilityClass {
    CompatibilityClass::new(module_type, power)
}

/// 为给定被测类别生成 count 个测试PLC通道
pub fn rig_channels(class: CompatibilityClass, count: usize, start_address: u32) -> Vec<TestRigChannel> {
    let channel_type = TestRigChannelType::serving(class);
    (1..=count)
        .map(|i| {
            TestRigChannel::new(
                format!("{}1_{}", channel_type.as_str(), i),
                channel_type,
                (start_address + i as u32).to_string(),
            )
        })
        .collect()
}

pub fn pool(channels: &[TestRigChannel]) -> Arc<TestRigChannelPool> {
    Arc::new(TestRigChannelPool::from_channels(channels).unwrap())
}

pub fn service(pool: Arc<TestRigChannelPool>) -> ChannelAllocationService {
    ChannelAllocationService::new(pool, Arc::new(BatchRegistry::new()), RigAddressPolicy::AllChannels)
}

pub fn request(rows: Vec<RawChannelRow>, max_channels_per_batch: i64) -> AllocationRequest {
    AllocationRequest {
        batch_info: BatchInfo::new(Some("FAT-2000".to_string()), Some("SN-0001".to_string())),
        channel_definitions: rows,
        max_channels_per_batch,
        max_concurrent_tests: 2,
        auto_start: false,
        column_layout: None,
    }
}
