//! 分配流程集成测试
//!
//! 从原始点表行到批次与地址分配报告的完整流程

mod common;

use std::collections::{BTreeMap, HashSet};

use common::*;
use fat_allocator::services::{ChannelAllocationStatus, IChannelAllocationService};
use fat_allocator::{AllocationState, CompletionStatus, ModuleType, PowerSupplyType};

const DI_POWERED: (ModuleType, PowerSupplyType) = (ModuleType::DI, PowerSupplyType::Powered);

/// 20个通道、容量8 → 3个批次，大小依次为 8、8、4
#[tokio::test]
async fn test_twenty_channels_pack_into_three_batches() {
    init_logger();
    let di = class(DI_POWERED.0, DI_POWERED.1);
    let service = service(pool(&rig_channels(di, 8, 100)));

    let result = service.allocate(request(rows("XS", 20, "DI", "有源"), 8)).await.unwrap();

    let sizes: Vec<usize> = result.batches.iter().map(|b| b.len()).collect();
    assert_eq!(sizes, vec![8, 8, 4]);
    assert_eq!(result.completion(), CompletionStatus::Complete);
    for (i, batch) in result.batches.iter().enumerate() {
        assert_eq!(batch.batch_number, i + 1);
        assert_eq!(batch.batch_id, format!("{}_batch_{}", result.run_id, i + 1));
        assert_eq!(batch.allocation_state, AllocationState::Allocated);
        assert!(batch.has_unique_rig_addresses());
    }
}

/// 88个通道、容量88 → 恰好1个批次
#[tokio::test]
async fn test_eighty_eight_channels_fit_one_batch() {
    init_logger();
    let ai = class(ModuleType::AI, PowerSupplyType::Powered);
    let service = service(pool(&rig_channels(ai, 88, 40000)));

    let result = service.allocate(request(rows("PT", 88, "AI", "有源"), 88)).await.unwrap();

    assert_eq!(result.batches.len(), 1);
    assert_eq!(result.batches[0].len(), 88);
    assert_eq!(result.summary.total_batches, 1);
    assert_eq!(result.allocation_reports[0].assigned_count(), 88);
}

/// 无效模块类型的行被拒绝，其余行照常分批
#[tokio::test]
async fn test_invalid_module_type_is_rejected_others_batched() {
    init_logger();
    let di = class(DI_POWERED.0, DI_POWERED.1);
    let service = service(pool(&rig_channels(di, 4, 100)));

    let mut input = rows("XS", 4, "DI", "有源");
    input.insert(2, row("XX_1", "XX", "有源"));
    let result = service.allocate(request(input, 8)).await.unwrap();

    assert_eq!(result.rejected_rows.len(), 1);
    let rejection = &result.rejected_rows[0];
    assert_eq!(rejection.row_index, 2);
    assert_eq!(rejection.tag.as_deref(), Some("XX_1"));
    assert!(rejection.has_reason_code("INVALID_MODULE_TYPE"));

    assert_eq!(result.batches.len(), 1);
    assert_eq!(result.batches[0].len(), 4);
    assert_eq!(result.completion(), CompletionStatus::Partial);
}

/// 同一批次两个 AI/有源 通道，池中只有1个对应通道：
/// 第一个通道拿到地址，第二个容量耗尽，整个批次不提交
#[tokio::test]
async fn test_capacity_exhaustion_within_one_batch() {
    init_logger();
    let ai = class(ModuleType::AI, PowerSupplyType::Powered);
    let service = service(pool(&rig_channels(ai, 1, 40000)));

    let result = service.allocate(request(rows("PT", 2, "AI", "有源"), 8)).await.unwrap();

    let report = &result.allocation_reports[0];
    assert!(!report.allocated);
    assert_eq!(report.outcomes[0].status, ChannelAllocationStatus::Assigned);
    assert_eq!(report.outcomes[1].status, ChannelAllocationStatus::CapacityExhausted);
    assert!(report
        .errors
        .iter()
        .any(|e| e.error_code() == "CAPACITY_EXHAUSTION_ERROR"));

    let batch = &result.batches[0];
    assert_eq!(batch.allocation_state, AllocationState::Failed);
    assert!(batch.assigned_addresses().is_empty());
    assert_eq!(result.summary.unallocated_batches, 1);
    assert_eq!(result.completion(), CompletionStatus::Partial);
    assert!(service.pool().active_batches().unwrap().is_empty());
}

/// 池中缺少某个类别时，只有该类别的通道报兼容性错误，批次仍然提交
#[tokio::test]
async fn test_missing_class_reports_compatibility_error() {
    init_logger();
    let di = class(DI_POWERED.0, DI_POWERED.1);
    let service = service(pool(&rig_channels(di, 2, 100)));

    let mut input = rows("XS", 2, "DI", "有源");
    input.extend(rows("YV", 1, "DO", "无源"));
    let result = service.allocate(request(input, 8)).await.unwrap();

    assert_eq!(result.batches.len(), 1);
    let report = &result.allocation_reports[0];
    assert!(report.allocated);
    assert_eq!(report.assigned_count(), 2);
    assert_eq!(report.outcomes[2].tag, "YV_1");
    assert_eq!(report.outcomes[2].status, ChannelAllocationStatus::CompatibilityError);
    assert!(result
        .allocation_errors
        .iter()
        .any(|e| e.error_code() == "COMPATIBILITY_ERROR"));

    assert_eq!(result.batches[0].allocation_state, AllocationState::Allocated);
    assert_eq!(result.batches[0].assigned_addresses().len(), 2);
    assert_eq!(result.summary.unassigned_channels, 1);
    assert_eq!(result.completion(), CompletionStatus::Partial);
}

/// 每个被接受的通道恰好出现在一个批次中，顺序为分组顺序；
/// 批次数等于 ceil(数量 / 容量)
#[tokio::test]
async fn test_every_definition_lands_in_exactly_one_batch() {
    init_logger();
    let mut channels = rig_channels(class(ModuleType::AI, PowerSupplyType::Powered), 5, 40000);
    channels.extend(rig_channels(class(ModuleType::AO, PowerSupplyType::Unpowered), 5, 41000));
    channels.extend(rig_channels(class(ModuleType::DI, PowerSupplyType::Powered), 5, 100));
    channels.extend(rig_channels(class(ModuleType::DO, PowerSupplyType::Powered), 5, 1000));
    let service = service(pool(&channels));

    let mut input = Vec::new();
    input.extend(rows("PT", 11, "AI", "有源"));
    input.extend(rows("FV", 3, "AO", "无源"));
    input.extend(rows("XS", 10, "DI", "有源"));
    input.extend(rows("YV", 1, "DO", "有源"));
    input.extend(rows("PS", 4, "AI", "有源"));
    let capacity = 5;
    let result = service.allocate(request(input, capacity)).await.unwrap();

    assert_eq!(result.summary.accepted_definitions, 29);
    assert_eq!(result.batches.len(), (29 + 4) / 5);

    let mut seen = HashSet::new();
    let mut packed = Vec::new();
    for batch in &result.batches {
        assert!(batch.len() <= capacity as usize);
        assert!(!batch.is_empty());
        assert!(batch.has_unique_rig_addresses());
        for channel in &batch.channels {
            assert!(seen.insert(channel.tag.clone()), "{} 出现在多个批次中", channel.tag);
            packed.push(channel.tag.clone());
        }
    }

    // 同类别的通道相邻，按首次出现的类别顺序排列
    let expected: Vec<String> = [("PT", 11), ("PS", 4), ("FV", 3), ("XS", 10), ("YV", 1)]
        .iter()
        .flat_map(|(prefix, count)| (1..=*count).map(move |i| format!("{}_{}", prefix, i)))
        .collect();
    assert_eq!(packed, expected);

    let per_class: BTreeMap<_, usize> = result
        .summary
        .by_class
        .iter()
        .map(|s| (s.class, s.definition_count))
        .collect();
    assert_eq!(per_class.get(&class(ModuleType::AI, PowerSupplyType::Powered)), Some(&15));
    assert_eq!(result.completion(), CompletionStatus::Complete);
}

/// 每一行要么被接受，要么带着原因被拒绝
#[tokio::test]
async fn test_every_row_is_accounted_for() {
    init_logger();
    let di = class(DI_POWERED.0, DI_POWERED.1);
    let service = service(pool(&rig_channels(di, 3, 100)));

    let mut input = rows("XS", 3, "DI", "有源");
    input.push(row("XS_1", "DI", "有源"));
    input.push(row("XS 9", "DI", "有源"));
    input.push(serde_json::from_value(serde_json::json!(["XS_10", "DI"])).unwrap());
    input.push(row("PT_1", "AI", "有源"));
    let result = service.allocate(request(input, 4)).await.unwrap();

    let summary = &result.summary;
    assert_eq!(summary.total_rows, 7);
    assert_eq!(summary.accepted_definitions + summary.rejected_rows, summary.total_rows);

    let rejected: Vec<usize> = result.rejected_rows.iter().map(|r| r.row_index).collect();
    assert_eq!(rejected, vec![3, 4, 5]);
    assert!(result.rejected_rows.iter().all(|r| !r.reasons.is_empty()));
    assert!(result.rejected_rows[0].has_reason_code("DUPLICATE_TAG"));
    assert!(result.rejected_rows[1].has_reason_code("INVALID_CHARACTERS"));
    assert!(result.rejected_rows[2].has_reason_code("INSUFFICIENT_COLUMNS"));
}

/// 相继的批次复用同一批测试PLC通道，轮询起点向后移动
#[tokio::test]
async fn test_sequential_batches_reuse_rig_channels() {
    init_logger();
    let di = class(DI_POWERED.0, DI_POWERED.1);
    let service = service(pool(&rig_channels(di, 3, 100)));

    let result = service.allocate(request(rows("XS", 4, "DI", "有源"), 2)).await.unwrap();

    assert_eq!(result.batches.len(), 2);
    let first: Vec<_> = result.batches[0]
        .assigned_addresses()
        .into_iter()
        .map(|a| a.communication_address.clone())
        .collect();
    let second: Vec<_> = result.batches[1]
        .assigned_addresses()
        .into_iter()
        .map(|a| a.communication_address.clone())
        .collect();
    assert_eq!(first, vec!["101", "102"]);
    assert_eq!(second, vec!["103", "101"]);
    assert!(service.pool().active_batches().unwrap().is_empty());
}

/// demos 目录下的示例请求与测试PLC通道表
#[tokio::test]
async fn test_demo_request_allocates() {
    init_logger();
    let demos = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("demos");
    let rig = fat_allocator::TestRigConfig::load_from_file(&demos.join("test_rig.json")).await.unwrap();
    let request: fat_allocator::AllocationRequest =
        serde_json::from_str(&std::fs::read_to_string(demos.join("request.json")).unwrap()).unwrap();

    let service = service(std::sync::Arc::new(
        fat_allocator::TestRigChannelPool::from_config(&rig).unwrap(),
    ));
    let result = service.allocate(request).await.unwrap();

    assert_eq!(result.summary.total_rows, 8);
    assert_eq!(result.rejected_rows.len(), 1);
    assert_eq!(result.rejected_rows[0].tag.as_deref(), Some("XX_999"));
    assert_eq!(result.batches.len(), 2);
    assert_eq!(result.summary.allocated_batches, 2);
    assert_eq!(result.summary.unassigned_channels, 0);
    assert_eq!(result.batches[0].batch_info.operator_name.as_deref(), Some("张工"));
    assert_eq!(result.completion(), CompletionStatus::Partial);
}
