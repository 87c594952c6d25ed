//! 批次装箱
//!
//! 单遍从左到右的贪心填充：按组的顺序依次放入当前批次，
//! 一个组放不下时恰好填满当前批次，剩余部分进入下一个批次。通道从不重排

use crate::models::{Batch, BatchInfo};
use crate::services::domain::compatibility_grouper::ChannelGroup;
use crate::utils::error::{AppError, AppResult};

/// 批次ID格式: `<run_id>_batch_<n>`，n 从1开始
pub fn batch_id_for(run_id: &str, batch_number: usize) -> String {
    format!("{}_batch_{}", run_id, batch_number)
}

/// 把分组装入容量为 `capacity` 的批次
///
/// **保证**:
/// - 每个通道恰好出现在一个批次中
/// - 每个批次通道数不超过容量
/// - 批次数为 ceil(N / capacity)，没有通道时不产生批次
pub fn pack(
    groups: Vec<ChannelGroup>,
    capacity: usize,
    run_id: &str,
    batch_info: &BatchInfo,
) -> AppResult<Vec<Batch>> {
    if capacity == 0 {
        return Err(AppError::configuration_error("每批次最大通道数必须大于0"));
    }

    let total: usize = groups.iter().map(ChannelGroup::len).sum();
    log::info!("=== 开始装箱: {} 个通道，{} 个分组，批次容量 {} ===", total, groups.len(), capacity);

    let mut batches: Vec<Batch> = Vec::with_capacity(total.div_ceil(capacity));
    let mut current: Option<Batch> = None;

    for group in groups {
        for definition in group.channels {
            if current.as_ref().map_or(true, Batch::is_full) {
                if let Some(full) = current.take() {
                    batches.push(full);
                }
                let batch_number = batches.len() + 1;
                current = Some(Batch::new(
                    batch_id_for(run_id, batch_number),
                    batch_number,
                    capacity,
                    batch_info.clone(),
                )?);
            }
            if let Some(batch) = current.as_mut() {
                batch.push_channel(definition)?;
            }
        }
    }

    if let Some(last) = current {
        batches.push(last);
    }

    for batch in &batches {
        log::debug!("{} ({}): {} 个通道", batch.batch_name, batch.batch_id, batch.len());
    }
    log::info!("=== 装箱完成: 共 {} 个批次 ===", batches.len());
    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChannelDefinition, CompatibilityClass, ModuleType, PointDataType, PowerSupplyType, SignalSpec};

    fn group(module_type: ModuleType, prefix: &str, count: usize) -> ChannelGroup {
        let class = CompatibilityClass::new(module_type, PowerSupplyType::Powered);
        let channels = (0..count)
            .map(|i| {
                ChannelDefinition::new(
                    format!("{}_{}", prefix, i),
                    format!("{}", i),
                    module_type,
                    PowerSupplyType::Powered,
                    PointDataType::Bool,
                    SignalSpec::Digital,
                )
                .unwrap()
            })
            .collect();
        ChannelGroup { class, channels }
    }

    fn sizes(batches: &[Batch]) -> Vec<usize> {
        batches.iter().map(Batch::len).collect()
    }

    #[test]
    fn test_group_is_split_to_fill_current_batch() {
        let groups = vec![group(ModuleType::DI, "DI", 5), group(ModuleType::DO, "DO", 7)];
        let batches = pack(groups, 4, "run", &BatchInfo::default()).unwrap();

        assert_eq!(sizes(&batches), vec![4, 4, 4]);
        let tags: Vec<&str> = batches[1].channels.iter().map(|c| c.tag.as_str()).collect();
        assert_eq!(tags, vec!["DI_4", "DO_0", "DO_1", "DO_2"]);
        assert_eq!(batches[2].batch_id, "run_batch_3");
        assert_eq!(batches[2].batch_name, "批次3");
    }

    #[test]
    fn test_large_capacity_gives_single_batch() {
        let batches = pack(vec![group(ModuleType::DI, "DI", 88)], 88, "run", &BatchInfo::default()).unwrap();
        assert_eq!(sizes(&batches), vec![88]);
    }

    #[test]
    fn test_zero_channels_and_zero_capacity() {
        assert!(pack(Vec::new(), 8, "run", &BatchInfo::default()).unwrap().is_empty());

        let err = pack(vec![group(ModuleType::DI, "DI", 1)], 0, "run", &BatchInfo::default()).unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
    }
}
