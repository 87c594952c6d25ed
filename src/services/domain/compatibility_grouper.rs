//! 兼容性分组
//!
//! 按 (模块类型, 供电类型) 把通道定义分组。组的顺序是类别首次出现的顺序，
//! 组内通道保持输入顺序，相同输入总是得到相同结果

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::{ChannelDefinition, CompatibilityClass};

/// 同一兼容类别的一组通道
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelGroup {
    pub class: CompatibilityClass,
    pub channels: Vec<ChannelDefinition>,
}

impl ChannelGroup {
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// 对通道定义分组
pub fn group_by_compatibility(definitions: Vec<ChannelDefinition>) -> Vec<ChannelGroup> {
    let mut groups: Vec<ChannelGroup> = Vec::new();
    let mut index_of: HashMap<CompatibilityClass, usize> = HashMap::new();

    for definition in definitions {
        let class = definition.class();
        match index_of.get(&class) {
            Some(&index) => groups[index].channels.push(definition),
            None => {
                index_of.insert(class, groups.len());
                groups.push(ChannelGroup {
                    class,
                    channels: vec![definition],
                });
            }
        }
    }

    for group in &groups {
        log::debug!("兼容类别 {}: {} 个通道", group.class, group.len());
    }
    groups
}
