//! # 测试PLC通道池
//!
//! ## 业务作用
//! 按兼容类别管理测试PLC通道。每个类别一组槽位，每个槽位记录当前持有它的批次；
//! 每个类别带一个轮询游标，让连续的批次分散使用不同的物理通道。
//!
//! ## 并发模型
//! - 每个类别一把锁，跨类别操作总是按类别顺序加锁
//! - `reserve` 只做规划：看类别容量与游标，不看也不改槽位的持有者
//! - 同一地址同一时刻只属于一个批次，持有从 `claim` 开始
//! - `release` 归还批次持有的全部槽位并唤醒等待中的批次

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::models::{CompatibilityClass, TestRigAddress, TestRigChannel, TestRigConfig};
use crate::utils::error::{AppError, AppResult};

/// 一次地址需求：某个通道需要某个类别的测试PLC通道
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotDemand {
    pub channel_id: String,
    pub class: CompatibilityClass,
}

/// 单个需求的规划结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SlotOutcome {
    /// 找到了可用地址
    Assigned { address: TestRigAddress },
    /// 池中没有该类别的通道
    Incompatible,
    /// 该类别的通道总数小于本批次需求
    Exhausted,
}

/// `reserve` 的结果
#[derive(Debug, Clone)]
pub struct Reservation {
    /// 与需求一一对应（按需求顺序）
    pub outcomes: Vec<(String, SlotOutcome)>,
    /// 是否已提交（所有需求都 Assigned 或 Incompatible）
    pub committed: bool,
    /// 容量耗尽错误，每个类别一条
    pub errors: Vec<AppError>,
}

/// `claim` 的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    Busy { address: String, holder: String },
}

#[derive(Debug)]
struct PoolSlot {
    channel: TestRigChannel,
    owner: Option<String>,
}

#[derive(Debug)]
struct PoolEntry {
    slots: Vec<PoolSlot>,
    cursor: usize,
}

/// 测试PLC通道池
#[derive(Debug)]
pub struct TestRigChannelPool {
    entries: BTreeMap<CompatibilityClass, Mutex<PoolEntry>>,
    /// 通讯地址 → (类别, 槽位下标)
    index: HashMap<String, (CompatibilityClass, usize)>,
    released: Notify,
}

impl TestRigChannelPool {
    /// 由测试PLC通道表构建通道池（只使用启用的通道）
    pub fn from_channels(channels: &[TestRigChannel]) -> AppResult<Self> {
        let mut grouped: BTreeMap<CompatibilityClass, Vec<PoolSlot>> = BTreeMap::new();
        let mut index = HashMap::new();

        for channel in channels.iter().filter(|c| c.is_enabled) {
            let class = channel.served_class();
            let slots = grouped.entry(class).or_default();
            if index
                .insert(channel.communication_address.clone(), (class, slots.len()))
                .is_some()
            {
                return Err(AppError::configuration_error(format!(
                    "测试PLC通讯地址重复: {}",
                    channel.communication_address
                )));
            }
            slots.push(PoolSlot {
                channel: channel.clone(),
                owner: None,
            });
        }

        for (class, slots) in &grouped {
            log::info!("测试PLC通道池: {} 可用 {} 个通道", class, slots.len());
        }

        let entries = grouped
            .into_iter()
            .map(|(class, slots)| (class, Mutex::new(PoolEntry { slots, cursor: 0 })))
            .collect();

        Ok(Self {
            entries,
            index,
            released: Notify::new(),
        })
    }

    pub fn from_config(config: &TestRigConfig) -> AppResult<Self> {
        config.validate()?;
        Self::from_channels(&config.channels)
    }

    fn lock(entry: &Mutex<PoolEntry>) -> AppResult<MutexGuard<'_, PoolEntry>> {
        entry
            .lock()
            .map_err(|_| AppError::concurrency_error("测试PLC通道池锁已损坏"))
    }

    /// 池中存在通道的类别
    pub fn classes(&self) -> Vec<CompatibilityClass> {
        self.entries.keys().copied().collect()
    }

    /// 某类别的通道总数（没有该类别时为0）
    pub fn capacity(&self, class: CompatibilityClass) -> usize {
        self.entries
            .get(&class)
            .and_then(|entry| Self::lock(entry).ok().map(|e| e.slots.len()))
            .unwrap_or(0)
    }

    /// 某类别当前空闲的通道数
    pub fn free_count(&self, class: CompatibilityClass) -> usize {
        self.entries
            .get(&class)
            .and_then(|entry| {
                Self::lock(entry)
                    .ok()
                    .map(|e| e.slots.iter().filter(|s| s.owner.is_none()).count())
            })
            .unwrap_or(0)
    }

    /// 当前持有地址的批次
    pub fn active_batches(&self) -> AppResult<BTreeSet<String>> {
        let mut batches = BTreeSet::new();
        for entry in self.entries.values() {
            let guard = Self::lock(entry)?;
            batches.extend(guard.slots.iter().filter_map(|s| s.owner.clone()));
        }
        Ok(batches)
    }

    /// 某地址当前的持有批次
    pub fn holder_of(&self, communication_address: &str) -> AppResult<Option<String>> {
        let Some((class, slot)) = self.index.get(communication_address) else {
            return Ok(None);
        };
        match self.entries.get(class) {
            Some(entry) => Ok(Self::lock(entry)?.slots[*slot].owner.clone()),
            None => Ok(None),
        }
    }

    /// 为一个批次规划地址
    ///
    /// 按需求顺序从各类别的游标处开始轮询，跳过本批次已选中的槽位；
    /// 槽位当前是否被其他批次持有不影响规划，冲突留给 `claim` 处理。
    /// 只要有一个需求是 Exhausted，就什么也不提交（游标不动）；
    /// Incompatible 的需求不阻止提交。提交只推进游标，不占用槽位
    pub fn reserve(&self, batch_id: &str, demands: &[SlotDemand]) -> AppResult<Reservation> {
        let mut demand_count: BTreeMap<CompatibilityClass, usize> = BTreeMap::new();
        for demand in demands {
            *demand_count.entry(demand.class).or_default() += 1;
        }

        // 按类别顺序加锁
        let mut guards: BTreeMap<CompatibilityClass, MutexGuard<'_, PoolEntry>> = BTreeMap::new();
        for class in demand_count.keys() {
            if let Some(entry) = self.entries.get(class) {
                guards.insert(*class, Self::lock(entry)?);
            }
        }

        let mut picks: BTreeMap<CompatibilityClass, Vec<usize>> = BTreeMap::new();
        let mut outcomes = Vec::with_capacity(demands.len());
        let mut exhausted: BTreeSet<CompatibilityClass> = BTreeSet::new();

        for demand in demands {
            let Some(entry) = guards.get(&demand.class) else {
                outcomes.push((demand.channel_id.clone(), SlotOutcome::Incompatible));
                continue;
            };

            let picked = picks.entry(demand.class).or_default();
            let capacity = entry.slots.len();
            let start = picked.last().map_or(entry.cursor, |last| last + 1);
            let found = (0..capacity)
                .map(|offset| (start + offset) % capacity)
                .find(|i| !picked.contains(i));

            let outcome = match found {
                Some(i) => {
                    picked.push(i);
                    SlotOutcome::Assigned {
                        address: entry.slots[i].channel.to_address(),
                    }
                }
                None => {
                    exhausted.insert(demand.class);
                    SlotOutcome::Exhausted
                }
            };
            outcomes.push((demand.channel_id.clone(), outcome));
        }

        let mut errors = Vec::new();
        for class in &exhausted {
            let requested = demand_count.get(class).copied().unwrap_or(0);
            let available = guards.get(class).map_or(0, |e| e.slots.len());
            errors.push(AppError::capacity_exhaustion_error(batch_id, class, requested, available));
        }
        let committed = exhausted.is_empty();
        if committed {
            for (class, picked) in &picks {
                if let (Some(entry), Some(last)) = (guards.get_mut(class), picked.last()) {
                    entry.cursor = (last + 1) % entry.slots.len();
                }
            }
        }

        Ok(Reservation {
            outcomes,
            committed,
            errors,
        })
    }

    /// 重新占用批次规划好的地址（激活批次时使用）
    ///
    /// 全有或全无：任何一个地址被其他批次持有时返回 Busy，不做任何修改
    pub fn claim(&self, batch_id: &str, addresses: &[TestRigAddress]) -> AppResult<ClaimOutcome> {
        let mut slots: BTreeMap<CompatibilityClass, Vec<usize>> = BTreeMap::new();
        for address in addresses {
            let (class, slot) = self.index.get(&address.communication_address).ok_or_else(|| {
                AppError::not_found_error("测试PLC通道", format!("通讯地址 {} 不在通道池中", address))
            })?;
            slots.entry(*class).or_default().push(*slot);
        }

        let mut guards = Vec::with_capacity(slots.len());
        for (class, indices) in &slots {
            if let Some(entry) = self.entries.get(class) {
                guards.push((Self::lock(entry)?, indices));
            }
        }

        for (entry, indices) in &guards {
            for i in indices.iter() {
                let slot = &entry.slots[*i];
                if let Some(holder) = &slot.owner {
                    if holder != batch_id {
                        return Ok(ClaimOutcome::Busy {
                            address: slot.channel.communication_address.clone(),
                            holder: holder.clone(),
                        });
                    }
                }
            }
        }

        for (entry, indices) in guards.iter_mut() {
            for i in indices.iter() {
                entry.slots[*i].owner = Some(batch_id.to_string());
            }
        }
        Ok(ClaimOutcome::Claimed)
    }

    /// 等待地址全部空闲后占用
    ///
    /// 返回 `Ok(false)` 表示等待期间被取消
    pub async fn claim_when_free(
        &self,
        batch_id: &str,
        addresses: &[TestRigAddress],
        cancel: &CancellationToken,
    ) -> AppResult<bool> {
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            // 先登记再检查，避免错过检查与等待之间的释放通知
            notified.as_mut().enable();

            match self.claim(batch_id, addresses)? {
                ClaimOutcome::Claimed => return Ok(true),
                ClaimOutcome::Busy { address, holder } => {
                    log::debug!("批次 {} 等待地址 {} (当前持有: {})", batch_id, address, holder);
                }
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = cancel.cancelled() => return Ok(false),
            }
        }
    }

    /// 归还批次持有的全部槽位，返回归还的数量
    pub fn release(&self, batch_id: &str) -> AppResult<usize> {
        let mut released = 0;
        for entry in self.entries.values() {
            let mut guard = Self::lock(entry)?;
            for slot in guard.slots.iter_mut() {
                if slot.owner.as_deref() == Some(batch_id) {
                    slot.owner = None;
                    released += 1;
                }
            }
        }
        if released > 0 {
            log::debug!("批次 {} 归还 {} 个测试PLC通道", batch_id, released);
        }
        self.released.notify_waiters();
        Ok(released)
    }
}
