//! # 批次登记表
//!
//! ## 业务作用
//! 保存本次运行产生的全部批次，提供查询、状态转换和统计。
//!
//! ## 状态规则
//! - NotTested → Testing → {Passed, Failed, PartiallyFailed}，单向推进
//! - 未开始的批次可以直接标记为 Failed（取消）
//! - 每条批次记录单独加锁，同一批次的状态修改串行执行

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::log_state_transition;
use crate::models::{AllocationState, Batch, BatchStatus, ChannelTestOutcome};
use crate::utils::error::{AppError, AppResult};

/// 登记表统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySummary {
    pub total_batches: usize,
    pub not_tested: usize,
    pub testing: usize,
    pub passed: usize,
    pub failed: usize,
    pub partially_failed: usize,
    pub total_points: u32,
    pub tested_points: u32,
    pub passed_points: u32,
    pub failed_points: u32,
}

#[derive(Default)]
struct RegistryInner {
    records: HashMap<String, Arc<Mutex<Batch>>>,
    /// 登记顺序（即装箱顺序）
    order: Vec<String>,
}

/// 批次登记表
#[derive(Default)]
pub struct BatchRegistry {
    inner: RwLock<RegistryInner>,
}

impl BatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记批次，批次ID必须唯一
    pub async fn register(&self, batch: Batch) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        if inner.records.contains_key(&batch.batch_id) {
            return Err(AppError::validation_error(format!("批次ID重复: {}", batch.batch_id)));
        }
        inner.order.push(batch.batch_id.clone());
        inner.records.insert(batch.batch_id.clone(), Arc::new(Mutex::new(batch)));
        Ok(())
    }

    async fn record(&self, batch_id: &str) -> AppResult<Arc<Mutex<Batch>>> {
        self.inner
            .read()
            .await
            .records
            .get(batch_id)
            .cloned()
            .ok_or_else(|| AppError::not_found_error("Batch", format!("批次 {} 不存在", batch_id)))
    }

    /// 获取批次快照
    pub async fn get(&self, batch_id: &str) -> AppResult<Batch> {
        let record = self.record(batch_id).await?;
        let batch = record.lock().await;
        Ok(batch.clone())
    }

    /// 按登记顺序列出全部批次快照
    pub async fn list(&self) -> Vec<Batch> {
        let records: Vec<Arc<Mutex<Batch>>> = {
            let inner = self.inner.read().await;
            inner
                .order
                .iter()
                .filter_map(|id| inner.records.get(id).cloned())
                .collect()
        };

        let mut batches = Vec::with_capacity(records.len());
        for record in records {
            batches.push(record.lock().await.clone());
        }
        batches
    }

    fn transition(batch: &mut Batch, next: BatchStatus, message: &str) -> AppResult<()> {
        if !batch.status.can_transition_to(next) {
            return Err(AppError::state_transition_error(
                batch.status.to_string(),
                next.to_string(),
                format!("{}: {}", batch.batch_id, message),
            ));
        }
        log_state_transition!("{} ({}): {} → {}", batch.batch_name, batch.batch_id, batch.status, next);
        batch.status = next;
        Ok(())
    }

    /// 开始测试：NotTested → Testing，只有地址已分配的批次可以开始
    pub async fn start_batch(&self, batch_id: &str) -> AppResult<Batch> {
        let record = self.record(batch_id).await?;
        let mut batch = record.lock().await;

        if batch.allocation_state != AllocationState::Allocated {
            return Err(AppError::state_transition_error(
                batch.status.to_string(),
                BatchStatus::Testing.to_string(),
                format!("{} 的测试PLC地址未分配，不能开始测试", batch_id),
            ));
        }

        Self::transition(&mut batch, BatchStatus::Testing, "开始测试")?;
        batch.start_time = Some(Utc::now());
        Ok(batch.clone())
    }

    /// 记录单通道测试结果并重新计算统计，只在 Testing 状态下允许
    pub async fn record_outcome(
        &self,
        batch_id: &str,
        channel_id: &str,
        outcome: ChannelTestOutcome,
    ) -> AppResult<()> {
        let record = self.record(batch_id).await?;
        let mut batch = record.lock().await;

        if batch.status != BatchStatus::Testing {
            return Err(AppError::state_transition_error(
                batch.status.to_string(),
                batch.status.to_string(),
                format!("{} 不在测试中，不能记录通道结果", batch_id),
            ));
        }
        if batch.channel(channel_id).is_none() {
            return Err(AppError::not_found_error(
                "Channel",
                format!("批次 {} 中没有通道 {}", batch_id, channel_id),
            ));
        }

        batch.outcomes.insert(channel_id.to_string(), outcome);
        batch.update_statistics();
        Ok(())
    }

    /// 完成测试：Testing → 由通道结果推导出的终态
    ///
    /// 没有任何通道执行过的批次记为 Failed
    pub async fn complete_batch(&self, batch_id: &str) -> AppResult<BatchStatus> {
        let record = self.record(batch_id).await?;
        let mut batch = record.lock().await;

        if batch.status != BatchStatus::Testing {
            return Err(AppError::state_transition_error(
                batch.status.to_string(),
                "Completed",
                format!("{} 不在测试中，不能完成", batch_id),
            ));
        }

        batch.update_statistics();
        let next = match batch.derived_status() {
            BatchStatus::NotTested => BatchStatus::Failed,
            status => status,
        };
        Self::transition(&mut batch, next, "测试完成")?;
        batch.end_time = Some(Utc::now());
        Ok(next)
    }

    /// 标记批次失败（取消或执行出错）
    pub async fn fail_batch(&self, batch_id: &str, reason: &str) -> AppResult<()> {
        let record = self.record(batch_id).await?;
        let mut batch = record.lock().await;

        Self::transition(&mut batch, BatchStatus::Failed, reason)?;
        batch.update_statistics();
        batch.end_time = Some(Utc::now());
        Ok(())
    }

    /// 汇总统计
    pub async fn summary(&self) -> RegistrySummary {
        let mut summary = RegistrySummary::default();
        for batch in self.list().await {
            summary.total_batches += 1;
            match batch.status {
                BatchStatus::NotTested => summary.not_tested += 1,
                BatchStatus::Testing => summary.testing += 1,
                BatchStatus::Passed => summary.passed += 1,
                BatchStatus::Failed => summary.failed += 1,
                BatchStatus::PartiallyFailed => summary.partially_failed += 1,
            }
            summary.total_points += batch.total_points;
            summary.tested_points += batch.tested_points;
            summary.passed_points += batch.passed_points;
            summary.failed_points += batch.failed_points;
        }
        summary
    }
}
