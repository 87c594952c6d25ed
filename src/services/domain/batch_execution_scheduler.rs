//! # 批次执行调度器
//!
//! ## 业务作用
//! 以有界并发执行已分配的批次：
//! 1. 占用批次规划好的测试PLC地址，地址被其他批次持有时等待
//! 2. 获取并发许可（`max_concurrent_tests`）
//! 3. 批次进入 Testing，调用外部测试执行引擎
//! 4. 记录通道结果，批次进入终态
//! 5. 归还地址，唤醒等待中的批次
//!
//! 取消的批次标记为 Failed 并立即归还地址。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::log_state_transition;
use crate::models::{AllocationState, Batch, BatchStatus, ChannelTestOutcome};
use crate::services::domain::batch_registry::BatchRegistry;
use crate::services::domain::test_rig_pool::TestRigChannelPool;
use crate::utils::error::{AppError, AppResult};

/// 单通道测试结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelResult {
    pub channel_id: String,
    pub outcome: ChannelTestOutcome,
}

/// 外部测试执行引擎
///
/// 实现方负责与被测PLC、测试PLC通信，可能很慢；
/// 收到取消信号后应尽快返回
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IBatchTestExecutor: Send + Sync {
    /// 执行一个批次，返回各通道的测试结果
    async fn execute_batch(&self, batch: Batch, cancel: CancellationToken) -> AppResult<Vec<ChannelResult>>;
}

/// 单个批次的执行摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRunSummary {
    pub batch_id: String,
    pub final_status: BatchStatus,
    pub cancelled: bool,
    pub passed_points: u32,
    pub failed_points: u32,
    pub error: Option<AppError>,
}

impl BatchRunSummary {
    fn from_batch(batch: &Batch, cancelled: bool, error: Option<AppError>) -> Self {
        Self {
            batch_id: batch.batch_id.clone(),
            final_status: batch.status,
            cancelled,
            passed_points: batch.passed_points,
            failed_points: batch.failed_points,
            error,
        }
    }

    fn failed(batch_id: &str, error: AppError) -> Self {
        Self {
            batch_id: batch_id.to_string(),
            final_status: BatchStatus::Failed,
            cancelled: false,
            passed_points: 0,
            failed_points: 0,
            error: Some(error),
        }
    }
}

/// 执行单个批次所需的共享状态
#[derive(Clone)]
struct RunContext {
    registry: Arc<BatchRegistry>,
    pool: Arc<TestRigChannelPool>,
    executor: Arc<dyn IBatchTestExecutor>,
    semaphore: Arc<Semaphore>,
}

enum RunEnd {
    Finished(Vec<ChannelResult>),
    ExecutorFailed(AppError),
    Cancelled,
}

/// 批次执行调度器
pub struct BatchExecutionScheduler {
    context: RunContext,
    /// 批次ID → 取消令牌（等待中或执行中的批次）
    active_batches: Arc<RwLock<HashMap<String, CancellationToken>>>,
    global_cancellation_token: CancellationToken,
}

impl BatchExecutionScheduler {
    pub fn new(
        registry: Arc<BatchRegistry>,
        pool: Arc<TestRigChannelPool>,
        executor: Arc<dyn IBatchTestExecutor>,
        max_concurrent_tests: usize,
    ) -> AppResult<Self> {
        if max_concurrent_tests == 0 {
            return Err(AppError::configuration_error("最大并发测试数必须大于0"));
        }

        Ok(Self {
            context: RunContext {
                registry,
                pool,
                executor,
                semaphore: Arc::new(Semaphore::new(max_concurrent_tests)),
            },
            active_batches: Arc::new(RwLock::new(HashMap::new())),
            global_cancellation_token: CancellationToken::new(),
        })
    }

    /// 并发执行给定批次，返回与输入顺序一致的执行摘要
    pub async fn run_batches(&self, batch_ids: &[String]) -> AppResult<Vec<BatchRunSummary>> {
        log::info!("=== 开始执行 {} 个批次 ===", batch_ids.len());

        let mut handles = Vec::with_capacity(batch_ids.len());
        for batch_id in batch_ids {
            let token = self.global_cancellation_token.child_token();
            self.active_batches
                .write()
                .await
                .insert(batch_id.clone(), token.clone());

            let context = self.context.clone();
            let active_batches = self.active_batches.clone();
            let batch_id = batch_id.clone();
            handles.push(tokio::spawn(async move {
                let summary = match Self::run_one(&context, &batch_id, &token).await {
                    Ok(summary) => summary,
                    Err(e) => {
                        log::error!("批次 {} 执行出错: {}", batch_id, e);
                        if let Err(release_err) = context.pool.release(&batch_id) {
                            log::error!("批次 {} 归还地址失败: {}", batch_id, release_err);
                        }
                        BatchRunSummary::failed(&batch_id, e)
                    }
                };
                active_batches.write().await.remove(&batch_id);
                summary
            }));
        }

        let mut summaries = Vec::with_capacity(handles.len());
        for (batch_id, joined) in batch_ids.iter().zip(futures::future::join_all(handles).await) {
            summaries.push(joined.unwrap_or_else(|e| {
                BatchRunSummary::failed(batch_id, AppError::concurrency_error(format!("批次任务异常退出: {}", e)))
            }));
        }

        log::info!("=== 批次执行结束 ===");
        Ok(summaries)
    }

    async fn run_one(context: &RunContext, batch_id: &str, token: &CancellationToken) -> AppResult<BatchRunSummary> {
        let snapshot = context.registry.get(batch_id).await?;
        if snapshot.allocation_state != AllocationState::Allocated {
            return Ok(BatchRunSummary::from_batch(
                &snapshot,
                false,
                Some(AppError::state_transition_error(
                    snapshot.status.to_string(),
                    BatchStatus::Testing.to_string(),
                    format!("{} 的测试PLC地址未分配，跳过执行", batch_id),
                )),
            ));
        }
        if snapshot.status.is_terminal() {
            return Ok(BatchRunSummary::from_batch(&snapshot, false, None));
        }

        // 先占地址再取许可：持有许可的批次不会再等待地址
        let addresses: Vec<_> = snapshot.assigned_addresses().into_iter().cloned().collect();
        if !context.pool.claim_when_free(batch_id, &addresses, token).await? {
            return Self::finish_cancelled(context, batch_id).await;
        }

        let _permit = tokio::select! {
            biased;
            _ = token.cancelled() => return Self::finish_cancelled(context, batch_id).await,
            permit = context.semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    context.pool.release(batch_id)?;
                    return Err(AppError::concurrency_error("并发许可信号量已关闭"));
                }
            },
        };

        let batch = if snapshot.status == BatchStatus::NotTested {
            context.registry.start_batch(batch_id).await?
        } else {
            snapshot
        };

        // 取消优先于执行结果
        let end = tokio::select! {
            biased;
            _ = token.cancelled() => RunEnd::Cancelled,
            result = context.executor.execute_batch(batch, token.clone()) => match result {
                Ok(results) => RunEnd::Finished(results),
                Err(_) if token.is_cancelled() => RunEnd::Cancelled,
                Err(e) => RunEnd::ExecutorFailed(e),
            },
        };

        let summary = match end {
            RunEnd::Finished(results) => {
                for result in results {
                    if let Err(e) = context
                        .registry
                        .record_outcome(batch_id, &result.channel_id, result.outcome)
                        .await
                    {
                        log::warn!("忽略无法记录的通道结果: {}", e);
                    }
                }
                context.registry.complete_batch(batch_id).await?;
                let batch = context.registry.get(batch_id).await?;
                BatchRunSummary::from_batch(&batch, false, None)
            }
            RunEnd::ExecutorFailed(e) => {
                log::error!("[测试执行失败] 批次 {}: {}", batch_id, e);
                context.registry.fail_batch(batch_id, "测试执行失败").await?;
                let batch = context.registry.get(batch_id).await?;
                BatchRunSummary::from_batch(&batch, false, Some(e))
            }
            RunEnd::Cancelled => return Self::finish_cancelled(context, batch_id).await,
        };

        context.pool.release(batch_id)?;
        Ok(summary)
    }

    async fn finish_cancelled(context: &RunContext, batch_id: &str) -> AppResult<BatchRunSummary> {
        log_state_transition!("批次 {} 已取消", batch_id);
        let batch = context.registry.get(batch_id).await?;
        if !batch.status.is_terminal() {
            context.registry.fail_batch(batch_id, "已取消").await?;
        }
        context.pool.release(batch_id)?;
        let batch = context.registry.get(batch_id).await?;
        Ok(BatchRunSummary::from_batch(&batch, true, None))
    }

    /// 取消一个批次
    ///
    /// 等待中或执行中的批次收到取消信号；
    /// 不在调度中的未完成批次（如自动开始的批次）直接标记失败并归还地址
    pub async fn cancel_batch(&self, batch_id: &str) -> AppResult<()> {
        if let Some(token) = self.active_batches.read().await.get(batch_id) {
            log::info!("发送取消信号: {}", batch_id);
            token.cancel();
            return Ok(());
        }

        let batch = self.context.registry.get(batch_id).await?;
        if !batch.status.is_terminal() {
            Self::finish_cancelled(&self.context, batch_id).await?;
        }
        Ok(())
    }

    /// 取消全部批次
    pub fn stop_all(&self) {
        log::info!("停止所有批次");
        self.global_cancellation_token.cancel();
    }

    /// 等待中或执行中的批次数量
    pub async fn active_batch_count(&self) -> usize {
        self.active_batches.read().await.len()
    }
}
