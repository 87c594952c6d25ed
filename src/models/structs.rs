use std::collections::{BTreeMap, HashSet};
use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{
    AllocationState, BatchStatus, ChannelTestOutcome, ModuleType, PointDataType, PowerSupplyType,
};
use crate::utils::error::{AppError, AppResult};

/// 生成默认UUID字符串的辅助函数
pub fn default_id() -> String {
    Uuid::new_v4().to_string()
}

/// 兼容类别：模块类型 × 供电类型
///
/// 分组、测试PLC通道池、分配统计全部以它为键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompatibilityClass {
    pub module_type: ModuleType,
    pub power_supply_type: PowerSupplyType,
}

impl CompatibilityClass {
    pub fn new(module_type: ModuleType, power_supply_type: PowerSupplyType) -> Self {
        Self { module_type, power_supply_type }
    }

    /// 全部8个类别，按固定顺序
    pub fn all() -> Vec<CompatibilityClass> {
        ModuleType::ALL
            .iter()
            .flat_map(|m| {
                [PowerSupplyType::Powered, PowerSupplyType::Unpowered]
                    .into_iter()
                    .map(move |p| CompatibilityClass::new(*m, p))
            })
            .collect()
    }
}

impl Display for CompatibilityClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.module_type, self.power_supply_type)
    }
}

/// 信号规格
///
/// 模拟量必须带量程，数字量没有量程；用变体代替可空字段，
/// 保证构造完成后不变量成立
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalSpec {
    /// 模拟量（AI/AO）
    Analog {
        range_lower_limit: f64,
        range_upper_limit: f64,
    },
    /// 数字量（DI/DO）
    Digital,
}

impl SignalSpec {
    /// 创建模拟量规格，要求上下限有限且下限小于上限
    pub fn analog(range_lower_limit: f64, range_upper_limit: f64) -> AppResult<Self> {
        if !range_lower_limit.is_finite() || !range_upper_limit.is_finite() {
            return Err(AppError::validation_error("量程上下限必须是有效数值"));
        }
        if range_lower_limit >= range_upper_limit {
            return Err(AppError::validation_error(format!(
                "量程下限({})必须小于上限({})",
                range_lower_limit, range_upper_limit
            )));
        }
        Ok(SignalSpec::Analog { range_lower_limit, range_upper_limit })
    }

    pub fn is_analog(&self) -> bool {
        matches!(self, SignalSpec::Analog { .. })
    }
}

/// 已分配给被测通道的测试PLC地址
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestRigAddress {
    /// 测试PLC通道位号 (如 "AO1_1")
    pub channel_tag: String,
    /// 测试PLC通讯地址 (如 "40101")
    pub communication_address: String,
}

impl Display for TestRigAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.channel_tag, self.communication_address)
    }
}

/// 通道点位定义
/// 描述一个被测I/O点的静态配置信息，由校验器创建后不再修改；
/// 唯一的例外是测试PLC地址，由分配器写入且只写一次
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDefinition {
    /// 唯一标识符
    #[serde(default = "default_id")]
    pub id: String,
    /// 位号
    pub tag: String,
    /// 变量名（HMI）
    pub variable_name: String,
    /// 变量描述
    pub description: String,
    /// 站名
    pub station: String,
    /// 模块名
    pub module: String,
    /// 模块内通道号
    pub channel: String,
    pub module_type: ModuleType,
    pub power_supply_type: PowerSupplyType,
    pub data_type: PointDataType,
    /// 被测PLC通信地址
    pub plc_communication_address: String,
    pub signal: SignalSpec,
    /// 测试PLC地址（分配器写入）
    #[serde(default)]
    test_rig_address: Option<TestRigAddress>,
    /// 来源行索引（从0开始）
    #[serde(default)]
    pub source_row: usize,
}

impl ChannelDefinition {
    /// 创建新的通道点位定义
    ///
    /// 模块类型与信号规格必须一致：AI/AO 对应模拟量，DI/DO 对应数字量
    pub fn new(
        tag: impl Into<String>,
        plc_communication_address: impl Into<String>,
        module_type: ModuleType,
        power_supply_type: PowerSupplyType,
        data_type: PointDataType,
        signal: SignalSpec,
    ) -> AppResult<Self> {
        let tag = tag.into();
        let plc_communication_address = plc_communication_address.into();

        if tag.trim().is_empty() {
            return Err(AppError::validation_error("位号不能为空"));
        }
        if plc_communication_address.trim().is_empty() {
            return Err(AppError::validation_error(format!("PLC通信地址不能为空: {}", tag)));
        }
        if module_type.is_analog() != signal.is_analog() {
            return Err(AppError::validation_error(format!(
                "通道 {} 的模块类型 {} 与信号规格不匹配",
                tag, module_type
            )));
        }

        Ok(Self {
            id: default_id(),
            variable_name: tag.clone(),
            tag,
            description: String::new(),
            station: String::new(),
            module: String::new(),
            channel: String::new(),
            module_type,
            power_supply_type,
            data_type,
            plc_communication_address,
            signal,
            test_rig_address: None,
            source_row: 0,
        })
    }

    /// 设置变量名和描述
    pub fn with_names(mut self, variable_name: impl Into<String>, description: impl Into<String>) -> Self {
        let variable_name = variable_name.into();
        if !variable_name.trim().is_empty() {
            self.variable_name = variable_name;
        }
        self.description = description.into();
        self
    }

    /// 设置站名、模块名和通道号
    pub fn with_location(
        mut self,
        station: impl Into<String>,
        module: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        self.station = station.into();
        self.module = module.into();
        self.channel = channel.into();
        self
    }

    pub fn with_source_row(mut self, source_row: usize) -> Self {
        self.source_row = source_row;
        self
    }

    /// 兼容类别
    pub fn class(&self) -> CompatibilityClass {
        CompatibilityClass::new(self.module_type, self.power_supply_type)
    }

    pub fn range_lower_limit(&self) -> Option<f64> {
        match self.signal {
            SignalSpec::Analog { range_lower_limit, .. } => Some(range_lower_limit),
            SignalSpec::Digital => None,
        }
    }

    pub fn range_upper_limit(&self) -> Option<f64> {
        match self.signal {
            SignalSpec::Analog { range_upper_limit, .. } => Some(range_upper_limit),
            SignalSpec::Digital => None,
        }
    }

    pub fn test_rig_address(&self) -> Option<&TestRigAddress> {
        self.test_rig_address.as_ref()
    }

    /// 写入测试PLC地址，只允许写一次
    pub fn assign_test_rig_address(&mut self, address: TestRigAddress) -> AppResult<()> {
        if let Some(existing) = &self.test_rig_address {
            return Err(AppError::state_transition_error(
                existing.to_string(),
                address.to_string(),
                format!("通道 {} 的测试PLC地址已分配，不能重复写入", self.tag),
            ));
        }
        self.test_rig_address = Some(address);
        Ok(())
    }
}

/// 批次附带的产品/操作信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchInfo {
    #[serde(default)]
    pub product_model: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub operator_name: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    /// 其他附加字段，原样透传
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl BatchInfo {
    pub fn new(product_model: Option<String>, serial_number: Option<String>) -> Self {
        Self {
            product_model,
            serial_number,
            ..Default::default()
        }
    }
}

/// 测试批次
///
/// 一组一起测试的被测通道，通道数不超过容量，
/// 已分配的测试PLC地址在批次内两两不同
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: String,
    pub batch_name: String,
    /// 批次序号（从1开始）
    pub batch_number: usize,
    pub capacity: usize,
    pub channels: Vec<ChannelDefinition>,
    pub status: BatchStatus,
    pub allocation_state: AllocationState,
    pub batch_info: BatchInfo,
    /// 通道ID → 测试结果
    #[serde(default)]
    pub outcomes: BTreeMap<String, ChannelTestOutcome>,

    // 统计信息
    pub total_points: u32,
    pub tested_points: u32,
    pub passed_points: u32,
    pub failed_points: u32,

    // 时间信息
    pub created_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl Batch {
    /// 创建新的空批次
    pub fn new(
        batch_id: impl Into<String>,
        batch_number: usize,
        capacity: usize,
        batch_info: BatchInfo,
    ) -> AppResult<Self> {
        if capacity == 0 {
            return Err(AppError::configuration_error("批次容量必须大于0"));
        }

        Ok(Self {
            batch_id: batch_id.into(),
            batch_name: format!("批次{}", batch_number),
            batch_number,
            capacity,
            channels: Vec::with_capacity(capacity),
            status: BatchStatus::NotTested,
            allocation_state: AllocationState::Pending,
            batch_info,
            outcomes: BTreeMap::new(),
            total_points: 0,
            tested_points: 0,
            passed_points: 0,
            failed_points: 0,
            created_time: Utc::now(),
            start_time: None,
            end_time: None,
        })
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn remaining_capacity(&self) -> usize {
        self.capacity.saturating_sub(self.channels.len())
    }

    pub fn is_full(&self) -> bool {
        self.remaining_capacity() == 0
    }

    /// 追加通道，超出容量时报错
    pub fn push_channel(&mut self, definition: ChannelDefinition) -> AppResult<()> {
        if self.is_full() {
            return Err(AppError::validation_error(format!(
                "{} 已满（容量 {}），无法追加通道 {}",
                self.batch_name, self.capacity, definition.tag
            )));
        }
        self.channels.push(definition);
        self.total_points = self.channels.len() as u32;
        Ok(())
    }

    pub fn channel(&self, channel_id: &str) -> Option<&ChannelDefinition> {
        self.channels.iter().find(|c| c.id == channel_id)
    }

    /// 批次内已分配的测试PLC地址（按通道顺序）
    pub fn assigned_addresses(&self) -> Vec<&TestRigAddress> {
        self.channels.iter().filter_map(|c| c.test_rig_address()).collect()
    }

    /// 批次内已分配地址是否两两不同
    pub fn has_unique_rig_addresses(&self) -> bool {
        let mut seen = HashSet::new();
        self.assigned_addresses()
            .into_iter()
            .all(|address| seen.insert(&address.communication_address))
    }

    /// 根据通道结果重新计算统计信息
    pub fn update_statistics(&mut self) {
        let mut passed = 0u32;
        let mut failed = 0u32;
        for channel in &self.channels {
            match self.outcomes.get(&channel.id) {
                Some(ChannelTestOutcome::Passed) => passed += 1,
                Some(ChannelTestOutcome::Failed) => failed += 1,
                _ => {}
            }
        }
        self.total_points = self.channels.len() as u32;
        self.passed_points = passed;
        self.failed_points = failed;
        self.tested_points = passed + failed;
    }

    /// 由通道结果推导的整体状态
    ///
    /// 没有任何通道执行过为 NotTested；全部通过为 Passed；
    /// 全部失败为 Failed；其余为 PartiallyFailed
    pub fn derived_status(&self) -> BatchStatus {
        if self.tested_points == 0 {
            BatchStatus::NotTested
        } else if self.passed_points == self.total_points {
            BatchStatus::Passed
        } else if self.failed_points == self.total_points {
            BatchStatus::Failed
        } else {
            BatchStatus::PartiallyFailed
        }
    }
}

/// 上游提供的原始行
///
/// 既可以是按列排列的单元格行，也可以是字段名 → 值的映射；
/// 单元格值可以是字符串、数值、布尔或 null
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawChannelRow {
    Cells(Vec<serde_json::Value>),
    Fields(BTreeMap<String, serde_json::Value>),
}

/// 行被拒绝的原因
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectionReason {
    /// 必填字段为空
    EmptyField { field: String },
    /// 模块类型不在 AI/AO/DI/DO 之内
    InvalidModuleType { value: String },
    /// 数据类型无法识别
    InvalidDataType { value: String },
    /// 字段中含有不允许的字符
    InvalidCharacters { field: String, value: String },
    /// 列数不足（结构性前置条件）
    InsufficientColumns { expected: usize, actual: usize },
    /// 位号与先前已接受的行重复
    DuplicateTag { tag: String, first_row: usize },
    /// 模拟量量程缺失或无效
    InvalidRange { message: String },
    /// 字段各自合法但无法组成一致的通道定义
    Malformed { message: String },
}

impl RejectionReason {
    pub fn reason_code(&self) -> &'static str {
        match self {
            RejectionReason::EmptyField { .. } => "FIELD_EMPTY",
            RejectionReason::InvalidModuleType { .. } => "INVALID_MODULE_TYPE",
            RejectionReason::InvalidDataType { .. } => "INVALID_DATA_TYPE",
            RejectionReason::InvalidCharacters { .. } => "INVALID_CHARACTERS",
            RejectionReason::InsufficientColumns { .. } => "INSUFFICIENT_COLUMNS",
            RejectionReason::DuplicateTag { .. } => "DUPLICATE_TAG",
            RejectionReason::InvalidRange { .. } => "INVALID_RANGE",
            RejectionReason::Malformed { .. } => "MALFORMED_ROW",
        }
    }
}

impl Display for RejectionReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::EmptyField { field } => write!(f, "字段为空: {}", field),
            RejectionReason::InvalidModuleType { value } => write!(f, "无效的模块类型: '{}'", value),
            RejectionReason::InvalidDataType { value } => write!(f, "无效的数据类型: '{}'", value),
            RejectionReason::InvalidCharacters { field, value } => {
                write!(f, "字段 {} 含有无效字符: '{}'", field, value)
            }
            RejectionReason::InsufficientColumns { expected, actual } => {
                write!(f, "列数不足，期望至少{}列，实际{}列", expected, actual)
            }
            RejectionReason::DuplicateTag { tag, first_row } => {
                write!(f, "重复的位号: {}（首次出现于第{}行）", tag, first_row)
            }
            RejectionReason::InvalidRange { message } => write!(f, "量程无效: {}", message),
            RejectionReason::Malformed { message } => write!(f, "行数据不一致: {}", message),
        }
    }
}

/// 被拒绝的行及其全部原因
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowRejection {
    pub row_index: usize,
    /// 能识别出的位号（可能为空）
    pub tag: Option<String>,
    pub reasons: Vec<RejectionReason>,
}

impl RowRejection {
    pub fn has_reason_code(&self, code: &str) -> bool {
        self.reasons.iter().any(|r| r.reason_code() == code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analog(tag: &str) -> ChannelDefinition {
        ChannelDefinition::new(
            tag,
            "40001",
            ModuleType::AI,
            PowerSupplyType::Powered,
            PointDataType::Float,
            SignalSpec::analog(0.0, 100.0).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_constructor_rejects_mismatched_signal() {
        let result = ChannelDefinition::new(
            "DI_1",
            "00001",
            ModuleType::DI,
            PowerSupplyType::Powered,
            PointDataType::Bool,
            SignalSpec::analog(0.0, 1.0).unwrap(),
        );
        assert!(result.is_err());
        assert!(SignalSpec::analog(10.0, 10.0).is_err());
    }

    #[test]
    fn test_test_rig_address_is_written_once() {
        let mut definition = analog("PT_101");
        let address = TestRigAddress {
            channel_tag: "AO1_1".to_string(),
            communication_address: "40101".to_string(),
        };
        definition.assign_test_rig_address(address.clone()).unwrap();
        assert_eq!(definition.test_rig_address(), Some(&address));

        let err = definition.assign_test_rig_address(address).unwrap_err();
        assert_eq!(err.error_code(), "STATE_TRANSITION_ERROR");
    }

    #[test]
    fn test_batch_capacity_is_enforced() {
        let mut batch = Batch::new("run_batch_1", 1, 2, BatchInfo::default()).unwrap();
        batch.push_channel(analog("A")).unwrap();
        batch.push_channel(analog("B")).unwrap();
        assert!(batch.is_full());
        assert!(batch.push_channel(analog("C")).is_err());
        assert_eq!(batch.len(), 2);
        assert!(Batch::new("x", 1, 0, BatchInfo::default()).is_err());
    }

    #[test]
    fn test_derived_status() {
        let mut batch = Batch::new("run_batch_1", 1, 4, BatchInfo::default()).unwrap();
        let a = analog("A");
        let b = analog("B");
        let (a_id, b_id) = (a.id.clone(), b.id.clone());
        batch.push_channel(a).unwrap();
        batch.push_channel(b).unwrap();

        batch.update_statistics();
        assert_eq!(batch.derived_status(), BatchStatus::NotTested);

        batch.outcomes.insert(a_id.clone(), ChannelTestOutcome::Passed);
        batch.update_statistics();
        assert_eq!(batch.derived_status(), BatchStatus::PartiallyFailed);

        batch.outcomes.insert(b_id.clone(), ChannelTestOutcome::Passed);
        batch.update_statistics();
        assert_eq!(batch.derived_status(), BatchStatus::Passed);

        batch.outcomes.insert(a_id, ChannelTestOutcome::Failed);
        batch.outcomes.insert(b_id, ChannelTestOutcome::Failed);
        batch.update_statistics();
        assert_eq!(batch.derived_status(), BatchStatus::Failed);
        assert_eq!(batch.failed_points, 2);
    }

    #[test]
    fn test_raw_row_deserializes_both_shapes() {
        let cells: RawChannelRow = serde_json::from_str(r#"["PT_1", 4, null]"#).unwrap();
        assert!(matches!(cells, RawChannelRow::Cells(ref c) if c.len() == 3));

        let fields: RawChannelRow = serde_json::from_str(r#"{"tag": "PT_1", "module_type": "AI"}"#).unwrap();
        assert!(matches!(fields, RawChannelRow::Fields(ref m) if m.contains_key("tag")));
    }
}
