//! # 模型枚举类型模块
//!
//! ## 业务作用
//! 本模块定义了分配器中使用的各种枚举类型，包括：
//! - **通道分类枚举**: 模块类型、供电类型、数据类型
//! - **批次状态枚举**: 批次测试状态、地址分配状态
//! - **通道结果枚举**: 测试执行引擎回报的单通道结果
//!
//! ## 设计原则
//! - **封闭集合**: 分组与分配的键全部是枚举，不再用字符串比较
//! - **序列化支持**: 所有枚举都支持JSON序列化
//! - **字符串转换**: 提供与字符串的双向转换能力，解析时大小写不敏感

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// 模块类型枚举
/// 表示被测PLC通道所在模块的类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModuleType {
    /// 模拟量输入
    AI,
    /// 模拟量输出
    AO,
    /// 数字量输入
    DI,
    /// 数字量输出
    DO,
}

impl ModuleType {
    /// 全部模块类型，按固定顺序
    pub const ALL: [ModuleType; 4] = [ModuleType::AI, ModuleType::AO, ModuleType::DI, ModuleType::DO];

    /// 是否为模拟量（AI或AO）
    pub fn is_analog(self) -> bool {
        matches!(self, ModuleType::AI | ModuleType::AO)
    }

    /// 是否为数字量（DI或DO）
    pub fn is_digital(self) -> bool {
        !self.is_analog()
    }

    /// 接线对端的模块类型
    ///
    /// 测试PLC用相反方向的通道驱动/采集被测通道：
    /// AI ↔ AO，DI ↔ DO
    pub fn wiring_counterpart(self) -> ModuleType {
        match self {
            ModuleType::AI => ModuleType::AO,
            ModuleType::AO => ModuleType::AI,
            ModuleType::DI => ModuleType::DO,
            ModuleType::DO => ModuleType::DI,
        }
    }
}

impl Display for ModuleType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ModuleType::AI => "AI",
            ModuleType::AO => "AO",
            ModuleType::DI => "DI",
            ModuleType::DO => "DO",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for ModuleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "AI" => Ok(ModuleType::AI),
            "AO" => Ok(ModuleType::AO),
            "DI" => Ok(ModuleType::DI),
            "DO" => Ok(ModuleType::DO),
            _ => Err(format!("模块类型'{}'无效，支持的类型: AI, AO, DI, DO", s)),
        }
    }
}

/// 供电类型枚举
///
/// **业务含义**:
/// - `Powered`（有源）: 现场设备自供电
/// - `Unpowered`（无源）: 由测试回路供电
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PowerSupplyType {
    /// 有源
    Powered,
    /// 无源
    Unpowered,
}

impl PowerSupplyType {
    /// 接线对端的供电类型（有源通道由无源测试通道测试，反之亦然）
    pub fn opposite(self) -> PowerSupplyType {
        match self {
            PowerSupplyType::Powered => PowerSupplyType::Unpowered,
            PowerSupplyType::Unpowered => PowerSupplyType::Powered,
        }
    }

    /// 从点表中的模块信息与供电类型单元格推断
    ///
    /// 规则：模块名（大写后）包含 S 的 DI 模块为安全型模块，一律无源；
    /// 单元格包含"无源"或等于 unpowered（大小写不敏感）即为无源；
    /// 单元格为空时退回到变量描述中是否包含"无源"；其余一律按有源处理
    pub fn infer(
        module_type: ModuleType,
        module: &str,
        power_cell: &str,
        description: &str,
    ) -> PowerSupplyType {
        if module_type == ModuleType::DI && module.to_uppercase().contains('S') {
            return PowerSupplyType::Unpowered;
        }

        let cell = power_cell.trim();
        if cell.is_empty() {
            return if description.contains("无源") {
                PowerSupplyType::Unpowered
            } else {
                PowerSupplyType::Powered
            };
        }

        if cell.contains("无源") || cell.eq_ignore_ascii_case("unpowered") {
            PowerSupplyType::Unpowered
        } else {
            PowerSupplyType::Powered
        }
    }
}

impl Default for PowerSupplyType {
    fn default() -> Self {
        Self::Powered
    }
}

impl Display for PowerSupplyType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PowerSupplyType::Powered => "Powered",
            PowerSupplyType::Unpowered => "Unpowered",
        };
        write!(f, "{}", s)
    }
}

/// 点位数据类型枚举
/// 表示被测PLC点位的数据类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PointDataType {
    /// 布尔类型
    Bool,
    /// 整数类型
    Int,
    /// 浮点数类型
    Float,
    /// 字符串类型
    String,
}

impl Display for PointDataType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PointDataType::Bool => "Bool",
            PointDataType::Int => "Int",
            PointDataType::Float => "Float",
            PointDataType::String => "String",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for PointDataType {
    type Err = String;

    /// 大小写不敏感，接受点表中常见的同义写法
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BOOL" | "BOOLEAN" | "BIT" => Ok(PointDataType::Bool),
            "INT" | "INTEGER" | "INT16" | "INT32" | "DINT" | "WORD" | "DWORD" | "UINT16" | "UINT32" => {
                Ok(PointDataType::Int)
            }
            "FLOAT" | "REAL" | "DOUBLE" | "LREAL" => Ok(PointDataType::Float),
            "STRING" | "STR" => Ok(PointDataType::String),
            _ => Err(format!("数据类型'{}'无效，支持的类型: Bool, Int, Float/Real, String", s)),
        }
    }
}

/// 批次测试状态枚举
///
/// 状态只能单向推进：NotTested → Testing → {Passed, Failed, PartiallyFailed}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BatchStatus {
    /// 未测试
    NotTested,
    /// 测试中
    Testing,
    /// 全部通过
    Passed,
    /// 全部失败
    Failed,
    /// 部分失败
    PartiallyFailed,
}

impl BatchStatus {
    /// 是否为终态
    pub fn is_terminal(self) -> bool {
        matches!(self, BatchStatus::Passed | BatchStatus::Failed | BatchStatus::PartiallyFailed)
    }

    /// 是否允许从当前状态转换到目标状态
    pub fn can_transition_to(self, next: BatchStatus) -> bool {
        match (self, next) {
            (BatchStatus::NotTested, BatchStatus::Testing) => true,
            // 取消尚未开始的批次按失败处理
            (BatchStatus::NotTested, BatchStatus::Failed) => true,
            (BatchStatus::Testing, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl Default for BatchStatus {
    fn default() -> Self {
        Self::NotTested
    }
}

impl Display for BatchStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BatchStatus::NotTested => "NotTested",
            BatchStatus::Testing => "Testing",
            BatchStatus::Passed => "Passed",
            BatchStatus::Failed => "Failed",
            BatchStatus::PartiallyFailed => "PartiallyFailed",
        };
        write!(f, "{}", s)
    }
}

/// 批次的测试PLC地址分配状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationState {
    /// 尚未分配
    Pending,
    /// 已分配（可能有个别通道因兼容性问题未分配）
    Allocated,
    /// 分配失败（容量耗尽），批次不能开始测试
    Failed,
}

impl Default for AllocationState {
    fn default() -> Self {
        Self::Pending
    }
}

/// 单通道测试结果（由外部测试执行引擎回报）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelTestOutcome {
    /// 未执行
    NotTested,
    /// 通过
    Passed,
    /// 失败
    Failed,
}

impl Default for ChannelTestOutcome {
    fn default() -> Self {
        Self::NotTested
    }
}

/// 测试PLC地址分配策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RigAddressPolicy {
    /// 所有通道都需要测试PLC通道（测试台同时驱动/采集数字量）
    AllChannels,
    /// 仅模拟量通道需要测试PLC通道
    AnalogOnly,
}

impl RigAddressPolicy {
    /// 给定模块类型的通道是否需要测试PLC地址
    pub fn requires_rig_address(self, module_type: ModuleType) -> bool {
        match self {
            RigAddressPolicy::AllChannels => true,
            RigAddressPolicy::AnalogOnly => module_type.is_analog(),
        }
    }
}

impl Default for RigAddressPolicy {
    fn default() -> Self {
        Self::AllChannels
    }
}
