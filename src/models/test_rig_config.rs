// 文件: src/models/test_rig_config.rs
// 详细注释：测试PLC（测试台）通道配置模型

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::enums::{ModuleType, PowerSupplyType};
use super::structs::{CompatibilityClass, TestRigAddress};
use crate::utils::error::{AppError, AppResult};

/// 测试PLC通道类型枚举 - 对应通道映射表中的 ChannelType 字段
///
/// 带 `None` 后缀的为无源通道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
#[repr(i32)]
pub enum TestRigChannelType {
    AI = 0,      // 模拟量输入
    AO = 1,      // 模拟量输出
    DI = 2,      // 数字量输入
    DO = 3,      // 数字量输出
    AINone = 4,  // 模拟量输入(无源)
    AONone = 5,  // 模拟量输出(无源)
    DINone = 6,  // 数字量输入(无源)
    DONone = 7,  // 数字量输出(无源)
}

impl TestRigChannelType {
    pub fn module_type(self) -> ModuleType {
        match self {
            TestRigChannelType::AI | TestRigChannelType::AINone => ModuleType::AI,
            TestRigChannelType::AO | TestRigChannelType::AONone => ModuleType::AO,
            TestRigChannelType::DI | TestRigChannelType::DINone => ModuleType::DI,
            TestRigChannelType::DO | TestRigChannelType::DONone => ModuleType::DO,
        }
    }

    pub fn power_supply_type(self) -> PowerSupplyType {
        match self {
            TestRigChannelType::AI
            | TestRigChannelType::AO
            | TestRigChannelType::DI
            | TestRigChannelType::DO => PowerSupplyType::Powered,
            _ => PowerSupplyType::Unpowered,
        }
    }

    /// 由模块类型和供电类型组合出测试PLC通道类型
    pub fn from_parts(module_type: ModuleType, power: PowerSupplyType) -> Self {
        match (module_type, power) {
            (ModuleType::AI, PowerSupplyType::Powered) => TestRigChannelType::AI,
            (ModuleType::AO, PowerSupplyType::Powered) => TestRigChannelType::AO,
            (ModuleType::DI, PowerSupplyType::Powered) => TestRigChannelType::DI,
            (ModuleType::DO, PowerSupplyType::Powered) => TestRigChannelType::DO,
            (ModuleType::AI, PowerSupplyType::Unpowered) => TestRigChannelType::AINone,
            (ModuleType::AO, PowerSupplyType::Unpowered) => TestRigChannelType::AONone,
            (ModuleType::DI, PowerSupplyType::Unpowered) => TestRigChannelType::DINone,
            (ModuleType::DO, PowerSupplyType::Unpowered) => TestRigChannelType::DONone,
        }
    }

    /// 该测试PLC通道能测试的被测通道类别
    ///
    /// 接线规则（测试PLC → 被测PLC）：
    /// - AO无源 → AI有源，AO有源 → AI无源
    /// - AI有源 → AO无源，AI无源 → AO有源
    /// - DO无源 → DI有源，DO有源 → DI无源
    /// - DI无源 → DO有源，DI有源 → DO无源
    pub fn served_class(self) -> CompatibilityClass {
        CompatibilityClass::new(
            self.module_type().wiring_counterpart(),
            self.power_supply_type().opposite(),
        )
    }

    /// 能测试给定被测类别的测试PLC通道类型
    pub fn serving(class: CompatibilityClass) -> Self {
        Self::from_parts(
            class.module_type.wiring_counterpart(),
            class.power_supply_type.opposite(),
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TestRigChannelType::AI => "AI",
            TestRigChannelType::AO => "AO",
            TestRigChannelType::DI => "DI",
            TestRigChannelType::DO => "DO",
            TestRigChannelType::AINone => "AINone",
            TestRigChannelType::AONone => "AONone",
            TestRigChannelType::DINone => "DINone",
            TestRigChannelType::DONone => "DONone",
        }
    }
}

impl From<TestRigChannelType> for i32 {
    fn from(channel_type: TestRigChannelType) -> Self {
        channel_type as i32
    }
}

impl TryFrom<i32> for TestRigChannelType {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TestRigChannelType::AI),
            1 => Ok(TestRigChannelType::AO),
            2 => Ok(TestRigChannelType::DI),
            3 => Ok(TestRigChannelType::DO),
            4 => Ok(TestRigChannelType::AINone),
            5 => Ok(TestRigChannelType::AONone),
            6 => Ok(TestRigChannelType::DINone),
            7 => Ok(TestRigChannelType::DONone),
            other => Err(format!("无效的测试PLC通道类型编号: {}（有效范围0-7）", other)),
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// 测试PLC通道配置 - 对应通道映射表中的一行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRigChannel {
    #[serde(rename = "channelAddress")]
    pub channel_address: String,               // 通道位号 (如: AI1_1, AO1_2)
    #[serde(rename = "channelType")]
    pub channel_type: TestRigChannelType,      // 通道类型 (0-7)
    #[serde(rename = "communicationAddress")]
    pub communication_address: String,         // 通讯地址 (如: 40101, 00101)
    #[serde(default)]
    pub description: Option<String>,           // 描述信息
    #[serde(rename = "isEnabled", default = "default_enabled")]
    pub is_enabled: bool,                      // 是否启用
}

impl TestRigChannel {
    pub fn new(
        channel_address: impl Into<String>,
        channel_type: TestRigChannelType,
        communication_address: impl Into<String>,
    ) -> Self {
        Self {
            channel_address: channel_address.into(),
            channel_type,
            communication_address: communication_address.into(),
            description: None,
            is_enabled: true,
        }
    }

    /// 该通道能测试的被测通道类别
    pub fn served_class(&self) -> CompatibilityClass {
        self.channel_type.served_class()
    }

    /// 写入被测通道的地址记录
    pub fn to_address(&self) -> TestRigAddress {
        TestRigAddress {
            channel_tag: self.channel_address.clone(),
            communication_address: self.communication_address.clone(),
        }
    }
}

/// 测试PLC配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRigConfig {
    /// PLC品牌类型
    #[serde(rename = "brandType", default)]
    pub brand_type: String,
    /// IP地址
    #[serde(rename = "ipAddress", default)]
    pub ip_address: String,
    /// 通道映射表
    pub channels: Vec<TestRigChannel>,
}

impl TestRigConfig {
    /// 从JSON文件加载测试PLC配置
    pub async fn load_from_file(path: &Path) -> AppResult<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            AppError::configuration_error(format!("读取测试PLC配置文件 {} 失败: {}", path.display(), e))
        })?;

        let config: TestRigConfig = serde_json::from_str(&content).map_err(|e| {
            AppError::configuration_error(format!("解析测试PLC配置文件 {} 失败: {}", path.display(), e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// 启用的通道
    pub fn enabled_channels(&self) -> impl Iterator<Item = &TestRigChannel> {
        self.channels.iter().filter(|c| c.is_enabled)
    }

    /// 验证通道映射表
    ///
    /// 位号、通讯地址不能为空，启用通道之间通讯地址不能重复
    pub fn validate(&self) -> AppResult<()> {
        let mut addresses = HashSet::new();
        let mut tags = HashSet::new();

        for channel in self.enabled_channels() {
            if channel.channel_address.trim().is_empty() {
                return Err(AppError::configuration_error("测试PLC通道位号不能为空"));
            }
            if channel.communication_address.trim().is_empty() {
                return Err(AppError::configuration_error(format!(
                    "测试PLC通道 {} 的通讯地址不能为空",
                    channel.channel_address
                )));
            }
            if !tags.insert(channel.channel_address.as_str()) {
                return Err(AppError::configuration_error(format!(
                    "测试PLC通道位号重复: {}",
                    channel.channel_address
                )));
            }
            if !addresses.insert(channel.communication_address.as_str()) {
                return Err(AppError::configuration_error(format!(
                    "测试PLC通讯地址重复: {}",
                    channel.communication_address
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wiring_rule() {
        let ai_powered = CompatibilityClass::new(ModuleType::AI, PowerSupplyType::Powered);
        assert_eq!(TestRigChannelType::AONone.served_class(), ai_powered);
        assert_eq!(TestRigChannelType::serving(ai_powered), TestRigChannelType::AONone);

        let do_unpowered = CompatibilityClass::new(ModuleType::DO, PowerSupplyType::Unpowered);
        assert_eq!(TestRigChannelType::DI.served_class(), do_unpowered);

        for class in CompatibilityClass::all() {
            assert_eq!(TestRigChannelType::serving(class).served_class(), class);
        }
    }

    #[test]
    fn test_channel_type_serde_uses_numbers() {
        let json = r#"{"channelAddress":"AO1_1","channelType":5,"communicationAddress":"40101"}"#;
        let channel: TestRigChannel = serde_json::from_str(json).unwrap();
        assert_eq!(channel.channel_type, TestRigChannelType::AONone);
        assert!(channel.is_enabled);

        let bad = r#"{"channelAddress":"X","channelType":9,"communicationAddress":"1"}"#;
        assert!(serde_json::from_str::<TestRigChannel>(bad).is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_address() {
        let config = TestRigConfig {
            brand_type: "ModbusTcp".to_string(),
            ip_address: "192.168.1.100".to_string(),
            channels: vec![
                TestRigChannel::new("AO1_1", TestRigChannelType::AONone, "40101"),
                TestRigChannel::new("AO1_2", TestRigChannelType::AONone, "40101"),
            ],
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rig.json");
        std::fs::write(
            &path,
            r#"{"brandType":"ModbusTcp","ipAddress":"127.0.0.1","channels":[
                {"channelAddress":"AO1_1","channelType":5,"communicationAddress":"40101"},
                {"channelAddress":"DO1_1","channelType":7,"communicationAddress":"00101","isEnabled":false}
            ]}"#,
        )
        .unwrap();

        let config = TestRigConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.channels.len(), 2);
        assert_eq!(config.enabled_channels().count(), 1);

        let missing = TestRigConfig::load_from_file(&dir.path().join("missing.json")).await;
        assert!(missing.is_err());
    }
}
