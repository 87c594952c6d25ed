//! # 通道定义校验器
//!
//! ## 业务作用
//! 把上游提供的原始行（单元格行或字段映射）转换为 `ChannelDefinition`，
//! 结构或字段不合法的行被拒绝并附带全部原因。任何一行出错都不会中断整个导入，
//! 被拒绝的行逐条记录日志，不允许静默丢弃。
//!
//! ## 输入形式
//! - **单元格行**: 按 `ColumnLayout` 解释列的含义
//! - **字段映射**: 键可以是字段名，也可以是点表的中文表头（如 `位号`、`模块类型`）

use std::collections::{BTreeMap, HashMap};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::log_row_rejected;
use crate::models::{
    ChannelDefinition, ModuleType, PointDataType, PowerSupplyType, RawChannelRow,
    RejectionReason, RowRejection, SignalSpec,
};

/// 点表中的逻辑字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Field {
    Tag,
    VariableName,
    Description,
    Station,
    Module,
    Channel,
    ModuleType,
    PowerSupplyType,
    DataType,
    PlcCommunicationAddress,
    RangeLowerLimit,
    RangeUpperLimit,
}

/// 字段名/表头别名 → 逻辑字段（键统一为小写）
static FIELD_ALIASES: Lazy<HashMap<&'static str, Field>> = Lazy::new(|| {
    let mut aliases = HashMap::new();
    for (key, field) in [
        ("tag", Field::Tag),
        ("位号", Field::Tag),
        ("variable_name", Field::VariableName),
        ("变量名称", Field::VariableName),
        ("变量名称（hmi）", Field::VariableName),
        ("变量名称(hmi)", Field::VariableName),
        ("description", Field::Description),
        ("变量描述", Field::Description),
        ("station", Field::Station),
        ("station_name", Field::Station),
        ("场站名", Field::Station),
        ("module", Field::Module),
        ("module_name", Field::Module),
        ("模块名称", Field::Module),
        ("channel", Field::Channel),
        ("channel_tag_in_module", Field::Channel),
        ("通道位号", Field::Channel),
        ("module_type", Field::ModuleType),
        ("模块类型", Field::ModuleType),
        ("power_supply_type", Field::PowerSupplyType),
        ("供电类型", Field::PowerSupplyType),
        ("供电类型（有源/无源）", Field::PowerSupplyType),
        ("供电类型(有源/无源)", Field::PowerSupplyType),
        ("data_type", Field::DataType),
        ("数据类型", Field::DataType),
        ("plc_communication_address", Field::PlcCommunicationAddress),
        ("plc_address", Field::PlcCommunicationAddress),
        ("上位机通讯地址", Field::PlcCommunicationAddress),
        ("range_lower_limit", Field::RangeLowerLimit),
        ("range_low_limit", Field::RangeLowerLimit),
        ("量程低限", Field::RangeLowerLimit),
        ("range_upper_limit", Field::RangeUpperLimit),
        ("range_high_limit", Field::RangeUpperLimit),
        ("量程高限", Field::RangeUpperLimit),
    ] {
        aliases.insert(key, field);
    }
    aliases
});

/// 单元格行的列布局（列索引从0开始）
///
/// 必填列决定最少列数；可选列缺失时按空值处理
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnLayout {
    pub tag: usize,
    #[serde(default)]
    pub variable_name: Option<usize>,
    #[serde(default)]
    pub description: Option<usize>,
    #[serde(default)]
    pub station: Option<usize>,
    #[serde(default)]
    pub module: Option<usize>,
    #[serde(default)]
    pub channel: Option<usize>,
    pub module_type: usize,
    #[serde(default)]
    pub power_supply_type: Option<usize>,
    pub data_type: usize,
    pub plc_communication_address: usize,
    #[serde(default)]
    pub range_lower_limit: Option<usize>,
    #[serde(default)]
    pub range_upper_limit: Option<usize>,
}

impl ColumnLayout {
    /// 紧凑布局：
    /// 位号, 变量名, 描述, 站名, 模块名, 通道号, 模块类型, 供电类型, 数据类型, PLC地址, 量程低限, 量程高限
    pub fn compact() -> Self {
        Self {
            tag: 0,
            variable_name: Some(1),
            description: Some(2),
            station: Some(3),
            module: Some(4),
            channel: Some(5),
            module_type: 6,
            power_supply_type: Some(7),
            data_type: 8,
            plc_communication_address: 9,
            range_lower_limit: Some(10),
            range_upper_limit: Some(11),
        }
    }

    /// 一行至少需要的列数
    ///
    /// 必填列和供电类型列（供电类型决定兼容类别）都必须在行内
    pub fn min_columns(&self) -> usize {
        [
            Some(self.tag),
            Some(self.module_type),
            Some(self.data_type),
            Some(self.plc_communication_address),
            self.power_supply_type,
        ]
        .into_iter()
        .flatten()
        .max()
        .map_or(0, |max| max + 1)
    }

    fn index_of(&self, field: Field) -> Option<usize> {
        match field {
            Field::Tag => Some(self.tag),
            Field::VariableName => self.variable_name,
            Field::Description => self.description,
            Field::Station => self.station,
            Field::Module => self.module,
            Field::Channel => self.channel,
            Field::ModuleType => Some(self.module_type),
            Field::PowerSupplyType => self.power_supply_type,
            Field::DataType => Some(self.data_type),
            Field::PlcCommunicationAddress => Some(self.plc_communication_address),
            Field::RangeLowerLimit => self.range_lower_limit,
            Field::RangeUpperLimit => self.range_upper_limit,
        }
    }
}

impl Default for ColumnLayout {
    fn default() -> Self {
        Self::compact()
    }
}

/// 校验结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    /// 通过校验的通道定义（保持输入顺序）
    pub valid: Vec<ChannelDefinition>,
    /// 被拒绝的行
    pub rejected: Vec<RowRejection>,
}

impl ValidationOutcome {
    pub fn total_rows(&self) -> usize {
        self.valid.len() + self.rejected.len()
    }
}

/// 行内字段的统一视图
struct RowView<'a> {
    values: BTreeMap<Field, &'a Value>,
}

impl<'a> RowView<'a> {
    fn text(&self, field: Field) -> String {
        self.values.get(&field).map(|v| cell_text(v)).unwrap_or_default()
    }

    fn number(&self, field: Field) -> Option<Result<f64, String>> {
        let value = self.values.get(&field)?;
        match value {
            Value::Null => None,
            Value::Number(n) => Some(n.as_f64().ok_or_else(|| n.to_string())),
            other => {
                let text = cell_text(other);
                if text.is_empty() {
                    None
                } else {
                    Some(text.parse::<f64>().map_err(|_| text))
                }
            }
        }
    }
}

/// 单元格值转为去除首尾空白的字符串，null 视为空
fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
}

fn is_cjk(c: char) -> bool {
    matches!(c, '\u{4e00}'..='\u{9fff}' | '\u{3400}'..='\u{4dbf}')
}

fn valid_tag(value: &str) -> bool {
    value.chars().all(is_identifier_char)
}

fn valid_plc_address(value: &str) -> bool {
    value.chars().all(|c| is_identifier_char(c) || c == '%')
}

fn valid_variable_name(value: &str) -> bool {
    value
        .chars()
        .all(|c| is_identifier_char(c) || is_cjk(c) || matches!(c, '(' | ')' | '（' | '）'))
}

/// 通道定义校验器
#[derive(Debug, Clone, Default)]
pub struct DefinitionValidator {
    layout: ColumnLayout,
}

impl DefinitionValidator {
    pub fn new(layout: ColumnLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &ColumnLayout {
        &self.layout
    }

    /// 校验全部原始行
    ///
    /// 行索引从0开始；位号重复只与此前已接受的行比较
    pub fn validate_rows(&self, rows: &[RawChannelRow]) -> ValidationOutcome {
        log::info!("=== 开始校验通道定义，共 {} 行 ===", rows.len());

        let mut outcome = ValidationOutcome::default();
        let mut accepted_tags: HashMap<String, usize> = HashMap::new();

        for (row_index, row) in rows.iter().enumerate() {
            match self.validate_row(row_index, row, &accepted_tags) {
                Ok(definition) => {
                    accepted_tags.insert(definition.tag.clone(), row_index);
                    outcome.valid.push(definition);
                }
                Err(rejection) => {
                    let reasons: Vec<String> = rejection.reasons.iter().map(|r| r.to_string()).collect();
                    log_row_rejected!(
                        "第{}行 (位号: {}): {}",
                        row_index,
                        rejection.tag.as_deref().unwrap_or("-"),
                        reasons.join("; ")
                    );
                    outcome.rejected.push(rejection);
                }
            }
        }

        log::info!(
            "=== 通道定义校验完成: 接受 {} 行，拒绝 {} 行 ===",
            outcome.valid.len(),
            outcome.rejected.len()
        );
        outcome
    }

    fn view<'a>(&self, row: &'a RawChannelRow) -> Result<RowView<'a>, RejectionReason> {
        let mut values = BTreeMap::new();
        match row {
            RawChannelRow::Cells(cells) => {
                let expected = self.layout.min_columns();
                if cells.len() < expected {
                    return Err(RejectionReason::InsufficientColumns {
                        expected,
                        actual: cells.len(),
                    });
                }
                for field in [
                    Field::Tag,
                    Field::VariableName,
                    Field::Description,
                    Field::Station,
                    Field::Module,
                    Field::Channel,
                    Field::ModuleType,
                    Field::PowerSupplyType,
                    Field::DataType,
                    Field::PlcCommunicationAddress,
                    Field::RangeLowerLimit,
                    Field::RangeUpperLimit,
                ] {
                    if let Some(value) = self.layout.index_of(field).and_then(|i| cells.get(i)) {
                        values.insert(field, value);
                    }
                }
            }
            RawChannelRow::Fields(map) => {
                for (key, value) in map {
                    let normalized = key.trim().to_lowercase();
                    if let Some(field) = FIELD_ALIASES.get(normalized.as_str()) {
                        values.entry(*field).or_insert(value);
                    }
                }
            }
        }
        Ok(RowView { values })
    }

    fn validate_row(
        &self,
        row_index: usize,
        row: &RawChannelRow,
        accepted_tags: &HashMap<String, usize>,
    ) -> Result<ChannelDefinition, RowRejection> {
        let view = self.view(row).map_err(|reason| RowRejection {
            row_index,
            tag: None,
            reasons: vec![reason],
        })?;

        let mut reasons = Vec::new();

        let tag = view.text(Field::Tag);
        if tag.is_empty() {
            reasons.push(RejectionReason::EmptyField { field: "tag".to_string() });
        } else if !valid_tag(&tag) {
            reasons.push(RejectionReason::InvalidCharacters {
                field: "tag".to_string(),
                value: tag.clone(),
            });
        }

        let plc_address = view.text(Field::PlcCommunicationAddress);
        if plc_address.is_empty() {
            reasons.push(RejectionReason::EmptyField {
                field: "plc_communication_address".to_string(),
            });
        } else if !valid_plc_address(&plc_address) {
            reasons.push(RejectionReason::InvalidCharacters {
                field: "plc_communication_address".to_string(),
                value: plc_address.clone(),
            });
        }

        let variable_name = view.text(Field::VariableName);
        if !variable_name.is_empty() && !valid_variable_name(&variable_name) {
            reasons.push(RejectionReason::InvalidCharacters {
                field: "variable_name".to_string(),
                value: variable_name.clone(),
            });
        }

        let module_type_text = view.text(Field::ModuleType);
        let module_type = if module_type_text.is_empty() {
            reasons.push(RejectionReason::EmptyField { field: "module_type".to_string() });
            None
        } else {
            match module_type_text.parse::<ModuleType>() {
                Ok(module_type) => Some(module_type),
                Err(_) => {
                    reasons.push(RejectionReason::InvalidModuleType { value: module_type_text });
                    None
                }
            }
        };

        let data_type_text = view.text(Field::DataType);
        let data_type = if data_type_text.is_empty() {
            reasons.push(RejectionReason::EmptyField { field: "data_type".to_string() });
            None
        } else {
            match data_type_text.parse::<PointDataType>() {
                Ok(data_type) => Some(data_type),
                Err(_) => {
                    reasons.push(RejectionReason::InvalidDataType { value: data_type_text });
                    None
                }
            }
        };

        // 数字量忽略量程列
        let signal = match module_type {
            Some(module_type) if module_type.is_analog() => match Self::analog_signal(&view) {
                Ok(signal) => Some(signal),
                Err(message) => {
                    reasons.push(RejectionReason::InvalidRange { message });
                    None
                }
            },
            Some(_) => Some(SignalSpec::Digital),
            None => None,
        };

        if !tag.is_empty() {
            if let Some(first_row) = accepted_tags.get(&tag) {
                reasons.push(RejectionReason::DuplicateTag {
                    tag: tag.clone(),
                    first_row: *first_row,
                });
            }
        }

        let reject = |reasons: Vec<RejectionReason>| RowRejection {
            row_index,
            tag: if tag.is_empty() { None } else { Some(tag.clone()) },
            reasons,
        };

        let (Some(module_type), Some(data_type), Some(signal)) = (module_type, data_type, signal) else {
            return Err(reject(reasons));
        };
        if !reasons.is_empty() {
            return Err(reject(reasons));
        }

        let description = view.text(Field::Description);
        let module = view.text(Field::Module);
        let power_supply_type = PowerSupplyType::infer(
            module_type,
            &module,
            &view.text(Field::PowerSupplyType),
            &description,
        );

        ChannelDefinition::new(
            tag.clone(),
            plc_address,
            module_type,
            power_supply_type,
            data_type,
            signal,
        )
        .map(|definition| {
            definition
                .with_names(variable_name, description)
                .with_location(view.text(Field::Station), module, view.text(Field::Channel))
                .with_source_row(row_index)
        })
        .map_err(|e| reject(vec![RejectionReason::Malformed { message: e.to_string() }]))
    }

    fn analog_signal(view: &RowView<'_>) -> Result<SignalSpec, String> {
        let lower = match view.number(Field::RangeLowerLimit) {
            None => return Err("模拟量通道缺少量程低限".to_string()),
            Some(Err(text)) => return Err(format!("量程低限不是数值: '{}'", text)),
            Some(Ok(value)) => value,
        };
        let upper = match view.number(Field::RangeUpperLimit) {
            None => return Err("模拟量通道缺少量程高限".to_string()),
            Some(Err(text)) => return Err(format!("量程高限不是数值: '{}'", text)),
            Some(Ok(value)) => value,
        };
        SignalSpec::analog(lower, upper).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cells(values: Value) -> RawChannelRow {
        serde_json::from_value(values).unwrap()
    }

    fn analog_row(tag: &str, module_type: &str) -> RawChannelRow {
        cells(json!([tag, tag, "压力", "站1", "M1", "1", module_type, "有源", "REAL", "40001", 0, 100]))
    }

    fn digital_row(tag: &str) -> RawChannelRow {
        cells(json!([tag, null, "阀门反馈", "站1", "M2", "1", "DI", "无源", "BOOL", "00001"]))
    }

    #[test]
    fn test_valid_rows_are_accepted_in_order() {
        let _ = env_logger::builder().is_test(true).try_init();
        let validator = DefinitionValidator::default();
        let outcome = validator.validate_rows(&[analog_row("PT_101", "AI"), digital_row("XS_201")]);

        assert!(outcome.rejected.is_empty());
        assert_eq!(outcome.valid.len(), 2);
        assert_eq!(outcome.valid[0].tag, "PT_101");
        assert_eq!(outcome.valid[0].range_upper_limit(), Some(100.0));
        assert_eq!(outcome.valid[1].power_supply_type, PowerSupplyType::Unpowered);
        assert_eq!(outcome.valid[1].variable_name, "XS_201");
        assert_eq!(outcome.valid[1].source_row, 1);
    }

    #[test]
    fn test_invalid_module_type_is_rejected() {
        let validator = DefinitionValidator::default();
        let outcome = validator.validate_rows(&[analog_row("PT_101", "XX"), analog_row("PT_102", "ai")]);

        assert_eq!(outcome.valid.len(), 1);
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].row_index, 0);
        assert!(outcome.rejected[0].has_reason_code("INVALID_MODULE_TYPE"));
    }

    #[test]
    fn test_row_collects_multiple_reasons() {
        let validator = DefinitionValidator::default();
        let row = cells(json!(["PT 101", "", "", "", "", "", "", "", "DECIMAL", ""]));
        let outcome = validator.validate_rows(&[row]);

        let rejection = &outcome.rejected[0];
        assert!(rejection.has_reason_code("INVALID_CHARACTERS"));
        assert!(rejection.has_reason_code("FIELD_EMPTY"));
        assert!(rejection.has_reason_code("INVALID_DATA_TYPE"));
        assert_eq!(rejection.tag.as_deref(), Some("PT 101"));
    }

    #[test]
    fn test_short_row_skips_field_checks() {
        let validator = DefinitionValidator::default();
        let outcome = validator.validate_rows(&[cells(json!(["", "x"]))]);

        let rejection = &outcome.rejected[0];
        assert_eq!(
            rejection.reasons,
            vec![RejectionReason::InsufficientColumns { expected: 10, actual: 2 }]
        );
    }

    #[test]
    fn test_duplicate_tag_and_invalid_range() {
        let validator = DefinitionValidator::default();
        let reversed = cells(json!(["PT_102", "", "", "", "", "", "AI", "", "FLOAT", "40002", 100, 0]));
        let outcome = validator.validate_rows(&[analog_row("PT_101", "AI"), analog_row("PT_101", "AI"), reversed]);

        assert_eq!(outcome.valid.len(), 1);
        assert!(outcome.rejected[0].has_reason_code("DUPLICATE_TAG"));
        assert!(outcome.rejected[1].has_reason_code("INVALID_RANGE"));
    }

    /// 安全型DI模块即使标注有源也按无源处理
    #[test]
    fn test_safety_di_module_overrides_power_cell() {
        let validator = DefinitionValidator::default();
        let row = cells(json!(["XS_501", "", "急停", "站1", "DI-S2", "1", "DI", "有源", "BOOL", "00501"]));
        let outcome = validator.validate_rows(&[row]);

        assert!(outcome.rejected.is_empty(), "{:?}", outcome.rejected);
        assert_eq!(outcome.valid[0].power_supply_type, PowerSupplyType::Unpowered);
        assert_eq!(outcome.valid[0].module, "DI-S2");
    }

    #[test]
    fn test_field_map_with_chinese_headers() {
        let validator = DefinitionValidator::default();
        let row = cells(json!({
            "位号": "TT_301",
            "变量名称（HMI）": "温度（出口）",
            "变量描述": "出口温度 无源",
            "模块类型": "AO",
            "数据类型": "Float",
            "上位机通讯地址": 40101,
            "量程低限": "-20",
            "量程高限": 80.5
        }));
        let outcome = validator.validate_rows(&[row]);

        assert!(outcome.rejected.is_empty(), "{:?}", outcome.rejected);
        let definition = &outcome.valid[0];
        assert_eq!(definition.plc_communication_address, "40101");
        assert_eq!(definition.module_type, ModuleType::AO);
        assert_eq!(definition.power_supply_type, PowerSupplyType::Unpowered);
        assert_eq!(definition.range_lower_limit(), Some(-20.0));
    }
}
