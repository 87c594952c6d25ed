use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::models::RigAddressPolicy;
use crate::utils::error::{AppError, AppResult};

/// 环境变量前缀，如 `FAT_LOGGING_CONFIG__LOG_LEVEL=debug`
pub const ENV_PREFIX: &str = "FAT";

/// 应用程序主配置结构
///
/// 注意这里没有批次容量：容量只能由每次分配请求显式给出
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// 应用程序基本设置
    #[serde(default)]
    pub app_settings: AppSettings,
    /// 分配配置
    #[serde(default)]
    pub allocation_config: AllocationConfig,
    /// 日志配置
    #[serde(default)]
    pub logging_config: LoggingConfig,
}

/// 应用程序基本设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    /// 应用程序名称
    pub app_name: String,
    /// 应用程序版本
    pub app_version: String,
    /// 运行环境 (development, testing, production)
    pub environment: String,
}

/// 分配配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllocationConfig {
    /// 哪些通道需要测试PLC地址
    #[serde(default)]
    pub rig_address_policy: RigAddressPolicy,
    /// 默认的测试PLC通道表路径（命令行未指定时使用）
    #[serde(default)]
    pub test_rig_config_path: Option<PathBuf>,
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 日志文件路径，为空时只输出到控制台
    #[serde(default)]
    pub log_file_path: Option<PathBuf>,
    /// 是否启用控制台输出
    pub console_output: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            app_name: "fat-allocator".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "production".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file_path: None,
            console_output: true,
        }
    }
}

/// 配置管理器
///
/// 加载顺序：内置默认值 → JSON配置文件（可选）→ `FAT_` 前缀的环境变量
pub struct ConfigManager {
    config: AppConfig,
    config_file_path: Option<PathBuf>,
}

impl ConfigManager {
    /// 创建新的配置管理器
    pub fn new(config_file_path: Option<PathBuf>) -> Self {
        Self {
            config: AppConfig::default(),
            config_file_path,
        }
    }

    /// 加载配置（默认值 + 文件 + 环境变量）
    pub fn load(&mut self) -> AppResult<()> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?);

        if let Some(path) = &self.config_file_path {
            if !path.exists() {
                return Err(AppError::configuration_error(format!(
                    "配置文件不存在: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(
                config::File::from(path.as_path()).format(config::FileFormat::Json),
            );
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        self.config = settings.try_deserialize()?;
        log::debug!("配置加载完成: {:?}", self.config);
        Ok(())
    }

    /// 将当前配置保存为JSON文件
    pub async fn save_to_file(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::io_error(format!("创建配置目录失败: {}", e), e.kind().to_string()))?;
        }

        let content = serde_json::to_string_pretty(&self.config)
            .map_err(|e| AppError::json_error(format!("序列化配置失败: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| AppError::io_error(format!("写入配置文件失败: {}", e), e.kind().to_string()))?;

        Ok(())
    }

    /// 获取配置的只读引用
    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    /// 获取配置的可变引用
    pub fn get_config_mut(&mut self) -> &mut AppConfig {
        &mut self.config
    }

    /// 验证配置的有效性
    pub fn validate_config(&self) -> AppResult<()> {
        let valid_environments = ["development", "testing", "production"];
        if !valid_environments.contains(&self.config.app_settings.environment.as_str()) {
            return Err(AppError::configuration_error(format!(
                "无效的环境配置: {}，有效值: {:?}",
                self.config.app_settings.environment, valid_environments
            )));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.config.logging_config.log_level.as_str()) {
            return Err(AppError::configuration_error(format!(
                "无效的日志级别: {}，有效值: {:?}",
                self.config.logging_config.log_level, valid_log_levels
            )));
        }

        if let Some(path) = &self.config.allocation_config.test_rig_config_path {
            if path.as_os_str().is_empty() {
                return Err(AppError::configuration_error("测试PLC通道表路径不能为空字符串"));
            }
        }

        Ok(())
    }

    /// 重置为默认配置
    pub fn reset_to_default(&mut self) {
        self.config = AppConfig::default();
    }
}

/// 一次性加载并验证配置
pub fn load_config(config_path: Option<PathBuf>) -> AppResult<AppConfig> {
    let mut manager = ConfigManager::new(config_path);
    manager.load()?;
    manager.validate_config()?;
    Ok(manager.get_config().clone())
}
