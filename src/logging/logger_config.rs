//! 日志初始化
//!
//! 基于 env_logger：级别来自配置，`RUST_LOG` 优先；
//! 格式为 `[时间] [级别] [模块] 消息`

use std::fs::OpenOptions;
use std::io::Write;
use std::str::FromStr;

use chrono::Local;
use log::LevelFilter;

use crate::utils::config::LoggingConfig;
use crate::utils::error::{AppError, AppResult};

/// 把配置中的级别字符串解析为 `LevelFilter`
pub fn parse_level(level: &str) -> AppResult<LevelFilter> {
    LevelFilter::from_str(level.trim())
        .map_err(|_| AppError::configuration_error(format!("无效的日志级别: {}", level)))
}

/// 初始化全局日志
///
/// 配置了 `log_file_path` 时日志追加写入该文件，否则写到标准错误。
/// 重复初始化不会报错，保留第一次的设置
pub fn init_logging(config: &LoggingConfig) -> AppResult<()> {
    let level = parse_level(&config.log_level)?;

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    if let Ok(spec) = std::env::var("RUST_LOG") {
        builder.parse_filters(&spec);
    }

    builder.format(|buf, record| {
        writeln!(
            buf,
            "[{}] [{}] [{}] {}",
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.module_path().unwrap_or("-"),
            record.args()
        )
    });

    match &config.log_file_path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }
        None if !config.console_output => {
            builder.filter_level(LevelFilter::Off);
        }
        None => {
            builder.target(env_logger::Target::Stderr);
        }
    }

    if builder.try_init().is_err() {
        log::debug!("日志系统已初始化，忽略重复初始化");
    }
    Ok(())
}
