//! fat-allocator 命令行入口
//!
//! ```bash
//! fat-allocator allocate --request request.json --test-rig rig.json --output result.json
//! fat-allocator check-config --config fat.json
//! ```
//!
//! 退出码：0 完全成功，2 部分成功（有被拒绝的行、未分配的批次或未分配地址的通道），
//! 3 配置错误，1 其他错误

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use fat_allocator::logging::init_logging;
use fat_allocator::services::{
    AllocationRequest, BatchRegistry, ChannelAllocationService, CompletionStatus,
    IChannelAllocationService, TestRigChannelPool,
};
use fat_allocator::utils::{load_config, AppConfig};
use fat_allocator::{AppError, TestRigConfig};

const EXIT_PARTIAL: u8 = 2;
const EXIT_CONFIGURATION: u8 = 3;
const EXIT_FAILURE: u8 = 1;

#[derive(Parser)]
#[command(name = "fat-allocator")]
#[command(about = "FAT 测试批次与测试PLC通道分配器", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 执行一次分配，输出批次与拒绝报告（JSON）
    Allocate {
        /// 分配请求文件（JSON）
        #[arg(long)]
        request: PathBuf,

        /// 测试PLC通道表（JSON），缺省时使用配置中的路径
        #[arg(long)]
        test_rig: Option<PathBuf>,

        /// 结果输出文件，缺省输出到标准输出
        #[arg(long)]
        output: Option<PathBuf>,

        /// 应用配置文件（JSON）
        #[arg(long)]
        config: Option<PathBuf>,

        /// 格式化输出
        #[arg(long)]
        pretty: bool,
    },

    /// 检查应用配置（以及测试PLC通道表）
    CheckConfig {
        /// 应用配置文件（JSON）
        #[arg(long)]
        config: Option<PathBuf>,

        /// 测试PLC通道表（JSON）
        #[arg(long)]
        test_rig: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("错误: {:#}", err);
            exit_code_for(&err)
        }
    }
}

/// 致命的配置类错误（含请求文件无法读取/解析、日志文件无法打开）返回3，其余返回1
fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<AppError>() {
        Some(app_error) if app_error.is_fatal() => ExitCode::from(EXIT_CONFIGURATION),
        _ => ExitCode::from(EXIT_FAILURE),
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Allocate {
            request,
            test_rig,
            output,
            config,
            pretty,
        } => {
            let app_config = prepare(config)?;
            allocate(&app_config, &request, test_rig, output, pretty).await
        }
        Commands::CheckConfig { config, test_rig } => {
            let app_config = prepare(config)?;
            if let Ok(path) = rig_path(&app_config, test_rig) {
                let rig = TestRigConfig::load_from_file(&path).await?;
                TestRigChannelPool::from_config(&rig)?;
                println!("测试PLC通道表有效: {} ({} 个通道)", path.display(), rig.channels.len());
            }
            println!("{}", serde_json::to_string_pretty(&app_config)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// 加载配置并初始化日志
fn prepare(config: Option<PathBuf>) -> Result<AppConfig> {
    let app_config = load_config(config)?;
    init_logging(&app_config.logging_config)?;
    log::info!(
        "{} v{} ({})",
        app_config.app_settings.app_name,
        app_config.app_settings.app_version,
        app_config.app_settings.environment
    );
    Ok(app_config)
}

fn rig_path(app_config: &AppConfig, cli_path: Option<PathBuf>) -> Result<PathBuf, AppError> {
    cli_path
        .or_else(|| app_config.allocation_config.test_rig_config_path.clone())
        .ok_or_else(|| AppError::configuration_error("未指定测试PLC通道表（--test-rig 或配置 allocation_config.test_rig_config_path）"))
}

async fn load_request(path: &Path) -> Result<AllocationRequest, AppError> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        AppError::configuration_error(format!("读取分配请求 {} 失败: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        AppError::configuration_error(format!("解析分配请求 {} 失败: {}", path.display(), e))
    })
}

async fn allocate(
    app_config: &AppConfig,
    request_path: &Path,
    test_rig: Option<PathBuf>,
    output: Option<PathBuf>,
    pretty: bool,
) -> Result<ExitCode> {
    let request = load_request(request_path).await?;
    let rig = TestRigConfig::load_from_file(&rig_path(app_config, test_rig)?).await?;
    let pool = Arc::new(TestRigChannelPool::from_config(&rig)?);

    let service = ChannelAllocationService::new(
        pool,
        Arc::new(BatchRegistry::new()),
        app_config.allocation_config.rig_address_policy,
    );
    let result = service.allocate(request).await?;

    let json = if pretty {
        serde_json::to_string_pretty(&result)?
    } else {
        serde_json::to_string(&result)?
    };
    match output {
        Some(path) => {
            tokio::fs::write(&path, json)
                .await
                .with_context(|| format!("写入结果文件 {} 失败", path.display()))?;
            log::info!("分配结果已写入 {}", path.display());
        }
        None => println!("{}", json),
    }

    Ok(match result.completion() {
        CompletionStatus::Complete => ExitCode::SUCCESS,
        CompletionStatus::Partial => ExitCode::from(EXIT_PARTIAL),
    })
}
