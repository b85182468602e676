//! 日志管理模块
//!
//! stdout 被帧协议占用，所有诊断输出走 stderr；可选地同时写入
//! `~/.boardcast/logs/boardcast.log`，按大小轮转、按保留天数清理。
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Local, Utc};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// 日志配置
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 默认过滤指令（`BOARDCAST_LOG` 环境变量优先）
    pub filter: String,
    /// 是否写入日志文件
    pub enable_file_logging: bool,
    /// 单个日志文件大小上限（字节）
    pub max_file_size: u64,
    /// 轮转文件保留天数
    pub retention_days: u32,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            enable_file_logging: true,
            max_file_size: 10 * 1024 * 1024,
            retention_days: 7,
        }
    }
}

/// 默认日志文件路径: ~/.boardcast/logs/boardcast.log
fn default_log_file() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".boardcast")
        .join("logs")
        .join("boardcast.log")
}

/// 初始化全局日志
///
/// stderr 输出始终开启；文件输出按配置开启。重复初始化返回错误。
pub fn init_logging(config: &LogConfig) -> io::Result<()> {
    let filter = EnvFilter::try_from_env("BOARDCAST_LOG")
        .unwrap_or_else(|_| EnvFilter::new(config.filter.clone()));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(io::stderr);

    let file_layer = if config.enable_file_logging {
        let path = default_log_file();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        rotate_if_needed(&path, config.max_file_size);
        prune_old_logs(&path, config.retention_days);

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Some(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e.to_string()))?;

    if config.enable_file_logging {
        tracing::info!("[日志] 文件日志已开启: {:?}", default_log_file());
    }
    Ok(())
}

/// 超过大小上限时将当前日志文件改名为带时间戳的轮转文件
fn rotate_if_needed(path: &Path, max_file_size: u64) {
    let Ok(metadata) = fs::metadata(path) else {
        return;
    };

    if metadata.len() <= max_file_size {
        return;
    }

    let suffix = Local::now().format("%Y%m%d-%H%M%S");
    let rotated = path.with_file_name(format!(
        "{}.{}",
        path.file_name().unwrap_or_default().to_string_lossy(),
        suffix
    ));

    let _ = fs::rename(path, &rotated);
}

/// 删除超过保留天数的轮转文件
fn prune_old_logs(path: &Path, retention_days: u32) {
    let Some(dir) = path.parent() else {
        return;
    };
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    let cutoff = Utc::now() - Duration::days(retention_days as i64);
    let prefix = format!(
        "{}.",
        path.file_name().unwrap_or_default().to_string_lossy()
    );

    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        if !file_name.starts_with(&prefix) {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        let modified = DateTime::<Utc>::from(modified);
        if modified < cutoff {
            let _ = fs::remove_file(entry.path());
        }
    }
}
