//! 设备模块错误类型
//!
//! 定义设备注册表、驱动与目录解析相关的错误类型。
//!
//! ## 功能
//! - 目录配置错误
//! - 驱动能力与会话错误
//! - conmux 协议错误
//! - I/O 错误透传

use thiserror::Error;

/// 设备错误类型
#[derive(Debug, Error)]
pub enum DeviceError {
    /// 开发板不存在
    #[error("开发板不存在: {0}")]
    BoardNotFound(String),

    /// 尚未选择开发板
    #[error("尚未选择开发板")]
    NoBoardSelected,

    /// 目录配置错误
    #[error("设备目录配置错误: {0}")]
    Config(String),

    /// 复位序列无效
    #[error("复位序列无效: {0}")]
    ResetSequence(String),

    /// 控制驱动不可用
    #[error("控制驱动不可用: {0}")]
    DriverUnavailable(&'static str),

    /// 驱动不支持该操作
    #[error("驱动不支持该操作: {0}")]
    Unsupported(&'static str),

    /// conmux 注册表查询失败
    #[error("conmux 注册表查询失败: {0}")]
    Lookup(String),

    /// conmux 响应解析失败
    #[error("conmux 响应解析失败: {0}")]
    Protocol(String),

    /// 连接 conmux 实例失败
    #[error("连接 conmux 实例失败: {0}")]
    ConnectFailed(String),

    /// 获取开发板锁失败
    #[error("获取开发板锁失败: {0}")]
    LockFailed(String),

    /// 打开控制台设备失败
    #[error("打开控制台设备失败: {0}")]
    ConsoleOpen(String),

    /// fastboot 操作失败
    #[error("fastboot 操作失败: {0}")]
    Fastboot(String),

    /// 消息帧无效
    #[error("消息帧无效: {0}")]
    Frame(String),

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DeviceError> for String {
    fn from(err: DeviceError) -> Self {
        err.to_string()
    }
}
