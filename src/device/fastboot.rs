//! fastboot 协作方接口
//!
//! 固件下载/引导协议的实现位于核心之外；本模块只定义接缝：会话
//! 工厂、会话操作与设备出现/消失回调。生产后端由宿主程序提供，
//! 二进制在没有后端时接入仅记录日志的空后端。

use async_trait::async_trait;
use std::sync::Arc;

use crate::device::error::DeviceError;

/// fastboot 设备出现/消失回调
pub trait FastbootListener: Send + Sync {
    /// 设备已出现
    fn present(&self);
    /// 设备已消失
    fn gone(&self);
}

/// fastboot 会话操作
#[async_trait]
pub trait FastbootSession: Send + Sync {
    /// 设置活动槽位
    async fn set_active(&self, slot: &str) -> Result<(), DeviceError>;

    /// 下载镜像
    async fn download(&self, image: &[u8]) -> Result<(), DeviceError>;

    /// 引导已下载的镜像
    async fn boot(&self) -> Result<(), DeviceError>;

    /// 刷写已下载的镜像到分区
    async fn flash(&self, partition: &str) -> Result<(), DeviceError>;

    /// 重启设备
    async fn reboot(&self) -> Result<(), DeviceError>;
}

/// fastboot 会话工厂
pub trait FastbootBackend: Send + Sync {
    /// 按序列号打开会话
    fn open(
        &self,
        serial: &str,
        listener: Arc<dyn FastbootListener>,
    ) -> Result<Box<dyn FastbootSession>, DeviceError>;
}

/// 空后端
///
/// 没有 fastboot 协议栈的部署使用：打开总是成功，所有会话操作
/// 记录警告后报告失败。
pub struct NullFastboot;

struct NullSession {
    serial: String,
}

impl FastbootBackend for NullFastboot {
    fn open(
        &self,
        serial: &str,
        _listener: Arc<dyn FastbootListener>,
    ) -> Result<Box<dyn FastbootSession>, DeviceError> {
        tracing::warn!("[fastboot] 未接入 fastboot 后端: serial={serial}");
        Ok(Box::new(NullSession {
            serial: serial.to_string(),
        }))
    }
}

#[async_trait]
impl FastbootSession for NullSession {
    async fn set_active(&self, _slot: &str) -> Result<(), DeviceError> {
        self.unavailable("set_active")
    }

    async fn download(&self, _image: &[u8]) -> Result<(), DeviceError> {
        self.unavailable("download")
    }

    async fn boot(&self) -> Result<(), DeviceError> {
        self.unavailable("boot")
    }

    async fn flash(&self, _partition: &str) -> Result<(), DeviceError> {
        self.unavailable("flash")
    }

    async fn reboot(&self) -> Result<(), DeviceError> {
        self.unavailable("reboot")
    }
}

impl NullSession {
    fn unavailable(&self, op: &str) -> Result<(), DeviceError> {
        tracing::warn!("[fastboot] 后端不可用，忽略 {op}: serial={}", self.serial);
        Err(DeviceError::Fastboot(format!(
            "后端不可用（serial={}）",
            self.serial
        )))
    }
}
