//! 驱动模块
//!
//! 定义控制与控制台两组能力接口，以及本仓库实现的后端：conmux
//! 控制器和本地串口控制台。
//!
//! ## 模块结构
//! - `conmux` - conmux 控制台多路复用器后端
//! - `console` - 本地串口控制台
//!
//! ## 能力可选性
//! 每个操作都是可选的：调用方必须先用 `supports` / `supports_break`
//! 查询，再调用对应操作；未经查询调用不支持的操作会得到
//! `DeviceError::Unsupported`。能力缺失本身不是错误，门面层对缺失
//! 的操作静默跳过。

use async_trait::async_trait;
use boardcast_core::models::wire::DeviceKey;

use crate::device::error::DeviceError;

pub mod conmux;
pub mod console;

pub use conmux::ConmuxDriver;
pub use console::UartConsole;

/// 控制能力集的操作标识
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOp {
    /// 电源开关
    Power,
    /// USB 开关
    Usb,
    /// 按键注入
    Key,
    /// 状态打印
    PrintStatus,
    /// 会话关闭
    Close,
}

/// 控制驱动能力集
///
/// 打开（open）体现在各后端的构造函数上；其余操作均为可选。
#[async_trait]
pub trait ControlDriver: Send + Sync {
    /// 查询驱动是否实现某个操作
    fn supports(&self, op: ControlOp) -> bool;

    /// 电源开关
    async fn power(&self, on: bool) -> Result<(), DeviceError> {
        let _ = on;
        Err(DeviceError::Unsupported("power"))
    }

    /// USB 开关
    async fn usb(&self, on: bool) -> Result<(), DeviceError> {
        let _ = on;
        Err(DeviceError::Unsupported("usb"))
    }

    /// 按键注入
    async fn key(&self, key: DeviceKey, asserted: bool) -> Result<(), DeviceError> {
        let _ = (key, asserted);
        Err(DeviceError::Unsupported("key"))
    }

    /// 状态打印
    async fn print_status(&self) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported("print_status"))
    }

    /// 会话关闭
    async fn close(&self) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported("close"))
    }
}

/// 控制台驱动能力集
///
/// `write` 是任何接受写入的设备的必备操作；`send_break` 可选。
#[async_trait]
pub trait ConsoleDriver: Send + Sync {
    /// 写入控制台，返回写入的字节数
    async fn write(&self, data: &[u8]) -> Result<usize, DeviceError>;

    /// 查询驱动是否支持发送 break
    fn supports_break(&self) -> bool {
        false
    }

    /// 发送串口 break
    async fn send_break(&self) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported("send_break"))
    }
}
