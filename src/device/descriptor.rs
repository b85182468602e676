//! 设备描述符
//!
//! 描述符是目录解析后每块开发板的静态配置记录；运行期句柄（驱动
//! 会话、锁）由设备管理器另行持有。
//!
//! ## 功能
//! - 定义 Device 描述符结构
//! - 定义控制驱动绑定 ControlBinding
//! - 定义复位序列步骤 ResetStep
//! - 定义引导方式 BootMode

use boardcast_core::models::wire::DeviceKey;
use serde::{Deserialize, Serialize};

/// 复位序列步骤数上限
pub const MAX_RESET_SEQUENCE: usize = 16;

/// 控制驱动绑定
///
/// 目录键名到控制器后端的映射。当前仅 conmux 在本仓库内实现，
/// 其余绑定在打开设备时报告驱动不可用。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlBinding {
    /// cdb_assist 调试板
    CdbAssist,
    /// conmux 控制台多路复用器
    Conmux,
    /// alpaca 电源控制器
    Alpaca,
    /// FTDI GPIO 适配器
    FtdiGpio,
    /// qcomlt 调试板
    QcomltDebugBoard,
}

impl ControlBinding {
    /// 绑定对应的目录键名
    pub fn key_name(&self) -> &'static str {
        match self {
            Self::CdbAssist => "cdba",
            Self::Conmux => "conmux",
            Self::Alpaca => "alpaca",
            Self::FtdiGpio => "ftdi_gpio",
            Self::QcomltDebugBoard => "qcomlt_debug_board",
        }
    }
}

/// 引导方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootMode {
    /// 直接 fastboot boot
    FastbootBoot,
    /// 刷写 boot 分区后重启（fastboot boot 损坏的板子）
    FastbootFlashReboot,
}

impl Default for BootMode {
    fn default() -> Self {
        Self::FastbootBoot
    }
}

/// 复位序列步骤
///
/// `sleep_ms` 为该步骤之后的保持时长，0 表示无保持。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetStep {
    /// 操作的按键
    pub key: DeviceKey,
    /// 按下（true）或松开（false）
    pub asserted: bool,
    /// 保持时长（毫秒）
    pub sleep_ms: u64,
}

/// 设备描述符
///
/// 解析完成后不可变。`control_dev` / `console_dev` 的含义由所绑定
/// 的驱动自行解释。
#[derive(Debug, Clone)]
pub struct Device {
    /// 板名（目录内唯一查找键）
    pub board: String,
    /// 人类可读名称
    pub name: Option<String>,
    /// 描述
    pub description: Option<String>,
    /// fastboot 序列号
    pub serial: String,
    /// 控制驱动参数（conmux 服务名等）
    pub control_dev: Option<String>,
    /// 本地串口控制台设备路径
    pub console_dev: Option<String>,
    /// 电压（描述符元数据，当前驱动不使用）
    pub voltage: u64,
    /// 板上有电源按键
    pub has_power_key: bool,
    /// USB 常供电
    pub usb_always_on: bool,
    /// 引导前设置活动槽位 "a"
    pub set_active: bool,
    /// 需要周期性触碰 MMC
    pub tickle_mmc: bool,
    /// fastboot 按键保持时长（秒），0 表示没有 fastboot 按键阶段
    pub fastboot_key_timeout: u64,
    /// 引导方式
    pub boot_mode: BootMode,
    /// 复位序列（目录元数据，上电序列不消费）
    pub reset_sequence: Vec<ResetStep>,
    /// 目录里配置了自定义复位序列
    pub custom_reset_sequence: bool,
    /// 控制驱动绑定
    pub control: Option<ControlBinding>,
}
