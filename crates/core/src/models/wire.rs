//! 帧消息类型定义
//!
//! 定义 stdio 通道上带类型标签的消息帧：8 字节帧头（u32 小端类型标签 +
//! u32 小端负载长度）后跟原始负载。
//!
//! ## 功能
//! - 定义 MessageType 消息类型标签
//! - 帧头编码与解码
//! - 定义 FrameSink 出站帧接口
//! - 定义 DeviceKey 按键标识

use serde::{Deserialize, Serialize};

/// 帧头长度（字节）
pub const FRAME_HEADER_LEN: usize = 8;

/// 消息类型标签
///
/// `Console` 在两个方向上复用：入站为写入控制台的数据，出站为从
/// 控制台读到的数据。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum MessageType {
    /// 选择开发板（入站，负载为板名）
    SelectBoard = 1,
    /// 控制台数据（双向）
    Console = 2,
    /// 上电（入站）
    PowerOn = 3,
    /// 断电（入站）
    PowerOff = 4,
    /// USB 接通（入站）
    UsbOn = 5,
    /// USB 断开（入站）
    UsbOff = 6,
    /// 按键操作（入站，负载为 [key, asserted] 两字节）
    KeyPress = 7,
    /// 发送串口 break（入站）
    SendBreak = 8,
    /// 请求控制器状态（入站）
    StatusUpdate = 9,
    /// 下载并引导镜像（入站，负载为镜像字节）
    FastbootDownload = 10,
    /// 列出设备（入站请求 / 出站逐条响应，空负载帧结束）
    ListDevices = 11,
    /// 开发板信息（入站为板名前缀 / 出站为描述）
    BoardInfo = 12,
    /// fastboot 设备出现或消失（出站，负载为 1 或 0 单字节）
    FastbootPresent = 13,
}

impl MessageType {
    /// 从原始标签值转换
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            1 => Self::SelectBoard,
            2 => Self::Console,
            3 => Self::PowerOn,
            4 => Self::PowerOff,
            5 => Self::UsbOn,
            6 => Self::UsbOff,
            7 => Self::KeyPress,
            8 => Self::SendBreak,
            9 => Self::StatusUpdate,
            10 => Self::FastbootDownload,
            11 => Self::ListDevices,
            12 => Self::BoardInfo,
            13 => Self::FastbootPresent,
            _ => return None,
        })
    }
}

/// 编码帧头
pub fn encode_header(ty: MessageType, len: u32) -> [u8; FRAME_HEADER_LEN] {
    let mut hdr = [0u8; FRAME_HEADER_LEN];
    hdr[..4].copy_from_slice(&(ty as u32).to_le_bytes());
    hdr[4..].copy_from_slice(&len.to_le_bytes());
    hdr
}

/// 解码帧头，返回原始类型标签与负载长度
pub fn decode_header(hdr: &[u8; FRAME_HEADER_LEN]) -> (u32, u32) {
    let ty = u32::from_le_bytes([hdr[0], hdr[1], hdr[2], hdr[3]]);
    let len = u32::from_le_bytes([hdr[4], hdr[5], hdr[6], hdr[7]]);
    (ty, len)
}

/// 出站帧接口
///
/// 设备层通过该接口发出 `CONSOLE` / `LIST_DEVICES` / `BOARD_INFO` 等
/// 出站帧；具体实现由 stdio 服务层提供，测试中用记录桩替代。
/// 发送是尽力而为的，出站通道关闭时静默丢弃。
pub trait FrameSink: Send + Sync {
    /// 发出一帧
    fn emit(&self, ty: MessageType, payload: &[u8]);
}

/// 按键标识
///
/// 只定义 FASTBOOT 与 POWER 两个按键；线上负载中 FASTBOOT 为 0，
/// POWER 为 1。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum DeviceKey {
    /// FASTBOOT 按键
    Fastboot = 0,
    /// POWER 按键
    Power = 1,
}

impl DeviceKey {
    /// 从线上字节转换
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Fastboot),
            1 => Some(Self::Power),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fastboot => write!(f, "fastboot"),
            Self::Power => write!(f, "power"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let hdr = encode_header(MessageType::Console, 128);
        let (ty, len) = decode_header(&hdr);
        assert_eq!(ty, 2);
        assert_eq!(len, 128);
        assert_eq!(MessageType::from_raw(ty), Some(MessageType::Console));
    }

    #[test]
    fn test_header_little_endian() {
        let hdr = encode_header(MessageType::ListDevices, 0x0102_0304);
        assert_eq!(&hdr[..4], &[11, 0, 0, 0]);
        assert_eq!(&hdr[4..], &[0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_message_type_from_raw_unknown() {
        assert_eq!(MessageType::from_raw(0), None);
        assert_eq!(MessageType::from_raw(14), None);
        assert_eq!(MessageType::from_raw(u32::MAX), None);
    }

    #[test]
    fn test_device_key_from_raw() {
        assert_eq!(DeviceKey::from_raw(0), Some(DeviceKey::Fastboot));
        assert_eq!(DeviceKey::from_raw(1), Some(DeviceKey::Power));
        assert_eq!(DeviceKey::from_raw(2), None);
    }

    #[test]
    fn test_device_key_display() {
        assert_eq!(DeviceKey::Power.to_string(), "power");
        assert_eq!(DeviceKey::Fastboot.to_string(), "fastboot");
    }
}
