//! 设备目录文档的原始模型
//!
//! 目录文档是一个 YAML 映射：顶层只有一个键（键名不限），其值为
//! 开发板映射组成的序列。本模块只描述文档形状，驱动绑定与校验由
//! 上层的目录解析器完成。
//!
//! ## 功能
//! - 定义 RawCatalog / RawBoard 反序列化模型
//! - 未知键为致命错误（`deny_unknown_fields`）
//! - 布尔约定：字符串 "true" 或字面量 true 为真，其余一律为假
//! - 无符号数值接受整数或十进制数字字符串

use std::collections::BTreeMap;

use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer};

/// 目录文档顶层：单键映射 -> 开发板序列
pub type RawCatalog = BTreeMap<String, Vec<RawBoard>>;

/// 单个开发板映射的原始形状
///
/// 所有字段均可缺省；缺哪些字段会导致描述符不可用由解析器判定。
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawBoard {
    /// 板名（目录内的查找键）
    pub board: Option<String>,
    /// 人类可读名称
    pub name: Option<String>,
    /// 描述
    pub description: Option<String>,
    /// fastboot 序列号
    pub serial: Option<String>,
    /// 电压（驱动自定单位）
    #[serde(default, deserialize_with = "de_opt_uint")]
    pub voltage: Option<u64>,
    /// fastboot 按键保持时长（秒），0 表示没有 fastboot 按键阶段
    #[serde(default, deserialize_with = "de_opt_uint")]
    pub fastboot_key_timeout: Option<u64>,
    /// USB 常供电
    #[serde(default, deserialize_with = "de_flag")]
    pub usb_always_on: bool,
    /// 引导前设置活动槽位 "a"
    #[serde(default, deserialize_with = "de_flag")]
    pub fastboot_set_active: bool,
    /// fastboot boot 命令损坏，改用刷写 boot 分区后重启
    #[serde(default, deserialize_with = "de_flag")]
    pub broken_fastboot_boot: bool,
    /// 板上有电源按键
    #[serde(default, deserialize_with = "de_flag")]
    pub has_power_key: bool,
    /// 需要周期性触碰 MMC
    #[serde(default, deserialize_with = "de_flag")]
    pub tickle_mmc: bool,
    /// fastboot 序列号（兼容键，同时设定默认引导方式）
    pub fastboot: Option<String>,
    /// 本地串口控制台设备路径
    pub console: Option<String>,
    /// cdb_assist 控制器
    pub cdba: Option<String>,
    /// conmux 控制器（注册表服务名）
    pub conmux: Option<String>,
    /// alpaca 控制器
    pub alpaca: Option<String>,
    /// FTDI GPIO 控制器
    pub ftdi_gpio: Option<String>,
    /// qcomlt 调试板控制器
    pub qcomlt_debug_board: Option<String>,
    /// 复位序列 DSL（分号分隔）
    pub reset_sequence: Option<String>,
}

/// 布尔约定反序列化
///
/// 字面量 true / 字符串 "true" 为真；其余任何值（包括其它字符串、
/// 数字）为假。
fn de_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum FlagRepr {
        Bool(bool),
        Str(String),
        Other(IgnoredAny),
    }

    Ok(match FlagRepr::deserialize(deserializer)? {
        FlagRepr::Bool(b) => b,
        FlagRepr::Str(s) => s == "true",
        FlagRepr::Other(_) => false,
    })
}

/// 无符号数值反序列化：整数或十进制数字字符串
fn de_opt_uint<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum UintRepr {
        Num(u64),
        Str(String),
    }

    match UintRepr::deserialize(deserializer)? {
        UintRepr::Num(n) => Ok(Some(n)),
        UintRepr::Str(s) => s
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("无效的无符号整数: \"{s}\""))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_board(yaml: &str) -> RawBoard {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_flag_conventions() {
        assert!(parse_board("usb_always_on: true").usb_always_on);
        assert!(parse_board("usb_always_on: \"true\"").usb_always_on);
        assert!(!parse_board("usb_always_on: \"yes\"").usb_always_on);
        assert!(!parse_board("usb_always_on: false").usb_always_on);
        assert!(!parse_board("usb_always_on: 1").usb_always_on);
    }

    #[test]
    fn test_uint_number_or_string() {
        assert_eq!(parse_board("voltage: 4000000").voltage, Some(4_000_000));
        assert_eq!(parse_board("voltage: \"3300\"").voltage, Some(3300));
        assert_eq!(
            parse_board("fastboot_key_timeout: 3").fastboot_key_timeout,
            Some(3)
        );
    }

    #[test]
    fn test_uint_invalid_is_error() {
        let res: Result<RawBoard, _> = serde_yaml::from_str("voltage: \"abc\"");
        assert!(res.is_err());
    }

    #[test]
    fn test_unknown_key_is_error() {
        let res: Result<RawBoard, _> = serde_yaml::from_str("bogus_key: 1");
        assert!(res.is_err());
    }

    #[test]
    fn test_catalog_shape() {
        let doc = r#"
devices:
  - board: foo
    serial: SN1
    conmux: boardlab.foo
  - board: bar
    serial: SN2
    console: /dev/ttyUSB0
"#;
        let catalog: RawCatalog = serde_yaml::from_str(doc).unwrap();
        assert_eq!(catalog.len(), 1);
        let boards = &catalog["devices"];
        assert_eq!(boards.len(), 2);
        assert_eq!(boards[0].board.as_deref(), Some("foo"));
        assert_eq!(boards[0].conmux.as_deref(), Some("boardlab.foo"));
        assert_eq!(boards[1].console.as_deref(), Some("/dev/ttyUSB0"));
    }
}
