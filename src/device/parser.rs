//! 设备目录解析器
//!
//! 把目录文档变成注册表里驱动绑定完毕的描述符，并解析复位序列
//! 迷你 DSL。所有配置错误都是致命的，诊断信息指明出错的键或 token。
//!
//! ## 功能
//! - 读取并反序列化目录文档（顶层单键映射 -> 开发板序列）
//! - 目录键到控制/控制台驱动绑定的映射
//! - 描述符完整性校验（board、serial、联系方式）
//! - 复位序列 DSL 解析

use std::path::Path;

use boardcast_core::models::catalog::{RawBoard, RawCatalog};
use boardcast_core::models::wire::DeviceKey;

use crate::device::descriptor::{
    BootMode, ControlBinding, Device, ResetStep, MAX_RESET_SEQUENCE,
};
use crate::device::error::DeviceError;
use crate::device::registry::DeviceRegistry;

/// 从文件加载目录
pub fn parse_catalog_file<P: AsRef<Path>>(path: P) -> Result<DeviceRegistry, DeviceError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| DeviceError::Config(format!("{}: {e}", path.display())))?;
    parse_catalog_str(&text)
}

/// 从文本解析目录
///
/// 顶层必须是恰好一个键的映射（键名不限），其值为开发板映射序列。
pub fn parse_catalog_str(text: &str) -> Result<DeviceRegistry, DeviceError> {
    let doc: RawCatalog =
        serde_yaml::from_str(text).map_err(|e| DeviceError::Config(e.to_string()))?;

    if doc.len() != 1 {
        return Err(DeviceError::Config(format!(
            "顶层应恰好包含一个键，实际 {} 个",
            doc.len()
        )));
    }

    let mut registry = DeviceRegistry::new();
    let Some((_, boards)) = doc.into_iter().next() else {
        return Err(DeviceError::Config("顶层映射为空".to_string()));
    };
    for raw in boards {
        registry.add(build_device(raw)?);
    }

    tracing::info!("[解析] 目录加载完成，共 {} 块开发板", registry.len());
    Ok(registry)
}

/// 由原始映射构造描述符
///
/// 绑定驱动、套用布尔与引导约定，并做完整性校验。
fn build_device(raw: RawBoard) -> Result<Device, DeviceError> {
    let board_label = raw.board.clone().unwrap_or_else(|| "<未命名>".to_string());

    // 控制驱动绑定：一块板至多一个
    let mut control = None;
    let mut control_dev = None;
    let bindings = [
        (ControlBinding::CdbAssist, raw.cdba),
        (ControlBinding::Conmux, raw.conmux),
        (ControlBinding::Alpaca, raw.alpaca),
        (ControlBinding::FtdiGpio, raw.ftdi_gpio),
        (ControlBinding::QcomltDebugBoard, raw.qcomlt_debug_board),
    ];
    for (binding, value) in bindings {
        if let Some(value) = value {
            if control.is_some() {
                return Err(DeviceError::Config(format!(
                    "开发板 \"{board_label}\" 绑定了多个控制驱动"
                )));
            }
            control = Some(binding);
            control_dev = Some(value);
        }
    }

    // serial 键优先于 fastboot 键；fastboot 键同时确定默认引导方式
    let serial = raw.serial.or_else(|| raw.fastboot.clone());

    let boot_mode = if raw.broken_fastboot_boot {
        BootMode::FastbootFlashReboot
    } else {
        BootMode::FastbootBoot
    };

    let (reset_sequence, custom_reset_sequence) = match &raw.reset_sequence {
        Some(seq) => (parse_reset_sequence(seq)?, true),
        None => (Vec::new(), false),
    };

    let board = match raw.board.filter(|s| !s.is_empty()) {
        Some(b) => b,
        None => {
            return Err(DeviceError::Config(
                "开发板定义不完整（缺少 board）".to_string(),
            ))
        }
    };
    let serial = match serial.filter(|s| !s.is_empty()) {
        Some(s) => s,
        None => {
            return Err(DeviceError::Config(format!(
                "开发板 \"{board}\" 定义不完整（缺少 serial / fastboot）"
            )))
        }
    };
    if control.is_none() && raw.console.is_none() {
        return Err(DeviceError::Config(format!(
            "开发板 \"{board}\" 定义不完整（没有控制驱动也没有 console）"
        )));
    }

    Ok(Device {
        board,
        name: raw.name,
        description: raw.description,
        serial,
        control_dev,
        console_dev: raw.console,
        voltage: raw.voltage.unwrap_or(0),
        has_power_key: raw.has_power_key,
        usb_always_on: raw.usb_always_on,
        set_active: raw.fastboot_set_active,
        tickle_mmc: raw.tickle_mmc,
        fastboot_key_timeout: raw.fastboot_key_timeout.unwrap_or(0),
        boot_mode,
        reset_sequence,
        custom_reset_sequence,
        control,
    })
}

/// 解析复位序列 DSL
///
/// 分号分隔的 token 序列：`b`/`B` 松开/按下 POWER，`r`/`R` 松开/
/// 按下 FASTBOOT，十进制数字为附加在前一步骤上的保持毫秒数。只有
/// 以分号终止的完整 token 被消费；末尾的空 token 结束序列。
pub(crate) fn parse_reset_sequence(seq: &str) -> Result<Vec<ResetStep>, DeviceError> {
    let mut steps: Vec<ResetStep> = Vec::new();
    let mut last_has_sleep = false;

    // 最后一个分号之后的残缺 token 不消费
    let Some((body, _)) = seq.rsplit_once(';') else {
        return Ok(steps);
    };

    for token in body.split(';') {
        let (key, asserted) = match token {
            "b" => (DeviceKey::Power, false),
            "B" => (DeviceKey::Power, true),
            "r" => (DeviceKey::Fastboot, false),
            "R" => (DeviceKey::Fastboot, true),
            _ => {
                let sleep_ms: u64 = token.parse().map_err(|_| {
                    DeviceError::ResetSequence(format!("无效的 token: \"{token}\"（序列 \"{seq}\"）"))
                })?;
                let Some(last) = steps.last_mut() else {
                    return Err(DeviceError::ResetSequence(format!(
                        "时长 \"{token}\" 没有可附加的按键步骤（序列 \"{seq}\"）"
                    )));
                };
                if last_has_sleep {
                    return Err(DeviceError::ResetSequence(format!(
                        "连续的时长 token \"{token}\"（序列 \"{seq}\"）"
                    )));
                }
                last.sleep_ms = sleep_ms;
                last_has_sleep = true;
                continue;
            }
        };

        if steps.len() == MAX_RESET_SEQUENCE {
            return Err(DeviceError::ResetSequence(format!(
                "步骤超过上限 {MAX_RESET_SEQUENCE}（序列 \"{seq}\"）"
            )));
        }
        steps.push(ResetStep {
            key,
            asserted,
            sleep_ms: 0,
        });
        last_has_sleep = false;
    }

    Ok(steps)
}
