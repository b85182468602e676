//! 设备核心模块
//!
//! 开发板目录、驱动抽象与设备门面，通过 stdio 帧服务暴露给客户端。
//!
//! ## 模块结构
//! - `error` - 错误类型定义
//! - `descriptor` - 设备描述符
//! - `registry` - 设备注册表与开发板锁
//! - `manager` - 设备门面与上电状态机
//! - `parser` - 目录解析器与复位序列 DSL
//! - `drivers` - 控制/控制台能力集与后端实现
//! - `fastboot` - 固件下载协作方接口
//!
//! ## 使用示例
//! ```ignore
//! use boardcast_lib::device::{parser, DeviceManager};
//!
//! let registry = parser::parse_catalog_file("boards.yaml")?;
//! let mut manager = DeviceManager::new(registry, sink, shutdown);
//! manager.open("apq8016", &backend, listener).await?;
//! manager.power(true).await?;
//! ```

pub mod descriptor;
pub mod drivers;
pub mod error;
pub mod fastboot;
pub mod manager;
pub mod parser;
pub mod registry;


// 重新导出常用类型
pub use descriptor::{BootMode, ControlBinding, Device, ResetStep, MAX_RESET_SEQUENCE};
pub use drivers::{ConmuxDriver, ConsoleDriver, ControlDriver, ControlOp, UartConsole};
pub use error::DeviceError;
pub use fastboot::{FastbootBackend, FastbootListener, FastbootSession, NullFastboot};
pub use manager::{DeviceManager, OpenDevice};
pub use registry::{lock_board, BoardLock, DeviceRegistry};
