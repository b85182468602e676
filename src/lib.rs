//! boardcast 服务端核心
//!
//! 嵌入式硬件测试机房的远程开发板控制代理。客户端通过 stdio 帧
//! 通道选择一块开发板，代理将电源 / USB / 串口控制台 / 固件引导
//! 请求翻译成所绑定后端控制器的动作。
//!
//! ## 模块结构
//! - `device` - 设备目录、驱动抽象、门面与上电状态机
//! - `server` - stdio 帧服务

pub mod device;
pub mod server;

pub use device::{DeviceError, DeviceManager, DeviceRegistry};
pub use server::{Server, StdioSink};
