//! 数据模型模块
//!
//! 纯数据类型定义，不包含业务逻辑。
//!
//! ## 模块结构
//! - `wire` - 帧消息类型与帧头编码
//! - `catalog` - 设备目录文档的原始模型

pub mod catalog;
pub mod wire;
