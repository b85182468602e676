//! 设备注册表
//!
//! 进程内的开发板目录：按插入顺序保存描述符，按板名精确查找，并
//! 通过文件建议锁保证同一块板在任意时刻至多一个持有者。
//!
//! ## 功能
//! - 按插入顺序维护描述符目录
//! - 按板名精确查找
//! - 每板文件建议锁（先试非阻塞，冲突则等待）
//! - 目录查询响应（LIST_DEVICES / BOARD_INFO 帧）

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;

use boardcast_core::models::wire::{FrameSink, MessageType};
use fs2::FileExt;

use crate::device::descriptor::Device;
use crate::device::error::DeviceError;

/// 锁文件路径前缀（与既有部署互通，保持 cdba 前缀）
const LOCK_DIR: &str = "/tmp";

/// 开发板锁
///
/// 文件建议锁的守卫。锁随进程退出释放，没有显式解锁操作；守卫被
/// 保存在打开的设备里直到进程结束。
pub struct BoardLock {
    _file: File,
}

/// 板名对应的锁文件路径
pub(crate) fn lock_path(board: &str) -> String {
    format!("{LOCK_DIR}/cdba-{board}.lock")
}

/// 获取开发板锁
///
/// 先尝试非阻塞加锁；板被占用时记录一条等待日志，然后阻塞到取得
/// 排他锁为止。
pub fn lock_board(board: &str) -> Result<BoardLock, DeviceError> {
    let path = lock_path(board);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .mode(0o666)
        .open(&path)
        .map_err(|e| DeviceError::LockFailed(format!("{path}: {e}")))?;

    match file.try_lock_exclusive() {
        Ok(()) => {}
        Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
            tracing::warn!("[设备] 开发板被占用，等待中...");
            file.lock_exclusive()
                .map_err(|e| DeviceError::LockFailed(format!("{path}: {e}")))?;
        }
        Err(e) => return Err(DeviceError::LockFailed(format!("{path}: {e}"))),
    }

    Ok(BoardLock { _file: file })
}

/// 设备注册表
///
/// 插入顺序即列表顺序。目录解析时不做重复键检查，查找返回第一个
/// 匹配项。
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    /// 描述符目录
    devices: Vec<Device>,
}

impl DeviceRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加描述符
    ///
    /// 重复的板名不被拒绝，只记录警告；查找时第一个匹配生效。
    pub fn add(&mut self, device: Device) {
        if self.devices.iter().any(|d| d.board == device.board) {
            tracing::warn!("[设备] 板名重复: {}，查找时前者生效", device.board);
        }
        self.devices.push(device);
    }

    /// 按板名精确查找
    pub fn find(&self, board: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.board == board)
    }

    /// 描述符数量
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// 注册表是否为空
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// 按插入顺序迭代
    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    /// 列出设备
    ///
    /// 每个描述符发一条 LIST_DEVICES 帧：有名称时为板名左对齐补足
    /// 20 列、空格、名称；否则只有板名。最后以空负载帧结束列表。
    pub fn list(&self, sink: &dyn FrameSink) {
        for device in &self.devices {
            let line = match &device.name {
                Some(name) => format!("{:<20} {}", device.board, name),
                None => device.board.clone(),
            };
            sink.emit(MessageType::ListDevices, line.as_bytes());
        }
        sink.emit(MessageType::ListDevices, &[]);
    }

    /// 开发板信息
    ///
    /// 发一条 BOARD_INFO 帧：负载为第一个板名以给定前缀开头且描述
    /// 非空的描述符的描述；没有匹配时负载为空。
    pub fn info(&self, prefix: &[u8], sink: &dyn FrameSink) {
        let description = self
            .devices
            .iter()
            .find(|d| {
                d.board.as_bytes().starts_with(prefix)
                    && d.description.as_deref().is_some_and(|s| !s.is_empty())
            })
            .and_then(|d| d.description.as_deref())
            .unwrap_or("");
        sink.emit(MessageType::BoardInfo, description.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_path_format() {
        assert_eq!(lock_path("apq8016"), "/tmp/cdba-apq8016.lock");
    }

    #[test]
    fn test_lock_exclusion_same_board() {
        let board = "boardcast-test-lock-a";
        let guard = lock_board(board).unwrap();

        // 另开一个文件句柄，非阻塞加锁必须失败
        let second = File::open(lock_path(board)).unwrap();
        assert!(second.try_lock_exclusive().is_err());

        drop(guard);
        assert!(second.try_lock_exclusive().is_ok());
        let _ = std::fs::remove_file(lock_path(board));
    }

    #[test]
    fn test_lock_independent_boards() {
        let a = lock_board("boardcast-test-lock-b").unwrap();
        let b = lock_board("boardcast-test-lock-c").unwrap();
        drop(a);
        drop(b);
        let _ = std::fs::remove_file(lock_path("boardcast-test-lock-b"));
        let _ = std::fs::remove_file(lock_path("boardcast-test-lock-c"));
    }
}
