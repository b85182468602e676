//! 本地串口控制台
//!
//! 打开目录里指定的字符设备，配置 raw 模式，异步读取控制台输出并
//! 作为 CONSOLE 帧发出。
//!
//! ## 功能
//! - 打开并配置串口设备（raw 模式，115200）
//! - 独立线程按 128 字节粒度读取并转发
//! - 写入与 break 发送
//! - 关闭时恢复原始终端配置

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use boardcast_core::models::wire::{FrameSink, MessageType};
use nix::errno::Errno;
use nix::sys::termios::{
    cfmakeraw, cfsetspeed, tcgetattr, tcsendbreak, tcsetattr, BaudRate, SetArg, Termios,
};

use crate::device::drivers::ConsoleDriver;
use crate::device::error::DeviceError;

/// 单次控制台读取的最大字节数
const CONSOLE_READ_CHUNK: usize = 128;

/// 本地串口控制台驱动
pub struct UartConsole {
    /// 设备路径
    path: String,
    /// 设备文件（写入端）
    file: File,
    /// 打开前的终端配置，关闭时恢复
    saved_tios: parking_lot::Mutex<Option<Termios>>,
    /// 关闭标志
    shutdown_flag: Arc<AtomicBool>,
}

impl UartConsole {
    /// 打开串口控制台
    ///
    /// # 参数
    /// - `path`: 字符设备路径
    /// - `sink`: 控制台字节的出站帧接口
    pub fn open(path: &str, sink: Arc<dyn FrameSink>) -> Result<Arc<Self>, DeviceError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(nix::libc::O_NOCTTY)
            .open(path)
            .map_err(|e| DeviceError::ConsoleOpen(format!("{path}: {e}")))?;
        let fd = file.as_raw_fd();

        let saved_tios = match tcgetattr(fd) {
            Ok(tios) => {
                let mut raw = tios.clone();
                cfmakeraw(&mut raw);
                cfsetspeed(&mut raw, BaudRate::B115200)
                    .map_err(|e| DeviceError::ConsoleOpen(format!("{path}: {e}")))?;
                tcsetattr(fd, SetArg::TCSANOW, &raw)
                    .map_err(|e| DeviceError::ConsoleOpen(format!("{path}: {e}")))?;
                Some(tios)
            }
            // 普通文件没有终端配置，测试里会用到
            Err(Errno::ENOTTY) => {
                tracing::debug!("[控制台] {path} 不是终端设备，跳过 termios 配置");
                None
            }
            Err(e) => return Err(DeviceError::ConsoleOpen(format!("{path}: {e}"))),
        };

        let reader = file
            .try_clone()
            .map_err(|e| DeviceError::ConsoleOpen(format!("{path}: {e}")))?;
        let shutdown_flag = Arc::new(AtomicBool::new(false));

        Self::spawn_reader(path.to_string(), reader, sink, shutdown_flag.clone());

        tracing::info!("[控制台] 已打开串口控制台: {path}");

        Ok(Arc::new(Self {
            path: path.to_string(),
            file,
            saved_tios: parking_lot::Mutex::new(saved_tios),
            shutdown_flag,
        }))
    }

    /// 读取线程
    ///
    /// 阻塞读取设备输出并转发为 CONSOLE 帧；EOF 或读取错误时结束。
    fn spawn_reader(
        path: String,
        mut reader: File,
        sink: Arc<dyn FrameSink>,
        shutdown_flag: Arc<AtomicBool>,
    ) {
        std::thread::spawn(move || {
            let mut buf = [0u8; CONSOLE_READ_CHUNK];
            loop {
                if shutdown_flag.load(Ordering::Relaxed) {
                    break;
                }
                match reader.read(&mut buf) {
                    Ok(0) => {
                        tracing::info!("[控制台] 设备返回 EOF: {path}");
                        break;
                    }
                    Ok(n) => sink.emit(MessageType::Console, &buf[..n]),
                    Err(e) => {
                        if shutdown_flag.load(Ordering::Relaxed) {
                            break;
                        }
                        tracing::error!("[控制台] 读取失败: {path}, error={e}");
                        break;
                    }
                }
            }
        });
    }
}

#[async_trait]
impl ConsoleDriver for UartConsole {
    async fn write(&self, data: &[u8]) -> Result<usize, DeviceError> {
        (&self.file).write_all(data)?;
        Ok(data.len())
    }

    fn supports_break(&self) -> bool {
        true
    }

    async fn send_break(&self) -> Result<(), DeviceError> {
        tcsendbreak(self.file.as_raw_fd(), 0)
            .map_err(|e| DeviceError::Io(std::io::Error::from(e)))?;
        tracing::debug!("[控制台] 已发送 break: {}", self.path);
        Ok(())
    }
}

impl Drop for UartConsole {
    fn drop(&mut self) {
        self.shutdown_flag.store(true, Ordering::SeqCst);
        if let Some(tios) = self.saved_tios.lock().as_ref() {
            let _ = tcsetattr(self.file.as_raw_fd(), SetArg::TCSANOW, tios);
        }
        tracing::debug!("[控制台] 已关闭串口控制台: {}", self.path);
    }
}
