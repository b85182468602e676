//! stdio 帧服务
//!
//! 代理与客户端之间的通道是标准输入/输出上的带类型标签的帧流。
//! 本模块实现帧编解码、出站帧写入任务，以及入站命令到设备门面的
//! 分发循环。
//!
//! ## 功能
//! - 入站帧读取（stdin EOF 视为客户端断开，触发停机）
//! - 出站帧经无界通道由单一写入任务依序写出（字节顺序不重排）
//! - 命令分发：目录查询、选板、控制台、电源/USB/按键、引导
//! - fastboot 设备出现/消失事件转发

use std::io::ErrorKind;
use std::sync::Arc;

use boardcast_core::models::wire::{
    decode_header, encode_header, DeviceKey, FrameSink, MessageType, FRAME_HEADER_LEN,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::device::error::DeviceError;
use crate::device::fastboot::{FastbootBackend, FastbootListener};
use crate::device::manager::DeviceManager;
use crate::device::registry::DeviceRegistry;

/// 入站帧负载上限（引导镜像可达数百 MB）
const MAX_FRAME_LEN: usize = 512 * 1024 * 1024;

/// stdout 帧写入端
///
/// `emit` 把帧投入无界通道，由单一写入任务按投递顺序写到 stdout；
/// 发送是尽力而为的，通道关闭时静默丢弃。
pub struct StdioSink {
    tx: mpsc::UnboundedSender<(MessageType, Vec<u8>)>,
}

impl StdioSink {
    /// 创建写入端并启动 stdout 写入任务
    pub fn spawn() -> Arc<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<(MessageType, Vec<u8>)>();

        tokio::spawn(async move {
            let mut stdout = tokio::io::stdout();
            while let Some((ty, payload)) = rx.recv().await {
                let hdr = encode_header(ty, payload.len() as u32);
                if stdout.write_all(&hdr).await.is_err() {
                    break;
                }
                if stdout.write_all(&payload).await.is_err() {
                    break;
                }
                if stdout.flush().await.is_err() {
                    break;
                }
            }
        });

        Arc::new(Self { tx })
    }
}

impl FrameSink for StdioSink {
    fn emit(&self, ty: MessageType, payload: &[u8]) {
        let _ = self.tx.send((ty, payload.to_vec()));
    }
}

/// fastboot 事件转发
///
/// 把 fastboot 设备出现/消失回调转成 FASTBOOT_PRESENT 帧。
pub struct FastbootEvents {
    sink: Arc<dyn FrameSink>,
}

impl FastbootEvents {
    /// 创建事件转发器
    pub fn new(sink: Arc<dyn FrameSink>) -> Self {
        Self { sink }
    }
}

impl FastbootListener for FastbootEvents {
    fn present(&self) {
        self.sink.emit(MessageType::FastbootPresent, &[1]);
    }

    fn gone(&self) {
        self.sink.emit(MessageType::FastbootPresent, &[0]);
    }
}

/// 读取一个入站帧
///
/// 帧头边界上的 EOF 返回 `Ok(None)`（客户端正常断开）；负载过长或
/// 负载中途 EOF 是错误。
pub(crate) async fn read_frame<R>(reader: &mut R) -> Result<Option<(u32, Vec<u8>)>, DeviceError>
where
    R: AsyncRead + Unpin,
{
    let mut hdr = [0u8; FRAME_HEADER_LEN];
    match reader.read_exact(&mut hdr).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let (ty, len) = decode_header(&hdr);
    if len as usize > MAX_FRAME_LEN {
        return Err(DeviceError::Frame(format!("负载过长: {len} 字节")));
    }

    let mut payload = vec![0u8; len as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| DeviceError::Frame(format!("读取负载失败: {e}")))?;

    Ok(Some((ty, payload)))
}

/// 去掉尾部 NUL 的 UTF-8 负载
fn decode_string(payload: &[u8]) -> Result<String, DeviceError> {
    let trimmed = match payload.iter().position(|&b| b == 0) {
        Some(pos) => &payload[..pos],
        None => payload,
    };
    String::from_utf8(trimmed.to_vec())
        .map_err(|_| DeviceError::Frame("负载不是合法 UTF-8".to_string()))
}

/// 操作结果只告警不终止
fn warn_on_err(op: &str, result: Result<(), DeviceError>) {
    if let Err(e) = result {
        tracing::warn!("[服务] {op} 失败: {e}");
    }
}

/// stdio 帧服务
pub struct Server {
    /// 设备管理器
    manager: DeviceManager,
    /// 出站帧写入端
    sink: Arc<StdioSink>,
    /// 全局停机令牌
    shutdown: CancellationToken,
    /// fastboot 会话工厂
    backend: Arc<dyn FastbootBackend>,
}

impl Server {
    /// 创建服务
    ///
    /// # 参数
    /// - `registry`: 解析完成的设备注册表
    /// - `sink`: stdout 帧写入端
    /// - `shutdown`: 全局停机令牌
    /// - `backend`: fastboot 会话工厂
    pub fn new(
        registry: DeviceRegistry,
        sink: Arc<StdioSink>,
        shutdown: CancellationToken,
        backend: Arc<dyn FastbootBackend>,
    ) -> Self {
        let manager = DeviceManager::new(
            registry,
            sink.clone() as Arc<dyn FrameSink>,
            shutdown.clone(),
        );
        Self {
            manager,
            sink,
            shutdown,
            backend,
        }
    }

    /// 服务主循环
    ///
    /// 从 stdin 读取入站帧并分发，直到客户端断开或停机令牌触发；
    /// 退出前关闭当前设备（断 USB、断电）。
    pub async fn serve(&mut self) -> Result<(), DeviceError> {
        let mut stdin = tokio::io::stdin();
        let shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("[服务] 收到停机信号");
                    break;
                }
                frame = read_frame(&mut stdin) => match frame {
                    Ok(Some((ty, payload))) => self.dispatch(ty, payload).await?,
                    Ok(None) => {
                        tracing::info!("[服务] 客户端已断开");
                        self.shutdown.cancel();
                        break;
                    }
                    Err(e) => {
                        tracing::error!("[服务] 读取入站帧失败: {e}");
                        self.shutdown.cancel();
                        return Err(e);
                    }
                },
            }
        }

        self.manager.close().await
    }

    /// 分发一个入站帧
    ///
    /// 选板失败是致命的；其余运行期操作失败只告警。未知类型跳过。
    async fn dispatch(&mut self, raw: u32, payload: Vec<u8>) -> Result<(), DeviceError> {
        let Some(ty) = MessageType::from_raw(raw) else {
            tracing::warn!("[服务] 未知消息类型: {raw}");
            return Ok(());
        };

        match ty {
            MessageType::ListDevices => self.manager.registry().list(self.sink.as_ref()),
            MessageType::BoardInfo => self.manager.registry().info(&payload, self.sink.as_ref()),
            MessageType::SelectBoard => {
                let board = decode_string(&payload)?;
                let listener = Arc::new(FastbootEvents::new(self.sink.clone()));
                self.manager
                    .open(&board, self.backend.as_ref(), listener)
                    .await?;
            }
            MessageType::Console => {
                warn_on_err("控制台写入", self.manager.write(&payload).await.map(|_| ()));
            }
            MessageType::SendBreak => warn_on_err("break 发送", self.manager.send_break().await),
            MessageType::PowerOn => warn_on_err("上电", self.manager.power(true).await),
            MessageType::PowerOff => warn_on_err("断电", self.manager.power(false).await),
            MessageType::UsbOn => warn_on_err("USB 接通", self.manager.usb(true).await),
            MessageType::UsbOff => warn_on_err("USB 断开", self.manager.usb(false).await),
            MessageType::KeyPress => match payload.as_slice() {
                [key, asserted] => match DeviceKey::from_raw(*key) {
                    Some(key) => {
                        warn_on_err("按键注入", self.manager.key(key, *asserted != 0).await);
                    }
                    None => tracing::warn!("[服务] 未知按键标识: {key}"),
                },
                _ => tracing::warn!("[服务] 按键帧负载无效"),
            },
            MessageType::StatusUpdate => {
                warn_on_err("状态打印", self.manager.print_status().await);
            }
            MessageType::FastbootDownload => {
                warn_on_err("镜像引导", self.manager.boot(&payload).await);
            }
            MessageType::FastbootPresent => {
                tracing::warn!("[服务] 出站消息类型出现在入站方向");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_read_frame_roundtrip() {
        let mut bytes = encode_header(MessageType::Console, 5).to_vec();
        bytes.extend_from_slice(b"hello");
        let mut cursor = Cursor::new(bytes);

        let (ty, payload) = read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(MessageType::from_raw(ty), Some(MessageType::Console));
        assert_eq!(payload, b"hello");

        // 随后干净的 EOF
        assert!(read_frame(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_frame_empty_payload() {
        let bytes = encode_header(MessageType::ListDevices, 0).to_vec();
        let mut cursor = Cursor::new(bytes);

        let (ty, payload) = read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(ty, MessageType::ListDevices as u32);
        assert!(payload.is_empty());
    }

    #[tokio::test]
    async fn test_read_frame_truncated_payload_is_error() {
        let mut bytes = encode_header(MessageType::Console, 10).to_vec();
        bytes.extend_from_slice(b"abc");
        let mut cursor = Cursor::new(bytes);

        assert!(read_frame(&mut cursor).await.is_err());
    }

    #[tokio::test]
    async fn test_read_frame_oversized_payload_is_error() {
        let bytes = encode_header(MessageType::FastbootDownload, u32::MAX).to_vec();
        let mut cursor = Cursor::new(bytes);

        assert!(read_frame(&mut cursor).await.is_err());
    }

    #[test]
    fn test_decode_string_trims_nul() {
        assert_eq!(decode_string(b"apq8016\0").unwrap(), "apq8016");
        assert_eq!(decode_string(b"apq8016").unwrap(), "apq8016");
        assert!(decode_string(&[0xff, 0xfe]).is_err());
    }
}
