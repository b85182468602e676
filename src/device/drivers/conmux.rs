//! conmux 控制器后端
//!
//! 通过本机注册表服务解析 conmux 实例地址，随后建立双向控制台会话，
//! 并用转义序列完成电源控制。
//!
//! ## 功能
//! - 注册表 LOOKUP 请求与 key=value 响应解析（百分号解码）
//! - CONNECT 握手建立控制台会话
//! - 读取任务按 128 字节粒度转发 CONSOLE 帧
//! - 对端 EOF 触发全局停机
//! - `~$hardreset` / `~$off` 电源转义序列
//!
//! ## 并发
//! 会话套接字归本驱动独占；打开路径上的短请求/响应交换发生在开始
//! 分发事件之前，之后的所有读取都由读取任务驱动。

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use boardcast_core::models::wire::{FrameSink, MessageType};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::device::drivers::{ConsoleDriver, ControlDriver, ControlOp};
use crate::device::error::DeviceError;

/// 注册表服务端口（固定在本机）
pub const CONMUX_REGISTRY_PORT: u16 = 63000;

/// 单次控制台读取的最大字节数
const CONSOLE_READ_CHUNK: usize = 128;

/// 请求/响应行缓冲大小
const LINE_BUF_LEN: usize = 256;

/// 上电转义序列
const POWER_ON_SEQ: &[u8] = b"~$hardreset\n\0";

/// 断电转义序列
const POWER_OFF_SEQ: &[u8] = b"~$off\n\0";

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// 握手进行中
    Opening,
    /// 会话已建立
    Connected,
    /// 会话已关闭（对端 EOF 或读取失败）
    Closed,
}

/// 注册表查询结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ConmuxLookup {
    pub host: String,
    pub port: u16,
}

/// 一行 key=value 响应
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ConmuxResponse {
    pub title: Option<String>,
    pub status: Option<String>,
    pub result: Option<String>,
    pub state: Option<String>,
}

/// 十六进制半字节（大小写不限）
fn nibble(ch: u8) -> Option<u8> {
    (ch as char).to_digit(16).map(|d| d as u8)
}

/// 解码一个百分号编码的值
///
/// `%HH`（十六进制大小写不限）解码为对应字节，其余字节原样保留。
/// 截断的转义序列是错误。
pub(crate) fn decode_value(raw: &[u8]) -> Result<Vec<u8>, DeviceError> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'%' {
            if i + 2 >= raw.len() {
                return Err(DeviceError::Protocol("截断的百分号转义".to_string()));
            }
            let (Some(hi), Some(lo)) = (nibble(raw[i + 1]), nibble(raw[i + 2])) else {
                return Err(DeviceError::Protocol("截断的百分号转义".to_string()));
            };
            out.push((hi << 4) | lo);
            i += 3;
        } else {
            out.push(raw[i]);
            i += 1;
        }
    }
    Ok(out)
}

/// 解析一行空白分隔的 key=value 响应
///
/// 键由字母组成；值为可打印非空白字节序列，按百分号规则解码。
/// 缺少 `=` 或转义截断使本次解析失败；未知键记录警告后跳过。
pub(crate) fn parse_response(line: &[u8]) -> Result<ConmuxResponse, DeviceError> {
    let mut resp = ConmuxResponse::default();
    let mut i = 0;

    while i < line.len() {
        while i < line.len() && line[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= line.len() {
            break;
        }

        let key_start = i;
        while i < line.len() && line[i].is_ascii_alphabetic() {
            i += 1;
        }
        let key = &line[key_start..i];

        if i >= line.len() || line[i] != b'=' {
            return Err(DeviceError::Protocol("缺少 '='".to_string()));
        }
        i += 1;

        let value_start = i;
        while i < line.len() && line[i].is_ascii_graphic() {
            i += 1;
        }
        let value = decode_value(&line[value_start..i])?;
        let value = String::from_utf8_lossy(&value).into_owned();

        match key {
            b"result" => resp.result = Some(value),
            b"status" => resp.status = Some(value),
            b"title" => resp.title = Some(value),
            b"state" => resp.state = Some(value),
            _ => tracing::warn!(
                "[Conmux] 响应中出现未知键 \"{}\"",
                String::from_utf8_lossy(key)
            ),
        }
    }

    Ok(resp)
}

/// 向注册表查询服务地址
///
/// 成功要求 `status == "OK"` 且 `result` 形如 `<host>:<port>`。
pub(crate) async fn registry_lookup_at(
    registry: SocketAddr,
    service: &str,
) -> Result<ConmuxLookup, DeviceError> {
    let mut stream = TcpStream::connect(registry)
        .await
        .map_err(|e| DeviceError::Lookup(format!("连接注册表失败: {e}")))?;

    let mut req = format!("LOOKUP service={service}\n").into_bytes();
    req.push(0);
    if req.len() > LINE_BUF_LEN {
        return Err(DeviceError::Lookup(format!(
            "服务名过长: \"{service}\""
        )));
    }
    stream
        .write_all(&req)
        .await
        .map_err(|e| DeviceError::Lookup(format!("发送查询请求失败: {e}")))?;

    let mut buf = [0u8; LINE_BUF_LEN];
    let n = stream
        .read(&mut buf)
        .await
        .map_err(|e| DeviceError::Lookup(format!("读取查询响应失败: {e}")))?;
    let line = match buf[..n].iter().position(|&b| b == b'\n') {
        Some(pos) => &buf[..pos],
        None => &buf[..n],
    };

    let resp = parse_response(line)?;
    let status = resp
        .status
        .ok_or_else(|| DeviceError::Protocol("响应缺少 status".to_string()))?;
    let result = resp
        .result
        .ok_or_else(|| DeviceError::Protocol("响应缺少 result".to_string()))?;

    let (host, port) = result
        .split_once(':')
        .ok_or_else(|| DeviceError::Protocol("result 格式无效".to_string()))?;
    let port: u16 = port
        .parse()
        .map_err(|_| DeviceError::Protocol(format!("端口无效: \"{port}\"")))?;

    if status != "OK" {
        return Err(DeviceError::Lookup(format!(
            "服务 \"{service}\" 查询失败: status={status}"
        )));
    }

    Ok(ConmuxLookup {
        host: host.to_string(),
        port,
    })
}

/// conmux 会话驱动
///
/// 同时实现控制能力集（power）与控制台能力集（write），两者共享
/// 同一条会话套接字。
pub struct ConmuxDriver {
    /// 注册表里的服务名
    service: String,
    /// 会话状态
    state: parking_lot::Mutex<SessionState>,
    /// 会话写半部
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
}

impl ConmuxDriver {
    /// 打开 conmux 会话（默认本机注册表）
    ///
    /// # 参数
    /// - `service`: 注册表里的服务名
    /// - `sink`: 控制台字节的出站帧接口
    /// - `shutdown`: 全局停机令牌，对端 EOF 时触发
    pub async fn open(
        service: &str,
        sink: Arc<dyn FrameSink>,
        shutdown: CancellationToken,
    ) -> Result<Arc<Self>, DeviceError> {
        let registry = SocketAddr::from(([127, 0, 0, 1], CONMUX_REGISTRY_PORT));
        Self::open_with_registry(registry, service, sink, shutdown).await
    }

    /// 打开 conmux 会话，注册表地址由调用方给定
    ///
    /// 测试和非默认部署使用。
    pub async fn open_with_registry(
        registry: SocketAddr,
        service: &str,
        sink: Arc<dyn FrameSink>,
        shutdown: CancellationToken,
    ) -> Result<Arc<Self>, DeviceError> {
        let lookup = registry_lookup_at(registry, service).await?;
        tracing::info!("[Conmux] 设备位于 {}:{}", lookup.host, lookup.port);

        // 主机名经平台名字服务解析
        let mut stream = TcpStream::connect((lookup.host.as_str(), lookup.port))
            .await
            .map_err(|e| {
                DeviceError::ConnectFailed(format!("{}:{}: {e}", lookup.host, lookup.port))
            })?;

        let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
        let mut req = format!("CONNECT id=cdba:{user} to=console\n").into_bytes();
        req.push(0);
        stream
            .write_all(&req)
            .await
            .map_err(|e| DeviceError::ConnectFailed(format!("发送连接请求失败: {e}")))?;

        let mut buf = [0u8; LINE_BUF_LEN];
        let n = stream
            .read(&mut buf)
            .await
            .map_err(|e| DeviceError::ConnectFailed(format!("读取连接响应失败: {e}")))?;
        let line = match buf[..n].iter().position(|&b| b == b'\n') {
            Some(pos) => &buf[..pos],
            None => &buf[..n],
        };

        let resp = parse_response(line)?;
        if resp.status.as_deref() != Some("OK") {
            return Err(DeviceError::ConnectFailed(format!(
                "服务 \"{service}\" 握手被拒绝"
            )));
        }

        let (read_half, write_half) = stream.into_split();
        let driver = Arc::new(Self {
            service: service.to_string(),
            state: parking_lot::Mutex::new(SessionState::Opening),
            writer: tokio::sync::Mutex::new(write_half),
        });

        *driver.state.lock() = SessionState::Connected;
        tokio::spawn(Self::run_reader(driver.clone(), read_half, sink, shutdown));

        tracing::info!("[Conmux] 会话已建立: service={}", driver.service);
        Ok(driver)
    }

    /// 当前会话状态
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// 读取任务
    ///
    /// 每次最多读 128 字节并作为 CONSOLE 帧发出；零字节读取（EOF）
    /// 是不可恢复条件，触发全局停机。
    async fn run_reader(
        self: Arc<Self>,
        mut read_half: OwnedReadHalf,
        sink: Arc<dyn FrameSink>,
        shutdown: CancellationToken,
    ) {
        let mut buf = [0u8; CONSOLE_READ_CHUNK];
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                r = read_half.read(&mut buf) => match r {
                    Ok(0) => {
                        tracing::error!("[Conmux] 收到对端 EOF: service={}", self.service);
                        *self.state.lock() = SessionState::Closed;
                        shutdown.cancel();
                        break;
                    }
                    Ok(n) => sink.emit(MessageType::Console, &buf[..n]),
                    Err(e) => {
                        tracing::error!("[Conmux] 读取失败: service={}, error={e}", self.service);
                        *self.state.lock() = SessionState::Closed;
                        shutdown.cancel();
                        break;
                    }
                },
            }
        }
    }

    /// 写入会话套接字
    async fn send(&self, bytes: &[u8]) -> Result<usize, DeviceError> {
        if self.state() == SessionState::Closed {
            return Err(DeviceError::ConnectFailed("会话已关闭".to_string()));
        }
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        Ok(bytes.len())
    }
}

#[async_trait]
impl ControlDriver for ConmuxDriver {
    fn supports(&self, op: ControlOp) -> bool {
        matches!(op, ControlOp::Power)
    }

    async fn power(&self, on: bool) -> Result<(), DeviceError> {
        if on {
            tracing::info!("[Conmux] 上电: service={}", self.service);
            self.send(POWER_ON_SEQ).await?;
        } else {
            tracing::info!("[Conmux] 断电: service={}", self.service);
            self.send(POWER_OFF_SEQ).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ConsoleDriver for ConmuxDriver {
    async fn write(&self, data: &[u8]) -> Result<usize, DeviceError> {
        self.send(data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ========================================================================
    // 百分号解码测试
    // ========================================================================

    #[test]
    fn test_decode_value_plain() {
        assert_eq!(decode_value(b"hello").unwrap(), b"hello");
    }

    #[test]
    fn test_decode_value_percent() {
        assert_eq!(decode_value(b"a%2Eb").unwrap(), b"a.b");
        assert_eq!(decode_value(b"a%2eb").unwrap(), b"a.b");
        assert_eq!(decode_value(b"%00").unwrap(), vec![0u8]);
        assert_eq!(decode_value(b"%ff").unwrap(), vec![0xffu8]);
        assert_eq!(decode_value(b"%Ff").unwrap(), vec![0xffu8]);
    }

    #[test]
    fn test_decode_value_truncated() {
        assert!(decode_value(b"%").is_err());
        assert!(decode_value(b"%0").is_err());
        assert!(decode_value(b"abc%").is_err());
    }

    #[test]
    fn test_decode_value_bad_hex() {
        assert!(decode_value(b"%zz").is_err());
        assert!(decode_value(b"%0g").is_err());
    }

    // ========================================================================
    // 响应解析测试
    // ========================================================================

    #[test]
    fn test_parse_response_basic() {
        let resp = parse_response(b"status=OK result=host.example%2Ecom:5000 title=x").unwrap();
        assert_eq!(resp.status.as_deref(), Some("OK"));
        assert_eq!(resp.result.as_deref(), Some("host.example.com:5000"));
        assert_eq!(resp.title.as_deref(), Some("x"));
        assert_eq!(resp.state, None);
    }

    #[test]
    fn test_parse_response_unknown_key_skipped() {
        let resp = parse_response(b"status=OK bogus=1 state=open").unwrap();
        assert_eq!(resp.status.as_deref(), Some("OK"));
        assert_eq!(resp.state.as_deref(), Some("open"));
    }

    #[test]
    fn test_parse_response_missing_equals() {
        assert!(parse_response(b"status OK").is_err());
    }

    #[test]
    fn test_parse_response_truncated_escape() {
        assert!(parse_response(b"result=%0").is_err());
    }

    #[test]
    fn test_parse_response_leading_whitespace() {
        let resp = parse_response(b"   status=OK").unwrap();
        assert_eq!(resp.status.as_deref(), Some("OK"));
    }

    #[test]
    fn test_parse_response_empty() {
        let resp = parse_response(b"").unwrap();
        assert_eq!(resp, ConmuxResponse::default());
    }

    // ========================================================================
    // 注册表查询测试
    // ========================================================================

    #[tokio::test]
    async fn test_registry_lookup_ok() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            let n = s.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"LOOKUP service=foo\n\0");
            s.write_all(b"status=OK result=host.example%2Ecom:5000 title=x\n")
                .await
                .unwrap();
        });

        let lookup = registry_lookup_at(addr, "foo").await.unwrap();
        assert_eq!(lookup.host, "host.example.com");
        assert_eq!(lookup.port, 5000);
    }

    #[tokio::test]
    async fn test_registry_lookup_error_status() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            let _ = s.read(&mut buf).await.unwrap();
            s.write_all(b"status=ERROR result=none\n").await.unwrap();
        });

        let err = registry_lookup_at(addr, "foo").await.unwrap_err();
        // "none" 没有 host:port 形状，在 status 检查前就失败
        assert!(matches!(err, DeviceError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_registry_lookup_bad_port() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            let _ = s.read(&mut buf).await.unwrap();
            s.write_all(b"status=OK result=host:notaport\n").await.unwrap();
        });

        assert!(registry_lookup_at(addr, "foo").await.is_err());
    }
}
