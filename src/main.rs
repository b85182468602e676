//! boardcast 服务端入口
//!
//! 用法: `boardcast <设备目录.yaml>`。stdout 被帧协议占用，所有
//! 诊断输出走 stderr 与日志文件。

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use boardcast_lib::device::fastboot::NullFastboot;
use boardcast_lib::device::parser;
use boardcast_lib::server::{Server, StdioSink};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    boardcast_core::logger::init_logging(&boardcast_core::logger::LogConfig::default())
        .context("初始化日志失败")?;

    let catalog = std::env::args()
        .nth(1)
        .context("用法: boardcast <设备目录.yaml>")?;

    let registry = parser::parse_catalog_file(&catalog)
        .with_context(|| format!("加载设备目录失败: {catalog}"))?;

    tracing::info!(
        "[服务] boardcast {} 启动，目录: {catalog}",
        boardcast_core::version()
    );

    let shutdown = CancellationToken::new();
    let sink = StdioSink::spawn();
    let backend = Arc::new(NullFastboot);

    let mut server = Server::new(registry, sink, shutdown, backend);
    server.serve().await?;

    Ok(())
}
