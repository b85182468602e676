//! 设备管理器
//!
//! 统一的设备门面：解析板名、取得开发板锁、打开控制与控制台驱动，
//! 随后把电源 / USB / 按键 / 控制台写入 / 引导请求分发到能力集，
//! 并驱动定时的上电序列。
//!
//! ## 功能
//! - 打开/关闭设备的完整流程（锁、驱动、fastboot 会话）
//! - 上电状态机（START → … → RUNNING）
//! - 能力缺失的操作静默跳过
//! - 镜像下载与引导

use std::sync::Arc;

use boardcast_core::models::wire::{DeviceKey, FrameSink};
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use crate::device::descriptor::{BootMode, ControlBinding, Device};
use crate::device::drivers::{ConmuxDriver, ConsoleDriver, ControlDriver, ControlOp, UartConsole};
use crate::device::error::DeviceError;
use crate::device::fastboot::{FastbootBackend, FastbootListener, FastbootSession};
use crate::device::registry::{lock_board, BoardLock, DeviceRegistry};

/// 打开的设备
///
/// 描述符加运行期句柄；锁守卫持有到进程退出。
pub struct OpenDevice {
    /// 描述符
    device: Device,
    /// 控制驱动会话
    control: Option<Arc<dyn ControlDriver>>,
    /// 控制台驱动会话
    console: Option<Arc<dyn ConsoleDriver>>,
    /// fastboot 会话
    fastboot: Box<dyn FastbootSession>,
    /// 开发板锁
    _lock: BoardLock,
}

impl OpenDevice {
    /// 描述符
    pub fn device(&self) -> &Device {
        &self.device
    }
}

/// 设备管理器
///
/// 持有注册表与当前打开的设备。一个代理进程服务一个客户端，同一
/// 时刻至多打开一块板。
pub struct DeviceManager {
    /// 设备注册表
    registry: DeviceRegistry,
    /// 出站帧接口
    sink: Arc<dyn FrameSink>,
    /// 全局停机令牌
    shutdown: CancellationToken,
    /// 当前打开的设备
    current: Option<OpenDevice>,
}

impl DeviceManager {
    /// 创建设备管理器
    ///
    /// # 参数
    /// - `registry`: 解析完成的设备注册表
    /// - `sink`: 出站帧接口
    /// - `shutdown`: 全局停机令牌
    pub fn new(
        registry: DeviceRegistry,
        sink: Arc<dyn FrameSink>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            sink,
            shutdown,
            current: None,
        }
    }

    /// 设备注册表
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// 是否已打开设备
    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    fn current(&self) -> Result<&OpenDevice, DeviceError> {
        self.current.as_ref().ok_or(DeviceError::NoBoardSelected)
    }

    /// 打开开发板
    ///
    /// 解析描述符、取得开发板锁、打开控制驱动（失败致命）与控制台
    /// 驱动，`usb_always_on` 时接通 USB，最后以序列号打开 fastboot
    /// 会话。
    ///
    /// # 参数
    /// - `board`: 板名
    /// - `backend`: fastboot 会话工厂
    /// - `listener`: fastboot 设备出现/消失回调
    pub async fn open(
        &mut self,
        board: &str,
        backend: &dyn FastbootBackend,
        listener: Arc<dyn FastbootListener>,
    ) -> Result<(), DeviceError> {
        let device = self
            .registry
            .find(board)
            .ok_or_else(|| DeviceError::BoardNotFound(board.to_string()))?
            .clone();

        tracing::info!("[设备] 打开开发板: {}", device.board);
        let lock = lock_board(&device.board)?;

        let mut control: Option<Arc<dyn ControlDriver>> = None;
        let mut console: Option<Arc<dyn ConsoleDriver>> = None;

        if let Some(binding) = device.control {
            let control_dev = device.control_dev.as_deref().ok_or_else(|| {
                DeviceError::Config(format!("开发板 \"{}\" 缺少控制驱动参数", device.board))
            })?;
            match binding {
                ControlBinding::Conmux => {
                    let driver =
                        ConmuxDriver::open(control_dev, self.sink.clone(), self.shutdown.clone())
                            .await?;
                    control = Some(driver.clone() as Arc<dyn ControlDriver>);
                    // conmux 会话同时承担控制台写入
                    console = Some(driver as Arc<dyn ConsoleDriver>);
                }
                other => return Err(DeviceError::DriverUnavailable(other.key_name())),
            }
        }

        // 本地串口控制台优先于 conmux 控制台
        if let Some(path) = &device.console_dev {
            console = Some(UartConsole::open(path, self.sink.clone())? as Arc<dyn ConsoleDriver>);
        }

        if device.usb_always_on {
            Self::control_usb(&control, true).await;
        }

        let fastboot = backend.open(&device.serial, listener)?;

        self.current = Some(OpenDevice {
            device,
            control,
            console,
            fastboot,
            _lock: lock,
        });
        Ok(())
    }

    /// 关闭当前设备
    ///
    /// 断开 USB（`usb_always_on` 除外）、断电，然后关闭控制会话。
    pub async fn close(&mut self) -> Result<(), DeviceError> {
        let Some(open) = self.current.take() else {
            return Ok(());
        };

        tracing::info!("[设备] 关闭开发板: {}", open.device.board);

        if !open.device.usb_always_on {
            Self::control_usb(&open.control, false).await;
        }
        Self::control_power_off(&open.control).await;

        if let Some(control) = &open.control {
            if control.supports(ControlOp::Close) {
                if let Err(e) = control.close().await {
                    tracing::warn!("[设备] 关闭控制会话失败: {e}");
                }
            }
        }
        Ok(())
    }

    /// 电源开关
    ///
    /// 上电进入状态机（一次性派发后立即返回）；断电直接下发。
    pub async fn power(&self, on: bool) -> Result<(), DeviceError> {
        let open = self.current()?;
        if on {
            Self::spawn_power_up(open);
        } else {
            Self::control_power_off(&open.control).await;
        }
        Ok(())
    }

    /// USB 开关，驱动不支持时静默跳过
    pub async fn usb(&self, on: bool) -> Result<(), DeviceError> {
        let open = self.current()?;
        Self::control_usb(&open.control, on).await;
        Ok(())
    }

    /// 按键注入，驱动不支持时静默跳过
    pub async fn key(&self, key: DeviceKey, asserted: bool) -> Result<(), DeviceError> {
        let open = self.current()?;
        if let Some(control) = &open.control {
            press_key(control, key, asserted).await;
        }
        Ok(())
    }

    /// 状态打印，驱动不支持时静默跳过
    pub async fn print_status(&self) -> Result<(), DeviceError> {
        let open = self.current()?;
        if let Some(control) = &open.control {
            if control.supports(ControlOp::PrintStatus) {
                if let Err(e) = control.print_status().await {
                    tracing::warn!("[设备] 状态打印失败: {e}");
                }
            }
        }
        Ok(())
    }

    /// 写入控制台
    pub async fn write(&self, data: &[u8]) -> Result<usize, DeviceError> {
        let open = self.current()?;
        let console = open
            .console
            .as_ref()
            .ok_or(DeviceError::Unsupported("write"))?;
        console.write(data).await
    }

    /// 发送串口 break，驱动不支持时静默跳过
    pub async fn send_break(&self) -> Result<(), DeviceError> {
        let open = self.current()?;
        if let Some(console) = &open.console {
            if console.supports_break() {
                console.send_break().await?;
            }
        }
        Ok(())
    }

    /// 下载并引导镜像
    ///
    /// 需要时先设置活动槽位 "a"，下载镜像后按描述符的引导方式收尾。
    pub async fn boot(&self, image: &[u8]) -> Result<(), DeviceError> {
        let open = self.current()?;
        tracing::warn!("[设备] 正在引导开发板...");

        if open.device.set_active {
            open.fastboot.set_active("a").await?;
        }
        open.fastboot.download(image).await?;

        match open.device.boot_mode {
            BootMode::FastbootBoot => open.fastboot.boot().await?,
            BootMode::FastbootFlashReboot => {
                open.fastboot.flash("boot").await?;
                open.fastboot.reboot().await?;
            }
        }
        Ok(())
    }

    /// 派发上电序列
    fn spawn_power_up(open: &OpenDevice) {
        let Some(control) = &open.control else {
            return;
        };
        if !control.supports(ControlOp::Power) {
            return;
        }
        tokio::spawn(run_power_up(
            control.clone(),
            open.device.has_power_key,
            open.device.fastboot_key_timeout,
        ));
    }

    /// 直接断电，驱动不支持时静默跳过
    async fn control_power_off(control: &Option<Arc<dyn ControlDriver>>) {
        if let Some(control) = control {
            if control.supports(ControlOp::Power) {
                if let Err(e) = control.power(false).await {
                    tracing::warn!("[设备] 断电失败: {e}");
                }
            }
        }
    }

    /// USB 开关，驱动不支持时静默跳过
    async fn control_usb(control: &Option<Arc<dyn ControlDriver>>, on: bool) {
        if let Some(control) = control {
            if control.supports(ControlOp::Usb) {
                if let Err(e) = control.usb(on).await {
                    tracing::warn!("[设备] USB 切换失败: {e}");
                }
            }
        }
    }
}

/// 上电状态机位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PowerState {
    Start,
    Connect,
    Press,
    ReleasePwr,
    ReleaseFastboot,
    Running,
}

/// 按键注入，驱动不支持时静默跳过
async fn press_key(control: &Arc<dyn ControlDriver>, key: DeviceKey, asserted: bool) {
    if control.supports(ControlOp::Key) {
        if let Err(e) = control.key(key, asserted).await {
            tracing::warn!("[设备] 按键操作失败: key={key}, error={e}");
        }
    }
}

/// 上电序列
///
/// 每个非 RUNNING 状态完成动作后等待固定时延再进入下一状态；
/// RUNNING 是终态。
pub(crate) async fn run_power_up(
    control: Arc<dyn ControlDriver>,
    has_power_key: bool,
    fastboot_key_timeout: u64,
) {
    let mut state = PowerState::Start;
    loop {
        match state {
            PowerState::Start => {
                // 上电前把按键摆到预期位置
                if fastboot_key_timeout > 0 {
                    press_key(&control, DeviceKey::Fastboot, true).await;
                }
                if has_power_key {
                    press_key(&control, DeviceKey::Power, false).await;
                }
                state = PowerState::Connect;
                sleep(Duration::from_millis(10)).await;
            }
            PowerState::Connect => {
                // 接通电源和 USB
                if let Err(e) = control.power(true).await {
                    tracing::warn!("[设备] 上电失败: {e}");
                }
                if control.supports(ControlOp::Usb) {
                    if let Err(e) = control.usb(true).await {
                        tracing::warn!("[设备] USB 接通失败: {e}");
                    }
                }

                if has_power_key {
                    state = PowerState::Press;
                    sleep(Duration::from_millis(250)).await;
                } else if fastboot_key_timeout > 0 {
                    state = PowerState::ReleaseFastboot;
                    sleep(Duration::from_millis(fastboot_key_timeout * 1000)).await;
                } else {
                    state = PowerState::Running;
                }
            }
            PowerState::Press => {
                press_key(&control, DeviceKey::Power, true).await;
                state = PowerState::ReleasePwr;
                sleep(Duration::from_millis(100)).await;
            }
            PowerState::ReleasePwr => {
                press_key(&control, DeviceKey::Power, false).await;
                if fastboot_key_timeout > 0 {
                    state = PowerState::ReleaseFastboot;
                    sleep(Duration::from_millis(fastboot_key_timeout * 1000)).await;
                } else {
                    state = PowerState::Running;
                }
            }
            PowerState::ReleaseFastboot => {
                press_key(&control, DeviceKey::Fastboot, false).await;
                state = PowerState::Running;
            }
            PowerState::Running => {
                tracing::debug!("[设备] 上电序列完成");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// 记录调用轨迹的控制驱动
    struct RecordingControl {
        start: tokio::time::Instant,
        calls: parking_lot::Mutex<Vec<(u64, String)>>,
        caps: Vec<ControlOp>,
    }

    impl RecordingControl {
        fn new(caps: Vec<ControlOp>) -> Arc<Self> {
            Arc::new(Self {
                start: tokio::time::Instant::now(),
                calls: parking_lot::Mutex::new(Vec::new()),
                caps,
            })
        }

        fn record(&self, call: String) {
            let at = self.start.elapsed().as_millis() as u64;
            self.calls.lock().push((at, call));
        }

        fn trace(&self) -> Vec<(u64, String)> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl ControlDriver for RecordingControl {
        fn supports(&self, op: ControlOp) -> bool {
            self.caps.contains(&op)
        }

        async fn power(&self, on: bool) -> Result<(), DeviceError> {
            self.record(format!("power({on})"));
            Ok(())
        }

        async fn usb(&self, on: bool) -> Result<(), DeviceError> {
            self.record(format!("usb({on})"));
            Ok(())
        }

        async fn key(&self, key: DeviceKey, asserted: bool) -> Result<(), DeviceError> {
            self.record(format!("key({key},{asserted})"));
            Ok(())
        }
    }

    fn full_caps() -> Vec<ControlOp> {
        vec![ControlOp::Power, ControlOp::Usb, ControlOp::Key]
    }

    fn expect(trace: &[(u64, String)], expected: &[(u64, &str)]) {
        let got: Vec<(u64, &str)> = trace.iter().map(|(t, s)| (*t, s.as_str())).collect();
        assert_eq!(got, expected);
    }

    // ========================================================================
    // 上电状态机轨迹测试
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_power_up_power_key_only() {
        let control = RecordingControl::new(full_caps());
        run_power_up(control.clone() as Arc<dyn ControlDriver>, true, 0).await;

        expect(
            &control.trace(),
            &[
                (0, "key(power,false)"),
                (10, "power(true)"),
                (10, "usb(true)"),
                (260, "key(power,true)"),
                (360, "key(power,false)"),
            ],
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_power_up_fastboot_key_only() {
        let control = RecordingControl::new(full_caps());
        run_power_up(control.clone() as Arc<dyn ControlDriver>, false, 3).await;

        expect(
            &control.trace(),
            &[
                (0, "key(fastboot,true)"),
                (10, "power(true)"),
                (10, "usb(true)"),
                (3010, "key(fastboot,false)"),
            ],
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_power_up_no_keys() {
        let control = RecordingControl::new(full_caps());
        run_power_up(control.clone() as Arc<dyn ControlDriver>, false, 0).await;

        expect(&control.trace(), &[(10, "power(true)"), (10, "usb(true)")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_power_up_both_keys() {
        let control = RecordingControl::new(full_caps());
        run_power_up(control.clone() as Arc<dyn ControlDriver>, true, 3).await;

        expect(
            &control.trace(),
            &[
                (0, "key(fastboot,true)"),
                (0, "key(power,false)"),
                (10, "power(true)"),
                (10, "usb(true)"),
                (260, "key(power,true)"),
                (360, "key(power,false)"),
                (3360, "key(fastboot,false)"),
            ],
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_power_up_skips_missing_capabilities() {
        // 只有 power 能力：按键和 USB 操作全部静默跳过
        let control = RecordingControl::new(vec![ControlOp::Power]);
        run_power_up(control.clone() as Arc<dyn ControlDriver>, true, 3).await;

        expect(&control.trace(), &[(10, "power(true)")]);
    }
}
