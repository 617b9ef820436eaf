//! 流水线主机: 按流名管理流水线、缓存解码帧、响应控制条事件
//! Reconciles configured streams against running pipelines and hands decoded
//! frames to the render thread.
//!
//! 锁规则: 主机锁内绝不销毁 [`PipelineState`]。从表中移除的流水线一律
//! 通过回收队列交给 `pipeline-reaper` 线程释放, 因为销毁会等待解码线程,
//! 而解码线程交付帧时需要同一把锁。

pub mod render;

pub use render::{PixelFormat, RenderContext, TextureId, TextureSurface};

use crate::config::{ConfigureState, Layout, StreamInfo};
use crate::pipeline::{Frame, FrameSink, PipelineEnv, PipelineState};
use crate::timeline::{export_file_name, ControlBarButton, ControlBarEvent, ControlBarState};
use crate::validate::{self, ValidationError};
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

// ========== 公共常量 ==========
pub const LIVENESS_TICK: Duration = Duration::from_secs(1);
pub const DEAD_CHECK_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
pub struct HostSettings {
    pub liveness_tick: Duration,
    pub dead_check_interval: Duration,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            liveness_tick: LIVENESS_TICK,
            dead_check_interval: DEAD_CHECK_INTERVAL,
        }
    }
}

/// 回放模式下显示时间 = 起点 + (pts - 首帧pts)
#[derive(Debug, Clone, Copy)]
struct PlaybackAnchor {
    origin_ms: i64,
    first_pts: Option<i64>,
}

impl PlaybackAnchor {
    fn display_pts(&mut self, pts_ms: i64) -> i64 {
        match self.first_pts {
            None => {
                self.first_pts = Some(pts_ms);
                self.origin_ms
            }
            Some(first) => self.origin_ms.saturating_add(pts_ms - first),
        }
    }
}

/// 主机锁保护的全部状态
#[derive(Default)]
struct HostInner {
    stream_infos: HashMap<String, StreamInfo>,
    pipes: HashMap<String, Arc<PipelineState>>,
    render_contexts: HashMap<String, RenderContext>,
    video_frames: HashMap<String, Frame>,
    playback: HashMap<String, PlaybackAnchor>,
    retired_textures: Vec<TextureId>,
}

impl HostInner {
    /// 移除一路流的运行时资源; 返回的流水线必须在锁外释放
    fn detach(&mut self, name: &str) -> Option<Arc<PipelineState>> {
        if let Some(rc) = self.render_contexts.remove(name) {
            self.retired_textures.push(rc.texture);
        }
        self.video_frames.remove(name);
        self.playback.remove(name);
        self.pipes.remove(name)
    }
}

type Waker = Arc<dyn Fn() + Send + Sync>;

struct HostShared {
    config: Arc<RwLock<ConfigureState>>,
    env: PipelineEnv,
    settings: HostSettings,
    inner: Mutex<HostInner>,
    retire: Sender<Arc<PipelineState>>,
    waker: RwLock<Option<Waker>>,
    this: Weak<HostShared>,
}

impl HostShared {
    /// 交给回收线程; 回收线程已退出时就地释放 (调用方不持锁)
    fn retire_all(&self, pipes: Vec<Arc<PipelineState>>) {
        for pipe in pipes {
            debug!("🗑️ [{}] 流水线进入回收队列", pipe.name());
            if let Err(e) = self.retire.send(pipe) {
                drop(e.into_inner());
            }
        }
    }

    fn pipe(&self, name: &str) -> Option<Arc<PipelineState>> {
        self.inner.lock().pipes.get(name).cloned()
    }

    fn camera_id(&self, name: &str) -> Option<String> {
        self.inner
            .lock()
            .stream_infos
            .get(name)
            .map(|info| info.camera_id.clone())
    }

    fn accept_frame(&self, name: &str, mut frame: Frame) -> Result<(), ValidationError> {
        if name.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        validate::frame_dimensions(frame.width, frame.height)?;
        validate::frame_dimensions(frame.original_width, frame.original_height)?;
        validate::buffer_size(
            frame.buffer.len(),
            frame.width,
            frame.height,
            PixelFormat::Rgb.channels(),
        )?;

        let was_empty = {
            let mut inner = self.inner.lock();
            // 已断开的流可能还有在途帧
            if !inner.stream_infos.contains_key(name) {
                debug!("⏭️ [{}] 流已移除, 丢弃帧", name);
                return Ok(());
            }
            if let Some(anchor) = inner.playback.get_mut(name) {
                frame.pts_ms = anchor.display_pts(frame.pts_ms);
            }
            let pts_ms = frame.pts_ms;
            let was_empty = inner.video_frames.is_empty();
            inner.video_frames.insert(name.to_string(), frame);
            if let Some(rc) = inner.render_contexts.get_mut(name) {
                rc.last_pts = pts_ms;
            }
            was_empty
        };

        if was_empty {
            let waker = self.waker.read().clone();
            if let Some(wake) = waker {
                wake();
            }
        }
        Ok(())
    }

    /// 卡死或失败的流水线移出活动表, 下次查询渲染上下文时重建
    fn reap_dead(&self) {
        let dead = {
            let mut inner = self.inner.lock();
            let names: Vec<String> = inner
                .pipes
                .iter()
                .filter(|(_, pipe)| pipe.failed() || (pipe.running() && !pipe.check_liveness()))
                .map(|(name, _)| name.clone())
                .collect();
            let mut dead = Vec::with_capacity(names.len());
            for name in names {
                if let Some(pipe) = inner.pipes.remove(&name) {
                    inner.playback.remove(&name);
                    inner.video_frames.remove(&name);
                    warn!("💀 [{}] 流已停止更新, 移除流水线", name);
                    pipe.stop();
                    dead.push(pipe);
                }
            }
            dead
        };
        self.retire_all(dead);
    }
}

impl FrameSink for HostShared {
    fn post_video_frame(&self, name: &str, frame: Frame) {
        if let Err(e) = self.accept_frame(name, frame) {
            warn!("⚠️ [{}] 拒绝帧: {}", name, e);
        }
    }
}

pub struct PipelineHost {
    shared: Arc<HostShared>,
    stop: Option<Sender<()>>,
    liveness: Option<JoinHandle<()>>,
    reaper: Option<JoinHandle<()>>,
}

impl PipelineHost {
    pub fn new(
        config: Arc<RwLock<ConfigureState>>,
        env: PipelineEnv,
        settings: HostSettings,
    ) -> Result<Self> {
        let (retire_tx, retire_rx) = unbounded();
        let (stop_tx, stop_rx) = bounded::<()>(0);

        let shared = Arc::new_cyclic(|this| HostShared {
            config,
            env,
            settings,
            inner: Mutex::new(HostInner::default()),
            retire: retire_tx,
            waker: RwLock::new(None),
            this: this.clone(),
        });

        let reaper_stop = stop_rx.clone();
        let reaper = thread::Builder::new()
            .name("pipeline-reaper".into())
            .spawn(move || reap(retire_rx, reaper_stop))
            .context("启动回收线程失败")?;

        let liveness_shared = shared.clone();
        let liveness = thread::Builder::new()
            .name("pipeline-liveness".into())
            .spawn(move || liveness_loop(liveness_shared, stop_rx))
            .context("启动存活检测线程失败")?;

        info!(
            "✅ 流水线主机启动 (检测间隔 {:?})",
            settings.dead_check_interval
        );
        Ok(Self {
            shared,
            stop: Some(stop_tx),
            liveness: Some(liveness),
            reaper: Some(reaper),
        })
    }

    /// 空帧缓冲收到第一帧时调用, 用于唤醒空闲的渲染循环
    pub fn set_frame_waker(&self, waker: impl Fn() + Send + Sync + 'static) {
        *self.shared.waker.write() = Some(Arc::new(waker));
    }

    pub fn config(&self) -> &Arc<RwLock<ConfigureState>> {
        &self.shared.config
    }

    // ========== 配置同步 ==========

    /// 整窗切换: 清空该窗口的全部流, 再按新布局从配置重新加载
    pub fn change_layout(&self, window: usize, layout: Layout) {
        let infos = {
            let mut config = self.shared.config.write();
            config.set_current_layout(layout);
            config.collect_stream_info(window, layout)
        };
        let prefix = format!("{}_", window);

        let retired = {
            let mut inner = self.shared.inner.lock();
            let names: Vec<String> = inner
                .stream_infos
                .keys()
                .chain(inner.pipes.keys())
                .chain(inner.render_contexts.keys())
                .filter(|name| name.starts_with(&prefix))
                .cloned()
                .collect();
            let mut retired = Vec::new();
            for name in &names {
                inner.stream_infos.remove(name);
                retired.extend(inner.detach(name));
            }
            for info in infos {
                inner.stream_infos.insert(info.name.clone(), info);
            }
            retired
        };

        info!(
            "🔄 窗口 {} 切换布局 {}, 释放 {} 条流水线",
            window,
            layout,
            retired.len()
        );
        self.shared.retire_all(retired);
    }

    /// 替换一个槽位的流; 旧流水线在锁外释放, 下一帧按新地址重建
    pub fn update_stream(&self, window: usize, info: StreamInfo) -> Result<()> {
        check_window(window, &info.name)?;
        self.shared.config.write().set_stream_info(info.clone());

        let retired = {
            let mut inner = self.shared.inner.lock();
            let retired = inner.detach(&info.name);
            inner.stream_infos.insert(info.name.clone(), info);
            retired
        };
        self.shared.retire_all(retired.into_iter().collect());
        Ok(())
    }

    /// 断开一个槽位; 渲染上下文标记为 done, 下一次纹理上传时移除
    pub fn disconnect_stream(&self, window: usize, name: &str) -> Result<()> {
        check_window(window, name)?;
        self.shared.config.write().unset_stream_info(name);

        let retired = {
            let mut inner = self.shared.inner.lock();
            inner.stream_infos.remove(name);
            inner.video_frames.remove(name);
            inner.playback.remove(name);
            if let Some(rc) = inner.render_contexts.get_mut(name) {
                rc.done = true;
            }
            inner.pipes.remove(name)
        };
        info!("🔌 [{}] 断开", name);
        self.shared.retire_all(retired.into_iter().collect());
        Ok(())
    }

    pub fn post_video_frame(&self, name: &str, frame: Frame) -> Result<(), ValidationError> {
        self.shared.accept_frame(name, frame)
    }

    pub fn stream_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.inner.lock().stream_infos.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_pipeline(&self, name: &str) -> bool {
        self.shared.inner.lock().pipes.contains_key(name)
    }

    pub fn playing(&self, name: &str) -> bool {
        self.shared.pipe(name).is_some_and(|pipe| pipe.running())
    }

    // ========== 渲染线程 ==========

    /// 每帧每路流调用一次; 有分配但没有流水线时创建并开始直播
    pub fn lookup_render_context(&self, name: &str, width: u16, height: u16) -> Option<RenderContext> {
        if let Err(e) = validate::frame_dimensions(width, height) {
            debug!("⚠️ [{}] 跳过渲染查询: {}", name, e);
            return None;
        }

        let mut created = None;
        let rc = {
            let mut inner = self.shared.inner.lock();
            if let Some(pipe) = inner.pipes.get(name) {
                pipe.resize(width, height);
            } else if let Some(info) = inner.stream_infos.get(name).cloned() {
                let sink: Weak<dyn FrameSink> = self.shared.this.clone();
                match PipelineState::new(info, width, height, &self.shared.env, sink) {
                    Ok(pipe) => {
                        let pipe = Arc::new(pipe);
                        inner.playback.remove(name);
                        inner.pipes.insert(name.to_string(), pipe.clone());
                        created = Some(pipe);
                    }
                    Err(e) => error!("❌ [{}] 创建流水线失败: {:#}", name, e),
                }
            }
            inner.render_contexts.get(name).filter(|rc| !rc.done).copied()
        };

        if let Some(pipe) = created {
            if let Err(e) = pipe.play_live() {
                warn!("⚠️ [{}] 直播启动失败: {:#}", name, e);
            }
        }
        rc
    }

    /// 取走待上传的帧并更新纹理; 只能在渲染线程调用
    pub fn load_video_textures(&self, surface: &mut dyn TextureSurface) {
        let (frames, retired, contexts) = {
            let mut inner = self.shared.inner.lock();
            let frames = std::mem::take(&mut inner.video_frames);
            let retired = std::mem::take(&mut inner.retired_textures);
            let contexts: HashMap<String, RenderContext> = frames
                .keys()
                .filter_map(|name| inner.render_contexts.get(name).map(|rc| (name.clone(), *rc)))
                .collect();
            (frames, retired, contexts)
        };

        for texture in retired {
            surface.destroy(texture);
        }

        let mut uploaded = Vec::with_capacity(frames.len());
        let mut stale = Vec::new();
        for (name, frame) in frames {
            let existing = contexts.get(&name).filter(|rc| !rc.done);
            let rc = match existing {
                Some(rc) if rc.width == frame.width && rc.height == frame.height => *rc,
                _ => {
                    let texture =
                        match surface.create_streaming(PixelFormat::Rgb, frame.width, frame.height) {
                            Ok(texture) => texture,
                            Err(e) => {
                                error!("❌ [{}] 创建纹理失败: {:#}", name, e);
                                continue;
                            }
                        };
                    if let Some(old) = existing {
                        stale.push(old.texture);
                    }
                    RenderContext {
                        texture,
                        width: frame.width,
                        height: frame.height,
                        done: false,
                        last_pts: frame.pts_ms,
                    }
                }
            };
            if let Err(e) = surface.update(rc.texture, &frame.buffer) {
                warn!("⚠️ [{}] 更新纹理失败: {:#}", name, e);
            }
            uploaded.push((
                name,
                RenderContext {
                    last_pts: frame.pts_ms,
                    ..rc
                },
            ));
        }

        {
            let mut inner = self.shared.inner.lock();
            for (name, rc) in uploaded {
                // 上传期间流被移除或断开
                let wanted = inner.stream_infos.contains_key(&name)
                    && !inner.render_contexts.get(&name).is_some_and(|old| old.done);
                if !wanted {
                    stale.push(rc.texture);
                    continue;
                }
                if let Some(old) = inner.render_contexts.insert(name, rc) {
                    if old.texture != rc.texture && !stale.contains(&old.texture) {
                        stale.push(old.texture);
                    }
                }
            }
            inner.render_contexts.retain(|name, rc| {
                if rc.done {
                    debug!("🗑️ [{}] 移除渲染上下文", name);
                    stale.push(rc.texture);
                }
                !rc.done
            });
        }

        for texture in stale {
            surface.destroy(texture);
        }
    }

    // ========== 控制条回调 ==========

    /// 拖动: 停止播放, 取该时间点的关键帧
    pub fn control_bar_cb(&self, name: &str, pos: DateTime<Utc>) -> Result<()> {
        let pipe = {
            let mut inner = self.shared.inner.lock();
            inner.playback.remove(name);
            inner.pipes.get(name).cloned()
        };
        let pipe = pipe.ok_or_else(|| anyhow!("[{}] 没有流水线", name))?;
        if pipe.running() {
            pipe.stop();
        }
        pipe.control_bar(pos)
    }

    /// 直播/播放按钮; 已在运行时不做任何事
    pub fn control_bar_button_cb(&self, name: &str, button: ControlBarButton) -> Result<()> {
        let pipe = self
            .shared
            .pipe(name)
            .ok_or_else(|| anyhow!("[{}] 没有流水线", name))?;
        if pipe.running() {
            debug!("[{}] {:?}: 已在运行", name, button);
            return Ok(());
        }

        match button {
            ControlBarButton::Live => {
                self.shared.inner.lock().playback.remove(name);
                pipe.play_live()
            }
            ControlBarButton::Play => {
                let origin = pipe
                    .last_control_bar_pos()
                    .or_else(|| pipe.range().map(|range| range.start()))
                    .ok_or_else(|| anyhow!("[{}] 没有回放起点", name))?;
                self.shared.inner.lock().playback.insert(
                    name.to_string(),
                    PlaybackAnchor {
                        origin_ms: origin.timestamp_millis(),
                        first_pts: None,
                    },
                );
                pipe.play()
            }
        }
    }

    /// 重新查询可见范围内的叠加数据; 任一查询失败则保留旧数据
    pub fn control_bar_update_data_cb(&self, name: &str, state: &mut ControlBarState) -> Result<()> {
        let range = state.timerange();
        let (camera_id, pipe) = {
            let inner = self.shared.inner.lock();
            let info = inner
                .stream_infos
                .get(name)
                .ok_or_else(|| anyhow!("[{}] 没有分配摄像头", name))?;
            (info.camera_id.clone(), inner.pipes.get(name).cloned())
        };
        if let Some(pipe) = pipe {
            pipe.update_range(range);
        }
        let data = self
            .shared
            .env
            .vms
            .timeline_data(&camera_id, range)
            .with_context(|| format!("[{}] 查询时间轴数据失败", name))?;
        state.apply_timeline_data(data);
        Ok(())
    }

    /// 阻塞导出, 结果写回控制条
    pub fn control_bar_export_cb(
        &self,
        name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        state: &mut ControlBarState,
    ) -> Result<()> {
        let camera_id = self.shared.camera_id(name);
        let ok = run_export(&*self.shared.env.vms, name, camera_id, start, end);
        state.finish_export(ok);
        if !ok {
            bail!("[{}] 导出失败", name);
        }
        Ok(())
    }

    /// 在后台线程导出; 接收端断开视为失败
    pub fn start_export(
        &self,
        name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Receiver<bool> {
        let (tx, rx) = bounded(1);
        let camera_id = self.shared.camera_id(name);
        let vms = self.shared.env.vms.clone();
        let label = name.to_string();
        let spawned = thread::Builder::new()
            .name(format!("export-{}", name))
            .spawn(move || {
                let ok = run_export(&*vms, &label, camera_id, start, end);
                let _ = tx.send(ok);
            });
        if let Err(e) = spawned {
            error!("❌ [{}] 启动导出线程失败: {}", name, e);
        }
        rx
    }

    /// 把控制条事件分派到对应回调; 失败只记录日志
    pub fn dispatch(&self, name: &str, event: ControlBarEvent, state: &mut ControlBarState) {
        let result = match event {
            ControlBarEvent::Seek(pos) => self.control_bar_cb(name, pos),
            ControlBarEvent::Button(button) => self.control_bar_button_cb(name, button),
            ControlBarEvent::UpdateData => self.control_bar_update_data_cb(name, state),
            ControlBarEvent::Export { start, end } => {
                self.control_bar_export_cb(name, start, end, state)
            }
        };
        if let Err(e) = result {
            warn!("⚠️ [{}] {:?} 处理失败: {:#}", name, event, e);
        }
    }
}

impl Drop for PipelineHost {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.liveness.take() {
            let _ = handle.join();
        }
        let pipes: Vec<Arc<PipelineState>> = {
            let mut inner = self.shared.inner.lock();
            inner.pipes.drain().map(|(_, pipe)| pipe).collect()
        };
        drop(pipes);
        if let Some(handle) = self.reaper.take() {
            let _ = handle.join();
        }
        info!("✅ 流水线主机已关闭");
    }
}

fn check_window(window: usize, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ValidationError::EmptyName.into());
    }
    if !name.starts_with(&format!("{}_", window)) {
        bail!("流 {} 不属于窗口 {}", name, window);
    }
    Ok(())
}

fn run_export(
    vms: &dyn crate::query::VmsClient,
    name: &str,
    camera_id: Option<String>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> bool {
    let Some(camera_id) = camera_id else {
        warn!("⚠️ [{}] 导出: 没有分配摄像头", name);
        return false;
    };
    if let Err(e) = validate::positive_duration_ms(start, end) {
        warn!("⚠️ [{}] 导出: {}", name, e);
        return false;
    }
    let file_name = export_file_name(start);
    info!("📦 [{}] 导出 {} ({} ~ {})", name, file_name, start, end);
    match vms.export(&camera_id, start, end, &file_name) {
        Ok(true) => true,
        Ok(false) => {
            warn!("❌ [{}] 服务拒绝导出", name);
            false
        }
        Err(e) => {
            error!("❌ [{}] 导出请求失败: {:#}", name, e);
            false
        }
    }
}

/// 回收线程: 在任何锁之外释放流水线
fn reap(retired: Receiver<Arc<PipelineState>>, stop: Receiver<()>) {
    debug!("✅ 回收线程启动");
    loop {
        select! {
            recv(retired) -> msg => match msg {
                Ok(pipe) => drop(pipe),
                Err(_) => break,
            },
            recv(stop) -> _ => {
                for pipe in retired.try_iter() {
                    drop(pipe);
                }
                break;
            }
        }
    }
    debug!("✅ 回收线程退出");
}

fn liveness_loop(shared: Arc<HostShared>, stop: Receiver<()>) {
    let settings = shared.settings;
    let mut last_check = Instant::now();
    loop {
        select! {
            recv(stop) -> _ => break,
            default(settings.liveness_tick) => {}
        }
        if last_check.elapsed() >= settings.dead_check_interval {
            shared.reap_dead();
            last_check = Instant::now();
        }
    }
    debug!("✅ 存活检测线程退出");
}
