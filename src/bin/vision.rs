/// 视频墙客户端
///
/// 多路摄像头直播/回放, 每个格子带一条时间轴
///
/// 线程结构:
/// 1. 每路流一个取流线程 + 一个解码线程 (流水线)
/// 2. 存活检测线程 + 回收线程 (流水线主机)
/// 3. 摄像头轮询线程
/// 4. 主线程: 渲染与控制条 (macroquad事件循环)
use anyhow::{bail, Context, Result};
use chrono::{TimeZone, Utc};
use clap::Parser;
use crossbeam_channel::{Receiver, TryRecvError};
use egui_macroquad::egui;
use macroquad::prelude::*;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use vision_wall::config::{self, ConfigureState, Layout, StreamInfo, DEFAULT_SERVICE_HOST};
use vision_wall::host::{HostSettings, PipelineHost, PixelFormat, TextureId, TextureSurface};
use vision_wall::pipeline::PipelineEnv;
use vision_wall::query::poller::DEFAULT_POLL_INTERVAL;
use vision_wall::query::{Camera, CameraPoller, HttpVmsClient, ServiceStatus, VmsClient};
use vision_wall::timeline::{
    playhead_label, ControlBarButton, ControlBarEvent, ControlBarState, ExportOutcome,
    ExportState, ScrubPointer, Segment, Timerange, PLAYHEAD_MAX, PLAYHEAD_MIN,
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

// ========== 界面常量 ==========
const BAR_HEIGHT: f32 = 56.0;
const TRACK_HEIGHT: f32 = 10.0;
const LABEL_SIZE: f32 = 16.0;

/// 视频墙参数
#[derive(Parser, Debug)]
#[command(author, version, about = "视频墙 - 多路直播/回放客户端", long_about = None)]
struct Args {
    /// 配置文件路径 (默认在数据目录下)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 窗口编号
    #[arg(short, long, default_value_t = 0)]
    window: usize,

    /// 元数据服务地址, 覆盖配置文件
    #[arg(short, long)]
    service: Option<String>,
}

fn window_conf() -> Conf {
    Conf {
        window_title: "Vision Wall".to_owned(),
        window_width: 1280,
        window_height: 800,
        high_dpi: true,
        ..Default::default()
    }
}

#[macroquad::main(window_conf)]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    info!("🚀 视频墙启动 (窗口 {})", args.window);

    let mut wall = match Wall::new(&args) {
        Ok(wall) => wall,
        Err(e) => {
            error!("❌ 启动失败: {:#}", e);
            return;
        }
    };

    loop {
        wall.update();
        wall.draw();
        wall.draw_egui();
        next_frame().await;
    }
}

// ========== 纹理 ==========

/// macroquad 纹理表; RGB 数据上传前补齐 alpha
#[derive(Default)]
struct MacroquadSurface {
    next: u64,
    textures: HashMap<TextureId, (Texture2D, PixelFormat)>,
}

impl MacroquadSurface {
    fn get(&self, texture: TextureId) -> Option<&Texture2D> {
        self.textures.get(&texture).map(|(tex, _)| tex)
    }
}

impl TextureSurface for MacroquadSurface {
    fn create_streaming(
        &mut self,
        format: PixelFormat,
        width: u16,
        height: u16,
    ) -> Result<TextureId> {
        if width == 0 || height == 0 {
            bail!("invalid texture size {}x{}", width, height);
        }
        let blank = vec![0u8; width as usize * height as usize * 4];
        let texture = Texture2D::from_rgba8(width, height, &blank);
        texture.set_filter(FilterMode::Linear);
        self.next += 1;
        let id = TextureId(self.next);
        self.textures.insert(id, (texture, format));
        Ok(id)
    }

    fn update(&mut self, texture: TextureId, data: &[u8]) -> Result<()> {
        let (tex, format) = self.textures.get(&texture).context("unknown texture")?;
        let (width, height) = (tex.width() as u16, tex.height() as u16);
        let bytes = match format {
            PixelFormat::Rgba => data.to_vec(),
            PixelFormat::Rgb => data
                .chunks_exact(3)
                .flat_map(|p| [p[0], p[1], p[2], 255])
                .collect(),
        };
        if bytes.len() != width as usize * height as usize * 4 {
            bail!("texture data size {} does not match {}x{}", bytes.len(), width, height);
        }
        // 原地更新像素, 不重新分配显存
        tex.update(&Image {
            bytes,
            width,
            height,
        });
        Ok(())
    }

    fn destroy(&mut self, texture: TextureId) {
        self.textures.remove(&texture);
    }
}

// ========== 视频墙 ==========

struct Tile {
    control: ControlBarState,
    export: Option<Receiver<bool>>,
}

impl Tile {
    fn new() -> Self {
        Self {
            control: ControlBarState::new(Utc::now()),
            export: None,
        }
    }
}

enum UiAction {
    Layout(Layout),
    Live,
    Play,
    ZoomIn,
    ZoomOut,
    PanBackward,
    PanForward,
    Export,
    FinishExport,
    CancelExport,
    Assign(Camera),
    Disconnect,
    DismissError,
}

struct Wall {
    window: usize,
    config_path: PathBuf,
    config: Arc<RwLock<ConfigureState>>,
    host: PipelineHost,
    poller: CameraPoller,
    surface: MacroquadSurface,
    tiles: HashMap<String, Tile>,
    selected: usize,
    status: ServiceStatus,
    error_dialog: Option<String>,
    is_mouse_over_ui: bool,
}

impl Wall {
    fn new(args: &Args) -> Result<Self> {
        let config_path = match &args.config {
            Some(path) => path.clone(),
            None => config::default_config_path()?,
        };
        let mut cfg = ConfigureState::load(&config_path);
        if let Some(service) = &args.service {
            cfg.set_service_host(Some(service.clone()));
        }
        let layout = cfg.current_layout;
        let config = Arc::new(RwLock::new(cfg));

        let vms: Arc<dyn VmsClient> = Arc::new(HttpVmsClient::new(config.clone()));
        let host = PipelineHost::new(
            config.clone(),
            PipelineEnv::ffmpeg(vms.clone()),
            HostSettings::default(),
        )?;
        host.change_layout(args.window, layout);
        let poller = CameraPoller::spawn(vms, DEFAULT_POLL_INTERVAL)?;

        Ok(Self {
            window: args.window,
            config_path,
            config,
            host,
            poller,
            surface: MacroquadSurface::default(),
            tiles: HashMap::new(),
            selected: 0,
            status: ServiceStatus {
                cameras: Vec::new(),
                connected: false,
                status_text: String::new(),
            },
            error_dialog: None,
            is_mouse_over_ui: false,
        })
    }

    fn layout(&self) -> Layout {
        self.config.read().current_layout
    }

    fn selected_name(&self) -> String {
        ConfigureState::make_name(self.window, self.layout(), self.selected)
    }

    fn update(&mut self) {
        if let Some(status) = self.poller.latest() {
            self.status = status;
        }
        self.host.load_video_textures(&mut self.surface);

        let saved = self.config.write().save_if_needed(&self.config_path);
        if let Err(e) = saved {
            warn!("⚠️ 保存配置失败: {:#}", e);
        }
    }

    fn draw(&mut self) {
        clear_background(BLACK);

        let layout = self.layout();
        let side = layout.side();
        let tile_w = screen_width() / side as f32;
        let tile_h = screen_height() / side as f32;
        let (mx, my) = mouse_position();
        let clicked = is_mouse_button_pressed(MouseButton::Left) && !self.is_mouse_over_ui;

        for index in 0..layout.slots() {
            let name = ConfigureState::make_name(self.window, layout, index);
            let rect = Rect::new(
                (index % side) as f32 * tile_w,
                (index / side) as f32 * tile_h,
                tile_w,
                tile_h,
            );
            if clicked && rect.contains(vec2(mx, my)) {
                self.selected = index;
            }

            let tile = self.tiles.entry(name.clone()).or_insert_with(Tile::new);
            let failure = draw_tile(
                &self.host,
                &self.surface,
                tile,
                &name,
                rect,
                self.is_mouse_over_ui,
            );
            if let Some(message) = failure {
                self.error_dialog = Some(message);
            }
            if index == self.selected {
                draw_rectangle_lines(rect.x, rect.y, rect.w, rect.h, 2.0, YELLOW);
            }
        }
    }

    fn draw_egui(&mut self) {
        let mut actions = Vec::new();
        let layout = self.layout();
        let name = self.selected_name();
        let export_state = self
            .tiles
            .get(&name)
            .map(|tile| tile.control.export_state())
            .unwrap_or_default();
        let assigned = self.config.read().stream_info(&name).cloned();

        egui_macroquad::ui(|egui_ctx| {
            self.is_mouse_over_ui = egui_ctx.wants_pointer_input();

            egui::Window::new("控制面板")
                .default_pos(egui::pos2(10.0, 10.0))
                .default_size(egui::vec2(300.0, 360.0))
                .show(egui_ctx, |ui| {
                    let color = if self.status.connected {
                        egui::Color32::GREEN
                    } else {
                        egui::Color32::RED
                    };
                    ui.colored_label(color, &self.status.status_text);

                    let mut chosen = layout;
                    egui::ComboBox::from_label("布局")
                        .selected_text(layout.as_str())
                        .show_ui(ui, |ui| {
                            for option in Layout::ALL {
                                ui.selectable_value(&mut chosen, option, option.as_str());
                            }
                        });
                    if chosen != layout {
                        actions.push(UiAction::Layout(chosen));
                    }

                    ui.separator();
                    ui.label(format!("📺 {}", name));
                    match &assigned {
                        Some(info) => ui.label(format!("摄像头: {}", info.camera_id)),
                        None => ui.label("未分配"),
                    };

                    egui::ComboBox::from_id_salt("camera_select")
                        .selected_text("分配摄像头")
                        .show_ui(ui, |ui| {
                            for camera in &self.status.cameras {
                                if ui.selectable_label(false, &camera.friendly_name).clicked() {
                                    actions.push(UiAction::Assign(camera.clone()));
                                }
                            }
                        });
                    if assigned.is_some() && ui.button("🔌 断开").clicked() {
                        actions.push(UiAction::Disconnect);
                    }

                    ui.separator();
                    ui.horizontal(|ui| {
                        if ui.button("Live").clicked() {
                            actions.push(UiAction::Live);
                        }
                        if ui.button("Play").clicked() {
                            actions.push(UiAction::Play);
                        }
                    });
                    ui.horizontal(|ui| {
                        if ui.button("◀").clicked() {
                            actions.push(UiAction::PanBackward);
                        }
                        if ui.button("－").clicked() {
                            actions.push(UiAction::ZoomOut);
                        }
                        if ui.button("＋").clicked() {
                            actions.push(UiAction::ZoomIn);
                        }
                        if ui.button("▶").clicked() {
                            actions.push(UiAction::PanForward);
                        }
                    });
                    ui.horizontal(|ui| match export_state {
                        ExportState::None => {
                            if ui.button("Export").clicked() {
                                actions.push(UiAction::Export);
                            }
                        }
                        ExportState::Configuring => {
                            if ui.button("Finish Export").clicked() {
                                actions.push(UiAction::FinishExport);
                            }
                            if ui.button("Cancel").clicked() {
                                actions.push(UiAction::CancelExport);
                            }
                        }
                        _ => {
                            ui.label("Exporting...");
                        }
                    });
                });

            if let Some(message) = &self.error_dialog {
                egui::Window::new("Export")
                    .collapsible(false)
                    .resizable(false)
                    .anchor(egui::Align2::CENTER_CENTER, egui::vec2(0.0, 0.0))
                    .show(egui_ctx, |ui| {
                        ui.label(message);
                        if ui.button("OK").clicked() {
                            actions.push(UiAction::DismissError);
                        }
                    });
            }
        });

        egui_macroquad::draw();

        for action in actions {
            self.apply(action);
        }
    }

    fn apply(&mut self, action: UiAction) {
        let name = self.selected_name();
        match action {
            UiAction::Layout(layout) => {
                self.host.change_layout(self.window, layout);
                let prefix = format!("{}_", self.window);
                self.tiles.retain(|name, _| !name.starts_with(&prefix));
                self.selected = 0;
            }
            UiAction::Assign(camera) => {
                let (service_host, rtsp_port) = {
                    let config = self.config.read();
                    let host = config
                        .service_addr()
                        .map(|addr| addr.host)
                        .unwrap_or_else(|| DEFAULT_SERVICE_HOST.to_string());
                    (host, config.rtsp_port)
                };
                let info = StreamInfo::for_camera(name.clone(), &service_host, rtsp_port, &camera);
                match self.host.update_stream(self.window, info) {
                    Ok(()) => {
                        info!("✅ [{}] 分配摄像头 {}", name, camera.friendly_name);
                        self.tiles.remove(&name);
                    }
                    Err(e) => warn!("⚠️ [{}] 分配失败: {:#}", name, e),
                }
            }
            UiAction::Disconnect => {
                if let Err(e) = self.host.disconnect_stream(self.window, &name) {
                    warn!("⚠️ [{}] 断开失败: {:#}", name, e);
                }
                self.tiles.remove(&name);
            }
            UiAction::DismissError => self.error_dialog = None,
            action => {
                let tile = self.tiles.entry(name.clone()).or_insert_with(Tile::new);
                apply_to_tile(&self.host, tile, &name, action);
            }
        }
    }
}

fn apply_to_tile(host: &PipelineHost, tile: &mut Tile, name: &str, action: UiAction) {
    let control = &mut tile.control;
    match action {
        UiAction::Live => {
            control.live();
            // 回放中先停下, 否则直播按钮不生效
            let end = control.timerange().end();
            host.dispatch(name, ControlBarEvent::Seek(end), control);
            host.dispatch(name, ControlBarEvent::Button(ControlBarButton::Live), control);
        }
        UiAction::Play => {
            host.dispatch(name, ControlBarEvent::Button(ControlBarButton::Play), control);
        }
        UiAction::ZoomIn => {
            if let Err(e) = control.zoom_in() {
                warn!("⚠️ [{}] 放大失败: {}", name, e);
            }
        }
        UiAction::ZoomOut => {
            if let Err(e) = control.zoom_out() {
                warn!("⚠️ [{}] 缩小失败: {}", name, e);
            }
        }
        UiAction::PanBackward => control.pan_backward(),
        UiAction::PanForward => control.pan_forward(),
        UiAction::Export => {
            control.click_export();
        }
        UiAction::FinishExport => {
            if let Some(ControlBarEvent::Export { start, end }) = control.click_finish_export() {
                tile.export = Some(host.start_export(name, start, end));
            }
        }
        UiAction::CancelExport => control.cancel_export(),
        UiAction::Layout(_) | UiAction::Assign(_) | UiAction::Disconnect | UiAction::DismissError => {}
    }
}

/// 绘制一个格子并驱动它的控制条; 导出失败时返回错误信息
fn draw_tile(
    host: &PipelineHost,
    surface: &MacroquadSurface,
    tile: &mut Tile,
    name: &str,
    rect: Rect,
    ui_blocked: bool,
) -> Option<String> {
    let video = Rect::new(rect.x, rect.y, rect.w, (rect.h - BAR_HEIGHT).max(8.0));
    let rc = host.lookup_render_context(name, video.w as u16, video.h as u16);

    for event in tile.control.enter(Utc::now()) {
        host.dispatch(name, event, &mut tile.control);
    }

    draw_rectangle(rect.x, rect.y, rect.w, rect.h, Color::new(0.08, 0.08, 0.1, 1.0));
    if let Some(rc) = rc {
        if let Some(texture) = surface.get(rc.texture) {
            // 等比居中
            let scale = (video.w / rc.width as f32).min(video.h / rc.height as f32);
            let (w, h) = (rc.width as f32 * scale, rc.height as f32 * scale);
            draw_texture_ex(
                texture,
                video.x + (video.w - w) / 2.0,
                video.y + (video.h - h) / 2.0,
                WHITE,
                DrawTextureParams {
                    dest_size: Some(vec2(w, h)),
                    ..Default::default()
                },
            );
        }
        if let Some(pts) = Utc.timestamp_millis_opt(rc.last_pts).single() {
            tile.control.follow_frame(pts, host.playing(name));
        }
    } else {
        draw_text(name, video.x + 8.0, video.y + 20.0, LABEL_SIZE, GRAY);
    }

    if let Some(event) = tile.control.tick(host.playing(name), Instant::now()) {
        host.dispatch(name, event, &mut tile.control);
    }

    // ========== 滑轨 ==========
    let track = Rect::new(rect.x + 6.0, video.y + video.h + 6.0, rect.w - 12.0, TRACK_HEIGHT);
    let (mx, my) = mouse_position();
    let pointer = ScrubPointer {
        fraction: ((mx - track.x) / track.w).clamp(0.0, 1.0),
        inside: !ui_blocked && track.contains(vec2(mx, my)),
        down: is_mouse_button_down(MouseButton::Left),
    };
    if let Some(event) = tile.control.pointer(pointer) {
        host.dispatch(name, event, &mut tile.control);
    }
    draw_track(&tile.control, track);

    if let Some(t) = tile.control.playhead_time() {
        for (i, line) in playhead_label(t).lines().enumerate() {
            draw_text(
                line,
                track.x,
                track.y + TRACK_HEIGHT + LABEL_SIZE * (i as f32 + 1.0),
                LABEL_SIZE,
                LIGHTGRAY,
            );
        }
    }

    poll_export(tile, name)
}

fn draw_track(control: &ControlBarState, track: Rect) {
    draw_rectangle(track.x, track.y, track.w, track.h, DARKGRAY);
    let range = control.timerange();

    for segment in control.segments() {
        fill_span(range, track, segment, 0.0, 1.0, SKYBLUE);
    }
    for event in control.motion_events() {
        let span = Segment {
            start: event.start,
            end: event.end,
        };
        fill_span(range, track, &span, 0.5, 0.5, ORANGE);
    }
    for event in control.analytics_events() {
        let span = Segment {
            start: event.motion_start_time,
            end: event.motion_end_time,
        };
        let x = fill_span(range, track, &span, 0.0, 0.3, RED);
        // 标注置信度最高的类别
        if let (Some(x), Some(best)) = (x, event.best_detection()) {
            draw_text(&best.class_name, x, track.y - 2.0, 14.0, RED);
        }
    }

    let x = track.x + track.w * control.playhead_pos() as f32 / PLAYHEAD_MAX as f32;
    draw_line(x, track.y - 3.0, x, track.y + track.h + 3.0, 2.0, WHITE);
}

/// 在滑轨上画出一段; `top`/`height` 为滑轨高度的比例, 返回左端x坐标
fn fill_span(
    range: Timerange,
    track: Rect,
    span: &Segment,
    top: f32,
    height: f32,
    color: Color,
) -> Option<f32> {
    if !span.overlaps(range.start(), range.end()) {
        return None;
    }
    let a = range.time_to_fraction(span.start, PLAYHEAD_MIN, PLAYHEAD_MAX)?;
    let b = range.time_to_fraction(span.end, PLAYHEAD_MIN, PLAYHEAD_MAX)?;
    let x0 = track.x + track.w * a as f32 / PLAYHEAD_MAX as f32;
    let x1 = track.x + track.w * b as f32 / PLAYHEAD_MAX as f32;
    draw_rectangle(
        x0,
        track.y + track.h * top,
        (x1 - x0).max(1.0),
        track.h * height,
        color,
    );
    Some(x0)
}

fn poll_export(tile: &mut Tile, name: &str) -> Option<String> {
    if let Some(rx) = &tile.export {
        match rx.try_recv() {
            Ok(ok) => {
                tile.control.finish_export(ok);
                tile.export = None;
            }
            Err(TryRecvError::Disconnected) => {
                tile.control.finish_export(false);
                tile.export = None;
            }
            Err(TryRecvError::Empty) => {}
        }
    }

    match tile.control.take_export_outcome()? {
        ExportOutcome::Saved => {
            match config::sub_dir("exports") {
                Ok(dir) => info!("📁 [{}] 导出完成, 保存在 {}", name, dir.display()),
                Err(e) => warn!("⚠️ [{}] 导出完成, 但无法打开导出目录: {:#}", name, e),
            }
            None
        }
        ExportOutcome::Failed(message) => Some(message.to_string()),
    }
}
