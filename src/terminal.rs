// SPDX-License-Identifier: GPL-3.0-only

//! Terminal-based scanner
//!
//! Renders the camera preview to the terminal using Unicode half-block
//! characters for improved vertical resolution, next to the list of
//! scanned results.

use crate::backends::camera::{CameraFrame, PixelFormat, VideoDevice};
use crate::config::Config;
use crate::constants::{APP_DIR_NAME, TERMINAL_LOG_FILE_NAME, ui};
use crate::errors::ScanError;
use crate::frame_processor::FrameRegion;
use crate::session::{DecodeEvent, ScanSession, SessionSnapshot, SessionStatus, Subscription};

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    buffer::Buffer,
    layout::{Constraint, Layout, Rect},
    style::{Color, Style},
    widgets::{Block, List, ListItem, Widget},
};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Write, stdout};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

/// Open (truncating) the log file used while the terminal UI owns stdout
pub fn open_log_file() -> Option<File> {
    let dir = dirs::cache_dir()?.join(APP_DIR_NAME);
    std::fs::create_dir_all(&dir).ok()?;
    File::create(dir.join(TERMINAL_LOG_FILE_NAME)).ok()
}

/// Run the terminal scanner
pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load configuration, using defaults");
        Config::default()
    });

    let rt = tokio::runtime::Runtime::new()?;
    let session = ScanSession::from_config(&config);
    let (devices, enumeration_error) = match rt.block_on(session.list_devices()) {
        Ok(devices) => (devices, None),
        Err(e) => (Vec::new(), Some(e.to_string())),
    };
    info!(count = devices.len(), "Found cameras");

    let mut app = App::new(session.clone(), rt.handle().clone(), devices, &config);
    app.message = enumeration_error;
    app.toggle_scanning();

    // Set up terminal
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run the app
    let result = run_app(&mut terminal, &mut app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    let last_device = session.active_device().or_else(|| app.selected_device().cloned());
    session.stop();

    if let Some(device) = last_device
        && config.last_device_id.as_deref() != Some(device.id.as_str())
    {
        config.last_device_id = Some(device.id);
        if let Err(e) = config.save() {
            warn!(error = %e, "Failed to remember camera");
        }
    }

    result
}

struct App {
    session: ScanSession,
    runtime: tokio::runtime::Handle,
    devices: Vec<VideoDevice>,
    device_index: usize,
    /// Newest first
    results: VecDeque<DecodeEvent>,
    decoded: mpsc::UnboundedReceiver<DecodeEvent>,
    errors: mpsc::UnboundedReceiver<ScanError>,
    preview: watch::Receiver<Option<CameraFrame>>,
    message: Option<String>,
    beep: bool,
    _subscriptions: Vec<Subscription>,
}

impl App {
    fn new(
        session: ScanSession,
        runtime: tokio::runtime::Handle,
        devices: Vec<VideoDevice>,
        config: &Config,
    ) -> Self {
        let (decoded_tx, decoded) = mpsc::unbounded_channel();
        let (errors_tx, errors) = mpsc::unbounded_channel();
        let subscriptions = vec![
            session.on_decode(move |event| {
                let _ = decoded_tx.send(event.clone());
            }),
            session.on_error(move |error| {
                let _ = errors_tx.send(error.clone());
            }),
        ];

        let device_index = config
            .last_device_id
            .as_deref()
            .and_then(|id| devices.iter().position(|d| d.id == id))
            .unwrap_or(0);

        Self {
            preview: session.preview(),
            session,
            runtime,
            devices,
            device_index,
            results: VecDeque::new(),
            decoded,
            errors,
            message: None,
            beep: config.beep_on_scan,
            _subscriptions: subscriptions,
        }
    }

    fn selected_device(&self) -> Option<&VideoDevice> {
        self.devices.get(self.device_index)
    }

    fn toggle_scanning(&mut self) {
        match self.session.status() {
            SessionStatus::Active | SessionStatus::Requesting => self.session.stop(),
            _ => {
                self.message = None;
                let session = self.session.clone();
                let device_id = self.selected_device().map(|d| d.id.clone());
                self.runtime.spawn(async move {
                    // Failures arrive through the error subscription
                    let _ = session.start(device_id.as_deref()).await;
                });
            }
        }
    }

    fn next_device(&mut self) {
        if self.devices.len() <= 1 {
            return;
        }
        self.device_index = (self.device_index + 1) % self.devices.len();
        let device = self.devices[self.device_index].clone();

        if self.session.status().can_switch() {
            let session = self.session.clone();
            self.runtime.spawn(async move {
                let _ = session.switch_device(&device.id).await;
            });
        } else {
            self.message = Some(format!("Next start uses {}", device.display_name()));
        }
    }

    /// Pull session events into UI state; returns the number of new results
    fn drain_events(&mut self) -> usize {
        let mut new_results = 0;
        while let Ok(event) = self.decoded.try_recv() {
            self.results.push_front(event);
            new_results += 1;
        }
        self.results.truncate(ui::MAX_RESULTS);

        while let Ok(error) = self.errors.try_recv() {
            self.message = Some(error.to_string());
        }
        new_results
    }

    /// Follow the device the session actually opened (it may have fallen back)
    fn sync_device(&mut self, snapshot: &SessionSnapshot) {
        if let Some(active) = &snapshot.device
            && let Some(index) = self.devices.iter().position(|d| d.id == active.id)
        {
            self.device_index = index;
        }
    }
}

fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
) -> Result<(), Box<dyn std::error::Error>> {
    loop {
        if app.drain_events() > 0 && app.beep {
            // Audible cue per scan
            terminal.backend_mut().write_all(b"\x07")?;
            terminal.backend_mut().flush()?;
        }

        let snapshot = app.session.snapshot();
        app.sync_device(&snapshot);

        let frame_widget = FrameWidget {
            frame: app.preview.borrow().clone(),
            // Mark the last symbol while its cooldown runs
            region: if snapshot.cooldown_active {
                app.results.front().and_then(|e| e.region.clone())
            } else {
                None
            },
        };

        terminal.draw(|f| draw(f, app, &snapshot, &frame_widget))?;

        // Handle input with timeout for frame updates
        if event::poll(ui::TICK)?
            && let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
        {
            // Ctrl+C to quit
            if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
                break;
            }

            match key.code {
                KeyCode::Char('q') => break,
                KeyCode::Char('s') => app.toggle_scanning(),
                KeyCode::Char('d') => app.next_device(),
                KeyCode::Char('c') => app.results.clear(),
                _ => {}
            }
        }
    }

    Ok(())
}

fn draw(f: &mut Frame, app: &App, snapshot: &SessionSnapshot, frame_widget: &FrameWidget) {
    let rows = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(1),
        Constraint::Length(1),
    ])
    .split(f.area());
    let columns = Layout::horizontal([
        Constraint::Min(1),
        Constraint::Length(ui::RESULTS_PANEL_WIDTH),
    ])
    .split(rows[1]);

    let status = StatusBar {
        message: &build_status_line(snapshot, app.message.as_deref()),
        background: status_color(snapshot.status),
    };
    f.render_widget(status, rows[0]);
    f.render_widget(frame_widget, columns[0]);

    let mut panel = columns[1];
    // Device list only matters when there is something to switch to
    if app.devices.len() > 1 {
        let height = (app.devices.len() as u16 + 2).min(panel.height / 2);
        let parts = Layout::vertical([Constraint::Length(height), Constraint::Min(0)]).split(panel);
        let items: Vec<ListItem> = app
            .devices
            .iter()
            .enumerate()
            .map(|(i, device)| {
                let marker = if i == app.device_index { "> " } else { "  " };
                ListItem::new(format!("{}{}", marker, device.display_name()))
            })
            .collect();
        f.render_widget(List::new(items).block(Block::bordered().title("Cameras")), parts[0]);
        panel = parts[1];
    }

    let items: Vec<ListItem> = app
        .results
        .iter()
        .map(|event| {
            ListItem::new(format!(
                "{} {}",
                event.detected_at.format("%H:%M:%S"),
                event.payload
            ))
        })
        .collect();
    let title = format!("Results ({})", app.results.len());
    f.render_widget(List::new(items).block(Block::bordered().title(title)), panel);

    let help = StatusBar {
        message: &build_help_message(app.devices.len() > 1),
        background: Color::DarkGray,
    };
    f.render_widget(help, rows[2]);
}

fn build_status_line(snapshot: &SessionSnapshot, message: Option<&str>) -> String {
    let device = snapshot
        .device
        .as_ref()
        .map(|d| d.display_name())
        .unwrap_or_else(|| "no camera".to_string());
    let mut line = format!(
        " {} | {} | scans: {}",
        snapshot.status, device, snapshot.stats.forwarded
    );
    if snapshot.cooldown_active {
        line.push_str(" | cooldown");
    }
    if let Some(message) = message {
        line.push_str(" | ");
        line.push_str(message);
    }
    line
}

fn build_help_message(multi_camera: bool) -> String {
    let mut msg = String::from(" s: Start/stop | ");
    if multi_camera {
        msg.push_str("d: Next camera | ");
    }
    msg.push_str("c: Clear results | q/Ctrl+C: Quit");
    msg
}

fn status_color(status: SessionStatus) -> Color {
    match status {
        SessionStatus::Active => Color::Green,
        SessionStatus::Requesting => Color::Yellow,
        SessionStatus::Errored => Color::Red,
        SessionStatus::Idle | SessionStatus::Stopped => Color::DarkGray,
    }
}

/// Widget that renders a camera frame using half-block characters
struct FrameWidget {
    frame: Option<CameraFrame>,
    /// Outlined in the preview when set
    region: Option<FrameRegion>,
}

impl Widget for &FrameWidget {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let Some(frame) = self.frame.as_ref().filter(|f| f.is_complete()) else {
            // No frame yet - show placeholder
            let msg = "Camera off";
            let x = area.x + (area.width.saturating_sub(msg.len() as u16)) / 2;
            let y = area.y + area.height / 2;
            if y < area.y + area.height && x < area.x + area.width {
                buf.set_string(x, y, msg, Style::default());
            }
            return;
        };

        let (display_width, display_height) = fit_frame(frame.width, frame.height, area.width, area.height);
        if display_width == 0 || display_height == 0 {
            return;
        }

        // Center the image
        let x_offset = area.x + (area.width.saturating_sub(display_width)) / 2;
        let y_offset = area.y + (area.height.saturating_sub(display_height)) / 2;

        // Scale factors
        let x_scale = frame.width as f64 / display_width as f64;
        let y_scale = frame.height as f64 / (display_height * 2) as f64;

        // Each terminal cell represents 2 vertical pixels:
        // - Upper half (▀) colored with fg
        // - Lower half colored with bg
        for ty in 0..display_height {
            for tx in 0..display_width {
                let src_x = (tx as f64 * x_scale) as u32;
                let src_y_top = (ty as f64 * 2.0 * y_scale) as u32;
                let src_y_bottom = ((ty as f64 * 2.0 + 1.0) * y_scale) as u32;

                let top = sample_luma(frame, src_x, src_y_top);
                let bottom = sample_luma(frame, src_x, src_y_bottom);

                if let Some(cell) = buf.cell_mut((x_offset + tx, y_offset + ty)) {
                    cell.set_char('▀');
                    cell.set_fg(Color::Rgb(top, top, top));
                    cell.set_bg(Color::Rgb(bottom, bottom, bottom));
                }
            }
        }

        if let Some(region) = &self.region {
            let left = x_offset + (region.x * display_width as f32) as u16;
            let top = y_offset + (region.y * display_height as f32) as u16;
            let right = x_offset + ((region.x + region.width) * display_width as f32) as u16;
            let bottom = y_offset + ((region.y + region.height) * display_height as f32) as u16;
            let right = right.min(x_offset + display_width - 1);
            let bottom = bottom.min(y_offset + display_height - 1);

            for x in left..=right {
                for y in [top, bottom] {
                    mark_cell(buf, x, y);
                }
            }
            for y in top..=bottom {
                for x in [left, right] {
                    mark_cell(buf, x, y);
                }
            }
        }
    }
}

fn mark_cell(buf: &mut Buffer, x: u16, y: u16) {
    if let Some(cell) = buf.cell_mut((x, y)) {
        cell.set_fg(Color::Green);
        cell.set_bg(Color::Green);
    }
}

/// Largest size (in cells) that fits `area` and keeps the frame's aspect ratio
///
/// Each cell is two pixels tall.
fn fit_frame(frame_width: u32, frame_height: u32, area_width: u16, area_height: u16) -> (u16, u16) {
    if frame_width == 0 || frame_height == 0 {
        return (0, 0);
    }
    let frame_aspect = frame_width as f64 / frame_height as f64;
    let term_width = area_width as f64;
    let term_height = (area_height as f64) * 2.0;

    if term_width / term_height > frame_aspect {
        // Terminal is wider - fit to height
        let w = term_height * frame_aspect;
        (w as u16, area_height)
    } else {
        // Terminal is taller - fit to width
        let h = term_width / frame_aspect;
        (area_width, (h / 2.0) as u16)
    }
}

fn sample_luma(frame: &CameraFrame, x: u32, y: u32) -> u8 {
    let x = x.min(frame.width - 1);
    let y = y.min(frame.height - 1);
    let data = &frame.data;

    let idx = match frame.format {
        PixelFormat::Gray8 => (y * frame.stride + x) as usize,
        // Y0 U Y1 V: luma sits on every even byte
        PixelFormat::YUYV => (y * frame.stride + x * 2) as usize,
        PixelFormat::RGBA => {
            let idx = (y * frame.stride + x * 4) as usize;
            return match data.get(idx..idx + 3) {
                Some(px) => {
                    (0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32) as u8
                }
                None => 0,
            };
        }
    };
    data.get(idx).copied().unwrap_or(0)
}

/// Status bar widget
struct StatusBar<'a> {
    message: &'a str,
    background: Color,
}

impl Widget for StatusBar<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let style = Style::default().fg(Color::White).bg(self.background);

        // Fill background
        for x in area.x..area.x + area.width {
            if let Some(cell) = buf.cell_mut((x, area.y)) {
                cell.set_char(' ');
                cell.set_bg(self.background);
            }
        }

        let text: String = self.message.chars().take(area.width as usize).collect();
        buf.set_string(area.x, area.y, text, style);
    }
}
