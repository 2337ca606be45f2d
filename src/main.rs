use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use crossbeam_channel::Receiver;
use eframe::egui;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use screenrec::controller::{ControllerConfig, ControllerHandle, ControllerSnapshot, ReloadPolicy, SessionController};
use screenrec::countdown::CountdownConfig;
use screenrec::delivery::{Delivered, DownloadDir};
use screenrec::ffmpeg::{find_ffmpeg, FfmpegCaptureSurface, FfmpegEngine};
use screenrec::session::SessionStatus;
use screenrec::settings::{JsonSettingsStore, ResolutionTier, Settings, SettingsStore};
use screenrec::shortcut::{KeyPress, ShortcutListener};
use screenrec::transcode::{FormatId, TranscodePipeline};

#[derive(Parser, Debug)]
#[command(name = "screenrec", about = "Record the screen after a countdown and export it in several formats")]
struct Args {
    /// Settings file (defaults to the user config dir)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Folder finished recordings are saved to (defaults to Downloads)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// ffmpeg binary; looked up on PATH and common install locations when omitted
    #[arg(long)]
    ffmpeg: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = ReloadPolicy::EveryReset)]
    reload_policy: ReloadPolicy,

    /// Duration of one countdown step in milliseconds
    #[arg(long, default_value_t = 1000)]
    countdown_ms: u64,

    #[arg(long, default_value_t = 30)]
    fps: u32,
}

// Application state
struct AppState {
    handle: ControllerHandle,
    shortcuts: Arc<Mutex<ShortcutListener>>,
    store: Arc<dyn SettingsStore>,
    deliveries: Receiver<Delivered>,
    download_dir: Arc<Mutex<PathBuf>>,
    ffmpeg_found: bool,
    show_options: bool,
    draft: Settings,
    last_number: u32,
    status: String,
}

impl AppState {
    fn forward_key_presses(&self, ctx: &egui::Context) {
        let presses: Vec<KeyPress> = ctx.input(|i| {
            i.events
                .iter()
                .filter_map(|event| match event {
                    egui::Event::Key { key, pressed: true, repeat: false, modifiers, .. } => Some(KeyPress {
                        ctrl: modifiers.ctrl,
                        shift: modifiers.shift,
                        key: key.name().to_string(),
                    }),
                    _ => None,
                })
                .collect()
        });
        if presses.is_empty() {
            return;
        }
        let shortcuts = self.shortcuts.lock();
        for press in &presses {
            shortcuts.handle(press, &self.handle);
        }
    }

    fn drain_deliveries(&mut self) {
        for delivered in self.deliveries.try_iter() {
            self.status = format!("Saved {} ({} KB)", delivered.path.display(), delivered.size / 1024);
        }
    }

    fn open_options(&mut self, snapshot: &ControllerSnapshot) {
        self.draft = match self.store.load() {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Failed to load settings for editing: {}", e);
                snapshot.settings.clone()
            }
        };
        self.show_options = true;
    }

    fn render_controls(&mut self, ui: &mut egui::Ui, snapshot: &ControllerSnapshot) {
        ui.horizontal(|ui| {
            if ui.add_enabled(snapshot.controls.start_enabled, egui::Button::new("⏺ Start")).clicked() {
                self.handle.start();
            }
            if ui.add_enabled(snapshot.controls.stop_enabled, egui::Button::new("⏹ Stop")).clicked() {
                self.handle.stop();
            }
            ui.separator();
            if ui.button("⚙ Options").clicked() {
                self.open_options(snapshot);
            }
            if !self.ffmpeg_found {
                ui.colored_label(egui::Color32::RED, "⚠ ffmpeg not found");
            }
        });

        ui.add_space(8.0);

        ui.horizontal(|ui| {
            match snapshot.status {
                SessionStatus::Recording => {
                    ui.colored_label(egui::Color32::GREEN, "● REC");
                    ui.label(egui::RichText::new(format!("{} KB", snapshot.buffered_bytes / 1024)).monospace());
                }
                SessionStatus::Starting | SessionStatus::Stopping | SessionStatus::Transcoding => {
                    ui.spinner();
                    ui.colored_label(egui::Color32::YELLOW, snapshot.status.label());
                }
                status => {
                    ui.label(status.label());
                }
            }
        });

        ui.label(
            egui::RichText::new(format!(
                "Start: {}   Stop: {}",
                snapshot.settings.start_shortcut, snapshot.settings.stop_shortcut
            ))
            .small()
            .color(ui.style().visuals.weak_text_color()),
        );

        if let Some(error) = &snapshot.last_error {
            ui.colored_label(egui::Color32::RED, error);
        }

        if let Some(summary) = &snapshot.last_summary {
            ui.separator();
            ui.label(format!("Last recording: {} KB", summary.raw_bytes / 1024));
            for format in &summary.report.delivered {
                ui.label(format!("✔ {}", format.output_name()));
            }
            for (format, reason) in &summary.report.failed {
                ui.colored_label(egui::Color32::RED, format!("✘ {}: {}", format, reason));
            }
            for format in &summary.report.skipped {
                ui.colored_label(egui::Color32::YELLOW, format!("skipped {}", format));
            }
        }
    }

    fn render_countdown(&mut self, ctx: &egui::Context, snapshot: &ControllerSnapshot) {
        let id = egui::Id::new("countdown_overlay");
        if let Some(n) = snapshot.countdown.filter(|n| *n > 0) {
            self.last_number = n;
        }
        // the last number fades out once the countdown reaches zero
        let opacity = ctx.animate_bool_with_time(id, matches!(snapshot.countdown, Some(n) if n > 0), 0.5);
        if opacity <= 0.0 || self.last_number == 0 {
            return;
        }
        egui::Area::new(id)
            .anchor(egui::Align2::CENTER_CENTER, egui::Vec2::ZERO)
            .interactable(false)
            .show(ctx, |ui| {
                ui.label(
                    egui::RichText::new(self.last_number.to_string())
                        .size(96.0)
                        .strong()
                        .color(egui::Color32::WHITE.gamma_multiply(opacity)),
                );
            });
    }

    fn render_options(&mut self, ui: &mut egui::Ui) {
        egui::ComboBox::from_label("Resolution")
            .selected_text(self.draft.resolution_tier.label())
            .show_ui(ui, |ui| {
                for tier in ResolutionTier::ALL {
                    ui.selectable_value(&mut self.draft.resolution_tier, tier, tier.label());
                }
            });

        ui.checkbox(&mut self.draft.record_audio, "Record audio");

        ui.horizontal(|ui| {
            ui.label("Formats:");
            for format in FormatId::ALL {
                let mut selected = self.draft.output_formats.contains(&format);
                if ui.checkbox(&mut selected, format.extension()).changed() {
                    if selected {
                        self.draft.output_formats.push(format);
                    } else {
                        self.draft.output_formats.retain(|f| *f != format);
                    }
                }
            }
        });

        egui::Grid::new("shortcuts").num_columns(2).show(ui, |ui| {
            ui.label("Start shortcut:");
            ui.text_edit_singleline(&mut self.draft.start_shortcut);
            ui.end_row();
            ui.label("Stop shortcut:");
            ui.text_edit_singleline(&mut self.draft.stop_shortcut);
            ui.end_row();
        });

        ui.horizontal(|ui| {
            ui.label("📂");
            let current = self.download_dir.lock().clone();
            ui.label(egui::RichText::new(current.display().to_string()).small());
            if ui.small_button("Change…").clicked() {
                if let Some(path) = rfd::FileDialog::new().set_directory(&current).pick_folder() {
                    info!("Download folder set to {}", path.display());
                    *self.download_dir.lock() = path;
                }
            }
        });

        ui.add_space(8.0);
        if ui.button("Save").clicked() {
            match self.store.save(&self.draft) {
                Ok(()) => {
                    self.status = "Options saved".to_string();
                    self.show_options = false;
                }
                Err(e) => {
                    error!("Failed to save settings: {}", e);
                    self.status = format!("Failed to save options: {}", e);
                }
            }
        }
    }
}

impl eframe::App for AppState {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let snapshot = self.handle.snapshot();
        self.drain_deliveries();
        self.forward_key_presses(ctx);

        // Keep the REC counter and overlay moving while a session is active
        if snapshot.session.is_some() {
            ctx.request_repaint_after(Duration::from_millis(50));
        }

        egui::CentralPanel::default().show(ctx, |ui| {
            self.render_controls(ui, &snapshot);
        });

        if self.show_options {
            let mut open = true;
            egui::Window::new("Options")
                .open(&mut open)
                .collapsible(false)
                .resizable(false)
                .show(ctx, |ui| self.render_options(ui));
            self.show_options &= open;
        }

        self.render_countdown(ctx, &snapshot);

        // Footer with status
        egui::TopBottomPanel::bottom("footer").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.label(egui::RichText::new(&self.status).small());
            });
        });
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .without_time()
        .init();

    let args = Args::parse();

    let ffmpeg_found_at = args.ffmpeg.clone().or_else(find_ffmpeg);
    if ffmpeg_found_at.is_none() {
        warn!("ffmpeg not found; install it or pass --ffmpeg");
    }
    let ffmpeg = ffmpeg_found_at.clone().unwrap_or_else(|| PathBuf::from("ffmpeg"));

    let settings_path = args.settings.clone().unwrap_or_else(JsonSettingsStore::default_path);
    info!("Settings file: {}", settings_path.display());
    let store: Arc<dyn SettingsStore> = Arc::new(JsonSettingsStore::new(settings_path));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let (delivered_tx, deliveries) = crossbeam_channel::unbounded();
    let sink = DownloadDir::new(args.output_dir.clone().unwrap_or_else(DownloadDir::default_dir))
        .with_notifier(delivered_tx);
    let download_dir = sink.shared_dir();

    let unit = Duration::from_millis(args.countdown_ms);
    let config = ControllerConfig {
        countdown: CountdownConfig { unit, fade: unit / 2, ..CountdownConfig::default() },
        reload_policy: args.reload_policy,
    };
    let surface = FfmpegCaptureSurface::new(ffmpeg.clone()).with_fps(args.fps);
    let pipeline = TranscodePipeline::new(Box::new(FfmpegEngine::new(ffmpeg)));
    let (controller, handle) =
        SessionController::new(store.clone(), Box::new(surface), pipeline, Box::new(sink), config);
    let shortcuts = controller.shortcuts();
    let controller_task = runtime.spawn(controller.run());

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default().with_inner_size([440.0, 280.0]),
        ..Default::default()
    };
    let app_handle = handle.clone();
    let runtime_handle = runtime.handle().clone();
    let res = eframe::run_native(
        "Screen Recorder",
        native_options,
        Box::new(move |cc| {
            // Repaint whenever the controller publishes, not only on input
            let ctx = cc.egui_ctx.clone();
            let mut updates = app_handle.subscribe();
            runtime_handle.spawn(async move {
                while updates.changed().await.is_ok() {
                    ctx.request_repaint();
                }
            });

            let draft = app_handle.snapshot().settings;
            Ok(Box::new(AppState {
                handle: app_handle,
                shortcuts,
                store,
                deliveries,
                download_dir,
                ffmpeg_found: ffmpeg_found_at.is_some(),
                show_options: false,
                draft,
                last_number: 0,
                status: String::new(),
            }))
        }),
    );

    handle.shutdown();
    if let Err(e) = runtime.block_on(controller_task) {
        error!("Session controller task failed: {}", e);
    }

    match res {
        Ok(_) => Ok(()),
        Err(e) => Err(anyhow::anyhow!("eframe error: {}", e)),
    }
}
