use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread;

use anyhow::Result;
use eframe::egui::{
    self, ColorImage, ResizeDirection, Sense, TextureHandle, TextureOptions, ViewportCommand,
};
use indexmap::IndexMap;

use crate::ai_analysis::{
    spawn_analysis, AiAnalysis, AiAnalysisStore, AnalysisRequest, Detector, MockDetector,
};
use crate::dicom::{decode_first_frame, DecodedImage};
use crate::favorites::{FavoriteImage, Favorites};
use crate::format::{
    format_dicom_date, format_dicom_time, format_patient_name, format_series_description,
    mask_personal,
};
use crate::ingest::load_inputs;
use crate::launch::LaunchRequest;
use crate::recent::{NewRecentStudy, RecentStudies};
use crate::renderer::{downsample_color_image, orient_color_image, render_image};
use crate::settings::{
    ScrollDirection, SettingsStore, Theme, UserSettings, WINDOW_LEVEL_SENSITIVITY_RANGE,
    ZOOM_SENSITIVITY_RANGE,
};
use crate::storage::Storage;
use crate::study::{Instance, Study};
use crate::study_cache::{cache_key, StudyCache};
use crate::viewer::ViewerSession;
use crate::viewport::{
    apply_window_level_drag, zoom_factor_from_scroll, ActiveTool, Rotation,
};
use crate::windowing::{WindowLevel, WINDOW_PRESETS};

const APP_TITLE: &str = "OpenScans Viewer";
const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
const DECODED_CACHE_CAPACITY: usize = 32;
const THUMB_MAX_DIM: usize = 96;
const THUMB_DRAW_DIM: f32 = 64.0;

struct IngestResult {
    key: String,
    inputs: Vec<PathBuf>,
    studies: Vec<Study>,
}

type ThumbnailUpdate = (PathBuf, Option<ColorImage>);

/// Inputs that decide what the main texture looks like.
#[derive(Debug, Clone, PartialEq)]
struct RenderKey {
    path: PathBuf,
    window: WindowLevel,
    invert: bool,
    rotation: Rotation,
    flip_horizontal: bool,
    flip_vertical: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrawerTab {
    Studies,
    Recent,
    Favorites,
}

/// Everything the UI can ask for in one frame. Collected while drawing and
/// applied afterwards, so drawing code only needs shared borrows.
#[derive(Debug, Clone, PartialEq)]
enum UiAction {
    OpenFiles,
    OpenFolder,
    OpenPaths(Vec<PathBuf>),
    CloseStudies,
    SelectStudy(usize),
    SelectSeries(usize),
    SelectInstance(usize),
    StepInstance(i32),
    SetWindowLevel(WindowLevel),
    ApplyPreset(usize),
    ResetWindowLevel,
    ResetViewport,
    ZoomBy(f32),
    RotateClockwise,
    RotateCounterClockwise,
    FlipHorizontal,
    FlipVertical,
    Invert,
    SetTool(ActiveTool),
    ToggleAnnotations,
    ToggleMetadata,
    ToggleFavorite,
    OpenFavorite(usize),
    RemoveFavorite(String),
    ClearFavorites,
    OpenRecent(usize),
    RemoveRecent(String),
    ClearRecent,
    Analyze,
    ShowAnalysis(String),
    HideAnalysis,
    DeleteAnalysis(String),
    ToggleDrawer,
    ShowSettings,
}

/// Small LRU of decoded frames keyed by file path.
#[derive(Default)]
struct DecodedCache {
    entries: IndexMap<PathBuf, Arc<DecodedImage>>,
}

impl DecodedCache {
    fn get(&mut self, path: &PathBuf) -> Option<Arc<DecodedImage>> {
        let image = self.entries.shift_remove(path)?;
        self.entries.insert(path.clone(), Arc::clone(&image));
        Some(image)
    }

    fn peek(&self, path: &PathBuf) -> Option<&Arc<DecodedImage>> {
        self.entries.get(path)
    }

    fn insert(&mut self, path: PathBuf, image: Arc<DecodedImage>) {
        self.entries.shift_remove(&path);
        self.entries.insert(path, image);
        while self.entries.len() > DECODED_CACHE_CAPACITY {
            self.entries.shift_remove_index(0);
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

pub struct OpenScansApp {
    session: ViewerSession,
    settings: SettingsStore,
    recent: RecentStudies,
    favorites: Favorites,
    ai: AiAnalysisStore,
    detector: Arc<dyn Detector>,
    study_cache: StudyCache,
    decoded: DecodedCache,
    texture: Option<TextureHandle>,
    texture_key: Option<RenderKey>,
    thumbnails: HashMap<PathBuf, Option<TextureHandle>>,
    /// (study, series) indices the strip was last filled for.
    thumbnail_series: Option<(usize, usize)>,
    thumbnail_receiver: Option<Receiver<ThumbnailUpdate>>,
    ingest_receiver: Option<Receiver<Result<IngestResult, String>>>,
    ai_receiver: Option<Receiver<Result<AiAnalysis, String>>>,
    loaded_inputs: Vec<PathBuf>,
    pending_focus_sop: Option<String>,
    pending_launch_request: Option<LaunchRequest>,
    drawer_open: bool,
    drawer_tab: DrawerTab,
    settings_open: bool,
    status_line: String,
}

impl Default for OpenScansApp {
    fn default() -> Self {
        Self::new(Storage::disabled(), None, None)
    }
}

impl OpenScansApp {
    pub fn new(
        storage: Storage,
        initial_request: Option<LaunchRequest>,
        initial_status: Option<String>,
    ) -> Self {
        let settings = SettingsStore::load(storage.clone());
        let persist = settings.get().persist_studies;
        Self {
            session: ViewerSession::default(),
            recent: RecentStudies::load(storage.clone(), persist),
            favorites: Favorites::load(storage),
            settings,
            ai: AiAnalysisStore::default(),
            detector: Arc::new(MockDetector::default()),
            study_cache: StudyCache::default(),
            decoded: DecodedCache::default(),
            texture: None,
            texture_key: None,
            thumbnails: HashMap::new(),
            thumbnail_series: None,
            thumbnail_receiver: None,
            ingest_receiver: None,
            ai_receiver: None,
            loaded_inputs: Vec::new(),
            pending_focus_sop: None,
            pending_launch_request: initial_request,
            drawer_open: true,
            drawer_tab: DrawerTab::Studies,
            settings_open: false,
            status_line: initial_status.unwrap_or_default(),
        }
    }

    fn apply_theme(&self, ctx: &egui::Context) {
        match self.settings.get().theme {
            Theme::Dark => Self::apply_black_background(ctx),
            Theme::Light => ctx.set_visuals(egui::Visuals::light()),
        }
    }

    fn apply_black_background(ctx: &egui::Context) {
        let mut visuals = egui::Visuals::dark();
        let line_base = egui::Color32::from_gray(28);
        let line_hover = egui::Color32::from_gray(42);
        let line_active = egui::Color32::from_gray(56);

        visuals.panel_fill = egui::Color32::BLACK;
        visuals.window_fill = egui::Color32::from_gray(8);
        visuals.faint_bg_color = egui::Color32::BLACK;
        visuals.extreme_bg_color = egui::Color32::BLACK;
        visuals.window_stroke = egui::Stroke::new(1.0, line_base);
        visuals.widgets.noninteractive.bg_stroke = egui::Stroke::new(1.0, line_base);
        visuals.widgets.inactive.bg_stroke = egui::Stroke::new(1.0, line_base);
        visuals.widgets.hovered.bg_stroke = egui::Stroke::new(1.0, line_hover);
        visuals.widgets.active.bg_stroke = egui::Stroke::new(1.0, line_active);
        visuals.widgets.open.bg_stroke = egui::Stroke::new(1.0, line_base);
        ctx.set_visuals(visuals);
    }

    fn is_loading(&self) -> bool {
        self.ingest_receiver.is_some()
    }

    fn hide_personal(&self) -> bool {
        self.settings.get().hide_personal_info
    }

    fn handle_launch_request(&mut self, request: LaunchRequest) {
        match request {
            LaunchRequest::OpenPaths(paths) => self.start_ingest(paths),
            LaunchRequest::ShowHelp => self.status_line = crate::launch::USAGE.to_string(),
            LaunchRequest::ShowVersion => {
                self.status_line = format!("{APP_TITLE} v{APP_VERSION}");
            }
        }
    }

    fn open_files_dialog(&mut self) {
        if let Some(paths) = rfd::FileDialog::new()
            .set_title("Open DICOM files")
            .pick_files()
        {
            self.start_ingest(paths);
        }
    }

    fn open_folder_dialog(&mut self) {
        if let Some(folder) = rfd::FileDialog::new()
            .set_title("Open DICOM folder")
            .pick_folder()
        {
            self.start_ingest(vec![folder]);
        }
    }

    fn start_ingest(&mut self, inputs: Vec<PathBuf>) {
        if inputs.is_empty() {
            return;
        }
        let key = cache_key(&inputs);
        if let Some(studies) = self.study_cache.get(&key) {
            log::info!("Reusing cached studies for {key}");
            let studies = studies.to_vec();
            self.finish_ingest(IngestResult {
                key,
                inputs,
                studies,
            });
            return;
        }

        self.status_line = "Loading DICOM files...".to_string();
        let (tx, rx) = mpsc::channel::<Result<IngestResult, String>>();
        thread::spawn(move || {
            let result = load_inputs(&inputs)
                .map(|studies| IngestResult {
                    key,
                    inputs,
                    studies,
                })
                .map_err(|err| format!("{err:#}"));
            let _ = tx.send(result);
        });
        self.ingest_receiver = Some(rx);
    }

    fn poll_ingest(&mut self, ctx: &egui::Context) {
        let Some(receiver) = self.ingest_receiver.as_ref() else {
            return;
        };
        match receiver.try_recv() {
            Ok(Ok(result)) => {
                self.ingest_receiver = None;
                self.study_cache
                    .insert(result.key.clone(), result.studies.clone());
                self.finish_ingest(result);
            }
            Ok(Err(err)) => {
                self.ingest_receiver = None;
                log::warn!("Load failed: {err}");
                self.status_line = format!("Error loading files: {err}");
                self.pending_focus_sop = None;
            }
            Err(TryRecvError::Empty) => ctx.request_repaint(),
            Err(TryRecvError::Disconnected) => {
                self.ingest_receiver = None;
                self.status_line = "Loader stopped unexpectedly.".to_string();
            }
        }
    }

    fn finish_ingest(&mut self, result: IngestResult) {
        let IngestResult {
            inputs, studies, ..
        } = result;
        for study in studies.iter().rev() {
            self.recent.add(NewRecentStudy::from_study(study, &inputs));
        }

        let instance_count: usize = studies.iter().map(Study::instance_count).sum();
        self.status_line = format!(
            "Loaded {} stud{}, {} images.",
            studies.len(),
            if studies.len() == 1 { "y" } else { "ies" },
            instance_count
        );
        self.loaded_inputs = inputs;
        self.ai.reset();
        self.ai_receiver = None;
        self.decoded.clear();
        self.reset_textures();
        self.session.load_studies(studies);

        if let Some(sop) = self.pending_focus_sop.take() {
            if !self.session.select_by_sop_uid(&sop) {
                self.status_line = format!("Image {sop} was not found in the reopened files.");
            }
        }
    }

    fn close_studies(&mut self) {
        self.session.clear();
        self.loaded_inputs.clear();
        self.ai.reset();
        self.ai_receiver = None;
        self.decoded.clear();
        self.reset_textures();
        self.status_line.clear();
    }

    fn reset_textures(&mut self) {
        self.texture = None;
        self.texture_key = None;
        self.thumbnails.clear();
        self.thumbnail_series = None;
        self.thumbnail_receiver = None;
    }

    fn decoded_image(&mut self, path: &PathBuf) -> Result<Arc<DecodedImage>> {
        if let Some(image) = self.decoded.get(path) {
            return Ok(image);
        }
        let image = Arc::new(decode_first_frame(path)?);
        self.decoded.insert(path.clone(), Arc::clone(&image));
        Ok(image)
    }

    fn current_render_key(&self) -> Option<RenderKey> {
        let instance = self.session.current_instance()?;
        let viewport = &self.session.viewport;
        Some(RenderKey {
            path: instance.path.clone(),
            window: self.session.active_window(),
            invert: viewport.invert,
            rotation: viewport.rotation,
            flip_horizontal: viewport.flip_horizontal,
            flip_vertical: viewport.flip_vertical,
        })
    }

    fn sync_main_texture(&mut self, ctx: &egui::Context) {
        let Some(key) = self.current_render_key() else {
            self.texture = None;
            self.texture_key = None;
            return;
        };
        if self.texture_key.as_ref() == Some(&key) {
            return;
        }

        let image = match self.decoded_image(&key.path) {
            Ok(image) => image,
            Err(err) => {
                log::warn!("Could not decode {}: {err:#}", key.path.display());
                self.status_line = format!("Error decoding {}: {err:#}", key.path.display());
                self.texture = None;
                self.texture_key = Some(key);
                return;
            }
        };

        let color_image = orient_color_image(
            render_image(&image, key.window, key.invert),
            key.rotation,
            key.flip_horizontal,
            key.flip_vertical,
        );
        if let Some(texture) = self.texture.as_mut() {
            texture.set(color_image, TextureOptions::LINEAR);
        } else {
            self.texture =
                Some(ctx.load_texture("dicom-image", color_image, TextureOptions::LINEAR));
        }
        self.texture_key = Some(key);
    }

    /// Decodes thumbnails for the current series on a background thread.
    fn sync_thumbnails(&mut self) {
        let (Some(selection), Some(series)) =
            (self.session.selection(), self.session.current_series())
        else {
            return;
        };
        let series_key = (selection.study, selection.series);
        if self.thumbnail_series == Some(series_key) {
            return;
        }

        let jobs = series
            .instances
            .iter()
            .filter(|instance| !self.thumbnails.contains_key(&instance.path))
            .map(|instance| (instance.path.clone(), instance.effective_window()))
            .collect::<Vec<_>>();
        self.thumbnail_series = Some(series_key);
        if jobs.is_empty() {
            self.thumbnail_receiver = None;
            return;
        }

        let (tx, rx) = mpsc::channel::<ThumbnailUpdate>();
        thread::spawn(move || {
            for (path, window) in jobs {
                let thumb = match decode_first_frame(&path) {
                    Ok(image) => Some(downsample_color_image(
                        &render_image(&image, window, false),
                        THUMB_MAX_DIM,
                    )),
                    Err(err) => {
                        log::debug!("No thumbnail for {}: {err:#}", path.display());
                        None
                    }
                };
                if tx.send((path, thumb)).is_err() {
                    break;
                }
            }
        });
        self.thumbnail_receiver = Some(rx);
    }

    fn poll_thumbnails(&mut self, ctx: &egui::Context) {
        let Some(receiver) = self.thumbnail_receiver.as_ref() else {
            return;
        };
        let mut finished = false;
        let mut received = Vec::new();
        loop {
            match receiver.try_recv() {
                Ok(update) => received.push(update),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    finished = true;
                    break;
                }
            }
        }
        for (path, image) in received {
            let texture = image.map(|image| {
                ctx.load_texture(
                    format!("thumb-{}", path.display()),
                    image,
                    TextureOptions::LINEAR,
                )
            });
            self.thumbnails.insert(path, texture);
        }
        if finished {
            self.thumbnail_receiver = None;
        } else {
            ctx.request_repaint();
        }
    }

    fn start_analysis(&mut self) {
        if self.ai.is_analyzing() {
            return;
        }
        let Some(instance) = self.session.current_instance() else {
            return;
        };
        log::info!("Running {} on {}", self.detector.name(), instance.sop_instance_uid);
        let request = AnalysisRequest::for_instance(instance);
        self.ai.delete_for_instance(&request.sop_instance_uid);
        self.ai.set_analyzing(true);
        self.ai_receiver = Some(spawn_analysis(Arc::clone(&self.detector), request));
    }

    fn poll_analysis(&mut self, ctx: &egui::Context) {
        let Some(receiver) = self.ai_receiver.as_ref() else {
            return;
        };
        match receiver.try_recv() {
            Ok(result) => {
                self.ai_receiver = None;
                self.ai.set_analyzing(false);
                match result {
                    Ok(analysis) => self.ai.add(analysis),
                    Err(err) => self.status_line = format!("AI analysis failed: {err}"),
                }
            }
            Err(TryRecvError::Empty) => ctx.request_repaint(),
            Err(TryRecvError::Disconnected) => {
                self.ai_receiver = None;
                self.ai.set_analyzing(false);
            }
        }
    }

    fn toggle_favorite(&mut self) {
        let (Some(study), Some(series), Some(instance)) = (
            self.session.current_study(),
            self.session.current_series(),
            self.session.current_instance(),
        ) else {
            return;
        };
        let favorite = FavoriteImage::from_instance(study, series, instance);
        let added = self.favorites.toggle(favorite);
        self.status_line = if added {
            "Added to favorites.".to_string()
        } else {
            "Removed from favorites.".to_string()
        };
    }

    fn open_favorite(&mut self, index: usize) {
        let Some(favorite) = self.favorites.all().get(index).cloned() else {
            return;
        };
        if self.session.select_by_sop_uid(&favorite.sop_instance_uid) {
            return;
        }
        let source = favorite
            .image_path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| favorite.image_path.clone());
        self.pending_focus_sop = Some(favorite.sop_instance_uid);
        self.start_ingest(vec![source]);
    }

    fn open_recent(&mut self, index: usize) {
        let Some(entry) = self.recent.entries().get(index) else {
            return;
        };
        if entry.source_paths.is_empty() {
            self.status_line = "This study has no stored location.".to_string();
            return;
        }
        let paths = entry.source_paths.clone();
        self.start_ingest(paths);
    }

    /// Forgets a recent entry along with any parsed copy of its files.
    fn remove_recent(&mut self, id: &str) {
        if let Some(entry) = self.recent.entries().iter().find(|entry| entry.id == id) {
            self.study_cache.remove(&cache_key(&entry.source_paths));
        }
        self.recent.remove(id);
    }

    fn apply_action(&mut self, action: UiAction) {
        match action {
            UiAction::OpenFiles => self.open_files_dialog(),
            UiAction::OpenFolder => self.open_folder_dialog(),
            UiAction::OpenPaths(paths) => self.start_ingest(paths),
            UiAction::CloseStudies => self.close_studies(),
            UiAction::SelectStudy(index) => self.session.select_study(index),
            UiAction::SelectSeries(index) => self.session.select_series(index),
            UiAction::SelectInstance(index) => self.session.select_instance(index),
            UiAction::StepInstance(delta) => {
                self.session.step_instance(delta);
            }
            UiAction::SetWindowLevel(level) => {
                self.session.set_window_level(level.center, level.width);
            }
            UiAction::ApplyPreset(index) => {
                if let Some(preset) = WINDOW_PRESETS.get(index) {
                    self.session.apply_preset(preset);
                }
            }
            UiAction::ResetWindowLevel => self.session.reset_window_level(),
            UiAction::ResetViewport => self.session.viewport.reset(),
            UiAction::ZoomBy(factor) => self.session.viewport.zoom_by(factor),
            UiAction::RotateClockwise => self.session.viewport.rotate_clockwise(),
            UiAction::RotateCounterClockwise => {
                self.session.viewport.rotate_counter_clockwise();
            }
            UiAction::FlipHorizontal => self.session.viewport.toggle_flip_horizontal(),
            UiAction::FlipVertical => self.session.viewport.toggle_flip_vertical(),
            UiAction::Invert => self.session.viewport.toggle_invert(),
            UiAction::SetTool(tool) => self.session.viewport.active_tool = tool,
            UiAction::ToggleAnnotations => {
                let viewport = &mut self.session.viewport;
                viewport.show_annotations = !viewport.show_annotations;
            }
            UiAction::ToggleMetadata => {
                let viewport = &mut self.session.viewport;
                viewport.show_metadata = !viewport.show_metadata;
            }
            UiAction::ToggleFavorite => self.toggle_favorite(),
            UiAction::OpenFavorite(index) => self.open_favorite(index),
            UiAction::RemoveFavorite(uid) => self.favorites.remove(&uid),
            UiAction::ClearFavorites => self.favorites.clear(),
            UiAction::OpenRecent(index) => self.open_recent(index),
            UiAction::RemoveRecent(id) => self.remove_recent(&id),
            UiAction::ClearRecent => self.recent.clear(),
            UiAction::Analyze => self.start_analysis(),
            UiAction::ShowAnalysis(id) => self.ai.show_modal(&id),
            UiAction::HideAnalysis => self.ai.hide_modal(),
            UiAction::DeleteAnalysis(id) => self.ai.delete(&id),
            UiAction::ToggleDrawer => self.drawer_open = !self.drawer_open,
            UiAction::ShowSettings => self.settings_open = true,
        }
    }

    fn collect_keyboard_actions(&self, ctx: &egui::Context, actions: &mut Vec<UiAction>) {
        if ctx.wants_keyboard_input() {
            return;
        }
        ctx.input_mut(|input| {
            let none = egui::Modifiers::NONE;
            if input.consume_key(egui::Modifiers::COMMAND, egui::Key::W) {
                actions.push(UiAction::CloseStudies);
            }
            if input.consume_key(egui::Modifiers::COMMAND, egui::Key::O) {
                actions.push(UiAction::OpenFiles);
            }
            for (key, delta) in [
                (egui::Key::ArrowUp, -1),
                (egui::Key::ArrowLeft, -1),
                (egui::Key::ArrowDown, 1),
                (egui::Key::ArrowRight, 1),
                (egui::Key::PageUp, -10),
                (egui::Key::PageDown, 10),
                (egui::Key::Home, i32::MIN / 2),
                (egui::Key::End, i32::MAX / 2),
            ] {
                if input.consume_key(none, key) {
                    actions.push(UiAction::StepInstance(delta));
                }
            }
            if input.consume_key(none, egui::Key::R) {
                actions.push(UiAction::ResetWindowLevel);
            }
            if input.consume_key(none, egui::Key::I) {
                actions.push(UiAction::Invert);
            }
            if input.consume_key(none, egui::Key::F) {
                actions.push(UiAction::ToggleFavorite);
            }
        });
    }

    fn collect_dropped_files(ctx: &egui::Context, actions: &mut Vec<UiAction>) {
        let dropped = ctx.input(|input| {
            input
                .raw
                .dropped_files
                .iter()
                .filter_map(|file| file.path.clone())
                .collect::<Vec<_>>()
        });
        if !dropped.is_empty() {
            actions.push(UiAction::OpenPaths(dropped));
        }
    }

    fn show_titlebar(&self, ctx: &egui::Context, actions: &mut Vec<UiAction>) {
        let is_maximized = ctx.input(|input| input.viewport().maximized.unwrap_or(false));
        let title_text = format!("{APP_TITLE} v{APP_VERSION}");
        let bar_fill = ctx.style().visuals.panel_fill;
        egui::TopBottomPanel::top("titlebar")
            .show_separator_line(false)
            .frame(egui::Frame::none().fill(bar_fill))
            .exact_height(30.0)
            .show(ctx, |ui| {
                let button_size = egui::vec2(28.0, 22.0);
                let side_width = button_size.x * 3.0 + ui.spacing().item_spacing.x * 2.0;
                let titlebar_rect = ui.max_rect();
                let center_width = (ui.available_width()
                    - side_width * 2.0
                    - ui.spacing().item_spacing.x * 2.0)
                    .max(0.0);

                ui.add_space(2.0);
                ui.horizontal(|ui| {
                    ui.allocate_ui_with_layout(
                        egui::vec2(side_width, button_size.y),
                        egui::Layout::left_to_right(egui::Align::Center),
                        |ui| {
                            ui.add_space(4.0);
                            let menu_button = egui::Button::new("")
                                .fill(bar_fill)
                                .stroke(egui::Stroke::NONE)
                                .min_size(egui::vec2(20.0, 18.0));
                            let menu_response =
                                egui::menu::menu_custom_button(ui, menu_button, |ui| {
                                    if ui.button("Open Files...").clicked() {
                                        actions.push(UiAction::OpenFiles);
                                        ui.close_menu();
                                    }
                                    if ui.button("Open Folder...").clicked() {
                                        actions.push(UiAction::OpenFolder);
                                        ui.close_menu();
                                    }
                                    if ui.button("Close Study").clicked() {
                                        actions.push(UiAction::CloseStudies);
                                        ui.close_menu();
                                    }
                                    ui.separator();
                                    if ui.button("Settings").clicked() {
                                        actions.push(UiAction::ShowSettings);
                                        ui.close_menu();
                                    }
                                });

                            let icon_rect =
                                menu_response.response.rect.shrink2(egui::vec2(5.0, 5.0));
                            let line_color = ui.visuals().widgets.inactive.fg_stroke.color;
                            let line_stroke = egui::Stroke::new(1.0, line_color);
                            for y in [
                                icon_rect.top() + 1.0,
                                icon_rect.center().y,
                                icon_rect.bottom() - 1.0,
                            ] {
                                ui.painter().line_segment(
                                    [
                                        egui::pos2(icon_rect.left(), y),
                                        egui::pos2(icon_rect.right(), y),
                                    ],
                                    line_stroke,
                                );
                            }
                        },
                    );

                    let (title_rect, drag_response) = ui.allocate_exact_size(
                        egui::vec2(center_width, button_size.y),
                        Sense::click_and_drag(),
                    );
                    ui.painter().text(
                        egui::pos2(titlebar_rect.center().x, title_rect.center().y),
                        egui::Align2::CENTER_CENTER,
                        &title_text,
                        egui::FontId::proportional(14.0),
                        ui.visuals().text_color(),
                    );
                    if drag_response.is_pointer_button_down_on() {
                        ctx.send_viewport_cmd(ViewportCommand::StartDrag);
                    }
                    if drag_response.double_clicked() {
                        ctx.send_viewport_cmd(ViewportCommand::Maximized(!is_maximized));
                    }

                    ui.allocate_ui_with_layout(
                        egui::vec2(ui.available_width(), button_size.y),
                        egui::Layout::right_to_left(egui::Align::Center),
                        |ui| {
                            for (label, command) in [
                                ("X", ViewportCommand::Close),
                                ("□", ViewportCommand::Maximized(!is_maximized)),
                                ("_", ViewportCommand::Minimized(true)),
                            ] {
                                if ui
                                    .add_sized(
                                        button_size,
                                        egui::Button::new(label)
                                            .fill(bar_fill)
                                            .stroke(egui::Stroke::NONE),
                                    )
                                    .clicked()
                                {
                                    ctx.send_viewport_cmd(command);
                                }
                            }
                        },
                    );
                });
            });
    }

    fn show_toolbar(&self, ctx: &egui::Context, actions: &mut Vec<UiAction>) {
        let viewport = &self.session.viewport;
        let current = self.session.current_instance();
        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| {
            ui.horizontal_wrapped(|ui| {
                if ui
                    .selectable_label(self.drawer_open, "☰")
                    .on_hover_text("Toggle drawer")
                    .clicked()
                {
                    actions.push(UiAction::ToggleDrawer);
                }
                ui.separator();

                for tool in ActiveTool::ALL {
                    if ui
                        .selectable_label(viewport.active_tool == tool, tool.label())
                        .clicked()
                    {
                        actions.push(UiAction::SetTool(tool));
                    }
                }
                ui.separator();

                ui.add_enabled_ui(current.is_some(), |ui| {
                    if ui.button("−").on_hover_text("Zoom out").clicked() {
                        actions.push(UiAction::ZoomBy(1.0 / 1.25));
                    }
                    ui.label(format!("{:.0}%", viewport.zoom * 100.0));
                    if ui.button("+").on_hover_text("Zoom in").clicked() {
                        actions.push(UiAction::ZoomBy(1.25));
                    }
                    if ui.button("⟲").on_hover_text("Rotate left").clicked() {
                        actions.push(UiAction::RotateCounterClockwise);
                    }
                    if ui.button("⟳").on_hover_text("Rotate right").clicked() {
                        actions.push(UiAction::RotateClockwise);
                    }
                    if ui
                        .selectable_label(viewport.flip_horizontal, "⇆")
                        .on_hover_text("Flip horizontal")
                        .clicked()
                    {
                        actions.push(UiAction::FlipHorizontal);
                    }
                    if ui
                        .selectable_label(viewport.flip_vertical, "⇅")
                        .on_hover_text("Flip vertical")
                        .clicked()
                    {
                        actions.push(UiAction::FlipVertical);
                    }
                    if ui
                        .selectable_label(viewport.invert, "Invert")
                        .on_hover_text("Invert (I)")
                        .clicked()
                    {
                        actions.push(UiAction::Invert);
                    }
                    if ui.button("Reset View").clicked() {
                        actions.push(UiAction::ResetViewport);
                    }
                    ui.separator();

                    ui.menu_button("Presets", |ui| {
                        for (index, preset) in WINDOW_PRESETS.iter().enumerate() {
                            let label = format!(
                                "{}  ({:.0} / {:.0})",
                                preset.name, preset.level.center, preset.level.width
                            );
                            if ui
                                .button(label)
                                .on_hover_text(preset.description)
                                .clicked()
                            {
                                actions.push(UiAction::ApplyPreset(index));
                                ui.close_menu();
                            }
                        }
                    });
                    if ui.button("Reset W/L").on_hover_text("Reset window/level (R)").clicked()
                    {
                        actions.push(UiAction::ResetWindowLevel);
                    }
                    ui.separator();

                    let is_favorite = current
                        .is_some_and(|instance| self.favorites.is_favorite(&instance.sop_instance_uid));
                    if ui
                        .selectable_label(is_favorite, if is_favorite { "★" } else { "☆" })
                        .on_hover_text("Favorite (F)")
                        .clicked()
                    {
                        actions.push(UiAction::ToggleFavorite);
                    }

                    let analysis = current
                        .and_then(|instance| self.ai.for_instance(&instance.sop_instance_uid));
                    if self.ai.is_analyzing() {
                        ui.add(egui::Spinner::new());
                        ui.label("Analyzing...");
                    } else if ui
                        .button("AI Analyze")
                        .on_hover_text(format!(
                            "{} analyses this session",
                            self.ai.analyses().len()
                        ))
                        .clicked()
                    {
                        actions.push(UiAction::Analyze);
                    }
                    if let Some(analysis) = analysis {
                        if !self.ai.is_modal_visible()
                            && ui.button("View AI analysis").clicked()
                        {
                            actions.push(UiAction::ShowAnalysis(analysis.id.clone()));
                        }
                    }
                    ui.separator();

                    if ui
                        .selectable_label(viewport.show_annotations, "Annotations")
                        .clicked()
                    {
                        actions.push(UiAction::ToggleAnnotations);
                    }
                    if ui
                        .selectable_label(viewport.show_metadata, "Metadata")
                        .clicked()
                    {
                        actions.push(UiAction::ToggleMetadata);
                    }
                });
            });
        });
    }

    fn show_drawer(&mut self, ctx: &egui::Context, actions: &mut Vec<UiAction>) {
        if !self.drawer_open {
            return;
        }
        let mut tab = self.drawer_tab;
        egui::SidePanel::left("drawer")
            .resizable(true)
            .default_width(270.0)
            .show(ctx, |ui| {
                ui.horizontal(|ui| {
                    ui.selectable_value(&mut tab, DrawerTab::Studies, "Studies");
                    ui.selectable_value(
                        &mut tab,
                        DrawerTab::Recent,
                        format!("Recent ({})", self.recent.entries().len()),
                    );
                    ui.selectable_value(
                        &mut tab,
                        DrawerTab::Favorites,
                        format!("Favorites ({})", self.favorites.count()),
                    );
                });
                ui.separator();
                egui::ScrollArea::vertical()
                    .id_salt("drawer-scroll")
                    .show(ui, |ui| match tab {
                        DrawerTab::Studies => self.show_study_tree(ui, actions),
                        DrawerTab::Recent => self.show_recent_list(ui, actions),
                        DrawerTab::Favorites => self.show_favorites_list(ui, actions),
                    });
            });
        self.drawer_tab = tab;
    }

    fn show_study_tree(&self, ui: &mut egui::Ui, actions: &mut Vec<UiAction>) {
        let studies = self.session.studies();
        if studies.is_empty() {
            ui.label("Open files or a folder, or drop them here.");
            return;
        }
        let hide = self.hide_personal();
        let selection = self.session.selection();

        for (study_index, study) in studies.iter().enumerate() {
            let is_current_study = selection.is_some_and(|s| s.study == study_index);
            let header = format!(
                "{}  {}",
                mask_personal(&format_patient_name(&study.patient_name), hide),
                format_dicom_date(&study.study_date)
            );
            egui::CollapsingHeader::new(header)
                .id_salt(("study", study_index))
                .default_open(is_current_study)
                .show(ui, |ui| {
                    if !study.study_description.is_empty() {
                        ui.weak(&study.study_description);
                    }
                    ui.weak(format!("ID {}", mask_personal(&study.patient_id, hide)));
                    for (series_index, series) in study.series.iter().enumerate() {
                        let is_current = is_current_study
                            && selection.is_some_and(|s| s.series == series_index);
                        let label = format!(
                            "#{} {} · {} · {}",
                            series.series_number,
                            format_series_description(Some(&series.series_description)),
                            series.modality,
                            series.instances.len()
                        );
                        if ui.selectable_label(is_current, label).clicked() {
                            if !is_current_study {
                                actions.push(UiAction::SelectStudy(study_index));
                            }
                            actions.push(UiAction::SelectSeries(series_index));
                        }
                    }
                });
        }
    }

    fn show_recent_list(&self, ui: &mut egui::Ui, actions: &mut Vec<UiAction>) {
        let entries = self.recent.entries();
        if entries.is_empty() {
            ui.label("No recent studies.");
            if !self.settings.get().persist_studies {
                ui.weak("Recent studies are not being saved.");
            }
            return;
        }
        let hide = self.hide_personal();
        for (index, entry) in entries.iter().enumerate() {
            egui::Frame::none()
                .stroke(egui::Stroke::new(1.0, egui::Color32::from_gray(45)))
                .inner_margin(egui::Margin::same(6.0))
                .show(ui, |ui| {
                    ui.horizontal(|ui| {
                        let title = format!(
                            "{}  {}",
                            mask_personal(&format_patient_name(&entry.patient_name), hide),
                            format_dicom_date(&entry.study_date)
                        );
                        if ui.link(title).clicked() {
                            actions.push(UiAction::OpenRecent(index));
                        }
                        ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                            if ui.small_button("✕").on_hover_text("Remove").clicked() {
                                actions.push(UiAction::RemoveRecent(entry.id.clone()));
                            }
                        });
                    });
                    ui.weak(format!(
                        "{} · {} series · {} images",
                        entry.study_description, entry.series_count, entry.image_count
                    ));
                    ui.weak(
                        entry
                            .loaded_at
                            .with_timezone(&chrono::Local)
                            .format("%Y-%m-%d %H:%M")
                            .to_string(),
                    );
                });
            ui.add_space(4.0);
        }
        if ui.button("Clear recent").clicked() {
            actions.push(UiAction::ClearRecent);
        }
    }

    fn show_favorites_list(&self, ui: &mut egui::Ui, actions: &mut Vec<UiAction>) {
        let favorites = self.favorites.all();
        if favorites.is_empty() {
            ui.label("No favorite images. Press F to star the current image.");
            return;
        }
        let hide = self.hide_personal();
        for (index, favorite) in favorites.iter().enumerate() {
            ui.horizontal(|ui| {
                let patient = favorite
                    .patient_name
                    .as_deref()
                    .map(format_patient_name)
                    .map(|name| mask_personal(&name, hide))
                    .unwrap_or_else(|| "Unknown".to_string());
                let label = format!(
                    "{} · {} #{} · {}",
                    patient,
                    favorite.modality,
                    favorite.instance_number,
                    format_series_description(favorite.series_description.as_deref())
                );
                if ui.link(label).clicked() {
                    actions.push(UiAction::OpenFavorite(index));
                }
                if ui.small_button("✕").on_hover_text("Remove").clicked() {
                    actions.push(UiAction::RemoveFavorite(favorite.sop_instance_uid.clone()));
                }
            });
        }
        ui.add_space(6.0);
        if ui.button("Clear favorites").clicked() {
            actions.push(UiAction::ClearFavorites);
        }
    }

    fn show_bottom_panel(&self, ctx: &egui::Context, actions: &mut Vec<UiAction>) {
        egui::TopBottomPanel::bottom("series-strip").show(ctx, |ui| {
            if let (Some(series), Some(selection)) =
                (self.session.current_series(), self.session.selection())
            {
                let count = series.instances.len();
                if count > 1 {
                    let mut index = selection.instance;
                    let slider = egui::Slider::new(&mut index, 0..=count - 1)
                        .custom_formatter(|value, _| format!("{}", value as usize + 1))
                        .text(format!("of {count}"));
                    ui.spacing_mut().slider_width = (ui.available_width() - 120.0).max(120.0);
                    if ui.add(slider).changed() {
                        actions.push(UiAction::SelectInstance(index));
                    }
                }

                egui::ScrollArea::horizontal()
                    .id_salt("thumbnail-strip")
                    .show(ui, |ui| {
                        ui.horizontal(|ui| {
                            for (index, instance) in series.instances.iter().enumerate() {
                                if self.show_thumbnail(ui, instance, index == selection.instance) {
                                    actions.push(UiAction::SelectInstance(index));
                                }
                            }
                        });
                    });
            }
            if !self.status_line.is_empty() {
                ui.label(&self.status_line);
            }
        });
    }

    fn show_thumbnail(&self, ui: &mut egui::Ui, instance: &Instance, is_current: bool) -> bool {
        let stroke_color = if is_current {
            egui::Color32::from_rgb(90, 140, 220)
        } else {
            egui::Color32::from_gray(35)
        };
        let mut clicked = false;
        egui::Frame::none()
            .stroke(egui::Stroke::new(1.0, stroke_color))
            .inner_margin(egui::Margin::same(2.0))
            .show(ui, |ui| match self.thumbnails.get(&instance.path) {
                Some(Some(texture)) => {
                    let texture_size = texture.size_vec2();
                    let scale =
                        (THUMB_DRAW_DIM / texture_size.x.max(texture_size.y).max(1.0)).min(1.0);
                    let response = ui.add(
                        egui::Image::new((texture.id(), texture_size * scale))
                            .sense(Sense::click()),
                    );
                    clicked = response
                        .on_hover_text(format!("#{}", instance.instance_number))
                        .clicked();
                }
                _ => {
                    let label = format!("#{}", instance.instance_number);
                    clicked = ui
                        .add_sized(
                            [THUMB_DRAW_DIM, THUMB_DRAW_DIM],
                            egui::Button::new(label).frame(false),
                        )
                        .clicked();
                }
            });
        clicked
    }

    fn show_image(&mut self, ui: &mut egui::Ui) {
        let Some(texture) = self.texture.clone() else {
            let message = if self.is_loading() {
                "Loading DICOM files..."
            } else if self.session.studies().is_empty() {
                "Open files or a folder (Ctrl+O), or drop DICOM files here."
            } else {
                "This image could not be displayed."
            };
            ui.allocate_ui_with_layout(
                ui.available_size(),
                egui::Layout::centered_and_justified(egui::Direction::TopDown),
                |ui| {
                    ui.label(message);
                },
            );
            return;
        };

        let available = ui.available_size();
        let (canvas_rect, response) = ui.allocate_exact_size(available, Sense::click_and_drag());
        let image_size = texture.size_vec2();
        if image_size.x <= 0.0 || image_size.y <= 0.0 || !canvas_rect.is_positive() {
            return;
        }

        if response.double_clicked() {
            self.session.viewport.reset();
        }

        let preferences = self.settings.get().clone();
        if response.dragged() {
            let (drag_delta, shift_held) =
                ui.input(|input| (input.pointer.delta(), input.modifiers.shift));
            let tool = if shift_held {
                ActiveTool::WindowLevel
            } else {
                self.session.viewport.active_tool
            };
            match tool {
                ActiveTool::WindowLevel => self.drag_window_level(drag_delta, &preferences),
                ActiveTool::Pan => self.session.viewport.pan_by(drag_delta),
                ActiveTool::Zoom => {
                    let factor =
                        zoom_factor_from_scroll(-drag_delta.y, preferences.zoom_sensitivity);
                    self.session.viewport.zoom_by(factor);
                }
                ActiveTool::StackScroll => {
                    let steps = self
                        .session
                        .viewport
                        .scroll_steps(drag_delta.y, ScrollDirection::Inverted);
                    if steps != 0 {
                        self.session.step_instance(steps);
                    }
                }
            }
        }

        if response.hovered() {
            let (modifiers, zoom_delta, raw_scroll, smooth_scroll) = ui.input(|input| {
                (
                    input.modifiers,
                    input.zoom_delta(),
                    input.raw_scroll_delta,
                    input.smooth_scroll_delta,
                )
            });
            let scroll = dominant_scroll_axis(raw_scroll, smooth_scroll);
            let old_zoom = self.session.viewport.zoom;
            if (zoom_delta - 1.0).abs() > f32::EPSILON {
                self.session.viewport.zoom_by(zoom_delta);
            } else if modifiers.command && scroll.abs() > f32::EPSILON {
                self.session
                    .viewport
                    .zoom_by(zoom_factor_from_scroll(scroll, preferences.zoom_sensitivity));
            } else {
                let steps = self
                    .session
                    .viewport
                    .scroll_steps(scroll, preferences.scroll_direction);
                if steps != 0 {
                    self.session.step_instance(steps);
                }
            }

            let new_zoom = self.session.viewport.zoom;
            if (new_zoom - old_zoom).abs() > f32::EPSILON {
                if let Some(pointer_pos) = response.hover_pos() {
                    let old_center = canvas_rect.center() + self.session.viewport.pan;
                    let pointer_offset = pointer_pos - old_center;
                    self.session
                        .viewport
                        .pan_by(pointer_offset * (1.0 - new_zoom / old_zoom));
                }
            }
        }

        let viewport = &mut self.session.viewport;
        let fit_scale = (canvas_rect.width() / image_size.x)
            .min(canvas_rect.height() / image_size.y)
            .max(0.01);
        let draw_size = image_size * fit_scale * viewport.zoom;
        let max_pan = (draw_size + canvas_rect.size()) * 0.5;
        viewport.pan.x = viewport.pan.x.clamp(-max_pan.x, max_pan.x);
        viewport.pan.y = viewport.pan.y.clamp(-max_pan.y, max_pan.y);

        let image_rect =
            egui::Rect::from_center_size(canvas_rect.center() + viewport.pan, draw_size);
        let painter = ui.painter_at(canvas_rect);
        painter.image(
            texture.id(),
            image_rect,
            egui::Rect::from_min_max(egui::Pos2::ZERO, egui::pos2(1.0, 1.0)),
            egui::Color32::WHITE,
        );
    }

    fn drag_window_level(&mut self, drag_delta: egui::Vec2, preferences: &UserSettings) {
        let Some(path) = self.session.current_instance().map(|instance| instance.path.clone())
        else {
            return;
        };
        let Some(image) = self.decoded.peek(&path) else {
            return;
        };
        if !image.is_monochrome() {
            return;
        }
        if let Some(level) = apply_window_level_drag(
            self.session.active_window(),
            image.min_value,
            image.max_value,
            drag_delta,
            preferences.window_level_sensitivity,
        ) {
            self.session.set_window_level(level.center, level.width);
        }
    }

    fn show_overlays(&self, ctx: &egui::Context, actions: &mut Vec<UiAction>) {
        let Some(instance) = self.session.current_instance() else {
            return;
        };
        let viewport = &self.session.viewport;
        let top_offset = 80.0;

        if viewport.show_metadata {
            let hide = self.hide_personal();
            let metadata = &instance.metadata;
            let series_len = self.session.current_series().map_or(0, |s| s.instances.len());
            let position = self.session.selection().map_or(0, |s| s.instance) + 1;
            egui::Area::new(egui::Id::new("metadata-overlay"))
                .order(egui::Order::Foreground)
                .anchor(egui::Align2::LEFT_TOP, egui::vec2(self.drawer_offset() + 10.0, top_offset))
                .interactable(false)
                .show(ctx, |ui| {
                    ui.set_max_width(320.0);
                    ui.label(mask_personal(&format_patient_name(&metadata.patient_name), hide));
                    ui.weak(format!("ID {}", mask_personal(&metadata.patient_id, hide)));
                    ui.weak(
                        format!(
                            "{} {}",
                            format_dicom_date(&metadata.study_date),
                            format_dicom_time(&metadata.study_time)
                        )
                        .trim_end(),
                    );
                    if !metadata.study_description.is_empty() {
                        ui.weak(&metadata.study_description);
                    }
                    ui.weak(format_series_description(Some(&metadata.series_description)));
                    ui.weak(format!(
                        "{} · Image {position} / {series_len} · #{}",
                        metadata.modality, instance.instance_number
                    ));
                    ui.weak(format!("{} x {}", instance.columns, instance.rows));
                    if let Some(location) = metadata.slice_location {
                        ui.weak(format!("Slice {location:.1} mm"));
                    }
                    if let Some(thickness) = metadata.slice_thickness {
                        ui.weak(format!("Thickness {thickness:.1} mm"));
                    }
                });
        }

        if viewport.show_annotations {
            let window = self.session.active_window();
            let window_levels = self.session.window_levels();
            let range = self
                .decoded
                .peek(&instance.path)
                .filter(|image| image.is_monochrome())
                .map(|image| (image.min_value, image.max_value));
            egui::Area::new(egui::Id::new("wl-overlay"))
                .order(egui::Order::Foreground)
                .anchor(egui::Align2::RIGHT_BOTTOM, egui::vec2(-10.0, -130.0))
                .show(ctx, |ui| {
                    ui.set_max_width(360.0);
                    ui.with_layout(egui::Layout::top_down(egui::Align::Max), |ui| {
                        ui.label(format!(
                            "{}  W {:.0}  L {:.0}",
                            window_levels.current_modality(),
                            window.width,
                            window.center
                        ));
                        ui.weak(format!(
                            "Zoom {:.0}%  Rot {}°{}{}",
                            viewport.zoom * 100.0,
                            viewport.rotation.degrees(),
                            if viewport.flip_horizontal { "  H" } else { "" },
                            if viewport.flip_vertical { "  V" } else { "" },
                        ));
                        if let Some((min_value, max_value)) = range {
                            let mut center = window.center;
                            let mut width = window.width;
                            let center_range =
                                (min_value as f32 - 2000.0)..=(max_value as f32 + 2000.0);
                            let max_width =
                                ((max_value as f32 - min_value as f32).abs() * 2.0).max(4096.0);
                            let mut changed = ui
                                .add(egui::Slider::new(&mut center, center_range).text("Center"))
                                .changed();
                            changed |= ui
                                .add(egui::Slider::new(&mut width, 1.0..=max_width).text("Width"))
                                .changed();
                            if changed {
                                actions.push(UiAction::SetWindowLevel(WindowLevel::new(
                                    center, width,
                                )));
                            }
                        }
                        if ui
                            .button(egui::RichText::new("↺ Reset W/L").size(13.0))
                            .clicked()
                        {
                            actions.push(UiAction::ResetWindowLevel);
                        }
                    });
                });
        }
    }

    fn drawer_offset(&self) -> f32 {
        if self.drawer_open {
            280.0
        } else {
            0.0
        }
    }

    fn show_analysis_window(&self, ctx: &egui::Context, actions: &mut Vec<UiAction>) {
        if !self.ai.is_modal_visible() {
            return;
        }
        let Some(instance) = self.session.current_instance() else {
            return;
        };
        let Some(analysis) = self.ai.for_instance(&instance.sop_instance_uid) else {
            return;
        };
        if self.ai.selected_id() != Some(analysis.id.as_str()) {
            return;
        }

        let mut open = true;
        egui::Window::new("AI Analysis")
            .id(egui::Id::new("ai-analysis-window"))
            .collapsible(false)
            .resizable(true)
            .default_width(420.0)
            .open(&mut open)
            .show(ctx, |ui| {
                ui.weak(format!(
                    "Instance #{} · {} {} · {}",
                    analysis.instance_number,
                    analysis.created_by,
                    analysis.model_version,
                    analysis.created_at
                ));
                ui.separator();
                egui::ScrollArea::vertical()
                    .id_salt("ai-findings")
                    .max_height(320.0)
                    .show(ui, |ui| {
                        ui.monospace(&analysis.findings);
                    });
                ui.separator();
                ui.horizontal(|ui| {
                    if ui.button("Delete").clicked() {
                        actions.push(UiAction::DeleteAnalysis(analysis.id.clone()));
                    }
                    if ui.button("Close").clicked() {
                        actions.push(UiAction::HideAnalysis);
                    }
                });
            });
        if !open {
            actions.push(UiAction::HideAnalysis);
        }
    }

    fn show_settings_window(&mut self, ctx: &egui::Context) {
        if !self.settings_open {
            return;
        }
        let mut open = true;
        let mut draft = self.settings.get().clone();
        let mut reset = false;
        let mut clear_cache = false;
        egui::Window::new("Settings")
            .collapsible(false)
            .resizable(false)
            .open(&mut open)
            .show(ctx, |ui| {
                egui::Grid::new("settings-grid")
                    .num_columns(2)
                    .spacing([16.0, 8.0])
                    .show(ui, |ui| {
                        ui.label("Theme");
                        ui.horizontal(|ui| {
                            ui.selectable_value(&mut draft.theme, Theme::Dark, "Dark");
                            ui.selectable_value(&mut draft.theme, Theme::Light, "Light");
                        });
                        ui.end_row();

                        ui.label("Scroll direction");
                        ui.horizontal(|ui| {
                            ui.selectable_value(
                                &mut draft.scroll_direction,
                                ScrollDirection::Natural,
                                "Natural",
                            );
                            ui.selectable_value(
                                &mut draft.scroll_direction,
                                ScrollDirection::Inverted,
                                "Inverted",
                            );
                        });
                        ui.end_row();

                        ui.label("Window/level sensitivity");
                        ui.add(egui::Slider::new(
                            &mut draft.window_level_sensitivity,
                            WINDOW_LEVEL_SENSITIVITY_RANGE,
                        ));
                        ui.end_row();

                        ui.label("Zoom sensitivity");
                        ui.add(egui::Slider::new(
                            &mut draft.zoom_sensitivity,
                            ZOOM_SENSITIVITY_RANGE,
                        ));
                        ui.end_row();

                        ui.label("Hide personal information");
                        ui.checkbox(&mut draft.hide_personal_info, "");
                        ui.end_row();

                        ui.label("Remember recent studies");
                        ui.checkbox(&mut draft.persist_studies, "");
                        ui.end_row();
                    });
                ui.separator();
                let stats = self.study_cache.stats();
                ui.horizontal(|ui| {
                    ui.weak(format!(
                        "Study cache: {} selection(s), {} studies",
                        stats.size, stats.total_studies
                    ))
                    .on_hover_text(stats.keys.join("\n"));
                    if ui.small_button("Clear").clicked() {
                        clear_cache = true;
                    }
                });
                if ui.button("Reset to defaults").clicked() {
                    reset = true;
                }
            });
        self.settings_open = open;
        if clear_cache {
            self.study_cache.clear();
        }

        if reset {
            self.settings.reset_to_defaults();
            self.recent.set_persist(self.settings.get().persist_studies);
            return;
        }
        let current = self.settings.get().clone();
        if draft.theme != current.theme {
            self.settings.set_theme(draft.theme);
        }
        if draft.scroll_direction != current.scroll_direction {
            self.settings.set_scroll_direction(draft.scroll_direction);
        }
        if draft.window_level_sensitivity != current.window_level_sensitivity {
            self.settings
                .set_window_level_sensitivity(draft.window_level_sensitivity);
        }
        if draft.zoom_sensitivity != current.zoom_sensitivity {
            self.settings.set_zoom_sensitivity(draft.zoom_sensitivity);
        }
        if draft.hide_personal_info != current.hide_personal_info {
            self.settings.set_hide_personal_info(draft.hide_personal_info);
        }
        if draft.persist_studies != current.persist_studies {
            self.settings.set_persist_studies(draft.persist_studies);
            self.recent.set_persist(draft.persist_studies);
        }
    }

    fn show_drop_hint(ctx: &egui::Context) {
        if ctx.input(|input| input.raw.hovered_files.is_empty()) {
            return;
        }
        egui::Area::new(egui::Id::new("drop-hint"))
            .order(egui::Order::Foreground)
            .anchor(egui::Align2::CENTER_CENTER, egui::Vec2::ZERO)
            .interactable(false)
            .show(ctx, |ui| {
                egui::Frame::popup(ui.style()).show(ui, |ui| {
                    ui.heading("Drop DICOM files or folders to open");
                });
            });
    }

    fn show_resize_grip(&self, ctx: &egui::Context) {
        const GRIP_SIZE: f32 = 18.0;
        const MARGIN: f32 = 1.0;

        egui::Area::new(egui::Id::new("window-resize-grip"))
            .order(egui::Order::Foreground)
            .anchor(egui::Align2::RIGHT_BOTTOM, egui::vec2(-MARGIN, -MARGIN))
            .show(ctx, |ui| {
                let (rect, response) = ui
                    .allocate_exact_size(egui::vec2(GRIP_SIZE, GRIP_SIZE), Sense::click_and_drag());

                if response.drag_started() {
                    ui.ctx().send_viewport_cmd(ViewportCommand::BeginResize(
                        ResizeDirection::SouthEast,
                    ));
                }
                if response.hovered() && !response.dragged() {
                    ui.ctx().set_cursor_icon(egui::CursorIcon::ResizeSouthEast);
                }

                let stroke = egui::Stroke::new(1.0, egui::Color32::from_gray(72));
                let r = rect.shrink(3.0);
                for offset in [0.0_f32, 4.0, 8.0] {
                    ui.painter().line_segment(
                        [
                            egui::pos2(r.right() - 4.0 - offset, r.bottom()),
                            egui::pos2(r.right(), r.bottom() - 4.0 - offset),
                        ],
                        stroke,
                    );
                }
            });
    }
}

fn dominant_scroll_axis(raw_scroll: egui::Vec2, smooth_scroll: egui::Vec2) -> f32 {
    let pick = |delta: egui::Vec2| {
        if delta.y.abs() >= delta.x.abs() {
            delta.y
        } else {
            delta.x
        }
    };

    if smooth_scroll != egui::Vec2::ZERO {
        pick(smooth_scroll)
    } else {
        pick(raw_scroll)
    }
}

impl eframe::App for OpenScansApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.apply_theme(ctx);
        if let Some(request) = self.pending_launch_request.take() {
            self.handle_launch_request(request);
        }

        self.poll_ingest(ctx);
        self.poll_analysis(ctx);
        self.sync_thumbnails();
        self.poll_thumbnails(ctx);

        let mut actions = Vec::new();
        Self::collect_dropped_files(ctx, &mut actions);
        self.collect_keyboard_actions(ctx, &mut actions);

        self.show_titlebar(ctx, &mut actions);
        self.show_toolbar(ctx, &mut actions);
        self.show_drawer(ctx, &mut actions);
        self.show_bottom_panel(ctx, &mut actions);

        // Apply before drawing the image so the texture reflects this frame.
        for action in actions.drain(..) {
            self.apply_action(action);
        }
        self.sync_main_texture(ctx);

        egui::CentralPanel::default().show(ctx, |ui| self.show_image(ui));
        self.sync_main_texture(ctx);

        self.show_overlays(ctx, &mut actions);
        self.show_analysis_window(ctx, &mut actions);
        self.show_settings_window(ctx);
        Self::show_drop_hint(ctx);
        self.show_resize_grip(ctx);

        if !actions.is_empty() {
            for action in actions {
                self.apply_action(action);
            }
            ctx.request_repaint();
        }

        if self.is_loading() || self.ai.is_analyzing() {
            ctx.set_cursor_icon(egui::CursorIcon::Progress);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::study::fixtures::{record, with_modality};
    use crate::study::organize;
    use crate::viewport::{MAX_ZOOM, MIN_ZOOM};

    fn decoded(width: usize) -> Arc<DecodedImage> {
        Arc::new(DecodedImage {
            width,
            height: 1,
            pixels: crate::dicom::Pixels::Mono(Arc::from(vec![0; width])),
            inverted_photometric: false,
            min_value: 0,
            max_value: 0,
        })
    }

    fn app_with_studies() -> OpenScansApp {
        let mut app = OpenScansApp::default();
        app.finish_ingest(IngestResult {
            key: "k".to_string(),
            inputs: vec![PathBuf::from("/scans")],
            studies: organize(vec![
                with_modality(record("s1", "ct", "ct-1", 1, 1), "CT", Some((40.0, 400.0))),
                with_modality(record("s1", "ct", "ct-2", 1, 2), "CT", Some((45.0, 420.0))),
            ]),
        });
        app
    }

    #[test]
    fn decoded_cache_evicts_least_recently_used() {
        let mut cache = DecodedCache::default();
        for index in 0..DECODED_CACHE_CAPACITY {
            cache.insert(PathBuf::from(format!("{index}.dcm")), decoded(1));
        }
        assert!(cache.get(&PathBuf::from("0.dcm")).is_some());
        cache.insert(PathBuf::from("new.dcm"), decoded(2));

        assert_eq!(cache.entries.len(), DECODED_CACHE_CAPACITY);
        assert!(cache.peek(&PathBuf::from("0.dcm")).is_some());
        assert!(cache.peek(&PathBuf::from("1.dcm")).is_none());
    }

    #[test]
    fn finishing_ingest_selects_first_image_and_records_recent() {
        let app = app_with_studies();
        assert_eq!(
            app.session.current_instance().map(|i| i.sop_instance_uid.as_str()),
            Some("ct-1")
        );
        assert_eq!(app.session.active_window(), WindowLevel::new(40.0, 400.0));
        assert_eq!(app.recent.entries().len(), 1);
        assert_eq!(app.recent.entries()[0].source_paths, vec![PathBuf::from("/scans")]);
        assert!(app.status_line.contains("1 study"));
    }

    #[test]
    fn keyboard_style_actions_drive_the_session() {
        let mut app = app_with_studies();
        app.apply_action(UiAction::SetWindowLevel(WindowLevel::new(70.0, 300.0)));
        app.apply_action(UiAction::StepInstance(i32::MAX / 2));
        assert_eq!(
            app.session.current_instance().map(|i| i.sop_instance_uid.as_str()),
            Some("ct-2")
        );
        assert_eq!(app.session.active_window(), WindowLevel::new(70.0, 300.0));

        app.apply_action(UiAction::ResetWindowLevel);
        assert_eq!(app.session.active_window(), WindowLevel::new(45.0, 420.0));
    }

    #[test]
    fn favorite_toggle_and_reopen_focus() {
        let mut app = app_with_studies();
        app.apply_action(UiAction::ToggleFavorite);
        assert!(app.favorites.is_favorite("ct-1"));

        app.apply_action(UiAction::StepInstance(1));
        app.apply_action(UiAction::OpenFavorite(0));
        assert_eq!(
            app.session.current_instance().map(|i| i.sop_instance_uid.as_str()),
            Some("ct-1")
        );

        app.apply_action(UiAction::ToggleFavorite);
        assert_eq!(app.favorites.count(), 0);
    }

    #[test]
    fn closing_studies_resets_everything() {
        let mut app = app_with_studies();
        app.ai.set_analyzing(true);
        app.apply_action(UiAction::CloseStudies);
        assert!(app.session.studies().is_empty());
        assert!(app.session.current_instance().is_none());
        assert!(!app.ai.is_analyzing());
        assert!(app.loaded_inputs.is_empty());
    }

    #[test]
    fn cached_selection_skips_background_load() {
        let mut app = OpenScansApp::default();
        let inputs = vec![PathBuf::from("/scans/a")];
        app.study_cache.insert(
            cache_key(&inputs),
            organize(vec![record("s9", "x", "only", 1, 1)]),
        );
        app.start_ingest(inputs);
        assert!(!app.is_loading());
        assert_eq!(app.session.studies()[0].study_instance_uid, "s9");
    }

    #[test]
    fn thumbnails_refresh_for_same_series_uid_in_another_study() {
        let mut app = OpenScansApp::default();
        app.finish_ingest(IngestResult {
            key: "k".to_string(),
            inputs: vec![PathBuf::from("/scans")],
            studies: organize(vec![
                record("s1", "", "first", 1, 1),
                record("s2", "", "second", 1, 1),
            ]),
        });
        assert_eq!(app.session.studies()[0].series[0].series_instance_uid, "unknown");
        assert_eq!(app.session.studies()[1].series[0].series_instance_uid, "unknown");

        app.sync_thumbnails();
        assert_eq!(app.thumbnail_series, Some((0, 0)));

        app.apply_action(UiAction::SelectStudy(1));
        app.sync_thumbnails();
        assert_eq!(app.thumbnail_series, Some((1, 0)));
        assert!(app.thumbnail_receiver.is_some());
    }

    #[test]
    fn dominant_axis_prefers_smooth_scroll() {
        assert_eq!(
            dominant_scroll_axis(egui::vec2(0.0, 5.0), egui::vec2(-8.0, 2.0)),
            -8.0
        );
        assert_eq!(dominant_scroll_axis(egui::vec2(1.0, 5.0), egui::Vec2::ZERO), 5.0);
    }

    #[test]
    fn zoom_limits_are_respected_by_actions() {
        let mut app = app_with_studies();
        for _ in 0..40 {
            app.apply_action(UiAction::ZoomBy(1.25));
        }
        assert_eq!(app.session.viewport.zoom, MAX_ZOOM);
        for _ in 0..80 {
            app.apply_action(UiAction::ZoomBy(0.8));
        }
        assert_eq!(app.session.viewport.zoom, MIN_ZOOM);
    }
}
