use eframe::egui;

use crate::settings::{ScrollDirection, DEFAULT_WINDOW_LEVEL_SENSITIVITY};
use crate::windowing::WindowLevel;

pub const MIN_ZOOM: f32 = 0.1;
pub const MAX_ZOOM: f32 = 12.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    None,
    Quarter,
    Half,
    ThreeQuarter,
}

impl Rotation {
    pub fn degrees(self) -> u16 {
        match self {
            Self::None => 0,
            Self::Quarter => 90,
            Self::Half => 180,
            Self::ThreeQuarter => 270,
        }
    }

    pub fn clockwise(self) -> Self {
        match self {
            Self::None => Self::Quarter,
            Self::Quarter => Self::Half,
            Self::Half => Self::ThreeQuarter,
            Self::ThreeQuarter => Self::None,
        }
    }

    pub fn counter_clockwise(self) -> Self {
        match self {
            Self::None => Self::ThreeQuarter,
            Self::Quarter => Self::None,
            Self::Half => Self::Quarter,
            Self::ThreeQuarter => Self::Half,
        }
    }
}

/// What a primary-button drag on the image does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActiveTool {
    #[default]
    WindowLevel,
    Zoom,
    Pan,
    StackScroll,
}

impl ActiveTool {
    pub const ALL: [Self; 4] = [Self::WindowLevel, Self::Zoom, Self::Pan, Self::StackScroll];

    pub fn label(self) -> &'static str {
        match self {
            Self::WindowLevel => "W/L",
            Self::Zoom => "Zoom",
            Self::Pan => "Pan",
            Self::StackScroll => "Scroll",
        }
    }
}

/// Display transform for the main image. Independent of window/level.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewportSettings {
    pub zoom: f32,
    pub pan: egui::Vec2,
    pub rotation: Rotation,
    pub invert: bool,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
    pub active_tool: ActiveTool,
    pub show_annotations: bool,
    pub show_metadata: bool,
    scroll_accum: f32,
}

impl Default for ViewportSettings {
    fn default() -> Self {
        Self {
            zoom: 1.0,
            pan: egui::Vec2::ZERO,
            rotation: Rotation::None,
            invert: false,
            flip_horizontal: false,
            flip_vertical: false,
            active_tool: ActiveTool::WindowLevel,
            show_annotations: true,
            show_metadata: true,
            scroll_accum: 0.0,
        }
    }
}

impl ViewportSettings {
    pub fn set_zoom(&mut self, zoom: f32) {
        if zoom.is_finite() {
            self.zoom = zoom.clamp(MIN_ZOOM, MAX_ZOOM);
        }
    }

    pub fn zoom_by(&mut self, factor: f32) {
        self.set_zoom(self.zoom * factor);
    }

    pub fn pan_by(&mut self, delta: egui::Vec2) {
        self.pan += delta;
    }

    pub fn rotate_clockwise(&mut self) {
        self.rotation = self.rotation.clockwise();
    }

    pub fn rotate_counter_clockwise(&mut self) {
        self.rotation = self.rotation.counter_clockwise();
    }

    pub fn toggle_invert(&mut self) {
        self.invert = !self.invert;
    }

    pub fn toggle_flip_horizontal(&mut self) {
        self.flip_horizontal = !self.flip_horizontal;
    }

    pub fn toggle_flip_vertical(&mut self) {
        self.flip_vertical = !self.flip_vertical;
    }

    /// Restores the identity transform. Tool choice and overlay toggles are
    /// preferences rather than transform, so they survive.
    pub fn reset(&mut self) {
        *self = Self {
            active_tool: self.active_tool,
            show_annotations: self.show_annotations,
            show_metadata: self.show_metadata,
            ..Self::default()
        };
    }

    /// Accumulates wheel movement into whole instance steps.
    pub fn scroll_steps(&mut self, scroll: f32, direction: ScrollDirection) -> i32 {
        let steps = frame_step_from_scroll(&mut self.scroll_accum, scroll);
        match direction {
            ScrollDirection::Natural => steps,
            ScrollDirection::Inverted => -steps,
        }
    }
}

/// Maps a pointer drag onto a new window. Horizontal movement widens,
/// vertical movement lowers the center. Speed scales with the pixel value
/// span and with the user's sensitivity.
pub fn apply_window_level_drag(
    window: WindowLevel,
    min_value: i32,
    max_value: i32,
    drag_delta: egui::Vec2,
    user_sensitivity: f32,
) -> Option<WindowLevel> {
    if drag_delta == egui::Vec2::ZERO {
        return None;
    }

    let span = (max_value as i64 - min_value as i64).unsigned_abs() as f32;
    let sensitivity = (span / 512.0).clamp(0.25, 256.0)
        * (user_sensitivity / DEFAULT_WINDOW_LEVEL_SENSITIVITY);

    let center = window.center - drag_delta.y * sensitivity;
    let width = (window.width + drag_delta.x * sensitivity).max(1.0);

    let changed = (center - window.center).abs() > f32::EPSILON
        || (width - window.width).abs() > f32::EPSILON;
    changed.then(|| WindowLevel::new(center, width))
}

/// Multiplicative zoom factor for a wheel or drag movement in points.
pub fn zoom_factor_from_scroll(scroll: f32, zoom_sensitivity: f32) -> f32 {
    const POINTS_PER_NOTCH: f32 = 30.0;
    (scroll / POINTS_PER_NOTCH * zoom_sensitivity).exp()
}

fn frame_step_from_scroll(scroll_accum: &mut f32, scroll: f32) -> i32 {
    const DEAD_ZONE: f32 = 0.5;
    const PIXELS_PER_FRAME_STEP: f32 = 30.0;

    if scroll.abs() <= DEAD_ZONE {
        return 0;
    }

    // Reset stale residuals when the user reverses scroll direction.
    if *scroll_accum != 0.0 && scroll.signum() != scroll_accum.signum() {
        *scroll_accum = 0.0;
    }
    *scroll_accum += scroll;

    let raw_steps = (*scroll_accum / PIXELS_PER_FRAME_STEP).trunc() as i32;
    if raw_steps == 0 {
        return 0;
    }

    *scroll_accum -= raw_steps as f32 * PIXELS_PER_FRAME_STEP;
    -raw_steps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zoom_is_clamped() {
        let mut viewport = ViewportSettings::default();
        viewport.set_zoom(40.0);
        assert_eq!(viewport.zoom, MAX_ZOOM);
        viewport.zoom_by(0.0001);
        assert_eq!(viewport.zoom, MIN_ZOOM);
        viewport.set_zoom(f32::NAN);
        assert_eq!(viewport.zoom, MIN_ZOOM);
    }

    #[test]
    fn rotation_cycles_both_ways() {
        let mut viewport = ViewportSettings::default();
        for expected in [90, 180, 270, 0] {
            viewport.rotate_clockwise();
            assert_eq!(viewport.rotation.degrees(), expected);
        }
        viewport.rotate_counter_clockwise();
        assert_eq!(viewport.rotation, Rotation::ThreeQuarter);
    }

    #[test]
    fn reset_restores_transform_but_keeps_preferences() {
        let mut viewport = ViewportSettings::default();
        viewport.set_zoom(3.0);
        viewport.pan_by(egui::vec2(10.0, -4.0));
        viewport.rotate_clockwise();
        viewport.toggle_invert();
        viewport.toggle_flip_horizontal();
        viewport.toggle_flip_vertical();
        viewport.active_tool = ActiveTool::Pan;
        viewport.show_metadata = false;

        viewport.reset();

        assert_eq!(viewport.zoom, 1.0);
        assert_eq!(viewport.pan, egui::Vec2::ZERO);
        assert_eq!(viewport.rotation, Rotation::None);
        assert!(!viewport.invert && !viewport.flip_horizontal && !viewport.flip_vertical);
        assert_eq!(viewport.active_tool, ActiveTool::Pan);
        assert!(!viewport.show_metadata);
    }

    #[test]
    fn drag_adjusts_window_by_span_and_sensitivity() {
        let start = WindowLevel::new(40.0, 400.0);
        let moved = apply_window_level_drag(start, 0, 1024, egui::vec2(10.0, 5.0), 1.5)
            .expect("window changed");
        assert_eq!(moved, WindowLevel::new(30.0, 420.0));

        let faster = apply_window_level_drag(start, 0, 1024, egui::vec2(10.0, 0.0), 3.0)
            .expect("window changed");
        assert_eq!(faster.width, 440.0);

        assert_eq!(
            apply_window_level_drag(start, 0, 1024, egui::Vec2::ZERO, 1.5),
            None
        );
    }

    #[test]
    fn drag_never_collapses_width() {
        let start = WindowLevel::new(0.0, 5.0);
        let moved = apply_window_level_drag(start, 0, 512, egui::vec2(-100.0, 0.0), 1.5)
            .expect("window changed");
        assert_eq!(moved.width, 1.0);
    }

    #[test]
    fn zoom_factor_grows_with_sensitivity() {
        assert_eq!(zoom_factor_from_scroll(0.0, 0.05), 1.0);
        let slow = zoom_factor_from_scroll(30.0, 0.01);
        let fast = zoom_factor_from_scroll(30.0, 0.2);
        assert!(slow > 1.0 && fast > slow);
        assert!(zoom_factor_from_scroll(-30.0, 0.05) < 1.0);
    }

    #[test]
    fn scroll_steps_accumulate_and_respect_direction() {
        let mut viewport = ViewportSettings::default();
        assert_eq!(viewport.scroll_steps(20.0, ScrollDirection::Natural), 0);
        assert_eq!(viewport.scroll_steps(20.0, ScrollDirection::Natural), -1);
        assert_eq!(viewport.scroll_steps(-0.2, ScrollDirection::Natural), 0);
        assert_eq!(viewport.scroll_steps(-60.0, ScrollDirection::Natural), 2);

        let mut inverted = ViewportSettings::default();
        assert_eq!(inverted.scroll_steps(60.0, ScrollDirection::Inverted), 2);
    }
}
