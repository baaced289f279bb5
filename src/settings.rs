use serde::{Deserialize, Serialize};

use crate::storage::{Storage, SETTINGS_KEY};

pub const DEFAULT_WINDOW_LEVEL_SENSITIVITY: f32 = 1.5;
pub const DEFAULT_ZOOM_SENSITIVITY: f32 = 0.05;
pub const WINDOW_LEVEL_SENSITIVITY_RANGE: std::ops::RangeInclusive<f32> = 0.5..=3.0;
pub const ZOOM_SENSITIVITY_RANGE: std::ops::RangeInclusive<f32> = 0.01..=0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    /// Wheel up moves to the previous instance.
    #[default]
    Natural,
    Inverted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserSettings {
    pub theme: Theme,
    pub scroll_direction: ScrollDirection,
    pub window_level_sensitivity: f32,
    pub zoom_sensitivity: f32,
    pub hide_personal_info: bool,
    pub persist_studies: bool,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            theme: Theme::Dark,
            scroll_direction: ScrollDirection::Natural,
            window_level_sensitivity: DEFAULT_WINDOW_LEVEL_SENSITIVITY,
            zoom_sensitivity: DEFAULT_ZOOM_SENSITIVITY,
            hide_personal_info: true,
            persist_studies: true,
        }
    }
}

impl UserSettings {
    fn sanitized(mut self) -> Self {
        self.window_level_sensitivity = clamp_or_default(
            self.window_level_sensitivity,
            WINDOW_LEVEL_SENSITIVITY_RANGE,
            DEFAULT_WINDOW_LEVEL_SENSITIVITY,
        );
        self.zoom_sensitivity = clamp_or_default(
            self.zoom_sensitivity,
            ZOOM_SENSITIVITY_RANGE,
            DEFAULT_ZOOM_SENSITIVITY,
        );
        self
    }
}

fn clamp_or_default(value: f32, range: std::ops::RangeInclusive<f32>, default: f32) -> f32 {
    if value.is_finite() {
        value.clamp(*range.start(), *range.end())
    } else {
        default
    }
}

/// User preferences, written through to storage on every change.
#[derive(Debug)]
pub struct SettingsStore {
    settings: UserSettings,
    storage: Storage,
}

impl SettingsStore {
    pub fn load(storage: Storage) -> Self {
        let settings = storage
            .load::<UserSettings>(SETTINGS_KEY)
            .map(UserSettings::sanitized)
            .unwrap_or_default();
        Self { settings, storage }
    }

    pub fn get(&self) -> &UserSettings {
        &self.settings
    }

    pub fn set_theme(&mut self, theme: Theme) {
        self.update(|settings| settings.theme = theme);
    }

    pub fn set_scroll_direction(&mut self, direction: ScrollDirection) {
        self.update(|settings| settings.scroll_direction = direction);
    }

    pub fn set_window_level_sensitivity(&mut self, value: f32) {
        self.update(|settings| {
            settings.window_level_sensitivity = clamp_or_default(
                value,
                WINDOW_LEVEL_SENSITIVITY_RANGE,
                settings.window_level_sensitivity,
            );
        });
    }

    pub fn set_zoom_sensitivity(&mut self, value: f32) {
        self.update(|settings| {
            settings.zoom_sensitivity =
                clamp_or_default(value, ZOOM_SENSITIVITY_RANGE, settings.zoom_sensitivity);
        });
    }

    pub fn set_hide_personal_info(&mut self, hide: bool) {
        self.update(|settings| settings.hide_personal_info = hide);
    }

    pub fn set_persist_studies(&mut self, persist: bool) {
        self.update(|settings| settings.persist_studies = persist);
    }

    pub fn reset_to_defaults(&mut self) {
        self.update(|settings| *settings = UserSettings::default());
    }

    fn update(&mut self, change: impl FnOnce(&mut UserSettings)) {
        change(&mut self.settings);
        if let Err(err) = self.storage.save(SETTINGS_KEY, &self.settings) {
            log::error!("Failed to save settings: {err:#}");
        }
    }
}
