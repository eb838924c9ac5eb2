//! Configuración del daemon (TOML).
//!
//! Todos los umbrales del pipeline viven aquí con sus valores por defecto;
//! `Config::load` valida antes de que arranque el bucle de frames.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::feature_extractor::FeatureLayout;
use crate::hid::parse_key;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML inválido: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("No se pudo serializar la configuración: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Preset desconocido: {0}")]
    UnknownPreset(String),

    #[error("Configuración inválida: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub classifier: ClassifierConfig,
    pub smoothing: SmoothingConfig,
    pub mode: ModeConfig,
    pub cursor: CursorConfig,
    pub click: ClickConfig,
    pub actions: ActionsConfig,
    pub runtime: RuntimeConfig,
}

/// Clasificación geométrica, aprendida y política de fusión
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Margen ε para considerar un dedo extendido (coordenadas normalizadas)
    pub extension_epsilon: f32,
    /// Dedos no extendidos necesarios para "closed"
    pub closed_min_fingers: usize,
    /// Confianza fija de la ruta geométrica
    pub fallback_confidence: f32,
    /// Confianza mínima para aceptar la predicción aprendida
    pub min_learned_confidence: f32,
    pub knn_k: usize,
    /// Distancia media a partir de la cual la confianza KNN se divide a la mitad
    pub knn_max_mean_distance: f32,
    pub feature_layout: FeatureLayout,
    /// Muestras etiquetadas para el KNN (JSON)
    pub training_data: Option<PathBuf>,
    pub onnx_model: Option<PathBuf>,
    pub onnx_classes: Option<PathBuf>,
    pub rules: RuleThresholds,
}

/// Umbrales de las reglas de emotes a dos manos
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleThresholds {
    /// Ambas manos cerradas por encima de esta altura
    pub goblin_max_y: f32,
    /// Separación horizontal mínima entre manos abiertas
    pub wizard_min_spread: f32,
    pub princess_x: (f32, f32),
    pub princess_y: (f32, f32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// Tamaño W de la ventana de votación del modo acción
    pub window_size: usize,
    /// Ventana abierta/cerrada en modo cursor
    pub hand_state_window: usize,
    /// Segundos que la etiqueta debe mantenerse antes de disparar
    pub hold_time: f64,
    /// Segundos entre disparos de la misma etiqueta
    pub cooldown: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeConfig {
    /// Segundos continuos con 2+ manos antes de entrar en modo acción
    pub debounce_window: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CursorConfig {
    pub screen_width: u32,
    pub screen_height: u32,
    pub zone_min: f32,
    pub zone_max: f32,
    /// Píxeles desde el borde
    pub margin: f32,
    /// EMA en movimiento normal (más bajo = más suave)
    pub alpha: f32,
    /// EMA durante un arrastre
    pub drag_alpha: f32,
    /// Píxeles mínimos para mover (fuera de arrastre)
    pub movement_threshold: f32,
    /// Landmark que guía el cursor (0 = muñeca, 8 = punta del índice)
    pub control_landmark: usize,
    /// Espejar x para cámaras frontales
    pub mirror_x: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClickConfig {
    pub cooldown: f64,
    /// Distancia máxima (px) para considerar click
    pub distance_px: f32,
    /// Duración mínima (s) de un arrastre
    pub min_drag_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionsConfig {
    pub cooldown: f64,
    pub step_delay_ms: u64,
    pub emotes: Vec<EmoteAction>,
}

/// Secuencia de pasos asociada a una etiqueta
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmoteAction {
    pub label: String,
    pub steps: Vec<ActionStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStep {
    Key(String),
    Click([i32; 2]),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Preset base (default, high_performance, high_accuracy, responsive, smooth)
    pub preset: Option<String>,
    /// 0 = sin límite
    pub max_fps: u32,
    /// Comando del estimador de pose (emite JSON por línea); sin comando se lee stdin
    pub pose_command: Option<Vec<String>>,
    pub emergency_key: String,
    pub failsafe_corners: bool,
    pub device_name: String,
    pub emit_events: bool,
    pub dry_run: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            extension_epsilon: 0.02,
            closed_min_fingers: 3,
            fallback_confidence: 0.7,
            min_learned_confidence: 0.6,
            knn_k: 5,
            knn_max_mean_distance: 0.5,
            feature_layout: FeatureLayout::HandMeasures,
            training_data: None,
            onnx_model: None,
            onnx_classes: None,
            rules: RuleThresholds::default(),
        }
    }
}

impl Default for RuleThresholds {
    fn default() -> Self {
        Self {
            goblin_max_y: 0.45,
            wizard_min_spread: 0.3,
            princess_x: (0.3, 0.7),
            princess_y: (0.25, 0.5),
        }
    }
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            window_size: 8,
            hand_state_window: 5,
            hold_time: 1.0,
            cooldown: 2.0,
        }
    }
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            debounce_window: 0.5,
        }
    }
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            screen_width: 1920,
            screen_height: 1080,
            zone_min: 0.10,
            zone_max: 0.90,
            margin: 0.0,
            alpha: 0.3,
            drag_alpha: 0.7,
            movement_threshold: 2.0,
            control_landmark: 0,
            mirror_x: false,
        }
    }
}

impl Default for ClickConfig {
    fn default() -> Self {
        Self {
            cooldown: 0.3,
            distance_px: 10.0,
            min_drag_secs: 0.15,
        }
    }
}

impl Default for ActionsConfig {
    fn default() -> Self {
        let emote = |label: &str, key: &str| EmoteAction {
            label: label.to_string(),
            steps: vec![
                ActionStep::Key("e".to_string()),
                ActionStep::Key(key.to_string()),
            ],
        };
        Self {
            cooldown: 2.0,
            step_delay_ms: 100,
            emotes: vec![
                emote("GOBLIN", "g"),
                emote("WIZARD", "w"),
                emote("PRINCESS", "p"),
            ],
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            preset: None,
            max_fps: 60,
            pose_command: None,
            emergency_key: "esc".to_string(),
            failsafe_corners: true,
            device_name: "manocursor-hid".to_string(),
            emit_events: false,
            dry_run: false,
        }
    }
}

impl Config {
    /// Configuración base de un preset con nombre
    pub fn preset(name: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        match name {
            "default" => {}
            "high_performance" => {
                config.smoothing.hand_state_window = 3;
            }
            "high_accuracy" => {
                config.smoothing.hand_state_window = 7;
                config.cursor.alpha = 0.2;
            }
            "responsive" => {
                config.cursor.alpha = 0.5;
                config.smoothing.hand_state_window = 3;
                config.click.cooldown = 0.2;
            }
            "smooth" => {
                config.cursor.alpha = 0.2;
                config.smoothing.hand_state_window = 7;
                config.cursor.movement_threshold = 1.0;
            }
            other => return Err(ConfigError::UnknownPreset(other.to_string())),
        }
        config.runtime.preset = Some(name.to_string());
        Ok(config)
    }

    /// Carga desde TOML. Si el archivo nombra `runtime.preset`, los valores
    /// del archivo se aplican encima de ese preset.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let overrides: toml::Value = toml::from_str(content)?;
        let preset = overrides
            .get("runtime")
            .and_then(|runtime| runtime.get("preset"))
            .and_then(|preset| preset.as_str())
            .unwrap_or("default");

        let mut merged = toml::Value::try_from(Self::preset(preset)?)?;
        merge_toml(&mut merged, overrides);

        let config: Self = merged.try_into()?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Falla rápido ante valores fuera de rango, antes del bucle de frames
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.classifier;
        check_unit("classifier.extension_epsilon", c.extension_epsilon)?;
        if c.closed_min_fingers == 0 || c.closed_min_fingers > 4 {
            return Err(invalid(format!(
                "classifier.closed_min_fingers debe estar en [1, 4], recibido {}",
                c.closed_min_fingers
            )));
        }
        check_unit("classifier.fallback_confidence", c.fallback_confidence)?;
        check_unit("classifier.min_learned_confidence", c.min_learned_confidence)?;
        if c.knn_k == 0 {
            return Err(invalid("classifier.knn_k debe ser > 0"));
        }
        check_non_negative("classifier.knn_max_mean_distance", c.knn_max_mean_distance as f64)?;

        let s = &self.smoothing;
        if s.window_size == 0 || s.hand_state_window == 0 {
            return Err(invalid("las ventanas de suavizado deben ser > 0"));
        }
        check_non_negative("smoothing.hold_time", s.hold_time)?;
        check_non_negative("smoothing.cooldown", s.cooldown)?;
        check_non_negative("mode.debounce_window", self.mode.debounce_window)?;

        let cur = &self.cursor;
        if cur.screen_width == 0 || cur.screen_height == 0 {
            return Err(invalid("cursor.screen_width/screen_height deben ser > 0"));
        }
        check_unit("cursor.zone_min", cur.zone_min)?;
        check_unit("cursor.zone_max", cur.zone_max)?;
        if cur.zone_min >= cur.zone_max {
            return Err(invalid(format!(
                "cursor.zone_min ({}) debe ser menor que cursor.zone_max ({})",
                cur.zone_min, cur.zone_max
            )));
        }
        check_non_negative("cursor.margin", cur.margin as f64)?;
        let min_dim = cur.screen_width.min(cur.screen_height) as f32;
        if cur.margin * 2.0 >= min_dim {
            return Err(invalid(format!(
                "cursor.margin ({}) no cabe en la pantalla",
                cur.margin
            )));
        }
        check_alpha("cursor.alpha", cur.alpha)?;
        check_alpha("cursor.drag_alpha", cur.drag_alpha)?;
        check_non_negative("cursor.movement_threshold", cur.movement_threshold as f64)?;
        if cur.control_landmark >= crate::types::NUM_LANDMARKS {
            return Err(invalid(format!(
                "cursor.control_landmark fuera de rango: {}",
                cur.control_landmark
            )));
        }

        check_non_negative("click.cooldown", self.click.cooldown)?;
        check_non_negative("click.distance_px", self.click.distance_px as f64)?;
        check_non_negative("click.min_drag_secs", self.click.min_drag_secs)?;

        check_non_negative("actions.cooldown", self.actions.cooldown)?;
        let mut seen = HashSet::new();
        for emote in &self.actions.emotes {
            if !seen.insert(emote.label.as_str()) {
                return Err(invalid(format!("emote duplicado: {}", emote.label)));
            }
            if emote.steps.is_empty() {
                return Err(invalid(format!("el emote {} no tiene pasos", emote.label)));
            }
            for step in &emote.steps {
                if let ActionStep::Key(name) = step {
                    parse_key(name).map_err(|e| invalid(format!("emote {}: {}", emote.label, e)))?;
                }
            }
        }

        parse_key(&self.runtime.emergency_key)
            .map_err(|e| invalid(format!("runtime.emergency_key: {}", e)))?;

        Ok(())
    }

    pub fn emote(&self, label: &str) -> Option<&EmoteAction> {
        self.actions.emotes.iter().find(|e| e.label == label)
    }
}

fn merge_toml(base: &mut toml::Value, overrides: toml::Value) {
    match (base, overrides) {
        (toml::Value::Table(base_table), toml::Value::Table(over_table)) => {
            for (key, value) in over_table {
                match base_table.get_mut(&key) {
                    Some(existing) => merge_toml(existing, value),
                    None => {
                        base_table.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

fn check_non_negative(field: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(invalid(format!("{} debe ser >= 0, recibido {}", field, value)));
    }
    Ok(())
}

fn check_unit(field: &str, value: f32) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(invalid(format!("{} debe estar en [0, 1], recibido {}", field, value)));
    }
    Ok(())
}

fn check_alpha(field: &str, value: f32) -> Result<(), ConfigError> {
    if !(value > 0.0 && value <= 1.0) {
        return Err(invalid(format!("{} debe estar en (0, 1], recibido {}", field, value)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.smoothing.window_size, 8);
        assert_eq!(config.cursor.drag_alpha, 0.7);
        assert_eq!(config.actions.emotes.len(), 3);
    }

    #[test]
    fn rejects_inverted_zone() {
        let mut config = Config::default();
        config.cursor.zone_min = 0.9;
        config.cursor.zone_max = 0.9;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_negative_cooldown() {
        let err = Config::from_toml_str("[smoothing]\ncooldown = -1.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = Config::from_toml_str("[click]\ncooldown = -0.1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unknown_key_name() {
        let toml = r#"
[[actions.emotes]]
label = "GOBLIN"
steps = [{ key = "no-such-key" }]
"#;
        assert!(matches!(
            Config::from_toml_str(toml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config = Config::from_toml_str("[cursor]\nscreen_width = 1000\n").unwrap();
        assert_eq!(config.cursor.screen_width, 1000);
        assert_eq!(config.cursor.screen_height, 1080);
        assert_eq!(config.mode.debounce_window, 0.5);
    }

    #[test]
    fn preset_is_base_for_file_values() {
        let toml = "[runtime]\npreset = \"smooth\"\n[cursor]\nalpha = 0.4\n";
        let config = Config::from_toml_str(toml).unwrap();
        // El archivo pisa el alpha del preset, el resto viene del preset
        assert_eq!(config.cursor.alpha, 0.4);
        assert_eq!(config.cursor.movement_threshold, 1.0);
        assert_eq!(config.smoothing.hand_state_window, 7);
    }

    #[test]
    fn unknown_preset_fails() {
        let err = Config::from_toml_str("[runtime]\npreset = \"turbo\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPreset(_)));
    }

    #[test]
    fn save_and_load_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("manocursor.toml");

        let mut config = Config::default();
        config.actions.emotes.push(EmoteAction {
            label: "YAWN".to_string(),
            steps: vec![ActionStep::Key("e".to_string()), ActionStep::Click([640, 360])],
        });
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.actions, config.actions);
        assert_eq!(loaded.cursor, config.cursor);
    }
}
