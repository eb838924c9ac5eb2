use serde::{Deserialize, Serialize};
use std::fmt;

/// Número de landmarks por mano (modelo de 21 puntos)
pub const NUM_LANDMARKS: usize = 21;

/// Índices de landmarks relevantes (0 = muñeca)
pub const WRIST: usize = 0;
pub const INDEX_MCP: usize = 5;
pub const INDEX_PIP: usize = 6;
pub const INDEX_TIP: usize = 8;
pub const MIDDLE_MCP: usize = 9;
pub const MIDDLE_PIP: usize = 10;
pub const MIDDLE_TIP: usize = 12;
pub const RING_PIP: usize = 14;
pub const RING_TIP: usize = 16;
pub const PINKY_MCP: usize = 17;
pub const PINKY_PIP: usize = 18;
pub const PINKY_TIP: usize = 20;

/// Pares (punta, articulación proximal) de los cuatro dedos sin pulgar
pub const FINGER_PAIRS: [(usize, usize); 4] = [
    (INDEX_TIP, INDEX_PIP),
    (MIDDLE_TIP, MIDDLE_PIP),
    (RING_TIP, RING_PIP),
    (PINKY_TIP, PINKY_PIP),
];

/// Punto normalizado en [0,1]x[0,1]; y crece hacia abajo
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y, z: 0.0 }
    }

    pub fn distance_2d(&self, other: &Landmark) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Handedness {
    #[serde(alias = "left")]
    Left,
    #[serde(alias = "right")]
    Right,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Una mano detectada en un frame, siempre con 21 landmarks
#[derive(Debug, Clone, PartialEq)]
pub struct HandObservation {
    pub landmarks: [Landmark; NUM_LANDMARKS],
    pub handedness: Handedness,
}

impl HandObservation {
    /// Construye la observación a partir de una lista de puntos.
    /// Una mano con menos de 21 puntos se considera ausente.
    pub fn from_points(points: &[Landmark], handedness: Handedness) -> Option<Self> {
        if points.len() < NUM_LANDMARKS {
            return None;
        }
        let mut landmarks = [Landmark::default(); NUM_LANDMARKS];
        landmarks.copy_from_slice(&points[..NUM_LANDMARKS]);
        Some(Self {
            landmarks,
            handedness,
        })
    }

    pub fn landmark(&self, idx: usize) -> Landmark {
        self.landmarks[idx]
    }
}

/// Puntos de la boca usados por las variantes de emotes faciales
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MouthLandmarks {
    pub upper: Landmark,
    pub lower: Landmark,
    pub left: Landmark,
    pub right: Landmark,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceObservation {
    pub center_x: f32,
    pub center_y: f32,
    pub width: f32,
    pub height: f32,
    #[serde(default)]
    pub mouth: Option<MouthLandmarks>,
}

/// Todo lo que el estimador de pose entrega en un frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoseFrame {
    /// Marca de tiempo en segundos
    pub t: f64,
    pub hands: Vec<HandObservation>,
    pub face: Option<FaceObservation>,
}

impl PoseFrame {
    pub fn new(t: f64, hands: Vec<HandObservation>) -> Self {
        Self {
            t,
            hands,
            face: None,
        }
    }

    pub fn hand_count(&self) -> usize {
        self.hands.len()
    }
}

/// Etiqueta discreta de gesto: abierta, cerrada o una pose con nombre (emote)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum GestureLabel {
    Open,
    Closed,
    Named(String),
}

impl GestureLabel {
    pub fn as_str(&self) -> &str {
        match self {
            GestureLabel::Open => "open",
            GestureLabel::Closed => "closed",
            GestureLabel::Named(name) => name,
        }
    }
}

impl From<String> for GestureLabel {
    fn from(value: String) -> Self {
        match value.as_str() {
            "open" => GestureLabel::Open,
            "closed" => GestureLabel::Closed,
            _ => GestureLabel::Named(value),
        }
    }
}

impl From<&str> for GestureLabel {
    fn from(value: &str) -> Self {
        GestureLabel::from(value.to_string())
    }
}

impl From<GestureLabel> for String {
    fn from(label: GestureLabel) -> Self {
        label.as_str().to_string()
    }
}

impl fmt::Display for GestureLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Etiqueta + confianza en [0,1]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub label: GestureLabel,
    pub confidence: f32,
}

impl Prediction {
    pub fn new(label: GestureLabel, confidence: f32) -> Self {
        Self { label, confidence }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hand_with_few_points_is_absent() {
        let points = vec![Landmark::new(0.5, 0.5); 20];
        assert!(HandObservation::from_points(&points, Handedness::Right).is_none());

        let points = vec![Landmark::new(0.5, 0.5); 21];
        assert!(HandObservation::from_points(&points, Handedness::Right).is_some());
    }

    #[test]
    fn label_string_form() {
        assert_eq!(GestureLabel::from("open"), GestureLabel::Open);
        assert_eq!(GestureLabel::from("closed"), GestureLabel::Closed);
        assert_eq!(
            GestureLabel::from("GOBLIN"),
            GestureLabel::Named("GOBLIN".to_string())
        );

        let json = serde_json::to_string(&GestureLabel::Closed).unwrap();
        assert_eq!(json, "\"closed\"");
        let back: GestureLabel = serde_json::from_str("\"WIZARD\"").unwrap();
        assert_eq!(back.to_string(), "WIZARD");
    }
}
