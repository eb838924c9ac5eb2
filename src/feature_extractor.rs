use crate::types::{
    FaceObservation, Handedness, HandObservation, PoseFrame, FINGER_PAIRS, INDEX_MCP, INDEX_TIP,
    MIDDLE_MCP, NUM_LANDMARKS, PINKY_MCP, PINKY_TIP, WRIST,
};
use serde::{Deserialize, Serialize};

/// Features por mano en el layout de medidas
const HAND_MEASURES_PER_HAND: usize = 8;
/// Bloque por mano en el layout concatenado: presencia + 42 coords + orientación
const HAND_BLOCK: usize = 1 + NUM_LANDMARKS * 2 + 1;
const FACE_FEATURES: usize = 4;
const MOUTH_FEATURES: usize = 6;
/// Boca ausente: sin apertura, centrada
const NEUTRAL_MOUTH: [f32; MOUTH_FEATURES] = [0.0, 0.0, 0.0, 0.0, 0.5, 0.5];

/// Cómo se arma el vector de entrada del clasificador aprendido
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureLayout {
    /// 16 valores: centro, dedos extendidos, altura y apertura de dos manos
    HandMeasures,
    /// 98 valores: cara, boca y landmarks de ambas manos con orientación
    LandmarkConcat,
}

impl FeatureLayout {
    pub fn len(self) -> usize {
        match self {
            FeatureLayout::HandMeasures => HAND_MEASURES_PER_HAND * 2,
            FeatureLayout::LandmarkConcat => FACE_FEATURES + MOUTH_FEATURES + HAND_BLOCK * 2,
        }
    }
}

/// Un dedo cuenta como extendido si la punta queda por encima de la
/// articulación proximal con margen `epsilon` (y crece hacia abajo).
pub fn is_finger_extended(hand: &HandObservation, tip: usize, pip: usize, epsilon: f32) -> bool {
    hand.landmark(tip).y < hand.landmark(pip).y - epsilon
}

pub fn extended_fingers(hand: &HandObservation, epsilon: f32) -> usize {
    FINGER_PAIRS
        .iter()
        .filter(|(tip, pip)| is_finger_extended(hand, *tip, *pip, epsilon))
        .count()
}

/// `closed` si al menos `min_folded` de los 4 dedos no están extendidos
pub fn is_hand_closed(hand: &HandObservation, epsilon: f32, min_folded: usize) -> bool {
    FINGER_PAIRS.len() - extended_fingers(hand, epsilon) >= min_folded
}

/// Punto medio entre muñeca y MCP del dedo medio
pub fn hand_center(hand: &HandObservation) -> (f32, f32) {
    let wrist = hand.landmark(WRIST);
    let mcp = hand.landmark(MIDDLE_MCP);
    ((wrist.x + mcp.x) / 2.0, (wrist.y + mcp.y) / 2.0)
}

/// Distancia entre la punta del índice y la del meñique
pub fn fingertip_spread(hand: &HandObservation) -> f32 {
    hand.landmark(INDEX_TIP).distance_2d(&hand.landmark(PINKY_TIP))
}

/// Orientación de la palma en [0,1]: > 0.5 se lee como palma hacia la cámara.
/// Usa la componente z del producto cruz muñeca→MCP índice × muñeca→MCP meñique.
pub fn palm_orientation(hand: &HandObservation) -> f32 {
    let wrist = hand.landmark(WRIST);
    let index = hand.landmark(INDEX_MCP);
    let pinky = hand.landmark(PINKY_MCP);

    let (v1x, v1y) = (index.x - wrist.x, index.y - wrist.y);
    let (v2x, v2y) = (pinky.x - wrist.x, pinky.y - wrist.y);
    let normal_z = v1x * v2y - v1y * v2x;

    let score = ((normal_z + 1.0) / 2.0).clamp(0.0, 1.0);
    if hand.handedness == Handedness::Left {
        1.0 - score
    } else {
        score
    }
}

pub struct FeatureExtractor {
    layout: FeatureLayout,
}

impl FeatureExtractor {
    pub fn new(layout: FeatureLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> FeatureLayout {
        self.layout
    }

    pub fn feature_len(&self) -> usize {
        self.layout.len()
    }

    /// Extrae el vector del frame o `None` si el layout no se puede llenar
    pub fn extract(&self, frame: &PoseFrame) -> Option<Vec<f32>> {
        let features = match self.layout {
            FeatureLayout::HandMeasures => Self::hand_measures(&frame.hands)?,
            FeatureLayout::LandmarkConcat => Self::landmark_concat(frame),
        };
        debug_assert_eq!(features.len(), self.layout.len());
        Some(features)
    }

    /// 8 valores por mano, exactamente dos manos en orden de detección
    fn hand_measures(hands: &[HandObservation]) -> Option<Vec<f32>> {
        if hands.len() < 2 {
            return None;
        }

        let mut features = Vec::with_capacity(HAND_MEASURES_PER_HAND * 2);
        for hand in hands.iter().take(2) {
            let (cx, cy) = hand_center(hand);
            features.push(cx);
            features.push(cy);
            for (tip, pip) in FINGER_PAIRS {
                let extended = is_finger_extended(hand, tip, pip, 0.0);
                features.push(if extended { 1.0 } else { 0.0 });
            }
            // Altura de la mano: mismo valor que cy
            features.push(cy);
            features.push(fingertip_spread(hand));
        }
        Some(features)
    }

    /// Cara + boca + mano izquierda + mano derecha. Sin cara, bloque en ceros
    /// y boca neutra.
    fn landmark_concat(frame: &PoseFrame) -> Vec<f32> {
        let mut features = Vec::with_capacity(FeatureLayout::LandmarkConcat.len());
        match &frame.face {
            Some(face) => {
                features.extend([face.center_x, face.center_y, face.width, face.height]);
                features.extend(Self::mouth_features(face));
            }
            None => {
                features.extend([0.0; FACE_FEATURES]);
                features.extend(NEUTRAL_MOUTH);
            }
        }

        let mut left = [0.0f32; HAND_BLOCK];
        let mut right = [0.0f32; HAND_BLOCK];
        for hand in &frame.hands {
            let block = Self::hand_block(hand);
            match hand.handedness {
                Handedness::Left => left = block,
                _ => right = block,
            }
        }
        features.extend(left);
        features.extend(right);
        features
    }

    fn hand_block(hand: &HandObservation) -> [f32; HAND_BLOCK] {
        let mut block = [0.0f32; HAND_BLOCK];
        block[0] = 1.0;
        for (i, lm) in hand.landmarks.iter().enumerate() {
            block[1 + i * 2] = lm.x;
            block[2 + i * 2] = lm.y;
        }
        block[HAND_BLOCK - 1] = palm_orientation(hand);
        block
    }

    /// ratio, alto, ancho, área, centro x, centro y
    fn mouth_features(face: &FaceObservation) -> [f32; MOUTH_FEATURES] {
        let Some(mouth) = face.mouth else {
            return NEUTRAL_MOUTH;
        };

        let height = (mouth.upper.y - mouth.lower.y).abs();
        let width = (mouth.left.x - mouth.right.x).abs();
        let ratio = if width > 0.001 { height / width } else { 0.0 };
        [
            ratio,
            height,
            width,
            height * width,
            (mouth.left.x + mouth.right.x) / 2.0,
            (mouth.upper.y + mouth.lower.y) / 2.0,
        ]
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::Landmark;
    use approx::assert_relative_eq;

    /// Mano sintética centrada en (cx, cy) con `extended` dedos extendidos
    pub(crate) fn synthetic_hand(cx: f32, cy: f32, extended: usize) -> HandObservation {
        let mut points = vec![Landmark::new(cx, cy); NUM_LANDMARKS];
        points[WRIST] = Landmark::new(cx, cy + 0.05);
        points[MIDDLE_MCP] = Landmark::new(cx, cy - 0.05);
        points[INDEX_MCP] = Landmark::new(cx - 0.03, cy - 0.04);
        points[PINKY_MCP] = Landmark::new(cx + 0.03, cy - 0.03);
        for (n, (tip, pip)) in FINGER_PAIRS.iter().enumerate() {
            let x = cx - 0.03 + 0.02 * n as f32;
            points[*pip] = Landmark::new(x, cy - 0.08);
            points[*tip] = if n < extended {
                Landmark::new(x, cy - 0.15)
            } else {
                Landmark::new(x, cy - 0.06)
            };
        }
        HandObservation::from_points(&points, Handedness::Right).unwrap()
    }

    #[test]
    fn counts_extended_fingers() {
        assert_eq!(extended_fingers(&synthetic_hand(0.5, 0.5, 4), 0.02), 4);
        assert_eq!(extended_fingers(&synthetic_hand(0.5, 0.5, 1), 0.02), 1);
        assert!(is_hand_closed(&synthetic_hand(0.5, 0.5, 1), 0.02, 3));
        assert!(!is_hand_closed(&synthetic_hand(0.5, 0.5, 2), 0.02, 3));
    }

    #[test]
    fn epsilon_margin_applies() {
        let mut hand = synthetic_hand(0.5, 0.5, 0);
        // Punta 0.01 por encima de la articulación: no supera ε = 0.02
        hand.landmarks[INDEX_TIP].y = hand.landmarks[6].y - 0.01;
        assert!(!is_finger_extended(&hand, INDEX_TIP, 6, 0.02));
        assert!(is_finger_extended(&hand, INDEX_TIP, 6, 0.0));
    }

    #[test]
    fn hand_measures_needs_two_hands() {
        let extractor = FeatureExtractor::new(FeatureLayout::HandMeasures);
        let one = PoseFrame::new(0.0, vec![synthetic_hand(0.3, 0.4, 4)]);
        assert!(extractor.extract(&one).is_none());

        let two = PoseFrame::new(
            0.0,
            vec![synthetic_hand(0.3, 0.4, 4), synthetic_hand(0.7, 0.4, 0)],
        );
        let features = extractor.extract(&two).unwrap();
        assert_eq!(features.len(), 16);
        assert_relative_eq!(features[0], 0.3, epsilon = 1e-6);
        assert_eq!(&features[2..6], &[1.0, 1.0, 1.0, 1.0]);
        assert_eq!(&features[10..14], &[0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn landmark_concat_layout() {
        let extractor = FeatureExtractor::new(FeatureLayout::LandmarkConcat);
        let mut frame = PoseFrame::new(0.0, vec![synthetic_hand(0.3, 0.4, 4)]);
        frame.face = Some(FaceObservation {
            center_x: 0.5,
            center_y: 0.3,
            width: 0.2,
            height: 0.3,
            mouth: None,
        });
        let features = extractor.extract(&frame).unwrap();
        assert_eq!(features.len(), 98);
        // Sin boca: centro neutro
        assert_eq!(features[8], 0.5);
        // Mano derecha en el segundo bloque, la izquierda vacía
        assert_eq!(features[10], 0.0);
        assert_eq!(features[10 + HAND_BLOCK], 1.0);
    }

    #[test]
    fn landmark_concat_without_face_is_zero_filled() {
        let extractor = FeatureExtractor::new(FeatureLayout::LandmarkConcat);
        let frame = PoseFrame::new(0.0, vec![synthetic_hand(0.3, 0.4, 4)]);
        let features = extractor.extract(&frame).unwrap();
        assert_eq!(features.len(), 98);
        assert_eq!(&features[..4], &[0.0; 4]);
        assert_eq!(&features[4..10], &NEUTRAL_MOUTH);
        assert_eq!(features[10 + HAND_BLOCK], 1.0);
    }

    #[test]
    fn orientation_inverts_for_left_hand() {
        let right = synthetic_hand(0.5, 0.5, 4);
        let mut left = right.clone();
        left.handedness = Handedness::Left;
        assert_relative_eq!(
            palm_orientation(&right) + palm_orientation(&left),
            1.0,
            epsilon = 1e-6
        );
    }
}
