use crate::config::{ClassifierConfig, RuleThresholds};
use crate::feature_extractor::{hand_center, is_hand_closed, FeatureExtractor, FeatureLayout};
use crate::types::{GestureLabel, HandObservation, PoseFrame, Prediction};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

#[cfg(feature = "onnx")]
use ort::{session::Session, tensor::TensorElementType, value::ValueType};

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[cfg(feature = "onnx")]
    #[error("ONNX Runtime error: {0}")]
    OnnxError(#[from] ort::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid feature size: expected {expected}, got {actual}")]
    InvalidFeatureSize { expected: usize, actual: usize },

    #[error("Training set is inconsistent: {features} feature rows, {labels} labels")]
    InconsistentTrainingSet { features: usize, labels: usize },

    #[error("Model has no training data")]
    NotTrained,

    #[error("No output tensor found")]
    NoOutputTensor,

    #[error("Missing ONNX {kind}")]
    MissingIo { kind: &'static str },
}

/// Capacidad común: frame → etiqueta + confianza
pub trait PoseClassifier {
    fn classify(&mut self, frame: &PoseFrame) -> Option<Prediction>;
}

/// Modelo aprendido sobre un vector de features de longitud fija
pub trait GestureModel {
    fn predict(&mut self, features: &[f32]) -> Result<Prediction, ClassifierError>;

    /// Número de muestras de entrenamiento conocidas (0 = sin entrenar)
    fn sample_count(&self) -> usize;

    fn kind(&self) -> &'static str;
}

/// Regla geométrica abierta/cerrada sobre la primera mano
#[derive(Debug, Clone)]
pub struct GeometricClassifier {
    epsilon: f32,
    closed_min_fingers: usize,
    confidence: f32,
}

impl GeometricClassifier {
    pub fn new(epsilon: f32, closed_min_fingers: usize, confidence: f32) -> Self {
        Self {
            epsilon,
            closed_min_fingers,
            confidence,
        }
    }

    pub fn from_config(config: &ClassifierConfig) -> Self {
        Self::new(
            config.extension_epsilon,
            config.closed_min_fingers,
            config.fallback_confidence,
        )
    }

    pub fn classify_hand(&self, hand: &HandObservation) -> Prediction {
        let label = if is_hand_closed(hand, self.epsilon, self.closed_min_fingers) {
            GestureLabel::Closed
        } else {
            GestureLabel::Open
        };
        Prediction::new(label, self.confidence)
    }
}

impl PoseClassifier for GeometricClassifier {
    fn classify(&mut self, frame: &PoseFrame) -> Option<Prediction> {
        frame.hands.first().map(|hand| self.classify_hand(hand))
    }
}

/// Reglas de emotes a dos manos (respaldo cuando no hay modelo)
#[derive(Debug, Clone)]
pub struct EmoteRules {
    hand: GeometricClassifier,
    thresholds: RuleThresholds,
}

impl EmoteRules {
    pub fn new(hand: GeometricClassifier, thresholds: RuleThresholds) -> Self {
        Self { hand, thresholds }
    }

    pub fn from_config(config: &ClassifierConfig) -> Self {
        Self::new(GeometricClassifier::from_config(config), config.rules.clone())
    }

    fn is_closed(&self, hand: &HandObservation) -> bool {
        self.hand.classify_hand(hand).label == GestureLabel::Closed
    }
}

impl PoseClassifier for EmoteRules {
    fn classify(&mut self, frame: &PoseFrame) -> Option<Prediction> {
        if frame.hands.len() < 2 {
            return None;
        }
        let (first, second) = (&frame.hands[0], &frame.hands[1]);
        let (c1, c2) = (hand_center(first), hand_center(second));
        let (closed1, closed2) = (self.is_closed(first), self.is_closed(second));
        let t = &self.thresholds;

        let label = if closed1 && closed2 && c1.1 < t.goblin_max_y && c2.1 < t.goblin_max_y {
            "GOBLIN"
        } else if !closed1 && !closed2 && (c1.0 - c2.0).abs() > t.wizard_min_spread {
            "WIZARD"
        } else if [(c1, closed1), (c2, closed2)]
            .iter()
            .any(|((x, y), closed)| {
                !*closed
                    && *x > t.princess_x.0
                    && *x < t.princess_x.1
                    && *y > t.princess_y.0
                    && *y < t.princess_y.1
            })
        {
            "PRINCESS"
        } else {
            return None;
        };

        Some(Prediction::new(
            GestureLabel::from(label),
            self.hand.confidence,
        ))
    }
}

/// Muestras etiquetadas persistidas como JSON
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingSet {
    pub features: Vec<Vec<f32>>,
    pub labels: Vec<String>,
}

/// Vecinos más cercanos (distancia euclídea) sobre un `TrainingSet`
pub struct KnnClassifier {
    data: TrainingSet,
    k: usize,
    max_mean_distance: f32,
}

impl KnnClassifier {
    pub fn new(k: usize, max_mean_distance: f32) -> Self {
        Self {
            data: TrainingSet::default(),
            k,
            max_mean_distance,
        }
    }

    pub fn with_data(
        data: TrainingSet,
        k: usize,
        max_mean_distance: f32,
    ) -> Result<Self, ClassifierError> {
        if data.features.len() != data.labels.len() {
            return Err(ClassifierError::InconsistentTrainingSet {
                features: data.features.len(),
                labels: data.labels.len(),
            });
        }
        if let Some(first) = data.features.first() {
            let expected = first.len();
            if let Some(bad) = data.features.iter().find(|row| row.len() != expected) {
                return Err(ClassifierError::InvalidFeatureSize {
                    expected,
                    actual: bad.len(),
                });
            }
        }
        Ok(Self {
            data,
            k,
            max_mean_distance,
        })
    }

    pub fn load(
        path: impl AsRef<Path>,
        k: usize,
        max_mean_distance: f32,
    ) -> Result<Self, ClassifierError> {
        let content = fs::read_to_string(path.as_ref())?;
        let data: TrainingSet = serde_json::from_str(&content)?;
        Self::with_data(data, k, max_mean_distance)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ClassifierError> {
        let json = serde_json::to_string(&self.data)?;
        fs::write(path.as_ref(), json)?;
        Ok(())
    }

    pub fn add_sample(&mut self, features: Vec<f32>, label: &str) -> Result<(), ClassifierError> {
        if let Some(expected) = self.feature_len() {
            if features.len() != expected {
                return Err(ClassifierError::InvalidFeatureSize {
                    expected,
                    actual: features.len(),
                });
            }
        }
        self.data.features.push(features);
        self.data.labels.push(label.to_string());
        Ok(())
    }

    /// Una muestra por cada frame que el extractor llena; los demás se saltan.
    /// Devuelve cuántas se agregaron.
    pub fn add_frames(
        &mut self,
        extractor: &FeatureExtractor,
        frames: &[PoseFrame],
        label: &str,
    ) -> Result<usize, ClassifierError> {
        let mut added = 0;
        for frame in frames {
            if let Some(features) = extractor.extract(frame) {
                self.add_sample(features, label)?;
                added += 1;
            }
        }
        debug!("{} muestras '{}' de {} frames", added, label, frames.len());
        Ok(added)
    }

    pub fn clear(&mut self) {
        self.data = TrainingSet::default();
    }

    pub fn sample_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for label in &self.data.labels {
            *counts.entry(label.clone()).or_insert(0) += 1;
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.data.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.labels.is_empty()
    }

    pub fn feature_len(&self) -> Option<usize> {
        self.data.features.first().map(|row| row.len())
    }
}

impl GestureModel for KnnClassifier {
    fn predict(&mut self, features: &[f32]) -> Result<Prediction, ClassifierError> {
        let expected = self.feature_len().ok_or(ClassifierError::NotTrained)?;
        if features.len() != expected {
            return Err(ClassifierError::InvalidFeatureSize {
                expected,
                actual: features.len(),
            });
        }

        let mut neighbours: Vec<(f32, &str)> = self
            .data
            .features
            .iter()
            .zip(&self.data.labels)
            .map(|(row, label)| {
                let dist = row
                    .iter()
                    .zip(features)
                    .map(|(a, b)| (a - b).powi(2))
                    .sum::<f32>()
                    .sqrt();
                (dist, label.as_str())
            })
            .collect();
        neighbours.sort_by(|a, b| a.0.total_cmp(&b.0));

        let k = self.k.min(neighbours.len());
        let nearest = &neighbours[..k];

        // (votos, distancia del vecino más cercano de esa etiqueta)
        let mut votes: HashMap<&str, (usize, f32)> = HashMap::new();
        for (dist, label) in nearest {
            let entry = votes.entry(*label).or_insert((0, *dist));
            entry.0 += 1;
        }

        let (label, (count, _)) = votes
            .into_iter()
            .max_by(|a, b| a.1 .0.cmp(&b.1 .0).then(b.1 .1.total_cmp(&a.1 .1)))
            .ok_or(ClassifierError::NotTrained)?;

        let mut confidence = count as f32 / k as f32;
        let mean_distance = nearest.iter().map(|(d, _)| d).sum::<f32>() / k as f32;
        if mean_distance > self.max_mean_distance {
            confidence *= 0.5;
        }

        trace!(
            "KNN → {} ({:.2}, dist media {:.3})",
            label,
            confidence,
            mean_distance
        );
        Ok(Prediction::new(GestureLabel::from(label), confidence))
    }

    fn sample_count(&self) -> usize {
        self.len()
    }

    fn kind(&self) -> &'static str {
        "knn"
    }
}

#[cfg(feature = "onnx")]
#[derive(Debug, Deserialize)]
struct ClassesJson {
    index_to_class: HashMap<String, String>,
}

/// Modelo exportado a ONNX: entrada [1, N], primera salida float32 = probabilidades
#[cfg(feature = "onnx")]
pub struct OnnxClassifier {
    session: Session,
    labels: Vec<String>,
    feature_len: usize,
    input_name: String,
    prob_output_name: String,
}

#[cfg(feature = "onnx")]
impl OnnxClassifier {
    pub fn new(
        model_path: &Path,
        classes_path: &Path,
        feature_len: usize,
    ) -> Result<Self, ClassifierError> {
        let labels = Self::load_classes(classes_path)?;
        let session = Session::builder()?.commit_from_file(model_path)?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or(ClassifierError::MissingIo { kind: "input" })?;

        let prob_output_name = session
            .outputs
            .iter()
            .find(|output| {
                matches!(
                    output.output_type,
                    ValueType::Tensor {
                        ty: TensorElementType::Float32,
                        ..
                    }
                )
            })
            .or_else(|| session.outputs.first())
            .map(|output| output.name.clone())
            .ok_or(ClassifierError::MissingIo { kind: "output" })?;

        info!("✅ [ONNX] Modelo cargado: {}", model_path.display());
        debug!(
            "[ONNX] Clases: {:?} | input: {} | output: {}",
            labels, input_name, prob_output_name
        );

        Ok(Self {
            session,
            labels,
            feature_len,
            input_name,
            prob_output_name,
        })
    }

    fn load_classes(path: &Path) -> Result<Vec<String>, ClassifierError> {
        let content = fs::read_to_string(path)?;
        let data: ClassesJson = serde_json::from_str(&content)?;

        let mut pairs: Vec<(usize, String)> = data
            .index_to_class
            .into_iter()
            .filter_map(|(k, v)| k.parse::<usize>().ok().map(|idx| (idx, v)))
            .collect();

        pairs.sort_by_key(|(idx, _)| *idx);
        Ok(pairs.into_iter().map(|(_, name)| name).collect())
    }

    /// Probabilidad por clase
    pub fn predict_scores(
        &mut self,
        features: &[f32],
    ) -> Result<HashMap<String, f32>, ClassifierError> {
        if features.len() != self.feature_len {
            return Err(ClassifierError::InvalidFeatureSize {
                expected: self.feature_len,
                actual: features.len(),
            });
        }

        let input_value =
            ort::value::Value::from_array((vec![1_usize, self.feature_len], features.to_vec()))?;
        let outputs = self.session.run(ort::inputs![
            self.input_name.as_str() => &input_value,
        ])?;

        let (prob_shape, prob_data) =
            outputs[self.prob_output_name.as_str()].try_extract_tensor::<f32>()?;
        let num_classes = if prob_shape.len() >= 2 {
            prob_shape[1] as usize
        } else {
            prob_shape[0] as usize
        };

        Ok(self
            .labels
            .iter()
            .enumerate()
            .take(num_classes)
            .filter_map(|(i, label)| prob_data.get(i).map(|p| (label.clone(), *p)))
            .collect())
    }
}

#[cfg(feature = "onnx")]
impl GestureModel for OnnxClassifier {
    fn predict(&mut self, features: &[f32]) -> Result<Prediction, ClassifierError> {
        let scores = self.predict_scores(features)?;
        let (label, score) = scores
            .into_iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .ok_or(ClassifierError::NoOutputTensor)?;
        Ok(Prediction::new(GestureLabel::from(label), score))
    }

    fn sample_count(&self) -> usize {
        // Un modelo exportado ya está entrenado
        self.labels.len()
    }

    fn kind(&self) -> &'static str {
        "onnx"
    }
}

/// Estado informativo de la ruta aprendida
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ClassifierStatus {
    Learned { kind: String, samples: usize },
    RulesOnly,
    LoadFailed { reason: String },
}

/// Prefiere el modelo aprendido si supera la confianza mínima; si no,
/// delega en el clasificador de reglas.
pub struct FusionClassifier {
    model: Option<Box<dyn GestureModel>>,
    extractor: FeatureExtractor,
    fallback: Box<dyn PoseClassifier>,
    min_confidence: f32,
    status: ClassifierStatus,
}

impl FusionClassifier {
    pub fn rules_only(fallback: Box<dyn PoseClassifier>) -> Self {
        Self {
            model: None,
            extractor: FeatureExtractor::new(FeatureLayout::HandMeasures),
            fallback,
            min_confidence: 1.0,
            status: ClassifierStatus::RulesOnly,
        }
    }

    pub fn with_model(
        model: Box<dyn GestureModel>,
        extractor: FeatureExtractor,
        fallback: Box<dyn PoseClassifier>,
        min_confidence: f32,
    ) -> Self {
        let status = if model.sample_count() == 0 {
            ClassifierStatus::RulesOnly
        } else {
            ClassifierStatus::Learned {
                kind: model.kind().to_string(),
                samples: model.sample_count(),
            }
        };
        Self {
            model: Some(model),
            extractor,
            fallback,
            min_confidence,
            status,
        }
    }

    /// Carga el modelo configurado. Un fallo de carga nunca es fatal:
    /// se queda en modo reglas y lo refleja en `status()`.
    pub fn from_config(config: &ClassifierConfig) -> Self {
        let fallback = Box::new(EmoteRules::from_config(config));
        let extractor = FeatureExtractor::new(config.feature_layout);

        let model = match Self::load_model(config, extractor.feature_len()) {
            Ok(Some(model)) => model,
            Ok(None) => {
                info!("ℹ️  Sin datos de entrenamiento: clasificación solo por reglas");
                return Self::rules_only(fallback);
            }
            Err(e) => {
                warn!("⚠️  No se pudo cargar el modelo ({}), usando reglas", e);
                let mut fusion = Self::rules_only(fallback);
                fusion.status = ClassifierStatus::LoadFailed {
                    reason: e.to_string(),
                };
                return fusion;
            }
        };

        let fusion = Self::with_model(model, extractor, fallback, config.min_learned_confidence);
        match &fusion.status {
            ClassifierStatus::Learned { kind, samples } => {
                info!("✅ Clasificador aprendido ({}) con {} muestras", kind, samples)
            }
            _ => info!("ℹ️  Modelo sin muestras: clasificación solo por reglas"),
        }
        fusion
    }

    fn load_model(
        config: &ClassifierConfig,
        feature_len: usize,
    ) -> Result<Option<Box<dyn GestureModel>>, ClassifierError> {
        if let Some(model_path) = &config.onnx_model {
            return Self::load_onnx(model_path, config, feature_len).map(Some);
        }

        let Some(path) = &config.training_data else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }

        let knn = KnnClassifier::load(path, config.knn_k, config.knn_max_mean_distance)?;
        if let Some(actual) = knn.feature_len() {
            if actual != feature_len {
                return Err(ClassifierError::InvalidFeatureSize {
                    expected: feature_len,
                    actual,
                });
            }
        }
        debug!("Muestras por etiqueta: {:?}", knn.sample_counts());
        Ok(Some(Box::new(knn)))
    }

    #[cfg(feature = "onnx")]
    fn load_onnx(
        model_path: &Path,
        config: &ClassifierConfig,
        feature_len: usize,
    ) -> Result<Box<dyn GestureModel>, ClassifierError> {
        let classes = config
            .onnx_classes
            .clone()
            .unwrap_or_else(|| model_path.with_file_name("classes.json"));
        Ok(Box::new(OnnxClassifier::new(model_path, &classes, feature_len)?))
    }

    #[cfg(not(feature = "onnx"))]
    fn load_onnx(
        model_path: &Path,
        _config: &ClassifierConfig,
        _feature_len: usize,
    ) -> Result<Box<dyn GestureModel>, ClassifierError> {
        Err(ClassifierError::IoError(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            format!(
                "{} requiere compilar con la feature `onnx`",
                model_path.display()
            ),
        )))
    }

    pub fn status(&self) -> &ClassifierStatus {
        &self.status
    }
}

impl PoseClassifier for FusionClassifier {
    fn classify(&mut self, frame: &PoseFrame) -> Option<Prediction> {
        if let Some(model) = self.model.as_mut().filter(|m| m.sample_count() > 0) {
            if let Some(features) = self.extractor.extract(frame) {
                match model.predict(&features) {
                    Ok(prediction) if prediction.confidence >= self.min_confidence => {
                        return Some(prediction);
                    }
                    Ok(prediction) => trace!(
                        "Predicción aprendida descartada: {} ({:.2})",
                        prediction.label,
                        prediction.confidence
                    ),
                    Err(e) => warn!("⚠️  Error del modelo aprendido: {}", e),
                }
            }
        }
        self.fallback.classify(frame)
    }
}
