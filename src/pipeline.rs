//! Driver por frame: clasificación → modo → cursor/click o suavizado/emote.
//!
//! Todo el estado mutable vive en `Pipeline` y solo cambia dentro de
//! `process`, de modo que una secuencia de frames con tiempos explícitos
//! produce siempre los mismos comandos.

use crate::config::Config;
use crate::dispatcher::{ClickDragController, EmoteDispatcher, PointerEvent};
use crate::gesture_buffer::{HandStateFilter, TemporalSmoother};
use crate::gesture_classifier::{
    ClassifierStatus, FusionClassifier, GeometricClassifier, PoseClassifier,
};
use crate::hid::{InjectionError, InputInjector};
use crate::mode_arbiter::{Mode, ModeArbiter, ModeTransition};
use crate::mouse_filter::CursorMapper;
use crate::types::{GestureLabel, PoseFrame};
use serde::Serialize;
use tracing::{trace, warn};

/// Eventos emitidos por frame (overlay, logger, `--events`)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameEvents {
    pub t: f64,
    pub mode: Mode,
    pub hand_count: usize,
    pub label: Option<GestureLabel>,
    pub confidence: Option<f32>,
    pub hold_progress: f32,
    pub triggered: Option<GestureLabel>,
    pub action_dispatched: bool,
    pub cursor: (i32, i32),
    pub moved: bool,
    pub dragging: bool,
    pub pointer: Option<PointerEvent>,
    pub classifier: ClassifierStatus,
}

pub struct Pipeline {
    arbiter: ModeArbiter,
    hand_classifier: GeometricClassifier,
    hand_filter: HandStateFilter,
    emote_classifier: FusionClassifier,
    smoother: TemporalSmoother,
    cursor: CursorMapper,
    clicks: ClickDragController,
    emotes: EmoteDispatcher,
    control_landmark: usize,
}

impl Pipeline {
    /// Construye el pipeline; el modelo aprendido se carga según la configuración
    pub fn new(config: &Config) -> Result<Self, InjectionError> {
        Self::with_classifier(config, FusionClassifier::from_config(&config.classifier))
    }

    pub fn with_classifier(
        config: &Config,
        emote_classifier: FusionClassifier,
    ) -> Result<Self, InjectionError> {
        Ok(Self {
            arbiter: ModeArbiter::from_config(&config.mode),
            hand_classifier: GeometricClassifier::from_config(&config.classifier),
            hand_filter: HandStateFilter::new(config.smoothing.hand_state_window),
            emote_classifier,
            smoother: TemporalSmoother::from_config(&config.smoothing),
            cursor: CursorMapper::new(config.cursor.clone()),
            clicks: ClickDragController::new(config.click.clone()),
            emotes: EmoteDispatcher::from_config(&config.actions)?,
            control_landmark: config.cursor.control_landmark,
        })
    }

    /// Procesa un frame completo. Ante un error de inyección (o aborto) suelta
    /// el botón si estaba presionado y propaga el error.
    pub fn process(
        &mut self,
        frame: &PoseFrame,
        now: f64,
        injector: &mut dyn InputInjector,
    ) -> Result<FrameEvents, InjectionError> {
        let mut events = FrameEvents {
            t: now,
            mode: self.arbiter.mode(),
            hand_count: frame.hand_count(),
            label: None,
            confidence: None,
            hold_progress: 0.0,
            triggered: None,
            action_dispatched: false,
            cursor: self.cursor.position(),
            moved: false,
            dragging: self.clicks.is_dragging(),
            pointer: None,
            classifier: self.emote_classifier.status().clone(),
        };

        if let Err(e) = self.step(frame, now, injector, &mut events) {
            warn!("❌ Error de inyección: {}", e);
            if let Err(release_err) = self.clicks.force_release(now, injector) {
                warn!("❌ No se pudo soltar el botón: {}", release_err);
            }
            return Err(e);
        }

        events.mode = self.arbiter.mode();
        events.cursor = self.cursor.position();
        events.dragging = self.clicks.is_dragging();
        trace!("{:?}", events);
        Ok(events)
    }

    fn step(
        &mut self,
        frame: &PoseFrame,
        now: f64,
        injector: &mut dyn InputInjector,
        events: &mut FrameEvents,
    ) -> Result<(), InjectionError> {
        match self.arbiter.update(frame.hand_count(), now) {
            Some(ModeTransition::EnteredActionTrigger) => {
                events.pointer = self.clicks.force_release(now, injector)?;
                self.smoother.reset();
                self.hand_filter.reset();
            }
            Some(ModeTransition::ReturnedToCursor) => {
                self.smoother.reset();
            }
            None => {}
        }

        match self.arbiter.mode() {
            Mode::ActionTrigger => {
                self.clicks.reset_edge();
                self.step_action(frame, now, injector, events)
            }
            Mode::CursorControl if frame.hand_count() == 1 => {
                self.step_cursor(frame, now, injector, events)
            }
            // 0 manos o anti-rebote en curso: el cursor no se toca
            _ => {
                self.clicks.reset_edge();
                Ok(())
            }
        }
    }

    fn step_cursor(
        &mut self,
        frame: &PoseFrame,
        now: f64,
        injector: &mut dyn InputInjector,
        events: &mut FrameEvents,
    ) -> Result<(), InjectionError> {
        let hand = &frame.hands[0];
        let raw = self.hand_classifier.classify_hand(hand);
        let gesture = self.hand_filter.update(raw.label);
        events.confidence = Some(raw.confidence);

        let point = hand.landmark(self.control_landmark);
        if let Some((x, y)) = self.cursor.update(point.x, point.y, self.clicks.is_dragging()) {
            injector.move_to(x, y)?;
            events.moved = true;
        }

        events.pointer = self
            .clicks
            .update(&gesture, self.cursor.position(), now, injector)?;
        events.label = Some(gesture);
        Ok(())
    }

    fn step_action(
        &mut self,
        frame: &PoseFrame,
        now: f64,
        injector: &mut dyn InputInjector,
        events: &mut FrameEvents,
    ) -> Result<(), InjectionError> {
        let prediction = self.emote_classifier.classify(frame);
        events.confidence = prediction.as_ref().map(|p| p.confidence);

        let output = self.smoother.update(prediction.map(|p| p.label), now);
        events.label = output.label;
        events.hold_progress = output.hold_progress;

        if let Some(label) = output.triggered {
            events.action_dispatched = self.emotes.dispatch(&label, now, injector)?;
            events.triggered = Some(label);
            if self.arbiter.on_action_fired().is_some() {
                self.smoother.reset();
            }
        }
        Ok(())
    }

    /// Cierre de sesión: exactamente una liberación si hay un arrastre activo
    pub fn shutdown(
        &mut self,
        now: f64,
        injector: &mut dyn InputInjector,
    ) -> Result<Option<PointerEvent>, InjectionError> {
        self.clicks.force_release(now, injector)
    }

    pub fn mode(&self) -> Mode {
        self.arbiter.mode()
    }

    pub fn is_dragging(&self) -> bool {
        self.clicks.is_dragging()
    }

    pub fn cursor_position(&self) -> (i32, i32) {
        self.cursor.position()
    }

    pub fn classifier_status(&self) -> &ClassifierStatus {
        self.emote_classifier.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature_extractor::tests::synthetic_hand;
    use crate::hid::{EmergencyStop, InjectorCommand, RecordingInjector};

    fn test_config() -> Config {
        let mut config = Config::default();
        config.cursor.screen_width = 1000;
        config.cursor.screen_height = 1000;
        config
    }

    fn one_hand(x: f32, y: f32, extended: usize) -> PoseFrame {
        PoseFrame::new(0.0, vec![synthetic_hand(x, y, extended)])
    }

    #[test]
    fn zero_hands_keeps_cursor_still() {
        let mut pipeline = Pipeline::new(&test_config()).unwrap();
        let mut inj = RecordingInjector::new();
        let events = pipeline.process(&PoseFrame::default(), 0.0, &mut inj).unwrap();
        assert_eq!(events.hand_count, 0);
        assert!(!events.moved);
        assert!(inj.commands().is_empty());
    }

    #[test]
    fn one_open_hand_moves_cursor() {
        let mut pipeline = Pipeline::new(&test_config()).unwrap();
        let mut inj = RecordingInjector::new();
        let events = pipeline
            .process(&one_hand(0.8, 0.5, 4), 0.0, &mut inj)
            .unwrap();
        assert!(events.moved);
        assert_eq!(events.label, Some(GestureLabel::Open));
        assert!(matches!(inj.commands()[0], InjectorCommand::MoveTo(_, _)));
    }

    #[test]
    fn abort_mid_drag_releases_before_propagating() {
        let stop = EmergencyStop::new();
        let mut pipeline = Pipeline::new(&test_config()).unwrap();
        let mut inj = RecordingInjector::with_stop(stop.clone());

        pipeline.process(&one_hand(0.5, 0.5, 0), 0.0, &mut inj).unwrap();
        assert!(pipeline.is_dragging());

        stop.trigger();
        let err = pipeline
            .process(&one_hand(0.9, 0.5, 0), 0.1, &mut inj)
            .unwrap_err();
        assert!(err.is_abort());
        assert!(!pipeline.is_dragging());
        assert_eq!(inj.count(&InjectorCommand::Release), 1);
        assert_eq!(inj.commands().last(), Some(&InjectorCommand::Release));
    }
}
