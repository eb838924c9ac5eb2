use crate::config::SmoothingConfig;
use crate::types::GestureLabel;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info};

/// Ventana FIFO acotada de etiquetas crudas (`None` = sin detección)
#[derive(Debug, Clone)]
pub struct SmoothingWindow {
    buffer: VecDeque<Option<GestureLabel>>,
    window_size: usize,
}

impl SmoothingWindow {
    pub fn new(window_size: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(window_size),
            window_size,
        }
    }

    /// Añade una etiqueta, descartando la más antigua si la ventana está llena
    pub fn push(&mut self, label: Option<GestureLabel>) {
        self.buffer.push_back(label);
        while self.buffer.len() > self.window_size {
            self.buffer.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.window_size
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Etiqueta con mayoría estricta en la ventana. Los `None` cuentan en el total.
    pub fn majority(&self) -> Option<GestureLabel> {
        let mut counts: HashMap<&GestureLabel, usize> = HashMap::new();
        for label in self.buffer.iter().flatten() {
            *counts.entry(label).or_insert(0) += 1;
        }
        counts
            .into_iter()
            .find(|(_, count)| count * 2 > self.buffer.len())
            .map(|(label, _)| label.clone())
    }

    /// Fracción de la ventana ocupada por `label`
    pub fn frequency(&self, label: &GestureLabel) -> f32 {
        if self.buffer.is_empty() {
            return 0.0;
        }
        let count = self
            .buffer
            .iter()
            .filter(|l| l.as_ref() == Some(label))
            .count();
        count as f32 / self.buffer.len() as f32
    }
}

/// Suavizado abierto/cerrado del modo cursor: mientras la ventana se llena
/// devuelve la etiqueta cruda; después `closed` solo si supera a `open`.
#[derive(Debug, Clone)]
pub struct HandStateFilter {
    buffer: VecDeque<GestureLabel>,
    window_size: usize,
}

impl HandStateFilter {
    pub fn new(window_size: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(window_size),
            window_size,
        }
    }

    pub fn update(&mut self, raw: GestureLabel) -> GestureLabel {
        self.buffer.push_back(raw.clone());
        if self.buffer.len() > self.window_size {
            self.buffer.pop_front();
        }
        if self.buffer.len() < self.window_size {
            return raw;
        }

        let closed = self
            .buffer
            .iter()
            .filter(|l| **l == GestureLabel::Closed)
            .count();
        let open = self
            .buffer
            .iter()
            .filter(|l| **l == GestureLabel::Open)
            .count();
        if closed > open {
            GestureLabel::Closed
        } else {
            GestureLabel::Open
        }
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

/// Estados del suavizador temporal
#[derive(Debug, Clone, PartialEq)]
pub enum SmootherState {
    /// Sin etiqueta estable
    Idle,
    /// Etiqueta mayoritaria acumulando tiempo de sostén
    Candidate { label: GestureLabel, since: f64 },
    /// Disparada; no vuelve a disparar hasta cambiar o agotar cooldown
    Fired { label: GestureLabel, at: f64 },
}

/// Resultado de un frame del suavizador
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SmootherOutput {
    pub label: Option<GestureLabel>,
    pub hold_progress: f32,
    /// Evento de un solo disparo
    pub triggered: Option<GestureLabel>,
}

/// Ventana mayoritaria + tiempo de sostén + cooldown por etiqueta
#[derive(Debug, Clone)]
pub struct TemporalSmoother {
    window: SmoothingWindow,
    state: SmootherState,
    hold_time: f64,
    cooldown: f64,
    last_trigger: HashMap<GestureLabel, f64>,
}

impl TemporalSmoother {
    pub fn new(window_size: usize, hold_time: f64, cooldown: f64) -> Self {
        Self {
            window: SmoothingWindow::new(window_size),
            state: SmootherState::Idle,
            hold_time,
            cooldown,
            last_trigger: HashMap::new(),
        }
    }

    pub fn from_config(config: &SmoothingConfig) -> Self {
        Self::new(config.window_size, config.hold_time, config.cooldown)
    }

    /// Procesa la etiqueta cruda del frame en el instante `now` (segundos)
    pub fn update(&mut self, raw: Option<GestureLabel>, now: f64) -> SmootherOutput {
        self.window.push(raw.clone());

        // Ventana a medio llenar: etiqueta cruda, sin disparo posible
        if self.window.len() * 2 < self.window.capacity() {
            return SmootherOutput {
                label: raw,
                ..Default::default()
            };
        }

        let Some(label) = self.window.majority() else {
            if self.state != SmootherState::Idle {
                debug!("Suavizador → IDLE (sin mayoría)");
            }
            self.state = SmootherState::Idle;
            return SmootherOutput::default();
        };

        let cooldown_over = self.cooldown_over(&label, now);
        self.state = match std::mem::replace(&mut self.state, SmootherState::Idle) {
            SmootherState::Candidate { label: current, since } if current == label => {
                SmootherState::Candidate { label: current, since }
            }
            SmootherState::Fired { label: current, at } if current == label && !cooldown_over => {
                SmootherState::Fired { label: current, at }
            }
            // Etiqueta nueva, o cooldown cumplido: el sostén empieza de cero
            _ => SmootherState::Candidate {
                label: label.clone(),
                since: now,
            },
        };

        let since = match &self.state {
            SmootherState::Candidate { since, .. } => *since,
            _ => {
                return SmootherOutput {
                    label: Some(label),
                    hold_progress: 1.0,
                    triggered: None,
                }
            }
        };

        let held = now - since;
        let hold_progress = if self.hold_time > 0.0 {
            (held / self.hold_time).min(1.0) as f32
        } else {
            1.0
        };

        let mut triggered = None;
        if held >= self.hold_time && cooldown_over {
            info!("🎯 Gesto sostenido: {} ({:.2}s)", label, held);
            self.last_trigger.insert(label.clone(), now);
            self.state = SmootherState::Fired {
                label: label.clone(),
                at: now,
            };
            triggered = Some(label.clone());
        }

        SmootherOutput {
            label: Some(label),
            hold_progress,
            triggered,
        }
    }

    fn cooldown_over(&self, label: &GestureLabel, now: f64) -> bool {
        self.last_trigger
            .get(label)
            .map_or(true, |last| now - last >= self.cooldown)
    }

    /// Vacía la ventana y vuelve a IDLE; el historial de cooldown se conserva
    pub fn reset(&mut self) {
        self.window.clear();
        self.state = SmootherState::Idle;
    }

    pub fn current_state(&self) -> &SmootherState {
        &self.state
    }

    pub fn state(&self) -> &str {
        match self.state {
            SmootherState::Idle => "IDLE",
            SmootherState::Candidate { .. } => "CANDIDATE",
            SmootherState::Fired { .. } => "FIRED",
        }
    }

    pub fn window(&self) -> &SmoothingWindow {
        &self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f64 = 1.0 / 30.0;

    fn goblin() -> Option<GestureLabel> {
        Some(GestureLabel::from("GOBLIN"))
    }

    /// Alimenta `label` durante `secs` segundos desde `t0`; devuelve disparos y el t final
    fn feed(
        smoother: &mut TemporalSmoother,
        label: Option<GestureLabel>,
        t0: f64,
        secs: f64,
    ) -> (Vec<f64>, f64) {
        let mut fired = Vec::new();
        let mut t = t0;
        while t < t0 + secs {
            if smoother.update(label.clone(), t).triggered.is_some() {
                fired.push(t);
            }
            t += DT;
        }
        (fired, t)
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut window = SmoothingWindow::new(3);
        for label in ["a", "b", "c", "d"] {
            window.push(Some(GestureLabel::from(label)));
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.frequency(&GestureLabel::from("a")), 0.0);
        assert!((window.frequency(&GestureLabel::from("d")) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_majority_requires_strict_majority() {
        let mut window = SmoothingWindow::new(4);
        window.push(goblin());
        window.push(goblin());
        window.push(None);
        window.push(None);
        // Empate con frames vacíos: sin mayoría
        assert_eq!(window.majority(), None);

        // [goblin, None, None, goblin]: 2 de 4 sigue siendo empate
        window.push(goblin());
        assert_eq!(window.len(), 4);
        assert_eq!(window.majority(), None);

        // [None, None, goblin, goblin] → [None, goblin, goblin, goblin]
        window.push(goblin());
        assert_eq!(window.majority(), None);
        window.push(goblin());
        assert_eq!(window.majority(), goblin());
    }

    #[test]
    fn test_raw_label_while_filling() {
        let mut smoother = TemporalSmoother::new(8, 0.0, 2.0);
        let out = smoother.update(goblin(), 0.0);
        assert_eq!(out.label, goblin());
        assert!(out.triggered.is_none());
        assert_eq!(smoother.state(), "IDLE");
    }

    #[test]
    fn test_hold_time_lower_bound() {
        let mut smoother = TemporalSmoother::new(8, 1.0, 2.0);
        let (fired, _) = feed(&mut smoother, goblin(), 0.0, 3.0);
        assert_eq!(fired.len(), 1);
        // La etiqueta es mayoritaria a partir del 4º frame
        let majority_start = 3.0 * DT;
        assert!(fired[0] - majority_start >= 1.0 - 1e-9);
    }

    #[test]
    fn test_hold_progress() {
        let mut smoother = TemporalSmoother::new(4, 1.0, 2.0);
        smoother.update(goblin(), 0.0);
        let out = smoother.update(goblin(), 0.1);
        assert_eq!(out.hold_progress, 0.0);
        let out = smoother.update(goblin(), 0.6);
        assert!((out.hold_progress - 0.5).abs() < 1e-6);
        let out = smoother.update(goblin(), 1.1);
        assert_eq!(out.hold_progress, 1.0);
        assert_eq!(out.triggered, goblin());
        assert_eq!(smoother.state(), "FIRED");
    }

    #[test]
    fn test_at_most_one_trigger_per_cooldown() {
        let mut smoother = TemporalSmoother::new(8, 0.5, 2.0);
        let (fired, _) = feed(&mut smoother, goblin(), 0.0, 10.0);
        assert!(fired.len() >= 2);
        for pair in fired.windows(2) {
            assert!(pair[1] - pair[0] >= 2.0);
        }
    }

    #[test]
    fn test_refire_requires_hold_again_after_cooldown() {
        let mut smoother = TemporalSmoother::new(8, 1.0, 0.5);
        let (fired, _) = feed(&mut smoother, goblin(), 0.0, 4.0);
        // Tras el cooldown se re-acumula el sostén completo
        for pair in fired.windows(2) {
            assert!(pair[1] - pair[0] >= 1.5 - 1e-9);
        }
    }

    #[test]
    fn test_none_resets_to_idle() {
        let mut smoother = TemporalSmoother::new(4, 1.0, 2.0);
        let (_, t) = feed(&mut smoother, goblin(), 0.0, 0.5);
        assert_eq!(smoother.state(), "CANDIDATE");

        let (fired, t) = feed(&mut smoother, None, t, 0.2);
        assert!(fired.is_empty());
        assert_eq!(smoother.state(), "IDLE");

        // Al volver, el sostén empieza de cero
        let out = smoother.update(goblin(), t);
        assert!(out.hold_progress < 0.5);
    }

    #[test]
    fn test_single_missing_frame_keeps_hold() {
        let step = 1.0 / 64.0;
        let mut smoother = TemporalSmoother::new(8, 1.0, 2.0);
        let mut fired = Vec::new();
        for i in 0..100 {
            let t = i as f64 * step;
            // Un frame sin detección a mitad del sostén
            let raw = if i == 20 { None } else { goblin() };
            let out = smoother.update(raw, t);
            if i == 20 {
                assert_eq!(out.label, goblin());
                assert!(matches!(
                    smoother.current_state(),
                    SmootherState::Candidate { since, .. } if *since == 3.0 * step
                ));
            }
            if out.triggered.is_some() {
                fired.push(t);
            }
        }
        // Candidato desde el 4º frame (media ventana); dispara 1 s después
        assert_eq!(fired, vec![3.0 * step + 1.0]);
    }

    #[test]
    fn test_label_change_restarts_hold() {
        let mut smoother = TemporalSmoother::new(2, 1.0, 2.0);
        let wizard = Some(GestureLabel::from("WIZARD"));
        let (fired, t) = feed(&mut smoother, goblin(), 0.0, 0.9);
        assert!(fired.is_empty());
        let (fired, _) = feed(&mut smoother, wizard.clone(), t, 0.9);
        assert!(fired.is_empty());
        assert!(matches!(
            smoother.current_state(),
            SmootherState::Candidate { label, .. } if Some(label.clone()) == wizard
        ));
    }

    #[test]
    fn test_hand_state_filter() {
        let mut filter = HandStateFilter::new(5);
        assert_eq!(filter.update(GestureLabel::Closed), GestureLabel::Closed);
        assert_eq!(filter.update(GestureLabel::Open), GestureLabel::Open);
        filter.update(GestureLabel::Open);
        filter.update(GestureLabel::Closed);
        // Ventana llena: 2 cerradas vs 3 abiertas
        assert_eq!(filter.update(GestureLabel::Open), GestureLabel::Open);
        assert_eq!(filter.update(GestureLabel::Closed), GestureLabel::Open);
        assert_eq!(filter.update(GestureLabel::Closed), GestureLabel::Closed);
    }
}
