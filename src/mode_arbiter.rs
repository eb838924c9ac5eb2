use crate::config::ModeConfig;
use serde::Serialize;
use tracing::{debug, info};

/// Modo activo del pipeline
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Mode {
    /// Una mano mueve el cursor
    CursorControl,
    /// 2+ manos, esperando la ventana de anti-rebote
    PendingAction { since: f64 },
    /// Reconocimiento de emotes
    ActionTrigger,
}

/// Cambios de modo que el pipeline debe atender
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeTransition {
    /// Soltar cualquier botón y reiniciar el suavizador antes de seguir
    EnteredActionTrigger,
    ReturnedToCursor,
}

/// Decide entre modo cursor y modo acción según el número de manos
#[derive(Debug, Clone)]
pub struct ModeArbiter {
    mode: Mode,
    debounce_window: f64,
    /// Tras un disparo hay que bajar de 2 manos antes de volver a armar
    rearm_blocked: bool,
}

impl ModeArbiter {
    pub fn new(debounce_window: f64) -> Self {
        Self {
            mode: Mode::CursorControl,
            debounce_window,
            rearm_blocked: false,
        }
    }

    pub fn from_config(config: &ModeConfig) -> Self {
        Self::new(config.debounce_window)
    }

    /// Alimenta el número de manos del frame en el instante `now`
    pub fn update(&mut self, hand_count: usize, now: f64) -> Option<ModeTransition> {
        let two_hands = hand_count >= 2;
        if !two_hands {
            self.rearm_blocked = false;
        }

        match self.mode {
            Mode::CursorControl => {
                if two_hands && !self.rearm_blocked {
                    debug!("⏳ 2+ manos, esperando {:.2}s", self.debounce_window);
                    self.mode = Mode::PendingAction { since: now };
                    return self.check_pending(now);
                }
                None
            }
            Mode::PendingAction { .. } => {
                if !two_hands {
                    // Sin crédito parcial entre huecos
                    debug!("Anti-rebote reiniciado ({} manos)", hand_count);
                    self.mode = Mode::CursorControl;
                    return None;
                }
                self.check_pending(now)
            }
            Mode::ActionTrigger => {
                if !two_hands {
                    info!("🖱️  Modo cursor (manos: {})", hand_count);
                    self.mode = Mode::CursorControl;
                    return Some(ModeTransition::ReturnedToCursor);
                }
                None
            }
        }
    }

    fn check_pending(&mut self, now: f64) -> Option<ModeTransition> {
        if let Mode::PendingAction { since } = self.mode {
            if now - since >= self.debounce_window {
                info!("🎭 Modo acción");
                self.mode = Mode::ActionTrigger;
                return Some(ModeTransition::EnteredActionTrigger);
            }
        }
        None
    }

    /// Un disparo en modo acción devuelve al modo cursor (una acción por sesión a dos manos)
    pub fn on_action_fired(&mut self) -> Option<ModeTransition> {
        if self.mode != Mode::ActionTrigger {
            return None;
        }
        info!("🖱️  Modo cursor (acción ejecutada)");
        self.mode = Mode::CursorControl;
        self.rearm_blocked = true;
        Some(ModeTransition::ReturnedToCursor)
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_cursor_mode(&self) -> bool {
        !matches!(self.mode, Mode::ActionTrigger)
    }

    pub fn state(&self) -> &'static str {
        match self.mode {
            Mode::CursorControl => "CURSOR",
            Mode::PendingAction { .. } => "PENDING",
            Mode::ActionTrigger => "ACTION",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f64 = 0.01;

    fn feed(arbiter: &mut ModeArbiter, hands: usize, t0: f64, secs: f64) -> (usize, f64) {
        let mut transitions = 0;
        let mut t = t0;
        while t < t0 + secs - 1e-9 {
            if arbiter.update(hands, t) == Some(ModeTransition::EnteredActionTrigger) {
                transitions += 1;
            }
            t += DT;
        }
        (transitions, t)
    }

    #[test]
    fn test_starts_in_cursor_mode() {
        let arbiter = ModeArbiter::new(0.5);
        assert_eq!(arbiter.mode(), Mode::CursorControl);
        assert_eq!(arbiter.state(), "CURSOR");
    }

    #[test]
    fn test_gap_resets_debounce() {
        let mut arbiter = ModeArbiter::new(0.5);
        let (n, t) = feed(&mut arbiter, 2, 0.0, 0.49);
        assert_eq!(n, 0);
        assert_eq!(arbiter.state(), "PENDING");

        assert_eq!(arbiter.update(1, t), None);
        assert_eq!(arbiter.state(), "CURSOR");

        let (n, _) = feed(&mut arbiter, 2, t + DT, 0.49);
        assert_eq!(n, 0);
        assert_ne!(arbiter.mode(), Mode::ActionTrigger);
    }

    #[test]
    fn test_continuous_two_hands_enters_once() {
        let mut arbiter = ModeArbiter::new(0.5);
        let (n, _) = feed(&mut arbiter, 2, 0.0, 2.0);
        assert_eq!(n, 1);
        assert_eq!(arbiter.mode(), Mode::ActionTrigger);
    }

    #[test]
    fn test_exact_debounce_boundary() {
        let mut arbiter = ModeArbiter::new(0.5);
        assert_eq!(arbiter.update(2, 1.0), None);
        assert_eq!(
            arbiter.update(2, 1.5),
            Some(ModeTransition::EnteredActionTrigger)
        );
    }

    #[test]
    fn test_hand_loss_returns_to_cursor() {
        let mut arbiter = ModeArbiter::new(0.0);
        assert_eq!(
            arbiter.update(2, 0.0),
            Some(ModeTransition::EnteredActionTrigger)
        );
        assert_eq!(arbiter.update(0, 0.1), Some(ModeTransition::ReturnedToCursor));
        assert!(arbiter.is_cursor_mode());
    }

    #[test]
    fn test_action_fired_requires_rearm() {
        let mut arbiter = ModeArbiter::new(0.5);
        feed(&mut arbiter, 2, 0.0, 0.6);
        assert_eq!(
            arbiter.on_action_fired(),
            Some(ModeTransition::ReturnedToCursor)
        );

        // Mismas dos manos: no vuelve a armar
        let (n, t) = feed(&mut arbiter, 2, 0.6, 1.0);
        assert_eq!(n, 0);
        assert_eq!(arbiter.state(), "CURSOR");

        arbiter.update(1, t);
        let (n, _) = feed(&mut arbiter, 2, t + DT, 0.6);
        assert_eq!(n, 1);
    }

    #[test]
    fn test_action_fired_outside_trigger_mode_is_noop() {
        let mut arbiter = ModeArbiter::new(0.5);
        assert_eq!(arbiter.on_action_fired(), None);
        assert_eq!(arbiter.mode(), Mode::CursorControl);
    }
}
