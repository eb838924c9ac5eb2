//! Acciones con efectos sobre el dispositivo: click/arrastre en modo cursor
//! y secuencias de teclas de los emotes en modo acción.

use crate::config::{ActionStep, ActionsConfig, ClickConfig};
use crate::hid::{parse_key, InjectionError, InputInjector};
use crate::types::GestureLabel;
use evdev::Key;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Resultado visible de una transición abierta/cerrada
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PointerEvent {
    Pressed,
    Click { distance: f32, duration: f64 },
    Drag { distance: f32, duration: f64 },
    /// Liberación forzada por cambio de modo, aborto o cierre
    ForcedRelease,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragStart {
    pub position: (i32, i32),
    pub time: f64,
}

/// Click vs arrastre a partir de los flancos abierta→cerrada→abierta
#[derive(Debug, Clone)]
pub struct ClickDragController {
    config: ClickConfig,
    previous: GestureLabel,
    drag_start: Option<DragStart>,
    last_action_time: f64,
}

impl ClickDragController {
    pub fn new(config: ClickConfig) -> Self {
        Self {
            config,
            previous: GestureLabel::Open,
            drag_start: None,
            last_action_time: f64::NEG_INFINITY,
        }
    }

    /// Procesa el gesto suavizado del frame con el puntero en `position`
    pub fn update(
        &mut self,
        gesture: &GestureLabel,
        position: (i32, i32),
        now: f64,
        injector: &mut dyn InputInjector,
    ) -> Result<Option<PointerEvent>, InjectionError> {
        let previous = std::mem::replace(&mut self.previous, gesture.clone());

        match (&previous, gesture) {
            (GestureLabel::Open, GestureLabel::Closed) => {
                if now - self.last_action_time <= self.config.cooldown {
                    debug!("Click en cooldown");
                    return Ok(None);
                }
                injector.press()?;
                self.drag_start = Some(DragStart {
                    position,
                    time: now,
                });
                debug!("🖱️  Botón presionado en {:?}", position);
                Ok(Some(PointerEvent::Pressed))
            }
            (GestureLabel::Closed, GestureLabel::Open) => {
                let Some(start) = self.drag_start else {
                    return Ok(None);
                };
                injector.release()?;
                self.drag_start = None;
                self.last_action_time = now;

                let dx = (position.0 - start.position.0) as f32;
                let dy = (position.1 - start.position.1) as f32;
                let distance = (dx * dx + dy * dy).sqrt();
                let duration = now - start.time;

                let event = if distance < self.config.distance_px
                    && duration < self.config.min_drag_secs
                {
                    info!("🖱️  Click en {:?}", position);
                    PointerEvent::Click { distance, duration }
                } else {
                    info!(
                        "🖱️  Arrastre {:?} → {:?} ({:.0}px, {:.2}s)",
                        start.position, position, distance, duration
                    );
                    PointerEvent::Drag { distance, duration }
                };
                Ok(Some(event))
            }
            _ => Ok(None),
        }
    }

    /// Suelta el botón si está presionado. Exactamente una liberación.
    pub fn force_release(
        &mut self,
        now: f64,
        injector: &mut dyn InputInjector,
    ) -> Result<Option<PointerEvent>, InjectionError> {
        if self.drag_start.is_none() {
            return Ok(None);
        }
        injector.release()?;
        self.drag_start = None;
        self.last_action_time = now;
        info!("🖱️  Botón liberado");
        Ok(Some(PointerEvent::ForcedRelease))
    }

    /// Frame sin gesto de cursor (0 o 2+ manos): el siguiente frame no puede
    /// formar un flanco abierta→cerrada contra una etiqueta vieja
    pub fn reset_edge(&mut self) {
        self.previous = GestureLabel::Closed;
    }

    pub fn is_dragging(&self) -> bool {
        self.drag_start.is_some()
    }

    pub fn drag_start(&self) -> Option<DragStart> {
        self.drag_start
    }

    pub fn last_action_time(&self) -> f64 {
        self.last_action_time
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ResolvedStep {
    Key(Key),
    Click(i32, i32),
}

/// Ejecuta la secuencia configurada de cada emote, con su propio cooldown
pub struct EmoteDispatcher {
    actions: HashMap<String, Vec<ResolvedStep>>,
    cooldown: f64,
    step_delay: Duration,
    last_action_time: f64,
}

impl EmoteDispatcher {
    pub fn from_config(config: &ActionsConfig) -> Result<Self, InjectionError> {
        let mut actions = HashMap::new();
        for emote in &config.emotes {
            let steps = emote
                .steps
                .iter()
                .map(|step| match step {
                    ActionStep::Key(name) => parse_key(name).map(ResolvedStep::Key),
                    ActionStep::Click([x, y]) => Ok(ResolvedStep::Click(*x, *y)),
                })
                .collect::<Result<Vec<_>, _>>()?;
            actions.insert(emote.label.clone(), steps);
        }

        Ok(Self {
            actions,
            cooldown: config.cooldown,
            step_delay: Duration::from_millis(config.step_delay_ms),
            last_action_time: f64::NEG_INFINITY,
        })
    }

    /// `Ok(true)` si se ejecutó la secuencia; `Ok(false)` en cooldown o sin
    /// acción para la etiqueta. Un error de inyección no actualiza el cooldown
    /// ni se reintenta.
    pub fn dispatch(
        &mut self,
        label: &GestureLabel,
        now: f64,
        injector: &mut dyn InputInjector,
    ) -> Result<bool, InjectionError> {
        let elapsed = now - self.last_action_time;
        if elapsed < self.cooldown {
            debug!("Emote {} en cooldown ({:.2}s)", label, self.cooldown - elapsed);
            return Ok(false);
        }

        let Some(steps) = self.actions.get(label.as_str()) else {
            warn!("⚠️  Sin acción configurada para {}", label);
            return Ok(false);
        };

        for (i, step) in steps.iter().enumerate() {
            if i > 0 {
                injector.pause(self.step_delay);
            }
            match *step {
                ResolvedStep::Key(key) => injector.press_key(key)?,
                ResolvedStep::Click(x, y) => {
                    injector.move_to(x, y)?;
                    injector.click()?;
                }
            }
        }

        self.last_action_time = now;
        info!("✨ Emote ejecutado: {}", label);
        Ok(true)
    }

    pub fn last_action_time(&self) -> f64 {
        self.last_action_time
    }
}
