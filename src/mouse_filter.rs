use crate::config::CursorConfig;

/// Remapea la zona activa [zone_min, zone_max] al rango completo de pantalla
/// y recorta a [margin, dim - margin]. Función pura.
pub fn map(
    raw_x: f32,
    raw_y: f32,
    screen_w: f32,
    screen_h: f32,
    zone_min: f32,
    zone_max: f32,
    margin: f32,
) -> (f32, f32) {
    let span = zone_max - zone_min;
    let remap = |raw: f32| ((raw - zone_min) / span).clamp(0.0, 1.0);

    let x = (remap(raw_x) * screen_w).clamp(margin, screen_w - margin);
    let y = (remap(raw_y) * screen_h).clamp(margin, screen_h - margin);
    (x, y)
}

/// Posición de mano normalizada → cursor en pantalla, con EMA y umbral anti-jitter
#[derive(Debug, Clone)]
pub struct CursorMapper {
    config: CursorConfig,
    smoothed_x: f32,
    smoothed_y: f32,
    /// Última posición enviada realmente al dispositivo
    last_set: (i32, i32),
}

impl CursorMapper {
    /// Arranca en el centro de la pantalla
    pub fn new(config: CursorConfig) -> Self {
        let cx = config.screen_width as f32 / 2.0;
        let cy = config.screen_height as f32 / 2.0;
        Self {
            config,
            smoothed_x: cx,
            smoothed_y: cy,
            last_set: (cx.round() as i32, cy.round() as i32),
        }
    }

    /// Objetivo sin suavizar para una coordenada normalizada
    pub fn target(&self, raw_x: f32, raw_y: f32) -> (f32, f32) {
        let raw_x = if self.config.mirror_x { 1.0 - raw_x } else { raw_x };
        map(
            raw_x,
            raw_y,
            self.config.screen_width as f32,
            self.config.screen_height as f32,
            self.config.zone_min,
            self.config.zone_max,
            self.config.margin,
        )
    }

    /// Actualiza el estado suavizado. Devuelve `Some(pos)` solo cuando hay que
    /// mover el puntero; durante un arrastre el umbral es 0.
    pub fn update(&mut self, raw_x: f32, raw_y: f32, dragging: bool) -> Option<(i32, i32)> {
        let (tx, ty) = self.target(raw_x, raw_y);
        let alpha = if dragging {
            self.config.drag_alpha
        } else {
            self.config.alpha
        };

        self.smoothed_x = alpha * tx + (1.0 - alpha) * self.smoothed_x;
        self.smoothed_y = alpha * ty + (1.0 - alpha) * self.smoothed_y;

        let threshold = if dragging {
            0.0
        } else {
            self.config.movement_threshold
        };
        let dx = self.smoothed_x - self.last_set.0 as f32;
        let dy = self.smoothed_y - self.last_set.1 as f32;
        if (dx * dx + dy * dy).sqrt() < threshold {
            return None;
        }

        let next = (self.smoothed_x.round() as i32, self.smoothed_y.round() as i32);
        if next == self.last_set {
            return None;
        }
        self.last_set = next;
        Some(next)
    }

    /// Última posición física del puntero
    pub fn position(&self) -> (i32, i32) {
        self.last_set
    }

    pub fn smoothed(&self) -> (f32, f32) {
        (self.smoothed_x, self.smoothed_y)
    }

    pub fn config(&self) -> &CursorConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn zone_map(raw_x: f32) -> f32 {
        map(raw_x, 0.5, 1000.0, 1000.0, 0.1, 0.9, 0.0).0
    }

    #[test]
    fn tracking_zone_remap() {
        assert_relative_eq!(zone_map(0.1), 0.0);
        assert_relative_eq!(zone_map(0.9), 1000.0);
        assert_relative_eq!(zone_map(0.05), 0.0);
        assert_relative_eq!(zone_map(0.5), 500.0, epsilon = 1e-3);
        assert_relative_eq!(zone_map(0.95), 1000.0);
    }

    #[test]
    fn margin_clamps_into_screen() {
        let (x, y) = map(0.0, 1.0, 1000.0, 800.0, 0.1, 0.9, 20.0);
        assert_relative_eq!(x, 20.0);
        assert_relative_eq!(y, 780.0);
    }

    fn mapper() -> CursorMapper {
        CursorMapper::new(CursorConfig {
            screen_width: 1000,
            screen_height: 1000,
            ..CursorConfig::default()
        })
    }

    #[test]
    fn starts_at_screen_center() {
        let mapper = mapper();
        assert_eq!(mapper.position(), (500, 500));
    }

    #[test]
    fn ema_uses_normal_and_drag_alpha() {
        let mut normal = mapper();
        normal.update(0.9, 0.5, false);
        // 0.3 * 1000 + 0.7 * 500
        assert_relative_eq!(normal.smoothed().0, 650.0, epsilon = 1e-2);

        let mut drag = mapper();
        drag.update(0.9, 0.5, true);
        // 0.7 * 1000 + 0.3 * 500
        assert_relative_eq!(drag.smoothed().0, 850.0, epsilon = 1e-2);
    }

    #[test]
    fn small_motion_is_suppressed_but_state_updates() {
        let mut mapper = mapper();
        // Objetivo a 5 px del centro → EMA avanza 1.5 px < umbral 2
        let raw = 0.1 + 0.8 * 505.0 / 1000.0;
        assert_eq!(mapper.update(raw, 0.5, false), None);
        assert!(mapper.smoothed().0 > 500.0);
        assert_eq!(mapper.position(), (500, 500));
    }

    #[test]
    fn drag_is_never_starved() {
        let mut mapper = mapper();
        let raw = 0.1 + 0.8 * 502.0 / 1000.0;
        // 0.7 * 2 px = 1.4 px → redondea a 501
        assert_eq!(mapper.update(raw, 0.5, true), Some((501, 500)));
    }

    #[test]
    fn same_rounded_position_is_not_resent() {
        let mut mapper = mapper();
        let raw = 0.1 + 0.8 * 500.4 / 1000.0;
        assert_eq!(mapper.update(raw, 0.5, true), None);
    }

    #[test]
    fn mirror_x_flips_axis() {
        let config = CursorConfig {
            screen_width: 1000,
            screen_height: 1000,
            mirror_x: true,
            ..CursorConfig::default()
        };
        let mapper = CursorMapper::new(config);
        assert_relative_eq!(mapper.target(0.9, 0.5).0, 0.0, epsilon = 1e-3);
    }
}
