use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{AbsInfo, AbsoluteAxisType, AttributeSet, EventType, InputEvent, Key, UinputAbsSetup};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Teclas hasta KEY_MICMUTE; cubre todo el teclado estándar
const MAX_KEYBOARD_CODE: u16 = 248;
const TAP_DELAY: Duration = Duration::from_millis(10);

#[derive(Error, Debug)]
pub enum InjectionError {
    #[error("parada de emergencia activada")]
    EmergencyStop,

    #[error("failsafe: puntero en una esquina ({x}, {y})")]
    Failsafe { x: i32, y: i32 },

    #[error("dispositivo uinput: {0}")]
    Device(#[from] std::io::Error),

    #[error("tecla desconocida: {0}")]
    UnknownKey(String),
}

impl InjectionError {
    /// Señales de aborto que el llamador debe propagar
    pub fn is_abort(&self) -> bool {
        matches!(
            self,
            InjectionError::EmergencyStop | InjectionError::Failsafe { .. }
        )
    }
}

/// Bandera compartida de parada de emergencia
#[derive(Debug, Clone, Default)]
pub struct EmergencyStop(Arc<AtomicBool>);

impl EmergencyStop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        if !self.0.swap(true, Ordering::SeqCst) {
            warn!("🛑 Parada de emergencia");
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), InjectionError> {
        if self.is_triggered() {
            return Err(InjectionError::EmergencyStop);
        }
        Ok(())
    }
}

/// Nombre de tecla de la configuración → código evdev.
/// Acepta "e", "esc", "enter", "space", "1" o el nombre completo "KEY_E".
pub fn parse_key(name: &str) -> Result<Key, InjectionError> {
    let trimmed = name.trim();
    let upper = trimmed.to_ascii_uppercase();
    let canonical = match upper.as_str() {
        "" => return Err(InjectionError::UnknownKey(name.to_string())),
        "ESCAPE" => "KEY_ESC".to_string(),
        "RETURN" => "KEY_ENTER".to_string(),
        "CTRL" | "CONTROL" => "KEY_LEFTCTRL".to_string(),
        "SHIFT" => "KEY_LEFTSHIFT".to_string(),
        "ALT" => "KEY_LEFTALT".to_string(),
        s if s.starts_with("KEY_") || s.starts_with("BTN_") => s.to_string(),
        s => format!("KEY_{}", s),
    };
    canonical
        .parse::<Key>()
        .map_err(|_| InjectionError::UnknownKey(name.to_string()))
}

/// Primitivas de inyección. `release` nunca se bloquea por la parada de emergencia.
pub trait InputInjector {
    fn move_to(&mut self, x: i32, y: i32) -> Result<(), InjectionError>;
    fn press(&mut self) -> Result<(), InjectionError>;
    fn release(&mut self) -> Result<(), InjectionError>;
    fn click(&mut self) -> Result<(), InjectionError>;
    fn press_key(&mut self, key: Key) -> Result<(), InjectionError>;

    /// Espera bloqueante entre pasos dependientes
    fn pause(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Eventos ABS_X/ABS_Y para llevar el puntero a (x, y), recortados a la pantalla
fn absolute_move(x: i32, y: i32, screen: (i32, i32)) -> ([InputEvent; 2], (i32, i32)) {
    let x = x.clamp(0, screen.0 - 1);
    let y = y.clamp(0, screen.1 - 1);
    (
        [
            InputEvent::new(EventType::ABSOLUTE, AbsoluteAxisType::ABS_X.0, x),
            InputEvent::new(EventType::ABSOLUTE, AbsoluteAxisType::ABS_Y.0, y),
        ],
        (x, y),
    )
}

/// true si (x, y) toca dos bordes a la vez
fn in_corner((x, y): (i32, i32), screen: (i32, i32)) -> bool {
    let at_x_edge = x <= 0 || x >= screen.0 - 1;
    let at_y_edge = y <= 0 || y >= screen.1 - 1;
    at_x_edge && at_y_edge
}

/// Ratón absoluto + teclado virtual sobre /dev/uinput.
/// Los ejes ABS_X/ABS_Y cubren la pantalla configurada, así que la posición
/// registrada es la del puntero real (sin aceleración del compositor).
/// Un puntero movido con otro ratón no se ve desde aquí; el failsafe de
/// esquinas solo cubre las posiciones que envía este dispositivo.
pub struct VirtualPointer {
    dev: VirtualDevice,
    position: (i32, i32),
    screen: (i32, i32),
    failsafe_corners: bool,
    stop: EmergencyStop,
}

impl VirtualPointer {
    pub fn new(
        name: &str,
        screen_width: u32,
        screen_height: u32,
        failsafe_corners: bool,
        stop: EmergencyStop,
    ) -> Result<Self, InjectionError> {
        let mut keys = AttributeSet::<Key>::new();
        for code in 1..=MAX_KEYBOARD_CODE {
            keys.insert(Key::new(code));
        }
        keys.insert(Key::BTN_LEFT);

        let screen = (screen_width as i32, screen_height as i32);
        let abs_x = UinputAbsSetup::new(
            AbsoluteAxisType::ABS_X,
            AbsInfo::new(0, 0, screen.0 - 1, 0, 0, 1),
        );
        let abs_y = UinputAbsSetup::new(
            AbsoluteAxisType::ABS_Y,
            AbsInfo::new(0, 0, screen.1 - 1, 0, 0, 1),
        );

        let dev = VirtualDeviceBuilder::new()?
            .name(name)
            .with_keys(&keys)?
            .with_absolute_axis(&abs_x)?
            .with_absolute_axis(&abs_y)?
            .build()?;

        let mut pointer = Self {
            dev,
            position: (0, 0),
            screen,
            failsafe_corners,
            stop,
        };

        // Posición inicial conocida: centro de la pantalla
        pointer.emit_absolute(screen.0 / 2, screen.1 / 2)?;

        info!("✅ HID inicializado (/dev/uinput): {}", name);
        Ok(pointer)
    }

    fn emit_absolute(&mut self, x: i32, y: i32) -> Result<(), InjectionError> {
        let (events, position) = absolute_move(x, y, self.screen);
        self.dev.emit(&events)?;
        self.position = position;
        Ok(())
    }

    fn emit_key(&mut self, key: Key, value: i32) -> Result<(), InjectionError> {
        self.dev
            .emit(&[InputEvent::new(EventType::KEY, key.code(), value)])?;
        Ok(())
    }

    /// Falla si hay parada de emergencia o el puntero está en una esquina
    fn guard(&self) -> Result<(), InjectionError> {
        self.stop.check()?;
        if self.failsafe_corners && in_corner(self.position, self.screen) {
            let (x, y) = self.position;
            return Err(InjectionError::Failsafe { x, y });
        }
        Ok(())
    }
}

impl InputInjector for VirtualPointer {
    fn move_to(&mut self, x: i32, y: i32) -> Result<(), InjectionError> {
        self.guard()?;
        if (x, y) != self.position {
            self.emit_absolute(x, y)?;
        }
        Ok(())
    }

    fn press(&mut self) -> Result<(), InjectionError> {
        self.guard()?;
        self.emit_key(Key::BTN_LEFT, 1)
    }

    fn release(&mut self) -> Result<(), InjectionError> {
        self.emit_key(Key::BTN_LEFT, 0)
    }

    fn click(&mut self) -> Result<(), InjectionError> {
        self.guard()?;
        self.emit_key(Key::BTN_LEFT, 1)?;
        std::thread::sleep(TAP_DELAY);
        self.emit_key(Key::BTN_LEFT, 0)
    }

    fn press_key(&mut self, key: Key) -> Result<(), InjectionError> {
        self.guard()?;
        self.emit_key(key, 1)?;
        std::thread::sleep(TAP_DELAY);
        self.emit_key(key, 0)
    }
}

/// Comando registrado por `RecordingInjector`
#[derive(Debug, Clone, PartialEq)]
pub enum InjectorCommand {
    MoveTo(i32, i32),
    Press,
    Release,
    Click,
    Key(Key),
    Pause(Duration),
}

/// Inyector en memoria para pruebas y `--dry-run`: registra los comandos
/// y respeta la misma bandera de emergencia que el dispositivo real.
#[derive(Debug, Default)]
pub struct RecordingInjector {
    commands: Vec<InjectorCommand>,
    stop: EmergencyStop,
}

impl RecordingInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stop(stop: EmergencyStop) -> Self {
        Self {
            commands: Vec::new(),
            stop,
        }
    }

    pub fn commands(&self) -> &[InjectorCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<InjectorCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn count(&self, command: &InjectorCommand) -> usize {
        self.commands.iter().filter(|c| *c == command).count()
    }

    fn record(&mut self, command: InjectorCommand) -> Result<(), InjectionError> {
        if command != InjectorCommand::Release {
            self.stop.check()?;
        }
        debug!("🎮 {:?}", command);
        self.commands.push(command);
        Ok(())
    }
}

impl InputInjector for RecordingInjector {
    fn move_to(&mut self, x: i32, y: i32) -> Result<(), InjectionError> {
        self.record(InjectorCommand::MoveTo(x, y))
    }

    fn press(&mut self) -> Result<(), InjectionError> {
        self.record(InjectorCommand::Press)
    }

    fn release(&mut self) -> Result<(), InjectionError> {
        self.record(InjectorCommand::Release)
    }

    fn click(&mut self) -> Result<(), InjectionError> {
        self.record(InjectorCommand::Click)
    }

    fn press_key(&mut self, key: Key) -> Result<(), InjectionError> {
        self.record(InjectorCommand::Key(key))
    }

    fn pause(&mut self, duration: Duration) {
        self.commands.push(InjectorCommand::Pause(duration));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_short_key_names() {
        assert_eq!(parse_key("e").unwrap(), Key::KEY_E);
        assert_eq!(parse_key("G").unwrap(), Key::KEY_G);
        assert_eq!(parse_key("esc").unwrap(), Key::KEY_ESC);
        assert_eq!(parse_key("escape").unwrap(), Key::KEY_ESC);
        assert_eq!(parse_key("space").unwrap(), Key::KEY_SPACE);
        assert_eq!(parse_key("1").unwrap(), Key::KEY_1);
        assert_eq!(parse_key("KEY_ENTER").unwrap(), Key::KEY_ENTER);
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(matches!(parse_key("nope"), Err(InjectionError::UnknownKey(_))));
        assert!(matches!(parse_key(""), Err(InjectionError::UnknownKey(_))));
    }

    #[test]
    fn emergency_stop_blocks_everything_but_release() {
        let stop = EmergencyStop::new();
        let mut injector = RecordingInjector::with_stop(stop.clone());
        injector.press().unwrap();

        stop.trigger();
        assert!(matches!(
            injector.move_to(10, 10),
            Err(InjectionError::EmergencyStop)
        ));
        assert!(injector.press_key(Key::KEY_E).unwrap_err().is_abort());
        injector.release().unwrap();

        assert_eq!(
            injector.commands(),
            &[InjectorCommand::Press, InjectorCommand::Release]
        );
    }

    #[test]
    fn absolute_moves_are_clamped_to_screen() {
        let screen = (1920, 1080);
        let (events, pos) = absolute_move(960, 540, screen);
        assert_eq!(pos, (960, 540));
        assert_eq!(events[0].event_type(), EventType::ABSOLUTE);
        assert_eq!(events[0].code(), AbsoluteAxisType::ABS_X.0);
        assert_eq!(events[0].value(), 960);
        assert_eq!(events[1].code(), AbsoluteAxisType::ABS_Y.0);
        assert_eq!(events[1].value(), 540);

        let (events, pos) = absolute_move(5000, -3, screen);
        assert_eq!(pos, (1919, 0));
        assert_eq!(events[0].value(), 1919);
        assert_eq!(events[1].value(), 0);
    }

    #[test]
    fn corner_detection_needs_two_edges() {
        let screen = (1000, 800);
        assert!(in_corner((0, 0), screen));
        assert!(in_corner((999, 799), screen));
        assert!(in_corner((0, 799), screen));
        assert!(!in_corner((0, 400), screen));
        assert!(!in_corner((500, 799), screen));
    }

    #[test]
    fn device_errors_are_not_aborts() {
        let err = InjectionError::from(std::io::Error::new(std::io::ErrorKind::Other, "x"));
        assert!(!err.is_abort());
        assert!(InjectionError::Failsafe { x: 0, y: 0 }.is_abort());
    }
}
