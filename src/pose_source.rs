//! Fuente de frames de pose: líneas JSON del estimador externo (subproceso o
//! stdin) leídas en un hilo y entregadas por un canal acotado.
//! También contiene el vigilante de teclado para la parada de emergencia.

use crate::hid::EmergencyStop;
use crate::types::{FaceObservation, HandObservation, Handedness, Landmark, PoseFrame};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::Deserialize;
use std::collections::VecDeque;
use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Frames en vuelo entre el lector y el bucle principal
pub const CHANNEL_CAPACITY: usize = 4;

#[derive(Error, Debug)]
pub enum PoseSourceError {
    #[error("error de E/S: {0}")]
    Io(#[from] std::io::Error),

    #[error("línea JSON inválida: {0}")]
    Json(#[from] serde_json::Error),

    #[error("comando del estimador vacío")]
    EmptyCommand,

    #[error("no se pudo lanzar el estimador '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("no se encontró ningún teclado en /dev/input")]
    NoKeyboard,

    #[error("la fuente de pose se cerró")]
    Closed,
}

/// Origen de frames para el bucle principal
pub trait PoseSource {
    /// `Ok(None)` si no llegó nada dentro de `timeout`; `Err(Closed)` al terminar
    fn next_frame(&mut self, timeout: Duration) -> Result<Option<PoseFrame>, PoseSourceError>;
}

#[derive(Debug, Deserialize)]
struct WireHand {
    #[serde(default)]
    handedness: Handedness,
    landmarks: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct WireFrame {
    #[serde(default)]
    t: Option<f64>,
    #[serde(default)]
    hands: Vec<WireHand>,
    #[serde(default)]
    face: Option<FaceObservation>,
}

fn decode_hand(hand: WireHand) -> Option<HandObservation> {
    let mut points = Vec::with_capacity(hand.landmarks.len());
    for coords in &hand.landmarks {
        match coords.as_slice() {
            [x, y] => points.push(Landmark::new(*x, *y)),
            [x, y, z, ..] => points.push(Landmark { x: *x, y: *y, z: *z }),
            _ => return None,
        }
    }
    HandObservation::from_points(&points, hand.handedness)
}

/// Decodifica una línea. Sin campo `t` se usa `fallback_t`.
/// Las manos con menos de 21 puntos se descartan.
pub fn parse_line(line: &str, fallback_t: f64) -> Result<PoseFrame, PoseSourceError> {
    let wire: WireFrame = serde_json::from_str(line)?;
    let total = wire.hands.len();
    let hands: Vec<HandObservation> = wire.hands.into_iter().filter_map(decode_hand).collect();
    if hands.len() < total {
        debug!("⚠️  {} mano(s) incompletas descartadas", total - hands.len());
    }
    Ok(PoseFrame {
        t: wire.t.unwrap_or(fallback_t),
        hands,
        face: wire.face,
    })
}

/// Envía sin bloquear; si el canal está lleno se descarta el frame más viejo.
/// `drain` es un receptor del mismo canal, de modo que el envío nunca ve
/// el canal desconectado: el fin del consumidor se avisa con `closed`.
fn push_latest(tx: &Sender<PoseFrame>, drain: &Receiver<PoseFrame>, frame: PoseFrame) {
    if let Err(TrySendError::Full(frame)) = tx.try_send(frame) {
        let _ = drain.try_recv();
        let _ = tx.try_send(frame);
    }
}

/// Frames JSON leídos por un hilo propio
pub struct JsonLinesSource {
    rx: Receiver<PoseFrame>,
    closed: Arc<AtomicBool>,
    child: Option<Child>,
    reader: Option<JoinHandle<()>>,
}

impl JsonLinesSource {
    /// Lanza el estimador y lee su stdout
    pub fn spawn(command: &[String]) -> Result<Self, PoseSourceError> {
        let (program, args) = command.split_first().ok_or(PoseSourceError::EmptyCommand)?;
        let mut child = Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| PoseSourceError::Spawn {
                command: command.join(" "),
                source,
            })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("el estimador no expone stdout"))?;
        info!("✅ Estimador lanzado: {} (pid {})", program, child.id());

        let mut source = Self::from_reader(BufReader::new(stdout), CHANNEL_CAPACITY);
        source.child = Some(child);
        Ok(source)
    }

    /// Lee frames desde stdin
    pub fn stdin() -> Self {
        info!("📥 Leyendo frames desde stdin");
        Self::from_reader(BufReader::new(std::io::stdin()), CHANNEL_CAPACITY)
    }

    pub fn from_reader<R: BufRead + Send + 'static>(reader: R, capacity: usize) -> Self {
        let (tx, rx) = bounded::<PoseFrame>(capacity.max(1));
        let drain = rx.clone();
        let closed = Arc::new(AtomicBool::new(false));
        let reader_closed = closed.clone();

        let handle = std::thread::spawn(move || {
            let start = Instant::now();
            let mut skipped = 0usize;
            for line in reader.lines() {
                if reader_closed.load(Ordering::SeqCst) {
                    break;
                }
                let line = match line {
                    Ok(l) => l,
                    Err(e) => {
                        warn!("❌ Error leyendo la fuente de pose: {}", e);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_line(&line, start.elapsed().as_secs_f64()) {
                    Ok(frame) => push_latest(&tx, &drain, frame),
                    Err(e) => {
                        skipped += 1;
                        warn!("⚠️  Línea descartada: {}", e);
                    }
                }
            }
            info!("🔌 Fuente de pose terminada ({} líneas inválidas)", skipped);
        });

        Self {
            rx,
            closed,
            child: None,
            reader: Some(handle),
        }
    }

    /// true cuando el hilo lector ya terminó
    pub fn reader_finished(&self) -> bool {
        self.reader.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Detiene el hilo lector en la siguiente línea y termina el estimador
    pub fn shutdown(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                debug!("kill: {}", e);
            }
            let _ = child.wait();
            info!("🛑 Estimador detenido");
        }
    }
}

impl PoseSource for JsonLinesSource {
    fn next_frame(&mut self, timeout: Duration) -> Result<Option<PoseFrame>, PoseSourceError> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.reader.take() {
                    let _ = handle.join();
                }
                Err(PoseSourceError::Closed)
            }
        }
    }
}

impl Drop for JsonLinesSource {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Sesión grabada reproducida en orden
#[derive(Debug, Default)]
pub struct ReplaySource {
    frames: VecDeque<PoseFrame>,
}

impl ReplaySource {
    pub fn new(frames: Vec<PoseFrame>) -> Self {
        Self {
            frames: frames.into(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl PoseSource for ReplaySource {
    fn next_frame(&mut self, _timeout: Duration) -> Result<Option<PoseFrame>, PoseSourceError> {
        self.frames
            .pop_front()
            .map(Some)
            .ok_or(PoseSourceError::Closed)
    }
}

/// Busca un teclado en /dev/input y levanta la bandera al pulsar `key`
pub fn spawn_emergency_watcher(
    key: evdev::Key,
    stop: EmergencyStop,
) -> Result<JoinHandle<()>, PoseSourceError> {
    use evdev::{Device, InputEventKind};

    let mut keyboard: Option<Device> = None;
    for entry in std::fs::read_dir("/dev/input")?.flatten() {
        let path = entry.path();
        let is_event = path
            .file_name()
            .map_or(false, |n| n.to_string_lossy().starts_with("event"));
        if !is_event {
            continue;
        }
        let Ok(device) = Device::open(&path) else {
            continue;
        };
        let name = device.name().unwrap_or_default().to_lowercase();
        let has_key = device.supported_keys().map_or(false, |k| k.contains(key));
        if has_key && (name.contains("keyboard") || name.contains("at translated")) {
            info!(
                "✅ Teclado de emergencia: {} ({})",
                device.name().unwrap_or_default(),
                path.display()
            );
            keyboard = Some(device);
            break;
        }
    }
    let mut device = keyboard.ok_or(PoseSourceError::NoKeyboard)?;

    Ok(std::thread::spawn(move || loop {
        match device.fetch_events() {
            Ok(events) => {
                for ev in events {
                    if let InputEventKind::Key(k) = ev.kind() {
                        if k == key && ev.value() == 1 {
                            stop.trigger();
                        }
                    }
                }
            }
            Err(e) => {
                warn!("❌ Vigilante de teclado detenido: {}", e);
                break;
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn hand_json(points: usize, handedness: &str) -> String {
        let pts: Vec<String> = (0..points)
            .map(|i| format!("[{:.2}, 0.5, 0.0]", i as f32 / 100.0))
            .collect();
        format!(
            r#"{{"handedness": "{}", "landmarks": [{}]}}"#,
            handedness,
            pts.join(",")
        )
    }

    #[test]
    fn parses_frame_with_hands_and_face() {
        let line = format!(
            r#"{{"t": 1.5, "hands": [{}], "face": {{"center_x": 0.5, "center_y": 0.4, "width": 0.2, "height": 0.3}}}}"#,
            hand_json(21, "Left")
        );
        let frame = parse_line(&line, 0.0).unwrap();
        assert_eq!(frame.t, 1.5);
        assert_eq!(frame.hand_count(), 1);
        assert_eq!(frame.hands[0].handedness, Handedness::Left);
        assert!((frame.hands[0].landmarks[20].x - 0.2).abs() < 1e-6);
        assert!(frame.face.is_some());
    }

    #[test]
    fn incomplete_hands_are_dropped() {
        let line = format!(
            r#"{{"t": 0.1, "hands": [{}, {}]}}"#,
            hand_json(20, "Right"),
            hand_json(21, "Right")
        );
        let frame = parse_line(&line, 0.0).unwrap();
        assert_eq!(frame.hand_count(), 1);
    }

    #[test]
    fn two_coordinate_points_and_missing_timestamp() {
        let pts = vec!["[0.5, 0.5]"; 21].join(",");
        let line = format!(r#"{{"hands": [{{"landmarks": [{}]}}]}}"#, pts);
        let frame = parse_line(&line, 3.25).unwrap();
        assert_eq!(frame.t, 3.25);
        assert_eq!(frame.hands[0].handedness, Handedness::Unknown);
        assert_eq!(frame.hands[0].landmarks[0].z, 0.0);
    }

    #[test]
    fn malformed_line_is_an_error() {
        assert!(matches!(
            parse_line("{not json", 0.0),
            Err(PoseSourceError::Json(_))
        ));
    }

    #[test]
    fn full_channel_keeps_newest_frame() {
        let (tx, rx) = bounded::<PoseFrame>(1);
        push_latest(&tx, &rx, PoseFrame::new(1.0, vec![]));
        push_latest(&tx, &rx, PoseFrame::new(2.0, vec![]));
        assert_eq!(rx.len(), 1);
        assert_eq!(rx.try_recv().unwrap().t, 2.0);
    }

    #[test]
    fn reader_skips_bad_lines_and_closes() {
        let input = format!(
            "{{\"t\": 0.0, \"hands\": []}}\ngarbage\n\n{{\"t\": 0.1, \"hands\": [{}]}}\n",
            hand_json(21, "Right")
        );
        let mut source = JsonLinesSource::from_reader(Cursor::new(input), 16);

        let mut frames = Vec::new();
        loop {
            match source.next_frame(Duration::from_secs(2)) {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => continue,
                Err(PoseSourceError::Closed) => break,
                Err(e) => panic!("error inesperado: {}", e),
            }
        }
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].hand_count(), 1);
    }

    #[test]
    fn shutdown_stops_endless_reader() {
        // Líneas vacías sin fin: solo la bandera de cierre detiene el hilo
        let reader = BufReader::new(std::io::repeat(b'\n'));
        let mut source = JsonLinesSource::from_reader(reader, 4);
        assert!(!source.reader_finished());

        source.shutdown();
        let deadline = Instant::now() + Duration::from_secs(2);
        while !source.reader_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(source.reader_finished());
    }

    #[test]
    fn replay_source_drains_in_order() {
        let mut source = ReplaySource::new(vec![
            PoseFrame::new(0.0, vec![]),
            PoseFrame::new(0.5, vec![]),
        ]);
        let timeout = Duration::from_millis(1);
        assert_eq!(source.next_frame(timeout).unwrap().unwrap().t, 0.0);
        assert_eq!(source.next_frame(timeout).unwrap().unwrap().t, 0.5);
        assert!(matches!(
            source.next_frame(timeout),
            Err(PoseSourceError::Closed)
        ));
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(matches!(
            JsonLinesSource::spawn(&[]),
            Err(PoseSourceError::EmptyCommand)
        ));
    }
}
