/*
manocursor - control de cursor y atajos por gestos de mano

El estimador de pose (MediaPipe u otro) corre como proceso externo y escribe
un frame JSON por línea en stdout:
  {"t": 0.033, "hands": [{"handedness": "Right", "landmarks": [[x,y,z], ...]}]}

Una mano  → modo cursor (mano abierta mueve, cerrada hace click/arrastre)
Dos manos → tras 0.5 s, modo emote (pose sostenida → secuencia de teclas)

Ejecutar (requiere acceso a /dev/uinput y /dev/input):
  sg input -c './target/release/manocursor --config manocursor.toml -- python3 pose.py'

Sin dispositivo real, imprimiendo eventos:
  python3 pose.py | ./target/release/manocursor --dry-run --events

Parada de emergencia: tecla configurada (esc), Ctrl-C o llevar el cursor a una esquina.
*/

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use manocursor::config::{Config, RuntimeConfig};
use manocursor::csv_loader::load_frames_from_csv;
use manocursor::hid::{parse_key, EmergencyStop, InputInjector, RecordingInjector, VirtualPointer};
use manocursor::pipeline::Pipeline;
use manocursor::pose_source::{
    spawn_emergency_watcher, JsonLinesSource, PoseSource, PoseSourceError, ReplaySource,
};

/// Espera máxima por frame antes de revisar la bandera de emergencia
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(name = "manocursor", version, about = "Cursor y atajos controlados por gestos de mano")]
struct Cli {
    /// Archivo de configuración TOML
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Preset base cuando no hay archivo de configuración
    #[arg(long, conflicts_with = "config")]
    preset: Option<String>,

    /// No crear el dispositivo uinput; solo registrar los comandos
    #[arg(long)]
    dry_run: bool,

    /// Imprimir los eventos de cada frame como JSON en stdout
    #[arg(long)]
    events: bool,

    /// Reproducir una sesión grabada (CSV) en lugar del estimador
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Mostrar la configuración efectiva y salir
    #[arg(long)]
    print_config: bool,

    /// Comando del estimador de pose (después de --)
    #[arg(last = true)]
    command: Vec<String>,
}

/// Dispositivo real o registro en memoria (--dry-run)
enum Injector {
    Device(VirtualPointer),
    DryRun(RecordingInjector),
}

impl Injector {
    fn open(runtime: &RuntimeConfig, config: &Config, stop: &EmergencyStop) -> Result<Self> {
        if runtime.dry_run {
            info!("🧪 Modo dry-run: no se crea dispositivo uinput");
            return Ok(Injector::DryRun(RecordingInjector::with_stop(stop.clone())));
        }
        let pointer = VirtualPointer::new(
            &runtime.device_name,
            config.cursor.screen_width,
            config.cursor.screen_height,
            runtime.failsafe_corners,
            stop.clone(),
        )
        .context("No se pudo crear el dispositivo uinput (¿permisos sobre /dev/uinput?)")?;
        Ok(Injector::Device(pointer))
    }

    fn as_dyn(&mut self) -> &mut dyn InputInjector {
        match self {
            Injector::Device(dev) => dev,
            Injector::DryRun(rec) => rec,
        }
    }

    /// Descarta lo registrado en dry-run para no acumular memoria
    fn drain(&mut self) -> usize {
        match self {
            Injector::Device(_) => 0,
            Injector::DryRun(rec) => rec.take_commands().len(),
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match (&cli.config, &cli.preset) {
        (Some(path), _) => Config::load(path)
            .with_context(|| format!("No se pudo cargar la configuración {:?}", path))?,
        (None, Some(preset)) => Config::preset(preset)?,
        (None, None) => Config::default(),
    };

    if cli.dry_run || cli.replay.is_some() {
        config.runtime.dry_run = true;
    }
    if cli.events {
        config.runtime.emit_events = true;
    }
    if !cli.command.is_empty() {
        config.runtime.pose_command = Some(cli.command.clone());
    }
    config.validate()?;
    Ok(config)
}

fn open_source(cli: &Cli, runtime: &RuntimeConfig) -> Result<Box<dyn PoseSource>> {
    if let Some(path) = &cli.replay {
        let frames = load_frames_from_csv(path)?;
        info!("🎞️  Reproduciendo {} frames desde {:?}", frames.len(), path);
        return Ok(Box::new(ReplaySource::new(frames)));
    }
    match &runtime.pose_command {
        Some(command) => Ok(Box::new(JsonLinesSource::spawn(command)?)),
        None => Ok(Box::new(JsonLinesSource::stdin())),
    }
}

fn install_emergency_stop(runtime: &RuntimeConfig) -> Result<EmergencyStop> {
    let stop = EmergencyStop::new();

    let handler_stop = stop.clone();
    ctrlc::set_handler(move || handler_stop.trigger())
        .context("No se pudo instalar el manejador de Ctrl-C")?;

    let key = parse_key(&runtime.emergency_key)?;
    match spawn_emergency_watcher(key, stop.clone()) {
        Ok(_) => info!("🛑 Tecla de emergencia: {}", runtime.emergency_key),
        Err(e) => warn!("⚠️  Sin tecla de emergencia ({}); quedan Ctrl-C y esquinas", e),
    }
    Ok(stop)
}

/// Bucle de frames. Los abortos terminan la sesión sin error.
fn frame_loop(
    pipeline: &mut Pipeline,
    source: &mut dyn PoseSource,
    injector: &mut Injector,
    runtime: &RuntimeConfig,
    stop: &EmergencyStop,
    last_t: &mut f64,
) -> Result<()> {
    let frame_budget =
        (runtime.max_fps > 0).then(|| Duration::from_secs_f64(1.0 / runtime.max_fps as f64));
    let mut frames = 0u64;

    loop {
        if stop.is_triggered() {
            warn!("🛑 Parada de emergencia: terminando sesión");
            break;
        }
        let started = Instant::now();

        let frame = match source.next_frame(POLL_TIMEOUT) {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(PoseSourceError::Closed) => {
                info!("🔌 Fuente de pose cerrada tras {} frames", frames);
                break;
            }
            Err(e) => return Err(e.into()),
        };
        frames += 1;
        *last_t = frame.t;

        match pipeline.process(&frame, frame.t, injector.as_dyn()) {
            Ok(events) => {
                if runtime.emit_events {
                    println!("{}", serde_json::to_string(&events)?);
                }
            }
            Err(e) if e.is_abort() => {
                warn!("🛑 Sesión abortada: {}", e);
                break;
            }
            Err(e) => return Err(e).context("Fallo del dispositivo de entrada"),
        }
        injector.drain();

        if let Some(budget) = frame_budget {
            let elapsed = started.elapsed();
            if elapsed < budget {
                std::thread::sleep(budget - elapsed);
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    if cli.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let runtime = config.runtime.clone();
    info!(
        "⚙️  Preset: {} | pantalla {}x{} | {} emotes",
        runtime.preset.as_deref().unwrap_or("default"),
        config.cursor.screen_width,
        config.cursor.screen_height,
        config.actions.emotes.len()
    );

    let stop = install_emergency_stop(&runtime)?;
    let mut pipeline = Pipeline::new(&config)?;
    let mut injector = Injector::open(&runtime, &config, &stop)?;
    let mut source = open_source(&cli, &runtime)?;
    info!("✅ Sistema listo");

    let mut last_t = 0.0;
    let outcome = frame_loop(
        &mut pipeline,
        source.as_mut(),
        &mut injector,
        &runtime,
        &stop,
        &mut last_t,
    );

    // Siempre: soltar el botón si quedó un arrastre activo
    match pipeline.shutdown(last_t, injector.as_dyn()) {
        Ok(Some(_)) => info!("🖱️  Botón liberado al cerrar"),
        Ok(None) => {}
        Err(e) => error!("❌ No se pudo liberar el botón: {}", e),
    }
    drop(source);
    info!("👋 Saliendo...");

    outcome
}
