use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use manocursor::config::Config;
use manocursor::csv_loader::load_frames_from_csv;
use manocursor::hid::{InjectorCommand, RecordingInjector};
use manocursor::pipeline::Pipeline;

const USAGE: &str = "Uso: replay_csv [--config archivo.toml] [--events] <sesion.csv>";

struct ReplayOptions {
    config: Option<PathBuf>,
    print_events: bool,
}

fn parse_args() -> Result<(PathBuf, ReplayOptions)> {
    let mut config: Option<PathBuf> = None;
    let mut print_events = false;
    let mut csv_path: Option<PathBuf> = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--events" => print_events = true,
            "--config" => {
                let path = args.next().ok_or_else(|| anyhow!("--config requiere un valor"))?;
                config = Some(PathBuf::from(path));
            }
            "-h" | "--help" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            _ => {
                if csv_path.is_some() {
                    bail!(USAGE);
                }
                csv_path = Some(PathBuf::from(arg));
            }
        }
    }

    let csv_path = csv_path.ok_or_else(|| anyhow!("Debes especificar un archivo CSV\n{}", USAGE))?;
    Ok((
        csv_path,
        ReplayOptions {
            config,
            print_events,
        },
    ))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let (csv_path, opts) = parse_args()?;
    let config = match &opts.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("No se pudo cargar la configuración {:?}", path))?,
        None => Config::default(),
    };

    println!("🎞️  Reproduciendo sesión desde {:?}", csv_path);
    let frames = load_frames_from_csv(&csv_path)?;

    let mut pipeline = Pipeline::new(&config)?;
    let mut injector = RecordingInjector::new();
    let mut triggers = Vec::new();
    let mut last_t = 0.0;

    for frame in &frames {
        last_t = frame.t;
        let events = pipeline.process(frame, frame.t, &mut injector)?;
        if opts.print_events {
            println!("{}", serde_json::to_string(&events)?);
        }
        if let Some(label) = &events.triggered {
            triggers.push((frame.t, label.to_string(), events.action_dispatched));
        }
    }
    pipeline.shutdown(last_t, &mut injector)?;

    let commands = injector.commands();
    let count = |pred: fn(&InjectorCommand) -> bool| commands.iter().filter(|c| pred(c)).count();

    println!("\n📊 {} frames, {} comandos", frames.len(), commands.len());
    println!("  movimientos:  {}", count(|c| matches!(c, InjectorCommand::MoveTo(..))));
    println!("  clicks:       {}", count(|c| matches!(c, InjectorCommand::Click)));
    println!("  presiones:    {}", count(|c| matches!(c, InjectorCommand::Press)));
    println!("  liberaciones: {}", count(|c| matches!(c, InjectorCommand::Release)));
    println!("  teclas:       {}", count(|c| matches!(c, InjectorCommand::Key(_))));

    if triggers.is_empty() {
        println!("\nℹ️  Ningún emote disparado");
    } else {
        println!("\n🎯 Emotes disparados:");
        for (t, label, dispatched) in &triggers {
            let mark = if *dispatched { "✅" } else { "⏳" };
            println!("  {:>8.3}s  {} {}", t, mark, label);
        }
    }

    Ok(())
}
