use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use manocursor::config::Config;
use manocursor::csv_loader::load_frames_from_csv;
use manocursor::feature_extractor::FeatureExtractor;
use manocursor::gesture_classifier::KnnClassifier;

const USAGE: &str = "Uso: collect_samples [--config archivo.toml] [--output training.json] [--clear] <sesion.csv> <ETIQUETA>";

struct CollectOptions {
    config: Option<PathBuf>,
    output: Option<PathBuf>,
    clear: bool,
}

fn parse_args() -> Result<(PathBuf, String, CollectOptions)> {
    let mut opts = CollectOptions {
        config: None,
        output: None,
        clear: false,
    };
    let mut positional = Vec::new();

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--clear" => opts.clear = true,
            "--config" => {
                let path = args.next().ok_or_else(|| anyhow!("--config requiere un valor"))?;
                opts.config = Some(PathBuf::from(path));
            }
            "--output" => {
                let path = args.next().ok_or_else(|| anyhow!("--output requiere un valor"))?;
                opts.output = Some(PathBuf::from(path));
            }
            "-h" | "--help" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            _ => positional.push(arg),
        }
    }

    match <[String; 2]>::try_from(positional) {
        Ok([csv_path, label]) => Ok((PathBuf::from(csv_path), label, opts)),
        Err(_) => bail!(USAGE),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let (csv_path, label, opts) = parse_args()?;
    let config = match &opts.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("No se pudo cargar la configuración {:?}", path))?,
        None => Config::default(),
    };
    let classifier = &config.classifier;

    let output = opts
        .output
        .or_else(|| classifier.training_data.clone())
        .ok_or_else(|| anyhow!("Sin destino: usa --output o classifier.training_data"))?;

    let mut knn = if output.exists() && !opts.clear {
        KnnClassifier::load(&output, classifier.knn_k, classifier.knn_max_mean_distance)
            .with_context(|| format!("No se pudo leer el set de entrenamiento {:?}", output))?
    } else {
        KnnClassifier::new(classifier.knn_k, classifier.knn_max_mean_distance)
    };
    if opts.clear {
        knn.clear();
        println!("🧹 Set de entrenamiento vaciado");
    }

    println!("📥 Cargando sesión desde {:?}", csv_path);
    let frames = load_frames_from_csv(&csv_path)?;

    let extractor = FeatureExtractor::new(classifier.feature_layout);
    let added = knn
        .add_frames(&extractor, &frames, &label)
        .with_context(|| format!("Las muestras no encajan en {:?}", output))?;
    if added == 0 {
        bail!(
            "Ningún frame de {:?} sirve para el layout {:?}",
            csv_path,
            classifier.feature_layout
        );
    }

    knn.save(&output)
        .with_context(|| format!("No se pudo escribir {:?}", output))?;

    println!("✅ {} muestras '{}' agregadas ({} frames)", added, label, frames.len());
    println!("\n📊 Set de entrenamiento {:?}:", output);
    for (name, count) in knn.sample_counts() {
        println!("  {:<12} {}", name, count);
    }

    Ok(())
}
