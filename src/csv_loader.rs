use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};

use crate::types::{HandObservation, Handedness, Landmark, PoseFrame, NUM_LANDMARKS};

/// Una fila del CSV: `frame,t,hand,handedness,landmark,x,y,z`.
/// Un frame sin manos se escribe con las columnas de mano vacías.
#[derive(Debug, Serialize, Deserialize)]
struct LandmarkRow {
    frame: usize,
    t: f64,
    hand: Option<usize>,
    handedness: Option<Handedness>,
    landmark: Option<usize>,
    x: Option<f32>,
    y: Option<f32>,
    z: Option<f32>,
}

#[derive(Default)]
struct HandRows {
    handedness: Handedness,
    points: [Option<Landmark>; NUM_LANDMARKS],
}

#[derive(Default)]
struct FrameRows {
    t: f64,
    hands: BTreeMap<usize, HandRows>,
}

/// Carga una sesión grabada ordenada por `frame`.
/// Índices de frame ausentes se omiten y una mano incompleta se descarta.
pub fn load_frames_from_csv(path: impl AsRef<Path>) -> Result<Vec<PoseFrame>> {
    let path = path.as_ref();
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("No se pudo abrir el CSV {:?}", path))?;

    let mut frames: BTreeMap<usize, FrameRows> = BTreeMap::new();

    for (row_idx, result) in reader.deserialize::<LandmarkRow>().enumerate() {
        let row = result.with_context(|| format!("Fila {} inválida en {:?}", row_idx + 1, path))?;
        let entry = frames.entry(row.frame).or_default();
        entry.t = row.t;

        let Some(hand) = row.hand else {
            continue;
        };
        let landmark = row
            .landmark
            .with_context(|| format!("Falta landmark en fila {}", row_idx + 1))?;
        if landmark >= NUM_LANDMARKS {
            bail!("Landmark {} fuera de rango (fila {})", landmark, row_idx + 1);
        }
        let (x, y) = match (row.x, row.y) {
            (Some(x), Some(y)) => (x, y),
            _ => bail!("Faltan coordenadas en fila {}", row_idx + 1),
        };

        let hand_rows = entry.hands.entry(hand).or_default();
        if let Some(handedness) = row.handedness {
            hand_rows.handedness = handedness;
        }
        hand_rows.points[landmark] = Some(Landmark {
            x,
            y,
            z: row.z.unwrap_or(0.0),
        });
    }

    ensure!(!frames.is_empty(), "El CSV {:?} no contiene datos", path);

    let mut out = Vec::with_capacity(frames.len());
    for (_, rows) in frames {
        let hands = rows
            .hands
            .into_values()
            .filter_map(|h| {
                let points: Option<Vec<Landmark>> = h.points.iter().copied().collect();
                HandObservation::from_points(&points?, h.handedness)
            })
            .collect();
        out.push(PoseFrame::new(rows.t, hands));
    }
    Ok(out)
}

/// Escribe frames en el mismo formato que lee `load_frames_from_csv`
pub fn write_frames_to_csv(path: impl AsRef<Path>, frames: &[PoseFrame]) -> Result<()> {
    let path = path.as_ref();
    let mut writer = WriterBuilder::new()
        .from_path(path)
        .with_context(|| format!("No se pudo crear el CSV {:?}", path))?;

    for (frame_idx, frame) in frames.iter().enumerate() {
        if frame.hands.is_empty() {
            writer.serialize(LandmarkRow {
                frame: frame_idx,
                t: frame.t,
                hand: None,
                handedness: None,
                landmark: None,
                x: None,
                y: None,
                z: None,
            })?;
            continue;
        }
        for (hand_idx, hand) in frame.hands.iter().enumerate() {
            for (lm_idx, lm) in hand.landmarks.iter().enumerate() {
                writer.serialize(LandmarkRow {
                    frame: frame_idx,
                    t: frame.t,
                    hand: Some(hand_idx),
                    handedness: Some(hand.handedness),
                    landmark: Some(lm_idx),
                    x: Some(lm.x),
                    y: Some(lm.y),
                    z: Some(lm.z),
                })?;
            }
        }
    }
    writer.flush()?;
    Ok(())
}
