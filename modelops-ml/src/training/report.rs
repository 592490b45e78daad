//! Confusion-matrix heat-map rendered to SVG.

use crate::error::MlError;
use handlebars::Handlebars;
use modelops_core::persistence::atomic_write;
use serde::Serialize;
use serde_json::json;
use std::path::Path;

const CELL: usize = 90;
const MARGIN_LEFT: usize = 110;
const MARGIN_TOP: usize = 50;

const TEMPLATE: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="{{width}}" height="{{height}}" viewBox="0 0 {{width}} {{height}}" font-family="sans-serif">
  <rect width="100%" height="100%" fill="#ffffff"/>
  <text x="{{center_x}}" y="30" text-anchor="middle" font-size="16">{{title}}</text>
{{#each cells}}
  <rect x="{{x}}" y="{{y}}" width="{{size}}" height="{{size}}" fill="{{fill}}" stroke="#ffffff"/>
  <text x="{{text_x}}" y="{{text_y}}" text-anchor="middle" dominant-baseline="middle" font-size="18" fill="{{ink}}">{{count}}</text>
{{/each}}
{{#each x_ticks}}
  <text x="{{pos}}" y="{{../tick_y}}" text-anchor="middle" font-size="13">{{label}}</text>
{{/each}}
{{#each y_ticks}}
  <text x="{{../tick_x}}" y="{{pos}}" text-anchor="end" dominant-baseline="middle" font-size="13">{{label}}</text>
{{/each}}
  <text x="{{center_x}}" y="{{x_title_y}}" text-anchor="middle" font-size="14">Predicted label</text>
  <text x="30" y="{{center_y}}" text-anchor="middle" font-size="14" transform="rotate(-90 30 {{center_y}})">True label</text>
</svg>
"##;

#[derive(Serialize)]
struct Cell {
    x: usize,
    y: usize,
    size: usize,
    text_x: usize,
    text_y: usize,
    fill: String,
    ink: &'static str,
    count: usize,
}

#[derive(Serialize)]
struct Tick {
    pos: usize,
    label: String,
}

/// Interpolate from near-white to dark blue.
fn shade(fraction: f64) -> String {
    let (lo, hi) = ((247.0, 251.0, 255.0), (8.0, 48.0, 107.0));
    let mix = |a: f64, b: f64| (a + (b - a) * fraction.clamp(0.0, 1.0)).round() as u8;
    format!(
        "#{:02x}{:02x}{:02x}",
        mix(lo.0, hi.0),
        mix(lo.1, hi.1),
        mix(lo.2, hi.2)
    )
}

/// Render `matrix` (rows = true labels, columns = predicted) as an SVG document.
pub fn render_confusion_matrix(
    matrix: &[Vec<usize>],
    labels: &[i64],
    title: &str,
) -> Result<String, MlError> {
    let n = labels.len();
    if matrix.len() != n || matrix.iter().any(|row| row.len() != n) {
        return Err(MlError::invalid_input(format!(
            "confusion matrix must be {n}x{n} to match the labels"
        )));
    }

    let max = matrix.iter().flatten().copied().max().unwrap_or(0).max(1);
    let mut cells = Vec::with_capacity(n * n);
    for (i, row) in matrix.iter().enumerate() {
        for (j, &count) in row.iter().enumerate() {
            let fraction = count as f64 / max as f64;
            let x = MARGIN_LEFT + j * CELL;
            let y = MARGIN_TOP + i * CELL;
            cells.push(Cell {
                x,
                y,
                size: CELL,
                text_x: x + CELL / 2,
                text_y: y + CELL / 2,
                fill: shade(fraction),
                ink: if fraction > 0.5 { "#ffffff" } else { "#000000" },
                count,
            });
        }
    }
    let ticks = |offset: usize| -> Vec<Tick> {
        labels
            .iter()
            .enumerate()
            .map(|(k, label)| Tick {
                pos: offset + k * CELL + CELL / 2,
                label: label.to_string(),
            })
            .collect()
    };

    let grid = n * CELL;
    let data = json!({
        "title": title,
        "width": MARGIN_LEFT + grid + 30,
        "height": MARGIN_TOP + grid + 70,
        "center_x": MARGIN_LEFT + grid / 2,
        "center_y": MARGIN_TOP + grid / 2,
        "tick_x": MARGIN_LEFT - 10,
        "tick_y": MARGIN_TOP + grid + 20,
        "x_title_y": MARGIN_TOP + grid + 50,
        "cells": cells,
        "x_ticks": ticks(MARGIN_LEFT),
        "y_ticks": ticks(MARGIN_TOP),
    });

    let handlebars = Handlebars::new();
    Ok(handlebars.render_template(TEMPLATE, &data)?)
}

/// Render the report and write it to `path`.
pub fn write_confusion_matrix(
    path: &Path,
    matrix: &[Vec<usize>],
    labels: &[i64],
) -> Result<(), MlError> {
    let svg = render_confusion_matrix(matrix, labels, "Confusion matrix")?;
    atomic_write(path, svg.as_bytes())?;
    Ok(())
}
