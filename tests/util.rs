#![allow(dead_code)]
use std::path::{Path, PathBuf};

use boostscope::DataMatrix;
use rand::{rngs::StdRng, Rng, SeedableRng};

pub const NUM_FEATURES: usize = 3;

/// `label = 3 * x0 + x1^2` with a little noise. `x2` is pure noise
pub fn synthetic_rows(num_rows: usize, seed: u64) -> (Vec<Vec<f64>>, Vec<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut rows = Vec::with_capacity(num_rows);
    let mut labels = Vec::with_capacity(num_rows);
    for _ in 0..num_rows {
        let row: Vec<f64> = (0..NUM_FEATURES).map(|_| rng.gen_range(-2.0..2.0)).collect();
        labels.push(3.0 * row[0] + row[1] * row[1] + rng.gen_range(-0.05..0.05));
        rows.push(row);
    }
    (rows, labels)
}

pub fn synthetic_matrix(num_rows: usize, seed: u64) -> DataMatrix {
    let (rows, labels) = synthetic_rows(num_rows, seed);
    DataMatrix::from_dense(&rows, labels)
}

/// the same data as [`synthetic_rows`], as 1-based LIBSVM lines
pub fn synthetic_libsvm_lines(num_rows: usize, seed: u64) -> Vec<String> {
    let (rows, labels) = synthetic_rows(num_rows, seed);
    rows.iter()
        .zip(labels.iter())
        .map(|(row, label)| {
            let features: Vec<String> = row
                .iter()
                .enumerate()
                .map(|(idx, value)| format!("{}:{}", idx + 1, value))
                .collect();
            format!("{} {}", label, features.join(" "))
        })
        .collect()
}

/// where the hook writes the json event file of `step`
pub fn json_event_file(out_dir: &Path, step: usize) -> PathBuf {
    out_dir
        .join("events")
        .join(format!("{:012}", step))
        .join(format!("{:012}_worker_0.json", step))
}

/// the steps with an event file under `out_dir`, in order
pub fn saved_event_steps(out_dir: &Path) -> Vec<usize> {
    let mut steps: Vec<usize> = std::fs::read_dir(out_dir.join("events"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().parse().unwrap())
        .collect();
    steps.sort_unstable();
    steps
}
