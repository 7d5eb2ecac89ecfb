//! Offline threshold calibration
//!
//! Fits a one-dimensional Gaussian mixture to DPF values collected from
//! earlier runs and derives note-on / note-off thresholds from the decision
//! boundaries around the component that models "no change".

use crate::config::{CalibrationConfig, SegmentationConfig};
use crate::error::{PianoError, Result as PianoResult};
use crate::history;
use ndarray::Array2;
use rand::prelude::*;
use rand::rngs::StdRng;
use std::collections::BTreeMap;
use std::path::Path;

const MAX_FREQUENCY: f64 = 1000.0;
const NEWTON_ITERATIONS: usize = 100;
const BISECTION_ITERATIONS: usize = 200;
const ROOT_TOLERANCE: f64 = 1e-9;

/// One mixture component, in DPF units once returned by [`Analyser::fit`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianComponent {
    pub mean: f64,
    pub variance: f64,
    pub weight: f64,
}

impl GaussianComponent {
    fn log_pdf(&self, x: f64) -> f64 {
        let diff = x - self.mean;
        -0.5 * (2.0 * std::f64::consts::PI * self.variance).ln() - 0.5 * diff * diff / self.variance
    }
}

/// 1-D Gaussian mixture fitted with EM from a seeded k-means++ start.
struct GaussianMixtureModel {
    components: Vec<GaussianComponent>,
    max_iterations: usize,
    tolerance: f64,
    reg_covar: f64,
}

impl GaussianMixtureModel {
    fn new(n_components: usize, config: &CalibrationConfig) -> Self {
        Self {
            components: vec![
                GaussianComponent {
                    mean: 0.0,
                    variance: 1.0,
                    weight: 1.0 / n_components as f64,
                };
                n_components
            ],
            max_iterations: config.max_iterations,
            tolerance: config.tolerance,
            reg_covar: config.reg_covar,
        }
    }

    fn fit(&mut self, data: &[f64], rng: &mut StdRng) {
        self.initialize_components(data, rng);

        let mut prev_log_likelihood = f64::NEG_INFINITY;
        for iteration in 0..self.max_iterations {
            let (responsibilities, log_likelihood) = self.e_step(data);
            self.m_step(data, &responsibilities);

            let mean_log_likelihood = log_likelihood / data.len() as f64;
            if (mean_log_likelihood - prev_log_likelihood).abs() < self.tolerance {
                log::debug!("  GMM converged after {} iterations", iteration + 1);
                break;
            }
            prev_log_likelihood = mean_log_likelihood;
        }
    }

    /// k-means++ seeding; each step keeps the best of a few sampled candidates.
    fn initialize_components(&mut self, data: &[f64], rng: &mut StdRng) {
        let k = self.components.len();
        let trials = 2 + (k as f64).ln() as usize;
        let mut centers: Vec<f64> = vec![data[rng.gen_range(0..data.len())]];
        let mut distances: Vec<f64> = data.iter().map(|&x| (x - centers[0]).powi(2)).collect();

        while centers.len() < k {
            let total: f64 = distances.iter().sum();
            let mut best: Option<(f64, Vec<f64>, f64)> = None;
            for _ in 0..trials {
                let candidate = if total > 0.0 {
                    let mut r = rng.gen::<f64>() * total;
                    let mut idx = data.len() - 1;
                    for (j, &d) in distances.iter().enumerate() {
                        r -= d;
                        if r <= 0.0 {
                            idx = j;
                            break;
                        }
                    }
                    data[idx]
                } else {
                    data[rng.gen_range(0..data.len())]
                };
                let updated: Vec<f64> = data
                    .iter()
                    .zip(distances.iter())
                    .map(|(&x, &d)| d.min((x - candidate).powi(2)))
                    .collect();
                let potential: f64 = updated.iter().sum();
                if best.as_ref().map_or(true, |(p, _, _)| potential < *p) {
                    best = Some((potential, updated, candidate));
                }
            }
            if let Some((_, updated, candidate)) = best {
                centers.push(candidate);
                distances = updated;
            }
        }

        centers.sort_by(|a, b| a.total_cmp(b));
        for (component, center) in self.components.iter_mut().zip(centers) {
            component.mean = center;
            component.variance = 1.0 + self.reg_covar;
            component.weight = 1.0 / k as f64;
        }
    }

    /// Responsibilities and total log-likelihood, via log-sum-exp.
    fn e_step(&self, data: &[f64]) -> (Array2<f64>, f64) {
        let n_components = self.components.len();
        let mut responsibilities = Array2::<f64>::zeros((data.len(), n_components));
        let mut log_likelihood = 0.0;

        for (i, &x) in data.iter().enumerate() {
            let mut max_log = f64::NEG_INFINITY;
            for (j, component) in self.components.iter().enumerate() {
                let log_prob = component.weight.ln() + component.log_pdf(x);
                responsibilities[[i, j]] = log_prob;
                max_log = max_log.max(log_prob);
            }
            let mut total = 0.0;
            for j in 0..n_components {
                let p = (responsibilities[[i, j]] - max_log).exp();
                responsibilities[[i, j]] = p;
                total += p;
            }
            for j in 0..n_components {
                responsibilities[[i, j]] /= total;
            }
            log_likelihood += max_log + total.ln();
        }

        (responsibilities, log_likelihood)
    }

    fn m_step(&mut self, data: &[f64], responsibilities: &Array2<f64>) {
        let n = data.len() as f64;
        for (j, component) in self.components.iter_mut().enumerate() {
            let column = responsibilities.column(j);
            let weight_sum: f64 = column.sum() + 10.0 * f64::EPSILON;
            let mean = column.iter().zip(data).map(|(r, x)| r * x).sum::<f64>() / weight_sum;
            let variance = column
                .iter()
                .zip(data)
                .map(|(r, x)| r * (x - mean).powi(2))
                .sum::<f64>()
                / weight_sum;

            component.mean = mean;
            component.variance = variance + self.reg_covar;
            component.weight = weight_sum / n;
        }
    }
}

/// Note thresholds in DPF units: `note_on` is positive, `note_off` negative.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub note_on: f64,
    pub note_off: f64,
}

impl Thresholds {
    /// Segmentation settings using these thresholds.
    pub fn to_segmentation(&self) -> SegmentationConfig {
        SegmentationConfig {
            on_threshold: self.note_on.round() as i32,
            off_threshold: (-self.note_off).round() as i32,
        }
    }
}

/// Decision boundaries between fitted components sorted by mean.
pub struct BoundaryFinder {
    components: Vec<GaussianComponent>,
}

impl BoundaryFinder {
    pub fn new(mut components: Vec<GaussianComponent>) -> Self {
        components.sort_by(|a, b| a.mean.total_cmp(&b.mean));
        Self { components }
    }

    pub fn components(&self) -> &[GaussianComponent] {
        &self.components
    }

    /// Index of the component whose mean is closest to zero.
    pub fn neutral_index(&self) -> PianoResult<usize> {
        self.components
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.mean.abs().total_cmp(&b.mean.abs()))
            .map(|(i, _)| i)
            .ok_or_else(|| PianoError::CalibrationError("no mixture components".to_string()))
    }

    /// Signed log-odds of `a` over `b` at `x`; zero on the boundary.
    fn log_odds(x: f64, a: &GaussianComponent, b: &GaussianComponent) -> f64 {
        let lhs = (a.weight / b.weight).ln() + 0.5 * (b.variance.ln() - a.variance.ln());
        let rhs = (x - b.mean).powi(2) / (2.0 * b.variance) - (x - a.mean).powi(2) / (2.0 * a.variance);
        lhs - rhs
    }

    fn log_odds_slope(x: f64, a: &GaussianComponent, b: &GaussianComponent) -> f64 {
        (x - a.mean) / a.variance - (x - b.mean) / b.variance
    }

    /// Point where `a` and `b` are equally likely, searched from zero.
    pub fn boundary(a: &GaussianComponent, b: &GaussianComponent) -> PianoResult<f64> {
        let mut x = 0.0f64;
        for _ in 0..NEWTON_ITERATIONS {
            let f = Self::log_odds(x, a, b);
            if f.abs() < ROOT_TOLERANCE {
                return Ok(x);
            }
            let slope = Self::log_odds_slope(x, a, b);
            if slope == 0.0 || !slope.is_finite() {
                break;
            }
            let next = x - f / slope;
            if !next.is_finite() {
                break;
            }
            x = next;
        }
        if Self::log_odds(x, a, b).abs() < 1e-6 {
            return Ok(x);
        }

        let (mut lo, mut hi) = if a.mean < b.mean {
            (a.mean, b.mean)
        } else {
            (b.mean, a.mean)
        };
        let mut f_lo = Self::log_odds(lo, a, b);
        if f_lo.signum() == Self::log_odds(hi, a, b).signum() {
            return Err(PianoError::CalibrationError(format!(
                "no decision boundary between means {:.2} and {:.2}",
                a.mean, b.mean
            )));
        }
        for _ in 0..BISECTION_ITERATIONS {
            let mid = 0.5 * (lo + hi);
            let f_mid = Self::log_odds(mid, a, b);
            if f_mid.abs() < ROOT_TOLERANCE || (hi - lo) < ROOT_TOLERANCE {
                return Ok(mid);
            }
            if f_mid.signum() == f_lo.signum() {
                lo = mid;
                f_lo = f_mid;
            } else {
                hi = mid;
            }
        }
        Ok(0.5 * (lo + hi))
    }

    /// Largest boundary between the first component above neutral and every
    /// component below it.
    pub fn note_on_boundary(&self) -> PianoResult<f64> {
        let on_index = self.neutral_index()? + 1;
        let on = self.components.get(on_index).ok_or_else(|| {
            PianoError::CalibrationError("no component above the neutral one".to_string())
        })?;
        let mut best = f64::NEG_INFINITY;
        for other in &self.components[..on_index] {
            best = best.max(Self::boundary(other, on)?);
        }
        Ok(best)
    }

    /// Smallest boundary between the first component below neutral and every
    /// component above it.
    pub fn note_off_boundary(&self) -> PianoResult<f64> {
        let neutral = self.neutral_index()?;
        let off_index = neutral.checked_sub(1).ok_or_else(|| {
            PianoError::CalibrationError("no component below the neutral one".to_string())
        })?;
        let off = &self.components[off_index];
        let mut best = f64::INFINITY;
        for other in &self.components[off_index + 1..] {
            best = best.min(Self::boundary(other, off)?);
        }
        Ok(best)
    }

    pub fn thresholds(&self) -> PianoResult<Thresholds> {
        Ok(Thresholds {
            note_on: self.note_on_boundary()?,
            note_off: self.note_off_boundary()?,
        })
    }
}

/// Collects DPF values and fits the threshold model.
pub struct Analyser {
    config: CalibrationConfig,
    raw: Vec<i32>,
    data: Vec<f64>,
    components: Vec<GaussianComponent>,
}

impl Analyser {
    pub fn new(config: &CalibrationConfig) -> Self {
        Self {
            config: config.clone(),
            raw: Vec::new(),
            data: Vec::new(),
            components: Vec::new(),
        }
    }

    pub fn from_dpf(dpf: &[Vec<i32>], config: &CalibrationConfig) -> Self {
        let mut analyser = Self::new(config);
        analyser.add_dpf(dpf);
        analyser
    }

    /// Replace the collected values with every `.dpf.json` history in `dir`.
    pub fn load_history_dir(&mut self, dir: &Path) -> PianoResult<usize> {
        self.raw.clear();
        let histories = history::load_history_dir(dir)?;
        for data in &histories {
            self.raw.extend(data.dpf.iter().flatten().copied());
        }
        self.rebuild();
        log::info!(
            "Calibration: {} histories, {} DPF values, {} weighted samples",
            histories.len(),
            self.raw.len(),
            self.data.len()
        );
        Ok(histories.len())
    }

    pub fn add_dpf(&mut self, dpf: &[Vec<i32>]) {
        self.raw.extend(dpf.iter().flatten().copied());
        self.rebuild();
    }

    /// Weighted samples the mixture is fitted to.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Re-weight by frequency: a value seen `count` times contributes
    /// `max(round(100 - 1000 / count), 0)` samples, so rare values vanish and
    /// common ones saturate near 100.
    fn rebuild(&mut self) {
        self.components.clear();
        let mut counts: BTreeMap<i32, usize> = BTreeMap::new();
        for &v in &self.raw {
            *counts.entry(v).or_insert(0) += 1;
        }
        self.data = counts
            .into_iter()
            .flat_map(|(value, count)| {
                let weight = (-MAX_FREQUENCY / count as f64 + MAX_FREQUENCY / 10.0).round().max(0.0);
                std::iter::repeat(value as f64).take(weight as usize)
            })
            .collect();
    }

    /// Fit an `n_components` mixture on standardised samples and return the
    /// components in DPF units, sorted by mean.
    pub fn fit(&mut self, n_components: usize) -> PianoResult<&[GaussianComponent]> {
        if self.components.len() == n_components {
            return Ok(&self.components);
        }
        if n_components == 0 {
            return Err(PianoError::CalibrationError("zero mixture components requested".to_string()));
        }
        if self.data.len() < n_components {
            return Err(PianoError::InsufficientData(format!(
                "{} weighted samples for {} components",
                self.data.len(),
                n_components
            )));
        }

        let n = self.data.len() as f64;
        let center = self.data.iter().sum::<f64>() / n;
        let variance = self.data.iter().map(|x| (x - center).powi(2)).sum::<f64>() / n;
        let scale = if variance > 0.0 { variance.sqrt() } else { 1.0 };
        let scaled: Vec<f64> = self.data.iter().map(|x| (x - center) / scale).collect();

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut gmm = GaussianMixtureModel::new(n_components, &self.config);
        gmm.fit(&scaled, &mut rng);

        let mut components: Vec<GaussianComponent> = gmm
            .components
            .iter()
            .map(|c| GaussianComponent {
                mean: c.mean * scale + center,
                variance: c.variance * scale * scale,
                weight: c.weight,
            })
            .collect();
        components.sort_by(|a, b| a.mean.total_cmp(&b.mean));
        for (i, c) in components.iter().enumerate() {
            log::debug!(
                "  component {}: mean {:.2}, variance {:.2}, weight {:.3}",
                i,
                c.mean,
                c.variance,
                c.weight
            );
        }
        self.components = components;
        Ok(&self.components)
    }

    /// Note-on and note-off thresholds from the configured mixture size.
    pub fn find_note_thresholds(&mut self) -> PianoResult<Thresholds> {
        let n_components = self.config.n_components;
        let components = self.fit(n_components)?.to_vec();
        let thresholds = BoundaryFinder::new(components).thresholds()?;
        log::info!(
            "Calibrated thresholds: note on > {:.2}, note off < {:.2}",
            thresholds.note_on,
            thresholds.note_off
        );
        Ok(thresholds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(mean: f64, variance: f64, weight: f64) -> GaussianComponent {
        GaussianComponent {
            mean,
            variance,
            weight,
        }
    }

    #[test]
    fn equal_components_meet_halfway() {
        let a = component(0.0, 4.0, 0.5);
        let b = component(10.0, 4.0, 0.5);
        let x = BoundaryFinder::boundary(&a, &b).unwrap();
        assert!((x - 5.0).abs() < 1e-6);
    }

    #[test]
    fn neutral_is_closest_to_zero() {
        let finder = BoundaryFinder::new(vec![
            component(100.0, 10.0, 0.2),
            component(-3.0, 10.0, 0.6),
            component(-100.0, 10.0, 0.2),
        ]);
        assert_eq!(finder.neutral_index().unwrap(), 1);
        let thresholds = finder.thresholds().unwrap();
        assert!(thresholds.note_on > 0.0 && thresholds.note_on < 100.0);
        assert!(thresholds.note_off < 0.0 && thresholds.note_off > -100.0);
    }

    #[test]
    fn rare_values_are_dropped() {
        let mut dpf = vec![vec![7]; 10];
        dpf.extend(vec![vec![0]; 20]);
        let analyser = Analyser::from_dpf(&dpf, &CalibrationConfig::default());
        // 10 occurrences weigh round(100 - 100) = 0, 20 weigh 50
        assert_eq!(analyser.data().len(), 50);
        assert!(analyser.data().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn separated_clusters_give_thresholds_between_them() {
        let mut dpf = Vec::new();
        for center in [-145, 0, 145] {
            for offset in -5..=5 {
                dpf.extend(vec![vec![center + offset]; 50]);
            }
        }
        let config = CalibrationConfig {
            n_components: 3,
            ..CalibrationConfig::default()
        };
        let mut analyser = Analyser::from_dpf(&dpf, &config);
        let thresholds = analyser.find_note_thresholds().unwrap();
        assert!(thresholds.note_on > 20.0 && thresholds.note_on < 130.0);
        assert!(thresholds.note_off < -20.0 && thresholds.note_off > -130.0);

        let segmentation = thresholds.to_segmentation();
        assert!(segmentation.on_threshold > 0);
        assert!(segmentation.off_threshold > 0);
    }

    #[test]
    fn empty_data_is_insufficient() {
        let mut analyser = Analyser::new(&CalibrationConfig::default());
        assert!(matches!(
            analyser.find_note_thresholds(),
            Err(PianoError::InsufficientData(_))
        ));
    }
}
