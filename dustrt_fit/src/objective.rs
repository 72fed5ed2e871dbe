//! Objective evaluation: comparing simulated frames against reference
//! images.
//!
//! For each frame the per-component luminosity scale factors are free
//! parameters of the comparison; they are optimized by non-negative
//! least squares before the masked chi-squared is accumulated.

use dustrt::error::{Error, Result};
use dustrt::fits::Image;
use ndarray::Array2;
use std::path::{Path, PathBuf};

/// The reference frames a fit is evaluated against.
pub struct Objective {
    references: Vec<Array2<f64>>,
}

impl Objective {
    /// Loads the reference frames from FITS files, in wavelength order.
    ///
    /// # Errors
    ///
    /// Returns a resource error when a file cannot be read.
    pub fn load(paths: &[PathBuf]) -> Result<Self> {
        let mut references = Vec::with_capacity(paths.len());
        for path in paths {
            log::info!("Reading reference frame {}...", path.display());
            references.push(Image::read(path)?.data);
        }
        if references.is_empty() {
            return Err(Error::Config(
                "the objective needs at least one reference frame".to_owned(),
            ));
        }
        Ok(Self { references })
    }

    /// Constructs the objective from in-memory reference frames.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when no frame is given.
    pub fn from_frames(references: Vec<Array2<f64>>) -> Result<Self> {
        if references.is_empty() {
            return Err(Error::Config(
                "the objective needs at least one reference frame".to_owned(),
            ));
        }
        Ok(Self { references })
    }

    /// Returns the number of reference frames.
    #[must_use]
    pub fn nframes(&self) -> usize {
        self.references.len()
    }

    /// Evaluates one simulated run: for every frame, the per-component
    /// scale factors minimizing the squared residual are determined and
    /// the relative chi-squared values are summed over the frames.
    ///
    /// # Errors
    ///
    /// Fatal when the frame count or a frame shape does not match the
    /// references.
    pub fn evaluate(&self, simulated: &[Vec<Array2<f64>>]) -> Result<f64> {
        if simulated.len() != self.references.len() {
            return Err(Error::fatal(
                "the simulation produced a different number of frames than the references",
            ));
        }
        let mut total = 0.0;
        for (reference, components) in self.references.iter().zip(simulated) {
            total += frame_chi_squared(reference, components)?;
        }
        Ok(total)
    }

    /// Reads the `total` channel frames written by a performed run for
    /// the given instrument and evaluates them against the references.
    ///
    /// # Errors
    ///
    /// Fatal on missing output files or mismatched shapes.
    pub fn evaluate_run(
        &self,
        output_path: &Path,
        prefix: &str,
        instrument: &str,
        ncomponents: usize,
    ) -> Result<f64> {
        let mut simulated = Vec::with_capacity(self.references.len());
        for ell in 0..self.references.len() {
            let mut components = Vec::with_capacity(ncomponents.max(1));
            if ncomponents > 1 {
                for component in 0..ncomponents {
                    let path = output_path
                        .join(format!("{prefix}_{instrument}_stellar_{component}_{ell}.fits"));
                    components.push(Image::read(&path)?.data);
                }
            } else {
                let path = output_path.join(format!("{prefix}_{instrument}_total_{ell}.fits"));
                components.push(Image::read(&path)?.data);
            }
            simulated.push(components);
        }
        self.evaluate(&simulated)
    }
}

// Chi-squared of one frame: the non-negative component scales are
// solved from the normal equations with an active-set sweep, then the
// residual is normalized by the reference power. Pixels that are not
// finite in the reference are masked out.
fn frame_chi_squared(reference: &Array2<f64>, components: &[Vec2d]) -> Result<f64> {
    if components.is_empty() {
        return Err(Error::fatal("a frame comparison needs simulated frames"));
    }
    for component in components {
        if component.dim() != reference.dim() {
            return Err(Error::fatal(
                "simulated and reference frames have different shapes",
            ));
        }
    }

    let scales = solve_scales(reference, components);

    let mut residual = 0.0;
    let mut power = 0.0;
    for (index, &target) in reference.indexed_iter() {
        if !target.is_finite() {
            continue;
        }
        let model: f64 = components
            .iter()
            .zip(&scales)
            .map(|(component, scale)| scale * component[index])
            .sum();
        residual += (target - model) * (target - model);
        power += target * target;
    }
    if power <= 0.0 {
        return Err(Error::fatal("the reference frame carries no signal"));
    }
    Ok(residual / power)
}

type Vec2d = Array2<f64>;

// Solves min ||reference - sum_k a_k component_k||^2 with a_k >= 0 by
// iteratively dropping negative solutions of the normal equations.
fn solve_scales(reference: &Array2<f64>, components: &[Vec2d]) -> Vec<f64> {
    let k = components.len();
    let mut active: Vec<bool> = vec![true; k];

    loop {
        // accumulate the normal equations over the active components
        let indices: Vec<usize> = (0..k).filter(|&i| active[i]).collect();
        if indices.is_empty() {
            return vec![0.0; k];
        }
        let n = indices.len();
        let mut matrix = vec![vec![0.0; n]; n];
        let mut rhs = vec![0.0; n];
        for (index, &target) in reference.indexed_iter() {
            if !target.is_finite() {
                continue;
            }
            for (row, &i) in indices.iter().enumerate() {
                let ci = components[i][index];
                rhs[row] += ci * target;
                for (col, &j) in indices.iter().enumerate() {
                    matrix[row][col] += ci * components[j][index];
                }
            }
        }

        let Some(solution) = solve_linear(&mut matrix, &mut rhs) else {
            return vec![0.0; k];
        };

        // drop the most negative scale and retry
        let mut worst: Option<(usize, f64)> = None;
        for (row, &value) in solution.iter().enumerate() {
            if value < 0.0 && worst.is_none_or(|(_, v)| value < v) {
                worst = Some((row, value));
            }
        }
        match worst {
            Some((row, _)) => active[indices[row]] = false,
            None => {
                let mut scales = vec![0.0; k];
                for (row, &i) in indices.iter().enumerate() {
                    scales[i] = solution[row];
                }
                return scales;
            }
        }
    }
}

// Gaussian elimination with partial pivoting; None for a singular
// system.
fn solve_linear(matrix: &mut [Vec<f64>], rhs: &mut [f64]) -> Option<Vec<f64>> {
    let n = rhs.len();
    for column in 0..n {
        let pivot = (column..n)
            .max_by(|&a, &b| {
                matrix[a][column]
                    .abs()
                    .partial_cmp(&matrix[b][column].abs())
                    .expect("finite matrix entries")
            })
            .expect("non-empty system");
        if matrix[pivot][column].abs() < 1e-30 {
            return None;
        }
        matrix.swap(column, pivot);
        rhs.swap(column, pivot);
        for row in column + 1..n {
            let factor = matrix[row][column] / matrix[column][column];
            for col in column..n {
                matrix[row][col] -= factor * matrix[column][col];
            }
            rhs[row] -= factor * rhs[column];
        }
    }
    let mut solution = vec![0.0; n];
    for row in (0..n).rev() {
        let mut value = rhs[row];
        for col in row + 1..n {
            value -= matrix[row][col] * solution[col];
        }
        solution[row] = value / matrix[row][row];
    }
    Some(solution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;
    use ndarray::arr2;

    #[test]
    fn identical_frames_score_zero() {
        let reference = arr2(&[[1.0, 2.0], [3.0, 4.0]]);
        let objective = Objective::from_frames(vec![reference.clone()]).unwrap();
        let score = objective.evaluate(&[vec![reference]]).unwrap();
        assert_approx_eq!(f64, score, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn scale_factors_are_free_parameters() {
        // a frame off by a constant factor still matches perfectly
        let reference = arr2(&[[1.0, 2.0], [3.0, 4.0]]);
        let scaled = reference.mapv(|value| 0.25 * value);
        let objective = Objective::from_frames(vec![reference]).unwrap();
        let score = objective.evaluate(&[vec![scaled]]).unwrap();
        assert_approx_eq!(f64, score, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn two_components_combine_linearly() {
        let a = arr2(&[[1.0, 0.0], [0.0, 1.0]]);
        let b = arr2(&[[0.0, 1.0], [1.0, 0.0]]);
        let reference = arr2(&[[2.0, 3.0], [3.0, 2.0]]);
        let objective = Objective::from_frames(vec![reference]).unwrap();
        let score = objective.evaluate(&[vec![a, b]]).unwrap();
        assert_approx_eq!(f64, score, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn negative_scales_are_clamped_out() {
        // the only way to match would be a negative scale; the solver
        // must drop the component instead
        let reference = arr2(&[[1.0, 1.0], [1.0, 1.0]]);
        let anti = reference.mapv(|value| -value);
        let scales = solve_scales(&reference, &[anti]);
        assert_eq!(scales, vec![0.0]);
    }

    #[test]
    fn non_finite_reference_pixels_are_masked() {
        let reference = arr2(&[[1.0, f64::NAN], [3.0, 4.0]]);
        let simulated = arr2(&[[1.0, 99.0], [3.0, 4.0]]);
        let objective = Objective::from_frames(vec![reference]).unwrap();
        let score = objective.evaluate(&[vec![simulated]]).unwrap();
        assert_approx_eq!(f64, score, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn mismatched_shapes_are_fatal() {
        let reference = arr2(&[[1.0, 2.0]]);
        let other = arr2(&[[1.0], [2.0]]);
        let objective = Objective::from_frames(vec![reference]).unwrap();
        assert!(objective.evaluate(&[vec![other]]).is_err());
    }

    #[test]
    fn worse_fits_score_higher() {
        let reference = arr2(&[[1.0, 2.0], [3.0, 4.0]]);
        let close = arr2(&[[1.1, 2.0], [3.0, 4.0]]);
        let far = arr2(&[[4.0, 1.0], [1.0, 4.0]]);
        let objective = Objective::from_frames(vec![reference]).unwrap();
        let close_score = objective.evaluate(&[vec![close]]).unwrap();
        let far_score = objective.evaluate(&[vec![far]]).unwrap();
        assert!(close_score < far_score);
    }
}
