use anyhow::{Result, ensure};
use ndarray::{Array2, ArrayView2, Axis, Zip};

// Probabilities are clipped to `[CLIP_MIN, 1.0]` before taking the logarithm.
pub const CLIP_MIN: f32 = 1e-10;

// Categorical cross-entropy: summed over classes, averaged over the batch.
pub fn cross_entropy(probabilities: ArrayView2<f32>, targets: ArrayView2<f32>) -> Result<f32> {
    ensure!(
        probabilities.dim() == targets.dim(),
        "probabilities {:?} and targets {:?} differ in shape",
        probabilities.dim(),
        targets.dim()
    );
    ensure!(probabilities.nrows() > 0, "cross-entropy of an empty batch");

    let total = Zip::from(&probabilities)
        .and(&targets)
        .fold(0.0f64, |total, &y, &t| {
            total - f64::from(t) * f64::from(y.clamp(CLIP_MIN, 1.0)).ln()
        });
    Ok((total / probabilities.nrows() as f64) as f32)
}

// Gradient of the mean cross-entropy with respect to the softmax logits, for rows of
// probabilities produced by softmax. The clip has no slope outside its range, so classes whose
// probability fell below CLIP_MIN contribute nothing.
pub fn cross_entropy_logit_grad(
    probabilities: ArrayView2<f32>,
    targets: ArrayView2<f32>,
) -> Array2<f32> {
    let batch = probabilities.nrows() as f32;

    // dL/dy
    let mut grad = Zip::from(&probabilities)
        .and(&targets)
        .map_collect(|&y, &t| if y < CLIP_MIN { 0.0 } else { -t / (batch * y) });

    // Through softmax: dL/dz_j = y_j * (g_j - sum_i g_i * y_i)
    let weighted = (&grad * &probabilities).sum_axis(Axis(1)).insert_axis(Axis(1));
    grad -= &weighted;
    grad *= &probabilities;
    grad
}
