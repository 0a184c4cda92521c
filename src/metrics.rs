use anyhow::{Result, ensure};
use itertools::Itertools;
use ndarray::{ArrayView1, ArrayView2};

// Index of the largest value in a row.
fn argmax(row: ArrayView1<f32>) -> Option<usize> {
    row.iter().position_max_by(|a, b| a.total_cmp(b))
}

// Fraction of rows whose most probable class is the target's hot class.
pub fn accuracy(probabilities: ArrayView2<f32>, targets: ArrayView2<f32>) -> Result<f32> {
    ensure!(
        probabilities.dim() == targets.dim(),
        "probabilities {:?} and targets {:?} differ in shape",
        probabilities.dim(),
        targets.dim()
    );
    ensure!(probabilities.nrows() > 0, "accuracy of an empty batch");

    let correct = probabilities
        .rows()
        .into_iter()
        .zip(targets.rows())
        .filter(|(prediction, target)| argmax(prediction.view()) == argmax(target.view()))
        .count();

    Ok(correct as f32 / probabilities.nrows() as f32)
}
