use rand::Rng;
use rand_distr::{Distribution, Uniform};

use crate::{Result, StateError, shape::LayeredShape};

/// Fills `values` with samples of `U[-scale, scale]`.
///
/// # Arguments
/// * `values` - The slots to overwrite.
/// * `scale` - The half width of the distribution, zero fills with zeros.
/// * `rng` - A random number generator.
///
/// # Returns
/// An error if `scale` is negative or not finite.
pub fn uniform<R: Rng + ?Sized>(values: &mut [f64], scale: f64, rng: &mut R) -> Result<()> {
    let distribution = Uniform::new_inclusive(-scale, scale)
        .map_err(|e| StateError::Config(format!("invalid init scale {scale}: {e}")))?;

    values
        .iter_mut()
        .for_each(|v| *v = distribution.sample(rng));

    Ok(())
}

/// Seeds every weight matrix of a perceptron with Xavier uniform samples,
/// `U[-sqrt(6 / (fan_in + fan_out)), +sqrt(6 / (fan_in + fan_out))]`.
///
/// # Arguments
/// * `shape` - The layer sizes of the perceptron.
/// * `model` - The model slots, one row-major matrix per stage.
/// * `rng` - A random number generator.
pub fn xavier_uniform<R: Rng + ?Sized>(
    shape: &LayeredShape,
    model: &mut [f64],
    rng: &mut R,
) -> Result<()> {
    for ((fan_in, fan_out), range) in shape.layers() {
        let limit = (6. / (fan_in + fan_out) as f64).sqrt();
        uniform(&mut model[range], limit, rng)?;
    }

    Ok(())
}
