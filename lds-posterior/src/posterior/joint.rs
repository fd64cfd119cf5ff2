use candle_core::Tensor;

use super::error::{check_dims, Result};
use super::sampler::NoiseSource;
use super::smoothing::SmoothingPosterior;

/// Two independent smoothing posteriors over the same trials,
/// presented as one distribution on the concatenated state
/// [goal, control]
///
/// Samples concatenate along the state axis; densities and
/// entropies add.
pub struct JointPosterior {
    goal: SmoothingPosterior,
    control: SmoothingPosterior,
}

impl JointPosterior {
    pub fn new(goal: SmoothingPosterior, control: SmoothingPosterior) -> Result<Self> {
        check_dims(
            "control posterior trials",
            &[goal.batch_size(), goal.trial_len()],
            &[control.batch_size(), control.trial_len()],
        )?;
        Ok(Self { goal, control })
    }

    pub fn goal(&self) -> &SmoothingPosterior {
        &self.goal
    }

    pub fn control(&self) -> &SmoothingPosterior {
        &self.control
    }

    pub fn dim(&self) -> usize {
        self.goal.dim() + self.control.dim()
    }

    /// Concatenated posterior mean: shape (B, T, n_goal + n_control)
    pub fn mean(&self) -> Result<Tensor> {
        Ok(Tensor::cat(&[self.goal.mean(), self.control.mean()], 2)?)
    }

    /// One joint draw: shape (B, T, n_goal + n_control)
    pub fn sample<N: NoiseSource + ?Sized>(&self, rng: &mut N) -> Result<Tensor> {
        let g = self.goal.sample(&mut *rng)?;
        let c = self.control.sample(rng)?;
        Ok(Tensor::cat(&[g, c], 2)?)
    }

    /// `num_samples` joint draws: shape (S, B, T, n_goal + n_control)
    pub fn sample_n<N: NoiseSource + ?Sized>(&self, num_samples: usize, rng: &mut N) -> Result<Tensor> {
        let g = self.goal.sample_n(num_samples, &mut *rng)?;
        let c = self.control.sample_n(num_samples, rng)?;
        Ok(Tensor::cat(&[g, c], 3)?)
    }

    /// log q(x) = log q_goal(x_goal) + log q_control(x_control)
    ///
    /// # Arguments
    /// * `x` - shape (B, T, n_goal + n_control)
    pub fn log_density(&self, x: &Tensor) -> Result<Tensor> {
        check_dims(
            "joint trajectory",
            &[self.goal.batch_size(), self.goal.trial_len(), self.dim()],
            x.dims(),
        )?;
        let ng = self.goal.dim();
        let x_goal = x.narrow(2, 0, ng)?;
        let x_control = x.narrow(2, ng, self.control.dim())?;
        Ok((self.goal.log_density(&x_goal)? + self.control.log_density(&x_control)?)?)
    }

    /// Shape (B,)
    pub fn entropy(&self) -> Result<Tensor> {
        Ok((self.goal.entropy()? + self.control.entropy()?)?)
    }

    /// Shape (B,)
    pub fn regularized_entropy(&self) -> Result<Tensor> {
        Ok((self.goal.regularized_entropy()? + self.control.regularized_entropy()?)?)
    }
}
