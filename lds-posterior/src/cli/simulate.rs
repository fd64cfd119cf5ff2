use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use clap::Args;
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::info;
use matrix_util::tensor_util::vectors_to_tensor;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::encoder::FixedNoiseEncoder;
use crate::lds::LinearGaussianLds;
use crate::posterior::{BlockCholeskyConfig, RngNoise, SmoothingConfig, SmoothingPosterior};

#[derive(Args, Debug)]
pub struct SimulateArgs {
    #[arg(short, long, default_value = "2", help = "Latent (and observation) dimension")]
    pub dim: usize,

    #[arg(short, long, default_value = "50", help = "Time steps per trial")]
    pub trial_len: usize,

    #[arg(short, long, default_value = "8", help = "Number of trials")]
    pub batch_size: usize,

    #[arg(long, default_value = "0.9")]
    pub decay: f64,

    #[arg(long, default_value = "0.3", help = "Innovation noise std")]
    pub process_noise: f64,

    #[arg(long, default_value = "1.0", help = "Initial state std")]
    pub initial_noise: f64,

    #[arg(long, default_value = "0.5", help = "Observation noise std")]
    pub obs_noise: f64,

    #[arg(long, default_value = "100", help = "Monte Carlo posterior draws")]
    pub num_draws: usize,

    #[arg(long, default_value = "1e-12")]
    pub pivot_tolerance: f64,

    #[arg(long, help = "Innovation noise penalty for the regularized entropy")]
    pub noise_penalty: Option<f64>,

    #[arg(long, default_value = "42")]
    pub seed: u64,

    #[arg(short, long, help = "Log progress at info level")]
    pub verbose: bool,
}

fn rmse(x: &Tensor, y: &Tensor) -> Result<f64> {
    Ok(x.sub(y)?.sqr()?.mean_all()?.to_scalar::<f64>()?.sqrt())
}

fn batch_mean(x: &Tensor) -> Result<f64> {
    Ok(x.mean_all()?.to_scalar::<f64>()?)
}

pub fn run(args: &SimulateArgs) -> Result<()> {
    if args.obs_noise <= 0.0 {
        anyhow::bail!("observation noise must be positive");
    }

    if args.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let device = Device::Cpu;
    let mut rng = StdRng::seed_from_u64(args.seed);

    let lds = LinearGaussianLds::isotropic(
        args.dim,
        args.decay,
        args.process_noise,
        args.initial_noise,
    )?;

    let mut latent = Vec::with_capacity(args.batch_size);
    let mut observed = Vec::with_capacity(args.batch_size);
    let mut prior_llik = 0.0;
    for _ in 0..args.batch_size {
        let xs = lds.sample_latent(args.trial_len, &mut rng);
        observed.push(lds.sample_observations(&xs, args.obs_noise, &mut rng));
        prior_llik += lds.log_density(&xs)?;
        latent.push(xs);
    }
    info!(
        "Simulated {} trial(s) of {} step(s), dim {}",
        args.batch_size, args.trial_len, args.dim
    );

    let x = vectors_to_tensor(&latent, &device)?;
    let y = vectors_to_tensor(&observed, &device)?;

    let dynamics = lds.dynamics_params(DType::F64, &device)?;
    let encoder = FixedNoiseEncoder::new(args.dim, args.obs_noise)?;
    let config = SmoothingConfig {
        cholesky: BlockCholeskyConfig::new(args.pivot_tolerance),
        noise_penalty: args.noise_penalty,
    };

    let post = SmoothingPosterior::from_encoder(&encoder, &y, &dynamics, &config)?;

    info!("RMSE (observed vs latent): {:.4}", rmse(&y, &x)?);
    info!("RMSE (smoothed vs latent): {:.4}", rmse(post.mean(), &x)?);
    info!("log|M| (avg): {:.4}", batch_mean(post.log_determinant())?);
    info!("entropy (avg): {:.4}", batch_mean(&post.entropy()?)?);
    info!(
        "regularized entropy rate (avg): {:.4}",
        batch_mean(&post.regularized_entropy()?)?
    );
    info!(
        "log q(latent) (avg): {:.4}, log p(latent) (avg): {:.4}",
        batch_mean(&post.log_density(&x)?)?,
        prior_llik / args.batch_size as f64
    );

    let pb = ProgressBar::new(args.num_draws as u64);
    if args.verbose {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    let mut noise = RngNoise(&mut rng);
    let mut sq_dev = 0f64;
    let mut sq_err = 0f64;
    for _ in 0..args.num_draws {
        let draw = post.sample(&mut noise)?;
        sq_dev += draw.sub(post.mean())?.sqr()?.mean_all()?.to_scalar::<f64>()?;
        sq_err += draw.sub(&x)?.sqr()?.mean_all()?.to_scalar::<f64>()?;
        pb.inc(1);
    }
    pb.finish_and_clear();

    if args.num_draws > 0 {
        let nd = args.num_draws as f64;
        info!("posterior spread (rms): {:.4}", (sq_dev / nd).sqrt());
        info!("RMSE (draws vs latent): {:.4}", (sq_err / nd).sqrt());
    }

    Ok(())
}
