#![allow(dead_code)]

use candle_core::{Result, Tensor};
use rand::RngCore;

/// Parameters of the count observation model produced by a decoder stage.
pub struct CountModelParams {
    /// Per-gene expression frequencies on the simplex (n x d)
    pub scale_nd: Tensor,
    /// Per-cell dispersion, present only for decoders built with a
    /// gene-cell dispersion head (strictly positive)
    pub dispersion_nd: Option<Tensor>,
    /// Expected counts `scale * library_size` (n x d)
    pub rate_nd: Tensor,
    /// Zero-inflation gate logit (n x d)
    pub dropout_nd: Tensor,
}

/// A posterior stage that produces latent samples together with the exact
/// log-density of each sample under the approximate posterior.
pub trait PosteriorEncoderModuleT {
    /// # Arguments
    /// * `x_nd` - input data (n x d)
    /// * `cat_n` - optional categorical covariate index (n x 1)
    /// * `n_samples` - Monte-Carlo sample count
    /// * `rng` - random source for the reparameterized draw
    /// * `train` - whether to use dropout/batchnorm or not
    ///
    /// # Returns `(z, log_qz)`
    /// * `z` - latent samples, (n x k) or (s x n x k) when `n_samples > 1`
    /// * `log_qz` - exact posterior log-density per sample, (n) or (s x n)
    fn forward_t(
        &self,
        x_nd: &Tensor,
        cat_n: Option<&Tensor>,
        n_samples: usize,
        rng: &mut dyn RngCore,
        train: bool,
    ) -> Result<(Tensor, Tensor)>;

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;
}

/// A nuisance-variable stage producing a diagonal Gaussian over a low
/// dimensional quantity (here, the scalar log-library-size). The caller
/// draws samples via `mean + sqrt(var) * eps`.
pub trait NuisanceEncoderModuleT {
    /// # Returns `(mean, var)` with `var > 0`
    fn forward_t(
        &self,
        x_nd: &Tensor,
        cat_n: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, Tensor)>;

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;
}

/// A decoder stage mapping latent state, log-library-size, and covariates to
/// count observation-model parameters.
pub trait CountDecoderModuleT {
    /// * `z` - latent state, (n x k) or (s x n x k)
    /// * `log_library` - log library size, (n x 1) or (s x n x 1)
    /// * `cat_n` - optional categorical covariate index (n x 1)
    fn forward_t(
        &self,
        z: &Tensor,
        log_library: &Tensor,
        cat_n: Option<&Tensor>,
        train: bool,
    ) -> Result<CountModelParams>;

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;
}
