#![allow(dead_code)]

use crate::candle_aux_layers::{stack_relu_linear, StackLayers};
use crate::candle_aux_module::one_hot_nk;
use crate::candle_model_traits::NuisanceEncoderModuleT;
use candle_core::{bail, Result, Tensor};
use candle_nn::{BatchNorm, Linear, Module, ModuleT, VarBuilder};

/// Diagonal-Gaussian encoder: input features (optionally concatenated with a
/// one-hot covariate) to `(mean, variance)` of a Gaussian over `n_output`
/// dimensions. Used as the log-library-size encoder.
pub struct GaussianEncoder {
    n_features: usize,
    n_output: usize,
    n_categories: usize,
    fc: StackLayers<Linear>,
    bn_z: BatchNorm,
    z_mean: Linear,
    z_lnvar: Linear,
}

impl NuisanceEncoderModuleT for GaussianEncoder {
    fn forward_t(
        &self,
        x_nd: &Tensor,
        cat_n: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, Tensor)> {
        let (mean_nk, lnvar_nk) = self.latent_gaussian_params(x_nd, cat_n, train)?;
        Ok((mean_nk, lnvar_nk.exp()?))
    }

    fn dim_obs(&self) -> usize {
        self.n_features
    }

    fn dim_latent(&self) -> usize {
        self.n_output
    }
}

impl GaussianEncoder {
    fn preprocess_input(&self, x_nd: &Tensor, cat_n: Option<&Tensor>) -> Result<Tensor> {
        debug_assert_eq!(x_nd.dims().len(), 2);
        match (self.n_categories, cat_n) {
            (0, _) => Ok(x_nd.clone()),
            (k, Some(index_n)) => {
                let onehot_nk = one_hot_nk(index_n, k)?;
                Tensor::cat(&[x_nd, &onehot_nk], 1)
            }
            (_, None) => bail!("encoder built with covariates but no index given"),
        }
    }

    ///
    /// Evaluate Gaussian parameters: mu and log_var
    /// * `z ~ (mu(x), exp(log_var(x)))`
    ///
    pub fn latent_gaussian_params(
        &self,
        x_nd: &Tensor,
        cat_n: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, Tensor)> {
        let min_lv = -8.; // stabilize log variance
        let max_lv = 8.; //

        let xx_nd = self.preprocess_input(x_nd, cat_n)?;
        let fc_nl = self.fc.forward_t(&xx_nd, train)?;
        let bn_nl = self.bn_z.forward_t(&fc_nl, train)?;
        let mean_nk = self.z_mean.forward(&bn_nl)?;
        let lnvar_nk = self.z_lnvar.forward(&bn_nl)?.clamp(min_lv, max_lv)?;
        Ok((mean_nk, lnvar_nk))
    }

    /// Will create a new Gaussian encoder module with these variables:
    ///
    /// * `nn.enc.fc.{}.weight` where {} is the layer index
    /// * `nn.enc.bn_z.{weight,bias}`
    /// * `nn.enc.z.mean.{weight,bias}`
    /// * `nn.enc.z.lnvar.{weight,bias}`
    pub fn new(args: GaussianEncoderArgs, vb: VarBuilder) -> Result<Self> {
        let bn_config = candle_nn::BatchNormConfig {
            eps: 1e-4,
            remove_mean: true,
            affine: true,
            momentum: 0.1,
        };

        let in_dim = args.n_features + args.n_categories;
        let fc = stack_relu_linear(
            in_dim,
            args.n_hidden,
            args.n_layers,
            args.dropout_rate,
            vb.pp("nn.enc"),
        )?;

        let bn_z = candle_nn::batch_norm(args.n_hidden, bn_config, vb.pp("nn.enc.bn_z"))?;

        let z_mean = candle_nn::linear(args.n_hidden, args.n_output, vb.pp("nn.enc.z.mean"))?;
        let z_lnvar = candle_nn::linear(args.n_hidden, args.n_output, vb.pp("nn.enc.z.lnvar"))?;

        Ok(Self {
            n_features: args.n_features,
            n_output: args.n_output,
            n_categories: args.n_categories,
            fc,
            bn_z,
            z_mean,
            z_lnvar,
        })
    }
}

pub struct GaussianEncoderArgs {
    pub n_features: usize,
    pub n_output: usize,
    pub n_categories: usize,
    pub n_hidden: usize,
    pub n_layers: usize,
    pub dropout_rate: f32,
}
