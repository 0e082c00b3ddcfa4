#![allow(dead_code)]

use crate::candle_aux_module::randn_tensor;
use crate::candle_decoder_counts::{CountDecoder, CountDecoderArgs};
use crate::candle_dispersion::{DispersionMode, GeneDispersion};
use crate::candle_encoder_gaussian::{GaussianEncoder, GaussianEncoderArgs};
use crate::candle_encoder_iaf::{IafEncoder, IafEncoderArgs};
use crate::candle_loss_functions::{gaussian_log_prob, log_nb_positive, log_zinb_positive};
use crate::candle_model_traits::*;
use candle_core::{bail, D, Result, Tensor};
use candle_nn::VarBuilder;
use log::info;
use rand::RngCore;

/// Constructor surface of the flow-posterior count model.
#[derive(Clone, Debug)]
pub struct IaVaeConfig {
    /// number of genes (required)
    pub n_input: usize,
    /// number of batch categories; 0 deactivates batch conditioning
    pub n_batch: usize,
    /// number of label categories; 0 deactivates label-wise dispersion
    pub n_labels: usize,
    pub n_hidden: usize,
    pub n_latent: usize,
    pub n_layers: usize,
    /// number of autoregressive flow steps; 0 gives a plain Gaussian posterior
    pub n_transforms: usize,
    pub dropout_rate: f32,
    pub dispersion: DispersionMode,
    /// log1p-transform the input of both encoders
    pub log_variational: bool,
    /// one of `zinb`, `nb`; anything else fails at the loss entry point
    pub reconstruction_loss: String,
}

impl IaVaeConfig {
    pub fn new(n_input: usize) -> Self {
        Self {
            n_input,
            n_batch: 0,
            n_labels: 0,
            n_hidden: 128,
            n_latent: 10,
            n_layers: 1,
            n_transforms: 3,
            dropout_rate: 0.05,
            dispersion: DispersionMode::Gene,
            log_variational: true,
            reconstruction_loss: "zinb".to_string(),
        }
    }
}

/// Everything the forward evaluation produces, for external inspection.
pub struct InferenceOutputs {
    pub px_scale: Tensor,
    pub px_r: Tensor,
    pub px_rate: Tensor,
    pub px_dropout: Tensor,
    pub z: Tensor,
    pub ql_m: Tensor,
    pub ql_v: Tensor,
    pub library: Tensor,
}

/// Variational count model with an IAF posterior over the cell state and a
/// Gaussian posterior over the log-library-size. Learned parameters are
/// owned by the surrounding `VarMap`; forward calls never mutate them.
pub struct IaVae {
    config: IaVaeConfig,
    px_r: GeneDispersion,
    z_encoder: IafEncoder,
    l_encoder: GaussianEncoder,
    decoder: CountDecoder,
}

/// Fail fast when the latent and library carry different sample counts or
/// batch sizes; decoding such a pair would silently broadcast garbage.
pub fn check_latent_library_consistency(z: &Tensor, library: &Tensor) -> Result<()> {
    if z.rank() != library.rank() {
        bail!(
            "latent/library rank mismatch: {} vs {}",
            z.rank(),
            library.rank()
        );
    }
    if z.dim(0)? != library.dim(0)? {
        bail!(
            "different sample count or batch size between latent ({}) and library ({})",
            z.dim(0)?,
            library.dim(0)?
        );
    }
    if z.rank() == 3 && z.dim(1)? != library.dim(1)? {
        bail!(
            "different batch size between latent ({}) and library ({})",
            z.dim(1)?,
            library.dim(1)?
        );
    }
    Ok(())
}

impl IaVae {
    /// Will create the model's modules and its dispersion parameter under
    /// the given variable builder.
    pub fn new(config: IaVaeConfig, vb: VarBuilder) -> Result<Self> {
        if config.n_input == 0 {
            bail!("n_input (number of genes) must be positive");
        }

        info!(
            "IaVae: {} genes, {} latent, {} flow transforms, dispersion {:?}",
            config.n_input, config.n_latent, config.n_transforms, config.dispersion
        );

        let px_r = GeneDispersion::new(
            config.dispersion,
            config.n_input,
            config.n_batch,
            config.n_labels,
            vb.pp("px_r"),
        )?;

        let z_encoder = IafEncoder::new(
            IafEncoderArgs {
                n_features: config.n_input,
                n_latent: config.n_latent,
                n_categories: 0,
                n_hidden: config.n_hidden,
                n_layers: config.n_layers,
                n_transforms: config.n_transforms,
                dropout_rate: config.dropout_rate,
            },
            vb.pp("z.enc"),
        )?;

        // l encoder goes from n_input-dimensional data to 1-d library size
        let l_encoder = GaussianEncoder::new(
            GaussianEncoderArgs {
                n_features: config.n_input,
                n_output: 1,
                n_categories: 0,
                n_hidden: config.n_hidden,
                n_layers: 1,
                dropout_rate: config.dropout_rate,
            },
            vb.pp("l.enc"),
        )?;

        let decoder = CountDecoder::new(
            CountDecoderArgs {
                n_latent: config.n_latent,
                n_features: config.n_input,
                n_categories: config.n_batch,
                n_hidden: config.n_hidden,
                n_layers: config.n_layers,
                per_cell_dispersion: config.dispersion == DispersionMode::GeneCell,
            },
            vb.pp("dec"),
        )?;

        Ok(Self {
            config,
            px_r,
            z_encoder,
            l_encoder,
            decoder,
        })
    }

    pub fn config(&self) -> &IaVaeConfig {
        &self.config
    }

    fn transform_input(&self, x_nd: &Tensor) -> Result<Tensor> {
        if self.config.log_variational {
            (x_nd + 1.)?.log()
        } else {
            Ok(x_nd.clone())
        }
    }

    fn reconstruction_log_likelihood(
        &self,
        x_nd: &Tensor,
        px: &CountModelParams,
        px_r: &Tensor,
    ) -> Result<Tensor> {
        match self.config.reconstruction_loss.as_str() {
            "zinb" => log_zinb_positive(x_nd, &px.rate_nd, px_r, &px.dropout_nd),
            "nb" => log_nb_positive(x_nd, &px.rate_nd, px_r),
            other => bail!("unimplemented reconstruction loss: {}", other),
        }
    }

    /// Deterministic forward evaluation for diagnostics and generation.
    ///
    /// With `n_samples == 1` the library is the l-encoder's posterior mean,
    /// so repeated calls agree. With `n_samples > 1` the posterior
    /// parameters are replicated across the sample dimension and the
    /// library is redrawn on every call; this asymmetry mirrors the
    /// training-time estimator and is intentional.
    pub fn inference(
        &self,
        x_nd: &Tensor,
        batch_index_n: Option<&Tensor>,
        y_n: Option<&Tensor>,
        n_samples: usize,
        rng: &mut dyn RngCore,
        train: bool,
    ) -> Result<InferenceOutputs> {
        let x_ = self.transform_input(x_nd)?;

        let (z, _log_qz) = self
            .z_encoder
            .forward_t(&x_, y_n, n_samples.max(1), rng, train)?;
        let (ql_m, ql_v) = self.l_encoder.forward_t(&x_, None, train)?;

        let (ql_m, ql_v, library) = if n_samples > 1 {
            let n = ql_m.dim(0)?;
            let ql_m = ql_m.unsqueeze(0)?.expand((n_samples, n, 1))?;
            let ql_v = ql_v.unsqueeze(0)?.expand((n_samples, n, 1))?;
            let eps = randn_tensor((n_samples, n, 1), ql_m.device(), rng)?;
            let library = ql_m.broadcast_add(&eps.broadcast_mul(&ql_v.sqrt()?)?)?;
            (ql_m, ql_v, library)
        } else {
            (ql_m.clone(), ql_v, ql_m)
        };

        check_latent_library_consistency(&z, &library)?;

        let px = self.decoder.forward_t(&z, &library, batch_index_n, train)?;
        let px_r = self
            .px_r
            .resolve(batch_index_n, y_n, px.dispersion_nd.as_ref())?;

        Ok(InferenceOutputs {
            px_scale: px.scale_nd,
            px_r,
            px_rate: px.rate_nd,
            px_dropout: px.dropout_nd,
            z,
            ql_m,
            ql_v,
            library,
        })
    }

    /// Importance ratio `log p(x, z, l) - log q(z, l | x)` per cell.
    ///
    /// * `local_l_mean_n1`, `local_l_var_n1` - parameters of the Gaussian
    ///   prior over the log-library-size (n x 1)
    /// * `return_mean` - negate and average over the sample dimension,
    ///   yielding the scalar loss to minimize; otherwise return the raw
    ///   ratio tensor
    pub fn ratio_loss(
        &self,
        x_nd: &Tensor,
        local_l_mean_n1: &Tensor,
        local_l_var_n1: &Tensor,
        batch_index_n: Option<&Tensor>,
        y_n: Option<&Tensor>,
        return_mean: bool,
        rng: &mut dyn RngCore,
        train: bool,
    ) -> Result<Tensor> {
        // reject unsupported observation models before any computation
        if !matches!(self.config.reconstruction_loss.as_str(), "zinb" | "nb") {
            bail!(
                "unimplemented reconstruction loss: {}",
                self.config.reconstruction_loss
            );
        }

        let x_ = self.transform_input(x_nd)?;

        // variational densities
        let (z, log_qz) = self.z_encoder.forward_t(&x_, y_n, 1, rng, train)?;
        let (ql_m, ql_v) = self.l_encoder.forward_t(&x_, None, train)?;
        let eps = randn_tensor(ql_m.dims(), ql_m.device(), rng)?;
        let library = ql_m.broadcast_add(&eps.broadcast_mul(&ql_v.sqrt()?)?)?;
        let log_ql = gaussian_log_prob(&library, &ql_m, &ql_v)?.sum(D::Minus1)?;

        // priors
        let log_pz =
            gaussian_log_prob(&z, &z.zeros_like()?, &z.ones_like()?)?.sum(D::Minus1)?;
        let log_pl =
            gaussian_log_prob(&library, local_l_mean_n1, local_l_var_n1)?.sum(D::Minus1)?;

        // reconstruction
        check_latent_library_consistency(&z, &library)?;
        let px = self.decoder.forward_t(&z, &library, batch_index_n, train)?;
        let px_r = self
            .px_r
            .resolve(batch_index_n, y_n, px.dispersion_nd.as_ref())?;
        let log_px = self.reconstruction_log_likelihood(x_nd, &px, &px_r)?;

        let ratio = ((((log_px + log_pz)? + log_pl)? - log_qz)? - log_ql)?;
        if return_mean {
            ratio.mean(0)?.neg()
        } else {
            Ok(ratio)
        }
    }
}
