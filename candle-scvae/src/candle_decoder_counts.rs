#![allow(dead_code)]

use crate::candle_aux_layers::{stack_relu_linear, StackLayers};
use crate::candle_aux_module::one_hot_nk;
use crate::candle_model_traits::{CountDecoderModuleT, CountModelParams};
use candle_core::{bail, D, Result, Tensor};
use candle_nn::{ops, Linear, Module, ModuleT, VarBuilder};

/////////////////////////////////////////////////////////
// Count observation-model decoder: latent + library   //
// + covariates -> (scale, rate, dropout logit, and    //
// optionally a per-cell dispersion)                   //
/////////////////////////////////////////////////////////

pub struct CountDecoder {
    n_features: usize,
    n_latent: usize,
    n_categories: usize,
    px: StackLayers<Linear>,
    scale_out: Linear,
    dropout_out: Linear,
    r_out: Option<Linear>,
}

impl CountDecoderModuleT for CountDecoder {
    fn forward_t(
        &self,
        z: &Tensor,
        log_library: &Tensor,
        cat_n: Option<&Tensor>,
        train: bool,
    ) -> Result<CountModelParams> {
        let zin = self.preprocess_latent(z, cat_n)?;
        let h = self.px.forward_t(&zin, train)?;

        let scale_nd = ops::softmax(&self.scale_out.forward(&h)?, D::Minus1)?;
        let rate_nd = log_library.exp()?.broadcast_mul(&scale_nd)?;
        let dropout_nd = self.dropout_out.forward(&h)?;

        // gene-cell head emits a positive dispersion directly
        let dispersion_nd = match &self.r_out {
            Some(r_out) => Some(r_out.forward(&h)?.clamp(-15., 15.)?.exp()?),
            None => None,
        };

        Ok(CountModelParams {
            scale_nd,
            dispersion_nd,
            rate_nd,
            dropout_nd,
        })
    }

    fn dim_obs(&self) -> usize {
        self.n_features
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}

impl CountDecoder {
    fn preprocess_latent(&self, z: &Tensor, cat_n: Option<&Tensor>) -> Result<Tensor> {
        match (self.n_categories, cat_n) {
            (0, _) => Ok(z.clone()),
            (k, Some(index_n)) => {
                let onehot_nk = one_hot_nk(index_n, k)?;
                let onehot_nk = match *z.dims() {
                    [s, n, _] => onehot_nk.unsqueeze(0)?.expand((s, n, k))?,
                    _ => onehot_nk,
                };
                Tensor::cat(&[z, &onehot_nk], z.rank() - 1)
            }
            (_, None) => bail!("decoder built with covariates but no index given"),
        }
    }

    /// Will create a new count decoder module
    ///
    /// # Arguments
    /// * `args` - decoder arguments; `per_cell_dispersion` adds the
    ///   gene-cell dispersion head
    /// * `vb` - variable builder
    pub fn new(args: CountDecoderArgs, vb: VarBuilder) -> Result<Self> {
        let in_dim = args.n_latent + args.n_categories;
        let px = stack_relu_linear(in_dim, args.n_hidden, args.n_layers, 0., vb.pp("nn.dec"))?;

        let scale_out = candle_nn::linear(args.n_hidden, args.n_features, vb.pp("nn.dec.scale"))?;
        let dropout_out =
            candle_nn::linear(args.n_hidden, args.n_features, vb.pp("nn.dec.dropout"))?;
        let r_out = if args.per_cell_dispersion {
            Some(candle_nn::linear(
                args.n_hidden,
                args.n_features,
                vb.pp("nn.dec.r"),
            )?)
        } else {
            None
        };

        Ok(Self {
            n_features: args.n_features,
            n_latent: args.n_latent,
            n_categories: args.n_categories,
            px,
            scale_out,
            dropout_out,
            r_out,
        })
    }
}

pub struct CountDecoderArgs {
    pub n_latent: usize,
    pub n_features: usize,
    pub n_categories: usize,
    pub n_hidden: usize,
    pub n_layers: usize,
    pub per_cell_dispersion: bool,
}
