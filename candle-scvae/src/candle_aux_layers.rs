#![allow(dead_code)]

use crate::candle_aux_linear::*;
use crate::candle_aux_module::log_sigmoid;
use candle_core::{D, Result, Tensor};
use candle_nn::{Activation, Dropout, Linear, Module, ModuleT};

/// build a stack of alternating `M` and activation layers with optional
/// dropout after each activation
pub struct StackLayers<M>
where
    M: Module,
{
    module_layers: Vec<M>,
    activation_layers: Vec<Option<Activation>>,
    dropout: Option<Dropout>,
}

impl<M> ModuleT for StackLayers<M>
where
    M: Module,
{
    fn forward_t(&self, input: &Tensor, train: bool) -> Result<Tensor> {
        let mut x = input.clone();
        for (module, activation) in self.module_layers.iter().zip(self.activation_layers.iter()) {
            x = module.forward(&x)?;
            if let Some(activation) = activation {
                x = activation.forward(&x)?;
            }
            if let Some(dropout) = &self.dropout {
                x = dropout.forward(&x, train)?;
            }
        }
        Ok(x)
    }
}

impl<M> StackLayers<M>
where
    M: Module,
{
    pub fn new(dropout_rate: f32) -> Self {
        let dropout = if dropout_rate > 0. {
            Some(Dropout::new(dropout_rate))
        } else {
            None
        };
        Self {
            module_layers: Vec::new(),
            activation_layers: Vec::new(),
            dropout,
        }
    }

    /// Appends a layer after all the current layers.
    pub fn push_with_act(&mut self, layer: M, activation: Activation) {
        self.module_layers.push(layer);
        self.activation_layers.push(Some(activation));
    }

    pub fn push(&mut self, layer: M) {
        self.module_layers.push(layer);
        self.activation_layers.push(None);
    }
}

/// `n_layers` ReLU blocks from `in_dim` to `hidden_dim`
pub fn stack_relu_linear(
    in_dim: usize,
    hidden_dim: usize,
    n_layers: usize,
    dropout_rate: f32,
    vb: candle_nn::VarBuilder,
) -> Result<StackLayers<Linear>> {
    let mut fc = StackLayers::<Linear>::new(dropout_rate);
    let mut prev_dim = in_dim;
    for j in 0..n_layers.max(1) {
        let _name = format!("fc.{}", j);
        fc.push_with_act(
            candle_nn::linear(prev_dim, hidden_dim, vb.pp(_name))?,
            candle_nn::Activation::Relu,
        );
        prev_dim = hidden_dim;
    }
    Ok(fc)
}

//////////////////////////////////////////////////////
// Inverse autoregressive flow: an ordered chain of //
// sigmoid-gated affine transforms with triangular  //
// Jacobians                                        //
//////////////////////////////////////////////////////

/// One autoregressive affine step `z' = σ(s) ⊙ z + (1 - σ(s)) ⊙ m` where
/// `(m, s)` come from a masked network so that dimension `i` depends only on
/// `z[..i]` and the context vector. The Jacobian is triangular with diagonal
/// `σ(s)`, so `log|det| = Σ log σ(s)`.
pub struct IafTransform {
    lin_z: MaskedLinear,
    lin_ctx: Linear,
    mean_out: MaskedLinear,
    gate_out: MaskedLinear,
}

impl IafTransform {
    /// # Returns `(z_next, log_abs_det_jacobian)`
    pub fn forward(&self, z: &Tensor, ctx: &Tensor) -> Result<(Tensor, Tensor)> {
        let h = self
            .lin_z
            .forward(z)?
            .broadcast_add(&self.lin_ctx.forward(ctx)?)?
            .relu()?;
        let m = self.mean_out.forward(&h)?;
        let s = self.gate_out.forward(&h)?;

        let gate = candle_nn::ops::sigmoid(&s)?;
        let z_next = (gate.mul(z)? + gate.affine(-1., 1.)?.mul(&m)?)?;
        let log_det = log_sigmoid(&s)?.sum(D::Minus1)?;
        Ok((z_next, log_det))
    }
}

/// A chain of `IafTransform` steps. Consecutive steps see the latent in
/// reversed order so every dimension eventually conditions on every other;
/// the reversal is a permutation with unit Jacobian.
pub struct IafLayers {
    transforms: Vec<IafTransform>,
    rev_l: Option<Tensor>,
}

impl IafLayers {
    pub fn num_transforms(&self) -> usize {
        self.transforms.len()
    }

    /// Fold the transform chain over a base sample.
    ///
    /// * `z0` - base sample, shape `[n, l]` or `[s, n, l]`
    /// * `ctx` - context vector from the base encoder, shape `[n, c]`
    ///
    /// # Returns `(z, log_det_n)` where `log_det_n` is the accumulated
    /// log-absolute-Jacobian-determinant over all steps (zero when the chain
    /// is empty).
    pub fn flow(&self, z0: &Tensor, ctx: &Tensor) -> Result<(Tensor, Tensor)> {
        let mut z = z0.clone();
        let mut log_det = z0.sum(D::Minus1)?.zeros_like()?;
        for (k, transform) in self.transforms.iter().enumerate() {
            if k > 0 {
                if let Some(rev_l) = &self.rev_l {
                    z = z.index_select(rev_l, z.rank() - 1)?;
                }
            }
            let (z_next, ld) = transform.forward(&z, ctx)?;
            z = z_next;
            log_det = (log_det + ld)?;
        }
        Ok((z, log_det))
    }
}

/// Will create an IAF chain with these variables per step `k`:
///
/// * `t.{k}.z.{weight,bias}` (masked)
/// * `t.{k}.ctx.{weight,bias}`
/// * `t.{k}.mean.{weight,bias}` (masked)
/// * `t.{k}.gate.{weight,bias}` (masked; bias starts positive so each step
///   begins near the identity)
pub fn iaf_stack_linear(
    n_latent: usize,
    n_ctx: usize,
    n_hidden: usize,
    n_transforms: usize,
    vb: candle_nn::VarBuilder,
) -> Result<IafLayers> {
    let mut transforms = Vec::with_capacity(n_transforms);
    for k in 0..n_transforms {
        let vk = vb.pp(format!("t.{}", k));
        transforms.push(IafTransform {
            lin_z: made_hidden_linear(n_latent, n_hidden, vk.pp("z"))?,
            lin_ctx: candle_nn::linear(n_ctx, n_hidden, vk.pp("ctx"))?,
            mean_out: made_output_linear(n_hidden, n_latent, 0.0, vk.pp("mean"))?,
            gate_out: made_output_linear(n_hidden, n_latent, 2.0, vk.pp("gate"))?,
        });
    }

    let rev_l = if n_transforms > 1 {
        let idx = (0..n_latent as u32).rev().collect::<Vec<_>>();
        Some(Tensor::from_vec(idx, (n_latent,), vb.device())?)
    } else {
        None
    };

    Ok(IafLayers { transforms, rev_l })
}
