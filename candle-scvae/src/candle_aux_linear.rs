#![allow(dead_code)]

use candle_core::{Result, Tensor};
use candle_nn::Module;

//////////////////////////////////////////////
// Linear module with a fixed binary mask   //
// (MADE-style autoregressive connectivity) //
//////////////////////////////////////////////

#[derive(Clone, Debug)]
pub struct MaskedLinear {
    weight: Tensor, // out x in
    bias: Option<Tensor>,
    mask: Tensor, // out x in, constant
}

impl MaskedLinear {
    pub fn new(weight: Tensor, bias: Option<Tensor>, mask: Tensor) -> Self {
        Self { weight, bias, mask }
    }

    pub fn masked_weight(&self) -> Result<Tensor> {
        self.weight.mul(&self.mask)
    }
}

impl Module for MaskedLinear {
    fn forward(&self, h_nk: &Tensor) -> Result<Tensor> {
        let w = self.masked_weight()?;
        let w_t = match *h_nk.dims() {
            [b1, b2, _, _] => w.broadcast_left((b1, b2))?.t()?,
            [bsize, _, _] => w.broadcast_left(bsize)?.t()?,
            _ => w.t()?,
        };
        let out = h_nk.matmul(&w_t)?;
        match &self.bias {
            None => Ok(out),
            Some(bias) => out.broadcast_add(bias),
        }
    }
}

/// Degrees over latent dimensions: inputs get `1..=n_latent`, hidden units
/// cycle over `1..=max(n_latent - 1, 1)` so every hidden unit can reach at
/// least one input and no output short-circuits its own input.
fn made_input_degrees(n_latent: usize) -> Vec<usize> {
    (1..=n_latent).collect()
}

fn made_hidden_degrees(n_latent: usize, n_hidden: usize) -> Vec<usize> {
    let max_deg = n_latent.saturating_sub(1).max(1);
    (0..n_hidden).map(|j| 1 + (j % max_deg)).collect()
}

fn mask_tensor(
    rows: &[usize],
    cols: &[usize],
    strict: bool,
    vb: &candle_nn::VarBuilder,
) -> Result<Tensor> {
    let mut data = Vec::with_capacity(rows.len() * cols.len());
    for &r in rows {
        for &c in cols {
            let connected = if strict { r > c } else { r >= c };
            data.push(if connected { 1f32 } else { 0f32 });
        }
    }
    Tensor::from_vec(data, (rows.len(), cols.len()), vb.device())?.to_dtype(vb.dtype())
}

/// Masked linear from latent inputs to hidden units: unit `j` sees input `i`
/// iff `deg(j) >= deg(i)`.
pub fn made_hidden_linear(
    n_latent: usize,
    n_hidden: usize,
    vb: candle_nn::VarBuilder,
) -> Result<MaskedLinear> {
    let init_ws = candle_nn::init::DEFAULT_KAIMING_NORMAL;
    let ws = vb.get_with_hints((n_hidden, n_latent), "weight", init_ws)?;
    let bs = vb.get_with_hints(n_hidden, "bias", candle_nn::init::ZERO)?;
    let mask = mask_tensor(
        &made_hidden_degrees(n_latent, n_hidden),
        &made_input_degrees(n_latent),
        false,
        &vb,
    )?;
    Ok(MaskedLinear::new(ws, Some(bs), mask))
}

/// Masked linear from hidden units back to latent outputs: output `i` sees
/// hidden unit `j` iff `deg(i) > deg(j)`, so output `i` depends only on
/// inputs strictly below `i`.
pub fn made_output_linear(
    n_hidden: usize,
    n_latent: usize,
    bias_init: f64,
    vb: candle_nn::VarBuilder,
) -> Result<MaskedLinear> {
    let init_ws = candle_nn::init::DEFAULT_KAIMING_NORMAL;
    let ws = vb.get_with_hints((n_latent, n_hidden), "weight", init_ws)?;
    let bs = vb.get_with_hints(n_latent, "bias", candle_nn::Init::Const(bias_init))?;
    let mask = mask_tensor(
        &made_input_degrees(n_latent),
        &made_hidden_degrees(n_latent, n_hidden),
        true,
        &vb,
    )?;
    Ok(MaskedLinear::new(ws, Some(bs), mask))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};

    /// Perturbing input dimension `i` must not move any output `<= i` of the
    /// composed hidden -> output masked pair.
    #[test]
    fn masked_pair_is_strictly_autoregressive() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);

        let n_latent = 4;
        let n_hidden = 9;
        let lin_in = made_hidden_linear(n_latent, n_hidden, vb.pp("in"))?;
        let lin_out = made_output_linear(n_hidden, n_latent, 0.0, vb.pp("out"))?;

        let z = Tensor::from_vec(vec![0.3f32, -0.1, 0.7, 0.2], (1, n_latent), &Device::Cpu)?;
        let base: Vec<f32> = lin_out
            .forward(&lin_in.forward(&z)?.relu()?)?
            .flatten_all()?
            .to_vec1()?;

        for i in 0..n_latent {
            let mut bumped = z.flatten_all()?.to_vec1::<f32>()?;
            bumped[i] += 1.0;
            let z_bumped = Tensor::from_vec(bumped, (1, n_latent), &Device::Cpu)?;
            let out: Vec<f32> = lin_out
                .forward(&lin_in.forward(&z_bumped)?.relu()?)?
                .flatten_all()?
                .to_vec1()?;
            for (j, (a, b)) in base.iter().zip(out.iter()).enumerate() {
                if j <= i {
                    assert!(
                        (a - b).abs() < 1e-6,
                        "output {} leaked from input {}",
                        j,
                        i
                    );
                }
            }
        }
        Ok(())
    }
}
