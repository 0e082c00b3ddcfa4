#![allow(dead_code)]

use crate::candle_aux_module::one_hot_nk;
use candle_core::{bail, Result, Tensor};
use std::str::FromStr;

/// Recognized dispersion parameterizations of the count model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispersionMode {
    Gene,
    GeneBatch,
    GeneLabel,
    GeneCell,
}

impl FromStr for DispersionMode {
    type Err = candle_core::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gene" => Ok(Self::Gene),
            "gene-batch" => Ok(Self::GeneBatch),
            "gene-label" => Ok(Self::GeneLabel),
            "gene-cell" => Ok(Self::GeneCell),
            _ => bail!("unrecognized dispersion mode: {}", s),
        }
    }
}

/// The learned dispersion parameter, tagged by how it is shared across
/// cells. Learned variants hold the raw (log-scale) parameter; `resolve`
/// exponentiates so the value fed to the likelihood is strictly positive.
pub enum GeneDispersion {
    /// One raw value per gene (d)
    PerGene(Tensor),
    /// One raw value per gene and batch category (d x n_batch)
    PerGeneBatch(Tensor),
    /// One raw value per gene and label category (d x n_labels)
    PerGeneLabel(Tensor),
    /// Emitted per cell by the decoder, already positive
    PerCell,
}

impl GeneDispersion {
    /// Create the learned parameter for `mode` under the variable builder.
    pub fn new(
        mode: DispersionMode,
        n_genes: usize,
        n_batch: usize,
        n_labels: usize,
        vb: candle_nn::VarBuilder,
    ) -> Result<Self> {
        let init = candle_nn::Init::Randn {
            mean: 0.,
            stdev: 1.,
        };
        match mode {
            DispersionMode::Gene => Ok(Self::PerGene(vb.get_with_hints(n_genes, "px_r", init)?)),
            DispersionMode::GeneBatch => {
                if n_batch == 0 {
                    bail!("gene-batch dispersion requires n_batch > 0");
                }
                Ok(Self::PerGeneBatch(vb.get_with_hints(
                    (n_genes, n_batch),
                    "px_r",
                    init,
                )?))
            }
            DispersionMode::GeneLabel => {
                if n_labels == 0 {
                    bail!("gene-label dispersion requires n_labels > 0");
                }
                Ok(Self::PerGeneLabel(vb.get_with_hints(
                    (n_genes, n_labels),
                    "px_r",
                    init,
                )?))
            }
            DispersionMode::GeneCell => Ok(Self::PerCell),
        }
    }

    /// Resolve the dispersion fed to the likelihood.
    ///
    /// * `batch_index_n` - batch category index (n x 1), required for
    ///   `PerGeneBatch`
    /// * `label_n` - label category index (n x 1), required for
    ///   `PerGeneLabel`
    /// * `decoder_r` - per-cell dispersion from the decoder, required for
    ///   `PerCell`
    ///
    /// # Returns a strictly positive tensor, (d) or (n x d)
    pub fn resolve(
        &self,
        batch_index_n: Option<&Tensor>,
        label_n: Option<&Tensor>,
        decoder_r: Option<&Tensor>,
    ) -> Result<Tensor> {
        match self {
            Self::PerGene(raw_d) => raw_d.exp(),
            Self::PerGeneBatch(raw_dk) => {
                let Some(index_n) = batch_index_n else {
                    bail!("batch index required for gene-batch dispersion");
                };
                let n_batch = raw_dk.dim(1)?;
                one_hot_nk(index_n, n_batch)?.matmul(&raw_dk.t()?)?.exp()
            }
            Self::PerGeneLabel(raw_dk) => {
                let Some(index_n) = label_n else {
                    bail!("label required for gene-label dispersion");
                };
                let n_labels = raw_dk.dim(1)?;
                one_hot_nk(index_n, n_labels)?.matmul(&raw_dk.t()?)?.exp()
            }
            Self::PerCell => match decoder_r {
                Some(r_nd) => Ok(r_nd.clone()),
                None => bail!("decoder did not emit per-cell dispersion"),
            },
        }
    }
}
