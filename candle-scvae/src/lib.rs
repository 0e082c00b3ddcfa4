pub mod candle_aux_layers;
pub mod candle_aux_linear;
pub mod candle_aux_module;
pub mod candle_decoder_counts;
pub mod candle_dispersion;
pub mod candle_encoder_gaussian;
pub mod candle_encoder_iaf;
pub mod candle_loss_functions;
pub mod candle_model_iavae;
pub mod candle_model_traits;

pub use candle_core;
pub use candle_nn;
