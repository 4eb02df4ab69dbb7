//! Bidirectional LSTM sequence encoder.

use candle_core::{Device, Module, Tensor};
use candle_nn::VarBuilder;
use candle_nn::rnn::{LSTM, LSTMConfig, RNN};

/// One bidirectional layer: a forward LSTM and a backward LSTM that reads
/// the time-reversed sequence. Outputs are concatenated on the feature axis.
#[derive(Debug, Clone)]
pub struct BiLstmLayer {
    forward: LSTM,
    backward: LSTM,
}

impl BiLstmLayer {
    fn new(
        in_dim: usize,
        hidden: usize,
        layer_idx: usize,
        vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        let config = || LSTMConfig {
            layer_idx,
            ..Default::default()
        };
        let forward = candle_nn::rnn::lstm(in_dim, hidden, config(), vb.pp("forward"))?;
        let backward = candle_nn::rnn::lstm(in_dim, hidden, config(), vb.pp("backward"))?;
        Ok(Self { forward, backward })
    }
}

/// `xs`: (batch, timesteps, features) -> (batch, timesteps, 2 * hidden)
impl Module for BiLstmLayer {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let reverse = reverse_index(xs.dim(1)?, xs.device())?;

        let fwd = self.forward.states_to_tensor(&self.forward.seq(xs)?)?;

        let reversed = xs.index_select(&reverse, 1)?;
        let bwd = self
            .backward
            .states_to_tensor(&self.backward.seq(&reversed)?)?
            .index_select(&reverse, 1)?;

        Tensor::cat(&[fwd, bwd], 2)
    }
}

fn reverse_index(len: usize, device: &Device) -> candle_core::Result<Tensor> {
    let idx: Vec<u32> = (0..len as u32).rev().collect();
    Tensor::new(idx.as_slice(), device)
}

/// Stacked bidirectional LSTM.
#[derive(Debug, Clone)]
pub struct SequenceEncoder {
    layers: Vec<BiLstmLayer>,
}

impl SequenceEncoder {
    pub fn new(
        in_dim: usize,
        hidden: usize,
        num_layers: usize,
        vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        let mut layers = Vec::with_capacity(num_layers);
        let mut dim = in_dim;
        for layer_idx in 0..num_layers {
            layers.push(BiLstmLayer::new(dim, hidden, layer_idx, vb.clone())?);
            dim = 2 * hidden;
        }
        Ok(Self { layers })
    }
}

impl Module for SequenceEncoder {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let mut xs = xs.clone();
        for layer in &self.layers {
            xs = xs.apply(layer)?;
        }
        Ok(xs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{D, DType, IndexOp};
    use candle_nn::VarMap;

    #[test]
    fn output_is_bidirectional_width() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let encoder = SequenceEncoder::new(6, 4, 2, vb).unwrap();

        let xs = Tensor::randn(0f32, 1f32, (3, 5, 6), &Device::Cpu).unwrap();
        let ys = encoder.forward(&xs).unwrap();
        assert_eq!(ys.dims(), &[3, 5, 8]);
    }

    #[test]
    fn backward_half_sees_future_steps() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let layer = BiLstmLayer::new(2, 3, 0, vb).unwrap();

        let base = Tensor::zeros((1, 4, 2), DType::F32, &Device::Cpu).unwrap();
        let bumped = Tensor::cat(
            &[
                base.narrow(1, 0, 3).unwrap(),
                Tensor::ones((1, 1, 2), DType::F32, &Device::Cpu).unwrap(),
            ],
            1,
        )
        .unwrap();

        let a = layer.forward(&base).unwrap();
        let b = layer.forward(&bumped).unwrap();

        // Changing only the last timestep leaves the forward half of step 0
        // untouched but reaches step 0 through the backward half.
        let diff = (a - b).unwrap().abs().unwrap().i((0, 0)).unwrap();
        let fwd: f32 = diff.narrow(0, 0, 3).unwrap().sum_all().unwrap().to_scalar().unwrap();
        let bwd: f32 = diff.narrow(0, 3, 3).unwrap().max(D::Minus1).unwrap().to_scalar().unwrap();
        assert_eq!(fwd, 0.0);
        assert!(bwd > 0.0);
    }
}
