//! Layer types: fully-connected, 2-D convolution, ReLU, and flatten.

use ndarray::{Array1, Array2, Array3, Array4, ArrayView3};
use rho_core::{Result, RhoError};

/// Fully-connected layer: `y = W·x + b`.
#[derive(Debug, Clone)]
pub struct LinearLayer {
    pub weight: Array2<f32>,
    pub bias: Array1<f32>,
}

impl LinearLayer {
    /// Create a linear layer. A missing bias is treated as zero.
    pub fn new(weight: Array2<f32>, bias: Option<Array1<f32>>) -> Result<Self> {
        let out_features = weight.nrows();
        let bias = bias.unwrap_or_else(|| Array1::zeros(out_features));
        if bias.len() != out_features {
            return Err(RhoError::ShapeMismatch {
                expected: vec![out_features],
                got: vec![bias.len()],
            });
        }
        Ok(Self { weight, bias })
    }

    pub fn in_features(&self) -> usize {
        self.weight.ncols()
    }

    pub fn out_features(&self) -> usize {
        self.weight.nrows()
    }

    pub fn forward(&self, x: &Array1<f32>) -> Result<Array1<f32>> {
        if x.len() != self.in_features() {
            return Err(RhoError::ShapeMismatch {
                expected: vec![self.in_features()],
                got: vec![x.len()],
            });
        }
        Ok(self.weight.dot(x) + &self.bias)
    }
}

/// 2-D convolution with square kernels, valid padding, and uniform stride.
///
/// Weight layout is `[out_channels, in_channels, kernel_h, kernel_w]`,
/// matching the checkpoint format.
#[derive(Debug, Clone)]
pub struct Conv2dLayer {
    pub weight: Array4<f32>,
    pub bias: Array1<f32>,
    pub stride: usize,
}

impl Conv2dLayer {
    pub fn new(weight: Array4<f32>, bias: Option<Array1<f32>>, stride: usize) -> Result<Self> {
        if stride == 0 {
            return Err(RhoError::InvalidConfig(
                "conv2d stride must be at least 1".to_string(),
            ));
        }
        let out_channels = weight.shape()[0];
        let bias = bias.unwrap_or_else(|| Array1::zeros(out_channels));
        if bias.len() != out_channels {
            return Err(RhoError::ShapeMismatch {
                expected: vec![out_channels],
                got: vec![bias.len()],
            });
        }
        Ok(Self {
            weight,
            bias,
            stride,
        })
    }

    pub fn out_channels(&self) -> usize {
        self.weight.shape()[0]
    }

    pub fn in_channels(&self) -> usize {
        self.weight.shape()[1]
    }

    pub fn kernel(&self) -> (usize, usize) {
        (self.weight.shape()[2], self.weight.shape()[3])
    }

    /// Output spatial size for a `(height, width)` input: `(in − k)/stride + 1`.
    pub fn output_spatial(&self, height: usize, width: usize) -> Result<(usize, usize)> {
        let (kh, kw) = self.kernel();
        if height < kh || width < kw {
            return Err(RhoError::ShapeMismatch {
                expected: vec![self.in_channels(), kh, kw],
                got: vec![self.in_channels(), height, width],
            });
        }
        Ok(((height - kh) / self.stride + 1, (width - kw) / self.stride + 1))
    }

    pub fn forward(&self, x: &ArrayView3<f32>) -> Result<Array3<f32>> {
        let (in_c, h, w) = x.dim();
        if in_c != self.in_channels() {
            return Err(RhoError::ShapeMismatch {
                expected: vec![self.in_channels(), h, w],
                got: vec![in_c, h, w],
            });
        }
        let (kh, kw) = self.kernel();
        let (oh, ow) = self.output_spatial(h, w)?;

        let mut out = Array3::<f32>::zeros((self.out_channels(), oh, ow));
        for o in 0..self.out_channels() {
            for oy in 0..oh {
                for ox in 0..ow {
                    let mut acc = self.bias[o];
                    for c in 0..in_c {
                        for ky in 0..kh {
                            for kx in 0..kw {
                                acc += self.weight[[o, c, ky, kx]]
                                    * x[[c, oy * self.stride + ky, ox * self.stride + kx]];
                            }
                        }
                    }
                    out[[o, oy, ox]] = acc;
                }
            }
        }
        Ok(out)
    }
}

/// A layer in a piecewise-linear network.
#[derive(Debug, Clone)]
pub enum Layer {
    Linear(LinearLayer),
    Conv2d(Conv2dLayer),
    Relu,
    Flatten,
}

impl Layer {
    pub fn kind(&self) -> &'static str {
        match self {
            Layer::Linear(_) => "linear",
            Layer::Conv2d(_) => "conv2d",
            Layer::Relu => "relu",
            Layer::Flatten => "flatten",
        }
    }

    /// Number of trainable parameters in this layer.
    pub fn num_params(&self) -> usize {
        match self {
            Layer::Linear(l) => l.weight.len() + l.bias.len(),
            Layer::Conv2d(c) => c.weight.len() + c.bias.len(),
            Layer::Relu | Layer::Flatten => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2, Array4};

    #[test]
    fn test_linear_forward() {
        let layer =
            LinearLayer::new(arr2(&[[1.0, 2.0], [3.0, 4.0]]), Some(arr1(&[0.5, -0.5]))).unwrap();
        let y = layer.forward(&arr1(&[1.0, 1.0])).unwrap();
        assert!((y[0] - 3.5).abs() < 1e-6);
        assert!((y[1] - 6.5).abs() < 1e-6);
    }

    #[test]
    fn test_linear_default_bias_is_zero() {
        let layer = LinearLayer::new(arr2(&[[2.0, 0.0]]), None).unwrap();
        let y = layer.forward(&arr1(&[3.0, 9.0])).unwrap();
        assert!((y[0] - 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_linear_bias_shape_checked() {
        let err = LinearLayer::new(arr2(&[[1.0, 2.0]]), Some(arr1(&[0.0, 0.0]))).unwrap_err();
        assert!(matches!(err, RhoError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_linear_input_shape_checked() {
        let layer = LinearLayer::new(arr2(&[[1.0, 2.0]]), None).unwrap();
        assert!(layer.forward(&arr1(&[1.0])).is_err());
    }

    #[test]
    fn test_conv_forward_hand_computed() {
        // 1 input channel, 1 output channel, 2x2 kernel of ones, stride 1.
        // Input 3x3 of 1..9 row-major: each output is the sum of a 2x2 patch.
        let mut weight = Array4::<f32>::zeros((1, 1, 2, 2));
        weight.fill(1.0);
        let conv = Conv2dLayer::new(weight, Some(arr1(&[0.0])), 1).unwrap();

        let x = Array3::from_shape_vec(
            (1, 3, 3),
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0],
        )
        .unwrap();
        let y = conv.forward(&x.view()).unwrap();

        assert_eq!(y.dim(), (1, 2, 2));
        assert!((y[[0, 0, 0]] - 12.0).abs() < 1e-6); // 1+2+4+5
        assert!((y[[0, 0, 1]] - 16.0).abs() < 1e-6); // 2+3+5+6
        assert!((y[[0, 1, 0]] - 24.0).abs() < 1e-6); // 4+5+7+8
        assert!((y[[0, 1, 1]] - 28.0).abs() < 1e-6); // 5+6+8+9
    }

    #[test]
    fn test_conv_stride_two_output_size() {
        // MNIST-sized check: 28x28 through 5x5 stride-2 gives 12x12,
        // then 12x12 through 5x5 stride-2 gives 4x4.
        let weight = Array4::<f32>::zeros((20, 1, 5, 5));
        let conv = Conv2dLayer::new(weight, None, 2).unwrap();
        assert_eq!(conv.output_spatial(28, 28).unwrap(), (12, 12));

        let weight = Array4::<f32>::zeros((50, 20, 5, 5));
        let conv = Conv2dLayer::new(weight, None, 2).unwrap();
        assert_eq!(conv.output_spatial(12, 12).unwrap(), (4, 4));
    }

    #[test]
    fn test_conv_bias_applied_per_channel() {
        let weight = Array4::<f32>::zeros((2, 1, 1, 1));
        let conv = Conv2dLayer::new(weight, Some(arr1(&[1.5, -2.0])), 1).unwrap();
        let x = Array3::<f32>::zeros((1, 2, 2));
        let y = conv.forward(&x.view()).unwrap();
        assert!((y[[0, 0, 0]] - 1.5).abs() < 1e-6);
        assert!((y[[1, 1, 1]] + 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_conv_rejects_zero_stride() {
        let weight = Array4::<f32>::zeros((1, 1, 2, 2));
        let err = Conv2dLayer::new(weight, None, 0).unwrap_err();
        assert!(matches!(err, RhoError::InvalidConfig(_)));
    }

    #[test]
    fn test_conv_rejects_small_input() {
        let weight = Array4::<f32>::zeros((1, 1, 5, 5));
        let conv = Conv2dLayer::new(weight, None, 1).unwrap();
        assert!(conv.output_spatial(3, 3).is_err());
    }

    #[test]
    fn test_conv_channel_mismatch() {
        let weight = Array4::<f32>::zeros((1, 2, 2, 2));
        let conv = Conv2dLayer::new(weight, None, 1).unwrap();
        let x = Array3::<f32>::zeros((1, 4, 4));
        assert!(conv.forward(&x.view()).is_err());
    }

    #[test]
    fn test_layer_kind_and_params() {
        let linear = Layer::Linear(LinearLayer::new(arr2(&[[1.0, 2.0]]), None).unwrap());
        assert_eq!(linear.kind(), "linear");
        assert_eq!(linear.num_params(), 3);
        assert_eq!(Layer::Relu.num_params(), 0);
        assert_eq!(Layer::Flatten.kind(), "flatten");
    }
}
