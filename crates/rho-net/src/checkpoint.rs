//! JSON checkpoint format for networks, optionally gzip-compressed.
//!
//! Checkpoints are self-describing: every tensor carries its shape next to a
//! flat row-major buffer, and loading re-validates all of it before a
//! `Network` is constructed. Training happens elsewhere; this is the only
//! way weights enter the system.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::{Array1, Array2, Array4};
use rho_core::{Result, RhoError};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::info;

use crate::layers::{Conv2dLayer, Layer, LinearLayer};
use crate::network::Network;

pub const FORMAT_VERSION: u32 = 1;

/// A tensor as stored on disk: shape plus flat row-major data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorData {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl TensorData {
    fn validate(&self) -> Result<()> {
        let expected: usize = self.shape.iter().product();
        if expected != self.data.len() {
            return Err(RhoError::ModelLoad(format!(
                "tensor shape {:?} needs {} values, got {}",
                self.shape,
                expected,
                self.data.len()
            )));
        }
        Ok(())
    }

    fn from_array1(a: &Array1<f32>) -> Self {
        Self {
            shape: vec![a.len()],
            data: a.to_vec(),
        }
    }

    fn from_array2(a: &Array2<f32>) -> Self {
        Self {
            shape: a.shape().to_vec(),
            data: a.iter().copied().collect(),
        }
    }

    fn from_array4(a: &Array4<f32>) -> Self {
        Self {
            shape: a.shape().to_vec(),
            data: a.iter().copied().collect(),
        }
    }

    fn into_array1(self) -> Result<Array1<f32>> {
        self.validate()?;
        if self.shape.len() != 1 {
            return Err(RhoError::ModelLoad(format!(
                "expected 1-D tensor, got shape {:?}",
                self.shape
            )));
        }
        Ok(Array1::from_vec(self.data))
    }

    fn into_array2(self) -> Result<Array2<f32>> {
        self.validate()?;
        if self.shape.len() != 2 {
            return Err(RhoError::ModelLoad(format!(
                "expected 2-D tensor, got shape {:?}",
                self.shape
            )));
        }
        Array2::from_shape_vec((self.shape[0], self.shape[1]), self.data)
            .map_err(|e| RhoError::ModelLoad(e.to_string()))
    }

    fn into_array4(self) -> Result<Array4<f32>> {
        self.validate()?;
        if self.shape.len() != 4 {
            return Err(RhoError::ModelLoad(format!(
                "expected 4-D tensor, got shape {:?}",
                self.shape
            )));
        }
        Array4::from_shape_vec(
            (self.shape[0], self.shape[1], self.shape[2], self.shape[3]),
            self.data,
        )
        .map_err(|e| RhoError::ModelLoad(e.to_string()))
    }
}

/// One layer as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerCheckpoint {
    Linear {
        weight: TensorData,
        bias: TensorData,
    },
    Conv2d {
        weight: TensorData,
        bias: TensorData,
        stride: usize,
    },
    Relu,
    Flatten,
}

/// On-disk representation of a full network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkCheckpoint {
    pub format_version: u32,
    pub layers: Vec<LayerCheckpoint>,
}

impl NetworkCheckpoint {
    pub fn from_network(network: &Network) -> Self {
        let layers = network
            .layers
            .iter()
            .map(|layer| match layer {
                Layer::Linear(l) => LayerCheckpoint::Linear {
                    weight: TensorData::from_array2(&l.weight),
                    bias: TensorData::from_array1(&l.bias),
                },
                Layer::Conv2d(c) => LayerCheckpoint::Conv2d {
                    weight: TensorData::from_array4(&c.weight),
                    bias: TensorData::from_array1(&c.bias),
                    stride: c.stride,
                },
                Layer::Relu => LayerCheckpoint::Relu,
                Layer::Flatten => LayerCheckpoint::Flatten,
            })
            .collect();
        Self {
            format_version: FORMAT_VERSION,
            layers,
        }
    }

    pub fn into_network(self) -> Result<Network> {
        if self.format_version != FORMAT_VERSION {
            return Err(RhoError::ModelLoad(format!(
                "unsupported checkpoint format version {} (expected {})",
                self.format_version, FORMAT_VERSION
            )));
        }
        let mut network = Network::new();
        for layer in self.layers {
            let layer = match layer {
                LayerCheckpoint::Linear { weight, bias } => Layer::Linear(LinearLayer::new(
                    weight.into_array2()?,
                    Some(bias.into_array1()?),
                )?),
                LayerCheckpoint::Conv2d {
                    weight,
                    bias,
                    stride,
                } => Layer::Conv2d(Conv2dLayer::new(
                    weight.into_array4()?,
                    Some(bias.into_array1()?),
                    stride,
                )?),
                LayerCheckpoint::Relu => Layer::Relu,
                LayerCheckpoint::Flatten => Layer::Flatten,
            };
            network.add_layer(layer);
        }
        Ok(network)
    }
}

fn is_gzip(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("gz")
}

fn read_bytes_maybe_gzip(path: &Path) -> Result<Vec<u8>> {
    if !path.exists() {
        return Err(RhoError::ModelLoad(format!(
            "file not found: {}",
            path.display()
        )));
    }
    if !is_gzip(path) {
        return std::fs::read(path)
            .map_err(|e| RhoError::ModelLoad(format!("failed to read file: {}", e)));
    }
    let file =
        File::open(path).map_err(|e| RhoError::ModelLoad(format!("failed to open file: {}", e)))?;
    let mut decoder = GzDecoder::new(file);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| RhoError::ModelLoad(format!("failed to decode gzip: {}", e)))?;
    Ok(out)
}

fn write_bytes_maybe_gzip(path: &Path, bytes: &[u8]) -> Result<()> {
    if !is_gzip(path) {
        return std::fs::write(path, bytes)
            .map_err(|e| RhoError::ModelLoad(format!("failed to write file: {}", e)));
    }
    let file = File::create(path)
        .map_err(|e| RhoError::ModelLoad(format!("failed to create file: {}", e)))?;
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder
        .write_all(bytes)
        .map_err(|e| RhoError::ModelLoad(format!("failed to write gzip: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| RhoError::ModelLoad(format!("failed to finish gzip: {}", e)))?;
    Ok(())
}

/// Load a network checkpoint from a JSON or gzipped-JSON file.
pub fn load_checkpoint(path: &Path) -> Result<Network> {
    let bytes = read_bytes_maybe_gzip(path)?;
    let checkpoint: NetworkCheckpoint = serde_json::from_slice(&bytes)
        .map_err(|e| RhoError::ModelLoad(format!("invalid checkpoint JSON: {}", e)))?;
    let network = checkpoint.into_network()?;
    info!(
        path = %path.display(),
        layers = network.layers.len(),
        params = network.num_params(),
        "loaded checkpoint"
    );
    Ok(network)
}

/// Save a network checkpoint, gzip-compressing when the path ends in `.gz`.
pub fn save_checkpoint(network: &Network, path: &Path) -> Result<()> {
    let checkpoint = NetworkCheckpoint::from_network(network);
    let bytes = serde_json::to_vec(&checkpoint)
        .map_err(|e| RhoError::ModelLoad(format!("failed to encode checkpoint: {}", e)))?;
    write_bytes_maybe_gzip(path, &bytes)
}
