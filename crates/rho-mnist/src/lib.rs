//! IDX dataset reader for the MNIST file layout.
//!
//! Reads the standard `*-images-idx3-ubyte` / `*-labels-idx1-ubyte` pairs,
//! plain or gzipped, scaling pixel intensities to `[0, 1]`. Nothing here
//! downloads anything: the directory must already contain the files.

use flate2::read::GzDecoder;
use ndarray::Array3;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rho_core::{Result, RhoError};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::info;

const IMAGES_MAGIC: u32 = 0x0000_0803;
const LABELS_MAGIC: u32 = 0x0000_0801;

/// Which half of the dataset to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

impl Split {
    fn images_stem(&self) -> &'static str {
        match self {
            Split::Train => "train-images-idx3-ubyte",
            Split::Test => "t10k-images-idx3-ubyte",
        }
    }

    fn labels_stem(&self) -> &'static str {
        match self {
            Split::Train => "train-labels-idx1-ubyte",
            Split::Test => "t10k-labels-idx1-ubyte",
        }
    }
}

/// One labeled image, pixels scaled to `[0, 1]`, shape `[1, rows, cols]`.
#[derive(Debug, Clone)]
pub struct Sample {
    pub image: Array3<f32>,
    pub label: u8,
}

/// An in-memory dataset split.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub samples: Vec<Sample>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Deterministically shuffle the samples in place.
    ///
    /// A fixed seed keeps attack runs reproducible.
    pub fn shuffle(&mut self, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        self.samples.shuffle(&mut rng);
    }
}

/// Load one split from a dataset directory.
pub fn load_dataset(dir: &Path, split: Split) -> Result<Dataset> {
    let images = read_idx_file(&resolve(dir, split.images_stem())?)?;
    let labels = read_idx_file(&resolve(dir, split.labels_stem())?)?;

    let (rows, cols, image_data) = parse_images(&images)?;
    let label_data = parse_labels(&labels)?;

    let count = label_data.len();
    if image_data.len() != count * rows * cols {
        return Err(RhoError::DatasetLoad(format!(
            "{} images of {}x{} pixels but {} labels",
            image_data.len() / (rows * cols),
            rows,
            cols,
            count
        )));
    }

    let mut samples = Vec::with_capacity(count);
    for (i, &label) in label_data.iter().enumerate() {
        let start = i * rows * cols;
        let pixels: Vec<f32> = image_data[start..start + rows * cols]
            .iter()
            .map(|&b| f32::from(b) / 255.0)
            .collect();
        let image = Array3::from_shape_vec((1, rows, cols), pixels)
            .map_err(|e| RhoError::DatasetLoad(e.to_string()))?;
        samples.push(Sample { image, label });
    }
    info!(
        dir = %dir.display(),
        split = ?split,
        samples = samples.len(),
        "loaded dataset"
    );
    Ok(Dataset { samples })
}

/// Find `stem` or `stem.gz` in the dataset directory.
fn resolve(dir: &Path, stem: &str) -> Result<PathBuf> {
    let plain = dir.join(stem);
    if plain.exists() {
        return Ok(plain);
    }
    let gz = dir.join(format!("{stem}.gz"));
    if gz.exists() {
        return Ok(gz);
    }
    Err(RhoError::DatasetLoad(format!(
        "neither {} nor {}.gz found in {}",
        stem,
        stem,
        dir.display()
    )))
}

fn read_idx_file(path: &Path) -> Result<Vec<u8>> {
    let is_gzip = path.extension().and_then(|e| e.to_str()) == Some("gz");
    if !is_gzip {
        return std::fs::read(path)
            .map_err(|e| RhoError::DatasetLoad(format!("failed to read file: {}", e)));
    }
    let file = File::open(path)
        .map_err(|e| RhoError::DatasetLoad(format!("failed to open file: {}", e)))?;
    let mut decoder = GzDecoder::new(file);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| RhoError::DatasetLoad(format!("failed to decode gzip: {}", e)))?;
    Ok(out)
}

fn read_u32_be(bytes: &[u8], offset: usize) -> Result<u32> {
    let end = offset + 4;
    if bytes.len() < end {
        return Err(RhoError::DatasetLoad("truncated IDX header".to_string()));
    }
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..end]);
    Ok(u32::from_be_bytes(buf))
}

fn parse_images(bytes: &[u8]) -> Result<(usize, usize, &[u8])> {
    let magic = read_u32_be(bytes, 0)?;
    if magic != IMAGES_MAGIC {
        return Err(RhoError::DatasetLoad(format!(
            "bad image magic 0x{magic:08x}"
        )));
    }
    let count = read_u32_be(bytes, 4)? as usize;
    let rows = read_u32_be(bytes, 8)? as usize;
    let cols = read_u32_be(bytes, 12)? as usize;
    let data = &bytes[16..];
    if data.len() != count * rows * cols {
        return Err(RhoError::DatasetLoad(format!(
            "image payload is {} bytes, header promises {}",
            data.len(),
            count * rows * cols
        )));
    }
    Ok((rows, cols, data))
}

fn parse_labels(bytes: &[u8]) -> Result<&[u8]> {
    let magic = read_u32_be(bytes, 0)?;
    if magic != LABELS_MAGIC {
        return Err(RhoError::DatasetLoad(format!(
            "bad label magic 0x{magic:08x}"
        )));
    }
    let count = read_u32_be(bytes, 4)? as usize;
    let data = &bytes[8..];
    if data.len() != count {
        return Err(RhoError::DatasetLoad(format!(
            "label payload is {} bytes, header promises {}",
            data.len(),
            count
        )));
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn idx_images(count: usize, rows: usize, cols: usize, pixels: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&IMAGES_MAGIC.to_be_bytes());
        out.extend_from_slice(&(count as u32).to_be_bytes());
        out.extend_from_slice(&(rows as u32).to_be_bytes());
        out.extend_from_slice(&(cols as u32).to_be_bytes());
        out.extend_from_slice(pixels);
        out
    }

    fn idx_labels(labels: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&LABELS_MAGIC.to_be_bytes());
        out.extend_from_slice(&(labels.len() as u32).to_be_bytes());
        out.extend_from_slice(labels);
        out
    }

    fn write_gz(path: &Path, bytes: &[u8]) {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes).unwrap();
        std::fs::write(path, encoder.finish().unwrap()).unwrap();
    }

    fn tiny_dataset_dir(gzipped: bool) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        // 3 images of 2x2 pixels.
        let pixels: Vec<u8> = vec![0, 51, 102, 153, 204, 255, 0, 255, 10, 20, 30, 40];
        let images = idx_images(3, 2, 2, &pixels);
        let labels = idx_labels(&[7, 2, 9]);
        if gzipped {
            write_gz(&dir.path().join("t10k-images-idx3-ubyte.gz"), &images);
            write_gz(&dir.path().join("t10k-labels-idx1-ubyte.gz"), &labels);
        } else {
            std::fs::write(dir.path().join("t10k-images-idx3-ubyte"), images).unwrap();
            std::fs::write(dir.path().join("t10k-labels-idx1-ubyte"), labels).unwrap();
        }
        dir
    }

    #[test]
    fn test_load_plain() {
        let dir = tiny_dataset_dir(false);
        let dataset = load_dataset(dir.path(), Split::Test).unwrap();
        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.samples[0].label, 7);
        assert_eq!(dataset.samples[0].image.dim(), (1, 2, 2));
        // Pixel scaling: 51/255 = 0.2.
        assert!((dataset.samples[0].image[[0, 0, 1]] - 0.2).abs() < 1e-6);
        assert!((dataset.samples[1].image[[0, 0, 1]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_load_gzip() {
        let dir = tiny_dataset_dir(true);
        let dataset = load_dataset(dir.path(), Split::Test).unwrap();
        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.samples[2].label, 9);
    }

    #[test]
    fn test_missing_files_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_dataset(dir.path(), Split::Test).unwrap_err();
        assert!(format!("{err}").contains("t10k-images-idx3-ubyte"));
    }

    #[test]
    fn test_bad_magic_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut images = idx_images(1, 2, 2, &[0; 4]);
        images[3] = 0xff;
        std::fs::write(dir.path().join("t10k-images-idx3-ubyte"), images).unwrap();
        std::fs::write(dir.path().join("t10k-labels-idx1-ubyte"), idx_labels(&[1])).unwrap();
        let err = load_dataset(dir.path(), Split::Test).unwrap_err();
        assert!(format!("{err}").contains("magic"));
    }

    #[test]
    fn test_truncated_payload_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let images = idx_images(2, 2, 2, &[0; 4]); // promises 8 bytes, has 4
        std::fs::write(dir.path().join("t10k-images-idx3-ubyte"), images).unwrap();
        std::fs::write(
            dir.path().join("t10k-labels-idx1-ubyte"),
            idx_labels(&[1, 2]),
        )
        .unwrap();
        let err = load_dataset(dir.path(), Split::Test).unwrap_err();
        assert!(format!("{err}").contains("payload"));
    }

    #[test]
    fn test_label_count_mismatch_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let images = idx_images(1, 2, 2, &[0; 4]);
        std::fs::write(dir.path().join("t10k-images-idx3-ubyte"), images).unwrap();
        std::fs::write(
            dir.path().join("t10k-labels-idx1-ubyte"),
            idx_labels(&[1, 2]),
        )
        .unwrap();
        assert!(load_dataset(dir.path(), Split::Test).is_err());
    }

    #[test]
    fn test_shuffle_is_deterministic() {
        let dir = tiny_dataset_dir(false);
        let mut a = load_dataset(dir.path(), Split::Test).unwrap();
        let mut b = load_dataset(dir.path(), Split::Test).unwrap();
        a.shuffle(42);
        b.shuffle(42);
        let la: Vec<u8> = a.samples.iter().map(|s| s.label).collect();
        let lb: Vec<u8> = b.samples.iter().map(|s| s.label).collect();
        assert_eq!(la, lb);
    }

    #[test]
    fn test_train_split_uses_train_files() {
        let dir = tempfile::tempdir().unwrap();
        let images = idx_images(1, 2, 2, &[9, 9, 9, 9]);
        let labels = idx_labels(&[3]);
        std::fs::write(dir.path().join("train-images-idx3-ubyte"), images).unwrap();
        std::fs::write(dir.path().join("train-labels-idx1-ubyte"), labels).unwrap();
        let dataset = load_dataset(dir.path(), Split::Train).unwrap();
        assert_eq!(dataset.samples[0].label, 3);
    }
}
