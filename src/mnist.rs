use anyhow::{Context, Result, bail, ensure};
use flate2::read::GzDecoder;
use itertools::Itertools;
use log::{debug, info};
use ndarray::{Array2, Axis, concatenate};
use std::{fs::File, io::Read, path::Path};

const IMAGE_MAGIC: u32 = 2051;
const LABEL_MAGIC: u32 = 2049;

// Number of digit classes in MNIST.
pub const CLASSES: usize = 10;

// The full MNIST collection, training and test files joined together (70000 examples). Each row of
// images holds the raw pixel intensities of one digit in the range 0-255, and labels holds the
// matching digit for every row.
#[derive(Debug)]
pub struct MnistDataset {
    pub images: Array2<f32>,
    pub labels: Vec<u8>,
}

impl MnistDataset {
    // Reads the four gzipped IDX files from data_dir. The files are never downloaded here; they
    // have to be placed in the directory beforehand.
    pub fn load(data_dir: &Path) -> Result<MnistDataset> {
        let training = Self::load_pair(data_dir, "train")?;
        let test = Self::load_pair(data_dir, "t10k")?;

        let images = concatenate(Axis(0), &[training.images.view(), test.images.view()])
            .context("MNIST training and test images have different widths")?;
        let mut labels = training.labels;
        labels.extend(test.labels);

        info!(
            "Loaded {} MNIST examples of {} pixels from {}",
            labels.len(),
            images.ncols(),
            data_dir.display()
        );

        Ok(MnistDataset { images, labels })
    }

    fn load_pair(data_dir: &Path, prefix: &str) -> Result<MnistDataset> {
        let image_path = data_dir.join(format!("{prefix}-images-idx3-ubyte.gz"));
        let label_path = data_dir.join(format!("{prefix}-labels-idx1-ubyte.gz"));
        let image_bytes = read_bytes(&image_path)?;
        let label_bytes = read_bytes(&label_path)?;

        images_and_labels_to_data(&image_bytes, &label_bytes)
            .with_context(|| format!("malformed MNIST files {}", image_path.display()))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }
}

fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path)
        .with_context(|| format!("could not open MNIST file {}", path.display()))?;
    let mut unzipped_file = GzDecoder::new(file);
    let mut bytes = Vec::new();
    unzipped_file
        .read_to_end(&mut bytes)
        .with_context(|| format!("could not decompress {}", path.display()))?;
    debug!("Read {} bytes from {}", bytes.len(), path.display());
    Ok(bytes)
}

// Reads `count` big-endian u32 header values from the front of an IDX file.
fn read_header(bytes: &[u8], count: usize) -> Result<Vec<u32>> {
    ensure!(
        bytes.len() >= count * 4,
        "IDX file is {} bytes long, too short for its header",
        bytes.len()
    );
    Ok(bytes[..count * 4]
        .chunks_exact(4)
        .map(|chunk| u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect_vec())
}

// The image file header is four u32s: magic number, image count, rows and columns. The label file
// header is two u32s: magic number and label count. Everything after the headers is one byte per
// pixel or label.
fn images_and_labels_to_data(image_bytes: &[u8], label_bytes: &[u8]) -> Result<MnistDataset> {
    let image_headers = read_header(image_bytes, 4)?;
    let label_headers = read_header(label_bytes, 2)?;

    if image_headers[0] != IMAGE_MAGIC {
        bail!("expected image magic number {IMAGE_MAGIC}, found {}", image_headers[0]);
    }
    if label_headers[0] != LABEL_MAGIC {
        bail!("expected label magic number {LABEL_MAGIC}, found {}", label_headers[0]);
    }

    let images = image_headers[1] as usize;
    let labels = label_headers[1] as usize;
    ensure!(
        images == labels,
        "{images} images but {labels} labels in MNIST files"
    );

    // Header values come straight from the file, so a corrupt header must not overflow.
    let pixels = (image_headers[2] as usize)
        .checked_mul(image_headers[3] as usize)
        .with_context(|| {
            format!(
                "image size {} x {} is too large",
                image_headers[2], image_headers[3]
            )
        })?;
    let pixel_bytes = images
        .checked_mul(pixels)
        .with_context(|| format!("{images} images of {pixels} pixels is too large"))?;

    let image_data = &image_bytes[16..];
    let label_data = &label_bytes[8..];
    ensure!(
        image_data.len() == pixel_bytes,
        "expected {pixel_bytes} pixel bytes, found {}",
        image_data.len()
    );
    ensure!(
        label_data.len() == labels,
        "expected {labels} label bytes, found {}",
        label_data.len()
    );
    if let Some(label) = label_data.iter().find(|&&label| label as usize >= CLASSES) {
        bail!("label {label} is not a digit");
    }

    let images = Array2::from_shape_vec(
        (images, pixels),
        image_data.iter().map(|&value| value as f32).collect_vec(),
    )?;

    Ok(MnistDataset {
        images,
        labels: label_data.to_vec(),
    })
}
