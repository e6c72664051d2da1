use anyhow::{Context, Result, ensure};
use flate2::read::GzDecoder;
use itertools::Itertools;
use ndarray::{Array1, Array2, ArrayView1, Axis, s};
use ndarray_rand::rand::{Rng, seq::SliceRandom};
use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

pub const IMAGE_ROWS: usize = 28;
pub const IMAGE_COLUMNS: usize = 28;
pub const PIXELS: usize = IMAGE_ROWS * IMAGE_COLUMNS;
pub const CLASSES: usize = 10;

const IMAGE_MAGIC: u32 = 2051;
const LABEL_MAGIC: u32 = 2049;

// Official training pair first, then the test pair, so the first 60000 rows of the combined set
// are the official training images.
const IDX_FILES: [(&str, &str); 2] = [
    ("train-images-idx3-ubyte.gz", "train-labels-idx1-ubyte.gz"),
    ("t10k-images-idx3-ubyte.gz", "t10k-labels-idx1-ubyte.gz"),
];

// The dataset exactly as a provider hands it over: one row of PIXELS bytes per image and one label
// per row, in matching order.
#[derive(Clone, Debug)]
pub struct RawDataset {
    pub images: Array2<u8>,
    pub labels: Array1<u8>,
}

pub trait DatasetProvider {
    fn fetch(&self) -> Result<RawDataset>;
}

// Reads the four gzip-compressed IDX files of MNIST from a directory.
pub struct IdxDirectory {
    path: PathBuf,
}

impl IdxDirectory {
    pub fn new(path: impl Into<PathBuf>) -> IdxDirectory {
        IdxDirectory { path: path.into() }
    }
}

impl DatasetProvider for IdxDirectory {
    fn fetch(&self) -> Result<RawDataset> {
        let mut images = Vec::new();
        let mut labels = Vec::new();

        for (image_file, label_file) in IDX_FILES {
            let image_bytes = read_bytes(&self.path.join(image_file))?;
            let label_bytes = read_bytes(&self.path.join(label_file))?;
            let (part_images, part_labels) = parse_idx(image_bytes, label_bytes)
                .with_context(|| format!("malformed IDX pair {image_file} / {label_file}"))?;
            images.extend(part_images);
            labels.extend(part_labels);
        }

        let examples = labels.len();
        Ok(RawDataset {
            images: Array2::from_shape_vec((examples, PIXELS), images)?,
            labels: Array1::from_vec(labels),
        })
    }
}

// Decompress a whole gzip file into memory.
fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut bytes = Vec::new();
    GzDecoder::new(file)
        .read_to_end(&mut bytes)
        .with_context(|| format!("failed to decompress {}", path.display()))?;
    Ok(bytes)
}

// Read `fields` big-endian 32-bit header integers off the front of an IDX byte stream.
fn read_header<I: Iterator<Item = u8>>(bytes: &mut I, fields: usize) -> Result<Vec<u32>> {
    let header = bytes.by_ref().take(fields * 4).collect::<Vec<_>>();
    ensure!(header.len() == fields * 4, "truncated IDX header");
    Ok(header
        .chunks_exact(4)
        .map(|chunk| u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

// Split a matching pair of IDX image and label files into flat pixel bytes and labels.
//
// The image header is four integers: magic number (2051), image count, rows and columns. The label
// header is two: magic number (2049) and label count.
fn parse_idx(image_bytes: Vec<u8>, label_bytes: Vec<u8>) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut image_bytes_iter = image_bytes.into_iter();
    let mut label_bytes_iter = label_bytes.into_iter();

    let image_header = read_header(&mut image_bytes_iter, 4)?;
    ensure!(
        image_header[0] == IMAGE_MAGIC,
        "image file has magic number {}, expected {IMAGE_MAGIC}",
        image_header[0]
    );
    let (images, rows, columns) = (
        image_header[1] as usize,
        image_header[2] as usize,
        image_header[3] as usize,
    );
    ensure!(
        rows * columns == PIXELS,
        "images are {rows}x{columns}, expected {IMAGE_ROWS}x{IMAGE_COLUMNS}"
    );

    let label_header = read_header(&mut label_bytes_iter, 2)?;
    ensure!(
        label_header[0] == LABEL_MAGIC,
        "label file has magic number {}, expected {LABEL_MAGIC}",
        label_header[0]
    );
    let labels = label_header[1] as usize;
    ensure!(images == labels, "{images} images but {labels} labels");

    let pixels = image_bytes_iter.collect::<Vec<_>>();
    let label_values = label_bytes_iter.collect::<Vec<_>>();
    ensure!(
        pixels.len() == images * PIXELS,
        "image data holds {} bytes, header promises {}",
        pixels.len(),
        images * PIXELS
    );
    ensure!(
        label_values.len() == labels,
        "label data holds {} bytes, header promises {labels}",
        label_values.len()
    );

    Ok((pixels, label_values))
}

// A set of examples in column layout: images is [PIXELS x n] with intensities in [0, 1] and labels
// is the matching one-hot [CLASSES x n] matrix.
#[derive(Clone, Debug)]
pub struct Dataset {
    pub images: Array2<f64>,
    pub labels: Array2<f64>,
}

impl Dataset {
    pub fn examples(&self) -> usize {
        self.images.ncols()
    }

    // Gather the given columns, in the given order, into a new dataset.
    pub fn columns(&self, indices: &[usize]) -> Dataset {
        Dataset {
            images: self.images.select(Axis(1), indices),
            labels: self.labels.select(Axis(1), indices),
        }
    }

    pub fn shuffled<R: Rng + ?Sized>(&self, rng: &mut R) -> Dataset {
        self.columns(&permutation(self.examples(), rng))
    }
}

pub struct MnistData {
    pub training: Dataset,
    pub test: Dataset,
}

// A uniformly random ordering of 0..n.
pub fn permutation<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Vec<usize> {
    let mut order = (0..n).collect::<Vec<_>>();
    order.shuffle(rng);
    order
}

// Turn a vector of class labels into a [classes x n] matrix where column i is all 0.0 except for a
// 1.0 at row labels[i].
pub fn one_hot(labels: ArrayView1<u8>, classes: usize) -> Result<Array2<f64>> {
    let mut encoded = Array2::zeros((classes, labels.len()));
    for (column, &label) in labels.iter().enumerate() {
        ensure!(
            (label as usize) < classes,
            "label {label} at position {column} is outside 0..{classes}"
        );
        encoded[[label as usize, column]] = 1.0;
    }
    Ok(encoded)
}

// Fetch the raw dataset and prepare it for training: normalize, one-hot encode, split the first
// train_size examples off as the training set, and shuffle the training set.
pub fn load<P, R>(provider: &P, train_size: usize, rng: &mut R) -> Result<MnistData>
where
    P: DatasetProvider + ?Sized,
    R: Rng + ?Sized,
{
    let raw = provider.fetch().context("failed to fetch the MNIST dataset")?;
    let examples = raw.labels.len();
    ensure!(
        raw.images.dim() == (examples, PIXELS),
        "image matrix has shape {:?}, expected ({examples}, {PIXELS})",
        raw.images.dim()
    );
    ensure!(
        train_size <= examples,
        "cannot take {train_size} training examples out of {examples}"
    );

    let normalize = |pixel: u8| f64::from(pixel) / 255.0;
    let labels = one_hot(raw.labels.view(), CLASSES)?;

    let training = Dataset {
        images: raw.images.slice(s![..train_size, ..]).t().mapv(normalize),
        labels: labels.slice(s![.., ..train_size]).to_owned(),
    };
    let test = Dataset {
        images: raw.images.slice(s![train_size.., ..]).t().mapv(normalize),
        labels: labels.slice(s![.., train_size..]).to_owned(),
    };

    Ok(MnistData {
        training: training.shuffled(rng),
        test,
    })
}

// Print a simple ASCII representation of one image column and the digit its one-hot label encodes.
pub fn visualize(image: ArrayView1<f64>, label: ArrayView1<f64>) {
    for row in &image.iter().chunks(IMAGE_COLUMNS) {
        let line = row
            .map(|&intensity| match intensity {
                a if a < 0.2 => ' ',
                a if a < 0.4 => '░',
                a if a < 0.6 => '▒',
                a if a < 0.8 => '▓',
                _ => '█',
            })
            .collect::<String>();
        println!("{line}");
    }

    if let Some(digit) = label.iter().position(|&value| value == 1.0) {
        println!("Digit: {digit}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{Compression, write::GzEncoder};
    use ndarray::array;
    use ndarray_rand::rand::{SeedableRng, rngs::StdRng};
    use std::io::Write;

    struct InMemory(RawDataset);

    impl DatasetProvider for InMemory {
        fn fetch(&self) -> Result<RawDataset> {
            Ok(self.0.clone())
        }
    }

    struct Unreachable;

    impl DatasetProvider for Unreachable {
        fn fetch(&self) -> Result<RawDataset> {
            anyhow::bail!("network unavailable")
        }
    }

    fn idx_images(count: u32, pixels: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for field in [IMAGE_MAGIC, count, IMAGE_ROWS as u32, IMAGE_COLUMNS as u32] {
            bytes.extend(field.to_be_bytes());
        }
        bytes.extend_from_slice(pixels);
        bytes
    }

    fn idx_labels(labels: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend(LABEL_MAGIC.to_be_bytes());
        bytes.extend((labels.len() as u32).to_be_bytes());
        bytes.extend_from_slice(labels);
        bytes
    }

    // Every image is filled with a single value equal to (its index * 10), so the position of each
    // example is recoverable after shuffling.
    fn raw_dataset(examples: usize) -> RawDataset {
        RawDataset {
            images: Array2::from_shape_fn((examples, PIXELS), |(i, _)| (i * 10) as u8),
            labels: Array1::from_shape_fn(examples, |i| (i % CLASSES) as u8),
        }
    }

    #[test]
    fn parses_matching_idx_pair() {
        let pixels = (0..2 * PIXELS).map(|i| (i % 256) as u8).collect::<Vec<_>>();
        let (images, labels) = parse_idx(idx_images(2, &pixels), idx_labels(&[7, 3])).unwrap();
        assert_eq!(images, pixels);
        assert_eq!(labels, vec![7, 3]);
    }

    #[test]
    fn rejects_wrong_magic_number() {
        let mut images = idx_images(1, &[0; PIXELS]);
        images[3] = 0x01;
        assert!(parse_idx(images, idx_labels(&[1])).is_err());

        let mut labels = idx_labels(&[1]);
        labels[3] = 0x03;
        assert!(parse_idx(idx_images(1, &[0; PIXELS]), labels).is_err());
    }

    #[test]
    fn rejects_count_mismatch() {
        let images = idx_images(2, &[0; 2 * PIXELS]);
        assert!(parse_idx(images, idx_labels(&[1])).is_err());

        let truncated = idx_images(2, &[0; PIXELS]);
        assert!(parse_idx(truncated, idx_labels(&[1, 2])).is_err());

        assert!(parse_idx(vec![0, 0, 8], idx_labels(&[1])).is_err());
    }

    #[test]
    fn reads_gzip_directory_train_then_test() {
        let dir = std::env::temp_dir().join(format!("digit-mlp-idx-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let write_gz = |name: &str, bytes: Vec<u8>| {
            let file = File::create(dir.join(name)).unwrap();
            let mut encoder = GzEncoder::new(file, Compression::default());
            encoder.write_all(&bytes).unwrap();
            encoder.finish().unwrap();
        };
        write_gz("train-images-idx3-ubyte.gz", idx_images(2, &[1; 2 * PIXELS]));
        write_gz("train-labels-idx1-ubyte.gz", idx_labels(&[4, 5]));
        write_gz("t10k-images-idx3-ubyte.gz", idx_images(1, &[2; PIXELS]));
        write_gz("t10k-labels-idx1-ubyte.gz", idx_labels(&[6]));

        let raw = IdxDirectory::new(&dir).fetch().unwrap();
        std::fs::remove_dir_all(&dir).unwrap();

        assert_eq!(raw.images.dim(), (3, PIXELS));
        assert_eq!(raw.labels, array![4u8, 5, 6]);
        assert!(raw.images.row(1).iter().all(|&p| p == 1));
        assert!(raw.images.row(2).iter().all(|&p| p == 2));
    }

    #[test]
    fn missing_directory_is_an_error() {
        let provider = IdxDirectory::new("/nonexistent/mnist");
        assert!(provider.fetch().is_err());
    }

    #[test]
    fn one_hot_columns_sum_to_one() {
        let encoded = one_hot(array![3, 0, 9, 3].view(), CLASSES).unwrap();
        assert_eq!(encoded.dim(), (CLASSES, 4));
        for column in encoded.columns() {
            assert!(column.iter().all(|&v| v == 0.0 || v == 1.0));
            assert_eq!(column.sum(), 1.0);
        }
        assert_eq!(encoded[[3, 0]], 1.0);
        assert_eq!(encoded[[0, 1]], 1.0);
        assert_eq!(encoded[[9, 2]], 1.0);
    }

    #[test]
    fn one_hot_rejects_out_of_range_label() {
        assert!(one_hot(array![1, 10].view(), CLASSES).is_err());
    }

    #[test]
    fn permutation_covers_every_index_once() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut order = permutation(500, &mut rng);
        assert_ne!(order, (0..500).collect::<Vec<_>>());
        order.sort_unstable();
        assert_eq!(order, (0..500).collect::<Vec<_>>());
    }

    #[test]
    fn load_splits_normalizes_and_shuffles() {
        let mut rng = StdRng::seed_from_u64(3);
        let data = load(&InMemory(raw_dataset(20)), 15, &mut rng).unwrap();

        assert_eq!(data.training.images.dim(), (PIXELS, 15));
        assert_eq!(data.training.labels.dim(), (CLASSES, 15));
        assert_eq!(data.test.images.dim(), (PIXELS, 5));
        assert_eq!(data.test.labels.dim(), (CLASSES, 5));
        assert!(data.training.images.iter().all(|&p| (0.0..=1.0).contains(&p)));

        // Test set keeps the provider's order.
        for (column, original) in (15..20).enumerate() {
            assert_eq!(data.test.images[[0, column]], (original * 10) as f64 / 255.0);
            assert_eq!(data.test.labels[[original % CLASSES, column]], 1.0);
        }

        // Training set is a permutation of the first 15 examples with labels still aligned.
        let mut seen = Vec::new();
        for column in 0..15 {
            let original = (data.training.images[[0, column]] * 255.0 / 10.0).round() as usize;
            assert_eq!(data.training.labels[[original % CLASSES, column]], 1.0);
            seen.push(original);
        }
        assert_ne!(seen, (0..15).collect::<Vec<_>>());
        seen.sort_unstable();
        assert_eq!(seen, (0..15).collect::<Vec<_>>());
    }

    #[test]
    fn load_propagates_fetch_failure() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(load(&Unreachable, 10, &mut rng).is_err());
    }

    #[test]
    fn load_rejects_oversized_training_split() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(load(&InMemory(raw_dataset(4)), 5, &mut rng).is_err());
    }

    #[test]
    fn columns_gathers_in_requested_order() {
        let dataset = Dataset {
            images: array![[1.0, 2.0, 3.0]],
            labels: array![[1.0, 0.0, 1.0], [0.0, 1.0, 0.0]],
        };
        let gathered = dataset.columns(&[2, 0]);
        assert_eq!(gathered.images, array![[3.0, 1.0]]);
        assert_eq!(gathered.labels, array![[1.0, 1.0], [0.0, 0.0]]);
    }
}
