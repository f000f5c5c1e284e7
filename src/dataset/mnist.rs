//! Reading and preparing the [MNIST](http://yann.lecun.com/exdb/mnist/)
//! handwritten digit database.
//!
//! Both files use the IDX format: a big-endian header of 32-bit integers
//! followed by raw unsigned bytes.

use std::io::{self, Read};

use byteorder::{BigEndian, ReadBytesExt};
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{Error, Result};

const LABEL_MAGIC: u32 = 0x0000_0801;
const IMAGE_MAGIC: u32 = 0x0000_0803;

/// Number of intensity levels above zero a pixel may take.
pub const PIXEL_RANGE: f64 = 255.0;

/// Tiny offset that keeps inputs and soft targets away from exact zero.
pub const NOISE: f64 = 1.0e-21;

/// Target value of the correct class in a soft one-hot row.
pub const TARGET_ON: f64 = 0.99;

/// A set of equally sized greyscale images, one flattened image per row.
#[derive(Clone, Debug, PartialEq)]
pub struct Images {
    pub pixels: Array2<u8>,
    pub width: usize,
    pub height: usize,
}

impl Images {
    pub fn len(&self) -> usize {
        self.pixels.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.nrows() == 0
    }
}

fn read_header<R: Read>(reader: &mut R, magic: u32, what: &str) -> Result<usize> {
    let found = reader.read_u32::<BigEndian>()?;
    if found != magic {
        return Err(Error::Dataset(format!(
            "bad {} magic number {:#010x}, expected {:#010x}",
            what, found, magic
        )));
    }
    Ok(reader.read_u32::<BigEndian>()? as usize)
}

/// Reads exactly `len` bytes without trusting `len` for the allocation.
fn read_body<R: Read>(reader: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    reader.take(len as u64).read_to_end(&mut body)?;
    if body.len() != len {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("expected {} bytes, found {}", len, body.len()),
        )));
    }
    Ok(body)
}

/// Reads an IDX label file.
pub fn read_labels<R: Read>(mut reader: R) -> Result<Vec<u8>> {
    let count = read_header(&mut reader, LABEL_MAGIC, "label file")?;
    read_body(&mut reader, count)
}

/// Reads an IDX image file.
pub fn read_images<R: Read>(mut reader: R) -> Result<Images> {
    let count = read_header(&mut reader, IMAGE_MAGIC, "image file")?;
    let height = reader.read_u32::<BigEndian>()? as usize;
    let width = reader.read_u32::<BigEndian>()? as usize;
    let len = count
        .checked_mul(width)
        .and_then(|n| n.checked_mul(height))
        .ok_or_else(|| {
            Error::Dataset(format!(
                "{} images of {}x{} pixels overflow the address space",
                count, width, height
            ))
        })?;
    let buffer = read_body(&mut reader, len)?;
    let pixels = Array2::from_shape_vec((count, width * height), buffer)
        .map_err(|e| Error::Dataset(e.to_string()))?;
    Ok(Images {
        pixels,
        width,
        height,
    })
}

/// Converts raw pixels into a floating point data matrix.
pub fn prepare_inputs(images: &Images) -> Array2<f64> {
    images.pixels.mapv(f64::from)
}

/// Scales pixel intensities into (0, 1].
pub fn normalize_pixels(x: ArrayView2<f64>) -> Array2<f64> {
    x.mapv(|px| px / PIXEL_RANGE + NOISE)
}

/// Standardizes every column to zero mean and unit deviation, clipping the
/// result to [-1, 1]. Constant columns become 0.
pub fn standardize(x: ArrayView2<f64>) -> Array2<f64> {
    let mut result = x.to_owned();
    for mut column in result.axis_iter_mut(Axis(1)) {
        let n = column.len() as f64;
        let mean = column.sum() / n;
        let dev = (column.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n).sqrt();
        column.mapv_inplace(|v| {
            if dev == 0.0 {
                0.0
            } else {
                ((v - mean) / dev).clamp(-1.0, 1.0)
            }
        });
    }
    result
}

/// Keeps every `order`-th pixel along both axes of each `width x height`
/// image row of `x`.
pub fn down_sample(
    x: ArrayView2<f64>,
    width: usize,
    height: usize,
    order: usize,
) -> Array2<f64> {
    assert!(order > 0, "down sampling order must be positive");
    assert_eq!(x.ncols(), width * height);
    let (w, h) = (width / order, height / order);
    let mut result = Array2::zeros((x.nrows(), w * h));
    for (image, mut out) in x.outer_iter().zip(result.outer_iter_mut()) {
        for r in 0..h {
            for c in 0..w {
                out[r * w + c] = image[r * order * width + c * order];
            }
        }
    }
    result
}

/// Builds soft one-hot targets: `TARGET_ON` at the label, `NOISE` elsewhere.
///
/// Fails if a label is not below `num_classes`.
pub fn prepare_targets(labels: &[u8], num_classes: usize) -> Result<Array2<f64>> {
    let mut targets = Array2::from_elem((labels.len(), num_classes), NOISE);
    for (mut row, &label) in targets.outer_iter_mut().zip(labels) {
        let class = label as usize;
        if class >= num_classes {
            return Err(Error::Dataset(format!(
                "label {} out of range for {} classes",
                label, num_classes
            )));
        }
        row[class] = TARGET_ON;
    }
    Ok(targets)
}

/// Renders one image as ASCII art, `#` for bright pixels.
pub fn image_string(pixels: ArrayView1<u8>, width: usize, height: usize) -> String {
    let mut out = String::with_capacity((width + 1) * height);
    if width == 0 {
        return out;
    }
    for row in pixels.as_slice().unwrap_or(&[]).chunks(width).take(height) {
        out.extend(row.iter().map(|&p| if p > 128 { '#' } else { ' ' }));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use byteorder::WriteBytesExt;
    use ndarray::{arr1, arr2};
    use std::io::Cursor;

    fn idx(header: &[u32], body: &[u8]) -> Cursor<Vec<u8>> {
        let mut bytes = Vec::new();
        for &h in header {
            bytes.write_u32::<BigEndian>(h).unwrap();
        }
        bytes.extend_from_slice(body);
        Cursor::new(bytes)
    }

    #[test]
    fn labels() {
        let labels = read_labels(idx(&[LABEL_MAGIC, 3], &[7, 0, 9])).unwrap();
        assert_eq!(labels, vec![7, 0, 9]);
    }

    #[test]
    fn images() {
        let body: Vec<u8> = (0..12).collect();
        let images = read_images(idx(&[IMAGE_MAGIC, 2, 2, 3], &body)).unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!((images.width, images.height), (3, 2));
        assert_eq!(images.pixels.row(1).to_vec(), vec![6, 7, 8, 9, 10, 11]);
    }

    #[test]
    fn bad_magic() {
        match read_labels(idx(&[IMAGE_MAGIC, 1], &[1])) {
            Err(Error::Dataset(_)) => {}
            other => panic!("expected a dataset error, got {:?}", other),
        }
    }

    #[test]
    fn truncated_body() {
        match read_images(idx(&[IMAGE_MAGIC, 2, 2, 2], &[0; 5])) {
            Err(Error::Io(_)) => {}
            other => panic!("expected an io error, got {:?}", other),
        }
    }

    #[test]
    fn normalized_pixels_stay_in_unit_interval() {
        let x = normalize_pixels(arr2(&[[0.0, 255.0, 51.0]]).view());
        assert!(x[[0, 0]] > 0.0);
        assert_abs_diff_eq!(x[[0, 1]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(x[[0, 2]], 0.2, epsilon = 1e-12);
    }

    #[test]
    fn standardized_columns() {
        let x = arr2(&[[1.0, 5.0], [3.0, 5.0], [1.0, 5.0], [3.0, 5.0]]);
        let s = standardize(x.view());
        assert_eq!(s.column(0).to_vec(), vec![-1.0, 1.0, -1.0, 1.0]);
        assert!(s.column(1).iter().all(|&v| v == 0.0));

        let outlier = arr2(&[[0.0], [0.0], [0.0], [10.0]]);
        assert_eq!(standardize(outlier.view())[[3, 0]], 1.0);
    }

    #[test]
    fn down_sampling() {
        let x = Array2::from_shape_fn((1, 16), |(_, j)| j as f64);
        let d = down_sample(x.view(), 4, 4, 2);
        assert_eq!(d.row(0).to_vec(), vec![0.0, 2.0, 8.0, 10.0]);
        assert_eq!(down_sample(x.view(), 4, 4, 1), x);
    }

    #[test]
    fn soft_targets() {
        let t = prepare_targets(&[2, 0], 3).unwrap();
        assert_eq!(t.row(0).to_vec(), vec![NOISE, NOISE, TARGET_ON]);
        assert_eq!(crate::math::argmax(t.row(1)), 0);
    }

    #[test]
    fn label_out_of_range() {
        match prepare_targets(&[3, 10], 10) {
            Err(Error::Dataset(_)) => {}
            other => panic!("expected a dataset error, got {:?}", other),
        }
    }

    #[test]
    fn oversized_image_header() {
        let header = [IMAGE_MAGIC, u32::MAX, u32::MAX, u32::MAX];
        match read_images(idx(&header, &[])) {
            Err(Error::Dataset(_)) => {}
            other => panic!("expected a dataset error, got {:?}", other),
        }
    }

    #[test]
    fn label_count_larger_than_file() {
        match read_labels(idx(&[LABEL_MAGIC, u32::MAX], &[1, 2])) {
            Err(Error::Io(_)) => {}
            other => panic!("expected an io error, got {:?}", other),
        }
    }

    #[test]
    fn zero_width_preview() {
        assert_eq!(image_string(arr1(&[1u8, 2]).view(), 0, 2), "");
    }

    #[test]
    fn ascii_preview() {
        let pixels = arr1(&[0, 200, 255, 10]);
        assert_eq!(image_string(pixels.view(), 2, 2), " #\n# \n");
    }
}
