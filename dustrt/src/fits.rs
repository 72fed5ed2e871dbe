//! Minimal reader and writer for single-HDU FITS images.
//!
//! The engine only needs to exchange two-dimensional double precision
//! images with the outside world: instrument frames on output and
//! reference frames for the fit driver on input. This module implements
//! exactly that subset of the standard: a primary header with
//! `BITPIX = -64`, two axes, a linear pixel scale, and big-endian IEEE
//! doubles padded to the 2880-byte record size.

use crate::error::{Error, Result};
use ndarray::Array2;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

const RECORD: usize = 2880;
const CARD: usize = 80;

/// A two-dimensional image with its pixel scale and units. The pixel
/// values are stored with shape `(ny, nx)`, so the x axis runs fastest.
pub struct Image {
    /// Pixel values.
    pub data: Array2<f64>,
    /// Physical size of a pixel along x, in output length units.
    pub incx: f64,
    /// Physical size of a pixel along y, in output length units.
    pub incy: f64,
    /// Unit of the pixel values.
    pub bunit: String,
    /// Unit of the pixel scale.
    pub cunit: String,
}

fn card(keyword: &str, value: &str, comment: &str) -> [u8; CARD] {
    let mut bytes = [b' '; CARD];
    let text = if comment.is_empty() {
        format!("{keyword:<8}= {value:>20}")
    } else {
        format!("{keyword:<8}= {value:>20} / {comment}")
    };
    for (slot, byte) in bytes.iter_mut().zip(text.bytes()) {
        *slot = byte;
    }
    bytes
}

fn bare_card(text: &str) -> [u8; CARD] {
    let mut bytes = [b' '; CARD];
    for (slot, byte) in bytes.iter_mut().zip(text.bytes()) {
        *slot = byte;
    }
    bytes
}

impl Image {
    /// Returns the number of pixels along the x axis.
    #[must_use]
    pub fn nx(&self) -> usize {
        self.data.ncols()
    }

    /// Returns the number of pixels along the y axis.
    #[must_use]
    pub fn ny(&self) -> usize {
        self.data.nrows()
    }

    /// Writes the image to a FITS file, overwriting any existing file.
    ///
    /// # Errors
    ///
    /// Returns a resource error when the file cannot be written.
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut header = Vec::with_capacity(RECORD);
        header.extend_from_slice(&card("SIMPLE", "T", "conforms to FITS standard"));
        header.extend_from_slice(&card("BITPIX", "-64", "IEEE double precision"));
        header.extend_from_slice(&card("NAXIS", "2", ""));
        header.extend_from_slice(&card("NAXIS1", &self.nx().to_string(), ""));
        header.extend_from_slice(&card("NAXIS2", &self.ny().to_string(), ""));
        header.extend_from_slice(&card("BSCALE", "1.0", ""));
        header.extend_from_slice(&card("BZERO", "0.0", ""));
        header.extend_from_slice(&card(
            "BUNIT",
            &format!("'{}'", self.bunit),
            "unit of the pixel values",
        ));
        header.extend_from_slice(&card("CRPIX1", "1.0", ""));
        header.extend_from_slice(&card("CRVAL1", "0.0", ""));
        header.extend_from_slice(&card(
            "CDELT1",
            &format!("{:.12E}", self.incx),
            "pixel scale along x",
        ));
        header.extend_from_slice(&card("CUNIT1", &format!("'{}'", self.cunit), ""));
        header.extend_from_slice(&card("CRPIX2", "1.0", ""));
        header.extend_from_slice(&card("CRVAL2", "0.0", ""));
        header.extend_from_slice(&card(
            "CDELT2",
            &format!("{:.12E}", self.incy),
            "pixel scale along y",
        ));
        header.extend_from_slice(&card("CUNIT2", &format!("'{}'", self.cunit), ""));
        header.extend_from_slice(&bare_card("END"));
        header.resize(header.len().div_ceil(RECORD) * RECORD, b' ');

        // the x axis runs fastest, which is the iteration order of the
        // row-major (ny, nx) array
        let mut payload = Vec::with_capacity(self.data.len() * 8);
        for &value in &self.data {
            payload.extend_from_slice(&value.to_be_bytes());
        }
        payload.resize(payload.len().div_ceil(RECORD) * RECORD, 0);

        let resource_err = |err: std::io::Error| Error::Resource {
            path: path.to_owned(),
            reason: err.to_string(),
        };
        let mut file = File::create(path).map_err(resource_err)?;
        file.write_all(&header).map_err(resource_err)?;
        file.write_all(&payload).map_err(resource_err)?;
        Ok(())
    }

    /// Reads a FITS image written by [`Image::write`], or by any other
    /// program producing a plain two-dimensional double precision
    /// primary HDU.
    ///
    /// # Errors
    ///
    /// Returns a resource error when the file is missing or its format
    /// deviates from the supported subset.
    pub fn read(path: &Path) -> Result<Self> {
        let resource_err = |reason: String| Error::Resource {
            path: path.to_owned(),
            reason,
        };

        let mut bytes = Vec::new();
        File::open(path)
            .and_then(|mut file| file.read_to_end(&mut bytes))
            .map_err(|err| resource_err(err.to_string()))?;

        let mut nx = 0usize;
        let mut ny = 0usize;
        let mut incx = 0.0;
        let mut incy = 0.0;
        let mut bunit = String::new();
        let mut cunit = String::new();
        let mut data_start = 0;

        'header: for record in 0.. {
            let offset = record * RECORD;
            if offset + RECORD > bytes.len() {
                return Err(resource_err("unterminated FITS header".to_owned()));
            }
            for slot in 0..RECORD / CARD {
                let card = &bytes[offset + slot * CARD..offset + (slot + 1) * CARD];
                let text = std::str::from_utf8(card)
                    .map_err(|_| resource_err("header is not ASCII".to_owned()))?;
                let keyword = text[..8].trim_end();
                let raw = &text[10.min(text.len())..];
                // quoted string values may contain the comment separator
                let value = if let Some(stripped) = raw.trim_start().strip_prefix('\'') {
                    stripped
                        .split('\'')
                        .next()
                        .unwrap_or("")
                        .trim_end()
                        .to_owned()
                } else {
                    raw.split('/').next().unwrap_or("").trim().to_owned()
                };
                match keyword {
                    "END" => {
                        data_start = offset + RECORD;
                        break 'header;
                    }
                    "BITPIX" if value != "-64" => {
                        return Err(resource_err(format!("unsupported BITPIX {value}")));
                    }
                    "NAXIS" if value != "2" => {
                        return Err(resource_err(format!("unsupported NAXIS {value}")));
                    }
                    "NAXIS1" => {
                        nx = value
                            .parse()
                            .map_err(|_| resource_err("invalid NAXIS1".to_owned()))?;
                    }
                    "NAXIS2" => {
                        ny = value
                            .parse()
                            .map_err(|_| resource_err("invalid NAXIS2".to_owned()))?;
                    }
                    "CDELT1" => incx = value.parse().unwrap_or(0.0),
                    "CDELT2" => incy = value.parse().unwrap_or(0.0),
                    "BUNIT" => bunit = value,
                    "CUNIT1" => cunit = value,
                    _ => {}
                }
            }
        }

        if nx == 0 || ny == 0 {
            return Err(resource_err("missing image axes".to_owned()));
        }
        let npixels = nx * ny;
        if bytes.len() < data_start + npixels * 8 {
            return Err(resource_err("truncated image data".to_owned()));
        }
        let values: Vec<f64> = (0..npixels)
            .map(|index| {
                let offset = data_start + index * 8;
                f64::from_be_bytes(bytes[offset..offset + 8].try_into().expect("8 bytes"))
            })
            .collect();
        let data = Array2::from_shape_vec((ny, nx), values)
            .map_err(|_| resource_err("inconsistent image shape".to_owned()))?;

        Ok(Self {
            data,
            incx,
            incy,
            bunit,
            cunit,
        })
    }
}
