use csv::ReaderBuilder;
use ndarray::{Array2, ArrayView1, ArrayView2};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{Error, Result};

/// Immutable n x d matrix of finite samples shared by every run of a clustering job.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleMatrix {
    data: Array2<f64>,
    headers: Option<Vec<String>>,
}

impl SampleMatrix {
    /// Wrap a matrix, rejecting empty input and non-finite values.
    pub fn new(data: Array2<f64>) -> Result<Self> {
        if data.nrows() == 0 || data.ncols() == 0 {
            return Err(Error::EmptyInput);
        }
        if let Some(((row, col), _)) = data.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(Error::NonFinite { row, col });
        }
        Ok(Self {
            data,
            headers: None,
        })
    }

    /// Build a matrix from row vectors; all rows must have the same length.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let ncols = rows.first().map(Vec::len).ok_or(Error::EmptyInput)?;
        let mut flat = Vec::with_capacity(rows.len() * ncols);
        for (row, values) in rows.iter().enumerate() {
            if values.len() != ncols {
                return Err(Error::DimensionMismatch {
                    row,
                    expected: ncols,
                    found: values.len(),
                });
            }
            flat.extend_from_slice(values);
        }
        let data = Array2::from_shape_vec((rows.len(), ncols), flat)
            .map_err(|e| Error::invalid("rows", e.to_string()))?;
        Self::new(data)
    }

    /// Attach column names.
    pub fn with_headers(mut self, headers: Vec<String>) -> Result<Self> {
        if headers.len() != self.n_features() {
            return Err(Error::DimensionMismatch {
                row: 0,
                expected: self.n_features(),
                found: headers.len(),
            });
        }
        self.headers = Some(headers);
        Ok(self)
    }

    /// Read a TSV file with a header line.
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_path(path, b'\t')
    }

    /// Read a CSV file with a header line.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_path(path, b',')
    }

    fn from_path<P: AsRef<Path>>(path: P, delimiter: u8) -> Result<Self> {
        let file = File::open(&path)?;
        Self::from_reader(file, delimiter)
    }

    /// Parse delimited text with a header line naming every column; every other cell must be a number.
    pub fn from_reader<R: Read>(reader: R, delimiter: u8) -> Result<Self> {
        let mut rdr = ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers: Vec<String> = rdr.headers()?.iter().map(|s| s.to_string()).collect();

        let mut records: Vec<Vec<f64>> = Vec::new();
        for (row, result) in rdr.records().enumerate() {
            let record = result?;
            let values = record
                .iter()
                .enumerate()
                .map(|(col, x)| {
                    x.parse::<f64>().map_err(|_| Error::Parse {
                        row,
                        col,
                        value: x.to_string(),
                    })
                })
                .collect::<Result<Vec<f64>>>()?;
            records.push(values);
        }

        Self::from_rows(&records)?.with_headers(headers)
    }

    pub fn n_samples(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.data.ncols()
    }

    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    pub fn row(&self, i: usize) -> ArrayView1<'_, f64> {
        self.data.row(i)
    }

    pub fn headers(&self) -> Option<&[String]> {
        self.headers.as_deref()
    }
}

/// Squared Euclidean distance between two points of equal dimension.
#[inline]
pub(crate) fn squared_distance(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

#[inline]
pub(crate) fn distance(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    squared_distance(a, b).sqrt()
}
