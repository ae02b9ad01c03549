//! Reading and writing problems and solver configurations.
//!
//! The text format is line based:
//!
//! ```text
//! 3                     # dimension
//! 2                     # number of contacts
//! dense                 # or sparse_block
//! 6 6                   # rows and columns
//! 1 0 0 ...             # values in column-major order
//! -1 0 0 -1 0.6 0       # q
//! 0.5 0.5               # μ
//! ```
//!
//! A sparse block matrix is written as its block counts, the row and column block sizes, then
//! one line `i j` per block followed by a line with the block values in column-major order.
//! Empty sequences, such as `q` of a problem without contacts, take no line.
//! Text after `#` is ignored. Floats are written with the shortest representation that reads
//! back to the same value.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use crate::matrix::{DenseMatrix, Matrix, NumericsMatrix, SparseBlockMatrix};
use crate::options::SolverOptions;
use crate::problem::FrictionContactProblem;
use crate::Error;

const DENSE_TAG: &str = "dense";
const SPARSE_BLOCK_TAG: &str = "sparse_block";

#[derive(thiserror::Error, Debug)]
pub enum LoadConfigError {
    #[error("IO")]
    IO(#[from] std::io::Error),
    #[error("Parse")]
    Parse(#[from] ron::error::SpannedError),
}

/// Loads solver options from a RON file.
pub fn load_solver_options(path: impl AsRef<Path>) -> Result<SolverOptions, LoadConfigError> {
    let f = File::open(path.as_ref())?;
    Ok(ron::de::from_reader(f)?)
}

/// Parses solver options from a RON string.
pub fn parse_solver_options(s: &str) -> Result<SolverOptions, Error> {
    Ok(ron::from_str(s)?)
}

/// Writes one line of values. Empty sequences take no line.
fn write_values<W: Write>(w: &mut W, values: impl IntoIterator<Item = f64>) -> Result<(), Error> {
    let line = values
        .into_iter()
        .map(|v| format!("{:?}", v))
        .collect::<Vec<_>>()
        .join(" ");
    if !line.is_empty() {
        writeln!(w, "{}", line)?;
    }
    Ok(())
}

/// Writes a problem in the text format.
pub fn write_problem<W: Write>(problem: &FrictionContactProblem, mut w: W) -> Result<(), Error> {
    writeln!(w, "{}", problem.dimension())?;
    writeln!(w, "{}", problem.number_of_contacts())?;
    match problem.m() {
        Matrix::Dense(m) => {
            writeln!(w, "{}", DENSE_TAG)?;
            writeln!(w, "{} {}", m.num_rows(), m.num_cols())?;
            write_values(&mut w, m.data().iter().cloned())?;
        }
        Matrix::SparseBlock(m) => {
            writeln!(w, "{}", SPARSE_BLOCK_TAG)?;
            writeln!(
                w,
                "{} {} {}",
                m.num_block_rows(),
                m.num_block_cols(),
                m.num_blocks()
            )?;
            let sizes = |offsets: &[usize]| {
                offsets
                    .windows(2)
                    .map(|o| (o[1] - o[0]).to_string())
                    .collect::<Vec<_>>()
                    .join(" ")
            };
            for line in [sizes(m.row_offsets()), sizes(m.col_offsets())].iter() {
                if !line.is_empty() {
                    writeln!(w, "{}", line)?;
                }
            }
            for (i, j, block) in m.iter_blocks() {
                writeln!(w, "{} {}", i, j)?;
                write_values(&mut w, block.iter().cloned())?;
            }
        }
    }
    write_values(&mut w, problem.q().iter().cloned())?;
    write_values(&mut w, problem.mu().iter().cloned())?;
    Ok(())
}

/// Line reader that tracks line numbers and skips blank lines and comments.
struct Lines<R> {
    reader: R,
    line: usize,
    buf: String,
}

impl<R: BufRead> Lines<R> {
    fn new(reader: R) -> Self {
        Lines {
            reader,
            line: 0,
            buf: String::new(),
        }
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::Parse {
            line: self.line,
            message: message.into(),
        }
    }

    fn next_line(&mut self) -> Result<String, Error> {
        loop {
            self.buf.clear();
            if self.reader.read_line(&mut self.buf)? == 0 {
                return Err(self.error("unexpected end of file"));
            }
            self.line += 1;
            let content = self.buf.split('#').next().unwrap_or("").trim();
            if !content.is_empty() {
                return Ok(content.to_string());
            }
        }
    }

    fn values<T: FromStr>(&mut self) -> Result<Vec<T>, Error> {
        let line = self.next_line()?;
        line.split_whitespace()
            .map(|tok| {
                tok.parse::<T>()
                    .map_err(|_| self.error(format!("cannot parse {:?}", tok)))
            })
            .collect()
    }

    /// Reads a line of exactly `n` values. Nothing is read when `n` is zero.
    fn values_exact<T: FromStr>(&mut self, n: usize, what: &str) -> Result<Vec<T>, Error> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let values = self.values()?;
        if values.len() != n {
            return Err(self.error(format!(
                "expected {} values for {}, found {}",
                n,
                what,
                values.len()
            )));
        }
        Ok(values)
    }

    fn value<T: FromStr>(&mut self, what: &str) -> Result<T, Error> {
        Ok(self.values_exact::<T>(1, what)?.remove(0))
    }

    fn product(&self, a: usize, b: usize, what: &str) -> Result<usize, Error> {
        a.checked_mul(b)
            .ok_or_else(|| self.error(format!("{} overflows: {} x {}", what, a, b)))
    }
}

/// Upper bound on capacity reserved from counts read from a file.
const MAX_PREALLOCATED_BLOCKS: usize = 1024;

fn read_sparse_block<R: BufRead>(lines: &mut Lines<R>) -> Result<SparseBlockMatrix, Error> {
    let counts = lines.values_exact::<usize>(3, "block counts")?;
    let (nbr, nbc, nblocks) = (counts[0], counts[1], counts[2]);
    let row_sizes = lines.values_exact::<usize>(nbr, "row block sizes")?;
    let col_sizes = lines.values_exact::<usize>(nbc, "column block sizes")?;

    let mut blocks = Vec::with_capacity(nblocks.min(MAX_PREALLOCATED_BLOCKS));
    for _ in 0..nblocks {
        let pos = lines.values_exact::<usize>(2, "block position")?;
        let (i, j) = (pos[0], pos[1]);
        if i >= nbr || j >= nbc {
            return Err(lines.error(format!("block ({}, {}) out of range", i, j)));
        }
        let (nr, nc) = (row_sizes[i], col_sizes[j]);
        let len = lines.product(nr, nc, "block size")?;
        let values = lines.values_exact::<f64>(len, "block values")?;
        blocks.push((i, j, na::DMatrix::from_column_slice(nr, nc, &values)));
    }
    SparseBlockMatrix::from_blocks(&row_sizes, &col_sizes, blocks)
}

/// Reads a problem written by [`write_problem`].
pub fn read_problem<R: BufRead>(reader: R) -> Result<FrictionContactProblem, Error> {
    let mut lines = Lines::new(reader);
    let dimension = lines.value::<usize>("dimension")?;
    let nc = lines.value::<usize>("number of contacts")?;

    let tag = lines.next_line()?;
    let m: Matrix = match tag.as_str() {
        DENSE_TAG => {
            let shape = lines.values_exact::<usize>(2, "matrix shape")?;
            let len = lines.product(shape[0], shape[1], "matrix size")?;
            let values = lines.values_exact::<f64>(len, "matrix values")?;
            DenseMatrix::from_column_slice(shape[0], shape[1], &values).into()
        }
        SPARSE_BLOCK_TAG => read_sparse_block(&mut lines)?.into(),
        other => return Err(lines.error(format!("unknown storage {:?}", other))),
    };

    let n = lines.product(dimension, nc, "problem size")?;
    let q = lines.values_exact::<f64>(n, "q")?;
    let mu = lines.values_exact::<f64>(nc, "mu")?;
    FrictionContactProblem::new(dimension, nc, m, q, mu)
}

/// Writes a problem to a text file.
pub fn save_problem(problem: &FrictionContactProblem, path: impl AsRef<Path>) -> Result<(), Error> {
    let mut w = BufWriter::new(File::create(path.as_ref())?);
    write_problem(problem, &mut w)?;
    w.flush()?;
    Ok(())
}

/// Reads a problem from a text file.
pub fn load_problem(path: impl AsRef<Path>) -> Result<FrictionContactProblem, Error> {
    read_problem(BufReader::new(File::open(path.as_ref())?))
}

/// Saves a binary snapshot of the problem using `bincode`.
pub fn save_problem_snapshot(
    problem: &FrictionContactProblem,
    path: impl AsRef<Path>,
) -> Result<(), Error> {
    let mut w = BufWriter::new(File::create(path.as_ref())?);
    bincode::serialize_into(&mut w, problem)?;
    w.flush()?;
    Ok(())
}

/// Loads a binary snapshot written by [`save_problem_snapshot`].
pub fn load_problem_snapshot(path: impl AsRef<Path>) -> Result<FrictionContactProblem, Error> {
    let f = BufReader::new(File::open(path.as_ref())?);
    let problem: FrictionContactProblem = bincode::deserialize_from(f)?;
    problem.validate()?;
    Ok(problem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_the_offending_line() {
        let text = "3\n1\n# comment\ndense\n3 3\n1 0 0 0 1 0 0 0 1\n-1 x 0\n0.5\n";
        match read_problem(text.as_bytes()) {
            Err(Error::Parse { line, .. }) => assert_eq!(line, 7),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn rejects_unknown_storage() {
        let text = "3\n1\ncsr\n";
        assert!(matches!(
            read_problem(text.as_bytes()),
            Err(Error::Parse { line: 3, .. })
        ));
    }

    #[test]
    fn truncated_input() {
        let text = "3\n1\ndense\n3 3\n1 0 0 0 1 0 0 0 1\n";
        assert!(matches!(
            read_problem(text.as_bytes()),
            Err(Error::Parse { .. })
        ));
    }

    #[test]
    fn oversized_counts_are_parse_errors() {
        let text = "3\n1\ndense\n4294967296 4294967296\n1 0 0\n";
        assert!(matches!(
            read_problem(text.as_bytes()),
            Err(Error::Parse { line: 4, .. })
        ));

        let text = "3\n18446744073709551615\ndense\n3 3\n1 0 0 0 1 0 0 0 1\n";
        assert!(matches!(
            read_problem(text.as_bytes()),
            Err(Error::Parse { .. })
        ));

        // A huge block count fails on the first missing block, not on allocation.
        let text = "3\n1\nsparse_block\n1 1 18446744073709551615\n3\n3\n";
        assert!(matches!(
            read_problem(text.as_bytes()),
            Err(Error::Parse { .. })
        ));
    }

    #[test]
    fn empty_problem_takes_no_value_lines() -> Result<(), Error> {
        let problem =
            FrictionContactProblem::new(3, 0, DenseMatrix::from_column_slice(0, 0, &[]), vec![], vec![])?;
        let mut text = Vec::new();
        write_problem(&problem, &mut text)?;
        assert_eq!(String::from_utf8_lossy(&text), "3\n0\ndense\n0 0\n");
        let read = read_problem(text.as_slice())?;
        assert_eq!(read.number_of_contacts(), 0);
        assert!(read.q().is_empty());
        Ok(())
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() -> Result<(), Error> {
        let text = "3 # dim\n\n1\ndense\n3 3\n2 0 0 0 2 0 0 0 2\n-1 0.5 0\n0.3\n";
        let problem = read_problem(text.as_bytes())?;
        assert_eq!(problem.q(), &[-1.0, 0.5, 0.0]);
        assert_eq!(problem.mu(), &[0.3]);
        Ok(())
    }
}
