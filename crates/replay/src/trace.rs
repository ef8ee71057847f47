//! JSON-lines notification traces.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use thiserror::Error;
use umbra_runtime::RawNotification;

#[derive(Debug, Error)]
pub enum TraceError {
	#[error("I/O error reading {path}: {error}")]
	Io {
		path: PathBuf,
		#[source]
		error: std::io::Error,
	},
	#[error("{path}:{line}: {error}")]
	Parse {
		path: PathBuf,
		line: usize,
		#[source]
		error: serde_json::Error,
	},
}

/// Reads one [`RawNotification`] per non-blank line.
pub struct TraceReader<R> {
	path: PathBuf,
	lines: Lines<R>,
	line: usize,
}

impl TraceReader<BufReader<File>> {
	pub fn open(path: impl AsRef<Path>) -> Result<Self, TraceError> {
		let path = path.as_ref().to_path_buf();
		let file = File::open(&path).map_err(|error| TraceError::Io { path: path.clone(), error })?;
		Ok(Self::new(path, BufReader::new(file)))
	}
}

impl<R: BufRead> TraceReader<R> {
	pub fn new(path: PathBuf, reader: R) -> Self {
		Self {
			path,
			lines: reader.lines(),
			line: 0,
		}
	}
}

impl<R: BufRead> Iterator for TraceReader<R> {
	type Item = Result<RawNotification, TraceError>;

	fn next(&mut self) -> Option<Self::Item> {
		loop {
			let line = match self.lines.next()? {
				Ok(line) => line,
				Err(error) => return Some(Err(TraceError::Io { path: self.path.clone(), error })),
			};
			self.line += 1;
			let line = line.trim();
			if line.is_empty() || line.starts_with('#') {
				continue;
			}
			return Some(serde_json::from_str(line).map_err(|error| TraceError::Parse {
				path: self.path.clone(),
				line: self.line,
				error,
			}));
		}
	}
}
