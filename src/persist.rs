//! JSON persistence for model parameters.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Writes `model` to `path` as JSON, replacing any existing file.
pub fn save<P, T>(path: P, model: &T) -> Result<()>
where
    P: AsRef<Path>,
    T: Serialize + ?Sized,
{
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, model)?;
    writer.flush()?;
    Ok(())
}

/// Reads a model written by `save`.
pub fn load<P, T>(path: P) -> Result<T>
where
    P: AsRef<Path>,
    T: DeserializeOwned,
{
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::mlp::Network;

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result: Result<Network> = load(dir.path().join("absent.json"));
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn malformed_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"{\"layers\": [1, 2").unwrap();
        let result: Result<Network> = load(file.path());
        assert!(matches!(result, Err(Error::Serialization(_))));
    }

    #[test]
    fn unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("model.json");
        let result = save(path, &Network::new(&[2, 1]));
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
