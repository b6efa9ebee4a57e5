// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::{fmt, fs::File, io, io::Read, path::Path};

use sha1::{Digest, Sha1};

/// Read buffer size for digesting artifact files.
const CHUNK_SIZE: usize = 64 * 1024;

/// SHA-1 digest of a package artifact, recorded at load time so a record can
/// be tied to the exact file contents it was materialized from.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sha1Digest([u8; 20]);

impl Sha1Digest {
    pub fn into_inner(self) -> [u8; 20] {
        self.0
    }
}

impl fmt::Display for Sha1Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Sha1Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha1Digest({self})")
    }
}

/// Streams the file at `path` and returns its SHA-1 digest.
///
/// Called once per load to record artifact identity, not on a hot path.
pub(crate) fn sha1sum(path: &Path) -> io::Result<Sha1Digest> {
    let mut file = File::open(path)?;
    let mut hasher = Sha1::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(Sha1Digest(hasher.finalize().into()))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn digests_known_contents() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("artifact.src");
        let mut file = File::create(&path).unwrap();
        file.write_all(b"hello world").unwrap();

        let digest = sha1sum(&path).unwrap();
        assert_eq!(
            digest.to_string(),
            "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"
        );
    }

    #[test]
    fn digests_contents_larger_than_one_chunk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("artifact.src");
        let contents = vec![0xabu8; CHUNK_SIZE + 17];
        std::fs::write(&path, &contents).unwrap();

        let mut hasher = Sha1::new();
        hasher.update(&contents);
        let expected: [u8; 20] = hasher.finalize().into();

        assert_eq!(sha1sum(&path).unwrap().into_inner(), expected);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(sha1sum(&dir.path().join("absent.src")).is_err());
    }
}
