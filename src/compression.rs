use std::{io::Read, path::Path};

use flate2::read::GzDecoder;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Compression {
    #[default]
    None,
    Gzip,
}

impl Compression {
    pub fn decompress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        match *self {
            Compression::None => Ok(data.to_vec()),
            Compression::Gzip => {
                if !data.starts_with(&GZIP_MAGIC) {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "missing gzip header",
                    ));
                }
                let mut decoder = GzDecoder::new(data);
                let mut out = Vec::new();
                decoder.read_to_end(&mut out)?;
                Ok(out)
            }
        }
    }

    pub fn from_extension(ext: &str) -> Compression {
        match ext {
            "gz" | "gzip" => Compression::Gzip,
            _ => Compression::None,
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Compression {
        path.as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .map(Compression::from_extension)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{write::GzEncoder, Compression as Level};
    use std::io::Write;

    #[test]
    fn detects_gzip_by_extension() {
        assert_eq!(Compression::from_path("./mnist.pkl.gz"), Compression::Gzip);
        assert_eq!(Compression::from_path("./mnist.pkl"), Compression::None);
        assert_eq!(Compression::from_path("mnist"), Compression::None);
    }

    #[test]
    fn gzip_decompresses_what_flate2_wrote() {
        let mut encoder = GzEncoder::new(Vec::new(), Level::default());
        encoder.write_all(b"\x80\x02N.").unwrap();
        let packed = encoder.finish().unwrap();

        let out = Compression::Gzip.decompress(&packed).unwrap();
        assert_eq!(out, b"\x80\x02N.");
    }

    #[test]
    fn gzip_rejects_plain_bytes() {
        let err = Compression::Gzip.decompress(b"\x80\x02N.").unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}
