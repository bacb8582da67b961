//! Content digests in `sha256:<hex>` form

use sha2::{Digest, Sha256};
use std::io::Write;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

pub const SHA256: &str = "sha256";

/// Digest of an in-memory buffer
pub fn sha256_digest(data: &[u8]) -> String {
    format!("{SHA256}:{}", hex::encode(Sha256::digest(data)))
}

/// Hex digest of a string, without algorithm prefix
pub fn sha256_hex(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Split a digest into algorithm and hex part, checking the shape
pub fn parse_digest(digest: &str) -> Result<(&str, &str)> {
    let (alg, hex_part) = digest
        .split_once(':')
        .ok_or_else(|| Error::invalid("digest", format!("'{digest}' has no algorithm prefix")))?;
    if alg != SHA256 {
        return Err(Error::invalid(
            "digest",
            format!("unsupported algorithm '{alg}' in '{digest}'"),
        ));
    }
    if hex_part.len() != 64 || !hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::invalid("digest", format!("malformed digest '{digest}'")));
    }
    Ok((alg, hex_part))
}

/// Blob file name for a digest: `sha256:ab..` becomes `sha256.ab..`
pub fn digest_filename(digest: &str) -> Result<String> {
    let (alg, hex_part) = parse_digest(digest)?;
    Ok(format!("{alg}.{hex_part}"))
}

/// Writer that hashes and counts everything passing through it
pub struct DigestWriter<W> {
    inner: W,
    hasher: Sha256,
    size: u64,
}

impl<W: Write> DigestWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            size: 0,
        }
    }

    /// Consume the writer, returning the inner writer, digest and byte count
    pub fn finish(self) -> (W, String, u64) {
        let digest = format!("{SHA256}:{}", hex::encode(self.hasher.finalize()));
        (self.inner, digest, self.size)
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Stream `reader` into `writer`, returning digest and size of the content
pub async fn copy_hashed<R, W>(reader: &mut R, writer: &mut W) -> Result<(String, u64)>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut hasher = Sha256::new();
    let mut size = 0u64;
    let mut buffer = [0u8; 8192];
    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        writer.write_all(&buffer[..n]).await?;
        size += n as u64;
    }
    writer.flush().await?;
    Ok((format!("{SHA256}:{}", hex::encode(hasher.finalize())), size))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO: &str = "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_sha256_digest() {
        assert_eq!(sha256_digest(b"hello"), HELLO);
    }

    #[test]
    fn test_digest_writer() {
        let mut w = DigestWriter::new(Vec::new());
        w.write_all(b"hel").unwrap();
        w.write_all(b"lo").unwrap();
        let (inner, digest, size) = w.finish();
        assert_eq!(inner, b"hello");
        assert_eq!(digest, HELLO);
        assert_eq!(size, 5);
    }

    #[test]
    fn test_parse_digest() {
        assert_eq!(parse_digest(HELLO).unwrap().0, "sha256");
        assert!(parse_digest("sha256:abc").is_err());
        assert!(parse_digest("md5:abc").is_err());
        assert!(parse_digest("nocolon").is_err());
        assert_eq!(
            digest_filename(HELLO).unwrap(),
            format!("sha256.{}", &HELLO[7..])
        );
    }

    #[tokio::test]
    async fn test_copy_hashed() {
        let mut out = Vec::new();
        let (digest, size) = copy_hashed(&mut &b"hello"[..], &mut out).await.unwrap();
        assert_eq!(digest, HELLO);
        assert_eq!(size, 5);
        assert_eq!(out, b"hello");
    }
}
