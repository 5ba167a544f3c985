//! Build description extraction.
//!
//! A build context may arrive as a plain Dockerfile, a tarball, or a
//! compressed tarball (gzip, bzip2, xz). The stream is sniffed once and
//! either the named member is pulled out of the archive or the whole
//! (decompressed) stream is returned as the description.

mod xz;

use std::io::{self, Cursor, Read};

use bzip2::read::BzDecoder;
use dockersource_core::error::{Result, WrapperError};
use flate2::read::MultiGzDecoder;
use tar::Archive;

pub use xz::{SubprocessFailure, XzReader};

/// Bytes buffered up front for magic-number and tar-header sniffing.
pub const PEEK_SIZE: usize = 1024;

const BZIP2_MAGIC: &[u8] = &[0x42, 0x5A, 0x68];
const GZIP_MAGIC: &[u8] = &[0x1F, 0x8B, 0x08];
const XZ_MAGIC: &[u8] = &[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00];

/// Compression applied to a context stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Bzip2,
    Gzip,
    Xz,
}

impl Compression {
    /// Detect compression from the leading bytes of a stream.
    pub fn detect(magic: &[u8]) -> Self {
        if magic.starts_with(BZIP2_MAGIC) {
            Compression::Bzip2
        } else if magic.starts_with(GZIP_MAGIC) {
            Compression::Gzip
        } else if magic.starts_with(XZ_MAGIC) {
            Compression::Xz
        } else {
            Compression::None
        }
    }
}

/// Extract the build description named `member` from `reader`.
///
/// Non-archive payloads are returned whole, whatever `member` is.
pub fn extract_description<R>(reader: R, member: &str) -> Result<Vec<u8>>
where
    R: Read + Send + 'static,
{
    let mut reader = reader;
    let magic = read_prefix(&mut reader).map_err(read_error)?;
    let compression = Compression::detect(&magic);
    tracing::debug!(compression = ?compression, "Sniffed context stream");

    let raw = Cursor::new(magic).chain(reader);
    let mut decompressed: Box<dyn Read> = match compression {
        Compression::None => Box::new(raw),
        Compression::Gzip => Box::new(MultiGzDecoder::new(raw)),
        Compression::Bzip2 => Box::new(BzDecoder::new(raw)),
        Compression::Xz => Box::new(XzReader::spawn(raw).map_err(read_error)?),
    };

    let head = read_prefix(&mut decompressed).map_err(read_error)?;
    let is_archive = looks_like_tar(&head);
    let mut stream = Cursor::new(head).chain(decompressed);

    if !is_archive {
        tracing::debug!("Context is not an archive, using stream as the description");
        let mut data = Vec::new();
        stream.read_to_end(&mut data).map_err(read_error)?;
        return Ok(data);
    }

    let wanted = member.trim_start_matches("./");
    let mut archive = Archive::new(stream);
    for entry in archive.entries().map_err(read_error)? {
        let mut entry = entry.map_err(read_error)?;
        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        if name.trim_start_matches("./") != wanted {
            continue;
        }

        tracing::debug!(member = %name, "Found description in archive");
        let mut data = Vec::new();
        entry.read_to_end(&mut data).map_err(read_error)?;
        return Ok(data);
    }

    Err(WrapperError::MemberNotFound {
        member: member.to_string(),
    })
}

/// Whether `head` starts with a valid tar header.
fn looks_like_tar(head: &[u8]) -> bool {
    let mut archive = Archive::new(head);
    match archive.entries() {
        Ok(mut entries) => matches!(entries.next(), Some(Ok(_))),
        Err(_) => false,
    }
}

/// Fill up to [`PEEK_SIZE`] bytes, stopping early only at EOF.
fn read_prefix<R: Read + ?Sized>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(PEEK_SIZE);
    reader.take(PEEK_SIZE as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

/// Map a read failure, surfacing decompressor diagnostics when present.
fn read_error(err: io::Error) -> WrapperError {
    let mut source: Option<&(dyn std::error::Error + 'static)> =
        err.get_ref().map(|e| e as &(dyn std::error::Error + 'static));
    while let Some(e) = source {
        if let Some(failure) = e.downcast_ref::<SubprocessFailure>() {
            return WrapperError::DecompressorFailed {
                program: failure.program.clone(),
                message: failure.message.clone(),
            };
        }
        source = e.source();
    }
    WrapperError::ExtractionError(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const DOCKERFILE: &[u8] = b"FROM alpine:3.19\nRUN echo hello\n";

    fn tarball(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn context_tar() -> Vec<u8> {
        tarball(&[
            ("main.go", b"package main\n"),
            ("Dockerfile", DOCKERFILE),
            ("Dockerfile.dev", b"FROM golang\n"),
        ])
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn bzip2(data: &[u8]) -> Vec<u8> {
        let mut enc = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn xz(data: &[u8]) -> Vec<u8> {
        let mut enc = xz2::write::XzEncoder::new(Vec::new(), 6);
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn xz_available() -> bool {
        std::process::Command::new("xz")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[test]
    fn test_detect_compression() {
        assert_eq!(Compression::detect(&gzip(b"x")), Compression::Gzip);
        assert_eq!(Compression::detect(&bzip2(b"x")), Compression::Bzip2);
        assert_eq!(Compression::detect(&xz(b"x")), Compression::Xz);
        assert_eq!(Compression::detect(DOCKERFILE), Compression::None);
        assert_eq!(Compression::detect(&[0x1F, 0x8B]), Compression::None);
        assert_eq!(Compression::detect(&[]), Compression::None);
    }

    #[test]
    fn test_plain_stream_returned_unchanged() {
        for member in ["Dockerfile", "other", ""] {
            let out = extract_description(Cursor::new(DOCKERFILE.to_vec()), member).unwrap();
            assert_eq!(out, DOCKERFILE);
        }
    }

    #[test]
    fn test_plain_stream_longer_than_peek() {
        let mut data = Vec::new();
        for i in 0..200 {
            data.extend_from_slice(format!("RUN echo line {}\n", i).as_bytes());
        }
        assert!(data.len() > PEEK_SIZE);
        let out = extract_description(Cursor::new(data.clone()), "Dockerfile").unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_empty_stream() {
        let out = extract_description(Cursor::new(Vec::new()), "Dockerfile").unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_tar_member() {
        let out = extract_description(Cursor::new(context_tar()), "Dockerfile").unwrap();
        assert_eq!(out, DOCKERFILE);
    }

    #[test]
    fn test_tar_member_with_dot_slash() {
        let out = extract_description(Cursor::new(context_tar()), "./Dockerfile.dev").unwrap();
        assert_eq!(out, b"FROM golang\n");
    }

    #[test]
    fn test_tar_member_not_found() {
        let err = extract_description(Cursor::new(context_tar()), "Containerfile").unwrap_err();
        assert!(matches!(err, WrapperError::MemberNotFound { member } if member == "Containerfile"));
    }

    #[test]
    fn test_tar_gz_member() {
        let out = extract_description(Cursor::new(gzip(&context_tar())), "Dockerfile").unwrap();
        assert_eq!(out, DOCKERFILE);
    }

    #[test]
    fn test_tar_bz2_member() {
        let out = extract_description(Cursor::new(bzip2(&context_tar())), "Dockerfile").unwrap();
        assert_eq!(out, DOCKERFILE);
    }

    #[test]
    fn test_tar_xz_member() {
        if !xz_available() {
            eprintln!("xz not installed, skipping");
            return;
        }
        let out = extract_description(Cursor::new(xz(&context_tar())), "Dockerfile").unwrap();
        assert_eq!(out, DOCKERFILE);
    }

    #[test]
    fn test_gzip_plain_description() {
        let out = extract_description(Cursor::new(gzip(DOCKERFILE)), "Dockerfile").unwrap();
        assert_eq!(out, DOCKERFILE);
    }

    #[test]
    fn test_corrupt_xz_surfaces_diagnostic() {
        if !xz_available() {
            eprintln!("xz not installed, skipping");
            return;
        }
        let mut data = XZ_MAGIC.to_vec();
        data.extend_from_slice(b"this is definitely not an xz stream");
        let err = extract_description(Cursor::new(data), "Dockerfile").unwrap_err();
        match err {
            WrapperError::DecompressorFailed { program, message } => {
                assert_eq!(program, "xz");
                assert!(!message.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_corrupt_gzip_is_extraction_error() {
        let mut data = GZIP_MAGIC.to_vec();
        data.extend_from_slice(&[0u8; 64]);
        let err = extract_description(Cursor::new(data), "Dockerfile").unwrap_err();
        assert!(matches!(err, WrapperError::ExtractionError(_)));
    }
}
