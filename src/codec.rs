//! Payload compression as a capability boundary.
//!
//! The cache never picks a compression algorithm itself: routes that enable
//! `compress` go through whatever [`Codec`] the host application supplies.
//! [`IdentityCodec`] is the default and stores payloads untouched. A gzip
//! implementation ships behind the `compression` feature.

use bytes::Bytes;

use crate::error::GateError;

/// Compression strategy applied to cached payloads.
pub trait Codec: Send + Sync + Clone + 'static {
    fn compress(&self, data: Bytes) -> Result<Bytes, GateError>;
    fn decompress(&self, data: Bytes) -> Result<Bytes, GateError>;
}

/// Pass-through codec; the default when no compression is wanted.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityCodec;

impl Codec for IdentityCodec {
    fn compress(&self, data: Bytes) -> Result<Bytes, GateError> {
        Ok(data)
    }

    fn decompress(&self, data: Bytes) -> Result<Bytes, GateError> {
        Ok(data)
    }
}

/// Gzip codec backed by `flate2`.
#[cfg(feature = "compression")]
#[derive(Clone, Copy, Debug, Default)]
pub struct GzipCodec;

#[cfg(feature = "compression")]
impl Codec for GzipCodec {
    fn compress(&self, data: Bytes) -> Result<Bytes, GateError> {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&data)
            .map_err(|err| GateError::Codec(err.to_string()))?;
        encoder
            .finish()
            .map(Bytes::from)
            .map_err(|err| GateError::Codec(err.to_string()))
    }

    fn decompress(&self, data: Bytes) -> Result<Bytes, GateError> {
        use flate2::read::GzDecoder;
        use std::io::Read;

        let mut decoder = GzDecoder::new(&data[..]);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|err| GateError::Codec(err.to_string()))?;
        Ok(Bytes::from(out))
    }
}
