//! Compressor Implementation
//!
//! Gzip via `flate2`. The gzip container carries its own header and
//! trailer, so decompression needs no out-of-band length.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::traits::Compressor;

/// Gzip compressor, the default compression stage of the value pipeline
#[derive(Debug, Clone, Copy)]
pub struct GzipCompressor {
    level: u32,
}

impl GzipCompressor {
    /// Create a compressor with an explicit level (0 = store .. 9 = best)
    #[must_use]
    pub fn with_level(level: u32) -> Self {
        Self { level: level.min(9) }
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        // Level 6 is flate2's own default trade-off.
        Self { level: 6 }
    }
}

impl Compressor for GzipCompressor {
    fn compress(&self, input: &mut dyn Read, output: &mut dyn Write) -> std::io::Result<()> {
        let mut encoder = GzEncoder::new(output, Compression::new(self.level));
        std::io::copy(input, &mut encoder)?;
        encoder.finish()?;
        Ok(())
    }

    fn decompress(&self, input: &mut dyn Read, output: &mut dyn Write) -> std::io::Result<()> {
        let mut decoder = GzDecoder::new(input);
        std::io::copy(&mut decoder, output)?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "gzip"
    }
}
