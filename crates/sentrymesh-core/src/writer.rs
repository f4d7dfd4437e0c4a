//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! `VideoWriter` and `JpegEncoder` are the small contracts spec §1 and §9
//! name as external collaborators ("the GPU image library", "the GPU JPEG
//! encoder"): the real deployment backs these with a CUDA/NVENC encoder, but
//! the recorder (§4.5) and notifier (§4.7) only ever see the trait. This
//! module supplies a CPU reference implementation of both so the rest of
//! the workspace is exercised without GPU hardware.

use crate::frame::GpuFrame;
use anyhow::{bail, Context, Result};
use image::codecs::jpeg::JpegEncoder as ImageJpegEncoder;
use image::{ColorType, RgbImage};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Encodes one frame to JPEG bytes. `quality` is 0-100.
pub trait JpegEncoder: Send {
    fn encode(&self, frame: &GpuFrame, quality: u8) -> Result<Vec<u8>>;
}

/// `image`-backed reference JPEG encoder.
#[derive(Default, Clone, Copy)]
pub struct CpuJpegEncoder;

impl JpegEncoder for CpuJpegEncoder {
    fn encode(&self, frame: &GpuFrame, quality: u8) -> Result<Vec<u8>> {
        let (w, h) = frame.size();
        let rgb = bgr_to_rgb(frame.data());
        let mut out = Vec::new();
        {
            let mut encoder = ImageJpegEncoder::new_with_quality(&mut out, quality);
            encoder
                .encode(&rgb, w, h, ColorType::Rgb8.into())
                .context("jpeg encode failed")?;
        }
        Ok(out)
    }
}

fn bgr_to_rgb(bgr: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(bgr.len());
    for px in bgr.chunks_exact(3) {
        rgb.push(px[2]);
        rgb.push(px[1]);
        rgb.push(px[0]);
    }
    rgb
}

/// Decodes JPEG bytes back to a frame, used only by tests that check
/// round-trip dimensions (spec §8).
pub fn decode_jpeg_size(bytes: &[u8]) -> Result<(u32, u32)> {
    let img = image::load_from_memory(bytes).context("jpeg decode failed")?;
    Ok((img.width(), img.height()))
}

/// Appends frames to an open recording segment (spec §4.5).
pub trait VideoWriter: Send {
    fn write_frame(&mut self, frame: &GpuFrame, timestamp_ms: u64) -> Result<()>;

    fn frame_count(&self) -> u32;

    /// Flushes and closes the segment. Consumes `self` so a writer cannot be
    /// written to again after release (spec §3.5: "closed before any
    /// video-ends hook fires").
    fn release(self: Box<Self>) -> Result<()>;
}

/// Opens a `VideoWriter` for a new segment at `path` (spec §4.5 "open a GPU
/// video writer at the frame size with configured codec/fps").
pub trait VideoWriterFactory: Send + Sync {
    fn open(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        fps: u32,
        codec: &str,
    ) -> Result<Box<dyn VideoWriter>>;
}

/// Simple length-prefixed-frame container: `SMCF1` magic, a fixed header,
/// then a stream of `(timestamp_ms: u64 LE, jpeg_len: u32 LE, jpeg bytes)`
/// records. Stands in for the fragmented-MP4 muxer a production build would
/// use (adapted in spirit from the reference fMP4 writer, simplified since
/// the real box-level muxing is delegated to the external GPU encoder).
pub struct SegmentWriter {
    file: BufWriter<File>,
    encoder: Box<dyn JpegEncoder>,
    quality: u8,
    frame_count: u32,
    path: PathBuf,
}

const MAGIC: &[u8; 5] = b"SMCF1";

impl SegmentWriter {
    pub fn create(
        path: &Path,
        width: u32,
        height: u32,
        fps: u32,
        codec: &str,
        encoder: Box<dyn JpegEncoder>,
        quality: u8,
    ) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("creating segment file {}", path.display()))?;
        let mut file = BufWriter::new(file);
        file.write_all(MAGIC)?;
        file.write_all(&width.to_le_bytes())?;
        file.write_all(&height.to_le_bytes())?;
        file.write_all(&fps.to_le_bytes())?;
        let codec_bytes = codec.as_bytes();
        file.write_all(&(codec_bytes.len() as u32).to_le_bytes())?;
        file.write_all(codec_bytes)?;
        Ok(Self {
            file,
            encoder,
            quality,
            frame_count: 0,
            path: path.to_path_buf(),
        })
    }
}

impl VideoWriter for SegmentWriter {
    fn write_frame(&mut self, frame: &GpuFrame, timestamp_ms: u64) -> Result<()> {
        let jpeg = self.encoder.encode(frame, self.quality)?;
        self.file.write_all(&timestamp_ms.to_le_bytes())?;
        self.file.write_all(&(jpeg.len() as u32).to_le_bytes())?;
        self.file.write_all(&jpeg)?;
        self.frame_count += 1;
        Ok(())
    }

    fn frame_count(&self) -> u32 {
        self.frame_count
    }

    fn release(mut self: Box<Self>) -> Result<()> {
        self.file
            .flush()
            .with_context(|| format!("flushing segment file {}", self.path.display()))?;
        Ok(())
    }
}

/// Default factory producing [`SegmentWriter`]s with a [`CpuJpegEncoder`].
#[derive(Default)]
pub struct CpuVideoWriterFactory {
    pub quality: u8,
}

impl VideoWriterFactory for CpuVideoWriterFactory {
    fn open(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        fps: u32,
        codec: &str,
    ) -> Result<Box<dyn VideoWriter>> {
        let quality = if self.quality == 0 { 90 } else { self.quality };
        let writer = SegmentWriter::create(
            path,
            width,
            height,
            fps,
            codec,
            Box::new(CpuJpegEncoder),
            quality,
        )?;
        Ok(Box::new(writer))
    }
}

/// Reads back a segment header; used by tests to assert no orphaned/
/// truncated files remain (spec §8).
pub fn read_segment_frame_count(path: &Path) -> Result<u32> {
    use std::io::Read;
    let mut file = File::open(path)?;
    let mut magic = [0u8; 5];
    file.read_exact(&mut magic)?;
    if &magic != MAGIC {
        bail!("not a sentrymesh segment file");
    }
    let mut hdr = [0u8; 12];
    file.read_exact(&mut hdr)?;
    let mut codec_len = [0u8; 4];
    file.read_exact(&mut codec_len)?;
    let codec_len = u32::from_le_bytes(codec_len) as usize;
    let mut codec = vec![0u8; codec_len];
    file.read_exact(&mut codec)?;

    let mut count = 0u32;
    loop {
        let mut ts = [0u8; 8];
        if file.read_exact(&mut ts).is_err() {
            break;
        }
        let mut len = [0u8; 4];
        file.read_exact(&mut len)?;
        let len = u32::from_le_bytes(len) as usize;
        let mut skip = vec![0u8; len];
        file.read_exact(&mut skip)?;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile_shim::NamedTempPath;

    #[test]
    fn jpeg_round_trip_preserves_dimensions() {
        let frame = GpuFrame::placeholder(16, 12);
        let bytes = CpuJpegEncoder.encode(&frame, 85).unwrap();
        let (w, h) = decode_jpeg_size(&bytes).unwrap();
        assert_eq!((w, h), (16, 12));
    }

    #[test]
    fn segment_writer_round_trips_frame_count() {
        let tmp = NamedTempPath::new("sentrymesh-segment-test");
        {
            let factory = CpuVideoWriterFactory { quality: 80 };
            let mut writer = factory.open(tmp.path(), 8, 8, 15, "mjpeg").unwrap();
            let frame = GpuFrame::placeholder(8, 8);
            for i in 0..5 {
                writer.write_frame(&frame, i * 66).unwrap();
            }
            assert_eq!(writer.frame_count(), 5);
            writer.release().unwrap();
        }
        let count = read_segment_frame_count(tmp.path()).unwrap();
        assert_eq!(count, 5);
    }

    /// Minimal local stand-in for `tempfile::NamedTempFile` so this crate's
    /// tests don't need an extra dev-dependency for one helper.
    mod tempfile_shim {
        use std::path::{Path, PathBuf};
        use std::sync::atomic::{AtomicU64, Ordering};

        static COUNTER: AtomicU64 = AtomicU64::new(0);

        pub struct NamedTempPath(PathBuf);

        impl NamedTempPath {
            pub fn new(prefix: &str) -> Self {
                let n = COUNTER.fetch_add(1, Ordering::SeqCst);
                let path = std::env::temp_dir().join(format!("{prefix}-{}-{n}", std::process::id()));
                Self(path)
            }

            pub fn path(&self) -> &Path {
                &self.0
            }
        }

        impl Drop for NamedTempPath {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.0);
            }
        }
    }
}
