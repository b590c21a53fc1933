//! # Video output
//!
//! Frames are written as Motion-JPEG inside a RIFF AVI container: one video stream,
//! every frame a key frame, indexed by an `idx1` chunk. Header fields that depend on
//! the number of frames are patched in [`AviWriter::finish`].

use std::fs::{self, File};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use log::{debug, info, warn};

use crate::config::{ReconstructionConfig, SUPPORTED_CODECS};
use crate::error::{FacePcaError, Result};
use crate::reconstruct::Frame;

const AVIF_HASINDEX: u32 = 0x10;
const AVIIF_KEYFRAME: u32 = 0x10;
const VIDEO_CHUNK_ID: &[u8; 4] = b"00dc";
const MAX_DIMENSION: u32 = u16::MAX as u32;
/// `dwRate / dwScale` carries the frame rate with three decimals.
const RATE_SCALE: u32 = 1000;

/// Anything that consumes reconstruction frames in order.
pub trait FrameSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoSpec {
    width: u32,
    height: u32,
    fps: f64,
    codec: [u8; 4],
    jpeg_quality: u8,
}

impl VideoSpec {
    pub fn new(width: u32, height: u32, fps: f64) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(FacePcaError::Encode(format!(
                "frame size must be non-zero, got {}x{}",
                width, height
            )));
        }
        // `strh` stores the frame rectangle as u16 and `strf` the RGB image size as u32.
        let too_large = width > MAX_DIMENSION
            || height > MAX_DIMENSION
            || width.checked_mul(height).and_then(|p| p.checked_mul(3)).is_none();
        if too_large {
            return Err(FacePcaError::Encode(format!(
                "frame size {}x{} does not fit the AVI headers",
                width, height
            )));
        }
        if !fps.is_finite() || fps <= 0.0 {
            return Err(FacePcaError::Encode(format!("invalid frame rate {}", fps)));
        }
        Ok(VideoSpec {
            width,
            height,
            fps,
            codec: *b"MJPG",
            jpeg_quality: 90,
        })
    }

    pub fn from_config(config: &ReconstructionConfig) -> Result<Self> {
        let (width, height) = config.get_resize_dims();
        VideoSpec::new(width, height, config.get_fps())?
            .codec(config.get_codec())?
            .jpeg_quality(config.get_jpeg_quality())
    }

    pub fn codec(mut self, codec: &str) -> Result<Self> {
        if !SUPPORTED_CODECS.contains(&codec) {
            return Err(FacePcaError::Encode(format!(
                "unsupported codec {:?}",
                codec
            )));
        }
        self.codec.copy_from_slice(codec.as_bytes());
        Ok(self)
    }

    pub fn jpeg_quality(mut self, quality: u8) -> Result<Self> {
        if !(1..=100).contains(&quality) {
            return Err(FacePcaError::Encode(format!(
                "jpeg quality must be within 1..=100, got {}",
                quality
            )));
        }
        self.jpeg_quality = quality;
        Ok(self)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    fn micros_per_frame(&self) -> u32 {
        (1_000_000.0 / self.fps).round() as u32
    }

    fn rate(&self) -> u32 {
        (self.fps * RATE_SCALE as f64).round() as u32
    }
}

/// Offsets of header fields rewritten once all frames are known.
#[derive(Debug, Clone, Copy)]
struct PatchPoints {
    riff_size: u64,
    max_bytes_per_sec: u64,
    total_frames: u64,
    avih_buffer_size: u64,
    stream_length: u64,
    strh_buffer_size: u64,
    movi_size: u64,
    movi_fourcc: u64,
}

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    offset: u32,
    size: u32,
}

/// Motion-JPEG AVI writer over any seekable output.
pub struct AviWriter<W: Write + Seek> {
    inner: W,
    spec: VideoSpec,
    patch: PatchPoints,
    index: Vec<IndexEntry>,
    max_chunk: u32,
}

impl<W: Write + Seek> AviWriter<W> {
    /// Writes the container headers and opens the `movi` list.
    pub fn new(mut inner: W, spec: VideoSpec) -> Result<Self> {
        let base = inner.stream_position().map_err(encode_io)?;
        let (header, patch) = build_header(&spec, base);
        inner.write_all(&header).map_err(encode_io)?;

        Ok(AviWriter {
            inner,
            spec,
            patch,
            index: Vec::new(),
            max_chunk: 0,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.index.len()
    }

    /// Appends one already-encoded JPEG as a video chunk.
    pub fn write_jpeg(&mut self, data: &[u8]) -> Result<()> {
        let size = u32::try_from(data.len())
            .map_err(|_| FacePcaError::Encode("frame exceeds 4 GiB".to_string()))?;
        let position = self.inner.stream_position().map_err(encode_io)?;
        let offset = u32::try_from(position - self.patch.movi_fourcc)
            .map_err(|_| FacePcaError::Encode("movi list exceeds 4 GiB".to_string()))?;

        self.inner.write_all(VIDEO_CHUNK_ID).map_err(encode_io)?;
        self.inner.write_all(&size.to_le_bytes()).map_err(encode_io)?;
        self.inner.write_all(data).map_err(encode_io)?;
        if data.len() % 2 == 1 {
            self.inner.write_all(&[0]).map_err(encode_io)?;
        }

        self.index.push(IndexEntry { offset, size });
        self.max_chunk = self.max_chunk.max(size);
        Ok(())
    }

    /// Writes the index, patches sizes and counts, and returns the output.
    pub fn finish(mut self) -> Result<W> {
        let idx1_start = self.inner.stream_position().map_err(encode_io)?;

        let mut idx1 = Vec::with_capacity(8 + 16 * self.index.len());
        idx1.extend_from_slice(b"idx1");
        push_u32(&mut idx1, (16 * self.index.len()) as u32);
        for entry in &self.index {
            idx1.extend_from_slice(VIDEO_CHUNK_ID);
            push_u32(&mut idx1, AVIIF_KEYFRAME);
            push_u32(&mut idx1, entry.offset);
            push_u32(&mut idx1, entry.size);
        }
        self.inner.write_all(&idx1).map_err(encode_io)?;
        let end = self.inner.stream_position().map_err(encode_io)?;

        let frames = self.index.len() as u32;
        let buffer_size = self.max_chunk + 8;
        let bytes_per_sec = (buffer_size as f64 * self.spec.fps).min(u32::MAX as f64) as u32;
        let patches = [
            (self.patch.riff_size, (end - self.patch.riff_size - 4) as u32),
            (self.patch.max_bytes_per_sec, bytes_per_sec),
            (self.patch.total_frames, frames),
            (self.patch.avih_buffer_size, buffer_size),
            (self.patch.stream_length, frames),
            (self.patch.strh_buffer_size, buffer_size),
            (self.patch.movi_size, (idx1_start - self.patch.movi_size - 4) as u32),
        ];
        for (position, value) in patches {
            self.inner.seek(SeekFrom::Start(position)).map_err(encode_io)?;
            self.inner.write_all(&value.to_le_bytes()).map_err(encode_io)?;
        }
        self.inner.seek(SeekFrom::Start(end)).map_err(encode_io)?;
        self.inner.flush().map_err(encode_io)?;

        debug!("Finalized AVI with {} frames", frames);
        Ok(self.inner)
    }
}

impl<W: Write + Seek> FrameSink for AviWriter<W> {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if frame.width() != self.spec.width as usize || frame.height() != self.spec.height as usize
        {
            return Err(FacePcaError::Encode(format!(
                "frame {} is {}x{}, video is {}x{}",
                frame.component_count(),
                frame.width(),
                frame.height(),
                self.spec.width,
                self.spec.height
            )));
        }

        let rgb = frame.to_rgb_image();
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, self.spec.jpeg_quality).encode_image(&rgb)?;
        self.write_jpeg(&jpeg)
    }
}

fn encode_io(err: std::io::Error) -> FacePcaError {
    FacePcaError::Encode(err.to_string())
}

fn push_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn push_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Opens a `LIST` (or `RIFF`) chunk and returns the offset of its size field.
fn open_list(buf: &mut Vec<u8>, id: &[u8; 4], kind: &[u8; 4]) -> usize {
    buf.extend_from_slice(id);
    let size_at = buf.len();
    push_u32(buf, 0);
    buf.extend_from_slice(kind);
    size_at
}

fn close_list(buf: &mut [u8], size_at: usize) {
    let size = (buf.len() - size_at - 4) as u32;
    buf[size_at..size_at + 4].copy_from_slice(&size.to_le_bytes());
}

fn build_header(spec: &VideoSpec, base: u64) -> (Vec<u8>, PatchPoints) {
    let mut buf = Vec::with_capacity(256);
    let riff_size = open_list(&mut buf, b"RIFF", b"AVI ");
    let hdrl_size = open_list(&mut buf, b"LIST", b"hdrl");

    // MainAVIHeader
    buf.extend_from_slice(b"avih");
    push_u32(&mut buf, 56);
    push_u32(&mut buf, spec.micros_per_frame());
    let max_bytes_per_sec = buf.len();
    push_u32(&mut buf, 0);
    push_u32(&mut buf, 0); // padding granularity
    push_u32(&mut buf, AVIF_HASINDEX);
    let total_frames = buf.len();
    push_u32(&mut buf, 0);
    push_u32(&mut buf, 0); // initial frames
    push_u32(&mut buf, 1); // streams
    let avih_buffer_size = buf.len();
    push_u32(&mut buf, 0);
    push_u32(&mut buf, spec.width);
    push_u32(&mut buf, spec.height);
    for _ in 0..4 {
        push_u32(&mut buf, 0);
    }

    let strl_size = open_list(&mut buf, b"LIST", b"strl");

    // AVIStreamHeader
    buf.extend_from_slice(b"strh");
    push_u32(&mut buf, 56);
    buf.extend_from_slice(b"vids");
    buf.extend_from_slice(&spec.codec);
    push_u32(&mut buf, 0); // flags
    push_u16(&mut buf, 0); // priority
    push_u16(&mut buf, 0); // language
    push_u32(&mut buf, 0); // initial frames
    push_u32(&mut buf, RATE_SCALE);
    push_u32(&mut buf, spec.rate());
    push_u32(&mut buf, 0); // start
    let stream_length = buf.len();
    push_u32(&mut buf, 0);
    let strh_buffer_size = buf.len();
    push_u32(&mut buf, 0);
    push_u32(&mut buf, u32::MAX); // default quality
    push_u32(&mut buf, 0); // sample size
    push_u16(&mut buf, 0);
    push_u16(&mut buf, 0);
    push_u16(&mut buf, spec.width as u16);
    push_u16(&mut buf, spec.height as u16);

    // BITMAPINFOHEADER
    buf.extend_from_slice(b"strf");
    push_u32(&mut buf, 40);
    push_u32(&mut buf, 40);
    push_u32(&mut buf, spec.width);
    push_u32(&mut buf, spec.height);
    push_u16(&mut buf, 1); // planes
    push_u16(&mut buf, 24); // bit count
    buf.extend_from_slice(&spec.codec);
    push_u32(&mut buf, spec.width * spec.height * 3);
    for _ in 0..4 {
        push_u32(&mut buf, 0);
    }

    close_list(&mut buf, strl_size);
    close_list(&mut buf, hdrl_size);

    let movi_size = open_list(&mut buf, b"LIST", b"movi");
    let movi_fourcc = buf.len() - 4;

    let at = |offset: usize| base + offset as u64;
    let patch = PatchPoints {
        riff_size: at(riff_size),
        max_bytes_per_sec: at(max_bytes_per_sec),
        total_frames: at(total_frames),
        avih_buffer_size: at(avih_buffer_size),
        stream_length: at(stream_length),
        strh_buffer_size: at(strh_buffer_size),
        movi_size: at(movi_size),
        movi_fourcc: at(movi_fourcc),
    };
    (buf, patch)
}

/// An AVI file on disk that is removed again unless [`VideoFile::finish`] succeeds.
pub struct VideoFile {
    path: PathBuf,
    writer: Option<AviWriter<BufWriter<File>>>,
}

impl VideoFile {
    pub fn create(path: &Path, spec: VideoSpec) -> Result<Self> {
        let file = File::create(path).map_err(|e| FacePcaError::io(path, e))?;
        match AviWriter::new(BufWriter::new(file), spec) {
            Ok(writer) => Ok(VideoFile {
                path: path.to_path_buf(),
                writer: Some(writer),
            }),
            Err(err) => {
                discard_partial(path);
                Err(err)
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frame_count(&self) -> usize {
        self.writer.as_ref().map_or(0, |w| w.frame_count())
    }

    pub fn finish(mut self) -> Result<PathBuf> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| FacePcaError::Encode("video already finalized".to_string()))?;

        match writer.finish() {
            Ok(_) => Ok(self.path.clone()),
            Err(err) => {
                discard_partial(&self.path);
                Err(err)
            }
        }
    }
}

impl FrameSink for VideoFile {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.write_frame(frame),
            None => Err(FacePcaError::Encode("video already finalized".to_string())),
        }
    }
}

impl Drop for VideoFile {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            drop(writer);
            warn!(
                "Video {} was not finalized, removing partial output",
                self.path.display()
            );
            discard_partial(&self.path);
        }
    }
}

fn discard_partial(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        warn!("Could not remove partial video {}: {}", path.display(), err);
    }
}

/// Writes `frames` to a new video at `path` in iteration order.
pub fn encode_video<I>(path: &Path, spec: VideoSpec, frames: I) -> Result<usize>
where
    I: IntoIterator<Item = Frame>,
{
    let mut video = VideoFile::create(path, spec)?;
    for frame in frames {
        video.write_frame(&frame)?;
    }
    let written = video.frame_count();
    video.finish()?;

    info!("Wrote {} frames to {}", written, path.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconstruct::Reconstructor;
    use ndarray::{array, Array2};
    use std::io::Cursor;
    use tempfile::tempdir;

    fn read_u32(bytes: &[u8], at: usize) -> u32 {
        u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
    }

    fn find(bytes: &[u8], needle: &[u8]) -> usize {
        bytes
            .windows(needle.len())
            .position(|w| w == needle)
            .unwrap()
    }

    fn frames(width: u32, height: u32) -> Vec<Frame> {
        let d = (width * height) as usize;
        let vt = Array2::eye(d);
        let mean = ndarray::Array1::from_elem(d, 128.0);
        let centered = ndarray::Array1::from_shape_fn(d, |i| (i as f64 * 13.0) % 100.0 - 50.0);
        let r = Reconstructor::new(centered.view(), vt.view(), mean.view(), (width, height)).unwrap();
        r.frames().collect()
    }

    #[test]
    fn test_avi_layout() {
        let spec = VideoSpec::new(2, 2, 200.0).unwrap();
        let mut writer = AviWriter::new(Cursor::new(Vec::new()), spec).unwrap();
        for frame in frames(2, 2) {
            writer.write_frame(&frame).unwrap();
        }
        let bytes = writer.finish().unwrap().into_inner();

        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(read_u32(&bytes, 4) as usize, bytes.len() - 8);
        assert_eq!(&bytes[8..12], b"AVI ");

        let avih = find(&bytes, b"avih");
        assert_eq!(read_u32(&bytes, avih + 8), 5000);
        assert_eq!(read_u32(&bytes, avih + 24), 4);
        assert_eq!(read_u32(&bytes, avih + 40), 2);
        assert_eq!(read_u32(&bytes, avih + 44), 2);

        let strh = find(&bytes, b"strh");
        assert_eq!(&bytes[strh + 8..strh + 12], b"vids");
        assert_eq!(&bytes[strh + 12..strh + 16], b"MJPG");
        assert_eq!(read_u32(&bytes, strh + 28), 1000);
        assert_eq!(read_u32(&bytes, strh + 32), 200_000);
        assert_eq!(read_u32(&bytes, strh + 40), 4);

        let movi = find(&bytes, b"movi");
        let idx1 = find(&bytes, b"idx1");
        assert_eq!(read_u32(&bytes, movi - 4) as usize, idx1 - movi);
        assert_eq!(read_u32(&bytes, idx1 + 4), 64);

        // First index entry points at the first chunk, which holds a JPEG.
        let offset = read_u32(&bytes, idx1 + 16) as usize;
        let size = read_u32(&bytes, idx1 + 20) as usize;
        let chunk = movi + offset;
        assert_eq!(&bytes[chunk..chunk + 4], b"00dc");
        assert_eq!(read_u32(&bytes, chunk + 4) as usize, size);
        assert_eq!(&bytes[chunk + 8..chunk + 10], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_jpeg_frames_decode_to_size() {
        let spec = VideoSpec::new(3, 2, 25.0).unwrap();
        let mut writer = AviWriter::new(Cursor::new(Vec::new()), spec).unwrap();
        let frame = frames(3, 2).remove(0);
        writer.write_frame(&frame).unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let movi = find(&bytes, b"movi");
        let size = read_u32(&bytes, movi + 8) as usize;
        let jpeg = &bytes[movi + 12..movi + 12 + size];
        let decoded = image::load_from_memory(jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (3, 2));
    }

    #[test]
    fn test_frame_size_mismatch_rejected() {
        let spec = VideoSpec::new(4, 4, 200.0).unwrap();
        let mut writer = AviWriter::new(Cursor::new(Vec::new()), spec).unwrap();
        let frame = frames(2, 2).remove(0);
        assert!(matches!(
            writer.write_frame(&frame),
            Err(FacePcaError::Encode(_))
        ));
    }

    #[test]
    fn test_spec_validation() {
        assert!(VideoSpec::new(0, 2, 10.0).is_err());
        assert!(VideoSpec::new(2, 2, -1.0).is_err());
        assert!(VideoSpec::new(2, 2, 10.0).unwrap().codec("XVID").is_err());
        assert!(VideoSpec::new(2, 2, 10.0).unwrap().jpeg_quality(0).is_err());
    }

    #[test]
    fn test_oversized_frames_rejected() {
        assert!(matches!(
            VideoSpec::new(70_000, 2, 10.0),
            Err(FacePcaError::Encode(_))
        ));
        assert!(matches!(
            VideoSpec::new(2, 70_000, 10.0),
            Err(FacePcaError::Encode(_))
        ));
        // Each side fits in u16 but width * height * 3 overflows u32.
        assert!(matches!(
            VideoSpec::new(65_535, 65_535, 10.0),
            Err(FacePcaError::Encode(_))
        ));
        assert!(VideoSpec::new(65_535, 2, 10.0).is_ok());
    }

    #[test]
    fn test_encode_video_to_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reconstruction.avi");
        let spec = VideoSpec::new(2, 2, 200.0).unwrap();

        let written = encode_video(&path, spec, frames(2, 2)).unwrap();
        assert_eq!(written, 4);
        let bytes = fs::read(&path).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
    }

    #[test]
    fn test_partial_video_removed_on_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.avi");
        let spec = VideoSpec::new(2, 2, 200.0).unwrap();

        let mut wrong = frames(2, 2);
        wrong.push(frames(3, 1).remove(0));
        let err = encode_video(&path, spec, wrong).unwrap_err();
        assert!(matches!(err, FacePcaError::Encode(_)));
        assert!(!path.exists());
    }

    #[test]
    fn test_gray_frame_written_as_rgb() {
        let vt = Array2::eye(1);
        let mean = array![77.0];
        let centered = array![0.0];
        let frame = Reconstructor::new(centered.view(), vt.view(), mean.view(), (1, 1))
            .unwrap()
            .frame_at(1)
            .unwrap();
        assert_eq!(frame.to_rgb_image().get_pixel(0, 0).0, [77, 77, 77]);
    }
}
