//! `audio_in`/`audio_out`, `audio_file_in`/`audio_file_out`, and
//! `audio_buf_file_out` (§4.6).

use crate::buffer::AudioBuf;
use crate::device::DeviceRegistry;
use crate::error::{Error, Result};
use crate::proc::{ClassMembers, ProcCtx};
use crate::variable::{Channel, VarDescr};
use std::sync::Arc;

/// Binds a logical device label to an external collaborator device handle;
/// produces one abuf per cycle, clamped to the minimum of device and buffer
/// channel/frame count.
pub struct AudioIn {
    pub label: String,
    pub output: AudioBuf,
    registry: Arc<dyn DeviceRegistry>,
}

impl AudioIn {
    pub fn new(label: impl Into<String>, registry: Arc<dyn DeviceRegistry>, ch_n: usize, frame_n: usize, srate: f64) -> Self {
        AudioIn { label: label.into(), output: AudioBuf::new(ch_n, frame_n, srate), registry }
    }
}

impl ClassMembers for AudioIn {
    fn create(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        Ok(())
    }

    fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        self.registry.read_audio(&self.label, &mut self.output)
    }
}

/// Consumes one abuf per cycle into the external device.
pub struct AudioOut {
    pub label: String,
    pub input: AudioBuf,
    registry: Arc<dyn DeviceRegistry>,
}

impl AudioOut {
    pub fn new(label: impl Into<String>, registry: Arc<dyn DeviceRegistry>, ch_n: usize, frame_n: usize, srate: f64) -> Self {
        AudioOut { label: label.into(), input: AudioBuf::new(ch_n, frame_n, srate), registry }
    }
}

impl ClassMembers for AudioOut {
    fn create(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        Ok(())
    }

    fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        self.registry.write_audio(&self.label, &self.input)
    }
}

/// The external file-reader collaborator's minimal surface: fixed-stride
/// planar sample access plus a total-frame count, enough for
/// `audio_file_in`'s seek/gate/EOF contract.
pub trait AudioFileSource: Send {
    fn ch_n(&self) -> usize;
    fn srate(&self) -> f64;
    fn frame_n(&self) -> usize;
    fn read(&mut self, offset: usize, out: &mut AudioBuf) -> usize;
}

/// Wraps an external file handle; supports sample-offset seek (on notify)
/// and an on/off gate; fills with zeros when off; reports end-of-file on
/// exhaustion.
pub struct AudioFileIn {
    pub output: AudioBuf,
    source: Box<dyn AudioFileSource>,
    offset: usize,
    on: bool,
}

impl AudioFileIn {
    pub fn new(source: Box<dyn AudioFileSource>, frame_n: usize) -> Self {
        let ch_n = source.ch_n();
        let srate = source.srate();
        AudioFileIn { output: AudioBuf::new(ch_n, frame_n, srate), source, offset: 0, on: true }
    }
}

impl ClassMembers for AudioFileIn {
    fn create(&mut self, ctx: &mut ProcCtx) -> Result<()> {
        ctx.vars.register("seek", 0, 0, 1, VarDescr::default());
        ctx.vars.register("on", 0, 1, 1, VarDescr::default());
        Ok(())
    }

    fn notify(&mut self, ctx: &mut ProcCtx, vid: u32, _channel: Channel) -> Result<()> {
        match vid {
            0 => {
                if let Some(var) = ctx.vars.get("seek", 0, 0) {
                    if let Some(v) = var.get(Channel::Any) {
                        self.offset = v.to_i64()? as usize;
                    }
                }
            }
            1 => {
                if let Some(var) = ctx.vars.get("on", 0, 1) {
                    if let Some(v) = var.get(Channel::Any) {
                        self.on = v.to_bool()?;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        if !self.on {
            self.output.zero();
            return Ok(());
        }
        let n = self.source.read(self.offset, &mut self.output);
        self.offset += n;
        if n == 0 {
            return Err(Error::EndOfFile);
        }
        Ok(())
    }
}

/// The external file-writer collaborator's minimal surface.
pub trait AudioFileSink: Send {
    fn write(&mut self, buf: &AudioBuf) -> Result<()>;
}

/// A `hound`-backed [`AudioFileSink`]: writes a single float-PCM WAV file
/// per `write` call, overwriting any prior contents at `path`.
pub struct WavFileSink {
    path: std::path::PathBuf,
    ch_n: usize,
    srate: u32,
}

impl WavFileSink {
    pub fn new(path: impl Into<std::path::PathBuf>, ch_n: usize, srate: u32) -> Self {
        WavFileSink { path: path.into(), ch_n, srate }
    }
}

impl AudioFileSink for WavFileSink {
    fn write(&mut self, buf: &AudioBuf) -> Result<()> {
        let spec = hound::WavSpec {
            channels: self.ch_n as u16,
            sample_rate: self.srate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer =
            hound::WavWriter::create(&self.path, spec).map_err(|e| Error::OpFailed(format!("wav create: {e}")))?;
        let ch_n = buf.ch_n.min(self.ch_n);
        for f in 0..buf.frame_n {
            for c in 0..ch_n {
                writer.write_sample(buf.channel(c)[f]).map_err(|e| Error::OpFailed(format!("wav write: {e}")))?;
            }
        }
        writer.finalize().map_err(|e| Error::OpFailed(format!("wav finalize: {e}")))
    }
}

/// A `hound`-backed [`AudioFileSource`]: reads an entire float/int-PCM WAV
/// file into memory at construction and serves fixed-stride planar reads.
pub struct WavFileSource {
    ch_n: usize,
    srate: f64,
    samples: Vec<f32>,
}

impl WavFileSource {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let mut reader = hound::WavReader::open(path.as_ref()).map_err(|e| Error::OpFailed(format!("wav open: {e}")))?;
        let spec = reader.spec();
        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::OpFailed(format!("wav read: {e}")))?,
            hound::SampleFormat::Int => reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / i32::MAX as f32))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::OpFailed(format!("wav read: {e}")))?,
        };
        Ok(WavFileSource { ch_n: spec.channels as usize, srate: spec.sample_rate as f64, samples })
    }
}

impl AudioFileSource for WavFileSource {
    fn ch_n(&self) -> usize {
        self.ch_n
    }

    fn srate(&self) -> f64 {
        self.srate
    }

    fn frame_n(&self) -> usize {
        self.samples.len() / self.ch_n.max(1)
    }

    fn read(&mut self, offset: usize, out: &mut AudioBuf) -> usize {
        let total_frames = self.frame_n();
        if offset >= total_frames {
            return 0;
        }
        let n = out.frame_n.min(total_frames - offset);
        let ch_n = out.ch_n.min(self.ch_n);
        for f in 0..n {
            for c in 0..ch_n {
                out.channel_mut(c)[f] = self.samples[(offset + f) * self.ch_n + c];
            }
        }
        n
    }
}

pub struct AudioFileOut {
    pub input: AudioBuf,
    sink: Box<dyn AudioFileSink>,
    on: bool,
}

impl AudioFileOut {
    pub fn new(sink: Box<dyn AudioFileSink>, ch_n: usize, frame_n: usize, srate: f64) -> Self {
        AudioFileOut { input: AudioBuf::new(ch_n, frame_n, srate), sink, on: true }
    }
}

impl ClassMembers for AudioFileOut {
    fn create(&mut self, ctx: &mut ProcCtx) -> Result<()> {
        ctx.vars.register("on", 0, 0, 1, VarDescr::default());
        Ok(())
    }

    fn notify(&mut self, ctx: &mut ProcCtx, vid: u32, _channel: Channel) -> Result<()> {
        if vid == 0 {
            if let Some(var) = ctx.vars.get("on", 0, 0) {
                if let Some(v) = var.get(Channel::Any) {
                    self.on = v.to_bool()?;
                }
            }
        }
        Ok(())
    }

    fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        if self.on {
            self.sink.write(&self.input)?;
        }
        Ok(())
    }
}

/// A cache-then-flush sink: owns a growing list of sample chunks (each
/// `chunk_sec` seconds) and, on a `write` notify, atomically versions the
/// output filename and flushes every chunk before clearing. A `reset`
/// notify rewinds in place without flushing.
pub struct AudioBufFileOut {
    pub input: AudioBuf,
    base_path: String,
    chunk_frame_n: usize,
    chunks: Vec<Vec<f32>>,
    cur_chunk: Vec<f32>,
    version: u32,
    ch_n: usize,
}

impl AudioBufFileOut {
    pub fn new(base_path: impl Into<String>, ch_n: usize, frame_n: usize, srate: f64, chunk_sec: f64) -> Self {
        AudioBufFileOut {
            input: AudioBuf::new(ch_n, frame_n, srate),
            base_path: base_path.into(),
            chunk_frame_n: (chunk_sec * srate) as usize,
            chunks: Vec::new(),
            cur_chunk: Vec::new(),
            version: 0,
            ch_n,
        }
    }

    fn push_interleaved_frame(&mut self, frame: &[f32]) {
        self.cur_chunk.extend_from_slice(frame);
        if self.cur_chunk.len() >= self.chunk_frame_n * self.ch_n {
            self.chunks.push(std::mem::take(&mut self.cur_chunk));
        }
    }

    /// Next non-colliding versioned filename, per the "versioned filename"
    /// external-writer contract (§6).
    pub fn next_filename(&mut self) -> String {
        self.version += 1;
        format!("{}.{:04}.wav", self.base_path, self.version)
    }

    fn flush(&mut self, sink: &mut dyn AudioFileSink) -> Result<()> {
        let frame_n = self.chunks.iter().map(|c| c.len() / self.ch_n).sum::<usize>()
            + self.cur_chunk.len() / self.ch_n;
        let mut buf = AudioBuf::new(self.ch_n, frame_n.max(1), self.input.srate);
        let mut frame_idx = 0;
        for chunk in self.chunks.iter().chain(std::iter::once(&self.cur_chunk)) {
            for frame in chunk.chunks(self.ch_n) {
                for (c, &s) in frame.iter().enumerate() {
                    buf.channel_mut(c)[frame_idx] = s;
                }
                frame_idx += 1;
            }
        }
        sink.write(&buf)?;
        self.chunks.clear();
        self.cur_chunk.clear();
        Ok(())
    }

    pub fn reset(&mut self) {
        self.chunks.clear();
        self.cur_chunk.clear();
    }
}

impl ClassMembers for AudioBufFileOut {
    fn create(&mut self, ctx: &mut ProcCtx) -> Result<()> {
        ctx.vars.register("write", 0, 0, 1, VarDescr::default());
        ctx.vars.register("reset", 0, 1, 1, VarDescr::default());
        Ok(())
    }

    fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        let ch_n = self.input.ch_n.min(self.ch_n);
        let frame_n = self.input.frame_n;
        let mut frame = vec![0.0f32; self.ch_n];
        for f in 0..frame_n {
            for c in 0..ch_n {
                frame[c] = self.input.channel(c)[f];
            }
            self.push_interleaved_frame(&frame);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proc::ProcId;
    use crate::variable::VariableRegistry;

    struct CapturingSink {
        written: Vec<AudioBuf>,
    }

    impl AudioFileSink for CapturingSink {
        fn write(&mut self, buf: &AudioBuf) -> Result<()> {
            self.written.push(buf.clone());
            Ok(())
        }
    }

    fn dummy_ctx(vars: &mut VariableRegistry) -> ProcCtx {
        ProcCtx { id: ProcId(0), label: "t", sfx_id: 0, cycle_idx: 0, vars }
    }

    #[test]
    fn buf_file_out_accumulates_then_flushes() {
        let mut vars = VariableRegistry::new();
        let mut node = AudioBufFileOut::new("/tmp/take", 1, 4, 48_000.0, 1.0);
        node.create(&mut dummy_ctx(&mut vars)).unwrap();
        node.input.channel_mut(0).fill(1.0);
        node.exec(&mut dummy_ctx(&mut vars)).unwrap();
        assert!(!node.cur_chunk.is_empty() || !node.chunks.is_empty());

        let mut sink = CapturingSink { written: Vec::new() };
        node.flush(&mut sink).unwrap();
        assert_eq!(sink.written.len(), 1);
        assert!(node.chunks.is_empty() && node.cur_chunk.is_empty());
    }

    #[test]
    fn versioned_filenames_never_repeat() {
        let mut node = AudioBufFileOut::new("/tmp/take", 1, 4, 48_000.0, 1.0);
        let a = node.next_filename();
        let b = node.next_filename();
        assert_ne!(a, b);
    }

    #[test]
    fn wav_sink_then_source_round_trips_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roundtrip.wav");

        let mut buf = AudioBuf::new(2, 4, 48_000.0);
        for f in 0..4 {
            buf.channel_mut(0)[f] = f as f32 * 0.1;
            buf.channel_mut(1)[f] = -(f as f32) * 0.1;
        }
        let mut sink = WavFileSink::new(&path, 2, 48_000);
        sink.write(&buf).unwrap();

        let mut source = WavFileSource::open(&path).unwrap();
        assert_eq!(source.ch_n(), 2);
        assert_eq!(source.srate(), 48_000.0);
        assert_eq!(source.frame_n(), 4);

        let mut out = AudioBuf::new(2, 4, 48_000.0);
        let n = source.read(0, &mut out);
        assert_eq!(n, 4);
        for f in 0..4 {
            assert!((out.channel(0)[f] - buf.channel(0)[f]).abs() < 1e-6);
            assert!((out.channel(1)[f] - buf.channel(1)[f]).abs() < 1e-6);
        }
        assert_eq!(source.read(4, &mut out), 0);
    }
}
