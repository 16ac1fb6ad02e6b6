//! 16-bit stereo WAV output.

use std::io::{self, Seek, SeekFrom, Write};

use sp_engine::Frame;

use crate::FormatError;

const CHANNELS: u16 = 2;
const BITS: u16 = 16;
const BLOCK_ALIGN: u16 = CHANNELS * BITS / 8;
const HEADER_SIZE: u32 = 44;

fn header(sample_rate: u32, data_size: u32) -> [u8; HEADER_SIZE as usize] {
    let mut h = [0u8; HEADER_SIZE as usize];
    h[0..4].copy_from_slice(b"RIFF");
    h[4..8].copy_from_slice(&(36 + data_size).to_le_bytes());
    h[8..12].copy_from_slice(b"WAVE");
    h[12..16].copy_from_slice(b"fmt ");
    h[16..20].copy_from_slice(&16u32.to_le_bytes());
    h[20..22].copy_from_slice(&1u16.to_le_bytes());
    h[22..24].copy_from_slice(&CHANNELS.to_le_bytes());
    h[24..28].copy_from_slice(&sample_rate.to_le_bytes());
    h[28..32].copy_from_slice(&(sample_rate * BLOCK_ALIGN as u32).to_le_bytes());
    h[32..34].copy_from_slice(&BLOCK_ALIGN.to_le_bytes());
    h[34..36].copy_from_slice(&BITS.to_le_bytes());
    h[36..40].copy_from_slice(b"data");
    h[40..44].copy_from_slice(&data_size.to_le_bytes());
    h
}

fn frame_bytes(frame: &Frame) -> [u8; 4] {
    let [l0, l1] = frame.left.to_le_bytes();
    let [r0, r1] = frame.right.to_le_bytes();
    [l0, l1, r0, r1]
}

pub fn write_wav(w: &mut impl Write, frames: &[Frame], sample_rate: u32) -> io::Result<()> {
    let data_size = frames.len() as u32 * BLOCK_ALIGN as u32;
    w.write_all(&header(sample_rate, data_size))?;
    for frame in frames {
        w.write_all(&frame_bytes(frame))?;
    }
    Ok(())
}

pub fn frames_to_wav(frames: &[Frame], sample_rate: u32) -> Vec<u8> {
    let data_size = frames.len() as u32 * BLOCK_ALIGN as u32;
    let mut buf = Vec::with_capacity((HEADER_SIZE + data_size) as usize);
    buf.extend_from_slice(&header(sample_rate, data_size));
    for frame in frames {
        buf.extend_from_slice(&frame_bytes(frame));
    }
    buf
}

/// Streams frames to a seekable sink, patching the chunk sizes on
/// [`WavWriter::finish`].
pub struct WavWriter<W: Write + Seek> {
    inner: W,
    sample_rate: u32,
    frames: u32,
}

impl<W: Write + Seek> WavWriter<W> {
    pub fn new(mut inner: W, sample_rate: u32) -> io::Result<Self> {
        inner.write_all(&header(sample_rate, 0))?;
        Ok(Self {
            inner,
            sample_rate,
            frames: 0,
        })
    }

    pub fn write(&mut self, frames: &[Frame]) -> io::Result<()> {
        for frame in frames {
            self.inner.write_all(&frame_bytes(frame))?;
        }
        self.frames += frames.len() as u32;
        Ok(())
    }

    pub fn frames(&self) -> u32 {
        self.frames
    }

    pub fn finish(mut self) -> io::Result<W> {
        let data_size = self.frames * BLOCK_ALIGN as u32;
        self.inner.seek(SeekFrom::Start(0))?;
        self.inner.write_all(&header(self.sample_rate, data_size))?;
        self.inner.seek(SeekFrom::End(0))?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Read back a 16-bit stereo PCM WAV: its rate and frames.
pub fn read_wav(data: &[u8]) -> Result<(u32, Vec<Frame>), FormatError> {
    if data.len() < HEADER_SIZE as usize {
        return Err(FormatError::UnexpectedEof);
    }
    if &data[0..4] != b"RIFF" || &data[8..12] != b"WAVE" {
        return Err(FormatError::InvalidHeader);
    }

    let mut pos = 12;
    let mut rate = None;
    while pos + 8 <= data.len() {
        let id = &data[pos..pos + 4];
        let size = u32::from_le_bytes([data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]])
            as usize;
        let body = data.get(pos + 8..).unwrap_or_default();
        if id == b"fmt " && body.len() >= 16 {
            let format = u16::from_le_bytes([body[0], body[1]]);
            let channels = u16::from_le_bytes([body[2], body[3]]);
            let bits = u16::from_le_bytes([body[14], body[15]]);
            if format != 1 || channels != CHANNELS || bits != BITS {
                return Err(FormatError::UnsupportedVersion);
            }
            rate = Some(u32::from_le_bytes([body[4], body[5], body[6], body[7]]));
        } else if id == b"data" {
            let rate = rate.ok_or(FormatError::InvalidHeader)?;
            let raw = &body[..size.min(body.len())];
            let frames = raw
                .chunks_exact(BLOCK_ALIGN as usize)
                .map(|c| Frame {
                    left: i16::from_le_bytes([c[0], c[1]]),
                    right: i16::from_le_bytes([c[2], c[3]]),
                })
                .collect();
            return Ok((rate, frames));
        }
        pos += 8 + size + (size & 1);
    }
    Err(FormatError::InvalidHeader)
}
