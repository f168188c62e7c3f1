// Copyright 2024 The zmx Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The wire protocol zmx uses between `zmx attach` (and the other short-lived
//! client commands) and the daemon that owns a session's pty.
//!
//! Every frame on the wire has the same shape: a one byte tag, a four byte
//! little endian payload length, then that many bytes of payload. The codec
//! here is deliberately stateless and allocation free on the decode path —
//! `next` borrows its returned payload from the slice it was given rather
//! than copying it out, so callers can run it directly over a growable
//! read buffer (see `libzmx::buf::SockBuf`) without paying for a copy on
//! every partial read.

use byteorder::{ByteOrder, LittleEndian};

/// One byte tag, four byte little endian length prefix.
pub const FRAME_HEADER_LEN: usize = 5;

/// Frames larger than this are rejected outright so a misbehaving peer
/// can't make the daemon allocate unbounded memory.
pub const MAX_FRAME_PAYLOAD: usize = 16 * 1024 * 1024;

/// Longest command line `Info` will report, in bytes.
pub const MAX_CMD: usize = 512;
/// Longest working directory `Info` will report, in bytes.
pub const MAX_CWD: usize = 1024;

/// The kind of a single wire frame. See the module docs for the framing
/// format; see each variant for the payload it carries.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Tag {
    /// client -> daemon: raw keystroke bytes.
    Input = 0,
    /// daemon -> client: raw pty bytes, or a serialized snapshot on reattach.
    Output = 1,
    /// client -> daemon: a `WindowSize`, sent once right after connecting.
    Init = 2,
    /// client -> daemon: a `WindowSize`, sent whenever the client's tty resizes.
    Resize = 3,
    /// client -> daemon: empty, detach this one client.
    Detach = 4,
    /// any -> daemon: empty, detach every attached client.
    DetachAll = 5,
    /// any -> daemon: empty, tear down the whole session.
    Kill = 6,
    /// request/response: empty request, `InfoResponse` reply.
    Info = 7,
    /// request/response: one `HistoryFormat` byte request, serialized scrollback reply.
    History = 8,
    /// client -> daemon: command bytes to inject into the pty, acked with `Ack`.
    Run = 9,
    /// daemon -> client: empty, acknowledges a `Run`.
    Ack = 10,
}

impl TryFrom<u8> for Tag {
    type Error = CodecError;

    fn try_from(v: u8) -> Result<Self, CodecError> {
        match v {
            0 => Ok(Tag::Input),
            1 => Ok(Tag::Output),
            2 => Ok(Tag::Init),
            3 => Ok(Tag::Resize),
            4 => Ok(Tag::Detach),
            5 => Ok(Tag::DetachAll),
            6 => Ok(Tag::Kill),
            7 => Ok(Tag::Info),
            8 => Ok(Tag::History),
            9 => Ok(Tag::Run),
            10 => Ok(Tag::Ack),
            _ => Err(CodecError::UnknownTag(v)),
        }
    }
}

/// Errors the codec can detect on its own, without any help from the
/// session or socket layers above it. These always mean "close the
/// connection that produced this", never "crash the daemon".
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("frame tag {0} is out of range")]
    UnknownTag(u8),
    #[error("frame payload length {len} exceeds the {max} byte maximum")]
    PayloadTooLarge { len: u32, max: usize },
    #[error("payload of {got} bytes is the wrong size for a {tag:?} frame (want {want})")]
    WrongPayloadSize { tag: Tag, got: usize, want: usize },
    #[error("history format byte {0} is not 0 (plain), 1 (vt), or 2 (html)")]
    UnknownHistoryFormat(u8),
}

/// A single decoded frame, borrowing its payload from the buffer it was
/// pulled out of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub tag: Tag,
    pub payload: &'a [u8],
}

/// The result of a single pull against a buffer: either a complete frame
/// plus the number of bytes it (header included) consumed from the front
/// of the buffer, or an indication that the buffer doesn't hold a whole
/// frame yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pull<'a> {
    Frame { frame: Frame<'a>, consumed: usize },
    NeedMore,
}

/// Encode `tag`/`payload` as a frame and append it to `out`.
pub fn encode(tag: Tag, payload: &[u8], out: &mut Vec<u8>) -> Result<(), CodecError> {
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(CodecError::PayloadTooLarge { len: payload.len() as u32, max: MAX_FRAME_PAYLOAD });
    }
    out.reserve(FRAME_HEADER_LEN + payload.len());
    out.push(tag as u8);
    let mut len_buf = [0u8; 4];
    LittleEndian::write_u32(&mut len_buf, payload.len() as u32);
    out.extend_from_slice(&len_buf);
    out.extend_from_slice(payload);
    Ok(())
}

/// Pull the next complete frame out of the front of `buf`, if there is one.
///
/// Never copies the payload. Never advances anything itself — the caller
/// (`SockBuf`) is responsible for dropping `consumed` bytes from the front
/// of its buffer once it is done with the borrowed frame.
pub fn next(buf: &[u8]) -> Result<Pull<'_>, CodecError> {
    if buf.len() < FRAME_HEADER_LEN {
        return Ok(Pull::NeedMore);
    }
    let tag = Tag::try_from(buf[0])?;
    let len = LittleEndian::read_u32(&buf[1..FRAME_HEADER_LEN]);
    if len as usize > MAX_FRAME_PAYLOAD {
        return Err(CodecError::PayloadTooLarge { len, max: MAX_FRAME_PAYLOAD });
    }
    let total = FRAME_HEADER_LEN + len as usize;
    if buf.len() < total {
        return Ok(Pull::NeedMore);
    }
    Ok(Pull::Frame { frame: Frame { tag, payload: &buf[FRAME_HEADER_LEN..total] }, consumed: total })
}

/// The `{rows: u16, cols: u16}` payload carried by `Init` and `Resize` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowSize {
    pub rows: u16,
    pub cols: u16,
}

impl WindowSize {
    pub const ENCODED_LEN: usize = 4;

    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut buf = [0u8; Self::ENCODED_LEN];
        LittleEndian::write_u16(&mut buf[0..2], self.rows);
        LittleEndian::write_u16(&mut buf[2..4], self.cols);
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        if payload.len() != Self::ENCODED_LEN {
            return Err(CodecError::WrongPayloadSize {
                tag: Tag::Init,
                got: payload.len(),
                want: Self::ENCODED_LEN,
            });
        }
        Ok(WindowSize {
            rows: LittleEndian::read_u16(&payload[0..2]),
            cols: LittleEndian::read_u16(&payload[2..4]),
        })
    }
}

/// The fixed-size `Info` response: `{clients_len: u64, pid: i32, cmd_len: u16,
/// cwd_len: u16, cmd: [MAX_CMD]u8, cwd: [MAX_CWD]u8}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoResponse {
    /// Number of attached clients, excluding whoever asked.
    pub clients_len: u64,
    pub pid: i32,
    pub cmd: Vec<u8>,
    pub cwd: Vec<u8>,
}

impl InfoResponse {
    pub const ENCODED_LEN: usize = 8 + 4 + 2 + 2 + MAX_CMD + MAX_CWD;

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        if self.cmd.len() > MAX_CMD {
            return Err(CodecError::PayloadTooLarge { len: self.cmd.len() as u32, max: MAX_CMD });
        }
        if self.cwd.len() > MAX_CWD {
            return Err(CodecError::PayloadTooLarge { len: self.cwd.len() as u32, max: MAX_CWD });
        }

        let mut buf = vec![0u8; Self::ENCODED_LEN];
        LittleEndian::write_u64(&mut buf[0..8], self.clients_len);
        LittleEndian::write_i32(&mut buf[8..12], self.pid);
        LittleEndian::write_u16(&mut buf[12..14], self.cmd.len() as u16);
        LittleEndian::write_u16(&mut buf[14..16], self.cwd.len() as u16);
        let cmd_off = 16;
        buf[cmd_off..cmd_off + self.cmd.len()].copy_from_slice(&self.cmd);
        let cwd_off = cmd_off + MAX_CMD;
        buf[cwd_off..cwd_off + self.cwd.len()].copy_from_slice(&self.cwd);
        Ok(buf)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        if payload.len() != Self::ENCODED_LEN {
            return Err(CodecError::WrongPayloadSize {
                tag: Tag::Info,
                got: payload.len(),
                want: Self::ENCODED_LEN,
            });
        }
        let clients_len = LittleEndian::read_u64(&payload[0..8]);
        let pid = LittleEndian::read_i32(&payload[8..12]);
        let cmd_len = LittleEndian::read_u16(&payload[12..14]) as usize;
        let cwd_len = LittleEndian::read_u16(&payload[14..16]) as usize;
        let cmd_off = 16;
        let cwd_off = cmd_off + MAX_CMD;
        let cmd = payload[cmd_off..cmd_off + cmd_len.min(MAX_CMD)].to_vec();
        let cwd = payload[cwd_off..cwd_off + cwd_len.min(MAX_CWD)].to_vec();
        Ok(InfoResponse { clients_len, pid, cmd, cwd })
    }
}

/// The one byte `History` request payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryFormat {
    Plain = 0,
    Vt = 1,
    Html = 2,
}

impl HistoryFormat {
    pub fn encode(self) -> [u8; 1] {
        [self as u8]
    }

    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        if payload.len() != 1 {
            return Err(CodecError::WrongPayloadSize {
                tag: Tag::History,
                got: payload.len(),
                want: 1,
            });
        }
        match payload[0] {
            0 => Ok(HistoryFormat::Plain),
            1 => Ok(HistoryFormat::Vt),
            2 => Ok(HistoryFormat::Html),
            b => Err(CodecError::UnknownHistoryFormat(b)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn frame_round_trip() {
        let cases: Vec<(Tag, Vec<u8>)> = vec![
            (Tag::Input, vec![]),
            (Tag::Input, vec![0, 1, 2, 3, 255]),
            (Tag::Output, (0..=255u16).map(|b| b as u8).collect()),
            (Tag::Kill, vec![]),
            (Tag::Run, b"echo hi\n".to_vec()),
        ];

        for (tag, payload) in cases {
            let mut buf = Vec::new();
            encode(tag, &payload, &mut buf).expect("encode");
            match next(&buf).expect("decode") {
                Pull::Frame { frame, consumed } => {
                    assert_eq!(frame.tag, tag);
                    assert_eq!(frame.payload, payload.as_slice());
                    assert_eq!(consumed, buf.len());
                }
                Pull::NeedMore => panic!("expected a complete frame"),
            }
        }
    }

    #[test]
    fn partial_header_needs_more() {
        let mut buf = Vec::new();
        encode(Tag::Input, b"hello", &mut buf).unwrap();
        for split in 0..FRAME_HEADER_LEN {
            assert_eq!(next(&buf[..split]).unwrap(), Pull::NeedMore);
        }
    }

    #[test]
    fn partial_payload_needs_more() {
        let mut buf = Vec::new();
        encode(Tag::Input, b"hello world", &mut buf).unwrap();
        assert_eq!(next(&buf[..FRAME_HEADER_LEN + 3]).unwrap(), Pull::NeedMore);
    }

    #[test]
    fn two_frames_back_to_back() {
        let mut buf = Vec::new();
        encode(Tag::Input, b"first", &mut buf).unwrap();
        encode(Tag::Input, b"second", &mut buf).unwrap();

        let (first, consumed) = match next(&buf).unwrap() {
            Pull::Frame { frame, consumed } => (frame.payload.to_vec(), consumed),
            Pull::NeedMore => panic!("expected a frame"),
        };
        assert_eq!(first, b"first");

        match next(&buf[consumed..]).unwrap() {
            Pull::Frame { frame, .. } => assert_eq!(frame.payload, b"second"),
            Pull::NeedMore => panic!("expected a frame"),
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut buf = vec![200u8];
        buf.extend_from_slice(&[0, 0, 0, 0]);
        assert_eq!(next(&buf), Err(CodecError::UnknownTag(200)));
    }

    #[test]
    fn oversized_length_is_rejected() {
        let mut buf = vec![Tag::Input as u8];
        let mut len_buf = [0u8; 4];
        LittleEndian::write_u32(&mut len_buf, (MAX_FRAME_PAYLOAD + 1) as u32);
        buf.extend_from_slice(&len_buf);
        assert!(matches!(next(&buf), Err(CodecError::PayloadTooLarge { .. })));
    }

    #[test]
    fn window_size_round_trip() {
        let ws = WindowSize { rows: 24, cols: 80 };
        assert_eq!(WindowSize::decode(&ws.encode()).unwrap(), ws);
    }

    #[test]
    fn info_response_round_trip() {
        let resp = InfoResponse {
            clients_len: 3,
            pid: 12345,
            cmd: b"/bin/bash".to_vec(),
            cwd: b"/home/user/proj".to_vec(),
        };
        let encoded = resp.encode().unwrap();
        assert_eq!(encoded.len(), InfoResponse::ENCODED_LEN);
        assert_eq!(InfoResponse::decode(&encoded).unwrap(), resp);
    }

    #[test]
    fn history_format_round_trip() {
        for fmt in [HistoryFormat::Plain, HistoryFormat::Vt, HistoryFormat::Html] {
            assert_eq!(HistoryFormat::decode(&fmt.encode()).unwrap(), fmt);
        }
        assert!(matches!(HistoryFormat::decode(&[9]), Err(CodecError::UnknownHistoryFormat(9))));
    }
}
