//! Wire types for the tandem inter-domain link
//!
//! Both domains agree on these layouts out of band; nothing here is
//! self-describing. All integers are little-endian, parameter blocks are
//! fixed-layout, and offsets are never transmitted - only sizes, so a frame
//! decodes identically on both ends no matter where it landed in the ring.

#![no_std]

/// One message as it sits inside a transport frame: a [`MsgHeader`], then
/// `params_len` bytes of parameter block, then `payload_len` bytes of
/// payload.
///
/// The header carries sizes only; the parameter block and payload offsets
/// are recomputed from them on each side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgHeader {
    /// Message kind, scoped to the service the frame arrived on.
    pub kind: u32,
    pub params_len: u32,
    pub payload_len: u32,
}

/// Encoded size of a [`MsgHeader`].
pub const HEADER_LEN: usize = 12;

impl MsgHeader {
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, WireError> {
        let mut w = Writer::new(buf);
        w.u32(self.kind)?;
        w.u32(self.params_len)?;
        w.u32(self.payload_len)?;
        Ok(w.finish())
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        Ok(Self {
            kind: r.u32()?,
            params_len: r.u32()?,
            payload_len: r.u32()?,
        })
    }

    /// Total frame length described by this header.
    pub fn total_len(&self) -> usize {
        HEADER_LEN + self.params_len as usize + self.payload_len as usize
    }
}

/// Decode/encode failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    /// The buffer ended before the layout did.
    Truncated,
    /// A kind value the receiving side does not know.
    UnknownKind(u32),
}

/// A transport ring descriptor: base address and length of the backing
/// buffer, as mapped in the shared memory region.
///
/// This is what crosses the wire during service registration instead of a
/// raw pointer; the peer attaches to the same region by address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FifoHandle {
    pub addr: u64,
    pub len: u32,
}

impl FifoHandle {
    pub const LEN: usize = 12;

    /// The "no fifo on this side" placeholder for services that only send
    /// or only receive.
    pub const NONE: Self = Self { addr: 0, len: 0 };

    pub fn is_none(&self) -> bool {
        self.addr == 0 && self.len == 0
    }

    fn put(&self, w: &mut Writer<'_>) -> Result<(), WireError> {
        w.u64(self.addr)?;
        w.u32(self.len)
    }

    fn take(r: &mut Reader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            addr: r.u64()?,
            len: r.u32()?,
        })
    }
}

/// A bare result code, the reply parameter block shared by most
/// request/reply pairs. Zero is success; anything else is a service
/// specific refusal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultReply {
    pub result: i32,
}

impl ResultReply {
    pub const LEN: usize = 4;

    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, WireError> {
        let mut w = Writer::new(buf);
        w.i32(self.result)?;
        Ok(w.finish())
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        Ok(Self { result: r.i32()? })
    }
}

/// Service id assignments. Id 0 is reserved for the control plane.
pub mod service {
    /// A service id on the wire.
    pub type Id = u8;

    pub const CONTROL: Id = 0;
    pub const DEBUG_LOG: Id = 1;
    pub const VOICE: Id = 2;
    pub const PCM: Id = 3;
    pub const BRIDGE: Id = 4;

    /// Size of the service table on both sides.
    pub const MAX_SERVICES: usize = 13;
}

/// Control plane messages (service id 0): stack init/deinit, service
/// registration, timing queries, and peer-initiated configuration writes.
pub mod control {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(u32)]
    pub enum Kind {
        RequestInit = 0,
        ReplyInit = 1,
        Deinit = 2,
        RequestRegister = 3,
        ReplyRegister = 4,
        RequestDeregister = 5,
        ReplyDeregister = 6,
        RequestTiming = 7,
        ReplyTiming = 8,
        WriteConfiguration = 9,
        ReplyWriteConfiguration = 10,
        Menu = 11,
    }

    impl TryFrom<u32> for Kind {
        type Error = WireError;

        fn try_from(raw: u32) -> Result<Self, WireError> {
            Ok(match raw {
                0 => Kind::RequestInit,
                1 => Kind::ReplyInit,
                2 => Kind::Deinit,
                3 => Kind::RequestRegister,
                4 => Kind::ReplyRegister,
                5 => Kind::RequestDeregister,
                6 => Kind::ReplyDeregister,
                7 => Kind::RequestTiming,
                8 => Kind::ReplyTiming,
                9 => Kind::WriteConfiguration,
                10 => Kind::ReplyWriteConfiguration,
                11 => Kind::Menu,
                other => return Err(WireError::UnknownKind(other)),
            })
        }
    }

    /// Length of the statistics payload attached to a timing reply.
    pub const TIMING_STATS_LEN: usize = 66 * 8;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InitRequest {
        pub options: u32,
    }

    impl InitRequest {
        pub const LEN: usize = 4;

        pub fn encode(&self, buf: &mut [u8]) -> Result<usize, WireError> {
            let mut w = Writer::new(buf);
            w.u32(self.options)?;
            Ok(w.finish())
        }

        pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
            let mut r = Reader::new(buf);
            Ok(Self { options: r.u32()? })
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RegisterRequest {
        pub id: u32,
        /// Host to peer ring, or [`FifoHandle::NONE`].
        pub tx: FifoHandle,
        /// Peer to host ring, or [`FifoHandle::NONE`].
        pub rx: FifoHandle,
    }

    impl RegisterRequest {
        pub const LEN: usize = 4 + 2 * FifoHandle::LEN;

        pub fn encode(&self, buf: &mut [u8]) -> Result<usize, WireError> {
            let mut w = Writer::new(buf);
            w.u32(self.id)?;
            self.tx.put(&mut w)?;
            self.rx.put(&mut w)?;
            Ok(w.finish())
        }

        pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
            let mut r = Reader::new(buf);
            Ok(Self {
                id: r.u32()?,
                tx: FifoHandle::take(&mut r)?,
                rx: FifoHandle::take(&mut r)?,
            })
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RegisterReply {
        pub id: u32,
        pub result: i32,
    }

    impl RegisterReply {
        pub const LEN: usize = 8;

        pub fn encode(&self, buf: &mut [u8]) -> Result<usize, WireError> {
            let mut w = Writer::new(buf);
            w.u32(self.id)?;
            w.i32(self.result)?;
            Ok(w.finish())
        }

        pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
            let mut r = Reader::new(buf);
            Ok(Self {
                id: r.u32()?,
                result: r.i32()?,
            })
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeregisterRequest {
        pub id: u32,
    }

    impl DeregisterRequest {
        pub const LEN: usize = 4;

        pub fn encode(&self, buf: &mut [u8]) -> Result<usize, WireError> {
            let mut w = Writer::new(buf);
            w.u32(self.id)?;
            Ok(w.finish())
        }

        pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
            let mut r = Reader::new(buf);
            Ok(Self { id: r.u32()? })
        }
    }

    /// Deregister replies share the register reply layout.
    pub type DeregisterReply = RegisterReply;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TimingRequest {
        pub options: u32,
    }

    impl TimingRequest {
        pub const LEN: usize = 4;

        pub fn encode(&self, buf: &mut [u8]) -> Result<usize, WireError> {
            let mut w = Writer::new(buf);
            w.u32(self.options)?;
            Ok(w.finish())
        }

        pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
            let mut r = Reader::new(buf);
            Ok(Self { options: r.u32()? })
        }
    }

    /// Reply to a timing request. The frame additionally carries a
    /// [`TIMING_STATS_LEN`] byte statistics payload.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TimingReply {
        pub timestamp: u64,
    }

    impl TimingReply {
        pub const LEN: usize = 8;

        pub fn encode(&self, buf: &mut [u8]) -> Result<usize, WireError> {
            let mut w = Writer::new(buf);
            w.u64(self.timestamp)?;
            Ok(w.finish())
        }

        pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
            let mut r = Reader::new(buf);
            Ok(Self {
                timestamp: r.u64()?,
            })
        }
    }

    /// Peer-initiated configuration write; the configuration bytes travel in
    /// the payload.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WriteConfiguration {
        pub pos: u32,
    }

    impl WriteConfiguration {
        pub const LEN: usize = 4;

        pub fn encode(&self, buf: &mut [u8]) -> Result<usize, WireError> {
            let mut w = Writer::new(buf);
            w.u32(self.pos)?;
            Ok(w.finish())
        }

        pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
            let mut r = Reader::new(buf);
            Ok(Self { pos: r.u32()? })
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WriteConfigurationReply {
        pub bytes_written: i32,
        pub result: i32,
    }

    impl WriteConfigurationReply {
        pub const LEN: usize = 8;

        pub fn encode(&self, buf: &mut [u8]) -> Result<usize, WireError> {
            let mut w = Writer::new(buf);
            w.i32(self.bytes_written)?;
            w.i32(self.result)?;
            Ok(w.finish())
        }

        pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
            let mut r = Reader::new(buf);
            Ok(Self {
                bytes_written: r.i32()?,
                result: r.i32()?,
            })
        }
    }
}

/// Voice service messages: call channel lifecycle, DTMF, RTCP.
pub mod voice {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(u32)]
    pub enum Kind {
        RequestGetChan = 0,
        ReplyGetChan = 1,
        RequestSetChanFifos = 2,
        ReplySetChanFifos = 3,
        RequestStartChan = 4,
        ReplyStartChan = 5,
        RequestStopChan = 6,
        ReplyStopChan = 7,
        RequestFreeChan = 8,
        ReplyFreeChan = 9,
        RequestSendDtmf = 10,
        ReplySendDtmf = 11,
        ReceiveDtmf = 12,
        RequestStartRtcp = 13,
        ReplyStartRtcp = 14,
        RequestStopRtcp = 15,
        ReplyStopRtcp = 16,
        RequestReportRtcp = 17,
        ReplyReportRtcp = 18,
        RemoteStart = 19,
    }

    impl TryFrom<u32> for Kind {
        type Error = WireError;

        fn try_from(raw: u32) -> Result<Self, WireError> {
            Ok(match raw {
                0 => Kind::RequestGetChan,
                1 => Kind::ReplyGetChan,
                2 => Kind::RequestSetChanFifos,
                3 => Kind::ReplySetChanFifos,
                4 => Kind::RequestStartChan,
                5 => Kind::ReplyStartChan,
                6 => Kind::RequestStopChan,
                7 => Kind::ReplyStopChan,
                8 => Kind::RequestFreeChan,
                9 => Kind::ReplyFreeChan,
                10 => Kind::RequestSendDtmf,
                11 => Kind::ReplySendDtmf,
                12 => Kind::ReceiveDtmf,
                13 => Kind::RequestStartRtcp,
                14 => Kind::ReplyStartRtcp,
                15 => Kind::RequestStopRtcp,
                16 => Kind::ReplyStopRtcp,
                17 => Kind::RequestReportRtcp,
                18 => Kind::ReplyReportRtcp,
                19 => Kind::RemoteStart,
                other => return Err(WireError::UnknownKind(other)),
            })
        }
    }

    /// Comfort noise generation options for a voice channel.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CngOptions {
        pub level_rx: i8,
        pub mode_rx: i32,
        pub level_tx: i8,
        pub mode_tx: i32,
        pub max_sid_update: i32,
        pub vad_detect_level: i32,
        pub vad_hangover: i32,
    }

    impl CngOptions {
        pub const LEN: usize = 2 + 5 * 4;

        fn put(&self, w: &mut Writer<'_>) -> Result<(), WireError> {
            w.i8(self.level_rx)?;
            w.i8(self.level_tx)?;
            w.i32(self.mode_rx)?;
            w.i32(self.mode_tx)?;
            w.i32(self.max_sid_update)?;
            w.i32(self.vad_detect_level)?;
            w.i32(self.vad_hangover)
        }

        fn take(r: &mut Reader<'_>) -> Result<Self, WireError> {
            Ok(Self {
                level_rx: r.i8()?,
                level_tx: r.i8()?,
                mode_rx: r.i32()?,
                mode_tx: r.i32()?,
                max_sid_update: r.i32()?,
                vad_detect_level: r.i32()?,
                vad_hangover: r.i32()?,
            })
        }
    }

    /// Request block used by every per-channel operation that carries only
    /// the channel id (get, stop, free, RTCP stop/report).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChanRequest {
        pub id: u32,
    }

    impl ChanRequest {
        pub const LEN: usize = 4;

        pub fn encode(&self, buf: &mut [u8]) -> Result<usize, WireError> {
            let mut w = Writer::new(buf);
            w.u32(self.id)?;
            Ok(w.finish())
        }

        pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
            let mut r = Reader::new(buf);
            Ok(Self { id: r.u32()? })
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SetChanFifosRequest {
        pub id: u32,
        /// Encoded audio, peer to host.
        pub enc: FifoHandle,
        /// Decoded audio, host to peer.
        pub dec: FifoHandle,
    }

    impl SetChanFifosRequest {
        pub const LEN: usize = 4 + 2 * FifoHandle::LEN;

        pub fn encode(&self, buf: &mut [u8]) -> Result<usize, WireError> {
            let mut w = Writer::new(buf);
            w.u32(self.id)?;
            self.enc.put(&mut w)?;
            self.dec.put(&mut w)?;
            Ok(w.finish())
        }

        pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
            let mut r = Reader::new(buf);
            Ok(Self {
                id: r.u32()?,
                enc: FifoHandle::take(&mut r)?,
                dec: FifoHandle::take(&mut r)?,
            })
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StartChanRequest {
        pub id: u32,
        pub rx_codec: u8,
        pub rx_codec_event: u8,
        pub tx_codec: u8,
        pub tx_codec_event: u8,
        pub duration: u32,
        pub opts: u32,
        pub cng: CngOptions,
    }

    impl StartChanRequest {
        pub const LEN: usize = 4 + 4 + 4 + 4 + CngOptions::LEN;

        pub fn encode(&self, buf: &mut [u8]) -> Result<usize, WireError> {
            let mut w = Writer::new(buf);
            w.u32(self.id)?;
            w.u8(self.rx_codec)?;
            w.u8(self.rx_codec_event)?;
            w.u8(self.tx_codec)?;
            w.u8(self.tx_codec_event)?;
            w.u32(self.duration)?;
            w.u32(self.opts)?;
            self.cng.put(&mut w)?;
            Ok(w.finish())
        }

        pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
            let mut r = Reader::new(buf);
            Ok(Self {
                id: r.u32()?,
                rx_codec: r.u8()?,
                rx_codec_event: r.u8()?,
                tx_codec: r.u8()?,
                tx_codec_event: r.u8()?,
                duration: r.u32()?,
                opts: r.u32()?,
                cng: CngOptions::take(&mut r)?,
            })
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SendDtmfRequest {
        pub id: u32,
        pub status: i32,
        pub event: i32,
        pub volume: i32,
        pub duration: u32,
        pub event_duration: u32,
        pub max_event_duration: u32,
    }

    impl SendDtmfRequest {
        pub const LEN: usize = 7 * 4;

        pub fn encode(&self, buf: &mut [u8]) -> Result<usize, WireError> {
            let mut w = Writer::new(buf);
            w.u32(self.id)?;
            w.i32(self.status)?;
            w.i32(self.event)?;
            w.i32(self.volume)?;
            w.u32(self.duration)?;
            w.u32(self.event_duration)?;
            w.u32(self.max_event_duration)?;
            Ok(w.finish())
        }

        pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
            let mut r = Reader::new(buf);
            Ok(Self {
                id: r.u32()?,
                status: r.i32()?,
                event: r.i32()?,
                volume: r.i32()?,
                duration: r.u32()?,
                event_duration: r.u32()?,
                max_event_duration: r.u32()?,
            })
        }
    }

    /// Peer-detected DTMF event.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ReceiveDtmf {
        pub id: u32,
        pub status: i32,
        pub event: i32,
        pub volume: i32,
        pub duration: u32,
    }

    impl ReceiveDtmf {
        pub const LEN: usize = 5 * 4;

        pub fn encode(&self, buf: &mut [u8]) -> Result<usize, WireError> {
            let mut w = Writer::new(buf);
            w.u32(self.id)?;
            w.i32(self.status)?;
            w.i32(self.event)?;
            w.i32(self.volume)?;
            w.u32(self.duration)?;
            Ok(w.finish())
        }

        pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
            let mut r = Reader::new(buf);
            Ok(Self {
                id: r.u32()?,
                status: r.i32()?,
                event: r.i32()?,
                volume: r.i32()?,
                duration: r.u32()?,
            })
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StartRtcpRequest {
        pub id: u32,
        pub interval: u32,
    }

    impl StartRtcpRequest {
        pub const LEN: usize = 8;

        pub fn encode(&self, buf: &mut [u8]) -> Result<usize, WireError> {
            let mut w = Writer::new(buf);
            w.u32(self.id)?;
            w.u32(self.interval)?;
            Ok(w.finish())
        }

        pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
            let mut r = Reader::new(buf);
            Ok(Self {
                id: r.u32()?,
                interval: r.u32()?,
            })
        }
    }
}

/// PCM audio service messages.
pub mod pcm {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(u32)]
    pub enum Kind {
        RequestStartChan = 0,
        ReplyStartChan = 1,
        RequestStopChan = 2,
        ReplyStopChan = 3,
    }

    impl TryFrom<u32> for Kind {
        type Error = WireError;

        fn try_from(raw: u32) -> Result<Self, WireError> {
            Ok(match raw {
                0 => Kind::RequestStartChan,
                1 => Kind::ReplyStartChan,
                2 => Kind::RequestStopChan,
                3 => Kind::ReplyStopChan,
                other => return Err(WireError::UnknownKind(other)),
            })
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StartChanRequest {
        pub id: u32,
        /// Sample ring, host to peer.
        pub fifo: FifoHandle,
    }

    impl StartChanRequest {
        pub const LEN: usize = 4 + FifoHandle::LEN;

        pub fn encode(&self, buf: &mut [u8]) -> Result<usize, WireError> {
            let mut w = Writer::new(buf);
            w.u32(self.id)?;
            self.fifo.put(&mut w)?;
            Ok(w.finish())
        }

        pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
            let mut r = Reader::new(buf);
            Ok(Self {
                id: r.u32()?,
                fifo: FifoHandle::take(&mut r)?,
            })
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StopChanRequest {
        pub id: u32,
    }

    impl StopChanRequest {
        pub const LEN: usize = 4;

        pub fn encode(&self, buf: &mut [u8]) -> Result<usize, WireError> {
            let mut w = Writer::new(buf);
            w.u32(self.id)?;
            Ok(w.finish())
        }

        pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
            let mut r = Reader::new(buf);
            Ok(Self { id: r.u32()? })
        }
    }
}

/// Debug log forwarding (peer to host only).
pub mod debug_log {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(u32)]
    pub enum Kind {
        /// The payload is raw log text.
        Print = 0,
    }

    impl TryFrom<u32> for Kind {
        type Error = WireError;

        fn try_from(raw: u32) -> Result<Self, WireError> {
            match raw {
                0 => Ok(Kind::Print),
                other => Err(WireError::UnknownKind(other)),
            }
        }
    }
}

/// Generic pass-through bridge between a host socket surface and the peer.
pub mod bridge {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(u32)]
    pub enum Kind {
        /// Opaque payload, forwarded verbatim in either direction.
        Data = 0,
    }

    impl TryFrom<u32> for Kind {
        type Error = WireError;

        fn try_from(raw: u32) -> Result<Self, WireError> {
            match raw {
                0 => Ok(Kind::Data),
                other => Err(WireError::UnknownKind(other)),
            }
        }
    }
}

// === little-endian plumbing ===

struct Writer<'a> {
    buf: &'a mut [u8],
    at: usize,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, at: 0 }
    }

    fn bytes(&mut self, raw: &[u8]) -> Result<(), WireError> {
        let end = self.at + raw.len();
        let dst = self.buf.get_mut(self.at..end).ok_or(WireError::Truncated)?;
        dst.copy_from_slice(raw);
        self.at = end;
        Ok(())
    }

    fn u8(&mut self, v: u8) -> Result<(), WireError> {
        self.bytes(&[v])
    }

    fn i8(&mut self, v: i8) -> Result<(), WireError> {
        self.bytes(&[v as u8])
    }

    fn u32(&mut self, v: u32) -> Result<(), WireError> {
        self.bytes(&v.to_le_bytes())
    }

    fn i32(&mut self, v: i32) -> Result<(), WireError> {
        self.bytes(&v.to_le_bytes())
    }

    fn u64(&mut self, v: u64) -> Result<(), WireError> {
        self.bytes(&v.to_le_bytes())
    }

    fn finish(self) -> usize {
        self.at
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    at: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, at: 0 }
    }

    fn bytes<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let end = self.at + N;
        let src = self.buf.get(self.at..end).ok_or(WireError::Truncated)?;
        let mut raw = [0u8; N];
        raw.copy_from_slice(src);
        self.at = end;
        Ok(raw)
    }

    fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.bytes::<1>()?[0])
    }

    fn i8(&mut self) -> Result<i8, WireError> {
        Ok(self.bytes::<1>()?[0] as i8)
    }

    fn u32(&mut self) -> Result<u32, WireError> {
        Ok(u32::from_le_bytes(self.bytes()?))
    }

    fn i32(&mut self) -> Result<i32, WireError> {
        Ok(i32::from_le_bytes(self.bytes()?))
    }

    fn u64(&mut self) -> Result<u64, WireError> {
        Ok(u64::from_le_bytes(self.bytes()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_three_le_words() {
        let hdr = MsgHeader {
            kind: 7,
            params_len: 28,
            payload_len: 0x0102,
        };
        let mut buf = [0u8; HEADER_LEN];
        assert_eq!(hdr.encode(&mut buf), Ok(HEADER_LEN));
        assert_eq!(
            buf,
            [7, 0, 0, 0, 28, 0, 0, 0, 0x02, 0x01, 0, 0],
        );
        assert_eq!(MsgHeader::decode(&buf), Ok(hdr));
        assert_eq!(hdr.total_len(), HEADER_LEN + 28 + 0x0102);
    }

    #[test]
    fn truncated_buffers_are_rejected() {
        let mut short = [0u8; HEADER_LEN - 1];
        let hdr = MsgHeader {
            kind: 0,
            params_len: 0,
            payload_len: 0,
        };
        assert_eq!(hdr.encode(&mut short), Err(WireError::Truncated));
        assert_eq!(MsgHeader::decode(&short), Err(WireError::Truncated));
        assert_eq!(
            control::RegisterRequest::decode(&[0u8; 10]),
            Err(WireError::Truncated)
        );
    }

    #[test]
    fn register_request_layout() {
        let req = control::RegisterRequest {
            id: 3,
            tx: FifoHandle {
                addr: 0x1000_2000,
                len: 256,
            },
            rx: FifoHandle::NONE,
        };
        let mut buf = [0u8; control::RegisterRequest::LEN];
        assert_eq!(req.encode(&mut buf), Ok(control::RegisterRequest::LEN));
        // id, then tx.addr/tx.len, then an all-zero rx descriptor.
        assert_eq!(&buf[..4], &[3, 0, 0, 0]);
        assert_eq!(&buf[4..12], &[0x00, 0x20, 0x00, 0x10, 0, 0, 0, 0]);
        assert_eq!(&buf[12..16], &[0, 1, 0, 0]);
        assert!(buf[16..].iter().all(|&b| b == 0));

        let back = control::RegisterRequest::decode(&buf).unwrap();
        assert_eq!(back, req);
        assert!(back.rx.is_none());
    }

    #[test]
    fn control_kind_values_are_stable() {
        // These are wire values shared with the peer firmware; they must not
        // drift when variants are touched.
        assert_eq!(control::Kind::RequestInit as u32, 0);
        assert_eq!(control::Kind::ReplyDeregister as u32, 6);
        assert_eq!(control::Kind::Menu as u32, 11);
        assert_eq!(control::Kind::try_from(8), Ok(control::Kind::ReplyTiming));
        assert_eq!(
            control::Kind::try_from(42),
            Err(WireError::UnknownKind(42))
        );
    }

    #[test]
    fn voice_start_chan_round_trip() {
        let req = voice::StartChanRequest {
            id: 2,
            rx_codec: 9,
            rx_codec_event: 101,
            tx_codec: 9,
            tx_codec_event: 101,
            duration: 20,
            opts: 0,
            cng: voice::CngOptions {
                level_rx: -60,
                mode_rx: 1,
                level_tx: -60,
                mode_tx: 1,
                max_sid_update: 5,
                vad_detect_level: 3,
                vad_hangover: 40,
            },
        };
        let mut buf = [0u8; voice::StartChanRequest::LEN];
        assert_eq!(req.encode(&mut buf), Ok(voice::StartChanRequest::LEN));
        assert_eq!(voice::StartChanRequest::decode(&buf), Ok(req));
    }

    #[test]
    fn pcm_start_chan_carries_the_sample_ring() {
        let req = pcm::StartChanRequest {
            id: 0,
            fifo: FifoHandle {
                addr: 0xdead_beef,
                len: 4096,
            },
        };
        let mut buf = [0u8; pcm::StartChanRequest::LEN];
        req.encode(&mut buf).unwrap();
        let back = pcm::StartChanRequest::decode(&buf).unwrap();
        assert_eq!(back.fifo.addr, 0xdead_beef);
        assert_eq!(back.fifo.len, 4096);
    }
}
