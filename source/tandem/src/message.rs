//! Message envelopes over ring frames
//!
//! An envelope is one typed message inside one transport frame: header,
//! parameter block, payload. Building writes all three directly into a
//! write grant and commits once, so the message becomes visible to the far
//! side as a unit. Reading is a zero-copy reinterpretation of a read grant;
//! the parameter-block and payload offsets are recomputed from the sizes in
//! the header, exactly as the builder computed them.

use tandem_proto::{MsgHeader, WireError, HEADER_LEN};

use crate::comms::fifo::FifoProducer;

/// A decoded view of one message inside a borrowed frame.
#[derive(Debug, PartialEq, Eq)]
pub struct Envelope<'frame> {
    /// Message kind, scoped to the service whose ring carried the frame.
    pub kind: u32,
    pub params: &'frame [u8],
    pub payload: &'frame [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeError {
    Header(WireError),
    /// The frame is shorter than the sizes in its header claim.
    Short { need: usize, got: usize },
}

impl<'frame> Envelope<'frame> {
    pub fn parse(frame: &'frame [u8]) -> Result<Self, EnvelopeError> {
        let hdr = MsgHeader::decode(frame).map_err(EnvelopeError::Header)?;
        if frame.len() < hdr.total_len() {
            return Err(EnvelopeError::Short {
                need: hdr.total_len(),
                got: frame.len(),
            });
        }

        let params_end = HEADER_LEN + hdr.params_len as usize;
        Ok(Self {
            kind: hdr.kind,
            params: &frame[HEADER_LEN..params_end],
            payload: &frame[params_end..params_end + hdr.payload_len as usize],
        })
    }
}

/// Build one message into `prod` and commit it.
///
/// Propagates [`chute::Error::NoSpace`] untouched; that is the caller's
/// backpressure signal.
pub(crate) fn build(
    prod: &mut FifoProducer,
    kind: u32,
    params: &[u8],
    payload: &[u8],
) -> Result<(), chute::Error> {
    let hdr = MsgHeader {
        kind,
        params_len: params.len() as u32,
        payload_len: payload.len() as u32,
    };
    let total = hdr.total_len();

    let mut wgr = prod.request(total)?;
    wgr.fill(0);
    hdr.encode(&mut wgr[..HEADER_LEN])
        .expect("a frame grant is never shorter than the header");
    wgr[HEADER_LEN..HEADER_LEN + params.len()].copy_from_slice(params);
    wgr[HEADER_LEN + params.len()..total].copy_from_slice(payload);
    wgr.commit(total)?;

    Ok(())
}
