//! Bundled services
//!
//! Each service multiplexes over its own pair of rings and brings its own
//! closed set of message kinds (defined in [`tandem_proto`]). The registry
//! treats all of them uniformly; what differs is the external surface each
//! one bridges to:
//!
//! * [`debug_log`] - peer log output, forwarded to a [`debug_log::LogSink`]
//! * [`voice`] - call channels with per-channel media rings, DTMF and RTCP
//! * [`pcm`] - raw audio streaming with backpressure
//! * [`bridge`] - opaque datagram pass-through for a host socket surface
//!
//! Service id assignments live in [`tandem_proto::service`].

pub mod bridge;
pub mod debug_log;
pub mod pcm;
pub mod voice;
