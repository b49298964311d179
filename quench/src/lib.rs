// Copyright (C) 2024, Cloudflare, Inc.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are
// met:
//
//     * Redistributions of source code must retain the above copyright notice,
//       this list of conditions and the following disclaimer.
//
//     * Redistributions in binary form must reproduce the above copyright
//       notice, this list of conditions and the following disclaimer in the
//       documentation and/or other materials provided with the distribution.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS
// IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO,
// THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR
// PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR
// CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL,
// EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO,
// PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR
// PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF
// LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING
// NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE OF THIS
// SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! Congestion control and pacing for QUIC senders.
//!
//! quench is the congestion-and-pacing core of a QUIC endpoint: it decides,
//! for every outgoing packet, whether it may be transmitted now, when the
//! next transmission should be attempted, and how the connection reacts to
//! acknowledgments, losses, retransmission timeouts and path changes. The
//! wire format, TLS, streams and I/O all live elsewhere; this crate only
//! sees packet numbers, byte counts and instants.
//!
//! Two send algorithms implement the [`SendAlgorithm`] contract: a CUBIC
//! controller with an optional NewReno growth mode, and the pass-through
//! "Loco" controller for private links where congestion response is
//! deliberately disabled.
//!
//! ## Usage
//!
//! A connection builds its packet handlers once it is established:
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use quench::CongestionAlgorithm;
//! use quench::Config;
//! use quench::Perspective;
//! use quench::RttStats;
//! use quench::SystemClock;
//!
//! let config = Config::default();
//! let rtt_stats = Rc::new(RefCell::new(RttStats::new(config.max_ack_delay)));
//!
//! let (mut sent, mut received) = quench::new_ack_handler(
//!     0,
//!     &config,
//!     Rc::new(SystemClock),
//!     rtt_stats,
//!     Perspective::Client,
//!     None,
//!     "conn-1",
//!     1,
//!     CongestionAlgorithm::Cubic,
//! );
//!
//! // The send loop consults the handler before each packet...
//! assert!(sent.can_send());
//! let now = std::time::Instant::now();
//! sent.on_packet_sent(0, now, 1200, true, true);
//!
//! // ...and feeds it the peer's acks as they are parsed.
//! received.on_packet_received(0, now);
//! sent.on_ack_received(&[0..=0], std::time::Duration::ZERO, now);
//! ```
//!
//! Time is always injected: the controller reads the [`Clock`] it was
//! built with and methods take explicit `Instant`s, so tests can script
//! every tick. All calls must come from the single task that owns the
//! connection; nothing here locks or blocks.

#[macro_use]
extern crate log;

pub use crate::clock::Clock;
pub use crate::clock::SystemClock;

pub use crate::tracer::CongestionState;
pub use crate::tracer::LossReason;
pub use crate::tracer::Tracer;

pub use crate::recovery::bandwidth::Bandwidth;
pub use crate::recovery::congestion::Congestion;
pub use crate::recovery::congestion::CongestionAlgorithm;
pub use crate::recovery::congestion::CubicSender;
pub use crate::recovery::congestion::GrowthMode;
pub use crate::recovery::congestion::LocoSender;
pub use crate::recovery::congestion::SendAlgorithm;
pub use crate::recovery::congestion::SendAlgorithmWithDebugInfos;
pub use crate::recovery::new_ack_handler;
pub use crate::recovery::rtt::RttStats;
pub use crate::recovery::Config;
pub use crate::recovery::ReceivedPacketHandler;
pub use crate::recovery::SentPacketHandler;

/// A specialized [`Result`] type for quench operations.
///
/// [`Result`]: https://doc.rust-lang.org/std/result/enum.Result.html
pub type Result<T> = std::result::Result<T, Error>;

/// A quench error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// Error in congestion control, e.g. an unknown algorithm name.
    CongestionControl,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

/// Which side of the connection this endpoint is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Perspective {
    Client,
    Server,
}

pub mod clock;
pub mod recovery;
pub mod tracer;
