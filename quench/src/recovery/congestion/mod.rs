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

use std::cell::RefCell;
use std::rc::Rc;
use std::str::FromStr;
use std::time::Instant;

use enum_dispatch::enum_dispatch;

use crate::clock::Clock;
use crate::recovery::bandwidth::Bandwidth;
use crate::recovery::rtt::RttStats;
use crate::recovery::Config;
use crate::tracer::CongestionState;
use crate::tracer::Tracer;

pub use cubic::CubicSender;
pub use loco::LocoSender;

mod cubic;
mod loco;
pub(crate) mod pacer;

pub(crate) const MINIMUM_WINDOW_PACKETS: usize = 2;

pub(crate) const PACING_MULTIPLIER: f64 = 1.25;

/// The contract between the packet scheduler and a send algorithm.
///
/// The scheduler asks whether and when it may transmit, reports every send,
/// ack, loss and timeout in event order, and otherwise treats the algorithm
/// as opaque.
#[enum_dispatch]
pub trait SendAlgorithm {
    /// The earliest instant at which `bytes` more bytes may be handed to
    /// the wire, or `None` to send immediately. Purely a pacing decision;
    /// the congestion window gate is [`can_send`](Self::can_send).
    fn time_until_send(&self, bytes: usize) -> Option<Instant>;

    /// Whether the pacer currently permits a full datagram.
    fn has_pacing_budget(&self) -> bool;

    /// Whether the congestion window has room on top of `bytes_in_flight`.
    fn can_send(&self, bytes_in_flight: usize) -> bool;

    /// Reports a packet handed to the wire. Must be called for every
    /// packet; non-retransmittable ones only charge the pacer.
    fn on_packet_sent(
        &mut self, sent_time: Instant, packet_number: u64, bytes: usize,
        is_retransmittable: bool,
    );

    /// Reports a newly acknowledged packet. `prior_in_flight` is the bytes
    /// in flight before the ack event. Within one event, losses are
    /// reported before acks, and acks arrive in ascending packet order.
    fn on_packet_acked(
        &mut self, acked_packet_number: u64, acked_bytes: usize,
        prior_in_flight: usize, event_time: Instant,
    );

    /// Reports a packet declared lost.
    fn on_packet_lost(
        &mut self, packet_number: u64, lost_bytes: usize,
        prior_in_flight: usize,
    );

    /// Reports a retransmission timeout; fired once per timeout burst.
    /// `packets_retransmitted` is false when nothing was actually resent,
    /// in which case the window is left alone.
    fn on_retransmission_timeout(&mut self, packets_retransmitted: bool);

    /// Resets dynamic state after the path changed under the connection.
    /// The datagram size and the algorithm choice survive.
    fn on_connection_migration(&mut self);

    /// Consults the slow-start exit heuristic after an ack was processed.
    fn maybe_exit_slow_start(&mut self);

    fn in_slow_start(&self) -> bool;

    fn in_recovery(&self) -> bool;

    fn get_congestion_window(&self) -> usize;

    fn bandwidth_estimate(&self) -> Bandwidth;

    /// Raises the MTU estimate. Byte bounds scale along; the window itself
    /// never shrinks.
    fn set_max_datagram_size(&mut self, new_size: usize);

    /// Emits the initial congestion state to the tracer. Called once by the
    /// factory, right after construction.
    fn notify_initial_state(&mut self);
}

/// Introspection on top of [`SendAlgorithm`] for logging and diagnostics.
#[enum_dispatch]
pub trait SendAlgorithmWithDebugInfos: SendAlgorithm {
    fn get_slow_start_threshold(&self) -> usize;

    /// The last congestion state the controller entered.
    fn state(&self) -> CongestionState;
}

/// A send algorithm held by the sent-packet handler.
#[enum_dispatch(SendAlgorithm, SendAlgorithmWithDebugInfos)]
pub enum Congestion {
    Cubic(CubicSender),
    Loco(LocoSender),
}

/// Congestion control algorithm selector.
///
/// Anything other than [`Cubic`](CongestionAlgorithm::Cubic) selects the
/// pass-through sender.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CongestionAlgorithm {
    Unknown,
    Cubic,
}

impl FromStr for CongestionAlgorithm {
    type Err = crate::Error;

    /// Converts a string to `CongestionAlgorithm`.
    ///
    /// If `name` is not valid, `Error::CongestionControl` is returned.
    fn from_str(name: &str) -> std::result::Result<Self, Self::Err> {
        match name {
            "cubic" => Ok(CongestionAlgorithm::Cubic),

            _ => Err(crate::Error::CongestionControl),
        }
    }
}

/// Window growth function used by the loss-responding sender.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GrowthMode {
    /// Cubic growth after loss (RFC 8312).
    Cubic,
    /// Classic NewReno additive increase.
    Reno,
}

pub(crate) fn new_sender(
    clock: Rc<dyn Clock>, rtt_stats: Rc<RefCell<RttStats>>, config: &Config,
    algorithm: CongestionAlgorithm, tracer: Option<Rc<RefCell<dyn Tracer>>>,
) -> Congestion {
    let mut sender = match algorithm {
        CongestionAlgorithm::Cubic => Congestion::Cubic(CubicSender::new(
            clock,
            rtt_stats,
            config.growth_mode,
            config.max_datagram_size,
            config.initial_congestion_window_packets * config.max_datagram_size,
            config.max_congestion_window_packets * config.max_datagram_size,
            tracer,
        )),

        CongestionAlgorithm::Unknown => Congestion::Loco(LocoSender::new(
            config.max_datagram_size,
            tracer,
        )),
    };

    sender.notify_initial_state();

    sender
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algorithm_from_str() {
        assert_eq!(
            "cubic".parse::<CongestionAlgorithm>(),
            Ok(CongestionAlgorithm::Cubic)
        );
        assert_eq!(
            "loco".parse::<CongestionAlgorithm>(),
            Err(crate::Error::CongestionControl)
        );
        assert_eq!(
            "bbr".parse::<CongestionAlgorithm>(),
            Err(crate::Error::CongestionControl)
        );
    }

    #[test]
    fn dispatch_matches_algorithm() {
        let config = Config::default();
        let clock = Rc::new(crate::clock::SystemClock);
        let rtt_stats = Rc::new(RefCell::new(RttStats::new(
            config.max_ack_delay,
        )));

        let cubic = new_sender(
            clock.clone(),
            rtt_stats.clone(),
            &config,
            CongestionAlgorithm::Cubic,
            None,
        );
        assert!(matches!(cubic, Congestion::Cubic(_)));
        assert!(cubic.in_slow_start());

        let loco = new_sender(
            clock,
            rtt_stats,
            &config,
            CongestionAlgorithm::Unknown,
            None,
        );
        assert!(matches!(loco, Congestion::Loco(_)));
        assert!(!loco.in_slow_start());
        assert!(loco.can_send(usize::MAX / 2));
    }
}
