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
use std::time::Instant;

use crate::recovery::bandwidth::Bandwidth;
use crate::tracer::CongestionState;
use crate::tracer::Tracer;

use super::SendAlgorithm;
use super::SendAlgorithmWithDebugInfos;

/// Pass-through controller for links with no congestion to speak of.
///
/// Every operation that would restrict sending answers "go ahead": the
/// window is a constant 1,000,000 packets, pacing always has budget, and
/// acks, losses and timeouts leave no trace. Only the datagram size is
/// tracked, so the advertised window scales with the MTU.
pub struct LocoSender {
    max_datagram_size: usize,

    last_state: CongestionState,
    tracer: Option<Rc<RefCell<dyn Tracer>>>,
}

impl LocoSender {
    pub(crate) fn new(
        initial_max_datagram_size: usize,
        tracer: Option<Rc<RefCell<dyn Tracer>>>,
    ) -> Self {
        LocoSender {
            max_datagram_size: initial_max_datagram_size,
            last_state: CongestionState::SlowStart,
            tracer,
        }
    }

    /// Ceiling the congestion window would have if anything consulted it.
    #[allow(dead_code)]
    fn max_congestion_window(&self) -> usize {
        self.max_datagram_size * 10_000
    }

    /// Floor the congestion window would have if anything consulted it.
    /// Kept for parity with the loss-responding sender; nothing reads it.
    #[allow(dead_code)]
    fn min_congestion_window(&self) -> usize {
        self.max_datagram_size * 1000
    }

}

impl SendAlgorithm for LocoSender {
    fn time_until_send(&self, _bytes: usize) -> Option<Instant> {
        // Now is always a good time.
        None
    }

    fn has_pacing_budget(&self) -> bool {
        true
    }

    fn can_send(&self, _bytes_in_flight: usize) -> bool {
        true
    }

    fn on_packet_sent(
        &mut self, _sent_time: Instant, _packet_number: u64, _bytes: usize,
        _is_retransmittable: bool,
    ) {
        // No accounting needed for a window nothing can fill.
    }

    fn on_packet_acked(
        &mut self, _acked_packet_number: u64, _acked_bytes: usize,
        _prior_in_flight: usize, _event_time: Instant,
    ) {
    }

    fn on_packet_lost(
        &mut self, _packet_number: u64, _lost_bytes: usize,
        _prior_in_flight: usize,
    ) {
    }

    fn on_retransmission_timeout(&mut self, _packets_retransmitted: bool) {}

    fn on_connection_migration(&mut self) {}

    fn maybe_exit_slow_start(&mut self) {}

    fn in_slow_start(&self) -> bool {
        false
    }

    fn in_recovery(&self) -> bool {
        false
    }

    fn get_congestion_window(&self) -> usize {
        self.max_datagram_size * 1_000_000
    }

    fn bandwidth_estimate(&self) -> Bandwidth {
        // 100 Gbit/s, which is to say: not the bottleneck.
        Bandwidth::from_mbits_per_second(100_000)
    }

    fn set_max_datagram_size(&mut self, new_size: usize) {
        self.max_datagram_size = new_size;
    }

    fn notify_initial_state(&mut self) {
        self.last_state = CongestionState::SlowStart;

        if let Some(tracer) = &self.tracer {
            tracer
                .borrow_mut()
                .updated_congestion_state(CongestionState::SlowStart);
        }
    }
}

impl SendAlgorithmWithDebugInfos for LocoSender {
    fn get_slow_start_threshold(&self) -> usize {
        usize::MAX
    }

    fn state(&self) -> CongestionState {
        self.last_state
    }
}
