// Copyright (c) 2012 The Chromium Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

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

use std::time::Duration;

/// Number of RTT samples examined per round.
const HYBRID_START_MIN_SAMPLES: usize = 8;

/// The RTT inflation threshold is min_rtt divided by 8 (shifted right).
const HYBRID_START_DELAY_FACTOR_EXP: u32 = 3;

/// Do not exit below 16 packets of congestion window.
const HYBRID_START_LOW_WINDOW: usize = 16;

const HYBRID_START_DELAY_MIN_THRESHOLD: Duration = Duration::from_millis(4);
const HYBRID_START_DELAY_MAX_THRESHOLD: Duration = Duration::from_millis(16);

/// Detection of the slow-start exit point from RTT inflation, before any
/// packet is lost.
///
/// Acknowledgments are grouped into rounds: a round ends when the largest
/// packet sent at the start of the round is acknowledged. Within a round the
/// minimum RTT over the first eight samples is compared against the
/// connection minimum; once the round minimum exceeds it by more than an
/// eighth (clamped to [4ms, 16ms]), slow start should end.
#[derive(Debug, Default)]
pub(super) struct HybridSlowStart {
    /// Whether a round is being tracked.
    started: bool,

    /// Whether the exit condition has been met.
    found: bool,

    /// Last packet number sent before the round started.
    last_sent_packet_number: u64,

    /// The packet number whose ack ends the current round.
    end_packet_number: Option<u64>,

    /// RTT samples taken in the current round.
    rtt_sample_count: usize,

    /// The minimum RTT seen in the current round.
    current_min_rtt: Duration,
}

impl HybridSlowStart {
    /// Forgets the current round and any exit decision, as after a
    /// retransmission timeout sends the controller back to slow start.
    pub(super) fn restart(&mut self) {
        self.started = false;
        self.found = false;
    }

    pub(super) fn on_packet_sent(&mut self, packet_number: u64) {
        self.last_sent_packet_number = packet_number;
    }

    /// Called for every acked packet while in slow start. Ends the round
    /// when its final packet is acked; the next RTT sample starts a new one.
    pub(super) fn on_packet_acked(&mut self, acked_packet_number: u64) {
        if self.is_end_of_round(acked_packet_number) {
            self.started = false;
        }
    }

    fn start_receive_round(&mut self, last_sent: u64) {
        self.end_packet_number = Some(last_sent);
        self.current_min_rtt = Duration::ZERO;
        self.rtt_sample_count = 0;
        self.started = true;
    }

    fn is_end_of_round(&self, acked_packet_number: u64) -> bool {
        self.end_packet_number
            .map_or(true, |end| end <= acked_packet_number)
    }

    /// Whether slow start should end, fed with the newest RTT sample, the
    /// connection minimum, and the congestion window in packets.
    pub(super) fn should_exit_slow_start(
        &mut self, latest_rtt: Duration, min_rtt: Duration,
        congestion_window_packets: usize,
    ) -> bool {
        if !self.started {
            self.start_receive_round(self.last_sent_packet_number);
        }

        if self.found {
            return true;
        }

        // Track the minimum delay of the first samples of the round; the
        // comparison is between the burst's lowest RTT and earlier bursts,
        // so later samples of a large burst are ignored.
        self.rtt_sample_count += 1;
        if self.rtt_sample_count <= HYBRID_START_MIN_SAMPLES &&
            (self.current_min_rtt.is_zero() ||
                self.current_min_rtt > latest_rtt)
        {
            self.current_min_rtt = latest_rtt;
        }

        // The decision is made once per round, on the last counted sample.
        if self.rtt_sample_count == HYBRID_START_MIN_SAMPLES {
            let threshold = (min_rtt / (1 << HYBRID_START_DELAY_FACTOR_EXP))
                .clamp(
                    HYBRID_START_DELAY_MIN_THRESHOLD,
                    HYBRID_START_DELAY_MAX_THRESHOLD,
                );

            if self.current_min_rtt > min_rtt + threshold {
                self.found = true;
            }
        }

        congestion_window_packets >= HYBRID_START_LOW_WINDOW && self.found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_end_at_the_recorded_packet() {
        let mut slow_start = HybridSlowStart::default();
        let rtt = Duration::from_millis(60);

        slow_start.on_packet_sent(5);

        // The first sample starts a round ending at packet 5.
        assert!(!slow_start.should_exit_slow_start(rtt, rtt, 100));
        slow_start.on_packet_sent(8);

        // Acks below the round end leave the round open.
        slow_start.on_packet_acked(3);
        assert!(slow_start.started);

        // Acking packet 5 closes the round; the next sample opens a new one
        // ending at the latest sent packet.
        slow_start.on_packet_acked(5);
        assert!(!slow_start.started);

        assert!(!slow_start.should_exit_slow_start(rtt, rtt, 100));
        assert_eq!(slow_start.end_packet_number, Some(8));
    }

    #[test]
    fn detects_delay_increase() {
        // The increase is detected at +1/8 RTT: at a 60ms RTT, detection
        // happens at 67.5ms.
        let mut slow_start = HybridSlowStart::default();
        let rtt = Duration::from_millis(60);

        slow_start.on_packet_sent(1);

        // The lowest RTT of this burst matches the long-term RTT, so no
        // exit is signalled.
        for n in 0..HYBRID_START_MIN_SAMPLES as u64 {
            assert!(!slow_start.should_exit_slow_start(
                rtt + Duration::from_millis(n),
                rtt,
                100
            ));
        }
        slow_start.on_packet_acked(1);
        slow_start.on_packet_sent(2);

        // All samples of this burst are well above the long-term RTT; the
        // final sample of the round trips the detector.
        for n in 1..HYBRID_START_MIN_SAMPLES as u64 {
            assert!(!slow_start.should_exit_slow_start(
                rtt + Duration::from_millis(n + 10),
                rtt,
                100
            ));
        }
        assert!(slow_start.should_exit_slow_start(
            rtt + Duration::from_millis(HYBRID_START_MIN_SAMPLES as u64 + 10),
            rtt,
            100
        ));
    }

    #[test]
    fn small_windows_do_not_exit() {
        let mut slow_start = HybridSlowStart::default();
        let rtt = Duration::from_millis(60);

        slow_start.on_packet_sent(1);

        // Inflate every sample so the detector fires, but hold the window
        // below the low-window guard.
        for n in 0..HYBRID_START_MIN_SAMPLES as u64 {
            assert!(!slow_start.should_exit_slow_start(
                rtt + Duration::from_millis(n + 30),
                rtt,
                HYBRID_START_LOW_WINDOW - 1
            ));
        }

        // The decision is latched; a grown window exits immediately.
        assert!(slow_start.should_exit_slow_start(
            rtt,
            rtt,
            HYBRID_START_LOW_WINDOW
        ));
    }

    #[test]
    fn restart_clears_the_decision() {
        let mut slow_start = HybridSlowStart::default();
        let rtt = Duration::from_millis(60);

        slow_start.on_packet_sent(1);
        for n in 0..HYBRID_START_MIN_SAMPLES as u64 {
            slow_start.should_exit_slow_start(
                rtt + Duration::from_millis(n + 30),
                rtt,
                100,
            );
        }
        assert!(slow_start.should_exit_slow_start(rtt, rtt, 100));

        slow_start.restart();
        assert!(!slow_start.should_exit_slow_start(rtt, rtt, 100));
    }
}
