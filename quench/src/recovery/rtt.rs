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
use std::time::Instant;

use super::GRANULARITY;

pub(crate) const INITIAL_RTT: Duration = Duration::from_millis(333);

const MIN_RTO: Duration = Duration::from_millis(200);

/// Round-trip time estimation as consumed by the congestion controller and
/// the retransmission timer.
///
/// Written by the sent-packet handler on each RTT sample, read by everyone
/// else. `min_rtt` is the minimum over the connection lifetime.
pub struct RttStats {
    latest_rtt: Duration,

    smoothed_rtt: Duration,

    rttvar: Duration,

    min_rtt: Duration,

    max_ack_delay: Duration,

    first_rtt_sample: Option<Instant>,
}

impl std::fmt::Debug for RttStats {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("RttStats")
            .field("latest_rtt", &self.latest_rtt)
            .field("srtt", &self.smoothed_rtt)
            .field("minrtt", &self.min_rtt)
            .field("rttvar", &self.rttvar)
            .finish()
    }
}

impl RttStats {
    pub fn new(max_ack_delay: Duration) -> Self {
        RttStats {
            latest_rtt: Duration::ZERO,
            smoothed_rtt: INITIAL_RTT,
            rttvar: INITIAL_RTT / 2,
            min_rtt: Duration::ZERO,
            max_ack_delay,
            first_rtt_sample: None,
        }
    }

    pub fn update_rtt(
        &mut self, latest_rtt: Duration, ack_delay: Duration, now: Instant,
    ) {
        self.latest_rtt = latest_rtt;

        if self.first_rtt_sample.is_none() {
            self.min_rtt = latest_rtt;
            self.smoothed_rtt = latest_rtt;
            self.rttvar = latest_rtt / 2;
            self.first_rtt_sample = Some(now);
            return;
        }

        // min_rtt ignores acknowledgment delay.
        self.min_rtt = self.min_rtt.min(latest_rtt);

        // Adjust for acknowledgment delay if plausible.
        let ack_delay = ack_delay.min(self.max_ack_delay);
        let adjusted_rtt = if latest_rtt >= self.min_rtt + ack_delay {
            latest_rtt - ack_delay
        } else {
            latest_rtt
        };

        self.rttvar = self.rttvar * 3 / 4 +
            Duration::from_nanos(
                self.smoothed_rtt
                    .as_nanos()
                    .abs_diff(adjusted_rtt.as_nanos()) as u64 /
                    4,
            );

        self.smoothed_rtt = self.smoothed_rtt * 7 / 8 + adjusted_rtt / 8;
    }

    pub fn latest_rtt(&self) -> Duration {
        self.latest_rtt
    }

    pub fn smoothed_rtt(&self) -> Duration {
        self.smoothed_rtt
    }

    pub fn min_rtt(&self) -> Duration {
        self.min_rtt
    }

    pub fn max_ack_delay(&self) -> Duration {
        self.max_ack_delay
    }

    pub fn first_rtt_sample(&self) -> Option<Instant> {
        self.first_rtt_sample
    }

    /// The base retransmission timeout. Exponential backoff for successive
    /// timeouts is applied by the caller.
    pub fn rto(&self) -> Duration {
        let rto =
            self.smoothed_rtt + (self.rttvar * 4).max(GRANULARITY) + self.max_ack_delay;

        rto.max(MIN_RTO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX_ACK_DELAY: Duration = Duration::from_millis(25);

    fn rtt_stats() -> RttStats {
        RttStats::new(MAX_ACK_DELAY)
    }

    #[test]
    fn initial_state() {
        let r = rtt_stats();
        assert_eq!(r.smoothed_rtt(), INITIAL_RTT);
        assert_eq!(r.min_rtt(), Duration::ZERO);
        assert!(r.first_rtt_sample().is_none());
    }

    #[test]
    fn first_sample_seeds_estimator() {
        let mut r = rtt_stats();
        let now = Instant::now();

        r.update_rtt(Duration::from_millis(300), Duration::ZERO, now);

        assert_eq!(r.latest_rtt(), Duration::from_millis(300));
        assert_eq!(r.smoothed_rtt(), Duration::from_millis(300));
        assert_eq!(r.min_rtt(), Duration::from_millis(300));
        assert!(r.first_rtt_sample().is_some());
    }

    #[test]
    fn smoothing() {
        let mut r = rtt_stats();
        let now = Instant::now();

        r.update_rtt(Duration::from_millis(300), Duration::ZERO, now);
        r.update_rtt(Duration::from_millis(400), Duration::ZERO, now);

        // srtt = 7/8 * 300 + 1/8 * 400, rttvar = 3/4 * 150 + 1/4 * 100.
        assert_eq!(r.smoothed_rtt(), Duration::from_micros(312_500));
        assert_eq!(r.latest_rtt(), Duration::from_millis(400));
        assert_eq!(r.min_rtt(), Duration::from_millis(300));
    }

    #[test]
    fn min_rtt_is_monotonic() {
        let mut r = rtt_stats();
        let now = Instant::now();

        r.update_rtt(Duration::from_millis(200), Duration::ZERO, now);
        r.update_rtt(Duration::from_millis(100), Duration::ZERO, now);
        r.update_rtt(Duration::from_millis(300), Duration::ZERO, now);

        assert_eq!(r.min_rtt(), Duration::from_millis(100));
    }

    #[test]
    fn ack_delay_subtracted_when_plausible() {
        let mut r = rtt_stats();
        let now = Instant::now();

        r.update_rtt(Duration::from_millis(100), Duration::ZERO, now);
        // 120ms sample with 10ms of peer ack delay counts as 110ms.
        r.update_rtt(
            Duration::from_millis(120),
            Duration::from_millis(10),
            now,
        );

        // srtt = 7/8 * 100 + 1/8 * 110.
        assert_eq!(r.smoothed_rtt(), Duration::from_micros(101_250));
    }

    #[test]
    fn ack_delay_ignored_below_min_rtt() {
        let mut r = rtt_stats();
        let now = Instant::now();

        r.update_rtt(Duration::from_millis(100), Duration::ZERO, now);
        // Subtracting 20ms would push the sample below min_rtt, so the raw
        // sample is used.
        r.update_rtt(
            Duration::from_millis(110),
            Duration::from_millis(20),
            now,
        );

        // srtt = 7/8 * 100 + 1/8 * 110.
        assert_eq!(r.smoothed_rtt(), Duration::from_micros(101_250));
    }

    #[test]
    fn ack_delay_clamped_to_max_ack_delay() {
        let mut r = rtt_stats();
        let now = Instant::now();

        r.update_rtt(Duration::from_millis(100), Duration::ZERO, now);
        // 100ms of claimed ack delay is clamped to the 25ms maximum.
        r.update_rtt(
            Duration::from_millis(200),
            Duration::from_millis(100),
            now,
        );

        // srtt = 7/8 * 100 + 1/8 * 175.
        assert_eq!(r.smoothed_rtt(), Duration::from_micros(109_375));
    }

    #[test]
    fn rto_has_floor() {
        let mut r = rtt_stats();
        let now = Instant::now();

        r.update_rtt(Duration::from_millis(10), Duration::ZERO, now);
        r.update_rtt(Duration::from_millis(10), Duration::ZERO, now);

        // 10ms srtt with a tiny variance is still floored at 200ms.
        assert_eq!(r.rto(), MIN_RTO);
    }

    #[test]
    fn rto_formula() {
        let mut r = rtt_stats();
        let now = Instant::now();

        r.update_rtt(Duration::from_millis(400), Duration::ZERO, now);

        // srtt + 4 * rttvar + max_ack_delay = 400 + 800 + 25.
        assert_eq!(r.rto(), Duration::from_millis(1225));
    }
}
