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

mod cubic_bytes;
mod hybrid_slow_start;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use cubic_bytes::CubicBytes;
use hybrid_slow_start::HybridSlowStart;

use crate::clock::Clock;
use crate::recovery::bandwidth::Bandwidth;
use crate::recovery::rtt::RttStats;
use crate::tracer::CongestionState;
use crate::tracer::Tracer;

use super::pacer::Pacer;
use super::GrowthMode;
use super::SendAlgorithm;
use super::SendAlgorithmWithDebugInfos;
use super::MINIMUM_WINDOW_PACKETS;
use super::PACING_MULTIPLIER;

/// NewReno multiplicative decrease on loss.
const RENO_BETA: f64 = 0.5;

/// Remaining window below which the sender counts as limited by the
/// congestion window rather than by the application.
const MAX_BURST_PACKETS: usize = 3;

/// Loss-responding send algorithm: CUBIC window growth (or classic NewReno,
/// per [`GrowthMode`]), HybridSlowStart exit detection and token-bucket
/// pacing, composed behind the [`SendAlgorithm`] contract.
pub struct CubicSender {
    hybrid_slow_start: HybridSlowStart,
    cubic: CubicBytes,
    pacer: Pacer,
    rtt_stats: Rc<RefCell<RttStats>>,
    clock: Rc<dyn Clock>,

    growth_mode: GrowthMode,

    /// Largest packet number sent so far.
    largest_sent_packet_number: Option<u64>,

    /// Largest packet number acked so far.
    largest_acked_packet_number: Option<u64>,

    /// Largest packet number outstanding when the window was last cut back.
    /// Losses at or below it belong to the same loss event.
    largest_sent_at_last_cutback: Option<u64>,

    /// Whether the last cutback moved the controller out of slow start.
    last_cutback_exited_slowstart: bool,

    /// Congestion window, in bytes.
    congestion_window: usize,

    /// Slow start threshold, in bytes.
    slow_start_threshold: usize,

    /// Ack counter for NewReno congestion avoidance.
    num_acked_packets: u64,

    initial_congestion_window: usize,
    initial_max_congestion_window: usize,

    max_datagram_size: usize,

    last_state: CongestionState,
    tracer: Option<Rc<RefCell<dyn Tracer>>>,
}

impl CubicSender {
    pub(crate) fn new(
        clock: Rc<dyn Clock>, rtt_stats: Rc<RefCell<RttStats>>,
        growth_mode: GrowthMode, initial_max_datagram_size: usize,
        initial_congestion_window: usize, initial_max_congestion_window: usize,
        tracer: Option<Rc<RefCell<dyn Tracer>>>,
    ) -> Self {
        CubicSender {
            hybrid_slow_start: HybridSlowStart::default(),
            cubic: CubicBytes::new(initial_max_datagram_size),
            pacer: Pacer::new(initial_max_datagram_size),
            rtt_stats,
            clock,
            growth_mode,
            largest_sent_packet_number: None,
            largest_acked_packet_number: None,
            largest_sent_at_last_cutback: None,
            last_cutback_exited_slowstart: false,
            congestion_window: initial_congestion_window,
            slow_start_threshold: usize::MAX,
            num_acked_packets: 0,
            initial_congestion_window,
            initial_max_congestion_window,
            max_datagram_size: initial_max_datagram_size,
            last_state: CongestionState::SlowStart,
            tracer,
        }
    }

    fn min_congestion_window(&self) -> usize {
        MINIMUM_WINDOW_PACKETS * self.max_datagram_size
    }

    fn max_congestion_window(&self) -> usize {
        self.initial_max_congestion_window
    }

    fn pacing_rate(&self) -> Bandwidth {
        self.bandwidth_estimate() * PACING_MULTIPLIER
    }

    fn is_cwnd_limited(&self, bytes_in_flight: usize) -> bool {
        let congestion_window = self.congestion_window;
        if bytes_in_flight >= congestion_window {
            return true;
        }

        let available_bytes = congestion_window - bytes_in_flight;
        let slow_start_limited =
            self.in_slow_start() && bytes_in_flight > congestion_window / 2;

        slow_start_limited ||
            available_bytes <= MAX_BURST_PACKETS * self.max_datagram_size
    }

    // Called once per newly acked packet outside of recovery. QUIC acks
    // every packet individually, so there is no per-ack packet count.
    fn maybe_increase_cwnd(
        &mut self, _acked_packet_number: u64, acked_bytes: usize,
        prior_in_flight: usize, event_time: Instant,
    ) {
        // Do not grow the window unless the sender actually uses it.
        if !self.is_cwnd_limited(prior_in_flight) {
            self.cubic.on_app_limited();
            self.maybe_trace_state_change(CongestionState::ApplicationLimited);
            return;
        }

        if self.congestion_window >= self.max_congestion_window() {
            return;
        }

        if self.in_slow_start() {
            // Exponential growth, one MSS per acked packet.
            self.congestion_window = (self.congestion_window +
                self.max_datagram_size)
                .min(self.max_congestion_window());
            self.maybe_trace_state_change(CongestionState::SlowStart);
            return;
        }

        self.maybe_trace_state_change(CongestionState::CongestionAvoidance);

        match self.growth_mode {
            GrowthMode::Reno => {
                // Classic Reno: one MSS per acked window.
                self.num_acked_packets += 1;
                if self.num_acked_packets >=
                    (self.congestion_window / self.max_datagram_size) as u64
                {
                    self.congestion_window = (self.congestion_window +
                        self.max_datagram_size)
                        .min(self.max_congestion_window());
                    self.num_acked_packets = 0;
                }
            },

            GrowthMode::Cubic => {
                let min_rtt = self.rtt_stats.borrow().min_rtt();
                self.congestion_window = self.max_congestion_window().min(
                    self.cubic.congestion_window_after_ack(
                        acked_bytes,
                        self.congestion_window,
                        min_rtt,
                        event_time,
                    ),
                );
            },
        }
    }

    fn maybe_trace_state_change(&mut self, new_state: CongestionState) {
        if new_state == self.last_state {
            return;
        }

        self.last_state = new_state;

        if let Some(tracer) = &self.tracer {
            tracer.borrow_mut().updated_congestion_state(new_state);
        }
    }
}

impl SendAlgorithm for CubicSender {
    fn time_until_send(&self, bytes: usize) -> Option<Instant> {
        self.pacer
            .time_until_send(self.clock.now(), bytes, self.pacing_rate())
    }

    fn has_pacing_budget(&self) -> bool {
        self.pacer.budget(self.clock.now(), self.pacing_rate()) >=
            self.max_datagram_size
    }

    fn can_send(&self, bytes_in_flight: usize) -> bool {
        bytes_in_flight < self.congestion_window
    }

    fn on_packet_sent(
        &mut self, sent_time: Instant, packet_number: u64, bytes: usize,
        is_retransmittable: bool,
    ) {
        self.pacer
            .on_packet_sent(sent_time, bytes, self.pacing_rate());

        if !is_retransmittable {
            return;
        }

        if self
            .largest_sent_packet_number
            .is_some_and(|largest| packet_number <= largest)
        {
            debug_assert!(false, "sent packet numbers must increase");
            return;
        }

        self.largest_sent_packet_number = Some(packet_number);
        self.hybrid_slow_start.on_packet_sent(packet_number);
    }

    fn on_packet_acked(
        &mut self, acked_packet_number: u64, acked_bytes: usize,
        prior_in_flight: usize, event_time: Instant,
    ) {
        if self
            .largest_acked_packet_number
            .is_some_and(|largest| acked_packet_number <= largest)
        {
            debug_assert!(false, "acked packet numbers must increase");
            return;
        }

        self.largest_acked_packet_number = Some(acked_packet_number);

        // An ack of a packet sent after the cutback has just ended recovery;
        // until then the window neither grows nor shrinks further.
        if self.in_recovery() {
            return;
        }

        self.maybe_increase_cwnd(
            acked_packet_number,
            acked_bytes,
            prior_in_flight,
            event_time,
        );

        if self.in_slow_start() {
            self.hybrid_slow_start.on_packet_acked(acked_packet_number);
        }
    }

    fn on_packet_lost(
        &mut self, packet_number: u64, _lost_bytes: usize,
        _prior_in_flight: usize,
    ) {
        // Losses in packets already outstanding at the last cutback count as
        // part of the same loss event (RFC 6582).
        if self
            .largest_sent_at_last_cutback
            .is_some_and(|largest| packet_number <= largest)
        {
            return;
        }

        self.last_cutback_exited_slowstart = self.in_slow_start();
        self.maybe_trace_state_change(CongestionState::RecoveryStart);

        self.congestion_window = match self.growth_mode {
            GrowthMode::Reno =>
                (self.congestion_window as f64 * RENO_BETA).round() as usize,
            GrowthMode::Cubic => self
                .cubic
                .congestion_window_after_loss(self.congestion_window),
        };

        self.congestion_window =
            self.congestion_window.max(self.min_congestion_window());
        self.slow_start_threshold = self.congestion_window;
        self.largest_sent_at_last_cutback = self.largest_sent_packet_number;

        // Ack counting restarts once recovery ends.
        self.num_acked_packets = 0;

        trace!(
            "congestion window cut back to {} on loss of {}, exited_slow_start={}",
            self.congestion_window,
            packet_number,
            self.last_cutback_exited_slowstart
        );
    }

    fn on_retransmission_timeout(&mut self, packets_retransmitted: bool) {
        self.largest_sent_at_last_cutback = None;

        if !packets_retransmitted {
            return;
        }

        self.hybrid_slow_start.restart();
        self.cubic.reset();
        self.slow_start_threshold = self.congestion_window / 2;
        self.congestion_window = self.min_congestion_window();
        self.maybe_trace_state_change(CongestionState::SlowStart);
    }

    fn on_connection_migration(&mut self) {
        self.hybrid_slow_start.restart();
        self.cubic.reset();
        self.pacer.reset();
        self.largest_sent_packet_number = None;
        self.largest_acked_packet_number = None;
        self.largest_sent_at_last_cutback = None;
        self.last_cutback_exited_slowstart = false;
        self.num_acked_packets = 0;
        self.congestion_window = self.initial_congestion_window;
        self.slow_start_threshold = usize::MAX;
        self.maybe_trace_state_change(CongestionState::SlowStart);
    }

    fn maybe_exit_slow_start(&mut self) {
        if !self.in_slow_start() {
            return;
        }

        let (latest_rtt, min_rtt) = {
            let rtt_stats = self.rtt_stats.borrow();
            (rtt_stats.latest_rtt(), rtt_stats.min_rtt())
        };
        let congestion_window_packets =
            self.congestion_window / self.max_datagram_size;

        if self.hybrid_slow_start.should_exit_slow_start(
            latest_rtt,
            min_rtt,
            congestion_window_packets,
        ) {
            self.slow_start_threshold = self.congestion_window;
            self.maybe_trace_state_change(CongestionState::CongestionAvoidance);
        }
    }

    fn in_slow_start(&self) -> bool {
        self.congestion_window < self.slow_start_threshold
    }

    fn in_recovery(&self) -> bool {
        match (
            self.largest_acked_packet_number,
            self.largest_sent_at_last_cutback,
        ) {
            (Some(largest_acked), Some(last_cutback)) =>
                largest_acked <= last_cutback,
            _ => false,
        }
    }

    fn get_congestion_window(&self) -> usize {
        self.congestion_window
    }

    fn bandwidth_estimate(&self) -> Bandwidth {
        let rtt_stats = self.rtt_stats.borrow();

        // Without an RTT measurement the estimate is unbounded rather than
        // a division by zero.
        if rtt_stats.first_rtt_sample().is_none() ||
            rtt_stats.smoothed_rtt().is_zero()
        {
            return Bandwidth::infinite();
        }

        Bandwidth::from_bytes_and_time_delta(
            self.congestion_window,
            rtt_stats.smoothed_rtt(),
        )
    }

    fn set_max_datagram_size(&mut self, new_size: usize) {
        if new_size < self.max_datagram_size {
            debug_assert!(false, "max datagram size must not shrink");
            return;
        }

        if new_size == self.max_datagram_size {
            return;
        }

        let cwnd_is_min =
            self.congestion_window == self.min_congestion_window();

        let old_size = self.max_datagram_size as u64;
        let new = new_size as u64;

        self.initial_congestion_window =
            (self.initial_congestion_window as u64 * new / old_size) as usize;
        self.initial_max_congestion_window =
            (self.initial_max_congestion_window as u64 * new / old_size) as usize;

        self.max_datagram_size = new_size;
        self.cubic.mss = new_size;
        self.pacer.set_max_datagram_size(new_size);

        if cwnd_is_min {
            self.congestion_window = self.min_congestion_window();
        }
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

impl SendAlgorithmWithDebugInfos for CubicSender {
    fn get_slow_start_threshold(&self) -> usize {
        self.slow_start_threshold
    }

    fn state(&self) -> CongestionState {
        self.last_state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use rstest::rstest;

    use crate::clock::testing::MockClock;
    use crate::tracer::testing::TestTracer;

    const MAX_DATAGRAM_SIZE: usize = 1200;
    const INITIAL_WINDOW_PACKETS: usize = 10;
    const MAX_WINDOW_PACKETS: usize = 10_000;
    const INITIAL_WINDOW: usize = INITIAL_WINDOW_PACKETS * MAX_DATAGRAM_SIZE;

    const RTT: Duration = Duration::from_millis(50);

    struct TestSender {
        sender: CubicSender,
        clock: Rc<MockClock>,
        rtt_stats: Rc<RefCell<RttStats>>,
        tracer: Rc<RefCell<TestTracer>>,
        bytes_in_flight: usize,
        packet_number: u64,
        acked_packet_number: u64,
    }

    impl TestSender {
        fn new(growth_mode: GrowthMode) -> Self {
            Self::with_max_window(growth_mode, MAX_WINDOW_PACKETS)
        }

        fn with_max_window(
            growth_mode: GrowthMode, max_window_packets: usize,
        ) -> Self {
            let clock = Rc::new(MockClock::new(Instant::now()));
            let rtt_stats = Rc::new(RefCell::new(RttStats::new(
                Duration::from_millis(25),
            )));
            let tracer = Rc::new(RefCell::new(TestTracer::default()));

            let mut sender = CubicSender::new(
                clock.clone(),
                rtt_stats.clone(),
                growth_mode,
                MAX_DATAGRAM_SIZE,
                INITIAL_WINDOW,
                max_window_packets * MAX_DATAGRAM_SIZE,
                Some(tracer.clone() as Rc<RefCell<dyn Tracer>>),
            );
            sender.notify_initial_state();

            TestSender {
                sender,
                clock,
                rtt_stats,
                tracer,
                bytes_in_flight: 0,
                packet_number: 1,
                acked_packet_number: 0,
            }
        }

        fn send_available_send_window(&mut self) -> usize {
            let mut packets_sent = 0;
            while self.sender.can_send(self.bytes_in_flight) {
                self.sender.on_packet_sent(
                    self.clock.now(),
                    self.packet_number,
                    MAX_DATAGRAM_SIZE,
                    true,
                );
                packets_sent += 1;
                self.bytes_in_flight += MAX_DATAGRAM_SIZE;
                self.packet_number += 1;
            }
            packets_sent
        }

        fn update_rtt(&mut self, rtt: Duration) {
            self.rtt_stats.borrow_mut().update_rtt(
                rtt,
                Duration::ZERO,
                self.clock.now(),
            );
        }

        fn ack_n_packets(&mut self, n: usize) {
            self.update_rtt(RTT);

            let prior_in_flight = self.bytes_in_flight;
            for _ in 0..n {
                self.acked_packet_number += 1;
                self.sender.on_packet_acked(
                    self.acked_packet_number,
                    MAX_DATAGRAM_SIZE,
                    prior_in_flight,
                    self.clock.now(),
                );
            }
            self.bytes_in_flight -= n * MAX_DATAGRAM_SIZE;
        }

        fn lose_packet(&mut self, packet_number: u64) {
            self.sender.on_packet_lost(
                packet_number,
                MAX_DATAGRAM_SIZE,
                self.bytes_in_flight,
            );
            self.bytes_in_flight -= MAX_DATAGRAM_SIZE;
        }

        /// Grows the window through repeated full-window round trips.
        fn grow_window_to(&mut self, target: usize) {
            while self.sender.get_congestion_window() < target {
                self.send_available_send_window();
                self.ack_n_packets(2);
            }
            assert_eq!(self.sender.get_congestion_window(), target);
        }
    }

    impl std::ops::Deref for TestSender {
        type Target = CubicSender;

        fn deref(&self) -> &Self::Target {
            &self.sender
        }
    }

    impl std::ops::DerefMut for TestSender {
        fn deref_mut(&mut self) -> &mut Self::Target {
            &mut self.sender
        }
    }

    #[test]
    fn fresh_sender() {
        let sender = TestSender::new(GrowthMode::Cubic);

        assert_eq!(sender.get_congestion_window(), INITIAL_WINDOW);
        assert!(sender.can_send(0));
        assert!(!sender.can_send(INITIAL_WINDOW));
        assert!(sender.in_slow_start());
        assert!(!sender.in_recovery());
        assert_eq!(sender.get_slow_start_threshold(), usize::MAX);

        // Construction emitted the initial state exactly once.
        assert_eq!(
            sender.tracer.borrow().states(),
            vec![CongestionState::SlowStart]
        );
    }

    #[test]
    fn unknown_rtt_means_unbounded_bandwidth() {
        let sender = TestSender::new(GrowthMode::Cubic);
        assert_eq!(sender.bandwidth_estimate(), Bandwidth::infinite());
    }

    // Send a full initial window, ack all ten packets after one RTT: every
    // ack grows the window by one MSS.
    #[test]
    fn slow_start_growth() {
        let mut sender = TestSender::new(GrowthMode::Cubic);

        assert_eq!(sender.send_available_send_window(), 10);
        sender.clock.advance(RTT);
        sender.ack_n_packets(10);

        assert_eq!(sender.get_congestion_window(), 20 * MAX_DATAGRAM_SIZE);
        assert_eq!(sender.get_congestion_window(), 24000);
        assert!(sender.in_slow_start());
    }

    #[test]
    fn slow_start_exit_on_loss() {
        let mut sender = TestSender::new(GrowthMode::Cubic);

        sender.grow_window_to(60 * MAX_DATAGRAM_SIZE);
        sender.send_available_send_window();
        assert!(sender.in_slow_start());

        let largest_sent = sender.packet_number - 1;
        sender.lose_packet(sender.acked_packet_number + 1);

        // 0.7 * 60 * MSS.
        assert_eq!(sender.get_congestion_window(), 50400);
        assert_eq!(sender.get_slow_start_threshold(), 50400);
        assert!(sender.in_recovery());
        assert!(!sender.in_slow_start());
        assert_eq!(
            sender.largest_sent_at_last_cutback,
            Some(largest_sent)
        );
        assert_eq!(
            sender.tracer.borrow().states().last(),
            Some(&CongestionState::RecoveryStart)
        );
    }

    // A second loss within the same outstanding window must not cut the
    // window again.
    #[test]
    fn in_window_losses_are_ignored() {
        let mut sender = TestSender::new(GrowthMode::Cubic);

        sender.grow_window_to(60 * MAX_DATAGRAM_SIZE);
        sender.send_available_send_window();
        sender.lose_packet(sender.acked_packet_number + 1);

        let cwnd = sender.get_congestion_window();
        let ssthresh = sender.get_slow_start_threshold();
        let events = sender.tracer.borrow().events.len();

        sender.lose_packet(sender.acked_packet_number + 2);

        assert_eq!(sender.get_congestion_window(), cwnd);
        assert_eq!(sender.get_slow_start_threshold(), ssthresh);
        assert_eq!(sender.tracer.borrow().events.len(), events);
    }

    // Acking a packet sent after the cutback ends recovery.
    #[test]
    fn recovery_ends_on_ack_beyond_cutback() {
        let mut sender = TestSender::new(GrowthMode::Cubic);

        sender.grow_window_to(60 * MAX_DATAGRAM_SIZE);
        sender.send_available_send_window();
        sender.lose_packet(sender.acked_packet_number + 1);
        assert!(sender.in_recovery());

        // One more packet beyond the cutback point.
        sender.send_available_send_window();
        let beyond = sender.largest_sent_at_last_cutback.unwrap() + 1;
        sender.sender.on_packet_sent(
            sender.clock.now(),
            sender.packet_number.max(beyond),
            MAX_DATAGRAM_SIZE,
            true,
        );

        let prior_in_flight = sender.get_congestion_window();
        sender.acked_packet_number = beyond;
        sender.sender.on_packet_acked(
            beyond,
            MAX_DATAGRAM_SIZE,
            prior_in_flight,
            sender.clock.now(),
        );

        assert!(!sender.in_recovery());
        assert_eq!(
            sender.tracer.borrow().states().last(),
            Some(&CongestionState::CongestionAvoidance)
        );
    }

    #[test]
    fn retransmission_timeout_resets_window() {
        let mut sender = TestSender::new(GrowthMode::Cubic);

        sender.grow_window_to(40 * MAX_DATAGRAM_SIZE);
        sender.on_retransmission_timeout(true);

        assert_eq!(sender.get_congestion_window(), 2 * MAX_DATAGRAM_SIZE);
        assert_eq!(
            sender.get_slow_start_threshold(),
            20 * MAX_DATAGRAM_SIZE
        );
        assert!(sender.in_slow_start());
        assert!(!sender.in_recovery());

        // The cubic registers were cleared along with the window.
        assert_eq!(sender.cubic.last_max_congestion_window, 0);
    }

    #[test]
    fn retransmission_timeout_without_retransmissions() {
        let mut sender = TestSender::new(GrowthMode::Cubic);

        sender.grow_window_to(40 * MAX_DATAGRAM_SIZE);
        sender.on_retransmission_timeout(false);

        assert_eq!(sender.get_congestion_window(), 40 * MAX_DATAGRAM_SIZE);
    }

    // Pacing: a 12000 byte burst at t=0 leaves no budget; at t=1ms the
    // bucket has 150 bytes back and the rest arrives at 150 kB/s.
    #[test]
    fn pacer_gating() {
        let mut sender = TestSender::new(GrowthMode::Cubic);
        let start = sender.clock.now();

        sender.update_rtt(Duration::from_millis(100));
        assert_eq!(
            sender.bandwidth_estimate(),
            Bandwidth::from_bytes_and_time_delta(
                INITIAL_WINDOW,
                Duration::from_millis(100)
            )
        );

        sender
            .sender
            .on_packet_sent(start, 1, 12000, true);

        sender.clock.set(start + Duration::from_millis(1));
        assert_eq!(
            sender.time_until_send(12000),
            Some(start + Duration::from_millis(80))
        );
        assert!(!sender.has_pacing_budget());
    }

    #[test]
    fn pacing_budget_available_when_idle() {
        let sender = TestSender::new(GrowthMode::Cubic);

        assert!(sender.has_pacing_budget());
        assert_eq!(sender.time_until_send(INITIAL_WINDOW), None);
    }

    #[rstest]
    #[case::cubic(GrowthMode::Cubic, 0.7)]
    #[case::reno(GrowthMode::Reno, 0.5)]
    fn loss_reduces_window_by_beta(
        #[case] growth_mode: GrowthMode, #[case] beta: f64,
    ) {
        let mut sender = TestSender::new(growth_mode);

        sender.grow_window_to(60 * MAX_DATAGRAM_SIZE);
        sender.send_available_send_window();
        let window = sender.get_congestion_window();

        sender.lose_packet(sender.acked_packet_number + 1);

        let expected = (window as f64 * beta).round() as usize;
        assert_eq!(sender.get_congestion_window(), expected);
    }

    #[test]
    fn window_stays_within_bounds() {
        let mut sender =
            TestSender::with_max_window(GrowthMode::Cubic, 20);

        // Growth is capped at the maximum window.
        for _ in 0..30 {
            sender.send_available_send_window();
            sender.ack_n_packets(1);
        }
        assert_eq!(
            sender.get_congestion_window(),
            20 * MAX_DATAGRAM_SIZE
        );

        // Repeated loss events, each in a fresh window, floor at the
        // minimum window.
        let now = sender.clock.now();
        for _ in 0..10 {
            let pn = sender.packet_number;
            sender.packet_number += 1;
            sender.sender.on_packet_sent(now, pn, MAX_DATAGRAM_SIZE, true);
            sender.sender.on_packet_lost(pn, MAX_DATAGRAM_SIZE, 0);
        }
        assert_eq!(sender.get_congestion_window(), 2 * MAX_DATAGRAM_SIZE);
    }

    #[test]
    fn largest_sent_is_monotonic() {
        let mut sender = TestSender::new(GrowthMode::Cubic);

        sender.send_available_send_window();
        assert_eq!(sender.largest_sent_packet_number, Some(10));

        // Non-retransmittable packets do not move the high-water mark.
        let now = sender.clock.now();
        sender.sender.on_packet_sent(now, 11, MAX_DATAGRAM_SIZE, false);
        assert_eq!(sender.largest_sent_packet_number, Some(10));
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "sent packet numbers must increase")]
    fn regressing_packet_number_asserts() {
        let mut sender = TestSender::new(GrowthMode::Cubic);
        let now = sender.clock.now();

        sender.sender.on_packet_sent(now, 5, MAX_DATAGRAM_SIZE, true);
        sender.sender.on_packet_sent(now, 4, MAX_DATAGRAM_SIZE, true);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "acked packet numbers must increase")]
    fn regressing_ack_asserts() {
        let mut sender = TestSender::new(GrowthMode::Cubic);
        let now = sender.clock.now();

        sender.sender.on_packet_sent(now, 5, MAX_DATAGRAM_SIZE, true);
        sender.sender.on_packet_acked(5, MAX_DATAGRAM_SIZE, 0, now);
        sender.sender.on_packet_acked(5, MAX_DATAGRAM_SIZE, 0, now);
    }

    #[test]
    fn bandwidth_estimate_is_window_over_srtt() {
        let mut sender = TestSender::new(GrowthMode::Cubic);

        sender.send_available_send_window();
        sender.clock.advance(RTT);
        sender.ack_n_packets(10);

        let srtt = sender.rtt_stats.borrow().smoothed_rtt();
        assert_eq!(
            sender.bandwidth_estimate(),
            Bandwidth::from_bytes_and_time_delta(
                sender.get_congestion_window(),
                srtt
            )
        );
    }

    #[test]
    fn connection_migration_resets_to_initial_state() {
        let mut sender = TestSender::new(GrowthMode::Cubic);
        let fresh = TestSender::new(GrowthMode::Cubic);

        sender.grow_window_to(60 * MAX_DATAGRAM_SIZE);
        sender.send_available_send_window();
        sender.lose_packet(sender.acked_packet_number + 1);
        assert!(sender.in_recovery());

        sender.on_connection_migration();

        let compare = |s: &CubicSender| {
            (
                s.get_congestion_window(),
                s.get_slow_start_threshold(),
                s.in_slow_start(),
                s.in_recovery(),
                s.largest_sent_packet_number,
                s.largest_acked_packet_number,
            )
        };

        assert_eq!(compare(&sender), compare(&fresh));

        // Migrating again changes nothing.
        let snapshot = compare(&sender);
        sender.on_connection_migration();
        assert_eq!(compare(&sender), snapshot);
    }

    #[test]
    fn hybrid_slow_start_exit_sets_threshold() {
        let mut sender = TestSender::new(GrowthMode::Cubic);

        // Get above the low-window guard of 16 packets.
        sender.grow_window_to(20 * MAX_DATAGRAM_SIZE);
        sender.send_available_send_window();
        assert!(sender.in_slow_start());

        // Establish a 50ms floor, then deliver a round of samples inflated
        // well past min_rtt/8.
        for _ in 0..8 {
            sender.update_rtt(RTT + Duration::from_millis(20));
            sender.maybe_exit_slow_start();
        }

        assert!(!sender.in_slow_start());
        assert_eq!(
            sender.get_slow_start_threshold(),
            sender.get_congestion_window()
        );
        assert_eq!(
            sender.tracer.borrow().states().last(),
            Some(&CongestionState::CongestionAvoidance)
        );
    }

    #[test]
    fn app_limited_acks_do_not_grow_the_window() {
        let mut sender = TestSender::new(GrowthMode::Cubic);

        // Two packets in flight against a ten packet window: nowhere near
        // limited.
        sender.sender.on_packet_sent(
            sender.clock.now(),
            1,
            MAX_DATAGRAM_SIZE,
            true,
        );
        sender.sender.on_packet_sent(
            sender.clock.now(),
            2,
            MAX_DATAGRAM_SIZE,
            true,
        );
        sender.update_rtt(RTT);

        sender
            .sender
            .on_packet_acked(1, MAX_DATAGRAM_SIZE, MAX_DATAGRAM_SIZE, sender.clock.now());

        assert_eq!(sender.get_congestion_window(), INITIAL_WINDOW);
        assert_eq!(
            sender.tracer.borrow().states().last(),
            Some(&CongestionState::ApplicationLimited)
        );
    }

    #[test]
    fn datagram_size_increase_rescales_floors() {
        let mut sender = TestSender::new(GrowthMode::Cubic);

        // Park the window at the minimum via an RTO.
        sender.on_retransmission_timeout(true);
        assert_eq!(sender.get_congestion_window(), 2 * MAX_DATAGRAM_SIZE);

        sender.set_max_datagram_size(1500);
        assert_eq!(sender.get_congestion_window(), 2 * 1500);

        // The initial window was rescaled too, observable after migration.
        sender.on_connection_migration();
        assert_eq!(
            sender.get_congestion_window(),
            INITIAL_WINDOW_PACKETS * 1500
        );
    }

    #[test]
    fn reno_congestion_avoidance_grows_once_per_window() {
        let mut sender = TestSender::new(GrowthMode::Reno);

        sender.grow_window_to(20 * MAX_DATAGRAM_SIZE);
        sender.send_available_send_window();

        // Leave slow start through a loss.
        sender.lose_packet(sender.acked_packet_number + 1);
        let window = sender.get_congestion_window();
        assert!(!sender.in_slow_start());

        // Leave recovery.
        sender.send_available_send_window();
        let beyond = sender.largest_sent_at_last_cutback.unwrap() + 1;
        sender.sender.on_packet_sent(
            sender.clock.now(),
            beyond.max(sender.packet_number),
            MAX_DATAGRAM_SIZE,
            true,
        );
        sender.acked_packet_number = beyond;
        sender
            .sender
            .on_packet_acked(beyond, MAX_DATAGRAM_SIZE, window, sender.clock.now());

        // One MSS of growth per acked window, not per ack.
        let packets_per_window = window / MAX_DATAGRAM_SIZE;
        for _ in 0..packets_per_window - 2 {
            sender.acked_packet_number += 1;
            let n = sender.acked_packet_number;
            sender
                .sender
                .on_packet_acked(n, MAX_DATAGRAM_SIZE, window, sender.clock.now());
            assert_eq!(sender.get_congestion_window(), window);
        }

        sender.acked_packet_number += 1;
        let n = sender.acked_packet_number;
        sender
            .sender
            .on_packet_acked(n, MAX_DATAGRAM_SIZE, window, sender.clock.now());
        assert_eq!(
            sender.get_congestion_window(),
            window + MAX_DATAGRAM_SIZE
        );
    }
}
