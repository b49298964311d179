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

//! Ack-handler wiring around a send algorithm.
//!
//! [`new_ack_handler`] builds the pair of packet handlers a connection
//! needs: a [`SentPacketHandler`] that tracks outstanding packets, samples
//! RTT, detects losses and drives the congestion controller, and a
//! [`ReceivedPacketHandler`] that records incoming packet numbers for ack
//! generation.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::ops::RangeInclusive;
use std::rc::Rc;
use std::time::Duration;
use std::time::Instant;

use crate::clock::Clock;
use crate::tracer::LossReason;
use crate::tracer::Tracer;
use crate::Perspective;

use self::congestion::Congestion;
use self::congestion::CongestionAlgorithm;
use self::congestion::GrowthMode;
use self::congestion::SendAlgorithm;
use self::rtt::RttStats;

pub mod bandwidth;
pub mod congestion;
pub mod rtt;

// Loss detection.
const PACKET_THRESHOLD: u64 = 3;

const TIME_THRESHOLD: f64 = 9.0 / 8.0;

pub(crate) const GRANULARITY: Duration = Duration::from_millis(1);

// Congestion control.
const INITIAL_WINDOW_PACKETS: usize = 10;

const MAX_WINDOW_PACKETS: usize = 10_000;

const DEFAULT_MAX_ACK_DELAY: Duration = Duration::from_millis(25);

/// Ack ranges tracked for the peer before the oldest are forgotten.
const MAX_ACK_RANGES: usize = 32;

/// Connection parameters consumed by [`new_ack_handler`].
#[derive(Clone, Debug)]
pub struct Config {
    pub max_datagram_size: usize,
    pub initial_congestion_window_packets: usize,
    pub max_congestion_window_packets: usize,
    pub max_ack_delay: Duration,
    pub growth_mode: GrowthMode,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_datagram_size: 1200,
            initial_congestion_window_packets: INITIAL_WINDOW_PACKETS,
            max_congestion_window_packets: MAX_WINDOW_PACKETS,
            max_ack_delay: DEFAULT_MAX_ACK_DELAY,
            growth_mode: GrowthMode::Cubic,
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum SentStatus {
    Sent {
        time_sent: Instant,
        size: usize,
        ack_eliciting: bool,
        in_flight: bool,
    },
    Acked,
    Lost,
}

impl SentStatus {
    fn ack(&mut self) -> Self {
        std::mem::replace(self, SentStatus::Acked)
    }
}

#[derive(Debug)]
struct SentPacket {
    pkt_num: u64,
    status: SentStatus,
}

struct Acked {
    pkt_num: u64,
    time_sent: Instant,
    size: usize,
    in_flight: bool,
}

/// Bookkeeping for packets this endpoint sent, and the home of the
/// congestion controller.
///
/// All methods are driven by the connection's single packet-processing
/// task, in event order.
pub struct SentPacketHandler {
    congestion: Congestion,
    rtt_stats: Rc<RefCell<RttStats>>,

    /// Outstanding packets in send order.
    sent_packets: VecDeque<SentPacket>,

    largest_sent_packet: Option<u64>,
    largest_acked_packet: Option<u64>,

    bytes_in_flight: usize,
    packets_in_flight: usize,

    time_of_last_ack_eliciting_packet: Option<Instant>,

    /// When the earliest outstanding packet crosses the time threshold.
    loss_time: Option<Instant>,

    /// Successive retransmission timeouts, for exponential backoff.
    pto_count: u32,

    initial_packet_number: u64,

    tracer: Option<Rc<RefCell<dyn Tracer>>>,
    trace_id: String,
}

impl SentPacketHandler {
    pub fn on_packet_sent(
        &mut self, packet_number: u64, now: Instant, size: usize,
        ack_eliciting: bool, in_flight: bool,
    ) {
        // The sent queue relies on strictly ascending packet numbers.
        if packet_number < self.initial_packet_number ||
            Some(packet_number) <= self.largest_sent_packet
        {
            debug_assert!(false, "sent packet numbers must increase");
            return;
        }

        self.largest_sent_packet = Some(packet_number);

        self.sent_packets.push_back(SentPacket {
            pkt_num: packet_number,
            status: SentStatus::Sent {
                time_sent: now,
                size,
                ack_eliciting,
                in_flight,
            },
        });

        if in_flight {
            if ack_eliciting {
                self.time_of_last_ack_eliciting_packet = Some(now);
            }

            self.bytes_in_flight += size;
            self.packets_in_flight += 1;
        }

        self.congestion
            .on_packet_sent(now, packet_number, size, ack_eliciting);

        trace!(
            "{} packet sent {} size={} in_flight={}",
            self.trace_id,
            packet_number,
            size,
            self.bytes_in_flight
        );
    }

    /// Processes an ack frame given as ascending, disjoint packet ranges.
    ///
    /// Newly lost packets are reported to the congestion controller before
    /// newly acked ones, so a loss-driven cutback is observed before any
    /// growth from the same event. Returns the number of packets and bytes
    /// declared lost.
    pub fn on_ack_received(
        &mut self, ranges: &[RangeInclusive<u64>], ack_delay: Duration,
        now: Instant,
    ) -> (usize, usize) {
        let Some(largest_acked) = ranges.iter().map(|r| *r.end()).max() else {
            return (0, 0);
        };

        let prev_largest_acked = self.largest_acked_packet;
        self.largest_acked_packet =
            self.largest_acked_packet.max(Some(largest_acked));

        let mut newly_acked: Vec<Acked> = Vec::new();
        let mut has_ack_eliciting = false;

        for range in ranges {
            // Packets are appended in send order, so the scan can start at
            // the first packet of the range.
            let start = if self
                .sent_packets
                .front()
                .filter(|p| p.pkt_num >= *range.start())
                .is_some()
            {
                0
            } else {
                self.sent_packets
                    .binary_search_by_key(range.start(), |p| p.pkt_num)
                    .unwrap_or_else(|idx| idx)
            };

            for pkt in self.sent_packets.range_mut(start..) {
                if pkt.pkt_num > *range.end() {
                    break;
                }

                match pkt.status.ack() {
                    SentStatus::Sent {
                        time_sent,
                        size,
                        ack_eliciting,
                        in_flight,
                    } => {
                        has_ack_eliciting |= ack_eliciting;

                        newly_acked.push(Acked {
                            pkt_num: pkt.pkt_num,
                            time_sent,
                            size,
                            in_flight,
                        });

                        trace!(
                            "{} packet newly acked {}",
                            self.trace_id,
                            pkt.pkt_num
                        );
                    },

                    // Already acked, or acked after being declared lost.
                    _ => (),
                }
            }
        }

        if newly_acked.is_empty() {
            return (0, 0);
        }

        let prior_in_flight = self.bytes_in_flight;

        // The RTT sample comes from the largest newly acked packet, and
        // only when that packet elicited the ack.
        let largest_newly_acked = newly_acked.last().unwrap();
        if largest_newly_acked.pkt_num == largest_acked && has_ack_eliciting {
            let latest_rtt =
                now.saturating_duration_since(largest_newly_acked.time_sent);

            if !latest_rtt.is_zero() {
                self.rtt_stats
                    .borrow_mut()
                    .update_rtt(latest_rtt, ack_delay, now);
            }
        }

        // Losses first, then acks, in ascending packet order.
        let (lost_packets, lost_bytes) =
            self.detect_and_declare_lost(now, prior_in_flight);

        for acked in &newly_acked {
            if acked.in_flight {
                self.bytes_in_flight =
                    self.bytes_in_flight.saturating_sub(acked.size);
                self.packets_in_flight =
                    self.packets_in_flight.saturating_sub(1);
            }

            // Acks below the delivered high-water mark carry no new window
            // information for the controller.
            if Some(acked.pkt_num) <= prev_largest_acked {
                continue;
            }

            self.congestion.on_packet_acked(
                acked.pkt_num,
                acked.size,
                prior_in_flight,
                now,
            );
        }

        self.congestion.maybe_exit_slow_start();

        self.pto_count = 0;

        self.drain_old_packets();
        self.update_metrics();

        (lost_packets, lost_bytes)
    }

    /// Fires the loss-detection timer: either the time-threshold check for
    /// a known candidate, or a retransmission timeout.
    pub fn on_loss_detection_timeout(&mut self, now: Instant) -> (usize, usize) {
        if self.loss_time.is_some() {
            let prior_in_flight = self.bytes_in_flight;
            let lost = self.detect_and_declare_lost(now, prior_in_flight);
            self.update_metrics();
            return lost;
        }

        // Retransmission timeout. The caller resends the oldest outstanding
        // data; the controller is told once for the whole burst.
        let packets_retransmitted = self.sent_packets.iter().any(|p| {
            matches!(
                p.status,
                SentStatus::Sent {
                    ack_eliciting: true,
                    ..
                }
            )
        });

        self.pto_count += 1;
        self.congestion
            .on_retransmission_timeout(packets_retransmitted);
        self.update_metrics();

        trace!(
            "{} retransmission timeout, count={}",
            self.trace_id,
            self.pto_count
        );

        (0, 0)
    }

    /// When the loss-detection timer should next fire.
    pub fn loss_detection_timer(&self) -> Option<Instant> {
        if let Some(loss_time) = self.loss_time {
            return Some(loss_time);
        }

        let last_sent = self.time_of_last_ack_eliciting_packet?;
        let backoff = 1u32 << self.pto_count.min(16);

        Some(last_sent + self.rtt_stats.borrow().rto() * backoff)
    }

    pub fn on_connection_migration(&mut self) {
        self.congestion.on_connection_migration();
        self.pto_count = 0;

        trace!("{} connection migrated", self.trace_id);
    }

    pub fn bytes_in_flight(&self) -> usize {
        self.bytes_in_flight
    }

    pub fn can_send(&self) -> bool {
        self.congestion.can_send(self.bytes_in_flight)
    }

    pub fn time_until_send(&self, bytes: usize) -> Option<Instant> {
        self.congestion.time_until_send(bytes)
    }

    pub fn has_pacing_budget(&self) -> bool {
        self.congestion.has_pacing_budget()
    }

    /// The send algorithm, for observers and debug infos.
    pub fn congestion(&self) -> &Congestion {
        &self.congestion
    }

    fn detect_and_declare_lost(
        &mut self, now: Instant, prior_in_flight: usize,
    ) -> (usize, usize) {
        self.loss_time = None;

        let Some(largest_acked) = self.largest_acked_packet else {
            return (0, 0);
        };

        let loss_delay = {
            let rtt_stats = self.rtt_stats.borrow();
            rtt_stats
                .latest_rtt()
                .max(rtt_stats.smoothed_rtt())
                .mul_f64(TIME_THRESHOLD)
                .max(GRANULARITY)
        };
        let lost_send_time = now.checked_sub(loss_delay);

        let mut lost: Vec<(u64, usize, bool, LossReason)> = Vec::new();

        for pkt in self.sent_packets.iter_mut() {
            if pkt.pkt_num > largest_acked {
                break;
            }

            let SentStatus::Sent {
                time_sent,
                size,
                in_flight,
                ..
            } = pkt.status
            else {
                continue;
            };

            if pkt.pkt_num + PACKET_THRESHOLD <= largest_acked {
                pkt.status = SentStatus::Lost;
                lost.push((
                    pkt.pkt_num,
                    size,
                    in_flight,
                    LossReason::ReorderingThreshold,
                ));
            } else if lost_send_time.is_some_and(|cutoff| time_sent <= cutoff) {
                pkt.status = SentStatus::Lost;
                lost.push((
                    pkt.pkt_num,
                    size,
                    in_flight,
                    LossReason::TimeThreshold,
                ));
            } else {
                let when = time_sent + loss_delay;
                self.loss_time =
                    Some(self.loss_time.map_or(when, |t| t.min(when)));
            }
        }

        let lost_packets = lost.len();
        let mut lost_bytes = 0;

        for (pkt_num, size, in_flight, reason) in lost {
            if in_flight {
                self.bytes_in_flight = self.bytes_in_flight.saturating_sub(size);
                self.packets_in_flight =
                    self.packets_in_flight.saturating_sub(1);
                lost_bytes += size;
            }

            self.congestion
                .on_packet_lost(pkt_num, size, prior_in_flight);

            if let Some(tracer) = &self.tracer {
                tracer.borrow_mut().lost_packet(pkt_num, reason, size);
            }

            trace!(
                "{} packet lost {} reason={:?}",
                self.trace_id,
                pkt_num,
                reason
            );
        }

        (lost_packets, lost_bytes)
    }

    fn drain_old_packets(&mut self) {
        while let Some(pkt) = self.sent_packets.front() {
            if matches!(pkt.status, SentStatus::Sent { .. }) {
                break;
            }
            self.sent_packets.pop_front();
        }
    }

    fn update_metrics(&mut self) {
        if let Some(tracer) = &self.tracer {
            tracer.borrow_mut().updated_metrics(
                self.congestion.get_congestion_window(),
                self.bytes_in_flight,
                self.packets_in_flight,
            );
        }
    }
}

/// Bookkeeping for packets this endpoint received, enough to generate ack
/// frames: coalesced packet ranges, the largest packet and its receipt
/// time.
pub struct ReceivedPacketHandler {
    /// Ascending, disjoint, non-adjacent ranges of received packets.
    ranges: VecDeque<RangeInclusive<u64>>,

    largest_received: Option<u64>,
    largest_received_time: Option<Instant>,

    trace_id: String,
}

impl ReceivedPacketHandler {
    /// Records a received packet. Returns false for duplicates.
    pub fn on_packet_received(
        &mut self, packet_number: u64, now: Instant,
    ) -> bool {
        if Some(packet_number) > self.largest_received {
            self.largest_received = Some(packet_number);
            self.largest_received_time = Some(now);
        }

        let mut idx = 0;
        while idx < self.ranges.len() &&
            *self.ranges[idx].end() < packet_number
        {
            idx += 1;
        }

        if idx < self.ranges.len() &&
            *self.ranges[idx].start() <= packet_number
        {
            trace!("{} duplicate packet {}", self.trace_id, packet_number);
            return false;
        }

        let extends_prev = idx > 0 &&
            *self.ranges[idx - 1].end() + 1 == packet_number;
        let extends_next = idx < self.ranges.len() &&
            packet_number + 1 == *self.ranges[idx].start();

        match (extends_prev, extends_next) {
            (true, true) => {
                let start = *self.ranges[idx - 1].start();
                let end = *self.ranges[idx].end();
                self.ranges[idx - 1] = start..=end;
                self.ranges.remove(idx);
            },

            (true, false) => {
                let start = *self.ranges[idx - 1].start();
                self.ranges[idx - 1] = start..=packet_number;
            },

            (false, true) => {
                let end = *self.ranges[idx].end();
                self.ranges[idx] = packet_number..=end;
            },

            (false, false) => {
                self.ranges.insert(idx, packet_number..=packet_number);
            },
        }

        // Bound the tracked history, oldest ranges first.
        while self.ranges.len() > MAX_ACK_RANGES {
            self.ranges.pop_front();
        }

        true
    }

    /// The ranges to put in the next ack frame, largest first as they are
    /// encoded on the wire.
    pub fn ack_ranges(&self) -> Vec<RangeInclusive<u64>> {
        self.ranges.iter().rev().cloned().collect()
    }

    pub fn largest_received(&self) -> Option<u64> {
        self.largest_received
    }

    /// How long the largest received packet has been waiting for its ack.
    pub fn ack_delay(&self, now: Instant) -> Duration {
        self.largest_received_time
            .map_or(Duration::ZERO, |t| now.saturating_duration_since(t))
    }
}

/// Builds a sent-packet handler and a received-packet handler with the
/// selected congestion controller wired in.
///
/// [`CongestionAlgorithm::Cubic`] selects the loss-responding sender; any
/// other tag selects the pass-through sender.
#[allow(clippy::too_many_arguments)]
pub fn new_ack_handler(
    initial_packet_number: u64, config: &Config, clock: Rc<dyn Clock>,
    rtt_stats: Rc<RefCell<RttStats>>, perspective: Perspective,
    tracer: Option<Rc<RefCell<dyn Tracer>>>, trace_id: &str, version: u32,
    algorithm: CongestionAlgorithm,
) -> (SentPacketHandler, ReceivedPacketHandler) {
    let congestion = congestion::new_sender(
        clock,
        rtt_stats.clone(),
        config,
        algorithm,
        tracer.clone(),
    );

    debug!(
        "{} ack handler created: {:?} version={:#010x} algorithm={:?} mss={}",
        trace_id, perspective, version, algorithm, config.max_datagram_size
    );

    (
        SentPacketHandler {
            congestion,
            rtt_stats,
            sent_packets: VecDeque::new(),
            largest_sent_packet: None,
            largest_acked_packet: None,
            bytes_in_flight: 0,
            packets_in_flight: 0,
            time_of_last_ack_eliciting_packet: None,
            loss_time: None,
            pto_count: 0,
            initial_packet_number,
            tracer,
            trace_id: trace_id.to_string(),
        },
        ReceivedPacketHandler {
            ranges: VecDeque::new(),
            largest_received: None,
            largest_received_time: None,
            trace_id: trace_id.to_string(),
        },
    )
}
