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

//! Connection tracing hooks.
//!
//! The congestion core reports state transitions, metric updates and lost
//! packets through the [`Tracer`] trait. All calls are fire-and-forget; the
//! field names and enum values below are the stable external schema.

/// The phase the congestion controller is operating in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CongestionState {
    /// Exponential window growth below the slow start threshold.
    SlowStart,

    /// Linear (Reno) or cubic window growth.
    CongestionAvoidance,

    /// A loss event reduced the window; growth is suspended until a packet
    /// sent after the cutback is acknowledged.
    RecoveryStart,

    /// The application is not supplying enough data to fill the window.
    ApplicationLimited,
}

/// Why a packet was declared lost.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LossReason {
    /// A packet at least the reordering threshold older than the largest
    /// acknowledged packet.
    ReorderingThreshold,

    /// A packet outstanding for longer than the time threshold.
    TimeThreshold,
}

/// Receiver of congestion events.
///
/// A tracer is optional; when none is attached the core runs silently.
pub trait Tracer {
    /// The controller moved to a new [`CongestionState`]. Only emitted on
    /// actual transitions, never repeated for the current state.
    fn updated_congestion_state(&mut self, state: CongestionState);

    /// A congestion-relevant metric changed.
    fn updated_metrics(
        &mut self, congestion_window: usize, bytes_in_flight: usize,
        packets_in_flight: usize,
    );

    /// A packet was declared lost.
    fn lost_packet(&mut self, packet_number: u64, reason: LossReason, bytes: usize);
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Records every tracer call in order.
    #[derive(Debug, Default, PartialEq, Eq)]
    pub struct TestTracer {
        pub events: Vec<Event>,
    }

    #[derive(Debug, PartialEq, Eq)]
    pub enum Event {
        State(CongestionState),
        Metrics {
            congestion_window: usize,
            bytes_in_flight: usize,
            packets_in_flight: usize,
        },
        Lost {
            packet_number: u64,
            reason: LossReason,
            bytes: usize,
        },
    }

    impl TestTracer {
        pub fn states(&self) -> Vec<CongestionState> {
            self.events
                .iter()
                .filter_map(|e| match e {
                    Event::State(s) => Some(*s),
                    _ => None,
                })
                .collect()
        }

        pub fn lost(&self) -> Vec<u64> {
            self.events
                .iter()
                .filter_map(|e| match e {
                    Event::Lost { packet_number, .. } => Some(*packet_number),
                    _ => None,
                })
                .collect()
        }
    }

    impl Tracer for TestTracer {
        fn updated_congestion_state(&mut self, state: CongestionState) {
            self.events.push(Event::State(state));
        }

        fn updated_metrics(
            &mut self, congestion_window: usize, bytes_in_flight: usize,
            packets_in_flight: usize,
        ) {
            self.events.push(Event::Metrics {
                congestion_window,
                bytes_in_flight,
                packets_in_flight,
            });
        }

        fn lost_packet(
            &mut self, packet_number: u64, reason: LossReason, bytes: usize,
        ) {
            self.events.push(Event::Lost {
                packet_number,
                reason,
                bytes,
            });
        }
    }
}
