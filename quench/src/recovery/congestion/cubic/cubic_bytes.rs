// Copyright (c) 2015 The Chromium Authors. All rights reserved.
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
use std::time::Instant;

// The cubic constant C = 0.4 in fixed point: window deltas are computed as
// 410 * t^3 * MSS >> 40, with t in 2^10 fractions of a second, so that the
// division is a shift.
const CUBE_SCALE: u64 = 40;
const CUBE_CONGESTION_WINDOW_SCALE: u64 = 410;

/// Multiplicative window decrease on loss.
const BETA: f64 = 0.7;

/// Additional backoff when loss occurs before the previous maximum was
/// reached again, equal to (1 + BETA) / 2. Giving up that extra bandwidth
/// speeds up convergence with competing flows.
const BETA_LAST_MAX: f64 = 0.85;

/// TCP-friendly additive increase per acked window, derived from BETA as in
/// Section 4.2 of RFC 8312.
const ALPHA: f64 = 3.0 * (1.0 - BETA) / (1.0 + BETA);

/// The pure CUBIC window function.
///
/// Given the current window and the time since the last loss epoch started,
/// computes the target window along the cubic curve, together with the
/// window an additive-increase TCP flow would have reached, and returns
/// whichever is larger. Holds no I/O and no connection state beyond the
/// registers below.
#[derive(Debug)]
pub(super) struct CubicBytes {
    /// Time when this cycle started, after the last loss event.
    epoch: Option<Instant>,

    /// Max congestion window used just before the last loss event, with the
    /// fast-convergence backoff already applied where it fired.
    pub(super) last_max_congestion_window: usize,

    /// Number of acked bytes since the cycle started.
    acked_bytes_count: usize,

    /// TCP Reno equivalent congestion window in bytes.
    estimated_tcp_congestion_window: usize,

    /// Origin point of the cubic function.
    origin_point_congestion_window: usize,

    /// Time to the origin point, in 2^10 fractions of a second.
    time_to_origin_point: u64,

    pub(super) mss: usize,
}

impl CubicBytes {
    pub(super) fn new(mss: usize) -> Self {
        CubicBytes {
            epoch: None,
            last_max_congestion_window: 0,
            acked_bytes_count: 0,
            estimated_tcp_congestion_window: 0,
            origin_point_congestion_window: 0,
            time_to_origin_point: 0,
            mss,
        }
    }

    /// Ends the current epoch. The next ack starts a fresh one, so idle
    /// periods do not count as time spent on the curve.
    #[inline]
    pub(super) fn on_app_limited(&mut self) {
        self.epoch = None;
    }

    #[inline]
    pub(super) fn reset(&mut self) {
        self.epoch = None;
        self.last_max_congestion_window = 0;
        self.acked_bytes_count = 0;
        self.estimated_tcp_congestion_window = 0;
        self.origin_point_congestion_window = 0;
        self.time_to_origin_point = 0;
    }

    fn cube_factor(&self) -> u64 {
        (1u64 << CUBE_SCALE) / CUBE_CONGESTION_WINDOW_SCALE / self.mss as u64
    }

    pub(super) fn congestion_window_after_ack(
        &mut self, acked_bytes: usize, current_congestion_window: usize,
        delay_min: Duration, event_time: Instant,
    ) -> usize {
        self.acked_bytes_count += acked_bytes;

        if self.epoch.is_none() {
            self.epoch = Some(event_time);
            self.acked_bytes_count = acked_bytes;

            // Resync the Reno estimate with the actual window.
            self.estimated_tcp_congestion_window = current_congestion_window;
            if self.last_max_congestion_window <= current_congestion_window {
                self.time_to_origin_point = 0;
                self.origin_point_congestion_window = current_congestion_window;
            } else {
                self.time_to_origin_point = f64::cbrt(
                    (self.cube_factor() *
                        (self.last_max_congestion_window as u64 -
                            current_congestion_window as u64))
                        as f64,
                ) as u64;

                self.origin_point_congestion_window =
                    self.last_max_congestion_window;
            }
        }

        // Convert from microseconds to 2^10 fractions per second, counting
        // the min RTT towards the elapsed time so the first RTT of the epoch
        // already moves along the curve.
        let elapsed_time = (((event_time + delay_min - self.epoch.unwrap())
            .as_micros() as u64) <<
            10) /
            1_000_000;

        // Right-shifts of negative amounts are implementation-defined in the
        // reference implementations, so keep the offset positive.
        let offset = self.time_to_origin_point.abs_diff(elapsed_time);

        let delta_congestion_window = ((CUBE_CONGESTION_WINDOW_SCALE *
            offset *
            offset *
            offset *
            self.mss as u64) >>
            CUBE_SCALE) as usize;

        let add_delta = elapsed_time > self.time_to_origin_point;

        let mut target_congestion_window = if add_delta {
            self.origin_point_congestion_window + delta_congestion_window
        } else {
            self.origin_point_congestion_window - delta_congestion_window
        };

        // Limit the window increase to half the acked bytes.
        target_congestion_window = target_congestion_window
            .min(current_congestion_window + self.acked_bytes_count / 2);

        // Grow the Reno estimate by approximately Alpha MSS of bytes every
        // time an estimated window of bytes is acked.
        let inc = self.acked_bytes_count as f64 * (ALPHA * self.mss as f64) /
            self.estimated_tcp_congestion_window as f64;

        self.estimated_tcp_congestion_window =
            (self.estimated_tcp_congestion_window as f64 + inc) as usize;

        self.acked_bytes_count = 0;

        // Use whichever of the cubic target and the Reno estimate is
        // growing faster.
        target_congestion_window.max(self.estimated_tcp_congestion_window)
    }

    pub(super) fn congestion_window_after_loss(
        &mut self, current_congestion_window: usize,
    ) -> usize {
        // The byte-wise Reno estimate slightly under-counts, so a window one
        // MSS shy of the old maximum is not treated as competing traffic.
        if current_congestion_window + self.mss <
            self.last_max_congestion_window
        {
            // The old maximum was never reached again, so assume a competing
            // flow and back off further to let it grow.
            self.last_max_congestion_window = (BETA_LAST_MAX *
                current_congestion_window as f64)
                .round() as usize;
        } else {
            self.last_max_congestion_window = current_congestion_window;
        }

        self.epoch = None;

        (current_congestion_window as f64 * BETA).round() as usize
    }
}
