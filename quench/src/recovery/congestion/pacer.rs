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

//! Token-bucket pacer.
//!
//! The bucket is replenished at the pacing rate the sender supplies and is
//! capped at a burst budget, so idle periods never accumulate more than one
//! burst worth of credit. The pacer itself is stateless about rates; the
//! sender derives the rate from its bandwidth estimate on every call.

use std::time::Duration;
use std::time::Instant;

use crate::recovery::bandwidth::Bandwidth;
use crate::recovery::GRANULARITY;

const MAX_BURST_PACKETS: usize = 10;

const MIN_PACING_DELAY: Duration = Duration::from_millis(1);

#[derive(Debug)]
pub struct Pacer {
    /// Remaining credit at the last send, in bytes.
    budget_at_last_sent: usize,

    /// When the last packet was handed to the wire.
    last_sent_time: Option<Instant>,

    /// Current MSS.
    max_datagram_size: usize,
}

impl Pacer {
    pub fn new(max_datagram_size: usize) -> Self {
        Pacer {
            budget_at_last_sent: 0,
            last_sent_time: None,
            max_datagram_size,
        }
    }

    /// The credit available at `now`, replenished at `rate` since the last
    /// send. A pacer that has never sent starts with a full burst.
    pub fn budget(&self, now: Instant, rate: Bandwidth) -> usize {
        let Some(last_sent) = self.last_sent_time else {
            return self.max_burst_size(rate);
        };

        let elapsed = now.saturating_duration_since(last_sent);
        let replenished = rate.to_bytes_per_period(elapsed) as usize;

        self.budget_at_last_sent
            .saturating_add(replenished)
            .min(self.max_burst_size(rate))
    }

    fn max_burst_size(&self, rate: Bandwidth) -> usize {
        let timer_burst =
            rate.to_bytes_per_period(MIN_PACING_DELAY + GRANULARITY) as usize;

        timer_burst.max(MAX_BURST_PACKETS * self.max_datagram_size)
    }

    /// Charges `bytes` against the bucket. Overdrafts saturate at zero so a
    /// full-burst send leaves the bucket empty rather than owing time.
    pub fn on_packet_sent(
        &mut self, sent_time: Instant, bytes: usize, rate: Bandwidth,
    ) {
        let budget = self.budget(sent_time, rate);

        self.budget_at_last_sent = budget.saturating_sub(bytes);
        self.last_sent_time = Some(sent_time);
    }

    /// The earliest instant at which `bytes` may be sent, or `None` if the
    /// bucket already covers them.
    pub fn time_until_send(
        &self, now: Instant, bytes: usize, rate: Bandwidth,
    ) -> Option<Instant> {
        let budget = self.budget(now, rate);

        if budget >= bytes {
            return None;
        }

        let delay = rate.transfer_time(bytes - budget).max(MIN_PACING_DELAY);

        Some(now + delay)
    }

    pub fn set_max_datagram_size(&mut self, max_datagram_size: usize) {
        self.max_datagram_size = max_datagram_size;
    }

    /// Forgets all credit and send history, as on path migration.
    pub fn reset(&mut self) {
        self.budget_at_last_sent = 0;
        self.last_sent_time = None;
    }
}
