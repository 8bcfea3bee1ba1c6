use std::{
    thread::sleep,
    time::{Duration, Instant},
};

use tracing::{debug, trace};

use crate::{pusher::Pusher, registry::MetricSource};

/// Runs a [`Pusher`] against a metric source on a fixed interval.
pub(crate) struct Forwarder<S> {
    pusher: Pusher,
    source: S,
    push_interval: Duration,
}

impl<S> Forwarder<S>
where
    S: MetricSource,
{
    /// Create a new `Forwarder`.
    pub fn new(pusher: Pusher, source: S, push_interval: Duration) -> Self {
        Forwarder { pusher, source, push_interval }
    }

    /// Runs a single push, returning the deadline for the next one.
    fn tick(&mut self) -> Instant {
        // The next deadline is computed before pushing, so that the time spent pushing counts towards the interval.
        let next_push = Instant::now() + self.push_interval;

        let started = Instant::now();
        self.pusher.push(&self.source);
        trace!(elapsed = ?started.elapsed(), "Push cycle complete.");

        next_push
    }

    /// Run the forwarder, pushing metrics at the configured interval.
    pub fn run(mut self) {
        debug!(push_interval = ?self.push_interval, "Starting DogStatsD pusher.");

        let mut next_push = Instant::now() + self.push_interval;
        loop {
            // Sleep until our target push deadline.
            //
            // If the previous push took longer than the push interval, we won't sleep at all.
            if let Some(sleep_duration) = next_push.checked_duration_since(Instant::now()) {
                sleep(sleep_duration);
            }

            next_push = self.tick();
        }
    }
}
