//! Latest mark price per instrument.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tidemark_core::Price;
use tracing::trace;

/// One cached mark-price observation.
#[derive(Debug, Clone, Copy)]
pub struct PriceTick {
    pub price: Price,
    /// Exchange timestamp of the tick.
    pub received_at: DateTime<Utc>,
    /// Local monotonic receipt time, used for staleness.
    received_mono: Instant,
}

impl PriceTick {
    /// Age of this tick on the monotonic clock.
    pub fn age(&self) -> Duration {
        self.received_mono.elapsed()
    }
}

/// What a reader sees for a symbol.
#[derive(Debug, Clone, Copy)]
pub enum PriceReading {
    /// Tick younger than `max_age`.
    Fresh(PriceTick),
    /// Tick exists but is older than `max_age`.
    Stale(PriceTick, Duration),
    /// No tick has ever arrived for the symbol.
    Unknown,
}

impl PriceReading {
    /// The price, only when fresh.
    pub fn fresh_price(&self) -> Option<Price> {
        match self {
            Self::Fresh(tick) => Some(tick.price),
            _ => None,
        }
    }
}

/// Mapping from instrument to its latest mark price.
pub struct PriceCache {
    ticks: DashMap<String, PriceTick>,
    max_age: Duration,
}

impl PriceCache {
    pub fn new(max_age: Duration) -> Self {
        Self {
            ticks: DashMap::new(),
            max_age,
        }
    }

    /// Record a tick. Called only by the subscription pump.
    pub fn update(&self, symbol: &str, price: Price, received_at: DateTime<Utc>) {
        trace!(symbol, %price, "price tick");
        self.ticks.insert(
            symbol.to_string(),
            PriceTick {
                price,
                received_at,
                received_mono: Instant::now(),
            },
        );
    }

    /// Classified read for a symbol.
    pub fn reading(&self, symbol: &str) -> PriceReading {
        match self.ticks.get(symbol) {
            None => PriceReading::Unknown,
            Some(tick) => {
                let age = tick.age();
                if age <= self.max_age {
                    PriceReading::Fresh(*tick)
                } else {
                    PriceReading::Stale(*tick, age)
                }
            }
        }
    }

    /// Latest tick regardless of age.
    pub fn latest(&self, symbol: &str) -> Option<PriceTick> {
        self.ticks.get(symbol).map(|r| *r)
    }

    /// Number of instruments with at least one tick.
    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    /// The configured staleness window.
    pub fn max_age(&self) -> Duration {
        self.max_age
    }
}
