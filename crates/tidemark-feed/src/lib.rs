//! Mark-price cache.
//!
//! One writer (the adapter's subscription callback), many readers (monitor
//! loop, reporting). Readers never block the writer; staleness is judged
//! against a monotonic clock so wall-clock jumps cannot spoof freshness.

pub mod cache;

pub use cache::{PriceCache, PriceReading, PriceTick};
