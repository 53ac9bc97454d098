pub mod ticker_locks;

pub use ticker_locks::{normalize_ticker, TickerLocks};
