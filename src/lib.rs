//! An embeddable process memory watchdog.
//!
//! A [`MemoryWatcher`] samples the process's in-use memory on an interval.
//! When usage crosses the critical limit, or stays on the counting side of
//! the warning limit for `cycle` consecutive ticks, it emits a single
//! [`EventType::Boom`] on its [`EventSink`], closes the sink, and after
//! `exit_time` hands `exit_code` to its [`TerminationPolicy`].
//!
//! ```no_run
//! use memwatch::{MemoryWatcher, WatchConfig, KILOBYTE};
//! use std::time::Duration;
//!
//! # async fn demo() {
//! let watcher = MemoryWatcher::new(Some(WatchConfig {
//!     warning_limit: 300 * KILOBYTE,
//!     critical_limit: 300 * KILOBYTE,
//!     exit_time: Duration::from_secs(2),
//!     ..Default::default()
//! }));
//! let events = watcher.start();
//! if let Some(boom) = events.recv().await {
//!     println!("{boom}: two seconds to clean up");
//! }
//! # }
//! ```

pub mod config;
pub mod policy;
pub mod provider;
pub mod sink;
pub mod termination;
pub mod unit;
pub mod watcher;

pub use config::{CounterReset, WatchConfig, DEFAULT_WATCH_CONFIG};
pub use provider::{MemoryStatsProvider, ProcessMemory, SampleError};
pub use sink::{EventSink, EventType};
pub use termination::{ProcessExit, TerminationPolicy};
pub use unit::{MemoryUnit, BYTE, GIGABYTE, KILOBYTE, MEGABYTE, TERABYTE};
pub use watcher::{MemoryWatcher, WatchState};
