//! Process isolation: the worker entry point, its event protocol, and the
//! relay that supervises it.

pub mod protocol;
pub mod relay;
pub mod worker;

pub use protocol::{ProgressEvent, parse_line};
pub use relay::{Relay, RelayHandle, RelayOptions, RelayStats, WorkerCommand};
pub use worker::{WorkerArgs, run_worker, run_worker_with};
