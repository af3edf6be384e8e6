//! # strand
//!
//! Single-consumer, strictly-ordered task scheduler.
//!
//! Callers submit heterogeneous units of work (synchronous computations or
//! operations that settle later) and the scheduler runs them one at a time,
//! in submission order, without anyone hand-chaining continuations. Built to
//! serialize side-effecting operations such as sequential writes or ordered
//! state updates.
//!
//! ```no_run
//! use strand::model::{Step, Work};
//! use strand::scheduler::Scheduler;
//!
//! let queue = Scheduler::named("writes");
//! queue.submit(
//!     Work::new("write header", || Ok(Step::ready(16usize)))
//!         .on_complete(|bytes| println!("wrote {bytes} bytes")),
//! );
//! ```

pub mod model;
pub mod scheduler;
