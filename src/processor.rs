//! The worker itself: the timeout-retry stage, the request/receive/forward
//! loop built on it, and the controller that starts and stops that loop.

pub mod lifecycle;
pub mod retry_stage;
pub mod worker_loop;
