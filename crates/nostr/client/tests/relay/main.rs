//! Relay sessions, fan-out and backfill against an in-process relay.

mod backfill;
mod fanout;
mod session;
mod support;
