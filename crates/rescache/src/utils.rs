//! Small helpers that are not specific to the cache state machine.

pub mod futures;
