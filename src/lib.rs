//! callprof - Function-call profiler with a dual-backend local sample store
//!
//! The storage layer hands out one engine, document or relational, behind a
//! single async contract and negotiates store versions on open.

pub mod engine;
