//! Turnstile - Sliding-Window Attempt Limiter
//!
//! This crate implements an in-process limiter for repeated sensitive actions
//! such as logins or MFA verification. Failures are counted per identity key
//! within a sliding window; reaching the threshold locks the key out for a
//! fixed duration. All state lives in memory and every decision is made
//! synchronously inside the call.

pub mod config;
pub mod driver;
pub mod error;
pub mod lockout;

pub use error::{Result, TurnstileError};
pub use lockout::{Clock, Evaluation, Limiter, ManualClock, Policy, SystemClock};
