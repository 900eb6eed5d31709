//! # Gardisto (Authentication & Request-Protection Core)
//!
//! `gardisto` turns client credentials into time-bounded, revocable,
//! abuse-resistant sessions and contains transient failures of its
//! dependencies.
//!
//! ## Sessions
//!
//! Login issues an HS256-signed access/refresh token pair over a single
//! server-held secret. Access tokens authenticate API calls; refresh tokens
//! only mint new access tokens. Logout blacklists the presented tokens for
//! the remainder of their lifetimes, so the revocation set never outgrows
//! the set of still-valid tokens.
//!
//! ## Abuse protection
//!
//! Login and registration are rate limited per client IP with fixed windows
//! counted in a shared key-value store. The limiter and the revocation
//! store fail open when that store is down; the login rate check itself
//! fails closed when the quota is exceeded.
//!
//! ## Failure containment
//!
//! Calls to fallible dependencies go through per-dependency circuit
//! breakers, and repository calls are retried with exponential backoff
//! before a failure surfaces.

pub mod api;
pub mod auth;
pub mod cli;
pub mod kv;
pub mod retry;
