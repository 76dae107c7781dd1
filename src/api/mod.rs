//! # REST API Module
//!
//! This module defines all HTTP endpoints for the wallet ledger API.
//!
//! ## Endpoint Overview
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | POST | `/wallet/create` | Create wallet at registration |
//! | GET | `/wallet/balance/{user}` | Balance snapshot |
//! | POST | `/wallet/transfer` | Peer-to-peer send |
//! | POST | `/wallet/exchange` | Non-sendable → sendable |
//! | GET | `/wallet/transactions/{user}` | Transaction history |
//! | POST | `/mining/start` | Open accrual session |
//! | POST | `/mining/stop` | Close session, credit accrual |
//! | GET | `/mining/status/{user}` | Server-authoritative session view |
//! | POST | `/referrals` | Record a referral |
//! | POST | `/referrals/complete` | Mark referee qualified |
//! | POST | `/rewards/referral/claim` | Pay referral bonus |
//! | POST | `/rewards/task/claim` | Pay task bonus |
//! | POST | `/admin/reconcile/{user}` | Audit one wallet |
//! | POST | `/admin/wallet/{user}/lock` | Freeze/unfreeze |
//! | GET | `/network/stats` | Circulation stats |
//! | GET | `/health` | Health check |
//!
//! ## Request/Response Format
//!
//! All requests and responses use JSON wrapped in the standard envelope:
//!
//! ```json
//! { "success": true, "data": { ... }, "error": null }
//! { "success": false, "data": null,
//!   "error": { "code": "INSUFFICIENT_FUNDS", "message": "..." } }
//! ```
//!
//! Mutating endpoints honor an optional `Idempotency-Key` header: a
//! retried request with the same key returns the original result instead
//! of executing twice.

pub mod handlers;
pub mod routes;

pub use routes::configure_routes;
