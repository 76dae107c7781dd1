//! # API Models
//!
//! Request and response structures for the REST API. These are the
//! translation boundary: the canonical domain schema lives in
//! [`crate::db::models`], and everything here is a camelCase JSON view
//! over it.

pub mod requests;
pub mod responses;

pub use requests::*;
pub use responses::*;
