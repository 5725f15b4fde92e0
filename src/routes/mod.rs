//! HTTP Admission API handlers

pub mod check;
pub mod health;
pub mod users;
