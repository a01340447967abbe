//! festreg registration service.
//!
//! Accounts, capacity-bounded spot types and shifts, shift CSV import and the
//! amount each participant still owes, served over a JSON API.

pub mod allocation;
pub mod api;
pub mod auth;
pub mod balance;
pub mod config;
pub mod db;
pub mod import;
pub mod mail;
pub mod model;
pub mod seed;
pub mod state;
pub mod store;
