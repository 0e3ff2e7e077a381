pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod lockout;
pub mod middleware;
pub mod models;
pub mod protocol;
pub mod rate_limit;
pub mod util;
