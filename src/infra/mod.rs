pub mod broadcast;
pub mod cache;
pub mod db;
pub mod store;
