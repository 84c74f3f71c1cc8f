pub mod blocked_addresses;
pub mod cache;
pub mod history;
pub mod object_store;
