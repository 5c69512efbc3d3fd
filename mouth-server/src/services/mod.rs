pub mod listener;
pub mod store;
