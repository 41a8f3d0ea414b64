pub mod models;
pub mod senders;
pub mod service;
pub mod store;
pub mod vapid;

#[cfg(test)]
pub mod testing;
