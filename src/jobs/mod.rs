pub mod models;
pub mod reconcile;
pub mod tracker;
pub mod waiter;
