pub mod api;
pub mod coordinator;
pub mod donations;
pub mod error;
pub mod inventory;
pub mod ledger;
pub mod models;
pub mod requests;
pub mod schema;
pub mod store;
