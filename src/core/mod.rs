pub mod checkout;
pub mod commit;
pub mod context;
pub mod diff;
pub mod fetch;
pub mod gc;
pub mod hash;
pub mod merge;
pub mod models;
pub mod object_store;
pub mod push;
pub mod refs;
pub mod remote;
pub mod repository;
pub mod revert;
pub mod staging;
pub mod stash;
pub mod store;
