pub mod action;
pub mod error;
pub mod k8s;
pub mod store;
