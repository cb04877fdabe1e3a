pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod item;
pub mod naming;
pub mod request;
pub mod runtime;
pub mod selection;
pub mod services;
pub mod site;
pub mod uploads;
pub mod urls;
