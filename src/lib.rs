#[macro_use]
extern crate log;
#[macro_use]
extern crate derive_builder;
#[macro_use]
extern crate lazy_static;

pub mod capture;
pub mod config;
pub mod extractor;
pub mod persist;
pub mod queue;
pub mod settings;
pub mod types;
pub mod utils;
pub mod worker;
