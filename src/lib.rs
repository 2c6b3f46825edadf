pub mod arg_parser;
pub mod config;
pub mod controller;
pub mod device;
pub mod errors;
pub mod interval;
pub mod logger;
pub mod scheduler;
