pub mod acquire;
pub mod app;
pub mod config;
pub mod convert;
pub mod crs;
pub mod domain;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod fs_util;
pub mod gdal_cli;
pub mod http;
pub mod mosaic;
pub mod output;
pub mod prepare;
pub mod store;
pub mod tools;
pub mod tui;
