pub mod agenda;
pub mod badref;
pub mod batches;
pub mod batchfile;
pub mod campaign;
pub mod dispatch;
pub mod errors;
mod hashing;
pub mod ingest;
pub mod languages;
pub mod model;
pub mod output;
mod parallelism;
pub mod records;
pub mod reliability;
pub mod scoring;
mod shuffle;
pub mod sigtest;
pub mod store;
