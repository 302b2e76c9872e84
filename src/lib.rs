pub mod aggregate;
pub mod archive;
pub mod config;
pub mod extract;
pub mod fetch;
pub mod model;
pub mod parser;
pub mod poller;
pub mod static_data;
pub mod stats;
pub mod store;

pub mod gtfs_rt {
    include!(concat!(env!("OUT_DIR"), "/transit_realtime.rs"));
}
