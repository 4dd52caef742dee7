#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    clippy::all,
    clippy::todo,
    clippy::empty_enum,
    clippy::mem_forget,
    clippy::unused_self,
    clippy::filter_map_next,
    clippy::needless_continue,
    clippy::needless_borrow,
    clippy::match_wildcard_for_single_variants,
    clippy::if_let_mutex,
    clippy::await_holding_lock,
    clippy::imprecise_flops,
    clippy::suboptimal_flops,
    clippy::lossy_float_literal,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::fn_params_excessive_bools,
    clippy::exit,
    clippy::inefficient_to_string,
    clippy::linkedlist,
    clippy::macro_use_imports,
    clippy::option_option,
    clippy::verbose_file_reads,
    clippy::unnested_or_patterns,
    rust_2018_idioms,
    rust_2024_compatibility,
    future_incompatible,
    nonstandard_style,
    missing_docs
)]
#![doc = include_str!("../README.md")]

pub use config::{EngineIoConfig, EngineIoConfigBuilder};
pub use engine::Engine;
pub use errors::Error;
pub use handler::EngineIoHandler;
pub use packet::{HandshakeData, Packet, PacketBuf, PacketType, RawFrame};
pub use sid::Sid;
pub use str::Str;
pub use transport::{
    DefaultTransports, EventSink, Transport, TransportEvent, TransportFactory, TransportType,
};

pub mod config;
pub mod handler;
pub mod transport;

mod engine;
mod errors;
mod packet;
mod payload;
mod queue;
mod sid;
mod str;
mod urls;
mod utf8;
