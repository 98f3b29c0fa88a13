//! adbank rpc - HTTP binding of the master banker surface
//!
//! # Key Pieces
//! - `router`: axum routes for the `/v1` account surface and `/monitor/health`
//! - `HttpBankerClient`: `BankerClient` over a pooled hyper client
//! - wire DTOs shared by both sides

pub mod client;
pub mod dto;
pub mod routes;

pub use client::HttpBankerClient;
pub use dto::{
    BalanceRequest, BudgetMode, BudgetRequest, CreateAccountRequest, ErrorResponse,
    TransferRequest,
};
pub use routes::router;
