//! Wire types for the query and streaming-insert endpoints.

pub mod insert;
pub mod query;

pub use insert::{InsertAllRequest, InsertAllResponse, InsertRow};
pub use query::{QueryParameter, QueryRequest, QueryResult, Row};
