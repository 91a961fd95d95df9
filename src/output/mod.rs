//! Output formatting for CLI commands
//!
//! Every read command renders either human text or a schema-versioned
//! JSON envelope.

mod command;

pub use command::{
    output_json, BalesResponse, CallsResponse, JsonResponse, OutputFormat, StatusResponse,
    UnusedResponse,
};
