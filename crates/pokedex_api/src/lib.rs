//! HTTP-facing use-case API for the Pokedex records service.
//!
//! Transport-neutral: handlers take decoded path/form input and return
//! [`api::ApiResponse`] envelopes that a server maps onto its own types.

pub mod api;

pub use api::{
    create_record, delete_record, get_record, list_records, update_record, ApiContext,
    ApiResponse, API_BASE_PATH, RECORD_FORM_FIELD,
};
