//! Statement dispatch: emails customer statement PDFs and files them away.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod mailer;
pub mod routes;
pub mod statement;
pub mod store;
