pub mod cli;
pub mod command;
pub mod engine;
pub mod error;
pub mod launch;
pub mod prompt;
pub mod question;
pub mod reconcile;
pub mod remote;
pub mod schema;
pub mod settings;
pub mod wait;
