pub mod bindings;
pub mod channel;
pub mod codec;
pub mod config;
pub mod dashboard;
pub mod dispatcher;
pub mod mixer_http;
pub mod translator;
