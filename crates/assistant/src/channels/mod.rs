//! Built-in channel transports. Real messaging platforms live outside the
//! core; the console transport keeps local development honest.

pub mod console;

pub use console::ConsoleTransport;
