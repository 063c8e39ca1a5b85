//! Terminal client for the football & NBA trivia server.
//!
//! The server speaks Socket.IO over a websocket. [`connection`] keeps that
//! link alive, [`session`] mirrors the game the server is running, and
//! [`game`] ties both together in one task that the binary drives.

pub mod config;
pub mod connection;
pub mod error;
pub mod game;
pub mod input;
pub mod screen;
pub mod session;
pub mod types;
pub mod wire;
