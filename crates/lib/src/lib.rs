//! Switchyard core library: provider adapters with native or prompt-emulated tool
//! calling, configuration, sessions, and the HTTP gateway used by the CLI.

pub mod config;
pub mod gateway;
pub mod init;
pub mod llm;
pub mod session;
