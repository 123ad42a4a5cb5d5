//! Integration tests

mod common;
mod test_deploy;
mod test_executor;
mod test_fsm;
mod test_preview;
mod test_server;
