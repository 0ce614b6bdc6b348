//! # raft-kv
//!
//! why: a linearizable key/value service is the canonical raft consumer
//! relations: runs on raft-runtime nodes; commands travel as raft log entries
//! what: Command/Op encoding, deduplicating state machine, KvServer, Clerk

mod clerk;
mod command;
mod config;
mod error;
mod server;
mod state_machine;

pub use clerk::Clerk;
pub use command::{ClientId, Command, Op, Reply};
pub use config::KvConfig;
pub use error::KvError;
pub use server::KvServer;
pub use state_machine::KvStateMachine;
