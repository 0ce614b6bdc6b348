//! # clerk
//!
//! why: give callers exactly-once Get/Put/Append over a set of replicas
//! relations: drives KvServer::execute; request ids feed the dedup in state_machine.rs
//! what: Clerk (leader memory, rotation on failure, request numbering)

use std::time::Duration;

use rand::Rng;

use crate::{ClientId, Command, KvConfig, KvError, KvServer, Op};

pub struct Clerk {
    servers: Vec<KvServer>,
    client_id: ClientId,
    next_request_id: u64,
    /// position in `servers` of the last server that answered
    leader: usize,
    retry_interval: Duration,
}

impl Clerk {
    pub fn new(servers: Vec<KvServer>, config: &KvConfig) -> Self {
        Self {
            servers,
            client_id: rand::thread_rng().gen(),
            next_request_id: 0,
            leader: 0,
            retry_interval: Duration::from_millis(config.retry_interval_ms),
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Current value of `key`, or None if it was never written.
    pub async fn get(&mut self, key: impl Into<String>) -> Result<Option<String>, KvError> {
        match self.call(Op::Get { key: key.into() }).await {
            Ok(value) => Ok(Some(value)),
            Err(KvError::NoKey) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn put(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<(), KvError> {
        self.call(Op::Put { key: key.into(), value: value.into() }).await.map(drop)
    }

    pub async fn append(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), KvError> {
        self.call(Op::Append { key: key.into(), value: value.into() }).await.map(drop)
    }

    /// Send one request until some server commits it. Retries reuse the
    /// request id, so a write that already applied is not applied again.
    async fn call(&mut self, op: Op) -> Result<String, KvError> {
        if self.servers.is_empty() {
            return Err(KvError::Config("clerk has no servers".into()));
        }
        self.next_request_id += 1;
        let command =
            Command { client_id: self.client_id, request_id: self.next_request_id, op };

        let mut misses = 0;
        let mut stopped = 0;
        loop {
            let server = &self.servers[self.leader];
            match server.execute(command.clone()).await {
                Err(KvError::Shutdown) if stopped + 1 == self.servers.len() => {
                    return Err(KvError::Shutdown);
                }
                Err(e) if e.is_retryable() => {
                    if e == KvError::Shutdown {
                        stopped += 1;
                    } else {
                        stopped = 0;
                    }
                    tracing::trace!(
                        client = self.client_id,
                        request = command.request_id,
                        server = server.id(),
                        error = %e,
                        "retrying on another server"
                    );
                    self.leader = match e {
                        KvError::WrongLeader { leader_hint: Some(hint) } => self
                            .servers
                            .iter()
                            .position(|s| s.id() == hint)
                            .filter(|&pos| pos != self.leader)
                            .unwrap_or((self.leader + 1) % self.servers.len()),
                        _ => (self.leader + 1) % self.servers.len(),
                    };
                    misses += 1;
                    if misses % self.servers.len() == 0 {
                        tokio::time::sleep(self.retry_interval).await;
                    }
                }
                result => return result,
            }
        }
    }
}

impl std::fmt::Debug for Clerk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clerk")
            .field("client_id", &self.client_id)
            .field("next_request_id", &self.next_request_id)
            .field("leader", &self.leader)
            .finish_non_exhaustive()
    }
}
