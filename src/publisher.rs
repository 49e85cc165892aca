use crate::catalog::{CreatedProduct, Product};
use crate::sequencer::Sequencer;
use crate::session::{BatchHalt, SessionStore, publish_batch};
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("session {0} is already publishing")]
    AlreadyPublishing(Uuid),
    #[error("session {0} was already published")]
    AlreadyPublished(Uuid),
    #[error("publish worker is not available")]
    WorkerUnavailable,
}

/// Single background worker: batches run one after another, so two products
/// are never materialized at the same time.
#[derive(Clone)]
pub struct Publisher {
    tx: mpsc::Sender<PublishJob>,
    statuses: Arc<Mutex<HashMap<Uuid, PublishState>>>,
}

struct PublishJob {
    session_id: Uuid,
    products: Vec<Product>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PublishState {
    Queued {
        total: usize,
    },
    Running {
        created: usize,
        total: usize,
    },
    Completed {
        created: usize,
        products: Vec<CreatedProduct>,
    },
    Halted {
        created: usize,
        total: usize,
        products: Vec<CreatedProduct>,
        failed: BatchHalt,
    },
}

impl PublishState {
    fn in_flight(&self) -> bool {
        matches!(self, PublishState::Queued { .. } | PublishState::Running { .. })
    }
}

impl Publisher {
    /// Finished batches are written back to `sessions` so live listings
    /// cannot be queued a second time.
    pub fn spawn(sequencer: Sequencer, sessions: SessionStore) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<PublishJob>(queue_capacity_from_env());
        let statuses = Arc::new(Mutex::new(HashMap::new()));
        let statuses_bg = statuses.clone();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let total = job.products.len();
                {
                    let mut guard = statuses_bg.lock().await;
                    guard.insert(job.session_id, PublishState::Running { created: 0, total });
                }

                let progress = statuses_bg.clone();
                let session_id = job.session_id;
                let outcome = publish_batch(&sequencer, job.products, move |created| {
                    let progress = progress.clone();
                    async move {
                        progress
                            .lock()
                            .await
                            .insert(session_id, PublishState::Running { created, total });
                    }
                })
                .await;

                let created = outcome.created.len();
                let state = match outcome.halted {
                    None => PublishState::Completed {
                        created,
                        products: outcome.created,
                    },
                    Some(failed) => PublishState::Halted {
                        created,
                        total,
                        products: outcome.created,
                        failed,
                    },
                };
                info!(
                    target = "atelier.session",
                    session_id = %job.session_id,
                    state = ?state,
                    "publish_finished"
                );
                sessions.finish_publish(job.session_id, created).await;
                statuses_bg.lock().await.insert(job.session_id, state);
            }
        });

        (Self { tx, statuses }, handle)
    }

    pub async fn enqueue(
        &self,
        session_id: Uuid,
        products: Vec<Product>,
    ) -> Result<(), PublishError> {
        {
            let mut guard = self.statuses.lock().await;
            match guard.get(&session_id) {
                Some(state) if state.in_flight() => {
                    return Err(PublishError::AlreadyPublishing(session_id));
                }
                Some(PublishState::Completed { .. }) => {
                    return Err(PublishError::AlreadyPublished(session_id));
                }
                _ => {}
            }
            guard.insert(
                session_id,
                PublishState::Queued {
                    total: products.len(),
                },
            );
        }
        let job = PublishJob {
            session_id,
            products,
        };
        if self.tx.send(job).await.is_err() {
            self.statuses.lock().await.remove(&session_id);
            return Err(PublishError::WorkerUnavailable);
        }
        Ok(())
    }

    pub async fn status(&self, session_id: Uuid) -> Option<PublishState> {
        self.statuses.lock().await.get(&session_id).cloned()
    }

    /// Drops the status of a removed session. In-flight batches keep theirs.
    pub async fn forget(&self, session_id: Uuid) {
        let mut guard = self.statuses.lock().await;
        if guard.get(&session_id).is_some_and(|state| !state.in_flight()) {
            guard.remove(&session_id);
        }
    }
}

fn queue_capacity_from_env() -> usize {
    std::env::var("QUEUE_CAPACITY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(16)
}
