use crate::catalog::{Category, CreatedProduct, Product, ProductDraft};
use crate::inference::{InferenceError, ListingInference};
use crate::media::BinaryFile;
use crate::sequencer::Sequencer;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, future::Future, sync::Arc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

pub const SIZE_CHART_TEMPLATE: &str = "Shoulder - \nBust - \nLength - \n";
const SLEEVES_LINE: &str = "Sleeves - ";
const DEFAULT_TTL_SECS: i64 = 6 * 60 * 60;
const MAX_TTL_SECS: i64 = 365 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session {0} not found")]
    NotFound(Uuid),
    #[error("listing {index} out of range ({len} listings)")]
    ListingOutOfRange { index: usize, len: usize },
    #[error("listing `{title}` is invalid: {message}")]
    InvalidListing { title: String, message: String },
    #[error("session has no listings to publish")]
    NothingToPublish,
    #[error("session {0} is publishing")]
    Publishing(Uuid),
    #[error("session {0} was already published")]
    AlreadyPublished(Uuid),
    #[error(transparent)]
    Inference(#[from] InferenceError),
}

/// A draft as the operator sees and edits it before confirming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditableListing {
    pub title: String,
    pub description: String,
    /// Free-form measurements, prepended in bold to the description on confirm.
    pub size_chart: String,
    pub category: Category,
    pub price: f64,
    pub image_indexes: Vec<usize>,
    #[serde(default)]
    pub has_long_sleeves: bool,
}

impl EditableListing {
    /// Indexes must already be validated against the session's images.
    pub fn from_draft(draft: ProductDraft) -> Self {
        let mut size_chart = SIZE_CHART_TEMPLATE.to_string();
        if draft.has_long_sleeves {
            size_chart.push_str(SLEEVES_LINE);
        }
        Self {
            title: draft.title,
            description: draft.description,
            size_chart,
            category: draft.category,
            price: draft.price,
            image_indexes: draft
                .image_indexes
                .into_iter()
                .filter_map(|index| usize::try_from(index).ok())
                .collect(),
            has_long_sleeves: draft.has_long_sleeves,
        }
    }

    /// Resolves indexes into images and folds the size chart into the copy.
    pub fn to_product(&self, images: &[BinaryFile]) -> Result<Product, SessionError> {
        let resolved = self
            .image_indexes
            .iter()
            .map(|&index| {
                images.get(index).cloned().ok_or_else(|| SessionError::InvalidListing {
                    title: self.title.clone(),
                    message: format!("image index {index} out of range ({} images)", images.len()),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let product = Product {
            title: self.title.trim().to_string(),
            description: format!("**{}**\n\n{}", self.size_chart.trim(), self.description),
            images: resolved,
            category: self.category,
            price: self.price,
        };
        product.validate().map_err(|message| SessionError::InvalidListing {
            title: self.title.clone(),
            message,
        })?;
        Ok(product)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Editing,
    Publishing,
    /// Every listing is live; images have been released.
    Published,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub phase: SessionPhase,
    pub images: Vec<BinaryFile>,
    pub listings: Vec<EditableListing>,
    pub unused_indexes: Vec<usize>,
}

impl Session {
    pub fn view(&self) -> SessionView {
        SessionView {
            id: self.id,
            created_at: self.created_at,
            phase: self.phase,
            image_count: self.images.len(),
            unused_indexes: self.unused_indexes.clone(),
            listings: self.listings.clone(),
        }
    }

    /// Every remaining listing as a store-ready product, in listing order.
    pub fn confirmed_products(&self) -> Result<Vec<Product>, SessionError> {
        if self.listings.is_empty() {
            return Err(SessionError::NothingToPublish);
        }
        self.listings
            .iter()
            .map(|listing| listing.to_product(&self.images))
            .collect()
    }

    fn ensure_editing(&self) -> Result<(), SessionError> {
        match self.phase {
            SessionPhase::Editing => Ok(()),
            SessionPhase::Publishing => Err(SessionError::Publishing(self.id)),
            SessionPhase::Published => Err(SessionError::AlreadyPublished(self.id)),
        }
    }

    fn listing_mut(&mut self, index: usize) -> Result<&mut EditableListing, SessionError> {
        self.ensure_editing()?;
        let len = self.listings.len();
        self.listings
            .get_mut(index)
            .ok_or(SessionError::ListingOutOfRange { index, len })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub phase: SessionPhase,
    pub image_count: usize,
    pub unused_indexes: Vec<usize>,
    pub listings: Vec<EditableListing>,
}

/// In-memory sessions; lost on restart. Sessions older than the TTL are
/// evicted unless a batch is still running for them.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<Uuid, Session>>>,
    ttl: TimeDelta,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_ttl(TimeDelta::seconds(DEFAULT_TTL_SECS))
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: TimeDelta) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// `SESSION_TTL_SECS`, six hours when unset.
    pub fn from_env() -> Self {
        let secs = std::env::var("SESSION_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| (1..=MAX_TTL_SECS).contains(v))
            .unwrap_or(DEFAULT_TTL_SECS);
        Self::with_ttl(TimeDelta::seconds(secs))
    }

    /// Uploads go straight to inference; the session exists only if it succeeds.
    pub async fn create(
        &self,
        inference: &ListingInference,
        images: Vec<BinaryFile>,
    ) -> Result<SessionView, SessionError> {
        let drafts = inference.infer(&images).await?;
        let session = Session {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            phase: SessionPhase::Editing,
            listings: drafts.drafts.into_iter().map(EditableListing::from_draft).collect(),
            unused_indexes: drafts.unused_indexes,
            images,
        };
        let view = session.view();
        info!(
            target = "atelier.session",
            session_id = %session.id,
            listings = session.listings.len(),
            images = session.images.len(),
            "session_created"
        );
        self.sessions.lock().await.insert(session.id, session);
        Ok(view)
    }

    pub async fn get(&self, id: Uuid) -> Result<SessionView, SessionError> {
        let guard = self.sessions.lock().await;
        guard.get(&id).map(Session::view).ok_or(SessionError::NotFound(id))
    }

    pub async fn update_listing(
        &self,
        id: Uuid,
        index: usize,
        listing: EditableListing,
    ) -> Result<SessionView, SessionError> {
        let mut guard = self.sessions.lock().await;
        let session = guard.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        session.ensure_editing()?;
        listing.to_product(&session.images)?;
        *session.listing_mut(index)? = listing;
        Ok(session.view())
    }

    pub async fn remove_listing(
        &self,
        id: Uuid,
        index: usize,
    ) -> Result<SessionView, SessionError> {
        let mut guard = self.sessions.lock().await;
        let session = guard.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        session.listing_mut(index)?;
        session.listings.remove(index);
        Ok(session.view())
    }

    /// Drops a session and its images. Refused while its batch is running.
    pub async fn remove(&self, id: Uuid) -> Result<(), SessionError> {
        let mut guard = self.sessions.lock().await;
        let session = guard.get(&id).ok_or(SessionError::NotFound(id))?;
        if session.phase == SessionPhase::Publishing {
            return Err(SessionError::Publishing(id));
        }
        guard.remove(&id);
        info!(target = "atelier.session", session_id = %id, "session_removed");
        Ok(())
    }

    /// Locks the session against edits and hands out its products.
    pub async fn begin_publish(&self, id: Uuid) -> Result<Vec<Product>, SessionError> {
        let mut guard = self.sessions.lock().await;
        let session = guard.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        session.ensure_editing()?;
        let products = session.confirmed_products()?;
        session.phase = SessionPhase::Publishing;
        Ok(products)
    }

    /// Returns a session to editing when its batch could not be queued.
    pub async fn abort_publish(&self, id: Uuid) {
        let mut guard = self.sessions.lock().await;
        if let Some(session) = guard
            .get_mut(&id)
            .filter(|session| session.phase == SessionPhase::Publishing)
        {
            session.phase = SessionPhase::Editing;
        }
    }

    /// Removes the first `created` listings, which are now live. Whatever
    /// remains can be edited and published again; a fully published session
    /// releases its images.
    pub async fn finish_publish(&self, id: Uuid, created: usize) {
        let mut guard = self.sessions.lock().await;
        let Some(session) = guard.get_mut(&id) else {
            return;
        };
        let live = created.min(session.listings.len());
        session.listings.drain(..live);
        if session.listings.is_empty() {
            session.phase = SessionPhase::Published;
            session.images = Vec::new();
        } else {
            session.phase = SessionPhase::Editing;
        }
    }

    /// Evicts expired sessions and returns their ids.
    pub async fn evict_expired(&self) -> Vec<Uuid> {
        let cutoff = Utc::now() - self.ttl;
        let mut guard = self.sessions.lock().await;
        let expired: Vec<Uuid> = guard
            .values()
            .filter(|s| s.created_at < cutoff && s.phase != SessionPhase::Publishing)
            .map(|s| s.id)
            .collect();
        for id in &expired {
            guard.remove(id);
        }
        if !expired.is_empty() {
            info!(target = "atelier.session", evicted = expired.len(), "sessions_expired");
        }
        expired
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchHalt {
    pub index: usize,
    pub title: String,
    pub error: String,
    /// Set when the product shell was created before a later step failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub total: usize,
    pub created: Vec<CreatedProduct>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halted: Option<BatchHalt>,
}

/// Materializes products one at a time, never two concurrently. Stops at the
/// first failure; products created before it stay live. `on_progress` gets
/// the created count after each success.
pub async fn publish_batch<F, Fut>(
    sequencer: &Sequencer,
    products: Vec<Product>,
    mut on_progress: F,
) -> BatchOutcome
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = ()>,
{
    let total = products.len();
    let mut created = Vec::with_capacity(total);
    for (index, product) in products.into_iter().enumerate() {
        let title = product.title.clone();
        match sequencer.materialize(product).await {
            Ok(done) => {
                created.push(done.product);
                on_progress(created.len()).await;
            }
            Err(err) => {
                warn!(
                    target = "atelier.session",
                    index,
                    title = %title,
                    created = created.len(),
                    total,
                    error = %err,
                    "batch_halted"
                );
                return BatchOutcome {
                    total,
                    halted: Some(BatchHalt {
                        index,
                        title,
                        product_id: err.product().map(|product| product.id.clone()),
                        error: err.to_string(),
                    }),
                    created,
                };
            }
        }
    }
    info!(target = "atelier.session", created = created.len(), "batch_completed");
    BatchOutcome {
        total,
        created,
        halted: None,
    }
}
