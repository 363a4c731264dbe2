//! Prediction sessions kept for later explanation requests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bcd_core::{BcdError, ImageTensor, PredictionResult};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

/// The tensor a prediction was computed on, with its result.
#[derive(Debug, Clone)]
pub struct Session {
    /// Random v4 id returned to the client.
    pub id: Uuid,
    /// Preprocessed input.
    pub tensor: Arc<ImageTensor>,
    /// Classifier output for `tensor`.
    pub prediction: PredictionResult,
    /// Insertion time.
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Sessions {
    by_id: HashMap<Uuid, Session>,
    /// Insertion order, oldest first.
    order: VecDeque<Uuid>,
}

/// Bounded session map shared by all requests.
///
/// When full, inserting evicts the oldest session.
#[derive(Debug)]
pub struct SessionStore {
    capacity: usize,
    inner: RwLock<Sessions>,
}

impl SessionStore {
    /// Create a store holding at most `capacity` sessions (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: RwLock::new(Sessions::default()),
        }
    }

    /// Maximum number of sessions kept.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of stored sessions.
    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    /// Whether no session is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record a prediction under a fresh id.
    pub fn insert(&self, tensor: ImageTensor, prediction: PredictionResult) -> Session {
        let session = Session {
            id: Uuid::new_v4(),
            tensor: Arc::new(tensor),
            prediction,
            created_at: Utc::now(),
        };

        let mut inner = self.inner.write();
        while inner.order.len() >= self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.by_id.remove(&oldest);
                }
                None => break,
            }
        }
        inner.order.push_back(session.id);
        inner.by_id.insert(session.id, session.clone());
        session
    }

    /// Look up a session.
    pub fn get(&self, id: &Uuid) -> Option<Session> {
        self.inner.read().by_id.get(id).cloned()
    }

    /// Like [`SessionStore::get`], but a missing session is a
    /// [`BcdError::State`].
    pub fn require(&self, id: &Uuid) -> bcd_core::Result<Session> {
        self.get(id).ok_or_else(|| {
            BcdError::state(format!(
                "No prediction for session {id}. Call /predict first."
            ))
        })
    }
}
