use crate::error::{RecError, RecResult};
use crate::models::UserRatings;
use crate::services::rating_store::RatingStore;
use crate::utils::validation::validate_username;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Where a user's raw ratings come from at request time.
#[async_trait]
pub trait RatingSource: Send + Sync {
    async fn fetch_ratings(&self, username: &str) -> RecResult<UserRatings>;
}

/// Reads `<root>/<username>.json`, a JSON object of item id to rating.
#[derive(Debug, Clone)]
pub struct DirectoryRatingSource {
    root: PathBuf,
}

impl DirectoryRatingSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn user_path(&self, username: &str) -> PathBuf {
        self.root.join(format!("{}.json", username))
    }

    /// Builds a rating store from every `*.json` file in the directory, in
    /// file name order. The file stem is the username.
    pub fn load_corpus(&self) -> RecResult<RatingStore> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.root)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().map_or(false, |ext| ext == "json"))
            .collect();
        paths.sort();

        let mut store = RatingStore::new();
        for path in &paths {
            let Some(username) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let ratings: UserRatings = serde_json::from_slice(&std::fs::read(path)?)?;
            store.extend_user(username, ratings.iter())?;
        }

        info!(
            "Loaded {} users and {} ratings from {}",
            store.user_count(),
            store.rating_count(),
            self.root.display()
        );
        Ok(store)
    }
}

#[async_trait]
impl RatingSource for DirectoryRatingSource {
    async fn fetch_ratings(&self, username: &str) -> RecResult<UserRatings> {
        validate_username(username)?;
        let path = self.user_path(username);

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(RecError::NotFound(format!("ratings for user {}", username)));
            }
            Err(e) => return Err(e.into()),
        };

        let ratings: UserRatings = serde_json::from_slice(&bytes)?;
        debug!("Fetched {} ratings for {}", ratings.len(), username);
        Ok(ratings)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRatingSource {
    users: RwLock<HashMap<String, UserRatings>>,
}

impl InMemoryRatingSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, username: impl Into<String>, ratings: UserRatings) {
        self.users.write().await.insert(username.into(), ratings);
    }
}

impl<S: Into<String>> FromIterator<(S, UserRatings)> for InMemoryRatingSource {
    fn from_iter<I: IntoIterator<Item = (S, UserRatings)>>(iter: I) -> Self {
        let users = iter.into_iter().map(|(name, ratings)| (name.into(), ratings)).collect();
        Self {
            users: RwLock::new(users),
        }
    }
}

#[async_trait]
impl RatingSource for InMemoryRatingSource {
    async fn fetch_ratings(&self, username: &str) -> RecResult<UserRatings> {
        self.users
            .read()
            .await
            .get(username)
            .cloned()
            .ok_or_else(|| RecError::NotFound(format!("ratings for user {}", username)))
    }
}
