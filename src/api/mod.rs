//! Typed facade over the remote resource API
//!
//! A [`ResourceApi`] is built per inbound request from the session's
//! credential and the request's cancellation token. All calls go through the
//! shared [`CachingTransport`]. Listing results come back as [`ResourceRef`]s
//! that borrow the facade, so a ref can fetch its own detail but cannot
//! outlive the request that produced it.

mod types;

use std::collections::HashMap;
use std::fmt::Display;
use std::ops::Deref;
use std::sync::Arc;

use futures::future::try_join_all;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

pub use types::{Position, ResourceDetail, ResourceSummary};

use crate::cache::CachingTransport;
use crate::cancel::cancellable;
use crate::config::ApiConfig;
use crate::oauth::{Credential, Identity};
use crate::{Error, Result};

/// Request-scoped client for the resource API
pub struct ResourceApi {
    transport: Arc<CachingTransport>,
    config: Arc<ApiConfig>,
    credential: Credential,
    cancel: CancellationToken,
}

impl ResourceApi {
    /// Create a facade acting with `credential`
    #[must_use]
    pub fn new(
        transport: Arc<CachingTransport>,
        config: Arc<ApiConfig>,
        credential: Credential,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            config,
            credential,
            cancel,
        }
    }

    /// Build an endpoint URL from a path template.
    ///
    /// Every `{name}` in `template` is replaced by the matching argument.
    #[must_use]
    pub fn url<V: Display>(&self, template: &str, args: &[(&str, V)]) -> String {
        let mut path = template.to_string();
        for (name, value) in args {
            path = path.replace(&format!("{{{name}}}"), &value.to_string());
        }

        let base = self.config.base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }

    /// Authorized GET decoded as JSON
    ///
    /// # Errors
    ///
    /// - [`Error::Request`] on transport failure or a non-success status
    /// - [`Error::Decode`] if the body does not match `T`
    /// - [`Error::Cancelled`] if the inbound request went away
    pub async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let request = self
            .transport
            .client()
            .get(url)
            .bearer_auth(&self.credential.access_token)
            .build()
            .map_err(|e| Error::Request(format!("GET {url}: {e}")))?;

        let response = cancellable(&self.cancel, self.transport.execute(request)).await?;

        if !response.status.is_success() {
            return Err(Error::Request(format!("GET {url}: HTTP {}", response.status)));
        }

        debug!(url, from_cache = response.from_cache, "Resource fetched");
        response
            .json()
            .map_err(|e| Error::Decode(format!("GET {url}: {e}")))
    }

    /// Resources owned by `identity`
    ///
    /// # Errors
    ///
    /// See [`ResourceApi::get`].
    #[instrument(skip_all, fields(owner_id = identity.id))]
    pub async fn list_owned_resources(&self, identity: &Identity) -> Result<Vec<ResourceRef<'_>>> {
        let url = self.url(&self.config.resources_path, &[("owner_id", identity.id)]);
        let summaries: Vec<ResourceSummary> = self.get(&url).await?;

        debug!(count = summaries.len(), "Listed owned resources");
        Ok(summaries
            .into_iter()
            .map(|mut summary| {
                if summary.owner_id == 0 {
                    summary.owner_id = identity.id;
                }
                ResourceRef { api: self, summary }
            })
            .collect())
    }

    /// Detail record for a resource id
    ///
    /// # Errors
    ///
    /// See [`ResourceApi::get`].
    pub async fn resource_detail(&self, id: u64) -> Result<ResourceDetail> {
        let url = self.url(&self.config.detail_path, &[("id", id)]);
        self.get(&url).await
    }

    /// Resolve the details of every ref concurrently, in ref order.
    ///
    /// Each distinct resource id is looked up once.
    ///
    /// # Errors
    ///
    /// Returns the first failing lookup's error.
    pub async fn resolve_details(&self, refs: &[ResourceRef<'_>]) -> Result<Vec<ResourceDetail>> {
        let mut ids: Vec<u64> = refs.iter().map(|r| r.resource_id).collect();
        ids.sort_unstable();
        ids.dedup();

        let details = try_join_all(ids.iter().map(|&id| self.resource_detail(id))).await?;
        let by_id: HashMap<u64, ResourceDetail> = ids.into_iter().zip(details).collect();

        refs.iter()
            .map(|r| {
                by_id.get(&r.resource_id).cloned().ok_or_else(|| {
                    Error::Internal(format!("Detail {} missing after lookup", r.resource_id))
                })
            })
            .collect()
    }
}

/// A listed resource bound to the facade that listed it
#[derive(Clone)]
pub struct ResourceRef<'api> {
    api: &'api ResourceApi,
    summary: ResourceSummary,
}

impl ResourceRef<'_> {
    /// Summary fields from the listing
    #[must_use]
    pub fn summary(&self) -> &ResourceSummary {
        &self.summary
    }

    /// Look up this resource's detail record
    ///
    /// # Errors
    ///
    /// See [`ResourceApi::get`].
    pub async fn detail(&self) -> Result<ResourceDetail> {
        self.api.resource_detail(self.summary.resource_id).await
    }

    /// Drop the facade borrow
    #[must_use]
    pub fn into_summary(self) -> ResourceSummary {
        self.summary
    }
}

impl Deref for ResourceRef<'_> {
    type Target = ResourceSummary;

    fn deref(&self) -> &Self::Target {
        &self.summary
    }
}

impl std::fmt::Debug for ResourceRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ResourceRef").field(&self.summary).finish()
    }
}
