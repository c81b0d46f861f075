//! Authenticated client facade.
//!
//! [`WkcClient`] bundles one session, one resolver cache and the attribute
//! manager. The name-based operations resolve every id they need first and
//! skip the remote call (returning the [`Unresolved`] name) when one is missing.

use crate::attributes::{AttributeManager, CreateOutcome, TermRef};
use crate::auth::TokenSource;
use crate::config::ClientConfig;
use crate::error::{Resolved, Unresolved, WkcResult};
use crate::resolver::{AssetTarget, Resolver};
use crate::transport::{HttpBackend, Session};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

pub struct WkcClient {
    session: Arc<Session>,
    resolver: Resolver,
    attributes: AttributeManager,
}

impl WkcClient {
    /// Log in through `tokens` and build a client around the resulting token.
    pub fn connect(
        config: ClientConfig,
        backend: Arc<dyn HttpBackend>,
        tokens: &dyn TokenSource,
    ) -> WkcResult<Self> {
        let anonymous = Session::new(config, backend);
        let token = tokens.fetch_token(&anonymous)?;
        info!(host = %anonymous.host(), "authenticated");
        Ok(Self::from_session(anonymous.with_token(token)))
    }

    pub fn from_session(session: Session) -> Self {
        let session = Arc::new(session);
        Self {
            resolver: Resolver::new(Arc::clone(&session)),
            attributes: AttributeManager::new(Arc::clone(&session)),
            session,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn attributes(&self) -> &AttributeManager {
        &self.attributes
    }

    fn target(&self, asset: &str, catalog: &str) -> WkcResult<Resolved<AssetTarget>> {
        let target = self.resolver.resolve_target(asset, catalog)?;
        if let Err(missing) = &target {
            warn!("skipping {asset}: {missing}");
        }
        Ok(target)
    }

    pub fn view_asset_info(&self, asset: &str, catalog: &str) -> WkcResult<Resolved<Value>> {
        match self.target(asset, catalog)? {
            Ok(target) => Ok(Ok(self.attributes.read_asset(&target)?)),
            Err(missing) => Ok(Err(missing)),
        }
    }

    pub fn create_attribute(
        &self,
        asset: &str,
        catalog: &str,
    ) -> WkcResult<Resolved<CreateOutcome>> {
        match self.target(asset, catalog)? {
            Ok(target) => Ok(Ok(self.attributes.create(&target)?)),
            Err(missing) => Ok(Err(missing)),
        }
    }

    pub fn view_attribute(&self, asset: &str, catalog: &str) -> WkcResult<Resolved<Value>> {
        match self.target(asset, catalog)? {
            Ok(target) => Ok(Ok(self.attributes.read(&target)?)),
            Err(missing) => Ok(Err(missing)),
        }
    }

    pub fn delete_attribute(&self, asset: &str, catalog: &str) -> WkcResult<Resolved<()>> {
        match self.target(asset, catalog)? {
            Ok(target) => Ok(Ok(self.attributes.delete(&target)?)),
            Err(missing) => Ok(Err(missing)),
        }
    }

    /// Point `column` of `asset` at `term` from `category`.
    ///
    /// The term is resolved before the asset, so an unknown term costs no
    /// asset search.
    pub fn update_attribute(
        &self,
        asset: &str,
        catalog: &str,
        column: &str,
        term: &str,
        category: &str,
    ) -> WkcResult<Resolved<()>> {
        let term_id = match self.resolver.term_id(term, category)? {
            Ok(id) => id,
            Err(missing) => return Ok(skip(column, missing)),
        };
        let target = match self.target(asset, catalog)? {
            Ok(target) => target,
            Err(missing) => return Ok(Err(missing)),
        };
        self.attributes
            .update(&target, column, TermRef::new(term, term_id))?;
        Ok(Ok(()))
    }
}

fn skip<T>(column: &str, missing: Unresolved) -> Resolved<T> {
    warn!("skipping column {column}: {missing}");
    Err(missing)
}
