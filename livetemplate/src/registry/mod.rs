//! Session & connection registry: tracks one `lastTree` + known-shapes
//! cache per live connection, fans updates out to groups of
//! connections, and sweeps connections that go quiet.
//!
//! Same `Arc<DashMap<...>>` storage and `Instant`-based last-access
//! tracking as a hot-reload template cache's `retain`-based sweeping,
//! generalized from a single global template cache to per-tenant/
//! per-group connection indexes, with `parking_lot::Mutex` guarding
//! each connection's synchronous diff state and a `tokio::sync::Mutex`
//! serializing its transport sends (an async-aware stand-in for a
//! plain serialize-lock, needed because a send is awaited while
//! holding it).

mod sweeper;

pub use sweeper::spawn_sweeper;

use crate::boundary::Template;
use crate::config::{DiffConfig, GeneratorConfig, RegistryConfig};
use crate::diff::{self, DiffOutcome, KnownShapes};
use crate::error::{LiveTemplateError, Result};
use crate::generator::generate;
use crate::tree::{Patch, TreeNode};
use crate::value::TemplateData;
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex as SyncMutex;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

/// Opaque per-connection identifier, assigned by `Registry::attach`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a connection's rendered tree reaches the browser. Implemented by
/// the host (a WebSocket write half, an SSE sink, a test recorder).
#[async_trait]
pub trait Transport: Send + 'static {
    type Error: fmt::Display + Send + 'static;

    async fn send_full(&mut self, tree: &TreeNode) -> std::result::Result<(), Self::Error>;
    async fn send_patch(&mut self, patch: &Patch) -> std::result::Result<(), Self::Error>;
}

struct DiffState {
    last_tree: Option<TreeNode>,
    known_shapes: KnownShapes,
    last_active: Instant,
}

struct Connection<T: Transport> {
    tenant: String,
    group: Option<String>,
    user: Option<String>,
    template: Arc<Template>,
    diff_state: SyncMutex<DiffState>,
    transport: AsyncMutex<T>,
}

/// Session & connection registry (`Attach`/`Detach`/`Update` plus
/// tenant/group/user broadcast). Mirrors the data model's three index
/// dimensions (`connectionId -> connection`, `groupId -> set<connectionId>`,
/// `userId -> set<connectionId>`), plus a `tenant` index needed to
/// enforce the per-tenant connection cap.
pub struct Registry<T: Transport> {
    connections: Arc<DashMap<ConnectionId, Arc<Connection<T>>>>,
    by_tenant: Arc<DashMap<String, DashSet<ConnectionId>>>,
    by_group: Arc<DashMap<String, DashSet<ConnectionId>>>,
    by_user: Arc<DashMap<String, DashSet<ConnectionId>>>,
    config: RegistryConfig,
    diff_config: DiffConfig,
}

impl<T: Transport> Clone for Registry<T> {
    fn clone(&self) -> Self {
        Self {
            connections: self.connections.clone(),
            by_tenant: self.by_tenant.clone(),
            by_group: self.by_group.clone(),
            by_user: self.by_user.clone(),
            config: self.config.clone(),
            diff_config: self.diff_config.clone(),
        }
    }
}

impl<T: Transport> Registry<T> {
    pub fn new(config: RegistryConfig) -> Self {
        Self::with_diff_config(config, DiffConfig::default())
    }

    /// Like [`Registry::new`], but also configures the diff engine's
    /// `full_tree_fallback_threshold` (see [`DiffConfig`]).
    pub fn with_diff_config(config: RegistryConfig, diff_config: DiffConfig) -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
            by_tenant: Arc::new(DashMap::new()),
            by_group: Arc::new(DashMap::new()),
            by_user: Arc::new(DashMap::new()),
            config,
            diff_config,
        }
    }

    /// Register a new connection for `tenant`, optionally joining
    /// `group` and/or binding to `user`. Fails if `tenant` is already
    /// at its connection cap.
    pub fn attach(
        &self,
        tenant: impl Into<String>,
        group: Option<String>,
        user: Option<String>,
        template: Arc<Template>,
        transport: T,
    ) -> Result<ConnectionId> {
        let tenant = tenant.into();
        let current = self.by_tenant.get(&tenant).map(|s| s.len()).unwrap_or(0);
        if current >= self.config.max_connections_per_tenant {
            return Err(LiveTemplateError::LimitExceeded {
                tenant,
                max: self.config.max_connections_per_tenant,
            });
        }

        let id = ConnectionId(Uuid::new_v4().to_string());
        let conn = Arc::new(Connection {
            tenant: tenant.clone(),
            group: group.clone(),
            user: user.clone(),
            template,
            diff_state: SyncMutex::new(DiffState {
                last_tree: None,
                known_shapes: KnownShapes::new(),
                last_active: Instant::now(),
            }),
            transport: AsyncMutex::new(transport),
        });

        self.connections.insert(id.clone(), conn);
        self.by_tenant.entry(tenant).or_default().insert(id.clone());
        if let Some(group) = group {
            self.by_group.entry(group).or_default().insert(id.clone());
        }
        if let Some(user) = user {
            self.by_user.entry(user).or_default().insert(id.clone());
        }
        Ok(id)
    }

    /// Remove a connection. Idempotent: detaching an unknown id is not
    /// an error.
    pub fn detach(&self, id: &ConnectionId) {
        if let Some((_, conn)) = self.connections.remove(id) {
            if let Some(mut set) = self.by_tenant.get_mut(&conn.tenant) {
                set.remove(id);
            }
            if let Some(group) = &conn.group {
                if let Some(mut set) = self.by_group.get_mut(group) {
                    set.remove(id);
                }
            }
            if let Some(user) = &conn.user {
                if let Some(mut set) = self.by_user.get_mut(user) {
                    set.remove(id);
                }
            }
        }
    }

    pub fn connection_count(&self, tenant: &str) -> usize {
        self.by_tenant.get(tenant).map(|s| s.len()).unwrap_or(0)
    }

    /// The configured sweep cadence (`RegistryConfig::sweep_interval`),
    /// for hosts that want `spawn_sweeper` to run on the same interval
    /// the registry was configured with rather than an ad-hoc value.
    pub fn sweep_interval(&self) -> std::time::Duration {
        self.config.sweep_interval
    }

    /// Drop every connection, releasing all registry state. The
    /// registry remains usable afterward (a fresh `attach` works).
    pub fn shutdown(&self) {
        self.connections.clear();
        self.by_tenant.clear();
        self.by_group.clear();
        self.by_user.clear();
    }

    /// Re-render `id`'s template against `data` and send the
    /// resulting full tree or patch. On a strict-mode data error the
    /// connection's last tree is left untouched; on a transport error
    /// the connection is detached.
    pub async fn update<D: TemplateData>(
        &self,
        id: &ConnectionId,
        data: &D,
        generator_config: &GeneratorConfig,
    ) -> Result<()> {
        let conn = self
            .connections
            .get(id)
            .map(|entry| entry.clone())
            .ok_or_else(|| LiveTemplateError::UnknownConnection(id.0.clone()))?;

        let curr = generate(&conn.template, data, generator_config)?;

        let outcome = {
            let mut state = conn.diff_state.lock();
            state.last_active = Instant::now();
            let outcome = diff::diff(state.last_tree.as_ref(), &curr, &mut state.known_shapes);
            let outcome = diff::apply_full_tree_threshold(
                outcome,
                &curr,
                &mut state.known_shapes,
                self.diff_config.full_tree_fallback_threshold,
            );
            state.last_tree = Some(curr);
            outcome
        };

        self.deliver(id, &conn, outcome).await
    }

    async fn deliver(
        &self,
        id: &ConnectionId,
        conn: &Arc<Connection<T>>,
        outcome: DiffOutcome,
    ) -> Result<()> {
        let patch_is_empty = matches!(&outcome, DiffOutcome::Patch(p) if p.is_empty());
        if patch_is_empty {
            return Ok(());
        }

        let mut transport = conn.transport.lock().await;
        let send_result = match &outcome {
            DiffOutcome::Full(tree) => transport.send_full(tree).await,
            DiffOutcome::Patch(patch) => transport.send_patch(patch).await,
        };
        drop(transport);

        if let Err(err) = send_result {
            tracing::warn!(connection = %id, error = %err, "transport send failed, detaching connection");
            self.detach(id);
            return Err(LiveTemplateError::TransportClosed);
        }
        Ok(())
    }

    /// Send `data` to every connection of `tenant`, rendering once and
    /// diffing per connection. Errs only if at least one connection
    /// failed to render or receive the update; the rest are still
    /// caught up.
    pub async fn broadcast_all<D: TemplateData>(
        &self,
        tenant: &str,
        data: &D,
        generator_config: &GeneratorConfig,
    ) -> Result<()> {
        let ids: Vec<ConnectionId> = match self.by_tenant.get(tenant) {
            Some(set) => set.iter().map(|id| id.clone()).collect(),
            None => return Ok(()),
        };
        self.broadcast_to_connections(&ids, data, generator_config).await
    }

    /// Send `data` to every connection of `group`, rendering once and
    /// diffing per connection. Errs only if at least one connection
    /// failed to render or receive the update; the rest are still
    /// caught up.
    pub async fn broadcast_to_group<D: TemplateData>(
        &self,
        group: &str,
        data: &D,
        generator_config: &GeneratorConfig,
    ) -> Result<()> {
        let ids: Vec<ConnectionId> = match self.by_group.get(group) {
            Some(set) => set.iter().map(|id| id.clone()).collect(),
            None => return Ok(()),
        };
        self.broadcast_to_connections(&ids, data, generator_config).await
    }

    /// Alias for [`Registry::broadcast_to_group`]: there is no
    /// cross-connection consistency guarantee beyond each connection
    /// independently converging to the same rendered content.
    pub async fn sync_group<D: TemplateData>(
        &self,
        group: &str,
        data: &D,
        generator_config: &GeneratorConfig,
    ) -> Result<()> {
        self.broadcast_to_group(group, data, generator_config).await
    }

    /// Send `data` to every connection bound to any of `user_ids`
    /// (a user may have several live connections, e.g. one per
    /// browser tab/device), rendering once per distinct template and
    /// diffing per connection. Errs only if at least one connection
    /// failed to render or receive the update; the rest are still
    /// caught up.
    pub async fn broadcast_to_users<D: TemplateData>(
        &self,
        user_ids: &[String],
        data: &D,
        generator_config: &GeneratorConfig,
    ) -> Result<()> {
        let mut ids: Vec<ConnectionId> = Vec::new();
        for user_id in user_ids {
            if let Some(set) = self.by_user.get(user_id) {
                ids.extend(set.iter().map(|id| id.clone()));
            }
        }
        self.broadcast_to_connections(&ids, data, generator_config).await
    }

    /// Send `data` to exactly the listed connections, rendering once
    /// per distinct template and diffing per connection. Shared by
    /// every `broadcast_*` method once its target connection set has
    /// been resolved from the relevant index. Every failure (render or
    /// delivery) is logged individually as it happens and counted;
    /// the whole batch only errs once afterward, naming how many of
    /// the targeted connections it could not reach.
    async fn broadcast_to_connections<D: TemplateData>(
        &self,
        ids: &[ConnectionId],
        data: &D,
        generator_config: &GeneratorConfig,
    ) -> Result<()> {
        let mut rendered: Option<(*const Template, TreeNode)> = None;
        let mut failed = 0usize;
        for id in ids {
            let Some(conn) = self.connections.get(id).map(|e| e.clone()) else {
                continue;
            };
            let template_ptr = Arc::as_ptr(&conn.template);
            let curr = match &rendered {
                Some((ptr, tree)) if *ptr == template_ptr => tree.clone(),
                _ => match generate(&conn.template, data, generator_config) {
                    Ok(tree) => {
                        rendered = Some((template_ptr, tree.clone()));
                        tree
                    }
                    Err(err) => {
                        tracing::warn!(connection = %id, error = %err, "broadcast render failed");
                        failed += 1;
                        continue;
                    }
                },
            };

            let outcome = {
                let mut state = conn.diff_state.lock();
                state.last_active = Instant::now();
                let outcome = diff::diff(state.last_tree.as_ref(), &curr, &mut state.known_shapes);
                let outcome = diff::apply_full_tree_threshold(
                    outcome,
                    &curr,
                    &mut state.known_shapes,
                    self.diff_config.full_tree_fallback_threshold,
                );
                state.last_tree = Some(curr);
                outcome
            };
            if self.deliver(id, &conn, outcome).await.is_err() {
                failed += 1;
            }
        }
        if failed > 0 {
            Err(LiveTemplateError::BroadcastFailed { failed, total: ids.len() })
        } else {
            Ok(())
        }
    }

    /// Drop connections that have been idle past the configured TTL.
    pub fn sweep_idle(&self) {
        let ttl = self.config.connection_ttl;
        let now = Instant::now();
        let stale: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|entry| now.duration_since(entry.value().diff_state.lock().last_active) > ttl)
            .map(|entry| entry.key().clone())
            .collect();
        for id in stale {
            self.detach(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::{parse, ActionNode, TemplateLibrary};
    use crate::config::ParserConfig;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingTransport {
        full_sends: Arc<AtomicUsize>,
        patch_sends: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        type Error = std::convert::Infallible;

        async fn send_full(&mut self, _tree: &TreeNode) -> std::result::Result<(), Self::Error> {
            self.full_sends.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn send_patch(&mut self, _patch: &Patch) -> std::result::Result<(), Self::Error> {
            self.patch_sends.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn template() -> Arc<Template> {
        Arc::new(
            parse(
                &[ActionNode::Field("Name".into())],
                &TemplateLibrary::new(),
                &ParserConfig::default(),
            )
            .unwrap()
            .template,
        )
    }

    #[tokio::test]
    async fn attach_then_update_sends_a_full_tree_first() {
        let registry: Registry<RecordingTransport> = Registry::new(RegistryConfig::default());
        let full_sends = Arc::new(AtomicUsize::new(0));
        let transport = RecordingTransport {
            full_sends: full_sends.clone(),
            patch_sends: Arc::new(AtomicUsize::new(0)),
        };
        let id = registry.attach("tenant-a", None, None, template(), transport).unwrap();
        registry
            .update(&id, &json!({"Name": "Ann"}), &GeneratorConfig::default())
            .await
            .unwrap();
        assert_eq!(full_sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_update_with_changed_data_sends_a_patch() {
        let registry: Registry<RecordingTransport> = Registry::new(RegistryConfig::default());
        let patch_sends = Arc::new(AtomicUsize::new(0));
        let transport = RecordingTransport {
            full_sends: Arc::new(AtomicUsize::new(0)),
            patch_sends: patch_sends.clone(),
        };
        let id = registry.attach("tenant-a", None, None, template(), transport).unwrap();
        let cfg = GeneratorConfig::default();
        registry.update(&id, &json!({"Name": "Ann"}), &cfg).await.unwrap();
        registry.update(&id, &json!({"Name": "Bob"}), &cfg).await.unwrap();
        assert_eq!(patch_sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unchanged_update_sends_nothing() {
        let registry: Registry<RecordingTransport> = Registry::new(RegistryConfig::default());
        let patch_sends = Arc::new(AtomicUsize::new(0));
        let transport = RecordingTransport {
            full_sends: Arc::new(AtomicUsize::new(0)),
            patch_sends: patch_sends.clone(),
        };
        let id = registry.attach("tenant-a", None, None, template(), transport).unwrap();
        let cfg = GeneratorConfig::default();
        let data = json!({"Name": "Ann"});
        registry.update(&id, &data, &cfg).await.unwrap();
        registry.update(&id, &data, &cfg).await.unwrap();
        assert_eq!(patch_sends.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn attach_respects_per_tenant_connection_limit() {
        let mut cfg = RegistryConfig::default();
        cfg.max_connections_per_tenant = 1;
        let registry: Registry<RecordingTransport> = Registry::new(cfg);
        registry
            .attach("tenant-a", None, None, template(), RecordingTransport::default())
            .unwrap();
        let err = registry
            .attach("tenant-a", None, None, template(), RecordingTransport::default())
            .unwrap_err();
        assert!(matches!(err, LiveTemplateError::LimitExceeded { .. }));
    }

    #[test]
    fn detach_is_idempotent_for_unknown_ids() {
        let registry: Registry<RecordingTransport> = Registry::new(RegistryConfig::default());
        registry.detach(&ConnectionId("missing".into()));
    }

    #[tokio::test]
    async fn update_on_unknown_connection_errors() {
        let registry: Registry<RecordingTransport> = Registry::new(RegistryConfig::default());
        let err = registry
            .update(
                &ConnectionId("missing".into()),
                &json!({"Name": "Ann"}),
                &GeneratorConfig::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LiveTemplateError::UnknownConnection(_)));
    }

    #[tokio::test]
    async fn disabled_fallback_threshold_never_forces_a_full_resend() {
        // `DiffConfig::default()` leaves `full_tree_fallback_threshold`
        // at `None`, so a changed-field update always stays a patch
        // regardless of size.
        let registry: Registry<RecordingTransport> =
            Registry::with_diff_config(RegistryConfig::default(), crate::config::DiffConfig::default());
        let patch_sends = Arc::new(AtomicUsize::new(0));
        let transport = RecordingTransport {
            full_sends: Arc::new(AtomicUsize::new(0)),
            patch_sends: patch_sends.clone(),
        };
        let id = registry.attach("tenant-a", None, None, template(), transport).unwrap();
        let cfg = GeneratorConfig::default();
        registry.update(&id, &json!({"Name": "Ann"}), &cfg).await.unwrap();
        registry.update(&id, &json!({"Name": "Bob"}), &cfg).await.unwrap();
        assert_eq!(patch_sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn broadcast_to_users_reaches_only_that_users_connections() {
        let registry: Registry<RecordingTransport> = Registry::new(RegistryConfig::default());
        let alice_sends = Arc::new(AtomicUsize::new(0));
        let bob_sends = Arc::new(AtomicUsize::new(0));
        registry
            .attach(
                "tenant-a",
                None,
                Some("alice".into()),
                template(),
                RecordingTransport {
                    full_sends: alice_sends.clone(),
                    patch_sends: Arc::new(AtomicUsize::new(0)),
                },
            )
            .unwrap();
        registry
            .attach(
                "tenant-a",
                None,
                Some("bob".into()),
                template(),
                RecordingTransport {
                    full_sends: bob_sends.clone(),
                    patch_sends: Arc::new(AtomicUsize::new(0)),
                },
            )
            .unwrap();

        registry
            .broadcast_to_users(
                &["alice".to_string()],
                &json!({"Name": "Ann"}),
                &GeneratorConfig::default(),
            )
            .await
            .unwrap();

        assert_eq!(alice_sends.load(Ordering::SeqCst), 1);
        assert_eq!(bob_sends.load(Ordering::SeqCst), 0);
    }

    /// A transport whose sends fail once its shared switch is flipped,
    /// for exercising the aggregate-failure path of a broadcast without
    /// needing two distinct `Registry<T>` instantiations.
    #[derive(Clone)]
    struct SwitchableTransport {
        fail: Arc<std::sync::atomic::AtomicBool>,
        sends: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Transport for SwitchableTransport {
        type Error = &'static str;

        async fn send_full(&mut self, _tree: &TreeNode) -> std::result::Result<(), Self::Error> {
            self.send_patch(&Patch::empty()).await
        }

        async fn send_patch(&mut self, _patch: &Patch) -> std::result::Result<(), Self::Error> {
            if self.fail.load(Ordering::SeqCst) {
                Err("transport closed")
            } else {
                self.sends.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn broadcast_reports_the_count_of_connections_it_could_not_reach() {
        let registry: Registry<SwitchableTransport> = Registry::new(RegistryConfig::default());
        let cfg = GeneratorConfig::default();

        let good_sends = Arc::new(AtomicUsize::new(0));
        registry
            .attach(
                "tenant-a",
                None,
                None,
                template(),
                SwitchableTransport {
                    fail: Arc::new(std::sync::atomic::AtomicBool::new(false)),
                    sends: good_sends.clone(),
                },
            )
            .unwrap();

        let bad_fail = Arc::new(std::sync::atomic::AtomicBool::new(true));
        registry
            .attach(
                "tenant-a",
                None,
                None,
                template(),
                SwitchableTransport {
                    fail: bad_fail.clone(),
                    sends: Arc::new(AtomicUsize::new(0)),
                },
            )
            .unwrap();

        let err = registry
            .broadcast_all("tenant-a", &json!({"Name": "Ann"}), &cfg)
            .await
            .unwrap_err();
        match err {
            LiveTemplateError::BroadcastFailed { failed, total } => {
                assert_eq!(failed, 1);
                assert_eq!(total, 2);
            }
            other => panic!("expected BroadcastFailed, got {other:?}"),
        }
        // The failing connection didn't stop the other one from
        // receiving its update.
        assert_eq!(good_sends.load(Ordering::SeqCst), 1);
        assert_eq!(registry.connection_count("tenant-a"), 1);
    }
}
