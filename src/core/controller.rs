//! Controller: policy tables and event dispatch.
//!
//! Holds the loaded operational policies, the control-loop params derived
//! from them, and the registry of live correlation managers keyed by request
//! id. Events arrive from any thread; the registry guarantees at most one
//! manager per request id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::locks::TargetLocks;
use super::manager::{EventManager, ManagerServices, RetireHook, EVENT_SUFFIX};
use crate::adapters::{ActorService, NotificationSink};
use crate::config::{DecoderConfig, EngineSettings, ResolvedConfig};
use crate::domain::{
    ControlLoopEvent, ControlLoopParams, InboundMessage, Notification, NotificationType,
    OutboundMessage, ToscaPolicy,
};

/// What happened to an event offered to the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// No params for the control loop
    Dropped,
    /// REJECTED notification sent; no manager
    Rejected,
    /// New manager created and its initial event run
    Created,
    /// Handed to an existing manager
    Queued,
    /// Non-onset with no manager
    Orphaned,
}

#[derive(Debug, Default)]
struct PolicyTables {
    /// name -> version -> policy
    policies: HashMap<String, HashMap<String, Arc<ToscaPolicy>>>,
    /// Params bound to a loaded policy, by closed-loop name
    params: HashMap<String, ControlLoopParams>,
    /// Params waiting for their policy
    pending: HashMap<String, ControlLoopParams>,
}

impl PolicyTables {
    fn policy(&self, name: &str, version: &str) -> Option<Arc<ToscaPolicy>> {
        self.policies.get(name).and_then(|v| v.get(version)).cloned()
    }
}

pub struct Controller {
    name: String,
    tables: Mutex<PolicyTables>,
    managers: Arc<DashMap<Uuid, Arc<EventManager>>>,
    topics: DashMap<String, DecoderConfig>,
    services: Arc<ManagerServices>,
    retire: RetireHook,
    started: AtomicBool,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("name", &self.name)
            .field("managers", &self.managers.len())
            .field("topics", &self.topics.len())
            .field("services", &self.services)
            .finish()
    }
}

impl Controller {
    /// Build a controller on the current tokio runtime
    pub fn new(
        name: impl Into<String>,
        settings: EngineSettings,
        actors: ActorService,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self> {
        let runtime = Handle::try_current().context("Controller must be created inside a tokio runtime")?;
        Ok(Self::with_runtime(name, settings, actors, sink, runtime))
    }

    /// Build a controller whose operations run on `runtime`
    pub fn with_runtime(
        name: impl Into<String>,
        settings: EngineSettings,
        actors: ActorService,
        sink: Arc<dyn NotificationSink>,
        runtime: Handle,
    ) -> Self {
        let managers: Arc<DashMap<Uuid, Arc<EventManager>>> = Arc::new(DashMap::new());

        let registry = Arc::downgrade(&managers);
        let retire: RetireHook = Arc::new(move |manager: &Arc<EventManager>| {
            if let Some(registry) = registry.upgrade() {
                let removed = registry
                    .remove_if(&manager.request_id(), |_, current| Arc::ptr_eq(current, manager))
                    .is_some();
                debug!(request_id = %manager.request_id(), removed, "manager retired");
            }
        });

        Self {
            name: name.into(),
            tables: Mutex::new(PolicyTables::default()),
            managers,
            topics: DashMap::new(),
            services: Arc::new(ManagerServices {
                settings,
                actors: Arc::new(actors),
                sink,
                locks: Arc::new(TargetLocks::new()),
                runtime,
            }),
            retire,
            started: AtomicBool::new(false),
        }
    }

    /// Build a controller from resolved configuration
    pub fn from_config(config: &ResolvedConfig, sink: Arc<dyn NotificationSink>) -> Result<Self> {
        let actors = ActorService::from_config(&config.operators).context("Failed to build operators")?;
        let controller = Self::new(config.controller_name.clone(), config.settings.clone(), actors, sink)?;
        Ok(controller.with_decoders(&config.decoders))
    }

    /// Register the topics that carry control-loop events
    pub fn with_decoders(self, decoders: &[DecoderConfig]) -> Self {
        for decoder in decoders.iter().filter(|d| d.carries_control_loop_events()) {
            self.topics
                .entry(decoder.topic.clone())
                .or_insert_with(|| decoder.clone());
        }
        self
    }

    /// Controller name used in logs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Engine settings shared by every manager
    pub fn settings(&self) -> &EngineSettings {
        &self.services.settings
    }

    /// Target locks held by active transactions
    pub fn locks(&self) -> &TargetLocks {
        &self.services.locks
    }

    /// Begin accepting topic events
    pub fn start(&self) {
        self.started.store(true, Ordering::SeqCst);
        info!(controller = %self.name, topics = self.topics.len(), "controller started");
    }

    /// Stop accepting topic events
    pub fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
        info!(controller = %self.name, "controller stopped");
    }

    /// Whether `start` has been called without a later `stop`
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Topics the controller decodes events from
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.topics.iter().map(|t| t.key().clone()).collect();
        topics.sort();
        topics
    }

    // ------------------------------------------------------------------
    // Policy tables
    // ------------------------------------------------------------------

    /// Load a policy, bind any params waiting for it and add its own params
    #[instrument(skip(self, policy), fields(policy = %policy.name, version = %policy.version))]
    pub fn add_tosca_policy(&self, policy: ToscaPolicy) -> Result<ControlLoopParams> {
        let policy = Arc::new(policy);
        let params = ControlLoopParams::from_policy(&policy)
            .with_context(|| format!("Invalid policy {}:{}", policy.name, policy.version))?;

        let mut tables = self.tables.lock();

        let replaced = tables
            .policies
            .entry(policy.name.clone())
            .or_default()
            .insert(policy.version.clone(), policy.clone())
            .is_some();

        if replaced {
            for existing in tables.params.values_mut() {
                if existing.refers_to(&policy.name, &policy.version) {
                    existing.tosca_policy = Some(policy.clone());
                }
            }
        }

        let waiting: Vec<String> = tables
            .pending
            .iter()
            .filter(|(_, p)| p.refers_to(&policy.name, &policy.version))
            .map(|(name, _)| name.clone())
            .collect();

        for name in waiting {
            if let Some(mut bound) = tables.pending.remove(&name) {
                bound.tosca_policy = Some(policy.clone());
                tables.params.insert(name, bound);
            }
        }

        tables
            .params
            .insert(params.closed_loop_control_name.clone(), params.clone());

        info!(closed_loop = %params.closed_loop_control_name, replaced, "policy loaded");
        Ok(params)
    }

    /// Remove a policy and every params bound to it
    pub fn remove_tosca_policy(&self, name: &str, version: &str) -> Option<Arc<ToscaPolicy>> {
        let mut tables = self.tables.lock();

        let removed = tables.policies.get_mut(name).and_then(|v| v.remove(version));
        if tables.policies.get(name).is_some_and(HashMap::is_empty) {
            tables.policies.remove(name);
        }

        tables.params.retain(|_, p| !p.refers_to(name, version));

        if removed.is_some() {
            info!(policy = %name, version = %version, "policy removed");
        }
        removed
    }

    /// Add params; returns true if their policy is loaded, false if pending
    pub fn add_control_loop_params(&self, mut params: ControlLoopParams) -> bool {
        let mut tables = self.tables.lock();
        let name = params.closed_loop_control_name.clone();

        match tables.policy(&params.policy_name, &params.policy_version) {
            Some(policy) => {
                params.tosca_policy = Some(policy);
                tables.pending.remove(&name);
                tables.params.insert(name, params);
                true
            }
            None => {
                params.tosca_policy = None;
                debug!(closed_loop = %name, policy = %params.policy_name, "params pending policy");
                tables.pending.insert(name, params);
                false
            }
        }
    }

    pub fn remove_control_loop_params(&self, closed_loop: &str) -> Option<ControlLoopParams> {
        let mut tables = self.tables.lock();
        let bound = tables.params.remove(closed_loop);
        let pending = tables.pending.remove(closed_loop);
        bound.or(pending)
    }

    /// Bound params for a closed loop
    pub fn get_params(&self, closed_loop: &str) -> Option<ControlLoopParams> {
        self.tables.lock().params.get(closed_loop).cloned()
    }

    pub fn policy(&self, name: &str, version: &str) -> Option<Arc<ToscaPolicy>> {
        self.tables.lock().policy(name, version)
    }

    /// Log the policy and params tables at debug level
    pub fn dump_tables(&self) {
        let tables = self.tables.lock();

        for (name, versions) in &tables.policies {
            for version in versions.keys() {
                debug!(policy = %name, version = %version, "policy table");
            }
        }
        for (name, params) in &tables.params {
            debug!(closed_loop = %name, policy = %params.policy_name, version = %params.policy_version, "params table");
        }
        for (name, params) in &tables.pending {
            debug!(closed_loop = %name, policy = %params.policy_name, version = %params.policy_version, "pending params");
        }
    }

    // ------------------------------------------------------------------
    // Inbound messages
    // ------------------------------------------------------------------

    /// Offer a decoded message; false when it is not for this controller
    pub fn offer(&self, message: InboundMessage) -> bool {
        match message {
            InboundMessage::Policy(policy) => {
                if let Err(e) = self.add_tosca_policy(policy) {
                    warn!(error = %e, "policy not loaded");
                }
                true
            }
            InboundMessage::Event(event) => {
                self.process_event(event);
                true
            }
            InboundMessage::Other(_) => false,
        }
    }

    /// Decode a control-loop event arriving on `topic` and dispatch it
    pub fn on_topic_event(&self, topic: &str, json: &str) -> bool {
        if !self.is_started() {
            debug!(topic, "controller not started; event ignored");
            return false;
        }

        if !self.topics.contains_key(topic) {
            debug!(topic, "no decoder for topic");
            return false;
        }

        match serde_json::from_str::<ControlLoopEvent>(json) {
            Ok(event) => {
                self.process_event(event);
                true
            }
            Err(e) => {
                warn!(topic, error = %e, "undecodable control loop event");
                false
            }
        }
    }

    /// Route an event to its manager, creating one for a new onset
    #[instrument(skip(self, event), fields(closed_loop = %event.control_loop_name(), request_id = ?event.request_id))]
    pub fn process_event(&self, event: ControlLoopEvent) -> Dispatch {
        let Some(params) = self.get_params(event.control_loop_name()) else {
            debug!("no params for control loop; event dropped");
            return Dispatch::Dropped;
        };

        if !event.is_onset() {
            let manager = event
                .request_id
                .and_then(|id| self.managers.get(&id).map(|m| Arc::clone(m.value())));

            return match manager {
                Some(manager) => {
                    manager.subsequent_event(event);
                    Dispatch::Queued
                }
                None => {
                    info!("EVENT.CLEANUP: no transaction for event");
                    Dispatch::Orphaned
                }
            };
        }

        let Some(request_id) = event.request_id else {
            self.reject(&params, &event, "Missing requestId");
            return Dispatch::Rejected;
        };

        match self.managers.entry(request_id) {
            Entry::Occupied(entry) => {
                let manager = Arc::clone(entry.get());
                drop(entry);
                manager.subsequent_event(event);
                Dispatch::Queued
            }
            Entry::Vacant(slot) => {
                match EventManager::new(params.clone(), event.clone(), self.services.clone(), self.retire.clone()) {
                    Ok(manager) => {
                        manager.enqueue_initial();
                        slot.insert(Arc::clone(&manager));
                        manager.start_queue();
                        Dispatch::Created
                    }
                    Err(e) => {
                        drop(slot);
                        warn!(error = %e, "onset rejected");
                        self.reject(&params, &event, &e.to_string());
                        Dispatch::Rejected
                    }
                }
            }
        }
    }

    fn reject(&self, params: &ControlLoopParams, event: &ControlLoopEvent, message: &str) {
        let notification = Notification::for_event(event, NotificationType::Rejected)
            .with_policy(
                format!("{}{}", params.policy_name, EVENT_SUFFIX),
                params.policy_scope.clone(),
                params.policy_version.clone(),
            )
            .with_message(message);

        if let Err(e) = self.services.sink.deliver(
            &self.services.settings.notification_channel,
            &OutboundMessage::Notification(notification),
        ) {
            warn!(error = %e, "failed to deliver rejection");
        }
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn manager(&self, request_id: Uuid) -> Option<Arc<EventManager>> {
        self.managers.get(&request_id).map(|m| Arc::clone(m.value()))
    }

    pub fn active_managers(&self) -> Vec<Arc<EventManager>> {
        self.managers.iter().map(|m| Arc::clone(m.value())).collect()
    }

    pub fn manager_count(&self) -> usize {
        self.managers.len()
    }

    /// Wait until every manager has retired; false on timeout
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let poll = async {
            while !self.managers.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(timeout, poll).await.is_ok()
    }
}
