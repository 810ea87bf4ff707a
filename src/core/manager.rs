//! Event correlation manager.
//!
//! One manager owns one control-loop transaction (one request id). Every
//! mutation goes through the manager's [`SerialWorkQueue`]: the initial
//! onset, later events for the same request, and operation outcomes posted
//! back by the tasks that executed them. State transitions therefore never
//! race, even though events arrive on many threads.
//!
//! # Lifecycle
//!
//! ```text
//! Created -> Active -> (steps)* -> Final(result)
//!        \-> Rejected
//! ```
//!
//! After each message the manager flushes pending notifications. Once it is
//! no longer active it emits the FINAL notification, releases its locks and
//! retires itself from the controller's registry.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::context::StepContext;
use super::locks::TargetLocks;
use super::processor::ControlLoopProcessor;
use super::properties::{
    AAI_TARGET_ENTITY, CQ_PROPERTIES, PNF_PROPERTIES, TENANT_PROPERTIES, VSERVER_VSERVER_NAME,
};
use super::step::{Launcher, Step, StepError, StepKind};
use super::validation::{self, ValidationError};
use super::work_queue::SerialWorkQueue;
use crate::adapters::{ActorService, NotificationSink, OperationRequest, LOCK_ACTOR};
use crate::config::EngineSettings;
use crate::domain::{
    ControlLoopEvent, ControlLoopParams, ControlLoopResponse, FinalResult, NewEventStatus,
    Notification, NotificationType, OperationOutcome, OperationRecord, OperationResult,
    OutboundMessage,
};

/// Policy-name suffix of ACTIVE and REJECTED notifications
pub const EVENT_SUFFIX: &str = ".EVENT";
/// Policy-name suffix of OPERATION-family notifications
pub const PROCESSING_SUFFIX: &str = ".EVENT.MANAGER.PROCESSING";
/// Policy-name suffix of the FINAL notification
pub const FINAL_SUFFIX: &str = ".EVENT.MANAGER.FINAL";

/// Target of control-loop responses
const RESPONSE_TARGET: &str = "DCAE";

const TIMEOUT_MESSAGE: &str = "Control Loop timed out";
const POLICY_ERROR_MESSAGE: &str = "Policy processing aborted due to policy error";

/// Dependencies shared by every manager of one controller
pub struct ManagerServices {
    pub settings: EngineSettings,
    pub actors: Arc<ActorService>,
    pub sink: Arc<dyn NotificationSink>,
    pub locks: Arc<TargetLocks>,
    /// Runtime on which operations are executed
    pub runtime: Handle,
}

impl std::fmt::Debug for ManagerServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerServices")
            .field("settings", &self.settings)
            .field("actors", &self.actors)
            .field("locks", &self.locks.len())
            .finish()
    }
}

/// Called once when a manager is done; removes it from the registry
pub type RetireHook = Arc<dyn Fn(&Arc<EventManager>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Created,
    Active,
    Final(FinalResult),
    Rejected,
}

impl ManagerState {
    pub fn is_active(self) -> bool {
        self == ManagerState::Active
    }
}

enum ManagerMessage {
    Initial,
    Event(ControlLoopEvent),
    Outcome { ticket: u64, outcome: OperationOutcome },
}

struct PendingNotification {
    kind: NotificationType,
    suffix: &'static str,
    message: Option<String>,
    history: Vec<OperationRecord>,
}

/// State touched only from the work queue
struct ManagerInner {
    state: ManagerState,
    processor: Option<ControlLoopProcessor>,
    steps: VecDeque<Step>,
    context: StepContext,
    /// Identifies the launch an outcome belongs to
    ticket: u64,
    awaiting: bool,
    /// Attempts of the current policy operation, starting at 1
    attempts: u32,
    full_history: Vec<OperationRecord>,
    partial_history: Vec<OperationRecord>,
    pending: Vec<PendingNotification>,
    responses: Vec<ControlLoopResponse>,
    accepted: bool,
    end_time: Option<Instant>,
    num_onsets: u32,
    num_abatements: u32,
    abatement: Option<ControlLoopEvent>,
    op_seq: u32,
    final_message: Option<String>,
    destroyed: bool,
}

impl ManagerInner {
    fn new() -> Self {
        Self {
            state: ManagerState::Created,
            processor: None,
            steps: VecDeque::new(),
            context: StepContext::new(),
            ticket: 0,
            awaiting: false,
            attempts: 0,
            full_history: Vec::new(),
            partial_history: Vec::new(),
            pending: Vec::new(),
            responses: Vec::new(),
            accepted: false,
            end_time: None,
            num_onsets: 1,
            num_abatements: 0,
            abatement: None,
            op_seq: 0,
            final_message: None,
            destroyed: false,
        }
    }

    /// Record an outcome; a completion replaces its own start record
    fn add_to_history(&mut self, outcome: &OperationOutcome) {
        let record = outcome.to_record();
        replace_or_push(&mut self.partial_history, record.clone());
        replace_or_push(&mut self.full_history, record);
    }

    fn last_record(&self) -> Option<&OperationRecord> {
        self.partial_history.last()
    }

    fn push_pending(&mut self, kind: NotificationType, suffix: &'static str, message: Option<String>) {
        self.pending.push(PendingNotification {
            kind,
            suffix,
            message,
            history: self.partial_history.clone(),
        });
    }

    fn finish(&mut self, result: FinalResult, message: Option<&str>) {
        self.state = ManagerState::Final(result);
        self.final_message = message.map(str::to_string);
        self.steps.clear();
        self.awaiting = false;
    }

    fn remaining(&self) -> Duration {
        self.end_time
            .map(|end| end.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO)
    }

    fn target_entity(&self) -> Option<String> {
        self.context.get_str(AAI_TARGET_ENTITY).map(str::to_string)
    }
}

fn replace_or_push(history: &mut Vec<OperationRecord>, record: OperationRecord) {
    if let Some(last) = history.last_mut() {
        if last.end.is_none() && last.actor == record.actor && last.operation == record.operation {
            *last = record;
            return;
        }
    }
    history.push(record);
}

/// Correlation manager for one control-loop transaction
pub struct EventManager {
    request_id: Uuid,
    params: ControlLoopParams,
    event: Arc<ControlLoopEvent>,
    services: Arc<ManagerServices>,
    queue: SerialWorkQueue,
    inner: Mutex<ManagerInner>,
    self_ref: Weak<EventManager>,
    retire: RetireHook,
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventManager")
            .field("request_id", &self.request_id)
            .field("closed_loop", &self.params.closed_loop_control_name)
            .field("queue", &self.queue)
            .finish()
    }
}

impl EventManager {
    /// Validate the onset and build a manager. Nothing runs until the initial
    /// event is queued and [`start_queue`](Self::start_queue) is called.
    pub fn new(
        params: ControlLoopParams,
        event: ControlLoopEvent,
        services: Arc<ManagerServices>,
        retire: RetireHook,
    ) -> Result<Arc<Self>, ValidationError> {
        validation::validate(&event)?;
        let request_id = event.request_id.ok_or(ValidationError::MissingRequestId)?;

        Ok(Arc::new_cyclic(|self_ref| Self {
            request_id,
            params,
            event: Arc::new(event),
            services,
            queue: SerialWorkQueue::new(),
            inner: Mutex::new(ManagerInner::new()),
            self_ref: self_ref.clone(),
            retire,
        }))
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn params(&self) -> &ControlLoopParams {
        &self.params
    }

    /// The onset that created this manager
    pub fn event(&self) -> &ControlLoopEvent {
        &self.event
    }

    pub fn state(&self) -> ManagerState {
        self.inner.lock().state
    }

    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Full operation history of the transaction
    pub fn history(&self) -> Vec<OperationRecord> {
        self.inner.lock().full_history.clone()
    }

    /// True once a step that accepts new events has been launched
    pub fn is_accepted(&self) -> bool {
        self.inner.lock().accepted
    }

    pub fn num_onsets(&self) -> u32 {
        self.inner.lock().num_onsets
    }

    pub fn num_abatements(&self) -> u32 {
        self.inner.lock().num_abatements
    }

    /// Work items waiting in the manager's queue
    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Queue the initial event without running it
    pub fn enqueue_initial(self: &Arc<Self>) {
        self.post(ManagerMessage::Initial);
    }

    /// Drain the queue on the calling thread, starting with the initial event
    pub fn start_queue(&self) {
        self.queue.start();
    }

    /// Hand a later event for the same request to the manager
    pub fn subsequent_event(self: &Arc<Self>, event: ControlLoopEvent) {
        self.post(ManagerMessage::Event(event));
    }

    fn post(self: &Arc<Self>, message: ManagerMessage) {
        let manager = Arc::clone(self);
        self.queue.queue_and_run(move || manager.handle(message));
    }

    fn post_outcome(&self, ticket: u64, outcome: OperationOutcome) {
        match self.self_ref.upgrade() {
            Some(manager) => manager.post(ManagerMessage::Outcome { ticket, outcome }),
            None => debug!(request_id = %self.request_id, "manager gone; outcome discarded"),
        }
    }

    fn handle(self: &Arc<Self>, message: ManagerMessage) -> Result<()> {
        let (retire, result) = {
            let mut inner = self.inner.lock();

            let result = match message {
                ManagerMessage::Initial => {
                    self.initial_event(&mut inner);
                    Ok(())
                }
                ManagerMessage::Event(event) => {
                    self.on_subsequent_event(&mut inner, &event);
                    Ok(())
                }
                ManagerMessage::Outcome { ticket, outcome } => self.on_outcome(&mut inner, ticket, outcome),
            };

            self.run_steps(&mut inner);
            (self.update(&mut inner), result)
        };

        if retire {
            (self.retire)(self);
        }

        result
    }

    fn initial_event(&self, inner: &mut ManagerInner) {
        if inner.state != ManagerState::Created {
            warn!(request_id = %self.request_id, "initial event delivered twice; ignored");
            return;
        }

        let processor = self
            .params
            .tosca_policy
            .as_deref()
            .ok_or_else(|| {
                anyhow!(
                    "policy {}:{} is not loaded",
                    self.params.policy_name,
                    self.params.policy_version
                )
            })
            .and_then(|policy| ControlLoopProcessor::new(policy).map_err(anyhow::Error::from));

        match processor {
            Ok(processor) => {
                let mut timeout = processor.timeout();
                if timeout.is_zero() {
                    timeout = Duration::from_secs(self.services.settings.default_timeout_seconds);
                }

                inner.end_time = Some(Instant::now() + timeout);
                inner.processor = Some(processor);
                inner.state = ManagerState::Active;

                info!(
                    request_id = %self.request_id,
                    closed_loop = %self.params.closed_loop_control_name,
                    timeout_secs = timeout.as_secs(),
                    "control loop started"
                );

                inner.push_pending(NotificationType::Active, EVENT_SUFFIX, None);
                self.load_policy(inner);
            }
            Err(e) => {
                warn!(request_id = %self.request_id, error = %e, "control loop rejected");
                inner.state = ManagerState::Rejected;
                inner.push_pending(
                    NotificationType::Rejected,
                    EVENT_SUFFIX,
                    Some(format!("Exception occurred: {}", e)),
                );
            }
        }
    }

    fn on_subsequent_event(&self, inner: &mut ManagerInner, event: &ControlLoopEvent) {
        if !inner.state.is_active() {
            debug!(request_id = %self.request_id, "event for inactive manager ignored");
            return;
        }

        match self.on_new_event(inner, event) {
            NewEventStatus::SyntaxError => {
                warn!(request_id = %self.request_id, "subsequent event has a syntax error; ignored")
            }
            NewEventStatus::FirstOnset | NewEventStatus::SubsequentOnset => {
                warn!(
                    request_id = %self.request_id,
                    onsets = inner.num_onsets,
                    "subsequent onset"
                )
            }
            NewEventStatus::FirstAbatement | NewEventStatus::SubsequentAbatement => {
                info!(
                    request_id = %self.request_id,
                    abatements = inner.num_abatements,
                    "abatement received; no action taken"
                )
            }
        }
    }

    /// Classify an event for this transaction, counting onsets and abatements
    fn on_new_event(&self, inner: &mut ManagerInner, event: &ControlLoopEvent) -> NewEventStatus {
        if validation::check_syntax(event).is_err() {
            return NewEventStatus::SyntaxError;
        }

        if event.is_onset() {
            if *event == *self.event {
                return NewEventStatus::FirstOnset;
            }
            inner.num_onsets += 1;
            return NewEventStatus::SubsequentOnset;
        }

        inner.num_abatements += 1;
        if inner.abatement.is_none() {
            inner.abatement = Some(event.clone());
            NewEventStatus::FirstAbatement
        } else {
            NewEventStatus::SubsequentAbatement
        }
    }

    /// Queue the policy step for the processor's current node
    fn load_policy(&self, inner: &mut ManagerInner) {
        inner.partial_history.clear();

        let Some(processor) = inner.processor.as_ref() else {
            return;
        };

        if let Some(result) = processor.is_current_final() {
            inner.finish(result, None);
            return;
        }

        match processor.current_policy() {
            Ok(operation) => {
                debug!(
                    request_id = %self.request_id,
                    policy = %operation.id,
                    actor = %operation.operation.actor,
                    operation = %operation.operation.operation,
                    "loading policy"
                );
                inner.attempts = 1;
                inner.steps.push_back(Step::policy(self.event.clone(), operation));
            }
            Err(e) => {
                error!(request_id = %self.request_id, error = %e, "policy processing failed");
                inner.finish(FinalResult::FinalFailure, Some(POLICY_ERROR_MESSAGE));
            }
        }
    }

    /// Follow the policy graph for `result` and load the next node
    fn advance(&self, inner: &mut ManagerInner, result: OperationResult) {
        inner.steps.clear();

        let moved = match inner.processor.as_mut() {
            Some(processor) => processor.next_policy_for_result(result),
            None => return,
        };

        match moved {
            Ok(()) => self.load_policy(inner),
            Err(e) => {
                error!(request_id = %self.request_id, error = %e, "policy processing failed");
                inner.finish(FinalResult::FinalFailure, Some(POLICY_ERROR_MESSAGE));
            }
        }
    }

    fn check_timeout(&self, inner: &mut ManagerInner) -> bool {
        let expired = inner.end_time.is_some_and(|end| Instant::now() >= end);
        if expired {
            warn!(request_id = %self.request_id, "control loop timed out");
            inner.finish(FinalResult::FinalFailureTimeout, Some(TIMEOUT_MESSAGE));
        }
        expired
    }

    /// Start steps until one is in flight or the transaction ends
    fn run_steps(&self, inner: &mut ManagerInner) {
        loop {
            if !inner.state.is_active() || inner.awaiting || self.check_timeout(inner) {
                return;
            }

            let Some(front) = inner.steps.front() else {
                return;
            };

            if !front.is_preprocessed() {
                if let Err(e) = self.load_preprocessor_steps(inner) {
                    self.step_failed(inner, e);
                }
                continue;
            }

            let remaining = inner.remaining();
            inner.ticket += 1;
            let mut launcher = OperationLauncher {
                manager: self,
                ticket: inner.ticket,
            };

            let ManagerInner { steps, context, .. } = &mut *inner;
            let Some(step) = steps.front_mut() else {
                return;
            };

            let started = match step.set_properties(context, &self.services.actors) {
                Ok(()) => step.start(remaining, context, &mut launcher),
                Err(e) => Err(e),
            };

            match started {
                Ok(false) => {
                    debug!(
                        request_id = %self.request_id,
                        actor = step.actor(),
                        operation = step.operation(),
                        "step skipped"
                    );
                    inner.steps.pop_front();
                }
                Ok(true) => {
                    inner.awaiting = true;
                    self.record_start(inner);
                }
                Err(e) => self.step_failed(inner, e),
            }
        }
    }

    /// Push the front step's preprocessor steps in front of it
    fn load_preprocessor_steps(&self, inner: &mut ManagerInner) -> Result<(), StepError> {
        let max_steps = self.services.settings.max_steps;
        if inner.steps.len() >= max_steps {
            return Err(StepError::TooManySteps);
        }

        let Some(front) = inner.steps.front_mut() else {
            return Ok(());
        };
        front.set_preprocessed(true);
        let base = front.clone();

        let names = base.property_names(&inner.context, &self.services.actors);
        let needs = |group: &[&str]| names.iter().any(|n| group.contains(&n.as_str()));

        let mut kinds = Vec::new();
        if base.is_policy_step() {
            kinds.push(StepKind::GetTargetEntity);
            kinds.push(StepKind::Lock);
        }
        if needs(TENANT_PROPERTIES) {
            let vserver = self.event.aai.get(VSERVER_VSERVER_NAME).cloned().ok_or_else(|| {
                StepError::Invalid(format!("Enrichment data is missing {}", VSERVER_VSERVER_NAME))
            })?;
            kinds.push(StepKind::GetTenant { vserver });
        }
        if needs(PNF_PROPERTIES) {
            kinds.push(StepKind::GetPnf);
        }
        if needs(CQ_PROPERTIES) {
            kinds.push(StepKind::CustomQuery);
        }
        if base.is_policy_step() && !self.services.settings.guard_disabled {
            kinds.push(StepKind::Guard);
        }

        if inner.steps.len() + kinds.len() > max_steps {
            return Err(StepError::TooManySteps);
        }

        for kind in kinds.into_iter().rev() {
            inner.steps.push_front(Step::derive(&base, kind));
        }

        Ok(())
    }

    fn record_start(&self, inner: &mut ManagerInner) {
        let Some(step) = inner.steps.front() else {
            return;
        };

        if step.accepts_event() {
            inner.accepted = true;
        }

        let kind = step.kind().clone();
        let outcome = OperationOutcome::started(step.actor(), step.operation(), inner.target_entity());
        let policy_op = &step.policy_operation().operation;
        let guard_message = format!("Sending guard query for {} {}", policy_op.actor, policy_op.operation);

        info!(
            request_id = %self.request_id,
            actor = %outcome.actor,
            operation = %outcome.operation,
            "operation started"
        );

        match kind {
            StepKind::Policy => {
                inner.add_to_history(&outcome);
                let message = inner.last_record().map(OperationRecord::to_message);
                inner.push_pending(NotificationType::Operation, PROCESSING_SUFFIX, message);
            }
            StepKind::Guard => {
                inner.add_to_history(&outcome);
                inner.push_pending(NotificationType::Operation, PROCESSING_SUFFIX, Some(guard_message));
            }
            _ => {}
        }
    }

    /// A step could not be prepared or launched
    fn step_failed(&self, inner: &mut ManagerInner, error: StepError) {
        let Some(step) = inner.steps.pop_front() else {
            return;
        };

        warn!(
            request_id = %self.request_id,
            actor = step.actor(),
            operation = step.operation(),
            error = %error,
            "step failed"
        );

        let outcome = OperationOutcome::started(step.actor(), step.operation(), inner.target_entity())
            .complete(OperationResult::FailureException)
            .with_message(error.to_string());
        inner.add_to_history(&outcome);
        let message = inner.last_record().map(OperationRecord::to_history);
        inner.push_pending(NotificationType::OperationFailure, PROCESSING_SUFFIX, message);

        if matches!(error, StepError::TooManySteps) {
            inner.finish(FinalResult::FinalFailureException, None);
            return;
        }

        self.advance(inner, OperationResult::FailureException);
    }

    fn on_outcome(&self, inner: &mut ManagerInner, ticket: u64, outcome: OperationOutcome) -> Result<()> {
        if !inner.state.is_active() {
            debug!(request_id = %self.request_id, "outcome for inactive manager ignored");
            return Ok(());
        }

        if !inner.awaiting || ticket != inner.ticket {
            debug!(request_id = %self.request_id, ticket, "stale outcome ignored");
            return Ok(());
        }
        inner.awaiting = false;

        if self.check_timeout(inner) {
            return Ok(());
        }

        let step = inner.steps.pop_front().ok_or_else(|| {
            anyhow!("no step awaiting outcome of {}.{}", outcome.actor, outcome.operation)
        })?;

        info!(
            request_id = %self.request_id,
            actor = %outcome.actor,
            operation = %outcome.operation,
            result = %outcome.result,
            "operation completed"
        );

        if outcome.result.is_success() {
            step.success(&outcome, &mut inner.context);
            self.report_success(inner, &step, &outcome);
            if step.is_policy_step() {
                self.advance(inner, OperationResult::Success);
            }
            return Ok(());
        }

        self.report_failure(inner, &step, &outcome);

        if step.is_policy_step() {
            let retries = step.policy_operation().retries;
            let retriable = matches!(
                outcome.result,
                OperationResult::Failure | OperationResult::FailureTimeout
            );

            if retriable && inner.attempts <= retries {
                inner.attempts += 1;
                info!(request_id = %self.request_id, attempt = inner.attempts, "retrying operation");
                inner.steps.push_front(step.fresh());
                return Ok(());
            }

            let result = if retriable && retries > 0 {
                OperationResult::FailureRetries
            } else {
                outcome.result
            };
            self.advance(inner, result);
            return Ok(());
        }

        let result = match step.kind() {
            StepKind::Lock | StepKind::Guard => OperationResult::FailureGuard,
            _ => match outcome.result {
                OperationResult::FailureTimeout | OperationResult::FailureException => outcome.result,
                _ => OperationResult::Failure,
            },
        };
        self.advance(inner, result);
        Ok(())
    }

    fn report_success(&self, inner: &mut ManagerInner, step: &Step, outcome: &OperationOutcome) {
        match step.kind() {
            StepKind::Policy => {
                inner.add_to_history(outcome);
                let message = inner.last_record().map(OperationRecord::to_history);
                inner.push_pending(NotificationType::OperationSuccess, PROCESSING_SUFFIX, message);

                if let Some(ref payload) = outcome.control_loop_payload {
                    inner.responses.push(ControlLoopResponse {
                        closed_loop_control_name: self.event.closed_loop_control_name.clone(),
                        version: self.event.version.clone(),
                        request_id: self.event.request_id,
                        target: RESPONSE_TARGET.to_string(),
                        from: outcome.actor.clone(),
                        policy_name: Some(self.params.policy_name.clone()),
                        policy_version: Some(self.params.policy_version.clone()),
                        payload: Some(payload.clone()),
                    });
                }
            }
            StepKind::Guard => {
                inner.add_to_history(outcome);
                let message = self.guard_result_message(step, "Permit");
                inner.push_pending(NotificationType::Operation, PROCESSING_SUFFIX, Some(message));
            }
            _ => {}
        }
    }

    fn report_failure(&self, inner: &mut ManagerInner, step: &Step, outcome: &OperationOutcome) {
        inner.add_to_history(outcome);

        match step.kind() {
            StepKind::Guard => {
                let message = self.guard_result_message(step, "Deny");
                inner.push_pending(NotificationType::Operation, PROCESSING_SUFFIX, Some(message));
            }
            StepKind::Lock => {
                inner.push_pending(NotificationType::Rejected, PROCESSING_SUFFIX, outcome.message.clone());
            }
            _ => {
                let message = inner.last_record().map(OperationRecord::to_history);
                inner.push_pending(NotificationType::OperationFailure, PROCESSING_SUFFIX, message);
            }
        }
    }

    fn guard_result_message(&self, step: &Step, decision: &str) -> String {
        let op = &step.policy_operation().operation;
        format!("Guard result for {} {} is {}", op.actor, op.operation, decision)
    }

    /// Flush notifications; returns true when the manager must be retired
    fn update(&self, inner: &mut ManagerInner) -> bool {
        for pending in std::mem::take(&mut inner.pending) {
            inner.op_seq += 1;
            let mut notification = self.notification(pending.kind, pending.suffix, inner.op_seq);
            notification.message = pending.message;
            notification.history = pending.history;
            self.deliver(&self.services.settings.notification_channel, OutboundMessage::Notification(notification));
        }

        for response in std::mem::take(&mut inner.responses) {
            self.deliver(&self.services.settings.response_channel, OutboundMessage::Response(response));
        }

        if inner.destroyed {
            return false;
        }

        match inner.state {
            ManagerState::Final(result) => {
                let (kind, default_message) = result.notification();
                inner.op_seq += 1;
                let mut notification = self.notification(kind, FINAL_SUFFIX, inner.op_seq);
                notification.message = inner
                    .final_message
                    .take()
                    .or_else(|| default_message.map(str::to_string));
                notification.history = inner.full_history.clone();

                info!(
                    request_id = %self.request_id,
                    closed_loop = %self.params.closed_loop_control_name,
                    result = %result,
                    "control loop finished"
                );

                self.deliver(&self.services.settings.notification_channel, OutboundMessage::Notification(notification));
                self.destroy(inner);
                true
            }
            ManagerState::Rejected => {
                self.destroy(inner);
                true
            }
            ManagerState::Created | ManagerState::Active => false,
        }
    }

    fn notification(&self, kind: NotificationType, suffix: &str, op_seq_num: u32) -> Notification {
        let mut notification = Notification::for_event(&self.event, kind).with_policy(
            format!("{}{}", self.params.policy_name, suffix),
            self.params.policy_scope.clone(),
            self.params.policy_version.clone(),
        );
        notification.op_seq_num = op_seq_num;
        notification
    }

    fn deliver(&self, channel: &str, message: OutboundMessage) {
        if let Err(e) = self.services.sink.deliver(channel, &message) {
            warn!(request_id = %self.request_id, channel, error = %e, "failed to deliver message");
        }
    }

    fn destroy(&self, inner: &mut ManagerInner) {
        inner.steps.clear();
        inner.awaiting = false;
        inner.destroyed = true;
        self.services.locks.unlock_all(self.request_id);
    }

    /// Start an operation. Lock requests are decided in process; everything
    /// else runs as a task on the runtime with its own timeout.
    fn launch_operation(&self, ticket: u64, request: OperationRequest) -> Result<(), StepError> {
        if request.actor == LOCK_ACTOR {
            let entity = request.target_entity.clone().unwrap_or_default();
            let granted = self.services.locks.try_lock(&entity, self.request_id);
            let started = OperationOutcome::started(&request.actor, &request.operation, Some(entity.clone()));
            let outcome = if granted {
                started.complete(OperationResult::Success)
            } else {
                started
                    .complete(OperationResult::Failure)
                    .with_message(format!("The target {} is already locked", entity))
            };
            self.post_outcome(ticket, outcome);
            return Ok(());
        }

        let operator = self
            .services
            .actors
            .get(&request.actor, &request.operation)
            .ok_or_else(|| StepError::UnknownOperator {
                actor: request.actor.clone(),
                operation: request.operation.clone(),
            })?;

        let manager = self.self_ref.clone();
        self.services.runtime.spawn(async move {
            let started = OperationOutcome::started(&request.actor, &request.operation, request.target_entity.clone());

            let outcome = match tokio::time::timeout(request.timeout, operator.execute(&request)).await {
                Ok(Ok(output)) => {
                    let mut outcome = started.complete(output.result);
                    outcome.message = output.message;
                    outcome.response = output.response;
                    outcome.control_loop_payload = output.control_loop_payload;
                    outcome
                }
                Ok(Err(e)) => started
                    .complete(OperationResult::FailureException)
                    .with_message(e.to_string()),
                Err(_) => started
                    .complete(OperationResult::FailureTimeout)
                    .with_message("operation timed out"),
            };

            match manager.upgrade() {
                Some(manager) => manager.post(ManagerMessage::Outcome { ticket, outcome }),
                None => debug!("manager gone; outcome discarded"),
            }
        });

        Ok(())
    }
}

/// Launches a step's request on behalf of its manager
struct OperationLauncher<'a> {
    manager: &'a EventManager,
    ticket: u64,
}

impl Launcher for OperationLauncher<'_> {
    fn launch(&mut self, request: OperationRequest) -> Result<(), StepError> {
        self.manager.launch_operation(self.ticket, request)
    }
}
