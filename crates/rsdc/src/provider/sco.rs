// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SCO runtime: service controller operations.
//!
//! Every set-service request is answered immediately with
//! `InvocationState::Wait` and a provider-unique `TransactionId`; the actual
//! work runs on the SCO worker thread, which emits
//! `OperationInvokedReport`s (`Start`, then `Fin`/`Fail`) through the
//! subscription manager. The fast-path configuration executes inline and
//! answers `Fin` directly, skipping the intermediate states (the final
//! report is still emitted for subscribers).
//!
//! Role glue: built-in handlers bridge the standard operations onto MDIB
//! transactions; hosts override per operation handle where device-specific
//! behavior is needed.

use crate::biceps::descriptor::{Descriptor, DescriptorKind, OperationKind};
use crate::biceps::reports::{
    encode_report, InvocationInfo, InvocationReportPart, InvocationState, ReportBody, SetRequest,
    SetResponse,
};
use crate::biceps::state::{ContextAssociation, MetricValue, StateKind};
use crate::biceps::Handle;
use crate::mdib::ProviderMdib;
use crate::names::actions;
use crate::subscription::SubscriptionManager;
use crate::xml::value::now_timestamp;
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Domain failure of an operation (`InvocationState::Fail` payload).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationError {
    /// `Unspec`, `Unkn`, `Inv`, `Oth`.
    pub code: String,
    pub message: Option<String>,
}

impl InvocationError {
    pub fn invalid(message: &str) -> Self {
        Self {
            code: "Inv".to_string(),
            message: Some(message.to_string()),
        }
    }

    pub fn other(message: &str) -> Self {
        Self {
            code: "Oth".to_string(),
            message: Some(message.to_string()),
        }
    }
}

/// Outcome of a handler: the state/descriptor handles actually affected.
pub type OperationResult = std::result::Result<Vec<Handle>, InvocationError>;

/// Device-specific operation behavior. The default handlers cover the
/// standard state-writing operations; register one of these per operation
/// handle to override.
pub trait OperationHandler: Send + Sync {
    fn invoke(&self, mdib: &ProviderMdib, operation: &Descriptor, request: &SetRequest)
        -> OperationResult;
}

struct QueuedInvocation {
    transaction_id: u64,
    request: SetRequest,
}

/// Operation invocation runtime.
pub struct ScoRuntime {
    mdib: Arc<ProviderMdib>,
    subscriptions: Arc<SubscriptionManager>,
    handlers: RwLock<HashMap<Handle, Arc<dyn OperationHandler>>>,
    /// Provider-unique transaction id source (starts at 1).
    next_transaction: AtomicU64,
    fast_path: bool,
    queue_tx: Sender<QueuedInvocation>,
    stop: Arc<AtomicBool>,
    worker: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl ScoRuntime {
    pub fn new(
        mdib: Arc<ProviderMdib>,
        subscriptions: Arc<SubscriptionManager>,
        fast_path: bool,
    ) -> Arc<Self> {
        let (queue_tx, queue_rx) = unbounded();
        let stop = Arc::new(AtomicBool::new(false));
        let sco = Arc::new(Self {
            mdib,
            subscriptions,
            handlers: RwLock::new(HashMap::new()),
            next_transaction: AtomicU64::new(1),
            fast_path,
            queue_tx,
            stop: Arc::clone(&stop),
            worker: parking_lot::Mutex::new(None),
        });
        let worker_sco = Arc::downgrade(&sco);
        let worker = thread::Builder::new()
            .name("rsdc-sco".to_string())
            .spawn(move || worker_loop(&worker_sco, &queue_rx))
            .ok();
        *sco.worker.lock() = worker;
        sco
    }

    /// Override the behavior of one operation handle.
    pub fn register_handler(&self, operation_handle: &str, handler: Arc<dyn OperationHandler>) {
        self.handlers
            .write()
            .insert(operation_handle.to_string(), handler);
    }

    /// Stop the worker (provider teardown).
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }

    /// Dispatch entry point: immediate response for one set-service
    /// request.
    pub fn handle_set_request(&self, request: SetRequest) -> SetResponse {
        let transaction_id = self.next_transaction.fetch_add(1, Ordering::Relaxed);
        let snapshot = self.mdib.read();

        // Pre-flight: the operation descriptor must exist and be enabled.
        let precheck = match snapshot.descriptor(request.operation_handle()) {
            None => Some(InvocationError::invalid("unknown operation handle")),
            Some(descriptor) => match &descriptor.kind {
                DescriptorKind::Operation { .. } => {
                    match snapshot.state(request.operation_handle()) {
                        Some(state) => match &state.kind {
                            StateKind::Operation { operating_mode } if operating_mode == "En" => {
                                None
                            }
                            StateKind::Operation { .. } => {
                                Some(InvocationError::other("operation not enabled"))
                            }
                            _ => Some(InvocationError::other("operation state malformed")),
                        },
                        None => Some(InvocationError::other("operation state missing")),
                    }
                }
                _ => Some(InvocationError::invalid("handle is not an operation")),
            },
        };
        if let Some(error) = precheck {
            let info = InvocationInfo::failed(transaction_id, &error.code, error.message.as_deref());
            self.emit_report(&request, &info, None);
            return SetResponse {
                version_group: snapshot.version_group().clone(),
                info,
            };
        }

        if self.fast_path {
            // Execute inline, answer the final state directly.
            let info = self.execute(transaction_id, &request);
            return SetResponse {
                version_group: self.mdib.read().version_group().clone(),
                info,
            };
        }

        let _ = self.queue_tx.send(QueuedInvocation {
            transaction_id,
            request,
        });
        SetResponse {
            version_group: snapshot.version_group().clone(),
            info: InvocationInfo::ok(transaction_id, InvocationState::Wait),
        }
    }

    /// Run one invocation to completion; emits the final report and
    /// returns the final info.
    fn execute(&self, transaction_id: u64, request: &SetRequest) -> InvocationInfo {
        let snapshot = self.mdib.read();
        let Some(operation) = snapshot.descriptor(request.operation_handle()).cloned() else {
            let info = InvocationInfo::failed(transaction_id, "Inv", Some("unknown operation handle"));
            self.emit_report(request, &info, None);
            return info;
        };
        drop(snapshot);

        let custom = self.handlers.read().get(request.operation_handle()).cloned();
        let result = match custom {
            Some(handler) => handler.invoke(&self.mdib, &operation, request),
            None => default_invoke(&self.mdib, &operation, request),
        };
        let (info, target) = match result {
            Ok(targets) => {
                let info = InvocationInfo::ok(transaction_id, InvocationState::Fin);
                (info, targets.into_iter().next())
            }
            Err(error) => {
                log::info!(
                    "[sco] operation {} failed: {} ({:?})",
                    request.operation_handle(),
                    error.code,
                    error.message
                );
                (
                    InvocationInfo::failed(transaction_id, &error.code, error.message.as_deref()),
                    None,
                )
            }
        };
        self.emit_report(request, &info, target);
        info
    }

    /// Emit one `OperationInvokedReport`.
    fn emit_report(&self, request: &SetRequest, info: &InvocationInfo, target: Option<Handle>) {
        let version_group = self.mdib.read().version_group().clone();
        let body = ReportBody::OperationInvoked(vec![InvocationReportPart {
            operation_handle: request.operation_handle().to_string(),
            operation_target: target,
            info: info.clone(),
        }]);
        let encoded = encode_report(actions::OPERATION_INVOKED_REPORT, &body, &version_group);
        self.subscriptions.notify_raw(
            actions::OPERATION_INVOKED_REPORT,
            &encoded,
            &version_group,
            false,
        );
    }
}

impl Drop for ScoRuntime {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

fn worker_loop(sco: &std::sync::Weak<ScoRuntime>, queue: &Receiver<QueuedInvocation>) {
    loop {
        let Some(sco) = sco.upgrade() else {
            break;
        };
        if sco.stop.load(Ordering::Relaxed) {
            break;
        }
        let Ok(invocation) = queue.recv_timeout(Duration::from_millis(100)) else {
            continue;
        };
        // Intermediate state for subscribers, then the real work.
        sco.emit_report(
            &invocation.request,
            &InvocationInfo::ok(invocation.transaction_id, InvocationState::Start),
            None,
        );
        sco.execute(invocation.transaction_id, &invocation.request);
    }
}

// ========================================================================
// Default role handlers
// ========================================================================

/// Built-in bridge from the standard operations onto MDIB transactions.
fn default_invoke(
    mdib: &ProviderMdib,
    operation: &Descriptor,
    request: &SetRequest,
) -> OperationResult {
    let DescriptorKind::Operation {
        op,
        operation_target,
    } = &operation.kind
    else {
        return Err(InvocationError::invalid("handle is not an operation"));
    };
    match (op, request) {
        (OperationKind::SetValue, SetRequest::SetValue { value, .. }) => {
            let mut tx = mdib.begin_metric();
            let state = tx
                .state_mut(operation_target)
                .map_err(|e| InvocationError::invalid(&e.to_string()))?;
            match &mut state.kind {
                StateKind::NumericMetric { value: slot } => {
                    let mut new_value = MetricValue::numeric(value.as_f64(), now_timestamp());
                    new_value.value = Some(value.clone());
                    *slot = Some(new_value);
                }
                _ => return Err(InvocationError::invalid("target is not a numeric metric")),
            }
            tx.commit().map_err(|e| InvocationError::other(&e.to_string()))?;
            Ok(vec![operation_target.clone()])
        }
        (OperationKind::SetString, SetRequest::SetString { value, .. }) => {
            // Enum metrics only accept listed values.
            let snapshot = mdib.read();
            if let Some(target_desc) = snapshot.descriptor(operation_target) {
                if let DescriptorKind::EnumStringMetric { allowed_values, .. } = &target_desc.kind {
                    if !allowed_values.iter().any(|v| v == value) {
                        return Err(InvocationError::invalid("value not in allowed set"));
                    }
                }
            }
            drop(snapshot);
            let mut tx = mdib.begin_metric();
            let state = tx
                .state_mut(operation_target)
                .map_err(|e| InvocationError::invalid(&e.to_string()))?;
            match &mut state.kind {
                StateKind::StringMetric { value: slot }
                | StateKind::EnumStringMetric { value: slot } => {
                    *slot = Some(MetricValue::string(value, now_timestamp()));
                }
                _ => return Err(InvocationError::invalid("target is not a string metric")),
            }
            tx.commit().map_err(|e| InvocationError::other(&e.to_string()))?;
            Ok(vec![operation_target.clone()])
        }
        (OperationKind::Activate, SetRequest::Activate { .. }) => {
            // Nothing to write; device-specific effects need a custom
            // handler.
            Ok(vec![operation_target.clone()])
        }
        (OperationKind::SetMetricState, SetRequest::SetMetricState { states, .. }) => {
            apply_proposed_states(mdib.begin_metric(), states)
        }
        (OperationKind::SetComponentState, SetRequest::SetComponentState { states, .. }) => {
            apply_proposed_states(mdib.begin_component(), states)
        }
        (OperationKind::SetAlertState, SetRequest::SetAlertState { states, .. }) => {
            apply_proposed_states(mdib.begin_alert(), states)
        }
        (OperationKind::SetContextState, SetRequest::SetContextState { states, .. }) => {
            if states.is_empty() {
                return Err(InvocationError::invalid("no proposed context state"));
            }
            let mut tx = mdib.begin_context();
            let mut targets = Vec::new();
            for proposed in states {
                // Unknown descriptor handle: the invocation fails with
                // `Inv`, it is not a SOAP fault.
                let exists = mdib.read().context_state(&proposed.handle).is_some();
                if exists {
                    let staged = tx
                        .context_state_mut(&proposed.handle)
                        .map_err(|e| InvocationError::invalid(&e.to_string()))?;
                    staged.association = proposed.association;
                    staged.identifications = proposed.identifications.clone();
                    staged.kind = proposed.kind.clone();
                } else {
                    let mut fresh = proposed.clone();
                    if fresh.association == ContextAssociation::No {
                        fresh.association = ContextAssociation::Assoc;
                    }
                    tx.create_context_state(fresh)
                        .map_err(|e| InvocationError::invalid(&e.to_string()))?;
                }
                targets.push(proposed.handle.clone());
            }
            tx.commit().map_err(|e| InvocationError::other(&e.to_string()))?;
            Ok(targets)
        }
        _ => Err(InvocationError::invalid("request does not match operation kind")),
    }
}

fn apply_proposed_states(
    mut tx: crate::mdib::StateTransaction<'_>,
    states: &[crate::biceps::State],
) -> OperationResult {
    if states.is_empty() {
        return Err(InvocationError::invalid("no proposed state"));
    }
    let mut targets = Vec::new();
    for proposed in states {
        let staged = tx
            .state_mut(&proposed.descriptor_handle)
            .map_err(|e| InvocationError::invalid(&e.to_string()))?;
        staged.kind = proposed.kind.clone();
        targets.push(proposed.descriptor_handle.clone());
    }
    tx.commit().map_err(|e| InvocationError::other(&e.to_string()))?;
    Ok(targets)
}
