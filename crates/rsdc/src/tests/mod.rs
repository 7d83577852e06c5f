// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end scenarios: one in-process provider and consumer wired
//! through a loopback transport (the HTTP layer is the host's concern, so
//! the loopback stands in for it).

use crate::biceps::descriptor::{Descriptor, DescriptorKind, MetricCommon, OperationKind};
use crate::biceps::reports::InvocationState;
use crate::biceps::state::{
    ContextAssociation, ContextKind, ContextState, MetricValue, PatientDemographics, StateKind,
};
use crate::config::SdcConfig;
use crate::consumer::SdcConsumer;
use crate::mdib::ProviderMdib;
use crate::names::actions;
use crate::provider::SdcProvider;
use crate::soap::envelope::{build_envelope, HeaderInfo, ReceivedEnvelope};
use crate::soap::{SoapTransport, TransportError};
use crate::xml::Decimal;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const DEVICE_URL: &str = "http://device.test/sdc";
const NOTIFY_URL: &str = "http://consumer.test/notify";

/// Loopback wiring: device-bound posts hit the provider router,
/// notify-bound posts hit the consumer's notification entry point. One
/// notification can be scripted to vanish in transit (S6).
struct Loopback {
    provider: RwLock<Option<Arc<SdcProvider>>>,
    consumer: RwLock<Option<Arc<SdcConsumer>>>,
    drop_next_with_action: Mutex<Option<String>>,
}

impl Loopback {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            provider: RwLock::new(None),
            consumer: RwLock::new(None),
            drop_next_with_action: Mutex::new(None),
        })
    }

    fn drop_next(&self, action: &str) {
        *self.drop_next_with_action.lock() = Some(action.to_string());
    }

    fn ack() -> String {
        build_envelope(&HeaderInfo::for_action("urn:ack"), "")
    }
}

impl SoapTransport for Loopback {
    fn post(&self, url: &str, envelope: &str) -> Result<String, TransportError> {
        if url.starts_with(DEVICE_URL) {
            let provider = self.provider.read().clone();
            return match provider {
                Some(provider) => Ok(provider.handle_request(envelope)),
                None => Err(TransportError::Refused),
            };
        }
        if url.starts_with(NOTIFY_URL) {
            // Scripted transport loss: the provider sees a success.
            if let Ok(parsed) = ReceivedEnvelope::parse(envelope, false) {
                let mut drop_slot = self.drop_next_with_action.lock();
                if drop_slot.as_deref() == Some(parsed.action.as_str()) {
                    *drop_slot = None;
                    return Ok(Self::ack());
                }
            }
            if let Some(consumer) = self.consumer.read().clone() {
                if let Err(e) = consumer.handle_notification(envelope) {
                    log::debug!("[test-loopback] notification rejected: {}", e);
                }
            }
            return Ok(Self::ack());
        }
        Err(TransportError::Refused)
    }
}

/// Provider MDIB used by every scenario: an MDS with a numeric metric, a
/// string metric, a waveform, a patient context and a SetString operation.
fn build_mdib() -> Arc<ProviderMdib> {
    let mdib = Arc::new(ProviderMdib::new());
    let mut tx = mdib.begin_descriptor();
    tx.create(Descriptor::new("mds0", None, DescriptorKind::Mds)).expect("mds");
    tx.create(Descriptor::new("vmd0", Some("mds0"), DescriptorKind::Vmd)).expect("vmd");
    tx.create(Descriptor::new("chan0", Some("vmd0"), DescriptorKind::Channel)).expect("chan");
    tx.create(Descriptor::new(
        "hr.num",
        Some("chan0"),
        DescriptorKind::NumericMetric {
            common: MetricCommon::measurement("264864"),
            resolution: Decimal::from(1.0),
        },
    ))
    .expect("numeric metric");
    tx.create(Descriptor::new(
        "name.state",
        Some("chan0"),
        DescriptorKind::StringMetric {
            common: MetricCommon::measurement("184296"),
        },
    ))
    .expect("string metric");
    tx.create(Descriptor::new(
        "ecg",
        Some("chan0"),
        DescriptorKind::RealTimeSampleArrayMetric {
            common: MetricCommon::measurement("131328"),
            resolution: Decimal::from(0.01),
            sample_period: Duration::from_millis(4),
        },
    ))
    .expect("waveform");
    tx.create(Descriptor::new("sysctx", Some("mds0"), DescriptorKind::SystemContext))
        .expect("system context");
    tx.create(Descriptor::new("pat", Some("sysctx"), DescriptorKind::PatientContext))
        .expect("patient context");
    tx.create(Descriptor::new("sco0", Some("mds0"), DescriptorKind::Sco)).expect("sco");
    tx.create(Descriptor::new(
        "op.name",
        Some("sco0"),
        DescriptorKind::Operation {
            op: OperationKind::SetString,
            operation_target: "name.state".to_string(),
        },
    ))
    .expect("operation");
    tx.commit().expect("initial commit");
    mdib
}

struct Rig {
    loopback: Arc<Loopback>,
    provider: Arc<SdcProvider>,
    consumer: Arc<SdcConsumer>,
}

fn rig() -> Rig {
    let loopback = Loopback::new();
    let mdib = build_mdib();
    let provider = Arc::new(
        SdcProvider::builder(mdib, loopback.clone(), DEVICE_URL)
            .build()
            .expect("provider builds"),
    );
    *loopback.provider.write() = Some(Arc::clone(&provider));
    let config = SdcConfig {
        reorder_window: Duration::from_millis(50),
        ..SdcConfig::default()
    };
    let consumer = SdcConsumer::connect(loopback.clone(), DEVICE_URL, NOTIFY_URL, &config)
        .expect("consumer connects");
    *loopback.consumer.write() = Some(Arc::clone(&consumer));
    consumer
        .subscribe_reports(
            &[
                actions::EPISODIC_METRIC_REPORT,
                actions::EPISODIC_ALERT_REPORT,
                actions::EPISODIC_COMPONENT_REPORT,
                actions::EPISODIC_OPERATIONAL_STATE_REPORT,
                actions::EPISODIC_CONTEXT_REPORT,
                actions::DESCRIPTION_MODIFICATION_REPORT,
                actions::OPERATION_INVOKED_REPORT,
                actions::WAVEFORM_STREAM,
            ],
            None,
        )
        .expect("subscribes");
    Rig {
        loopback,
        provider,
        consumer,
    }
}

fn wait_for(description: &str, mut predicate: impl FnMut() -> bool) {
    for _ in 0..200 {
        if predicate() {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("timed out waiting for: {}", description);
}

fn consumer_metric(consumer: &SdcConsumer, handle: &str) -> Option<f64> {
    match &consumer.mdib().state(handle)?.kind {
        StateKind::NumericMetric { value: Some(v) } => v.value.as_ref().map(|d| d.as_f64()),
        _ => None,
    }
}

fn commit_metric(provider: &SdcProvider, value: f64) -> u64 {
    let mut tx = provider.mdib().begin_metric();
    tx.state_mut("hr.num").expect("metric exists").kind = StateKind::NumericMetric {
        value: Some(MetricValue::numeric(value, 1_700_000_000_000)),
    };
    tx.commit().expect("commit").mdib_version
}

#[test]
fn test_s2_initial_mdib_and_first_notification() {
    let r = rig();
    let initial = r.consumer.mdib();
    let initial_version = initial.mdib_version();
    assert!(initial.descriptor("hr.num").is_some(), "mirror holds the metric descriptor");
    assert_eq!(
        initial.version_group().sequence_id,
        r.provider.mdib().read().version_group().sequence_id,
        "same sequence id on both sides"
    );

    let committed = commit_metric(&r.provider, 60.0);
    assert!(committed > initial_version);
    wait_for("first notification applied", || {
        r.consumer.mdib().mdib_version() == committed
    });
    let (_, _, _, refetches) = r.consumer.processor().stats().snapshot();
    assert_eq!(refetches, 0, "clean stream needs no refetch");
}

#[test]
fn test_s3_metric_update_mirrored() {
    let r = rig();
    let committed = commit_metric(&r.provider, 72.0);
    wait_for("metric value mirrored", || {
        consumer_metric(&r.consumer, "hr.num") == Some(72.0)
    });
    assert_eq!(r.consumer.mdib().mdib_version(), committed);
    // State versions mirror the provider exactly.
    let provider_state = r.provider.mdib().read().state("hr.num").cloned().expect("state");
    let consumer_state = r.consumer.mdib().state("hr.num").cloned().expect("state");
    assert_eq!(provider_state, consumer_state);
}

#[test]
fn test_s4_context_association() {
    let r = rig();
    let mut tx = r.provider.mdib().begin_context();
    let mut cs = ContextState::new(
        "pat.1",
        "pat",
        ContextKind::Patient(PatientDemographics {
            given_name: Some("Anna".to_string()),
            family_name: Some("Larsen".to_string()),
            sex: None,
        }),
    );
    cs.association = ContextAssociation::Assoc;
    tx.create_context_state(cs).expect("create");
    tx.commit().expect("commit");

    wait_for("context mirrored", || {
        r.consumer.mdib().context_state("pat.1").is_some()
    });
    let mirror = r.consumer.mdib();
    let associated: Vec<_> = mirror
        .context_states_of("pat")
        .into_iter()
        .filter(|c| c.association == ContextAssociation::Assoc)
        .collect();
    assert_eq!(associated.len(), 1, "exactly one associated patient context");
    assert_eq!(associated[0].handle, "pat.1");
    assert!(associated[0].binding_mdib_version.is_some());
}

#[test]
fn test_s5_operation_roundtrip() {
    let r = rig();
    let info = r.consumer.set_string("op.name", "Dräger").expect("invocation accepted");
    assert_eq!(info.state, InvocationState::Wait);
    let final_part = r
        .consumer
        .wait_final(info.transaction_id, Duration::from_secs(2))
        .expect("final report arrives");
    assert_eq!(final_part.info.state, InvocationState::Fin);
    assert_eq!(final_part.info.transaction_id, info.transaction_id);
    assert_eq!(final_part.operation_target.as_deref(), Some("name.state"));

    wait_for("string value mirrored", || {
        matches!(
            r.consumer.mdib().state("name.state").map(|s| &s.kind),
            Some(StateKind::StringMetric { value: Some(v) })
                if v.string_value.as_deref() == Some("Dräger")
        )
    });
}

#[test]
fn test_s6_gap_recovery() {
    let r = rig();
    let v1 = commit_metric(&r.provider, 61.0);
    wait_for("first metric mirrored", || {
        r.consumer.mdib().mdib_version() == v1
    });

    // The next metric report vanishes in transit; the provider believes it
    // was delivered.
    r.loopback.drop_next(actions::EPISODIC_METRIC_REPORT);
    let _v2 = commit_metric(&r.provider, 62.0);
    let v3 = commit_metric(&r.provider, 63.0);

    // v3 arrives out of order, waits in the reorder buffer, the window
    // expires, and exactly one refetch resynchronizes the mirror.
    wait_for("mirror resynchronized at v3", || {
        thread::sleep(Duration::from_millis(20));
        r.consumer.processor().tick();
        r.consumer.mdib().mdib_version() >= v3
    });
    assert_eq!(consumer_metric(&r.consumer, "hr.num"), Some(63.0));
    let (_, _, _, refetches) = r.consumer.processor().stats().snapshot();
    assert_eq!(refetches, 1, "exactly one GetMdib refetch");
}

#[test]
fn test_replayed_notification_is_noop() {
    let r = rig();
    let v1 = commit_metric(&r.provider, 70.0);
    wait_for("mirrored", || r.consumer.mdib().mdib_version() == v1);
    // Commit another value, then replay: version check discards it.
    let v2 = commit_metric(&r.provider, 71.0);
    wait_for("mirrored", || r.consumer.mdib().mdib_version() == v2);
    let (applied_before, _, _, _) = r.consumer.processor().stats().snapshot();
    // A duplicate of v2 arrives (hand-delivered).
    let snapshot = r.provider.mdib().read();
    let state = snapshot.state("hr.num").cloned().expect("state");
    let body = crate::biceps::reports::encode_report(
        actions::EPISODIC_METRIC_REPORT,
        &crate::biceps::reports::ReportBody::Metrics(vec![state]),
        snapshot.version_group(),
    );
    let header = HeaderInfo {
        action: actions::EPISODIC_METRIC_REPORT.to_string(),
        version_group: Some(snapshot.version_group().clone()),
        ..HeaderInfo::default()
    };
    r.consumer
        .handle_notification(&build_envelope(&header, &body))
        .expect("accepted");
    let (applied_after, stale, _, _) = r.consumer.processor().stats().snapshot();
    assert_eq!(applied_after, applied_before, "replay applies nothing");
    assert!(stale >= 1);
    assert_eq!(consumer_metric(&r.consumer, "hr.num"), Some(71.0));
}

#[test]
fn test_waveform_stream_mirrored() {
    let r = rig();
    let mut tx = r.provider.mdib().begin_waveform();
    tx.set_samples(
        "ecg",
        crate::biceps::state::SampleArrayValue {
            samples: vec![Decimal::from(0.25), Decimal::from(0.5)],
            determination_time: Some(1),
            validity: crate::biceps::Validity::Valid,
        },
    );
    let committed = tx.commit().expect("commit");
    wait_for("waveform mirrored", || {
        r.consumer.mdib().mdib_version() == committed.mdib_version
    });
    match &r.consumer.mdib().state("ecg").expect("state").kind {
        StateKind::RealTimeSampleArrayMetric { samples: Some(v) } => {
            assert_eq!(v.samples.len(), 2);
            assert_eq!(v.samples[0].as_f64(), 0.25);
        }
        other => panic!("unexpected kind: {:?}", other),
    }
}

#[test]
fn test_description_modification_mirrored() {
    let r = rig();
    let mut tx = r.provider.mdib().begin_descriptor();
    tx.create(Descriptor::new(
        "spo2.num",
        Some("chan0"),
        DescriptorKind::NumericMetric {
            common: MetricCommon::measurement("150456"),
            resolution: Decimal::from(1.0),
        },
    ))
    .expect("create");
    tx.commit().expect("commit");
    wait_for("new descriptor mirrored", || {
        r.consumer.mdib().descriptor("spo2.num").is_some()
    });
    // Child ordering survives replication.
    let children = r.consumer.mdib();
    assert_eq!(
        children.children("chan0").last().map(String::as_str),
        Some("spo2.num")
    );

    let mut tx = r.provider.mdib().begin_descriptor();
    tx.delete("spo2.num").expect("delete");
    tx.commit().expect("commit");
    wait_for("deleted descriptor gone from mirror", || {
        r.consumer.mdib().descriptor("spo2.num").is_none()
    });
}

#[test]
fn test_provider_shutdown_ends_subscriptions() {
    let r = rig();
    let ended = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let ended_clone = Arc::clone(&ended);
    r.consumer.on_subscription_end(move |status| {
        assert!(status.ends_with("SourceShuttingDown"), "status: {}", status);
        ended_clone.store(true, std::sync::atomic::Ordering::Relaxed);
    });
    r.provider.shutdown();
    wait_for("subscription end received", || {
        ended.load(std::sync::atomic::Ordering::Relaxed)
    });
    assert_eq!(r.provider.subscriptions().active_count(), 0);
}
