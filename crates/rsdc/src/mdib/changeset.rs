// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Typed change-sets emitted by committed transactions.
//!
//! One commit yields exactly one change-set; the subscription manager maps
//! it to a report action and fans it out. Emission order equals commit order
//! equals `mdib_version` order.

use crate::biceps::reports::{DescriptionPart, ReportBody};
use crate::biceps::{ContextState, MdibVersionGroup, State};
use crate::names::actions;

/// Buckets per transaction kind, each tagged with the resulting version.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeSet {
    Metrics {
        version_group: MdibVersionGroup,
        states: Vec<State>,
    },
    Alerts {
        version_group: MdibVersionGroup,
        states: Vec<State>,
    },
    Components {
        version_group: MdibVersionGroup,
        states: Vec<State>,
    },
    Operational {
        version_group: MdibVersionGroup,
        states: Vec<State>,
    },
    Contexts {
        version_group: MdibVersionGroup,
        states: Vec<ContextState>,
    },
    Waveforms {
        version_group: MdibVersionGroup,
        states: Vec<State>,
    },
    Description {
        version_group: MdibVersionGroup,
        parts: Vec<DescriptionPart>,
    },
}

impl ChangeSet {
    /// Version the provider committed for this change.
    pub fn version_group(&self) -> &MdibVersionGroup {
        match self {
            ChangeSet::Metrics { version_group, .. }
            | ChangeSet::Alerts { version_group, .. }
            | ChangeSet::Components { version_group, .. }
            | ChangeSet::Operational { version_group, .. }
            | ChangeSet::Contexts { version_group, .. }
            | ChangeSet::Waveforms { version_group, .. }
            | ChangeSet::Description { version_group, .. } => version_group,
        }
    }

    /// Report action this change-set is delivered under.
    pub fn action(&self) -> &'static str {
        match self {
            ChangeSet::Metrics { .. } => actions::EPISODIC_METRIC_REPORT,
            ChangeSet::Alerts { .. } => actions::EPISODIC_ALERT_REPORT,
            ChangeSet::Components { .. } => actions::EPISODIC_COMPONENT_REPORT,
            ChangeSet::Operational { .. } => actions::EPISODIC_OPERATIONAL_STATE_REPORT,
            ChangeSet::Contexts { .. } => actions::EPISODIC_CONTEXT_REPORT,
            ChangeSet::Waveforms { .. } => actions::WAVEFORM_STREAM,
            ChangeSet::Description { .. } => actions::DESCRIPTION_MODIFICATION_REPORT,
        }
    }

    /// Waveform change-sets are lossy-ordered in the fan-out.
    pub fn is_waveform(&self) -> bool {
        matches!(self, ChangeSet::Waveforms { .. })
    }

    /// True when nothing was actually touched (committing such a
    /// transaction is rejected before a change-set is ever built, so this
    /// mostly guards tests).
    pub fn is_empty(&self) -> bool {
        match self {
            ChangeSet::Metrics { states, .. }
            | ChangeSet::Alerts { states, .. }
            | ChangeSet::Components { states, .. }
            | ChangeSet::Operational { states, .. }
            | ChangeSet::Waveforms { states, .. } => states.is_empty(),
            ChangeSet::Contexts { states, .. } => states.is_empty(),
            ChangeSet::Description { parts, .. } => parts.is_empty(),
        }
    }

    /// Convert to the wire report body.
    pub fn to_report_body(&self) -> ReportBody {
        match self {
            ChangeSet::Metrics { states, .. } => ReportBody::Metrics(states.clone()),
            ChangeSet::Alerts { states, .. } => ReportBody::Alerts(states.clone()),
            ChangeSet::Components { states, .. } => ReportBody::Components(states.clone()),
            ChangeSet::Operational { states, .. } => ReportBody::Operational(states.clone()),
            ChangeSet::Contexts { states, .. } => ReportBody::Contexts(states.clone()),
            ChangeSet::Waveforms { states, .. } => ReportBody::Waveform(states.clone()),
            ChangeSet::Description { parts, .. } => ReportBody::Description(parts.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_mapping() {
        let vg = MdibVersionGroup::new_random();
        let cs = ChangeSet::Metrics {
            version_group: vg.clone(),
            states: Vec::new(),
        };
        assert_eq!(cs.action(), actions::EPISODIC_METRIC_REPORT);
        assert!(!cs.is_waveform());

        let wf = ChangeSet::Waveforms {
            version_group: vg,
            states: Vec::new(),
        };
        assert_eq!(wf.action(), actions::WAVEFORM_STREAM);
        assert!(wf.is_waveform());
    }
}
