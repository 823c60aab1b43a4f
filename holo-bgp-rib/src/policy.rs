//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use derive_new::new;
use holo_utils::bgp::{Comm, Origin, RouteType};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::attribute::{Attrs, Comms};

// Stage of the pipeline a policy is attached to.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyDirection {
    // Routes received from a peer, before best-path selection.
    Import,
    // Best routes, before they are replicated to the peers. Used to tag
    // routes for the export policies.
    SourceMatch,
    // Routes about to be sent to a peer.
    Export,
}

#[derive(Debug)]
#[derive(Deserialize, Serialize)]
pub enum PolicyResult<T> {
    Accept(T),
    Reject,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DefaultPolicyType {
    #[default]
    AcceptRoute,
    RejectRoute,
}

// Policies configured for all directions.
#[derive(Clone, Debug, Default)]
#[derive(Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyCfg {
    pub import: DirectionPolicyCfg,
    pub source_match: DirectionPolicyCfg,
    pub export: DirectionPolicyCfg,
    pub match_sets: MatchSets,
}

#[derive(Clone, Debug, Default)]
#[derive(Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DirectionPolicyCfg {
    pub policies: Vec<Policy>,
    pub default_policy: DefaultPolicyType,
}

// Sets of attributes used in policy match statements.
#[derive(Clone, Debug, Default)]
#[derive(Deserialize, Serialize)]
#[serde(default)]
pub struct MatchSets {
    pub prefixes: BTreeMap<String, BTreeSet<IpPrefixRange>>,
    pub neighbors: BTreeMap<String, BTreeSet<IpAddr>>,
    pub tags: BTreeMap<String, BTreeSet<u32>>,
    pub as_paths: BTreeMap<String, BTreeSet<u32>>,
    pub comms: BTreeMap<String, BTreeSet<Comm>>,
}

// Range of IP prefixes.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(new)]
#[derive(Deserialize, Serialize)]
pub struct IpPrefixRange {
    pub prefix: IpNetwork,
    pub masklen_lower: u8,
    pub masklen_upper: u8,
}

// Behavior of a match statement.
#[derive(Clone, Copy, Debug)]
#[derive(Deserialize, Serialize)]
pub enum MatchSetType {
    // Match is true if given value matches any member of the defined set.
    Any,
    // Match is true if given value matches all members of the defined set.
    All,
    // Match is true if given value does not match any member of the defined
    // set.
    Invert,
}

#[derive(Clone, Copy, Debug)]
#[derive(Deserialize, Serialize)]
pub enum MatchSetRestrictedType {
    Any,
    Invert,
}

// Policy definition.
#[derive(Clone, Debug)]
#[derive(new)]
#[derive(Deserialize, Serialize)]
pub struct Policy {
    pub name: String,
    // Statements, evaluated in order.
    pub stmts: Vec<PolicyStmt>,
}

#[derive(Clone, Debug)]
#[derive(new)]
#[derive(Deserialize, Serialize)]
pub struct PolicyStmt {
    pub name: String,
    pub conditions: Vec<PolicyCondition>,
    pub actions: Vec<PolicyAction>,
}

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyCondition {
    MatchPrefixSet {
        value: String,
        match_type: MatchSetRestrictedType,
    },
    MatchNeighbor(BTreeSet<IpAddr>),
    MatchNeighborSet(String),
    MatchTagSet {
        value: String,
        match_type: MatchSetType,
    },
    RouteType(RouteType),
    LocalPref {
        value: u32,
        op: BgpEqOperator,
    },
    Med {
        value: u32,
        op: BgpEqOperator,
    },
    Origin(Origin),
    AsPathLen {
        value: u32,
        op: BgpEqOperator,
    },
    MatchAsPathSet {
        value: String,
        match_type: MatchSetType,
    },
    MatchCommSet {
        value: String,
        match_type: MatchSetType,
    },
}

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyAction {
    Accept(bool),
    SetRouteOrigin(Origin),
    SetLocalPref(u32),
    SetNexthop(IpAddr),
    SetMed(BgpSetMed),
    SetAsPathPrepend { asn: u32, repeat: Option<u8> },
    SetComm {
        options: BgpSetCommOptions,
        method: BgpSetCommMethod,
    },
    SetTag(u32),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum BgpEqOperator {
    Equal,
    LessThanOrEqual,
    GreaterThanOrEqual,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum BgpSetMed {
    Add(u32),
    Subtract(u32),
    Set(u32),
    // Set the MED to the IGP distance of the next hop.
    Igp,
    MedPlusIgp,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum BgpSetCommOptions {
    Add,
    Remove,
    Replace,
}

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub enum BgpSetCommMethod {
    Inline(BTreeSet<Comm>),
    Reference(String),
}

// Errors found while validating a policy before installation.
#[derive(Debug)]
pub enum PolicyError {
    UnknownMatchSet(&'static str, String),
    InvalidPrefixRange(IpNetwork, u8, u8),
}

// Represents a simplified version of a route, containing only information
// relevant for the application of routing policies.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(new)]
pub struct RoutePolicyInfo {
    pub prefix: IpNetwork,
    // Address of the peer the route was learned from (import, source-match)
    // or is being sent to (export).
    pub nbr_addr: IpAddr,
    pub route_type: RouteType,
    pub attrs: Attrs,
    pub tags: BTreeSet<u32>,
    pub igp_metric: Option<u32>,
}

// ===== impl PolicyDirection =====

impl std::fmt::Display for PolicyDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyDirection::Import => write!(f, "import"),
            PolicyDirection::SourceMatch => write!(f, "source-match"),
            PolicyDirection::Export => write!(f, "export"),
        }
    }
}

// ===== impl DefaultPolicyType =====

impl DefaultPolicyType {
    pub fn is_accept(&self) -> bool {
        *self == DefaultPolicyType::AcceptRoute
    }
}

// ===== impl PolicyCfg =====

impl PolicyCfg {
    pub fn direction(&self, direction: PolicyDirection) -> &DirectionPolicyCfg {
        match direction {
            PolicyDirection::Import => &self.import,
            PolicyDirection::SourceMatch => &self.source_match,
            PolicyDirection::Export => &self.export,
        }
    }

    pub fn direction_mut(
        &mut self,
        direction: PolicyDirection,
    ) -> &mut DirectionPolicyCfg {
        match direction {
            PolicyDirection::Import => &mut self.import,
            PolicyDirection::SourceMatch => &mut self.source_match,
            PolicyDirection::Export => &mut self.export,
        }
    }
}

// ===== impl MatchSetType =====

impl MatchSetType {
    pub fn compare<T>(&self, a: &BTreeSet<T>, b: &BTreeSet<T>) -> bool
    where
        T: Eq + Ord + PartialEq + PartialOrd,
    {
        match self {
            MatchSetType::Any => !a.is_disjoint(b),
            MatchSetType::All => a.is_superset(b),
            MatchSetType::Invert => a.is_disjoint(b),
        }
    }
}

// ===== impl BgpEqOperator =====

impl BgpEqOperator {
    pub fn compare<T>(&self, a: &T, b: &T) -> bool
    where
        T: Eq + Ord + PartialEq + PartialOrd,
    {
        match self {
            BgpEqOperator::Equal => *a == *b,
            BgpEqOperator::LessThanOrEqual => *a <= *b,
            BgpEqOperator::GreaterThanOrEqual => *a >= *b,
        }
    }
}

// ===== impl IpPrefixRange =====

impl IpPrefixRange {
    fn matches(&self, prefix: &IpNetwork) -> bool {
        let plen = prefix.prefix();
        plen >= self.masklen_lower
            && plen <= self.masklen_upper
            && match (self.prefix, prefix) {
                (IpNetwork::V4(range), IpNetwork::V4(prefix)) => {
                    range.is_supernet_of(*prefix) || range == *prefix
                }
                (IpNetwork::V6(range), IpNetwork::V6(prefix)) => {
                    range.is_supernet_of(*prefix) || range == *prefix
                }
                _ => false,
            }
    }
}

// ===== impl PolicyError =====

impl std::fmt::Display for PolicyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyError::UnknownMatchSet(kind, name) => {
                write!(f, "unknown {} set: {}", kind, name)
            }
            PolicyError::InvalidPrefixRange(prefix, lower, upper) => {
                write!(
                    f,
                    "invalid prefix range: {} {}..{}",
                    prefix, lower, upper
                )
            }
        }
    }
}

impl std::error::Error for PolicyError {}

// ===== global functions =====

// Checks that every set referenced by the policy exists and that the prefix
// ranges are well formed.
pub fn validate(
    policy: &Policy,
    match_sets: &MatchSets,
) -> Result<(), PolicyError> {
    fn lookup<T>(
        sets: &BTreeMap<String, T>,
        kind: &'static str,
        name: &str,
    ) -> Result<(), PolicyError> {
        match sets.contains_key(name) {
            true => Ok(()),
            false => Err(PolicyError::UnknownMatchSet(kind, name.to_owned())),
        }
    }

    for stmt in &policy.stmts {
        for condition in &stmt.conditions {
            match condition {
                PolicyCondition::MatchPrefixSet { value, .. } => {
                    lookup(&match_sets.prefixes, "prefix", value)?;
                }
                PolicyCondition::MatchNeighborSet(value) => {
                    lookup(&match_sets.neighbors, "neighbor", value)?;
                }
                PolicyCondition::MatchTagSet { value, .. } => {
                    lookup(&match_sets.tags, "tag", value)?;
                }
                PolicyCondition::MatchAsPathSet { value, .. } => {
                    lookup(&match_sets.as_paths, "as-path", value)?;
                }
                PolicyCondition::MatchCommSet { value, .. } => {
                    lookup(&match_sets.comms, "community", value)?;
                }
                _ => (),
            }
        }
        for action in &stmt.actions {
            if let PolicyAction::SetComm {
                method: BgpSetCommMethod::Reference(value),
                ..
            } = action
            {
                lookup(&match_sets.comms, "community", value)?;
            }
        }
    }

    for range in match_sets.prefixes.values().flatten() {
        let max = match range.prefix {
            IpNetwork::V4(_) => 32,
            IpNetwork::V6(_) => 128,
        };
        if range.masklen_lower > range.masklen_upper
            || range.masklen_lower < range.prefix.prefix()
            || range.masklen_upper > max
        {
            return Err(PolicyError::InvalidPrefixRange(
                range.prefix,
                range.masklen_lower,
                range.masklen_upper,
            ));
        }
    }

    Ok(())
}

// Processes routing policies for a specific route and returns the policy
// result.
//
// Policies must have been validated before installation. A reference to a
// missing match set at this point means the policy state is corrupted, which
// is fatal.
pub fn process_policies(
    mut rpinfo: RoutePolicyInfo,
    cfg: &DirectionPolicyCfg,
    match_sets: &MatchSets,
) -> PolicyResult<RoutePolicyInfo> {
    let mut matches = false;

    for stmt in cfg.policies.iter().flat_map(|policy| policy.stmts.iter()) {
        // Check if all conditions in the policy statement are satisfied.
        if !stmt.conditions.iter().all(|condition| {
            process_stmt_condition(&rpinfo, condition, match_sets)
        }) {
            continue;
        }

        matches = true;

        // Process actions defined in the policy statement.
        let mut accept = None;
        for action in &stmt.actions {
            if let Some(result) =
                process_stmt_action(&mut rpinfo, action, match_sets)
            {
                accept = Some(result);
            }
        }
        match accept {
            Some(false) => return PolicyResult::Reject,
            Some(true) => return PolicyResult::Accept(rpinfo),
            None => {
                // Move to the next statement.
            }
        }
    }

    // Check default policy if no definition in the policy chain was
    // satisfied.
    if !matches && cfg.default_policy == DefaultPolicyType::RejectRoute {
        return PolicyResult::Reject;
    }

    PolicyResult::Accept(rpinfo)
}

// ===== helper functions =====

fn match_set<'a, T>(
    sets: &'a BTreeMap<String, T>,
    kind: &str,
    name: &str,
) -> &'a T {
    match sets.get(name) {
        Some(set) => set,
        None => panic!("policy references unknown {} set: {}", kind, name),
    }
}

// Processes a single condition statement within a routing policy.
//
// Returns a boolean value indicating whether the condition is met.
fn process_stmt_condition(
    rpinfo: &RoutePolicyInfo,
    condition: &PolicyCondition,
    match_sets: &MatchSets,
) -> bool {
    let attrs = &rpinfo.attrs;
    match condition {
        PolicyCondition::MatchPrefixSet { value, match_type } => {
            let set = match_set(&match_sets.prefixes, "prefix", value);
            let found = set.iter().any(|range| range.matches(&rpinfo.prefix));
            match match_type {
                MatchSetRestrictedType::Any => found,
                MatchSetRestrictedType::Invert => !found,
            }
        }
        PolicyCondition::MatchNeighbor(addrs) => {
            addrs.contains(&rpinfo.nbr_addr)
        }
        PolicyCondition::MatchNeighborSet(value) => {
            let set = match_set(&match_sets.neighbors, "neighbor", value);
            set.contains(&rpinfo.nbr_addr)
        }
        PolicyCondition::MatchTagSet { value, match_type } => {
            let set = match_set(&match_sets.tags, "tag", value);
            match_type.compare(set, &rpinfo.tags)
        }
        PolicyCondition::RouteType(route_type) => {
            rpinfo.route_type == *route_type
        }
        PolicyCondition::LocalPref { value, op } => {
            match attrs.base.local_pref {
                Some(local_pref) => op.compare(&local_pref, value),
                None => false,
            }
        }
        PolicyCondition::Med { value, op } => match attrs.base.med {
            Some(med) => op.compare(&med, value),
            None => false,
        },
        PolicyCondition::Origin(origin) => attrs.base.origin == *origin,
        PolicyCondition::AsPathLen { value, op } => {
            op.compare(&attrs.base.as_path.path_length(), value)
        }
        PolicyCondition::MatchAsPathSet { value, match_type } => {
            let set = match_set(&match_sets.as_paths, "as-path", value);
            let asns = attrs.base.as_path.iter().collect();
            match_type.compare(set, &asns)
        }
        PolicyCondition::MatchCommSet { value, match_type } => {
            let set = match_set(&match_sets.comms, "community", value);
            match &attrs.comm {
                Some(comm) => match_type.compare(set, &comm.0),
                None => matches!(match_type, MatchSetType::Invert),
            }
        }
    }
}

// Processes a single action statement within a routing policy.
//
// Returns the accept/reject verdict, if the action carries one.
fn process_stmt_action(
    rpinfo: &mut RoutePolicyInfo,
    action: &PolicyAction,
    match_sets: &MatchSets,
) -> Option<bool> {
    let attrs = &mut rpinfo.attrs;
    match action {
        PolicyAction::Accept(accept) => {
            return Some(*accept);
        }
        PolicyAction::SetRouteOrigin(origin) => {
            attrs.base.origin = *origin;
        }
        PolicyAction::SetLocalPref(local_pref) => {
            attrs.base.local_pref = Some(*local_pref);
        }
        PolicyAction::SetNexthop(nexthop) => {
            attrs.base.nexthop = Some(*nexthop);
        }
        PolicyAction::SetMed(set_med) => match set_med {
            BgpSetMed::Add(value) => {
                if let Some(med) = &mut attrs.base.med {
                    *med = med.saturating_add(*value);
                }
            }
            BgpSetMed::Subtract(value) => {
                if let Some(med) = &mut attrs.base.med {
                    *med = med.saturating_sub(*value);
                }
            }
            BgpSetMed::Set(value) => {
                attrs.base.med = Some(*value);
            }
            BgpSetMed::Igp => {
                attrs.base.med = rpinfo.igp_metric;
            }
            BgpSetMed::MedPlusIgp => {
                let igp = rpinfo.igp_metric.unwrap_or(0);
                attrs.base.med =
                    Some(attrs.base.med.unwrap_or(0).saturating_add(igp));
            }
        },
        PolicyAction::SetAsPathPrepend { asn, repeat } => {
            for _ in 0..repeat.unwrap_or(1) {
                attrs.base.as_path.prepend(*asn);
            }
        }
        PolicyAction::SetComm { options, method } => {
            let comms = match method {
                BgpSetCommMethod::Inline(comms) => comms,
                BgpSetCommMethod::Reference(value) => {
                    match_set(&match_sets.comms, "community", value)
                }
            };
            action_set_comm(*options, comms, &mut attrs.comm);
        }
        PolicyAction::SetTag(tag) => {
            rpinfo.tags.insert(*tag);
        }
    }

    None
}

// Modifies the list of communities based on the specified options.
fn action_set_comm(
    options: BgpSetCommOptions,
    comms: &BTreeSet<Comm>,
    comm_list: &mut Option<Comms>,
) {
    match options {
        BgpSetCommOptions::Add => {
            comm_list
                .get_or_insert_with(Default::default)
                .0
                .extend(comms.iter().copied());
        }
        BgpSetCommOptions::Remove => {
            if let Some(comm_list) = comm_list {
                comm_list.0.retain(|c| !comms.contains(c))
            }
        }
        BgpSetCommOptions::Replace => {
            *comm_list = Some(Comms(comms.clone()));
        }
    }

    // Remove the community list if it exists and is empty.
    if comm_list.as_ref().is_some_and(|list| list.0.is_empty()) {
        *comm_list = None;
    }
}

// ===== unit tests =====
