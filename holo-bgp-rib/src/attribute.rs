//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::net::{IpAddr, Ipv4Addr};
use std::rc::Rc;

use bitflags::bitflags;
use bytes::Bytes;
use derive_new::new;
use holo_utils::bgp::{Comm, Origin};
use serde::{Deserialize, Serialize};

// Maximum number of members in a single AS_PATH segment.
const AS_PATH_SEGMENT_MAX_LEN: usize = 255;

#[derive(Clone, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
#[serde(default)]
pub struct Attrs {
    pub base: BaseAttrs,
    pub comm: Option<Comms>,
    pub unknown: Vec<UnknownAttr>,
}

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
#[serde(default)]
pub struct BaseAttrs {
    pub origin: Origin,
    pub as_path: AsPath,
    pub nexthop: Option<IpAddr>,
    pub med: Option<u32>,
    pub local_pref: Option<u32>,
    pub aggregator: Option<Aggregator>,
    pub atomic_aggregate: bool,
    pub originator_id: Option<Ipv4Addr>,
    pub cluster_list: Option<ClusterList>,
}

#[derive(Clone, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct AsPath {
    pub segments: VecDeque<AsPathSegment>,
}

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct AsPathSegment {
    pub seg_type: AsPathSegmentType,
    pub members: VecDeque<u32>,
}

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum AsPathSegmentType {
    Set = 1,
    Sequence = 2,
    ConfedSequence = 3,
    ConfedSet = 4,
}

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(new)]
#[derive(Deserialize, Serialize)]
pub struct Aggregator {
    pub asn: u32,
    pub identifier: Ipv4Addr,
}

// Ordered list of cluster IDs, most recent first.
#[derive(Clone, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct ClusterList(pub Vec<Ipv4Addr>);

#[derive(Clone, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Comms(pub BTreeSet<Comm>);

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(new)]
#[derive(Deserialize, Serialize)]
pub struct UnknownAttr {
    pub attr_type: u8,
    pub flags: AttrFlags,
    pub value: Bytes,
}

// BGP Path Attribute Flags.
bitflags! {
    #[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct AttrFlags: u8 {
        const OPTIONAL = 0x80;
        const TRANSITIVE = 0x40;
        const PARTIAL = 0x20;
        const EXTENDED = 0x10;
    }
}

// Deduplicated path attribute sets.
//
// Routes sharing identical attributes point to the same set.
#[derive(Debug, Eq, PartialEq)]
pub struct AttrSets<T> {
    pub tree: BTreeMap<T, Rc<AttrSet<T>>>,
    next_index: u64,
}

#[derive(Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct AttrSet<T> {
    pub index: u64,
    pub value: T,
}

pub type RouteAttrs = Rc<AttrSet<Attrs>>;

// ===== impl Attrs =====

impl Attrs {
    pub fn has_community(&self, comm: Comm) -> bool {
        self.comm
            .as_ref()
            .is_some_and(|comms| comms.0.contains(&comm))
    }
}

// ===== impl BaseAttrs =====

impl Default for BaseAttrs {
    fn default() -> BaseAttrs {
        BaseAttrs {
            origin: Origin::Igp,
            as_path: Default::default(),
            nexthop: None,
            med: None,
            local_pref: None,
            aggregator: None,
            atomic_aggregate: false,
            originator_id: None,
            cluster_list: None,
        }
    }
}

// ===== impl AsPath =====

impl AsPath {
    pub fn from_sequence(members: impl IntoIterator<Item = u32>) -> AsPath {
        let members: VecDeque<_> = members.into_iter().collect();
        if members.is_empty() {
            return AsPath::default();
        }
        AsPath {
            segments: [AsPathSegment {
                seg_type: AsPathSegmentType::Sequence,
                members,
            }]
            .into(),
        }
    }

    pub fn path_length(&self) -> u32 {
        self.segments
            .iter()
            .map(|segment| match segment.seg_type {
                AsPathSegmentType::Set => 1,
                AsPathSegmentType::Sequence => segment.members.len(),
                // RFC 5065 - Section 5.3:
                // "When comparing routes using AS_PATH length, CONFED_SEQUENCE
                // and CONFED_SETs SHOULD NOT be counted".
                AsPathSegmentType::ConfedSequence
                | AsPathSegmentType::ConfedSet => 0,
            })
            .sum::<usize>() as u32
    }

    // Neighboring AS, used to decide MED comparability.
    pub fn first(&self) -> Option<u32> {
        self.segments
            .iter()
            .find(|segment| {
                !matches!(
                    segment.seg_type,
                    AsPathSegmentType::ConfedSequence
                        | AsPathSegmentType::ConfedSet
                )
            })
            .filter(|segment| segment.seg_type == AsPathSegmentType::Sequence)
            .and_then(|segment| segment.members.front().copied())
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.segments
            .iter()
            .flat_map(|segment| segment.members.iter().copied())
    }

    pub fn prepend(&mut self, asn: u32) {
        self.prepend_segment(AsPathSegmentType::Sequence, asn);
    }

    pub fn prepend_confed(&mut self, asn: u32) {
        self.prepend_segment(AsPathSegmentType::ConfedSequence, asn);
    }

    // Remove confederation segments before leaving the confederation.
    pub fn strip_confed(&mut self) {
        self.segments.retain(|segment| {
            !matches!(
                segment.seg_type,
                AsPathSegmentType::ConfedSequence
                    | AsPathSegmentType::ConfedSet
            )
        });
    }

    pub fn contains(&self, asn: u32) -> bool {
        self.segments.iter().any(|segment| segment.contains(asn))
    }

    fn prepend_segment(&mut self, seg_type: AsPathSegmentType, asn: u32) {
        if let Some(segment) = self.segments.front_mut()
            && segment.seg_type == seg_type
            && segment.members.len() < AS_PATH_SEGMENT_MAX_LEN
        {
            segment.members.push_front(asn);
        } else {
            self.segments.push_front(AsPathSegment {
                seg_type,
                members: [asn].into(),
            });
        }
    }
}

impl std::fmt::Display for AsPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for segment in &self.segments {
            if !first {
                write!(f, " ")?;
            }
            first = false;
            let members = segment
                .members
                .iter()
                .map(|asn| asn.to_string())
                .collect::<Vec<_>>()
                .join(" ");
            match segment.seg_type {
                AsPathSegmentType::Sequence => write!(f, "{}", members)?,
                AsPathSegmentType::Set => write!(f, "{{{}}}", members)?,
                AsPathSegmentType::ConfedSequence => {
                    write!(f, "({})", members)?
                }
                AsPathSegmentType::ConfedSet => write!(f, "[{}]", members)?,
            }
        }
        Ok(())
    }
}

impl AsPathSegment {
    fn contains(&self, asn: u32) -> bool {
        self.members.iter().any(|member| asn == *member)
    }
}

// ===== impl ClusterList =====

impl ClusterList {
    pub fn prepend(&mut self, cluster_id: Ipv4Addr) {
        self.0.insert(0, cluster_id);
    }

    pub fn contains(&self, cluster_id: Ipv4Addr) -> bool {
        self.0.contains(&cluster_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ===== impl UnknownAttr =====

impl UnknownAttr {
    pub fn is_transitive(&self) -> bool {
        self.flags.contains(AttrFlags::TRANSITIVE)
    }

    pub fn is_optional(&self) -> bool {
        self.flags.contains(AttrFlags::OPTIONAL)
    }
}

// ===== impl AttrSets =====

impl<T> AttrSets<T>
where
    T: Clone + Eq + Ord + PartialEq + PartialOrd,
{
    pub fn get(&mut self, attr: &T) -> Rc<AttrSet<T>> {
        if let Some(attr_set) = self.tree.get(attr) {
            Rc::clone(attr_set)
        } else {
            self.next_index += 1;
            let attr_set = Rc::new(AttrSet {
                index: self.next_index,
                value: attr.clone(),
            });
            self.tree.insert(attr.clone(), Rc::clone(&attr_set));
            attr_set
        }
    }

    // Release attribute sets no longer referenced by any route.
    pub fn prune(&mut self) -> usize {
        let before = self.tree.len();
        self.tree.retain(|_, attr_set| Rc::strong_count(attr_set) > 1);
        before - self.tree.len()
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

impl<T> Default for AttrSets<T> {
    fn default() -> AttrSets<T> {
        AttrSets {
            tree: Default::default(),
            next_index: 0,
        }
    }
}

impl<T> AttrSet<T> {
    // Attribute set not registered in any `AttrSets` tree.
    pub fn detached(value: T) -> Rc<AttrSet<T>> {
        Rc::new(AttrSet { index: 0, value })
    }
}

// ===== unit tests =====
