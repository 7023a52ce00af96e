//! Shared types and identifiers for Plume.
//!
//! This crate defines all core types used across the Plume workspace:
//! identifiers ([`NodeUid`], [`ItemKey`]), the published-item payload type
//! ([`PublishedItem`]), node metadata ([`NodeRecord`], [`NodeKind`]),
//! standing relations ([`Affiliate`], [`Subscription`]), and the per-service
//! default node configuration ([`DefaultNodeConfiguration`]).

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Unique identifier for a pubsub node: the owning service plus the node id.
///
/// Node ids are only unique within a service, so every structure that spans
/// services keys on the pair.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeUid {
    /// Identifier of the pubsub service that owns the node.
    pub service_id: String,
    /// Identifier of the node within the service.
    pub node_id: String,
}

impl NodeUid {
    /// Create a node identifier from its service and node parts.
    pub fn new(service_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            node_id: node_id.into(),
        }
    }

    /// Build the key of a published item on this node.
    pub fn item_key(&self, item_id: impl Into<String>) -> ItemKey {
        ItemKey {
            node: self.clone(),
            item_id: item_id.into(),
        }
    }
}

impl fmt::Display for NodeUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service_id, self.node_id)
    }
}

impl fmt::Debug for NodeUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeUid({self})")
    }
}

/// Globally unique key of a published item: node identifier plus item id.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKey {
    /// The node the item was published to.
    pub node: NodeUid,
    /// The item id assigned at publish time.
    pub item_id: String,
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.node, self.item_id)
    }
}

impl fmt::Debug for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemKey({self})")
    }
}

// ---------------------------------------------------------------------------
// Published items
// ---------------------------------------------------------------------------

/// An immutable payload published to a leaf node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedItem {
    /// The node the item was published to.
    pub node: NodeUid,
    /// Item id, unique within the node.
    pub item_id: String,
    /// Address of the publisher.
    pub publisher: String,
    /// Publish timestamp, unix milliseconds.
    pub created_at: u64,
    /// Serialized payload; absent for notification-only items.
    pub payload: Option<Bytes>,
}

impl PublishedItem {
    /// The globally unique key of this item.
    pub fn key(&self) -> ItemKey {
        self.node.item_key(self.item_id.clone())
    }
}

// ---------------------------------------------------------------------------
// Node metadata
// ---------------------------------------------------------------------------

/// Leaf-specific or collection-specific node settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    /// A leaf node holds publishable items.
    Leaf {
        /// Whether published items are persisted at all.
        persist_items: bool,
        /// Retention bound on persisted items; negative means unbounded.
        max_items: i32,
        /// Maximum accepted payload size in bytes.
        max_payload_size: u32,
    },
    /// A collection node contains child nodes and no items.
    Collection,
}

impl NodeKind {
    /// Whether this is a leaf node.
    pub fn is_leaf(&self) -> bool {
        matches!(self, NodeKind::Leaf { .. })
    }

    /// The retention bound for a leaf node, if it has one.
    ///
    /// `None` for collection nodes, non-persistent leaves, and unbounded
    /// (negative) configurations.
    pub fn retention_bound(&self) -> Option<u32> {
        match self {
            NodeKind::Leaf {
                persist_items: true,
                max_items,
                ..
            } if *max_items > 0 => Some(*max_items as u32),
            _ => None,
        }
    }
}

/// Persistent metadata of a pubsub node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Unique identifier of the node.
    pub uid: NodeUid,
    /// Leaf or collection settings.
    pub kind: NodeKind,
    /// Parent collection node id, if the node sits in a hierarchy.
    pub parent: Option<String>,
    /// Creation timestamp, unix milliseconds.
    pub created_at: u64,
    /// Last modification timestamp, unix milliseconds.
    pub modified_at: u64,
    /// Address of the node's creator.
    pub creator: String,
    /// Human-readable node name.
    pub name: Option<String>,
    /// Human-readable description.
    pub description: Option<String>,
    /// Language of the node's content.
    pub language: Option<String>,
    /// Whether item payloads are delivered with notifications.
    pub deliver_payloads: bool,
    /// Whether new subscriptions are accepted.
    pub subscription_enabled: bool,
}

// ---------------------------------------------------------------------------
// Affiliations and subscriptions
// ---------------------------------------------------------------------------

/// Standing role of a subject on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AffiliationRole {
    /// Full control over the node.
    Owner,
    /// May publish items.
    Publisher,
    /// May subscribe and retrieve items.
    Member,
    /// Banned from the node.
    Outcast,
    /// No standing role.
    None,
}

/// A subject with a standing role on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Affiliate {
    /// Address of the subject.
    pub jid: String,
    /// The subject's role on the node.
    pub affiliation: AffiliationRole,
}

/// Lifecycle state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionState {
    /// No subscription exists.
    None,
    /// Awaiting owner approval.
    Pending,
    /// Approved but not yet configured.
    Unconfigured,
    /// Active.
    Subscribed,
}

/// A standing request by a subject to receive notifications from a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Subscription id, unique within the node.
    pub id: String,
    /// Address notifications are delivered to.
    pub jid: String,
    /// Address that owns the subscription.
    pub owner: String,
    /// Current lifecycle state.
    pub state: SubscriptionState,
    /// Whether notifications should be delivered at all.
    pub deliver_notifications: bool,
    /// Whether notifications are batched into digests.
    pub digest: bool,
    /// Expiry timestamp in unix milliseconds, if the subscription expires.
    pub expire: Option<u64>,
    /// Keyword filter on item content, if any.
    pub keyword: Option<String>,
}

// ---------------------------------------------------------------------------
// Default node configuration
// ---------------------------------------------------------------------------

/// Default configuration applied to newly created nodes of a service,
/// separately for leaf and collection nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultNodeConfiguration {
    /// Service the defaults belong to.
    pub service_id: String,
    /// Whether these defaults apply to leaf (true) or collection nodes.
    pub leaf: bool,
    /// Default for payload delivery with notifications.
    pub deliver_payloads: bool,
    /// Default maximum payload size in bytes.
    pub max_payload_size: u32,
    /// Default for item persistence.
    pub persist_published_items: bool,
    /// Default retention bound; negative means unbounded.
    pub max_published_items: i32,
    /// Default for accepting subscriptions.
    pub subscription_enabled: bool,
    /// Default for sending the last published item on subscribe.
    pub send_item_subscribe: bool,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn uid() -> NodeUid {
        NodeUid::new("pubsub.example.org", "news")
    }

    #[test]
    fn test_node_uid_display() {
        assert_eq!(uid().to_string(), "pubsub.example.org/news");
    }

    #[test]
    fn test_item_key_display() {
        let key = uid().item_key("item-1");
        assert_eq!(key.to_string(), "pubsub.example.org/news/item-1");
    }

    #[test]
    fn test_item_key_equality_spans_fields() {
        let a = uid().item_key("item-1");
        let b = NodeUid::new("pubsub.example.org", "news").item_key("item-1");
        let c = NodeUid::new("pubsub.example.org", "other").item_key("item-1");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_item_key_hash() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(uid().item_key("a"));
        set.insert(uid().item_key("b"));
        set.insert(uid().item_key("a"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_published_item_key() {
        let item = PublishedItem {
            node: uid(),
            item_id: "item-9".to_string(),
            publisher: "alice@example.org".to_string(),
            created_at: 1_700_000_000_000,
            payload: Some(Bytes::from_static(b"<entry/>")),
        };
        assert_eq!(item.key(), uid().item_key("item-9"));
    }

    #[test]
    fn test_retention_bound_leaf_positive() {
        let kind = NodeKind::Leaf {
            persist_items: true,
            max_items: 10,
            max_payload_size: 5120,
        };
        assert_eq!(kind.retention_bound(), Some(10));
    }

    #[test]
    fn test_retention_bound_unbounded() {
        let kind = NodeKind::Leaf {
            persist_items: true,
            max_items: -1,
            max_payload_size: 5120,
        };
        assert_eq!(kind.retention_bound(), None);
    }

    #[test]
    fn test_retention_bound_non_persistent() {
        let kind = NodeKind::Leaf {
            persist_items: false,
            max_items: 10,
            max_payload_size: 5120,
        };
        assert_eq!(kind.retention_bound(), None);
    }

    #[test]
    fn test_retention_bound_collection() {
        assert_eq!(NodeKind::Collection.retention_bound(), None);
        assert!(!NodeKind::Collection.is_leaf());
    }
}
