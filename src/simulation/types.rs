//! Type definitions shared by the simulation kernel and the protocol layers.
//!
//! Contains:
//! - Node identifiers and message destinations
//! - Layer tags used for PDUs and for attributing process failures
//! - The generic PDU envelope and its tagged field values

use serde::Serialize;
use std::fmt;
use std::rc::Rc;

use crate::error::{SimError, SimResult};

/// Dense, zero-based node identifier assigned in creation order.
pub type NodeId = u32;

/// Default application message length in bits when the sender gives no override.
pub const DEFAULT_MSG_NBITS: u64 = 512;

/// Addressing for `send`: a single node or every in-range node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Destination {
    Broadcast,
    Node(NodeId),
}

impl Destination {
    /// Whether a frame with this destination should be accepted by `node`.
    pub fn accepts(&self, node: NodeId) -> bool {
        match self {
            Destination::Broadcast => true,
            Destination::Node(id) => *id == node,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self, Destination::Broadcast)
    }
}

impl From<NodeId> for Destination {
    fn from(id: NodeId) -> Self {
        Destination::Node(id)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Broadcast => write!(f, "broadcast"),
            Destination::Node(id) => write!(f, "{}", id),
        }
    }
}

/// Protocol layer tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Layer {
    App,
    Net,
    Mac,
    Phy,
    /// Layer supplied by user code (substituted stacks, simulator hooks).
    Custom(&'static str),
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layer::App => write!(f, "app"),
            Layer::Net => write!(f, "net"),
            Layer::Mac => write!(f, "mac"),
            Layer::Phy => write!(f, "phy"),
            Layer::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// Value stored in a named PDU field.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Node(NodeId),
    Dest(Destination),
    /// Nested PDU of the layer above. Shared, since every receiver gets a copy of the frame.
    Pdu(Rc<Pdu>),
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Destination> for Value {
    fn from(v: Destination) -> Self {
        Value::Dest(v)
    }
}

impl From<Pdu> for Value {
    fn from(v: Pdu) -> Self {
        Value::Pdu(Rc::new(v))
    }
}

/// Protocol data unit: a layer tag, a length in bits and an ordered list of named fields.
///
/// Layers nest PDUs by storing the PDU of the layer above in a `payload` field and
/// adding their own header bits. A layer only looks at its own fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Pdu {
    pub layer: Layer,
    pub nbits: u64,
    fields: Vec<(String, Value)>,
}

impl Pdu {
    pub fn new(layer: Layer, nbits: u64) -> Self {
        Self { layer, nbits, fields: Vec::new() }
    }

    /// Application message with the default length.
    pub fn app() -> Self {
        Self::new(Layer::App, DEFAULT_MSG_NBITS)
    }

    /// Builder-style field setter.
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Builder-style setter for node-id fields.
    pub fn with_node(self, name: &str, id: NodeId) -> Self {
        self.with_value(name, Value::Node(id))
    }

    fn with_value(mut self, name: &str, value: Value) -> Self {
        self.set(name, value);
        self
    }

    /// Set a field, replacing an existing one with the same name in place.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name.to_string(), value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    fn missing(&self, name: &str) -> SimError {
        SimError::MissingField { layer: self.layer, field: name.to_string() }
    }

    pub fn text(&self, name: &str) -> SimResult<&str> {
        match self.get(name) {
            Some(Value::Text(s)) => Ok(s),
            _ => Err(self.missing(name)),
        }
    }

    pub fn int(&self, name: &str) -> SimResult<i64> {
        match self.get(name) {
            Some(Value::Int(v)) => Ok(*v),
            _ => Err(self.missing(name)),
        }
    }

    pub fn node_id(&self, name: &str) -> SimResult<NodeId> {
        match self.get(name) {
            Some(Value::Node(id)) => Ok(*id),
            _ => Err(self.missing(name)),
        }
    }

    pub fn destination(&self, name: &str) -> SimResult<Destination> {
        match self.get(name) {
            Some(Value::Dest(d)) => Ok(*d),
            Some(Value::Node(id)) => Ok(Destination::Node(*id)),
            _ => Err(self.missing(name)),
        }
    }

    /// Nested PDU stored under `name`.
    pub fn pdu(&self, name: &str) -> SimResult<&Pdu> {
        match self.get(name) {
            Some(Value::Pdu(p)) => Ok(p),
            _ => Err(self.missing(name)),
        }
    }
}
